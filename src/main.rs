// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `onplugd` daemon binary.
//!
//! Wires CLI parsing, logging and signal supervision around the engine.
//! `SIGHUP` tears the whole composition down and rebuilds it from scratch
//! (a full reload); `SIGINT` exits cleanly.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};

use onplugd::bus::MessageBus;
use onplugd::engine::Engine;
use onplugd::executor::{Executor, ShellExecutor};
use onplugd::monitor::{ConfMonitor, UdevDeviceMonitor};
use onplugd::rules::ActionRegistry;
use onplugd::util;

/// React to device plug events with user-defined commands.
#[derive(Debug, Parser)]
#[command(name = "onplugd", version)]
struct Args {
    /// The directory where configs are stored.
    #[arg(long = "config_dir", default_value = "~/.config/onplugd.d/")]
    config_dir: String,

    /// Log more verbosely.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config_dir = util::expand(&args.config_dir);

    if args.debug {
        tracing::debug!("Debug on.");
        tracing::debug!("Config directory: {config_dir}");
    }
    tracing::info!("Started with PID {}", std::process::id());

    let mut sighup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    loop {
        let engine = build_engine(&config_dir, args.debug);
        engine.start().context("starting engine")?;

        tokio::select! {
            _ = sighup.recv() => {
                tracing::info!("SIGHUP received, reloading...");
                engine.stop();
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, quitting...");
                engine.stop();
                break;
            }
        }
    }

    Ok(())
}

/// Builds one complete composition: bus, executor, registry, monitors,
/// engine. Each reload cycle gets a fresh one.
fn build_engine(config_dir: &str, debug: bool) -> Engine {
    let bus = MessageBus::new(debug);
    let executor = Arc::new(ShellExecutor::new(bus.clone()));
    let registry = Arc::new(ActionRegistry::new(
        bus.clone(),
        Arc::clone(&executor) as Arc<dyn Executor>,
    ));
    let conf_monitor = Arc::new(ConfMonitor::new(config_dir, bus.clone()));
    let device_monitor = Arc::new(UdevDeviceMonitor::new(bus.clone()));

    let engine = Engine::new(device_monitor, conf_monitor, registry, bus);
    engine.add_cleanup(move || executor.cancel_all());
    engine
}

/// Initializes the tracing subscriber on stdout.
///
/// The timestamp prefix is only emitted when stdout is a terminal; under a
/// journal the collector stamps lines itself.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if std::io::stdout().is_terminal() {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
