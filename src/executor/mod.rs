// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fire-and-forget execution of shell command lines.
//!
//! Commands run as `/bin/sh -c <cmdline>` children under one shared
//! cancellation scope. Their stdout and stderr are absorbed line-by-line
//! into the message bus, tagged with the rule that spawned them, so child
//! output lands in the daemon's log stream without any risk of a full pipe
//! stalling the event loops.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::util;

/// A runner for shell command lines.
///
/// The trait is the seam between rule dispatch and process management:
/// production code uses [`ShellExecutor`], tests substitute a recording
/// implementation.
pub trait Executor: Send + Sync {
    /// Runs `cmdline` with `env` applied on top of the process environment.
    ///
    /// Must never block the caller; the command is started in the
    /// background and its outcome is reported through the message bus,
    /// tagged with `prefix`.
    fn exec(&self, cmdline: &str, env: Vec<(String, String)>, prefix: &str);
}

/// The production [`Executor`]: spawns `/bin/sh -c` children.
///
/// All children spawned by one executor share a cancellation scope;
/// [`cancel_all`](Self::cancel_all) terminates every still-running child.
/// The working directory is `/` and stdin is closed, so commands cannot
/// accidentally depend on the daemon's own context.
pub struct ShellExecutor {
    bus: MessageBus,
    cancel: CancellationToken,
}

impl ShellExecutor {
    /// Creates a new executor with a fresh cancellation scope.
    #[must_use]
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels the shared scope, terminating every still-running child.
    ///
    /// Idempotent; children spawned after cancellation are terminated
    /// immediately.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }
}

impl Executor for ShellExecutor {
    fn exec(&self, cmdline: &str, env: Vec<(String, String)>, prefix: &str) {
        let cmdline = util::expand(cmdline);
        let prefix = prefix.to_string();
        let bus = self.bus.clone();
        let cancel = self.cancel.clone();

        bus.info(format!("Executing '{cmdline}'"));
        bus.debug(format!("Extra environment: {env:?}"));

        tokio::spawn(async move {
            run_child(cmdline, env, prefix, bus, cancel).await;
        });
    }
}

/// Spawns the child and supervises it until exit or cancellation.
async fn run_child(
    cmdline: String,
    env: Vec<(String, String)>,
    prefix: String,
    bus: MessageBus,
    cancel: CancellationToken,
) {
    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(&cmdline)
        .current_dir("/")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(env)
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            bus.error(format!("Command '{cmdline}' failed to start: {err}"));
            return;
        }
    };

    let stdout_pump = child.stdout.take().map(|out| {
        tokio::spawn(pump_lines(out, format!("STDOUT ({prefix}):"), bus.clone()))
    });
    let stderr_pump = child.stderr.take().map(|err| {
        tokio::spawn(pump_lines(err, format!("STDERR ({prefix}):"), bus.clone()))
    });

    let status = tokio::select! {
        status = child.wait() => status,
        () = cancel.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    // The pipes reach EOF once the child is gone; wait for the pumps so any
    // trailing partial line is flushed before the status is reported.
    if let Some(pump) = stdout_pump {
        let _ = pump.await;
    }
    if let Some(pump) = stderr_pump {
        let _ = pump.await;
    }

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => bus.error(format!("Command '{cmdline}' failed with status {status}")),
        Err(err) => bus.error(format!("Command '{cmdline}' failed: {err}")),
    }
}

/// Forwards each line of `reader` to the bus, tagged with `tag`.
///
/// `next_line` yields the final unterminated fragment before EOF, which
/// gives the flush-on-exit behavior for children that do not end their
/// last line with a newline.
async fn pump_lines<R>(reader: R, tag: String, bus: MessageBus)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        bus.info(format!("{tag} {line}"));
    }
}
