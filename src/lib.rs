// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `onplugd` - react to Linux device plug events with user-defined commands.
//!
//! The daemon couples three asynchronous sources into one dispatch loop:
//! a udev-backed device monitor (live netlink events plus a coldplug pass
//! over devices already present), a configuration directory monitor
//! streaming rule file changes, and an action registry that evaluates every
//! device event against the live rule set and spawns shell commands for
//! each match.
//!
//! # Rule files
//!
//! Rules live in `*.conf` files in the watched directory, one rule per
//! file, keyed by basename. Keys may be repeated to build candidate lists:
//!
//! ```text
//! [match]
//! event = add
//! event = remove
//! subsystem = usb
//! attr = idVendor=046d
//!
//! [action]
//! exec = /usr/local/bin/notify "mouse plugged"
//! ```
//!
//! A rule with no `event` keys defaults to `{coldplug, add}`; an empty
//! candidate list is a wildcard. Matching is case-insensitive and an empty
//! device field never matches a non-wildcard candidate.
//!
//! # Composition
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use onplugd::bus::MessageBus;
//! use onplugd::engine::Engine;
//! use onplugd::executor::{Executor, ShellExecutor};
//! use onplugd::monitor::{ConfMonitor, UdevDeviceMonitor};
//! use onplugd::rules::ActionRegistry;
//!
//! #[tokio::main]
//! async fn main() -> onplugd::Result<()> {
//!     let bus = MessageBus::new(false);
//!     let executor = Arc::new(ShellExecutor::new(bus.clone()));
//!     let registry = Arc::new(ActionRegistry::new(
//!         bus.clone(),
//!         Arc::clone(&executor) as Arc<dyn Executor>,
//!     ));
//!     let conf_monitor = Arc::new(ConfMonitor::new("/etc/onplugd.d", bus.clone()));
//!     let device_monitor = Arc::new(UdevDeviceMonitor::new(bus.clone()));
//!
//!     let engine = Engine::new(device_monitor, conf_monitor, registry, bus);
//!     engine.add_cleanup(move || executor.cancel_all());
//!
//!     engine.start()?;
//!     tokio::signal::ctrl_c().await.ok();
//!     engine.stop();
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod device;
pub mod engine;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod rules;
pub mod util;

pub use bus::{MessageBus, Severity};
pub use device::{Device, DeviceEvent, DeviceSnapshot, EventKind};
pub use engine::Engine;
pub use error::{Error, Result, RuleParseError};
pub use executor::{Executor, ShellExecutor};
pub use monitor::{ConfMonitor, FileEvent, FileEventKind, MONITORED_SUBSYSTEMS, UdevDeviceMonitor};
pub use rules::{Action, ActionRegistry, RegistryUpdater, event_environment};
