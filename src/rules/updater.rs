// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Applies configuration directory changes to the action registry.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::monitor::conf::{ConfMonitor, FileEvent, FileEventKind};
use crate::rules::action::Action;
use crate::rules::registry::ActionRegistry;

/// Keeps an [`ActionRegistry`] reconciled with a [`ConfMonitor`]'s stream.
///
/// Deletions remove the rule keyed by the file's basename; creations and
/// modifications parse the file and replace the stored rule atomically.
/// A file that fails to parse is logged and skipped, leaving the registry
/// unchanged.
pub struct RegistryUpdater {
    registry: Arc<ActionRegistry>,
    monitor: Arc<ConfMonitor>,
    bus: MessageBus,
    cancel: Mutex<Option<CancellationToken>>,
}

impl RegistryUpdater {
    /// Creates a new updater.
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>, monitor: Arc<ConfMonitor>, bus: MessageBus) -> Self {
        Self {
            registry,
            monitor,
            bus,
            cancel: Mutex::new(None),
        }
    }

    /// Claims the monitor's event stream and starts the updater worker.
    ///
    /// Starts the monitor if it is not running yet. Returns success
    /// immediately if the updater is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the config monitor cannot be started or its
    /// event channel is unavailable.
    pub fn start(&self) -> Result<()> {
        {
            let cancel = self.cancel.lock();
            if let Some(token) = cancel.as_ref()
                && !token.is_cancelled()
            {
                return Ok(());
            }
        }

        let mut events = self.monitor.events()?;

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let registry = Arc::clone(&self.registry);
        let monitor = Arc::clone(&self.monitor);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = events.recv() => match next {
                        Some(event) => apply(&registry, &event, &bus),
                        None => break,
                    },
                }
            }

            monitor.stop();
            bus.debug("registry updater stopped");
        });

        self.bus.debug("registry updater started");
        Ok(())
    }

    /// Stops the updater worker. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }
}

/// Applies one file event to the registry.
fn apply(registry: &ActionRegistry, event: &FileEvent, bus: &MessageBus) {
    let name = event
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match event.kind {
        FileEventKind::Delete => {
            bus.info(format!("Conf file removed: {name}"));
            registry.remove(&name);
        }
        kind => match Action::from_file(&event.path) {
            Ok(action) => {
                if kind == FileEventKind::Create {
                    bus.info(format!("Conf file added: {name}"));
                } else {
                    bus.info(format!("Conf file modified: {name}"));
                }
                registry.update(name, action);
            }
            Err(err) => {
                bus.error(format!(
                    "Error while reading {}: {err}",
                    event.path.display()
                ));
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::bus::Severity;
    use crate::executor::Executor;

    struct NullExecutor;

    impl Executor for NullExecutor {
        fn exec(&self, _cmdline: &str, _env: Vec<(String, String)>, _prefix: &str) {}
    }

    fn registry() -> Arc<ActionRegistry> {
        Arc::new(ActionRegistry::new(
            MessageBus::empty(),
            Arc::new(NullExecutor),
        ))
    }

    fn capture_bus() -> (MessageBus, Arc<StdMutex<Vec<(Severity, String)>>>) {
        let bus = MessageBus::empty();
        let captured = Arc::new(StdMutex::new(Vec::new()));

        let sink_capture = Arc::clone(&captured);
        bus.add_sink(move |severity, message| {
            sink_capture
                .lock()
                .unwrap()
                .push((severity, message.to_string()));
        });

        (bus, captured)
    }

    #[test]
    fn create_event_inserts_the_parsed_rule() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ok.conf");
        std::fs::write(&path, "[match]\nsubsystem = usb\n").unwrap();

        let registry = registry();
        let (bus, captured) = capture_bus();

        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Create,
                path,
            },
            &bus,
        );

        assert!(registry.contains("ok.conf"));
        assert!(
            captured
                .lock()
                .unwrap()
                .iter()
                .any(|(_, m)| m == "Conf file added: ok.conf")
        );
    }

    #[test]
    fn change_event_replaces_the_rule() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ok.conf");
        std::fs::write(&path, "[action]\nexec = /bin/echo old\n").unwrap();

        let registry = registry();
        let (bus, _) = capture_bus();

        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Create,
                path: path.clone(),
            },
            &bus,
        );

        std::fs::write(&path, "[action]\nexec = /bin/echo new\n").unwrap();
        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Change,
                path,
            },
            &bus,
        );

        let action = registry.get("ok.conf").unwrap();
        assert_eq!(action.execs(), ["/bin/echo new"]);
    }

    #[test]
    fn parse_failure_is_logged_and_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.conf");
        std::fs::write(&path, "[match]\nattr = broken\n").unwrap();

        let registry = registry();
        let (bus, captured) = capture_bus();

        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Create,
                path,
            },
            &bus,
        );

        assert!(!registry.contains("bad.conf"));
        assert!(
            captured
                .lock()
                .unwrap()
                .iter()
                .any(|(severity, m)| *severity == Severity::Error
                    && m.contains("Error while reading"))
        );
    }

    #[test]
    fn parse_failure_keeps_the_prior_rule() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ok.conf");
        std::fs::write(&path, "[action]\nexec = /bin/echo keep\n").unwrap();

        let registry = registry();
        let (bus, _) = capture_bus();

        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Create,
                path: path.clone(),
            },
            &bus,
        );

        std::fs::write(&path, "[match]\nattr = broken\n").unwrap();
        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Change,
                path,
            },
            &bus,
        );

        let action = registry.get("ok.conf").unwrap();
        assert_eq!(action.execs(), ["/bin/echo keep"]);
    }

    #[test]
    fn delete_event_removes_by_basename() {
        let registry = registry();
        let (bus, captured) = capture_bus();

        registry.update(
            "gone.conf",
            Action::parse("gone.conf", "[match]\n").unwrap(),
        );

        apply(
            &registry,
            &FileEvent {
                kind: FileEventKind::Delete,
                path: PathBuf::from("/some/dir/gone.conf"),
            },
            &bus,
        );

        assert!(!registry.contains("gone.conf"));
        assert!(
            captured
                .lock()
                .unwrap()
                .iter()
                .any(|(_, m)| m == "Conf file removed: gone.conf")
        );
    }
}
