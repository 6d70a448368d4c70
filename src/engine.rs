// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle composition of the daemon's workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::monitor::conf::ConfMonitor;
use crate::monitor::device::UdevDeviceMonitor;
use crate::rules::registry::ActionRegistry;
use crate::rules::updater::RegistryUpdater;

/// Type alias for cleanup callbacks invoked at engine stop.
type CleanupFn = Box<dyn Fn() + Send + Sync>;

/// Composes the daemon's workers and owns their lifecycle.
///
/// `start` brings the workers up so that the first device events find a
/// fully populated rule set: registry updater first, then the config
/// monitor, then the device monitor. `stop` reverses the order and then
/// invokes the registered cleanup callbacks. Both are idempotent.
///
/// Construction wires the single bridge between the device monitor and the
/// registry: a callback carrying the registry (not the engine), so
/// ownership stays unidirectional.
pub struct Engine {
    device_monitor: Arc<UdevDeviceMonitor>,
    conf_monitor: Arc<ConfMonitor>,
    updater: RegistryUpdater,
    bus: MessageBus,
    started: AtomicBool,
    cleanups: Mutex<Vec<CleanupFn>>,
}

impl Engine {
    /// Creates an engine over the given components.
    #[must_use]
    pub fn new(
        device_monitor: Arc<UdevDeviceMonitor>,
        conf_monitor: Arc<ConfMonitor>,
        registry: Arc<ActionRegistry>,
        bus: MessageBus,
    ) -> Self {
        let updater = RegistryUpdater::new(
            Arc::clone(&registry),
            Arc::clone(&conf_monitor),
            bus.clone(),
        );

        let dispatch = Arc::clone(&registry);
        device_monitor.add_callback(move |event| {
            dispatch.on_device_event(event);
            Ok(())
        });

        Self {
            device_monitor,
            conf_monitor,
            updater,
            bus,
            started: AtomicBool::new(false),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback invoked at every stop, after the workers are
    /// down (e.g. the executor's scope cancel).
    pub fn add_cleanup<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cleanups.lock().push(Box::new(callback));
    }

    /// Starts the workers, restarting them if already running.
    ///
    /// # Errors
    ///
    /// Returns an error if any worker fails to start; workers already
    /// started in the failed attempt are stopped again.
    pub fn start(&self) -> Result<()> {
        self.stop();

        let result = self
            .updater
            .start()
            .and_then(|()| self.conf_monitor.start())
            .and_then(|()| self.device_monitor.start());

        if let Err(err) = result {
            self.device_monitor.stop();
            self.conf_monitor.stop();
            self.updater.stop();
            return Err(err);
        }

        self.bus.debug("engine started");
        self.started.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Stops the workers in reverse start order, then runs the cleanup
    /// callbacks. Idempotent.
    pub fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            self.device_monitor.stop();
            self.conf_monitor.stop();
            self.updater.stop();
            self.bus.debug("engine stopped");

            for cleanup in self.cleanups.lock().iter() {
                cleanup();
            }
        }
    }
}
