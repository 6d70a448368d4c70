// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Udev-backed device monitor.
//!
//! Streams live kernel device events for a fixed subsystem whitelist and,
//! before the live stream begins, emits a synthetic `Coldplug` event for
//! every matching device already present. A per-devpath record store
//! accumulates attributes across events, so rules always evaluate against
//! everything the daemon has learned about a device.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_stream::StreamExt;
use tokio_udev::{AsyncMonitorSocket, Enumerator, MonitorBuilder};
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::device::{Device, DeviceEvent, DeviceSnapshot, EventKind};
use crate::error::{Error, Result};

/// The subsystems the daemon reacts to.
pub const MONITORED_SUBSYSTEMS: [&str; 2] = ["usb", "input"];

/// Type alias for device event callbacks.
type DeviceCallback = Arc<dyn Fn(&DeviceEvent) -> Result<()> + Send + Sync>;

/// Per-devpath store of live device records.
///
/// Pure bookkeeping over [`DeviceSnapshot`]s: the udev glue stays thin and
/// the state machine is testable without hardware.
#[derive(Debug, Default)]
pub(crate) struct RecordStore {
    records: HashMap<String, Device>,
}

impl RecordStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Applies one event's snapshot and returns the event to emit.
    ///
    /// A first sighting creates a record unless the event is `Unbind` or
    /// `Remove`; a `Remove` drops the record, so the returned event is its
    /// final emission. Every accepted event refreshes the record first.
    pub(crate) fn apply(&mut self, kind: EventKind, snapshot: DeviceSnapshot) -> DeviceEvent {
        let path = snapshot.path.clone();

        let existed = self.records.contains_key(&path);
        let mut device = self
            .records
            .remove(&path)
            .unwrap_or_else(|| Device::new(path.as_str()));
        device.refresh(snapshot);

        let event = DeviceEvent::new(kind, device.clone());

        match kind {
            EventKind::Remove => {}
            EventKind::Unbind if !existed => {}
            _ => {
                self.records.insert(path, device);
            }
        }

        event
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

/// Udev-backed device monitor for the whitelisted subsystems.
///
/// Callbacks are registered before [`start`](Self::start); each emitted
/// event is handed to every callback, and a callback error is reported to
/// the bus without stopping the remaining callbacks.
pub struct UdevDeviceMonitor {
    callbacks: Arc<RwLock<Vec<DeviceCallback>>>,
    bus: MessageBus,
    cancel: Mutex<Option<CancellationToken>>,
}

impl UdevDeviceMonitor {
    /// Creates a new monitor.
    #[must_use]
    pub fn new(bus: MessageBus) -> Self {
        Self {
            callbacks: Arc::new(RwLock::new(Vec::new())),
            bus,
            cancel: Mutex::new(None),
        }
    }

    /// Registers a callback invoked for every emitted device event.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&DeviceEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Starts the monitor, replacing any previous run.
    ///
    /// The netlink subscription is registered first so that events racing
    /// the coldplug enumeration are not lost, then every already-present
    /// initialized device in the whitelist is emitted as `Coldplug`, then
    /// the live worker takes over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UdevSetup`] if the netlink subscription or the
    /// enumeration cannot be created.
    pub fn start(&self) -> Result<()> {
        self.stop();

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let mut builder = MonitorBuilder::new().map_err(Error::UdevSetup)?;
        for subsystem in MONITORED_SUBSYSTEMS {
            builder = builder
                .match_subsystem(subsystem)
                .map_err(Error::UdevSetup)?;
        }
        let socket = builder.listen().map_err(Error::UdevSetup)?;
        let mut socket = AsyncMonitorSocket::new(socket).map_err(Error::UdevSetup)?;

        let mut records = RecordStore::new();
        self.coldplug(&mut records)?;

        let callbacks = Arc::clone(&self.callbacks);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = socket.next() => match next {
                        Some(Ok(event)) => {
                            let device = event.device();
                            let action = device
                                .property_value("ACTION")
                                .map(|a| a.to_string_lossy().into_owned())
                                .unwrap_or_default();

                            let kind = EventKind::from_action(&action);
                            if kind == EventKind::Unknown {
                                bus.error(format!("Unknown event type: '{action}'"));
                                continue;
                            }

                            process(kind, &device, &mut records, &callbacks, &bus);
                        }
                        Some(Err(err)) => bus.error(format!("udev socket error: {err}")),
                        None => break,
                    },
                }
            }
            bus.debug("device monitor stopped");
        });

        self.bus.debug("device monitor started");
        Ok(())
    }

    /// Stops the live worker. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    /// Emits a `Coldplug` event for every initialized whitelisted device.
    fn coldplug(&self, records: &mut RecordStore) -> Result<()> {
        let mut enumerator = Enumerator::new().map_err(Error::UdevSetup)?;
        enumerator.match_is_initialized().map_err(Error::UdevSetup)?;
        for subsystem in MONITORED_SUBSYSTEMS {
            enumerator
                .match_subsystem(subsystem)
                .map_err(Error::UdevSetup)?;
        }

        for device in enumerator.scan_devices().map_err(Error::UdevSetup)? {
            process(
                EventKind::Coldplug,
                &device,
                records,
                &self.callbacks,
                &self.bus,
            );
        }

        Ok(())
    }
}

/// Runs one device through the shared processing path.
fn process(
    kind: EventKind,
    udev_device: &tokio_udev::Device,
    records: &mut RecordStore,
    callbacks: &RwLock<Vec<DeviceCallback>>,
    bus: &MessageBus,
) {
    let Some(snapshot) = snapshot_device(udev_device) else {
        // Not initialized yet; udev will deliver a follow-up event.
        return;
    };

    if !MONITORED_SUBSYSTEMS.contains(&snapshot.subsystem.as_str()) {
        bus.error(format!(
            "Unexpected subsystem. Expected one of {MONITORED_SUBSYSTEMS:?}; got: {}",
            snapshot.subsystem
        ));
        return;
    }

    let event = records.apply(kind, snapshot);

    bus.info(event.to_string());
    bus.debug(event.device().debug_dump());

    for callback in callbacks.read().iter() {
        if let Err(err) = callback(&event) {
            bus.error(err);
        }
    }
}

/// Captures the current udev view of a device.
///
/// Returns `None` for devices udev has not finished initializing.
fn snapshot_device(device: &tokio_udev::Device) -> Option<DeviceSnapshot> {
    if !device.is_initialized() {
        return None;
    }

    let mut attrs = HashMap::new();
    for entry in device.attributes() {
        let name = entry.name();
        if let Some(value) = device.attribute_value(name) {
            attrs.insert(
                name.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            );
        }
    }

    Some(DeviceSnapshot {
        path: device.devpath().to_string_lossy().into_owned(),
        subsystem: device
            .subsystem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        devtype: device.devtype().map(|t| t.to_string_lossy().into_owned()),
        driver: device.driver().map(|d| d.to_string_lossy().into_owned()),
        attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(path: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            path: path.to_string(),
            subsystem: "usb".to_string(),
            devtype: None,
            driver: None,
            attrs: HashMap::new(),
        }
    }

    #[test]
    fn first_sighting_creates_a_record() {
        let mut store = RecordStore::new();

        let event = store.apply(EventKind::Add, snapshot("/devices/usb1"));

        assert_eq!(event.kind(), EventKind::Add);
        assert!(store.contains("/devices/usb1"));
    }

    #[test]
    fn unbind_without_record_does_not_insert() {
        let mut store = RecordStore::new();

        let event = store.apply(EventKind::Unbind, snapshot("/devices/usb1"));

        assert_eq!(event.kind(), EventKind::Unbind);
        assert!(!store.contains("/devices/usb1"));
    }

    #[test]
    fn remove_without_record_does_not_insert() {
        let mut store = RecordStore::new();

        store.apply(EventKind::Remove, snapshot("/devices/usb1"));

        assert!(!store.contains("/devices/usb1"));
    }

    #[test]
    fn record_survives_bind_and_unbind_then_dies_on_remove() {
        let mut store = RecordStore::new();
        let path = "/devices/usb1";

        store.apply(EventKind::Add, snapshot(path));
        assert!(store.contains(path));

        store.apply(EventKind::Bind, snapshot(path));
        assert!(store.contains(path));

        store.apply(EventKind::Unbind, snapshot(path));
        assert!(store.contains(path));

        let last = store.apply(EventKind::Remove, snapshot(path));
        assert_eq!(last.kind(), EventKind::Remove);
        assert!(!store.contains(path));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn final_remove_emission_carries_accumulated_attrs() {
        let mut store = RecordStore::new();
        let path = "/devices/usb1";

        let mut snap = snapshot(path);
        snap.attrs.insert("idVendor".to_string(), "046d".to_string());
        store.apply(EventKind::Add, snap);

        let event = store.apply(EventKind::Remove, snapshot(path));

        assert_eq!(
            event.device().attrs().get("idVendor").map(String::as_str),
            Some("046d")
        );
    }

    #[test]
    fn each_event_refreshes_the_record() {
        let mut store = RecordStore::new();
        let path = "/devices/usb1";

        store.apply(EventKind::Add, snapshot(path));

        let mut snap = snapshot(path);
        snap.driver = Some("hub".to_string());
        let event = store.apply(EventKind::Bind, snap);

        assert_eq!(event.device().driver(), Some("hub"));
    }

    #[test]
    fn records_are_kept_per_devpath() {
        let mut store = RecordStore::new();

        store.apply(EventKind::Add, snapshot("/devices/usb1"));
        store.apply(EventKind::Add, snapshot("/devices/usb2"));
        assert_eq!(store.len(), 2);

        store.apply(EventKind::Remove, snapshot("/devices/usb1"));
        assert_eq!(store.len(), 1);
        assert!(store.contains("/devices/usb2"));
    }

    #[test]
    fn coldplug_creates_records_like_add() {
        let mut store = RecordStore::new();

        let event = store.apply(EventKind::Coldplug, snapshot("/devices/usb1"));

        assert_eq!(event.kind(), EventKind::Coldplug);
        assert!(store.contains("/devices/usb1"));
    }
}
