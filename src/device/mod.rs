// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device model: the per-device accumulator and its lifecycle events.

mod event;

pub use event::{DeviceEvent, EventKind};

use std::collections::HashMap;
use std::fmt;

/// Name of the sysfs attribute that carries the kernel event properties.
const UEVENT_ATTR: &str = "uevent";

/// A device as accumulated over the lifetime of the daemon.
///
/// Devices are identified by their kernel devpath. The attribute and uevent
/// maps are accumulators: each accepted event merges the latest udev view
/// into them, so rule evaluation sees every dynamic attribute observed so
/// far, not only those present at the triggering moment.
///
/// The raw `uevent` attribute is never retained in [`attrs`](Self::attrs);
/// its `K=V` payload is always split out into [`uevent`](Self::uevent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    path: String,
    subsystem: String,
    devtype: Option<String>,
    driver: Option<String>,
    attrs: HashMap<String, String>,
    uevent: HashMap<String, String>,
}

impl Device {
    /// Creates an empty device for the given devpath.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            subsystem: String::new(),
            devtype: None,
            driver: None,
            attrs: HashMap::new(),
            uevent: HashMap::new(),
        }
    }

    /// Returns the kernel devpath of the device.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the udev subsystem of the device.
    #[must_use]
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Returns the udev device type, if any.
    #[must_use]
    pub fn devtype(&self) -> Option<&str> {
        self.devtype.as_deref()
    }

    /// Returns the kernel driver bound to the device, if any.
    #[must_use]
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// Returns the accumulated attribute map.
    #[must_use]
    pub fn attrs(&self) -> &HashMap<String, String> {
        &self.attrs
    }

    /// Returns the accumulated uevent map.
    #[must_use]
    pub fn uevent(&self) -> &HashMap<String, String> {
        &self.uevent
    }

    /// Refreshes the device from a raw udev snapshot.
    ///
    /// Scalar fields are overwritten; the attribute and uevent maps are
    /// merged so previously seen values survive. The snapshot's raw
    /// `uevent` attribute is split into the uevent map instead of landing
    /// in `attrs`.
    pub fn refresh(&mut self, snapshot: DeviceSnapshot) {
        self.subsystem = snapshot.subsystem;
        self.devtype = snapshot.devtype;
        self.driver = snapshot.driver;

        let mut attrs = snapshot.attrs;
        if let Some(payload) = attrs.remove(UEVENT_ATTR) {
            self.uevent.extend(split_uevent(&payload));
        }
        self.attrs.extend(attrs);
    }

    /// Dumps a detailed multi-line description of the device.
    #[must_use]
    pub fn debug_dump(&self) -> String {
        let mut out = format!("{self}\n");

        let mut attrs: Vec<&String> = self.attrs.keys().collect();
        attrs.sort();
        out.push_str("ATTRS:\n");
        for attr in attrs {
            out.push_str(&format!("  {}={}\n", attr, self.attrs[attr]));
        }

        let mut uevents: Vec<&String> = self.uevent.keys().collect();
        uevents.sort();
        out.push_str("UEVENT:\n");
        for uevent in uevents {
            out.push_str(&format!("  {}={}\n", uevent, self.uevent[uevent]));
        }

        out
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({})", self.path, self.subsystem)?;
        if let Some(devtype) = &self.devtype {
            write!(f, " type:{devtype}")?;
        }
        if let Some(driver) = &self.driver {
            write!(f, " driver:{driver}")?;
        }
        Ok(())
    }
}

/// A raw view of a udev device at one moment in time.
///
/// Snapshots decouple record keeping from the udev handle: the monitor
/// builds one per event and feeds it to the record store, which keeps the
/// store testable without any hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Kernel devpath.
    pub path: String,
    /// Udev subsystem.
    pub subsystem: String,
    /// Udev device type.
    pub devtype: Option<String>,
    /// Bound kernel driver.
    pub driver: Option<String>,
    /// Sysfs attributes, possibly including the raw `uevent` payload.
    pub attrs: HashMap<String, String>,
}

/// Splits a raw `uevent` attribute payload into key/value pairs.
///
/// The payload is newline-delimited `K=V` lines; both sides are trimmed,
/// and empty or malformed lines are ignored.
fn split_uevent(payload: &str) -> HashMap<String, String> {
    let mut uevent = HashMap::new();

    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        uevent.insert(key.trim().to_string(), value.trim().to_string());
    }

    uevent
}
