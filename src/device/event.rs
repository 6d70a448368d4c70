// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use std::fmt;

use super::Device;

/// A noteworthy change in the status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A device was added.
    Add,
    /// A device was removed.
    Remove,
    /// A driver was bound to the device.
    Bind,
    /// A driver was unbound from the device.
    Unbind,
    /// Something changed about the device, for instance a medium was
    /// inserted into an already plugged reader.
    Change,
    /// The device's path changed, for instance a network interface was
    /// renamed to a stable name.
    Move,
    /// The device was already present when the daemon started.
    Coldplug,
    /// The udev action string was not recognized. Never propagated to the
    /// rule registry.
    Unknown,
}

impl EventKind {
    /// Translates a udev action string into an event kind.
    ///
    /// Anything outside the fixed translation table yields
    /// [`EventKind::Unknown`].
    #[must_use]
    pub fn from_action(action: &str) -> Self {
        match action {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "bind" => Self::Bind,
            "unbind" => Self::Unbind,
            "change" => Self::Change,
            "move" => Self::Move,
            _ => Self::Unknown,
        }
    }

    /// Parses an event name as written in a rule file.
    ///
    /// Matching is case-insensitive. `Unknown` is not nameable; a name
    /// outside the closed set returns `None`.
    #[must_use]
    pub fn from_rule_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "bind" => Some(Self::Bind),
            "unbind" => Some(Self::Unbind),
            "change" => Some(Self::Change),
            "move" => Some(Self::Move),
            "coldplug" => Some(Self::Coldplug),
            _ => None,
        }
    }

    /// Returns the uppercase name of the kind, as injected into command
    /// environments.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::Bind => "BIND",
            Self::Unbind => "UNBIND",
            Self::Change => "CHANGE",
            Self::Move => "MOVE",
            Self::Coldplug => "COLDPLUG",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns the lowercase name used in rule files.
    #[must_use]
    pub fn rule_name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::Change => "change",
            Self::Move => "move",
            Self::Coldplug => "coldplug",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable pairing of an event kind and the device it happened to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    kind: EventKind,
    device: Device,
}

impl DeviceEvent {
    /// Creates a new device event.
    #[must_use]
    pub fn new(kind: EventKind, device: Device) -> Self {
        Self { kind, device }
    }

    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the device the event happened to.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event: {}; Device: {}", self.kind, self.device)
    }
}
