// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event sources: the udev device monitor and the configuration directory
//! monitor.

pub mod conf;
pub mod device;

pub use conf::{ConfMonitor, FileEvent, FileEventKind};
pub use device::{MONITORED_SUBSYSTEMS, UdevDeviceMonitor};
