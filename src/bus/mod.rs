// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message bus for fanning out severity-tagged log messages.
//!
//! Every component publishes its diagnostics through a [`MessageBus`] rather
//! than logging directly, so the daemon's whole output flows through one
//! place. Registered sinks receive each message in publication order; the
//! default sink forwards to `tracing`, filtering debug messages by a flag.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Severity of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Actual errors.
    Error,
    /// Informational messages.
    Info,
    /// Messages only useful when debugging.
    Debug,
}

/// Type alias for message sinks.
type Sink = Box<dyn Fn(Severity, &str) + Send + Sync>;

/// Fan-out of `(severity, message)` pairs to registered sinks.
///
/// Clones share the sink list, so a bus handed to every component behaves
/// as one process-wide pipe. Sinks are expected to be registered at
/// configuration time, before the workers start publishing.
///
/// # Examples
///
/// ```
/// use onplugd::bus::{MessageBus, Severity};
///
/// let bus = MessageBus::empty();
/// bus.add_sink(|severity, message| {
///     if severity == Severity::Error {
///         eprintln!("{message}");
///     }
/// });
///
/// bus.info("started");
/// bus.error("something broke");
/// ```
pub struct MessageBus {
    sinks: Arc<RwLock<Vec<Sink>>>,
}

impl MessageBus {
    /// Creates a bus with the default sink installed.
    ///
    /// The default sink forwards `Error` and `Info` messages to the
    /// corresponding `tracing` macros; `Debug` messages are forwarded only
    /// when `debug_enabled` is set.
    #[must_use]
    pub fn new(debug_enabled: bool) -> Self {
        let bus = Self::empty();

        bus.add_sink(move |severity, message| match severity {
            Severity::Error => tracing::error!("{message}"),
            Severity::Info => tracing::info!("{message}"),
            Severity::Debug if debug_enabled => tracing::debug!("{message}"),
            Severity::Debug => {}
        });

        bus
    }

    /// Creates a bus with no sinks registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Publishes an error message.
    pub fn error(&self, error: impl fmt::Display) {
        self.feed(Severity::Error, &error.to_string());
    }

    /// Publishes an informational message.
    pub fn info(&self, message: impl AsRef<str>) {
        self.feed(Severity::Info, message.as_ref());
    }

    /// Publishes a debug message.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.feed(Severity::Debug, message.as_ref());
    }

    /// Registers a sink on this bus.
    pub fn add_sink<F>(&self, sink: F)
    where
        F: Fn(Severity, &str) + Send + Sync + 'static,
    {
        self.sinks.write().push(Box::new(sink));
    }

    /// Removes every registered sink.
    pub fn clear_sinks(&self) {
        self.sinks.write().clear();
    }

    /// Returns the number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    fn feed(&self, severity: Severity, message: &str) {
        for sink in self.sinks.read().iter() {
            sink(severity, message);
        }
    }
}

impl Clone for MessageBus {
    fn clone(&self) -> Self {
        Self {
            sinks: Arc::clone(&self.sinks),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("sinks", &self.sink_count())
            .finish()
    }
}
