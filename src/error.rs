// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for `onplugd`.
//!
//! Failures that would compromise a component's invariants surface through
//! these types; everything else (watcher hiccups, child exit codes, callback
//! errors) is absorbed locally and reported through the message bus.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A rule file could not be parsed.
    #[error("rule parse error: {0}")]
    RuleParse(#[from] RuleParseError),

    /// The udev subscription or enumeration could not be set up.
    #[error("udev monitor setup failed: {0}")]
    UdevSetup(#[source] std::io::Error),

    /// The filesystem watcher could not be set up.
    #[error("file watcher setup failed: {0}")]
    WatcherSetup(#[from] notify::Error),

    /// The configuration directory could not be created.
    #[error("cannot create config directory {path}: {source}")]
    ConfigDir {
        /// The directory that was being created.
        path: PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The file event channel was already handed out for this run.
    #[error("file event channel already claimed")]
    EventsTaken,

    /// A device event callback reported a failure.
    #[error("device callback failed: {0}")]
    Callback(String),
}

/// Errors produced while parsing a rule file.
#[derive(Debug, Error)]
pub enum RuleParseError {
    /// The rule file could not be read.
    #[error("cannot read rule file: {0}")]
    Io(#[from] std::io::Error),

    /// The rule file is not valid INI.
    #[error("invalid rule syntax: {0}")]
    Ini(#[from] ini::ParseError),

    /// An `attr` or `uevent` entry lacks the `KEY=VALUE` shape.
    #[error("invalid attribute: expected KEY=VALUE, got '{0}'")]
    MalformedKeyValue(String),

    /// An `event` entry names no known event kind.
    #[error("unknown event kind: '{0}'")]
    UnknownEvent(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
