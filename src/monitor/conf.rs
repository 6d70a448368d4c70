// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration directory monitor.
//!
//! Watches one directory for `*.conf` files and streams create, change and
//! delete notifications. Before the live stream begins, every matching file
//! already in the directory is reported as a synthetic `Create`, so a
//! consumer sees the full rule set without a separate enumeration step.

use std::path::{Path, PathBuf};

use notify::event::{EventKind as RawKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::error::{Error, Result};

/// Filename suffix a file must carry to be considered a rule file.
const CONF_SUFFIX: &str = ".conf";

/// Capacity of the outgoing file event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What happened to a rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// The file appeared (created, renamed in, or present at startup).
    Create,
    /// The file's contents changed.
    Change,
    /// The file disappeared (removed or renamed away).
    Delete,
}

/// An event on a rule file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// What happened.
    pub kind: FileEventKind,
    /// Path of the affected file.
    pub path: PathBuf,
}

struct Inner {
    cancel: Option<CancellationToken>,
    events: Option<mpsc::Receiver<FileEvent>>,
}

/// Watches a configuration directory for rule file changes.
///
/// `start` is idempotent and creates the directory (mode 0755) if it does
/// not exist. The output channel is claimed once per run via
/// [`events`](Self::events), which starts the monitor if needed.
pub struct ConfMonitor {
    dir: PathBuf,
    bus: MessageBus,
    inner: Mutex<Inner>,
}

impl ConfMonitor {
    /// Creates a monitor for the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, bus: MessageBus) -> Self {
        Self {
            dir: dir.into(),
            bus,
            inner: Mutex::new(Inner {
                cancel: None,
                events: None,
            }),
        }
    }

    /// Returns the watched directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sets up the watcher and starts the monitoring worker.
    ///
    /// Returns success immediately if the monitor is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// filesystem watcher cannot be registered.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(token) = &inner.cancel
            && !token.is_cancelled()
        {
            return Ok(());
        }

        if !self.dir.exists() {
            create_dir_0755(&self.dir).map_err(|source| Error::ConfigDir {
                path: self.dir.clone(),
                source,
            })?;
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        // The watcher invokes this handler on its own thread; the unbounded
        // bridge keeps the handler from ever blocking.
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<notify::Event, notify::Error>| {
                let _ = raw_tx.send(result);
            },
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        let (out_tx, out_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        inner.cancel = Some(token.clone());
        inner.events = Some(out_rx);
        drop(inner);

        let dir = self.dir.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            run(watcher, dir, raw_rx, out_tx, token, &bus).await;
            bus.debug("config monitor stopped");
        });

        self.bus.debug("config monitor started");
        Ok(())
    }

    /// Stops the monitoring worker.
    ///
    /// Idempotent; in-flight events are drained by dropping the channel.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.events = None;
    }

    /// Returns the file event channel, starting the monitor if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventsTaken`] if the channel was already claimed
    /// for the current run, or any error from [`start`](Self::start).
    pub fn events(&self) -> Result<mpsc::Receiver<FileEvent>> {
        self.start()?;
        self.inner.lock().events.take().ok_or(Error::EventsTaken)
    }
}

/// Creates `dir` (and missing parents) with mode 0755.
fn create_dir_0755(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o755);
    builder.create(dir)
}

/// The monitoring worker: initial enumeration, then the live stream.
async fn run(
    watcher: RecommendedWatcher,
    dir: PathBuf,
    mut raw_rx: mpsc::UnboundedReceiver<std::result::Result<notify::Event, notify::Error>>,
    out_tx: mpsc::Sender<FileEvent>,
    token: CancellationToken,
    bus: &MessageBus,
) {
    // Dropping the watcher closes the raw channel; keep it alive for the
    // whole run.
    let _watcher = watcher;

    for path in existing_conf_files(&dir) {
        let event = FileEvent {
            kind: FileEventKind::Create,
            path,
        };
        if !send_guarded(&out_tx, event, &token).await {
            return;
        }
    }

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            next = raw_rx.recv() => match next {
                Some(Ok(event)) => {
                    if !forward(event, &out_tx, &token).await {
                        break;
                    }
                }
                Some(Err(err)) => bus.error(format!("watch error: {err}")),
                None => break,
            },
        }
    }
}

/// Lists the matching files already present in the directory, sorted.
fn existing_conf_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_conf_file(path))
        .collect();
    files.sort();
    files
}

/// Maps a raw watcher notification onto file events and forwards the ones
/// whose paths match the rule file pattern.
///
/// Returns `false` once the consumer is gone or the run was cancelled.
async fn forward(
    event: notify::Event,
    out_tx: &mpsc::Sender<FileEvent>,
    token: &CancellationToken,
) -> bool {
    if let RawKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        // One notification carrying both ends of a rename: the old path
        // disappears, the new one appears.
        let mut paths = event.paths.into_iter();
        let from = paths.next();
        let to = paths.next();

        if let Some(path) = from.filter(|p| is_conf_file(p)) {
            let event = FileEvent {
                kind: FileEventKind::Delete,
                path,
            };
            if !send_guarded(out_tx, event, token).await {
                return false;
            }
        }
        if let Some(path) = to.filter(|p| is_conf_file(p)) {
            let event = FileEvent {
                kind: FileEventKind::Create,
                path,
            };
            if !send_guarded(out_tx, event, token).await {
                return false;
            }
        }
        return true;
    }

    let Some(kind) = classify(&event.kind) else {
        return true;
    };

    for path in event.paths.into_iter().filter(|p| is_conf_file(p)) {
        let event = FileEvent { kind, path };
        if !send_guarded(out_tx, event, token).await {
            return false;
        }
    }
    true
}

/// Translates a raw notification kind into a file event kind.
///
/// Metadata-only changes and access notifications carry no content change
/// and are dropped.
fn classify(kind: &RawKind) -> Option<FileEventKind> {
    match kind {
        RawKind::Create(_) => Some(FileEventKind::Create),
        RawKind::Remove(_) => Some(FileEventKind::Delete),
        RawKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileEventKind::Delete),
        RawKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileEventKind::Create),
        RawKind::Modify(ModifyKind::Name(_)) | RawKind::Modify(ModifyKind::Metadata(_)) => None,
        RawKind::Modify(_) => Some(FileEventKind::Change),
        _ => None,
    }
}

/// Sends an event unless the run is cancelled or the consumer is gone.
async fn send_guarded(
    out_tx: &mpsc::Sender<FileEvent>,
    event: FileEvent,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        sent = out_tx.send(event) => sent.is_ok(),
    }
}

/// Returns true if the path's basename matches the rule file pattern.
fn is_conf_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(CONF_SUFFIX))
}
