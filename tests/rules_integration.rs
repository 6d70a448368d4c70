// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the configuration pipeline: a watched directory
//! feeding the registry updater, and device events dispatched against the
//! resulting rule set. No udev hardware involved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use onplugd::bus::MessageBus;
use onplugd::device::{Device, DeviceEvent, DeviceSnapshot, EventKind};
use onplugd::executor::Executor;
use onplugd::monitor::ConfMonitor;
use onplugd::rules::{ActionRegistry, RegistryUpdater};

/// Records every exec call instead of spawning anything.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, Vec<(String, String)>, String)>>,
}

impl Executor for Recorder {
    fn exec(&self, cmdline: &str, env: Vec<(String, String)>, prefix: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((cmdline.to_string(), env, prefix.to_string()));
    }
}

struct Pipeline {
    _dir: TempDir,
    dir_path: std::path::PathBuf,
    recorder: Arc<Recorder>,
    registry: Arc<ActionRegistry>,
    monitor: Arc<ConfMonitor>,
    updater: RegistryUpdater,
}

fn pipeline() -> Pipeline {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_path_buf();
    let bus = MessageBus::empty();

    let recorder = Arc::new(Recorder::default());
    let registry = Arc::new(ActionRegistry::new(
        bus.clone(),
        Arc::clone(&recorder) as Arc<dyn Executor>,
    ));
    let monitor = Arc::new(ConfMonitor::new(&dir_path, bus.clone()));
    let updater = RegistryUpdater::new(Arc::clone(&registry), Arc::clone(&monitor), bus);

    Pipeline {
        _dir: dir,
        dir_path,
        recorder,
        registry,
        monitor,
        updater,
    }
}

async fn wait_until(pred: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn usb_event(kind: EventKind) -> DeviceEvent {
    let mut device = Device::new("/devices/pci0/usb1");
    device.refresh(DeviceSnapshot {
        path: "/devices/pci0/usb1".to_string(),
        subsystem: "usb".to_string(),
        devtype: Some("usb_device".to_string()),
        driver: None,
        attrs: HashMap::from([("idVendor".to_string(), "046d".to_string())]),
    });
    DeviceEvent::new(kind, device)
}

#[tokio::test]
async fn files_present_at_start_populate_the_registry() {
    let p = pipeline();
    std::fs::write(
        p.dir_path.join("m.conf"),
        "[match]\n\n[action]\nexec = /bin/echo hi\n",
    )
    .unwrap();

    p.updater.start().unwrap();

    assert!(wait_until(|| p.registry.contains("m.conf")).await);

    p.updater.stop();
}

#[tokio::test]
async fn a_file_created_later_appears_in_the_registry() {
    let p = pipeline();
    p.updater.start().unwrap();

    std::fs::write(p.dir_path.join("late.conf"), "[match]\nsubsystem = usb\n").unwrap();

    assert!(wait_until(|| p.registry.contains("late.conf")).await);

    p.updater.stop();
}

#[tokio::test]
async fn a_deleted_file_disappears_from_the_registry() {
    let p = pipeline();
    let path = p.dir_path.join("gone.conf");
    std::fs::write(&path, "[match]\n").unwrap();

    p.updater.start().unwrap();
    assert!(wait_until(|| p.registry.contains("gone.conf")).await);

    std::fs::remove_file(&path).unwrap();
    assert!(wait_until(|| !p.registry.contains("gone.conf")).await);

    p.updater.stop();
}

#[tokio::test]
async fn a_modified_file_is_reparsed() {
    let p = pipeline();
    let path = p.dir_path.join("edit.conf");
    std::fs::write(&path, "[action]\nexec = /bin/echo old\n").unwrap();

    p.updater.start().unwrap();
    assert!(wait_until(|| p.registry.contains("edit.conf")).await);

    std::fs::write(&path, "[action]\nexec = /bin/echo new\n").unwrap();
    assert!(
        wait_until(|| {
            p.registry
                .get("edit.conf")
                .is_some_and(|action| action.execs() == ["/bin/echo new"])
        })
        .await
    );

    p.updater.stop();
}

#[tokio::test]
async fn a_malformed_file_is_skipped_and_others_survive() {
    let p = pipeline();
    std::fs::write(p.dir_path.join("good.conf"), "[match]\nsubsystem = usb\n").unwrap();
    std::fs::write(p.dir_path.join("bad.conf"), "[match]\nattr = broken\n").unwrap();

    p.updater.start().unwrap();

    assert!(wait_until(|| p.registry.contains("good.conf")).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!p.registry.contains("bad.conf"));
    assert_eq!(p.registry.len(), 1);

    p.updater.stop();
}

#[tokio::test]
async fn a_matching_event_runs_the_rule_with_its_environment() {
    let p = pipeline();
    std::fs::write(
        p.dir_path.join("m.conf"),
        "[match]\n\
         subsystem = usb\n\
         attr = idVendor=046D\n\
         \n\
         [action]\n\
         exec = /bin/echo hi\n",
    )
    .unwrap();

    p.updater.start().unwrap();
    assert!(wait_until(|| p.registry.contains("m.conf")).await);

    // Case-insensitive attr match against the device's "046d".
    p.registry.on_device_event(&usb_event(EventKind::Coldplug));

    assert!(wait_until(|| !p.recorder.calls.lock().unwrap().is_empty()).await);

    let calls = p.recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "/bin/echo hi");
    assert_eq!(calls[0].2, "m.conf");

    let env: HashMap<String, String> = calls[0].1.iter().cloned().collect();
    assert_eq!(env.get("ONPLUGD_EVENT").map(String::as_str), Some("COLDPLUG"));
    assert_eq!(env.get("ONPLUGD_SUBSYSTEM").map(String::as_str), Some("usb"));

    drop(calls);
    p.updater.stop();
}

#[tokio::test]
async fn a_non_matching_event_runs_nothing() {
    let p = pipeline();
    std::fs::write(
        p.dir_path.join("m.conf"),
        "[match]\nsubsystem = block\n\n[action]\nexec = /bin/echo hi\n",
    )
    .unwrap();

    p.updater.start().unwrap();
    assert!(wait_until(|| p.registry.contains("m.conf")).await);

    p.registry.on_device_event(&usb_event(EventKind::Add));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(p.recorder.calls.lock().unwrap().is_empty());

    p.updater.stop();
}

#[tokio::test]
async fn updater_start_is_idempotent() {
    let p = pipeline();

    p.updater.start().unwrap();
    p.updater.start().unwrap();

    p.updater.stop();
    p.updater.stop();
}

#[tokio::test]
async fn updater_can_restart_after_stop() {
    let p = pipeline();

    p.updater.start().unwrap();
    p.updater.stop();

    // Let the old worker finish shutting the monitor down before the new
    // run claims a fresh channel.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        wait_until(|| p.updater.start().is_ok()).await,
        "updater did not come back up after stop"
    );

    std::fs::write(p.dir_path.join("again.conf"), "[match]\n").unwrap();
    assert!(wait_until(|| p.registry.contains("again.conf")).await);

    p.updater.stop();
    let _ = &p.monitor;
}
