// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rule files: parsing, matching and command dispatch.
//!
//! A rule file is an INI document with two sections. `[match]` holds the
//! predicate: repeatable `event`, `path`, `subsystem`, `type` and `driver`
//! keys plus `attr` / `uevent` keys whose values are `KEY=VALUE` pairs.
//! `[action]` holds repeatable `exec` keys, the shell command lines to run
//! on a match. Repeating a key builds an ordered candidate list; an empty
//! list is a wildcard.

use std::collections::BTreeMap;
use std::path::Path;

use ini::{Ini, ParseOption, Properties};

use crate::device::{DeviceEvent, EventKind};
use crate::error::RuleParseError;
use crate::executor::Executor;

/// A parsed rule: a match predicate plus the commands to run.
///
/// Rules are immutable once parsed; editing a file produces a new value
/// that replaces the old one in the registry under the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    events: Vec<EventKind>,
    paths: Vec<String>,
    subsystems: Vec<String>,
    types: Vec<String>,
    drivers: Vec<String>,
    attrs: BTreeMap<String, Vec<String>>,
    uevents: BTreeMap<String, Vec<String>>,
    execs: Vec<String>,
}

impl Action {
    /// Parses a rule from a file, named by the file's basename.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its contents do not
    /// parse (see [`parse`](Self::parse)).
    pub fn from_file(path: &Path) -> Result<Self, RuleParseError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read_to_string(path)?;
        Self::parse(name, &content)
    }

    /// Parses a rule from INI text.
    ///
    /// Listing no `event` defaults the rule to `{coldplug, add}`. Empty
    /// candidate values are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid INI syntax, an `attr`/`uevent` value
    /// without `=`, or an `event` value outside the known kinds.
    pub fn parse(name: impl Into<String>, content: &str) -> Result<Self, RuleParseError> {
        let options = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let conf = Ini::load_from_str_opt(content, options)?;

        let match_section = conf.section(Some("match"));
        let action_section = conf.section(Some("action"));

        let mut events = Vec::new();
        for value in shadow_values(match_section, "event") {
            let kind = EventKind::from_rule_name(value)
                .ok_or_else(|| RuleParseError::UnknownEvent(value.to_string()))?;
            if !events.contains(&kind) {
                events.push(kind);
            }
        }
        if events.is_empty() {
            events = vec![EventKind::Coldplug, EventKind::Add];
        }

        Ok(Self {
            name: name.into(),
            events,
            paths: shadow_list(match_section, "path"),
            subsystems: shadow_list(match_section, "subsystem"),
            types: shadow_list(match_section, "type"),
            drivers: shadow_list(match_section, "driver"),
            attrs: shadow_map(match_section, "attr")?,
            uevents: shadow_map(match_section, "uevent")?,
            execs: shadow_list(action_section, "exec"),
        })
    }

    /// Returns the rule's name (the basename of its file).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the command lines to run on a match.
    #[must_use]
    pub fn execs(&self) -> &[String] {
        &self.execs
    }

    /// Checks whether the rule matches a device event.
    ///
    /// The event kind must be listed; path, subsystem, type and driver must
    /// each pass the candidate test; every listed attribute and uevent key
    /// must be present on the device with a value passing the candidate
    /// test. Comparisons are case-insensitive, and an empty device field
    /// never matches a non-wildcard candidate list.
    #[must_use]
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        if !self.events.contains(&event.kind()) {
            return false;
        }

        let device = event.device();

        if !candidate_match(device.path(), &self.paths) {
            return false;
        }
        if !candidate_match(device.subsystem(), &self.subsystems) {
            return false;
        }
        if !candidate_match(device.devtype().unwrap_or(""), &self.types) {
            return false;
        }
        if !candidate_match(device.driver().unwrap_or(""), &self.drivers) {
            return false;
        }

        for (key, candidates) in &self.attrs {
            match device.attrs().get(key) {
                Some(value) if candidate_match(value, candidates) => {}
                _ => return false,
            }
        }

        for (key, candidates) in &self.uevents {
            match device.uevent().get(key) {
                Some(value) if candidate_match(value, candidates) => {}
                _ => return false,
            }
        }

        true
    }

    /// Runs the rule's commands for the given event.
    ///
    /// Each command line is enqueued on the executor with the event's
    /// environment and the rule name as the log prefix.
    pub fn run(&self, event: &DeviceEvent, executor: &dyn Executor) {
        let env = event_environment(event);

        for cmdline in &self.execs {
            executor.exec(cmdline, env.clone(), &self.name);
        }
    }

    /// Produces the canonical rule file text for this rule.
    ///
    /// Parsing the result under the same name yields an equal rule.
    #[must_use]
    pub fn to_conf_string(&self) -> String {
        let mut out = String::from("[match]\n");

        for event in &self.events {
            out.push_str(&format!("event = {}\n", event.rule_name()));
        }
        for path in &self.paths {
            out.push_str(&format!("path = {path}\n"));
        }
        for subsystem in &self.subsystems {
            out.push_str(&format!("subsystem = {subsystem}\n"));
        }
        for devtype in &self.types {
            out.push_str(&format!("type = {devtype}\n"));
        }
        for driver in &self.drivers {
            out.push_str(&format!("driver = {driver}\n"));
        }
        for (key, values) in &self.attrs {
            for value in values {
                out.push_str(&format!("attr = {key}={value}\n"));
            }
        }
        for (key, values) in &self.uevents {
            for value in values {
                out.push_str(&format!("uevent = {key}={value}\n"));
            }
        }

        out.push_str("\n[action]\n");
        for exec in &self.execs {
            out.push_str(&format!("exec = {exec}\n"));
        }

        out
    }
}

/// Builds the environment injected into every command spawned for `event`.
///
/// On top of the inherited process environment the executor applies:
/// `ONPLUGD_EVENT`, `ONPLUGD_PATH`, `ONPLUGD_SUBSYSTEM`, `ONPLUGD_TYPE` and
/// `ONPLUGD_DRIVER` when non-empty, and one `ONPLUGD_ATTR_<KEY>` /
/// `ONPLUGD_UEVENT_<KEY>` per accumulated attribute, keys uppercased.
#[must_use]
pub fn event_environment(event: &DeviceEvent) -> Vec<(String, String)> {
    let device = event.device();
    let mut env = vec![
        (
            "ONPLUGD_EVENT".to_string(),
            event.kind().as_str().to_string(),
        ),
        ("ONPLUGD_PATH".to_string(), device.path().to_string()),
        (
            "ONPLUGD_SUBSYSTEM".to_string(),
            device.subsystem().to_string(),
        ),
    ];

    if let Some(devtype) = device.devtype().filter(|t| !t.is_empty()) {
        env.push(("ONPLUGD_TYPE".to_string(), devtype.to_string()));
    }
    if let Some(driver) = device.driver().filter(|d| !d.is_empty()) {
        env.push(("ONPLUGD_DRIVER".to_string(), driver.to_string()));
    }

    for (key, value) in device.attrs() {
        env.push((
            format!("ONPLUGD_ATTR_{}", key.to_uppercase()),
            value.clone(),
        ));
    }
    for (key, value) in device.uevent() {
        env.push((
            format!("ONPLUGD_UEVENT_{}", key.to_uppercase()),
            value.clone(),
        ));
    }

    env
}

/// The candidate test: wildcard on an empty list, otherwise a
/// case-insensitive match of a non-empty value against any candidate.
fn candidate_match(value: &str, candidates: &[String]) -> bool {
    if candidates.is_empty() {
        return true;
    }

    !value.is_empty()
        && candidates
            .iter()
            .any(|candidate| value.to_lowercase() == candidate.to_lowercase())
}

/// Iterates a shadow key's non-empty values.
fn shadow_values<'a>(
    section: Option<&'a Properties>,
    key: &'a str,
) -> impl Iterator<Item = &'a str> {
    section
        .into_iter()
        .flat_map(move |props| props.get_all(key))
        .filter(|value| !value.is_empty())
}

/// Collects a shadow key's values into an ordered candidate list.
fn shadow_list(section: Option<&Properties>, key: &str) -> Vec<String> {
    shadow_values(section, key).map(str::to_string).collect()
}

/// Collects `KEY=VALUE` shadow values into a candidate map.
fn shadow_map(
    section: Option<&Properties>,
    key: &str,
) -> Result<BTreeMap<String, Vec<String>>, RuleParseError> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entry in shadow_values(section, key) {
        let Some((k, v)) = entry.split_once('=') else {
            return Err(RuleParseError::MalformedKeyValue(entry.to_string()));
        };
        map.entry(k.trim().to_string())
            .or_default()
            .push(v.trim().to_string());
    }

    Ok(map)
}
