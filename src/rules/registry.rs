// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The live, name-keyed set of rules.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bus::MessageBus;
use crate::device::DeviceEvent;
use crate::executor::Executor;
use crate::rules::action::Action;

/// Name-keyed registry of parsed rules.
///
/// Event dispatch takes a read lease to snapshot the matching rules and
/// releases it before any command runs; configuration updates take the
/// write side. A rule is parsed to completion before it is inserted, so
/// readers never observe a partial rule.
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<Action>>>,
    executor: Arc<dyn Executor>,
    bus: MessageBus,
}

impl ActionRegistry {
    /// Creates an empty registry dispatching through `executor`.
    #[must_use]
    pub fn new(bus: MessageBus, executor: Arc<dyn Executor>) -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            executor,
            bus,
        }
    }

    /// Inserts or replaces the rule stored under `name`.
    pub fn update(&self, name: impl Into<String>, action: Action) {
        self.actions.write().insert(name.into(), Arc::new(action));
    }

    /// Removes the rule stored under `name`, if any.
    pub fn remove(&self, name: &str) {
        self.actions.write().remove(name);
    }

    /// Returns true if a rule is stored under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.read().contains_key(name)
    }

    /// Returns the number of stored rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Returns true if the registry holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Returns the rule stored under `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.read().get(name).cloned()
    }

    /// Dispatches a device event to every matching rule.
    ///
    /// The set of matching rules is a consistent snapshot taken under the
    /// read lease; each matched rule then runs its commands in its own
    /// detached task, so a slow rule cannot delay the others or the event
    /// loop this is called from.
    pub fn on_device_event(&self, event: &DeviceEvent) {
        let matched: Vec<Arc<Action>> = {
            let actions = self.actions.read();
            let mut matched = Vec::new();
            for (name, action) in actions.iter() {
                if action.matches(event) {
                    self.bus.debug(format!("Match found: {name}"));
                    matched.push(Arc::clone(action));
                }
            }
            matched
        };

        for action in matched {
            let event = event.clone();
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                action.run(&event, executor.as_ref());
            });
        }
    }
}
