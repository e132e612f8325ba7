//! API application state and health tracking.

use std::sync::{Mutex, MutexGuard};

use dialtone_telemetry::Metrics;

use crate::store::SharedStore;

pub(crate) struct ApiState {
    pub(crate) store: SharedStore,
    pub(crate) telemetry: Metrics,
    health_status: Mutex<Vec<String>>,
}

impl ApiState {
    pub(crate) fn new(store: SharedStore, telemetry: Metrics) -> Self {
        Self {
            store,
            telemetry,
            health_status: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_degraded_component(&self, component: &str) -> bool {
        let mut guard = Self::lock_guard(&self.health_status, "health_status");
        if guard.iter().any(|entry| entry == component) {
            return false;
        }
        guard.push(component.to_string());
        guard.sort();
        true
    }

    pub(crate) fn remove_degraded_component(&self, component: &str) -> bool {
        let mut guard = Self::lock_guard(&self.health_status, "health_status");
        let previous = guard.len();
        guard.retain(|entry| entry != component);
        guard.len() != previous
    }

    pub(crate) fn current_health_degraded(&self) -> Vec<String> {
        Self::lock_guard(&self.health_status, "health_status").clone()
    }

    fn lock_guard<'a, T>(mutex: &'a Mutex<T>, name: &'a str) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|err| {
            panic!("failed to lock {name}: {err}");
        })
    }
}
