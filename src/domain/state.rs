//! Live State Store
//!
//! The shared mutable state between user input, the sync loop, and inbound
//! telemetry. `controls` is the per-joint actuator target vector; `telemetry`
//! holds the most recently decoded payload per peripheral.
//!
//! The store is a cheap cloneable handle; readers always see a consistent
//! snapshot because every access goes through one mutex. `controls` and
//! `telemetry` are independent keys, so user input and notification decode
//! never conflict; last write wins on both.

use crate::domain::hand::HAND_JOINTS;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

struct LiveState {
    controls: Vec<f32>,
    telemetry: HashMap<String, String>,
}

/// Shared handle to the live state.
#[derive(Clone)]
pub struct LiveStateStore {
    inner: Arc<Mutex<LiveState>>,
}

impl LiveStateStore {
    /// Create a store with one zeroed control slot per joint. The vector
    /// length is fixed for the lifetime of the process.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LiveState {
                controls: vec![0.0; HAND_JOINTS.len()],
                telemetry: HashMap::new(),
            })),
        }
    }

    pub fn joint_count(&self) -> usize {
        HAND_JOINTS.len()
    }

    /// Snapshot of the control vector, consistent with respect to
    /// concurrent writes.
    pub fn controls(&self) -> Vec<f32> {
        self.inner.lock().unwrap().controls.clone()
    }

    /// Set one actuator target. Non-finite values are ignored; in-range
    /// values are clamped to the joint's range, unknown indices are dropped
    /// with a log.
    pub fn set_control(&self, index: usize, value: f32) {
        if !value.is_finite() {
            warn!("ignoring non-finite control value for joint {index}");
            return;
        }
        let Some(joint) = HAND_JOINTS.get(index) else {
            warn!("ignoring control for unknown joint index {index}");
            return;
        };
        let mut state = self.inner.lock().unwrap();
        state.controls[index] = value.clamp(0.0, joint.max);
    }

    /// Merge-patch the control vector. Shorter input leaves the tail
    /// untouched; longer input is truncated to the joint count.
    pub fn set_controls(&self, values: &[f32]) {
        let mut state = self.inner.lock().unwrap();
        for (index, value) in values.iter().enumerate().take(HAND_JOINTS.len()) {
            if !value.is_finite() {
                warn!("ignoring non-finite control value for joint {index}");
                continue;
            }
            state.controls[index] = value.clamp(0.0, HAND_JOINTS[index].max);
        }
    }

    /// Latest decoded payload for one peripheral.
    pub fn telemetry(&self, descriptor_id: &str) -> Option<String> {
        self.inner.lock().unwrap().telemetry.get(descriptor_id).cloned()
    }

    /// Replace the latest payload for one peripheral.
    pub fn set_telemetry(&self, descriptor_id: &str, value: String) {
        self.inner
            .lock()
            .unwrap()
            .telemetry
            .insert(descriptor_id.to_string(), value);
    }

    pub fn telemetry_snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().unwrap().telemetry.clone()
    }
}

impl Default for LiveStateStore {
    fn default() -> Self {
        Self::new()
    }
}
