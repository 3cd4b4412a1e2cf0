// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime health state.
//!
//! [`RuntimeState`] folds the independent liveness signals reported by the
//! container runtime probe, the network plugin and runtime initialization
//! into a single list of messages. Node status reporting turns a non-empty
//! list into a `Ready=False` condition.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

/// Message reported when the runtime has not been confirmed healthy within
/// the sync threshold.
pub const RUNTIME_DOWN_MESSAGE: &str = "container runtime is down";

#[derive(Debug)]
struct Inner {
    last_base_runtime_sync: DateTime<Utc>,
    network_error: Option<anyhow::Error>,
    init_error: Option<anyhow::Error>,
    pod_cidr: String,
}

/// Aggregated runtime health for one kubelet.
///
/// All fields sit behind one mutex. Nothing performs I/O while holding it.
pub struct RuntimeState {
    inner: Mutex<Inner>,
    base_runtime_sync_threshold: Duration,
    clock: Arc<dyn Clock>,
}

impl RuntimeState {
    /// Creates a state that has never seen a successful runtime sync.
    pub fn new(base_runtime_sync_threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_base_runtime_sync: DateTime::<Utc>::UNIX_EPOCH,
                network_error: None,
                init_error: None,
                pod_cidr: String::new(),
            }),
            base_runtime_sync_threshold,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the last time the base runtime answered a status probe.
    pub fn set_runtime_sync(&self, t: DateTime<Utc>) {
        self.lock().last_base_runtime_sync = t;
    }

    /// Stores a network plugin failure.
    ///
    /// `None` leaves any previous error in place: once reported, a network
    /// error is only ever replaced by a newer one.
    pub fn set_network_error(&self, err: Option<anyhow::Error>) {
        if let Some(err) = err {
            self.lock().network_error = Some(err);
        }
    }

    /// Stores the latest initialization failure. `None` clears it.
    pub fn set_init_error(&self, err: Option<anyhow::Error>) {
        self.lock().init_error = err;
    }

    /// Stores the pod CIDR the runtime was last configured with.
    pub fn set_pod_cidr(&self, cidr: impl Into<String>) {
        self.lock().pod_cidr = cidr.into();
    }

    /// Returns the pod CIDR the runtime was last configured with.
    pub fn pod_cidr(&self) -> String {
        self.lock().pod_cidr.clone()
    }

    /// Returns the current error messages: init, then network, then staleness.
    pub fn errors(&self) -> Vec<String> {
        let now = self.clock.now();
        let inner = self.lock();

        let mut errors = Vec::new();
        if let Some(err) = &inner.init_error {
            errors.push(err.to_string());
        }
        if let Some(err) = &inner.network_error {
            errors.push(err.to_string());
        }

        let threshold = chrono::Duration::from_std(self.base_runtime_sync_threshold)
            .unwrap_or(chrono::Duration::MAX);
        let stale = match inner.last_base_runtime_sync.checked_add_signed(threshold) {
            Some(deadline) => now > deadline,
            None => false,
        };
        if stale {
            errors.push(RUNTIME_DOWN_MESSAGE.to_string());
        }

        errors
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("inner", &*self.lock())
            .field("base_runtime_sync_threshold", &self.base_runtime_sync_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    const THRESHOLD: Duration = Duration::from_secs(30);

    fn new_state() -> (Arc<FakeClock>, RuntimeState) {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let state = RuntimeState::new(THRESHOLD, clock.clone());
        state.set_runtime_sync(clock.now());
        (clock, state)
    }

    #[test]
    fn test_never_synced_is_down() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let state = RuntimeState::new(THRESHOLD, clock);
        assert_eq!(state.errors(), vec![RUNTIME_DOWN_MESSAGE.to_string()]);
    }

    #[test]
    fn test_staleness() {
        let (clock, state) = new_state();
        assert!(state.errors().is_empty());

        // Exactly at the threshold is still fresh.
        clock.step(THRESHOLD);
        assert!(state.errors().is_empty());

        clock.step(Duration::from_secs(1));
        assert_eq!(state.errors(), vec![RUNTIME_DOWN_MESSAGE.to_string()]);

        state.set_runtime_sync(clock.now());
        assert!(state.errors().is_empty());
    }

    #[test]
    fn test_network_error_is_sticky() {
        let (_, state) = new_state();
        state.set_network_error(Some(anyhow::anyhow!("cni config uninitialized")));
        state.set_network_error(None);
        assert_eq!(state.errors(), vec!["cni config uninitialized".to_string()]);

        state.set_network_error(Some(anyhow::anyhow!("plugin crashed")));
        assert_eq!(state.errors(), vec!["plugin crashed".to_string()]);
    }

    #[test]
    fn test_init_error_clears() {
        let (_, state) = new_state();
        state.set_init_error(Some(anyhow::anyhow!("failed to start image gc")));
        assert_eq!(state.errors().len(), 1);
        state.set_init_error(None);
        assert!(state.errors().is_empty());
    }

    #[test]
    fn test_error_order() {
        let (clock, state) = new_state();
        clock.step(THRESHOLD + Duration::from_secs(1));
        state.set_network_error(Some(anyhow::anyhow!("network down")));
        state.set_init_error(Some(anyhow::anyhow!("init failed")));

        assert_eq!(
            state.errors(),
            vec![
                "init failed".to_string(),
                "network down".to_string(),
                RUNTIME_DOWN_MESSAGE.to_string(),
            ]
        );
    }

    #[test]
    fn test_errors_does_not_mutate() {
        let (_, state) = new_state();
        state.set_init_error(Some(anyhow::anyhow!("init failed")));
        assert_eq!(state.errors(), state.errors());
    }

    #[test]
    fn test_pod_cidr() {
        let (_, state) = new_state();
        assert_eq!(state.pod_cidr(), "");
        state.set_pod_cidr("10.244.1.0/24");
        assert_eq!(state.pod_cidr(), "10.244.1.0/24");
    }

    #[test]
    fn test_concurrent_writers() {
        let (_, state) = new_state();
        let state = Arc::new(state);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        state.set_network_error(Some(anyhow::anyhow!("error {i}")));
                        let _ = state.errors();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.errors().len(), 1);
    }
}
