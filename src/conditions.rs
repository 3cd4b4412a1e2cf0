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

//! Node condition reconciliation.
//!
//! Each pass recomputes the node conditions owned by the kubelet from live
//! measurements and merges them into the list last persisted on the node.
//! Transition times only move when a condition's status flips, heartbeat
//! times move on every pass.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::NodeCondition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Condition types maintained by the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionType {
    OutOfDisk,
    MemoryPressure,
    DiskPressure,
    Ready,
}

impl ConditionType {
    /// Canonical order in which new conditions are appended.
    pub const ALL: [ConditionType; 4] = [
        ConditionType::OutOfDisk,
        ConditionType::MemoryPressure,
        ConditionType::DiskPressure,
        ConditionType::Ready,
    ];

    /// Returns the API name of the condition type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::OutOfDisk => "OutOfDisk",
            ConditionType::MemoryPressure => "MemoryPressure",
            ConditionType::DiskPressure => "DiskPressure",
            ConditionType::Ready => "Ready",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    /// Returns the API name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Parses an API status, treating anything unrecognized as `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live measurements a reconciliation pass is computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMeasurements {
    pub out_of_disk: bool,
    pub memory_pressure: bool,
    pub disk_pressure: bool,
    /// Output of [`RuntimeState::errors`](crate::runtime_state::RuntimeState::errors).
    pub runtime_errors: Vec<String>,
}

/// A condition value before timestamps are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
    status: ConditionStatus,
    reason: &'static str,
    message: String,
}

impl Observed {
    fn new(status: ConditionStatus, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
        }
    }
}

fn observe(condition: ConditionType, m: &NodeMeasurements) -> Observed {
    use ConditionStatus::{False, True};

    match condition {
        ConditionType::OutOfDisk if m.out_of_disk => {
            Observed::new(True, "KubeletOutOfDisk", "out of disk space")
        }
        ConditionType::OutOfDisk => Observed::new(
            False,
            "KubeletHasSufficientDisk",
            "kubelet has sufficient disk space available",
        ),
        ConditionType::MemoryPressure if m.memory_pressure => Observed::new(
            True,
            "KubeletHasInsufficientMemory",
            "kubelet has insufficient memory available",
        ),
        ConditionType::MemoryPressure => Observed::new(
            False,
            "KubeletHasSufficientMemory",
            "kubelet has sufficient memory available",
        ),
        ConditionType::DiskPressure if m.disk_pressure => {
            Observed::new(True, "KubeletHasDiskPressure", "kubelet has disk pressure")
        }
        ConditionType::DiskPressure => {
            Observed::new(False, "KubeletHasNoDiskPressure", "kubelet has no disk pressure")
        }
        ConditionType::Ready if m.runtime_errors.is_empty() => {
            Observed::new(True, "KubeletReady", "kubelet is posting ready status")
        }
        ConditionType::Ready => {
            Observed::new(False, "KubeletNotReady", m.runtime_errors.join(","))
        }
    }
}

/// Returns the event reason recorded when `condition` moves to `status`.
fn event_reason(condition: ConditionType, status: ConditionStatus) -> Option<&'static str> {
    use ConditionStatus::{False, True};

    match (condition, status) {
        (ConditionType::OutOfDisk, True) => Some("NodeOutOfDisk"),
        (ConditionType::OutOfDisk, False) => Some("NodeHasSufficientDisk"),
        (ConditionType::MemoryPressure, True) => Some("NodeHasInsufficientMemory"),
        (ConditionType::MemoryPressure, False) => Some("NodeHasSufficientMemory"),
        (ConditionType::DiskPressure, True) => Some("NodeHasDiskPressure"),
        (ConditionType::DiskPressure, False) => Some("NodeHasNoDiskPressure"),
        (ConditionType::Ready, True) => Some("NodeReady"),
        (ConditionType::Ready, False) => Some("NodeNotReady"),
        (_, ConditionStatus::Unknown) => None,
    }
}

/// Cooldown that damps flapping of a condition.
///
/// A condition reporting a problem (`True`) may only recover once `cooldown`
/// has elapsed since its last transition. Entering `True`, or leaving
/// `Unknown`, is never held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionGuard {
    cooldown: Duration,
}

impl TransitionGuard {
    /// Creates a guard with the given cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// Returns true if the transition from `prior` to `next` may happen now.
    pub fn allows(
        &self,
        prior: ConditionStatus,
        last_transition: Option<DateTime<Utc>>,
        next: ConditionStatus,
        now: DateTime<Utc>,
    ) -> bool {
        if prior != ConditionStatus::True || next == ConditionStatus::True {
            return true;
        }
        match last_transition {
            Some(t) => (now - t).to_std().unwrap_or(Duration::ZERO) >= self.cooldown,
            None => true,
        }
    }
}

/// A status change produced by a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub condition: ConditionType,
    pub status: ConditionStatus,
    /// Reason of the node event to record for this change.
    pub event_reason: &'static str,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub conditions: Vec<NodeCondition>,
    pub transitions: Vec<Transition>,
}

/// Computes the next condition list for a node.
#[derive(Debug, Clone, Default)]
pub struct ConditionReconciler {
    guards: BTreeMap<ConditionType, TransitionGuard>,
}

impl ConditionReconciler {
    /// Creates a reconciler without any transition damping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a transition cooldown to `condition`.
    pub fn with_cooldown(mut self, condition: ConditionType, cooldown: Duration) -> Self {
        self.guards.insert(condition, TransitionGuard::new(cooldown));
        self
    }

    /// Merges freshly observed conditions into `previous`.
    ///
    /// Conditions of types not owned by the kubelet are kept where they are.
    /// `Ready` always ends up last.
    pub fn reconcile(
        &self,
        previous: &[NodeCondition],
        measurements: &NodeMeasurements,
        now: DateTime<Utc>,
    ) -> Reconciled {
        let mut conditions = previous.to_vec();
        let mut transitions = Vec::new();

        for condition in ConditionType::ALL {
            let observed = observe(condition, measurements);
            let existing = conditions
                .iter_mut()
                .find(|c| c.type_ == condition.as_str());

            match existing {
                Some(prior) => {
                    if let Some(transition) = self.apply(condition, prior, observed, now) {
                        transitions.push(transition);
                    }
                }
                None => {
                    let status = observed.status;
                    conditions.push(new_condition(condition, observed, now));
                    if let Some(event_reason) = event_reason(condition, status) {
                        transitions.push(Transition {
                            condition,
                            status,
                            event_reason,
                        });
                    }
                }
            }
        }

        // Version skew workaround: older clients read the last condition as
        // the Ready condition. See kubernetes/kubernetes#16961.
        let (mut ordered, ready): (Vec<_>, Vec<_>) = conditions
            .into_iter()
            .partition(|c| c.type_ != ConditionType::Ready.as_str());
        ordered.extend(ready);

        Reconciled {
            conditions: ordered,
            transitions,
        }
    }

    /// Updates `prior` in place. Returns the transition, if any.
    fn apply(
        &self,
        condition: ConditionType,
        prior: &mut NodeCondition,
        observed: Observed,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        prior.last_heartbeat_time = Some(Time(now));

        let prior_status = ConditionStatus::parse(&prior.status);
        let same = prior_status == observed.status;

        if !same {
            if let Some(guard) = self.guards.get(&condition) {
                let last_transition = prior.last_transition_time.as_ref().map(|t| t.0);
                if !guard.allows(prior_status, last_transition, observed.status, now) {
                    tracing::info!(
                        condition = %condition,
                        status = %prior_status,
                        cooldown = ?guard.cooldown,
                        "holding node condition, last transition is within the cooldown"
                    );
                    return None;
                }
            }
        }

        prior.status = observed.status.as_str().to_string();
        prior.reason = Some(observed.reason.to_string());
        prior.message = Some(observed.message);

        if same && prior.last_transition_time.is_some() {
            return None;
        }

        prior.last_transition_time = Some(Time(now));
        if same {
            return None;
        }
        event_reason(condition, observed.status).map(|event_reason| Transition {
            condition,
            status: observed.status,
            event_reason,
        })
    }
}

fn new_condition(condition: ConditionType, observed: Observed, now: DateTime<Utc>) -> NodeCondition {
    NodeCondition {
        type_: condition.as_str().to_string(),
        status: observed.status.as_str().to_string(),
        reason: Some(observed.reason.to_string()),
        message: Some(observed.message),
        last_heartbeat_time: Some(Time(now)),
        last_transition_time: Some(Time(now)),
    }
}

/// Returns the condition of the given type, if present.
pub fn find_condition<'a>(
    conditions: &'a [NodeCondition],
    condition: ConditionType,
) -> Option<&'a NodeCondition> {
    conditions.iter().find(|c| c.type_ == condition.as_str())
}
