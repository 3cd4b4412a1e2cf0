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

//! kubelet-rust - node status reporting for a Kubernetes node agent
//!
//! This library provides the pieces a kubelet needs to keep its Node object
//! current:
//! - Runtime state aggregation (container runtime and network health)
//! - Node condition reconciliation with transition damping
//! - Node registration and status updates
//! - Pod DNS configuration
//! - Health checks

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod cadvisor;
pub mod clock;
pub mod conditions;
pub mod config;
pub mod container_runtime;
pub mod context;
pub mod disk_space;
pub mod dns;
pub mod error;
pub mod events;
pub mod eviction;
pub mod health;
pub mod kubelet;
pub mod network;
pub mod node_client;
pub mod node_status;
pub mod runtime_state;
pub mod testing;

// Re-export commonly used types
pub use clock::{Clock, FakeClock, RealClock};
pub use conditions::{ConditionReconciler, ConditionStatus, ConditionType, NodeMeasurements};
pub use config::KubeletConfig;
pub use context::KubeletContext;
pub use error::{ApiError, KubeletError, Result};
pub use kubelet::Kubelet;
pub use node_status::NodeStatusManager;
pub use runtime_state::RuntimeState;

/// Semantic version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Component name used in events and logs.
pub const KUBELET_COMPONENT_NAME: &str = "kubelet";
