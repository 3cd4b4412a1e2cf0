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

//! Kubelet context - collaborators shared by every component.

use std::sync::Arc;

use crate::cadvisor::Cadvisor;
use crate::clock::{Clock, RealClock};
use crate::container_runtime::ContainerRuntime;
use crate::events::EventRecorder;
use crate::eviction::{EvictionThresholds, PressureSignals, ThresholdSignals};
use crate::network::NetworkPlugin;
use crate::node_client::NodeClient;

/// Shared context for kubelet components.
///
/// Every field is a trait object so tests can swap in the fakes from
/// [`crate::testing`].
#[derive(Clone)]
pub struct KubeletContext {
    /// Source of the current time.
    pub clock: Arc<dyn Clock>,

    /// API server access to this node's Node object.
    pub node_client: Arc<dyn NodeClient>,

    /// Machine and filesystem information.
    pub cadvisor: Arc<dyn Cadvisor>,

    /// The container runtime.
    pub runtime: Arc<dyn ContainerRuntime>,

    /// The pod network plugin.
    pub network_plugin: Arc<dyn NetworkPlugin>,

    /// Memory and disk pressure signals.
    pub pressure: Arc<dyn PressureSignals>,

    /// Sink for node and pod events.
    pub recorder: Arc<dyn EventRecorder>,
}

impl KubeletContext {
    /// Creates a context with a real clock and threshold-based pressure signals.
    pub fn new(
        node_client: Arc<dyn NodeClient>,
        cadvisor: Arc<dyn Cadvisor>,
        runtime: Arc<dyn ContainerRuntime>,
        network_plugin: Arc<dyn NetworkPlugin>,
        recorder: Arc<dyn EventRecorder>,
        thresholds: EvictionThresholds,
    ) -> Self {
        let pressure = Arc::new(ThresholdSignals::new(cadvisor.clone(), thresholds));
        Self {
            clock: Arc::new(RealClock),
            node_client,
            cadvisor,
            runtime,
            network_plugin,
            pressure,
            recorder,
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the pressure signals.
    pub fn with_pressure(mut self, pressure: Arc<dyn PressureSignals>) -> Self {
        self.pressure = pressure;
        self
    }
}
