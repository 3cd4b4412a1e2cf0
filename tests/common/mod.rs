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

//! Shared fixture for the node status integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{Node, NodeSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use kubelet_rust::cadvisor::MachineInfo;
use kubelet_rust::config::{KubeletConfig, ReservedResources};
use kubelet_rust::context::KubeletContext;
use kubelet_rust::node_status::{NodeStatusManager, NodeStatusSettings};
use kubelet_rust::testing::{
    FakeCadvisor, FakeNetworkPlugin, FakeNodeClient, FakePressure, FakeRuntime,
    RecordingRecorder,
};
use kubelet_rust::{Clock, FakeClock, RuntimeState};

pub const TEST_NODE: &str = "testnode";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap()
}

pub struct TestKubelet {
    pub clock: Arc<FakeClock>,
    pub client: Arc<FakeNodeClient>,
    pub cadvisor: Arc<FakeCadvisor>,
    pub runtime: Arc<FakeRuntime>,
    pub plugin: Arc<FakeNetworkPlugin>,
    pub pressure: Arc<FakePressure>,
    pub recorder: Arc<RecordingRecorder>,
    pub runtime_state: Arc<RuntimeState>,
    pub manager: NodeStatusManager,
}

/// Settings matching the machine the fake cadvisor reports.
pub fn test_settings() -> NodeStatusSettings {
    let mut settings =
        NodeStatusSettings::from_config(&KubeletConfig::default(), TEST_NODE, TEST_NODE);
    settings.node_ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    settings.max_pods = 110;
    settings.kube_reserved = ReservedResources {
        cpu_millis: 200,
        memory_bytes: 100_000_000,
    };
    settings.disk_info_cache_period = Duration::ZERO;
    settings
}

pub fn new_test_kubelet(settings: NodeStatusSettings) -> TestKubelet {
    let clock = Arc::new(FakeClock::new(start_time()));
    let client = Arc::new(FakeNodeClient::new());
    let cadvisor = Arc::new(FakeCadvisor::default());
    let runtime = Arc::new(FakeRuntime::default());
    let plugin = Arc::new(FakeNetworkPlugin::default());
    let pressure = Arc::new(FakePressure::default());
    let recorder = Arc::new(RecordingRecorder::default());

    cadvisor.set_machine_info(MachineInfo {
        machine_id: "123".to_string(),
        system_uuid: "abc".to_string(),
        boot_id: "1b3".to_string(),
        num_cores: 2,
        memory_capacity: 10_000_000_000,
    });
    cadvisor.set_disk_space_mb(500, 500, 400, 400);

    let ctx = KubeletContext {
        clock: clock.clone(),
        node_client: client.clone(),
        cadvisor: cadvisor.clone(),
        runtime: runtime.clone(),
        network_plugin: plugin.clone(),
        pressure: pressure.clone(),
        recorder: recorder.clone(),
    };

    let runtime_state = Arc::new(RuntimeState::new(Duration::from_secs(30), clock.clone()));
    runtime_state.set_runtime_sync(clock.now());
    let manager = NodeStatusManager::new(settings, &ctx, runtime_state.clone());

    TestKubelet {
        clock,
        client,
        cadvisor,
        runtime,
        plugin,
        pressure,
        recorder,
        runtime_state,
        manager,
    }
}

pub fn bare_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: None,
    }
}
