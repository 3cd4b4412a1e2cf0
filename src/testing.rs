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

//! In-memory fakes for the kubelet's collaborators.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};

use crate::cadvisor::{Cadvisor, FsInfo, MachineInfo, VersionInfo};
use crate::container_runtime::{ContainerRuntime, Image};
use crate::error::ApiError;
use crate::events::{EventRecorder, EventType};
use crate::eviction::PressureSignals;
use crate::network::NetworkPlugin;
use crate::node_client::NodeClient;

const MB: u64 = 1024 * 1024;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call made against [`FakeNodeClient`].
#[derive(Debug, Clone)]
pub struct Action {
    pub verb: &'static str,
    pub subresource: Option<&'static str>,
    pub name: String,
    /// The object sent with create and update calls.
    pub object: Option<Node>,
}

impl Action {
    /// Returns true if this is an update of the status subresource.
    pub fn is_status_update(&self) -> bool {
        self.verb == "update" && self.subresource == Some("status")
    }
}

#[derive(Default)]
struct NodeStore {
    nodes: BTreeMap<String, Node>,
    actions: Vec<Action>,
    create_error: Option<ApiError>,
    get_error: Option<ApiError>,
    update_error: Option<ApiError>,
    delete_error: Option<ApiError>,
}

/// [`NodeClient`] over an in-memory node table that records every call.
#[derive(Default)]
pub struct FakeNodeClient {
    store: Mutex<NodeStore>,
}

impl FakeNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a node without recording an action.
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        lock(&self.store).nodes.insert(name, node);
    }

    /// Returns the stored node named `name`.
    pub fn node(&self, name: &str) -> Option<Node> {
        lock(&self.store).nodes.get(name).cloned()
    }

    pub fn actions(&self) -> Vec<Action> {
        lock(&self.store).actions.clone()
    }

    pub fn clear_actions(&self) {
        lock(&self.store).actions.clear();
    }

    pub fn set_create_error(&self, err: Option<ApiError>) {
        lock(&self.store).create_error = err;
    }

    pub fn set_get_error(&self, err: Option<ApiError>) {
        lock(&self.store).get_error = err;
    }

    pub fn set_update_error(&self, err: Option<ApiError>) {
        lock(&self.store).update_error = err;
    }

    pub fn set_delete_error(&self, err: Option<ApiError>) {
        lock(&self.store).delete_error = err;
    }
}

fn name_of(node: &Node) -> String {
    node.metadata.name.clone().unwrap_or_default()
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn get(&self, name: &str) -> Result<Node, ApiError> {
        let mut store = lock(&self.store);
        store.actions.push(Action {
            verb: "get",
            subresource: None,
            name: name.to_string(),
            object: None,
        });
        if let Some(err) = store.get_error.clone() {
            return Err(err);
        }
        store
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("nodes {:?} not found", name)))
    }

    async fn create(&self, node: &Node) -> Result<Node, ApiError> {
        let mut store = lock(&self.store);
        let name = name_of(node);
        store.actions.push(Action {
            verb: "create",
            subresource: None,
            name: name.clone(),
            object: Some(node.clone()),
        });
        if let Some(err) = store.create_error.clone() {
            return Err(err);
        }
        if store.nodes.contains_key(&name) {
            return Err(ApiError::AlreadyExists(format!(
                "nodes {:?} already exists",
                name
            )));
        }
        store.nodes.insert(name, node.clone());
        Ok(node.clone())
    }

    async fn update_status(&self, node: &Node) -> Result<Node, ApiError> {
        let mut store = lock(&self.store);
        let name = name_of(node);
        store.actions.push(Action {
            verb: "update",
            subresource: Some("status"),
            name: name.clone(),
            object: Some(node.clone()),
        });
        if let Some(err) = store.update_error.clone() {
            return Err(err);
        }
        let Some(stored) = store.nodes.get_mut(&name) else {
            return Err(ApiError::NotFound(format!("nodes {:?} not found", name)));
        };
        *stored = node.clone();
        Ok(node.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        let mut store = lock(&self.store);
        store.actions.push(Action {
            verb: "delete",
            subresource: None,
            name: name.to_string(),
            object: None,
        });
        if let Some(err) = store.delete_error.clone() {
            return Err(err);
        }
        store.nodes.remove(name);
        Ok(())
    }
}

struct CadvisorData {
    machine_info: MachineInfo,
    version_info: VersionInfo,
    root_fs: FsInfo,
    images_fs: FsInfo,
    memory_available: u64,
    machine_info_error: Option<String>,
    version_info_error: Option<String>,
}

/// [`Cadvisor`] returning values set by the test.
pub struct FakeCadvisor {
    data: Mutex<CadvisorData>,
}

impl Default for FakeCadvisor {
    fn default() -> Self {
        Self {
            data: Mutex::new(CadvisorData {
                machine_info: MachineInfo {
                    machine_id: "123".to_string(),
                    system_uuid: "abc".to_string(),
                    boot_id: "1b3".to_string(),
                    num_cores: 2,
                    memory_capacity: 1024,
                },
                version_info: VersionInfo {
                    kernel_version: "3.16.0-0.bpo.4-amd64".to_string(),
                    container_os_version: "Debian GNU/Linux 7 (wheezy)".to_string(),
                },
                root_fs: FsInfo {
                    capacity: 500 * MB,
                    available: 200 * MB,
                    usage: 300 * MB,
                },
                images_fs: FsInfo {
                    capacity: 500 * MB,
                    available: 200 * MB,
                    usage: 300 * MB,
                },
                memory_available: 1024 * MB,
                machine_info_error: None,
                version_info_error: None,
            }),
        }
    }
}

impl FakeCadvisor {
    /// Sets root and images filesystem capacity and availability, in MB.
    pub fn set_disk_space_mb(
        &self,
        root_capacity: u64,
        docker_capacity: u64,
        root_available: u64,
        docker_available: u64,
    ) {
        let mut data = lock(&self.data);
        data.root_fs = FsInfo {
            capacity: root_capacity * MB,
            available: root_available * MB,
            usage: root_capacity.saturating_sub(root_available) * MB,
        };
        data.images_fs = FsInfo {
            capacity: docker_capacity * MB,
            available: docker_available * MB,
            usage: docker_capacity.saturating_sub(docker_available) * MB,
        };
    }

    pub fn set_root_fs(&self, fs: FsInfo) {
        lock(&self.data).root_fs = fs;
    }

    pub fn set_memory_available(&self, bytes: u64) {
        lock(&self.data).memory_available = bytes;
    }

    pub fn set_machine_info(&self, info: MachineInfo) {
        lock(&self.data).machine_info = info;
    }

    pub fn set_version_info(&self, info: VersionInfo) {
        lock(&self.data).version_info = info;
    }

    pub fn set_machine_info_error(&self, err: Option<&str>) {
        lock(&self.data).machine_info_error = err.map(String::from);
    }

    pub fn set_version_info_error(&self, err: Option<&str>) {
        lock(&self.data).version_info_error = err.map(String::from);
    }
}

impl Cadvisor for FakeCadvisor {
    fn machine_info(&self) -> anyhow::Result<MachineInfo> {
        let data = lock(&self.data);
        if let Some(err) = &data.machine_info_error {
            anyhow::bail!("{}", err);
        }
        Ok(data.machine_info.clone())
    }

    fn version_info(&self) -> anyhow::Result<VersionInfo> {
        let data = lock(&self.data);
        if let Some(err) = &data.version_info_error {
            anyhow::bail!("{}", err);
        }
        Ok(data.version_info.clone())
    }

    fn root_fs_info(&self) -> anyhow::Result<FsInfo> {
        Ok(lock(&self.data).root_fs)
    }

    fn images_fs_info(&self) -> anyhow::Result<FsInfo> {
        Ok(lock(&self.data).images_fs)
    }

    fn memory_available(&self) -> anyhow::Result<u64> {
        Ok(lock(&self.data).memory_available)
    }
}

#[derive(Default)]
struct RuntimeData {
    status_error: Option<String>,
    images: Vec<Image>,
    list_images_error: Option<String>,
    update_pod_cidr_error: Option<String>,
    pod_cidrs: Vec<String>,
    status_calls: usize,
}

/// [`ContainerRuntime`] of type `test` at version `1.5.0`.
#[derive(Default)]
pub struct FakeRuntime {
    data: Mutex<RuntimeData>,
}

impl FakeRuntime {
    pub fn set_status_error(&self, err: Option<&str>) {
        lock(&self.data).status_error = err.map(String::from);
    }

    pub fn set_images(&self, images: Vec<Image>) {
        lock(&self.data).images = images;
    }

    pub fn set_list_images_error(&self, err: Option<&str>) {
        lock(&self.data).list_images_error = err.map(String::from);
    }

    pub fn set_update_pod_cidr_error(&self, err: Option<&str>) {
        lock(&self.data).update_pod_cidr_error = err.map(String::from);
    }

    /// Returns the pod CIDRs the runtime accepted, in order.
    pub fn pod_cidrs(&self) -> Vec<String> {
        lock(&self.data).pod_cidrs.clone()
    }

    /// Returns how many times status was probed.
    pub fn status_calls(&self) -> usize {
        lock(&self.data).status_calls
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn runtime_type(&self) -> &str {
        "test"
    }

    async fn version(&self) -> anyhow::Result<String> {
        Ok("1.5.0".to_string())
    }

    async fn status(&self) -> anyhow::Result<()> {
        let mut data = lock(&self.data);
        data.status_calls += 1;
        match &data.status_error {
            Some(err) => anyhow::bail!("{}", err),
            None => Ok(()),
        }
    }

    async fn list_images(&self) -> anyhow::Result<Vec<Image>> {
        let data = lock(&self.data);
        if let Some(err) = &data.list_images_error {
            anyhow::bail!("{}", err);
        }
        Ok(data.images.clone())
    }

    async fn update_pod_cidr(&self, cidr: &str) -> anyhow::Result<()> {
        let mut data = lock(&self.data);
        if let Some(err) = &data.update_pod_cidr_error {
            anyhow::bail!("{}", err);
        }
        data.pod_cidrs.push(cidr.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct PluginData {
    status_error: Option<String>,
    pod_cidrs: Vec<String>,
}

/// [`NetworkPlugin`] whose readiness is set by the test.
#[derive(Default)]
pub struct FakeNetworkPlugin {
    data: Mutex<PluginData>,
}

impl FakeNetworkPlugin {
    pub fn set_status_error(&self, err: Option<&str>) {
        lock(&self.data).status_error = err.map(String::from);
    }

    /// Returns the pod CIDR changes the plugin was told about.
    pub fn pod_cidrs(&self) -> Vec<String> {
        lock(&self.data).pod_cidrs.clone()
    }
}

impl NetworkPlugin for FakeNetworkPlugin {
    fn name(&self) -> &str {
        "fake"
    }

    fn status(&self) -> anyhow::Result<()> {
        match &lock(&self.data).status_error {
            Some(err) => anyhow::bail!("{}", err),
            None => Ok(()),
        }
    }

    fn on_pod_cidr_change(&self, cidr: &str) {
        lock(&self.data).pod_cidrs.push(cidr.to_string());
    }
}

/// [`PressureSignals`] set by the test.
#[derive(Default)]
pub struct FakePressure {
    memory: Mutex<bool>,
    disk: Mutex<bool>,
}

impl FakePressure {
    pub fn set_memory_pressure(&self, v: bool) {
        *lock(&self.memory) = v;
    }

    pub fn set_disk_pressure(&self, v: bool) {
        *lock(&self.disk) = v;
    }
}

impl PressureSignals for FakePressure {
    fn under_memory_pressure(&self) -> bool {
        *lock(&self.memory)
    }

    fn under_disk_pressure(&self) -> bool {
        *lock(&self.disk)
    }
}

/// An event captured by [`RecordingRecorder`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// [`EventRecorder`] that keeps every event in memory.
#[derive(Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingRecorder {
    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    /// Returns the reasons of all recorded events, in order.
    pub fn reasons(&self) -> Vec<String> {
        lock(&self.events).iter().map(|e| e.reason.clone()).collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl EventRecorder for RecordingRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        lock(&self.events).push(RecordedEvent {
            object: object.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
