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

//! Node registration and status reporting.
//!
//! The [`NodeStatusManager`] owns the Node object this kubelet publishes. It
//! registers the node with the API server, then periodically rebuilds its
//! status from machine info, the container runtime and the aggregated
//! [`RuntimeState`], and writes it back.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    ContainerImage, Node, NodeAddress, NodeSpec, NodeStatus, NodeSystemInfo, ObjectReference,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio_util::sync::CancellationToken;

use crate::cadvisor::Cadvisor;
use crate::clock::Clock;
use crate::conditions::{ConditionReconciler, ConditionType, NodeMeasurements};
use crate::config::{KubeletConfig, ReservedResources};
use crate::container_runtime::{ContainerRuntime, Image};
use crate::context::KubeletContext;
use crate::disk_space::{DiskSpaceManager, DiskSpacePolicy};
use crate::error::{KubeletError, Result};
use crate::events::{node_reference, EventRecorder, EventType};
use crate::eviction::PressureSignals;
use crate::network::{self, NetworkPlugin};
use crate::node_client::NodeClient;
use crate::runtime_state::RuntimeState;

/// Number of attempts `update_node_status` makes per call.
pub const NODE_STATUS_UPDATE_RETRY: usize = 5;

/// Maximum number of images reported in node status.
pub const MAX_IMAGES_IN_NODE_STATUS: usize = 50;

/// Maximum number of names reported per image.
pub const MAX_NAMES_PER_IMAGE_IN_NODE_STATUS: usize = 5;

/// Annotation telling the attach/detach controller it manages this node.
pub const CONTROLLER_MANAGED_ATTACH_ANNOTATION: &str =
    "volumes.kubernetes.io/controller-managed-attach-detach";

/// Extended resource name for NVIDIA GPUs.
pub const RESOURCE_NVIDIA_GPU: &str = "alpha.kubernetes.io/nvidia-gpu";

pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";
pub const LABEL_OS: &str = "kubernetes.io/os";
pub const LABEL_ARCH: &str = "kubernetes.io/arch";

const MANAGED_LABELS: [&str; 3] = [LABEL_HOSTNAME, LABEL_OS, LABEL_ARCH];

const INITIAL_REGISTRATION_BACKOFF: Duration = Duration::from_millis(100);
const MAX_REGISTRATION_BACKOFF: Duration = Duration::from_secs(7);

/// Version string reported as kubelet and kube-proxy version.
pub fn kubelet_version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

/// Returns the architecture name Kubernetes uses for the build target.
pub fn node_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Node-level settings for status reporting.
#[derive(Debug, Clone)]
pub struct NodeStatusSettings {
    pub node_name: String,
    pub hostname: String,
    pub node_ip: Option<IpAddr>,
    pub node_labels: BTreeMap<String, String>,
    pub register_node: bool,
    pub register_schedulable: bool,
    pub enable_controller_attach_detach: bool,
    pub max_pods: u32,
    pub nvidia_gpus: u32,
    pub kube_reserved: ReservedResources,
    pub system_reserved: ReservedResources,
    pub out_of_disk_transition_frequency: Duration,
    pub disk_space: DiskSpacePolicy,
    pub disk_info_cache_period: Duration,
}

impl NodeStatusSettings {
    pub fn from_config(
        config: &KubeletConfig,
        node_name: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        let ns = &config.node_status;
        Self {
            node_name: node_name.into(),
            hostname: hostname.into(),
            node_ip: ns.node_ip,
            node_labels: ns.node_labels.clone(),
            register_node: ns.register_node,
            register_schedulable: ns.register_schedulable,
            enable_controller_attach_detach: ns.enable_controller_attach_detach,
            max_pods: ns.max_pods,
            nvidia_gpus: ns.nvidia_gpus,
            kube_reserved: ns.kube_reserved,
            system_reserved: ns.system_reserved,
            out_of_disk_transition_frequency: ns.out_of_disk_transition_frequency,
            disk_space: config.disk_space,
            disk_info_cache_period: ns.disk_info_cache_period,
        }
    }
}

/// Numeric node resources, before conversion to quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Resources {
    cpu_millis: u64,
    memory_bytes: u64,
    pods: u64,
    nvidia_gpus: u64,
}

impl Resources {
    fn minus(self, reserved: &[ReservedResources]) -> Self {
        let cpu: u64 = reserved.iter().map(|r| r.cpu_millis).sum();
        let memory: u64 = reserved.iter().map(|r| r.memory_bytes).sum();
        Self {
            cpu_millis: self.cpu_millis.saturating_sub(cpu),
            memory_bytes: self.memory_bytes.saturating_sub(memory),
            ..self
        }
    }

    fn to_list(self) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), cpu_quantity(self.cpu_millis)),
            ("memory".to_string(), Quantity(self.memory_bytes.to_string())),
            ("pods".to_string(), Quantity(self.pods.to_string())),
            (
                RESOURCE_NVIDIA_GPU.to_string(),
                Quantity(self.nvidia_gpus.to_string()),
            ),
        ])
    }
}

fn cpu_quantity(millis: u64) -> Quantity {
    if millis % 1000 == 0 {
        Quantity((millis / 1000).to_string())
    } else {
        Quantity(format!("{}m", millis))
    }
}

/// Converts runtime images to node status images.
///
/// Largest images come first. Digests are listed before tags.
pub fn node_images(mut images: Vec<Image>) -> Vec<ContainerImage> {
    images.sort_by(|a, b| b.size.cmp(&a.size));
    images
        .into_iter()
        .take(MAX_IMAGES_IN_NODE_STATUS)
        .map(|image| {
            let names: Vec<String> = image
                .repo_digests
                .into_iter()
                .chain(image.repo_tags)
                .take(MAX_NAMES_PER_IMAGE_IN_NODE_STATUS)
                .collect();
            ContainerImage {
                names: Some(names),
                size_bytes: Some(i64::try_from(image.size).unwrap_or(i64::MAX)),
            }
        })
        .collect()
}

fn wants_cmad(node: &Node) -> bool {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONTROLLER_MANAGED_ATTACH_ANNOTATION))
        .is_some_and(|v| v == "true")
}

/// Makes the attach-detach annotation on `existing` match `node`.
///
/// Returns true if `existing` was changed.
pub fn reconcile_cmad_annotation(node: &Node, existing: &mut Node) -> bool {
    let desired = wants_cmad(node);
    if wants_cmad(existing) == desired {
        return false;
    }

    let annotations = existing.metadata.annotations.get_or_insert_with(BTreeMap::new);
    if desired {
        tracing::info!("setting controller-managed attach-detach annotation");
        annotations.insert(
            CONTROLLER_MANAGED_ATTACH_ANNOTATION.to_string(),
            "true".to_string(),
        );
    } else {
        tracing::info!("removing controller-managed attach-detach annotation");
        annotations.remove(CONTROLLER_MANAGED_ATTACH_ANNOTATION);
    }
    true
}

fn external_id(node: &Node) -> Option<&str> {
    node.spec.as_ref().and_then(|s| s.external_id.as_deref())
}

/// Runs a synchronous host measurement on the blocking pool.
async fn run_blocking<T, F>(measure: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(measure)
        .await
        .map_err(|e| anyhow::anyhow!("host measurement did not complete: {}", e))?
}

async fn lookup_node_ip(hostname: &str) -> Result<IpAddr> {
    let addrs = tokio::net::lookup_host((hostname, 0))
        .await
        .map_err(|_| KubeletError::NodeAddress(hostname.to_string()))?;
    addrs
        .map(|a| a.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .ok_or_else(|| KubeletError::NodeAddress(hostname.to_string()))
}

/// Builds and publishes this kubelet's Node object.
pub struct NodeStatusManager {
    settings: NodeStatusSettings,
    client: Arc<dyn NodeClient>,
    cadvisor: Arc<dyn Cadvisor>,
    runtime: Arc<dyn ContainerRuntime>,
    network_plugin: Arc<dyn NetworkPlugin>,
    pressure: Arc<dyn PressureSignals>,
    recorder: Arc<dyn EventRecorder>,
    clock: Arc<dyn Clock>,
    runtime_state: Arc<RuntimeState>,
    disk_space: Arc<DiskSpaceManager>,
    reconciler: ConditionReconciler,
    node_ref: ObjectReference,
    old_unschedulable: Mutex<bool>,
    registered: AtomicBool,
}

impl NodeStatusManager {
    pub fn new(
        settings: NodeStatusSettings,
        ctx: &KubeletContext,
        runtime_state: Arc<RuntimeState>,
    ) -> Self {
        let disk_space = Arc::new(DiskSpaceManager::new(
            ctx.cadvisor.clone(),
            settings.disk_space,
            settings.disk_info_cache_period,
            ctx.clock.clone(),
        ));
        let reconciler = ConditionReconciler::new().with_cooldown(
            ConditionType::OutOfDisk,
            settings.out_of_disk_transition_frequency,
        );
        let node_ref = node_reference(&settings.node_name);

        Self {
            settings,
            client: ctx.node_client.clone(),
            cadvisor: ctx.cadvisor.clone(),
            runtime: ctx.runtime.clone(),
            network_plugin: ctx.network_plugin.clone(),
            pressure: ctx.pressure.clone(),
            recorder: ctx.recorder.clone(),
            clock: ctx.clock.clone(),
            runtime_state,
            disk_space,
            reconciler,
            node_ref,
            old_unschedulable: Mutex::new(false),
            registered: AtomicBool::new(false),
        }
    }

    /// Returns true once the node has been registered.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn record_node_event(&self, event_type: EventType, reason: &str, message: &str) {
        self.recorder
            .event(&self.node_ref, event_type, reason, message);
    }

    fn record_status_event(&self, reason: &str) {
        let message = format!("Node {} status is now: {}", self.settings.node_name, reason);
        self.record_node_event(EventType::Normal, reason, &message);
    }

    /// Builds the Node object sent at registration.
    pub async fn initial_node(&self) -> Node {
        let mut labels = BTreeMap::from([
            (LABEL_HOSTNAME.to_string(), self.settings.hostname.clone()),
            (LABEL_OS.to_string(), std::env::consts::OS.to_string()),
            (LABEL_ARCH.to_string(), node_architecture().to_string()),
        ]);
        for (key, value) in &self.settings.node_labels {
            if MANAGED_LABELS.contains(&key.as_str()) {
                tracing::warn!(label = %key, "node label is managed by the kubelet, ignoring");
                continue;
            }
            labels.insert(key.clone(), value.clone());
        }

        let annotations = self.settings.enable_controller_attach_detach.then(|| {
            tracing::info!("setting node annotation to enable volume controller attach/detach");
            BTreeMap::from([(
                CONTROLLER_MANAGED_ATTACH_ANNOTATION.to_string(),
                "true".to_string(),
            )])
        });

        let mut node = Node {
            metadata: ObjectMeta {
                name: Some(self.settings.node_name.clone()),
                labels: Some(labels),
                annotations,
                ..Default::default()
            },
            spec: Some(NodeSpec {
                external_id: Some(self.settings.hostname.clone()),
                unschedulable: Some(!self.settings.register_schedulable),
                ..Default::default()
            }),
            status: None,
        };

        self.set_node_status(&mut node).await;
        node
    }

    /// Attempts one registration. Returns true if the node is registered.
    pub async fn try_register_with_api_server(&self, node: &Node) -> bool {
        let name = node.metadata.name.as_deref().unwrap_or_default();

        let err = match self.client.create(node).await {
            Ok(_) => return true,
            Err(e) => e,
        };
        if !err.is_already_exists() {
            tracing::error!(node = %name, error = %err, "unable to register node with API server");
            return false;
        }

        let mut existing = match self.client.get(name).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(node = %name, error = %e, "unable to get existing node");
                return false;
            }
        };

        if external_id(&existing) == external_id(node) {
            tracing::info!(node = %name, "node was previously registered");

            if reconcile_cmad_annotation(node, &mut existing) {
                if let Err(e) = self.client.update_status(&existing).await {
                    tracing::error!(
                        node = %name,
                        error = %e,
                        "unable to reconcile node with API server"
                    );
                    return false;
                }
            }
            return true;
        }

        tracing::error!(
            node = %name,
            previous = ?external_id(&existing),
            current = ?external_id(node),
            "external ID changed, deleting the node so it can be recreated"
        );
        if let Err(e) = self.client.delete(name).await {
            tracing::error!(node = %name, error = %e, "unable to delete old node");
        } else {
            tracing::info!(node = %name, "deleted old node object");
        }
        false
    }

    /// Registers the node, backing off between attempts.
    ///
    /// Returns false if cancelled before registration succeeded.
    pub async fn register_with_api_server(&self, cancel: &CancellationToken) -> bool {
        if self.is_registered() {
            return true;
        }

        let mut step = INITIAL_REGISTRATION_BACKOFF;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
            step = (step * 2).min(MAX_REGISTRATION_BACKOFF);

            let node = self.initial_node().await;
            tracing::info!(node = %self.settings.node_name, "attempting to register node");
            if self.try_register_with_api_server(&node).await {
                tracing::info!(node = %self.settings.node_name, "successfully registered node");
                self.registered.store(true, Ordering::SeqCst);
                return true;
            }
        }
    }

    /// Posts node status, retrying up to [`NODE_STATUS_UPDATE_RETRY`] times.
    pub async fn update_node_status(&self) -> Result<()> {
        for attempt in 0..NODE_STATUS_UPDATE_RETRY {
            match self.try_update_node_status().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::error!(attempt, error = %e, "error updating node status, will retry");
                }
            }
        }
        Err(KubeletError::UpdateRetryExceeded(NODE_STATUS_UPDATE_RETRY))
    }

    /// Reads the node, rebuilds its status and writes it back once.
    pub async fn try_update_node_status(&self) -> Result<()> {
        let name = &self.settings.node_name;
        let mut node = self
            .client
            .get(name)
            .await
            .map_err(|source| KubeletError::GetNode {
                node: name.clone(),
                source,
            })?;

        let pod_cidr = node
            .spec
            .as_ref()
            .and_then(|s| s.pod_cidr.clone())
            .filter(|c| !c.is_empty());
        if let Some(cidr) = pod_cidr {
            network::update_pod_cidr(
                &self.runtime_state,
                self.network_plugin.as_ref(),
                self.runtime.as_ref(),
                &cidr,
            )
            .await;
        }

        self.set_node_status(&mut node).await;

        self.client
            .update_status(&node)
            .await
            .map_err(|source| KubeletError::UpdateNodeStatus {
                node: name.clone(),
                source,
            })?;
        Ok(())
    }

    /// Fills in `node.status` from live measurements.
    pub async fn set_node_status(&self, node: &mut Node) {
        let mut status = node.status.take().unwrap_or_default();

        self.set_addresses(&mut status).await;
        self.set_machine_info(&mut status).await;
        self.set_version_info(&mut status).await;
        self.set_runtime_version(&mut status).await;
        self.set_images(&mut status).await;
        self.set_conditions(&mut status).await;

        node.status = Some(status);
        self.record_schedulable_event(node);
    }

    async fn set_addresses(&self, status: &mut NodeStatus) {
        let ip = match self.settings.node_ip {
            Some(ip) => Ok(ip),
            None => match self.settings.hostname.parse::<IpAddr>() {
                Ok(ip) => Ok(ip),
                Err(_) => lookup_node_ip(&self.settings.hostname).await,
            },
        };
        match ip {
            Ok(ip) => {
                status.addresses = Some(vec![
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: ip.to_string(),
                    },
                    NodeAddress {
                        type_: "Hostname".to_string(),
                        address: self.settings.hostname.clone(),
                    },
                ]);
            }
            Err(e) => tracing::error!(error = %e, "unable to determine node addresses"),
        }
    }

    async fn set_machine_info(&self, status: &mut NodeStatus) {
        let mut capacity = Resources {
            pods: u64::from(self.settings.max_pods),
            nvidia_gpus: u64::from(self.settings.nvidia_gpus),
            ..Default::default()
        };

        let cadvisor = self.cadvisor.clone();
        match run_blocking(move || cadvisor.machine_info()).await {
            Ok(info) => {
                capacity.cpu_millis = info.num_cores.saturating_mul(1000);
                capacity.memory_bytes = info.memory_capacity;

                let node_info = status.node_info.get_or_insert_with(NodeSystemInfo::default);
                if !node_info.boot_id.is_empty() && node_info.boot_id != info.boot_id {
                    let message = format!(
                        "Node {} has been rebooted, boot id: {}",
                        self.settings.node_name, info.boot_id
                    );
                    self.record_node_event(EventType::Warning, "Rebooted", &message);
                }
                node_info.machine_id = info.machine_id;
                node_info.system_uuid = info.system_uuid;
                node_info.boot_id = info.boot_id;
            }
            Err(e) => tracing::error!(error = %e, "error getting machine info"),
        }

        let allocatable =
            capacity.minus(&[self.settings.kube_reserved, self.settings.system_reserved]);
        status.capacity = Some(capacity.to_list());
        status.allocatable = Some(allocatable.to_list());
    }

    async fn set_version_info(&self, status: &mut NodeStatus) {
        let cadvisor = self.cadvisor.clone();
        let version = run_blocking(move || cadvisor.version_info()).await;
        let node_info = status.node_info.get_or_insert_with(NodeSystemInfo::default);
        match version {
            Ok(info) => {
                node_info.kernel_version = info.kernel_version;
                node_info.os_image = info.container_os_version;
            }
            Err(e) => tracing::error!(error = %e, "error getting version info"),
        }
        node_info.operating_system = std::env::consts::OS.to_string();
        node_info.architecture = node_architecture().to_string();
        node_info.kubelet_version = kubelet_version();
        node_info.kube_proxy_version = kubelet_version();
    }

    async fn set_runtime_version(&self, status: &mut NodeStatus) {
        match self.runtime.version().await {
            Ok(version) => {
                let node_info = status.node_info.get_or_insert_with(NodeSystemInfo::default);
                node_info.container_runtime_version =
                    format!("{}://{}", self.runtime.runtime_type(), version);
            }
            Err(e) => tracing::error!(error = %e, "error getting container runtime version"),
        }
    }

    async fn set_images(&self, status: &mut NodeStatus) {
        match self.runtime.list_images().await {
            Ok(images) => status.images = Some(node_images(images)),
            Err(e) => tracing::error!(error = %e, "error getting image list"),
        }
    }

    async fn set_conditions(&self, status: &mut NodeStatus) {
        let disk_space = self.disk_space.clone();
        let pressure = self.pressure.clone();
        let (out_of_disk, memory_pressure, disk_pressure) = run_blocking(move || {
            Ok((
                disk_space.is_out_of_disk(),
                pressure.under_memory_pressure(),
                pressure.under_disk_pressure(),
            ))
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "unable to measure node pressure");
            (false, false, false)
        });

        let measurements = NodeMeasurements {
            out_of_disk,
            memory_pressure,
            disk_pressure,
            runtime_errors: self.runtime_state.errors(),
        };
        let previous = status.conditions.take().unwrap_or_default();
        let reconciled = self
            .reconciler
            .reconcile(&previous, &measurements, self.clock.now());

        for transition in &reconciled.transitions {
            tracing::info!(
                node = %self.settings.node_name,
                condition = %transition.condition,
                status = %transition.status,
                "node condition changed"
            );
            self.record_status_event(transition.event_reason);
        }
        status.conditions = Some(reconciled.conditions);
    }

    fn record_schedulable_event(&self, node: &Node) {
        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        let mut old = self
            .old_unschedulable
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *old != unschedulable {
            let reason = if unschedulable {
                "NodeNotSchedulable"
            } else {
                "NodeSchedulable"
            };
            self.record_status_event(reason);
            *old = unschedulable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, size: u64, tags: &[&str], digests: &[&str]) -> Image {
        Image {
            id: id.to_string(),
            repo_tags: tags.iter().map(|s| s.to_string()).collect(),
            repo_digests: digests.iter().map(|s| s.to_string()).collect(),
            size,
        }
    }

    #[test]
    fn test_node_images_order_and_names() {
        let images = vec![
            image("a", 123, &["gcr.io/google_containers:v1", "gcr.io/google_containers:v2"], &[]),
            image("b", 456, &["gcr.io/google_containers:v3", "gcr.io/google_containers:v4"], &[]),
            image(
                "c",
                10,
                &["t1", "t2", "t3", "t4"],
                &["d1", "d2"],
            ),
        ];
        let got = node_images(images);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].size_bytes, Some(456));
        assert_eq!(got[1].size_bytes, Some(123));
        assert_eq!(
            got[2].names.as_deref(),
            Some(
                &[
                    "d1".to_string(),
                    "d2".to_string(),
                    "t1".to_string(),
                    "t2".to_string(),
                    "t3".to_string()
                ][..]
            )
        );
    }

    #[test]
    fn test_node_images_capped() {
        let images: Vec<Image> = (0..60)
            .map(|i| image(&format!("img{i}"), i as u64, &["tag"], &[]))
            .collect();
        let got = node_images(images);
        assert_eq!(got.len(), MAX_IMAGES_IN_NODE_STATUS);
        assert_eq!(got[0].size_bytes, Some(59));
        assert_eq!(got[49].size_bytes, Some(10));
    }

    #[test]
    fn test_resources() {
        let capacity = Resources {
            cpu_millis: 2000,
            memory_bytes: 10_000_000_000,
            pods: 110,
            nvidia_gpus: 0,
        };
        let reserved = ReservedResources {
            cpu_millis: 200,
            memory_bytes: 100_000_000,
        };
        let allocatable = capacity.minus(&[reserved, ReservedResources::default()]);
        assert_eq!(allocatable.cpu_millis, 1800);
        assert_eq!(allocatable.memory_bytes, 9_900_000_000);
        assert_eq!(allocatable.pods, 110);

        let list = allocatable.to_list();
        assert_eq!(list["cpu"], Quantity("1800m".to_string()));
        assert_eq!(list["memory"], Quantity("9900000000".to_string()));
        assert_eq!(list[RESOURCE_NVIDIA_GPU], Quantity("0".to_string()));
        assert_eq!(capacity.to_list()["cpu"], Quantity("2".to_string()));

        let over = capacity.minus(&[ReservedResources {
            cpu_millis: 5000,
            memory_bytes: u64::MAX,
        }]);
        assert_eq!(over.cpu_millis, 0);
        assert_eq!(over.memory_bytes, 0);
    }

    fn node_with_cmad(cmad: bool) -> Node {
        let mut node = Node::default();
        if cmad {
            node.metadata.annotations = Some(BTreeMap::from([(
                CONTROLLER_MANAGED_ATTACH_ANNOTATION.to_string(),
                "true".to_string(),
            )]));
        }
        node
    }

    #[test]
    fn test_reconcile_cmad_annotation() {
        let cases = [
            (true, true, false),
            (false, false, false),
            (true, false, true),
            (false, true, true),
        ];
        for (desired, current, changed) in cases {
            let node = node_with_cmad(desired);
            let mut existing = node_with_cmad(current);
            assert_eq!(
                reconcile_cmad_annotation(&node, &mut existing),
                changed,
                "desired {desired} current {current}"
            );
            assert_eq!(wants_cmad(&existing), desired);
        }
    }

    #[test]
    fn test_node_architecture() {
        let arch = node_architecture();
        assert!(!arch.is_empty());
        assert_ne!(arch, "x86_64");
        assert!(kubelet_version().starts_with('v'));
    }
}
