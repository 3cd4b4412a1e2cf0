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

//! Configuration structures for the kubelet.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::disk_space::DiskSpacePolicy;
use crate::error::ConfigError;
use crate::eviction::EvictionThresholds;
use crate::network::{validate_iptables_bits, HairpinMode};

/// Main configuration for the kubelet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub generic: GenericKubeletConfig,

    /// Node registration and status reporting.
    #[serde(default)]
    pub node_status: NodeStatusConfig,

    /// Container runtime probing.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Pod networking.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Pod DNS.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Minimum free disk space.
    #[serde(default)]
    pub disk_space: DiskSpacePolicy,

    /// Hard eviction thresholds.
    #[serde(default)]
    pub eviction: EvictionThresholds,
}

impl KubeletConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Checks values that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("nodeStatusUpdateFrequency", self.node_status.update_frequency),
            ("runtimeCheckPeriod", self.runtime.check_period),
            ("runtimeSyncThreshold", self.runtime.sync_threshold),
            ("networkStatusPeriod", self.network.status_period),
            ("shutdownTimeout", self.generic.shutdown_timeout),
        ];
        for (field, period) in periods {
            if period.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        validate_iptables_bits(
            self.network.iptables_masquerade_bit,
            self.network.iptables_drop_bit,
        )
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericKubeletConfig {
    /// Kubeconfig file for talking to the apiserver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// Master URL to build a client from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    /// Name to register the node under. Defaults to the hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname_override: Option<String>,

    /// Address for the health check server.
    #[serde(default = "default_healthz_bind_address")]
    pub healthz_bind_address: SocketAddr,

    /// Directory holding kubelet state.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// The maximum time to wait for loops to stop.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for GenericKubeletConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            master: None,
            hostname_override: None,
            healthz_bind_address: default_healthz_bind_address(),
            root_dir: default_root_dir(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_healthz_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 10248))
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/lib/kubelet")
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Resources set aside from allocatable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedResources {
    /// CPU in millicores.
    #[serde(default)]
    pub cpu_millis: u64,

    /// Memory in bytes.
    #[serde(default)]
    pub memory_bytes: u64,
}

/// Node registration and status reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusConfig {
    /// Register the node with the API server on startup.
    #[serde(default = "default_true")]
    pub register_node: bool,

    /// Register the node as schedulable.
    #[serde(default = "default_true")]
    pub register_schedulable: bool,

    /// Labels added to the node at registration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,

    /// IP address reported for the node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_ip: Option<IpAddr>,

    /// Let the attach/detach controller manage volumes on this node.
    #[serde(default = "default_true")]
    pub enable_controller_attach_detach: bool,

    /// How often node status is posted.
    #[serde(default = "default_update_frequency", with = "humantime_serde")]
    pub update_frequency: Duration,

    /// Minimum time OutOfDisk stays True before it can clear.
    #[serde(default = "default_ood_transition_frequency", with = "humantime_serde")]
    pub out_of_disk_transition_frequency: Duration,

    /// Pod capacity.
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,

    /// Number of NVIDIA GPUs.
    #[serde(default)]
    pub nvidia_gpus: u32,

    /// Resources reserved for kubernetes system daemons.
    #[serde(default)]
    pub kube_reserved: ReservedResources,

    /// Resources reserved for non-kubernetes system daemons.
    #[serde(default)]
    pub system_reserved: ReservedResources,

    /// How long filesystem info is reused.
    #[serde(default = "default_disk_info_cache_period", with = "humantime_serde")]
    pub disk_info_cache_period: Duration,
}

impl Default for NodeStatusConfig {
    fn default() -> Self {
        Self {
            register_node: true,
            register_schedulable: true,
            node_labels: BTreeMap::new(),
            node_ip: None,
            enable_controller_attach_detach: true,
            update_frequency: default_update_frequency(),
            out_of_disk_transition_frequency: default_ood_transition_frequency(),
            max_pods: default_max_pods(),
            nvidia_gpus: 0,
            kube_reserved: ReservedResources::default(),
            system_reserved: ReservedResources::default(),
            disk_info_cache_period: default_disk_info_cache_period(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_update_frequency() -> Duration {
    Duration::from_secs(10)
}

fn default_ood_transition_frequency() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_pods() -> u32 {
    110
}

fn default_disk_info_cache_period() -> Duration {
    Duration::from_secs(2)
}

/// Container runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Runtime type reported in node info.
    #[serde(default = "default_runtime_type")]
    pub container_runtime: String,

    /// Runtime version reported in node info.
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,

    /// Unix socket of the runtime.
    #[serde(default = "default_runtime_endpoint")]
    pub runtime_endpoint: PathBuf,

    /// Directory on the filesystem holding images.
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// How often the runtime is probed.
    #[serde(default = "default_runtime_check_period", with = "humantime_serde")]
    pub check_period: Duration,

    /// How stale the last successful probe may get before the runtime is
    /// reported down.
    #[serde(default = "default_runtime_sync_threshold", with = "humantime_serde")]
    pub sync_threshold: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            container_runtime: default_runtime_type(),
            runtime_version: default_runtime_version(),
            runtime_endpoint: default_runtime_endpoint(),
            images_dir: default_images_dir(),
            check_period: default_runtime_check_period(),
            sync_threshold: default_runtime_sync_threshold(),
        }
    }
}

fn default_runtime_type() -> String {
    "containerd".to_string()
}

fn default_runtime_version() -> String {
    "unknown".to_string()
}

fn default_runtime_endpoint() -> PathBuf {
    PathBuf::from("/run/containerd/containerd.sock")
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("/var/lib/containerd")
}

fn default_runtime_check_period() -> Duration {
    Duration::from_secs(5)
}

fn default_runtime_sync_threshold() -> Duration {
    Duration::from_secs(30)
}

/// Pod network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Network plugin: `cni`, or empty for host networking only.
    #[serde(default = "default_network_plugin")]
    pub network_plugin: String,

    /// Directory holding CNI configuration.
    #[serde(default = "default_cni_conf_dir")]
    pub cni_conf_dir: PathBuf,

    /// How often network plugin readiness is checked.
    #[serde(default = "default_network_status_period", with = "humantime_serde")]
    pub status_period: Duration,

    /// Requested hairpin mode.
    #[serde(default)]
    pub hairpin_mode: HairpinMode,

    /// fwmark bit for packets to masquerade.
    #[serde(default = "default_masquerade_bit")]
    pub iptables_masquerade_bit: i32,

    /// fwmark bit for packets to drop.
    #[serde(default = "default_drop_bit")]
    pub iptables_drop_bit: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_plugin: default_network_plugin(),
            cni_conf_dir: default_cni_conf_dir(),
            status_period: default_network_status_period(),
            hairpin_mode: HairpinMode::default(),
            iptables_masquerade_bit: default_masquerade_bit(),
            iptables_drop_bit: default_drop_bit(),
        }
    }
}

fn default_network_plugin() -> String {
    "cni".to_string()
}

fn default_cni_conf_dir() -> PathBuf {
    PathBuf::from("/etc/cni/net.d")
}

fn default_network_status_period() -> Duration {
    Duration::from_secs(30)
}

fn default_masquerade_bit() -> i32 {
    14
}

fn default_drop_bit() -> i32 {
    15
}

/// Pod DNS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    /// Cluster DNS server addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_dns: Vec<IpAddr>,

    /// Cluster domain, e.g. `cluster.local`.
    #[serde(default)]
    pub cluster_domain: String,

    /// Host resolver file. Empty disables host DNS.
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: String,
}

impl DnsConfig {
    /// Returns the resolver file path, if one is configured.
    pub fn resolver_path(&self) -> Option<PathBuf> {
        if self.resolv_conf.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.resolv_conf))
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cluster_dns: Vec::new(),
            cluster_domain: String::new(),
            resolv_conf: default_resolv_conf(),
        }
    }
}

fn default_resolv_conf() -> String {
    "/etc/resolv.conf".to_string()
}

/// Module for duration serialization/deserialization with human-readable format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KubeletConfig::default();
        assert_eq!(config.node_status.update_frequency, Duration::from_secs(10));
        assert_eq!(config.runtime.check_period, Duration::from_secs(5));
        assert_eq!(config.runtime.sync_threshold, Duration::from_secs(30));
        assert_eq!(config.network.status_period, Duration::from_secs(30));
        assert_eq!(
            config.node_status.out_of_disk_transition_frequency,
            Duration::from_secs(300)
        );
        assert_eq!(config.node_status.max_pods, 110);
        assert_eq!(config.disk_space.root_free_disk_mb, 256);
        assert_eq!(config.eviction.memory_available, 100 * 1024 * 1024);
        assert_eq!(config.network.hairpin_mode, HairpinMode::PromiscuousBridge);
        assert_eq!(
            config.dns.resolver_path(),
            Some(PathBuf::from("/etc/resolv.conf"))
        );
        assert_eq!(
            config.generic.healthz_bind_address.to_string(),
            "127.0.0.1:10248"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_basic_config() {
        let yaml = r#"
generic:
  hostnameOverride: node-a
  shutdownTimeout: 60s
nodeStatus:
  updateFrequency: 20s
  outOfDiskTransitionFrequency: 10s
  nodeLabels:
    zone: a
  kubeReserved:
    cpuMillis: 200
    memoryBytes: 100000000
runtime:
  containerRuntime: docker
  syncThreshold: 1m
network:
  hairpinMode: hairpin-veth
dns:
  clusterDns: ["10.0.0.10"]
  clusterDomain: cluster.local
  resolvConf: ""
diskSpace:
  rootFreeDiskMb: 100
"#;

        let config: KubeletConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.generic.hostname_override.as_deref(), Some("node-a"));
        assert_eq!(config.generic.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.node_status.update_frequency, Duration::from_secs(20));
        assert_eq!(config.node_status.node_labels["zone"], "a");
        assert_eq!(config.node_status.kube_reserved.cpu_millis, 200);
        assert!(config.node_status.register_node);
        assert_eq!(config.runtime.container_runtime, "docker");
        assert_eq!(config.runtime.sync_threshold, Duration::from_secs(60));
        assert_eq!(config.network.hairpin_mode, HairpinMode::HairpinVeth);
        assert_eq!(config.dns.cluster_dns, vec!["10.0.0.10".parse::<IpAddr>().unwrap()]);
        assert_eq!(config.dns.resolver_path(), None);
        assert_eq!(config.disk_space.root_free_disk_mb, 100);
        assert_eq!(config.disk_space.docker_free_disk_mb, 256);
    }

    #[test]
    fn test_validate_rejects_zero_periods() {
        let mut config = KubeletConfig::default();
        config.runtime.check_period = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "runtimeCheckPeriod"
            })
        );
    }

    #[test]
    fn test_validate_rejects_bad_iptables_bits() {
        let mut config = KubeletConfig::default();
        config.network.iptables_drop_bit = 14;
        assert_eq!(config.validate(), Err(ConfigError::IptablesBitsEqual(14)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubelet.yaml");
        std::fs::write(&path, "nodeStatus:\n  maxPods: 20\n").unwrap();
        let config = KubeletConfig::load(&path).unwrap();
        assert_eq!(config.node_status.max_pods, 20);
        assert!(KubeletConfig::load(&dir.path().join("missing.yaml")).is_err());
    }
}
