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

//! Pod network plumbing: plugin readiness, pod CIDR propagation, hairpin
//! mode selection and iptables marks.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::container_runtime::ContainerRuntime;
use crate::error::ConfigError;
use crate::runtime_state::RuntimeState;

/// Runtime type that knows how to set the hairpin flag on container veths.
pub const DOCKER_RUNTIME: &str = "docker";

/// Network plugin name that supports promiscuous bridge hairpinning.
pub const KUBENET_PLUGIN: &str = "kubenet";

/// A pod network plugin.
pub trait NetworkPlugin: Send + Sync + 'static {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns an error if the plugin cannot set up pod networking yet.
    fn status(&self) -> anyhow::Result<()>;

    /// Called when the node's pod CIDR changes.
    fn on_pod_cidr_change(&self, _cidr: &str) {}
}

/// Plugin driven by CNI configuration files.
#[derive(Debug, Clone)]
pub struct CniNetworkPlugin {
    conf_dir: PathBuf,
}

impl CniNetworkPlugin {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    fn has_network_config(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.conf_dir) else {
            return false;
        };
        entries.filter_map(|e| e.ok()).any(|entry| {
            let path = entry.path();
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("conf" | "conflist" | "json")
                )
        })
    }
}

impl NetworkPlugin for CniNetworkPlugin {
    fn name(&self) -> &str {
        "cni"
    }

    fn status(&self) -> anyhow::Result<()> {
        if !self.has_network_config() {
            anyhow::bail!("network plugin is not ready: cni config uninitialized");
        }
        Ok(())
    }

    fn on_pod_cidr_change(&self, cidr: &str) {
        tracing::debug!(cidr, "cni plugin ignores pod CIDR change");
    }
}

/// Plugin for host networking only. Always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNetworkPlugin;

impl NetworkPlugin for NoopNetworkPlugin {
    fn name(&self) -> &str {
        "kubernetes.io/no-op"
    }

    fn status(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Copies the plugin's readiness into the runtime state.
pub fn sync_network_status(state: &RuntimeState, plugin: &dyn NetworkPlugin) {
    state.set_network_error(plugin.status().err());
}

/// Propagates a new pod CIDR to the plugin and the runtime.
///
/// The CIDR is recorded only after the runtime accepts it, so a failed
/// update is retried on the next status pass.
pub async fn update_pod_cidr(
    state: &RuntimeState,
    plugin: &dyn NetworkPlugin,
    runtime: &dyn ContainerRuntime,
    cidr: &str,
) {
    let current = state.pod_cidr();
    if current == cidr {
        return;
    }

    plugin.on_pod_cidr_change(cidr);

    if let Err(e) = runtime.update_pod_cidr(cidr).await {
        tracing::error!(error = %e, cidr, "failed to update pod CIDR");
        return;
    }

    tracing::info!(from = %current, to = %cidr, "setting pod CIDR");
    state.set_pod_cidr(cidr);
}

/// How container traffic addressed to its own service is looped back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HairpinMode {
    #[default]
    PromiscuousBridge,
    HairpinVeth,
    None,
}

impl fmt::Display for HairpinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HairpinMode::PromiscuousBridge => "promiscuous-bridge",
            HairpinMode::HairpinVeth => "hairpin-veth",
            HairpinMode::None => "none",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for HairpinMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promiscuous-bridge" => Ok(HairpinMode::PromiscuousBridge),
            "hairpin-veth" => Ok(HairpinMode::HairpinVeth),
            "none" => Ok(HairpinMode::None),
            other => Err(ConfigError::HairpinMode(other.to_string())),
        }
    }
}

/// Returns the hairpin mode that actually applies for the given runtime
/// and network plugin.
pub fn effective_hairpin_mode(mode: HairpinMode, runtime: &str, plugin: &str) -> HairpinMode {
    match mode {
        HairpinMode::None => HairpinMode::None,
        _ if runtime != DOCKER_RUNTIME => {
            tracing::warn!(%mode, runtime, "hairpin mode requires the docker runtime, ignoring");
            HairpinMode::None
        }
        HairpinMode::PromiscuousBridge if plugin != KUBENET_PLUGIN => {
            tracing::warn!(%mode, plugin, "kubenet is not enabled, falling back to hairpin-veth");
            HairpinMode::HairpinVeth
        }
        other => other,
    }
}

/// Returns the iptables fwmark `value/mask` for a single bit, eight hex
/// digits after the `0x` prefix.
pub fn iptables_mark(bit: u32) -> String {
    let value = 1u64 << bit;
    format!("{:#010x}/{:#010x}", value, value)
}

/// Checks that the masquerade and drop bits are usable fwmark bits.
pub fn validate_iptables_bits(masquerade_bit: i32, drop_bit: i32) -> Result<(), ConfigError> {
    for (field, value) in [
        ("iptablesMasqueradeBit", masquerade_bit),
        ("iptablesDropBit", drop_bit),
    ] {
        if !(0..=31).contains(&value) {
            return Err(ConfigError::IptablesBitOutOfRange { field, value });
        }
    }
    if masquerade_bit == drop_bit {
        return Err(ConfigError::IptablesBitsEqual(masquerade_bit));
    }
    Ok(())
}
