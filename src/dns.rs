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

//! Pod DNS configuration.
//!
//! Resolves the nameservers, search path and resolver options a pod gets,
//! based on its DNS policy, the cluster DNS settings and the host's
//! resolv.conf.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ObjectReference, Pod};

use crate::error::Result;
use crate::events::{EventRecorder, EventType};

/// Maximum number of domains on a resolv.conf search line.
pub const MAX_DNS_SEARCH_DOMAINS: usize = 6;

/// Maximum length of a resolv.conf search line.
pub const MAX_DNS_SEARCH_LINE_LEN: usize = 255;

/// Number of search domains the cluster prepends for ClusterFirst pods.
const CLUSTER_SEARCH_DOMAINS: usize = 3;

/// Parsed resolv.conf contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvConf {
    pub nameservers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

/// Parses resolv.conf text.
///
/// `nameserver` lines accumulate. The last `search` and `options` lines win.
pub fn parse_resolv_conf(text: &str) -> ResolvConf {
    let mut conf = ResolvConf::default();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let Some(keyword) = fields.next() else {
            continue;
        };
        match keyword {
            "nameserver" => {
                if let Some(server) = fields.next() {
                    conf.nameservers.push(server.to_string());
                }
            }
            "search" => conf.searches = fields.map(String::from).collect(),
            "options" => conf.options = fields.map(String::from).collect(),
            _ => {}
        }
    }
    conf
}

/// A pod's DNS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsPolicy {
    ClusterFirst,
    ClusterFirstWithHostNet,
    Default,
}

impl DnsPolicy {
    /// Returns the policy of `pod`. Unset or unknown values mean ClusterFirst.
    pub fn of(pod: &Pod) -> Self {
        let policy = pod.spec.as_ref().and_then(|s| s.dns_policy.as_deref());
        match policy {
            Some("ClusterFirstWithHostNet") => DnsPolicy::ClusterFirstWithHostNet,
            Some("Default") => DnsPolicy::Default,
            _ => DnsPolicy::ClusterFirst,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DnsPolicy::ClusterFirst => "ClusterFirst",
            DnsPolicy::ClusterFirstWithHostNet => "ClusterFirstWithHostNet",
            DnsPolicy::Default => "Default",
        }
    }
}

/// DNS settings handed to a pod's sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodDnsConfig {
    pub nameservers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
    /// Whether the cluster DNS policy was applied.
    pub cluster_first: bool,
}

/// Removes repeated domains, keeping the first occurrence.
pub fn omit_duplicates(search: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    search
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

/// Trims a search list to the resolver limits.
///
/// Returns the trimmed list and whether anything was dropped.
pub fn fits_limits(mut search: Vec<String>) -> (Vec<String>, bool) {
    let mut exceeded = false;

    if search.len() > MAX_DNS_SEARCH_DOMAINS {
        search.truncate(MAX_DNS_SEARCH_DOMAINS);
        exceeded = true;
    }

    let line_len = search.join(" ").len();
    if line_len > MAX_DNS_SEARCH_LINE_LEN {
        let mut cut_len = 0;
        let mut keep = search.len();
        while keep > 0 {
            keep -= 1;
            cut_len += search[keep].len() + 1;
            if line_len.saturating_sub(cut_len) <= MAX_DNS_SEARCH_LINE_LEN {
                break;
            }
        }
        search.truncate(keep);
        exceeded = true;
    }

    (search, exceeded)
}

fn pod_reference(pod: &Pod) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Pod".to_string()),
        name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        uid: pod.metadata.uid.clone(),
        ..Default::default()
    }
}

fn is_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false)
}

/// Computes pod DNS settings.
pub struct DnsConfigurer {
    cluster_dns: Vec<IpAddr>,
    cluster_domain: String,
    resolver_config: Option<PathBuf>,
    recorder: Arc<dyn EventRecorder>,
    node_ref: ObjectReference,
}

impl DnsConfigurer {
    pub fn new(
        cluster_dns: Vec<IpAddr>,
        cluster_domain: impl Into<String>,
        resolver_config: Option<PathBuf>,
        recorder: Arc<dyn EventRecorder>,
        node_ref: ObjectReference,
    ) -> Self {
        Self {
            cluster_dns,
            cluster_domain: cluster_domain.into(),
            resolver_config,
            recorder,
            node_ref,
        }
    }

    fn host_resolv_conf(&self) -> Result<Option<ResolvConf>> {
        match &self.resolver_config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(Some(parse_resolv_conf(&text)))
            }
            None => Ok(None),
        }
    }

    /// Returns the DNS settings for `pod`.
    pub fn cluster_dns(&self, pod: &Pod) -> Result<PodDnsConfig> {
        let host = self.host_resolv_conf()?;
        let policy = DnsPolicy::of(pod);

        let mut cluster_first = match policy {
            DnsPolicy::ClusterFirst => !is_host_network(pod),
            DnsPolicy::ClusterFirstWithHostNet => true,
            DnsPolicy::Default => false,
        };

        if cluster_first && self.cluster_dns.is_empty() {
            let message = format!(
                "kubelet does not have ClusterDNS IP configured and cannot create Pod using {:?} policy. Falling back to DNSDefault policy.",
                policy.as_str()
            );
            self.recorder.event(
                &pod_reference(pod),
                EventType::Warning,
                "MissingClusterDNS",
                &message,
            );
            let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
            let node_message = format!(
                "kubelet does not have ClusterDNS IP configured and cannot create Pod using {:?} policy. pod: {:?}. Falling back to DNSDefault policy.",
                policy.as_str(),
                pod_name
            );
            self.recorder.event(
                &self.node_ref,
                EventType::Warning,
                "MissingClusterDNS",
                &node_message,
            );
            cluster_first = false;
        }

        let has_resolver = host.is_some();
        let ResolvConf {
            nameservers: host_dns,
            searches: host_search,
            options: host_options,
        } = host.unwrap_or_default();

        if !cluster_first {
            if !has_resolver {
                return Ok(PodDnsConfig {
                    nameservers: vec!["127.0.0.1".to_string()],
                    searches: vec![".".to_string()],
                    options: host_options,
                    cluster_first,
                });
            }
            return Ok(PodDnsConfig {
                nameservers: host_dns,
                searches: self.search_fits_limits(pod, host_search),
                options: host_options,
                cluster_first,
            });
        }

        Ok(PodDnsConfig {
            nameservers: self.cluster_dns.iter().map(|ip| ip.to_string()).collect(),
            searches: self.form_dns_search(host_search, pod),
            options: host_options,
            cluster_first,
        })
    }

    /// Builds the ClusterFirst search path for `pod`.
    pub fn form_dns_search(&self, host_search: Vec<String>, pod: &Pod) -> Vec<String> {
        if self.cluster_domain.is_empty() {
            return self.search_fits_limits(pod, host_search);
        }

        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let mut search = vec![
            format!("{}.svc.{}", namespace, self.cluster_domain),
            format!("svc.{}", self.cluster_domain),
            self.cluster_domain.clone(),
        ];
        search.extend(host_search);

        self.search_fits_limits(pod, omit_duplicates(search))
    }

    fn search_fits_limits(&self, pod: &Pod, search: Vec<String>) -> Vec<String> {
        let (search, exceeded) = fits_limits(search);
        if exceeded {
            let message = format!(
                "Search Line limits were exceeded, some dns names have been omitted, the applied search line is: {}",
                search.join(" ")
            );
            self.recorder.event(
                &pod_reference(pod),
                EventType::Warning,
                "DNSSearchForming",
                &message,
            );
            tracing::error!(pod = ?pod.metadata.name, "{}", message);
        }
        search
    }

    /// Warns when the host search line leaves no room for cluster domains.
    ///
    /// Returns the warning that was emitted, if any.
    pub fn check_limits_for_resolv_conf(&self) -> Option<String> {
        let path = self.resolver_config.as_ref()?;

        let warn = |message: String| {
            self.recorder.event(
                &self.node_ref,
                EventType::Warning,
                "checkLimitsForResolvConf",
                &message,
            );
            tracing::error!("checkLimitsForResolvConf: {}", message);
            Some(message)
        };

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => return warn(e.to_string()),
        };
        let host_search = parse_resolv_conf(&text).searches;

        let mut domain_limit = MAX_DNS_SEARCH_DOMAINS;
        if !self.cluster_domain.is_empty() {
            domain_limit -= CLUSTER_SEARCH_DOMAINS;
        }

        if host_search.len() > domain_limit {
            return warn(format!(
                "Resolv.conf file '{}' contains search line consisting of more than {} domains!",
                path.display(),
                domain_limit
            ));
        }

        if host_search.join(" ").len() > MAX_DNS_SEARCH_LINE_LEN {
            return warn(format!(
                "Resolv.conf file '{}' contains search line which length is more than allowed {} chars!",
                path.display(),
                MAX_DNS_SEARCH_LINE_LEN
            ));
        }

        None
    }
}
