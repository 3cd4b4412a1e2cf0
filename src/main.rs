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

//! kubelet - the Kubernetes node agent, node status reporting core.

#![warn(clippy::all)]

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kubelet_rust::cadvisor::SysinfoCadvisor;
use kubelet_rust::config::KubeletConfig;
use kubelet_rust::container_runtime::SocketRuntime;
use kubelet_rust::context::KubeletContext;
use kubelet_rust::events::KubeEventRecorder;
use kubelet_rust::kubelet::{node_hostname, Kubelet};
use kubelet_rust::network::{CniNetworkPlugin, HairpinMode, NetworkPlugin, NoopNetworkPlugin};
use kubelet_rust::node_client::KubeNodeClient;
use kubelet_rust::KUBELET_COMPONENT_NAME;

/// Kubernetes node agent
///
/// The kubelet registers its node with the API server and keeps the node
/// status current: capacity, addresses, images and the health conditions
/// derived from the container runtime, the network plugin, disk space and
/// memory pressure.
#[derive(Parser, Debug)]
#[command(name = "kubelet")]
#[command(author = "Kubernetes Authors")]
#[command(version)]
#[command(about = "Kubernetes node agent", long_about = None)]
struct Args {
    /// Path to the kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Master URL to build a client from
    #[arg(long)]
    master: Option<String>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    log_json: bool,

    /// Use this name instead of the machine hostname
    #[arg(long)]
    hostname_override: Option<String>,

    /// IP address reported as the node's InternalIP
    #[arg(long)]
    node_ip: Option<IpAddr>,

    /// Register the node with the API server
    #[arg(long)]
    register_node: Option<bool>,

    /// Labels added at registration, as "key=value,key2=value2"
    #[arg(long, value_parser = parse_labels)]
    node_labels: Option<BTreeMap<String, String>>,

    /// Number of pods this kubelet can run
    #[arg(long)]
    max_pods: Option<u32>,

    /// Directory for kubelet state
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Container runtime name reported in node status
    #[arg(long)]
    container_runtime: Option<String>,

    /// Container runtime socket
    #[arg(long)]
    container_runtime_endpoint: Option<PathBuf>,

    /// Network plugin ("cni" or empty for none)
    #[arg(long)]
    network_plugin: Option<String>,

    /// Directory searched for CNI network configs
    #[arg(long)]
    cni_conf_dir: Option<PathBuf>,

    /// How traffic from a pod back to its own service is handled
    #[arg(long)]
    hairpin_mode: Option<HairpinMode>,

    /// Comma-separated cluster DNS server IPs
    #[arg(long, value_delimiter = ',')]
    cluster_dns: Vec<IpAddr>,

    /// Cluster domain appended to pod search paths
    #[arg(long)]
    cluster_domain: Option<String>,

    /// Resolver file used as the basis for pod DNS ("" disables it)
    #[arg(long)]
    resolv_conf: Option<String>,

    /// How often node status is posted
    #[arg(long, value_parser = parse_duration)]
    node_status_update_frequency: Option<Duration>,

    /// Address of the health server
    #[arg(long)]
    healthz_bind_address: Option<SocketAddr>,
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(s).map_err(|e| anyhow::anyhow!("invalid duration: {}", e))
}

fn parse_labels(s: &str) -> anyhow::Result<BTreeMap<String, String>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid label {:?}, expected key=value", part))?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.log_json);

    info!(version = kubelet_rust::VERSION, "starting kubelet");

    let config = load_config(args).await?;
    info!(
        register_node = config.node_status.register_node,
        runtime = %config.runtime.container_runtime,
        network_plugin = %config.network.network_plugin,
        "configuration loaded"
    );

    let client = create_client(&config).await?;
    let hostname = node_hostname(&config);

    let cadvisor = Arc::new(SysinfoCadvisor::new(
        config.generic.root_dir.clone(),
        config.runtime.images_dir.clone(),
    ));
    let runtime = Arc::new(SocketRuntime::new(
        config.runtime.container_runtime.clone(),
        config.runtime.runtime_version.clone(),
        config.runtime.runtime_endpoint.clone(),
    ));
    let network_plugin: Arc<dyn NetworkPlugin> = match config.network.network_plugin.as_str() {
        "cni" => Arc::new(CniNetworkPlugin::new(config.network.cni_conf_dir.clone())),
        _ => Arc::new(NoopNetworkPlugin),
    };
    let recorder = Arc::new(KubeEventRecorder::new(
        client.clone(),
        KUBELET_COMPONENT_NAME,
        hostname,
    ));

    let ctx = KubeletContext::new(
        Arc::new(KubeNodeClient::new(client)),
        cadvisor,
        runtime,
        network_plugin,
        recorder,
        config.eviction,
    );
    let kubelet = Arc::new(Kubelet::new(config, ctx).context("invalid kubelet configuration")?);

    let shutdown_token = kubelet.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        shutdown_token.cancel();
    });

    if let Err(e) = kubelet.run().await {
        error!("kubelet failed: {:#}", e);
        return Err(e.into());
    }

    info!("kubelet exited successfully");
    Ok(())
}

/// Initializes logging based on the provided level and format.
fn init_logging(level: &str, json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.parse().unwrap_or_else(|_| LevelFilter::INFO.into()))
        .from_env_lossy();

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

/// Loads the configuration from file, then applies command-line overrides.
async fn load_config(mut args: Args) -> anyhow::Result<KubeletConfig> {
    let mut config = if let Some(config_path) = args.config.take() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("failed to read config file: {:?}", config_path))?;

        serde_yaml::from_str::<KubeletConfig>(&content)
            .with_context(|| format!("failed to parse config file: {:?}", config_path))?
    } else {
        KubeletConfig::default()
    };

    if let Some(kubeconfig) = args.kubeconfig {
        config.generic.kubeconfig = Some(kubeconfig);
    }
    if let Some(master) = args.master {
        config.generic.master = Some(master);
    }
    if let Some(name) = args.hostname_override {
        config.generic.hostname_override = Some(name);
    }
    if let Some(dir) = args.root_dir {
        config.generic.root_dir = dir;
    }
    if let Some(address) = args.healthz_bind_address {
        config.generic.healthz_bind_address = address;
    }

    if let Some(ip) = args.node_ip {
        config.node_status.node_ip = Some(ip);
    }
    if let Some(register) = args.register_node {
        config.node_status.register_node = register;
    }
    if let Some(labels) = args.node_labels {
        config.node_status.node_labels.extend(labels);
    }
    if let Some(max_pods) = args.max_pods {
        config.node_status.max_pods = max_pods;
    }
    if let Some(frequency) = args.node_status_update_frequency {
        config.node_status.update_frequency = frequency;
    }

    if let Some(runtime) = args.container_runtime {
        config.runtime.container_runtime = runtime;
    }
    if let Some(endpoint) = args.container_runtime_endpoint {
        config.runtime.runtime_endpoint = endpoint;
    }

    if let Some(plugin) = args.network_plugin {
        config.network.network_plugin = plugin;
    }
    if let Some(dir) = args.cni_conf_dir {
        config.network.cni_conf_dir = dir;
    }
    if let Some(mode) = args.hairpin_mode {
        config.network.hairpin_mode = mode;
    }

    if !args.cluster_dns.is_empty() {
        config.dns.cluster_dns = args.cluster_dns;
    }
    if let Some(domain) = args.cluster_domain {
        config.dns.cluster_domain = domain;
    }
    if let Some(resolv_conf) = args.resolv_conf {
        config.dns.resolv_conf = resolv_conf;
    }

    Ok(config)
}

/// Creates a Kubernetes client from the configuration.
async fn create_client(config: &KubeletConfig) -> anyhow::Result<kube::Client> {
    use kube::config::{KubeConfigOptions, Kubeconfig};
    use kube::Config;

    let kube_config = if let Some(kubeconfig_path) = &config.generic.kubeconfig {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path)
            .with_context(|| format!("failed to read kubeconfig from: {:?}", kubeconfig_path))?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .with_context(|| format!("failed to load kubeconfig from: {:?}", kubeconfig_path))?
    } else if let Some(master_url) = &config.generic.master {
        let uri = master_url
            .parse::<http::Uri>()
            .with_context(|| format!("invalid master URL: {}", master_url))?;
        Config::new(uri)
    } else {
        Config::infer().await.context("failed to load kubeconfig")?
    };

    Ok(kube::Client::try_from(kube_config)?)
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down");
        }
    }
}
