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

//! Kubelet - wires the collaborators together and runs the periodic loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::KubeletConfig;
use crate::context::KubeletContext;
use crate::dns::DnsConfigurer;
use crate::error::{KubeletError, Result};
use crate::events::node_reference;
use crate::health::{FunctionHealthChecker, HealthServer, RuntimeStateChecker};
use crate::network::{self, effective_hairpin_mode, HairpinMode};
use crate::node_status::{NodeStatusManager, NodeStatusSettings};
use crate::runtime_state::RuntimeState;

/// Returns the hostname override, or the lowercased machine hostname.
pub fn node_hostname(config: &KubeletConfig) -> String {
    match &config.generic.hostname_override {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => gethostname::gethostname()
            .to_string_lossy()
            .trim()
            .to_lowercase(),
    }
}

/// Runs `f` every `period` until `cancel` fires. The first run is immediate.
async fn every<F, Fut>(period: Duration, cancel: &CancellationToken, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => f().await,
        }
    }
}

/// The node agent.
pub struct Kubelet {
    config: Arc<KubeletConfig>,
    ctx: KubeletContext,
    node_name: String,
    runtime_state: Arc<RuntimeState>,
    node_status: Arc<NodeStatusManager>,
    dns: DnsConfigurer,
    hairpin_mode: HairpinMode,
    shutdown_token: CancellationToken,
}

impl Kubelet {
    /// Validates `config` and builds the kubelet.
    pub fn new(config: KubeletConfig, ctx: KubeletContext) -> Result<Self> {
        config.validate()?;

        let node_name = node_hostname(&config);
        let runtime_state = Arc::new(RuntimeState::new(
            config.runtime.sync_threshold,
            ctx.clock.clone(),
        ));

        let settings = NodeStatusSettings::from_config(&config, node_name.clone(), node_name.clone());
        let node_status = Arc::new(NodeStatusManager::new(settings, &ctx, runtime_state.clone()));

        let dns = DnsConfigurer::new(
            config.dns.cluster_dns.clone(),
            config.dns.cluster_domain.clone(),
            config.dns.resolver_path(),
            ctx.recorder.clone(),
            node_reference(&node_name),
        );

        let hairpin_mode = effective_hairpin_mode(
            config.network.hairpin_mode,
            &config.runtime.container_runtime,
            &config.network.network_plugin,
        );
        tracing::info!(
            node = %node_name,
            hairpin_mode = %hairpin_mode,
            masquerade_mark = %network::iptables_mark(config.network.iptables_masquerade_bit.unsigned_abs()),
            drop_mark = %network::iptables_mark(config.network.iptables_drop_bit.unsigned_abs()),
            "kubelet configured"
        );

        Ok(Self {
            config: Arc::new(config),
            ctx,
            node_name,
            runtime_state,
            node_status,
            dns,
            hairpin_mode,
            shutdown_token: CancellationToken::new(),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn node_status(&self) -> &Arc<NodeStatusManager> {
        &self.node_status
    }

    pub fn dns(&self) -> &DnsConfigurer {
        &self.dns
    }

    pub fn hairpin_mode(&self) -> HairpinMode {
        self.hairpin_mode
    }

    /// Returns the token that stops [`Kubelet::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Probes the container runtime and records a successful sync.
    pub async fn update_runtime_up(&self) {
        if let Err(e) = self.ctx.runtime.status().await {
            tracing::error!(error = %e, "container runtime sanity check failed");
            return;
        }
        self.runtime_state.set_runtime_sync(self.ctx.clock.now());
    }

    /// Copies the network plugin status into the runtime state.
    pub fn sync_network_status(&self) {
        network::sync_network_status(&self.runtime_state, self.ctx.network_plugin.as_ref());
    }

    /// Registers the node if needed, then posts its status once.
    pub async fn sync_node_status(&self, cancel: &CancellationToken) {
        if self.config.node_status.register_node
            && !self.node_status.register_with_api_server(cancel).await
        {
            return;
        }
        if let Err(e) = self.node_status.update_node_status().await {
            tracing::error!(node = %self.node_name, error = %e, "unable to update node status");
        }
    }

    /// Creates the kubelet's data directories.
    async fn initialize_modules(&self) {
        let result = tokio::fs::create_dir_all(&self.config.generic.root_dir).await;
        match result {
            Ok(()) => self.runtime_state.set_init_error(None),
            Err(e) => {
                tracing::error!(
                    root_dir = %self.config.generic.root_dir.display(),
                    error = %e,
                    "failed to initialize internal modules"
                );
                self.runtime_state.set_init_error(Some(
                    anyhow::Error::new(e).context("failed to create root directory"),
                ));
            }
        }
    }

    async fn health_server(&self) -> HealthServer {
        let server = HealthServer::new(self.config.generic.healthz_bind_address);
        server
            .registry()
            .register(Arc::new(RuntimeStateChecker::new(self.runtime_state.clone())))
            .await;

        if self.config.node_status.register_node {
            let node_status = self.node_status.clone();
            server
                .registry()
                .register(Arc::new(FunctionHealthChecker::new("registration", move || {
                    let registered = node_status.is_registered();
                    async move {
                        if registered {
                            Ok(())
                        } else {
                            Err("node not registered".to_string())
                        }
                    }
                })))
                .await;
        }
        server
    }

    /// Runs all loops until the shutdown token fires or a loop fails.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(node = %self.node_name, "starting kubelet");

        self.initialize_modules().await;
        self.dns.check_limits_for_resolv_conf();

        let cancel = self.shutdown_token.clone();
        let mut join_set: JoinSet<(&'static str, anyhow::Result<()>)> = JoinSet::new();

        let kl = self.clone();
        let token = cancel.clone();
        join_set.spawn(async move {
            every(kl.config.runtime.check_period, &token, || kl.update_runtime_up()).await;
            ("runtime-status", Ok(()))
        });

        let kl = self.clone();
        let token = cancel.clone();
        join_set.spawn(async move {
            every(kl.config.network.status_period, &token, || async {
                kl.sync_network_status()
            })
            .await;
            ("network-status", Ok(()))
        });

        let kl = self.clone();
        let token = cancel.clone();
        join_set.spawn(async move {
            every(kl.config.node_status.update_frequency, &token, || {
                kl.sync_node_status(&token)
            })
            .await;
            ("node-status", Ok(()))
        });

        let server = self.health_server().await;
        let token = cancel.clone();
        join_set.spawn(async move { ("healthz", server.run(token).await) });

        let failure = tokio::select! {
            result = join_set.join_next() => match result {
                Some(Ok((name, Err(e)))) => {
                    tracing::error!(task = name, error = %e, "kubelet task failed");
                    Some(e.context(format!("{} failed", name)))
                }
                Some(Ok((name, Ok(())))) => {
                    tracing::warn!(task = name, "kubelet task exited");
                    None
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "kubelet task panicked");
                    Some(anyhow::Error::new(e))
                }
                None => None,
            },
            _ = cancel.cancelled() => {
                tracing::info!("shutdown signal received, waiting for loops to stop");
                None
            }
        };
        cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.config.generic.shutdown_timeout;
        while !join_set.is_empty() {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((name, Ok(()))))) => tracing::debug!(task = name, "kubelet task stopped"),
                Ok(Some(Ok((name, Err(e))))) => {
                    tracing::warn!(task = name, error = %e, "kubelet task stopped with error")
                }
                Ok(Some(Err(e))) => tracing::warn!(error = %e, "kubelet task failed"),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        remaining = join_set.len(),
                        "shutdown timeout reached, aborting remaining tasks"
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        match failure {
            Some(e) => Err(KubeletError::Other(e)),
            None => {
                tracing::info!("kubelet stopped");
                Ok(())
            }
        }
    }
}
