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

//! Container runtime interface used by node status reporting.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

/// An image present on the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    /// Size in bytes.
    pub size: u64,
}

/// The container runtime as seen by the kubelet.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Returns the runtime type, e.g. `containerd`.
    fn runtime_type(&self) -> &str;

    /// Returns the runtime version.
    async fn version(&self) -> anyhow::Result<String>;

    /// Returns an error if the runtime is not responding.
    async fn status(&self) -> anyhow::Result<()>;

    /// Lists images stored on the node.
    async fn list_images(&self) -> anyhow::Result<Vec<Image>>;

    /// Pushes a new pod CIDR down to the runtime.
    async fn update_pod_cidr(&self, cidr: &str) -> anyhow::Result<()>;
}

/// Runtime reached over a local unix socket.
///
/// The runtime counts as up when its socket accepts a connection. It does
/// not speak the runtime API, so it reports no images and ignores pod CIDR
/// updates.
#[derive(Debug, Clone)]
pub struct SocketRuntime {
    runtime_type: String,
    version: String,
    endpoint: PathBuf,
    connect_timeout: Duration,
}

impl SocketRuntime {
    /// Creates a runtime probe for the socket at `endpoint`.
    pub fn new(
        runtime_type: impl Into<String>,
        version: impl Into<String>,
        endpoint: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime_type: runtime_type.into(),
            version: version.into(),
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl ContainerRuntime for SocketRuntime {
    fn runtime_type(&self) -> &str {
        &self.runtime_type
    }

    async fn version(&self) -> anyhow::Result<String> {
        Ok(self.version.clone())
    }

    #[cfg(unix)]
    async fn status(&self) -> anyhow::Result<()> {
        tokio::time::timeout(
            self.connect_timeout,
            tokio::net::UnixStream::connect(&self.endpoint),
        )
        .await
        .with_context(|| format!("timed out connecting to {}", self.endpoint.display()))?
        .with_context(|| format!("failed to connect to {}", self.endpoint.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn status(&self) -> anyhow::Result<()> {
        anyhow::bail!("unix socket runtimes are not supported on this platform")
    }

    async fn list_images(&self) -> anyhow::Result<Vec<Image>> {
        Ok(Vec::new())
    }

    async fn update_pod_cidr(&self, cidr: &str) -> anyhow::Result<()> {
        tracing::debug!(cidr, runtime = %self.runtime_type, "runtime does not manage pod CIDR");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_runtime_down() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = SocketRuntime::new("containerd", "1.7.0", dir.path().join("missing.sock"));
        assert!(runtime.status().await.is_err());
        assert_eq!(runtime.version().await.unwrap(), "1.7.0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_runtime_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.sock");
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let runtime = SocketRuntime::new("containerd", "1.7.0", &path);
        assert!(runtime.status().await.is_ok());
        assert!(runtime.list_images().await.unwrap().is_empty());
    }
}
