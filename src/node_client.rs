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

//! API server access to Node objects.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};

use crate::error::ApiError;

/// The subset of the Node API the kubelet needs.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// Reads the node named `name`.
    async fn get(&self, name: &str) -> Result<Node, ApiError>;

    /// Creates `node`.
    async fn create(&self, node: &Node) -> Result<Node, ApiError>;

    /// Replaces the status subresource of `node`.
    async fn update_status(&self, node: &Node) -> Result<Node, ApiError>;

    /// Deletes the node named `name`.
    async fn delete(&self, name: &str) -> Result<(), ApiError>;
}

/// [`NodeClient`] backed by a kube client.
#[derive(Clone)]
pub struct KubeNodeClient {
    api: Api<Node>,
}

impl KubeNodeClient {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn node_name(node: &Node) -> Result<&str, ApiError> {
    node.metadata
        .name
        .as_deref()
        .ok_or_else(|| ApiError::Status {
            code: 422,
            reason: "Invalid".to_string(),
            message: "node has no name".to_string(),
        })
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn get(&self, name: &str) -> Result<Node, ApiError> {
        Ok(self.api.get(name).await?)
    }

    async fn create(&self, node: &Node) -> Result<Node, ApiError> {
        Ok(self.api.create(&PostParams::default(), node).await?)
    }

    async fn update_status(&self, node: &Node) -> Result<Node, ApiError> {
        let name = node_name(node)?;
        let data = serde_json::to_vec(node).map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(self
            .api
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
