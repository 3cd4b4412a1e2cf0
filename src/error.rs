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

//! Error types shared across the kubelet.

use thiserror::Error;

/// Errors returned by the API server, classified by the status reason.
///
/// Registration pattern-matches on these, so they are kept as plain values
/// that can be cloned into test fixtures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("api server returned {code} ({reason}): {message}")]
    Status {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(String),
}

impl ApiError {
    /// Returns true if the error reports an already existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApiError::AlreadyExists(_))
    }

    /// Returns true if the error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match (resp.reason.as_str(), resp.code) {
                ("NotFound", _) | (_, 404) => ApiError::NotFound(resp.message),
                ("AlreadyExists", _) => ApiError::AlreadyExists(resp.message),
                ("Conflict", _) | (_, 409) => ApiError::Conflict(resp.message),
                _ => ApiError::Status {
                    code: resp.code,
                    reason: resp.reason,
                    message: resp.message,
                },
            },
            other => ApiError::Transport(other.to_string()),
        }
    }
}

/// Errors that can occur while reporting node status.
#[derive(Error, Debug)]
pub enum KubeletError {
    #[error("error getting node {node}: {source}")]
    GetNode {
        node: String,
        #[source]
        source: ApiError,
    },

    #[error("error updating status of node {node}: {source}")]
    UpdateNodeStatus {
        node: String,
        #[source]
        source: ApiError,
    },

    #[error("update node status exceeds retry count ({0})")]
    UpdateRetryExceeded(usize),

    #[error("can't get ip address of node {0}")]
    NodeAddress(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for kubelet operations.
pub type Result<T> = std::result::Result<T, KubeletError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("invalid {field} {value} not in [0, 31]")]
    IptablesBitOutOfRange { field: &'static str, value: i32 },

    #[error("iptables-masquerade-bit {0} and iptables-drop-bit {0} must be different")]
    IptablesBitsEqual(i32),

    #[error("invalid hairpin mode: {0}")]
    HairpinMode(String),
}
