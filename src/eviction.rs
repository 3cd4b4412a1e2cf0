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

//! Memory and disk pressure signals.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cadvisor::Cadvisor;

/// Reports whether the node is under resource pressure.
pub trait PressureSignals: Send + Sync + 'static {
    /// Returns true if available memory is below the eviction threshold.
    fn under_memory_pressure(&self) -> bool;

    /// Returns true if the node filesystem is below the eviction threshold.
    fn under_disk_pressure(&self) -> bool;
}

/// Hard eviction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionThresholds {
    /// Minimum available memory, in bytes.
    #[serde(default = "default_memory_available")]
    pub memory_available: u64,

    /// Minimum available space on the root filesystem, in percent.
    #[serde(default = "default_nodefs_available_percent")]
    pub nodefs_available_percent: f64,
}

impl Default for EvictionThresholds {
    fn default() -> Self {
        Self {
            memory_available: default_memory_available(),
            nodefs_available_percent: default_nodefs_available_percent(),
        }
    }
}

fn default_memory_available() -> u64 {
    100 * 1024 * 1024
}

fn default_nodefs_available_percent() -> f64 {
    10.0
}

/// [`PressureSignals`] derived from cadvisor measurements.
pub struct ThresholdSignals {
    cadvisor: Arc<dyn Cadvisor>,
    thresholds: EvictionThresholds,
}

impl ThresholdSignals {
    /// Creates signals comparing cadvisor data against `thresholds`.
    pub fn new(cadvisor: Arc<dyn Cadvisor>, thresholds: EvictionThresholds) -> Self {
        Self {
            cadvisor,
            thresholds,
        }
    }
}

impl PressureSignals for ThresholdSignals {
    fn under_memory_pressure(&self) -> bool {
        match self.cadvisor.memory_available() {
            Ok(available) => available < self.thresholds.memory_available,
            Err(e) => {
                tracing::warn!(error = %e, "unable to observe available memory");
                false
            }
        }
    }

    fn under_disk_pressure(&self) -> bool {
        match self.cadvisor.root_fs_info() {
            Ok(fs) if fs.capacity > 0 => {
                let percent = fs.available as f64 * 100.0 / fs.capacity as f64;
                percent < self.thresholds.nodefs_available_percent
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "unable to observe root filesystem");
                false
            }
        }
    }
}
