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

//! Disk space policy.
//!
//! Decides whether the node is out of disk by comparing the free space on
//! the root and images filesystems against configured minimums.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cadvisor::{Cadvisor, FsInfo};
use crate::clock::Clock;

const MB: u64 = 1024 * 1024;

/// Minimum free space required on each filesystem, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpacePolicy {
    /// Free space required on the filesystem holding images.
    #[serde(default = "default_free_disk_mb")]
    pub docker_free_disk_mb: u64,

    /// Free space required on the filesystem holding the kubelet root dir.
    #[serde(default = "default_free_disk_mb")]
    pub root_free_disk_mb: u64,
}

impl Default for DiskSpacePolicy {
    fn default() -> Self {
        Self {
            docker_free_disk_mb: default_free_disk_mb(),
            root_free_disk_mb: default_free_disk_mb(),
        }
    }
}

fn default_free_disk_mb() -> u64 {
    256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Filesystem {
    Runtime,
    Root,
}

impl Filesystem {
    fn as_str(&self) -> &'static str {
        match self {
            Filesystem::Runtime => "runtime",
            Filesystem::Root => "root",
        }
    }
}

/// Evaluates [`DiskSpacePolicy`] against cadvisor measurements.
pub struct DiskSpaceManager {
    cadvisor: Arc<dyn Cadvisor>,
    policy: DiskSpacePolicy,
    cache_period: Duration,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<Filesystem, (FsInfo, DateTime<Utc>)>>,
}

impl DiskSpaceManager {
    /// Creates a manager. Filesystem info is reused for `cache_period`.
    pub fn new(
        cadvisor: Arc<dyn Cadvisor>,
        policy: DiskSpacePolicy,
        cache_period: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cadvisor,
            policy,
            cache_period,
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if the images filesystem has enough free space.
    pub fn is_runtime_disk_space_available(&self) -> anyhow::Result<bool> {
        self.is_space_available(Filesystem::Runtime, self.policy.docker_free_disk_mb)
    }

    /// Returns true if the root filesystem has enough free space.
    pub fn is_root_disk_space_available(&self) -> anyhow::Result<bool> {
        self.is_space_available(Filesystem::Root, self.policy.root_free_disk_mb)
    }

    /// Returns true if either filesystem is below its minimum.
    ///
    /// A filesystem whose usage cannot be determined is not counted.
    pub fn is_out_of_disk(&self) -> bool {
        let checks = [
            (Filesystem::Runtime, self.is_runtime_disk_space_available()),
            (Filesystem::Root, self.is_root_disk_space_available()),
        ];
        let mut out_of_disk = false;
        for (fs, check) in checks {
            match check {
                Ok(true) => {}
                Ok(false) => out_of_disk = true,
                Err(e) => {
                    tracing::error!(filesystem = fs.as_str(), error = %e, "unable to check disk space");
                }
            }
        }
        out_of_disk
    }

    fn fs_info(&self, fs: Filesystem) -> anyhow::Result<FsInfo> {
        let now = self.clock.now();
        if let Some((info, fetched)) = self.lock_cache().get(&fs) {
            let age = (now - *fetched).to_std().unwrap_or(Duration::ZERO);
            if age < self.cache_period {
                return Ok(*info);
            }
        }

        // Fetched without the cache lock held.
        let info = match fs {
            Filesystem::Runtime => self.cadvisor.images_fs_info()?,
            Filesystem::Root => self.cadvisor.root_fs_info()?,
        };
        self.lock_cache().insert(fs, (info, now));
        Ok(info)
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<Filesystem, (FsInfo, DateTime<Utc>)>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_space_available(&self, fs: Filesystem, threshold_mb: u64) -> anyhow::Result<bool> {
        let info = self
            .fs_info(fs)
            .map_err(|e| anyhow::anyhow!("failed to get fs info for {:?}: {}", fs.as_str(), e))?;

        if info.capacity == 0 {
            anyhow::bail!(
                "could not determine capacity for {:?} fs. Info: {:?}",
                fs.as_str(),
                info
            );
        }

        if info.available < threshold_mb.saturating_mul(MB) {
            tracing::info!(
                filesystem = fs.as_str(),
                available_mb = info.available / MB,
                threshold_mb,
                "running out of space on disk"
            );
            return Ok(false);
        }
        Ok(true)
    }
}
