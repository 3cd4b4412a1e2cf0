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

//! Machine and filesystem information.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

/// Static description of the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineInfo {
    pub machine_id: String,
    pub system_uuid: String,
    pub boot_id: String,
    pub num_cores: u64,
    /// Total memory in bytes.
    pub memory_capacity: u64,
}

/// Kernel and OS versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub kernel_version: String,
    pub container_os_version: String,
}

/// Usage of one filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsInfo {
    pub capacity: u64,
    pub available: u64,
    pub usage: u64,
}

/// Source of machine measurements.
pub trait Cadvisor: Send + Sync + 'static {
    /// Returns machine identity and capacity.
    fn machine_info(&self) -> anyhow::Result<MachineInfo>;

    /// Returns kernel and OS versions.
    fn version_info(&self) -> anyhow::Result<VersionInfo>;

    /// Returns usage of the filesystem holding the kubelet root directory.
    fn root_fs_info(&self) -> anyhow::Result<FsInfo>;

    /// Returns usage of the filesystem holding container images.
    fn images_fs_info(&self) -> anyhow::Result<FsInfo>;

    /// Returns the memory currently available for allocation, in bytes.
    fn memory_available(&self) -> anyhow::Result<u64>;
}

/// [`Cadvisor`] backed by the `sysinfo` crate and a few well-known files.
#[derive(Debug, Clone)]
pub struct SysinfoCadvisor {
    root_dir: PathBuf,
    images_dir: PathBuf,
}

impl SysinfoCadvisor {
    /// Creates a provider reporting on the filesystems holding `root_dir`
    /// and `images_dir`.
    pub fn new(root_dir: impl Into<PathBuf>, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            images_dir: images_dir.into(),
        }
    }

    fn fs_info(&self, path: &Path) -> anyhow::Result<FsInfo> {
        let disks = Disks::new_with_refreshed_list();
        // The filesystem holding a path is the one with the longest mount
        // point that prefixes it.
        let disk = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .with_context(|| format!("no filesystem found for {}", path.display()))?;

        let capacity = disk.total_space();
        let available = disk.available_space();
        Ok(FsInfo {
            capacity,
            available,
            usage: capacity.saturating_sub(available),
        })
    }
}

fn read_trimmed(path: &str) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

impl Cadvisor for SysinfoCadvisor {
    fn machine_info(&self) -> anyhow::Result<MachineInfo> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing())
                .with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        let num_cores = sys.cpus().len() as u64;
        if num_cores == 0 {
            anyhow::bail!("unable to determine the number of cpus");
        }

        Ok(MachineInfo {
            machine_id: read_trimmed("/etc/machine-id"),
            system_uuid: read_trimmed("/sys/class/dmi/id/product_uuid"),
            boot_id: read_trimmed("/proc/sys/kernel/random/boot_id"),
            num_cores,
            memory_capacity: sys.total_memory(),
        })
    }

    fn version_info(&self) -> anyhow::Result<VersionInfo> {
        let kernel_version =
            System::kernel_version().context("unable to determine the kernel version")?;
        Ok(VersionInfo {
            kernel_version,
            container_os_version: System::long_os_version().unwrap_or_default(),
        })
    }

    fn root_fs_info(&self) -> anyhow::Result<FsInfo> {
        self.fs_info(&self.root_dir)
    }

    fn images_fs_info(&self) -> anyhow::Result<FsInfo> {
        self.fs_info(&self.images_dir)
    }

    fn memory_available(&self) -> anyhow::Result<u64> {
        let mut sys = System::new();
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        Ok(sys.available_memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_info_reports_cpus_and_memory() {
        let cadvisor = SysinfoCadvisor::new("/", "/");
        let info = cadvisor.machine_info().unwrap();
        assert!(info.num_cores > 0);
        assert!(info.memory_capacity > 0);
        assert!(cadvisor.memory_available().unwrap() <= info.memory_capacity);
    }
}
