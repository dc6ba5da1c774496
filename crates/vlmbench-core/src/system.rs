//! System-level types for hardware monitoring

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshot of the primary GPU as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPU: {} | Total VRAM: {:.2} MB | Used VRAM: {:.2} MB | Free VRAM: {:.2} MB",
            self.name,
            self.total_bytes as f64 / BYTES_PER_MB,
            self.used_bytes as f64 / BYTES_PER_MB,
            self.free_bytes as f64 / BYTES_PER_MB,
        )
    }
}

/// GPU queries used by the benchmark runner.
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// Human-readable device descriptor. Failures propagate.
    fn device_info(&self) -> Result<String>;

    /// Currently used GPU memory in MB, 0 when it cannot be read.
    async fn memory_used_mb(&self) -> u64;
}
