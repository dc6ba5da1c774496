use std::process::ExitStatus;

use async_trait::async_trait;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use vlmbench_core::{DeviceInfo, GpuProbe, Result, VlmBenchError};

const NVIDIA_SMI: &str = "nvidia-smi";

#[derive(Error, Debug)]
pub enum GpuMonitorError {
    #[error("NVML query failed: {0}")]
    Nvml(#[from] NvmlError),
    #[error("Failed to execute nvidia-smi: {0}")]
    ExecutionFailed(#[from] std::io::Error),
    #[error("nvidia-smi exited with {0}")]
    ExitStatus(ExitStatus),
    #[error("Unexpected nvidia-smi output: {0:?}")]
    Parse(String),
}

impl From<GpuMonitorError> for VlmBenchError {
    fn from(e: GpuMonitorError) -> Self {
        VlmBenchError::Device(e.to_string())
    }
}

/// Runs `query` inside an NVML session. The driver is shut down again
/// whether or not the query succeeds.
fn with_driver<T>(
    query: impl FnOnce(&Nvml) -> std::result::Result<T, NvmlError>,
) -> std::result::Result<T, GpuMonitorError> {
    let nvml = Nvml::init()?;
    let result = query(&nvml);
    if let Err(e) = nvml.shutdown() {
        warn!("NVML shutdown failed: {}", e);
    }
    Ok(result?)
}

/// First line of `nvidia-smi --query-gpu=memory.used` output, in MB.
pub fn parse_memory_used(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .parse()
        .ok()
}

/// NVIDIA GPU queried through NVML and `nvidia-smi`.
pub struct NvidiaGpu {
    index: u32,
}

impl NvidiaGpu {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    #[instrument(skip(self), fields(index = self.index))]
    pub fn query_device(&self) -> std::result::Result<DeviceInfo, GpuMonitorError> {
        debug!("Querying device via NVML");
        with_driver(|nvml| {
            let device = nvml.device_by_index(self.index)?;
            let memory = device.memory_info()?;
            Ok(DeviceInfo {
                name: device.name()?,
                total_bytes: memory.total,
                used_bytes: memory.used,
                free_bytes: memory.free,
            })
        })
    }

    #[instrument(skip(self), fields(index = self.index))]
    pub async fn query_memory_used(&self) -> std::result::Result<u64, GpuMonitorError> {
        let output = Command::new(NVIDIA_SMI)
            .arg("--query-gpu=memory.used")
            .arg("--format=csv,noheader,nounits")
            .arg(format!("--id={}", self.index))
            .output()
            .await?;

        if !output.status.success() {
            return Err(GpuMonitorError::ExitStatus(output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_memory_used(&stdout).ok_or_else(|| GpuMonitorError::Parse(stdout.to_string()))
    }
}

impl Default for NvidiaGpu {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl GpuProbe for NvidiaGpu {
    fn device_info(&self) -> Result<String> {
        Ok(self.query_device()?.to_string())
    }

    async fn memory_used_mb(&self) -> u64 {
        match self.query_memory_used().await {
            Ok(mb) => mb,
            Err(e) => {
                warn!("GPU memory query failed, recording 0 MB: {}", e);
                0
            }
        }
    }
}
