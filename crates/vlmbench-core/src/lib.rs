pub mod config;
pub mod error;
pub mod metrics;
pub mod report;
pub mod system;

pub use config::{default_prompt, BenchmarkConfig, JSON_OUTPUT_TEMPLATE};
pub use error::{Result, VlmBenchError};
pub use metrics::{Averages, Metric, MetricsLedger, RunMetrics};
pub use report::Report;
pub use system::{DeviceInfo, GpuProbe};
