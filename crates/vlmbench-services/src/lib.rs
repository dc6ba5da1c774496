mod assets;
mod gpu_monitor;

pub use assets::{encode_image, AssetResolver, ASSETS_DIR_ENV};
pub use gpu_monitor::{parse_memory_used, GpuMonitorError, NvidiaGpu};
