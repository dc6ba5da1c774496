use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, VlmBenchError};

pub const DEFAULT_NUM_RUNS: u32 = 3;
pub const DEFAULT_WARMUP_RUNS: u32 = 1;
pub const DEFAULT_MODEL: &str = "Qwen/Qwen3-VL-2B-Instruct";
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/v1";
pub const DEFAULT_API_KEY: &str = "EMPTY";
pub const DEFAULT_IMAGE: &str = "sample.png";
pub const DEFAULT_STREAM: bool = true;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Shape the default prompt asks the model to answer in.
pub const JSON_OUTPUT_TEMPLATE: &str = r#"
{
    bounding_box: [
    {
        "bbox_2d": [111, 222, 333, 444],
        "label": "dog",
    },
    {
        "bbox_2d": [555, 666, 777, 888],
        "label": "cat",
    },
    ...
    ],
    response: "I found a dog and a cat in the picture. The dog seems to be a ..."
}
"#;

pub fn default_prompt() -> String {
    format!(
        "请用中文详细描述一下这张图片里的内容。并给出bounding box。Json格式为：{}",
        JSON_OUTPUT_TEMPLATE
    )
}

/// Parameters for one benchmark invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub num_runs: u32,
    pub warmup_runs: u32,
    pub model: String,
    pub api_base: String,
    /// Bearer token. Never serialized.
    #[serde(default = "default_api_key", skip_serializing)]
    pub api_key: String,
    pub image: String,
    pub prompt: String,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request HTTP timeout. `None` waits on the server indefinitely.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.to_string()
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            num_runs: DEFAULT_NUM_RUNS,
            warmup_runs: DEFAULT_WARMUP_RUNS,
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: default_api_key(),
            image: DEFAULT_IMAGE.to_string(),
            prompt: default_prompt(),
            save_path: None,
            stream: DEFAULT_STREAM,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_secs: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_runs == 0 {
            return Err(VlmBenchError::Config(
                "num_runs must be at least 1".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(VlmBenchError::Config("model must not be empty".to_string()));
        }
        if self.api_base.trim().is_empty() {
            return Err(VlmBenchError::Config(
                "api_base must not be empty".to_string(),
            ));
        }
        if let Some(0) = self.request_timeout_secs {
            return Err(VlmBenchError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Live token preview is only shown for single-run invocations.
    pub fn live_preview(&self) -> bool {
        self.num_runs == 1
    }
}
