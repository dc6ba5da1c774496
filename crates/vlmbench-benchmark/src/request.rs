use serde::{Deserialize, Serialize};
use vlmbench_core::BenchmarkConfig;

/// MIME type advertised in the image data URI.
pub const IMAGE_MIME: &str = "image/png";

pub fn image_data_uri(image_base64: &str) -> String {
    format!("data:{};base64,{}", IMAGE_MIME, image_base64)
}

/// One user turn carrying the prompt and an inline image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    pub image_data_uri: String,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub include_usage: bool,
}

impl VisionRequest {
    pub fn new(config: &BenchmarkConfig, image_base64: &str) -> Self {
        Self {
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            image_data_uri: image_data_uri(image_base64),
            stream: config.stream,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            include_usage: config.stream,
        }
    }

    /// Non-streaming variant used to prime the server before timing.
    pub fn warmup(&self) -> Self {
        Self {
            stream: false,
            include_usage: false,
            ..self.clone()
        }
    }
}
