use thiserror::Error;

#[derive(Error, Debug)]
pub enum VlmBenchError {
    #[error("Device query failed: {0}")]
    Device(String),

    #[error("Inference API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Run {run} produced no content before the stream ended")]
    NoContent { run: u32 },

    #[error("No data recorded for metric '{0}'")]
    EmptyLedger(&'static str),

    #[error("Asset error: {0}")]
    Asset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VlmBenchError>;
