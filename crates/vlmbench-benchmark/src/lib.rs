pub mod openai;
pub mod request;
pub mod runner;
pub mod stream;

pub use openai::{build_chat_request, ChatBackend, OpenAiBackend};
pub use request::{image_data_uri, VisionRequest};
pub use runner::{BenchmarkEvent, BenchmarkResult, BenchmarkRunner};
pub use stream::{consume_stream, EventStream, StreamEvent, StreamOutcome};
