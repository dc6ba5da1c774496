use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, ChatCompletionStreamOptions,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, CreateChatCompletionStreamResponse, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, instrument};
use vlmbench_core::{BenchmarkConfig, Result, VlmBenchError};

use crate::request::VisionRequest;
use crate::stream::{EventStream, StreamEvent};

/// Chat completion transport used by the runner.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends a non-streaming request and returns its response as a single event.
    async fn complete(&self, request: &VisionRequest) -> Result<StreamEvent>;

    /// Opens a streaming response for `request`, with usage reporting enabled.
    async fn stream(&self, request: &VisionRequest) -> Result<EventStream>;
}

fn builder_err(e: impl ToString) -> VlmBenchError {
    VlmBenchError::Api(e.to_string())
}

fn openai_err(e: OpenAIError) -> VlmBenchError {
    match e {
        OpenAIError::Reqwest(e) => VlmBenchError::Http(e.to_string()),
        OpenAIError::StreamError(e) => VlmBenchError::Http(e),
        other => VlmBenchError::Api(other.to_string()),
    }
}

/// Maps a `VisionRequest` onto the chat completions wire format.
#[allow(deprecated)]
pub fn build_chat_request(request: &VisionRequest) -> Result<CreateChatCompletionRequest> {
    let content: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
        ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(request.prompt.as_str())
            .build()
            .map_err(builder_err)?
            .into(),
        ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(request.image_data_uri.as_str())
                    .build()
                    .map_err(builder_err)?,
            )
            .build()
            .map_err(builder_err)?
            .into(),
    ];

    let message = ChatCompletionRequestUserMessageArgs::default()
        .content(content)
        .build()
        .map_err(builder_err)?;
    let messages: Vec<ChatCompletionRequestMessage> = vec![message.into()];

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(request.model.as_str())
        .messages(messages)
        .temperature(request.temperature)
        .max_tokens(request.max_tokens);

    if request.stream {
        args.stream(true);
        if request.include_usage {
            args.stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            });
        }
    }

    args.build().map_err(builder_err)
}

/// Content of the first choice plus any usage summary.
pub fn event_from_chunk(chunk: CreateChatCompletionStreamResponse) -> StreamEvent {
    StreamEvent {
        fragments: chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .into_iter()
            .collect(),
        completion_tokens: chunk.usage.map(|u| u.completion_tokens),
    }
}

fn event_from_response(response: CreateChatCompletionResponse) -> StreamEvent {
    StreamEvent {
        fragments: response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .into_iter()
            .collect(),
        completion_tokens: response.usage.map(|u| u.completion_tokens),
    }
}

/// OpenAI-compatible inference endpoint, e.g. a vLLM server.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    api_base: String,
}

impl OpenAiBackend {
    pub fn new(api_base: &str, api_key: &str, timeout: Option<Duration>) -> Result<Self> {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            http = http.timeout(timeout);
        }
        let http = http
            .build()
            .map_err(|e| VlmBenchError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            api_base: api_base.to_string(),
        })
    }

    pub fn from_config(config: &BenchmarkConfig) -> Result<Self> {
        Self::new(&config.api_base, &config.api_key, config.request_timeout())
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    #[instrument(skip(self), fields(api_base = %self.api_base))]
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self.client.models().list().await.map_err(openai_err)?;
        let models: Vec<String> = response.data.into_iter().map(|m| m.id).collect();
        info!(count = models.len(), "Fetched served models");
        Ok(models)
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &VisionRequest) -> Result<StreamEvent> {
        let request = build_chat_request(&VisionRequest {
            stream: false,
            include_usage: false,
            ..request.clone()
        })?;
        debug!(model = %request.model, "Sending chat completion");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(openai_err)?;

        Ok(event_from_response(response))
    }

    async fn stream(&self, request: &VisionRequest) -> Result<EventStream> {
        let request = build_chat_request(&VisionRequest {
            stream: true,
            include_usage: true,
            ..request.clone()
        })?;
        debug!(model = %request.model, "Opening chat completion stream");

        let chunks = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(openai_err)?;

        Ok(Box::pin(chunks.map(|chunk| {
            chunk.map(event_from_chunk).map_err(openai_err)
        })))
    }
}
