use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};
use vlmbench_core::Result;

/// One incremental response event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEvent {
    pub fragments: Vec<String>,
    pub completion_tokens: Option<u32>,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![text.into()],
            completion_tokens: None,
        }
    }

    pub fn usage(completion_tokens: u32) -> Self {
        Self {
            fragments: Vec::new(),
            completion_tokens: Some(completion_tokens),
        }
    }

    fn has_content(&self) -> bool {
        self.fragments.iter().any(|f| !f.is_empty())
    }
}

/// Response events of a single request. Consumed once.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    /// Time from request start to the first non-empty fragment.
    pub ttft: Option<Duration>,
    /// Completion tokens from the last usage summary, 0 if none arrived.
    pub output_tokens: u32,
    pub events: u32,
}

/// Drains `stream`, timing the first content fragment against `start`.
///
/// Every non-empty fragment is handed to `on_fragment` in arrival order.
/// Transport errors inside the stream abort consumption.
pub async fn consume_stream<F>(
    mut stream: EventStream,
    start: Instant,
    mut on_fragment: F,
) -> Result<StreamOutcome>
where
    F: FnMut(&str),
{
    let mut outcome = StreamOutcome::default();
    let mut got_usage = false;

    while let Some(event) = stream.next().await {
        let event = event?;
        outcome.events += 1;

        if outcome.ttft.is_none() && event.has_content() {
            let ttft = start.elapsed();
            debug!(ttft_ms = ttft.as_millis() as u64, "First content fragment");
            outcome.ttft = Some(ttft);
        }

        for fragment in event.fragments.iter().filter(|f| !f.is_empty()) {
            on_fragment(fragment);
        }

        if let Some(tokens) = event.completion_tokens {
            outcome.output_tokens = tokens;
            got_usage = true;
        }
    }

    if !got_usage {
        warn!(
            "No usage stats received after {} events; output tokens recorded as 0. \
             Ensure the server supports 'stream_options.include_usage'.",
            outcome.events
        );
    }

    Ok(outcome)
}
