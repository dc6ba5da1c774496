use chrono::Local;
use futures::{future, stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};
use vlmbench_core::{
    Averages, BenchmarkConfig, GpuProbe, MetricsLedger, Report, Result, RunMetrics, VlmBenchError,
};

use crate::openai::ChatBackend;
use crate::request::VisionRequest;
use crate::stream::{consume_stream, EventStream};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BenchmarkEvent {
    Warmup { current: u32, total: u32 },
    Run { current: u32, total: u32 },
    Token { content: String },
    RunComplete { metrics: RunMetrics },
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResult {
    pub config: BenchmarkConfig,
    pub device: String,
    pub runs: Vec<RunMetrics>,
    pub ledger: MetricsLedger,
    pub averages: Averages,
    pub report: Report,
}

/// Sequential warmup-then-measure loop against one chat backend.
pub struct BenchmarkRunner<C, G> {
    client: C,
    gpu: G,
    events: Option<mpsc::UnboundedSender<BenchmarkEvent>>,
}

impl<C: ChatBackend, G: GpuProbe> BenchmarkRunner<C, G> {
    pub fn new(client: C, gpu: G) -> Self {
        Self {
            client,
            gpu,
            events: None,
        }
    }

    /// Progress and live tokens are sent to `tx` as the benchmark runs.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<BenchmarkEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: BenchmarkEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub async fn run(&self, config: &BenchmarkConfig, image_base64: &str) -> Result<BenchmarkResult> {
        config.validate()?;

        let device = self.gpu.device_info()?;
        debug!(device = %device, "Device info");

        let request = VisionRequest::new(config, image_base64);

        info!(
            "Starting benchmark for {} | Number of runs: {}",
            config.model, config.num_runs
        );

        self.warmup(config, &request).await?;

        let mut ledger = MetricsLedger::new();
        let runs = self.run_timed(config, &request, &mut ledger).await?;

        let averages = ledger.averages()?;
        let report = Report::format(&averages, &config.model, &device, Local::now().naive_local());

        if let Some(path) = &config.save_path {
            report.save(path)?;
        }

        Ok(BenchmarkResult {
            config: config.clone(),
            device,
            runs,
            ledger,
            averages,
            report,
        })
    }

    async fn warmup(&self, config: &BenchmarkConfig, request: &VisionRequest) -> Result<()> {
        let warmup = request.warmup();

        for i in 0..config.warmup_runs {
            self.emit(BenchmarkEvent::Warmup {
                current: i + 1,
                total: config.warmup_runs,
            });
            self.client.complete(&warmup).await?;
            info!("Warmup run {} completed", i + 1);
        }

        Ok(())
    }

    async fn run_timed(
        &self,
        config: &BenchmarkConfig,
        request: &VisionRequest,
        ledger: &mut MetricsLedger,
    ) -> Result<Vec<RunMetrics>> {
        let mut runs = Vec::with_capacity(config.num_runs as usize);

        for i in 0..config.num_runs {
            self.emit(BenchmarkEvent::Run {
                current: i + 1,
                total: config.num_runs,
            });

            let metrics = self.run_single(i + 1, config, request).await?;
            ledger.record(&metrics);

            self.emit(BenchmarkEvent::RunComplete {
                metrics: metrics.clone(),
            });
            runs.push(metrics);
        }

        Ok(runs)
    }

    /// Non-streaming responses arrive as a single event when the request returns.
    async fn open(&self, request: &VisionRequest) -> Result<EventStream> {
        if request.stream {
            return self.client.stream(request).await;
        }
        let event = self.client.complete(request).await?;
        Ok(Box::pin(stream::once(future::ready(Ok::<_, VlmBenchError>(event)))))
    }

    async fn run_single(
        &self,
        run: u32,
        config: &BenchmarkConfig,
        request: &VisionRequest,
    ) -> Result<RunMetrics> {
        let start = Instant::now();
        let vram_before = self.gpu.memory_used_mb().await;

        let stream = self.open(request).await?;
        let live_preview = config.live_preview();
        let outcome = consume_stream(stream, start, |fragment| {
            if live_preview {
                self.emit(BenchmarkEvent::Token {
                    content: fragment.to_string(),
                });
            }
        })
        .await?;

        info!("==== Run {} completed ====", run);

        let total_time = start.elapsed().as_secs_f64();
        let vram_after = self.gpu.memory_used_mb().await;

        let metrics = RunMetrics::new(
            run,
            outcome.ttft.map(|d| d.as_secs_f64()),
            total_time,
            outcome.output_tokens,
            vram_before,
            vram_after,
        )?;

        info!("Time to First Token (TTFT) (s): {:.3}", metrics.ttft_secs);
        info!("Generation Throughput (tokens/s): {:.1}", metrics.throughput());
        info!("Output Tokens: {}", metrics.output_tokens);
        info!(
            "VRAM Used: {} MB (Request before: {} MB)",
            metrics.vram_used_mb, metrics.vram_before_mb
        );

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{EventStream, StreamEvent};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use vlmbench_core::{Metric, VlmBenchError};

    type Script = Vec<(u64, Result<StreamEvent>)>;

    /// Replays one scripted stream per timed run.
    #[derive(Default)]
    struct ScriptedBackend {
        scripts: Mutex<VecDeque<Script>>,
        stream_calls: AtomicU32,
        complete_calls: AtomicU32,
        complete_delay_ms: u64,
        requests: Mutex<Vec<VisionRequest>>,
    }

    impl ScriptedBackend {
        fn with_scripts(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            }
        }

        fn repeated(script: fn() -> Script, times: usize) -> Self {
            Self::with_scripts((0..times).map(|_| script()).collect())
        }
    }

    #[async_trait]
    impl ChatBackend for Arc<ScriptedBackend> {
        async fn complete(&self, request: &VisionRequest) -> Result<StreamEvent> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            tokio::time::sleep(Duration::from_millis(self.complete_delay_ms)).await;
            Ok(StreamEvent {
                fragments: vec!["warm".to_string()],
                completion_tokens: Some(999),
            })
        }

        async fn stream(&self, request: &VisionRequest) -> Result<EventStream> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(stream::iter(script).then(|(delay_ms, event)| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                event
            })))
        }
    }

    struct FakeGpu {
        device: Option<String>,
        memory: Mutex<VecDeque<u64>>,
    }

    impl FakeGpu {
        fn new(memory: Vec<u64>) -> Self {
            Self {
                device: Some("GPU: Fake".to_string()),
                memory: Mutex::new(memory.into()),
            }
        }

        fn missing_driver() -> Self {
            Self {
                device: None,
                memory: Mutex::new(VecDeque::new()),
            }
        }
    }

    #[async_trait]
    impl GpuProbe for FakeGpu {
        fn device_info(&self) -> Result<String> {
            self.device
                .clone()
                .ok_or_else(|| VlmBenchError::Device("NVML library not found".to_string()))
        }

        async fn memory_used_mb(&self) -> u64 {
            self.memory.lock().unwrap().pop_front().unwrap_or(0)
        }
    }

    fn three_fragments() -> Script {
        vec![
            (100, Ok(StreamEvent::content("A cat"))),
            (200, Ok(StreamEvent::content(" in a"))),
            (200, Ok(StreamEvent::content(" park."))),
            (0, Ok(StreamEvent::usage(12))),
        ]
    }

    fn config(num_runs: u32, warmup_runs: u32) -> BenchmarkConfig {
        BenchmarkConfig {
            num_runs,
            warmup_runs,
            model: "test-vl".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_ledger_entry_per_timed_run() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 4));
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::new(vec![]));

        let result = runner.run(&config(4, 0), "eA==").await.unwrap();

        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 4);
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.runs.len(), 4);
        for metric in Metric::ALL {
            assert_eq!(result.ledger.values(metric).len(), 4, "{}", metric.as_str());
        }
        let runs: Vec<u32> = result.runs.iter().map(|r| r.run).collect();
        assert_eq!(runs, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_metrics_from_synthetic_stream() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 1));
        let runner = BenchmarkRunner::new(backend, FakeGpu::new(vec![100, 150]));

        let result = runner.run(&config(1, 0), "eA==").await.unwrap();
        let run = &result.runs[0];

        assert!((run.ttft_secs - 0.1).abs() < 0.002, "ttft {}", run.ttft_secs);
        assert!((run.total_time_secs - 0.5).abs() < 0.002, "total {}", run.total_time_secs);
        assert_eq!(run.output_tokens, 12);
        assert!((run.throughput() - 30.0).abs() < 0.5, "throughput {}", run.throughput());
        assert_eq!(run.vram_before_mb, 100);
        assert_eq!(run.vram_used_mb, 150);
        assert_eq!(result.averages.vram_used, 150.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_runs_are_discarded() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 2));
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::new(vec![]));

        let result = runner.run(&config(2, 3), "eA==").await.unwrap();

        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.ledger.len(), 2);
        assert_eq!(result.ledger.values(Metric::OutputTokens), &[12.0, 12.0]);
        assert_eq!(result.averages.output_tokens, 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_streaming_run_is_one_event() {
        let backend = Arc::new(ScriptedBackend {
            complete_delay_ms: 400,
            ..Default::default()
        });
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::new(vec![]));
        let config = BenchmarkConfig {
            stream: false,
            ..config(1, 0)
        };

        let result = runner.run(&config, "eA==").await.unwrap();
        let run = &result.runs[0];

        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].stream);
        assert!(!requests[0].include_usage);

        assert!((run.ttft_secs - 0.4).abs() < 0.002, "ttft {}", run.ttft_secs);
        assert!((run.ttft_secs - run.total_time_secs).abs() < 0.002);
        assert_eq!(run.output_tokens, 999);
        assert_eq!(run.throughput(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_run_requests_usage() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 1));
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::new(vec![]));

        runner.run(&config(1, 0), "eA==").await.unwrap();

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].stream);
        assert!(requests[0].include_usage);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_json_omits_api_key() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 1));
        let runner = BenchmarkRunner::new(backend, FakeGpu::new(vec![]));
        let config = BenchmarkConfig {
            api_key: "sk-secret-123".to_string(),
            ..config(1, 0)
        };

        let result = runner.run(&config, "eA==").await.unwrap();
        let json = serde_json::to_string_pretty(&result).unwrap();

        assert!(!json.contains("sk-secret-123"));
        assert!(json.contains("\"throughput\""));
    }

    #[tokio::test]
    async fn test_content_free_run_fails() {
        let backend = Arc::new(ScriptedBackend::with_scripts(vec![vec![(
            0,
            Ok(StreamEvent::usage(0)),
        )]]));
        let runner = BenchmarkRunner::new(backend, FakeGpu::new(vec![]));

        let err = runner.run(&config(1, 0), "eA==").await.unwrap_err();
        assert!(matches!(err, VlmBenchError::NoContent { run: 1 }));
    }

    #[tokio::test]
    async fn test_device_failure_aborts_before_requests() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 1));
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::missing_driver());

        let err = runner.run(&config(1, 1), "eA==").await.unwrap_err();

        assert!(matches!(err, VlmBenchError::Device(_)));
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_sequence() {
        let backend = Arc::new(ScriptedBackend::with_scripts(vec![
            vec![(0, Ok(StreamEvent::content("ok"))), (0, Ok(StreamEvent::usage(1)))],
            vec![(0, Err(VlmBenchError::Http("connection refused".to_string())))],
            vec![(0, Ok(StreamEvent::content("never")))],
        ]));
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::new(vec![]));

        let err = runner.run(&config(3, 0), "eA==").await.unwrap_err();

        assert!(matches!(err, VlmBenchError::Http(_)));
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_runs_rejected() {
        let backend = Arc::new(ScriptedBackend::default());
        let runner = BenchmarkRunner::new(backend.clone(), FakeGpu::new(vec![]));

        let err = runner.run(&config(0, 1), "eA==").await.unwrap_err();

        assert!(matches!(err, VlmBenchError::Config(_)));
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_run_streams_tokens() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = BenchmarkRunner::new(backend, FakeGpu::new(vec![])).with_events(tx);

        runner.run(&config(1, 1), "eA==").await.unwrap();
        drop(runner);

        let mut tokens = String::new();
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                BenchmarkEvent::Token { content } => tokens.push_str(&content),
                BenchmarkEvent::Warmup { .. } => kinds.push("warmup"),
                BenchmarkEvent::Run { .. } => kinds.push("run"),
                BenchmarkEvent::RunComplete { .. } => kinds.push("complete"),
            }
        }

        assert_eq!(tokens, "A cat in a park.");
        assert_eq!(kinds, vec!["warmup", "run", "complete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_run_has_no_live_tokens() {
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 2));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = BenchmarkRunner::new(backend, FakeGpu::new(vec![])).with_events(tx);

        runner.run(&config(2, 0), "eA==").await.unwrap();
        drop(runner);

        while let Some(event) = rx.recv().await {
            assert!(!matches!(event, BenchmarkEvent::Token { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_saved_when_path_given() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let backend = Arc::new(ScriptedBackend::repeated(three_fragments, 2));
        let runner = BenchmarkRunner::new(backend, FakeGpu::new(vec![10, 20, 30, 40]));

        let config = BenchmarkConfig {
            save_path: Some(path.clone()),
            ..config(2, 0)
        };
        let result = runner.run(&config, "eA==").await.unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved, result.report.as_str());
        assert!(saved.starts_with("==== Benchmark Report (test-vl) ===="));
        assert!(saved.contains("Device: GPU: Fake"));
        assert!(saved.contains(" - VRAM Used: 30.00"));
        assert!(saved.contains(" - Output Tokens: 12.00"));
    }
}
