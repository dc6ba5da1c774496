use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vlmbench_benchmark::{BenchmarkEvent, BenchmarkResult, BenchmarkRunner, OpenAiBackend};
use vlmbench_core::config::{
    DEFAULT_API_BASE, DEFAULT_API_KEY, DEFAULT_IMAGE, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_NUM_RUNS, DEFAULT_TEMPERATURE, DEFAULT_WARMUP_RUNS,
};
use vlmbench_core::{default_prompt, BenchmarkConfig, GpuProbe};
use vlmbench_services::{encode_image, AssetResolver, NvidiaGpu};

#[derive(Parser)]
#[command(name = "vlmbench")]
#[command(about = "Benchmark a vision-language model behind an OpenAI-compatible API", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    benchmark: BenchmarkArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark (the default when no subcommand is given)
    Benchmark(BenchmarkArgs),

    /// Show the GPU the benchmark would report
    Device,

    /// List models served by the endpoint
    Models {
        /// API base URL
        #[arg(long, env = "VLMBENCH_API_BASE", default_value = DEFAULT_API_BASE)]
        api_base: String,

        /// API key sent as bearer token
        #[arg(long, env = "VLMBENCH_API_KEY", default_value = DEFAULT_API_KEY)]
        api_key: String,
    },
}

#[derive(Args, Clone)]
struct BenchmarkArgs {
    /// Number of timed runs
    #[arg(short = 'n', long, env = "VLMBENCH_NUM_RUNS", default_value_t = DEFAULT_NUM_RUNS)]
    num_runs: u32,

    /// Number of untimed warmup runs
    #[arg(short, long, env = "VLMBENCH_WARMUP_RUNS", default_value_t = DEFAULT_WARMUP_RUNS)]
    warmup_runs: u32,

    /// Model identifier
    #[arg(short, long, env = "VLMBENCH_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// API base URL
    #[arg(long, env = "VLMBENCH_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// API key sent as bearer token
    #[arg(long, env = "VLMBENCH_API_KEY", default_value = DEFAULT_API_KEY)]
    api_key: String,

    /// Image path, or the name of a bundled asset
    #[arg(short, long, env = "VLMBENCH_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Prompt text (defaults to a detailed description with bounding boxes)
    #[arg(short, long, env = "VLMBENCH_PROMPT")]
    prompt: Option<String>,

    /// Write the report to this file
    #[arg(short, long, env = "VLMBENCH_SAVE_PATH")]
    save_path: Option<PathBuf>,

    /// Disable streaming responses
    #[arg(long, env = "VLMBENCH_NO_STREAM")]
    no_stream: bool,

    /// Sampling temperature
    #[arg(short, long, env = "VLMBENCH_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Max output tokens per request
    #[arg(long, env = "VLMBENCH_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    /// Per-request timeout in seconds (unbounded when unset)
    #[arg(long, env = "VLMBENCH_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl BenchmarkArgs {
    fn to_config(&self) -> BenchmarkConfig {
        BenchmarkConfig {
            num_runs: self.num_runs,
            warmup_runs: self.warmup_runs,
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            image: self.image.clone(),
            prompt: self.prompt.clone().unwrap_or_else(default_prompt),
            save_path: self.save_path.clone(),
            stream: !self.no_stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout_secs: self.timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Benchmark(args)) => cmd_benchmark(&args).await?,
        Some(Commands::Device) => cmd_device()?,
        Some(Commands::Models { api_base, api_key }) => cmd_models(&api_base, &api_key).await?,
        None => cmd_benchmark(&cli.benchmark).await?,
    }

    Ok(())
}

async fn cmd_benchmark(args: &BenchmarkArgs) -> Result<()> {
    let config = args.to_config();
    config.validate()?;

    let image_path = AssetResolver::bundled().resolve(&config.image)?;
    info!("Image: {}", image_path.display());
    let image_base64 = encode_image(&image_path)?;

    let client = OpenAiBackend::from_config(&config)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx));

    let runner = BenchmarkRunner::new(client, NvidiaGpu::default()).with_events(tx);
    let result = runner.run(&config, &image_base64).await;
    drop(runner);
    printer.await?;

    print_result(&result?, args.format)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<BenchmarkEvent>) {
    let mut stdout = io::stdout();
    let mut streaming = false;

    while let Some(event) = rx.recv().await {
        match event {
            BenchmarkEvent::Token { content } => {
                if !streaming {
                    print!("Model output: ");
                    streaming = true;
                }
                print!("{}", content);
                let _ = stdout.flush();
            }
            BenchmarkEvent::RunComplete { .. } if streaming => {
                println!();
                streaming = false;
            }
            BenchmarkEvent::Warmup { current, total } => {
                info!("Warmup {}/{}", current, total);
            }
            BenchmarkEvent::Run { current, total } => {
                info!("Run {}/{}", current, total);
            }
            BenchmarkEvent::RunComplete { .. } => {}
        }
    }
}

fn print_result(result: &BenchmarkResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            print!("{}", result.report);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(())
}

fn cmd_device() -> Result<()> {
    let device = NvidiaGpu::default().device_info()?;
    println!("{}", device);
    Ok(())
}

async fn cmd_models(api_base: &str, api_key: &str) -> Result<()> {
    let client = OpenAiBackend::new(api_base, api_key, None)?;
    let models = client.list_models().await?;

    println!();
    println!("Models served at {}:", client.api_base());
    println!("{:-<65}", "");
    for (i, model) in models.iter().enumerate() {
        println!("  {:<4} {}", i + 1, model);
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_core_config() {
        let cli = Cli::try_parse_from(["vlmbench"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.benchmark.to_config(), BenchmarkConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "vlmbench",
            "-n",
            "1",
            "--warmup-runs",
            "0",
            "--model",
            "llava",
            "--no-stream",
            "--max-tokens",
            "64",
            "--save-path",
            "/tmp/report.txt",
            "--timeout-secs",
            "30",
            "--prompt",
            "What is this?",
        ])
        .unwrap();

        let config = cli.benchmark.to_config();
        assert_eq!(config.num_runs, 1);
        assert_eq!(config.warmup_runs, 0);
        assert_eq!(config.model, "llava");
        assert!(!config.stream);
        assert_eq!(config.max_tokens, 64);
        assert_eq!(config.save_path, Some(PathBuf::from("/tmp/report.txt")));
        assert_eq!(config.request_timeout_secs, Some(30));
        assert_eq!(config.prompt, "What is this?");
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["vlmbench", "device"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Device)));

        let cli = Cli::try_parse_from(["vlmbench", "benchmark", "-n", "2"]).unwrap();
        match cli.command {
            Some(Commands::Benchmark(args)) => assert_eq!(args.num_runs, 2),
            _ => panic!("expected benchmark subcommand"),
        }
    }
}
