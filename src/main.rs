//! AIPerf command-line entry point
//!
//! `aiperf profile` runs a benchmark against an LLM-serving endpoint;
//! `aiperf config` prints the effective configuration for the same
//! flags. Exit codes: 0 success, 1 configuration error, 2 fatal runtime
//! error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use aiperf::config::{
    ArrivalPattern, CancellationConfig, DatasetSource, EndpointConfig, LoadGenConfig, OutputConfig,
    SamplerKind, TimingMode,
};
use aiperf::domain_types::{CancellationRate, ConcurrencyLimit, ModelName, RequestRate};
use aiperf::endpoints::EndpointType;
use aiperf::error::AiperfError;
use aiperf::{ServiceConfig, SystemController, UserConfig};

#[derive(Parser)]
#[command(name = "aiperf", version, about = "LLM endpoint load generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark against the target endpoint.
    Profile(ProfileArgs),
    /// Print the effective configuration as JSON and exit.
    Config(ProfileArgs),
}

#[derive(Args)]
struct ProfileArgs {
    /// Base URL of the target endpoint, e.g. http://localhost:8000/v1
    #[arg(long)]
    url: String,

    /// Model name sent in every request.
    #[arg(long)]
    model: String,

    /// Endpoint family: chat, completions, embeddings, rankings.
    #[arg(long, default_value = "chat")]
    endpoint: String,

    /// Request SSE streaming responses.
    #[arg(long)]
    streaming: bool,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 600)]
    timeout_sec: u64,

    /// Extra request header, repeatable, as `Name: value`.
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Number of concurrent in-flight requests (concurrency mode).
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Target request rate in req/s (switches to request-rate mode).
    #[arg(long)]
    request_rate: Option<f64>,

    /// Inter-arrival distribution for request-rate mode.
    #[arg(long, default_value = "poisson")]
    arrival: String,

    /// Stop the profiling phase after this many requests.
    #[arg(long)]
    request_count: Option<u64>,

    /// Stop the profiling phase after this many seconds.
    #[arg(long)]
    duration_sec: Option<u64>,

    /// Number of warmup requests before profiling.
    #[arg(long)]
    warmup_count: Option<u64>,

    /// Grace period in seconds to wait for in-flight requests after
    /// sending completes.
    #[arg(long, default_value_t = 30)]
    grace_period_sec: u64,

    /// Conversation sampler: sequential, random, shuffle.
    #[arg(long, default_value = "sequential")]
    sampler: String,

    /// Root random seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of synthetic conversations to generate.
    #[arg(long, default_value_t = 100)]
    conversation_count: usize,

    /// Prompt text for synthetic conversations.
    #[arg(long, default_value = "Tell me about the history of computing.")]
    prompt: String,

    /// Percentage (0-100) of requests to force-cancel mid-flight.
    #[arg(long)]
    cancellation_rate: Option<f64>,

    /// Delay in milliseconds before a marked request is cancelled.
    #[arg(long, default_value_t = 1000)]
    cancellation_delay_ms: u64,

    /// Aggregate metrics per time slice of this many seconds.
    #[arg(long)]
    timeslice_sec: Option<u64>,

    /// Directory for exported artifacts.
    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,
}

fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>, AiperfError> {
    let mut headers = BTreeMap::new();
    for entry in raw {
        let (name, value) = entry.split_once(':').ok_or_else(|| {
            AiperfError::config(
                "endpoint.request_headers",
                format!("malformed header `{entry}`"),
            )
        })?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn build_user_config(args: &ProfileArgs) -> Result<UserConfig, AiperfError> {
    let endpoint_type: EndpointType = args
        .endpoint
        .parse()
        .map_err(|err: String| AiperfError::config("endpoint.endpoint_type", err))?;
    let model = ModelName::try_new(args.model.clone())
        .map_err(|err| AiperfError::config("endpoint.model", err.to_string()))?;

    let timing_mode = if args.request_rate.is_some() {
        TimingMode::RequestRate
    } else {
        TimingMode::Concurrency
    };
    let arrival = match args.arrival.as_str() {
        "poisson" => ArrivalPattern::Poisson,
        "constant" => ArrivalPattern::Constant,
        other => {
            return Err(AiperfError::config(
                "loadgen.arrival",
                format!("unknown arrival pattern `{other}`"),
            ))
        }
    };
    let sampler = match args.sampler.as_str() {
        "sequential" => SamplerKind::Sequential,
        "random" => SamplerKind::Random,
        "shuffle" => SamplerKind::Shuffle,
        other => {
            return Err(AiperfError::config(
                "loadgen.sampler",
                format!("unknown sampler `{other}`"),
            ))
        }
    };

    let request_rate = args
        .request_rate
        .map(|rate| {
            RequestRate::try_new(rate)
                .map_err(|err| AiperfError::config("loadgen.request_rate", err.to_string()))
        })
        .transpose()?;
    let cancellation = args
        .cancellation_rate
        .map(|rate| {
            CancellationRate::try_new(rate)
                .map(|rate| CancellationConfig {
                    rate,
                    delay_ms: args.cancellation_delay_ms,
                })
                .map_err(|err| AiperfError::config("loadgen.cancellation.rate", err.to_string()))
        })
        .transpose()?;
    let concurrency = ConcurrencyLimit::try_new(args.concurrency)
        .map_err(|err| AiperfError::config("loadgen.concurrency", err.to_string()))?;

    // Default terminator: 100 requests when neither is given.
    let (request_count, duration_ms) = match (args.request_count, args.duration_sec) {
        (None, None) => (Some(100), None),
        (count, duration) => (count, duration.map(|sec| sec * 1_000)),
    };

    Ok(UserConfig {
        endpoint: EndpointConfig {
            base_url: args.url.clone(),
            endpoint_type,
            model,
            streaming: args.streaming,
            timeout_ms: args.timeout_sec * 1_000,
            request_headers: parse_headers(&args.headers)?,
        },
        loadgen: LoadGenConfig {
            timing_mode,
            concurrency,
            request_rate,
            arrival,
            warmup_request_count: args.warmup_count,
            warmup_duration_ms: None,
            request_count,
            duration_ms,
            grace_period_ms: args.grace_period_sec * 1_000,
            auto_offset_timestamps: false,
            fixed_schedule_start_offset_ms: None,
            sampler,
            random_seed: args.seed,
            cancellation,
        },
        input: DatasetSource::Synthetic {
            conversation_count: args.conversation_count,
            prompt_text: args.prompt.clone(),
        },
        output: OutputConfig {
            artifact_dir: args.artifact_dir.clone(),
            timeslice_duration_ms: args.timeslice_sec.map(|sec| sec * 1_000),
        },
    })
}

async fn run_profile(args: ProfileArgs) -> Result<(), AiperfError> {
    let user_config = build_user_config(&args)?;
    let controller = SystemController::new(ServiceConfig::default(), user_config)?;

    let results = controller
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!(
        completed = results.completed,
        errors = results.errors_by_type.iter().map(|e| e.count).sum::<u64>(),
        was_cancelled = results.was_cancelled,
        artifact_dir = %args.artifact_dir.display(),
        "benchmark complete"
    );
    Ok(())
}

fn print_config(args: &ProfileArgs) -> Result<(), AiperfError> {
    let config = build_user_config(args)?;
    config.validate()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&config.effective_json())
            .unwrap_or_else(|_| "{}".to_string())
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aiperf=info".parse().expect("static directive parses")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Profile(args) => run_profile(args).await,
        Commands::Config(args) => print_config(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ AiperfError::Configuration { .. }) => {
            error!("{err}");
            ExitCode::from(1)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(2)
        }
    }
}
