use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_loadtest::adapter::{AdapterConfig, AdapterRegistry};
use llm_loadtest::generator::{weighted_mean_ttft_ms, CancelToken, Generator};
use llm_loadtest::model::{BenchmarkConfig, WorkloadSpec};
use llm_loadtest::probe::PrometheusProbe;
use llm_loadtest::progress::NullSink;
use llm_loadtest::recommender::{build_infra_profile, calculate_recommendation};
use llm_loadtest::validator;

#[derive(Parser)]
#[command(name = "llm-loadtest")]
#[command(about = "Load testing and infrastructure recommendation for LLM inference servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a benchmark against a configured server and print aggregated
    /// statistics for each concurrency level.
    Run(RunArgs),
    /// Profile a server at a range of concurrency levels and recommend
    /// GPU infrastructure sizing for a target workload.
    Recommend(RecommendArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Path to a JSON benchmark config (see `BenchmarkConfig`).
    #[arg(short, long, env = "LLM_LOADTEST_CONFIG")]
    config: String,

    /// Write the full `BenchmarkResult` as JSON to this path.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cross-validate client-observed totals against the server's own
    /// Prometheus counters, sampled before and after the run.
    #[arg(long)]
    validate: bool,

    /// Tolerance used for request-count and token-count cross-validation.
    #[arg(long, default_value = "0.05")]
    tolerance: f64,
}

#[derive(Parser)]
struct RecommendArgs {
    /// Path to a JSON benchmark config providing server/model/adapter.
    #[arg(short, long, env = "LLM_LOADTEST_CONFIG")]
    config: String,

    /// Path to a JSON `WorkloadSpec` describing the target traffic.
    #[arg(short, long)]
    workload: String,

    /// Concurrency levels to profile at.
    #[arg(long, value_delimiter = ',', default_value = "1,10,50,100,200")]
    concurrency_steps: Vec<usize>,

    /// Requests issued per concurrency level while profiling.
    #[arg(long, default_value = "50")]
    requests_per_step: usize,

    /// Safety margin applied on top of the raw scaling ratio (0.2 = 20%).
    #[arg(long, default_value = "0.2")]
    headroom: f64,

    /// Write the full `InfraRecommendation` as JSON to this path.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_loadtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_command(args).await,
        Command::Recommend(args) => recommend_command(args).await,
    }
}

fn adapter_config_from(config: &BenchmarkConfig) -> AdapterConfig {
    AdapterConfig {
        server_url: config.server_url.clone(),
        model: config.model.clone(),
        api_key: config.api_key.clone(),
        timeout: Duration::from_secs(config.timeout_s),
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let config = BenchmarkConfig::from_file(&args.config).context("loading benchmark config")?;
    tracing::info!(server_url = %config.server_url, model = %config.model, "loaded benchmark config");

    let registry = AdapterRegistry::new();
    let adapter = registry.build(&config.adapter_kind, adapter_config_from(&config))?;

    let mut generator = Generator::new(adapter, Arc::new(NullSink));
    if args.validate {
        let probe = PrometheusProbe::new(config.server_url.clone(), Duration::from_secs(5));
        generator = generator.with_validation(probe, args.tolerance);
    }
    let cancel = CancelToken::new();
    let result = generator.run(&config, &cancel).await;

    tracing::info!(
        levels = result.results.len(),
        weighted_mean_ttft_ms = weighted_mean_ttft_ms(&result.results),
        "benchmark complete"
    );

    for level in &result.results {
        println!(
            "concurrency={:>4}  reqs={:>5}  errors={:>4} ({:>5.1}%)  ttft_p95={:>8.1}ms  e2e_p95={:>8.1}ms  throughput={:>8.1} tok/s",
            level.concurrency,
            level.total_requests,
            level.failed_requests,
            level.error_rate_percent,
            level.ttft.p95,
            level.e2e.p95,
            level.throughput_tokens_per_sec,
        );
        if let Some(goodput) = &level.goodput {
            println!("  goodput: {:.1}% ({}/{})", goodput.percent, goodput.satisfied, goodput.total);
        }
    }

    if let Some(validation) = &result.validation {
        println!("{}", validator::format_report(validation));
    }

    if let Some(output) = args.output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&output, json).with_context(|| format!("writing result to {}", output.display()))?;
        tracing::info!(path = %output.display(), "wrote benchmark result");
    }

    Ok(())
}

async fn recommend_command(args: RecommendArgs) -> Result<()> {
    let mut config = BenchmarkConfig::from_file(&args.config).context("loading benchmark config")?;
    let workload_json = std::fs::read_to_string(&args.workload).context("reading workload spec")?;
    let workload: WorkloadSpec = serde_json::from_str(&workload_json).context("parsing workload spec")?;

    config.input_len = workload.avg_input_tokens;
    config.output_len = workload.avg_output_tokens;
    config.num_prompts = args.requests_per_step;
    config.concurrency = args.concurrency_steps.clone();
    config.goodput_thresholds = Some(llm_loadtest::model::GoodputThresholds {
        ttft_ms: Some(workload.ttft_target_ms),
        tpot_ms: Some(workload.tpot_target_ms),
        e2e_ms: None,
    });

    let registry = AdapterRegistry::new();
    let adapter = registry.build(&config.adapter_kind, adapter_config_from(&config))?;
    let generator = Generator::new(adapter, Arc::new(NullSink));
    let cancel = CancelToken::new();

    tracing::info!(steps = ?args.concurrency_steps, "profiling infrastructure");
    let benchmark_result = generator.run(&config, &cancel).await;

    let gpu = llm_loadtest::model::InfraProfile::unknown_gpu(1);
    let profile = build_infra_profile(&benchmark_result.results, &workload, gpu);
    let recommendation = calculate_recommendation(&config.model, &workload, &profile, args.headroom);

    println!("{}", recommendation.reasoning);
    println!("Formula: {}", recommendation.calculation_formula);
    println!(
        "Recommended: {} x {} (tensor parallelism {})",
        recommendation.recommended_gpu, recommendation.recommended_count, recommendation.tensor_parallelism
    );

    if let Some(output) = args.output {
        let json = serde_json::to_string_pretty(&recommendation)?;
        std::fs::write(&output, json).with_context(|| format!("writing recommendation to {}", output.display()))?;
    }

    Ok(())
}
