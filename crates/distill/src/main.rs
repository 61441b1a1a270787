//! Summarize a large document down to a token budget.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. The key
//! may be empty for local OpenAI-compatible servers.
//!
//! # Examples
//!
//! ```sh
//! # Summarize a file with the defaults (4000-token calls, 500-token summary)
//! distill --file transcript.txt
//!
//! # Pipe content from stdin and print statistics
//! cat paper.md | distill --stdin --stats
//!
//! # Small-context local model, tolerate failed segments
//! distill --file logs.txt --base-url http://localhost:8000/v1/chat/completions \
//!   --model llama-3.1-8b --per-call-token-limit 2048 --partial-tolerance
//!
//! # Load a RunConfig from JSON and emit the full result as JSON
//! distill --file book.txt --config run.json --json
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use distill::prelude::*;
use distill::text::DEFAULT_CHARS_PER_TOKEN;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Summarize a large document down to a token budget.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser, Debug)]
#[command(name = "distill", version)]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// File to summarize
    #[arg(long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read the document from stdin
    #[arg(long)]
    stdin: bool,

    // ── Model ──────────────────────────────────────────────────
    /// Model to use for every generation call
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible chat-completions endpoint
    #[arg(long, default_value = DEFAULT_CHAT_URL)]
    base_url: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.3)]
    temperature: f32,

    // ── Run configuration ──────────────────────────────────────
    /// JSON file with a RunConfig; the flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hard ceiling on tokens per generation call
    #[arg(long)]
    per_call_token_limit: Option<usize>,

    /// Desired size of the final summary, in tokens
    #[arg(long)]
    final_token_target: Option<usize>,

    /// Tokens of preceding context repeated in each segment
    #[arg(long)]
    overlap_tokens: Option<usize>,

    /// Fraction of the per-call limit usable for text (0.0 to 1.0)
    #[arg(long)]
    safety_margin: Option<f64>,

    /// Expected summary:source ratio, used as the output hint (0.0 to 1.0)
    #[arg(long)]
    assumed_compression_ratio: Option<f64>,

    /// Maximum number of levels before giving up
    #[arg(long)]
    max_levels: Option<u32>,

    /// Retries per segment for transient failures
    #[arg(long)]
    max_retries: Option<u32>,

    /// Replace failed segments with a placeholder instead of aborting
    #[arg(long)]
    partial_tolerance: bool,

    /// Concurrent generation calls within a level
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Initial retry backoff, in milliseconds
    #[arg(long)]
    retry_backoff_ms: Option<u64>,

    /// Maximum retry backoff, in milliseconds
    #[arg(long)]
    retry_max_backoff_ms: Option<u64>,

    /// Ratio distance from 1.0 below which a level counts as stalled
    #[arg(long)]
    stall_epsilon: Option<f64>,

    /// How tokens are counted for every budget decision
    #[arg(long, value_enum, default_value_t = Tokenizer::Chars)]
    tokenizer: Tokenizer,

    /// Characters per estimated token (with --tokenizer chars)
    #[arg(long, default_value_t = DEFAULT_CHARS_PER_TOKEN)]
    chars_per_token: usize,

    // ── Output ─────────────────────────────────────────────────
    /// Append a statistics footer to the summary
    #[arg(long)]
    stats: bool,

    /// Print the full result as JSON
    #[arg(long, conflicts_with = "stats")]
    json: bool,

    /// Log progress to stderr (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Tokenizer {
    /// Character-based estimate
    Chars,
    /// One token per word
    Words,
    /// Exact tiktoken cl100k_base counts
    #[value(name = "cl100k")]
    Cl100k,
}

// ── Helpers ────────────────────────────────────────────────────────

fn build_estimator(cli: &Cli) -> Box<dyn TokenEstimator> {
    match cli.tokenizer {
        Tokenizer::Chars => Box::new(CharEstimator::new(cli.chars_per_token)),
        Tokenizer::Words => Box::new(WordEstimator),
        Tokenizer::Cl100k => Box::new(TiktokenEstimator::cl100k()),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("distill=info,warn"),
        _ => EnvFilter::new("distill=debug,info"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_document(cli: &Cli) -> Result<String, String> {
    match (&cli.file, cli.stdin) {
        (Some(path), _) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {e}", path.display())),
        (None, true) => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
        (None, false) => Err("provide --file or --stdin".to_string()),
    }
}

fn load_config(path: &Path) -> Result<RunConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse config file '{}': {e}", path.display()))
}

/// Start from the JSON config (or defaults) and apply flag overrides.
fn build_config(cli: &Cli) -> Result<RunConfig, String> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RunConfig::default(),
    };

    if let Some(v) = cli.per_call_token_limit {
        config.per_call_token_limit = v;
    }
    if let Some(v) = cli.final_token_target {
        config.final_token_target = v;
    }
    if let Some(v) = cli.overlap_tokens {
        config.overlap_tokens = v;
    }
    if let Some(v) = cli.safety_margin {
        config.safety_margin = v;
    }
    if let Some(v) = cli.assumed_compression_ratio {
        config.assumed_compression_ratio = v;
    }
    if let Some(v) = cli.max_levels {
        config.max_levels = v;
    }
    if let Some(v) = cli.max_retries {
        config.max_retries_per_segment = v;
    }
    if cli.partial_tolerance {
        config.partial_tolerance = true;
    }
    if let Some(v) = cli.max_concurrency {
        config.max_concurrency = v;
    }
    if let Some(v) = cli.retry_backoff_ms {
        config.retry_backoff_ms = v;
    }
    if let Some(v) = cli.retry_max_backoff_ms {
        config.retry_max_backoff_ms = v;
    }
    if let Some(v) = cli.stall_epsilon {
        config.stall_epsilon = v;
    }

    config.validate().map_err(|e| format!("invalid configuration: {e}"))?;
    Ok(config)
}

fn format_output(cli: &Cli, result: &RunResult) -> Result<String, String> {
    if cli.json {
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| format!("failed to serialize result: {e}"))?;
        return Ok(format!("{json}\n"));
    }
    if cli.stats {
        return Ok(format!("{}\n\n---\n{}", result.summary, result.stats_report()));
    }
    Ok(format!("{}\n", result.summary))
}

/// Flag set by Ctrl-C. In-flight calls finish; nothing new is dispatched.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight calls");
            eprintln!("\nInterrupted: finishing in-flight calls...");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

// ── Main ───────────────────────────────────────────────────────────

async fn summarize(cli: &Cli) -> Result<String, String> {
    let config = build_config(cli)?;
    let text = read_document(cli)?;

    let api_key = std::env::var("OPENROUTER_KEY").unwrap_or_default();
    if api_key.is_empty() && cli.base_url == DEFAULT_CHAT_URL {
        return Err("OPENROUTER_KEY environment variable is not set".to_string());
    }
    let client = ChatClient::with_url(api_key, &cli.base_url)?;
    let generator = ChatGenerator::new(client, &cli.model).with_temperature(cli.temperature);
    let estimator = build_estimator(cli);

    let stop = install_interrupt_handler();
    let progress = CompositeEventHandler::new().with_if(cli.verbose > 0, LoggingHandler);

    let outcome = Summarizer::new(&generator, config)
        .with_estimator(estimator.as_ref())
        .with_event_handler(&progress)
        .with_stop_signal(move || stop.load(Ordering::SeqCst))
        .run(&text)
        .await;

    match outcome {
        Ok(result) => format_output(cli, &result),
        Err(failure) => {
            if let Some(partial) = failure.partial_output() {
                println!("{partial}");
                eprintln!("(partial output above; run did not finish)");
            }
            let elapsed = Duration::from_millis(failure.stats.elapsed_ms);
            Err(format!(
                "{failure} (after {} level(s), {} generation call(s), {elapsed:?})",
                failure.stats.levels.len(),
                failure.stats.generation_calls,
            ))
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match summarize(&cli).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
