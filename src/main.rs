//! RelayProbe — verify a batch of LLM provider API keys.
//!
//! `relayprobe run` probes a list of keys once and prints a masked table;
//! `relayprobe serve` keeps named targets behind a local JSON-RPC socket.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use relayprobe::adapters::Protocol;
use relayprobe::config::Config;
use relayprobe::export;
use relayprobe::presets::{self, MODEL_PRESETS};
use relayprobe::queue::{RunState, Runner, TargetConfig};
use relayprobe::server::Server;
use relayprobe::stats::Stats;
use relayprobe::targets::TargetRegistry;
use relayprobe::{ProbeClient, VerificationStatus};

/// Error text longer than this is cut in the table (the CSV keeps it all).
const TABLE_ERROR_CHARS: usize = 60;

#[derive(Parser)]
#[command(name = "relayprobe", version, about = "Verify LLM provider API keys in bulk")]
struct Cli {
    /// Config file (default: ~/.relayprobe/relayprobe.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every key once and report
    Run(RunArgs),
    /// Serve configured targets over the JSON-RPC socket
    Serve,
    /// List known model ids
    Presets,
}

#[derive(Args)]
struct RunArgs {
    /// Use a target from the config file instead of the flags below
    #[arg(long)]
    target: Option<String>,

    /// google | openai
    #[arg(long, default_value = "google", value_parser = parse_protocol, conflicts_with = "target")]
    protocol: Protocol,

    /// Relay or alternate endpoint
    #[arg(long, conflicts_with = "target")]
    base_url: Option<String>,

    #[arg(long, default_value = "gemini-1.5-flash", conflicts_with = "target")]
    model: String,

    /// One key per line; reads stdin when omitted or "-"
    #[arg(long)]
    keys_file: Option<PathBuf>,

    /// Write the CSV report here
    #[arg(long)]
    export: Option<PathBuf>,

    /// Print the final state as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    Protocol::parse(s).ok_or_else(|| format!("unknown protocol '{}' (expected google or openai)", s))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relayprobe=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if std::env::var("RELAYPROBE_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => run_once(&config, args).await,
        Command::Serve => serve(config).await,
        Command::Presets => {
            for group in MODEL_PRESETS {
                println!("{}", group.vendor);
                for m in group.models {
                    println!("  {:<28} {}", m.value, m.label);
                }
            }
            Ok(())
        }
    }
}

fn read_keys(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read keys file {}", p.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read keys from stdin")?;
            Ok(text)
        }
    }
}

async fn run_once(config: &Config, args: RunArgs) -> Result<()> {
    let (name, target, keys_text) = match &args.target {
        Some(name) => {
            let seed = config
                .target(name)
                .with_context(|| format!("No target named '{}' in config", name))?;
            let keys = if args.keys_file.is_some() {
                read_keys(args.keys_file.as_ref())?
            } else {
                seed.keys_text.clone()
            };
            (seed.name.clone(), seed.config.clone(), keys)
        }
        None => (
            "relayprobe".to_string(),
            TargetConfig::new(args.protocol, args.base_url.clone(), args.model.clone()),
            read_keys(args.keys_file.as_ref())?,
        ),
    };

    if presets::find(&target.model).is_none() {
        warn!(model = %target.model, "Model is not a known preset; sending it as given");
    }

    let client = ProbeClient::new(config.request_timeout).context("Failed to build HTTP client")?;
    let runner = Runner::new(Arc::new(client));
    let handle = runner.start(&target, &keys_text)?;

    let mut rx = handle.subscribe();
    let mut last_completed = 0;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update();
        if state.completed_count != last_completed {
            last_completed = state.completed_count;
            info!(
                target = %name,
                completed = state.completed_count,
                total = state.total_count,
                in_flight = state.in_flight,
                "Progress {}%",
                state.progress()
            );
        }
    }
    let state = handle.wait().await;
    let stats = Stats::from_state(&state);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "target": name,
            "config": target,
            "stats": stats,
            "state": state,
        }))?);
    } else {
        print_table(&state);
        println!(
            "\n{} tested: {} valid, {} invalid, avg latency {} ms",
            stats.tested, stats.valid, stats.invalid, stats.avg_latency_ms
        );
    }

    if let Some(path) = &args.export {
        let path = if path.is_dir() { path.join(export::report_file_name(&name)) } else { path.clone() };
        export::write_report(&path, &state, &target)?;
        info!(path = %path.display(), "📄 Report written");
    }

    if stats.valid == 0 {
        warn!("No valid keys");
    }
    Ok(())
}

fn print_table(state: &RunState) {
    println!("{:>4}  {:<14} {:<8} {:>8}  {}", "#", "KEY", "STATUS", "LATENCY", "ERROR");
    for (i, r) in state.results.iter().enumerate() {
        let error: String = r
            .error
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(TABLE_ERROR_CHARS)
            .collect();
        let marker = match r.status {
            VerificationStatus::Valid => "✅",
            VerificationStatus::Invalid => "❌",
            VerificationStatus::Pending => "…",
        };
        println!(
            "{:>4}  {:<14} {} {:<6} {:>6}ms  {}",
            i + 1,
            r.key_masked,
            marker,
            r.status.as_str(),
            r.latency_ms,
            error
        );
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("🔑 RelayProbe v{}", env!("CARGO_PKG_VERSION"));

    let client = ProbeClient::new(config.request_timeout).context("Failed to build HTTP client")?;
    let runner = Runner::new(Arc::new(client));
    let registry = Arc::new(TargetRegistry::with_targets(runner, config.seeds()));

    let targets = registry.list();
    if targets.iter().all(|t| t.key_count == 0) {
        info!("No keys configured; add them via rp.targets.update");
    }
    info!(targets = targets.len(), "Targets loaded");

    if config.socket_path.as_os_str().is_empty() {
        bail!("Socket path is empty");
    }
    Server::new(config.socket_path, registry).run().await
}
