use anyhow::Result;
use captionpipe_core::{CachePolicy, ErrorCode};
use captionpipe_local::{PipelineConfig, TranscriptService};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod envelope;

#[derive(Parser, Debug)]
#[command(name = "captionpipe")]
#[command(about = "Fetch normalized YouTube transcripts (JSON on stdout, logs on stderr)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the transcript for a video id or URL.
    Fetch(FetchCmd),
    /// Report egress / tool / cache configuration (no network calls).
    Status,
    /// Count entries and bytes in the transcript cache.
    CacheStats,
}

#[derive(clap::Args, Debug)]
struct FetchCmd {
    /// Video id, or a watch / youtu.be / shorts / embed URL.
    input: String,
    /// Cookie header value for sessions that need consent. Overrides CAPTIONPIPE_COOKIES.
    #[arg(long, env = "CAPTIONPIPE_REQUEST_COOKIES", hide_env_values = true)]
    cookies: Option<String>,
    /// Neither read nor write the cache.
    #[arg(long)]
    no_cache: bool,
    /// Skip the cache read but store the fresh result.
    #[arg(long, conflicts_with = "no_cache")]
    refresh: bool,
    /// Pretty-print JSON.
    #[arg(long)]
    pretty: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "captionpipe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(v: &serde_json::Value, pretty: bool) -> Result<()> {
    let s = if pretty {
        serde_json::to_string_pretty(v)?
    } else {
        serde_json::to_string(v)?
    };
    println!("{s}");
    Ok(())
}

fn service_or_report(kind: &str, t0: Instant) -> Result<Option<TranscriptService>> {
    match PipelineConfig::from_env().and_then(TranscriptService::new) {
        Ok(svc) => Ok(Some(svc)),
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            let mut v = envelope::failure(&e);
            if e.code() != ErrorCode::NotConfigured {
                v["error"] = envelope::error_obj(ErrorCode::NotConfigured, &e);
            }
            envelope::add_envelope_fields(&mut v, kind, t0.elapsed().as_millis());
            print_json(&v, false)?;
            Ok(None)
        }
    }
}

async fn run_fetch(args: FetchCmd) -> Result<ExitCode> {
    let t0 = Instant::now();
    let Some(svc) = service_or_report("fetch", t0)? else {
        return Ok(ExitCode::from(2));
    };
    let policy = CachePolicy {
        read: !args.no_cache && !args.refresh,
        write: !args.no_cache,
    };

    let (mut v, code) = match svc
        .fetch_detailed(&args.input, args.cookies.as_deref(), policy)
        .await
    {
        Ok(fetched) => (
            serde_json::json!({
                "ok": true,
                "source": fetched.source,
                "strategy": fetched.strategy,
                "transcript": fetched.transcript,
            }),
            ExitCode::SUCCESS,
        ),
        Err(e) => (envelope::failure(&e), ExitCode::FAILURE),
    };
    envelope::add_envelope_fields(&mut v, "fetch", t0.elapsed().as_millis());
    print_json(&v, args.pretty)?;
    Ok(code)
}

async fn run_status() -> Result<ExitCode> {
    let t0 = Instant::now();
    let Some(svc) = service_or_report("status", t0)? else {
        return Ok(ExitCode::from(2));
    };
    let mut v = serde_json::json!({
        "ok": true,
        "status": svc.status(),
    });
    envelope::add_envelope_fields(&mut v, "status", t0.elapsed().as_millis());
    print_json(&v, false)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_cache_stats() -> Result<ExitCode> {
    let t0 = Instant::now();
    let Some(svc) = service_or_report("cache_stats", t0)? else {
        return Ok(ExitCode::from(2));
    };
    let (mut v, code) = match svc.cache_stats().await {
        Ok(stats) => (
            serde_json::json!({
                "ok": true,
                "cache_enabled": stats.is_some(),
                "stats": stats,
            }),
            ExitCode::SUCCESS,
        ),
        Err(e) => (envelope::failure(&e), ExitCode::FAILURE),
    };
    envelope::add_envelope_fields(&mut v, "cache_stats", t0.elapsed().as_millis());
    print_json(&v, false)?;
    Ok(code)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch(args) => run_fetch(args).await,
        Commands::Status => run_status().await,
        Commands::CacheStats => run_cache_stats().await,
    }
}
