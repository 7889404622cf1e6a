//! quipsync CLI
//!
//! Mirrors a local markdown directory into a Quip folder.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quipsync::error::Result;
use quipsync::{Destination, Mirror, QuipClient, RetryPolicy, SyncConfig, SyncMode, SyncReport};

#[derive(Parser)]
#[command(name = "quipsync")]
#[command(about = "Sync a local markdown directory to a Quip folder")]
#[command(version)]
struct Cli {
    /// Local directory to sync
    local_path: String,

    /// Quip folder link (or bare folder id)
    folder_url: String,

    /// Delete all documents in the Quip folder before syncing
    #[arg(long)]
    clean: bool,

    /// Quip API access token
    #[arg(long, env = "QUIP_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// API base URL; derived from the folder link when omitted
    #[arg(long, env = "QUIP_API_URL")]
    api_url: Option<String>,

    /// Extension of files to sync
    #[arg(long, default_value = "md")]
    extension: String,

    /// Pause after each API call, in milliseconds
    #[arg(long, default_value = "500")]
    rate_limit_ms: u64,

    /// Attempts per API call on gateway timeouts
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Treat failed image uploads as a failed sync
    #[arg(long)]
    strict_media: bool,

    /// Forget deleted files that never reached Quip
    #[arg(long)]
    prune_orphans: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut destination = match Destination::parse(&cli.folder_url) {
        Ok(destination) => destination,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(api_url) = cli.api_url.as_deref() {
        destination = destination.with_api_url(api_url);
    }

    let token = match cli.token.clone().filter(|t| !t.trim().is_empty()) {
        Some(token) => token,
        None => match prompt_token() {
            Ok(token) if !token.is_empty() => token,
            _ => {
                eprintln!("Error: API token is required");
                return ExitCode::FAILURE;
            }
        },
    };

    match run(&cli, &destination, token) {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Sync aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, destination: &Destination, token: String) -> Result<SyncReport> {
    let local_path = PathBuf::from(shellexpand::tilde(&cli.local_path).to_string());

    let config = SyncConfig::default()
        .with_extension(cli.extension.as_str())
        .with_retry(RetryPolicy::new(cli.max_attempts))
        .with_rate_limit(Duration::from_millis(cli.rate_limit_ms))
        .with_strict_media(cli.strict_media)
        .with_prune_orphans(cli.prune_orphans);

    let client = QuipClient::new(token, destination.api_url.as_str())?;
    let mode = if cli.clean {
        SyncMode::Clean
    } else {
        SyncMode::Incremental
    };

    tracing::info!(
        "Syncing {} to folder {} via {}",
        local_path.display(),
        destination.folder_id,
        destination.api_url
    );
    Mirror::new(client, config).run(&local_path, &destination.folder_id, mode)
}

fn prompt_token() -> io::Result<String> {
    eprint!("Enter your Quip API token: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_summary(report: &SyncReport) {
    println!("Created:   {}", report.created);
    println!("Updated:   {}", report.updated);
    println!("Unchanged: {}", report.unchanged);
    println!("Failed:    {}", report.failed);
    if report.unreadable > 0 {
        println!("Unreadable: {}", report.unreadable);
    }
    if report.skipped > 0 {
        println!(
            "Skipped:   {} ({} directories)",
            report.skipped, report.skipped_dirs
        );
    }
    if let Some(cleared) = &report.cleared {
        println!("Cleared:   {} documents", cleared.documents_deleted);
    } else {
        println!("Deleted:   {}", report.deletions.deleted);
    }
    if report.images_uploaded + report.images_missing + report.images_failed > 0 {
        println!(
            "Images:    {} uploaded, {} missing, {} failed",
            report.images_uploaded, report.images_missing, report.images_failed
        );
    }
}
