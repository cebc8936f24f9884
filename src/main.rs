//! CLI entry point for the mcdl downloader.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use mcdl_core::download::{choose_file_name, resolve_unique_path};
use mcdl_core::{
    DownloadContractor, DownloadError, HttpClient, HttpConfig, Job, JobOutcome, RetryPolicy,
    probe,
};
use tracing::{debug, info, warn};

mod cli;
mod config;
mod progress;

use cli::Args;
use config::{apply_config_defaults, load_default_file_config, parse_cli_with_sources, parse_retry_on};
use progress::ProgressDisplay;

/// Exit status after Ctrl-C, as shells report SIGINT.
const EXIT_ABORTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, cli_sources) = parse_cli_with_sources();
    init_tracing(&args);
    debug!(?args, "CLI arguments parsed");

    let outcome = async {
        let loaded = load_default_file_config()?;
        if loaded.config.is_some() {
            debug!(path = ?loaded.path, "loaded config file");
        }
        let args = apply_config_defaults(args, &cli_sources, loaded.config.as_ref());
        run(args).await
    }
    .await;

    match outcome {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(args: &Args) {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<DownloadError>() {
        Some(download_err) => eprintln!("Error: {}: {err:#}", download_err.kind()),
        None => eprintln!("Error: {err:#}"),
    }
}

fn http_config_from_args(args: &Args) -> HttpConfig {
    let mut config = HttpConfig::default()
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout));
    if let Some(proxy) = &args.proxy {
        config = config.with_proxy(proxy.as_str());
    }
    if let Some(user_agent) = &args.user_agent {
        config = config.with_user_agent(user_agent.as_str());
    }
    for header in &args.headers {
        config.add_header(header.as_str());
    }
    config
}

fn retry_policy_from_args(args: &Args) -> Result<RetryPolicy> {
    let retryable = parse_retry_on(&args.retry_on).context("Invalid --retry-on value")?;
    let max_retries = (args.max_retries > 0).then_some(args.max_retries);
    Ok(RetryPolicy::default()
        .with_retryable(retryable)
        .with_max_retries(max_retries))
}

async fn run(args: Args) -> Result<ExitCode> {
    let policy = retry_policy_from_args(&args)?;
    let http_config = http_config_from_args(&args);
    http_config.validate()?;
    let client = HttpClient::new(&http_config)?;

    info!(url = %args.url, "probing range support");
    let info = probe(&client, &args.url).await?;

    let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;
    let file_name = match &args.file_name {
        Some(name) => choose_file_name(&args.url, Some(name.as_str())),
        None => choose_file_name(&args.url, info.suggested_file_name.as_deref()),
    };
    let destination = resolve_unique_path(&output_dir, &file_name);

    let mut builder = Job::builder(args.url.as_str(), destination.clone(), info.total_size)
        .connections(usize::from(args.connections))
        .http_config(http_config);
    if let Some(granularity) = args.granularity {
        builder = builder.granularity(granularity);
    }
    let job = builder.build()?;

    info!(
        destination = %destination.display(),
        total = info.total_size,
        connections = job.connections(),
        granularity = job.granularity(),
        "starting download"
    );

    let contractor = DownloadContractor::new(policy);
    let abort = contractor.abort_handle();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping connections");
            abort.abort();
        }
    });

    let show_progress = progress::should_show_progress(
        io::stderr().is_terminal(),
        args.quiet,
        args.no_progress,
        progress::is_dumb_terminal(),
    );
    let display = ProgressDisplay::new(show_progress, info.total_size);
    let result = contractor.start(&job, display.heartbeat_callback()).await;
    display.finish();
    signal.abort();

    match result? {
        JobOutcome::Completed { bytes } => {
            info!(bytes, destination = %destination.display(), "download complete");
            Ok(ExitCode::SUCCESS)
        }
        JobOutcome::Aborted { bytes_done } => {
            warn!(
                bytes_done,
                total = info.total_size,
                destination = %destination.display(),
                "download aborted; partial file left in place"
            );
            Ok(ExitCode::from(EXIT_ABORTED))
        }
    }
}
