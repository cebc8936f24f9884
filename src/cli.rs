//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use mcdl_core::download::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_CONNECTIONS, READ_TIMEOUT_SECS};

/// Download one file over several HTTP range connections at once.
///
/// The server must honor `Range` requests. The destination is preallocated
/// and every connection writes its ranges straight into it.
#[derive(Parser, Debug)]
#[command(name = "mcdl")]
#[command(author, version, about)]
pub struct Args {
    /// URL of the resource to download (http or https)
    pub url: String,

    /// Directory the file is saved into (default: current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Name of the saved file (default: from the server or the URL)
    #[arg(short = 'f', long)]
    pub file_name: Option<String>,

    /// Number of parallel connections (1-50)
    #[arg(short = 'n', long, default_value_t = DEFAULT_CONNECTIONS as u8, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub connections: u8,

    /// Size of each queued range in bytes (default: size / connections)
    #[arg(short = 'g', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub granularity: Option<u64>,

    /// Proxy URL for every request (e.g. http://127.0.0.1:3128)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Extra request header "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Connect timeout in seconds (1-3600)
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: u64,

    /// Read timeout in seconds (1-3600)
    #[arg(long, default_value_t = READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: u64,

    /// User-Agent header value
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Comma-separated transport failures that are retried
    /// (timeout, connection-refused, connection-reset, connect, stream-broken, other)
    #[arg(long, default_value = "timeout,connection-refused")]
    pub retry_on: String,

    /// Maximum retries per range (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_retries: u32,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
