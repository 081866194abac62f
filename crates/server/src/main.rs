use std::{io, path::PathBuf};

use anyhow::Result;
use clap::Parser;
use convlog_server::{
    config::{self, CliOptions},
    run_http_server,
};
use tracing_subscriber::EnvFilter;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "convlog-server", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Host to bind
    #[arg(long = "host", value_name = "HOST")]
    host: Option<String>,

    /// Port to bind
    #[arg(long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// NDJSON file records are appended to
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// TOML file with a [server] table
    #[arg(long = "config", value_name = "FILE")]
    config_path: Option<PathBuf>,

    /// Restrict CORS to these origins (repeatable)
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    cors_origins: Vec<String>,

    /// Maximum accepted request body size in bytes
    #[arg(long = "max-body-bytes", value_name = "BYTES")]
    max_body_bytes: Option<usize>,

    /// Optional log filter (e.g. info, debug)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.log_level.as_deref());
    tracing::info!(
        "{}",
        convlog_build_info::banner("convlog-server", SERVER_VERSION)
    );
    tracing::debug!(
        git = convlog_build_info::git_label(),
        built = convlog_build_info::build_timestamp(),
        "build metadata"
    );

    let cli = CliOptions {
        host: args.host,
        port: args.port,
        log_file: args.log_file,
        cors_origins: args.cors_origins,
        max_body_bytes: args.max_body_bytes,
    };

    let file_config = config::load_file_config(args.config_path.as_deref())?;
    let server_config = config::resolve(&cli, file_config.as_ref(), config::default_log_file())?;

    run_http_server(server_config).await
}

fn init_tracing(level: Option<&str>) {
    let (filter, rejected) = build_filter(level);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    let _ = builder.try_init();

    if let Some(err) = rejected {
        tracing::warn!("ignoring invalid --log-level: {err}");
    }
}

/// Resolves `--log-level`, then `RUST_LOG`, then `info`. A rejected
/// `--log-level` directive is handed back so it can be reported once the
/// subscriber is installed.
fn build_filter(level: Option<&str>) -> (EnvFilter, Option<String>) {
    let mut rejected = None;
    if let Some(directive) = level {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return (filter, None),
            Err(err) => rejected = Some(format!("{directive:?}: {err}")),
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    (filter, rejected)
}
