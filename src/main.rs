//! `datalake` -- move files and strings in and out of the data lake.
//!
//! Logs go to stderr so `download-string` output can be piped.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use datalake::config::{self, Config};
use datalake::{DataLake, Lake};
use tracing::{debug, info};

/// Command-line arguments for the data lake client.
#[derive(Parser, Debug)]
#[command(
    name = "datalake",
    version,
    about = "Upload and download data lake objects"
)]
struct Cli {
    /// Path to the YAML configuration file (defaults apply when omitted).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bucket to use instead of the configured default.
    #[arg(short, long, global = true)]
    bucket: Option<String>,

    /// Override the storage backend (local, memory, gcp, aws).
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Print Prometheus metrics to stderr before exiting.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file.
    Upload {
        bucket_path: String,
        local_path: PathBuf,
    },
    /// Upload a string ("-" reads standard input).
    UploadString { bucket_path: String, content: String },
    /// Download an object to a local file.
    Download {
        bucket_path: String,
        destination: PathBuf,
    },
    /// Print an object to standard output.
    DownloadString { bucket_path: String },
    /// List bucket paths under a prefix.
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
}

fn load(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)
            .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(ref backend) = cli.backend {
        config.storage.backend = backend.clone();
    }
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(lake: &Lake, command: Command, bucket: Option<&str>) -> anyhow::Result<()> {
    match command {
        Command::Upload {
            bucket_path,
            local_path,
        } => {
            lake.upload(&bucket_path, &local_path, bucket).await?;
        }
        Command::UploadString {
            bucket_path,
            content,
        } => {
            let content = if content == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                content
            };
            lake.upload_string(&bucket_path, &content, bucket).await?;
        }
        Command::Download {
            bucket_path,
            destination,
        } => {
            lake.download(&bucket_path, &destination, bucket).await?;
            info!("Wrote {}", destination.display());
        }
        Command::DownloadString { bucket_path } => {
            let content = lake.download_string(&bucket_path, bucket).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(content.as_bytes())?;
            stdout.flush()?;
        }
        Command::Ls { prefix } => {
            let paths = lake.list(&prefix, bucket).await?;
            let mut stdout = std::io::stdout().lock();
            for path in paths {
                writeln!(stdout, "{path}")?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load(&cli)?;
    init_tracing(&config);
    debug!(
        "Configuration: backend={} bucket={} root='{}'",
        config.storage.backend, config.lake.bucket, config.lake.root_path
    );

    let metrics_enabled = cli.metrics || config.observability.metrics;
    if metrics_enabled {
        datalake::metrics::init_metrics();
        datalake::metrics::describe_metrics();
    }

    let lake = Lake::from_config(&config).await?;
    let result = run(&lake, cli.command, cli.bucket.as_deref()).await;

    if metrics_enabled {
        if let Some(text) = datalake::metrics::render() {
            eprint!("{text}");
        }
    }

    result
}
