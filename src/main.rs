mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};
use plugin_mirror::{Destination, TransferConfig};

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("plugin_mirror=info,pmirror=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => TransferConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => TransferConfig::default(),
    };
    if let Some(limit) = args.rate_limit {
        config.rate_limit = Some(limit);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.proxy.is_some() {
        config.proxy = args.proxy.clone();
    }
    config.show_progress = !args.no_progress;
    config.validate()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match args.command {
            Command::Fetch {
                url,
                dir,
                name,
                output,
                overwrite,
                headers,
                params,
            } => {
                let destination = match output {
                    Some(path) => Destination::File(path),
                    None => Destination::Directory {
                        dir,
                        default_name: name,
                    },
                };
                commands::run_fetch(config, url, destination, overwrite, headers, params).await
            }
            Command::Prefetch { tasks_file, dir } => {
                commands::run_prefetch(config, tasks_file, dir).await
            }
            Command::Plan { size, segment_size } => {
                commands::run_plan(size, segment_size.unwrap_or(config.segment_size));
                Ok(())
            }
            Command::Digest { file } => commands::run_digest(file).await,
        }
    })
}
