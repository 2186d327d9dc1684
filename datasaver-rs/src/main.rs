//! datasaver - scheduled database backups with GFS retention.

mod cli;
mod error;
mod routes;
mod services;
mod shutdown;
mod state;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::Parser;
use datasaver_core::{utils, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let config = Config::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting datasaver v{}", env!("CARGO_PKG_VERSION"));

    cli::execute(args.command, config).await
}
