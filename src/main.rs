mod bot;
mod chunker;
mod config;
mod document;
mod embedding;
mod error;
mod llm;
mod openai;
mod retriever;
mod session;
mod utils;
mod vector_db;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bot::QaBot;
use config::{Cli, ConfigSource, Settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Library chatter stays at warn/error unless RUST_LOG asks for it.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{level},lopdf=error,reqwest=warn,hyper=warn")))
        .context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let source = ConfigSource::from_process(utils::expand_home(&cli.env_file))
        .context("failed to read configuration")?;
    let settings = Settings::resolve(&cli, &source).context("invalid configuration")?;

    let session = QaBot::start(&settings)
        .await
        .with_context(|| format!("failed to prepare {}", settings.pdf_path.display()))?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    session.run(stdin.lock(), stdout.lock()).await?;

    Ok(())
}
