//! Parley CLI - conversation intelligence pipeline

use clap::Parser;
use parley::cli::Cli;
use parley::ParleyBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let parley = ParleyBuilder::new().build().await?;
    parley.database().initialize().await?;

    parley::cli::run(cli, parley).await?;

    Ok(())
}
