//! OAuth Runner Binary Entry Point

use clap::Parser;
use oauth_runner::{run_until, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received, abandoning flow"),
            Err(e) => {
                tracing::warn!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    let code = run_until(args, shutdown).await?;
    println!("{}", code.code);

    Ok(())
}
