//! OAuth Runner Library
//!
//! Launches Chromium, runs one authorization flow described by a TOML file and
//! command-line flags, and returns the authorization code.

pub mod config;
pub mod logging;
pub mod mailbox;

pub use config::{RunnerConfig, DEFAULT_PASSWORD_ENV};
pub use logging::{init_logging, LoggingConfig};
pub use mailbox::DirectoryMailbox;

use clap::Parser;
use oauth_engine::{
    AuthorizationCode, AuthorizationResult, BrowserManager, DirectoryScreenshotSink, FlowEngineError,
    FlowOrchestrator, ProviderStrategy,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// OAuth Runner - drive one OAuth login and consent in a real browser
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Identity provider (google, microsoft, github, atlassian)
    #[arg(long)]
    pub provider: Option<String>,

    /// Authorization URL issued by the client application
    #[arg(long)]
    pub auth_url: Option<String>,

    /// Expected state nonce, taken from the authorization URL when omitted
    #[arg(long)]
    pub state: Option<String>,

    /// Redirect URI path or absolute prefix
    #[arg(long)]
    pub redirect: Option<String>,

    /// Account username or email
    #[arg(long)]
    pub username: Option<String>,

    /// Environment variable holding the password
    #[arg(long)]
    pub password_env: Option<String>,

    /// Atlassian site to pick on the consent screen
    #[arg(long)]
    pub atlassian_site: Option<String>,

    /// Directory of saved messages for mailbox-code challenges
    #[arg(long)]
    pub mailbox_dir: Option<PathBuf>,

    /// Directory for milestone screenshots
    #[arg(long)]
    pub screenshot_dir: Option<PathBuf>,

    /// Log level override
    #[arg(long)]
    pub log_level: Option<String>,

    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,

    /// Emit JSON formatted logs
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,
}

/// Runner errors
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error(transparent)]
    Flow(#[from] FlowEngineError),

    #[error("Flow interrupted by shutdown")]
    Interrupted,
}

/// Resolve configuration from `args`, run the flow and close the browser
pub async fn run(args: Args) -> Result<AuthorizationCode, RunnerError> {
    run_until(args, std::future::pending()).await
}

/// Like [`run`], but abandons the flow once `shutdown` resolves. The browser is
/// closed and its profile removed on both paths.
pub async fn run_until<S>(args: Args, shutdown: S) -> Result<AuthorizationCode, RunnerError>
where
    S: Future<Output = ()>,
{
    let mut config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    config.apply_args(&args)?;

    let _guard = init_logging(&config.logging)?;

    let request = config.build_request(config.password()?)?;
    info!(
        "Running {} flow for {} (flow {})",
        request.provider.kind(),
        request.credentials.username,
        request.id
    );

    if let Some(dir) = &config.screenshot_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RunnerError::Config(format!("Cannot create screenshot directory {:?}: {}", dir, e)))?;
    }

    let session = Arc::new(BrowserManager::new().launch(config.browser.clone()).await?);

    let mut orchestrator =
        FlowOrchestrator::new(session.clone()).with_retry_policy(config.flow.retry.clone());
    if let Some(dir) = &config.screenshot_dir {
        orchestrator = orchestrator.with_screenshots(Arc::new(DirectoryScreenshotSink::new(dir)));
    }

    let result = flow_until(orchestrator.run(&request), shutdown).await;
    drop(orchestrator);

    match Arc::try_unwrap(session) {
        Ok(session) => session.close().await?,
        Err(_) => warn!("Browser session still shared, leaving it to shut down on drop"),
    }

    result
}

async fn flow_until<F, S>(flow: F, shutdown: S) -> Result<AuthorizationCode, RunnerError>
where
    F: Future<Output = AuthorizationResult>,
    S: Future<Output = ()>,
{
    tokio::select! {
        result = flow => Ok(result?),
        _ = shutdown => {
            warn!("Shutdown requested, abandoning flow");
            Err(RunnerError::Interrupted)
        }
    }
}
