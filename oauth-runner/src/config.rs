//! Runner configuration: a TOML file with CLI overrides

use crate::logging::LoggingConfig;
use crate::mailbox::DirectoryMailbox;
use crate::{Args, RunnerError};
use oauth_engine::{
    BrowserOptions, Credentials, FlowRequest, FlowTimeouts, MailboxOracle, Provider,
    ProviderConfig, ProviderKind, RetryPolicy, SecretString, TwoFactorHandler,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable read for the password when none is configured
pub const DEFAULT_PASSWORD_ENV: &str = "OAUTH_PASSWORD";

/// Top-level runner configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub browser: BrowserOptions,
    pub flow: FlowConfig,
    pub logging: LoggingConfig,
    pub providers: ProviderConfig,
    /// Directory of saved messages used to answer mailbox-code challenges
    pub mailbox_dir: Option<PathBuf>,
    /// Directory for milestone screenshots
    pub screenshot_dir: Option<PathBuf>,
}

/// Which flow to run and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub provider: Option<ProviderKind>,
    pub authorization_url: Option<String>,
    pub state: Option<String>,
    /// Redirect URI path or absolute prefix
    pub redirect: String,
    pub username: Option<String>,
    /// Environment variable holding the password
    pub password_env: String,
    pub timeouts: FlowTimeouts,
    pub retry: RetryPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            provider: None,
            authorization_url: None,
            state: None,
            redirect: "/callback".to_string(),
            username: None,
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
            timeouts: FlowTimeouts::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RunnerConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RunnerError::Config(format!("Cannot read {:?}: {}", path, e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, RunnerError> {
        Ok(toml::from_str(raw)?)
    }

    /// Command-line flags win over file values
    pub fn apply_args(&mut self, args: &Args) -> Result<(), RunnerError> {
        if let Some(provider) = &args.provider {
            self.flow.provider = Some(provider.parse()?);
        }
        if let Some(url) = &args.auth_url {
            self.flow.authorization_url = Some(url.clone());
        }
        if let Some(state) = &args.state {
            self.flow.state = Some(state.clone());
        }
        if let Some(redirect) = &args.redirect {
            self.flow.redirect = redirect.clone();
        }
        if let Some(username) = &args.username {
            self.flow.username = Some(username.clone());
        }
        if let Some(password_env) = &args.password_env {
            self.flow.password_env = password_env.clone();
        }
        if let Some(site) = &args.atlassian_site {
            self.providers.atlassian_site = Some(site.clone());
        }
        if let Some(dir) = &args.mailbox_dir {
            self.mailbox_dir = Some(dir.clone());
        }
        if let Some(dir) = &args.screenshot_dir {
            self.screenshot_dir = Some(dir.clone());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.headed {
            self.browser.headless = false;
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        Ok(())
    }

    /// Read the password from the configured environment variable
    pub fn password(&self) -> Result<SecretString, RunnerError> {
        let value = std::env::var(&self.flow.password_env).map_err(|_| {
            RunnerError::Config(format!(
                "Password environment variable {} is not set",
                self.flow.password_env
            ))
        })?;
        Ok(SecretString::new(value.into_boxed_str()))
    }

    /// Assemble the flow request. `password` is passed in so callers decide where it comes from.
    pub fn build_request(&self, password: SecretString) -> Result<FlowRequest, RunnerError> {
        let flow = &self.flow;
        let kind = flow
            .provider
            .ok_or_else(|| RunnerError::Config("No provider configured".to_string()))?;
        let authorization_url = flow
            .authorization_url
            .clone()
            .ok_or_else(|| RunnerError::Config("No authorization URL configured".to_string()))?;
        let username = flow
            .username
            .clone()
            .ok_or_else(|| RunnerError::Config("No username configured".to_string()))?;

        let state = match &flow.state {
            Some(state) => state.clone(),
            None => state_from_url(&authorization_url)?,
        };

        let provider = Provider::from_config(kind, &self.providers);
        let credentials = Credentials {
            username,
            password,
        };

        let mut request = FlowRequest::new(authorization_url, state, credentials, flow.redirect.clone(), provider)
            .with_timeouts(flow.timeouts.clone());

        if let Some(dir) = &self.mailbox_dir {
            let oracle: Arc<dyn MailboxOracle> = Arc::new(DirectoryMailbox::new(dir));
            if let Some(handler) = mailbox_handler(&request.provider, oracle) {
                request = request.with_two_factor(handler);
            }
        }

        request.validate()?;
        Ok(request)
    }
}

/// Mailbox-code handler for providers that send codes by email
pub fn mailbox_handler(provider: &Provider, oracle: Arc<dyn MailboxOracle>) -> Option<TwoFactorHandler> {
    match provider {
        Provider::GitHub(strategy) => Some(strategy.device_verification_handler(oracle)),
        Provider::Atlassian(strategy) => Some(strategy.mfa_handler(oracle)),
        Provider::Google(_) | Provider::Microsoft(_) => None,
    }
}

/// The `state` query parameter of an authorization URL
fn state_from_url(authorization_url: &str) -> Result<String, RunnerError> {
    let url = url::Url::parse(authorization_url)
        .map_err(|e| RunnerError::Config(format!("Invalid authorization URL: {}", e)))?;
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| {
            RunnerError::Config("No state configured and the authorization URL carries none".to_string())
        })
}
