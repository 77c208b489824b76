//! Provider Strategies
//!
//! Per-provider login and consent behaviour behind one [`ProviderStrategy`]
//! interface. [`Provider`] is the closed set of supported providers.

pub mod atlassian;
pub mod github;
pub mod google;
pub mod microsoft;

use crate::error::{FlowEngineError, FlowResult};
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{Credentials, Locator, LocatorSpec, ProviderKind, TextMatch};
use crate::flow::page::BrowserPage;
use crate::two_factor::{ChallengeMatcher, TwoFactorHandler};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

pub use atlassian::{AtlassianLocators, AtlassianStrategy};
pub use github::{GitHubLocators, GitHubStrategy};
pub use google::{GoogleLocators, GoogleStrategy};
pub use microsoft::{MicrosoftLocators, MicrosoftStrategy};

/// Words that mark a control as an authorize/consent control
pub const AUTHORIZE_WORDS: &[&str] = &["authorize", "allow", "approve", "grant", "accept", "continue"];

/// Words that disqualify a control from being an authorize control
pub const DENY_WORDS: &[&str] = &["cancel", "deny", "reject"];

/// Whether credentials go in on one form or across two screens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginSteps {
    /// Username and password on one form
    SingleStep,
    /// Username, then "Next", then password
    TwoStep,
}

/// Provider-specific login and consent behaviour
#[async_trait]
pub trait ProviderStrategy: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn login_steps(&self) -> LoginSteps;

    /// Element whose presence means the login form is showing
    fn login_field(&self) -> &LocatorSpec;

    /// URL patterns of this provider's secondary challenge pages
    fn challenge_matcher(&self) -> ChallengeMatcher;

    /// Controls that dismiss a secondary challenge
    fn skip_controls(&self) -> LocatorSpec;

    /// Handler used when the request does not name one
    fn default_two_factor(&self) -> TwoFactorHandler {
        TwoFactorHandler::skip(self.challenge_matcher(), self.skip_controls())
    }

    /// Whether `url` is still part of the authorization flow started at `authorization_url`
    fn is_on_authorization_surface(&self, url: &str, authorization_url: &str) -> bool {
        same_host_oauth_path(url, authorization_url)
    }

    /// Click the control that advances a login screen
    async fn click_next_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()>;

    /// Enter credentials and submit them
    async fn handle_login_flow(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
        credentials: &Credentials,
    ) -> FlowResult<()>;

    /// Get through the consent screen(s), including any provider-specific sub-steps
    async fn handle_authorization(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()>;

    /// Locate and click the authorize/allow control
    async fn click_authorize_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()>;
}

/// Same host as the authorization URL, on an OAuth-looking path
fn same_host_oauth_path(url: &str, authorization_url: &str) -> bool {
    let (Ok(current), Ok(authorize)) = (Url::parse(url), Url::parse(authorization_url)) else {
        return false;
    };
    if current.host_str() != authorize.host_str() {
        return false;
    }
    let path = current.path().to_lowercase();
    ["oauth", "authorize", "consent"]
        .iter()
        .any(|fragment| path.contains(fragment))
}

/// Selected provider
#[derive(Debug, Clone)]
pub enum Provider {
    Google(GoogleStrategy),
    Microsoft(MicrosoftStrategy),
    GitHub(GitHubStrategy),
    Atlassian(AtlassianStrategy),
}

impl Provider {
    /// Provider with its built-in locators
    pub fn from_kind(kind: ProviderKind) -> Self {
        Self::from_config(kind, &ProviderConfig::default())
    }

    /// Provider with locators taken from configuration
    pub fn from_config(kind: ProviderKind, config: &ProviderConfig) -> Self {
        match kind {
            ProviderKind::Google => Provider::Google(GoogleStrategy::new(config.google.clone())),
            ProviderKind::Microsoft => {
                Provider::Microsoft(MicrosoftStrategy::new(config.microsoft.clone()))
            }
            ProviderKind::GitHub => Provider::GitHub(GitHubStrategy::new(config.github.clone())),
            ProviderKind::Atlassian => {
                let mut strategy = AtlassianStrategy::new(config.atlassian.clone());
                if let Some(site) = &config.atlassian_site {
                    strategy = strategy.with_site(site.clone());
                }
                Provider::Atlassian(strategy)
            }
        }
    }

    fn strategy(&self) -> &dyn ProviderStrategy {
        match self {
            Provider::Google(strategy) => strategy,
            Provider::Microsoft(strategy) => strategy,
            Provider::GitHub(strategy) => strategy,
            Provider::Atlassian(strategy) => strategy,
        }
    }
}

#[async_trait]
impl ProviderStrategy for Provider {
    fn kind(&self) -> ProviderKind {
        self.strategy().kind()
    }

    fn login_steps(&self) -> LoginSteps {
        self.strategy().login_steps()
    }

    fn login_field(&self) -> &LocatorSpec {
        self.strategy().login_field()
    }

    fn challenge_matcher(&self) -> ChallengeMatcher {
        self.strategy().challenge_matcher()
    }

    fn skip_controls(&self) -> LocatorSpec {
        self.strategy().skip_controls()
    }

    fn default_two_factor(&self) -> TwoFactorHandler {
        self.strategy().default_two_factor()
    }

    fn is_on_authorization_surface(&self, url: &str, authorization_url: &str) -> bool {
        self.strategy().is_on_authorization_surface(url, authorization_url)
    }

    async fn click_next_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        self.strategy().click_next_button(page, engine).await
    }

    async fn handle_login_flow(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
        credentials: &Credentials,
    ) -> FlowResult<()> {
        self.strategy().handle_login_flow(page, engine, credentials).await
    }

    async fn handle_authorization(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        self.strategy().handle_authorization(page, engine).await
    }

    async fn click_authorize_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        self.strategy().click_authorize_button(page, engine).await
    }
}

/// Locator overrides for every provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub google: GoogleLocators,
    pub microsoft: MicrosoftLocators,
    pub github: GitHubLocators,
    pub atlassian: AtlassianLocators,
    /// Atlassian site to pick on the consent screen
    pub atlassian_site: Option<String>,
}

/// Candidate matching a visible authorize/allow control under `selector`
pub fn authorize_locator(selector: &str) -> Locator {
    Locator::with_text(
        selector,
        TextMatch::ContainsAny(AUTHORIZE_WORDS.iter().map(|w| w.to_string()).collect()),
    )
    .excluding(DENY_WORDS)
}

/// Text candidate that accepts any of `words`
pub(crate) fn text_any(words: &[&str]) -> TextMatch {
    TextMatch::ContainsAny(words.iter().map(|w| w.to_string()).collect())
}

/// Type the username, mapping lookup failures to a login failure
pub(crate) async fn enter_username(
    page: &dyn BrowserPage,
    engine: &LocatorEngine,
    spec: &LocatorSpec,
    kind: ProviderKind,
    username: &str,
) -> FlowResult<()> {
    info!("Entering username for {}", kind);
    engine
        .fill(page, spec, username)
        .await
        .map_err(|e| FlowEngineError::login_failed(kind, format!("username entry failed: {}", e)))
}

/// Type the password, mapping lookup failures to a login failure
pub(crate) async fn enter_password(
    page: &dyn BrowserPage,
    engine: &LocatorEngine,
    spec: &LocatorSpec,
    kind: ProviderKind,
    credentials: &Credentials,
) -> FlowResult<()> {
    info!("Entering password for {}", kind);
    engine
        .fill(page, spec, credentials.password.expose_secret())
        .await
        .map_err(|e| FlowEngineError::login_failed(kind, format!("password entry failed: {}", e)))
}

/// Click a login control, mapping lookup failures to a login failure
pub(crate) async fn click_login_control(
    page: &dyn BrowserPage,
    engine: &LocatorEngine,
    spec: &LocatorSpec,
    kind: ProviderKind,
) -> FlowResult<()> {
    engine
        .click(page, spec)
        .await
        .map_err(|e| FlowEngineError::login_failed(kind, format!("{}: {}", spec.description, e)))
}

/// Click the consent control, then keep clicking while more consent controls
/// show up on the same host (per-scope buttons, "unverified app" interstitials).
/// Returns the number of clicks.
pub(crate) async fn click_through_consent(
    page: &dyn BrowserPage,
    engine: &LocatorEngine,
    spec: &LocatorSpec,
    max_clicks: usize,
) -> FlowResult<usize> {
    let host = |url: &str| Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
    let origin = host(&page.current_url().await.unwrap_or_default());

    engine
        .click(page, spec)
        .await
        .map_err(|e| FlowEngineError::authorization_failed(format!("{}: {}", spec.description, e)))?;
    let mut clicks = 1;

    while clicks < max_clicks {
        let current = host(&page.current_url().await.unwrap_or_default());
        if current != origin {
            break;
        }
        if !engine.click_if_present(page, spec).await? {
            break;
        }
        clicks += 1;
    }

    debug!("Clicked {} {} time(s)", spec.description, clicks);
    Ok(clicks)
}
