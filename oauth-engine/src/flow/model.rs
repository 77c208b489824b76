//! Flow Data Models
//!
//! Core data structures shared by the orchestrator, the provider strategies and
//! the locator engine.

use crate::error::{FlowEngineError, FlowResult};
use crate::provider::{Provider, ProviderStrategy};
use crate::two_factor::TwoFactorHandler;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

/// Supported OAuth identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Microsoft,
    GitHub,
    Atlassian,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Google => "google",
            ProviderKind::Microsoft => "microsoft",
            ProviderKind::GitHub => "github",
            ProviderKind::Atlassian => "atlassian",
        };
        f.write_str(name)
    }
}

impl FromStr for ProviderKind {
    type Err = FlowEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "microsoft" | "azure" | "azuread" => Ok(ProviderKind::Microsoft),
            "github" => Ok(ProviderKind::GitHub),
            "atlassian" | "jira" | "confluence" => Ok(ProviderKind::Atlassian),
            other => Err(FlowEngineError::Configuration(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Login credentials for the provider account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into().into_boxed_str()),
        }
    }
}

/// Timeouts and settle periods for one flow, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTimeouts {
    /// Wait for the authorization page to finish loading
    pub page_load_ms: u64,
    /// Pause before probing for the login form
    pub login_probe_delay_ms: u64,
    /// Bound on the login form probe
    pub login_check_ms: u64,
    /// Bound on a single element lookup
    pub lookup_ms: u64,
    /// Settle period after every successful click
    pub settle_ms: u64,
    /// Settle period after submitting credentials or a verification code
    pub after_login_ms: u64,
    /// How long to wait for the redirect to the callback
    pub callback_timeout_ms: u64,
    /// Interval between callback checks
    pub callback_poll_ms: u64,
    /// Overall deadline for the whole flow
    pub flow_deadline_ms: u64,
}

impl Default for FlowTimeouts {
    fn default() -> Self {
        Self {
            page_load_ms: 15_000,
            login_probe_delay_ms: 2_000,
            login_check_ms: 3_000,
            lookup_ms: 2_000,
            settle_ms: 2_000,
            after_login_ms: 3_000,
            callback_timeout_ms: 60_000,
            callback_poll_ms: 500,
            flow_deadline_ms: 300_000,
        }
    }
}

impl FlowTimeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn login_probe_delay(&self) -> Duration {
        Duration::from_millis(self.login_probe_delay_ms)
    }

    pub fn login_check(&self) -> Duration {
        Duration::from_millis(self.login_check_ms)
    }

    pub fn lookup(&self) -> Duration {
        Duration::from_millis(self.lookup_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn after_login(&self) -> Duration {
        Duration::from_millis(self.after_login_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn callback_poll(&self) -> Duration {
        Duration::from_millis(self.callback_poll_ms)
    }

    pub fn flow_deadline(&self) -> Duration {
        Duration::from_millis(self.flow_deadline_ms)
    }
}

/// Text predicate applied to the rendered text of a candidate element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    /// Normalized text equals the value
    Equals(String),
    /// Normalized text contains the value
    Contains(String),
    /// Normalized text contains at least one of the values
    ContainsAny(Vec<String>),
}

impl TextMatch {
    /// Check already-normalized text against the predicate
    pub fn matches(&self, normalized: &str) -> bool {
        match self {
            TextMatch::Equals(expected) => normalized == normalize_text(expected),
            TextMatch::Contains(needle) => normalized.contains(&normalize_text(needle)),
            TextMatch::ContainsAny(needles) => needles
                .iter()
                .any(|needle| normalized.contains(&normalize_text(needle))),
        }
    }
}

/// Trim, lowercase and collapse inner whitespace
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One way of finding an element: a CSS selector plus an optional text predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextMatch>,
    /// Reject elements whose text contains any of these words
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_text: Vec<String>,
}

impl Locator {
    /// Plain CSS locator
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: None,
            exclude_text: Vec::new(),
        }
    }

    /// Locator that enumerates `selector` and filters on rendered text
    pub fn with_text(selector: impl Into<String>, text: TextMatch) -> Self {
        Self {
            selector: selector.into(),
            text: Some(text),
            exclude_text: Vec::new(),
        }
    }

    /// Add words that disqualify a candidate
    pub fn excluding(mut self, words: &[&str]) -> Self {
        self.exclude_text = words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Whether the locator needs the element's text to decide
    pub fn inspects_text(&self) -> bool {
        self.text.is_some() || !self.exclude_text.is_empty()
    }

    /// Check rendered text against the predicate and the exclusions
    pub fn matches_text(&self, rendered: &str) -> bool {
        let normalized = normalize_text(rendered);
        if self
            .exclude_text
            .iter()
            .any(|word| normalized.contains(&normalize_text(word)))
        {
            return false;
        }
        self.text
            .as_ref()
            .map_or(true, |predicate| predicate.matches(&normalized))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} [text {:?}]", self.selector, text),
            None => f.write_str(&self.selector),
        }
    }
}

/// Ordered candidate locators for one logical UI element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorSpec {
    /// Human-readable name of the element, e.g. "password field"
    pub description: String,
    pub candidates: Vec<Locator>,
}

impl LocatorSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            candidates: Vec::new(),
        }
    }

    /// Append a CSS candidate
    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.candidates.push(Locator::css(selector));
        self
    }

    /// Append a text-predicate candidate
    pub fn text(mut self, selector: impl Into<String>, text: TextMatch) -> Self {
        self.candidates.push(Locator::with_text(selector, text));
        self
    }

    /// Append a prepared candidate
    pub fn locator(mut self, locator: Locator) -> Self {
        self.candidates.push(locator);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Lifecycle phase of one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowPhase {
    Init,
    Navigated,
    LoginCheck,
    LoggingIn,
    TwoFactorCheck,
    Handling2FA,
    ReturningToAuth,
    CompletionCheck,
    AwaitingConsent,
    Authorizing,
    WaitingForCallback,
    Completed,
    Failed,
}

impl FlowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowPhase::Completed | FlowPhase::Failed)
    }

    /// Whether `next` is a legal successor of this phase
    pub fn can_transition_to(&self, next: FlowPhase) -> bool {
        use FlowPhase::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Init, Navigated)
                | (Navigated, LoginCheck)
                | (LoginCheck, LoggingIn)
                | (LoginCheck, CompletionCheck)
                | (LoggingIn, TwoFactorCheck)
                | (TwoFactorCheck, Handling2FA)
                | (TwoFactorCheck, ReturningToAuth)
                | (Handling2FA, ReturningToAuth)
                | (ReturningToAuth, CompletionCheck)
                | (CompletionCheck, Completed)
                | (CompletionCheck, AwaitingConsent)
                | (AwaitingConsent, Authorizing)
                | (Authorizing, WaitingForCallback)
                | (Authorizing, Completed)
                | (WaitingForCallback, Completed)
        )
    }
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Mutable, engine-owned state of one flow run
#[derive(Debug)]
pub struct FlowState {
    pub flow_id: Uuid,
    phase: FlowPhase,
    history: Vec<FlowPhase>,
    last_url: Option<String>,
    last_error: Option<String>,
    attempts: u32,
    started_at: Instant,
}

impl FlowState {
    pub fn new(flow_id: Uuid) -> Self {
        Self {
            flow_id,
            phase: FlowPhase::Init,
            history: vec![FlowPhase::Init],
            last_url: None,
            last_error: None,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    pub fn history(&self) -> &[FlowPhase] {
        &self.history
    }

    pub fn last_url(&self) -> Option<&str> {
        self.last_url.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to `next` if the edge is legal. Illegal transitions are ignored.
    pub fn advance(&mut self, next: FlowPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                "Ignoring illegal flow transition {} -> {} (flow {})",
                self.phase,
                next,
                self.flow_id
            );
            return false;
        }
        tracing::info!("Flow {}: {} -> {}", self.flow_id, self.phase, next);
        self.phase = next;
        self.history.push(next);
        self.attempts = 0;
        true
    }

    /// Record the URL most recently seen on the page
    pub fn observe_url(&mut self, url: impl Into<String>) {
        self.last_url = Some(url.into());
    }

    /// Count one attempt of the active retry loop
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Move to `Failed` and keep the error message
    pub fn fail(&mut self, error: &FlowEngineError) {
        self.last_error = Some(error.to_string());
        self.advance(FlowPhase::Failed);
    }
}

/// Authorization code recovered from the callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: Option<String>,
    /// Callback URL the code was read from
    pub callback_url: String,
}

/// Terminal value of one flow: an authorization code or a typed failure
pub type AuthorizationResult = Result<AuthorizationCode, FlowEngineError>;

/// Classification of a secondary challenge seen after login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwoFactorChallenge {
    None,
    Skippable,
    CodeRequired,
    Unsupported,
}

/// Immutable input to one flow run
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub id: Uuid,
    pub authorization_url: String,
    /// State nonce issued with the authorization request
    pub state: String,
    pub credentials: Credentials,
    /// Path (or absolute URL prefix) of the redirect URI
    pub redirect_pattern: String,
    pub timeouts: FlowTimeouts,
    pub provider: Provider,
    pub two_factor: Option<TwoFactorHandler>,
}

impl FlowRequest {
    pub fn new(
        authorization_url: impl Into<String>,
        state: impl Into<String>,
        credentials: Credentials,
        redirect_pattern: impl Into<String>,
        provider: Provider,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            authorization_url: authorization_url.into(),
            state: state.into(),
            credentials,
            redirect_pattern: redirect_pattern.into(),
            timeouts: FlowTimeouts::default(),
            provider,
            two_factor: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: FlowTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_two_factor(mut self, handler: TwoFactorHandler) -> Self {
        self.two_factor = Some(handler);
        self
    }

    /// Reject requests that cannot possibly complete
    pub fn validate(&self) -> FlowResult<()> {
        let url = Url::parse(&self.authorization_url).map_err(|e| {
            FlowEngineError::Configuration(format!(
                "Invalid authorization URL '{}': {}",
                self.authorization_url, e
            ))
        })?;

        if self.state.trim().is_empty() {
            return Err(FlowEngineError::Configuration(
                "State nonce must not be empty".to_string(),
            ));
        }

        if let Some((_, issued)) = url.query_pairs().find(|(key, _)| key == "state") {
            if issued != self.state.as_str() {
                return Err(FlowEngineError::Configuration(format!(
                    "Authorization URL carries state '{}' but the request expects '{}'",
                    issued, self.state
                )));
            }
        }

        if self.redirect_pattern.trim().is_empty() {
            return Err(FlowEngineError::Configuration(
                "Redirect pattern must not be empty".to_string(),
            ));
        }

        if self.credentials.username.trim().is_empty() {
            return Err(FlowEngineError::Configuration(format!(
                "Username is required for {}",
                self.provider.kind()
            )));
        }

        Ok(())
    }
}
