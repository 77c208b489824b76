//! Two-Factor / Device-Verification Handling
//!
//! A closed set of handlers for secondary challenges shown after login:
//! skip-only, mailbox-code, and unsupported (fail fast).

pub mod code;
pub mod mailbox;

use crate::error::{FlowEngineError, FlowResult};
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{LocatorSpec, TwoFactorChallenge};
use crate::flow::page::BrowserPage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub use code::{CodeExtractor, CodePattern};
pub use mailbox::{MailboxOracle, MailboxPolicy, MailboxQuery};

/// URL patterns identifying one provider's challenge pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeMatcher {
    /// Challenge name used in errors and logs, e.g. "github_device_verification"
    pub name: String,
    /// Any of these substrings in the URL marks a challenge
    #[serde(default)]
    pub url_contains: Vec<String>,
    /// Any of these URL path suffixes marks a challenge
    #[serde(default)]
    pub path_suffixes: Vec<String>,
    /// URLs containing any of these are never challenges
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl ChallengeMatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_contains: Vec::new(),
            path_suffixes: Vec::new(),
            excluded: Vec::new(),
        }
    }

    pub fn contains(mut self, fragment: impl Into<String>) -> Self {
        self.url_contains.push(fragment.into());
        self
    }

    pub fn path_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.path_suffixes.push(suffix.into());
        self
    }

    pub fn excluding(mut self, fragment: impl Into<String>) -> Self {
        self.excluded.push(fragment.into());
        self
    }

    pub fn matches(&self, url: &str) -> bool {
        if self.excluded.iter().any(|fragment| url.contains(fragment.as_str())) {
            return false;
        }
        if self.url_contains.iter().any(|fragment| url.contains(fragment.as_str())) {
            return true;
        }
        match Url::parse(url) {
            Ok(parsed) => {
                let path = parsed.path().trim_end_matches('/');
                self.path_suffixes
                    .iter()
                    .any(|suffix| path.ends_with(suffix.trim_end_matches('/')))
            }
            Err(_) => false,
        }
    }
}

/// Handler that only tries to skip the challenge
#[derive(Debug, Clone)]
pub struct SkipHandler {
    pub matcher: ChallengeMatcher,
    pub skip_controls: LocatorSpec,
}

impl SkipHandler {
    pub fn new(matcher: ChallengeMatcher, skip_controls: LocatorSpec) -> Self {
        Self {
            matcher,
            skip_controls,
        }
    }
}

/// Handler that fails fast with a descriptive error
#[derive(Debug, Clone)]
pub struct UnsupportedHandler {
    pub matcher: ChallengeMatcher,
}

/// Handler that reads a one-time code from the mailbox and submits it
#[derive(Clone)]
pub struct MailboxCodeHandler {
    pub matcher: ChallengeMatcher,
    pub skip_controls: LocatorSpec,
    pub code_input: LocatorSpec,
    pub submit: LocatorSpec,
    pub extractor: CodeExtractor,
    pub policy: MailboxPolicy,
    oracle: Arc<dyn MailboxOracle>,
}

impl fmt::Debug for MailboxCodeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCodeHandler")
            .field("matcher", &self.matcher)
            .field("code_input", &self.code_input.description)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MailboxCodeHandler {
    pub fn new(
        matcher: ChallengeMatcher,
        code_input: LocatorSpec,
        submit: LocatorSpec,
        policy: MailboxPolicy,
        oracle: Arc<dyn MailboxOracle>,
    ) -> Self {
        Self {
            matcher,
            skip_controls: LocatorSpec::new("skip control"),
            code_input,
            submit,
            extractor: CodeExtractor::default(),
            policy,
            oracle,
        }
    }

    pub fn with_skip_controls(mut self, skip_controls: LocatorSpec) -> Self {
        self.skip_controls = skip_controls;
        self
    }

    pub fn with_extractor(mut self, extractor: CodeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_policy(mut self, policy: MailboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll the mailbox until a message arrives, then extract the code.
    ///
    /// A missing message (or a failing oracle) is retried within the polling
    /// budget. A message without a recognizable code is a hard failure.
    pub async fn fetch_code(&self) -> FlowResult<String> {
        let attempts = self.policy.poll.attempts();

        for attempt in 0..attempts {
            for query in &self.policy.queries {
                match self.oracle.search(query).await {
                    Ok(Some(body)) => {
                        info!(
                            "Verification message from {} found on attempt {}/{}",
                            query.from,
                            attempt + 1,
                            attempts
                        );
                        return self
                            .extractor
                            .extract(&body)
                            .ok_or(FlowEngineError::MailboxCodeUnparseable);
                    }
                    Ok(None) => {}
                    Err(e) if e.is_recoverable() => {
                        warn!("Mailbox query from:{} failed: {}", query.from, e)
                    }
                    Err(e) => return Err(e),
                }
            }

            if attempt + 1 < attempts {
                info!(
                    "No verification message yet (attempt {}/{}), waiting {:?}",
                    attempt + 1,
                    attempts,
                    self.policy.poll.delay_for(attempt)
                );
                self.policy.poll.wait(attempt).await;
            }
        }

        Err(FlowEngineError::MailboxCodeNotFound { attempts })
    }

    async fn resolve(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        let code = self.fetch_code().await?;
        info!("Entering {}-character verification code", code.chars().count());

        engine
            .type_per_character(page, &self.code_input, &code, self.policy.per_character_delay())
            .await?;

        // Some widgets submit on their own once the last digit is entered
        if let Err(e) = engine.click(page, &self.submit).await {
            warn!("No verification submit control clicked, pressing Enter: {}", e);
            if let Some(input) = engine.find_once(page, &self.code_input).await {
                if let Err(e) = input.press_key("Enter").await {
                    warn!("Pressing Enter in {} failed: {}", self.code_input.description, e);
                }
            }
        }

        let attempts = self.policy.submit_wait.attempts();
        let mut url = page.current_url().await?;
        for attempt in 0..attempts {
            if !self.matcher.matches(&url) {
                info!("Left {} challenge page", self.matcher.name);
                return Ok(());
            }
            self.policy.submit_wait.wait(attempt).await;
            match page.current_url().await {
                Ok(current) => url = current,
                Err(e) => warn!("Could not read URL after code submission: {}", e),
            }
        }

        if !self.matcher.matches(&url) {
            return Ok(());
        }

        // Still on the challenge page: follow the `continue` parameter by hand
        if let Some(target) = continue_target(&url) {
            warn!("Still on {} page, following continue URL", self.matcher.name);
            page.navigate(&target).await?;
            return Ok(());
        }

        Err(FlowEngineError::login_failed(
            &self.matcher.name,
            format!("verification code was not accepted (URL: {})", url),
        ))
    }
}

/// `continue` query parameter of a challenge URL, if it is an absolute URL
fn continue_target(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let target = parsed
        .query_pairs()
        .find(|(key, _)| key == "continue")
        .map(|(_, value)| value.into_owned())?;
    Url::parse(&target).ok().map(|_| target)
}

/// Secondary-challenge handler selected for a flow
#[derive(Debug, Clone)]
pub enum TwoFactorHandler {
    Skip(SkipHandler),
    MailboxCode(MailboxCodeHandler),
    Unsupported(UnsupportedHandler),
}

impl TwoFactorHandler {
    pub fn skip(matcher: ChallengeMatcher, skip_controls: LocatorSpec) -> Self {
        TwoFactorHandler::Skip(SkipHandler::new(matcher, skip_controls))
    }

    pub fn unsupported(matcher: ChallengeMatcher) -> Self {
        TwoFactorHandler::Unsupported(UnsupportedHandler { matcher })
    }

    pub fn matcher(&self) -> &ChallengeMatcher {
        match self {
            TwoFactorHandler::Skip(handler) => &handler.matcher,
            TwoFactorHandler::MailboxCode(handler) => &handler.matcher,
            TwoFactorHandler::Unsupported(handler) => &handler.matcher,
        }
    }

    fn skip_controls(&self) -> Option<&LocatorSpec> {
        match self {
            TwoFactorHandler::Skip(handler) => Some(&handler.skip_controls),
            TwoFactorHandler::MailboxCode(handler) => Some(&handler.skip_controls),
            TwoFactorHandler::Unsupported(_) => None,
        }
    }

    /// Whether the URL is one of this handler's challenge pages
    pub fn is_required(&self, url: &str) -> bool {
        self.matcher().matches(url)
    }

    /// Inspect the page and decide what kind of challenge it shows
    pub async fn classify(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
    ) -> FlowResult<TwoFactorChallenge> {
        let url = page.current_url().await?;
        if !self.is_required(&url) {
            return Ok(TwoFactorChallenge::None);
        }

        if let Some(skip) = self.skip_controls().filter(|spec| !spec.is_empty()) {
            if engine.is_present(page, skip).await {
                return Ok(TwoFactorChallenge::Skippable);
            }
        }

        if let TwoFactorHandler::MailboxCode(handler) = self {
            if engine.is_present(page, &handler.code_input).await {
                return Ok(TwoFactorChallenge::CodeRequired);
            }
        }

        Ok(TwoFactorChallenge::Unsupported)
    }

    /// Resolve the challenge on the current page
    pub async fn handle(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        let probe = engine.probe(engine.lookup_timeout());
        let challenge = self.classify(page, &probe).await?;
        info!("{} challenge classified as {:?}", self.matcher().name, challenge);

        match (self, challenge) {
            (_, TwoFactorChallenge::None) => Ok(()),
            (_, TwoFactorChallenge::Skippable) => match self.skip_controls() {
                Some(skip) => {
                    engine.click(page, skip).await?;
                    info!("Skipped {} challenge", self.matcher().name);
                    Ok(())
                }
                None => Err(self.unsupported_error(page).await),
            },
            (TwoFactorHandler::MailboxCode(handler), TwoFactorChallenge::CodeRequired) => {
                handler.resolve(page, engine).await
            }
            (_, TwoFactorChallenge::CodeRequired) | (_, TwoFactorChallenge::Unsupported) => {
                Err(self.unsupported_error(page).await)
            }
        }
    }

    async fn unsupported_error(&self, page: &dyn BrowserPage) -> FlowEngineError {
        FlowEngineError::TwoFactorUnsupported {
            challenge: self.matcher().name.clone(),
            url: page.current_url().await.unwrap_or_default(),
        }
    }
}

impl From<MailboxCodeHandler> for TwoFactorHandler {
    fn from(handler: MailboxCodeHandler) -> Self {
        TwoFactorHandler::MailboxCode(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_matcher() -> ChallengeMatcher {
        ChallengeMatcher::new("github_device_verification")
            .contains("/sessions/verified-device")
            .contains("/login/device")
            .path_suffix("/session")
    }

    #[test]
    fn test_matcher_patterns() {
        let matcher = github_matcher();
        assert!(matcher.matches("https://github.com/sessions/verified-device"));
        assert!(matcher.matches("https://github.com/session"));
        assert!(!matcher.matches("https://github.com/sessions/two-factor/app"));
        assert!(!matcher.matches("https://github.com/login/oauth/authorize?client_id=1"));
    }

    #[test]
    fn test_matcher_exclusions_win() {
        let matcher = ChallengeMatcher::new("google_challenge")
            .contains("/challenge/")
            .excluding("/signin/oauth/consent");
        assert!(matcher.matches("https://accounts.google.com/v3/signin/challenge/pwd"));
        assert!(!matcher.matches("https://accounts.google.com/signin/oauth/consent?x=/challenge/"));
    }

    #[test]
    fn test_continue_target() {
        assert_eq!(
            continue_target("https://id.atlassian.com/login/mfa?continue=https%3A%2F%2Fauth.atlassian.com%2Fauthorize%3Fa%3D1"),
            Some("https://auth.atlassian.com/authorize?a=1".to_string())
        );
        assert_eq!(continue_target("https://id.atlassian.com/login/mfa?continue=%2Frelative"), None);
        assert_eq!(continue_target("https://id.atlassian.com/login/mfa"), None);
    }

    #[test]
    fn test_unsupported_handler_is_required() {
        let handler = TwoFactorHandler::unsupported(github_matcher());
        assert!(handler.is_required("https://github.com/login/device"));
        assert!(!handler.is_required("https://app.test/callback?code=1"));
    }
}
