//! GitHub: single-step login, device verification by email

use super::{
    authorize_locator, click_login_control, enter_password, enter_username, LoginSteps,
    ProviderStrategy,
};
use crate::error::{FlowEngineError, FlowResult};
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{Credentials, LocatorSpec, ProviderKind, TextMatch};
use crate::flow::page::BrowserPage;
use crate::two_factor::{
    ChallengeMatcher, CodeExtractor, MailboxCodeHandler, MailboxOracle, MailboxPolicy,
    MailboxQuery, TwoFactorHandler,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubLocators {
    pub username: LocatorSpec,
    pub password: LocatorSpec,
    pub sign_in: LocatorSpec,
    pub authorize: LocatorSpec,
    pub device_code: LocatorSpec,
    pub device_submit: LocatorSpec,
    pub skip: LocatorSpec,
}

impl Default for GitHubLocators {
    fn default() -> Self {
        Self {
            username: LocatorSpec::new("GitHub username field")
                .css(r#"input[name="login"]"#)
                .css(r#"input[id="login_field"]"#)
                .css(r#"input[type="text"][placeholder*="username"]"#)
                .css(r#"input[type="email"]"#),
            password: LocatorSpec::new("GitHub password field")
                .css(r#"input[name="password"]"#)
                .css(r#"input[id="password"]"#)
                .css(r#"input[type="password"]"#),
            sign_in: LocatorSpec::new("GitHub sign-in button")
                .css(r#"input[type="submit"][value="Sign in"]"#)
                .css(r#"button[type="submit"]"#)
                .css(r#"input[type="submit"]"#)
                .text("button", TextMatch::Equals("Sign in".to_string()))
                .text("button", TextMatch::Equals("Log in".to_string())),
            authorize: LocatorSpec::new("GitHub authorize button")
                .css(r#"button[type="submit"][value="Authorize"]"#)
                .css(r#"input[type="submit"][value="Authorize"]"#)
                .css(r#"button[name="authorize"]"#)
                .css(r#"input[name="authorize"]"#)
                .css(r#"button[data-octo-click="oauth_application_authorization"]"#)
                .css(r#"button[form="app-authorization"]"#)
                .css(r#"form[id="app-authorization"] button[type="submit"]"#)
                .text("button", TextMatch::Contains("Authorize".to_string()))
                .text("button", TextMatch::Contains("Grant access".to_string()))
                .locator(authorize_locator(r#"button[type="submit"]"#)),
            device_code: LocatorSpec::new("GitHub device verification code field")
                .css(r#"input[name="otp"]"#)
                .css("#otp")
                .css(r#"input[name="device_verification_code"]"#)
                .css(r#"input[placeholder*="verification"]"#)
                .css(r#"input[placeholder*="code"]"#),
            device_submit: LocatorSpec::new("GitHub verify button")
                .css(r#"button[type="submit"]"#)
                .text("button", TextMatch::Contains("Verify".to_string())),
            skip: LocatorSpec::new("GitHub skip control")
                .text("button", TextMatch::ContainsAny(vec![
                    "skip".to_string(),
                    "not now".to_string(),
                    "remind me later".to_string(),
                ]))
                .css(r#"a[href*="skip"]"#),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GitHubStrategy {
    locators: GitHubLocators,
}

impl GitHubStrategy {
    pub fn new(locators: GitHubLocators) -> Self {
        Self { locators }
    }

    pub fn locators(&self) -> &GitHubLocators {
        &self.locators
    }

    /// Handler that reads the device verification code GitHub emails to the account
    pub fn device_verification_handler(&self, oracle: Arc<dyn MailboxOracle>) -> TwoFactorHandler {
        let policy = MailboxPolicy::new(vec![MailboxQuery::from_sender("noreply@github.com")
            .with_subject("device verification")
            .within(Duration::from_secs(600))]);

        MailboxCodeHandler::new(
            self.challenge_matcher(),
            self.locators.device_code.clone(),
            self.locators.device_submit.clone(),
            policy,
            oracle,
        )
        .with_skip_controls(self.locators.skip.clone())
        .with_extractor(CodeExtractor::numeric())
        .into()
    }
}

#[async_trait]
impl ProviderStrategy for GitHubStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn login_steps(&self) -> LoginSteps {
        LoginSteps::SingleStep
    }

    fn login_field(&self) -> &LocatorSpec {
        &self.locators.username
    }

    fn challenge_matcher(&self) -> ChallengeMatcher {
        ChallengeMatcher::new("github_device_verification")
            .contains("/sessions/verified-device")
            .contains("/login/device")
            .path_suffix("/session")
    }

    fn skip_controls(&self) -> LocatorSpec {
        self.locators.skip.clone()
    }

    async fn click_next_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        click_login_control(page, engine, &self.locators.sign_in, self.kind()).await
    }

    async fn handle_login_flow(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
        credentials: &Credentials,
    ) -> FlowResult<()> {
        enter_username(page, engine, &self.locators.username, self.kind(), &credentials.username).await?;
        enter_password(page, engine, &self.locators.password, self.kind(), credentials).await?;
        click_login_control(page, engine, &self.locators.sign_in, self.kind()).await?;
        info!("GitHub credentials submitted");
        Ok(())
    }

    async fn handle_authorization(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        // The authorize button stays disabled for a moment after render
        engine.settle().await;
        self.click_authorize_button(page, engine).await
    }

    async fn click_authorize_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        engine
            .click(page, &self.locators.authorize)
            .await
            .map_err(|e| FlowEngineError::authorization_failed(format!("GitHub authorize button: {}", e)))
    }
}
