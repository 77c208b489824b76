//! Atlassian: single-step login, site selection on consent, emailed MFA codes

use super::{
    authorize_locator, click_login_control, click_through_consent, enter_password,
    enter_username, text_any, LoginSteps, ProviderStrategy,
};
use crate::error::FlowResult;
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{Credentials, Locator, LocatorSpec, ProviderKind, TextMatch};
use crate::flow::page::BrowserPage;
use crate::two_factor::{
    ChallengeMatcher, MailboxCodeHandler, MailboxOracle, MailboxPolicy, MailboxQuery,
    TwoFactorHandler,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const MAX_CONSENT_CLICKS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlassianLocators {
    pub username: LocatorSpec,
    pub password: LocatorSpec,
    pub submit: LocatorSpec,
    pub site_dropdown: LocatorSpec,
    pub site_option: LocatorSpec,
    pub accept: LocatorSpec,
    pub mfa_code: LocatorSpec,
    pub mfa_submit: LocatorSpec,
    pub skip: LocatorSpec,
}

impl Default for AtlassianLocators {
    fn default() -> Self {
        Self {
            username: LocatorSpec::new("Atlassian email field")
                .css(r#"input[id="username"]"#)
                .css(r#"input[name="username"]"#)
                .css(r#"input[type="email"]"#),
            password: LocatorSpec::new("Atlassian password field")
                .css(r#"input[id="password"]"#)
                .css(r#"input[name="password"]"#)
                .css(r#"input[type="password"]"#),
            submit: LocatorSpec::new("Atlassian login button")
                .css(r#"button[id="login-submit"]"#)
                .css("#login-submit")
                .css(r#"button[type="submit"]"#)
                .text("button", text_any(&["continue", "log in"])),
            site_dropdown: LocatorSpec::new("Atlassian site selector")
                .css(r#"[data-testid="site-selector"]"#)
                .css(r#"div[id*="site-selector"]"#)
                .css(r#"select[name="site"]"#)
                .css(r#"div[role="combobox"]"#),
            site_option: LocatorSpec::new("Atlassian site option")
                .css(r#"div[role="option"]"#)
                .css(r#"[id*="react-select"][id*="option"]"#)
                .css("li[role=\"option\"]"),
            accept: LocatorSpec::new("Atlassian accept button")
                .css(r#"button[id="approve"]"#)
                .css(r#"button[data-testid="consent-accept"]"#)
                .text("button", TextMatch::Equals("Accept".to_string()))
                .locator(authorize_locator(r#"button[type="submit"]"#))
                .locator(authorize_locator("button")),
            mfa_code: LocatorSpec::new("Atlassian verification code field")
                .css(r#"input[name="otpCode"]"#)
                .css(r#"input[id="otpCode"]"#)
                .css(r#"input[autocomplete="one-time-code"]"#)
                .css(r#"input[inputmode="numeric"]"#)
                .css(r#"input[type="text"][maxlength]"#),
            mfa_submit: LocatorSpec::new("Atlassian verify button")
                .css(r#"button[id="mfa-submit"]"#)
                .css(r#"button[type="submit"]"#)
                .text("button", text_any(&["verify", "continue"])),
            skip: LocatorSpec::new("Atlassian skip control")
                .text("button", text_any(&["skip", "not now", "remind me later"]))
                .css(r#"a[href*="skip"]"#),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AtlassianStrategy {
    locators: AtlassianLocators,
    site: Option<String>,
}

impl AtlassianStrategy {
    pub fn new(locators: AtlassianLocators) -> Self {
        Self { locators, site: None }
    }

    /// Site to pick when the consent screen asks for one
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    pub fn locators(&self) -> &AtlassianLocators {
        &self.locators
    }

    /// Handler that reads the login verification code Atlassian emails out.
    /// Several sender queries are tried since the sending address varies.
    pub fn mfa_handler(&self, oracle: Arc<dyn MailboxOracle>) -> TwoFactorHandler {
        let window = Duration::from_secs(600);
        let policy = MailboxPolicy::new(vec![
            MailboxQuery::from_sender("noreply@id.atlassian.com").within(window),
            MailboxQuery::from_sender("@id.atlassian.com").within(window),
            MailboxQuery::from_sender("@atlassian.com").within(window),
        ])
        .with_per_character_delay(Duration::from_millis(300));

        MailboxCodeHandler::new(
            self.challenge_matcher(),
            self.locators.mfa_code.clone(),
            self.locators.mfa_submit.clone(),
            policy,
            oracle,
        )
        .with_skip_controls(self.locators.skip.clone())
        .into()
    }

    /// Open the site selector and pick the configured site, or the first one
    pub async fn select_site(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        engine.click(page, &self.locators.site_dropdown).await?;

        if let Some(site) = &self.site {
            let named = LocatorSpec {
                description: format!("Atlassian site option '{}'", site),
                candidates: self
                    .locators
                    .site_option
                    .candidates
                    .iter()
                    .map(|c| Locator::with_text(c.selector.clone(), TextMatch::Contains(site.clone())))
                    .collect(),
            };
            if engine.probe(engine.lookup_timeout()).click_if_present(page, &named).await? {
                info!("Selected Atlassian site {}", site);
                return Ok(());
            }
            warn!("Site {} not offered, selecting the first site", site);
        }

        engine.click(page, &self.locators.site_option).await
    }
}

#[async_trait]
impl ProviderStrategy for AtlassianStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Atlassian
    }

    fn login_steps(&self) -> LoginSteps {
        LoginSteps::SingleStep
    }

    fn login_field(&self) -> &LocatorSpec {
        &self.locators.username
    }

    fn challenge_matcher(&self) -> ChallengeMatcher {
        ChallengeMatcher::new("atlassian_mfa")
            .contains("/login/mfa")
            .contains("/login/verify")
            .contains("/step-up")
            .path_suffix("/mfa")
    }

    fn skip_controls(&self) -> LocatorSpec {
        self.locators.skip.clone()
    }

    async fn click_next_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        click_login_control(page, engine, &self.locators.submit, self.kind()).await
    }

    async fn handle_login_flow(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
        credentials: &Credentials,
    ) -> FlowResult<()> {
        enter_username(page, engine, &self.locators.username, self.kind(), &credentials.username).await?;

        // Some tenants only render the password field once the email is submitted
        let probe = engine.probe(engine.lookup_timeout());
        if !probe.is_present(page, &self.locators.password).await {
            info!("Password field not shown yet, submitting email first");
            click_login_control(page, engine, &self.locators.submit, self.kind()).await?;
        }

        enter_password(page, engine, &self.locators.password, self.kind(), credentials).await?;
        click_login_control(page, engine, &self.locators.submit, self.kind()).await?;
        info!("Atlassian credentials submitted");
        Ok(())
    }

    async fn handle_authorization(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        let probe = engine.probe(engine.lookup_timeout());
        if probe.is_present(page, &self.locators.site_dropdown).await {
            if let Err(e) = self.select_site(page, engine).await {
                warn!("Site selection failed, trying to accept anyway: {}", e);
            }
        }
        self.click_authorize_button(page, engine).await
    }

    async fn click_authorize_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        click_through_consent(page, engine, &self.locators.accept, MAX_CONSENT_CLICKS).await?;
        Ok(())
    }
}
