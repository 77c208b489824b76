//! Google: two-step login, account chooser, multi-screen consent

use super::{
    authorize_locator, click_login_control, click_through_consent, enter_password,
    enter_username, text_any, LoginSteps, ProviderStrategy,
};
use crate::error::FlowResult;
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{normalize_text, Credentials, LocatorSpec, ProviderKind, TextMatch};
use crate::flow::page::{BrowserPage, PageElement};
use crate::two_factor::ChallengeMatcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Page text that identifies the account chooser
const ACCOUNT_CHOOSER_PHRASES: &[&str] = &[
    "choose an account",
    "select an account",
    "which account",
    "choose your account",
];

/// Unverified-app warning, then up to two consent screens
const MAX_CONSENT_CLICKS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleLocators {
    pub username: LocatorSpec,
    pub next: LocatorSpec,
    pub password: LocatorSpec,
    pub account_rows: LocatorSpec,
    pub authorize: LocatorSpec,
    pub skip: LocatorSpec,
}

impl Default for GoogleLocators {
    fn default() -> Self {
        Self {
            username: LocatorSpec::new("Google email field")
                .css(r#"input[type="email"]"#)
                .css("#identifierId")
                .css(r#"input[name="identifier"]"#)
                .css(r#"input[placeholder*="email"]"#),
            // Google's buttons carry generated class names; text is the stable part
            next: LocatorSpec::new("Google next button")
                .text("button.VfPpkd-LgbsSe", text_any(&["next", "continue"]))
                .css(r#"button[id="identifierNext"]"#)
                .css("#identifierNext button")
                .css(r#"button[id="passwordNext"]"#)
                .css("#passwordNext button")
                .text("button", TextMatch::Equals("Next".to_string()))
                .css(r#"button[type="submit"]"#),
            password: LocatorSpec::new("Google password field")
                .css(r#"input[type="password"]"#)
                .css(r#"input[name="Passwd"]"#)
                .css(r#"input[name="password"]"#),
            account_rows: LocatorSpec::new("Google account row")
                .css("div[data-email]")
                .css("div[data-identifier]")
                .css("button[data-email]")
                .css("div[data-account-id]")
                .css("li[data-account-id]"),
            authorize: LocatorSpec::new("Google consent button")
                .text("button.VfPpkd-LgbsSe", text_any(&["allow", "consent", "continue", "accept"]))
                .css(r#"input[type="submit"][value="Allow"]"#)
                .css(r#"button[data-l*="allow"]"#)
                .locator(authorize_locator("button"))
                .locator(authorize_locator(r#"button[type="submit"]"#)),
            skip: LocatorSpec::new("Google skip control")
                .css(r#"button[value="Skip"]"#)
                .css(r#"input[type="submit"][value="Skip"]"#)
                .css(r#"button[value="Not now"]"#)
                .css(r#"a[href*="skip"]"#)
                .text("button", text_any(&["skip", "not now"])),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoogleStrategy {
    locators: GoogleLocators,
}

impl GoogleStrategy {
    pub fn new(locators: GoogleLocators) -> Self {
        Self { locators }
    }

    pub fn locators(&self) -> &GoogleLocators {
        &self.locators
    }

    /// Pick the account on the chooser page if it is showing.
    /// Returns whether an account row was clicked. Never fails the flow.
    pub async fn choose_account(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
        username: &str,
    ) -> bool {
        let text = normalize_text(&page.body_text().await.unwrap_or_default());
        if !ACCOUNT_CHOOSER_PHRASES.iter().any(|phrase| text.contains(phrase)) {
            return false;
        }
        info!("Google account chooser detected");

        let wanted = username.to_lowercase();
        let mut fallback: Option<Box<dyn PageElement>> = None;

        for locator in &self.locators.account_rows.candidates {
            let rows = match page.query_all(&locator.selector).await {
                Ok(rows) => rows,
                Err(e) => {
                    debug!("Account row lookup {} failed: {}", locator.selector, e);
                    continue;
                }
            };

            for row in rows {
                if !row.is_visible().await.unwrap_or(false) {
                    continue;
                }
                let email = row.attribute("data-email").await.ok().flatten().unwrap_or_default();
                let text = row.text().await.unwrap_or_default().to_lowercase();
                if email.eq_ignore_ascii_case(username) || text.contains(&wanted) {
                    info!("Selecting account {}", username);
                    return self.click_row(engine, row.as_ref()).await;
                }
                if fallback.is_none() {
                    fallback = Some(row);
                }
            }
        }

        match fallback {
            Some(row) => {
                warn!("Account {} not listed, selecting the first account", username);
                self.click_row(engine, row.as_ref()).await
            }
            None => {
                warn!("Account chooser shown but no account rows found");
                false
            }
        }
    }

    async fn click_row(&self, engine: &LocatorEngine, row: &dyn PageElement) -> bool {
        match engine.click_element(row).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Clicking account row failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ProviderStrategy for GoogleStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn login_steps(&self) -> LoginSteps {
        LoginSteps::TwoStep
    }

    fn login_field(&self) -> &LocatorSpec {
        &self.locators.username
    }

    fn challenge_matcher(&self) -> ChallengeMatcher {
        ChallengeMatcher::new("google_challenge")
            .contains("/signin/v2/challenge/")
            .contains("/signin/challenge/")
            .contains("/challenge/")
            .excluding("/signin/oauth/consent")
            .excluding("/o/oauth2/")
    }

    fn skip_controls(&self) -> LocatorSpec {
        self.locators.skip.clone()
    }

    async fn click_next_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        click_login_control(page, engine, &self.locators.next, self.kind()).await
    }

    async fn handle_login_flow(
        &self,
        page: &dyn BrowserPage,
        engine: &LocatorEngine,
        credentials: &Credentials,
    ) -> FlowResult<()> {
        if self.choose_account(page, engine, &credentials.username).await {
            let probe = engine.probe(engine.lookup_timeout());
            if !probe.is_present(page, &self.locators.password).await {
                info!("Account selected without a password prompt");
                return Ok(());
            }
        } else {
            enter_username(page, engine, &self.locators.username, self.kind(), &credentials.username).await?;
            self.click_next_button(page, engine).await?;
        }

        enter_password(page, engine, &self.locators.password, self.kind(), credentials).await?;
        self.click_next_button(page, engine).await?;
        info!("Google credentials submitted");
        Ok(())
    }

    async fn handle_authorization(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        self.choose_account(page, engine, "").await;
        self.click_authorize_button(page, engine).await
    }

    async fn click_authorize_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        click_through_consent(page, engine, &self.locators.authorize, MAX_CONSENT_CLICKS).await?;
        Ok(())
    }
}
