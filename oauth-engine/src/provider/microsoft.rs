//! Microsoft: two-step login with "Stay signed in?" and enterprise interstitials

use super::{
    authorize_locator, click_login_control, click_through_consent, enter_password,
    enter_username, text_any, LoginSteps, ProviderStrategy,
};
use crate::error::FlowResult;
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{normalize_text, Credentials, LocatorSpec, ProviderKind, TextMatch};
use crate::flow::page::BrowserPage;
use crate::two_factor::ChallengeMatcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

/// Hosts that serve Microsoft sign-in and consent pages
const LOGIN_HOSTS: &[&str] = &[
    "login.microsoftonline.com",
    "login.live.com",
    "login.windows.net",
    "account.live.com",
    "account.microsoft.com",
];

const MAX_INTERSTITIALS: usize = 3;

/// Per-scope permission screens, then the final accept
const MAX_CONSENT_CLICKS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrosoftLocators {
    pub username: LocatorSpec,
    pub next: LocatorSpec,
    pub password: LocatorSpec,
    pub sign_in: LocatorSpec,
    pub stay_signed_in_no: LocatorSpec,
    pub stay_signed_in_yes: LocatorSpec,
    pub enterprise_continue: LocatorSpec,
    pub consent: LocatorSpec,
    pub skip: LocatorSpec,
}

impl Default for MicrosoftLocators {
    fn default() -> Self {
        Self {
            username: LocatorSpec::new("Microsoft email field")
                .css(r#"input[type="email"]"#)
                .css(r#"input[name="loginfmt"]"#)
                .css("#i0116"),
            next: LocatorSpec::new("Microsoft next button")
                .css(r#"input[type="submit"][value="Next"]"#)
                .css("#idSIButton9")
                .css(r#"button[type="submit"]"#)
                .text("button", text_any(&["next"])),
            password: LocatorSpec::new("Microsoft password field")
                .css(r#"input[type="password"]"#)
                .css(r#"input[name="passwd"]"#)
                .css("#i0118"),
            sign_in: LocatorSpec::new("Microsoft sign-in button")
                .css(r#"input[type="submit"][value="Sign in"]"#)
                .css("#idSIButton9")
                .css(r#"button[type="submit"]"#)
                .text("button", text_any(&["sign in"])),
            stay_signed_in_no: LocatorSpec::new("Microsoft 'stay signed in' decline")
                .css("#idBtn_Back")
                .css(r#"input[type="button"][value="No"]"#)
                .text("button", TextMatch::Equals("No".to_string())),
            stay_signed_in_yes: LocatorSpec::new("Microsoft 'stay signed in' accept")
                .css("#idSIButton9")
                .css(r#"input[type="submit"][value="Yes"]"#),
            enterprise_continue: LocatorSpec::new("Microsoft enterprise continue")
                .css("#idSIButton9")
                .css(r#"input[type="submit"][value="Continue"]"#)
                .text("button", text_any(&["continue"])),
            consent: LocatorSpec::new("Microsoft consent button")
                .css(r#"input[type="submit"][value="Accept"]"#)
                .css("#idBtn_Accept")
                .css("#idSIButton9")
                .locator(authorize_locator("button"))
                .locator(authorize_locator(r#"input[type="submit"]"#)),
            skip: LocatorSpec::new("Microsoft skip control")
                .css("#btnAskLater")
                .css("#iShowSkip")
                .css(r#"a[id="iShowSkip"]"#)
                .text("a", text_any(&["skip for now", "ask later"]))
                .text("button", text_any(&["skip for now", "ask later"])),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MicrosoftStrategy {
    locators: MicrosoftLocators,
}

impl MicrosoftStrategy {
    pub fn new(locators: MicrosoftLocators) -> Self {
        Self { locators }
    }

    pub fn locators(&self) -> &MicrosoftLocators {
        &self.locators
    }

    /// Click through "Stay signed in?" and enterprise account prompts.
    /// Returns the number of prompts dismissed.
    pub async fn dismiss_interstitials(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> usize {
        let probe = engine.probe(engine.lookup_timeout());
        let mut dismissed = 0;

        for _ in 0..MAX_INTERSTITIALS {
            let url = page.current_url().await.unwrap_or_default().to_lowercase();

            let clicked = if self.is_stay_signed_in(page, &url).await {
                info!("Dismissing 'Stay signed in?' prompt");
                match probe.click_if_present(page, &self.locators.stay_signed_in_no).await {
                    Ok(true) => Ok(true),
                    Ok(false) => probe.click_if_present(page, &self.locators.stay_signed_in_yes).await,
                    Err(e) => Err(e),
                }
            } else if is_enterprise_prompt(&url) {
                info!("Continuing past enterprise account prompt");
                probe.click_if_present(page, &self.locators.enterprise_continue).await
            } else {
                Ok(false)
            };

            match clicked {
                Ok(true) => {
                    dismissed += 1;
                    engine.settle().await;
                }
                Ok(false) => break,
                Err(e) => {
                    warn!("Dismissing interstitial failed: {}", e);
                    break;
                }
            }
        }

        if dismissed > 0 {
            debug!("Dismissed {} Microsoft interstitial(s)", dismissed);
        }
        dismissed
    }

    async fn is_stay_signed_in(&self, page: &dyn BrowserPage, url: &str) -> bool {
        if url.contains("/kmsi") {
            return true;
        }
        let text = normalize_text(&page.body_text().await.unwrap_or_default());
        text.contains("stay signed in")
    }
}

fn is_enterprise_prompt(url: &str) -> bool {
    url.contains("/login.srf")
        || url.contains("/federation")
        || ["common", "organizations", "consumers"]
            .iter()
            .any(|tenant| url.contains(&format!("login.microsoftonline.com/{}/login", tenant)))
}

#[async_trait]
impl ProviderStrategy for MicrosoftStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    fn login_steps(&self) -> LoginSteps {
        LoginSteps::TwoStep
    }

    fn login_field(&self) -> &LocatorSpec {
        &self.locators.username
    }

    fn challenge_matcher(&self) -> ChallengeMatcher {
        ChallengeMatcher::new("microsoft_mfa")
            .contains("/SAS/")
            .contains("/sas/")
            .contains("/proofs/")
            .contains("/identity/confirm")
            .path_suffix("/mfa")
    }

    fn skip_controls(&self) -> LocatorSpec {
        self.locators.skip.clone()
    }

    fn is_on_authorization_surface(&self, url: &str, _authorization_url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .map(|host| LOGIN_HOSTS.contains(&host.as_str()))
            .unwrap_or(false)
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
        enter_username(page, engine, &self.locators.username, self.kind(), &credentials.username).await?;
        self.click_next_button(page, engine).await?;
        enter_password(page, engine, &self.locators.password, self.kind(), credentials).await?;
        click_login_control(page, engine, &self.locators.sign_in, self.kind()).await?;
        info!("Microsoft credentials submitted");

        self.dismiss_interstitials(page, engine).await;
        Ok(())
    }

    async fn handle_authorization(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        self.dismiss_interstitials(page, engine).await;
        self.click_authorize_button(page, engine).await
    }

    async fn click_authorize_button(&self, page: &dyn BrowserPage, engine: &LocatorEngine) -> FlowResult<()> {
        click_through_consent(page, engine, &self.locators.consent, MAX_CONSENT_CLICKS).await?;
        Ok(())
    }
}
