mod common;

use common::{Action, ClickEffect, MockElement, MockPage, Screen};
use oauth_engine::provider::{AtlassianStrategy, GitHubStrategy, GoogleStrategy, MicrosoftStrategy};
use oauth_engine::{
    Credentials, FlowEngineError, LocatorEngine, LoginSteps, ProviderStrategy, RetryPolicy,
};
use std::time::Duration;

const CALLBACK: &str = "https://app.test/callback?code=XYZ&state=abc123";

fn engine() -> LocatorEngine {
    LocatorEngine::new(RetryPolicy::immediate(2), Duration::from_millis(100), Duration::ZERO)
}

fn credentials() -> Credentials {
    Credentials::new("octocat@example.com", "hunter2")
}

fn typed_then_clicked(actions: &[Action]) -> Vec<&'static str> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Type { .. } => Some("type"),
            Action::Click(_) => Some("click"),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_github_single_step_login_never_clicks_next() {
    let strategy = GitHubStrategy::default();
    let page = MockPage::showing(
        Screen::new("https://github.com/login")
            .with(MockElement::new("input[name=\"login\"]"))
            .with(MockElement::new("input[name=\"password\"]"))
            .with(MockElement::new("input[type=\"submit\"][value=\"Sign in\"]").text("Sign in")),
    );

    assert_eq!(strategy.login_steps(), LoginSteps::SingleStep);
    strategy.handle_login_flow(&page, &engine(), &credentials()).await.unwrap();

    assert_eq!(page.typed("input[name=\"login\"]"), "octocat@example.com");
    assert_eq!(page.typed("input[name=\"password\"]"), "hunter2");
    assert_eq!(typed_then_clicked(&page.actions()), vec!["type", "type", "click"]);
    assert_eq!(page.clicks(), vec!["input[type=\"submit\"][value=\"Sign in\"]"]);
}

#[tokio::test]
async fn test_github_missing_form_is_login_failure() {
    let strategy = GitHubStrategy::default();
    let page = MockPage::showing(Screen::new("https://github.com/login"));

    let err = strategy
        .handle_login_flow(&page, &engine(), &credentials())
        .await
        .unwrap_err();

    match err {
        FlowEngineError::LoginFailed { provider, reason } => {
            assert_eq!(provider, "github");
            assert!(reason.contains("username"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_github_authorize_skips_cancel_button() {
    let strategy = GitHubStrategy::default();
    let page = MockPage::showing(
        Screen::new("https://github.com/login/oauth/authorize?state=abc123")
            .with(MockElement::new("button[type=\"submit\"]").text("Cancel"))
            .with(
                MockElement::new("button[type=\"submit\"]")
                    .text("Authorize octo-app")
                    .navigates_to(Screen::new(CALLBACK)),
            ),
    );

    strategy.handle_authorization(&page, &engine()).await.unwrap();
    assert_eq!(page.url(), CALLBACK);
}

#[tokio::test]
async fn test_github_missing_authorize_button_is_authorization_failure() {
    let strategy = GitHubStrategy::default();
    let page = MockPage::showing(
        Screen::new("https://github.com/login/oauth/authorize")
            .with(MockElement::new("button[type=\"submit\"]").text("Cancel")),
    );

    let err = strategy.click_authorize_button(&page, &engine()).await.unwrap_err();
    assert!(matches!(err, FlowEngineError::AuthorizationFailed { .. }));
}

#[tokio::test]
async fn test_google_two_step_login_clicks_next_between_fields() {
    let strategy = GoogleStrategy::default();
    let consent = Screen::new("https://accounts.google.com/signin/oauth/consent?state=abc123");
    let password_screen = Screen::new("https://accounts.google.com/v3/signin/challenge/pwd")
        .with(MockElement::new("input[type=\"password\"]"))
        .with(
            MockElement::new("button.VfPpkd-LgbsSe")
                .text("Next")
                .navigates_to(consent.clone()),
        );
    let page = MockPage::showing(
        Screen::new("https://accounts.google.com/v3/signin/identifier")
            .body("Sign in to continue to octo-app")
            .with(MockElement::new("input[type=\"email\"]"))
            .with(
                MockElement::new("button.VfPpkd-LgbsSe")
                    .text(" Next ")
                    .navigates_to(password_screen),
            ),
    );

    assert_eq!(strategy.login_steps(), LoginSteps::TwoStep);
    strategy.handle_login_flow(&page, &engine(), &credentials()).await.unwrap();

    assert_eq!(typed_then_clicked(&page.actions()), vec!["type", "click", "type", "click"]);
    assert_eq!(page.typed("input[type=\"email\"]"), "octocat@example.com");
    assert_eq!(page.typed("input[type=\"password\"]"), "hunter2");
    assert_eq!(page.url(), consent.url);
}

#[tokio::test]
async fn test_google_account_chooser_selects_matching_account() {
    let strategy = GoogleStrategy::default();
    let password_screen = Screen::new("https://accounts.google.com/v3/signin/challenge/pwd")
        .with(MockElement::new("input[type=\"password\"]"))
        .with(MockElement::new("#passwordNext button").text("Next"));
    let page = MockPage::showing(
        Screen::new("https://accounts.google.com/o/oauth2/auth/oauthchooseaccount")
            .body("Choose an account\nto continue to octo-app")
            .with(
                MockElement::new("div[data-email]")
                    .attr("data-email", "someone.else@example.com")
                    .text("Someone Else"),
            )
            .with(
                MockElement::new("div[data-email]")
                    .attr("data-email", "Octocat@Example.com")
                    .text("Octo Cat")
                    .navigates_to(password_screen),
            ),
    );

    strategy.handle_login_flow(&page, &engine(), &credentials()).await.unwrap();

    assert!(page.typed("input[type=\"email\"]").is_empty());
    assert_eq!(page.typed("input[type=\"password\"]"), "hunter2");
    assert_eq!(page.clicks(), vec!["div[data-email]", "#passwordNext button"]);
}

#[tokio::test]
async fn test_google_chooser_absent_is_not_fatal() {
    let strategy = GoogleStrategy::default();
    let page = MockPage::showing(Screen::new("https://accounts.google.com/signin/oauth/consent").body("octo-app wants access"));

    assert!(!strategy.choose_account(&page, &engine(), "octocat@example.com").await);
    assert!(page.clicks().is_empty());
}

#[tokio::test]
async fn test_microsoft_two_step_login_dismisses_stay_signed_in() {
    let strategy = MicrosoftStrategy::default();
    let consent = Screen::new("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?state=abc123");
    let kmsi = Screen::new("https://login.microsoftonline.com/kmsi")
        .body("Stay signed in?")
        .with(MockElement::new("#idBtn_Back").text("No").navigates_to(consent.clone()))
        .with(MockElement::new("#idSIButton9").text("Yes"));
    let password_screen = Screen::new("https://login.microsoftonline.com/common/login")
        .with(MockElement::new("input[type=\"password\"]"))
        .with(
            MockElement::new("input[type=\"submit\"][value=\"Sign in\"]")
                .text("Sign in")
                .navigates_to(kmsi),
        );
    let page = MockPage::showing(
        Screen::new("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?state=abc123")
            .with(MockElement::new("input[type=\"email\"]"))
            .with(
                MockElement::new("input[type=\"submit\"][value=\"Next\"]")
                    .text("Next")
                    .navigates_to(password_screen),
            ),
    );

    strategy.handle_login_flow(&page, &engine(), &credentials()).await.unwrap();

    assert_eq!(
        page.clicks(),
        vec![
            "input[type=\"submit\"][value=\"Next\"]",
            "input[type=\"submit\"][value=\"Sign in\"]",
            "#idBtn_Back",
        ]
    );
    assert_eq!(page.url(), consent.url);
}

#[tokio::test]
async fn test_microsoft_consent_with_per_scope_buttons() {
    let strategy = MicrosoftStrategy::default();
    let final_accept = MockElement::new("input[type=\"submit\"][value=\"Accept\"]")
        .text("Accept")
        .navigates_to(Screen::new(CALLBACK));
    let page = MockPage::showing(
        Screen::new("https://login.microsoftonline.com/common/consent")
            .with(
                MockElement::new("#idBtn_Accept")
                    .text("Allow Mail.Read")
                    .on_click(ClickEffect::Navigate(
                        Screen::new("https://login.microsoftonline.com/common/consent?step=2")
                            .with(final_accept),
                    )),
            ),
    );

    strategy.handle_authorization(&page, &engine()).await.unwrap();

    assert_eq!(
        page.clicks(),
        vec!["#idBtn_Accept", "input[type=\"submit\"][value=\"Accept\"]"]
    );
    assert_eq!(page.url(), CALLBACK);
}

#[tokio::test]
async fn test_atlassian_password_revealed_after_email() {
    let strategy = AtlassianStrategy::default();
    let page = MockPage::showing(
        Screen::new("https://id.atlassian.com/login")
            .with(MockElement::new("input[id=\"username\"]"))
            .with(
                MockElement::new("button[id=\"login-submit\"]")
                    .text("Continue")
                    .on_click(ClickEffect::Reveal(vec![MockElement::new("input[id=\"password\"]")])),
            ),
    );

    assert_eq!(strategy.login_steps(), LoginSteps::SingleStep);
    strategy.handle_login_flow(&page, &engine(), &credentials()).await.unwrap();

    assert_eq!(page.typed("input[id=\"password\"]"), "hunter2");
    assert_eq!(typed_then_clicked(&page.actions()), vec!["type", "click", "type", "click"]);
}

#[tokio::test]
async fn test_atlassian_selects_configured_site_before_accepting() {
    let strategy = AtlassianStrategy::default().with_site("acme");
    let accept = MockElement::new("button[id=\"approve\"]")
        .text("Accept")
        .navigates_to(Screen::new(CALLBACK));
    let options = vec![
        MockElement::new("div[role=\"option\"]").text("beta.atlassian.net"),
        MockElement::new("div[role=\"option\"]")
            .text("acme.atlassian.net")
            .on_click(ClickEffect::Reveal(vec![accept])),
    ];
    let page = MockPage::showing(
        Screen::new("https://auth.atlassian.com/authorize?state=abc123").with(
            MockElement::new("[data-testid=\"site-selector\"]")
                .text("Choose a site")
                .on_click(ClickEffect::Reveal(options)),
        ),
    );

    strategy.handle_authorization(&page, &engine()).await.unwrap();

    assert_eq!(
        page.clicks(),
        vec![
            "[data-testid=\"site-selector\"]",
            "div[role=\"option\"]",
            "button[id=\"approve\"]",
        ]
    );
    assert_eq!(page.url(), CALLBACK);
}

#[tokio::test]
async fn test_atlassian_without_site_selector_accepts_directly() {
    let strategy = AtlassianStrategy::default();
    let page = MockPage::showing(
        Screen::new("https://auth.atlassian.com/authorize?state=abc123").with(
            MockElement::new("button[id=\"approve\"]")
                .text("Accept")
                .navigates_to(Screen::new(CALLBACK)),
        ),
    );

    strategy.handle_authorization(&page, &engine()).await.unwrap();
    assert_eq!(page.clicks(), vec!["button[id=\"approve\"]"]);
}
