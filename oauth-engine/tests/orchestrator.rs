mod common;

use common::{fast_retry, fast_timeouts, Action, MockElement, MockPage, MockPageSource, RecordingSink, Screen, ScriptedMailbox};
use oauth_engine::provider::GitHubStrategy;
use oauth_engine::{
    Credentials, FlowEngineError, FlowOrchestrator, FlowPhase, FlowRequest, FlowTimeouts,
    MailboxCodeHandler, MailboxPolicy, MailboxQuery, Provider, ProviderKind, ProviderStrategy,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

const AUTH_URL: &str = "https://github.com/login/oauth/authorize?client_id=octo-app&state=abc123";
const CALLBACK: &str = "https://app/callback?code=XYZ&state=abc123";

fn request() -> FlowRequest {
    FlowRequest::new(
        AUTH_URL,
        "abc123",
        Credentials::new("octocat", "hunter2"),
        "/callback",
        Provider::from_kind(ProviderKind::GitHub),
    )
    .with_timeouts(fast_timeouts())
}

fn login_form(after_sign_in: Screen) -> Screen {
    Screen::default()
        .with(MockElement::new("input[name=\"login\"]"))
        .with(MockElement::new("input[name=\"password\"]"))
        .with(
            MockElement::new("input[type=\"submit\"][value=\"Sign in\"]")
                .text("Sign in")
                .navigates_to(after_sign_in),
        )
}

fn authorize_screen(after_authorize: Screen) -> Screen {
    Screen::new(AUTH_URL).with(
        MockElement::new("button[type=\"submit\"][value=\"Authorize\"]")
            .text("Authorize octo-app")
            .navigates_to(after_authorize),
    )
}

struct Harness {
    page: MockPage,
    source: Arc<MockPageSource>,
    sink: Arc<RecordingSink>,
    orchestrator: FlowOrchestrator,
}

fn harness(page: MockPage) -> Harness {
    let source = Arc::new(MockPageSource::new(page.clone()));
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = FlowOrchestrator::new(source.clone())
        .with_screenshots(sink.clone())
        .with_retry_policy(fast_retry());
    Harness {
        page,
        source,
        sink,
        orchestrator,
    }
}

#[tokio::test]
async fn test_single_step_login_redirects_with_code() {
    let h = harness(MockPage::new().route("oauth/authorize", login_form(Screen::new(CALLBACK))));

    let (result, state) = h.orchestrator.run_with_state(&request()).await;

    let code = result.unwrap();
    assert_eq!(code.code, "XYZ");
    assert_eq!(code.state.as_deref(), Some("abc123"));
    assert_eq!(code.callback_url, CALLBACK);
    assert_eq!(
        state.history(),
        &[
            FlowPhase::Init,
            FlowPhase::Navigated,
            FlowPhase::LoginCheck,
            FlowPhase::LoggingIn,
            FlowPhase::TwoFactorCheck,
            FlowPhase::ReturningToAuth,
            FlowPhase::CompletionCheck,
            FlowPhase::Completed,
        ]
    );
    assert_eq!(h.page.typed("input[name=\"login\"]"), "octocat");
    assert_eq!(h.sink.labels(), vec!["navigated", "login_submitted", "completed"]);
    assert!(h.page.is_closed());
}

#[tokio::test]
async fn test_error_redirect_is_authorization_failure() {
    let denied = Screen::new("https://app/callback?error=access_denied&state=abc123");
    let h = harness(MockPage::new().route("oauth/authorize", login_form(denied)));

    let (result, state) = h.orchestrator.run_with_state(&request()).await;

    match result {
        Err(FlowEngineError::AuthorizationFailed { reason }) => assert!(reason.contains("access_denied")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(state.phase(), FlowPhase::Failed);
    assert!(state.last_error().is_some());
    assert_eq!(state.last_url(), Some("https://app/callback?error=access_denied&state=abc123"));
    assert_eq!(h.sink.labels().last().map(String::as_str), Some("failed_authorization_failed"));
    assert!(h.page.is_closed());
}

#[tokio::test]
async fn test_authenticated_session_goes_straight_to_consent() {
    let h = harness(MockPage::new().route("oauth/authorize", authorize_screen(Screen::new(CALLBACK))));

    let (result, state) = h.orchestrator.run_with_state(&request()).await;

    assert_eq!(result.unwrap().code, "XYZ");
    assert!(!state.history().contains(&FlowPhase::LoggingIn));
    assert_eq!(
        &state.history()[state.history().len() - 4..],
        &[
            FlowPhase::AwaitingConsent,
            FlowPhase::Authorizing,
            FlowPhase::WaitingForCallback,
            FlowPhase::Completed,
        ]
    );
    assert!(h.sink.labels().contains(&"authorized".to_string()));
    assert!(h.page.typed("input[name=\"login\"]").is_empty());
}

#[tokio::test]
async fn test_previously_approved_app_skips_consent() {
    let h = harness(MockPage::new().route("oauth/authorize", Screen::new(CALLBACK)));

    let (result, state) = h.orchestrator.run_with_state(&request()).await;

    assert_eq!(result.unwrap().code, "XYZ");
    assert!(!state.history().contains(&FlowPhase::AwaitingConsent));
    assert!(h.page.clicks().is_empty());
}

#[tokio::test]
async fn test_navigation_failure_is_fatal_and_page_closed() {
    let h = harness(MockPage::new().failing_navigation());

    let (result, state) = h.orchestrator.run_with_state(&request()).await;

    assert!(matches!(result, Err(FlowEngineError::Navigation(_))));
    assert_eq!(state.history(), &[FlowPhase::Init, FlowPhase::Failed]);
    assert_eq!(h.source.opened(), 1);
    assert!(h.page.is_closed());
    // Navigation is not retried
    let navigations = h
        .page
        .actions()
        .iter()
        .filter(|action| matches!(action, Action::Navigate(_)))
        .count();
    assert_eq!(navigations, 1);
}

#[tokio::test]
async fn test_invalid_request_never_opens_a_page() {
    let h = harness(MockPage::new());
    let mut request = request();
    request.state = "other".to_string();

    let result = h.orchestrator.run(&request).await;

    assert!(matches!(result, Err(FlowEngineError::Configuration(_))));
    assert_eq!(h.source.opened(), 0);
}

#[tokio::test]
async fn test_state_mismatch_rejects_code() {
    let forged = Screen::new("https://app/callback?code=XYZ&state=forged");
    let h = harness(MockPage::new().route("oauth/authorize", login_form(forged)));

    let result = h.orchestrator.run(&request()).await;

    match result {
        Err(FlowEngineError::StateMismatch { expected, received }) => {
            assert_eq!(expected, "abc123");
            assert_eq!(received, "forged");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_callback_never_arrives() {
    let stuck = Screen::new(AUTH_URL).with(
        MockElement::new("button[type=\"submit\"][value=\"Authorize\"]").text("Authorize octo-app"),
    );
    let h = harness(MockPage::new().route("oauth/authorize", stuck));
    let timeouts = FlowTimeouts {
        callback_timeout_ms: 30,
        ..fast_timeouts()
    };

    let result = h.orchestrator.run(&request().with_timeouts(timeouts)).await;

    match result {
        Err(FlowEngineError::CallbackTimeout { last_url, .. }) => assert_eq!(last_url, AUTH_URL),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(h.page.is_closed());
}

#[tokio::test]
async fn test_overall_deadline_aborts_wait() {
    let stuck = Screen::new(AUTH_URL).with(
        MockElement::new("button[type=\"submit\"][value=\"Authorize\"]").text("Authorize octo-app"),
    );
    let h = harness(MockPage::new().route("oauth/authorize", stuck));
    let timeouts = FlowTimeouts {
        callback_timeout_ms: 60_000,
        flow_deadline_ms: 300,
        ..fast_timeouts()
    };

    let (result, state) = h.orchestrator.run_with_state(&request().with_timeouts(timeouts)).await;

    match result {
        Err(FlowEngineError::FlowTimeout { phase, deadline_ms }) => {
            assert_eq!(phase, FlowPhase::WaitingForCallback);
            assert_eq!(deadline_ms, 300);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(state.phase(), FlowPhase::Failed);
    assert!(h.page.is_closed());
}

#[tokio::test]
async fn test_login_bounce_returns_to_authorization_url() {
    let page = MockPage::new()
        .route_once("oauth/authorize", login_form(Screen::new("https://github.com/")))
        .route("oauth/authorize", authorize_screen(Screen::new(CALLBACK)));
    let h = harness(page);

    let result = h.orchestrator.run(&request()).await;

    assert_eq!(result.unwrap().code, "XYZ");
    let navigations: Vec<_> = h
        .page
        .actions()
        .into_iter()
        .filter(|action| matches!(action, Action::Navigate(_)))
        .collect();
    assert_eq!(
        navigations,
        vec![Action::Navigate(AUTH_URL.to_string()), Action::Navigate(AUTH_URL.to_string())]
    );
}

fn device_page(mailbox_code_leads_to: Screen) -> MockPage {
    let verification = Screen::new("https://github.com/sessions/verified-device")
        .with(MockElement::new("input[name=\"otp\"]"))
        .with(
            MockElement::new("button[type=\"submit\"]")
                .text("Verify")
                .navigates_to(mailbox_code_leads_to),
        );
    MockPage::new().route("oauth/authorize", login_form(verification))
}

fn device_handler(mailbox: Arc<ScriptedMailbox>) -> MailboxCodeHandler {
    let github = GitHubStrategy::default();
    let policy = MailboxPolicy::new(vec![MailboxQuery::from_sender("noreply@github.com")])
        .with_poll(RetryPolicy::fixed(2, Duration::from_millis(1)))
        .with_submit_wait(RetryPolicy::fixed(2, Duration::from_millis(1)))
        .with_per_character_delay(Duration::ZERO);
    MailboxCodeHandler::new(
        github.challenge_matcher(),
        github.locators().device_code.clone(),
        github.locators().device_submit.clone(),
        policy,
        mailbox,
    )
}

#[tokio::test]
async fn test_device_verification_then_consent() {
    let mailbox = Arc::new(ScriptedMailbox::always("Your device verification code: 482913"));
    let h = harness(device_page(authorize_screen(Screen::new(CALLBACK))));
    let request = request().with_two_factor(device_handler(mailbox.clone()).into());

    let (result, state) = h.orchestrator.run_with_state(&request).await;

    assert_eq!(result.unwrap().code, "XYZ");
    assert!(state.history().contains(&FlowPhase::Handling2FA));
    assert_eq!(h.page.typed("input[name=\"otp\"]"), "482913");
    assert_eq!(mailbox.calls(), 1);
    assert!(h.sink.labels().contains(&"two_factor".to_string()));
}

#[tokio::test]
async fn test_device_verification_mailbox_exhausted() {
    let mailbox = Arc::new(ScriptedMailbox::empty());
    let h = harness(device_page(authorize_screen(Screen::new(CALLBACK))));
    let request = request().with_two_factor(device_handler(mailbox.clone()).into());

    let result = h.orchestrator.run(&request).await;

    assert!(matches!(result, Err(FlowEngineError::MailboxCodeNotFound { attempts: 2 })));
    assert_eq!(mailbox.calls(), 2);
    assert!(h.page.is_closed());
}

#[tokio::test]
async fn test_challenge_without_handler_fails_fast() {
    let h = harness(device_page(Screen::new(CALLBACK)));

    let result = h.orchestrator.run(&request()).await;

    match result {
        Err(FlowEngineError::TwoFactorUnsupported { challenge, url }) => {
            assert_eq!(challenge, "github_device_verification");
            assert_eq!(url, "https://github.com/sessions/verified-device");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_flows_use_separate_pages() {
    let first = harness(MockPage::new().route("oauth/authorize", login_form(Screen::new(CALLBACK))));
    let second_callback = "https://app/callback?code=SECOND&state=abc123";
    let second = harness(MockPage::new().route("oauth/authorize", login_form(Screen::new(second_callback))));
    let (request_a, request_b) = (request(), request());

    let (a, b) = tokio::join!(first.orchestrator.run(&request_a), second.orchestrator.run(&request_b));

    assert_eq!(a.unwrap().code, "XYZ");
    assert_eq!(b.unwrap().code, "SECOND");
    assert_ne!(request_a.id, request_b.id);
}
