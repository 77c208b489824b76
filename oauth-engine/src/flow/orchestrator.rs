//! Flow Orchestrator Module
//!
//! Drives one authorization flow through its phases: navigate, login, second
//! factor, consent, callback. Every run ends in exactly one [`AuthorizationResult`].

use crate::error::{ErrorSeverity, FlowEngineError, FlowResult};
use crate::flow::backoff::RetryPolicy;
use crate::flow::callback::{denied, CallbackDetector, CallbackStatus};
use crate::flow::locator::LocatorEngine;
use crate::flow::model::{
    AuthorizationCode, AuthorizationResult, FlowPhase, FlowRequest, FlowState,
};
use crate::flow::page::{BrowserPage, PageSource};
use crate::flow::screenshot::ScreenshotSink;
use crate::provider::ProviderStrategy;
use crate::two_factor::TwoFactorHandler;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Interval between login-form probes
const LOGIN_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Runs authorization flows against pages from a [`PageSource`]
pub struct FlowOrchestrator {
    pages: Arc<dyn PageSource>,
    screenshots: Option<Arc<dyn ScreenshotSink>>,
    retry: RetryPolicy,
}

impl FlowOrchestrator {
    pub fn new(pages: Arc<dyn PageSource>) -> Self {
        Self {
            pages,
            screenshots: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Capture screenshots at milestones and on failure
    pub fn with_screenshots(mut self, sink: Arc<dyn ScreenshotSink>) -> Self {
        self.screenshots = Some(sink);
        self
    }

    /// Retry policy for element lookups
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Run one flow to its terminal result
    pub async fn run(&self, request: &FlowRequest) -> AuthorizationResult {
        self.run_with_state(request).await.0
    }

    /// Run one flow and also return its final state, including the phase history
    pub async fn run_with_state(&self, request: &FlowRequest) -> (AuthorizationResult, FlowState) {
        let span = info_span!(
            "oauth_flow",
            flow_id = %request.id,
            provider = %request.provider.kind()
        );
        self.execute(request).instrument(span).await
    }

    async fn execute(&self, request: &FlowRequest) -> (AuthorizationResult, FlowState) {
        let mut state = FlowState::new(request.id);

        if let Err(e) = request.validate() {
            error!("Rejected flow request: {}", e);
            state.fail(&e);
            return (Err(e), state);
        }

        let page = match self.pages.open_page().await {
            Ok(page) => page,
            Err(e) => {
                error!("Could not open a page for the flow: {}", e);
                state.fail(&e);
                return (Err(e), state);
            }
        };

        info!(
            "Starting {} authorization flow (deadline {:?})",
            request.provider.kind(),
            request.timeouts.flow_deadline()
        );

        let deadline = request.timeouts.flow_deadline();
        let driven = tokio::time::timeout(deadline, self.drive(page.as_ref(), request, &mut state)).await;
        let outcome = match driven {
            Ok(result) => result,
            Err(_) => Err(FlowEngineError::FlowTimeout {
                phase: state.phase(),
                deadline_ms: deadline.as_millis() as u64,
            }),
        };

        let result = match outcome {
            Ok(code) => {
                if state.phase() != FlowPhase::Completed {
                    state.advance(FlowPhase::Completed);
                }
                self.capture(page.as_ref(), "completed").await;
                info!(
                    "Authorization code obtained in {:?} via {:?}",
                    state.elapsed(),
                    state.history()
                );
                Ok(code)
            }
            Err(e) => {
                if let Ok(url) = page.current_url().await {
                    state.observe_url(url);
                }
                let phase = state.phase();
                state.fail(&e);
                let last_url = state.last_url().unwrap_or("<unknown>");
                if e.severity() >= ErrorSeverity::High {
                    error!("Flow failed [{}] during {}: {} (last URL: {})", e.category(), phase, e, last_url);
                } else {
                    warn!("Flow failed [{}] during {}: {} (last URL: {})", e.category(), phase, e, last_url);
                }
                self.capture(page.as_ref(), &format!("failed_{}", e.category())).await;
                Err(e)
            }
        };

        if let Err(e) = self.pages.close_page(page).await {
            warn!("Failed to close flow page: {}", e);
        }

        (result, state)
    }

    async fn drive(
        &self,
        page: &dyn BrowserPage,
        request: &FlowRequest,
        state: &mut FlowState,
    ) -> AuthorizationResult {
        let timeouts = &request.timeouts;
        let provider = &request.provider;
        let engine = LocatorEngine::from_timeouts(timeouts, self.retry.clone());
        let detector = CallbackDetector::new(&request.redirect_pattern, &request.state);

        let fallback_handler;
        let two_factor = match &request.two_factor {
            Some(handler) => handler,
            None => {
                fallback_handler = provider.default_two_factor();
                &fallback_handler
            }
        };

        // Init -> Navigated
        self.open_authorization_url(page, request).await?;
        self.observe(page, state).await;
        state.advance(FlowPhase::Navigated);
        self.capture(page, "navigated").await;

        // LoginCheck
        state.advance(FlowPhase::LoginCheck);
        if self.login_form_present(page, request, &engine, &detector, state).await {
            state.advance(FlowPhase::LoggingIn);
            provider
                .handle_login_flow(page, &engine, &request.credentials)
                .await?;
            self.capture(page, "login_submitted").await;
            sleep_if_nonzero(timeouts.after_login()).await;

            state.advance(FlowPhase::TwoFactorCheck);
            let url = self.observe(page, state).await;
            if two_factor.is_required(&url) {
                state.advance(FlowPhase::Handling2FA);
                self.capture(page, "two_factor").await;
                two_factor.handle(page, &engine).await?;
                engine.settle().await;
            }

            state.advance(FlowPhase::ReturningToAuth);
            self.return_to_authorization(page, request, two_factor, &detector, state)
                .await?;
        } else {
            info!("No login form shown, session already authenticated");
        }

        // CompletionCheck
        state.advance(FlowPhase::CompletionCheck);
        let url = self.observe(page, state).await;
        if let Some(code) = arrived(&detector, &url)? {
            info!("Provider redirected without a consent screen");
            state.advance(FlowPhase::Completed);
            return Ok(code);
        }

        // AwaitingConsent -> Authorizing
        state.advance(FlowPhase::AwaitingConsent);
        engine.settle().await;
        state.advance(FlowPhase::Authorizing);

        if let Err(e) = provider.handle_authorization(page, &engine).await {
            let url = self.observe(page, state).await;
            if let Some(code) = arrived(&detector, &url)? {
                warn!("Consent handling failed but the callback already arrived: {}", e);
                state.advance(FlowPhase::Completed);
                return Ok(code);
            }
            return Err(e);
        }
        self.capture(page, "authorized").await;

        // WaitingForCallback
        state.advance(FlowPhase::WaitingForCallback);
        let code = detector
            .wait_for_callback(page, timeouts.callback_timeout(), timeouts.callback_poll())
            .await?;
        state.advance(FlowPhase::Completed);
        Ok(code)
    }

    /// Navigate to the authorization URL and wait for the load. Failures are fatal.
    async fn open_authorization_url(&self, page: &dyn BrowserPage, request: &FlowRequest) -> FlowResult<()> {
        info!("Navigating to authorization URL");
        page.navigate(&request.authorization_url)
            .await
            .map_err(as_navigation)?;
        page.wait_for_load(request.timeouts.page_load())
            .await
            .map_err(as_navigation)
    }

    /// Poll for the provider's login field until the login-check timeout.
    /// Arriving at the callback counts as "no login needed".
    async fn login_form_present(
        &self,
        page: &dyn BrowserPage,
        request: &FlowRequest,
        engine: &LocatorEngine,
        detector: &CallbackDetector,
        state: &mut FlowState,
    ) -> bool {
        let timeouts = &request.timeouts;
        // Provider pages hydrate after the load event
        sleep_if_nonzero(timeouts.login_probe_delay()).await;

        let probe = engine.probe(timeouts.lookup());
        let login_field = request.provider.login_field();
        let start = Instant::now();

        loop {
            let attempt = state.record_attempt();
            if probe.is_present(page, login_field).await {
                debug!("{} found on probe {}", login_field.description, attempt);
                return true;
            }

            let url = self.observe(page, state).await;
            if detector.matches(&url) {
                return false;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeouts.login_check() {
                debug!("{} absent after {} probe(s)", login_field.description, attempt);
                return false;
            }
            tokio::time::sleep(LOGIN_PROBE_INTERVAL.min(timeouts.login_check() - elapsed)).await;
        }
    }

    /// Go back to the authorization URL when login left the OAuth surface
    async fn return_to_authorization(
        &self,
        page: &dyn BrowserPage,
        request: &FlowRequest,
        two_factor: &TwoFactorHandler,
        detector: &CallbackDetector,
        state: &mut FlowState,
    ) -> FlowResult<()> {
        let url = self.observe(page, state).await;
        if detector.matches(&url) {
            return Ok(());
        }

        let off_surface = !request
            .provider
            .is_on_authorization_surface(&url, &request.authorization_url);
        if off_surface || two_factor.is_required(&url) {
            info!("Returning to authorization URL from {}", url);
            self.open_authorization_url(page, request).await?;
            sleep_if_nonzero(request.timeouts.settle()).await;
            self.observe(page, state).await;
        }
        Ok(())
    }

    /// Record and return the current URL. Read failures keep the last known URL.
    async fn observe(&self, page: &dyn BrowserPage, state: &mut FlowState) -> String {
        match page.current_url().await {
            Ok(url) => {
                state.observe_url(url.clone());
                url
            }
            Err(e) => {
                debug!("Could not read current URL: {}", e);
                state.last_url().unwrap_or_default().to_string()
            }
        }
    }

    async fn capture(&self, page: &dyn BrowserPage, label: &str) {
        if let Some(sink) = &self.screenshots {
            sink.capture(page, label).await;
        }
    }
}

/// Code on the URL if the callback has arrived. A denial is an error.
fn arrived(detector: &CallbackDetector, url: &str) -> FlowResult<Option<AuthorizationCode>> {
    match detector.detect_url(url)? {
        CallbackStatus::Arrived(code) => Ok(Some(code)),
        CallbackStatus::Denied { error, description } => Err(denied(&error, description.as_deref())),
        CallbackStatus::NotYet => Ok(None),
    }
}

fn as_navigation(err: FlowEngineError) -> FlowEngineError {
    match err {
        FlowEngineError::Navigation(_) => err,
        other => FlowEngineError::Navigation(other.to_string()),
    }
}

async fn sleep_if_nonzero(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
