//! Callback Detector
//!
//! Recognizes arrival at the redirect URI and extracts the authorization code.

use crate::error::{FlowEngineError, FlowResult};
use crate::flow::model::{AuthorizationCode, AuthorizationResult};
use crate::flow::page::BrowserPage;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Log progress every this many callback checks
const PROGRESS_LOG_EVERY: u32 = 8;

/// Outcome of inspecting one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Not at the redirect URI yet, or the code has not landed
    NotYet,
    Arrived(AuthorizationCode),
    /// The provider redirected with an OAuth error instead of a code
    Denied {
        error: String,
        description: Option<String>,
    },
}

/// Matches the redirect URI and validates the returned state
#[derive(Debug, Clone)]
pub struct CallbackDetector {
    pattern: String,
    expected_state: String,
}

impl CallbackDetector {
    pub fn new(pattern: impl Into<String>, expected_state: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            expected_state: expected_state.into(),
        }
    }

    /// Whether the URL is the redirect URI.
    ///
    /// An absolute pattern must match scheme, host, port and a path prefix. A bare
    /// path pattern must match the end of the URL path. Both stop at `/` boundaries.
    pub fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        if self.pattern.contains("://") {
            let Ok(expected) = Url::parse(&self.pattern) else {
                return false;
            };
            return parsed.scheme() == expected.scheme()
                && parsed.host_str() == expected.host_str()
                && parsed.port_or_known_default() == expected.port_or_known_default()
                && path_has_prefix(parsed.path(), expected.path());
        }

        let pattern = self.pattern.trim_end_matches('/');
        if pattern.is_empty() {
            return false;
        }
        let path = parsed.path().trim_end_matches('/');
        match path.strip_suffix(pattern) {
            Some(head) => head.is_empty() || pattern.starts_with('/') || head.ends_with('/'),
            None => false,
        }
    }

    /// Inspect a URL. Pure: repeated calls on the same URL give the same answer.
    pub fn detect_url(&self, url: &str) -> FlowResult<CallbackStatus> {
        if !self.matches(url) {
            return Ok(CallbackStatus::NotYet);
        }

        let parsed = Url::parse(url)
            .map_err(|e| FlowEngineError::authorization_failed(format!("Unparseable callback URL: {}", e)))?;

        let param = |name: &str| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        if let Some(code) = param("code").filter(|code| !code.is_empty()) {
            let state = param("state");
            if state.as_deref() != Some(self.expected_state.as_str()) {
                return Err(FlowEngineError::StateMismatch {
                    expected: self.expected_state.clone(),
                    received: state.unwrap_or_else(|| "<missing>".to_string()),
                });
            }
            return Ok(CallbackStatus::Arrived(AuthorizationCode {
                code,
                state,
                callback_url: url.to_string(),
            }));
        }

        if let Some(error) = param("error") {
            return Ok(CallbackStatus::Denied {
                error,
                description: param("error_description"),
            });
        }

        Ok(CallbackStatus::NotYet)
    }

    /// Inspect the page's current URL
    pub async fn detect(&self, page: &dyn BrowserPage) -> FlowResult<CallbackStatus> {
        let url = page.current_url().await?;
        self.detect_url(&url)
    }

    /// Poll until the code arrives, the provider denies, or `timeout` elapses
    pub async fn wait_for_callback(
        &self,
        page: &dyn BrowserPage,
        timeout: Duration,
        interval: Duration,
    ) -> AuthorizationResult {
        let start = Instant::now();
        let mut checks: u32 = 0;
        let mut last_url = String::new();

        info!("Waiting up to {:?} for redirect to {}", timeout, self.pattern);

        loop {
            checks += 1;
            match page.current_url().await {
                Ok(url) => {
                    match self.detect_url(&url)? {
                        CallbackStatus::Arrived(code) => {
                            info!("Callback received after {} check(s)", checks);
                            return Ok(code);
                        }
                        CallbackStatus::Denied { error, description } => {
                            return Err(denied(&error, description.as_deref()));
                        }
                        CallbackStatus::NotYet => {}
                    }
                    last_url = url;
                }
                // Reading the URL fails while a navigation is committing
                Err(e) => debug!("Could not read URL while waiting for callback: {}", e),
            }

            if checks % PROGRESS_LOG_EVERY == 0 {
                info!(
                    "Still waiting for callback ({:?} elapsed), current URL: {}",
                    start.elapsed(),
                    last_url
                );
            }

            if start.elapsed() >= timeout {
                warn!("Callback did not arrive within {:?}", timeout);
                return Err(FlowEngineError::CallbackTimeout {
                    waited_ms: start.elapsed().as_millis() as u64,
                    last_url,
                });
            }

            tokio::time::sleep(interval).await;
        }
    }
}

/// Whether `path` is `prefix` or lies under it, on a segment boundary
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let path = path.trim_end_matches('/');
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Authorization failure for an OAuth error redirect
pub(crate) fn denied(error: &str, description: Option<&str>) -> FlowEngineError {
    match description {
        Some(description) => FlowEngineError::authorization_failed(format!(
            "provider returned error '{}': {}",
            error, description
        )),
        None => FlowEngineError::authorization_failed(format!("provider returned error '{}'", error)),
    }
}
