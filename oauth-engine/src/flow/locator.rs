//! Locator Engine
//!
//! Resolves one logical element from an ordered list of candidate locators,
//! with per-lookup timeouts and a retry policy between passes.

use crate::error::{FlowEngineError, FlowResult};
use crate::flow::backoff::RetryPolicy;
use crate::flow::model::{FlowTimeouts, Locator, LocatorSpec};
use crate::flow::page::{BrowserPage, PageElement};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Element resolution with fallback candidates and bounded retries
#[derive(Debug, Clone)]
pub struct LocatorEngine {
    policy: RetryPolicy,
    lookup_timeout: Duration,
    settle: Duration,
}

impl LocatorEngine {
    pub fn new(policy: RetryPolicy, lookup_timeout: Duration, settle: Duration) -> Self {
        Self {
            policy,
            lookup_timeout,
            settle,
        }
    }

    /// Engine using the lookup and settle timings of a flow
    pub fn from_timeouts(timeouts: &FlowTimeouts, policy: RetryPolicy) -> Self {
        Self::new(policy, timeouts.lookup(), timeouts.settle())
    }

    /// Single-pass engine for presence probes
    pub fn probe(&self, lookup_timeout: Duration) -> Self {
        Self::new(RetryPolicy::immediate(1), lookup_timeout, Duration::ZERO)
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Wait the fixed settle period
    pub async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }

    /// Resolve the first visible, enabled element matching any candidate.
    ///
    /// Candidates are tried in order, one bounded lookup each. When a whole
    /// pass finds nothing the engine waits per its retry policy and starts over.
    pub async fn resolve(
        &self,
        page: &dyn BrowserPage,
        spec: &LocatorSpec,
    ) -> FlowResult<Box<dyn PageElement>> {
        if spec.is_empty() {
            return Err(FlowEngineError::element_not_found(
                &spec.description,
                "no candidate locators configured",
            ));
        }

        let attempts = self.policy.attempts();
        let mut last_error = String::from("no candidate matched");

        for attempt in 0..attempts {
            match self.find_in_pass(page, spec, &mut last_error).await {
                Some((element, index)) => {
                    if attempt > 0 || index > 0 {
                        debug!(
                            "Found {} via candidate {} after {} pass(es)",
                            spec.description,
                            index + 1,
                            attempt + 1
                        );
                    }
                    return Ok(element);
                }
                None if attempt + 1 < attempts => {
                    debug!(
                        "{} not found (pass {}/{}), waiting {:?}",
                        spec.description,
                        attempt + 1,
                        attempts,
                        self.policy.delay_for(attempt)
                    );
                    self.policy.wait(attempt).await;
                }
                None => {}
            }
        }

        page.log_diagnostics(&spec.description).await;
        Err(FlowEngineError::element_not_found(&spec.description, last_error))
    }

    /// One pass over the candidates, without waiting
    pub async fn find_once(
        &self,
        page: &dyn BrowserPage,
        spec: &LocatorSpec,
    ) -> Option<Box<dyn PageElement>> {
        let mut last_error = String::new();
        self.find_in_pass(page, spec, &mut last_error)
            .await
            .map(|(element, _)| element)
    }

    /// Whether any candidate currently matches
    pub async fn is_present(&self, page: &dyn BrowserPage, spec: &LocatorSpec) -> bool {
        self.find_once(page, spec).await.is_some()
    }

    async fn find_in_pass(
        &self,
        page: &dyn BrowserPage,
        spec: &LocatorSpec,
        last_error: &mut String,
    ) -> Option<(Box<dyn PageElement>, usize)> {
        for (index, locator) in spec.candidates.iter().enumerate() {
            match self.lookup(page, locator).await {
                Ok(Some(element)) => return Some((element, index)),
                Ok(None) => {
                    *last_error = format!("no visible, enabled match for {}", locator);
                }
                Err(e) => {
                    debug!("Lookup of {} failed: {}", locator, e);
                    *last_error = e.to_string();
                }
            }
        }
        None
    }

    /// One bounded lookup for a single candidate
    async fn lookup(
        &self,
        page: &dyn BrowserPage,
        locator: &Locator,
    ) -> FlowResult<Option<Box<dyn PageElement>>> {
        let elements = match tokio::time::timeout(self.lookup_timeout, page.query_all(&locator.selector)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FlowEngineError::Browser(format!(
                    "lookup of '{}' timed out after {:?}",
                    locator.selector, self.lookup_timeout
                )))
            }
        };

        for element in elements {
            if !element.is_visible().await.unwrap_or(false) {
                continue;
            }
            if !element.is_enabled().await.unwrap_or(false) {
                continue;
            }
            if locator.inspects_text() {
                let text = element.text().await.unwrap_or_default();
                if !locator.matches_text(&text) {
                    continue;
                }
            }
            return Ok(Some(element));
        }

        Ok(None)
    }

    /// Scroll into view, click, then settle
    pub async fn click_element(&self, element: &dyn PageElement) -> FlowResult<()> {
        if let Err(e) = element.scroll_into_view().await {
            warn!("Scroll into view failed, clicking anyway: {}", e);
        }
        element.click().await?;
        self.settle().await;
        Ok(())
    }

    /// Resolve and click
    pub async fn click(&self, page: &dyn BrowserPage, spec: &LocatorSpec) -> FlowResult<()> {
        let element = self.resolve(page, spec).await?;
        info!("Clicking {}", spec.description);
        self.click_element(element.as_ref()).await
    }

    /// Click the element if it is present right now. Returns whether a click happened.
    pub async fn click_if_present(
        &self,
        page: &dyn BrowserPage,
        spec: &LocatorSpec,
    ) -> FlowResult<bool> {
        match self.find_once(page, spec).await {
            Some(element) => {
                info!("Clicking {}", spec.description);
                self.click_element(element.as_ref()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolve, focus, clear and type the whole value
    pub async fn fill(&self, page: &dyn BrowserPage, spec: &LocatorSpec, value: &str) -> FlowResult<()> {
        let element = self.prepare_input(page, spec).await?;
        element.type_text(value).await
    }

    /// Resolve, focus, clear and type the value one character at a time
    pub async fn type_per_character(
        &self,
        page: &dyn BrowserPage,
        spec: &LocatorSpec,
        value: &str,
        per_character_delay: Duration,
    ) -> FlowResult<()> {
        let element = self.prepare_input(page, spec).await?;
        for (index, ch) in value.chars().enumerate() {
            if index > 0 && !per_character_delay.is_zero() {
                tokio::time::sleep(per_character_delay).await;
            }
            element.type_text(&ch.to_string()).await?;
        }
        Ok(())
    }

    async fn prepare_input(
        &self,
        page: &dyn BrowserPage,
        spec: &LocatorSpec,
    ) -> FlowResult<Box<dyn PageElement>> {
        let element = self.resolve(page, spec).await?;
        debug!("Typing into {}", spec.description);

        if let Err(e) = element.scroll_into_view().await {
            warn!("Scroll into view failed: {}", e);
        }
        element.focus().await?;
        if let Err(e) = element.clear().await {
            warn!("Clearing {} failed: {}", spec.description, e);
        }
        Ok(element)
    }
}
