//! Page Controller Module
//!
//! The browser seam: every page interaction the engine performs goes through
//! [`BrowserPage`] and [`PageElement`]. [`ChromiumPage`] drives a real Chromium
//! tab through chromiumoxide.

use crate::error::{FlowEngineError, FlowResult};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::DisposeBrowserContextParams;
use chromiumoxide::{Browser, Element, Page};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default timeout for driver operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between `document.readyState` checks
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(250);

const IS_VISIBLE_JS: &str = r#"function() {
    const rect = this.getBoundingClientRect();
    const style = window.getComputedStyle(this);
    return rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden'
        && style.display !== 'none'
        && style.opacity !== '0';
}"#;

const IS_ENABLED_JS: &str = r#"function() {
    return !this.disabled && this.getAttribute('aria-disabled') !== 'true';
}"#;

const CLEAR_VALUE_JS: &str = r#"function() {
    if ('value' in this) {
        this.value = '';
        this.dispatchEvent(new Event('input', { bubbles: true }));
    }
}"#;

const PAGE_SUMMARY_JS: &str = r#"({
    url: window.location.href,
    title: document.title,
    forms: document.querySelectorAll('form').length,
    controls: document.querySelectorAll('input, button').length,
    formHtml: Array.from(document.querySelectorAll('form'))
        .map(f => f.outerHTML.substring(0, 200))
        .join('\n---\n')
})"#;

/// One element on a page
#[async_trait]
pub trait PageElement: Send + Sync {
    /// Rendered with a non-empty box and not hidden by style
    async fn is_visible(&self) -> FlowResult<bool>;

    /// Not disabled
    async fn is_enabled(&self) -> FlowResult<bool>;

    /// Rendered text, falling back to the `value` attribute for inputs
    async fn text(&self) -> FlowResult<String>;

    async fn attribute(&self, name: &str) -> FlowResult<Option<String>>;

    async fn scroll_into_view(&self) -> FlowResult<()>;

    async fn click(&self) -> FlowResult<()>;

    async fn focus(&self) -> FlowResult<()>;

    /// Empty the element's value
    async fn clear(&self) -> FlowResult<()>;

    /// Send keystrokes for `text` to the focused element
    async fn type_text(&self, text: &str) -> FlowResult<()>;

    /// Press one named key, e.g. "Enter"
    async fn press_key(&self, key: &str) -> FlowResult<()>;
}

/// One browser tab
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(&self, url: &str) -> FlowResult<()>;

    /// Wait until the document reports it has loaded
    async fn wait_for_load(&self, timeout: Duration) -> FlowResult<()>;

    async fn current_url(&self) -> FlowResult<String>;

    /// All elements matching a CSS selector, in document order
    async fn query_all(&self, selector: &str) -> FlowResult<Vec<Box<dyn PageElement>>>;

    /// Visible text of the document body
    async fn body_text(&self) -> FlowResult<String>;

    /// PNG screenshot of the viewport
    async fn screenshot(&self) -> FlowResult<Vec<u8>>;

    async fn close(&self) -> FlowResult<()>;

    /// Log what the page looks like, used when a lookup is exhausted
    async fn log_diagnostics(&self, _context: &str) {}
}

/// Opens and releases pages for flows. Supplied by the caller.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn open_page(&self) -> FlowResult<Box<dyn BrowserPage>>;

    async fn close_page(&self, page: Box<dyn BrowserPage>) -> FlowResult<()> {
        page.close().await
    }
}

fn driver_error(operation: &str, err: impl std::fmt::Display) -> FlowEngineError {
    FlowEngineError::Browser(format!("{} failed: {}", operation, err))
}

/// Run a driver future under a timeout
async fn bounded<T, E, F>(timeout: Duration, operation: &str, fut: F) -> FlowResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| driver_error(operation, e)),
        Err(_) => Err(FlowEngineError::Browser(format!(
            "{} timed out after {:?}",
            operation, timeout
        ))),
    }
}

/// Element handle backed by chromiumoxide
pub struct ChromiumElement {
    element: Element,
    timeout: Duration,
}

impl ChromiumElement {
    async fn call_bool(&self, function: &str, operation: &str) -> FlowResult<bool> {
        let returns = bounded(
            self.timeout,
            operation,
            self.element.call_js_fn(function, false),
        )
        .await?;
        Ok(returns
            .result
            .value
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }
}

#[async_trait]
impl PageElement for ChromiumElement {
    async fn is_visible(&self) -> FlowResult<bool> {
        self.call_bool(IS_VISIBLE_JS, "Visibility check").await
    }

    async fn is_enabled(&self) -> FlowResult<bool> {
        self.call_bool(IS_ENABLED_JS, "Enabled check").await
    }

    async fn text(&self) -> FlowResult<String> {
        let inner = bounded(self.timeout, "Text extraction", self.element.inner_text()).await?;
        match inner {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Ok(self.attribute("value").await?.unwrap_or_default()),
        }
    }

    async fn attribute(&self, name: &str) -> FlowResult<Option<String>> {
        bounded(self.timeout, "Attribute read", self.element.attribute(name)).await
    }

    async fn scroll_into_view(&self) -> FlowResult<()> {
        bounded(self.timeout, "Scroll", self.element.scroll_into_view()).await?;
        Ok(())
    }

    async fn click(&self) -> FlowResult<()> {
        bounded(self.timeout, "Click", self.element.click()).await?;
        Ok(())
    }

    async fn focus(&self) -> FlowResult<()> {
        bounded(self.timeout, "Focus", self.element.focus()).await?;
        Ok(())
    }

    async fn clear(&self) -> FlowResult<()> {
        bounded(
            self.timeout,
            "Clear",
            self.element.call_js_fn(CLEAR_VALUE_JS, false),
        )
        .await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> FlowResult<()> {
        bounded(self.timeout, "Type", self.element.type_str(text)).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> FlowResult<()> {
        bounded(self.timeout, "Key press", self.element.press_key(key)).await?;
        Ok(())
    }
}

/// Page controller for a Chromium tab
pub struct ChromiumPage {
    page: Page,
    default_timeout: Duration,
    context: Option<(Arc<Browser>, BrowserContextId)>,
}

impl ChromiumPage {
    /// Create a new page controller
    pub fn new(page: Page) -> Self {
        Self {
            page,
            default_timeout: DEFAULT_TIMEOUT,
            context: None,
        }
    }

    /// Set default timeout for operations
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Dispose this browser context when the page closes
    pub fn with_context(mut self, browser: Arc<Browser>, context_id: BrowserContextId) -> Self {
        self.context = Some((browser, context_id));
        self
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: &str) -> FlowResult<T> {
        let result = bounded(self.default_timeout, "Script evaluation", self.page.evaluate(script)).await?;
        result
            .into_value::<T>()
            .map_err(|e| driver_error("Script result parsing", e))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &str) -> FlowResult<()> {
        info!("Navigating to: {}", url);

        match tokio::time::timeout(self.default_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FlowEngineError::Navigation(format!(
                "Failed to navigate to {}: {}",
                url, e
            ))),
            Err(_) => Err(FlowEngineError::Navigation(format!(
                "Navigation to {} timed out after {:?}",
                url, self.default_timeout
            ))),
        }
    }

    async fn wait_for_load(&self, timeout: Duration) -> FlowResult<()> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            match self.evaluate::<bool>("document.readyState === 'complete'").await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // The execution context is replaced while a navigation commits
                Err(e) => debug!("Load check failed, retrying: {}", e),
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
        Err(FlowEngineError::Navigation(format!(
            "Page did not finish loading within {:?}",
            timeout
        )))
    }

    async fn current_url(&self) -> FlowResult<String> {
        self.evaluate::<String>("window.location.href").await
    }

    async fn query_all(&self, selector: &str) -> FlowResult<Vec<Box<dyn PageElement>>> {
        let elements = bounded(self.default_timeout, "Element lookup", self.page.find_elements(selector)).await?;
        Ok(elements
            .into_iter()
            .map(|element| {
                Box::new(ChromiumElement {
                    element,
                    timeout: self.default_timeout,
                }) as Box<dyn PageElement>
            })
            .collect())
    }

    async fn body_text(&self) -> FlowResult<String> {
        self.evaluate::<String>("document.body ? document.body.innerText : ''")
            .await
    }

    async fn screenshot(&self) -> FlowResult<Vec<u8>> {
        bounded(
            self.default_timeout,
            "Screenshot",
            self.page
                .screenshot(chromiumoxide::page::ScreenshotParams::default()),
        )
        .await
    }

    async fn close(&self) -> FlowResult<()> {
        let closed = bounded(self.default_timeout, "Page close", self.page.clone().close()).await;

        if let Some((browser, context_id)) = &self.context {
            let params = DisposeBrowserContextParams::new(context_id.clone());
            if let Err(e) = bounded(self.default_timeout, "Context disposal", browser.execute(params)).await {
                warn!("Failed to dispose browser context: {}", e);
            }
        }

        closed
    }

    async fn log_diagnostics(&self, context: &str) {
        error!("Element search failed: {}", context);

        let summary = match self.evaluate::<serde_json::Value>(PAGE_SUMMARY_JS).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("   Page summary unavailable: {}", e);
                return;
            }
        };

        error!("   Current page URL: {}", summary["url"].as_str().unwrap_or("<unknown>"));
        error!("   Page title: {}", summary["title"].as_str().unwrap_or(""));
        error!(
            "   Page has {} form(s), {} input(s) and button(s)",
            summary["forms"].as_i64().unwrap_or(0),
            summary["controls"].as_i64().unwrap_or(0)
        );
        if let Some(html) = summary["formHtml"].as_str().filter(|html| !html.is_empty()) {
            error!("   Form HTML snippets:\n{}", html);
        }
    }
}
