//! Browser Management Module
//!
//! Handles the Chromium process lifecycle and hands out one isolated browser
//! context per flow, so concurrent flows never share cookies or storage.

use crate::error::{FlowEngineError, FlowResult};
use crate::flow::page::{BrowserPage, ChromiumPage, PageSource};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::CloseParams;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Browser launch options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Run in headless mode (no visible UI)
    pub headless: bool,
    /// Upstream proxy, e.g. "http://127.0.0.1:8080"
    pub proxy: Option<String>,
    /// Additional Chrome arguments
    pub extra_args: Vec<String>,
    /// Ignore SSL certificate errors
    pub ignore_ssl_errors: bool,
    /// Window size
    pub window_size: Option<(u32, u32)>,
    /// Path to a Chrome/Chromium executable, detected when unset
    pub executable: Option<PathBuf>,
    /// Timeout applied to every driver call, in milliseconds
    pub operation_timeout_ms: u64,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            extra_args: Vec::new(),
            ignore_ssl_errors: false,
            window_size: Some((1280, 900)),
            executable: None,
            operation_timeout_ms: 30_000,
        }
    }
}

impl BrowserOptions {
    /// Create options for headed (visible) browser
    pub fn headed() -> Self {
        Self {
            headless: false,
            ..Default::default()
        }
    }

    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Route browser traffic through a proxy
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Browser launcher
#[derive(Debug, Default)]
pub struct BrowserManager;

impl BrowserManager {
    pub fn new() -> Self {
        Self
    }

    /// Launch a new Chromium instance
    pub async fn launch(&self, options: BrowserOptions) -> FlowResult<ChromiumSession> {
        let mut config_builder = BrowserConfig::builder();

        // Use a unique user data directory to avoid SingletonLock errors
        let user_data_dir = std::env::temp_dir().join(format!("oauth_browser_{}", Uuid::new_v4()));
        config_builder = config_builder.user_data_dir(&user_data_dir);

        // chromiumoxide defaults to headless, with_head() makes it visible
        if !options.headless {
            config_builder = config_builder.with_head();
        }

        if let Some(ref executable) = options.executable {
            config_builder = config_builder.chrome_executable(executable);
        }

        if let Some(ref proxy) = options.proxy {
            config_builder = config_builder.arg(format!("--proxy-server={}", proxy));
        }

        if options.ignore_ssl_errors {
            config_builder = config_builder.arg("--ignore-certificate-errors");
        }

        if let Some((width, height)) = options.window_size {
            config_builder = config_builder.arg(format!("--window-size={},{}", width, height));
        }

        for arg in &options.extra_args {
            config_builder = config_builder.arg(arg);
        }

        // Standard args for automation
        config_builder = config_builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");

        let config = config_builder
            .build()
            .map_err(FlowEngineError::BrowserLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FlowEngineError::BrowserLaunch(format!("Failed to launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser event error: {:?}", e);
                }
            }
        });

        info!(
            "Browser launched (headless: {}, proxy: {:?})",
            options.headless, options.proxy
        );

        Ok(ChromiumSession {
            browser: Arc::new(browser),
            handler_task,
            user_data_dir,
            operation_timeout: options.operation_timeout(),
        })
    }
}

/// A running Chromium process that opens one isolated context per page
pub struct ChromiumSession {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
    operation_timeout: Duration,
}

impl ChromiumSession {
    /// Get the underlying browser
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Close the browser and remove its temporary profile
    pub async fn close(self) -> FlowResult<()> {
        if let Err(e) = self.browser.execute(CloseParams::default()).await {
            warn!("Browser close command failed: {}", e);
        }
        self.handler_task.abort();
        info!("Browser closed");

        if self.user_data_dir.exists() {
            info!("Cleaning up browser profile: {:?}", self.user_data_dir);
            if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
                warn!("Failed to remove browser profile dir: {:?}", e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageSource for ChromiumSession {
    async fn open_page(&self) -> FlowResult<Box<dyn BrowserPage>> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| FlowEngineError::Browser(format!("Failed to create browser context: {}", e)))?
            .result
            .browser_context_id;

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(FlowEngineError::Browser)?;

        let page = self
            .browser
            .new_page(params)
            .await
            .map_err(|e| FlowEngineError::Browser(format!("Failed to open page: {}", e)))?;

        debug!("Opened page in isolated browser context {:?}", context_id);

        Ok(Box::new(
            ChromiumPage::new(page)
                .with_timeout(self.operation_timeout)
                .with_context(self.browser.clone(), context_id),
        ))
    }
}
