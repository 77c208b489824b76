//! OAuth Engine - Browser-driven OAuth authorization-code flows
//!
//! This crate drives a headless browser through third-party OAuth 2.0
//! authorization-code flows and returns the authorization code from the
//! redirect, without human interaction.
//!
//! ## Core Concepts
//!
//! - **FlowRequest**: Everything one flow needs: authorization URL, state, credentials, provider
//! - **ProviderStrategy**: Per-provider login and consent behaviour (Google, Microsoft, GitHub, Atlassian)
//! - **LocatorSpec**: Ordered fallback locators for one logical element
//! - **TwoFactorHandler**: Skip, mailbox-code or fail-fast handling of secondary challenges
//! - **FlowOrchestrator**: The state machine that sequences a flow to exactly one result
//!
//! ## Example
//!
//! ```rust,ignore
//! use oauth_engine::{BrowserManager, BrowserOptions, Credentials, FlowOrchestrator, FlowRequest, Provider, ProviderKind};
//! use std::sync::Arc;
//!
//! let session = Arc::new(BrowserManager::new().launch(BrowserOptions::default()).await?);
//! let request = FlowRequest::new(
//!     "https://github.com/login/oauth/authorize?client_id=abc&state=xyz",
//!     "xyz",
//!     Credentials::new("octocat", "hunter2"),
//!     "/callback",
//!     Provider::from_kind(ProviderKind::GitHub),
//! );
//!
//! let code = FlowOrchestrator::new(session).run(&request).await?;
//! ```

pub mod error;
pub mod flow;
pub mod provider;
pub mod two_factor;

// Re-exports
pub use error::{ErrorSeverity, FlowEngineError, FlowResult};
pub use flow::backoff::{BackoffStrategy, RetryPolicy};
pub use flow::browser::{BrowserManager, BrowserOptions, ChromiumSession};
pub use flow::callback::{CallbackDetector, CallbackStatus};
pub use flow::locator::LocatorEngine;
pub use flow::model::{
    AuthorizationCode, AuthorizationResult, Credentials, FlowPhase, FlowRequest, FlowState,
    FlowTimeouts, Locator, LocatorSpec, ProviderKind, TextMatch, TwoFactorChallenge,
};
pub use flow::orchestrator::FlowOrchestrator;
pub use flow::page::{BrowserPage, ChromiumPage, PageElement, PageSource};
pub use flow::screenshot::{DirectoryScreenshotSink, ScreenshotSink};
pub use provider::{LoginSteps, Provider, ProviderConfig, ProviderStrategy};
pub use secrecy::SecretString;
pub use two_factor::{
    ChallengeMatcher, CodeExtractor, MailboxCodeHandler, MailboxOracle, MailboxPolicy,
    MailboxQuery, TwoFactorHandler,
};
