//! OAuth Engine Error Types

use crate::flow::model::FlowPhase;
use thiserror::Error;

/// Main error type for the OAuth engine
#[derive(Debug, Error)]
pub enum FlowEngineError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Browser operation failed: {0}")]
    Browser(String),

    #[error("Page navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {description} (last error: {last_error})")]
    ElementNotFound { description: String, last_error: String },

    #[error("Login failed for {provider}: {reason}")]
    LoginFailed { provider: String, reason: String },

    #[error("Authorization failed: {reason}")]
    AuthorizationFailed { reason: String },

    #[error("Two-factor challenge '{challenge}' could not be handled automatically. URL: {url}")]
    TwoFactorUnsupported { challenge: String, url: String },

    #[error("No verification code found in mailbox after {attempts} attempts")]
    MailboxCodeNotFound { attempts: u32 },

    #[error("Verification message found but no code could be extracted")]
    MailboxCodeUnparseable,

    #[error("Mailbox query failed: {0}")]
    Mailbox(String),

    #[error("Callback state mismatch: expected '{expected}', received '{received}'")]
    StateMismatch { expected: String, received: String },

    #[error("Timed out waiting for callback after {waited_ms}ms (last URL: {last_url})")]
    CallbackTimeout { waited_ms: u64, last_url: String },

    #[error("Flow deadline of {deadline_ms}ms exceeded during {phase}")]
    FlowTimeout { phase: FlowPhase, deadline_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FlowEngineError {
    /// Create an element-not-found error for a logical element
    pub fn element_not_found(description: &str, last_error: impl Into<String>) -> Self {
        Self::ElementNotFound {
            description: description.to_string(),
            last_error: last_error.into(),
        }
    }

    /// Create a login failure for a provider step
    pub fn login_failed(provider: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::LoginFailed {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an authorization failure
    pub fn authorization_failed(reason: impl Into<String>) -> Self {
        Self::AuthorizationFailed {
            reason: reason.into(),
        }
    }

    /// Check if a higher level may retry the failed operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            FlowEngineError::ElementNotFound { .. } => true,
            FlowEngineError::Browser(_) => true,
            FlowEngineError::Mailbox(_) => true,

            FlowEngineError::BrowserLaunch(_) => false,
            FlowEngineError::Navigation(_) => false,
            FlowEngineError::LoginFailed { .. } => false,
            FlowEngineError::AuthorizationFailed { .. } => false,
            FlowEngineError::TwoFactorUnsupported { .. } => false,
            FlowEngineError::MailboxCodeNotFound { .. } => false,
            FlowEngineError::MailboxCodeUnparseable => false,
            FlowEngineError::StateMismatch { .. } => false,
            FlowEngineError::CallbackTimeout { .. } => false,
            FlowEngineError::FlowTimeout { .. } => false,
            FlowEngineError::Configuration(_) => false,
            FlowEngineError::Io(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlowEngineError::StateMismatch { .. } => ErrorSeverity::Critical,
            FlowEngineError::BrowserLaunch(_) => ErrorSeverity::High,
            FlowEngineError::Configuration(_) => ErrorSeverity::High,
            FlowEngineError::TwoFactorUnsupported { .. } => ErrorSeverity::High,
            FlowEngineError::Navigation(_) => ErrorSeverity::Medium,
            FlowEngineError::LoginFailed { .. } => ErrorSeverity::Medium,
            FlowEngineError::AuthorizationFailed { .. } => ErrorSeverity::Medium,
            FlowEngineError::MailboxCodeNotFound { .. } => ErrorSeverity::Medium,
            FlowEngineError::MailboxCodeUnparseable => ErrorSeverity::Medium,
            FlowEngineError::CallbackTimeout { .. } => ErrorSeverity::Medium,
            FlowEngineError::FlowTimeout { .. } => ErrorSeverity::Medium,
            FlowEngineError::Io(_) => ErrorSeverity::Medium,
            FlowEngineError::ElementNotFound { .. } => ErrorSeverity::Low,
            FlowEngineError::Browser(_) => ErrorSeverity::Low,
            FlowEngineError::Mailbox(_) => ErrorSeverity::Low,
        }
    }

    /// Short label used in structured logs and screenshot names
    pub fn category(&self) -> &'static str {
        match self {
            FlowEngineError::BrowserLaunch(_) => "browser_launch",
            FlowEngineError::Browser(_) => "browser",
            FlowEngineError::Navigation(_) => "navigation",
            FlowEngineError::ElementNotFound { .. } => "element_not_found",
            FlowEngineError::LoginFailed { .. } => "login_failed",
            FlowEngineError::AuthorizationFailed { .. } => "authorization_failed",
            FlowEngineError::TwoFactorUnsupported { .. } => "two_factor_unsupported",
            FlowEngineError::MailboxCodeNotFound { .. } => "mailbox_code_not_found",
            FlowEngineError::MailboxCodeUnparseable => "mailbox_code_unparseable",
            FlowEngineError::Mailbox(_) => "mailbox",
            FlowEngineError::StateMismatch { .. } => "state_mismatch",
            FlowEngineError::CallbackTimeout { .. } => "callback_timeout",
            FlowEngineError::FlowTimeout { .. } => "flow_timeout",
            FlowEngineError::Configuration(_) => "configuration",
            FlowEngineError::Io(_) => "io",
        }
    }
}

/// Result type alias for OAuth engine operations
pub type FlowResult<T> = Result<T, FlowEngineError>;
