//! Mailbox Oracle
//!
//! The engine polls an external mailbox for one-time codes through
//! [`MailboxOracle`].

use crate::error::FlowResult;
use crate::flow::backoff::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Query for the latest message from a sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxQuery {
    /// Sender address or domain, e.g. "noreply@github.com" or "@atlassian.com"
    pub from: String,
    /// Optional subject fragment
    #[serde(default)]
    pub subject: Option<String>,
    /// Only messages received within this window, in seconds
    pub within_secs: u64,
}

impl MailboxQuery {
    pub fn from_sender(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            subject: None,
            within_secs: 600,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.within_secs = window.as_secs();
        self
    }

    /// Oldest receive time the query accepts
    pub fn not_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.within_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Gmail-style search string, e.g. `from:noreply@github.com subject:"device verification" after:1700000000`
    pub fn to_search_string(&self, now: DateTime<Utc>) -> String {
        let mut query = format!("from:{}", self.from);
        if let Some(subject) = &self.subject {
            if subject.contains(' ') {
                query.push_str(&format!(" subject:\"{}\"", subject));
            } else {
                query.push_str(&format!(" subject:{}", subject));
            }
        }
        query.push_str(&format!(" after:{}", self.not_before(now).timestamp()));
        query
    }
}

/// Returns the body of the most recent message matching a query
#[async_trait]
pub trait MailboxOracle: Send + Sync {
    /// `Ok(None)` when nothing matches yet
    async fn search(&self, query: &MailboxQuery) -> FlowResult<Option<String>>;
}

/// How the mailbox-code handler polls and submits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxPolicy {
    /// Tried in order on every poll; later entries are fallbacks
    pub queries: Vec<MailboxQuery>,
    /// Mailbox polling budget
    pub poll: RetryPolicy,
    /// URL checks after submitting the code
    pub submit_wait: RetryPolicy,
    /// Pause between typed characters, in milliseconds
    pub per_character_delay_ms: u64,
}

impl MailboxPolicy {
    pub fn new(queries: Vec<MailboxQuery>) -> Self {
        Self {
            queries,
            poll: RetryPolicy::fixed(12, Duration::from_secs(5)),
            submit_wait: RetryPolicy::fixed(12, Duration::from_secs(2)),
            per_character_delay_ms: 100,
        }
    }

    pub fn with_poll(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_submit_wait(mut self, submit_wait: RetryPolicy) -> Self {
        self.submit_wait = submit_wait;
        self
    }

    pub fn with_per_character_delay(mut self, delay: Duration) -> Self {
        self.per_character_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn per_character_delay(&self) -> Duration {
        Duration::from_millis(self.per_character_delay_ms)
    }
}
