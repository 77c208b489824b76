//! Mailbox backed by a directory of saved messages.
//!
//! Each file holds one message: `From:` and `Subject:` header lines, a blank
//! line, then the body. A mail client rule or a fetch script drops them there.
//! The file modification time stands in for the receive time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth_engine::{FlowEngineError, FlowResult, MailboxOracle, MailboxQuery};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One parsed message file
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMessage {
    pub from: String,
    pub subject: String,
    pub body: String,
    pub received: DateTime<Utc>,
}

impl SavedMessage {
    /// Parse the header block and body of a saved message
    pub fn parse(raw: &str, received: DateTime<Utc>) -> Self {
        let mut from = String::new();
        let mut subject = String::new();

        let (headers, body) = match raw.split_once("\n\n") {
            Some((headers, body)) => (headers, body),
            None => match raw.split_once("\r\n\r\n") {
                Some((headers, body)) => (headers, body),
                None => ("", raw),
            },
        };

        for line in headers.lines() {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_lowercase().as_str() {
                    "from" => from = value.trim().to_string(),
                    "subject" => subject = value.trim().to_string(),
                    _ => {}
                }
            }
        }

        Self {
            from,
            subject,
            body: body.trim().to_string(),
            received,
        }
    }

    /// Whether the message satisfies `query` at time `now`
    pub fn matches(&self, query: &MailboxQuery, now: DateTime<Utc>) -> bool {
        if !self.from.to_lowercase().contains(&query.from.to_lowercase()) {
            return false;
        }
        if let Some(subject) = &query.subject {
            if !self.subject.to_lowercase().contains(&subject.to_lowercase()) {
                return false;
            }
        }
        self.received >= query.not_before(now)
    }
}

/// [`MailboxOracle`] over `*.eml` and `*.txt` files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryMailbox {
    directory: PathBuf,
}

impl DirectoryMailbox {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    async fn read_messages(&self) -> FlowResult<Vec<SavedMessage>> {
        let mut entries = tokio::fs::read_dir(&self.directory).await.map_err(|e| {
            FlowEngineError::Mailbox(format!(
                "Cannot read mailbox directory {:?}: {}",
                self.directory, e
            ))
        })?;

        let mut messages = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            FlowEngineError::Mailbox(format!("Cannot list mailbox directory {:?}: {}", self.directory, e))
        })? {
            let path = entry.path();
            let is_message = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("eml") | Some("txt")
            );
            if !is_message {
                continue;
            }

            match read_message(&path).await {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping unreadable message {:?}: {}", path, e),
            }
        }
        Ok(messages)
    }
}

/// Read one message file. Invalid UTF-8 is replaced rather than rejected.
async fn read_message(path: &Path) -> std::io::Result<SavedMessage> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    let received: DateTime<Utc> = metadata.modified()?.into();
    let raw = tokio::fs::read(path).await?;
    Ok(SavedMessage::parse(&String::from_utf8_lossy(&raw), received))
}

#[async_trait]
impl MailboxOracle for DirectoryMailbox {
    async fn search(&self, query: &MailboxQuery) -> FlowResult<Option<String>> {
        let now = Utc::now();
        debug!("Searching {:?} for {}", self.directory, query.to_search_string(now));

        let latest = self
            .read_messages()
            .await?
            .into_iter()
            .filter(|message| message.matches(query, now))
            .max_by_key(|message| message.received);

        Ok(latest.map(|message| message.body))
    }
}
