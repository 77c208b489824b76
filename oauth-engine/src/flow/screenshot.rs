//! Screenshot Sink
//!
//! Optional collaborator that records page screenshots at flow milestones.
//! Capture is fire-and-forget: failures are logged and never fail a flow.

use crate::flow::page::BrowserPage;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

#[async_trait]
pub trait ScreenshotSink: Send + Sync {
    async fn capture(&self, page: &dyn BrowserPage, label: &str);
}

/// Writes PNG files into a directory
#[derive(Debug)]
pub struct DirectoryScreenshotSink {
    directory: PathBuf,
    sequence: AtomicU32,
}

impl DirectoryScreenshotSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `<seq>_<label>_<timestamp>.png`, with the label reduced to filename-safe characters
    fn file_name(&self, label: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!(
            "{:03}_{}_{}.png",
            sequence,
            label,
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        )
    }
}

#[async_trait]
impl ScreenshotSink for DirectoryScreenshotSink {
    async fn capture(&self, page: &dyn BrowserPage, label: &str) {
        let bytes = match page.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Screenshot '{}' failed: {}", label, e);
                return;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.directory).await {
            warn!("Cannot create screenshot directory {:?}: {}", self.directory, e);
            return;
        }

        let path = self.directory.join(self.file_name(label));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => debug!("Saved screenshot {:?}", path),
            Err(e) => warn!("Failed to write screenshot {:?}: {}", path, e),
        }
    }
}
