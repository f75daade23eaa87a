//! In-memory chat log

use std::sync::Arc;

use tokio::sync::RwLock;

/// First line of every fresh chat log
pub const WELCOME_MESSAGE: &str = "Welcome to DisasterNet!";

/// Ordered, append-only list of formatted chat lines.
///
/// Cloning is cheap and every clone sees the same log. Readers observe
/// every append that completed before the read started.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    lines: Arc<RwLock<Vec<String>>>,
}

impl MessageStore {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Log seeded with a single welcome line
    pub fn with_welcome(welcome: impl Into<String>) -> Self {
        Self {
            lines: Arc::new(RwLock::new(vec![welcome.into()])),
        }
    }

    pub async fn append(&self, line: impl Into<String>) {
        self.lines.write().await.push(line.into());
    }

    /// Copy of the log, oldest first
    pub async fn snapshot(&self) -> Vec<String> {
        self.lines.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.lines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lines.read().await.is_empty()
    }

    pub async fn last(&self) -> Option<String> {
        self.lines.read().await.last().cloned()
    }
}
