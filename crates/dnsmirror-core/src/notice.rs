//! Transient user-facing notices
//!
//! Every mutation outcome and every degraded read raises a [`Notice`]. Notices
//! expire on their own after a fixed lifetime (3 s by default); expired notices
//! are pruned lazily whenever the board is read.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    /// Wall-clock time the notice was raised, for display
    pub raised_at: DateTime<Utc>,
    expires_at: Instant,
}

impl Notice {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Shared list of live notices
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    notices: Arc<Mutex<Vec<Notice>>>,
    next_id: Arc<AtomicU64>,
    ttl: Duration,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            notices: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            ttl,
        }
    }

    /// Raise a notice and return its id
    pub fn push(&self, level: NoticeLevel, message: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notice = Notice {
            id,
            level,
            message: message.into(),
            raised_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        self.notices.lock().push(notice);
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Success, message)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Info, message)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Error, message)
    }

    /// Notices that have not expired yet, oldest first
    pub fn active(&self) -> Vec<Notice> {
        let now = Instant::now();
        let mut notices = self.notices.lock();
        notices.retain(|n| !n.is_expired(now));
        notices.clone()
    }

    /// Remove a notice before it expires
    pub fn dismiss(&self, id: u64) -> bool {
        let mut notices = self.notices.lock();
        let before = notices.len();
        notices.retain(|n| n.id != id);
        notices.len() != before
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }
}
