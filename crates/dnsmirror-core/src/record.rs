//! DNS record model
//!
//! A [`Record`] is one entry of a zone as mirrored locally. Records created
//! locally carry a [`RecordId::Provisional`] id until the remote store assigns
//! a real one, so nothing downstream can mistake them for confirmed records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::naming;

/// TTL sentinel meaning "automatic"
pub const TTL_AUTO: u32 = 1;

static NEXT_PROVISIONAL: AtomicU64 = AtomicU64::new(1);

/// Identifier of a record within a zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    /// Assigned by the remote store
    Confirmed(String),
    /// Locally generated placeholder for a record awaiting confirmation
    Provisional(u64),
}

impl RecordId {
    /// Wrap a server-assigned id
    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed(id.into())
    }

    /// Allocate a fresh provisional id, unique for the process lifetime
    pub fn next_provisional() -> Self {
        Self::Provisional(NEXT_PROVISIONAL.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    /// The server-assigned id, if any
    pub fn as_confirmed(&self) -> Option<&str> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }

    /// The server-assigned id, or an error naming the operation that needed it
    pub fn require_confirmed(&self, operation: &str) -> Result<&str> {
        self.as_confirmed().ok_or_else(|| {
            Error::invalid_input(format!(
                "cannot {} record {}: it is still awaiting confirmation",
                operation, self
            ))
        })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => f.write_str(id),
            Self::Provisional(n) => write!(f, "provisional-{}", n),
        }
    }
}

/// A zone: an opaque id plus its apex name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

impl Zone {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One DNS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub record_type: String,
    /// Fully-qualified name
    pub name: String,
    pub content: String,
    /// Seconds, or [`TTL_AUTO`]
    pub ttl: u32,
    pub proxied: bool,
}

impl Record {
    /// Build a record from draft fields
    pub fn from_draft(id: RecordId, draft: &RecordDraft) -> Self {
        Self {
            id,
            record_type: draft.record_type.clone(),
            name: draft.name.clone(),
            content: draft.content.clone(),
            ttl: draft.ttl,
            proxied: draft.proxied,
        }
    }

    /// The id-less field set of this record
    pub fn draft(&self) -> RecordDraft {
        RecordDraft {
            record_type: self.record_type.clone(),
            name: self.name.clone(),
            content: self.content.clone(),
            ttl: self.ttl,
            proxied: self.proxied,
        }
    }

    /// Overwrite every field except the id
    pub fn apply(&mut self, draft: &RecordDraft) {
        self.record_type = draft.record_type.clone();
        self.name = draft.name.clone();
        self.content = draft.content.clone();
        self.ttl = draft.ttl;
        self.proxied = draft.proxied;
    }

    /// Whether name, type and content all match the draft
    pub fn matches(&self, draft: &RecordDraft) -> bool {
        self.name == draft.name && self.record_type == draft.record_type && self.content == draft.content
    }

    pub fn is_auto_ttl(&self) -> bool {
        self.ttl == TTL_AUTO
    }
}

fn default_ttl() -> u32 {
    TTL_AUTO
}

/// Record fields as submitted to the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

impl RecordDraft {
    /// Create a draft with automatic TTL and proxying disabled
    pub fn new(record_type: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            name: name.into(),
            content: content.into(),
            ttl: TTL_AUTO,
            proxied: false,
        }
    }

    /// Set the TTL
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable or disable proxying
    pub fn with_proxied(mut self, proxied: bool) -> Self {
        self.proxied = proxied;
        self
    }

    /// Reject drafts the remote store would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.record_type.trim().is_empty() {
            return Err(Error::validation("record type is required"));
        }
        if self.name.trim().is_empty() || self.content.trim().is_empty() {
            return Err(Error::validation("name and content are required"));
        }
        if self.ttl == 0 {
            return Err(Error::validation("ttl must be positive (1 = automatic)"));
        }
        Ok(())
    }

    /// Trimmed copy with an upper-case type and a fully-qualified name
    pub fn normalized(&self, apex: &str) -> Self {
        Self {
            record_type: self.record_type.trim().to_uppercase(),
            name: naming::to_absolute(apex, &self.name),
            content: self.content.trim().to_string(),
            ttl: self.ttl,
            proxied: self.proxied,
        }
    }
}
