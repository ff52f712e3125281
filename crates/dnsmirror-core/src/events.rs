//! Session events
//!
//! Observers (a UI, the CLI's logger, tests) receive [`SessionEvent`]s from the
//! receiver returned by [`Session::new`](crate::Session::new). The channel is
//! bounded; when it is full new events are dropped with a warning instead of
//! blocking the engine.

use tokio::sync::mpsc;
use tracing::warn;

use crate::mutation::{MutationKind, MutationState};

/// Events emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A zone's record list was read
    RecordsLoaded {
        zone_id: String,
        count: usize,
        /// Served from a stale cache entry after a failed fetch
        stale: bool,
    },

    /// A mutation moved to a new lifecycle state
    MutationStateChanged {
        mutation_id: u64,
        zone_id: String,
        kind: MutationKind,
        state: MutationState,
    },

    /// A verification poll did not observe the change yet
    VerificationRetrying {
        mutation_id: u64,
        zone_id: String,
        attempt: u32,
    },

    /// Displayed data may be out of date
    StaleData { zone_id: String, reason: String },

    /// The remote store rejected the session credentials
    AuthenticationRequired,

    /// The active zone changed
    ZoneSwitched { zone_id: Option<String> },
}

/// Cloneable sending half shared by the session's components
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            warn!(?event, "Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
        // a closed channel just means nobody is listening
    }
}
