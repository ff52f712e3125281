//! Post-commit reconciliation
//!
//! The remote store may acknowledge a write before the write shows up in its
//! listings. After every committed mutation the [`ReconciliationVerifier`]
//! polls the zone, bypassing the cache, until every [`PendingOperation`] of the
//! request is observable, then adopts the server listing as the new cache
//! entry. Optimistic state is never reverted while polling.
//!
//! ```text
//! Polling(n) ──satisfied──────────────▶ Done(Confirmed)
//!     │ not yet / transport error
//!     ▼
//! Waiting(n) ──delay──▶ Polling(n+1)      (n == max ▶ Done(Unconfirmed))
//! ```
//!
//! Each zone's verifications run in their own `JoinSet`; dropping the set on a
//! zone switch or at session end aborts the pending polls and their timers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::ZoneCache;
use crate::events::{EventSink, SessionEvent};
use crate::mutation::{MutationKind, MutationState};
use crate::notice::NoticeBoard;
use crate::record::{Record, RecordDraft};
use crate::selection::SelectionController;
use crate::session::SessionStatus;
use crate::traits::RecordStore;

/// Default pause between polls
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_millis(1500);

/// Default number of polls before giving up
pub const DEFAULT_MAX_VERIFY_ATTEMPTS: u32 = 10;

/// Effect a committed mutation must have on the zone listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    /// A record with these fields exists, with `confirmed_id` if the store returned one
    Add {
        expected: RecordDraft,
        confirmed_id: Option<String>,
    },
    /// The record with this id carries these fields
    Update { record_id: String, expected: RecordDraft },
    /// No record with this id remains
    Delete { record_id: String },
}

impl PendingOperation {
    /// Whether the listing reflects this operation
    ///
    /// Records are matched on name, type and content; TTL and proxying are
    /// not compared.
    pub fn is_satisfied_by(&self, records: &[Record]) -> bool {
        match self {
            Self::Add {
                expected,
                confirmed_id,
            } => records.iter().any(|r| {
                r.matches(expected)
                    && confirmed_id
                        .as_deref()
                        .is_none_or(|id| r.id.as_confirmed() == Some(id))
            }),
            Self::Update {
                record_id,
                expected,
            } => records
                .iter()
                .any(|r| r.id.as_confirmed() == Some(record_id.as_str()) && r.matches(expected)),
            Self::Delete { record_id } => !records
                .iter()
                .any(|r| r.id.as_confirmed() == Some(record_id.as_str())),
        }
    }
}

/// Everything one committed mutation expects to see
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub mutation_id: u64,
    pub zone_id: String,
    pub kind: MutationKind,
    pub operations: Vec<PendingOperation>,
    /// Emit `Reconciled` for the mutation when confirmed
    ///
    /// False for the already-applied part of a rolled-back batch.
    pub report_lifecycle: bool,
}

/// How a verification ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Every operation is visible
    Confirmed {
        attempts: u32,
        /// False when newer local state or a zone switch kept the listing out of the cache
        cache_replaced: bool,
    },
    /// Attempts exhausted before the change became visible
    Unconfirmed { attempts: u32 },
    /// The store rejected the credentials
    Unauthorized { attempts: u32 },
}

/// Retry state of one verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifyState {
    Polling { attempt: u32 },
    Waiting { attempt: u32 },
    Done(VerifyOutcome),
}

/// Polls the store after commits and reconciles the cache
#[derive(Clone)]
pub struct ReconciliationVerifier {
    store: Arc<dyn RecordStore>,
    cache: ZoneCache,
    selection: SelectionController,
    notices: NoticeBoard,
    events: EventSink,
    status: SessionStatus,
    delay: Duration,
    max_attempts: u32,
    tasks: Arc<Mutex<HashMap<String, JoinSet<VerifyOutcome>>>>,
}

impl ReconciliationVerifier {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn RecordStore>,
        cache: ZoneCache,
        selection: SelectionController,
        notices: NoticeBoard,
        events: EventSink,
        status: SessionStatus,
        delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            cache,
            selection,
            notices,
            events,
            status,
            delay,
            max_attempts: max_attempts.max(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start verifying in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: VerificationRequest) {
        if request.operations.is_empty() {
            return;
        }
        debug!(
            mutation_id = request.mutation_id,
            zone_id = %request.zone_id,
            operations = request.operations.len(),
            "Queueing verification"
        );
        let verifier = self.clone();
        let mut tasks = self.tasks.lock();
        let set = tasks.entry(request.zone_id.clone()).or_default();
        while set.try_join_next().is_some() {}
        set.spawn(async move { verifier.verify(request).await });
    }

    /// Run one verification to completion
    pub async fn verify(&self, request: VerificationRequest) -> VerifyOutcome {
        let mut state = VerifyState::Polling { attempt: 1 };
        let mut stale_reported = false;
        loop {
            state = match state {
                VerifyState::Polling { attempt } => self.poll(&request, attempt, &mut stale_reported).await,
                VerifyState::Waiting { attempt } => {
                    tokio::time::sleep(self.delay).await;
                    VerifyState::Polling { attempt: attempt + 1 }
                }
                VerifyState::Done(outcome) => return outcome,
            };
        }
    }

    async fn poll(&self, request: &VerificationRequest, attempt: u32, stale_reported: &mut bool) -> VerifyState {
        debug!(mutation_id = request.mutation_id, attempt, "Verification poll");
        let revision = self.cache.revision(&request.zone_id);

        match self.store.list(&request.zone_id).await {
            Ok(records) => {
                if request.operations.iter().all(|op| op.is_satisfied_by(&records)) {
                    return VerifyState::Done(self.reconcile(request, revision, records, attempt));
                }
                debug!(mutation_id = request.mutation_id, attempt, "Change not visible yet");
            }
            Err(err) if err.is_unauthorized() => {
                warn!(mutation_id = request.mutation_id, "Verification stopped: {}", err);
                self.status.require_authentication();
                self.events.emit(SessionEvent::AuthenticationRequired);
                return VerifyState::Done(VerifyOutcome::Unauthorized { attempts: attempt });
            }
            Err(err) if err.is_transient() => {
                debug!(mutation_id = request.mutation_id, attempt, error = %err, "Store unreachable, will retry");
            }
            Err(err) => {
                warn!(mutation_id = request.mutation_id, attempt, error = %err, "Verification poll failed");
                if self.status.is_active(&request.zone_id) {
                    self.status.set_stale(true);
                }
                if !*stale_reported {
                    *stale_reported = true;
                    self.notices
                        .info(format!("Showing cached data: {}", err.user_message()));
                    self.events.emit(SessionEvent::StaleData {
                        zone_id: request.zone_id.clone(),
                        reason: err.user_message(),
                    });
                }
            }
        }

        if attempt >= self.max_attempts {
            warn!(
                mutation_id = request.mutation_id,
                zone_id = %request.zone_id,
                attempts = attempt,
                "Could not confirm change"
            );
            self.notices.warning(format!(
                "Could not confirm the {} yet; it may take longer to appear",
                request.kind.describe()
            ));
            return VerifyState::Done(VerifyOutcome::Unconfirmed { attempts: attempt });
        }

        self.events.emit(SessionEvent::VerificationRetrying {
            mutation_id: request.mutation_id,
            zone_id: request.zone_id.clone(),
            attempt,
        });
        VerifyState::Waiting { attempt }
    }

    fn reconcile(
        &self,
        request: &VerificationRequest,
        revision: Option<u64>,
        records: Vec<Record>,
        attempts: u32,
    ) -> VerifyOutcome {
        let zone_id = &request.zone_id;
        let cache_replaced = self.status.is_active(zone_id)
            && self.cache.replace_if_revision(zone_id, revision, records.clone());

        if cache_replaced {
            self.status.set_stale(false);
            let dropped = self.selection.retain_present(zone_id, &records);
            info!(
                mutation_id = request.mutation_id,
                zone_id = %zone_id,
                attempts,
                records = records.len(),
                deselected = dropped,
                "Reconciled with store"
            );
        } else {
            info!(
                mutation_id = request.mutation_id,
                zone_id = %zone_id,
                attempts,
                "Change confirmed, newer local state kept"
            );
        }

        if request.report_lifecycle {
            self.events.emit(SessionEvent::MutationStateChanged {
                mutation_id: request.mutation_id,
                zone_id: zone_id.clone(),
                kind: request.kind,
                state: MutationState::Reconciled,
            });
        }

        VerifyOutcome::Confirmed {
            attempts,
            cache_replaced,
        }
    }

    /// Abort every verification of a zone
    pub fn cancel_zone(&self, zone_id: &str) {
        let removed = self.tasks.lock().remove(zone_id);
        if let Some(set) = removed {
            if !set.is_empty() {
                debug!(zone_id, tasks = set.len(), "Cancelling verifications");
            }
            // dropping the set aborts its tasks
        }
    }

    /// Abort every verification
    pub fn cancel_all(&self) {
        let drained: Vec<JoinSet<VerifyOutcome>> = self.tasks.lock().drain().map(|(_, set)| set).collect();
        drop(drained);
    }

    /// Number of verifications still running
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks
            .values_mut()
            .map(|set| {
                while set.try_join_next().is_some() {}
                set.len()
            })
            .sum()
    }
}

impl fmt::Debug for ReconciliationVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationVerifier")
            .field("store", &self.store.store_name())
            .field("delay", &self.delay)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
