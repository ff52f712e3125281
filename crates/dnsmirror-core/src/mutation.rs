//! Optimistic mutations
//!
//! Every user edit is applied to the cache first, so it is visible at once,
//! and only then sent to the store. A failed write restores the exact cache
//! entry (and selection) seen before the edit; a successful one is handed to
//! the [`ReconciliationVerifier`].
//!
//! ## Lifecycle
//!
//! ```text
//! Applying ─▶ Committing ─▶ Committed ─▶ Verifying ─▶ Reconciled
//!     └───────────┴──────▶ RolledBack
//! ```
//!
//! ## Ordering
//!
//! Mutations of one zone queue on a per-zone FIFO lock held from the snapshot
//! until commit or rollback. A mutation therefore never snapshots state that
//! another mutation is about to roll back.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::cache::{CacheSnapshot, ZoneCache};
use crate::error::{Error, Result};
use crate::events::{EventSink, SessionEvent};
use crate::notice::NoticeBoard;
use crate::record::{Record, RecordDraft, RecordId, Zone};
use crate::selection::SelectionController;
use crate::session::SessionStatus;
use crate::traits::RecordStore;
use crate::verify::{PendingOperation, ReconciliationVerifier, VerificationRequest};

/// Lifecycle state of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    /// Local state changed, store not contacted yet
    Applying,
    /// Waiting for the store
    Committing,
    /// The store accepted the change
    Committed,
    /// Polling until the change is visible
    Verifying,
    /// The change is visible in the store's listing
    Reconciled,
    /// The store refused; local state restored
    RolledBack,
}

impl MutationState {
    pub fn can_transition_to(self, next: MutationState) -> bool {
        use MutationState::*;
        matches!(
            (self, next),
            (Applying, Committing)
                | (Applying, RolledBack)
                | (Committing, Committed)
                | (Committing, RolledBack)
                | (Committed, Verifying)
                | (Verifying, Reconciled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Reconciled | MutationState::RolledBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    BatchDelete,
    BatchUpdate,
}

impl MutationKind {
    /// Short noun phrase for notices
    pub fn describe(self) -> &'static str {
        match self {
            MutationKind::Create => "new record",
            MutationKind::Update => "record update",
            MutationKind::Delete => "record deletion",
            MutationKind::BatchDelete => "batch deletion",
            MutationKind::BatchUpdate => "batch update",
        }
    }
}

/// Fields a batch update overwrites; `None` leaves the field alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPatch {
    pub ttl: Option<u32>,
    pub proxied: Option<bool>,
}

impl BatchPatch {
    pub fn is_empty(&self) -> bool {
        self.ttl.is_none() && self.proxied.is_none()
    }

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid_input("batch update changes nothing"));
        }
        if self.ttl == Some(0) {
            return Err(Error::validation("ttl must be positive (1 = automatic)"));
        }
        Ok(())
    }

    fn apply(&self, draft: &mut RecordDraft) {
        if let Some(ttl) = self.ttl {
            draft.ttl = ttl;
        }
        if let Some(proxied) = self.proxied {
            draft.proxied = proxied;
        }
    }
}

/// One mutation's id and current state
struct Tracker<'a> {
    events: &'a EventSink,
    mutation_id: u64,
    zone_id: String,
    kind: MutationKind,
    state: MutationState,
}

impl Tracker<'_> {
    fn advance(&mut self, next: MutationState) {
        if !self.state.can_transition_to(next) {
            warn!(
                mutation_id = self.mutation_id,
                from = ?self.state,
                to = ?next,
                "Rejected illegal mutation transition"
            );
            return;
        }
        self.state = next;
        self.emit();
    }

    fn emit(&self) {
        self.events.emit(SessionEvent::MutationStateChanged {
            mutation_id: self.mutation_id,
            zone_id: self.zone_id.clone(),
            kind: self.kind,
            state: self.state,
        });
    }
}

/// Applies edits locally, commits them remotely, and rolls back on failure
#[derive(Clone)]
pub struct OptimisticMutator {
    store: Arc<dyn RecordStore>,
    cache: ZoneCache,
    selection: SelectionController,
    verifier: ReconciliationVerifier,
    notices: NoticeBoard,
    events: EventSink,
    status: SessionStatus,
    zone_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    next_id: Arc<AtomicU64>,
}

impl OptimisticMutator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn RecordStore>,
        cache: ZoneCache,
        selection: SelectionController,
        verifier: ReconciliationVerifier,
        notices: NoticeBoard,
        events: EventSink,
        status: SessionStatus,
    ) -> Self {
        Self {
            store,
            cache,
            selection,
            verifier,
            notices,
            events,
            status,
            zone_locks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn lock_zone(&self, zone_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .zone_locks
            .lock()
            .entry(zone_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    fn track(&self, zone: &Zone, kind: MutationKind) -> Tracker<'_> {
        let tracker = Tracker {
            events: &self.events,
            mutation_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            zone_id: zone.id.clone(),
            kind,
            state: MutationState::Applying,
        };
        debug!(mutation_id = tracker.mutation_id, zone_id = %zone.id, ?kind, "Applying mutation");
        tracker.emit();
        tracker
    }

    /// Create a record
    ///
    /// A provisional record is shown at the top of the listing until the store
    /// answers. Returns the stored record, or the provisional one if the store
    /// did not echo it.
    pub async fn create(&self, zone: &Zone, draft: &RecordDraft) -> Result<Record> {
        draft.validate()?;
        let draft = draft.normalized(&zone.name);

        let _guard = self.lock_zone(&zone.id).await;
        let mut tracker = self.track(zone, MutationKind::Create);

        let provisional = Record::from_draft(RecordId::next_provisional(), &draft);
        self.cache.hold_provisional(&provisional.id);
        let (snapshot, _) = self
            .cache
            .snapshot_then_patch(&zone.id, |records| records.insert(0, provisional.clone()));

        tracker.advance(MutationState::Committing);
        match self.store.create(&zone.id, &draft).await {
            Ok(returned) => {
                let record = match returned {
                    Some(stored) => {
                        self.cache.patch(&zone.id, |records| {
                            if records.iter().any(|r| r.id == provisional.id) {
                                // a listing fetched after the commit may already hold it
                                records.retain(|r| r.id != stored.id);
                                if let Some(slot) = records.iter_mut().find(|r| r.id == provisional.id) {
                                    *slot = stored.clone();
                                }
                            }
                        });
                        stored
                    }
                    None => provisional.clone(),
                };
                self.cache.release_provisional(&provisional.id);
                tracker.advance(MutationState::Committed);
                info!(mutation_id = tracker.mutation_id, record_id = %record.id, name = %record.name, "Record created");
                self.notices
                    .success(format!("Created {} record {}", record.record_type, record.name));

                let operation = PendingOperation::Add {
                    expected: record.draft(),
                    confirmed_id: record.id.as_confirmed().map(str::to_string),
                };
                self.hand_off(&mut tracker, vec![operation]);
                Ok(record)
            }
            Err(err) => {
                self.cache.release_provisional(&provisional.id);
                Err(self.roll_back(&mut tracker, snapshot, "create record", err))
            }
        }
    }

    /// Replace the fields of a confirmed record
    pub async fn update(&self, zone: &Zone, record_id: &RecordId, draft: &RecordDraft) -> Result<Record> {
        let id = record_id.require_confirmed("update")?.to_string();
        draft.validate()?;
        let draft = draft.normalized(&zone.name);

        let _guard = self.lock_zone(&zone.id).await;
        if self.cache.find(&zone.id, record_id).is_none() {
            return Err(Error::not_found(format!("record {} is not in zone {}", id, zone.name)));
        }
        let mut tracker = self.track(zone, MutationKind::Update);

        let (snapshot, _) = self.cache.snapshot_then_patch(&zone.id, |records| {
            if let Some(record) = records.iter_mut().find(|r| &r.id == record_id) {
                record.apply(&draft);
            }
        });

        tracker.advance(MutationState::Committing);
        match self.store.update(&zone.id, &id, &draft).await {
            Ok(returned) => {
                let record = returned.unwrap_or_else(|| Record::from_draft(record_id.clone(), &draft));
                self.cache.patch(&zone.id, |records| {
                    if let Some(slot) = records.iter_mut().find(|r| &r.id == record_id) {
                        *slot = record.clone();
                    }
                });
                tracker.advance(MutationState::Committed);
                info!(mutation_id = tracker.mutation_id, record_id = %id, "Record updated");
                self.notices.success(format!("Updated {}", record.name));

                let operation = PendingOperation::Update {
                    record_id: id,
                    expected: record.draft(),
                };
                self.hand_off(&mut tracker, vec![operation]);
                Ok(record)
            }
            Err(err) => Err(self.roll_back(&mut tracker, snapshot, "update record", err)),
        }
    }

    /// Delete a confirmed record
    ///
    /// The record leaves the listing and the selection at once; both come back
    /// if the store refuses.
    pub async fn delete(&self, zone: &Zone, record_id: &RecordId) -> Result<()> {
        let id = record_id.require_confirmed("delete")?.to_string();

        let _guard = self.lock_zone(&zone.id).await;
        let mut tracker = self.track(zone, MutationKind::Delete);

        let was_selected = self.selection.remove(&zone.id, record_id);
        let (snapshot, _) = self
            .cache
            .snapshot_then_patch(&zone.id, |records| records.retain(|r| &r.id != record_id));

        tracker.advance(MutationState::Committing);
        match self.store.delete(&zone.id, &id).await {
            Ok(()) => {
                tracker.advance(MutationState::Committed);
                info!(mutation_id = tracker.mutation_id, record_id = %id, "Record deleted");
                self.notices.success("Record deleted");
                self.hand_off(&mut tracker, vec![PendingOperation::Delete { record_id: id }]);
                Ok(())
            }
            Err(err) => {
                if was_selected {
                    self.selection.reselect(&zone.id, record_id);
                }
                Err(self.roll_back(&mut tracker, snapshot, "delete record", err))
            }
        }
    }

    /// Delete several records, one store call each
    ///
    /// On the first failure the whole batch is rolled back locally. Deletes the
    /// store already accepted are still verified, so those records disappear
    /// once the store's listing shows them gone.
    pub async fn batch_delete(&self, zone: &Zone, record_ids: &[RecordId]) -> Result<usize> {
        let targets: Vec<(RecordId, String)> = record_ids
            .iter()
            .filter_map(|id| id.as_confirmed().map(|raw| (id.clone(), raw.to_string())))
            .collect();
        if targets.is_empty() {
            return Err(Error::invalid_input("no confirmed records selected"));
        }

        let _guard = self.lock_zone(&zone.id).await;
        let mut tracker = self.track(zone, MutationKind::BatchDelete);

        let deselected: Vec<&RecordId> = targets
            .iter()
            .map(|(id, _)| id)
            .filter(|id| self.selection.remove(&zone.id, id))
            .collect();
        let doomed: HashSet<&RecordId> = targets.iter().map(|(id, _)| id).collect();
        let (snapshot, _) = self
            .cache
            .snapshot_then_patch(&zone.id, |records| records.retain(|r| !doomed.contains(&r.id)));

        tracker.advance(MutationState::Committing);
        let mut done = Vec::with_capacity(targets.len());
        for (_, id) in &targets {
            if let Err(err) = self.store.delete(&zone.id, id).await {
                for id in &deselected {
                    self.selection.reselect(&zone.id, id);
                }
                warn!(
                    mutation_id = tracker.mutation_id,
                    deleted = done.len(),
                    total = targets.len(),
                    "Batch delete interrupted"
                );
                let err = self.roll_back(&mut tracker, snapshot, "delete records", err);
                self.verify_partial(&tracker, done);
                return Err(err);
            }
            done.push(PendingOperation::Delete { record_id: id.clone() });
        }

        tracker.advance(MutationState::Committed);
        info!(mutation_id = tracker.mutation_id, count = done.len(), "Records deleted");
        self.notices.success(format!("Deleted {} records", done.len()));
        let count = done.len();
        self.hand_off(&mut tracker, done);
        Ok(count)
    }

    /// Overwrite TTL and/or proxying on several records, one store call each
    ///
    /// Ids not present in the cached listing are skipped. Failure handling
    /// matches [`batch_delete`](Self::batch_delete).
    pub async fn batch_update(&self, zone: &Zone, record_ids: &[RecordId], patch: BatchPatch) -> Result<usize> {
        patch.validate()?;

        let _guard = self.lock_zone(&zone.id).await;

        let targets: Vec<(RecordId, String, RecordDraft)> = record_ids
            .iter()
            .filter_map(|id| {
                let raw = id.as_confirmed()?.to_string();
                let mut draft = self.cache.find(&zone.id, id)?.draft();
                patch.apply(&mut draft);
                Some((id.clone(), raw, draft))
            })
            .collect();
        if targets.is_empty() {
            return Err(Error::not_found("none of the selected records are in the zone"));
        }

        let mut tracker = self.track(zone, MutationKind::BatchUpdate);
        let (snapshot, _) = self.cache.snapshot_then_patch(&zone.id, |records| {
            for (id, _, draft) in &targets {
                if let Some(record) = records.iter_mut().find(|r| &r.id == id) {
                    record.apply(draft);
                }
            }
        });

        tracker.advance(MutationState::Committing);
        let mut done = Vec::with_capacity(targets.len());
        for (record_id, id, draft) in &targets {
            match self.store.update(&zone.id, id, draft).await {
                Ok(returned) => {
                    let expected = match returned {
                        Some(stored) => {
                            let expected = stored.draft();
                            self.cache.patch(&zone.id, |records| {
                                if let Some(slot) = records.iter_mut().find(|r| &r.id == record_id) {
                                    *slot = stored;
                                }
                            });
                            expected
                        }
                        None => draft.clone(),
                    };
                    done.push(PendingOperation::Update {
                        record_id: id.clone(),
                        expected,
                    });
                }
                Err(err) => {
                    warn!(
                        mutation_id = tracker.mutation_id,
                        updated = done.len(),
                        total = targets.len(),
                        "Batch update interrupted"
                    );
                    let err = self.roll_back(&mut tracker, snapshot, "update records", err);
                    self.verify_partial(&tracker, done);
                    return Err(err);
                }
            }
        }

        tracker.advance(MutationState::Committed);
        info!(mutation_id = tracker.mutation_id, count = done.len(), "Records updated");
        self.notices.success(format!("Updated {} records", done.len()));
        let count = done.len();
        self.hand_off(&mut tracker, done);
        Ok(count)
    }

    fn hand_off(&self, tracker: &mut Tracker<'_>, operations: Vec<PendingOperation>) {
        tracker.advance(MutationState::Verifying);
        self.verifier.enqueue(VerificationRequest {
            mutation_id: tracker.mutation_id,
            zone_id: tracker.zone_id.clone(),
            kind: tracker.kind,
            operations,
            report_lifecycle: true,
        });
    }

    fn verify_partial(&self, tracker: &Tracker<'_>, operations: Vec<PendingOperation>) {
        self.verifier.enqueue(VerificationRequest {
            mutation_id: tracker.mutation_id,
            zone_id: tracker.zone_id.clone(),
            kind: tracker.kind,
            operations,
            report_lifecycle: false,
        });
    }

    fn roll_back(&self, tracker: &mut Tracker<'_>, snapshot: CacheSnapshot, action: &str, err: Error) -> Error {
        self.cache.restore(snapshot);
        tracker.advance(MutationState::RolledBack);
        warn!(
            mutation_id = tracker.mutation_id,
            zone_id = %tracker.zone_id,
            error = %err,
            "Failed to {}, rolled back",
            action
        );
        if err.is_unauthorized() {
            self.status.require_authentication();
            self.events.emit(SessionEvent::AuthenticationRequired);
        }
        self.notices
            .error(format!("Failed to {}: {}", action, err.user_message()));
        err
    }
}

impl fmt::Debug for OptimisticMutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticMutator")
            .field("store", &self.store.store_name())
            .field("zones_locked", &self.zone_locks.lock().len())
            .finish()
    }
}
