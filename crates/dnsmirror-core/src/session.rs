//! Client session
//!
//! A [`Session`] owns one instance of every engine component plus the state a
//! presentation layer reads: the zone list, the active zone, the view
//! parameters, the notice board and the degraded-data flags. Nothing is global;
//! two sessions never share state.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   user actions ──▶ │   Session    │ ──▶ SessionEvent channel
//!                    └──────────────┘
//!          ┌─────────────┬────┴────────┬──────────────┐
//!          ▼             ▼             ▼              ▼
//!   OptimisticMutator  ZoneCache  SelectionController  project()
//!          │             ▲
//!          ▼             │
//!   ReconciliationVerifier ──▶ RecordStore
//! ```
//!
//! All methods take `&self`; a session can be shared behind an `Arc`.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{ReadSource, ZoneCache};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, SessionEvent};
use crate::mutation::{BatchPatch, OptimisticMutator};
use crate::naming;
use crate::notice::{Notice, NoticeBoard};
use crate::record::{Record, RecordDraft, RecordId, Zone};
use crate::selection::SelectionController;
use crate::traits::{Authenticator, RecordStore, SessionToken};
use crate::verify::ReconciliationVerifier;
use crate::view::{self, Projection, SortDirection, SortKey, ViewParameters};

/// Session-wide flags shared with the mutator and verifier
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionStatus {
    active_zone: Arc<RwLock<Option<Zone>>>,
    auth_required: Arc<AtomicBool>,
    stale: Arc<AtomicBool>,
}

impl SessionStatus {
    pub(crate) fn active_zone(&self) -> Option<Zone> {
        self.active_zone.read().clone()
    }

    pub(crate) fn is_active(&self, zone_id: &str) -> bool {
        self.active_zone.read().as_ref().is_some_and(|z| z.id == zone_id)
    }

    /// Returns the previously active zone
    fn set_active_zone(&self, zone: Option<Zone>) -> Option<Zone> {
        std::mem::replace(&mut *self.active_zone.write(), zone)
    }

    pub(crate) fn require_authentication(&self) {
        self.auth_required.store(true, Ordering::SeqCst);
    }

    fn clear_authentication(&self) {
        self.auth_required.store(false, Ordering::SeqCst);
    }

    fn auth_required(&self) -> bool {
        self.auth_required.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}

/// One client session against a record store
pub struct Session {
    store: Arc<dyn RecordStore>,
    cache: ZoneCache,
    selection: SelectionController,
    verifier: ReconciliationVerifier,
    mutator: OptimisticMutator,
    notices: NoticeBoard,
    events: EventSink,
    status: SessionStatus,
    zones: Mutex<Vec<Zone>>,
    params: Mutex<ViewParameters>,
}

impl Session {
    /// Create a new session
    ///
    /// # Returns
    ///
    /// A tuple of (session, event_receiver) where event_receiver yields session events
    pub fn new(store: Arc<dyn RecordStore>, config: SessionConfig) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        config.validate()?;

        let (events, rx) = EventSink::channel(config.event_channel_capacity);
        let status = SessionStatus::default();
        let cache = ZoneCache::new(store.clone(), config.cache_ttl());
        let selection = SelectionController::new();
        let notices = NoticeBoard::new(config.notice_ttl());
        let verifier = ReconciliationVerifier::new(
            store.clone(),
            cache.clone(),
            selection.clone(),
            notices.clone(),
            events.clone(),
            status.clone(),
            config.verify_delay(),
            config.max_verify_attempts,
        );
        let mutator = OptimisticMutator::new(
            store.clone(),
            cache.clone(),
            selection.clone(),
            verifier.clone(),
            notices.clone(),
            events.clone(),
            status.clone(),
        );

        let params = ViewParameters {
            page_size: config.default_page_size,
            ..Default::default()
        };

        let session = Self {
            store,
            cache,
            selection,
            verifier,
            mutator,
            notices,
            events,
            status,
            zones: Mutex::new(Vec::new()),
            params: Mutex::new(params),
        };

        Ok((session, rx))
    }

    /// Fetch the zone list from the store
    pub async fn load_zones(&self) -> Result<Vec<Zone>> {
        match self.store.list_zones().await {
            Ok(zones) => {
                info!(count = zones.len(), store = self.store.store_name(), "Zones loaded");
                *self.zones.lock() = zones.clone();
                Ok(zones)
            }
            Err(err) => {
                self.report_read_failure("load zones", &err);
                Err(err)
            }
        }
    }

    /// Zones from the last successful [`load_zones`](Self::load_zones)
    pub fn zones(&self) -> Vec<Zone> {
        self.zones.lock().clone()
    }

    pub fn active_zone(&self) -> Option<Zone> {
        self.status.active_zone()
    }

    /// Switch to a zone, given its id or apex name, and load its records
    ///
    /// Switching cancels the previous zone's verifications, empties the
    /// selection and goes back to page 1. Selecting the active zone again only
    /// refreshes it.
    pub async fn select_zone(&self, key: &str) -> Result<()> {
        let zone = self
            .zones
            .lock()
            .iter()
            .find(|z| z.id == key || z.name == key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("zone '{}'", key)))?;

        if self.status.is_active(&zone.id) {
            return self.refresh(false).await;
        }

        let previous = self.status.set_active_zone(Some(zone.clone()));
        if let Some(previous) = previous {
            self.verifier.cancel_zone(&previous.id);
        }
        self.selection.reset_for_zone(Some(&zone.id));
        self.params.lock().page_index = 1;
        self.status.set_stale(false);
        info!(zone_id = %zone.id, zone = %zone.name, "Zone selected");
        self.events.emit(SessionEvent::ZoneSwitched {
            zone_id: Some(zone.id.clone()),
        });

        self.refresh(false).await
    }

    /// Reload the active zone, from the cache unless `force` is set
    pub async fn refresh(&self, force: bool) -> Result<()> {
        let zone = self.require_zone()?;

        match self.cache.get_or_fetch(&zone.id, force).await {
            Ok(read) => {
                if !self.status.is_active(&zone.id) {
                    debug!(zone_id = %zone.id, "Zone switched during load, ignoring result");
                    return Ok(());
                }
                let stale = read.is_stale();
                self.status.set_stale(stale);
                if let ReadSource::Stale { reason } = &read.source {
                    self.notices.info(format!("Showing cached data: {}", reason));
                    self.events.emit(SessionEvent::StaleData {
                        zone_id: zone.id.clone(),
                        reason: reason.clone(),
                    });
                }
                self.selection.retain_present(&zone.id, &read.records);
                self.events.emit(SessionEvent::RecordsLoaded {
                    zone_id: zone.id,
                    count: read.records.len(),
                    stale,
                });
                Ok(())
            }
            Err(err) => {
                self.report_read_failure("load records", &err);
                Err(err)
            }
        }
    }

    /// Project the active zone's cached records through the view parameters
    ///
    /// The clamped page index is written back, so a page past the end snaps to
    /// the last page.
    pub fn view(&self) -> Projection {
        let records = self
            .status
            .active_zone()
            .and_then(|zone| self.cache.records(&zone.id))
            .unwrap_or_default();
        let mut params = self.params.lock();
        let projection = view::project(&records, &params);
        params.page_index = projection.page.page_index;
        projection
    }

    pub fn view_parameters(&self) -> ViewParameters {
        self.params.lock().clone()
    }

    pub fn set_query(&self, query: impl Into<String>) {
        let mut params = self.params.lock();
        params.query = query.into();
        params.page_index = 1;
    }

    pub fn toggle_type_filter(&self, record_type: &str) {
        self.params.lock().toggle_type(record_type);
    }

    pub fn toggle_proxied_filter(&self, proxied: bool) {
        self.params.lock().toggle_proxied(proxied);
    }

    pub fn clear_filters(&self) {
        self.params.lock().clear_filters();
    }

    /// Sort by a column; choosing the current column again flips the direction
    pub fn sort_by(&self, key: SortKey) {
        let mut params = self.params.lock();
        if params.sort_key == key {
            params.sort_direction = match params.sort_direction {
                SortDirection::Ascending => SortDirection::Descending,
                SortDirection::Descending => SortDirection::Ascending,
            };
        } else {
            params.sort_key = key;
            params.sort_direction = SortDirection::Ascending;
        }
        params.page_index = 1;
    }

    pub fn set_sort(&self, key: SortKey, direction: SortDirection) {
        let mut params = self.params.lock();
        params.sort_key = key;
        params.sort_direction = direction;
        params.page_index = 1;
    }

    /// Go to a page; out-of-range pages are clamped by the next [`view`](Self::view)
    pub fn set_page(&self, page_index: usize) {
        self.params.lock().page_index = page_index.max(1);
    }

    pub fn set_page_size(&self, page_size: usize) -> Result<()> {
        if page_size == 0 {
            return Err(Error::invalid_input("page size must be positive"));
        }
        let mut params = self.params.lock();
        params.page_size = page_size;
        params.page_index = 1;
        Ok(())
    }

    pub fn toggle_selection(&self, id: &RecordId) -> bool {
        self.selection.toggle(id)
    }

    pub fn select_all_visible(&self) {
        self.selection.select_all_visible(&self.view().visible_ids());
    }

    pub fn toggle_all_visible(&self) {
        self.selection.toggle_all_visible(&self.view().visible_ids());
    }

    pub fn clear_visible_selection(&self) {
        self.selection.clear_visible(&self.view().visible_ids());
    }

    pub fn clear_selection(&self) {
        self.selection.clear();
    }

    pub fn selected_ids(&self) -> Vec<RecordId> {
        self.selection.ids()
    }

    pub fn is_selected(&self, id: &RecordId) -> bool {
        self.selection.contains(id)
    }

    pub async fn create_record(&self, draft: &RecordDraft) -> Result<Record> {
        let zone = self.require_zone()?;
        self.mutator.create(&zone, draft).await
    }

    pub async fn update_record(&self, id: &RecordId, draft: &RecordDraft) -> Result<Record> {
        let zone = self.require_zone()?;
        self.mutator.update(&zone, id, draft).await
    }

    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let zone = self.require_zone()?;
        self.mutator.delete(&zone, id).await
    }

    /// Delete every selected record; returns how many were deleted
    pub async fn delete_selected(&self) -> Result<usize> {
        let zone = self.require_zone()?;
        let ids = self.selection.ids();
        self.mutator.batch_delete(&zone, &ids).await
    }

    /// Apply a TTL/proxying change to every selected record
    pub async fn update_selected(&self, patch: BatchPatch) -> Result<usize> {
        let zone = self.require_zone()?;
        let ids = self.selection.ids();
        self.mutator.batch_update(&zone, &ids, patch).await
    }

    /// Notices that have not expired
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.active()
    }

    pub fn dismiss_notice(&self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    /// Whether the last read of the active zone fell back to cached data
    pub fn is_stale(&self) -> bool {
        self.status.is_stale()
    }

    /// Whether the store rejected the session credentials
    pub fn auth_required(&self) -> bool {
        self.status.auth_required()
    }

    /// Log in again after [`auth_required`](Self::auth_required)
    ///
    /// Work that failed while unauthenticated is not replayed.
    pub async fn reauthenticate(&self, authenticator: &dyn Authenticator, secret: &str) -> Result<SessionToken> {
        match authenticator.login(secret).await {
            Ok(token) => {
                self.status.clear_authentication();
                info!("Session authenticated");
                Ok(token)
            }
            Err(err) => {
                warn!(error = %err, "Login failed");
                self.notices.error(format!("Login failed: {}", err.user_message()));
                Err(err)
            }
        }
    }

    /// A record's name relative to the active zone's apex
    pub fn display_name(&self, record: &Record) -> String {
        match self.status.active_zone() {
            Some(zone) => naming::to_relative(&zone.name, &record.name),
            None => record.name.clone(),
        }
    }

    /// Verifications still polling
    pub fn pending_verifications(&self) -> usize {
        self.verifier.in_flight()
    }

    /// Abort outstanding verifications
    pub fn shutdown(&self) {
        debug!("Session shutting down");
        self.verifier.cancel_all();
    }

    fn require_zone(&self) -> Result<Zone> {
        self.status
            .active_zone()
            .ok_or_else(|| Error::invalid_input("no zone selected"))
    }

    fn report_read_failure(&self, action: &str, err: &Error) {
        warn!(error = %err, "Failed to {}", action);
        if err.is_unauthorized() {
            self.status.require_authentication();
            self.events.emit(SessionEvent::AuthenticationRequired);
        }
        self.notices
            .error(format!("Failed to {}: {}", action, err.user_message()));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.verifier.cancel_all();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store.store_name())
            .field("active_zone", &self.status.active_zone())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
