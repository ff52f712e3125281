//! Per-zone record cache
//!
//! [`ZoneCache`] mirrors the record list of every zone the session has looked
//! at. Entries are served without a remote call for `ttl` after their fetch,
//! patched in place by optimistic mutations, and restored from a snapshot when
//! a mutation rolls back.
//!
//! ## Revisions
//!
//! Every write to an entry stamps it with a fresh, process-wide revision. A
//! fetch or a verification that started before a local write sees a different
//! revision when it completes and does not overwrite the newer local state.
//!
//! ## Locking
//!
//! Entries live behind a `parking_lot::Mutex` that is only held for
//! synchronous steps, never across an `.await`.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::record::{Record, RecordId};
use crate::traits::RecordStore;

/// Default time a fetched listing stays fresh
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cached listing of one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneCacheEntry {
    pub records: Vec<Record>,
    pub fetched_at: Instant,
    pub revision: u64,
}

/// Where a [`CacheRead`] came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSource {
    /// Fresh entry, no remote call made
    Cached,
    /// Just fetched from the store
    Remote,
    /// The fetch failed; this is the last good listing
    Stale { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    pub records: Vec<Record>,
    pub source: ReadSource,
}

impl CacheRead {
    /// Whether the caller is looking at degraded data
    pub fn is_stale(&self) -> bool {
        matches!(self.source, ReadSource::Stale { .. })
    }
}

/// Exact state of one zone's entry (or its absence) at some point
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    zone_id: String,
    entry: Option<ZoneCacheEntry>,
}

impl CacheSnapshot {
    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }
}

/// Shared per-zone cache in front of a [`RecordStore`]
#[derive(Clone)]
pub struct ZoneCache {
    store: Arc<dyn RecordStore>,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, ZoneCacheEntry>>>,
    revisions: Arc<AtomicU64>,
    /// Provisional rows whose create has not been answered yet
    in_flight: Arc<Mutex<HashSet<RecordId>>>,
}

impl ZoneCache {
    pub fn new(store: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            revisions: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read a zone's records, fetching them if the entry is missing or expired
    ///
    /// # Behavior
    ///
    /// - Fresh entry and no `force_refresh`: returned as [`ReadSource::Cached`]
    /// - Otherwise the store is listed and the entry replaced
    /// - Fetch fails with a previous entry present: that entry is returned as
    ///   [`ReadSource::Stale`], except for `Unauthorized`, which always propagates
    /// - Fetch fails with no entry: the error propagates
    pub async fn get_or_fetch(&self, zone_id: &str, force_refresh: bool) -> Result<CacheRead> {
        let started_at = {
            let entries = self.entries.lock();
            let entry = entries.get(zone_id);
            if let Some(entry) = entry.filter(|e| !force_refresh && e.fetched_at.elapsed() < self.ttl) {
                debug!(zone_id, revision = entry.revision, "Cache hit");
                return Ok(CacheRead {
                    records: entry.records.clone(),
                    source: ReadSource::Cached,
                });
            }
            entry.map(|e| e.revision)
        };

        debug!(zone_id, force_refresh, store = self.store.store_name(), "Fetching records");

        match self.store.list(zone_id).await {
            Ok(records) => {
                let mut entries = self.entries.lock();
                if let Some(current) = entries.get(zone_id) {
                    if Some(current.revision) != started_at {
                        debug!(zone_id, "Local change landed during fetch, keeping it");
                        return Ok(CacheRead {
                            records: current.records.clone(),
                            source: ReadSource::Cached,
                        });
                    }
                }
                let records = self.carry_provisional(entries.get(zone_id), records);
                let entry = ZoneCacheEntry {
                    records: records.clone(),
                    fetched_at: Instant::now(),
                    revision: self.next_revision(),
                };
                entries.insert(zone_id.to_string(), entry);
                Ok(CacheRead {
                    records,
                    source: ReadSource::Remote,
                })
            }
            Err(err) if err.allows_stale_fallback() => {
                let entries = self.entries.lock();
                match entries.get(zone_id) {
                    Some(entry) => {
                        warn!(zone_id, error = %err, "Fetch failed, serving stale records");
                        Ok(CacheRead {
                            records: entry.records.clone(),
                            source: ReadSource::Stale {
                                reason: err.user_message(),
                            },
                        })
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Apply `f` to a zone's cached records
    ///
    /// Returns `None` without calling `f` when the zone is not cached.
    pub fn patch<R>(&self, zone_id: &str, f: impl FnOnce(&mut Vec<Record>) -> R) -> Option<R> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(zone_id)?;
        let out = f(&mut entry.records);
        entry.revision = self.next_revision();
        Some(out)
    }

    /// Take a snapshot and patch in one critical section
    pub fn snapshot_then_patch<R>(
        &self,
        zone_id: &str,
        f: impl FnOnce(&mut Vec<Record>) -> R,
    ) -> (CacheSnapshot, Option<R>) {
        let mut entries = self.entries.lock();
        let snapshot = CacheSnapshot {
            zone_id: zone_id.to_string(),
            entry: entries.get(zone_id).cloned(),
        };
        let out = entries.get_mut(zone_id).map(|entry| {
            let out = f(&mut entry.records);
            entry.revision = self.next_revision();
            out
        });
        (snapshot, out)
    }

    pub fn snapshot(&self, zone_id: &str) -> CacheSnapshot {
        CacheSnapshot {
            zone_id: zone_id.to_string(),
            entry: self.entries.lock().get(zone_id).cloned(),
        }
    }

    /// Put back exactly what the snapshot saw
    pub fn restore(&self, snapshot: CacheSnapshot) {
        let mut entries = self.entries.lock();
        match snapshot.entry {
            Some(mut entry) => {
                entry.revision = self.next_revision();
                entries.insert(snapshot.zone_id, entry);
            }
            None => {
                entries.remove(&snapshot.zone_id);
            }
        }
    }

    /// Drop a zone's entry so the next read fetches
    pub fn invalidate(&self, zone_id: &str) {
        self.entries.lock().remove(zone_id);
    }

    /// Cached records of a zone, without fetching
    pub fn records(&self, zone_id: &str) -> Option<Vec<Record>> {
        self.entries.lock().get(zone_id).map(|e| e.records.clone())
    }

    /// A single cached record
    pub fn find(&self, zone_id: &str, record_id: &RecordId) -> Option<Record> {
        self.entries
            .lock()
            .get(zone_id)
            .and_then(|e| e.records.iter().find(|r| &r.id == record_id).cloned())
    }

    pub fn revision(&self, zone_id: &str) -> Option<u64> {
        self.entries.lock().get(zone_id).map(|e| e.revision)
    }

    /// Replace a zone's listing only if its revision is still `expected`
    ///
    /// `expected == None` means the zone had no entry.
    pub fn replace_if_revision(&self, zone_id: &str, expected: Option<u64>, records: Vec<Record>) -> bool {
        let mut entries = self.entries.lock();
        let current = entries.get(zone_id).map(|e| e.revision);
        if current != expected {
            return false;
        }
        let entry = ZoneCacheEntry {
            records: self.carry_provisional(entries.get(zone_id), records),
            fetched_at: Instant::now(),
            revision: self.next_revision(),
        };
        entries.insert(zone_id.to_string(), entry);
        true
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Keep a provisional row across listing replacements until released
    pub fn hold_provisional(&self, id: &RecordId) {
        if id.is_provisional() {
            self.in_flight.lock().insert(id.clone());
        }
    }

    pub fn release_provisional(&self, id: &RecordId) {
        self.in_flight.lock().remove(id);
    }

    /// Prepend held provisional rows of `current` to a listing from the store
    ///
    /// A row is dropped once the listing carries a record with its name, type
    /// and content.
    fn carry_provisional(&self, current: Option<&ZoneCacheEntry>, listed: Vec<Record>) -> Vec<Record> {
        let Some(current) = current else {
            return listed;
        };
        let in_flight = self.in_flight.lock();
        if in_flight.is_empty() {
            return listed;
        }
        let mut records: Vec<Record> = current
            .records
            .iter()
            .filter(|r| in_flight.contains(&r.id))
            .filter(|r| !listed.iter().any(|l| l.matches(&r.draft())))
            .cloned()
            .collect();
        if records.is_empty() {
            return listed;
        }
        debug!(kept = records.len(), "Keeping provisional records over fetched listing");
        records.extend(listed);
        records
    }
}

impl fmt::Debug for ZoneCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneCache")
            .field("store", &self.store.store_name())
            .field("ttl", &self.ttl)
            .field("zones", &self.entries.lock().len())
            .finish()
    }
}
