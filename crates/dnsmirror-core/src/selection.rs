//! Multi-record selection
//!
//! The selection belongs to one zone. It survives query, filter, sort and page
//! changes, so records can be selected across pages, and is emptied when the
//! active zone changes. Deletes and reconciliations drop vanished ids from it.
//! Records that are still provisional cannot be selected.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::record::{Record, RecordId};

/// Selected record ids and the zone they belong to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    pub zone_id: Option<String>,
    pub ids: BTreeSet<RecordId>,
}

/// Shared handle to the session's selection
#[derive(Debug, Clone, Default)]
pub struct SelectionController {
    inner: Arc<Mutex<SelectionSet>>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one id; returns whether it is selected afterwards
    pub fn toggle(&self, id: &RecordId) -> bool {
        if id.is_provisional() {
            return false;
        }
        let mut set = self.inner.lock();
        if set.ids.remove(id) {
            false
        } else {
            set.ids.insert(id.clone());
            true
        }
    }

    /// Add every selectable visible id
    pub fn select_all_visible(&self, visible: &[RecordId]) {
        let mut set = self.inner.lock();
        set.ids
            .extend(visible.iter().filter(|id| !id.is_provisional()).cloned());
    }

    /// Deselect the visible ids if all of them are selected, otherwise select them all
    pub fn toggle_all_visible(&self, visible: &[RecordId]) {
        let mut set = self.inner.lock();
        let selectable: Vec<&RecordId> = visible.iter().filter(|id| !id.is_provisional()).collect();
        if selectable.is_empty() {
            return;
        }
        if selectable.iter().all(|id| set.ids.contains(*id)) {
            for id in selectable {
                set.ids.remove(id);
            }
        } else {
            set.ids.extend(selectable.into_iter().cloned());
        }
    }

    /// Deselect only the visible ids
    pub fn clear_visible(&self, visible: &[RecordId]) {
        let mut set = self.inner.lock();
        for id in visible {
            set.ids.remove(id);
        }
    }

    /// Deselect everything
    pub fn clear(&self) {
        self.inner.lock().ids.clear();
    }

    /// Drop an id if the selection belongs to `zone_id`; returns whether it was selected
    pub fn remove(&self, zone_id: &str, id: &RecordId) -> bool {
        let mut set = self.inner.lock();
        set.zone_id.as_deref() == Some(zone_id) && set.ids.remove(id)
    }

    /// Put back an id removed by [`remove`](Self::remove)
    pub fn reselect(&self, zone_id: &str, id: &RecordId) {
        let mut set = self.inner.lock();
        if set.zone_id.as_deref() == Some(zone_id) && !id.is_provisional() {
            set.ids.insert(id.clone());
        }
    }

    /// Drop ids that no longer appear in `records`; returns how many were dropped
    pub fn retain_present(&self, zone_id: &str, records: &[Record]) -> usize {
        let mut set = self.inner.lock();
        if set.zone_id.as_deref() != Some(zone_id) {
            return 0;
        }
        let before = set.ids.len();
        set.ids.retain(|id| records.iter().any(|r| &r.id == id));
        before - set.ids.len()
    }

    /// Empty the selection and bind it to another zone
    pub fn reset_for_zone(&self, zone_id: Option<&str>) {
        let mut set = self.inner.lock();
        set.ids.clear();
        set.zone_id = zone_id.map(str::to_string);
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.inner.lock().ids.contains(id)
    }

    /// Selected ids in order
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner.lock().ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ids.is_empty()
    }

    pub fn snapshot(&self) -> SelectionSet {
        self.inner.lock().clone()
    }
}
