//! View projection
//!
//! [`project`] turns the raw record list of a zone and the current
//! [`ViewParameters`] into what the presentation layer shows: the visible page,
//! facet counts and page metadata. It is pure and is recomputed on every call.
//!
//! ```text
//! records ── filter(query) ──┬── facets
//!                            └── filter(type, proxied) ── sort ── paginate ── page
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::record::{Record, RecordId};

/// Default number of records per page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Column the view is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    #[default]
    Type,
    Content,
    Proxied,
}

impl std::str::FromStr for SortKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "type" => Ok(Self::Type),
            "content" => Ok(Self::Content),
            "proxied" => Ok(Self::Proxied),
            other => Err(crate::Error::invalid_input(format!(
                "unknown sort key '{}' (expected name, type, content or proxied)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// User-controlled view state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewParameters {
    /// Free-text filter over type, name and content
    pub query: String,
    /// Record types to show; empty shows all
    pub type_filter: BTreeSet<String>,
    /// `Some(flag)` shows only records whose `proxied` equals `flag`
    pub proxied_filter: Option<bool>,
    pub sort_key: SortKey,
    pub sort_direction: SortDirection,
    /// 1-based
    pub page_index: usize,
    pub page_size: usize,
}

impl Default for ViewParameters {
    fn default() -> Self {
        Self {
            query: String::new(),
            type_filter: BTreeSet::new(),
            proxied_filter: None,
            sort_key: SortKey::default(),
            sort_direction: SortDirection::default(),
            page_index: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ViewParameters {
    /// Add the type to the filter, or remove it if already present
    pub fn toggle_type(&mut self, record_type: &str) {
        if !self.type_filter.remove(record_type) {
            self.type_filter.insert(record_type.to_string());
        }
    }

    /// Filter on `proxied`, or drop the filter if it already has that value
    pub fn toggle_proxied(&mut self, proxied: bool) {
        self.proxied_filter = match self.proxied_filter {
            Some(current) if current == proxied => None,
            _ => Some(proxied),
        };
    }

    /// Drop the query and both facet filters
    pub fn clear_filters(&mut self) {
        self.query.clear();
        self.type_filter.clear();
        self.proxied_filter = None;
    }

    fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }
}

/// Aggregate counts over the query-filtered records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub by_type: BTreeMap<String, usize>,
    pub proxied: usize,
    pub unproxied: usize,
}

/// Pagination metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// Requested index clamped to `1..=total_pages`
    pub page_index: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Records left after all filters
    pub filtered_count: usize,
    /// Records before filtering
    pub total_count: usize,
}

/// Output of [`project`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Records on the current page, in display order
    pub records: Vec<Record>,
    pub facets: Facets,
    pub page: PageInfo,
}

impl Projection {
    /// Ids of the records on the current page
    pub fn visible_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Number of pages needed for `count` records, never less than one
pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1)).max(1)
}

/// Project the records through the view parameters
pub fn project(records: &[Record], params: &ViewParameters) -> Projection {
    let query = params.query.trim().to_lowercase();

    let queried: Vec<&Record> = records
        .iter()
        .filter(|r| matches_query(r, &query))
        .collect();

    let facets = facets(&queried);

    let mut filtered: Vec<&Record> = queried
        .into_iter()
        .filter(|r| params.type_filter.is_empty() || params.type_filter.contains(&r.record_type))
        .filter(|r| params.proxied_filter.is_none_or(|p| r.proxied == p))
        .collect();

    // slice::sort_by is stable, ties keep their filtered order
    filtered.sort_by(|a, b| {
        let ord = compare(a, b, params.sort_key);
        match params.sort_direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });

    let page_size = params.effective_page_size();
    let filtered_count = filtered.len();
    let total_pages = total_pages(filtered_count, page_size);
    let page_index = params.page_index.clamp(1, total_pages);

    let start = (page_index - 1) * page_size;
    let page_records = filtered
        .into_iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect();

    Projection {
        records: page_records,
        facets,
        page: PageInfo {
            page_index,
            page_size,
            total_pages,
            filtered_count,
            total_count: records.len(),
        },
    }
}

fn matches_query(record: &Record, query: &str) -> bool {
    query.is_empty()
        || record.record_type.to_lowercase().contains(query)
        || record.name.to_lowercase().contains(query)
        || record.content.to_lowercase().contains(query)
}

fn compare(a: &Record, b: &Record, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Type => a.record_type.cmp(&b.record_type),
        SortKey::Content => a.content.cmp(&b.content),
        SortKey::Proxied => a.proxied.cmp(&b.proxied),
    }
}

fn facets(records: &[&Record]) -> Facets {
    let mut facets = Facets::default();
    for record in records {
        *facets.by_type.entry(record.record_type.clone()).or_insert(0) += 1;
        if record.proxied {
            facets.proxied += 1;
        } else {
            facets.unproxied += 1;
        }
    }
    facets
}
