// # Record Store Trait
//
// Defines the interface to the remote, authoritative record storage.
//
// ## Implementations
//
// - HTTP proxy: `dnsmirror-http` crate
// - Tests: `tests/common/mod.rs` in-memory mock
//
// ## Usage
//
// ```rust,ignore
// use dnsmirror_core::{RecordDraft, RecordStore};
//
// #[tokio::main]
// async fn main() -> dnsmirror_core::Result<()> {
//     let store = /* RecordStore implementation */;
//
//     let zones = store.list_zones().await?;
//     let created = store
//         .create(&zones[0].id, &RecordDraft::new("A", "www.example.com", "203.0.113.5"))
//         .await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::record::{Record, RecordDraft, Zone};

/// Trait for record store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// Stores are single-shot: one remote call per invocation, no retries, no
/// caching and no spawned tasks. Caching, retry and verification belong to
/// the session. A store reports failures through the error taxonomy:
///
/// - [`Error::Unauthorized`](crate::Error::Unauthorized): credentials rejected
/// - [`Error::Validation`](crate::Error::Validation): payload rejected
/// - [`Error::NotFound`](crate::Error::NotFound): zone or record missing
/// - [`Error::Remote`](crate::Error::Remote): any other failure response
/// - [`Error::NetworkUnavailable`](crate::Error::NetworkUnavailable): no response at all
///
/// Writes may be acknowledged before they are visible to `list`; the session
/// verifies them afterwards.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List the zones visible to the session
    async fn list_zones(&self) -> Result<Vec<Zone>, crate::Error>;

    /// List every record of a zone
    async fn list(&self, zone_id: &str) -> Result<Vec<Record>, crate::Error>;

    /// Create a record
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: The record as stored, with its assigned id
    /// - `Ok(None)`: Accepted, but the store did not echo the record
    async fn create(&self, zone_id: &str, draft: &RecordDraft) -> Result<Option<Record>, crate::Error>;

    /// Replace every field of an existing record
    async fn update(
        &self,
        zone_id: &str,
        record_id: &str,
        draft: &RecordDraft,
    ) -> Result<Option<Record>, crate::Error>;

    /// Delete a record
    async fn delete(&self, zone_id: &str, record_id: &str) -> Result<(), crate::Error>;

    /// Get the store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}
