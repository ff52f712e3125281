// # dnsmirror-core
//
// Client-side engine for managing the DNS records of remote zones.
//
// ## Architecture Overview
//
// The remote record store is authoritative; this crate keeps a per-zone local
// mirror of it and lets the user edit that mirror optimistically:
// - **naming**: Relative ⇄ fully-qualified record names
// - **view**: Pure projection of records into a filtered, sorted, paginated page
// - **ZoneCache**: Per-zone TTL cache with snapshot/restore and revisions
// - **OptimisticMutator**: Apply locally, commit remotely, roll back on failure
// - **ReconciliationVerifier**: Poll after commits until the store shows the change
// - **SelectionController**: Multi-select that survives paging and filtering
// - **Session**: Owns all of the above for one client session
//
// ## Design Principles
//
// 1. **Store is the truth**: Local state is a mirror; the view is always derived
// 2. **Optimistic but honest**: Failed writes restore the exact prior state
// 3. **Library-First**: The binary only wires a store to a session

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod mutation;
pub mod naming;
pub mod notice;
pub mod record;
pub mod selection;
pub mod session;
pub mod traits;
pub mod verify;
pub mod view;

// Re-export core types for convenience
pub use cache::{CacheRead, ReadSource, ZoneCache};
pub use config::{SessionConfig, StoreConfig};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use mutation::{BatchPatch, MutationKind, MutationState, OptimisticMutator};
pub use notice::{Notice, NoticeBoard, NoticeLevel};
pub use record::{Record, RecordDraft, RecordId, Zone};
pub use selection::{SelectionController, SelectionSet};
pub use session::Session;
pub use traits::{Authenticator, RecordStore, SessionToken};
pub use verify::{PendingOperation, ReconciliationVerifier, VerificationRequest, VerifyOutcome};
pub use view::{Projection, SortDirection, SortKey, ViewParameters};
