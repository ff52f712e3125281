//! Collaborator traits for dnsmirror
//!
//! The engine never talks to the network itself; everything remote goes
//! through these interfaces.
//!
//! - [`RecordStore`]: The authoritative zone/record storage behind the proxy
//! - [`Authenticator`]: Exchanges a shared secret for a session token

pub mod authenticator;
pub mod record_store;

pub use authenticator::{Authenticator, SessionToken};
pub use record_store::RecordStore;
