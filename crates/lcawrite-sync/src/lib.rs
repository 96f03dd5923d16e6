//! Remote record tables over a PostgREST-style HTTP API.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpRecordStore, SyncError};
