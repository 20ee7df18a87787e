//! Generic optimistic cache for collections backed by a remote API.
//!
//! This module is API-agnostic. It:
//! - Holds the last known snapshot of each collection in memory
//! - Fetches a collection at most once at a time, however many callers ask
//! - Applies writes locally before the remote call, then confirms or rolls back
//! - Publishes every new snapshot to subscribers

mod collection;
mod error;
mod lock;
mod traits;

pub use collection::{Collection, LoadState, Settled};
pub use error::StoreError;
pub use traits::{Entity, EntityId, Snapshot, TempIds};
pub(crate) use lock::lock;
