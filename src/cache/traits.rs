//! Core traits and types for the optimistic cache.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable view of a collection at one point in time.
///
/// Readers hold their own `Arc`, so a snapshot never changes underneath them
/// while a mutation is in flight.
pub type Snapshot<T> = Arc<Vec<T>>;

/// Identifier of a cached entity.
///
/// Temporary identifiers live in their own variant, so they can never collide
/// with anything the server hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
  /// Assigned by the server
  Confirmed(u64),
  /// Assigned locally while a create is in flight
  Pending(u64),
}

impl EntityId {
  pub fn is_pending(&self) -> bool {
    matches!(self, EntityId::Pending(_))
  }

  /// The server identifier, if this entity has one.
  pub fn confirmed(&self) -> Option<u64> {
    match self {
      EntityId::Confirmed(id) => Some(*id),
      EntityId::Pending(_) => None,
    }
  }
}

impl From<u64> for EntityId {
  fn from(id: u64) -> Self {
    EntityId::Confirmed(id)
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Confirmed(id) => write!(f, "{}", id),
      EntityId::Pending(n) => write!(f, "tmp-{}", n),
    }
  }
}

// The API only ever sends numeric ids, which are confirmed by definition.
impl<'de> Deserialize<'de> for EntityId {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    u64::deserialize(deserializer).map(EntityId::Confirmed)
  }
}

/// Source of temporary identifiers, shared by every collection of a store.
#[derive(Debug, Default)]
pub struct TempIds {
  next: AtomicU64,
}

impl TempIds {
  pub fn new() -> Self {
    Self::default()
  }

  /// Hand out the next temporary identifier. Never repeats.
  pub fn next(&self) -> EntityId {
    EntityId::Pending(self.next.fetch_add(1, Ordering::Relaxed) + 1)
  }
}

/// Trait for entities that can live in an optimistic collection.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
  /// Identifier of this entity within its collection
  fn id(&self) -> EntityId;

  /// Fold the server's version of this entity into the cached one.
  ///
  /// Implementations keep client-only fields the server does not return.
  fn merge(&mut self, confirmed: Self);

  /// Entity type name used in logs and errors (e.g., "post", "comment")
  fn entity_type() -> &'static str;
}
