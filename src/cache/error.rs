use crate::api::TransportError;

use super::traits::EntityId;

/// Failure of a cache operation.
///
/// `Clone` because a single in-flight load hands the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
  /// The remote call failed; local state has already been rolled back.
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("{entity} {id} is not in the cache")]
  NotFound { entity: &'static str, id: EntityId },

  #[error("{entity} {id} is still waiting for the server to confirm it")]
  Unconfirmed { entity: &'static str, id: EntityId },

  /// The background task driving the remote call died.
  #[error("background task failed: {0}")]
  Task(String),
}

impl StoreError {
  pub fn transport(&self) -> Option<&TransportError> {
    match self {
      StoreError::Transport(err) => Some(err),
      _ => None,
    }
  }
}
