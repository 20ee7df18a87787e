use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a collection's state, recovering from poisoning.
///
/// Every critical section is a plain in-memory edit, so the data behind a
/// poisoned lock is still a whole snapshot.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, collection: &str, op: &'static str) -> MutexGuard<'a, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => {
      warn!(
        op,
        collection,
        result = "poisoned_recovered",
        "Recovered from poisoned collection lock"
      );
      poisoned.into_inner()
    }
  }
}
