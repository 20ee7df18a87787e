//! Optimistic collection: a cached sequence kept in step with a remote authority.
//!
//! Writes are applied to the cached sequence before the remote call is made
//! and reconciled once it settles:
//! - create: a placeholder with a temporary id is inserted at the head and
//!   later replaced by the server's entity (matched by temporary id)
//! - update: changes are applied in place, the server response is merged in
//! - delete: the entry is removed immediately
//!
//! On failure, update and delete restore the whole snapshot captured just
//! before their optimistic edit; create removes only its placeholder.
//!
//! Rollback is last-snapshot-wins. Two mutations in flight on the same
//! collection are not isolated from each other: if one fails, restoring its
//! snapshot also discards any optimistic edit made after that snapshot was
//! taken. Mutations on the same entity are not serialized either; whichever
//! call settles last decides the cached state. Creates that settled after a
//! snapshot was taken are the exception: a restored snapshot carries the
//! server's entity in place of the placeholder, or drops the placeholder if
//! the create failed.
//!
//! Entities confirmed by a create stay cached across a later fetch that
//! does not return them.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::api::{ErrorKind, TransportError};

use super::error::StoreError;
use super::lock::lock;
use super::traits::{Entity, EntityId, Snapshot, TempIds};

/// Outcome of a mutation or load, resolved once the remote call settles.
///
/// The remote call runs on its own task: dropping this future does not
/// cancel it, and reconciliation still happens.
pub type Settled<T> = BoxFuture<'static, Result<T, StoreError>>;

type InFlight = Shared<BoxFuture<'static, Result<(), StoreError>>>;

/// Whether a collection has been fetched from the server yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
  Unloaded,
  Loading,
  Loaded,
}

enum Load {
  Unloaded,
  Loading(InFlight),
  Loaded,
}

struct State<T> {
  items: Snapshot<T>,
  load: Load,
  /// Ids confirmed by a create and not yet seen in a fetch
  created: HashSet<EntityId>,
  /// Outcome of creates that settled while a rollback snapshot was held,
  /// by temporary id. `None` means the create failed.
  settled_creates: HashMap<EntityId, Option<T>>,
  /// Update and delete calls still holding a rollback snapshot
  open_snapshots: usize,
}

struct Inner<T> {
  name: String,
  state: Mutex<State<T>>,
  tx: watch::Sender<Snapshot<T>>,
}

impl<T: Entity> Inner<T> {
  fn lock(&self, op: &'static str) -> MutexGuard<'_, State<T>> {
    lock(&self.state, &self.name, op)
  }

  /// Replace the current snapshot and notify subscribers. Returns the old one.
  fn publish(&self, state: &mut State<T>, items: Snapshot<T>) -> Snapshot<T> {
    let before = std::mem::replace(&mut state.items, Arc::clone(&items));
    self.tx.send_replace(items);
    before
  }

  /// Apply `f` to a copy of the current sequence and publish the result.
  fn edit(&self, op: &'static str, f: impl FnOnce(&mut Vec<T>)) {
    let mut state = self.lock(op);
    let mut items = (*state.items).clone();
    f(&mut items);
    self.publish(&mut state, Arc::new(items));
  }

  fn finish_load(&self, result: Result<Vec<T>, TransportError>) -> Result<(), StoreError> {
    let mut state = self.lock("finish_load");

    match result {
      Ok(fetched) => {
        let fetched = dedupe(fetched);
        let fetched_ids: HashSet<EntityId> = fetched.iter().map(|e| e.id()).collect();
        state.created.retain(|id| !fetched_ids.contains(id));

        // Placeholders of creates in flight, and creates the fetch doesn't
        // know about yet, stay at the head
        let mut items: Vec<T> = state
          .items
          .iter()
          .filter(|e| e.id().is_pending() || state.created.contains(&e.id()))
          .cloned()
          .collect();
        let kept = items.len();
        let count = fetched.len();
        items.extend(fetched);
        self.publish(&mut state, Arc::new(items));
        state.load = Load::Loaded;
        info!(collection = %self.name, count, kept, "Collection loaded");
        Ok(())
      }
      Err(err) => {
        // Only placeholders of creates in flight survive
        let items: Vec<T> = state
          .items
          .iter()
          .filter(|e| e.id().is_pending())
          .cloned()
          .collect();
        state.created.clear();
        self.publish(&mut state, Arc::new(items));
        state.load = Load::Unloaded;
        warn!(collection = %self.name, error = %err, "Fetch failed, cache emptied");
        Err(err.into())
      }
    }
  }

  fn confirm_create(&self, temp_id: EntityId, created: T) -> T {
    let id = created.id();
    let mut state = self.lock("confirm_create");
    let mut items = (*state.items).clone();
    items.retain(|e| e.id() != id);
    let replaced = match items.iter().position(|e| e.id() == temp_id) {
      Some(pos) => {
        items[pos] = created.clone();
        true
      }
      None => {
        items.insert(0, created.clone());
        false
      }
    };
    state.created.insert(id);
    if state.open_snapshots > 0 {
      state.settled_creates.insert(temp_id, Some(created.clone()));
    }
    self.publish(&mut state, Arc::new(items));
    drop(state);
    info!(collection = %self.name, %temp_id, %id, replaced, "Create confirmed");
    created
  }

  fn discard_placeholder(&self, temp_id: EntityId, err: &TransportError) {
    let mut state = self.lock("discard_placeholder");
    let items: Vec<T> = state.items.iter().filter(|e| e.id() != temp_id).cloned().collect();
    if state.open_snapshots > 0 {
      state.settled_creates.insert(temp_id, None);
    }
    self.publish(&mut state, Arc::new(items));
    drop(state);
    warn!(collection = %self.name, %temp_id, error = %err, "Create failed, placeholder removed");
  }

  fn confirm_update(&self, id: EntityId, confirmed: T) -> T {
    let mut state = self.lock("confirm_update");
    let mut items = (*state.items).clone();
    let merged = items.iter_mut().find(|e| e.id() == id).map(|entry| {
      entry.merge(confirmed.clone());
      entry.clone()
    });
    self.publish(&mut state, Arc::new(items));
    release_snapshot(&mut state);
    drop(state);
    info!(collection = %self.name, %id, "Update confirmed");
    merged.unwrap_or(confirmed)
  }

  fn confirm_delete(&self, id: EntityId) {
    let mut state = self.lock("confirm_delete");
    state.created.remove(&id);
    release_snapshot(&mut state);
    drop(state);
    info!(collection = %self.name, %id, "Delete confirmed");
  }

  fn rollback(&self, op: &'static str, id: EntityId, before: Snapshot<T>, err: &TransportError) {
    let mut state = self.lock("rollback");
    let restored = restorable(&state, &before);
    self.publish(&mut state, Arc::new(restored));
    release_snapshot(&mut state);
    drop(state);
    warn!(collection = %self.name, op, %id, error = %err, "Remote call failed, snapshot restored");
  }
}

fn release_snapshot<T>(state: &mut State<T>) {
  state.open_snapshots = state.open_snapshots.saturating_sub(1);
  if state.open_snapshots == 0 {
    state.settled_creates.clear();
  }
}

/// `before` with the outcome of creates that settled since it was taken.
fn restorable<T: Entity>(state: &State<T>, before: &[T]) -> Vec<T> {
  let restored = before
    .iter()
    .filter_map(|e| match state.settled_creates.get(&e.id()) {
      None => Some(e.clone()),
      Some(None) => None,
      Some(Some(created)) => Some(
        state
          .items
          .iter()
          .find(|c| c.id() == created.id())
          .cloned()
          .unwrap_or_else(|| created.clone()),
      ),
    })
    .collect();
  dedupe(restored)
}

/// One cached collection of entities (all posts, or the comments of one post).
pub struct Collection<T: Entity> {
  inner: Arc<Inner<T>>,
  ids: Arc<TempIds>,
}

impl<T: Entity> Collection<T> {
  /// Create an empty, unloaded collection.
  ///
  /// `ids` is shared between collections of the same store so that temporary
  /// ids are unique store-wide.
  pub fn new(name: impl Into<String>, ids: Arc<TempIds>) -> Self {
    let items: Snapshot<T> = Arc::new(Vec::new());
    let (tx, _rx) = watch::channel(Arc::clone(&items));
    Self {
      inner: Arc::new(Inner {
        name: name.into(),
        state: Mutex::new(State {
          items,
          load: Load::Unloaded,
          created: HashSet::new(),
          settled_creates: HashMap::new(),
          open_snapshots: 0,
        }),
        tx,
      }),
      ids,
    }
  }

  /// Last known snapshot. Never waits on the network.
  pub fn read(&self) -> Snapshot<T> {
    Arc::clone(&self.inner.lock("read").items)
  }

  /// Receive every new snapshot. The current one is available immediately.
  pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
    self.inner.tx.subscribe()
  }

  /// Look up a cached entity by id.
  pub fn get(&self, id: EntityId) -> Option<T> {
    self.read().iter().find(|e| e.id() == id).cloned()
  }

  pub fn load_state(&self) -> LoadState {
    match self.inner.lock("load_state").load {
      Load::Unloaded => LoadState::Unloaded,
      Load::Loading(_) => LoadState::Loading,
      Load::Loaded => LoadState::Loaded,
    }
  }

  /// Fetch the collection unless it is loaded or already being fetched.
  ///
  /// Callers arriving while a fetch is in flight wait on that same fetch;
  /// `fetcher` is only invoked when a new fetch actually starts. A failed
  /// fetch leaves the collection empty (apart from placeholders of creates
  /// still in flight) and unloaded, and every waiting caller gets the error.
  ///
  /// `fetcher` runs after the collection lock is released, so it may read
  /// the collection; it already observes [`LoadState::Loading`].
  pub fn ensure_loaded<F, Fut>(&self, fetcher: F) -> Settled<()>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, TransportError>> + Send + 'static,
  {
    let (fetch_tx, in_flight) = {
      let mut state = self.inner.lock("ensure_loaded");
      match &state.load {
        Load::Loaded => return future::ready(Ok(())).boxed(),
        Load::Loading(in_flight) => {
          debug!(collection = %self.inner.name, "Joining in-flight fetch");
          return in_flight.clone().boxed();
        }
        Load::Unloaded => {}
      }

      let (fetch_tx, fetch_rx) = oneshot::channel::<Fut>();
      let inner = Arc::clone(&self.inner);
      let in_flight = spawn_settled(async move {
        let result = match fetch_rx.await {
          Ok(fetch) => fetch.await,
          Err(_) => Err(TransportError::new(
            ErrorKind::Unknown,
            "fetch was abandoned before it started",
          )),
        };
        inner.finish_load(result)
      })
      .shared();
      state.load = Load::Loading(in_flight.clone());
      (fetch_tx, in_flight)
    };

    debug!(collection = %self.inner.name, "Starting fetch");
    // Only fails if the load task is already gone; it then reports itself
    let _ = fetch_tx.send(fetcher());
    in_flight.boxed()
  }

  /// Insert a placeholder built by `build` at the head, then reconcile with
  /// the result of `remote`.
  ///
  /// `build` receives the temporary id the placeholder must carry. On
  /// success the placeholder is replaced by the server's entity; any other
  /// entry holding the same server id is dropped. A server that answers
  /// every create with the same id (JSONPlaceholder always says 101)
  /// therefore keeps only the latest of those creates in the cache.
  pub fn create<B, Fut>(&self, build: B, remote: Fut) -> Settled<T>
  where
    B: FnOnce(EntityId) -> T,
    Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
  {
    let temp_id = self.ids.next();
    let placeholder = build(temp_id);
    self.inner.edit("create", |items| items.insert(0, placeholder));
    debug!(collection = %self.inner.name, %temp_id, "Optimistic create");

    let inner = Arc::clone(&self.inner);
    spawn_settled(async move {
      match remote.await {
        Ok(created) => Ok(inner.confirm_create(temp_id, created)),
        Err(err) => {
          inner.discard_placeholder(temp_id, &err);
          Err(err.into())
        }
      }
    })
  }

  /// Apply `apply` to the cached entry, then reconcile with `remote`.
  ///
  /// `remote` is only invoked if the entry exists and is confirmed; it
  /// receives the server id.
  pub fn update<A, F, Fut>(&self, id: EntityId, apply: A, remote: F) -> Settled<T>
  where
    A: FnOnce(&mut T),
    F: FnOnce(u64) -> Fut,
    Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
  {
    let Some(server_id) = id.confirmed() else {
      return rejected(StoreError::Unconfirmed {
        entity: T::entity_type(),
        id,
      });
    };

    let before = {
      let mut state = self.inner.lock("update");
      let mut items = (*state.items).clone();
      let Some(entry) = items.iter_mut().find(|e| e.id() == id) else {
        return rejected(StoreError::NotFound {
          entity: T::entity_type(),
          id,
        });
      };
      apply(entry);
      state.open_snapshots += 1;
      self.inner.publish(&mut state, Arc::new(items))
    };
    debug!(collection = %self.inner.name, %id, "Optimistic update");

    let fut = remote(server_id);
    let inner = Arc::clone(&self.inner);
    spawn_settled(async move {
      match fut.await {
        Ok(confirmed) => Ok(inner.confirm_update(id, confirmed)),
        Err(err) => {
          inner.rollback("update", id, before, &err);
          Err(err.into())
        }
      }
    })
  }

  /// Remove the cached entry, then reconcile with `remote`.
  pub fn delete<F, Fut>(&self, id: EntityId, remote: F) -> Settled<()>
  where
    F: FnOnce(u64) -> Fut,
    Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
  {
    let Some(server_id) = id.confirmed() else {
      return rejected(StoreError::Unconfirmed {
        entity: T::entity_type(),
        id,
      });
    };

    let before = {
      let mut state = self.inner.lock("delete");
      if !state.items.iter().any(|e| e.id() == id) {
        return rejected(StoreError::NotFound {
          entity: T::entity_type(),
          id,
        });
      }
      let items: Vec<T> = state.items.iter().filter(|e| e.id() != id).cloned().collect();
      state.open_snapshots += 1;
      self.inner.publish(&mut state, Arc::new(items))
    };
    debug!(collection = %self.inner.name, %id, "Optimistic delete");

    let fut = remote(server_id);
    let inner = Arc::clone(&self.inner);
    spawn_settled(async move {
      match fut.await {
        Ok(()) => {
          inner.confirm_delete(id);
          Ok(())
        }
        Err(err) => {
          inner.rollback("delete", id, before, &err);
          Err(err.into())
        }
      }
    })
  }
}

impl<T: Entity> Clone for Collection<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      ids: Arc::clone(&self.ids),
    }
  }
}

/// Run `task` to completion on the runtime regardless of who awaits it.
fn spawn_settled<R, Fut>(task: Fut) -> Settled<R>
where
  R: Send + 'static,
  Fut: Future<Output = Result<R, StoreError>> + Send + 'static,
{
  let handle = tokio::spawn(task);
  async move {
    handle
      .await
      .unwrap_or_else(|err| Err(StoreError::Task(err.to_string())))
  }
  .boxed()
}

fn rejected<R: Send + 'static>(err: StoreError) -> Settled<R> {
  future::ready(Err(err)).boxed()
}

/// Drop repeated ids, keeping the first occurrence.
fn dedupe<T: Entity>(items: Vec<T>) -> Vec<T> {
  let mut seen = HashSet::new();
  items.into_iter().filter(|e| seen.insert(e.id())).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::oneshot;

  #[derive(Debug, Clone, PartialEq)]
  struct Note {
    id: EntityId,
    text: String,
    /// Client-only field the server never returns
    label: Option<String>,
  }

  impl Note {
    fn new(id: u64, text: &str) -> Self {
      Self {
        id: EntityId::Confirmed(id),
        text: text.to_string(),
        label: None,
      }
    }
  }

  impl Entity for Note {
    fn id(&self) -> EntityId {
      self.id
    }

    fn merge(&mut self, confirmed: Self) {
      self.text = confirmed.text;
      if confirmed.label.is_some() {
        self.label = confirmed.label;
      }
    }

    fn entity_type() -> &'static str {
      "note"
    }
  }

  fn notes() -> Collection<Note> {
    Collection::new("notes", Arc::new(TempIds::new()))
  }

  async fn loaded(items: Vec<Note>) -> Collection<Note> {
    let c = notes();
    c.ensure_loaded(move || async move { Ok(items) })
      .await
      .unwrap();
    c
  }

  /// A remote call that stays pending until the returned sender fires.
  fn gated<R: Send + 'static>() -> (
    oneshot::Sender<Result<R, TransportError>>,
    impl Future<Output = Result<R, TransportError>> + Send + 'static,
  ) {
    let (tx, rx) = oneshot::channel();
    let fut = async move {
      rx.await
        .unwrap_or_else(|_| Err(TransportError::network("gate dropped")))
    };
    (tx, fut)
  }

  fn ids(c: &Collection<Note>) -> Vec<EntityId> {
    c.read().iter().map(|n| n.id).collect()
  }

  #[tokio::test]
  async fn test_load_returns_fetched_in_order() {
    let c = loaded(vec![Note::new(1, "a"), Note::new(2, "b")]).await;
    assert_eq!(*c.read(), vec![Note::new(1, "a"), Note::new(2, "b")]);
    assert_eq!(c.load_state(), LoadState::Loaded);
  }

  #[tokio::test]
  async fn test_concurrent_ensure_loaded_fetches_once() {
    let c = notes();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, fut) = gated::<Vec<Note>>();

    let first = {
      let calls = calls.clone();
      c.ensure_loaded(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        fut
      })
    };
    assert_eq!(c.load_state(), LoadState::Loading);

    let second = {
      let calls = calls.clone();
      c.ensure_loaded(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(vec![Note::new(9, "never")]) }
      })
    };

    tx.send(Ok(vec![Note::new(1, "a")])).unwrap();
    let (a, b) = futures::join!(first, second);
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ids(&c), vec![EntityId::Confirmed(1)]);

    // Loaded collections never refetch
    c.ensure_loaded(|| async { Ok(Vec::new()) }).await.unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_failed_load_empties_and_reports_to_all_waiters() {
    let c = notes();
    let (tx, fut) = gated::<Vec<Note>>();
    let first = c.ensure_loaded(move || fut);
    let second = c.ensure_loaded(|| async { Ok(Vec::new()) });

    tx.send(Err(TransportError::status(503, "down"))).unwrap();
    let (a, b) = futures::join!(first, second);
    assert!(matches!(a, Err(StoreError::Transport(_))));
    assert_eq!(a, b);
    assert!(c.read().is_empty());
    assert_eq!(c.load_state(), LoadState::Unloaded);

    // A later explicit call may try again
    c.ensure_loaded(|| async { Ok(vec![Note::new(1, "a")]) })
      .await
      .unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_load_drops_duplicate_ids() {
    let c = loaded(vec![Note::new(1, "a"), Note::new(1, "dup"), Note::new(2, "b")]).await;
    assert_eq!(*c.read(), vec![Note::new(1, "a"), Note::new(2, "b")]);
  }

  #[tokio::test]
  async fn test_create_replaces_placeholder_with_server_entity() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let (tx, fut) = gated::<Note>();

    let settled = c.create(
      |id| Note {
        id,
        text: "x".into(),
        label: None,
      },
      fut,
    );

    // Placeholder visible at the head before the server answers
    let temp_id = c.read()[0].id;
    assert!(temp_id.is_pending());
    assert_eq!(c.read()[0].text, "x");
    assert_eq!(c.read().len(), 2);

    tx.send(Ok(Note::new(42, "x"))).unwrap();
    let created = settled.await.unwrap();
    assert_eq!(created.id, EntityId::Confirmed(42));
    assert_eq!(ids(&c), vec![EntityId::Confirmed(42), EntityId::Confirmed(1)]);
    assert!(c.get(temp_id).is_none());
  }

  #[tokio::test]
  async fn test_identical_creates_are_not_conflated() {
    let c = loaded(Vec::new()).await;
    let (tx_a, fut_a) = gated::<Note>();
    let (tx_b, fut_b) = gated::<Note>();
    let build = |id| Note {
      id,
      text: "same".into(),
      label: None,
    };

    let a = c.create(build, fut_a);
    let b = c.create(build, fut_b);
    let placeholders = ids(&c);
    assert_eq!(placeholders.len(), 2);
    assert_ne!(placeholders[0], placeholders[1]);

    // Second create settles first; each replaces its own placeholder
    tx_b.send(Ok(Note::new(11, "same"))).unwrap();
    b.await.unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(11), placeholders[1]]);

    tx_a.send(Ok(Note::new(10, "same"))).unwrap();
    a.await.unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(11), EntityId::Confirmed(10)]);
  }

  #[tokio::test]
  async fn test_create_with_reused_server_id_keeps_ids_unique() {
    let c = loaded(Vec::new()).await;
    let build = |id| Note {
      id,
      text: "x".into(),
      label: None,
    };

    // Some APIs answer every create with the same id
    c.create(build, async { Ok(Note::new(101, "x")) })
      .await
      .unwrap();
    c.create(build, async { Ok(Note::new(101, "x")) })
      .await
      .unwrap();

    assert_eq!(ids(&c), vec![EntityId::Confirmed(101)]);
  }

  #[tokio::test]
  async fn test_failed_create_restores_snapshot() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let before = c.read();

    let err = c
      .create(
        |id| Note {
          id,
          text: "x".into(),
          label: None,
        },
        async { Err(TransportError::status(400, "bad")) },
      )
      .await
      .unwrap_err();

    assert_eq!(err.transport().map(|e| e.kind.status()), Some(Some(400)));
    assert_eq!(*c.read(), *before);
  }

  #[tokio::test]
  async fn test_update_is_visible_before_remote_settles_and_rolls_back() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let before = c.read();
    let (tx, fut) = gated::<Note>();

    let settled = c.update(EntityId::Confirmed(1), |n| n.text = "b".into(), move |_| fut);
    assert_eq!(*c.read(), vec![Note::new(1, "b")]);

    tx.send(Err(TransportError::network("offline"))).unwrap();
    assert!(settled.await.is_err());
    assert_eq!(*c.read(), vec![Note::new(1, "a")]);
    assert_eq!(*c.read(), *before);
  }

  #[tokio::test]
  async fn test_update_merge_keeps_client_fields() {
    let mut labelled = Note::new(1, "a");
    labelled.label = Some("mine".into());
    let c = loaded(vec![labelled]).await;

    let updated = c
      .update(
        EntityId::Confirmed(1),
        |n| n.text = "b".into(),
        |_| async { Ok(Note::new(1, "b (server)")) },
      )
      .await
      .unwrap();

    assert_eq!(updated.text, "b (server)");
    assert_eq!(updated.label.as_deref(), Some("mine"));
    assert_eq!(*c.read(), vec![updated]);
  }

  #[tokio::test]
  async fn test_update_unknown_or_pending_id_is_rejected_without_remote_call() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = |calls: Arc<AtomicUsize>| {
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(Note::new(1, "a")) }
      }
    };

    let missing = c
      .update(EntityId::Confirmed(7), |_| {}, counted(calls.clone()))
      .await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));

    let pending = c
      .update(EntityId::Pending(1), |_| {}, counted(calls.clone()))
      .await;
    assert!(matches!(pending, Err(StoreError::Unconfirmed { .. })));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_delete_removes_then_rolls_back_on_failure() {
    let c = loaded(vec![Note::new(1, "a"), Note::new(2, "b")]).await;
    let before = c.read();
    let (tx, fut) = gated::<()>();

    let settled = c.delete(EntityId::Confirmed(1), move |_| fut);
    assert_eq!(ids(&c), vec![EntityId::Confirmed(2)]);

    tx.send(Err(TransportError::status(500, "boom"))).unwrap();
    assert!(settled.await.is_err());
    assert_eq!(*c.read(), *before);
  }

  #[tokio::test]
  async fn test_delete_success_keeps_entry_removed() {
    let c = loaded(vec![Note::new(1, "a"), Note::new(2, "b")]).await;
    c.delete(EntityId::Confirmed(2), |_| async { Ok(()) })
      .await
      .unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_remote_call_completes_when_caller_drops_future() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let (tx, fut) = gated::<()>();

    drop(c.delete(EntityId::Confirmed(1), move |_| fut));
    tx.send(Err(TransportError::status(500, "boom"))).unwrap();

    // Let the background task run to completion
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }
    assert_eq!(ids(&c), vec![EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_subscribers_see_current_and_later_snapshots() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let mut rx = c.subscribe();
    assert_eq!(rx.borrow().len(), 1);

    let (tx, fut) = gated::<()>();
    let settled = c.delete(EntityId::Confirmed(1), move |_| fut);
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_empty());

    tx.send(Ok(())).unwrap();
    settled.await.unwrap();
  }

  #[tokio::test]
  async fn test_placeholders_survive_a_landing_fetch() {
    let c = notes();
    let (tx, fut) = gated::<Vec<Note>>();
    let load = c.ensure_loaded(move || fut);

    let (create_tx, create_fut) = gated::<Note>();
    let created = c.create(
      |id| Note {
        id,
        text: "new".into(),
        label: None,
      },
      create_fut,
    );
    let temp_id = c.read()[0].id;

    tx.send(Ok(vec![Note::new(1, "a")])).unwrap();
    load.await.unwrap();
    assert_eq!(ids(&c), vec![temp_id, EntityId::Confirmed(1)]);

    create_tx.send(Ok(Note::new(2, "new"))).unwrap();
    created.await.unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(2), EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_create_confirmed_before_first_load_survives_it() {
    let c = notes();
    c.create(
      |id| Note {
        id,
        text: "mine".into(),
        label: None,
      },
      async { Ok(Note::new(501, "mine")) },
    )
    .await
    .unwrap();

    // The server doesn't list the new entity (it never stored it)
    c.ensure_loaded(|| async { Ok(vec![Note::new(1, "a")]) })
      .await
      .unwrap();

    assert_eq!(ids(&c), vec![EntityId::Confirmed(501), EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_fetched_copy_of_local_create_wins() {
    let c = notes();
    c.create(
      |id| Note {
        id,
        text: "mine".into(),
        label: None,
      },
      async { Ok(Note::new(7, "mine")) },
    )
    .await
    .unwrap();

    c.ensure_loaded(|| async { Ok(vec![Note::new(7, "server"), Note::new(1, "a")]) })
      .await
      .unwrap();

    assert_eq!(*c.read(), vec![Note::new(7, "server"), Note::new(1, "a")]);
  }

  #[tokio::test]
  async fn test_rollback_keeps_create_confirmed_in_the_meantime() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let (create_tx, create_fut) = gated::<Note>();
    let created = c.create(
      |id| Note {
        id,
        text: "x".into(),
        label: None,
      },
      create_fut,
    );
    let temp_id = c.read()[0].id;

    // Snapshot taken while the placeholder is still pending
    let (delete_tx, delete_fut) = gated::<()>();
    let deleted = c.delete(EntityId::Confirmed(1), move |_| delete_fut);
    assert_eq!(ids(&c), vec![temp_id]);

    create_tx.send(Ok(Note::new(42, "x"))).unwrap();
    created.await.unwrap();
    assert_eq!(ids(&c), vec![EntityId::Confirmed(42)]);

    delete_tx.send(Err(TransportError::status(500, "boom"))).unwrap();
    assert!(deleted.await.is_err());
    assert_eq!(ids(&c), vec![EntityId::Confirmed(42), EntityId::Confirmed(1)]);

    // The restored entity is a confirmed one and can be edited
    let updated = c
      .update(
        EntityId::Confirmed(42),
        |n| n.text = "y".into(),
        |_| async { Ok(Note::new(42, "y")) },
      )
      .await
      .unwrap();
    assert_eq!(updated.text, "y");
  }

  #[tokio::test]
  async fn test_rollback_does_not_revive_failed_create() {
    let c = loaded(vec![Note::new(1, "a")]).await;
    let (create_tx, create_fut) = gated::<Note>();
    let created = c.create(
      |id| Note {
        id,
        text: "x".into(),
        label: None,
      },
      create_fut,
    );
    let (delete_tx, delete_fut) = gated::<()>();
    let deleted = c.delete(EntityId::Confirmed(1), move |_| delete_fut);

    create_tx.send(Err(TransportError::status(400, "bad"))).unwrap();
    assert!(created.await.is_err());
    assert!(c.read().is_empty());

    delete_tx.send(Err(TransportError::status(500, "boom"))).unwrap();
    assert!(deleted.await.is_err());
    assert_eq!(ids(&c), vec![EntityId::Confirmed(1)]);
  }

  #[tokio::test]
  async fn test_fetcher_may_read_the_collection() {
    let c = notes();
    let reader = c.clone();
    c.ensure_loaded(move || {
      assert_eq!(reader.load_state(), LoadState::Loading);
      let seen = reader.read().len();
      async move { Ok(vec![Note::new(1, &seen.to_string())]) }
    })
    .await
    .unwrap();

    assert_eq!(*c.read(), vec![Note::new(1, "0")]);
    assert_eq!(c.load_state(), LoadState::Loaded);
  }
}
