//! Post store: posts and their comments, cached optimistically over a transport.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::api::{Comment, CommentChanges, CommentDraft, Post, PostChanges, PostDraft, Transport};
use crate::cache::{self, Collection, EntityId, LoadState, Settled, Snapshot, StoreError, TempIds};

/// Single source of truth for posts and comments in this process.
///
/// Create one per session and pass it to whoever needs it. Reads are served
/// from memory; writes show up locally at once and are confirmed or rolled
/// back when the server answers. See [`Collection`] for the reconciliation
/// rules and their concurrency caveats.
pub struct PostStore {
  transport: Arc<dyn Transport>,
  ids: Arc<TempIds>,
  posts: Collection<Post>,
  /// Comment collections by post id, created on first access
  comments: Mutex<HashMap<u64, Collection<Comment>>>,
}

impl PostStore {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    let ids = Arc::new(TempIds::new());
    Self {
      transport,
      posts: Collection::new("posts", Arc::clone(&ids)),
      ids,
      comments: Mutex::new(HashMap::new()),
    }
  }

  // ==========================================================================
  // Posts
  // ==========================================================================

  /// Last known posts. Empty until loaded.
  pub fn posts(&self) -> Snapshot<Post> {
    self.posts.read()
  }

  pub fn subscribe_posts(&self) -> watch::Receiver<Snapshot<Post>> {
    self.posts.subscribe()
  }

  pub fn posts_state(&self) -> LoadState {
    self.posts.load_state()
  }

  /// Fetch all posts unless already loaded or loading.
  pub fn ensure_posts_loaded(&self) -> Settled<()> {
    let transport = Arc::clone(&self.transport);
    self.posts.ensure_loaded(move || async move {
      let now = Utc::now();
      let posts = transport.fetch_posts().await?;
      Ok(posts.into_iter().map(|p| p.enrich(now)).collect())
    })
  }

  /// A single post, from the cache if present, otherwise from the server.
  ///
  /// Posts fetched this way are not added to the cached list.
  pub async fn post(&self, id: u64) -> Result<Post, StoreError> {
    if let Some(post) = self.posts.get(EntityId::Confirmed(id)) {
      return Ok(post);
    }
    let post = self.transport.fetch_post(id).await?;
    Ok(post.enrich(Utc::now()))
  }

  pub fn create_post(&self, draft: PostDraft) -> Settled<Post> {
    let transport = Arc::clone(&self.transport);
    let now = Utc::now();
    let placeholder = |id| Post::placeholder(id, &draft, now);
    let remote_draft = draft.clone();
    self.posts.create(placeholder, async move {
      let created = transport.create_post(&remote_draft).await?;
      Ok(created.enrich(Utc::now()))
    })
  }

  pub fn update_post(&self, id: EntityId, changes: PostChanges) -> Settled<Post> {
    let transport = Arc::clone(&self.transport);
    let remote_changes = changes.clone();
    self.posts.update(
      id,
      move |post| changes.apply(post),
      move |server_id| async move { transport.update_post(server_id, &remote_changes).await },
    )
  }

  pub fn delete_post(&self, id: EntityId) -> Settled<()> {
    let transport = Arc::clone(&self.transport);
    self.posts.delete(id, move |server_id| async move {
      transport.delete_post(server_id).await
    })
  }

  // ==========================================================================
  // Comments (scoped per post)
  // ==========================================================================

  fn comment_collection(&self, post_id: u64) -> Collection<Comment> {
    let mut comments = cache::lock(&self.comments, "comments", "comment_collection");
    comments
      .entry(post_id)
      .or_insert_with(|| Collection::new(format!("comments:{}", post_id), Arc::clone(&self.ids)))
      .clone()
  }

  /// Last known comments of a post. Empty until loaded.
  pub fn comments(&self, post_id: u64) -> Snapshot<Comment> {
    self.comment_collection(post_id).read()
  }

  pub fn subscribe_comments(&self, post_id: u64) -> watch::Receiver<Snapshot<Comment>> {
    self.comment_collection(post_id).subscribe()
  }

  pub fn comments_state(&self, post_id: u64) -> LoadState {
    self.comment_collection(post_id).load_state()
  }

  pub fn ensure_comments_loaded(&self, post_id: u64) -> Settled<()> {
    let transport = Arc::clone(&self.transport);
    self
      .comment_collection(post_id)
      .ensure_loaded(move || async move { transport.fetch_comments(post_id).await })
  }

  pub fn create_comment(&self, post_id: u64, draft: CommentDraft) -> Settled<Comment> {
    let transport = Arc::clone(&self.transport);
    let placeholder = |id| Comment::placeholder(id, post_id, &draft);
    let remote_draft = draft.clone();
    self.comment_collection(post_id).create(placeholder, async move {
      transport.create_comment(post_id, &remote_draft).await
    })
  }

  pub fn update_comment(
    &self,
    post_id: u64,
    id: EntityId,
    changes: CommentChanges,
  ) -> Settled<Comment> {
    let transport = Arc::clone(&self.transport);
    let remote_changes = changes.clone();
    self.comment_collection(post_id).update(
      id,
      move |comment| changes.apply(comment),
      move |server_id| async move {
        transport
          .update_comment(post_id, server_id, &remote_changes)
          .await
      },
    )
  }

  pub fn delete_comment(&self, post_id: u64, id: EntityId) -> Settled<()> {
    let transport = Arc::clone(&self.transport);
    self
      .comment_collection(post_id)
      .delete(id, move |server_id| async move {
        transport.delete_comment(post_id, server_id).await
      })
  }
}
