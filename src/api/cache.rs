//! Caching implementations for posts and comments.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::cache::{Entity, EntityId};

use super::types::{Comment, CommentDraft, Post, PostDraft};

/// Status shown for posts the API does not give one.
pub const DEFAULT_STATUS: &str = "In progress";

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Post {
  fn id(&self) -> EntityId {
    self.id
  }

  fn merge(&mut self, confirmed: Self) {
    self.user_id = confirmed.user_id;
    self.title = confirmed.title;
    self.body = confirmed.body;
    // The server does not know about these; only take them if it sent them
    if confirmed.date.is_some() {
      self.date = confirmed.date;
    }
    if confirmed.author.is_some() {
      self.author = confirmed.author;
    }
    if confirmed.company.is_some() {
      self.company = confirmed.company;
    }
    if confirmed.status.is_some() {
      self.status = confirmed.status;
    }
  }

  fn entity_type() -> &'static str {
    "post"
  }
}

impl Entity for Comment {
  fn id(&self) -> EntityId {
    self.id
  }

  fn merge(&mut self, confirmed: Self) {
    self.user_id = confirmed.user_id;
    self.name = confirmed.name;
    self.email = confirmed.email;
    self.body = confirmed.body;
  }

  fn entity_type() -> &'static str {
    "comment"
  }
}

// ============================================================================
// Enrichment and placeholders
// ============================================================================

impl Post {
  /// Fill presentation fields the API left out.
  pub fn enrich(mut self, now: DateTime<Utc>) -> Self {
    if self.date.is_none() {
      self.date = Some(now.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if self.author.is_none() {
      self.author = Some(format!("User {}", self.user_id));
    }
    if self.company.is_none() {
      self.company = Some(format!("Company {}", self.user_id));
    }
    if self.status.is_none() {
      self.status = Some(DEFAULT_STATUS.to_string());
    }
    self
  }

  /// Optimistic stand-in for a post the server has not confirmed yet.
  pub fn placeholder(id: EntityId, draft: &PostDraft, now: DateTime<Utc>) -> Self {
    Post {
      id,
      user_id: draft.user_id,
      title: draft.title.clone(),
      body: draft.body.clone(),
      date: None,
      author: None,
      company: None,
      status: None,
    }
    .enrich(now)
  }
}

impl Comment {
  /// Optimistic stand-in for a comment the server has not confirmed yet.
  pub fn placeholder(id: EntityId, post_id: u64, draft: &CommentDraft) -> Self {
    Comment {
      id,
      post_id,
      user_id: 0,
      name: draft.name.clone(),
      email: draft.email.clone(),
      body: draft.body.clone(),
    }
  }
}
