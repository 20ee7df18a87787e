//! Posts and comments as the API sends them, plus the payloads we send back.

use serde::{Deserialize, Serialize};

use crate::cache::EntityId;

/// A post, with presentation fields filled in on read when the API omits them
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  pub id: EntityId,
  pub user_id: u64,
  pub title: String,
  pub body: String,

  // Client-only enrichment
  #[serde(default)]
  pub date: Option<String>,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub company: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
}

/// A comment under a post
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  pub id: EntityId,
  #[serde(default)]
  pub post_id: u64,
  #[serde(default)]
  pub user_id: u64,
  pub name: String,
  pub email: String,
  pub body: String,
}

/// Fields for a new post
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
  pub user_id: u64,
  pub title: String,
  pub body: String,
}

/// Partial update of a post; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostChanges {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}

impl PostChanges {
  pub fn is_empty(&self) -> bool {
    self.title.is_none() && self.body.is_none()
  }

  pub fn apply(&self, post: &mut Post) {
    if let Some(title) = &self.title {
      post.title = title.clone();
    }
    if let Some(body) = &self.body {
      post.body = body.clone();
    }
  }
}

/// Fields for a new comment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentDraft {
  pub name: String,
  pub email: String,
  pub body: String,
}

/// Partial update of a comment; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommentChanges {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}

impl CommentChanges {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.email.is_none() && self.body.is_none()
  }

  pub fn apply(&self, comment: &mut Comment) {
    if let Some(name) = &self.name {
      comment.name = name.clone();
    }
    if let Some(email) = &self.email {
      comment.email = email.clone();
    }
    if let Some(body) = &self.body {
      comment.body = body.clone();
    }
  }
}
