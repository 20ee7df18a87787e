use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;

use super::error::{ErrorKind, TransportError};
use super::types::{Comment, CommentChanges, CommentDraft, Post, PostChanges, PostDraft};

/// Remote data source for posts and comments.
///
/// Every call either returns the server's view of the entity or a
/// classified [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch_posts(&self) -> Result<Vec<Post>, TransportError>;

  async fn fetch_post(&self, id: u64) -> Result<Post, TransportError>;

  async fn create_post(&self, draft: &PostDraft) -> Result<Post, TransportError>;

  async fn update_post(&self, id: u64, changes: &PostChanges) -> Result<Post, TransportError>;

  async fn delete_post(&self, id: u64) -> Result<(), TransportError>;

  async fn fetch_comments(&self, post_id: u64) -> Result<Vec<Comment>, TransportError>;

  async fn create_comment(
    &self,
    post_id: u64,
    draft: &CommentDraft,
  ) -> Result<Comment, TransportError>;

  async fn update_comment(
    &self,
    post_id: u64,
    id: u64,
    changes: &CommentChanges,
  ) -> Result<Comment, TransportError>;

  async fn delete_comment(&self, post_id: u64, id: u64) -> Result<(), TransportError>;
}

/// REST API client over HTTP
#[derive(Clone)]
pub struct HttpTransport {
  base_url: Url,
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url = sanitize_base_url(&config.base_url)?;
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { base_url, client })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, TransportError> {
    let url = self.base_url.join(path).map_err(|e| {
      TransportError::new(ErrorKind::Unknown, format!("Invalid URL for {}: {}", path, e))
    })?;
    debug!(%method, %url, "API request");
    Ok(self.client.request(method, url))
  }

  /// Send a request and decode the JSON body.
  async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
    let response = request.send().await?.error_for_status()?;
    response.json::<T>().await.map_err(|e| {
      TransportError::new(ErrorKind::Unknown, format!("Failed to decode response: {}", e))
    })
  }

  /// Send a request whose body we don't care about.
  async fn execute(&self, request: RequestBuilder) -> Result<(), TransportError> {
    request.send().await?.error_for_status()?;
    Ok(())
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch_posts(&self) -> Result<Vec<Post>, TransportError> {
    self.fetch(self.request(Method::GET, "posts")?).await
  }

  async fn fetch_post(&self, id: u64) -> Result<Post, TransportError> {
    self
      .fetch(self.request(Method::GET, &format!("posts/{}", id))?)
      .await
  }

  async fn create_post(&self, draft: &PostDraft) -> Result<Post, TransportError> {
    self
      .fetch(self.request(Method::POST, "posts")?.json(draft))
      .await
  }

  async fn update_post(&self, id: u64, changes: &PostChanges) -> Result<Post, TransportError> {
    self
      .fetch(
        self
          .request(Method::PATCH, &format!("posts/{}", id))?
          .json(changes),
      )
      .await
  }

  async fn delete_post(&self, id: u64) -> Result<(), TransportError> {
    self
      .execute(self.request(Method::DELETE, &format!("posts/{}", id))?)
      .await
  }

  async fn fetch_comments(&self, post_id: u64) -> Result<Vec<Comment>, TransportError> {
    self
      .fetch(self.request(Method::GET, &format!("posts/{}/comments", post_id))?)
      .await
  }

  async fn create_comment(
    &self,
    post_id: u64,
    draft: &CommentDraft,
  ) -> Result<Comment, TransportError> {
    let mut comment: Comment = self
      .fetch(
        self
          .request(Method::POST, &format!("posts/{}/comments", post_id))?
          .json(draft),
      )
      .await?;
    // The nested route does not always echo the parent back
    comment.post_id = post_id;
    Ok(comment)
  }

  async fn update_comment(
    &self,
    post_id: u64,
    id: u64,
    changes: &CommentChanges,
  ) -> Result<Comment, TransportError> {
    let mut comment: Comment = self
      .fetch(
        self
          .request(Method::PATCH, &format!("posts/{}/comments/{}", post_id, id))?
          .json(changes),
      )
      .await?;
    comment.post_id = post_id;
    Ok(comment)
  }

  async fn delete_comment(&self, post_id: u64, id: u64) -> Result<(), TransportError> {
    self
      .execute(self.request(Method::DELETE, &format!("posts/{}/comments/{}", post_id, id))?)
      .await
  }
}

/// Normalize a configured base URL: add a scheme if missing and make sure
/// the path ends in `/` so relative joins keep any path prefix.
fn sanitize_base_url(base: &str) -> Result<Url> {
  let base = base.trim();
  let with_scheme = if base.starts_with("http://") || base.starts_with("https://") {
    base.to_string()
  } else {
    format!("http://{}", base)
  };

  let mut url = Url::parse(&with_scheme).map_err(|e| eyre!("Invalid base URL {}: {}", base, e))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}
