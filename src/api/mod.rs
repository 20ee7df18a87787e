//! Remote data transport for the posts API.

mod cache;
mod client;
mod error;
pub mod types;

pub use cache::DEFAULT_STATUS;
pub use client::{HttpTransport, Transport};
pub use error::{ErrorKind, TransportError};
pub use types::{Comment, CommentChanges, CommentDraft, Post, PostChanges, PostDraft};
