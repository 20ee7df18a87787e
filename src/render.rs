//! Plain-text rendering of posts and comments for the terminal.

use std::fmt::Write;

use crate::api::{Comment, Post};
use crate::listing::{Page, SortKey};

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// One line per post, with a header describing the page
pub fn post_page(page: &Page<Post>, sort: SortKey, search: &str) -> String {
  let mut out = String::new();
  let filter = if search.trim().is_empty() {
    String::new()
  } else {
    format!(", search: \"{}\"", search.trim())
  };
  let _ = writeln!(
    out,
    "Posts (page {}/{}, {} total, sort: {}{})",
    page.page,
    page.total_pages.max(1),
    page.total,
    sort,
    filter
  );

  if page.items.is_empty() {
    out.push_str("  No posts found.\n");
    return out;
  }

  for post in &page.items {
    let _ = writeln!(
      out,
      "  [{}] {} | {} | {}",
      post.id,
      truncate(&post.title, 60),
      post.author.as_deref().unwrap_or("-"),
      post.status.as_deref().unwrap_or("-"),
    );
  }
  out
}

/// Full post with its comments
pub fn post_detail(post: &Post, comments: &[Comment]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "[{}] {}", post.id, post.title);
  let _ = writeln!(
    out,
    "{} ({}) | {} | {}",
    post.author.as_deref().unwrap_or("-"),
    post.company.as_deref().unwrap_or("-"),
    post.status.as_deref().unwrap_or("-"),
    post.date.as_deref().unwrap_or("-"),
  );
  let _ = writeln!(out);
  let _ = writeln!(out, "{}", post.body);
  let _ = writeln!(out);
  out.push_str(&comment_list(comments));
  out
}

pub fn comment_list(comments: &[Comment]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "Comments ({})", comments.len());
  for comment in comments {
    let _ = writeln!(
      out,
      "  [{}] {} <{}>: {}",
      comment.id,
      comment.name,
      comment.email,
      truncate(&comment.body.replace('\n', " "), 80)
    );
  }
  out
}
