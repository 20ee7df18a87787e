//! Search, sort and pagination over a snapshot of posts.

use std::fmt;
use std::str::FromStr;

use crate::api::Post;

/// Sort order for the post list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
  /// Keep the order posts are cached in (newest creations first)
  #[default]
  Date,
  Title,
  Status,
}

impl FromStr for SortKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "date" => Ok(SortKey::Date),
      "title" => Ok(SortKey::Title),
      "status" => Ok(SortKey::Status),
      other => Err(format!(
        "unknown sort key '{}' (expected date, title or status)",
        other
      )),
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SortKey::Date => "date",
      SortKey::Title => "title",
      SortKey::Status => "status",
    };
    f.write_str(name)
  }
}

/// What to show from the post list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  pub search: String,
  pub sort: SortKey,
  /// 1-based
  pub page: usize,
}

impl Default for ListQuery {
  fn default() -> Self {
    Self {
      search: String::new(),
      sort: SortKey::Date,
      page: 1,
    }
  }
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: usize,
  pub total_pages: usize,
  /// Number of matches across all pages
  pub total: usize,
}

impl<T> Page<T> {
  pub fn has_next(&self) -> bool {
    self.page < self.total_pages
  }

  pub fn has_prev(&self) -> bool {
    self.page > 1
  }

  pub fn next_page(&self) -> usize {
    if self.has_next() {
      self.page + 1
    } else {
      self.page
    }
  }

  pub fn prev_page(&self) -> usize {
    if self.has_prev() {
      self.page - 1
    } else {
      self.page
    }
  }
}

/// Case-insensitive match on title or body. A blank term matches everything.
pub fn matches(post: &Post, term: &str) -> bool {
  let term = term.trim().to_lowercase();
  if term.is_empty() {
    return true;
  }
  post.title.to_lowercase().contains(&term) || post.body.to_lowercase().contains(&term)
}

/// Filter and sort posts without paginating.
pub fn filter_sorted(posts: &[Post], search: &str, sort: SortKey) -> Vec<Post> {
  let mut result: Vec<Post> = posts.iter().filter(|p| matches(p, search)).cloned().collect();

  match sort {
    SortKey::Date => {}
    // Case-insensitive, like a locale compare
    SortKey::Title => result.sort_by_cached_key(|p| p.title.to_lowercase()),
    SortKey::Status => {
      result.sort_by_cached_key(|p| p.status.as_deref().unwrap_or("").to_lowercase())
    }
  }

  result
}

pub fn total_pages(len: usize, page_size: usize) -> usize {
  if page_size == 0 {
    return 0;
  }
  len.div_ceil(page_size)
}

/// Apply a query to a snapshot of posts.
///
/// Pages past the end come back empty rather than clamped.
pub fn paginate(posts: &[Post], query: &ListQuery, page_size: usize) -> Page<Post> {
  let filtered = filter_sorted(posts, &query.search, query.sort);
  let total = filtered.len();
  let page = query.page.max(1);
  let start = (page - 1).saturating_mul(page_size);

  let items = filtered.into_iter().skip(start).take(page_size).collect();

  Page {
    items,
    page,
    total_pages: total_pages(total, page_size),
    total,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EntityId;

  fn post(id: u64, title: &str, body: &str, status: Option<&str>) -> Post {
    Post {
      id: EntityId::Confirmed(id),
      user_id: 1,
      title: title.to_string(),
      body: body.to_string(),
      date: None,
      author: None,
      company: None,
      status: status.map(String::from),
    }
  }

  fn titles(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|p| p.title.as_str()).collect()
  }

  #[test]
  fn test_search_is_case_insensitive_on_title_and_body() {
    let posts = vec![
      post(1, "Rust tips", "", None),
      post(2, "Other", "about RUST", None),
      post(3, "Nothing", "here", None),
    ];
    let result = filter_sorted(&posts, "rust", SortKey::Date);
    assert_eq!(titles(&result), vec!["Rust tips", "Other"]);
  }

  #[test]
  fn test_blank_search_matches_all() {
    let posts = vec![post(1, "a", "", None), post(2, "b", "", None)];
    assert_eq!(filter_sorted(&posts, "   ", SortKey::Date).len(), 2);
  }

  #[test]
  fn test_sort_by_title_and_status() {
    let posts = vec![
      post(1, "b", "", Some("Open")),
      post(2, "a", "", None),
      post(3, "c", "", Some("Done")),
    ];
    assert_eq!(titles(&filter_sorted(&posts, "", SortKey::Title)), vec!["a", "b", "c"]);
    // Missing status sorts first
    assert_eq!(titles(&filter_sorted(&posts, "", SortKey::Status)), vec!["a", "c", "b"]);
    assert_eq!(titles(&filter_sorted(&posts, "", SortKey::Date)), vec!["b", "a", "c"]);
  }

  #[test]
  fn test_sort_ignores_case() {
    let posts = vec![
      post(1, "Zebra", "", Some("open")),
      post(2, "apple", "", Some("Done")),
      post(3, "Mango", "", Some("in progress")),
    ];
    assert_eq!(
      titles(&filter_sorted(&posts, "", SortKey::Title)),
      vec!["apple", "Mango", "Zebra"]
    );
    assert_eq!(
      titles(&filter_sorted(&posts, "", SortKey::Status)),
      vec!["apple", "Mango", "Zebra"]
    );
  }

  #[test]
  fn test_pagination() {
    let posts: Vec<Post> = (1..=13).map(|i| post(i, &format!("p{}", i), "", None)).collect();
    let query = ListQuery {
      page: 3,
      ..Default::default()
    };
    let page = paginate(&posts, &query, 6);
    assert_eq!(page.total, 13);
    assert_eq!(page.total_pages, 3);
    assert_eq!(titles(&page.items), vec!["p13"]);
    assert!(!page.has_next());
    assert_eq!(page.next_page(), 3);
    assert_eq!(page.prev_page(), 2);
  }

  #[test]
  fn test_page_past_end_is_empty() {
    let posts = vec![post(1, "a", "", None)];
    let query = ListQuery {
      page: 5,
      ..Default::default()
    };
    let page = paginate(&posts, &query, 6);
    assert!(page.items.is_empty());
    assert_eq!(page.total_pages, 1);
  }

  #[test]
  fn test_total_pages() {
    assert_eq!(total_pages(0, 6), 0);
    assert_eq!(total_pages(6, 6), 1);
    assert_eq!(total_pages(7, 6), 2);
  }

  #[test]
  fn test_parse_sort_key() {
    assert_eq!("Title".parse::<SortKey>(), Ok(SortKey::Title));
    assert!("size".parse::<SortKey>().is_err());
  }
}
