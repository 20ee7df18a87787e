//! Command execution against a post store, one-shot or as an interactive shell.

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Report, Result};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{CommentChanges, CommentDraft, Post, PostChanges, PostDraft};
use crate::cache::{EntityId, LoadState, Snapshot, StoreError};
use crate::commands::{self, COMMANDS};
use crate::config::Config;
use crate::listing::{self, ListQuery, SortKey};
use crate::render;
use crate::store::PostStore;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Browse, search and edit posts
  #[command(subcommand, visible_aliases = ["p", "post"])]
  Posts(PostsCommand),
  /// Read and write comments on a post
  #[command(subcommand, visible_aliases = ["c", "comment"])]
  Comments(CommentsCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum PostsCommand {
  /// List posts, optionally searched and sorted
  List {
    /// Only posts whose title or body contains this (case-insensitive)
    #[arg(short, long)]
    search: Option<String>,
    /// date, title or status
    #[arg(long)]
    sort: Option<SortKey>,
    #[arg(short, long)]
    page: Option<usize>,
  },
  /// Next page of the current listing
  Next,
  /// Previous page of the current listing
  Prev,
  /// Show a post and its comments
  Show { id: u64 },
  Create {
    #[arg(short, long)]
    title: String,
    #[arg(short, long)]
    body: String,
  },
  Edit {
    id: u64,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    body: Option<String>,
  },
  Delete { id: u64 },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CommentsCommand {
  /// List the comments of a post
  List { post: u64 },
  Add {
    post: u64,
    #[arg(short, long)]
    body: String,
    /// Defaults to the configured identity
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
  },
  Edit {
    post: u64,
    id: u64,
    #[arg(short, long)]
    body: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
  },
  Delete { post: u64, id: u64 },
}

/// Grammar for one line typed at the prompt
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ShellLine {
  #[command(subcommand)]
  command: Command,
}

/// A store plus the listing state of one user session
pub struct Session {
  store: PostStore,
  config: Config,
  query: ListQuery,
}

impl Session {
  pub fn new(store: PostStore, config: Config) -> Self {
    Self {
      store,
      config,
      query: ListQuery::default(),
    }
  }

  pub async fn execute(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Posts(cmd) => self.posts(cmd).await,
      Command::Comments(cmd) => self.comments(cmd).await,
    }
  }

  async fn load_posts(&self) -> Result<(), StoreError> {
    if self.store.posts_state() != LoadState::Loaded {
      println!("Loading posts...");
    }
    self.store.ensure_posts_loaded().await
  }

  async fn posts(&mut self, cmd: PostsCommand) -> Result<()> {
    match cmd {
      PostsCommand::List { search, sort, page } => {
        // A new search or sort starts over at the first page
        if let Some(search) = search {
          self.query.search = search;
          self.query.page = 1;
        }
        if let Some(sort) = sort {
          self.query.sort = sort;
          self.query.page = 1;
        }
        if let Some(page) = page {
          self.query.page = page.max(1);
        }
        self.load_posts().await?;
        self.print_listing();
      }
      PostsCommand::Next => self.turn_page(true).await?,
      PostsCommand::Prev => self.turn_page(false).await?,
      PostsCommand::Show { id } => {
        let post = self.store.post(id).await?;
        self.print_post(&post).await;
      }
      PostsCommand::Create { title, body } => {
        let draft = PostDraft {
          user_id: self.config.identity.user_id,
          title,
          body,
        };
        let post = self.store.create_post(draft).await?;
        println!("Created post {}: {}", post.id, post.title);
      }
      PostsCommand::Edit { id, title, body } => {
        let changes = PostChanges { title, body };
        if changes.is_empty() {
          return Err(eyre!("Nothing to change: pass --title and/or --body"));
        }
        self.load_posts().await?;
        let post = self.store.update_post(EntityId::Confirmed(id), changes).await?;
        println!("Updated post {}: {}", post.id, post.title);
      }
      PostsCommand::Delete { id } => {
        self.load_posts().await?;
        self.store.delete_post(EntityId::Confirmed(id)).await?;
        println!("Deleted post {}", id);
      }
    }
    Ok(())
  }

  async fn comments(&mut self, cmd: CommentsCommand) -> Result<()> {
    match cmd {
      CommentsCommand::List { post } => {
        self.store.ensure_comments_loaded(post).await?;
        print!("{}", render::comment_list(&self.store.comments(post)));
      }
      CommentsCommand::Add {
        post,
        body,
        name,
        email,
      } => {
        let draft = CommentDraft {
          name: name.unwrap_or_else(|| self.config.identity.name.clone()),
          email: email.unwrap_or_else(|| self.config.identity.email.clone()),
          body,
        };
        let comment = self.store.create_comment(post, draft).await?;
        println!("Added comment {} to post {}", comment.id, post);
      }
      CommentsCommand::Edit {
        post,
        id,
        body,
        name,
        email,
      } => {
        let changes = CommentChanges { name, email, body };
        if changes.is_empty() {
          return Err(eyre!("Nothing to change: pass --body, --name or --email"));
        }
        self.store.ensure_comments_loaded(post).await?;
        let comment = self
          .store
          .update_comment(post, EntityId::Confirmed(id), changes)
          .await?;
        println!("Updated comment {} on post {}", comment.id, post);
      }
      CommentsCommand::Delete { post, id } => {
        self.store.ensure_comments_loaded(post).await?;
        self
          .store
          .delete_comment(post, EntityId::Confirmed(id))
          .await?;
        println!("Deleted comment {} from post {}", id, post);
      }
    }
    Ok(())
  }

  async fn turn_page(&mut self, forward: bool) -> Result<(), StoreError> {
    self.load_posts().await?;
    let page = listing::paginate(&self.store.posts(), &self.query, self.page_size());
    self.query.page = if forward {
      page.next_page()
    } else {
      page.prev_page()
    };
    self.print_listing();
    Ok(())
  }

  fn page_size(&self) -> usize {
    self.config.list.page_size
  }

  fn print_listing(&self) {
    let page = listing::paginate(&self.store.posts(), &self.query, self.page_size());
    print!(
      "{}",
      render::post_page(&page, self.query.sort, &self.query.search)
    );
  }

  async fn print_post(&self, post: &Post) {
    // The post itself is already known; comments are best effort
    let post_id = post.id.confirmed();
    let comments = match post_id {
      Some(post_id) => {
        if self.store.comments_state(post_id) != LoadState::Loaded {
          println!("Loading comments...");
        }
        match self.store.ensure_comments_loaded(post_id).await {
          Ok(()) => self.store.comments(post_id),
          Err(err) => {
            warn!(post_id, error = %err, "Could not load comments");
            println!("Comments unavailable: {}", describe(&err));
            Snapshot::default()
          }
        }
      }
      None => Snapshot::default(),
    };
    print!("{}", render::post_detail(post, &comments));
  }
}

/// Human-readable explanation of a store failure.
fn describe(err: &StoreError) -> String {
  match err.transport() {
    Some(transport) => format!("{} ({})", transport.user_message(), transport),
    None => err.to_string(),
  }
}

/// The short user-facing message for a failed command, if it came from the API.
pub fn user_message(err: &Report) -> Option<&'static str> {
  err
    .downcast_ref::<StoreError>()
    .and_then(StoreError::transport)
    .map(|t| t.user_message())
}

/// Parse one line typed at the prompt.
fn parse_line(tokens: &[String]) -> Result<Command, clap::Error> {
  ShellLine::try_parse_from(tokens).map(|line| line.command)
}

enum LoopAction {
  Continue,
  Exit,
}

/// Run the interactive shell until the user quits or stdin closes.
pub async fn run_shell(mut session: Session) -> Result<()> {
  tokio::spawn(log_post_snapshots(session.store.subscribe_posts()));

  println!("postboard ready. Type 'help' for a list of commands.");

  let stdin = tokio::io::stdin();
  let mut reader = BufReader::new(stdin);

  loop {
    print!("postboard> ");
    io::stdout().flush()?;

    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
      println!();
      break;
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let tokens = match shell_words::split(trimmed) {
      Ok(tokens) if !tokens.is_empty() => tokens,
      Ok(_) => continue,
      Err(err) => {
        println!("Unable to parse command: {}", err);
        continue;
      }
    };

    match handle_line(&mut session, &tokens).await {
      LoopAction::Continue => {}
      LoopAction::Exit => break,
    }
  }

  Ok(())
}

async fn handle_line(session: &mut Session, tokens: &[String]) -> LoopAction {
  let word = tokens[0].as_str();
  match commands::resolve(word).map(|c| c.name) {
    Some("help") => print_help(),
    Some("quit") => return LoopAction::Exit,
    Some(_) => match parse_line(tokens) {
      Ok(command) => {
        if let Err(err) = session.execute(command).await {
          if let Some(message) = user_message(&err) {
            println!("{}", message);
          }
          println!("Error: {:#}", err);
        }
      }
      // Usage errors and --help output both come through here
      Err(err) => println!("{}", err),
    },
    None => {
      println!("Unknown command '{}'.", word);
      let suggestions = commands::get_suggestions(word);
      if !suggestions.is_empty() {
        let names: Vec<&str> = suggestions.iter().map(|c| c.name).collect();
        println!("Did you mean: {}?", names.join(", "));
      }
    }
  }
  LoopAction::Continue
}

fn print_help() {
  println!("Commands:");
  for cmd in COMMANDS {
    println!("  {:<50} {}", cmd.usage, cmd.description);
  }
  println!("Append --help to a command for its options.");
}

async fn log_post_snapshots(mut rx: watch::Receiver<Snapshot<Post>>) {
  while rx.changed().await.is_ok() {
    let posts = rx.borrow_and_update().clone();
    let pending = posts.iter().filter(|p| p.id.is_pending()).count();
    debug!(count = posts.len(), pending, "Posts snapshot changed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tokens(line: &str) -> Vec<String> {
    shell_words::split(line).unwrap()
  }

  #[test]
  fn test_parse_list_with_options() {
    let command = parse_line(&tokens("posts list --search 'rust tips' --sort title -p 2")).unwrap();
    assert_eq!(
      command,
      Command::Posts(PostsCommand::List {
        search: Some("rust tips".into()),
        sort: Some(SortKey::Title),
        page: Some(2),
      })
    );
  }

  #[test]
  fn test_parse_alias() {
    let command = parse_line(&tokens("c delete 3 12")).unwrap();
    assert_eq!(
      command,
      Command::Comments(CommentsCommand::Delete { post: 3, id: 12 })
    );
  }

  #[test]
  fn test_parse_comment_edit_with_some_fields() {
    let command = parse_line(&tokens("comments edit 1 5 --name Ann")).unwrap();
    assert_eq!(
      command,
      Command::Comments(CommentsCommand::Edit {
        post: 1,
        id: 5,
        body: None,
        name: Some("Ann".into()),
        email: None,
      })
    );
  }

  #[test]
  fn test_parse_create_requires_title() {
    assert!(parse_line(&tokens("posts create --body text")).is_err());
  }

  #[test]
  fn test_parse_bad_sort_key() {
    assert!(parse_line(&tokens("posts list --sort size")).is_err());
  }
}
