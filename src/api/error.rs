//! Transport-level failures and their classification.

use std::fmt;

/// Broad classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// The server could not be reached (DNS, connect, timeout, offline)
  Network,
  /// The server answered with a 4xx status
  ClientError(u16),
  /// The server answered with a 5xx status
  ServerError(u16),
  /// Anything else, including undecodable response bodies
  Unknown,
}

impl ErrorKind {
  /// Classify an HTTP status code that was not a success.
  pub fn from_status(status: u16) -> Self {
    match status {
      400..=499 => ErrorKind::ClientError(status),
      500..=599 => ErrorKind::ServerError(status),
      _ => ErrorKind::Unknown,
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      ErrorKind::ClientError(s) | ErrorKind::ServerError(s) => Some(*s),
      _ => None,
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorKind::Network => write!(f, "network unreachable"),
      ErrorKind::ClientError(s) => write!(f, "client error {}", s),
      ErrorKind::ServerError(s) => write!(f, "server error {}", s),
      ErrorKind::Unknown => write!(f, "unknown error"),
    }
  }
}

/// A failed call to the remote API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
  pub kind: ErrorKind,
  pub message: String,
}

impl TransportError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Network, message)
  }

  pub fn status(status: u16, message: impl Into<String>) -> Self {
    Self::new(ErrorKind::from_status(status), message)
  }

  /// Short message suitable for showing to the person at the terminal.
  pub fn user_message(&self) -> &'static str {
    match self.kind {
      ErrorKind::Network => "Could not connect to the server. Check your network.",
      ErrorKind::ClientError(400) => "Invalid request (400).",
      ErrorKind::ClientError(401) => "Not authorized. Please sign in again.",
      ErrorKind::ClientError(403) => "Access denied.",
      ErrorKind::ClientError(404) => "Resource not found (404).",
      ErrorKind::ServerError(500) => "Internal server error (500).",
      _ => "An unexpected error occurred.",
    }
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    let kind = if let Some(status) = err.status() {
      ErrorKind::from_status(status.as_u16())
    } else if err.is_connect() || err.is_timeout() || err.is_request() {
      ErrorKind::Network
    } else {
      ErrorKind::Unknown
    };
    Self::new(kind, err.to_string())
  }
}
