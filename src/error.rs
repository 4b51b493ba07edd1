//! Typed errors for the data-access layer.
//!
//! Queries and mutations surface these to callers. The enum is `Clone` so a
//! single coalesced fetch can hand the same failure to every waiter.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  /// A persistence-required operation was invoked on a transient entity,
  /// or an input was rejected before reaching the network.
  #[error("{0}")]
  Validation(String),

  /// The remote side has no record with this identifier.
  #[error("{entity} {id} was not found")]
  NotFound { entity: String, id: String },

  /// The remote side answered with a non-success status.
  #[error("request failed with status {status}: {message}")]
  Remote {
    status: u16,
    code: Option<String>,
    message: String,
  },

  /// Connection, DNS, TLS or timeout failures.
  #[error("transport error: {0}")]
  Transport(String),

  /// A response (or cached value) did not have the expected shape.
  #[error("failed to decode data: {0}")]
  Decode(String),

  /// The cache backend failed.
  #[error("cache storage error: {0}")]
  Storage(String),
}

impl Error {
  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
    Self::NotFound {
      entity: entity.into(),
      id: id.to_string(),
    }
  }

  /// Stable machine-readable code, used by presentation layers to pick a view.
  pub fn code(&self) -> &str {
    match self {
      Self::Validation(_) => "validation",
      Self::NotFound { .. } => "not_found",
      Self::Remote { code: Some(code), .. } => code,
      Self::Remote { .. } => "remote",
      Self::Transport(_) => "transport",
      Self::Decode(_) => "decode",
      Self::Storage(_) => "storage",
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }

  /// Whether a query fetch may be attempted again after this failure.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Validation(_) | Self::NotFound { .. } | Self::Decode(_) => false,
      Self::Remote { status, .. } => *status >= 500 || *status == 429,
      Self::Transport(_) | Self::Storage(_) => true,
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Error::Decode(err.to_string())
    } else {
      Error::Transport(err.to_string())
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Error::Decode(err.to_string())
  }
}

impl From<rusqlite::Error> for Error {
  fn from(err: rusqlite::Error) -> Self {
    Error::Storage(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_codes() {
    assert_eq!(Error::not_found("bus", 4).code(), "not_found");
    assert_eq!(Error::validation("nope").code(), "validation");
    let remote = Error::Remote {
      status: 409,
      code: Some("conflict".to_string()),
      message: "plate already registered".to_string(),
    };
    assert_eq!(remote.code(), "conflict");
  }

  #[test]
  fn test_not_found_message() {
    let err = Error::not_found("bus model", 12);
    assert_eq!(err.to_string(), "bus model 12 was not found");
    assert!(err.is_not_found());
  }

  #[test]
  fn test_retryable() {
    assert!(!Error::not_found("bus", 1).is_retryable());
    assert!(!Error::validation("x").is_retryable());
    assert!(Error::Transport("reset".into()).is_retryable());
    let server = Error::Remote {
      status: 503,
      code: None,
      message: "unavailable".into(),
    };
    assert!(server.is_retryable());
    let client = Error::Remote {
      status: 422,
      code: None,
      message: "bad payload".into(),
    };
    assert!(!client.is_retryable());
  }
}
