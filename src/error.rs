//! Error types for the lodestone client.

use std::time::Duration;

use thiserror::Error;

/// A filter or request could not be represented on the wire.
#[derive(Error, Debug)]
pub enum EncodingError {
  #[error("number {0} cannot be represented as int64 or double")]
  UnsupportedNumber(String),

  #[error("non-finite double at {path:?} cannot be encoded as JSON")]
  NonFiniteDouble { path: String },

  #[error("expected an object, got {0}")]
  NotADocument(&'static str),

  #[error("document nesting exceeds {max} levels")]
  TooDeep { max: usize },

  #[error("message too large: {size} bytes (max {max})")]
  TooLarge { size: usize, max: usize },

  #[error("serialization error: {0}")]
  Serialization(String),
}

impl From<rmp_serde::encode::Error> for EncodingError {
  fn from(e: rmp_serde::encode::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<serde_json::Error> for EncodingError {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

/// Bytes received from the peer do not form a valid message.
#[derive(Error, Debug)]
pub enum DecodingError {
  #[error("truncated frame: need {needed} bytes, have {available}")]
  Truncated { needed: usize, available: usize },

  #[error("bad length prefix: {0}")]
  BadLength(String),

  #[error("malformed payload: {0}")]
  Malformed(String),
}

impl From<rmp_serde::decode::Error> for DecodingError {
  fn from(e: rmp_serde::decode::Error) -> Self {
    Self::Malformed(e.to_string())
  }
}

impl From<serde_json::Error> for DecodingError {
  fn from(e: serde_json::Error) -> Self {
    Self::Malformed(e.to_string())
  }
}

/// The transport is broken or was never established.
#[derive(Error, Debug)]
pub enum ConnectionError {
  #[error("connection error: {0}")]
  Connect(String),

  #[error("handshake failed: {0}")]
  Handshake(String),

  #[error("protocol version mismatch: server={server}, client={client}")]
  VersionMismatch { server: u8, client: u8 },

  #[error("connection closed: {reason}")]
  Closed { reason: String },

  #[error("correlation id {0} is already in flight")]
  DuplicateCorrelationId(u32),

  #[error("frame of {size} bytes exceeds maximum {max}")]
  FrameTooLarge { size: usize, max: usize },

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl ConnectionError {
  pub(crate) fn closed(reason: impl Into<String>) -> Self {
    Self::Closed {
      reason: reason.into(),
    }
  }
}

/// Everything a single query call can fail with.
#[derive(Error, Debug)]
pub enum QueryError {
  #[error("encoding error: {0}")]
  Encoding(#[from] EncodingError),

  #[error("decoding error: {0}")]
  Decoding(#[from] DecodingError),

  #[error(transparent)]
  Connection(#[from] ConnectionError),

  #[error("timed out after {after:?}")]
  Timeout { after: Duration },

  #[error("server error ({code}): {message}")]
  Server { code: i32, message: String },

  #[error("unexpected response: expected {expected}, got {actual}")]
  UnexpectedResponse { expected: &'static str, actual: String },
}

impl QueryError {
  pub fn server(code: i32, message: impl Into<String>) -> Self {
    Self::Server {
      code,
      message: message.into(),
    }
  }

  /// Whether a caller may reasonably retry an idempotent read after this error.
  ///
  /// The client itself never retries.
  pub fn is_retryable(&self) -> bool {
    match self {
      QueryError::Connection(ConnectionError::FrameTooLarge { .. }) => false,
      QueryError::Connection(_) | QueryError::Timeout { .. } => true,
      _ => false,
    }
  }
}

pub type Result<T> = std::result::Result<T, QueryError>;
