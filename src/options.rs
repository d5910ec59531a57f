//! Connection options.

use std::time::Duration;

use crate::protocol::{Encoding, MAX_MESSAGE_SIZE};

/// Options for connecting to a lodestone server.
///
/// ```
/// use std::time::Duration;
/// use lodestone::{ConnectOptions, Encoding};
///
/// let opts = ConnectOptions::new("db.example.com", 7017)
///   .with_request_timeout(Duration::from_secs(5))
///   .with_encoding(Encoding::Json);
/// assert_eq!(opts.address(), "db.example.com:7017");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
  pub host: String,
  pub port: u16,
  /// Bound on TCP connect plus handshake.
  pub connect_timeout: Duration,
  /// Default bound on waiting for a reply to one request.
  pub request_timeout: Duration,
  /// Preferred payload encoding offered in the handshake.
  pub encoding: Encoding,
  /// Largest frame accepted in either direction.
  pub max_message_size: u32,
}

impl ConnectOptions {
  pub fn new(host: impl Into<String>, port: u16) -> Self {
    Self {
      host: host.into(),
      port,
      ..Self::default()
    }
  }

  pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
    self.connect_timeout = timeout;
    self
  }

  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  pub fn with_encoding(mut self, encoding: Encoding) -> Self {
    self.encoding = encoding;
    self
  }

  pub fn with_max_message_size(mut self, size: u32) -> Self {
    self.max_message_size = size;
    self
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self {
      host: "localhost".to_string(),
      port: 7017,
      connect_timeout: Duration::from_secs(10),
      request_timeout: Duration::from_secs(30),
      encoding: Encoding::MessagePack,
      max_message_size: MAX_MESSAGE_SIZE,
    }
  }
}

/// Parse `host:port`, falling back to the default port when none is given.
pub(crate) fn parse_address(addr: &str) -> ConnectOptions {
  match addr.rsplit_once(':') {
    Some((host, port)) => match port.parse::<u16>() {
      Ok(port) => ConnectOptions::new(host, port),
      Err(_) => ConnectOptions::new(addr, ConnectOptions::default().port),
    },
    None => ConnectOptions::new(addr, ConnectOptions::default().port),
  }
}
