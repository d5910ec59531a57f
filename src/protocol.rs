//! Wire protocol types for lodestone.

use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Handshake magic bytes
pub const MAGIC: &[u8; 4] = b"LODE";

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Maximum frame size including header (16MB)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Frame header: 4-byte length + 4-byte correlation id
pub const FRAME_HEADER_SIZE: usize = 8;

/// Deepest document nesting the encoder accepts
pub const MAX_NESTING_DEPTH: usize = 48;

/// Handshake status codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandshakeStatus {
  Success = 0x00,
  VersionMismatch = 0x01,
  UnsupportedEncoding = 0x02,
}

impl TryFrom<u8> for HandshakeStatus {
  type Error = ();
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x00 => Ok(Self::Success),
      0x01 => Ok(Self::VersionMismatch),
      0x02 => Ok(Self::UnsupportedEncoding),
      _ => Err(()),
    }
  }
}

/// Payload encodings
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
  #[default]
  MessagePack = 0x01,
  Json = 0x02,
}

impl TryFrom<u8> for Encoding {
  type Error = ();
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x01 => Ok(Self::MessagePack),
      0x02 => Ok(Self::Json),
      _ => Err(()),
    }
  }
}

/// Encodings the client offers in the handshake
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProtocolFlags {
  pub messagepack: bool,
  pub json_fallback: bool,
}

impl ProtocolFlags {
  /// Flags offering `preferred`, with JSON always available as fallback.
  pub fn offering(preferred: Encoding) -> Self {
    Self {
      messagepack: preferred == Encoding::MessagePack,
      json_fallback: true,
    }
  }

  pub fn supports(&self, encoding: Encoding) -> bool {
    match encoding {
      Encoding::MessagePack => self.messagepack,
      Encoding::Json => self.json_fallback,
    }
  }
}

impl From<u8> for ProtocolFlags {
  fn from(byte: u8) -> Self {
    Self {
      messagepack: byte & 0x01 != 0,
      json_fallback: byte & 0x02 != 0,
    }
  }
}

impl From<ProtocolFlags> for u8 {
  fn from(flags: ProtocolFlags) -> u8 {
    let mut byte = 0u8;
    if flags.messagepack {
      byte |= 0x01;
    }
    if flags.json_fallback {
      byte |= 0x02;
    }
    byte
  }
}

/// A single-collection find. `limit` is always 1 for find-one calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
  pub database: String,
  pub collection: String,
  pub filter: Document,
  pub limit: u32,
}

impl FindRequest {
  pub fn find_one(database: impl Into<String>, collection: impl Into<String>, filter: Document) -> Self {
    Self {
      database: database.into(),
      collection: collection.into(),
      filter,
      limit: 1,
    }
  }
}

/// Client-to-server message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
  Find(FindRequest),
  Ping,
}

/// Server-to-client message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outcome {
  /// The query matched; carries the first matching document.
  Document { document: Document },
  /// The query matched nothing.
  Empty,
  /// The server rejected or failed the query.
  Error { code: i32, message: String },
  Pong,
}

impl Outcome {
  pub fn kind(&self) -> &'static str {
    match self {
      Outcome::Document { .. } => "document",
      Outcome::Empty => "empty",
      Outcome::Error { .. } => "error",
      Outcome::Pong => "pong",
    }
  }
}

/// A decoded reply, paired with the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub correlation_id: u32,
  pub outcome: Outcome,
}
