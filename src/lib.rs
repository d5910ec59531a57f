//! lodestone Rust client
//!
//! An async client for single-document queries against a remote document database.
//! One TCP connection is shared by every query; replies are matched to requests by
//! correlation id.
//!
//! # Example
//!
//! ```no_run
//! use lodestone::{Client, Document};
//!
//! #[tokio::main]
//! async fn main() -> lodestone::Result<()> {
//!   let client = Client::connect("localhost:7017").await?;
//!   let menu = client.database("cafe").collection("menu");
//!
//!   let query_filter = Document::new().with("name", "Maple Latte");
//!
//!   // Callback style
//!   menu.find_one_document(query_filter.clone(), |result| match result {
//!     Err(e) => println!("Did not find matching documents: {e}"),
//!     Ok(document) => println!("Found a matching document: {:?}", document),
//!   });
//!
//!   // Async style
//!   if let Some(doc) = menu.find_one(query_filter).await? {
//!     println!("Found: {doc}");
//!   }
//!
//!   Ok(())
//! }
//! ```

mod client;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod document;
mod error;
pub mod executor;
pub mod frame;
mod options;
pub mod protocol;
pub mod query;

pub use client::{Client, Collection, Database};
pub use connection::{Connection, PendingResponse};
pub use dispatch::{CallHandle, Dispatcher};
pub use document::{Document, ObjectId, Value};
pub use error::{ConnectionError, DecodingError, EncodingError, QueryError, Result};
pub use frame::Frame;
pub use options::ConnectOptions;
pub use protocol::{
  ClientMessage, Encoding, FindRequest, HandshakeStatus, Outcome, ProtocolFlags, Response,
  FRAME_HEADER_SIZE, MAGIC, MAX_MESSAGE_SIZE, MAX_NESTING_DEPTH, PROTOCOL_VERSION,
};
pub use query::{and, field, not, or, Field, Filter};
