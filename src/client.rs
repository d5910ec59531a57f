//! Caller-facing handles: client, database and collection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::connection::Connection;
use crate::dispatch::{CallHandle, Dispatcher};
use crate::document::Document;
use crate::error::{ConnectionError, QueryError, Result};
use crate::executor;
use crate::options::{parse_address, ConnectOptions};

/// A connected lodestone client.
///
/// Owns the shared [`Connection`]. Database and collection handles only hold a weak
/// reference to it, so dropping the client closes the connection once in-flight
/// calls finish.
pub struct Client {
  connection: Arc<Connection>,
  dispatcher: Dispatcher,
}

impl Client {
  /// Connect to `host:port` with default options.
  pub async fn connect(addr: &str) -> Result<Self> {
    Self::connect_with_options(parse_address(addr)).await
  }

  /// Connect with explicit options.
  pub async fn connect_with_options(options: ConnectOptions) -> Result<Self> {
    let connection = Connection::connect(&options).await?;
    Ok(Self::from_connection(connection))
  }

  /// Wrap an established connection. Continuations run on the current tokio runtime.
  pub fn from_connection(connection: Connection) -> Self {
    Self {
      connection: Arc::new(connection),
      dispatcher: Dispatcher::current(),
    }
  }

  /// Run continuations on a different runtime.
  pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
    self.dispatcher = dispatcher;
    self
  }

  pub fn connection(&self) -> &Arc<Connection> {
    &self.connection
  }

  pub fn database(&self, name: impl Into<String>) -> Database {
    Database {
      name: name.into(),
      connection: Arc::downgrade(&self.connection),
      dispatcher: self.dispatcher.clone(),
      request_timeout: self.connection.request_timeout(),
    }
  }

  /// Check that the server is answering.
  pub async fn ping(&self) -> Result<()> {
    executor::ping(&self.connection, self.connection.request_timeout()).await
  }

  /// Close the connection. Pending calls fail with a connection error.
  pub async fn close(&self) {
    self.connection.close().await;
  }
}

impl std::fmt::Debug for Client {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Client")
      .field("connection", &self.connection)
      .finish_non_exhaustive()
  }
}

/// A named database on a client's connection.
#[derive(Debug, Clone)]
pub struct Database {
  name: String,
  connection: Weak<Connection>,
  dispatcher: Dispatcher,
  request_timeout: Duration,
}

impl Database {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn collection(&self, name: impl Into<String>) -> Collection {
    Collection {
      database: self.name.clone(),
      name: name.into(),
      connection: self.connection.clone(),
      dispatcher: self.dispatcher.clone(),
      request_timeout: self.request_timeout,
    }
  }
}

/// A handle to one collection. Cheap to clone and safe to share across tasks.
///
/// ```no_run
/// use lodestone::{Client, Document};
///
/// # async fn run() -> lodestone::Result<()> {
/// let client = Client::connect("localhost:7017").await?;
/// let drinks = client.database("cafe").collection("menu");
///
/// let filter = Document::new().with("name", "Maple Latte");
/// drinks.find_one_document(filter, |result| match result {
///   Ok(Some(doc)) => println!("Found a matching document: {doc}"),
///   Ok(None) => println!("No matching document"),
///   Err(e) => println!("Did not find matching documents: {e}"),
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Collection {
  database: String,
  name: String,
  connection: Weak<Connection>,
  dispatcher: Dispatcher,
  request_timeout: Duration,
}

impl Collection {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn database_name(&self) -> &str {
    &self.database
  }

  pub fn timeout(&self) -> Duration {
    self.request_timeout
  }

  /// Override the reply timeout for calls made through this handle.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  /// Find the first document matching `filter`. `Ok(None)` means nothing matched.
  pub async fn find_one(&self, filter: impl Into<Document>) -> Result<Option<Document>> {
    let connection = upgrade(&self.connection)?;
    executor::find_one(
      &connection,
      &self.database,
      &self.name,
      filter.into(),
      self.request_timeout,
    )
    .await
  }

  /// Find the first document matching `filter` and hand the result to `on_complete`.
  ///
  /// `on_complete` runs exactly once on the client's runtime, unless the returned
  /// handle is cancelled first, in which case it never runs.
  pub fn find_one_document<C>(&self, filter: impl Into<Document>, on_complete: C) -> CallHandle
  where
    C: FnOnce(Result<Option<Document>>) + Send + 'static,
  {
    let handle = self.clone();
    let filter = filter.into();
    self
      .dispatcher
      .dispatch(async move { handle.find_one(filter).await }, on_complete)
  }
}

fn upgrade(connection: &Weak<Connection>) -> std::result::Result<Arc<Connection>, QueryError> {
  connection
    .upgrade()
    .ok_or_else(|| ConnectionError::closed("client dropped").into())
}
