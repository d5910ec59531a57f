//! A single multiplexed connection to a lodestone server.
//!
//! Many callers share one `Connection`. Each request registers a waiter under a
//! correlation id; a background read loop routes every incoming frame to the waiter
//! with the matching id. Outgoing frames go through a writer task so a frame is always
//! written whole, even if the caller that queued it is cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ConnectionError, QueryError};
use crate::frame::Frame;
use crate::options::ConnectOptions;
use crate::protocol::{
  Encoding, HandshakeStatus, ProtocolFlags, FRAME_HEADER_SIZE, MAGIC, PROTOCOL_VERSION,
};

const OUTBOUND_QUEUE: usize = 256;
const READ_BUFFER_SIZE: usize = 8 * 1024;

type Delivery = Result<Frame, ConnectionError>;

struct Waiter {
  token: u64,
  tx: oneshot::Sender<Delivery>,
}

#[derive(Default)]
struct Table {
  waiters: HashMap<u32, Waiter>,
  closed: Option<String>,
}

/// State shared between callers, the read loop and the writer task.
///
/// Every insertion into and removal from `waiters` happens under the one lock, and
/// whoever removes an entry owns its delivery.
struct Shared {
  table: Mutex<Table>,
  next_id: AtomicU32,
  next_token: AtomicU64,
}

impl Shared {
  fn new() -> Self {
    Self {
      table: Mutex::new(Table::default()),
      next_id: AtomicU32::new(1),
      next_token: AtomicU64::new(1),
    }
  }

  fn register(self: &Arc<Self>, requested: Option<u32>) -> Result<PendingResponse, ConnectionError> {
    let (tx, rx) = oneshot::channel();
    let token = self.next_token.fetch_add(1, Ordering::Relaxed);

    let mut table = self.table.lock();
    if let Some(reason) = &table.closed {
      return Err(ConnectionError::closed(reason.clone()));
    }

    let id = match requested {
      Some(id) if table.waiters.contains_key(&id) => {
        return Err(ConnectionError::DuplicateCorrelationId(id));
      }
      Some(id) => id,
      None => loop {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id != 0 && !table.waiters.contains_key(&id) {
          break id;
        }
      },
    };
    table.waiters.insert(id, Waiter { token, tx });

    Ok(PendingResponse {
      correlation_id: id,
      token,
      rx,
      shared: Arc::clone(self),
      settled: false,
    })
  }

  /// Remove the waiter for `id` if it is still the one identified by `token`.
  fn claim(&self, id: u32, token: u64) -> bool {
    let mut table = self.table.lock();
    match table.waiters.get(&id) {
      Some(w) if w.token == token => {
        table.waiters.remove(&id);
        true
      }
      _ => false,
    }
  }

  fn deliver(&self, frame: Frame) {
    let mut table = self.table.lock();
    match table.waiters.remove(&frame.correlation_id) {
      Some(waiter) => {
        log::trace!("routing frame for correlation id {}", frame.correlation_id);
        // Sent under the lock so a waiter that loses a claim finds the frame already queued.
        let _ = waiter.tx.send(Ok(frame));
      }
      None => {
        log::warn!(
          "dropping frame for unknown correlation id {} ({} bytes)",
          frame.correlation_id,
          frame.payload.len()
        );
      }
    }
  }

  fn fail_all(&self, reason: impl Into<String>) {
    let reason = reason.into();
    let mut table = self.table.lock();
    if table.closed.is_none() {
      log::debug!("connection closed: {reason}");
      table.closed = Some(reason.clone());
    }
    for (_, waiter) in table.waiters.drain() {
      let _ = waiter.tx.send(Err(ConnectionError::closed(reason.clone())));
    }
  }
}

/// A registered, in-flight request awaiting its response.
///
/// Dropping it before the response arrives releases the waiter entry.
pub struct PendingResponse {
  correlation_id: u32,
  token: u64,
  rx: oneshot::Receiver<Delivery>,
  shared: Arc<Shared>,
  settled: bool,
}

impl PendingResponse {
  pub fn correlation_id(&self) -> u32 {
    self.correlation_id
  }

  /// Suspend until the response frame for this request arrives or `timeout` elapses.
  ///
  /// Delivery and timeout are mutually exclusive: if the read loop claimed the entry
  /// first, the delivered frame is returned even though the timer fired.
  pub async fn wait(mut self, timeout: Duration) -> Result<Frame, QueryError> {
    let result = match tokio::time::timeout(timeout, &mut self.rx).await {
      Ok(Ok(delivery)) => delivery.map_err(QueryError::from),
      Ok(Err(_)) => Err(ConnectionError::closed("connection dropped").into()),
      Err(_) => {
        if self.shared.claim(self.correlation_id, self.token) {
          log::debug!("request {} timed out after {:?}", self.correlation_id, timeout);
          Err(QueryError::Timeout { after: timeout })
        } else {
          match self.rx.try_recv() {
            Ok(delivery) => delivery.map_err(QueryError::from),
            Err(_) => Err(ConnectionError::closed("connection dropped").into()),
          }
        }
      }
    };
    self.settled = true;
    result
  }
}

impl Drop for PendingResponse {
  fn drop(&mut self) {
    if !self.settled && self.shared.claim(self.correlation_id, self.token) {
      log::trace!("released waiter for correlation id {}", self.correlation_id);
    }
  }
}

impl std::fmt::Debug for PendingResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingResponse")
      .field("correlation_id", &self.correlation_id)
      .finish_non_exhaustive()
  }
}

enum Outbound {
  Frame {
    bytes: Bytes,
    ack: oneshot::Sender<std::io::Result<()>>,
  },
  Shutdown,
}

/// A shared, framed, full-duplex connection.
pub struct Connection {
  shared: Arc<Shared>,
  outbound: mpsc::Sender<Outbound>,
  reader: JoinHandle<()>,
  writer: JoinHandle<()>,
  encoding: Encoding,
  max_message_size: u32,
  request_timeout: Duration,
}

impl Connection {
  /// Open a TCP connection, perform the handshake and start the read loop.
  ///
  /// `connect_timeout` bounds the TCP connect and the handshake together.
  pub async fn connect(options: &ConnectOptions) -> Result<Self, ConnectionError> {
    let addr = options.address();
    log::debug!("connecting to {addr}");
    let deadline = Instant::now() + options.connect_timeout;

    let stream = match tokio::time::timeout_at(deadline, TcpStream::connect(&addr)).await {
      Ok(Ok(stream)) => stream,
      Ok(Err(e)) => {
        return Err(ConnectionError::Connect(format!(
          "Failed to connect to {}: {}",
          addr, e
        )))
      }
      Err(_) => {
        return Err(ConnectionError::Connect(format!(
          "timed out connecting to {} after {:?}",
          addr, options.connect_timeout
        )))
      }
    };
    stream.set_nodelay(true)?;
    Self::establish_until(stream, options, deadline).await
  }

  /// Perform the handshake on an already-open stream, then start serving it.
  ///
  /// A peer that does not answer within `connect_timeout` fails with `ConnectionError::Connect`.
  pub async fn establish<S>(stream: S, options: &ConnectOptions) -> Result<Self, ConnectionError>
  where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  {
    Self::establish_until(stream, options, Instant::now() + options.connect_timeout).await
  }

  async fn establish_until<S>(
    mut stream: S,
    options: &ConnectOptions,
    deadline: Instant,
  ) -> Result<Self, ConnectionError>
  where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  {
    let encoding = match tokio::time::timeout_at(deadline, handshake(&mut stream, options.encoding)).await {
      Ok(result) => result?,
      Err(_) => {
        return Err(ConnectionError::Connect(format!(
          "timed out waiting for handshake after {:?}",
          options.connect_timeout
        )))
      }
    };
    log::debug!("handshake complete, encoding {:?}", encoding);
    Ok(Self::from_stream(stream, encoding, options))
  }

  /// Serve a stream whose encoding is already agreed. Must be called inside a tokio runtime.
  pub fn from_stream<S>(stream: S, encoding: Encoding, options: &ConnectOptions) -> Self
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let (read_half, write_half) = tokio::io::split(stream);
    let shared = Arc::new(Shared::new());
    let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);

    let reader = tokio::spawn(read_loop(read_half, Arc::clone(&shared), options.max_message_size));
    let writer = tokio::spawn(write_loop(write_half, rx, Arc::clone(&shared)));

    Self {
      shared,
      outbound,
      reader,
      writer,
      encoding,
      max_message_size: options.max_message_size,
      request_timeout: options.request_timeout,
    }
  }

  /// Frame `payload` and queue it for writing.
  ///
  /// The waiter is registered before the frame is written, so a reply can never
  /// arrive ahead of its waiter. `correlation_id` of `None` assigns a fresh id.
  ///
  /// Resolves once the frame is written. A peer that stops reading can hold this
  /// indefinitely, so callers bound it; dropping the future releases the waiter.
  pub async fn send(
    &self,
    payload: Bytes,
    correlation_id: Option<u32>,
  ) -> Result<PendingResponse, ConnectionError> {
    let size = FRAME_HEADER_SIZE + payload.len();
    let max = self.max_message_size as usize;
    if size > max {
      return Err(ConnectionError::FrameTooLarge { size, max });
    }

    let pending = self.shared.register(correlation_id)?;
    let bytes = Frame::new(pending.correlation_id, payload)
      .encode_to_bytes()
      .map_err(|_| ConnectionError::FrameTooLarge { size, max })?;
    let (ack, acked) = oneshot::channel();

    self
      .outbound
      .send(Outbound::Frame { bytes, ack })
      .await
      .map_err(|_| self.closed_error())?;

    match acked.await {
      Ok(Ok(())) => Ok(pending),
      Ok(Err(e)) => Err(ConnectionError::Io(e)),
      Err(_) => Err(self.closed_error()),
    }
  }

  pub fn encoding(&self) -> Encoding {
    self.encoding
  }

  pub fn max_message_size(&self) -> u32 {
    self.max_message_size
  }

  pub fn request_timeout(&self) -> Duration {
    self.request_timeout
  }

  pub fn is_closed(&self) -> bool {
    self.shared.table.lock().closed.is_some()
  }

  /// Number of requests currently waiting for a response.
  pub fn in_flight(&self) -> usize {
    self.shared.table.lock().waiters.len()
  }

  /// Close the connection. Pending requests fail with `ConnectionError::Closed`.
  ///
  /// Never waits on the peer: if the outbound queue is full, the writer is stopped
  /// without flushing.
  pub async fn close(&self) {
    self.shared.fail_all("closed by client");
    if self.outbound.try_send(Outbound::Shutdown).is_err() {
      self.writer.abort();
    }
    self.reader.abort();
  }

  fn closed_error(&self) -> ConnectionError {
    let reason = self
      .shared
      .table
      .lock()
      .closed
      .clone()
      .unwrap_or_else(|| "writer stopped".to_string());
    ConnectionError::closed(reason)
  }
}

impl Drop for Connection {
  fn drop(&mut self) {
    self.shared.fail_all("connection dropped");
    self.reader.abort();
    self.writer.abort();
  }
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("encoding", &self.encoding)
      .field("in_flight", &self.in_flight())
      .field("closed", &self.is_closed())
      .finish_non_exhaustive()
  }
}

async fn handshake<S>(stream: &mut S, preferred: Encoding) -> Result<Encoding, ConnectionError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let offered = ProtocolFlags::offering(preferred);

  let mut hello = Vec::with_capacity(MAGIC.len() + 2);
  hello.extend_from_slice(MAGIC);
  hello.push(PROTOCOL_VERSION);
  hello.push(u8::from(offered));
  stream.write_all(&hello).await?;
  stream.flush().await?;

  let mut reply = [0u8; 3];
  stream
    .read_exact(&mut reply)
    .await
    .map_err(|e| ConnectionError::Handshake(format!("no handshake reply: {}", e)))?;
  let [status, server_version, encoding] = reply;

  match HandshakeStatus::try_from(status) {
    Ok(HandshakeStatus::Success) => {
      let encoding = Encoding::try_from(encoding)
        .map_err(|_| ConnectionError::Handshake(format!("unknown encoding 0x{:02x}", encoding)))?;
      if !offered.supports(encoding) {
        return Err(ConnectionError::Handshake(format!(
          "server chose {:?}, which was not offered",
          encoding
        )));
      }
      Ok(encoding)
    }
    Ok(HandshakeStatus::VersionMismatch) => Err(ConnectionError::VersionMismatch {
      server: server_version,
      client: PROTOCOL_VERSION,
    }),
    Ok(HandshakeStatus::UnsupportedEncoding) => Err(ConnectionError::Handshake(
      "server supports none of the offered encodings".to_string(),
    )),
    Err(()) => Err(ConnectionError::Handshake(format!(
      "unknown handshake status 0x{:02x}",
      status
    ))),
  }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, max_message_size: u32)
where
  R: AsyncRead + Unpin,
{
  let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

  let reason = 'read: loop {
    loop {
      match Frame::decode(&mut buf, max_message_size) {
        Ok(Some(frame)) => shared.deliver(frame),
        Ok(None) => break,
        Err(e) => {
          log::warn!("read loop stopping on corrupt frame: {e}");
          break 'read format!("corrupt frame: {e}");
        }
      }
    }

    match reader.read_buf(&mut buf).await {
      Ok(0) if buf.is_empty() => break "server closed connection".to_string(),
      Ok(0) => {
        break format!(
          "server closed connection mid-frame ({} bytes buffered)",
          buf.len()
        )
      }
      Ok(_) => {}
      Err(e) => {
        log::warn!("read loop stopping on I/O error: {e}");
        break format!("read failed: {e}");
      }
    }
  };

  shared.fail_all(reason);
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>, shared: Arc<Shared>)
where
  W: AsyncWrite + Unpin,
{
  while let Some(out) = rx.recv().await {
    match out {
      Outbound::Frame { bytes, ack } => {
        let result = match writer.write_all(&bytes).await {
          Ok(()) => writer.flush().await,
          Err(e) => Err(e),
        };
        if let Err(e) = &result {
          log::warn!("write failed: {e}");
          shared.fail_all(format!("write failed: {e}"));
        }
        let failed = result.is_err();
        let _ = ack.send(result);
        if failed {
          break;
        }
      }
      Outbound::Shutdown => break,
    }
  }
  let _ = writer.shutdown().await;
}
