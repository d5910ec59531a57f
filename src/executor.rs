//! Query execution: one request in, exactly one outcome out.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::codec;
use crate::connection::{Connection, PendingResponse};
use crate::document::Document;
use crate::error::{QueryError, Result};
use crate::frame::Frame;
use crate::protocol::{FindRequest, Outcome};

/// Lifecycle of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
  Building,
  Sent,
  AwaitingResponse,
  Completed,
  Failed,
}

struct Call {
  state: CallState,
  correlation_id: Option<u32>,
}

impl Call {
  fn new() -> Self {
    Self {
      state: CallState::Building,
      correlation_id: None,
    }
  }

  fn advance(&mut self, next: CallState) {
    log::trace!(
      "find_one[{}]: {:?} -> {:?}",
      self.correlation_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
      self.state,
      next
    );
    self.state = next;
  }

  fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
    match &result {
      Ok(_) => self.advance(CallState::Completed),
      Err(e) => {
        log::debug!("find_one failed: {e}");
        self.advance(CallState::Failed);
      }
    }
    result
  }
}

/// Run a find-one query over `connection`.
///
/// Returns `Ok(None)` when nothing matches. Encoding failures are reported before
/// anything is written to the connection.
pub async fn find_one(
  connection: &Connection,
  database: &str,
  collection: &str,
  filter: Document,
  timeout: Duration,
) -> Result<Option<Document>> {
  let mut call = Call::new();
  let result = run_find_one(&mut call, connection, database, collection, filter, timeout).await;
  call.finish(result)
}

async fn run_find_one(
  call: &mut Call,
  connection: &Connection,
  database: &str,
  collection: &str,
  filter: Document,
  timeout: Duration,
) -> Result<Option<Document>> {
  let deadline = Instant::now() + timeout;
  let request = FindRequest::find_one(database, collection, filter);
  let payload = codec::encode_find(&request, connection.encoding(), connection.max_message_size())?;

  let pending = send_before(connection, payload, deadline, timeout).await?;
  call.correlation_id = Some(pending.correlation_id());
  call.advance(CallState::Sent);

  call.advance(CallState::AwaitingResponse);
  let frame = wait_before(pending, deadline, timeout).await?;
  let response = codec::decode_response_frame(&frame, connection.encoding())?;

  match response.outcome {
    Outcome::Document { document } => Ok(Some(document)),
    Outcome::Empty => Ok(None),
    Outcome::Error { code, message } => Err(QueryError::Server { code, message }),
    other => Err(QueryError::UnexpectedResponse {
      expected: "document, empty or error",
      actual: other.kind().to_string(),
    }),
  }
}

/// Round-trip a ping over `connection`.
pub async fn ping(connection: &Connection, timeout: Duration) -> Result<()> {
  let deadline = Instant::now() + timeout;
  let payload = codec::encode_ping(connection.encoding(), connection.max_message_size())?;
  let pending = send_before(connection, payload, deadline, timeout).await?;
  let frame = wait_before(pending, deadline, timeout).await?;

  match codec::decode_response_frame(&frame, connection.encoding())?.outcome {
    Outcome::Pong => Ok(()),
    Outcome::Error { code, message } => Err(QueryError::Server { code, message }),
    other => Err(QueryError::UnexpectedResponse {
      expected: "pong",
      actual: other.kind().to_string(),
    }),
  }
}

/// Queue `payload`, giving up at `deadline` if the peer is not draining the connection.
///
/// On timeout the unfinished send is dropped, which releases its waiter.
async fn send_before(
  connection: &Connection,
  payload: Bytes,
  deadline: Instant,
  timeout: Duration,
) -> Result<PendingResponse> {
  match tokio::time::timeout_at(deadline, connection.send(payload, None)).await {
    Ok(sent) => Ok(sent?),
    Err(_) => {
      log::debug!("send did not complete within {:?}", timeout);
      Err(QueryError::Timeout { after: timeout })
    }
  }
}

/// Wait out whatever is left of the call's budget. Timeouts report the full budget.
async fn wait_before(pending: PendingResponse, deadline: Instant, timeout: Duration) -> Result<Frame> {
  pending
    .wait(deadline.saturating_duration_since(Instant::now()))
    .await
    .map_err(|e| match e {
      QueryError::Timeout { .. } => QueryError::Timeout { after: timeout },
      other => other,
    })
}
