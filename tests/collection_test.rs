//! End-to-end find-one tests against the in-process fake server.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{pair, FakeServer};
use futures::future::join_all;
use lodestone::{
  ClientMessage, Client, ConnectionError, Document, Encoding, EncodingError, Outcome, QueryError, Value,
};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

fn latte() -> Document {
  Document::new()
    .with("name", "Maple Latte")
    .with("price", 4.75)
    .with("seasonal", true)
}

fn nested(depth: usize) -> Document {
  let mut doc = Document::new().with("leaf", 1);
  for _ in 1..depth {
    doc = Document::new().with("child", doc);
  }
  doc
}

#[tokio::test]
async fn test_find_one_sends_limit_one_with_filter() {
  let (connection, mut server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let call = tokio::spawn({
    let menu = menu.clone();
    async move { menu.find_one(Document::new().with("name", "Maple Latte")).await }
  });

  let (id, msg) = server.expect_request().await;
  match msg {
    ClientMessage::Find(req) => {
      assert_eq!(req.database, "cafe");
      assert_eq!(req.collection, "menu");
      assert_eq!(req.limit, 1);
      assert_eq!(req.filter, Document::new().with("name", "Maple Latte"));
    }
    other => panic!("Expected find, got {:?}", other),
  }
  server.reply(id, Outcome::Document { document: latte() }).await;

  let found = call.await.unwrap().unwrap();
  assert_eq!(found, Some(latte()));
}

#[tokio::test]
async fn test_find_one_with_filter_builder() {
  let (connection, mut server) = pair(Encoding::Json);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let filter = lodestone::and(vec![
    lodestone::field("price").lt(5.0),
    lodestone::field("seasonal").eq(true),
  ]);
  let call = tokio::spawn(async move { menu.find_one(filter).await });

  let (id, msg) = server.expect_request().await;
  let filter = match msg {
    ClientMessage::Find(req) => req.filter,
    other => panic!("Expected find, got {:?}", other),
  };
  assert!(filter.contains_key("$and"));
  server.reply(id, Outcome::Document { document: latte() }).await;

  assert!(call.await.unwrap().unwrap().is_some());
}

#[tokio::test]
async fn test_no_match_is_none_not_error() {
  let (connection, server) = pair(Encoding::MessagePack);
  tokio::spawn(server.serve(|_| Outcome::Empty));
  let client = Client::from_connection(connection);

  let result = client
    .database("cafe")
    .collection("menu")
    .find_one(Document::new().with("name", "Pumpkin Spice"))
    .await;
  assert!(matches!(result, Ok(None)));
}

#[tokio::test]
async fn test_server_error_is_surfaced() {
  let (connection, server) = pair(Encoding::Json);
  tokio::spawn(server.serve(|_| Outcome::Error {
    code: 13,
    message: "not authorized on cafe".to_string(),
  }));
  let client = Client::from_connection(connection);

  let err = client
    .database("cafe")
    .collection("menu")
    .find_one(latte())
    .await
    .unwrap_err();
  match err {
    QueryError::Server { code, message } => {
      assert_eq!(code, 13);
      assert_eq!(message, "not authorized on cafe");
    }
    other => panic!("Expected server error, got {:?}", other),
  }
  assert!(!client.connection().is_closed());
}

#[tokio::test]
async fn test_unexpected_outcome_kind() {
  let (connection, server) = pair(Encoding::MessagePack);
  tokio::spawn(server.serve(|_| Outcome::Pong));
  let client = Client::from_connection(connection);

  let err = client.database("cafe").collection("menu").find_one(latte()).await.unwrap_err();
  assert!(matches!(err, QueryError::UnexpectedResponse { ref actual, .. } if actual == "pong"));
}

#[tokio::test]
async fn test_unencodable_filter_sends_nothing() {
  let (connection, mut server) = pair(Encoding::Json);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let err = menu
    .find_one(Document::new().with("ratio", Value::Double(f64::INFINITY)))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    QueryError::Encoding(EncodingError::NonFiniteDouble { ref path }) if path == "ratio"
  ));

  let err = menu.find_one(nested(60)).await.unwrap_err();
  assert!(matches!(err, QueryError::Encoding(EncodingError::TooDeep { .. })));
  assert_eq!(client.connection().in_flight(), 0);

  let call = tokio::spawn(async move { menu.find_one(Document::new().with("name", "ok")).await });

  // The first request on the wire is the valid one.
  let (id, msg) = server.expect_request().await;
  assert!(matches!(msg, ClientMessage::Find(ref req) if req.filter.get_str("name") == Some("ok")));
  server.reply(id, Outcome::Empty).await;
  assert!(matches!(call.await.unwrap(), Ok(None)));
}

#[tokio::test]
async fn test_oversized_filter_is_rejected_locally() {
  let (connection, mut server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let blob = vec![0u8; 17 * 1024 * 1024];
  let err = menu.find_one(Document::new().with("blob", blob)).await.unwrap_err();
  assert!(matches!(err, QueryError::Encoding(EncodingError::TooLarge { .. })));

  let nothing = tokio::time::timeout(Duration::from_millis(50), server.next_request()).await;
  assert!(nothing.is_err());
}

#[tokio::test]
async fn test_callback_runs_exactly_once() {
  let (connection, server) = pair(Encoding::MessagePack);
  tokio::spawn(server.serve(|_| Outcome::Document { document: latte() }));
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let calls = Arc::new(AtomicUsize::new(0));
  let (tx, mut rx) = mpsc::unbounded_channel();
  let seen = Arc::clone(&calls);
  let handle = menu.find_one_document(Document::new().with("name", "Maple Latte"), move |result| {
    seen.fetch_add(1, Ordering::SeqCst);
    let _ = tx.send(result);
  });

  let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(result.unwrap(), Some(latte()));

  handle.join().await;
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  // The continuation was consumed, so its sender is gone.
  assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_callback_receives_errors() {
  let (connection, server) = pair(Encoding::MessagePack);
  drop(server);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let (tx, mut rx) = mpsc::unbounded_channel();
  menu.find_one_document(latte(), move |result| {
    let _ = tx.send(result);
  });

  let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
    .await
    .unwrap()
    .unwrap();
  // Depending on which side notices the hangup first, this is a close or a broken pipe.
  assert!(matches!(result, Err(QueryError::Connection(_))));
}

#[tokio::test]
async fn test_cancelled_call_never_invokes_callback() {
  let (connection, mut server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let (tx, mut rx) = mpsc::unbounded_channel();
  let handle = menu.find_one_document(latte(), move |result| {
    let _ = tx.send(result);
  });

  let (id, _) = server.expect_request().await;
  assert!(handle.cancel());
  assert!(handle.is_cancelled());
  handle.join().await;

  // The abandoned wait released its correlation id.
  assert_eq!(client.connection().in_flight(), 0);

  // A late reply for the cancelled call goes nowhere.
  server.reply(id, Outcome::Document { document: latte() }).await;
  assert!(rx.recv().await.is_none());

  // The connection is still usable.
  let call = tokio::spawn(async move { menu.find_one(latte()).await });
  let (next_id, _) = server.expect_request().await;
  assert_ne!(next_id, id);
  server.reply(next_id, Outcome::Empty).await;
  assert!(matches!(call.await.unwrap(), Ok(None)));
}

#[tokio::test]
async fn test_timeout_then_stale_reply_does_not_cross_talk() {
  let (connection, mut server) = pair(Encoding::Json);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let slow = menu.clone().with_timeout(Duration::from_millis(30));
  let call = tokio::spawn(async move { slow.find_one(Document::new().with("name", "slow")).await });
  let (stale_id, _) = server.expect_request().await;

  let err = call.await.unwrap().unwrap_err();
  assert!(matches!(err, QueryError::Timeout { after } if after == Duration::from_millis(30)));
  assert!(err.is_retryable());

  let call = tokio::spawn(async move { menu.find_one(Document::new().with("name", "fast")).await });
  let (id, _) = server.expect_request().await;

  server
    .reply(stale_id, Outcome::Document { document: Document::new().with("name", "slow") })
    .await;
  server
    .reply(id, Outcome::Document { document: Document::new().with("name", "fast") })
    .await;

  let found = call.await.unwrap().unwrap().unwrap();
  assert_eq!(found.get_str("name"), Some("fast"));
}

/// Reads `count` find requests, then answers each with `{"i": <filter's i>}` in shuffled
/// order, pausing every `pause_every` replies.
async fn echo_shuffled(mut server: FakeServer, count: usize, pause_every: usize) -> FakeServer {
  let mut batch = Vec::new();
  while batch.len() < count {
    batch.push(server.expect_request().await);
  }
  batch.shuffle(&mut rand::rng());

  for (n, (id, msg)) in batch.into_iter().enumerate() {
    let i = match msg {
      ClientMessage::Find(req) => req.filter.get_i64("i").expect("filter carries i"),
      other => panic!("Expected find, got {:?}", other),
    };
    if pause_every > 0 && n % pause_every == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    server
      .reply(id, Outcome::Document { document: Document::new().with("i", i) })
      .await;
  }
  server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_get_their_own_replies() {
  const CALLS: i64 = 50;

  let (connection, server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  let server_task = tokio::spawn(echo_shuffled(server, CALLS as usize, 0));

  let calls = (0..CALLS).map(|i| {
    let menu = menu.clone();
    tokio::spawn(async move { (i, menu.find_one(Document::new().with("i", i)).await) })
  });
  let results = join_all(calls).await;

  for joined in results {
    let (i, result) = joined.unwrap();
    let doc = result.unwrap().expect("every call matches");
    assert_eq!(doc.get_i64("i"), Some(i));
  }
  assert_eq!(client.connection().in_flight(), 0);
  let _server = server_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replies_racing_timeouts_never_cross() {
  const CALLS: i64 = 40;
  const BUDGET: Duration = Duration::from_millis(40);

  let (connection, server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  // Replies trickle out around the short budget, so odd calls race their deadline.
  let server_task = tokio::spawn(echo_shuffled(server, CALLS as usize, 4));

  let calls = (0..CALLS).map(|i| {
    let menu = if i % 2 == 1 {
      menu.clone().with_timeout(BUDGET)
    } else {
      menu.clone()
    };
    tokio::spawn(async move { (i, menu.find_one(Document::new().with("i", i)).await) })
  });
  let results = join_all(calls).await;

  for joined in results {
    let (i, result) = joined.unwrap();
    match result {
      Ok(Some(doc)) => assert_eq!(doc.get_i64("i"), Some(i), "call {i} got another call's reply"),
      Err(QueryError::Timeout { after }) => {
        assert_eq!(i % 2, 1, "call {i} had the long budget");
        assert_eq!(after, BUDGET);
      }
      other => panic!("call {i}: unexpected {:?}", other),
    }
  }

  let mut server = server_task.await.unwrap();
  assert_eq!(client.connection().in_flight(), 0);

  // Stale replies were dropped and the connection still routes correctly.
  let call = tokio::spawn(async move { menu.find_one(Document::new().with("i", 99)).await });
  let (id, _) = server.expect_request().await;
  server
    .reply(id, Outcome::Document { document: Document::new().with("i", 99) })
    .await;
  let doc = call.await.unwrap().unwrap().unwrap();
  assert_eq!(doc.get_i64("i"), Some(99));
}

#[tokio::test]
async fn test_timeout_covers_a_peer_that_stops_reading() {
  // The server end is held open but never read, so the pipe fills and writes stall.
  let (connection, _server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client
    .database("cafe")
    .collection("menu")
    .with_timeout(Duration::from_millis(100));
  let blob = Document::new().with("blob", vec![0u8; 200 * 1024]);

  let result = tokio::time::timeout(Duration::from_secs(2), menu.find_one(blob.clone()))
    .await
    .expect("find_one resolves within its own timeout");
  assert!(matches!(
    result,
    Err(QueryError::Timeout { after }) if after == Duration::from_millis(100)
  ));
  assert_eq!(client.connection().in_flight(), 0);

  // The callback form also resolves, with the same error.
  let (tx, mut rx) = mpsc::unbounded_channel();
  menu.find_one_document(blob, move |result| {
    let _ = tx.send(result);
  });
  let result = tokio::time::timeout(Duration::from_secs(2), rx.recv())
    .await
    .expect("callback invoked within its timeout")
    .unwrap();
  assert!(matches!(result, Err(QueryError::Timeout { .. })));

  tokio::time::timeout(Duration::from_secs(1), client.close())
    .await
    .expect("close does not wait on a stalled peer");
  assert!(client.connection().is_closed());
}

#[tokio::test]
async fn test_handle_outliving_client_fails_closed() {
  let (connection, _server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");
  drop(client);

  let err = menu.find_one(latte()).await.unwrap_err();
  assert!(matches!(
    err,
    QueryError::Connection(ConnectionError::Closed { ref reason }) if reason == "client dropped"
  ));
  assert!(err.is_retryable());
}

#[tokio::test]
async fn test_ping() {
  let (connection, server) = pair(Encoding::Json);
  tokio::spawn(server.serve(|msg| match msg {
    ClientMessage::Ping => Outcome::Pong,
    _ => Outcome::Empty,
  }));
  let client = Client::from_connection(connection);

  client.ping().await.unwrap();
}

#[tokio::test]
async fn test_close_fails_later_calls() {
  let (connection, _server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);
  let menu = client.database("cafe").collection("menu");

  client.close().await;

  let err = menu.find_one(latte()).await.unwrap_err();
  assert!(matches!(err, QueryError::Connection(ConnectionError::Closed { .. })));
}

#[test]
fn test_collection_accessors() {
  let rt = tokio::runtime::Runtime::new().unwrap();
  let _guard = rt.enter();
  let (connection, _server) = pair(Encoding::MessagePack);
  let client = Client::from_connection(connection);

  let db = client.database("cafe");
  let menu = db.collection("menu");
  assert_eq!(db.name(), "cafe");
  assert_eq!(menu.name(), "menu");
  assert_eq!(menu.database_name(), "cafe");
  assert_eq!(menu.timeout(), Duration::from_secs(5));
  assert_eq!(menu.with_timeout(Duration::from_secs(1)).timeout(), Duration::from_secs(1));
}
