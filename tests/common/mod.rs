//! In-process stand-in for a lodestone server, speaking the real wire format over
//! a `tokio::io::duplex` pipe.

#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use lodestone::{
  codec, ClientMessage, ConnectOptions, Connection, Encoding, Frame, HandshakeStatus, Outcome,
  ProtocolFlags, Response, MAGIC, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

pub fn options() -> ConnectOptions {
  ConnectOptions::default().with_request_timeout(Duration::from_secs(5))
}

/// A connection already past the handshake, plus the server end of its pipe.
pub fn pair(encoding: Encoding) -> (Connection, FakeServer) {
  let (client, server) = duplex(64 * 1024);
  let connection = Connection::from_stream(client, encoding, &options().with_encoding(encoding));
  (connection, FakeServer::new(server, encoding))
}

pub struct FakeServer {
  stream: DuplexStream,
  buf: BytesMut,
  pub encoding: Encoding,
}

impl FakeServer {
  pub fn new(stream: DuplexStream, encoding: Encoding) -> Self {
    Self {
      stream,
      buf: BytesMut::new(),
      encoding,
    }
  }

  /// Next decoded request, or `None` once the client hangs up.
  pub async fn next_request(&mut self) -> Option<(u32, ClientMessage)> {
    loop {
      if let Some(frame) = Frame::decode(&mut self.buf, MAX_MESSAGE_SIZE).expect("client sent a valid frame") {
        return Some(codec::decode_request_frame(&frame, self.encoding).expect("client sent a valid request"));
      }
      match self.stream.read_buf(&mut self.buf).await {
        Ok(0) | Err(_) => return None,
        Ok(_) => {}
      }
    }
  }

  /// Next request, failing the test if none arrives within a second.
  pub async fn expect_request(&mut self) -> (u32, ClientMessage) {
    tokio::time::timeout(Duration::from_secs(1), self.next_request())
      .await
      .expect("request arrived in time")
      .expect("client still connected")
  }

  pub async fn reply(&mut self, correlation_id: u32, outcome: Outcome) {
    let bytes = codec::encode_response(
      &Response {
        correlation_id,
        outcome,
      },
      self.encoding,
      MAX_MESSAGE_SIZE,
    )
    .expect("fixture is encodable");
    self.send_raw(&bytes).await;
  }

  pub async fn send_raw(&mut self, bytes: &[u8]) {
    self.stream.write_all(bytes).await.expect("write to client");
  }

  /// Answer every request with `respond` until the client disconnects.
  pub async fn serve<F>(mut self, mut respond: F)
  where
    F: FnMut(&ClientMessage) -> Outcome,
  {
    while let Some((id, msg)) = self.next_request().await {
      let outcome = respond(&msg);
      self.reply(id, outcome).await;
    }
  }
}

/// Server half of the handshake. Returns the client's hello (version, offered flags).
pub async fn answer_handshake(
  stream: &mut DuplexStream,
  status: HandshakeStatus,
  version: u8,
  encoding: Encoding,
) -> (u8, ProtocolFlags) {
  let mut hello = [0u8; 6];
  stream.read_exact(&mut hello).await.expect("client hello");
  assert_eq!(&hello[..4], MAGIC);
  stream
    .write_all(&[status as u8, version, encoding as u8])
    .await
    .expect("handshake reply");
  (hello[4], ProtocolFlags::from(hello[5]))
}

pub fn current_version() -> u8 {
  PROTOCOL_VERSION
}
