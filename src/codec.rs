//! Wire codec: turns requests into frames and frames into responses.
//!
//! Client direction: [`encode_find`] / [`encode_ping`] build payloads, the connection
//! frames them, and [`decode_response`] reads replies.
//! Server direction: [`decode_request`] / [`encode_response`], used by servers and by
//! test doubles that stand in for one.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::document::{Document, Value};
use crate::error::{DecodingError, EncodingError};
use crate::frame::Frame;
use crate::protocol::{
  ClientMessage, Encoding, FindRequest, Outcome, Response, FRAME_HEADER_SIZE, MAX_NESTING_DEPTH,
};

/// Serialize a message body with the negotiated encoding.
pub fn encode_payload<T: Serialize>(msg: &T, encoding: Encoding) -> Result<Vec<u8>, EncodingError> {
  match encoding {
    Encoding::MessagePack => Ok(rmp_serde::to_vec_named(msg)?),
    Encoding::Json => Ok(serde_json::to_vec(msg)?),
  }
}

/// Deserialize a message body with the negotiated encoding.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8], encoding: Encoding) -> Result<T, DecodingError> {
  match encoding {
    Encoding::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
    Encoding::Json => Ok(serde_json::from_slice(bytes)?),
  }
}

/// Check that every value in `doc` can be carried by `encoding`.
pub fn validate_document(doc: &Document, encoding: Encoding) -> Result<(), EncodingError> {
  let mut path = Vec::new();
  validate_fields(doc, encoding, 1, &mut path)
}

fn validate_fields(
  doc: &Document,
  encoding: Encoding,
  depth: usize,
  path: &mut Vec<String>,
) -> Result<(), EncodingError> {
  if depth > MAX_NESTING_DEPTH {
    return Err(EncodingError::TooDeep {
      max: MAX_NESTING_DEPTH,
    });
  }
  for (key, value) in doc.iter() {
    path.push(key.to_string());
    validate_value(value, encoding, depth, path)?;
    path.pop();
  }
  Ok(())
}

fn validate_value(
  value: &Value,
  encoding: Encoding,
  depth: usize,
  path: &mut Vec<String>,
) -> Result<(), EncodingError> {
  match value {
    Value::Double(f) if !f.is_finite() && encoding == Encoding::Json => {
      Err(EncodingError::NonFiniteDouble { path: path.join(".") })
    }
    Value::Document(doc) => validate_fields(doc, encoding, depth + 1, path),
    Value::Array(items) => {
      if depth + 1 > MAX_NESTING_DEPTH {
        return Err(EncodingError::TooDeep {
          max: MAX_NESTING_DEPTH,
        });
      }
      for (idx, item) in items.iter().enumerate() {
        path.push(idx.to_string());
        validate_value(item, encoding, depth + 1, path)?;
        path.pop();
      }
      Ok(())
    }
    _ => Ok(()),
  }
}

fn encode_body<T: Serialize>(msg: &T, encoding: Encoding, max_size: u32) -> Result<Bytes, EncodingError> {
  let payload = encode_payload(msg, encoding)?;
  let size = FRAME_HEADER_SIZE + payload.len();
  if size > max_size as usize {
    return Err(EncodingError::TooLarge {
      size,
      max: max_size as usize,
    });
  }
  Ok(Bytes::from(payload))
}

/// Encode a find request into a frame payload. The connection adds the frame header.
pub fn encode_find(request: &FindRequest, encoding: Encoding, max_size: u32) -> Result<Bytes, EncodingError> {
  validate_document(&request.filter, encoding)?;
  encode_body(&ClientMessage::Find(request.clone()), encoding, max_size)
}

/// Encode a liveness probe into a frame payload.
pub fn encode_ping(encoding: Encoding, max_size: u32) -> Result<Bytes, EncodingError> {
  encode_body(&ClientMessage::Ping, encoding, max_size)
}

/// Decode the payload of an already-delimited frame.
pub fn decode_response_frame(frame: &Frame, encoding: Encoding) -> Result<Response, DecodingError> {
  let outcome: Outcome = decode_payload(&frame.payload, encoding)?;
  Ok(Response {
    correlation_id: frame.correlation_id,
    outcome,
  })
}

/// Decode exactly one complete response frame.
pub fn decode_response(bytes: &[u8], encoding: Encoding, max_size: u32) -> Result<Response, DecodingError> {
  let frame = Frame::parse(bytes, max_size)?;
  decode_response_frame(&frame, encoding)
}

/// Server side: decode one complete request frame.
pub fn decode_request(bytes: &[u8], encoding: Encoding, max_size: u32) -> Result<(u32, ClientMessage), DecodingError> {
  let frame = Frame::parse(bytes, max_size)?;
  decode_request_frame(&frame, encoding)
}

/// Server side: decode the payload of an already-delimited request frame.
pub fn decode_request_frame(frame: &Frame, encoding: Encoding) -> Result<(u32, ClientMessage), DecodingError> {
  let msg: ClientMessage = decode_payload(&frame.payload, encoding)?;
  Ok((frame.correlation_id, msg))
}

/// Server side: encode a response into a complete frame.
pub fn encode_response(response: &Response, encoding: Encoding, max_size: u32) -> Result<Bytes, EncodingError> {
  if let Outcome::Document { document } = &response.outcome {
    validate_document(document, encoding)?;
  }
  let payload = encode_body(&response.outcome, encoding, max_size)?;
  Frame::new(response.correlation_id, payload).encode_to_bytes()
}
