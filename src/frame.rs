//! Length-prefixed frames.
//!
//! Layout: `[u32 LE length][u32 LE correlation id][payload]`, where `length` counts
//! every byte after the length field (correlation id plus payload).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodingError, EncodingError};
use crate::protocol::FRAME_HEADER_SIZE;

const LENGTH_SIZE: usize = 4;
const CORRELATION_ID_SIZE: usize = 4;

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub correlation_id: u32,
  pub payload: Bytes,
}

impl Frame {
  pub fn new(correlation_id: u32, payload: Bytes) -> Self {
    Self {
      correlation_id,
      payload,
    }
  }

  /// Returns the total size of the frame in bytes.
  pub fn total_size(&self) -> usize {
    FRAME_HEADER_SIZE + self.payload.len()
  }

  /// Value of the length prefix. Fails when the payload does not fit in a `u32` length.
  pub fn length_prefix(&self) -> Result<u32, EncodingError> {
    u32::try_from(CORRELATION_ID_SIZE + self.payload.len()).map_err(|_| EncodingError::TooLarge {
      size: self.total_size(),
      max: LENGTH_SIZE + u32::MAX as usize,
    })
  }

  pub fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodingError> {
    let length = self.length_prefix()?;
    buf.reserve(self.total_size());
    buf.put_u32_le(length);
    buf.put_u32_le(self.correlation_id);
    buf.put_slice(&self.payload);
    Ok(())
  }

  pub fn encode_to_bytes(&self) -> Result<Bytes, EncodingError> {
    let mut buf = BytesMut::with_capacity(self.total_size());
    self.encode(&mut buf)?;
    Ok(buf.freeze())
  }

  /// Attempts to decode one frame from the front of a read buffer.
  ///
  /// Returns `Ok(None)` if more bytes are needed. On success the consumed bytes are
  /// removed from `buf`.
  pub fn decode(buf: &mut BytesMut, max_size: u32) -> Result<Option<Self>, DecodingError> {
    if buf.len() < LENGTH_SIZE {
      return Ok(None);
    }

    let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    validate_length(length, max_size)?;

    let total = LENGTH_SIZE + length as usize;
    if buf.len() < total {
      return Ok(None);
    }

    buf.advance(LENGTH_SIZE);
    let correlation_id = buf.get_u32_le();
    let payload = buf.split_to(length as usize - CORRELATION_ID_SIZE).freeze();

    Ok(Some(Self {
      correlation_id,
      payload,
    }))
  }

  /// Decodes exactly one complete frame. Missing bytes and trailing bytes are errors.
  pub fn parse(bytes: &[u8], max_size: u32) -> Result<Self, DecodingError> {
    if bytes.len() < FRAME_HEADER_SIZE {
      return Err(DecodingError::Truncated {
        needed: FRAME_HEADER_SIZE,
        available: bytes.len(),
      });
    }

    let mut buf = BytesMut::from(bytes);
    match Self::decode(&mut buf, max_size)? {
      Some(frame) if buf.is_empty() => Ok(frame),
      Some(frame) => Err(DecodingError::BadLength(format!(
        "declared {} bytes but {} trailing bytes follow",
        CORRELATION_ID_SIZE + frame.payload.len(),
        buf.len()
      ))),
      None => {
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        Err(DecodingError::Truncated {
          needed: LENGTH_SIZE + length,
          available: bytes.len(),
        })
      }
    }
  }
}

fn validate_length(length: u32, max_size: u32) -> Result<(), DecodingError> {
  if (length as usize) < CORRELATION_ID_SIZE {
    return Err(DecodingError::BadLength(format!(
      "{length} is shorter than the correlation id"
    )));
  }
  if length as u64 + LENGTH_SIZE as u64 > max_size as u64 {
    return Err(DecodingError::BadLength(format!(
      "{length} exceeds maximum frame size {max_size}"
    )));
  }
  Ok(())
}
