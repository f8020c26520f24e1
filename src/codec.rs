//! Record payload encoding.
//!
//! Values travel as 8-byte big-endian IEEE-754 doubles, the same layout the
//! JVM `DoubleSerializer` writes, so other clients of the topic can read them.

use crate::error::BrokerError;
use bytes::Bytes;

/// Size of an encoded value in bytes.
pub const ENCODED_LEN: usize = 8;

/// Encodes a value as a record payload.
pub fn encode_value(value: f64) -> Bytes {
  Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Decodes a record payload into a value.
pub fn decode_value(payload: &[u8]) -> Result<f64, BrokerError> {
  let bytes: [u8; ENCODED_LEN] = payload.try_into().map_err(|_| BrokerError::Decode {
    expected: ENCODED_LEN,
    actual: payload.len(),
  })?;
  Ok(f64::from_be_bytes(bytes))
}
