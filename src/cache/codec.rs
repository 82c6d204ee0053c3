//! Value Codec
//!
//! Byte encoding used by the Redis and file backends. Scalars are stored as
//! JSON text; arrays and objects as MessagePack. The first byte tags which.

use serde_json::Value;

use crate::error::{CacheError, Result};

const TAG_JSON: u8 = b'j';
const TAG_MSGPACK: u8 = b'm';

pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match value {
        Value::Array(_) | Value::Object(_) => {
            out.push(TAG_MSGPACK);
            out.extend(rmp_serde::to_vec(value)?);
        }
        _ => {
            out.push(TAG_JSON);
            out.extend(serde_json::to_vec(value)?);
        }
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Value> {
    match bytes.split_first() {
        Some((&TAG_JSON, body)) => Ok(serde_json::from_slice(body)?),
        Some((&TAG_MSGPACK, body)) => Ok(rmp_serde::from_slice(body)?),
        Some((tag, _)) => Err(CacheError::Serialization(format!(
            "Unknown value tag 0x{:02x}",
            tag
        ))),
        None => Err(CacheError::Serialization("Empty value".to_string())),
    }
}
