//! Envelope codec: raw gateway frame bytes to [`Envelope`].
//!
//! Decoding also normalizes the message body: any `null` left inside
//! untyped body content is removed, so consumers with strict schemas are
//! never handed a null.

use serde_json::{Map, Value};

use crate::envelope::{Envelope, MsgBody};
use crate::error::MahiroResult;

/// Decode one gateway frame.
pub fn decode(raw: &[u8]) -> MahiroResult<Envelope> {
    let mut envelope: Envelope = serde_json::from_slice(raw)?;
    if let Some(body) = envelope.current_packet.event_data.msg_body.as_mut() {
        normalize_body(body);
    }
    Ok(envelope)
}

/// Decode one text frame.
pub fn decode_str(raw: &str) -> MahiroResult<Envelope> {
    decode(raw.as_bytes())
}

fn normalize_body(body: &mut MsgBody) {
    for items in [body.at_uin_lists.as_mut(), body.images.as_mut()].into_iter().flatten() {
        items.retain(|v| !v.is_null());
        for item in items.iter_mut() {
            strip_nulls(item);
        }
    }
    strip_nulls_in_map(&mut body.extra);
}

/// Recursively remove `null` object members and `null` array items.
pub fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => strip_nulls_in_map(map),
        Value::Array(items) => {
            items.retain(|v| !v.is_null());
            for item in items.iter_mut() {
                strip_nulls(item);
            }
        }
        _ => {}
    }
}

fn strip_nulls_in_map(map: &mut Map<String, Value>) {
    map.retain(|_, v| !v.is_null());
    for v in map.values_mut() {
        strip_nulls(v);
    }
}
