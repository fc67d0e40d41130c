//! Wire format for the confd UDP protocol: `[4-byte magic][JSON
//! {msg, salt, hmac}]`, signed with HMAC-SHA1 over `salt || canonical(msg)`
//! using the cluster's shared key. Canonicalization sorts object keys
//! recursively so the same logical message always hashes the same way
//! regardless of field insertion order.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

/// 4 ASCII bytes identifying this protocol's datagrams, distinct from
/// whatever a stray UDP packet on the same port might carry.
pub const MAGIC: &[u8; 4] = b"GCFD";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("datagram shorter than the magic prefix")]
    Truncated,
    #[error("bad magic prefix")]
    BadMagic,
    #[error("malformed envelope json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hmac verification failed")]
    HmacMismatch,
    #[error("salt is not a valid unix timestamp")]
    BadSalt,
    #[error("salt outside clock skew tolerance")]
    ClockSkew,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Envelope {
    pub msg: Value,
    pub salt: String,
    pub hmac: String,
}

/// Recursively sort JSON object keys and render compactly. Arrays keep
/// their order — only object key order is ambiguous on the wire.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered: BTreeMap<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), sorted(v))).collect();
                Value::Object(ordered.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sorted(value)).expect("serializing a Value cannot fail")
}

fn hmac_hex(key: &[u8], salt: &str, msg_canonical: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(salt.as_bytes());
    mac.update(msg_canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build a signed, magic-prefixed datagram for `msg` with a fresh salt
/// (seconds since epoch, as a string).
pub fn encode(key: &[u8], msg: &Value, salt: &str) -> Vec<u8> {
    let canonical = canonical_json(msg);
    let hmac = hmac_hex(key, salt, &canonical);
    let envelope = serde_json::json!({ "msg": msg, "salt": salt, "hmac": hmac });
    let body = serde_json::to_vec(&envelope).expect("serializing a Value cannot fail");
    let mut out = Vec::with_capacity(MAGIC.len() + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&body);
    out
}

/// Parse, verify, and clock-check a raw datagram. Returns the verified
/// `Envelope` on success; any failure is reported distinctly but the
/// caller's job is the same in every case: drop the datagram silently.
pub fn decode_and_verify(
    buf: &[u8],
    key: &[u8],
    now_epoch_secs: i64,
    clock_skew_secs: i64,
) -> Result<Envelope, ProtocolError> {
    if buf.len() < MAGIC.len() {
        return Err(ProtocolError::Truncated);
    }
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let envelope: Envelope = serde_json::from_slice(&buf[MAGIC.len()..])?;

    let expected = hmac_hex(key, &envelope.salt, &canonical_json(&envelope.msg));
    if !constant_time_eq(expected.as_bytes(), envelope.hmac.as_bytes()) {
        return Err(ProtocolError::HmacMismatch);
    }

    let salt_secs: i64 = envelope.salt.parse().map_err(|_| ProtocolError::BadSalt)?;
    if (salt_secs - now_epoch_secs).abs() > clock_skew_secs {
        return Err(ProtocolError::ClockSkew);
    }

    Ok(envelope)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_ignores_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let key = b"cluster-secret";
        let msg = json!({"type": "Ping"});
        let salt = now_epoch_secs().to_string();
        let datagram = encode(key, &msg, &salt);

        let env = decode_and_verify(&datagram, key, now_epoch_secs(), 300).unwrap();
        assert_eq!(env.msg, msg);
        assert_eq!(env.salt, salt);
    }

    #[test]
    fn wrong_key_fails_hmac() {
        let msg = json!({"type": "Ping"});
        let salt = now_epoch_secs().to_string();
        let datagram = encode(b"right-key", &msg, &salt);

        let err = decode_and_verify(&datagram, b"wrong-key", now_epoch_secs(), 300).unwrap_err();
        assert!(matches!(err, ProtocolError::HmacMismatch));
    }

    #[test]
    fn salt_outside_clock_skew_is_rejected() {
        let key = b"cluster-secret";
        let msg = json!({"type": "Ping"});
        let old_salt = (now_epoch_secs() - 10_000).to_string();
        let datagram = encode(key, &msg, &old_salt);

        let err = decode_and_verify(&datagram, key, now_epoch_secs(), 300).unwrap_err();
        assert!(matches!(err, ProtocolError::ClockSkew));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut datagram = encode(b"k", &json!({}), "0");
        datagram[0] = b'X';
        let err = decode_and_verify(&datagram, b"k", 0, 300).unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic));
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        let err = decode_and_verify(&[0u8; 2], b"k", 0, 300).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }
}
