//! Payload integrity MAC
//!
//! HMAC-SHA256 over a canonical stringification of the metadata document:
//! object keys sorted, arrays order-preserving, no insignificant whitespace.
//! The stored MAC is verified on every job reload; comparison is constant
//! time via the `hmac` verifier.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::types::VectorMetadata;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum MacError {
    #[error("Metadata payload MAC mismatch")]
    Mismatch,

    #[error("Metadata serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Canonical JSON: objects emitted with sorted keys, arrays in order.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex-encoded HMAC-SHA256 of the canonical metadata serialization.
pub fn compute_mac(key: &[u8], meta: &VectorMetadata) -> Result<String, MacError> {
    let value = serde_json::to_value(meta)?;
    let canonical = canonical_json(&value);

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(canonical.as_bytes());
    let tag = mac.finalize().into_bytes();
    Ok(hex_encode(&tag))
}

/// Constant-time verification of a stored hex MAC.
pub fn verify_mac(key: &[u8], meta: &VectorMetadata, stored: &str) -> Result<(), MacError> {
    let value = serde_json::to_value(meta)?;
    let canonical = canonical_json(&value);

    let Some(tag) = hex_decode(stored) else {
        return Err(MacError::Mismatch);
    };

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&tag).map_err(|_| MacError::Mismatch)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> VectorMetadata {
        serde_json::from_value(json!({
            "sourcePdfKey": "documents/original/x.pdf",
            "ticketCrop": { "xRatio": 0.1, "yRatio": 0.1,
                            "widthRatio": 0.8, "heightRatio": 0.6 },
            "layout": { "totalPages": 2, "repeatPerPage": 1 }
        }))
        .unwrap()
    }

    #[test]
    fn canonical_sorts_object_keys() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [3, 1]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":[3,1],"d":2},"b":1}"#);
    }

    #[test]
    fn roundtrip_verifies() {
        let meta = sample();
        let mac = compute_mac(b"secret", &meta).unwrap();
        assert!(verify_mac(b"secret", &meta, &mac).is_ok());
    }

    #[test]
    fn tamper_is_detected() {
        let meta = sample();
        let mac = compute_mac(b"secret", &meta).unwrap();

        let mut tampered = meta.clone();
        tampered.layout.total_pages = 3;
        assert!(matches!(
            verify_mac(b"secret", &tampered, &mac),
            Err(MacError::Mismatch)
        ));
        assert!(matches!(
            verify_mac(b"other-key", &meta, &mac),
            Err(MacError::Mismatch)
        ));
        assert!(matches!(
            verify_mac(b"secret", &meta, "zz-not-hex"),
            Err(MacError::Mismatch)
        ));
    }

    #[test]
    fn mac_is_stable_across_reserialization() {
        let meta = sample();
        let reparsed: VectorMetadata =
            serde_json::from_str(&serde_json::to_string(&meta).unwrap()).unwrap();
        assert_eq!(
            compute_mac(b"k", &meta).unwrap(),
            compute_mac(b"k", &reparsed).unwrap()
        );
    }
}
