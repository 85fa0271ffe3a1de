//! HMAC-SHA256 signing of outbound webhook payloads.
//!
//! The signature covers `"{unix_timestamp}.{body}"` and is sent hex-encoded in
//! `X-Webhook-Signature`, with the timestamp in `X-Webhook-Timestamp`.
//! Receivers use [`verify_webhook_signature`] to recompute it and enforce a
//! replay window.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex HMAC-SHA256 of `"{timestamp}.{body}"`.
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook signature as a subscriber would.
///
/// Rejects when the timestamp header does not parse, when
/// `|now - timestamp| > tolerance_secs`, or when the signature does not
/// match. The comparison is constant-time.
pub fn verify_webhook_signature(
    secret: &str,
    timestamp_header: &str,
    signature_header: &str,
    body: &[u8],
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    if signature_header.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let timestamp: i64 = timestamp_header
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp(timestamp_header.to_string()))?;

    let age_secs = now.timestamp() - timestamp;
    if age_secs.abs() > tolerance_secs {
        return Err(SignatureError::Expired {
            age_secs,
            tolerance_secs,
        });
    }

    let expected = compute_signature(secret, timestamp, body)?;
    let provided = signature_header.trim().to_ascii_lowercase();

    if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const SECRET: &str = "whsec_test_secret";
    const TS: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"event":"email.bounced","emailId":"m-1"}"#;
    const REFERENCE: &str = "3ded8e430cb4b27e80633da0460bfc34c1b4470ddffa523844b3fee975ca4b4d";

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn test_matches_reference_vector() {
        assert_eq!(compute_signature(SECRET, TS, BODY).unwrap(), REFERENCE);
    }

    #[test]
    fn test_any_key_length_signs() {
        let empty = compute_signature("", TS, BODY).unwrap();
        let long = compute_signature(&"k".repeat(512), TS, BODY).unwrap();
        assert_eq!(empty.len(), 64);
        assert_eq!(long.len(), 64);
        assert_ne!(empty, long);
    }

    #[test]
    fn test_verify_accepts_fresh_signature() {
        let result =
            verify_webhook_signature(SECRET, "1700000000", REFERENCE, BODY, 300, at(TS + 30));
        assert!(result.is_ok());
    }

    #[test]
    fn test_any_single_byte_mutation_fails() {
        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            let result =
                verify_webhook_signature(SECRET, "1700000000", REFERENCE, &mutated, 300, at(TS));
            assert_eq!(result, Err(SignatureError::Mismatch), "byte {i}");
        }
    }

    #[test]
    fn test_ten_minute_old_signature_rejected_with_five_minute_tolerance() {
        let now = at(TS) + Duration::minutes(10);
        let result = verify_webhook_signature(SECRET, "1700000000", REFERENCE, BODY, 300, now);
        assert!(matches!(result, Err(SignatureError::Expired { age_secs: 600, .. })));
    }

    #[test]
    fn test_future_timestamp_outside_window_rejected() {
        let now = at(TS) - Duration::minutes(6);
        let result = verify_webhook_signature(SECRET, "1700000000", REFERENCE, BODY, 300, now);
        assert!(matches!(result, Err(SignatureError::Expired { .. })));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let result =
            verify_webhook_signature("whsec_other", "1700000000", REFERENCE, BODY, 300, at(TS));
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        let result = verify_webhook_signature(SECRET, "yesterday", REFERENCE, BODY, 300, at(TS));
        assert!(matches!(result, Err(SignatureError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_empty_signature_rejected() {
        let result = verify_webhook_signature(SECRET, "1700000000", "", BODY, 300, at(TS));
        assert_eq!(result, Err(SignatureError::MissingSignature));
    }
}
