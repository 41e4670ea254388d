//! Event-feed delivery authentication.
//!
//! The normalizer signs every delivery body with HMAC-SHA256 over the raw
//! bytes, using the shared feed secret, and sends the result in the
//! `X-Robocat-Signature` header as `sha256=<hex>`. Authentication happens
//! before the body is parsed; a delivery failing it is rejected outright.
//!
//! Signatures are exactly 32 bytes on the wire. Truncated or padded hex is
//! rejected at parse time rather than left to the comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the feed signature.
pub const SIGNATURE_HEADER: &str = "x-robocat-signature";

const SCHEME_PREFIX: &str = "sha256=";

/// A parsed delivery signature (the 32-byte HMAC-SHA256 tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySignature([u8; 32]);

impl DeliverySignature {
    /// Parses a `sha256=<hex>` header value.
    ///
    /// Returns `None` for a missing scheme, non-hex input, or a tag that is
    /// not exactly 32 bytes.
    pub fn parse(header: &str) -> Option<Self> {
        let tag = hex::decode(header.strip_prefix(SCHEME_PREFIX)?).ok()?;
        Some(DeliverySignature(tag.try_into().ok()?))
    }

    /// Signs a delivery body with the feed secret.
    pub fn sign(body: &[u8], secret: &[u8]) -> Self {
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
        mac.update(body);
        DeliverySignature(mac.finalize().into_bytes().into())
    }

    /// Renders the signature as a header value.
    pub fn to_header_value(&self) -> String {
        format!("{SCHEME_PREFIX}{}", hex::encode(self.0))
    }

    /// Constant-time check that this signature belongs to `body` under
    /// `secret` (the comparison is done inside the HMAC library).
    pub fn matches(&self, body: &[u8], secret: &[u8]) -> bool {
        let mut mac = match HmacSha256::new_from_slice(secret) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(body);
        mac.verify_slice(&self.0).is_ok()
    }
}

/// Authenticates one delivery: header present, well-formed, and matching
/// the body under the feed secret.
pub fn authenticate_delivery(header: Option<&str>, body: &[u8], secret: &[u8]) -> bool {
    match header.and_then(DeliverySignature::parse) {
        Some(signature) => signature.matches(body, secret),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &[u8] = b"feed-secret";

    /// A realistic normalized-event delivery body.
    fn event_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "mr_id": 42,
            "kind": "mr_note_added",
            "author": "alice",
            "body": "@workflow-robocat process",
        }))
        .unwrap()
    }

    #[test]
    fn signed_delivery_authenticates() {
        let body = event_body();
        let header = DeliverySignature::sign(&body, SECRET).to_header_value();
        assert!(authenticate_delivery(Some(&header), &body, SECRET));
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(!authenticate_delivery(None, &event_body(), SECRET));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = event_body();
        let header = DeliverySignature::sign(&body, b"other-secret").to_header_value();
        assert!(!authenticate_delivery(Some(&header), &body, SECRET));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = event_body();
        let header = DeliverySignature::sign(&body, SECRET).to_header_value();
        // A replayed signature over a command-injecting body must not pass.
        let forged = body
            .iter()
            .map(|&b| if b == b'p' { b'q' } else { b })
            .collect::<Vec<u8>>();
        assert!(!authenticate_delivery(Some(&header), &forged, SECRET));
    }

    #[test]
    fn malformed_headers_are_rejected_at_parse() {
        for bad in [
            "",
            "sha256=",
            "sha256=zz",
            "sha256=abcd",                       // well-formed hex, wrong length
            "sha1=0000",                         // wrong scheme
            &hex::encode([0u8; 32]),             // missing scheme
            &format!("sha256={}", "a".repeat(65)), // odd length
            &format!("sha256={}", "a".repeat(66)), // 33 bytes
        ] {
            assert!(
                DeliverySignature::parse(bad).is_none(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn header_value_roundtrips() {
        let signature = DeliverySignature::sign(&event_body(), SECRET);
        let parsed = DeliverySignature::parse(&signature.to_header_value()).unwrap();
        assert_eq!(parsed, signature);
    }

    proptest! {
        /// Any body signed with the feed secret authenticates with it, and
        /// only with it.
        #[test]
        fn signing_authenticates_exactly_one_secret(
            body: Vec<u8>,
            other in proptest::collection::vec(any::<u8>(), 1..32),
        ) {
            prop_assume!(other.as_slice() != SECRET);
            let header = DeliverySignature::sign(&body, SECRET).to_header_value();
            prop_assert!(authenticate_delivery(Some(&header), &body, SECRET));
            prop_assert!(!authenticate_delivery(Some(&header), &body, &other));
        }

        /// Flipping any single byte of the delivery invalidates it.
        #[test]
        fn any_single_byte_flip_is_rejected(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let header = DeliverySignature::sign(&body, SECRET).to_header_value();
            let mut forged = body.clone();
            let at = index.index(forged.len());
            forged[at] ^= flip;
            prop_assert!(!authenticate_delivery(Some(&header), &forged, SECRET));
        }

        /// Arbitrary header garbage never panics and never authenticates a
        /// body it was not computed for.
        #[test]
        fn garbage_headers_never_authenticate(header: String, body: Vec<u8>) {
            prop_assume!(
                DeliverySignature::parse(&header)
                    != Some(DeliverySignature::sign(&body, SECRET))
            );
            prop_assert!(!authenticate_delivery(Some(&header), &body, SECRET));
        }
    }
}
