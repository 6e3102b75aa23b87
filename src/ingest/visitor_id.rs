use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Stable pseudonymous visitor identity: hex HMAC-SHA256 of the IP under `secret`.
///
/// The same IP maps to the same id for as long as the secret is unchanged, so
/// distinct-user counts stay consistent across arbitrary date ranges. Raw IPs
/// never reach `processed_views`.
pub fn visitor_id(ip: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(ip.trim().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(
            visitor_id("192.168.1.1", "secret"),
            visitor_id("192.168.1.1", "secret")
        );
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert_eq!(
            visitor_id(" 192.168.1.1\n", "secret"),
            visitor_id("192.168.1.1", "secret")
        );
    }

    #[test]
    fn test_different_secret_different_id() {
        assert_ne!(visitor_id("10.0.0.1", "a"), visitor_id("10.0.0.1", "b"));
    }

    #[test]
    fn test_hex_encoded() {
        let id = visitor_id("2001:db8::1", "secret");
        assert_eq!(id.len(), 64, "SHA-256 hex output is 64 chars");
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!id.contains("2001"));
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(visitor_id("", "").len(), 64);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Distinct IPv4 addresses never collide under the same secret.
        #[test]
        fn prop_unique_per_ip(
            suffix_a in 0u8..128u8,
            suffix_b in 128u8..=255u8,
            secret in "[A-Za-z0-9]{1,20}",
        ) {
            let a = visitor_id(&format!("10.0.0.{suffix_a}"), &secret);
            let b = visitor_id(&format!("10.0.0.{suffix_b}"), &secret);
            prop_assert_ne!(a, b);
        }
    }
}
