use crate::compress::Encoding;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::time::Duration;

pub const GRPC_TIMEOUT: &str = "grpc-timeout";
pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timeout must be 1-8 digits with no leading zero followed by one of H, M, S, m, u, n")]
pub struct TimeoutParseError;

/// Parse a `grpc-timeout` header value: 1-8 decimal digits followed by a
/// unit letter (hours, minutes, seconds, milli, micro, nano).
pub fn parse_timeout(value: &str) -> Result<Duration, TimeoutParseError> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return Err(TimeoutParseError);
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimeoutParseError);
    }
    let n: u64 = digits.parse().map_err(|_| TimeoutParseError)?;
    match unit {
        "H" => Ok(Duration::from_secs(n * 3600)),
        "M" => Ok(Duration::from_secs(n * 60)),
        "S" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_millis(n)),
        "u" => Ok(Duration::from_micros(n)),
        "n" => Ok(Duration::from_nanos(n)),
        _ => Err(TimeoutParseError),
    }
}

/// Scan an accept-encoding style header and pick the response encoding.
/// Gzip wins whenever it appears, no matter where in the list; identity
/// only when gzip is absent. Unknown tokens are skipped.
pub fn negotiate_accept_encoding(header: &str) -> Option<Encoding> {
    let mut saw_identity = false;
    for token in header.split([',', ' ']) {
        match token.split(';').next().unwrap_or("").trim() {
            "gzip" => return Some(Encoding::Gzip),
            "identity" => saw_identity = true,
            _ => {}
        }
    }
    saw_identity.then_some(Encoding::Identity)
}

/// Percent-encode a `grpc-message` value: every byte outside printable
/// ASCII, and `%` itself, becomes `%XX` with upper-case hex.
pub fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &byte in message.as_bytes() {
        if (0x20..=0x7E).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`percent_encode`]. Malformed escapes pass through as-is.
pub fn percent_decode(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// Encode a binary trailer value: base64 URL-safe, padding stripped.
pub fn encode_bin(value: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(value)
}

/// Decode a binary trailer value.
pub fn decode_bin(value: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_timeout_units() {
        assert_eq!(parse_timeout("2H").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_timeout("3M").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_timeout("10S").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_timeout("250m").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_timeout("15u").unwrap(), Duration::from_micros(15));
        assert_eq!(parse_timeout("500n").unwrap(), Duration::from_nanos(500));
    }

    #[test]
    fn test_parse_timeout_rejects_malformed() {
        for bad in [
            "", "S", "10", "abc", "1.5S", "-1S", "01S", "0S", "123456789S", "10s", "10 S",
            "10Sx", "１0S",
        ] {
            assert!(parse_timeout(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_parse_timeout_max_digits() {
        assert_eq!(
            parse_timeout("99999999S").unwrap(),
            Duration::from_secs(99_999_999)
        );
    }

    #[test]
    fn test_negotiate_prefers_gzip_anywhere() {
        assert_eq!(negotiate_accept_encoding("gzip"), Some(Encoding::Gzip));
        assert_eq!(
            negotiate_accept_encoding("identity, gzip"),
            Some(Encoding::Gzip)
        );
        assert_eq!(
            negotiate_accept_encoding("identity,deflate,gzip"),
            Some(Encoding::Gzip)
        );
        assert_eq!(
            negotiate_accept_encoding("gzip;q=0.5, identity"),
            Some(Encoding::Gzip)
        );
    }

    #[test]
    fn test_negotiate_identity_fallback() {
        assert_eq!(
            negotiate_accept_encoding("identity"),
            Some(Encoding::Identity)
        );
        assert_eq!(
            negotiate_accept_encoding("deflate, identity"),
            Some(Encoding::Identity)
        );
        assert_eq!(negotiate_accept_encoding("deflate, br"), None);
        assert_eq!(negotiate_accept_encoding(""), None);
    }

    #[test]
    fn test_percent_encode_printable_untouched() {
        assert_eq!(percent_encode("ok then"), "ok then");
        assert_eq!(percent_encode("100%"), "100%25");
        assert_eq!(percent_encode("line\nbreak"), "line%0Abreak");
        assert_eq!(percent_encode("caf\u{e9}"), "caf%C3%A9");
    }

    #[test]
    fn test_percent_decode_malformed_passthrough() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%2"), "%2");
        assert_eq!(percent_decode("a%20b"), "a b");
    }

    #[test]
    fn test_bin_values_have_no_padding() {
        let encoded = encode_bin(b"\x08\x03\x12\x05oops!");
        assert!(!encoded.contains('='));
        assert_eq!(decode_bin(&encoded).unwrap(), b"\x08\x03\x12\x05oops!");
    }

    proptest! {
        #[test]
        fn prop_timeout_round_trip(n in 1u64..=99_999_999, unit in prop::sample::select(vec!['H', 'M', 'S', 'm', 'u', 'n'])) {
            let parsed = parse_timeout(&format!("{n}{unit}")).unwrap();
            let expected = match unit {
                'H' => Duration::from_secs(n * 3600),
                'M' => Duration::from_secs(n * 60),
                'S' => Duration::from_secs(n),
                'm' => Duration::from_millis(n),
                'u' => Duration::from_micros(n),
                'n' => Duration::from_nanos(n),
                _ => unreachable!(),
            };
            prop_assert_eq!(parsed, expected);
        }

        #[test]
        fn prop_timeout_rejects_bad_units(n in 1u64..=99_999_999, unit in "[^HMSmun]") {
            let s = format!("{}{}", n, unit);
            prop_assert!(parse_timeout(&s).is_err());
        }

        #[test]
        fn prop_percent_encoding_inverse(message in ".*") {
            prop_assert_eq!(percent_decode(&percent_encode(&message)), message);
        }

        #[test]
        fn prop_bin_round_trip(value in prop::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(decode_bin(&encode_bin(&value)).unwrap(), value);
        }
    }
}
