//! Pagination tokens.
//!
//! A token is the URL-safe base64 form of a big-endian scan offset. It is
//! positional only: rows inserted or removed between pages shift the window.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{Result, StoreError};

/// Encode a scan offset as an opaque token.
pub fn encode_token(offset: u64) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_be_bytes())
}

/// Decode a token back into its scan offset.
pub fn decode_token(token: &str) -> Result<u64> {
    let invalid = || StoreError::InvalidCursor(format!("'{token}' is not a pagination token"));

    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| invalid())?;
    let offset = u64::from_be_bytes(bytes);

    // Offsets are bound as signed 64-bit values.
    if offset > i64::MAX as u64 {
        return Err(invalid());
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        for offset in [0, 1, 10, 1 << 40, i64::MAX as u64] {
            assert_eq!(decode_token(&encode_token(offset)).unwrap(), offset);
        }
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = encode_token(u32::MAX as u64 * 977);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let beyond_signed = encode_token(u64::MAX);
        for bad in ["", "!!!", "AAAA", "AAAAAAAAAAAAAAA", beyond_signed.as_str()] {
            assert!(
                matches!(decode_token(bad), Err(StoreError::InvalidCursor(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
