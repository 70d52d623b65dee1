//! `data:` URL decoding (RFC 2397). The protocol step that hands back
//! inline content only says "decode inline" without naming an encoding;
//! both encodings the RFC allows are implemented, since real feeds embed
//! both favicon data URLs (usually base64) and small inline SVGs (often
//! percent-encoded).

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::FetchError;

const DEFAULT_MEDIA_TYPE: &str = "text/plain;charset=US-ASCII";

/// Decode a `data:` URL into its raw bytes and media type.
pub fn decode_data_url(url: &str) -> Result<(Vec<u8>, String), FetchError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::DataUrl("missing data: scheme".to_string()))?;

    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::DataUrl("missing comma separator".to_string()))?;

    let is_base64 = meta.ends_with(";base64");
    let media_type = meta.strip_suffix(";base64").unwrap_or(meta);
    let media_type = if media_type.is_empty() {
        DEFAULT_MEDIA_TYPE.to_string()
    } else {
        media_type.to_string()
    };

    let bytes = if is_base64 {
        STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| FetchError::DataUrl(format!("invalid base64 payload: {e}")))?
    } else {
        percent_decode(payload)
    };

    Ok((bytes, media_type))
}

/// Percent-decode a data: URL payload. `+` is left literal (unlike query
/// strings) per RFC 2397, which only recognizes `%XX` escapes.
fn percent_decode(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex_str) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex_str, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_data_url() {
        let (bytes, media_type) = decode_data_url("data:text/plain;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(media_type, "text/plain");
    }

    #[test]
    fn decodes_percent_encoded_data_url() {
        let (bytes, media_type) = decode_data_url("data:text/plain,hello%20world").unwrap();
        assert_eq!(bytes, b"hello world");
        assert_eq!(media_type, "text/plain");
    }

    #[test]
    fn defaults_media_type_when_absent() {
        let (bytes, media_type) = decode_data_url("data:,hi").unwrap();
        assert_eq!(bytes, b"hi");
        assert_eq!(media_type, DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn rejects_missing_comma() {
        assert!(decode_data_url("data:text/plain;base64").is_err());
    }
}
