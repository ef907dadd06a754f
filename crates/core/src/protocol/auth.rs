//! Basic authentication (RFC 2326 §11.1, RFC 2617): realm `rtsp`.

use base64::Engine;

use crate::protocol::response::RtspResponse;

pub const REALM: &str = "rtsp";

/// Decoded `username:password` from a `Basic` `Authorization` header.
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Parse an `Authorization: Basic <base64>` header value.
pub fn decode_basic(header: &str) -> Option<Credentials> {
    let encoded = header.trim().strip_prefix("Basic ")?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// 401 with the `WWW-Authenticate` challenge.
pub fn challenge(cseq: &str) -> RtspResponse {
    RtspResponse::new(401, "Unauthorized")
        .add_header("CSeq", cseq)
        .add_header("WWW-Authenticate", &format!("Basic realm=\"{REALM}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_basic_header() {
        // "alice:secret" base64-encoded
        let header = "Basic YWxpY2U6c2VjcmV0";
        let creds = decode_basic(header).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn rejects_non_basic_scheme() {
        assert!(decode_basic("Digest abcdef").is_none());
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(decode_basic("Basic not-base64!!").is_none());
    }
}
