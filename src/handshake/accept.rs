//! Handshake validation and accept-token derivation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

use super::request::HandshakeRequest;

/// GUID appended to the client key before hashing (RFC 6455, section 1.3)
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Why a handshake was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `Sec-WebSocket-Key` absent, empty, or containing whitespace
    MissingOrMalformedKey,
    /// Upgrade requests must use GET
    NonGetRequest,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingOrMalformedKey => "missing or malformed key",
            RejectReason::NonGetRequest => "non-GET request",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating an opening handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    Accepted { accept_token: String },
    Rejected { reason: RejectReason },
}

impl HandshakeResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HandshakeResponse::Accepted { .. })
    }

    /// The `Sec-WebSocket-Accept` value, when accepted
    pub fn accept_token(&self) -> Option<&str> {
        match self {
            HandshakeResponse::Accepted { accept_token } => Some(accept_token),
            HandshakeResponse::Rejected { .. } => None,
        }
    }

    /// Render the HTTP response head to write back to the client
    pub fn to_http(&self) -> String {
        match self {
            HandshakeResponse::Accepted { accept_token } => format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\r\n",
                accept_token
            ),
            HandshakeResponse::Rejected { reason } => {
                plain_response("400 Bad Request", reason.as_str())
            }
        }
    }
}

/// Response sent when the registry cannot take another client
pub fn capacity_response() -> String {
    plain_response("503 Service Unavailable", "connection limit reached")
}

fn plain_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// Compute the `Sec-WebSocket-Accept` token for a client key
///
/// The digest is taken over the raw bytes of `key ++ GUID` and the raw
/// 20-byte digest is base64 encoded. Encoding the hex form of the digest
/// yields a token no client will accept.
pub fn derive_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    STANDARD.encode(digest)
}

/// Decide whether to accept a handshake request
pub fn validate(request: &HandshakeRequest) -> HandshakeResponse {
    if request.method != "GET" {
        return HandshakeResponse::Rejected {
            reason: RejectReason::NonGetRequest,
        };
    }

    match request.requested_accept_key.as_deref() {
        Some(key) if is_well_formed_key(key) => HandshakeResponse::Accepted {
            accept_token: derive_accept_key(key),
        },
        _ => HandshakeResponse::Rejected {
            reason: RejectReason::MissingOrMalformedKey,
        },
    }
}

fn is_well_formed_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(method: &str, key: Option<&str>) -> HandshakeRequest {
        HandshakeRequest {
            method: method.to_string(),
            path: "/".to_string(),
            headers: HashMap::new(),
            requested_accept_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_accept_key_reference_value() {
        let token = derive_accept_key("GDN8ER3kHvtKUji+V25xZA==");
        assert_eq!(token, "Q7OtfGm6dCMsl1vS3Loep/lYFYQ=");
        // same input, same token
        assert_eq!(derive_accept_key("GDN8ER3kHvtKUji+V25xZA=="), token);
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(
            derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_hex_encoded_digest_is_wrong() {
        let key = "GDN8ER3kHvtKUji+V25xZA==";
        let mut hasher = Sha1::new();
        hasher.update(format!("{}{}", key, WEBSOCKET_GUID).as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "43b3ad7c69ba74232c975bd2dcba1ea7f9581584");

        let from_hex = STANDARD.encode(hex.as_bytes());
        assert_eq!(
            from_hex,
            "NDNiM2FkN2M2OWJhNzQyMzJjOTc1YmQyZGNiYTFlYTdmOTU4MTU4NA=="
        );
        assert_ne!(from_hex, derive_accept_key(key));
    }

    #[test]
    fn test_validate_accepts_good_key() {
        let response = validate(&request("GET", Some("dGhlIHNhbXBsZSBub25jZQ==")));
        assert!(response.is_accepted());
        assert_eq!(response.accept_token(), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn test_validate_rejects_missing_or_malformed_key() {
        for key in [None, Some(""), Some("has space"), Some("tab\there")] {
            let response = validate(&request("GET", key));
            assert_eq!(
                response,
                HandshakeResponse::Rejected {
                    reason: RejectReason::MissingOrMalformedKey
                },
                "key {:?}",
                key
            );
        }
    }

    #[test]
    fn test_validate_rejects_non_get() {
        let response = validate(&request("POST", Some("dGhlIHNhbXBsZSBub25jZQ==")));
        assert_eq!(
            response,
            HandshakeResponse::Rejected {
                reason: RejectReason::NonGetRequest
            }
        );
    }

    #[test]
    fn test_http_rendering() {
        let accepted = HandshakeResponse::Accepted {
            accept_token: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_string(),
        };
        let http = accepted.to_http();
        assert!(http.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(http.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(http.ends_with("\r\n\r\n"));

        let rejected = HandshakeResponse::Rejected {
            reason: RejectReason::MissingOrMalformedKey,
        };
        let http = rejected.to_http();
        assert!(http.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(http.ends_with("missing or malformed key"));

        assert!(capacity_response().starts_with("HTTP/1.1 503"));
    }
}
