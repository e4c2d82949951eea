//! HTTP upgrade exchange: the client request, the server's validation and
//! response, and the client's parsing of the server's response. See §4.B.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

/// Default cap on handshake size before decoding even begins (§4.B, §6).
pub const HANDSHAKE_MAXLENGTH: usize = 8192;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generate a random 16-byte `Sec-WebSocket-Key`, base64-encoded. Uses a
/// cryptographically strong RNG per §9's design note (the source this spec
/// is distilled from uses a weak generator over the printable range).
pub fn generate_sec_key() -> String {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

/// Compute the `Sec-WebSocket-Accept` value for a given client key.
pub fn accept_token(sec_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sec_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the client's upgrade request.
pub fn client_request(host: &str, port: u16, path: &str, sec_key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {sec_key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// A minimal case-insensitive header lookup over a parsed request/response.
struct Headers<'a> {
    lines: Vec<(&'a str, &'a str)>,
}

impl<'a> Headers<'a> {
    fn parse(block: &'a str) -> Self {
        let lines = block
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();
        Headers { lines }
    }

    fn get(&self, name: &str) -> Option<&'a str> {
        self.lines
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    }
}

/// A validated client upgrade request, ready for the server to accept or
/// deny.
#[derive(Debug, Clone)]
pub struct ClientUpgradeRequest {
    pub path: String,
    pub sec_key: String,
}

/// Parse and validate an inbound HTTP upgrade request. Returns the
/// information the server needs to build `Sec-WebSocket-Accept`, or the
/// specific validation failure (the caller maps this to an HTTP status: per
/// §4.B, missing Upgrade/Connection/Key ⇒ 400, missing GET ⇒ 405, wrong
/// version ⇒ 426).
pub fn validate_request(block: &str) -> Result<ClientUpgradeRequest, HandshakeError> {
    let mut lines = block.lines();
    let request_line = lines.next().ok_or(HandshakeError::MalformedStartLine)?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(HandshakeError::MalformedStartLine)?;
    let path = parts.next().ok_or(HandshakeError::MalformedStartLine)?;
    if method != "GET" {
        return Err(HandshakeError::WrongMethod);
    }

    let headers = Headers::parse(block);

    if headers.get("Host").is_none() {
        return Err(HandshakeError::MissingHeader("Host"));
    }
    if !headers
        .get("Upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(HandshakeError::MissingHeader("Upgrade"));
    }
    if !headers.contains_token("Connection", "upgrade") {
        return Err(HandshakeError::MissingHeader("Connection"));
    }
    let sec_key = headers
        .get("Sec-WebSocket-Key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
    match headers.get("Sec-WebSocket-Version") {
        Some("13") => {}
        Some(_) => return Err(HandshakeError::WrongVersion),
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
    }

    Ok(ClientUpgradeRequest {
        path: path.to_string(),
        sec_key: sec_key.to_string(),
    })
}

/// Build the `101 Switching Protocols` response.
pub fn server_accept_response(sec_key: &str, server_id: &str, protocol: Option<&str>) -> String {
    let accept = accept_token(sec_key);
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Server: {server_id}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );
    if let Some(proto) = protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
    }
    response.push_str("\r\n");
    response
}

/// Build an HTTP error response body for a failed/denied handshake, per
/// §6's template (`%errorCode%`, `%errorString%`, `%serverIdentifier%`).
pub fn error_response(code: u16, reason: &str, server_id: &str) -> String {
    let body = format!(
        "<html><body><h1>{code} {reason}</h1><p>served by {server_id}</p></body></html>\r\n"
    );
    format!("HTTP/1.1 {code} {reason}\r\nServer: {server_id}\r\n\r\n{body}\r\n")
}

/// Parse the server's response status line + headers and confirm the
/// handshake was accepted (status 101) and the accept token matches.
pub fn validate_response(block: &str, sec_key: &str) -> Result<(), HandshakeError> {
    let mut lines = block.lines();
    let status_line = lines.next().ok_or(HandshakeError::MalformedStartLine)?;
    let mut parts = status_line.split_whitespace();
    let _http_version = parts.next().ok_or(HandshakeError::MalformedStartLine)?;
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(HandshakeError::MalformedStartLine)?;

    if status != 101 {
        return Err(HandshakeError::Denied(status));
    }

    let headers = Headers::parse(block);
    let accept = headers
        .get("Sec-WebSocket-Accept")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
    if accept != accept_token(sec_key) {
        return Err(HandshakeError::AcceptMismatch);
    }
    Ok(())
}

/// Locate the `\r\n\r\n` terminator of an HTTP block within `buf`. Returns
/// the index one past the terminator (i.e. where trailing bytes begin).
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_accept_token() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(
            accept_token("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn client_request_shape() {
        let req = client_request("example.com", 80, "/x", "abc123");
        assert!(req.starts_with("GET /x HTTP/1.1\r\nHost: example.com:80\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: abc123\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn validates_well_formed_request() {
        let req = client_request("h", 80, "/x", "key==");
        let parsed = validate_request(&req).unwrap();
        assert_eq!(parsed.path, "/x");
        assert_eq!(parsed.sec_key, "key==");
    }

    #[test]
    fn rejects_missing_upgrade_header() {
        let req = "GET / HTTP/1.1\r\nHost: h\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(
            validate_request(req),
            Err(HandshakeError::MissingHeader("Upgrade"))
        ));
    }

    #[test]
    fn rejects_wrong_method() {
        let req = "POST / HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(validate_request(req), Err(HandshakeError::WrongMethod)));
    }

    #[test]
    fn rejects_wrong_version() {
        let req = "GET / HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 8\r\n\r\n";
        assert!(matches!(validate_request(req), Err(HandshakeError::WrongVersion)));
    }

    #[test]
    fn server_response_roundtrips_with_client_validation() {
        let key = generate_sec_key();
        let response = server_accept_response(&key, "wsproto/0.1", None);
        validate_response(&response, &key).unwrap();
    }

    #[test]
    fn client_rejects_non_101_status() {
        let response = "HTTP/1.1 404 Not Found\r\n\r\n";
        assert!(matches!(
            validate_response(response, "k"),
            Err(HandshakeError::Denied(404))
        ));
    }

    #[test]
    fn terminator_is_found_with_trailing_bytes() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n".to_vec();
        buf.extend_from_slice(b"trailing");
        let idx = find_terminator(&buf).unwrap();
        assert_eq!(&buf[idx..], b"trailing");
    }
}
