//! Terminal response written by the server, one per connection.
//!
//! ```text
//! HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n
//! HTTP/1.1 400 BadDigest\r\n
//! ```

use crate::{HTTP_VERSION, ProtocolError};

/// Longest status line the client is willing to buffer.
pub const MAX_STATUS_LINE_LEN: usize = 1024;

/// Outcome of a chunk as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Body received in full and its digest matched.
    Ok,
    /// Body received in full but its digest did not match.
    BadDigest,
}

impl ResponseStatus {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadDigest => 400,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadDigest => "BadDigest",
        }
    }

    /// Full response bytes as written to the wire.
    pub fn encode(self) -> Vec<u8> {
        let status_line = format!("{HTTP_VERSION} {} {}\r\n", self.code(), self.reason());
        let text = match self {
            Self::Ok => format!("{status_line}Content-Length: 0\r\nConnection: close\r\n\r\n"),
            Self::BadDigest => status_line,
        };
        text.into_bytes()
    }

    /// Parses a status line (trailing CRLF optional).
    ///
    /// Any well-formed status other than `200` and `400 BadDigest` is
    /// reported as [`ProtocolError::UnexpectedStatus`].
    pub fn parse_status_line(line: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::InvalidStatusLine(String::from_utf8_lossy(line).into()))?
            .trim_end_matches(['\r', '\n']);

        let mut parts = text.splitn(3, ' ');
        let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
            return Err(ProtocolError::InvalidStatusLine(text.to_string()));
        };
        let reason = parts.next().unwrap_or_default().trim();

        if !version.starts_with("HTTP/1.") {
            return Err(ProtocolError::InvalidStatusLine(text.to_string()));
        }
        let code: u16 = code
            .parse()
            .map_err(|_| ProtocolError::InvalidStatusLine(text.to_string()))?;

        match code {
            200 => Ok(Self::Ok),
            400 if reason.eq_ignore_ascii_case("BadDigest") => Ok(Self::BadDigest),
            _ => Err(ProtocolError::UnexpectedStatus {
                code,
                reason: reason.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_bytes() {
        assert_eq!(
            ResponseStatus::Ok.encode(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn bad_digest_response_bytes() {
        assert_eq!(
            ResponseStatus::BadDigest.encode(),
            b"HTTP/1.1 400 BadDigest\r\n"
        );
    }

    #[test]
    fn parses_both_terminal_statuses() {
        assert_eq!(
            ResponseStatus::parse_status_line(b"HTTP/1.1 200 OK\r\n").unwrap(),
            ResponseStatus::Ok
        );
        assert_eq!(
            ResponseStatus::parse_status_line(b"HTTP/1.0 400 BadDigest").unwrap(),
            ResponseStatus::BadDigest
        );
    }

    #[test]
    fn other_statuses_are_unexpected() {
        assert!(matches!(
            ResponseStatus::parse_status_line(b"HTTP/1.1 400 Bad Request\r\n"),
            Err(ProtocolError::UnexpectedStatus { code: 400, .. })
        ));
        assert!(matches!(
            ResponseStatus::parse_status_line(b"HTTP/1.1 500 Internal Server Error\r\n"),
            Err(ProtocolError::UnexpectedStatus { code: 500, .. })
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            ResponseStatus::parse_status_line(b"hello"),
            Err(ProtocolError::InvalidStatusLine(_))
        ));
        assert!(matches!(
            ResponseStatus::parse_status_line(b"HTTP/1.1 abc OK"),
            Err(ProtocolError::InvalidStatusLine(_))
        ));
    }
}
