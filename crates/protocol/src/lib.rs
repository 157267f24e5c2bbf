//! Wire protocol for resumable chunk uploads.
//!
//! One chunk travels per request: a minimal HTTP/1.1-shaped preamble
//! followed by exactly `Content-Length` raw payload bytes. The server
//! answers with a single terminal status line.
//!
//! See [`preamble`] for the request layout and [`response`] for the
//! status lines.

pub mod digest;
pub mod preamble;
pub mod response;

pub use digest::{DIGEST_HEX_LEN, DigestHasher, Md5Digest};
pub use preamble::{ChunkRequest, PreambleScanner};
pub use response::ResponseStatus;

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Largest preamble the server will buffer before giving up (16 KiB).
pub const MAX_PREAMBLE_LEN: usize = 16 * 1024;

/// Protocol version written on request and status lines.
pub const HTTP_VERSION: &str = "HTTP/1.1";

pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_CONTENT_MD5: &str = "Content-MD5";
pub const HEADER_CONTENT_OFFSET: &str = "Content-Offset";
/// Whole-file digest; keys the server's staging entry.
pub const HEADER_CONTENT_FILE_MD5: &str = "Content-File-MD5";
pub const HEADER_USER_AGENT: &str = "User-Agent";

/// Errors produced while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid request target: {0}")]
    InvalidTarget(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("preamble exceeds {0} bytes")]
    PreambleTooLarge(usize),

    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("unexpected status: {code} {reason}")]
    UnexpectedStatus { code: u16, reason: String },
}
