//! Request preamble: request line plus headers, terminated by a blank line.
//!
//! ```text
//! POST /<file-name> HTTP/1.1\r\n
//! Content-Length: <chunk-byte-length>\r\n
//! Content-MD5: <32 hex chunk digest>\r\n
//! Content-Offset: <byte offset of chunk within file>\r\n
//! Content-File-MD5: <32 hex whole-file digest>\r\n     (optional)
//! User-Agent: <client identifier>\r\n
//! \r\n
//! <exactly Content-Length raw bytes>
//! ```

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use crate::digest::Md5Digest;
use crate::{
    HEADER_CONTENT_FILE_MD5, HEADER_CONTENT_LENGTH, HEADER_CONTENT_MD5, HEADER_CONTENT_OFFSET,
    HEADER_USER_AGENT, HTTP_VERSION, MAX_PREAMBLE_LEN, ProtocolError,
};

/// Blank-line terminator that ends the preamble.
pub const PREAMBLE_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Characters escaped in a request-target segment. `/` is kept as the
/// path separator.
const TARGET_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Typed chunk request metadata carried by the preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Destination name, host-relative, `/`-separated, already decoded.
    pub file_name: String,
    /// Exact number of body bytes following the preamble.
    pub content_length: u64,
    /// Digest of the body bytes.
    pub content_md5: Md5Digest,
    /// Byte offset of the body within the destination file.
    pub content_offset: u64,
    /// Digest of the whole source file, when the client supplies it.
    pub file_md5: Option<Md5Digest>,
    /// Client identifier, informational only.
    pub user_agent: Option<String>,
}

impl ChunkRequest {
    /// Encodes the preamble (including the terminating blank line).
    pub fn encode(&self) -> Vec<u8> {
        let target = encode_target(&self.file_name);
        let mut out = format!("POST /{target} {HTTP_VERSION}\r\n");
        push_header(&mut out, HEADER_CONTENT_LENGTH, &self.content_length.to_string());
        push_header(&mut out, HEADER_CONTENT_MD5, &self.content_md5.to_hex());
        push_header(&mut out, HEADER_CONTENT_OFFSET, &self.content_offset.to_string());
        if let Some(file_md5) = &self.file_md5 {
            push_header(&mut out, HEADER_CONTENT_FILE_MD5, &file_md5.to_hex());
        }
        if let Some(user_agent) = &self.user_agent {
            push_header(&mut out, HEADER_USER_AGENT, user_agent);
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Parses a complete preamble, with or without its trailing blank line.
    ///
    /// Fails fast on anything the server cannot act on: non-`POST` methods,
    /// unsafe targets, and missing or unparsable required headers.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ProtocolError::InvalidRequestLine(format!("non UTF-8 preamble: {e}")))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let target = parse_request_line(request_line)?;
        let file_name = decode_target(target)?;

        let headers = Headers::parse(lines)?;

        let content_length = headers.required_u64(HEADER_CONTENT_LENGTH)?;
        let content_offset = headers.required_u64(HEADER_CONTENT_OFFSET)?;
        let content_md5 = headers.required_digest(HEADER_CONTENT_MD5)?;
        let file_md5 = headers
            .get(HEADER_CONTENT_FILE_MD5)
            .map(|v| {
                Md5Digest::from_hex(v).map_err(|_| ProtocolError::InvalidHeader {
                    name: HEADER_CONTENT_FILE_MD5,
                    value: v.to_string(),
                })
            })
            .transpose()?;
        let user_agent = headers.get(HEADER_USER_AGENT).map(str::to_string);

        if content_offset.checked_add(content_length).is_none() {
            return Err(ProtocolError::InvalidHeader {
                name: HEADER_CONTENT_OFFSET,
                value: content_offset.to_string(),
            });
        }

        Ok(Self {
            file_name,
            content_length,
            content_md5,
            content_offset,
            file_md5,
            user_agent,
        })
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// Validates `POST <target> HTTP/1.x` and returns the raw target.
fn parse_request_line(line: &str) -> Result<&str, ProtocolError> {
    let mut parts = line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::InvalidRequestLine(line.to_string()));
    };

    if !method.eq_ignore_ascii_case("POST") {
        return Err(ProtocolError::UnsupportedMethod(method.to_string()));
    }
    if !version.starts_with("HTTP/1.") {
        return Err(ProtocolError::InvalidRequestLine(line.to_string()));
    }
    Ok(target)
}

/// Percent-encodes a `/`-separated file name for the request line.
pub fn encode_target(file_name: &str) -> String {
    utf8_percent_encode(file_name.trim_start_matches('/'), TARGET_ENCODE_SET).to_string()
}

/// Turns a request target into a host-relative, decoded file name.
///
/// Accepts origin-form (`/a/b.bin`) and absolute-form
/// (`http://host:port/a/b.bin`) targets; query strings are dropped.
pub fn decode_target(target: &str) -> Result<String, ProtocolError> {
    let path = match target.split_once("://") {
        Some((_scheme, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None => target,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_start_matches('/');

    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| ProtocolError::InvalidTarget(target.to_string()))?;
    if decoded.is_empty() {
        return Err(ProtocolError::InvalidTarget(target.to_string()));
    }
    Ok(decoded.into_owned())
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, ProtocolError> {
        let mut entries = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ProtocolError::MalformedHeader(line.to_string()));
            }
            entries.push((name.to_string(), value.trim().to_string()));
        }
        Ok(Self { entries })
    }

    /// First value for `name`, compared case-insensitively.
    fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, name: &'static str) -> Result<&str, ProtocolError> {
        self.get(name).ok_or(ProtocolError::MissingHeader(name))
    }

    fn required_u64(&self, name: &'static str) -> Result<u64, ProtocolError> {
        let value = self.required(name)?;
        value.parse().map_err(|_| ProtocolError::InvalidHeader {
            name,
            value: value.to_string(),
        })
    }

    fn required_digest(&self, name: &'static str) -> Result<Md5Digest, ProtocolError> {
        let value = self.required(name)?;
        Md5Digest::from_hex(value).map_err(|_| ProtocolError::InvalidHeader {
            name,
            value: value.to_string(),
        })
    }
}

/// Accumulates bytes until the preamble terminator is seen.
///
/// Input may arrive in arbitrarily small pieces; the terminator may be
/// split across calls to [`feed`](Self::feed).
#[derive(Debug)]
pub struct PreambleScanner {
    buf: Vec<u8>,
    max_len: usize,
}

impl Default for PreambleScanner {
    fn default() -> Self {
        Self::new(MAX_PREAMBLE_LEN)
    }
}

impl PreambleScanner {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Feeds `data` and returns how many of its bytes belong to the preamble
    /// once the terminator completes. Bytes past that count are body bytes
    /// and must not be consumed by the caller.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<usize>, ProtocolError> {
        // Only the last three buffered bytes can start a split terminator.
        let search_from = self.buf.len().saturating_sub(PREAMBLE_TERMINATOR.len() - 1);
        let before = self.buf.len();
        self.buf.extend_from_slice(data);

        let found = self.buf[search_from..]
            .windows(PREAMBLE_TERMINATOR.len())
            .position(|w| w == PREAMBLE_TERMINATOR);

        match found {
            Some(pos) => {
                let end = search_from + pos + PREAMBLE_TERMINATOR.len();
                if end > self.max_len {
                    return Err(ProtocolError::PreambleTooLarge(self.max_len));
                }
                self.buf.truncate(end);
                Ok(Some(end - before))
            }
            None if self.buf.len() > self.max_len => {
                Err(ProtocolError::PreambleTooLarge(self.max_len))
            }
            None => Ok(None),
        }
    }

    /// Bytes buffered so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the scanner, returning the complete preamble bytes.
    pub fn into_preamble(self) -> Vec<u8> {
        self.buf
    }
}
