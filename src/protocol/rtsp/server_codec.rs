//! Server-side RTSP codec for parsing requests and generating responses

use super::{Headers, Method, RtspRequest, RtspResponse, StatusCode, headers::names};
use bytes::BytesMut;
use std::str;

/// Errors during RTSP request parsing
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// First line is not `<METHOD> <uri> RTSP/1.0`
    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    /// Method token is empty or not a token
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// Header line without a colon
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// `Content-Length` is not a number
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Announced body exceeds the size limit
    #[error("Body too large: {size} > {max}")]
    BodyTooLarge {
        /// Announced length
        size: usize,
        /// Largest accepted length
        max: usize,
    },

    /// Request head is not UTF-8
    #[error("Invalid UTF-8 in headers")]
    InvalidUtf8,
}

/// Maximum allowed body size
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Maximum header section size (64 KB)
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Server-side RTSP codec
///
/// Performs no I/O: `feed()` appends bytes read from the socket and
/// `decode()` yields complete requests in arrival order.
///
/// ```rust
/// use airaudio::protocol::rtsp::{Method, RtspServerCodec};
///
/// let mut codec = RtspServerCodec::new();
/// codec.feed(b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n");
///
/// let request = codec.decode().unwrap().unwrap();
/// assert_eq!(request.method, Method::Options);
/// ```
pub struct RtspServerCodec {
    buffer: BytesMut,
}

impl RtspServerCodec {
    /// Create a new server codec
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed bytes into the internal buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get current buffer length
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Attempt to decode a complete RTSP request
    ///
    /// Returns `Ok(None)` while more bytes are needed.
    ///
    /// # Errors
    /// Returns `ParseError` if the request is malformed. The buffer is left
    /// untouched in that case; the caller is expected to drop the connection.
    pub fn decode(&mut self) -> Result<Option<RtspRequest>, ParseError> {
        let Some(header_end) = find_header_end(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                return Err(ParseError::InvalidHeader("Headers too large".into()));
            }
            return Ok(None);
        };

        let header_str =
            str::from_utf8(&self.buffer[..header_end]).map_err(|_| ParseError::InvalidUtf8)?;

        let (method, uri, headers) = Self::parse_head(header_str)?;

        let content_length = match headers.get(names::CONTENT_LENGTH) {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?,
            None => 0,
        };

        if content_length > MAX_BODY_SIZE {
            return Err(ParseError::BodyTooLarge {
                size: content_length,
                max: MAX_BODY_SIZE,
            });
        }

        let total_size = header_end + 4 + content_length;
        if self.buffer.len() < total_size {
            return Ok(None);
        }

        let _ = self.buffer.split_to(header_end + 4);
        let body = self.buffer.split_to(content_length).to_vec();

        Ok(Some(RtspRequest {
            method,
            uri,
            headers,
            body,
        }))
    }

    /// Parse request line and headers
    fn parse_head(header_str: &str) -> Result<(Method, String, Headers), ParseError> {
        let mut lines = header_str.split("\r\n");

        let request_line = lines
            .next()
            .ok_or_else(|| ParseError::InvalidRequestLine("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::InvalidRequestLine(request_line.to_string()));
        }

        let method = parts[0]
            .parse::<Method>()
            .map_err(|()| ParseError::InvalidMethod(parts[0].to_string()))?;

        if !parts[2].starts_with("RTSP/") {
            return Err(ParseError::InvalidRequestLine(format!(
                "Invalid protocol: {}",
                parts[2]
            )));
        }

        let headers = Headers::parse_lines(lines).map_err(ParseError::InvalidHeader)?;

        Ok((method, parts[1].to_string(), headers))
    }
}

impl Default for RtspServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Builder for RTSP responses
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Option<Vec<u8>>,
}

impl ResponseBuilder {
    /// Create a new response builder with the given status
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Create an OK (200) response
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create an error response
    #[must_use]
    pub fn error(status: StatusCode) -> Self {
        Self::new(status)
    }

    /// Set the `CSeq` header
    #[must_use]
    pub fn cseq(mut self, cseq: u32) -> Self {
        self.headers.insert(names::CSEQ, cseq.to_string());
        self
    }

    /// Set the Session header
    #[must_use]
    pub fn session(mut self, session_id: &str) -> Self {
        self.headers.insert(names::SESSION, session_id);
        self
    }

    /// Add a custom header
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a `text/parameters` body
    #[must_use]
    pub fn text_body(mut self, body: &str) -> Self {
        self.body = Some(body.as_bytes().to_vec());
        self.headers.insert(names::CONTENT_TYPE, "text/parameters");
        self
    }

    /// Set a binary body
    #[must_use]
    pub fn binary_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = Some(body);
        self.headers.insert(names::CONTENT_TYPE, content_type);
        self
    }

    /// Build into an `RtspResponse`
    #[must_use]
    pub fn build(mut self) -> RtspResponse {
        if let Some(ref body) = self.body {
            self.headers
                .insert(names::CONTENT_LENGTH, body.len().to_string());
        }

        RtspResponse {
            version: "RTSP/1.0".to_string(),
            status: self.status,
            reason: self.status.reason().to_string(),
            headers: self.headers,
            body: self.body.unwrap_or_default(),
        }
    }

    /// Encode directly to bytes
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        encode_response(&self.build())
    }
}

/// Encode an RTSP response to bytes
#[must_use]
pub fn encode_response(response: &RtspResponse) -> Vec<u8> {
    let mut output = Vec::with_capacity(256 + response.body.len());

    output.extend_from_slice(
        format!(
            "{} {} {}\r\n",
            response.version,
            response.status.as_u16(),
            response.reason
        )
        .as_bytes(),
    );

    for (name, value) in response.headers.iter() {
        output.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }

    output.extend_from_slice(b"\r\n");
    output.extend_from_slice(&response.body);

    output
}
