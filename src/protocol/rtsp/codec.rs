//! Client-side RTSP codec for parsing responses from a downstream receiver

use super::server_codec::find_header_end;
use super::{Headers, RtspResponse, StatusCode};
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Errors during RTSP response parsing
#[derive(Debug, Error)]
pub enum RtspCodecError {
    /// First line is not `RTSP/1.0 <code> <reason>`
    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),

    /// Header line without a colon
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// `Content-Length` is not a number
    #[error("invalid content length")]
    InvalidContentLength,

    /// Buffered response exceeds the size limit
    #[error("response too large: {size} bytes")]
    ResponseTooLarge {
        /// Bytes buffered
        size: usize,
    },
}

/// Head of a response whose body has not fully arrived yet
#[derive(Debug)]
struct PendingHead {
    version: String,
    status: StatusCode,
    reason: String,
    headers: Headers,
    content_length: usize,
}

/// Sans-IO RTSP codec for parsing responses
///
/// Feed bytes with `feed()`, pull complete responses with `decode()`.
/// Several pipelined responses in one read are returned one per call.
pub struct RtspCodec {
    buffer: BytesMut,
    max_size: usize,
    pending: Option<PendingHead>,
}

impl RtspCodec {
    /// Create a new codec
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_size: 1024 * 1024,
            pending: None,
        }
    }

    /// Set maximum buffered size
    #[must_use]
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Feed bytes into the codec
    ///
    /// # Errors
    /// Returns `RtspCodecError::ResponseTooLarge` if the buffer would exceed the maximum size.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), RtspCodecError> {
        let size = self.buffer.len() + bytes.len();
        if size > self.max_size {
            return Err(RtspCodecError::ResponseTooLarge { size });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Try to decode a complete response
    ///
    /// # Errors
    /// Returns `RtspCodecError` if the status line or headers are malformed.
    pub fn decode(&mut self) -> Result<Option<RtspResponse>, RtspCodecError> {
        if self.pending.is_none() {
            let Some(header_end) = find_header_end(&self.buffer) else {
                return Ok(None);
            };
            let head = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
            self.buffer.advance(header_end + 4);
            self.pending = Some(Self::parse_head(&head)?);
        }

        let ready = self
            .pending
            .as_ref()
            .is_some_and(|head| self.buffer.len() >= head.content_length);
        if !ready {
            return Ok(None);
        }

        let Some(head) = self.pending.take() else {
            return Ok(None);
        };
        let body = self.buffer.split_to(head.content_length).to_vec();

        Ok(Some(RtspResponse {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        }))
    }

    /// Clear the codec buffer and reset state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    /// Get current buffer length
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn parse_head(head: &str) -> Result<PendingHead, RtspCodecError> {
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();

        // "RTSP/1.0 200 OK"
        let mut parts = status_line.splitn(3, ' ');
        let version = parts
            .next()
            .filter(|v| v.starts_with("RTSP/"))
            .ok_or_else(|| RtspCodecError::InvalidStatusLine(status_line.to_string()))?
            .to_string();
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| RtspCodecError::InvalidStatusLine(status_line.to_string()))?;
        let reason = parts.next().unwrap_or("").to_string();

        let headers = Headers::parse_lines(lines).map_err(RtspCodecError::InvalidHeader)?;
        let content_length = match headers.get(super::headers::names::CONTENT_LENGTH) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| RtspCodecError::InvalidContentLength)?,
            None => 0,
        };

        Ok(PendingHead {
            version,
            status: StatusCode(status),
            reason,
            headers,
            content_length,
        })
    }
}

impl Default for RtspCodec {
    fn default() -> Self {
        Self::new()
    }
}
