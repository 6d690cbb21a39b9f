/// Well-known RTSP header names
pub mod names {
    pub const CSEQ: &str = "CSeq";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const SESSION: &str = "Session";
    pub const TRANSPORT: &str = "Transport";
    pub const USER_AGENT: &str = "User-Agent";
    pub const PUBLIC: &str = "Public";
    pub const SERVER: &str = "Server";
    pub const RANGE: &str = "Range";
    pub const RTP_INFO: &str = "RTP-Info";
}

/// RAOP-specific header names
pub mod raop {
    /// Apple challenge for authentication
    pub const APPLE_CHALLENGE: &str = "Apple-Challenge";
    /// Apple response to challenge
    pub const APPLE_RESPONSE: &str = "Apple-Response";
    /// Audio jack status
    pub const AUDIO_JACK_STATUS: &str = "Audio-Jack-Status";
    /// Audio latency in samples
    pub const AUDIO_LATENCY: &str = "Audio-Latency";
    /// Client instance ID
    pub const CLIENT_INSTANCE: &str = "Client-Instance";
    /// DACP ID for remote control
    pub const DACP_ID: &str = "DACP-ID";
    /// Active remote token
    pub const ACTIVE_REMOTE: &str = "Active-Remote";
}

/// RTSP header collection
///
/// Lookups are case-insensitive. Insertion order is kept so that a request
/// forwarded by the proxy goes out with its headers in the order the sender
/// wrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Create empty headers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header
    ///
    /// An existing header with the same name (case-insensitive) is replaced
    /// in place; otherwise the header is appended.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .inner
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => *slot = (name, value),
            None => self.inner.push((name, value)),
        }
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .inner
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.inner.remove(pos).1)
    }

    /// Get header value (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if header exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Get `CSeq` value
    #[must_use]
    pub fn cseq(&self) -> Option<u32> {
        self.get(names::CSEQ)?.trim().parse().ok()
    }

    /// Get Content-Length value
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.get(names::CONTENT_LENGTH)?.trim().parse().ok()
    }

    /// Get Content-Type value
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get(names::CONTENT_TYPE)
    }

    /// Get Session ID
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.get(names::SESSION)
    }

    /// Get Transport header
    #[must_use]
    pub fn transport(&self) -> Option<&str> {
        self.get(names::TRANSPORT)
    }

    /// Iterate over all headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Parse `Name: value` lines
    ///
    /// Blank lines are skipped. Returns the offending line when a line has
    /// no colon.
    pub(crate) fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, String> {
        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| line.to_string())?;
            headers.insert(name.trim(), value.trim());
        }
        Ok(headers)
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}
