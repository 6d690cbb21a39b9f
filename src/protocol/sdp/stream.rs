use super::parser::{parse_attribute, parse_fmtp, parse_lines, parse_media, parse_rtpmap};
use super::{APPLE_LOSSLESS, AlacParameters, SdpError};
use crate::protocol::crypto::{AudioDecryptor, RaopRsaPrivateKey};
use crate::protocol::raop::RaopSessionKeys;

/// Audio stream negotiated by ANNOUNCE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    /// Format index shared by the media, rtpmap and fmtp lines
    pub format_index: u32,
    /// fmtp option tokens after the format index
    pub format_options: Vec<String>,
    /// AES session keys, absent for unencrypted streams
    pub session_keys: Option<RaopSessionKeys>,
    /// Sender's `min-latency` in frames, if announced
    pub min_latency: Option<u32>,
}

impl StreamDescription {
    /// Parse and validate an ANNOUNCE body
    ///
    /// The format index of the media line must equal the index mapped to
    /// `AppleLossless` by `rtpmap` and the index of the `fmtp` line, and
    /// `fmtp` must carry at least one option. `private_key` unwraps the
    /// announced AES key when the stream is encrypted.
    ///
    /// # Errors
    ///
    /// Returns `SdpError` for any malformed line, inconsistent format index,
    /// missing options, or key material that does not unwrap.
    pub fn parse(body: &str, private_key: Option<&RaopRsaPrivateKey>) -> Result<Self, SdpError> {
        let scanned = Scanned::scan(body)?;

        let session_keys = match (scanned.rsaaeskey, scanned.aesiv) {
            (Some(key), Some(iv)) => Some(RaopSessionKeys::unwrap(private_key, key, iv)?),
            (None, None) => None,
            _ => return Err(SdpError::IncompleteEncryption),
        };

        Ok(Self {
            format_index: scanned.format_index,
            format_options: scanned.format_options,
            session_keys,
            min_latency: scanned.min_latency,
        })
    }

    /// Validate an ANNOUNCE body without touching its key material
    ///
    /// Used when the body is relayed to other receivers that hold the key.
    /// Returns the announced format index.
    ///
    /// # Errors
    ///
    /// Returns `SdpError` for the same grammar and index violations as
    /// [`StreamDescription::parse`].
    pub fn validate(body: &str) -> Result<u32, SdpError> {
        Scanned::scan(body).map(|scanned| scanned.format_index)
    }

    /// Whether the stream carries an AES key
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.session_keys.is_some()
    }

    /// Per-packet decryptor for an encrypted stream
    #[must_use]
    pub fn decryptor(&self) -> Option<AudioDecryptor> {
        self.session_keys.as_ref().map(RaopSessionKeys::decryptor)
    }

    /// Interpret the format options as ALAC decoder configuration
    ///
    /// # Errors
    ///
    /// Returns `SdpError::InvalidAlacParameters` if the options do not describe ALAC.
    pub fn alac_parameters(&self) -> Result<AlacParameters, SdpError> {
        AlacParameters::from_options(self.format_options.as_slice())
    }
}

/// Attribute values collected from one pass over the body
struct Scanned<'a> {
    format_index: u32,
    format_options: Vec<String>,
    rsaaeskey: Option<&'a str>,
    aesiv: Option<&'a str>,
    min_latency: Option<u32>,
}

impl<'a> Scanned<'a> {
    fn scan(body: &'a str) -> Result<Self, SdpError> {
        let mut audio_index = None;
        let mut alac_index = None;
        let mut fmtp_index = None;
        let mut format_options = None;
        let mut rsaaeskey = None;
        let mut aesiv = None;
        let mut min_latency = None;

        for line in parse_lines(body)? {
            match line.kind {
                'm' => audio_index = Some(parse_media(line.value)?),
                'a' => {
                    let (name, value) = parse_attribute(line.value)?;
                    match name {
                        "rtpmap" => {
                            let (index, encoding) = parse_rtpmap(value)?;
                            if encoding == APPLE_LOSSLESS {
                                alac_index = Some(index);
                            }
                        }
                        "fmtp" => {
                            let (index, options) = parse_fmtp(value)?;
                            fmtp_index = Some(index);
                            if !options.is_empty() {
                                format_options = Some(options);
                            }
                        }
                        "rsaaeskey" => rsaaeskey = Some(value),
                        "aesiv" => aesiv = Some(value),
                        "min-latency" => min_latency = value.trim().parse().ok(),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if alac_index != audio_index {
            return Err(SdpError::UnsupportedFormat(audio_index));
        }
        if audio_index != fmtp_index {
            return Err(SdpError::MissingFmtp(audio_index));
        }
        let (Some(format_index), Some(format_options)) = (audio_index, format_options) else {
            return Err(SdpError::MissingFormatOptions(audio_index.unwrap_or_default()));
        };

        Ok(Self {
            format_index,
            format_options,
            rsaaeskey,
            aesiv,
            min_latency,
        })
    }
}
