use super::SdpError;

/// ALAC decoder configuration announced in the `fmtp` attribute
///
/// Token order: `frameLength compatibleVersion bitDepth pb mb kb
/// numChannels maxRun maxFrameBytes avgBitRate sampleRate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlacParameters {
    /// Samples per channel in one packet
    pub frames_per_packet: u32,
    /// Format version, always 0
    pub compatible_version: u8,
    /// Bits per sample
    pub bit_depth: u8,
    /// Rice history mult
    pub pb: u8,
    /// Rice initial history
    pub mb: u8,
    /// Rice limit
    pub kb: u8,
    /// Channel count
    pub channels: u8,
    /// Maximum run length
    pub max_run: u16,
    /// Largest encoded frame, 0 if unknown
    pub max_frame_bytes: u32,
    /// Average bit rate, 0 if unknown
    pub avg_bit_rate: u32,
    /// Samples per second
    pub sample_rate: u32,
}

impl AlacParameters {
    /// Number of fmtp option tokens describing an ALAC stream
    pub const TOKEN_COUNT: usize = 11;

    /// Size of the `ALACSpecificConfig` magic cookie
    pub const COOKIE_SIZE: usize = 24;

    /// Parse the fmtp option tokens (format index already removed)
    ///
    /// # Errors
    ///
    /// Returns `SdpError::InvalidAlacParameters` if the token count is wrong
    /// or a token is not a number in range.
    pub fn from_options<S: AsRef<str>>(options: &[S]) -> Result<Self, SdpError> {
        if options.len() != Self::TOKEN_COUNT {
            return Err(SdpError::InvalidAlacParameters(format!(
                "expected {} tokens, got {}",
                Self::TOKEN_COUNT,
                options.len()
            )));
        }

        fn field<T: std::str::FromStr>(
            options: &[impl AsRef<str>],
            i: usize,
            name: &str,
        ) -> Result<T, SdpError> {
            let token = options[i].as_ref();
            token
                .parse()
                .map_err(|_| SdpError::InvalidAlacParameters(format!("{name}: {token:?}")))
        }

        Ok(Self {
            frames_per_packet: field(options, 0, "frameLength")?,
            compatible_version: field(options, 1, "compatibleVersion")?,
            bit_depth: field(options, 2, "bitDepth")?,
            pb: field(options, 3, "pb")?,
            mb: field(options, 4, "mb")?,
            kb: field(options, 5, "kb")?,
            channels: field(options, 6, "numChannels")?,
            max_run: field(options, 7, "maxRun")?,
            max_frame_bytes: field(options, 8, "maxFrameBytes")?,
            avg_bit_rate: field(options, 9, "avgBitRate")?,
            sample_rate: field(options, 10, "sampleRate")?,
        })
    }

    /// Encode as the big-endian `ALACSpecificConfig` cookie decoders expect
    #[must_use]
    pub fn magic_cookie(&self) -> [u8; Self::COOKIE_SIZE] {
        let mut cookie = [0u8; Self::COOKIE_SIZE];
        cookie[0..4].copy_from_slice(&self.frames_per_packet.to_be_bytes());
        cookie[4] = self.compatible_version;
        cookie[5] = self.bit_depth;
        cookie[6] = self.pb;
        cookie[7] = self.mb;
        cookie[8] = self.kb;
        cookie[9] = self.channels;
        cookie[10..12].copy_from_slice(&self.max_run.to_be_bytes());
        cookie[12..16].copy_from_slice(&self.max_frame_bytes.to_be_bytes());
        cookie[16..20].copy_from_slice(&self.avg_bit_rate.to_be_bytes());
        cookie[20..24].copy_from_slice(&self.sample_rate.to_be_bytes());
        cookie
    }
}
