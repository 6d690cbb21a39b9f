//! Cryptographic primitives for RAOP stream setup and audio decryption

mod cbc;
mod error;
mod rsa;

#[cfg(test)]
mod tests;

pub use self::cbc::AudioDecryptor;
pub use self::error::CryptoError;
pub use self::rsa::{RaopRsaPrivateKey, sizes as rsa_sizes};

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Length of various cryptographic values
pub mod lengths {
    /// AES-128 key length
    pub const AES_128_KEY: usize = 16;
    /// AES block and IV length
    pub const AES_BLOCK: usize = 16;
}

/// Standard alphabet, padding optional on decode and omitted on encode
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode base64 the way RAOP senders write it (padding usually omitted)
///
/// # Errors
///
/// Returns `CryptoError::InvalidBase64` if the input is not base64.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(value.trim())
        .map_err(|e| CryptoError::InvalidBase64(e.to_string()))
}

/// Encode base64 without padding
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}
