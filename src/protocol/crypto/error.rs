use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key or IV of the wrong size
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// PEM data that is not an RSA private key
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Attribute value that is not base64
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// RSA-OAEP unwrap failed
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Challenge signature failed
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Encrypted stream or challenge without a configured key
    #[error("no RSA private key configured")]
    MissingPrivateKey,
}
