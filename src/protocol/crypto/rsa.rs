use super::CryptoError;
use std::path::Path;

/// RSA sizes used in RAOP
pub mod sizes {
    /// Apple-Response messages shorter than this are zero-padded
    pub const MIN_CHALLENGE_MESSAGE: usize = 32;
}

/// RSA private key held by the receiver
///
/// Unwraps the `rsaaeskey` SDP attribute and signs `Apple-Challenge`
/// responses.
#[derive(Clone)]
pub struct RaopRsaPrivateKey {
    inner: ::rsa::RsaPrivateKey,
}

impl std::fmt::Debug for RaopRsaPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaopRsaPrivateKey").finish_non_exhaustive()
    }
}

impl RaopRsaPrivateKey {
    /// Load from a PEM-encoded private key (PKCS#8 or PKCS#1)
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPrivateKey` if neither encoding parses.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        use ::rsa::pkcs1::DecodeRsaPrivateKey;
        use ::rsa::pkcs8::DecodePrivateKey;

        let inner = ::rsa::RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| ::rsa::RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self { inner })
    }

    /// Load a PEM file from disk
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPrivateKey` if the file cannot be read or parsed.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path)
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("{}: {e}", path.display())))?;
        Self::from_pem(&pem)
    }

    /// Decrypt RSA-OAEP (SHA-1) encrypted data
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` if the ciphertext was not produced for this key.
    pub fn decrypt_oaep(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        use ::rsa::Oaep;
        use sha1::Sha1;

        self.inner
            .decrypt(Oaep::<Sha1>::new(), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Sign `message` with PKCS#1 v1.5 padding and no digest prefix
    ///
    /// The message is signed as-is, not hashed.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SigningFailed` if the message is too long for the modulus.
    pub fn sign_raw(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        use ::rsa::Pkcs1v15Sign;

        self.inner
            .sign(Pkcs1v15Sign::new_unprefixed(), message)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }

    /// Public half of the key
    #[must_use]
    pub fn public_key(&self) -> ::rsa::RsaPublicKey {
        self.inner.to_public_key()
    }
}
