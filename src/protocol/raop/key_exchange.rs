//! AES key exchange for RAOP audio encryption

use super::super::crypto::{AudioDecryptor, CryptoError, RaopRsaPrivateKey, decode_base64};

/// AES key size (128 bits)
pub const AES_KEY_SIZE: usize = 16;
/// AES IV size (128 bits)
pub const AES_IV_SIZE: usize = 16;

/// Session keys announced by a sender
#[derive(Clone, PartialEq, Eq)]
pub struct RaopSessionKeys {
    aes_key: [u8; AES_KEY_SIZE],
    aes_iv: [u8; AES_IV_SIZE],
}

impl std::fmt::Debug for RaopSessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaopSessionKeys").finish_non_exhaustive()
    }
}

impl RaopSessionKeys {
    /// Wrap an already unwrapped key and IV
    #[must_use]
    pub fn new(aes_key: [u8; AES_KEY_SIZE], aes_iv: [u8; AES_IV_SIZE]) -> Self {
        Self { aes_key, aes_iv }
    }

    /// Recover session keys from the `rsaaeskey` and `aesiv` SDP attributes
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::MissingPrivateKey` without a private key, and
    /// `CryptoError::InvalidKeyLength` if the unwrapped key or the IV is not
    /// 16 bytes.
    pub fn unwrap(
        private_key: Option<&RaopRsaPrivateKey>,
        rsaaeskey: &str,
        aesiv: &str,
    ) -> Result<Self, CryptoError> {
        let private_key = private_key.ok_or(CryptoError::MissingPrivateKey)?;

        let wrapped = decode_base64(rsaaeskey)?;
        let key = private_key.decrypt_oaep(&wrapped)?;
        let iv = decode_base64(aesiv)?;

        let aes_key: [u8; AES_KEY_SIZE] =
            key.as_slice().try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: AES_KEY_SIZE,
                actual: key.len(),
            })?;
        let aes_iv: [u8; AES_IV_SIZE] =
            iv.as_slice().try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: AES_IV_SIZE,
                actual: iv.len(),
            })?;

        Ok(Self { aes_key, aes_iv })
    }

    /// AES-128 stream key
    #[must_use]
    pub fn aes_key(&self) -> &[u8; AES_KEY_SIZE] {
        &self.aes_key
    }

    /// AES-CBC initialization vector
    #[must_use]
    pub fn aes_iv(&self) -> &[u8; AES_IV_SIZE] {
        &self.aes_iv
    }

    /// Build the per-packet payload decryptor for these keys
    #[must_use]
    pub fn decryptor(&self) -> AudioDecryptor {
        AudioDecryptor::new(self.aes_key, self.aes_iv)
    }
}

impl Drop for RaopSessionKeys {
    fn drop(&mut self) {
        self.aes_key.iter_mut().for_each(|b| *b = 0);
        self.aes_iv.iter_mut().for_each(|b| *b = 0);
    }
}
