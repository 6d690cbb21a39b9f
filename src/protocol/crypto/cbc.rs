use super::CryptoError;
use super::lengths::{AES_128_KEY, AES_BLOCK};
use aes::Aes128;
use aes::cipher::{BlockDecrypt, KeyInit, generic_array::GenericArray};

/// RAOP audio payload decryptor
///
/// Each packet is decrypted starting from the negotiated IV; the CBC chain
/// never carries over between packets. Senders only encrypt whole 16-byte
/// blocks, so a trailing partial block is left untouched.
#[derive(Clone)]
pub struct AudioDecryptor {
    cipher: Aes128,
    iv: [u8; AES_BLOCK],
}

impl std::fmt::Debug for AudioDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDecryptor").finish_non_exhaustive()
    }
}

impl AudioDecryptor {
    /// Create a decryptor for the negotiated key and IV
    #[must_use]
    pub fn new(key: [u8; AES_128_KEY], iv: [u8; AES_BLOCK]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(&key)),
            iv,
        }
    }

    /// Create a decryptor from unchecked key and IV bytes
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if key or IV is not 16 bytes.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; AES_128_KEY] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_128_KEY,
            actual: key.len(),
        })?;
        let iv: [u8; AES_BLOCK] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_BLOCK,
            actual: iv.len(),
        })?;
        Ok(Self::new(key, iv))
    }

    /// Decrypt the whole blocks of `payload` in place, leaving any tail as is
    pub fn decrypt_in_place(&self, payload: &mut [u8]) {
        let whole = payload.len() / AES_BLOCK * AES_BLOCK;
        let mut prev = self.iv;

        for chunk in payload[..whole].chunks_exact_mut(AES_BLOCK) {
            let mut ciphertext = [0u8; AES_BLOCK];
            ciphertext.copy_from_slice(chunk);

            let block = GenericArray::from_mut_slice(chunk);
            self.cipher.decrypt_block(block);
            for (b, p) in block.iter_mut().zip(prev.iter()) {
                *b ^= *p;
            }

            prev = ciphertext;
        }
    }

    /// Decrypt a copy of `payload`
    #[must_use]
    pub fn decrypt(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = payload.to_vec();
        self.decrypt_in_place(&mut out);
        out
    }
}
