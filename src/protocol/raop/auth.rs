//! RAOP challenge-response authentication

use super::super::crypto::{
    CryptoError, RaopRsaPrivateKey, decode_base64, encode_base64, rsa_sizes,
};
use std::net::IpAddr;

/// Challenge size in bytes (128 bits)
pub const CHALLENGE_SIZE: usize = 16;

/// Decode challenge from Apple-Challenge header
///
/// # Errors
///
/// Returns `CryptoError::InvalidBase64` if the input is not valid base64.
pub fn decode_challenge(header: &str) -> Result<Vec<u8>, CryptoError> {
    decode_base64(header)
}

/// Build the message to sign for Apple-Response
///
/// The message is `challenge || ip_address || mac_address`, zero-padded
/// to 32 bytes.
#[must_use]
pub fn build_response_message(
    challenge: &[u8],
    ip_address: &IpAddr,
    mac_address: &[u8; 6],
) -> Vec<u8> {
    let mut message = Vec::with_capacity(CHALLENGE_SIZE + 16 + 6);

    message.extend_from_slice(challenge);

    match ip_address {
        IpAddr::V4(addr) => message.extend_from_slice(&addr.octets()),
        IpAddr::V6(addr) => message.extend_from_slice(&addr.octets()),
    }

    message.extend_from_slice(mac_address);

    if message.len() < rsa_sizes::MIN_CHALLENGE_MESSAGE {
        message.resize(rsa_sizes::MIN_CHALLENGE_MESSAGE, 0);
    }

    message
}

/// Generate the Apple-Response header value for an Apple-Challenge
///
/// `local_ip` is the address the client connected to.
///
/// # Errors
///
/// Returns `CryptoError` if the challenge is not base64 or signing fails.
pub fn generate_response(
    private_key: &RaopRsaPrivateKey,
    challenge_header: &str,
    local_ip: &IpAddr,
    mac_address: &[u8; 6],
) -> Result<String, CryptoError> {
    let challenge = decode_challenge(challenge_header)?;
    let message = build_response_message(&challenge, local_ip, mac_address);
    let signature = private_key.sign_raw(&message)?;
    Ok(encode_base64(&signature))
}
