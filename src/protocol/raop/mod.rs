//! RAOP receiver-side authentication and session key exchange

mod auth;
mod key_exchange;

#[cfg(test)]
mod tests;

pub use auth::{CHALLENGE_SIZE, build_response_message, decode_challenge, generate_response};
pub use key_exchange::{AES_IV_SIZE, AES_KEY_SIZE, RaopSessionKeys};
