//! SETUP Transport negotiation
//!
//! Options are answered in the order the sender wrote them. `interleaved`
//! and `mode` are validated and echoed, `control_port` and `timing_port`
//! open channels connected to the sender and are rewritten with the
//! locally bound ports, anything else is echoed unchanged. The audio
//! channel is opened last and reported as `server_port`.

use super::channel::ChannelRole;
use crate::error::RaopError;
use crate::protocol::rtsp::transport::keys;
use crate::protocol::rtsp::{TransportError, TransportHeader, TransportOption};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};

/// Opens the channels a negotiation asks for
#[async_trait]
pub trait ChannelOpener: Send {
    /// Open the channel for `role`, connected to `remote` if given, and
    /// return its local port
    async fn open_channel(
        &mut self,
        role: ChannelRole,
        remote: Option<SocketAddr>,
    ) -> Result<u16, RaopError>;
}

/// Negotiate a SETUP `Transport` header value
///
/// `client_ip` is the sender's address; its control and timing ports are
/// taken from the request.
///
/// # Errors
///
/// Returns `RaopError::Transport` for an unsupported protocol, option
/// value or port, and whatever the opener returns for a failed channel.
pub async fn negotiate_transport<O>(
    value: &str,
    client_ip: IpAddr,
    opener: &mut O,
) -> Result<TransportHeader, RaopError>
where
    O: ChannelOpener + ?Sized,
{
    let request = TransportHeader::parse(value)?;
    let mut response = TransportHeader::new();

    for option in request.options {
        match option.key.as_str() {
            keys::INTERLEAVED => {
                require_value(&option, "0-1")?;
                response.push(option);
            }
            keys::MODE => {
                require_value(&option, "record")?;
                response.push(option);
            }
            keys::CONTROL_PORT | keys::TIMING_PORT => {
                let role = if option.key == keys::CONTROL_PORT {
                    ChannelRole::Control
                } else {
                    ChannelRole::Timing
                };
                let client_port = parse_port(&option)?;
                let local_port = opener
                    .open_channel(role, Some(SocketAddr::new(client_ip, client_port)))
                    .await?;
                response.push(TransportOption::new(option.key, local_port.to_string()));
            }
            _ => response.push(option),
        }
    }

    let audio_port = opener.open_channel(ChannelRole::Audio, None).await?;
    response.push(TransportOption::new(
        keys::SERVER_PORT,
        audio_port.to_string(),
    ));

    Ok(response)
}

fn require_value(option: &TransportOption, expected: &str) -> Result<(), TransportError> {
    if option.value.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(TransportError::UnsupportedValue {
            key: option.key.clone(),
            value: option.value.clone().unwrap_or_default(),
        })
    }
}

fn parse_port(option: &TransportOption) -> Result<u16, TransportError> {
    option
        .value
        .as_deref()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| TransportError::InvalidPort {
            key: option.key.clone(),
            value: option.value.clone().unwrap_or_default(),
        })
}
