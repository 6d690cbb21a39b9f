use crate::error::RaopError;
use crate::protocol::rtsp::TransportError;
use crate::receiver::channel::ChannelRole;
use crate::receiver::negotiate::{ChannelOpener, negotiate_transport};
use async_trait::async_trait;
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

/// Hands out ports 7000, 7001, ... and records what was asked for
#[derive(Default)]
struct FakeOpener {
    opened: Vec<(ChannelRole, Option<SocketAddr>)>,
    fail_on: Option<ChannelRole>,
}

#[async_trait]
impl ChannelOpener for FakeOpener {
    async fn open_channel(
        &mut self,
        role: ChannelRole,
        remote: Option<SocketAddr>,
    ) -> Result<u16, RaopError> {
        if self.fail_on == Some(role) {
            return Err(RaopError::network(
                format!("bind {role} channel"),
                std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
            ));
        }
        self.opened.push((role, remote));
        Ok(7000 + u16::try_from(self.opened.len() - 1).unwrap())
    }
}

#[tokio::test]
async fn test_negotiate_rewrites_ports_in_request_order() {
    let mut opener = FakeOpener::default();
    let response = negotiate_transport(
        "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port=6001;timing_port=6002",
        CLIENT,
        &mut opener,
    )
    .await
    .unwrap();

    assert_eq!(
        response.to_string(),
        "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port=7000;timing_port=7001;server_port=7002"
    );
    assert_eq!(
        opener.opened,
        vec![
            (ChannelRole::Control, Some(SocketAddr::new(CLIENT, 6001))),
            (ChannelRole::Timing, Some(SocketAddr::new(CLIENT, 6002))),
            (ChannelRole::Audio, None),
        ]
    );
}

#[tokio::test]
async fn test_negotiate_timing_before_control() {
    let mut opener = FakeOpener::default();
    let response = negotiate_transport(
        "RTP/AVP/UDP;timing_port=6002;control_port=6001",
        CLIENT,
        &mut opener,
    )
    .await
    .unwrap();

    assert_eq!(
        response.to_string(),
        "RTP/AVP/UDP;timing_port=7000;control_port=7001;server_port=7002"
    );
}

#[tokio::test]
async fn test_negotiate_accepts_trailing_separator() {
    let mut opener = FakeOpener::default();
    let response = negotiate_transport(
        "RTP/AVP/UDP;unicast;mode=record;control_port=6001;timing_port=6002;",
        CLIENT,
        &mut opener,
    )
    .await
    .unwrap();

    assert_eq!(
        response.to_string(),
        "RTP/AVP/UDP;unicast;mode=record;control_port=7000;timing_port=7001;server_port=7002"
    );
    assert_eq!(opener.opened.len(), 3);
}

#[tokio::test]
async fn test_negotiate_without_ports_opens_audio_only() {
    let mut opener = FakeOpener::default();
    let response = negotiate_transport("RTP/AVP/UDP;unicast", CLIENT, &mut opener)
        .await
        .unwrap();

    assert_eq!(response.to_string(), "RTP/AVP/UDP;unicast;server_port=7000");
    assert_eq!(opener.opened, vec![(ChannelRole::Audio, None)]);
}

#[tokio::test]
async fn test_negotiate_rejects_wrong_interleaving() {
    let mut opener = FakeOpener::default();
    let err = negotiate_transport("RTP/AVP/UDP;interleaved=2-3", CLIENT, &mut opener)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RaopError::Transport(TransportError::UnsupportedValue { ref key, .. }) if key == "interleaved"
    ));
    assert!(opener.opened.is_empty());
}

#[tokio::test]
async fn test_negotiate_rejects_play_mode() {
    let mut opener = FakeOpener::default();
    let err = negotiate_transport("RTP/AVP/UDP;mode=play", CLIENT, &mut opener)
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_negotiate_rejects_tcp() {
    let mut opener = FakeOpener::default();
    let err = negotiate_transport("RTP/AVP/TCP;unicast", CLIENT, &mut opener)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RaopError::Transport(TransportError::UnsupportedProtocol(_))
    ));
}

#[tokio::test]
async fn test_negotiate_rejects_invalid_port() {
    let mut opener = FakeOpener::default();
    let err = negotiate_transport("RTP/AVP/UDP;control_port=70000", CLIENT, &mut opener)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RaopError::Transport(TransportError::InvalidPort { .. })
    ));
}

#[tokio::test]
async fn test_negotiate_propagates_open_failure() {
    let mut opener = FakeOpener {
        fail_on: Some(ChannelRole::Timing),
        ..FakeOpener::default()
    };
    let err = negotiate_transport(
        "RTP/AVP/UDP;control_port=6001;timing_port=6002",
        CLIENT,
        &mut opener,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RaopError::Network { .. }));
    assert_eq!(opener.opened.len(), 1);
}

proptest! {
    #[test]
    fn prop_unknown_options_are_echoed(keys in proptest::collection::vec("[a-z]{3,8}", 0..5)) {
        let keys: Vec<String> = keys
            .into_iter()
            .filter(|k| !matches!(k.as_str(), "interleaved" | "mode"))
            .collect();
        let mut value = String::from("RTP/AVP/UDP");
        for key in &keys {
            value.push(';');
            value.push_str(key);
        }

        let mut opener = FakeOpener::default();
        let response = tokio_test::block_on(negotiate_transport(&value, CLIENT, &mut opener)).unwrap();

        prop_assert_eq!(response.to_string(), format!("{value};server_port=7000"));
    }
}
