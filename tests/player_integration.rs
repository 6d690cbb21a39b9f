//! End-to-end tests of the player over real sockets

mod common;

use airaudio::audio::{MemorySink, PcmDecoderFactory};
use airaudio::protocol::crypto::{decode_base64, encode_base64};
use airaudio::protocol::rtp::{RaopAudioPacket, TimingPacket};
use airaudio::protocol::rtsp::headers::raop;
use airaudio::protocol::rtsp::{Method, RtspRequest, StatusCode};
use airaudio::{PlayerServer, ReceiverConfig, RtpPorts, ServerEvent, ServerError};
use common::{RtspClient, SenderSockets, URI, WAIT, eventually, pcm, transport_port};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const MAC: [u8; 6] = [0x02, 0x11, 0x22, 0x33, 0x44, 0x55];

fn config() -> ReceiverConfig {
    ReceiverConfig::with_name("Test Player")
        .port(0)
        .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .rtp_ports(RtpPorts::ephemeral())
        .timing_interval(Duration::from_millis(100))
        .private_key_path(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/raop_test_key.pem"
        ))
}

async fn start_player() -> (PlayerServer, Arc<MemorySink>, SocketAddr) {
    common::init_tracing();
    let sink = Arc::new(MemorySink::new());
    let mut server =
        PlayerServer::player(&config(), sink.clone(), Arc::new(PcmDecoderFactory), MAC).unwrap();
    let addr = server.start().await.unwrap();
    (server, sink, addr)
}

#[tokio::test]
async fn test_start_and_stop_publish_events() {
    let sink = Arc::new(MemorySink::new());
    let mut server =
        PlayerServer::player(&config(), sink, Arc::new(PcmDecoderFactory), MAC).unwrap();
    let mut events = server.subscribe();

    let addr = server.start().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    assert!(matches!(
        server.start().await,
        Err(ServerError::AlreadyRunning)
    ));

    server.stop().await;
    assert!(!server.is_running());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            ServerEvent::Started {
                name: "Test Player".to_string(),
                address: addr,
            },
            ServerEvent::Stopped {
                name: "Test Player".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_options_lists_methods_and_answers_challenge() {
    let (_server, _sink, addr) = start_player().await;
    let mut client = RtspClient::connect(addr).await;

    let challenge = encode_base64(&rand::random::<[u8; 16]>());
    let response = client
        .send(
            RtspRequest::builder(Method::Options, URI)
                .cseq(1)
                .header(raop::APPLE_CHALLENGE, challenge)
                .build(),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.cseq(), Some(1));
    let public = response.headers.get("Public").unwrap();
    for method in ["ANNOUNCE", "SETUP", "RECORD", "FLUSH", "TEARDOWN", "SET_PARAMETER"] {
        assert!(public.contains(method), "{method} missing from {public}");
    }

    let signature = response.headers.get(raop::APPLE_RESPONSE).unwrap();
    assert!(!decode_base64(signature).unwrap().is_empty());
}

#[tokio::test]
async fn test_setup_before_announce_is_rejected() {
    let (_server, _sink, addr) = start_player().await;
    let mut client = RtspClient::connect(addr).await;

    let response = client.setup(6001, 6002).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_VALID_IN_STATE);

    let response = client.request(Method::Other("FOO".to_string())).await;
    assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_session_streams_audio_to_sink() {
    let (server, sink, addr) = start_player().await;
    let mut events = server.subscribe();
    let mut client = RtspClient::connect(addr).await;
    let sender = SenderSockets::bind().await;

    assert_eq!(client.request(Method::Options).await.status, StatusCode::OK);
    assert_eq!(client.announce().await.status, StatusCode::OK);

    let response = client
        .setup(sender.control_port(), sender.timing_port())
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.session(), Some("DEADBEEF"));
    let server_port = transport_port(&response, "server_port");
    assert_ne!(transport_port(&response, "control_port"), 0);
    assert_ne!(transport_port(&response, "timing_port"), 0);

    assert_eq!(client.request(Method::Record).await.status, StatusCode::OK);
    assert!(sink.format().is_some());

    let audio = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = RaopAudioPacket::new(1, 352, 0x1234, pcm(&[10, -10, 20, -20])).with_marker();
    audio
        .send_to(&packet.encode(), (Ipv4Addr::LOCALHOST, server_port))
        .await
        .unwrap();

    assert!(eventually(|| !sink.packets().is_empty()).await);
    assert_eq!(sink.packets(), vec![(352, vec![10, -10, 20, -20])]);

    // the player polls the sender's clock while recording
    let mut buf = [0u8; 64];
    let (n, _) = tokio::time::timeout(WAIT, sender.timing.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(TimingPacket::decode(&buf[..n]).is_ok());

    assert_eq!(client.set_volume("-15.000000").await.status, StatusCode::OK);
    assert_eq!(client.request(Method::Flush).await.status, StatusCode::OK);
    assert_eq!(sink.flush_count(), 1);

    assert_eq!(client.request(Method::Teardown).await.status, StatusCode::OK);
    assert!(client.closed().await);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, ServerEvent::StreamAnnounced { encrypted: false, .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ServerEvent::RecordingStarted { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ServerEvent::VolumeChanged { db, .. } if (*db + 15.0).abs() < 0.001)));
    assert!(seen.iter().any(|e| matches!(e, ServerEvent::TornDown { .. })));
}

#[tokio::test]
async fn test_stop_closes_live_connections() {
    let (mut server, _sink, addr) = start_player().await;
    let mut client = RtspClient::connect(addr).await;
    assert_eq!(client.announce().await.status, StatusCode::OK);

    server.stop().await;
    assert!(client.closed().await);
}
