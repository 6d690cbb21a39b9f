use super::{announce, context, request};
use crate::audio::{AudioSink, MemorySink};
use crate::error::RaopError;
use crate::protocol::rtsp::headers::names;
use crate::protocol::rtsp::{Method, RtspRequest, StatusCode};
use crate::protocol::sdp::CONTENT_TYPE_SDP;
use crate::receiver::channel::ChannelRole;
use crate::receiver::connection::RtspHandler;
use crate::receiver::events::ServerEvent;
use crate::receiver::session::{PlayerSession, SESSION_ID, SessionState};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

fn session(sink: Arc<MemorySink>) -> PlayerSession {
    PlayerSession::new(
        context(sink),
        "127.0.0.1:40000".parse().unwrap(),
        "127.0.0.1:5000".parse().unwrap(),
    )
}

fn setup(cseq: u32, transport: &str) -> RtspRequest {
    RtspRequest::builder(Method::Setup, "rtsp://127.0.0.1/3413821438")
        .cseq(cseq)
        .transport(transport)
        .build()
}

fn volume(cseq: u32, db: &str) -> RtspRequest {
    RtspRequest::builder(Method::SetParameter, "rtsp://127.0.0.1/3413821438")
        .cseq(cseq)
        .content_type("text/parameters")
        .body(format!("volume: {db}\r\n"))
        .build()
}

async fn set_up_session(sink: Arc<MemorySink>) -> PlayerSession {
    let mut session = session(sink);
    session.handle(&announce(1)).await.unwrap();
    session
        .handle(&setup(2, "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record"))
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn test_announce_moves_to_announced() {
    let mut session = session(Arc::new(MemorySink::new()));
    let response = session.handle(&announce(1)).await.unwrap().build();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(session.state(), SessionState::Announced);
    assert_eq!(session.stream().unwrap().format_index, 96);
}

#[tokio::test]
async fn test_announce_requires_sdp_content_type() {
    let mut session = session(Arc::new(MemorySink::new()));
    let request = RtspRequest::builder(Method::Announce, "rtsp://127.0.0.1/1")
        .cseq(1)
        .content_type("text/plain")
        .body(super::sdp_body())
        .build();

    let err = session.handle(&request).await.unwrap_err();
    assert!(matches!(err, RaopError::Protocol(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_failed_announce_keeps_previous_stream() {
    let mut session = set_up_session(Arc::new(MemorySink::new())).await;
    let bad = RtspRequest::builder(Method::Announce, "rtsp://127.0.0.1/1")
        .cseq(3)
        .content_type(CONTENT_TYPE_SDP)
        .body("v=0\r\nm=audio 0 RTP/AVP 96\r\na=rtpmap:97 AppleLossless\r\n")
        .build();

    let err = session.handle(&bad).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(session.state(), SessionState::SetUp);
    assert_eq!(session.channels().len(), 1);
}

#[tokio::test]
async fn test_reannounce_releases_channels() {
    let mut session = set_up_session(Arc::new(MemorySink::new())).await;
    let audio = session.channels().get(ChannelRole::Audio).unwrap().clone();

    session.handle(&announce(3)).await.unwrap();

    assert_eq!(session.state(), SessionState::Announced);
    assert!(session.channels().is_empty());
    assert!(!audio.is_open());
}

#[tokio::test]
async fn test_setup_before_announce_is_rejected() {
    let mut session = session(Arc::new(MemorySink::new()));
    let err = session
        .handle(&setup(1, "RTP/AVP/UDP;unicast"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::METHOD_NOT_VALID_IN_STATE);
}

#[tokio::test]
async fn test_setup_opens_channels_to_sender() {
    let client_control = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_timing = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let transport = format!(
        "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port={};timing_port={}",
        client_control.local_addr().unwrap().port(),
        client_timing.local_addr().unwrap().port()
    );

    let mut session = session(Arc::new(MemorySink::new()));
    session.handle(&announce(1)).await.unwrap();
    let response = session.handle(&setup(2, &transport)).await.unwrap().build();

    assert_eq!(session.state(), SessionState::SetUp);
    assert_eq!(response.session(), Some(SESSION_ID));
    assert_eq!(session.channels().len(), 3);

    let control = session.channels().get(ChannelRole::Control).unwrap();
    let timing = session.channels().get(ChannelRole::Timing).unwrap();
    let audio = session.channels().get(ChannelRole::Audio).unwrap();
    assert_eq!(control.remote(), Some(client_control.local_addr().unwrap()));
    assert_eq!(timing.remote(), Some(client_timing.local_addr().unwrap()));
    assert_eq!(audio.remote(), None);

    let expected = format!(
        "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port={};timing_port={};server_port={}",
        control.local_port(),
        timing.local_port(),
        audio.local_port()
    );
    assert_eq!(response.transport(), Some(expected.as_str()));
}

#[tokio::test]
async fn test_failed_setup_releases_channels() {
    let mut session = session(Arc::new(MemorySink::new()));
    session.handle(&announce(1)).await.unwrap();

    let err = session
        .handle(&setup(2, "RTP/AVP/UDP;control_port=6001;mode=play"))
        .await
        .unwrap_err();

    assert!(err.is_client_error());
    assert!(session.channels().is_empty());
    assert_eq!(session.state(), SessionState::Announced);
}

fn session_with_events(
    sink: Arc<MemorySink>,
) -> (PlayerSession, broadcast::Receiver<ServerEvent>) {
    let ctx = context(sink);
    let events = ctx.events.subscribe();
    let session = PlayerSession::new(
        ctx,
        "127.0.0.1:40000".parse().unwrap(),
        "127.0.0.1:5000".parse().unwrap(),
    );
    (session, events)
}

#[tokio::test]
async fn test_record_flush_record_cycle() {
    let sink = Arc::new(MemorySink::new());
    let (mut session, mut events) = session_with_events(sink.clone());
    session.handle(&announce(1)).await.unwrap();
    session
        .handle(&setup(2, "RTP/AVP/UDP;unicast"))
        .await
        .unwrap();

    session.handle(&request(Method::Record, 3)).await.unwrap();
    assert_eq!(session.state(), SessionState::Recording);
    assert!(sink.format().is_some());

    session.handle(&request(Method::Flush, 4)).await.unwrap();
    assert_eq!(session.state(), SessionState::Flushed);
    assert_eq!(sink.flush_count(), 1);

    session.handle(&request(Method::Pause, 5)).await.unwrap();
    assert_eq!(session.state(), SessionState::Flushed);

    session.handle(&request(Method::Record, 6)).await.unwrap();
    assert_eq!(session.state(), SessionState::Recording);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen[0], ServerEvent::StreamAnnounced { encrypted: false, .. }));
    assert!(matches!(seen[1], ServerEvent::RecordingStarted { .. }));
    assert!(matches!(seen[2], ServerEvent::Flushed { .. }));
    assert!(matches!(seen.last(), Some(ServerEvent::RecordingStarted { .. })));
}

#[tokio::test]
async fn test_record_without_stream_is_bad_request() {
    let mut session = session(Arc::new(MemorySink::new()));
    let err = session
        .handle(&request(Method::Record, 1))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_record_before_setup_is_rejected() {
    let mut session = session(Arc::new(MemorySink::new()));
    session.handle(&announce(1)).await.unwrap();
    let err = session
        .handle(&request(Method::Record, 2))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::METHOD_NOT_VALID_IN_STATE);
}

#[tokio::test]
async fn test_flush_requires_recording() {
    let mut session = set_up_session(Arc::new(MemorySink::new())).await;
    let err = session
        .handle(&request(Method::Flush, 3))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::METHOD_NOT_VALID_IN_STATE);
    assert_eq!(session.state(), SessionState::SetUp);
}

#[tokio::test]
async fn test_volume_round_trip() {
    let sink = Arc::new(MemorySink::new());
    let mut session = set_up_session(sink.clone()).await;

    let response = session
        .handle(&request(Method::GetParameter, 3))
        .await
        .unwrap()
        .build();
    assert!(response.body.is_empty());

    session.handle(&volume(4, "-15.000000")).await.unwrap();
    assert!((sink.gain() - 0.5).abs() < 1e-6);

    let response = session
        .handle(&request(Method::GetParameter, 5))
        .await
        .unwrap()
        .build();
    assert_eq!(response.body_text(), "volume: -15.000000\r\n");
}

#[tokio::test]
async fn test_mute_maps_to_device_minimum() {
    let sink = Arc::new(MemorySink::with_gain_range(-60.0, 0.0));
    let mut session = set_up_session(sink.clone()).await;

    session.handle(&volume(3, "-144")).await.unwrap();
    assert!((sink.gain() + 60.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_set_parameter_ignores_other_content_types() {
    let sink = Arc::new(MemorySink::new());
    let mut session = set_up_session(sink.clone()).await;
    let artwork = RtspRequest::builder(Method::SetParameter, "rtsp://127.0.0.1/1")
        .cseq(3)
        .content_type("image/jpeg")
        .body(vec![0xFF, 0xD8, 0xFF])
        .build();

    let response = session.handle(&artwork).await.unwrap().build();
    assert_eq!(response.status, StatusCode::OK);
    assert!((sink.gain() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_set_parameter_rejects_bad_volume() {
    let mut session = set_up_session(Arc::new(MemorySink::new())).await;
    let err = session.handle(&volume(3, "loud")).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_parameter_requires_setup() {
    let mut session = session(Arc::new(MemorySink::new()));
    session.handle(&announce(1)).await.unwrap();
    let err = session.handle(&volume(2, "-10")).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::METHOD_NOT_VALID_IN_STATE);
}

#[tokio::test]
async fn test_teardown_releases_everything() {
    let sink = Arc::new(MemorySink::new());
    let mut session = set_up_session(sink.clone()).await;
    session.handle(&request(Method::Record, 3)).await.unwrap();
    let audio = session.channels().get(ChannelRole::Audio).unwrap().clone();

    session.handle(&request(Method::Teardown, 4)).await.unwrap();

    assert_eq!(session.state(), SessionState::TornDown);
    assert!(session.stream().is_none());
    assert!(session.channels().is_empty());
    assert!(!audio.is_open());
    assert!(sink.format().is_none());
}

#[tokio::test]
async fn test_unknown_method_is_not_implemented() {
    let mut session = session(Arc::new(MemorySink::new()));
    let err = session
        .handle(&request(Method::Other("DESCRIBE".into()), 1))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_options_lists_public_methods() {
    let mut session = session(Arc::new(MemorySink::new()));
    let response = session
        .handle(&request(Method::Options, 1))
        .await
        .unwrap()
        .build();
    assert_eq!(response.headers.get(names::PUBLIC), Some(Method::PUBLIC));
}
