use super::test_key;
use crate::error::RaopError;
use crate::protocol::rtsp::headers::{names, raop};
use crate::protocol::rtsp::{
    Method, ResponseBuilder, RtspCodec, RtspRequest, RtspResponse, StatusCode,
};
use crate::receiver::connection::{
    AUDIO_JACK_CONNECTED, ConnectionContext, RtspHandler, SERVER_HEADER, serve_connection,
};
use crate::receiver::events::{ServerEvent, event_channel};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAC: [u8; 6] = [0x00, 0x51, 0x52, 0x53, 0x54, 0x55];

/// Answers everything except unknown methods with 200
struct StubHandler {
    shut_down: Arc<AtomicBool>,
}

#[async_trait]
impl RtspHandler for StubHandler {
    async fn handle(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        match &request.method {
            Method::Other(name) => Err(RaopError::NotImplemented(name.clone())),
            Method::Record => Err(RaopError::protocol("audio stream not configured")),
            _ => Ok(ResponseBuilder::ok()),
        }
    }

    async fn shutdown(&mut self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

struct Harness {
    client: DuplexStream,
    codec: RtspCodec,
    task: JoinHandle<Result<(), RaopError>>,
    shut_down: Arc<AtomicBool>,
    cancel: CancellationToken,
}

fn client_addr() -> SocketAddr {
    "192.168.1.20:51000".parse().unwrap()
}

fn harness(ctx: ConnectionContext) -> Harness {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let shut_down = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();
    let handler = StubHandler {
        shut_down: shut_down.clone(),
    };
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            serve_connection(
                server,
                client_addr(),
                "192.168.1.10:5000".parse().unwrap(),
                handler,
                &ctx,
                cancel,
            )
            .await
        }
    });
    Harness {
        client,
        codec: RtspCodec::new(),
        task,
        shut_down,
        cancel,
    }
}

impl Harness {
    async fn send(&mut self, bytes: &[u8]) {
        self.client.write_all(bytes).await.unwrap();
    }

    async fn response(&mut self) -> RtspResponse {
        let mut buf = [0u8; 2048];
        loop {
            if let Some(response) = self.codec.decode().unwrap() {
                return response;
            }
            let n = tokio::time::timeout(Duration::from_secs(2), self.client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before a response arrived");
            self.codec.feed(&buf[..n]).unwrap();
        }
    }

    async fn expect_closed(&mut self) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), self.client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}

fn request(method: Method, cseq: &str) -> Vec<u8> {
    RtspRequest::builder(method, "rtsp://192.168.1.10/1")
        .header(names::CSEQ, cseq)
        .build()
        .encode()
}

#[tokio::test]
async fn test_options_answered_with_common_headers() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    h.send(&request(Method::Options, "1")).await;

    let response = h.response().await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get(names::PUBLIC), Some(Method::PUBLIC));
    assert_eq!(response.headers.get(names::SERVER), Some(SERVER_HEADER));
    assert_eq!(
        response.headers.get(raop::AUDIO_JACK_STATUS),
        Some(AUDIO_JACK_CONNECTED)
    );
    assert_eq!(response.cseq(), Some(1));
    assert!(response.headers.get(raop::APPLE_RESPONSE).is_none());
}

#[tokio::test]
async fn test_cseq_is_echoed_verbatim() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    h.send(&request(Method::GetParameter, "007")).await;

    let response = h.response().await;
    assert_eq!(response.headers.get(names::CSEQ), Some("007"));
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    let mut bytes = request(Method::Options, "1");
    bytes.extend(request(Method::GetParameter, "2"));
    bytes.extend(request(Method::Other("DESCRIBE".into()), "3"));
    h.send(&bytes).await;

    assert_eq!(h.response().await.cseq(), Some(1));
    assert_eq!(h.response().await.cseq(), Some(2));
    let third = h.response().await;
    assert_eq!(third.cseq(), Some(3));
    assert_eq!(third.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_handler_error_maps_to_status() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    h.send(&request(Method::Record, "4")).await;

    let response = h.response().await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.cseq(), Some(4));
    assert_eq!(response.headers.get(names::SERVER), Some(SERVER_HEADER));
}

#[tokio::test]
async fn test_malformed_request_gets_400_and_close() {
    let events = event_channel();
    let mut rx = events.subscribe();
    let mut h = harness(ConnectionContext::new(MAC, events));
    h.send(b"this is not rtsp\r\n\r\n").await;

    let response = h.response().await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    h.expect_closed().await;

    h.task.await.unwrap().unwrap();
    assert!(h.shut_down.load(Ordering::SeqCst));
    assert!(matches!(
        rx.recv().await.unwrap(),
        ServerEvent::ClientDisconnected { .. }
    ));
}

#[tokio::test]
async fn test_teardown_closes_after_response() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    h.send(&request(Method::Teardown, "9")).await;

    let response = h.response().await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.cseq(), Some(9));
    h.expect_closed().await;
    h.task.await.unwrap().unwrap();
    assert!(h.shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_client_close_runs_shutdown() {
    let h = harness(ConnectionContext::new(MAC, event_channel()));
    let Harness {
        client,
        task,
        shut_down,
        ..
    } = h;
    drop(client);

    task.await.unwrap().unwrap();
    assert!(shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancellation_ends_connection() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    h.cancel.cancel();
    h.expect_closed().await;
    assert!(h.shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_apple_challenge_is_answered() {
    let ctx = ConnectionContext::new(MAC, event_channel())
        .with_private_key(Some(Arc::new(test_key())));
    let mut h = harness(ctx);
    let bytes = RtspRequest::builder(Method::Options, "*")
        .cseq(1)
        .header(raop::APPLE_CHALLENGE, "ZIqi0DXTx2cJ6m29e8cXLA")
        .build()
        .encode();
    h.send(&bytes).await;

    let response = h.response().await;
    let signature = response.headers.get(raop::APPLE_RESPONSE).unwrap();
    assert!(!signature.is_empty());
    assert!(!signature.ends_with('='));
}

#[tokio::test]
async fn test_challenge_without_key_is_not_answered() {
    let mut h = harness(ConnectionContext::new(MAC, event_channel()));
    let bytes = RtspRequest::builder(Method::Options, "*")
        .cseq(1)
        .header(raop::APPLE_CHALLENGE, "ZIqi0DXTx2cJ6m29e8cXLA")
        .build()
        .encode();
    h.send(&bytes).await;

    let response = h.response().await;
    assert!(response.headers.get(raop::APPLE_RESPONSE).is_none());
}
