
use super::config::{PeerAddress, ProxyConfig};
use crate::protocol::rtsp::headers::names;
use crate::protocol::rtsp::transport::keys;
use crate::protocol::rtsp::{Method, ResponseBuilder, RtspRequest, RtspServerCodec, TransportHeader};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(super) const WAIT: Duration = Duration::from_secs(2);

pub(super) fn sdp_body() -> String {
    "v=0\r\n\
     o=iTunes 3413821438 0 IN IP4 127.0.0.1\r\n\
     s=iTunes\r\n\
     c=IN IP4 127.0.0.1\r\n\
     t=0 0\r\n\
     m=audio 0 RTP/AVP 96\r\n\
     a=rtpmap:96 AppleLossless\r\n\
     a=fmtp:96 352 0 16 40 10 14 2 255 0 0 44100\r\n"
        .to_string()
}

pub(super) fn request(method: Method, cseq: u32) -> RtspRequest {
    RtspRequest::builder(method, "rtsp://127.0.0.1/3413821438")
        .cseq(cseq)
        .build()
}

pub(super) fn announce(cseq: u32) -> RtspRequest {
    RtspRequest::builder(Method::Announce, "rtsp://127.0.0.1/3413821438")
        .cseq(cseq)
        .content_type("application/sdp")
        .body(sdp_body())
        .build()
}

/// Proxy configuration with OS-assigned ports throughout
pub(super) fn test_config(peers: &[&FakePeer]) -> ProxyConfig {
    peers.iter().fold(
        ProxyConfig::with_name("Test Proxy")
            .port(0)
            .port_bases(0, 0)
            .barrier_timeout(WAIT)
            .connect_timeout(WAIT),
        |config, peer| config.peer(peer.address.clone()),
    )
}

/// How a fake downstream receiver treats requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Behaviour {
    Answer,
    Silent,
}

/// A downstream receiver that records requests and answers them with `200 OK`
pub(super) struct FakePeer {
    pub address: PeerAddress,
    pub requests: mpsc::UnboundedReceiver<RtspRequest>,
    pub audio: Arc<UdpSocket>,
    pub control: Arc<UdpSocket>,
    pub timing: Arc<UdpSocket>,
    task: JoinHandle<()>,
}

impl FakePeer {
    pub async fn spawn(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let audio = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let control = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let timing = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());

        let mut transport = TransportHeader::parse("RTP/AVP/UDP;unicast;mode=record").unwrap();
        transport.set(keys::SERVER_PORT, audio.local_addr().unwrap().port().to_string());
        transport.set(keys::CONTROL_PORT, control.local_addr().unwrap().port().to_string());
        transport.set(keys::TIMING_PORT, timing.local_addr().unwrap().port().to_string());
        let transport = transport.to_string();

        let (tx, requests) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let transport = transport.clone();
                tokio::spawn(async move {
                    let mut codec = RtspServerCodec::new();
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let n = match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        codec.feed(&buf[..n]);
                        while let Ok(Some(request)) = codec.decode() {
                            let mut response =
                                ResponseBuilder::ok().cseq(request.cseq().unwrap_or(0));
                            if request.method == Method::Setup {
                                response = response
                                    .header(names::TRANSPORT, &transport)
                                    .session("1");
                            }
                            let _ = tx.send(request);
                            if behaviour == Behaviour::Answer
                                && stream.write_all(&response.encode()).await.is_err()
                            {
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self {
            address: PeerAddress::new("127.0.0.1", port),
            requests,
            audio,
            control,
            timing,
            task,
        }
    }

    /// Next request the proxy sent
    pub async fn next_request(&mut self) -> RtspRequest {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .unwrap()
            .unwrap()
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(super) async fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let (n, _) = tokio::time::timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf.truncate(n);
    buf
}
