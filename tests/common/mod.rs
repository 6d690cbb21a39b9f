//! Helpers shared by the integration tests

#![allow(dead_code)]

use airaudio::protocol::rtsp::{Method, RtspCodec, RtspRequest, RtspResponse, TransportHeader};
use airaudio::protocol::sdp::CONTENT_TYPE_SDP;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

pub const WAIT: Duration = Duration::from_secs(3);

pub const URI: &str = "rtsp://127.0.0.1/3413821438";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn sdp_body() -> String {
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

/// 16-bit big-endian PCM payload
pub fn pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

/// Sender side of an RTSP session
pub struct RtspClient {
    stream: TcpStream,
    codec: RtspCodec,
    cseq: u32,
}

impl RtspClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            codec: RtspCodec::new(),
            cseq: 0,
        }
    }

    pub async fn send(&mut self, request: RtspRequest) -> RtspResponse {
        self.stream.write_all(&request.encode()).await.unwrap();
        tokio::time::timeout(WAIT, self.read_response())
            .await
            .expect("response timed out")
    }

    async fn read_response(&mut self) -> RtspResponse {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(response) = self.codec.decode().unwrap() {
                return response;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before a response arrived");
            self.codec.feed(&buf[..n]).unwrap();
        }
    }

    fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    pub async fn request(&mut self, method: Method) -> RtspResponse {
        let cseq = self.next_cseq();
        self.send(RtspRequest::builder(method, URI).cseq(cseq).build())
            .await
    }

    pub async fn announce(&mut self) -> RtspResponse {
        let cseq = self.next_cseq();
        self.send(
            RtspRequest::builder(Method::Announce, URI)
                .cseq(cseq)
                .content_type(CONTENT_TYPE_SDP)
                .body(sdp_body())
                .build(),
        )
        .await
    }

    pub async fn setup(&mut self, control_port: u16, timing_port: u16) -> RtspResponse {
        let cseq = self.next_cseq();
        let transport = format!(
            "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port={control_port};timing_port={timing_port}"
        );
        self.send(
            RtspRequest::builder(Method::Setup, URI)
                .cseq(cseq)
                .transport(&transport)
                .build(),
        )
        .await
    }

    pub async fn set_volume(&mut self, volume: &str) -> RtspResponse {
        let cseq = self.next_cseq();
        self.send(
            RtspRequest::builder(Method::SetParameter, URI)
                .cseq(cseq)
                .content_type("text/parameters")
                .body(format!("volume: {volume}\r\n"))
                .build(),
        )
        .await
    }

    /// Resolves once the server closes the connection
    pub async fn closed(&mut self) -> bool {
        let mut buf = [0u8; 256];
        matches!(
            tokio::time::timeout(WAIT, self.stream.read(&mut buf)).await,
            Ok(Ok(0))
        )
    }
}

/// The client's control and timing sockets
pub struct SenderSockets {
    pub control: UdpSocket,
    pub timing: UdpSocket,
}

impl SenderSockets {
    pub async fn bind() -> Self {
        Self {
            control: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            timing: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn control_port(&self) -> u16 {
        self.control.local_addr().unwrap().port()
    }

    pub fn timing_port(&self) -> u16 {
        self.timing.local_addr().unwrap().port()
    }
}

/// Port named `key` in a negotiated Transport header
pub fn transport_port(response: &RtspResponse, key: &str) -> u16 {
    let transport = TransportHeader::parse(response.transport().expect("no Transport header"))
        .unwrap();
    transport.port(key).unwrap().expect("port missing")
}

/// Poll `check` until it holds or the wait runs out
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
