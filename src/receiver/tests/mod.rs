mod connection;
mod negotiate;
mod parameters;
mod pipeline;
mod sequence_tracker;
mod session;

use crate::audio::{MemorySink, PcmDecoderFactory};
use crate::protocol::crypto::RaopRsaPrivateKey;
use crate::protocol::rtsp::{Method, RtspRequest};
use crate::protocol::sdp::{CONTENT_TYPE_SDP, StreamDescription};
use crate::receiver::config::RtpPorts;
use crate::receiver::events::event_channel;
use crate::receiver::session::PlayerContext;
use std::sync::Arc;
use std::time::Duration;

pub(super) const TEST_KEY_PEM: &str = include_str!("../../../tests/fixtures/raop_test_key.pem");

/// AES key `00 01 .. 0f` wrapped under the test key
pub(super) const WRAPPED_AES_KEY: &str = "DVjmSxdTl7eIXCgaw7qNdu4S0kbUpBGOe5dDAXqpP1nWtINIniq4hSz8oA5nc67mHDeI4+3o7pDhCvoQk6U8QxAndCsXCRL+uo3arXYDJdo5Wd1uO9ORTmjKX5SXt95aj20Zl6aR05OEZePfuIJfNF5rhPDFbVm0ljhlE4DlLRg";

pub(super) fn test_key() -> RaopRsaPrivateKey {
    RaopRsaPrivateKey::from_pem(TEST_KEY_PEM).unwrap()
}

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

pub(super) fn stream() -> StreamDescription {
    StreamDescription::parse(&sdp_body(), None).unwrap()
}

pub(super) fn request(method: Method, cseq: u32) -> RtspRequest {
    RtspRequest::builder(method, "rtsp://127.0.0.1/3413821438")
        .cseq(cseq)
        .build()
}

pub(super) fn announce(cseq: u32) -> RtspRequest {
    RtspRequest::builder(Method::Announce, "rtsp://127.0.0.1/3413821438")
        .cseq(cseq)
        .content_type(CONTENT_TYPE_SDP)
        .body(sdp_body())
        .build()
}

pub(super) fn context(sink: Arc<MemorySink>) -> Arc<PlayerContext> {
    Arc::new(PlayerContext {
        rtp_ports: RtpPorts::ephemeral(),
        private_key: Some(Arc::new(test_key())),
        decoders: Arc::new(PcmDecoderFactory),
        sink,
        timing_interval: Duration::from_secs(3),
        events: event_channel(),
    })
}
