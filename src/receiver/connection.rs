//! RTSP connection loop shared by the player and the proxy
//!
//! One loop runs per accepted TCP connection. It decodes requests in
//! arrival order, answers OPTIONS itself, dispatches everything else to
//! an [`RtspHandler`] and decorates every response with the headers RAOP
//! senders expect.

use super::events::{EventSender, ServerEvent, emit};
use crate::error::RaopError;
use crate::protocol::crypto::RaopRsaPrivateKey;
use crate::protocol::raop::generate_response;
use crate::protocol::rtsp::headers::{names, raop};
use crate::protocol::rtsp::{
    Method, ResponseBuilder, RtspRequest, RtspResponse, RtspServerCodec, StatusCode,
    encode_response,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// `Server` header value
pub const SERVER_HEADER: &str = "AirTunes/105.1";

/// `Audio-Jack-Status` header value
pub const AUDIO_JACK_CONNECTED: &str = "connected; type=analog";

/// Per-connection RTSP request handler
#[async_trait]
pub trait RtspHandler: Send {
    /// Handle one request
    ///
    /// `CSeq`, `Server`, `Audio-Jack-Status` and `Apple-Response` are added
    /// by the connection loop. An error is answered with
    /// [`RaopError::status_code`] and the connection stays open.
    async fn handle(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError>;

    /// Release everything the handler owns; called once when the connection ends
    async fn shutdown(&mut self);
}

/// Settings shared by every connection of one server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Key answering `Apple-Challenge`
    pub private_key: Option<Arc<RaopRsaPrivateKey>>,
    /// Hardware address signed into `Apple-Response`
    pub mac_address: [u8; 6],
    /// `Server` header value
    pub server_header: String,
    /// Event channel of the owning server
    pub events: EventSender,
}

impl ConnectionContext {
    /// Context for a receiver advertising `mac_address`
    #[must_use]
    pub fn new(mac_address: [u8; 6], events: EventSender) -> Self {
        Self {
            private_key: None,
            mac_address,
            server_header: SERVER_HEADER.to_string(),
            events,
        }
    }

    /// Use `key` for `Apple-Challenge` answers
    #[must_use]
    pub fn with_private_key(mut self, key: Option<Arc<RaopRsaPrivateKey>>) -> Self {
        self.private_key = key;
        self
    }
}

/// Serve one RTSP connection until the client leaves, sends TEARDOWN,
/// sends unparseable framing or `shutdown` fires
///
/// `handler.shutdown()` runs on every exit path.
///
/// # Errors
///
/// Returns `RaopError::Network` if reading or writing the stream fails.
pub async fn serve_connection<S, H>(
    mut stream: S,
    client: SocketAddr,
    local: SocketAddr,
    mut handler: H,
    ctx: &ConnectionContext,
    shutdown: CancellationToken,
) -> Result<(), RaopError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: RtspHandler,
{
    let result = run(&mut stream, local, &mut handler, ctx, &shutdown).await;

    handler.shutdown().await;
    let _ = stream.shutdown().await;

    let reason = match &result {
        Ok(reason) => (*reason).to_string(),
        Err(e) => e.to_string(),
    };
    tracing::info!(client = %client, reason = %reason, "RTSP connection closed");
    emit(
        &ctx.events,
        ServerEvent::ClientDisconnected {
            address: client,
            reason,
        },
    );

    result.map(|_| ())
}

async fn run<S, H>(
    stream: &mut S,
    local: SocketAddr,
    handler: &mut H,
    ctx: &ConnectionContext,
    shutdown: &CancellationToken,
) -> Result<&'static str, RaopError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: RtspHandler,
{
    let mut codec = RtspServerCodec::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = tokio::select! {
            () = shutdown.cancelled() => return Ok("server stopped"),
            read = stream.read(&mut buf) => {
                read.map_err(|e| RaopError::network("read RTSP request", e))?
            }
        };
        if n == 0 {
            return Ok("connection closed by client");
        }

        codec.feed(&buf[..n]);

        loop {
            let request = match codec.decode() {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed RTSP request");
                    let response = decorate(ResponseBuilder::error(StatusCode::BAD_REQUEST), ctx)
                        .build();
                    write_response(stream, &response).await?;
                    return Ok("malformed request");
                }
            };

            let response = respond(&request, handler, ctx, local).await;
            write_response(stream, &response).await?;

            if request.method == Method::Teardown {
                return Ok("teardown");
            }
        }
    }
}

async fn respond<H: RtspHandler>(
    request: &RtspRequest,
    handler: &mut H,
    ctx: &ConnectionContext,
    local: SocketAddr,
) -> RtspResponse {
    tracing::debug!(method = %request.method, uri = %request.uri, cseq = ?request.cseq(), "RTSP request");

    let builder = if request.method == Method::Options {
        ResponseBuilder::ok().header(names::PUBLIC, Method::PUBLIC)
    } else {
        match handler.handle(request).await {
            Ok(builder) => builder,
            Err(e) => {
                if e.is_client_error() {
                    tracing::warn!(method = %request.method, error = %e, "request rejected");
                } else {
                    tracing::error!(method = %request.method, error = %e, "request failed");
                }
                ResponseBuilder::error(e.status_code())
            }
        }
    };

    let mut builder = decorate(builder, ctx);
    if let Some(cseq) = request.headers.get(names::CSEQ) {
        builder = builder.header(names::CSEQ, cseq);
    }
    if let Some(response) = apple_response(request, ctx, local) {
        builder = builder.header(raop::APPLE_RESPONSE, &response);
    }
    builder.build()
}

fn decorate(builder: ResponseBuilder, ctx: &ConnectionContext) -> ResponseBuilder {
    builder
        .header(names::SERVER, &ctx.server_header)
        .header(raop::AUDIO_JACK_STATUS, AUDIO_JACK_CONNECTED)
}

fn apple_response(
    request: &RtspRequest,
    ctx: &ConnectionContext,
    local: SocketAddr,
) -> Option<String> {
    let challenge = request.headers.get(raop::APPLE_CHALLENGE)?;
    let key = ctx.private_key.as_deref()?;

    match generate_response(key, challenge, &local.ip().to_canonical(), &ctx.mac_address) {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::warn!(error = %e, "cannot answer Apple-Challenge");
            None
        }
    }
}

async fn write_response<S>(stream: &mut S, response: &RtspResponse) -> Result<(), RaopError>
where
    S: AsyncWrite + Unpin,
{
    tracing::debug!(status = response.status.as_u16(), cseq = ?response.cseq(), "RTSP response");
    stream
        .write_all(&encode_response(response))
        .await
        .map_err(|e| RaopError::network("write RTSP response", e))?;
    stream
        .flush()
        .await
        .map_err(|e| RaopError::network("flush RTSP response", e))
}
