//! RTSP listener lifecycle
//!
//! [`RtspServer`] owns a TCP listener and its accept loop. Every accepted
//! connection gets a fresh handler from a [`HandlerFactory`] and runs in
//! its own task; stopping the server closes every live connection, which
//! in turn releases their channels and peers.

use crate::receiver::connection::{ConnectionContext, RtspHandler, serve_connection};
use crate::receiver::events::{EventSender, ServerEvent, emit};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Creates the handler for each accepted connection
pub trait HandlerFactory: Send + Sync + 'static {
    /// Handler type serving one connection
    type Handler: RtspHandler + 'static;

    /// Handler for a connection from `client` accepted on `local`
    fn create(&self, client: SocketAddr, local: SocketAddr) -> Self::Handler;
}

/// Listener lifecycle errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Server already running
    #[error("server already running")]
    AlreadyRunning,

    /// The listen address could not be bound
    #[error("cannot bind {address}: {source}")]
    Bind {
        /// Requested address
        address: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// RTSP server generic over its per-connection handler
pub struct RtspServer<F: HandlerFactory> {
    name: String,
    bind: SocketAddr,
    factory: Arc<F>,
    connection: Arc<ConnectionContext>,
    running: Option<Running>,
}

impl<F: HandlerFactory> RtspServer<F> {
    /// Create a stopped server
    pub fn new(
        name: impl Into<String>,
        bind: SocketAddr,
        factory: F,
        connection: ConnectionContext,
    ) -> Self {
        Self {
            name: name.into(),
            bind,
            factory: Arc::new(factory),
            connection: Arc::new(connection),
            running: None,
        }
    }

    /// Name used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.connection.events.subscribe()
    }

    /// Event channel of this server
    #[must_use]
    pub fn events(&self) -> &EventSender {
        &self.connection.events
    }

    /// Factory shared by every connection
    #[must_use]
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Bound address while running
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Whether the accept loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind the listener and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns `ServerError::AlreadyRunning` on a second start and
    /// `ServerError::Bind` if the address is unavailable.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(accept_loop(
            listener,
            self.factory.clone(),
            self.connection.clone(),
            self.name.clone(),
            shutdown_rx,
        ));

        tracing::info!(name = %self.name, address = %local_addr, "RTSP server started");
        emit(
            &self.connection.events,
            ServerEvent::Started {
                name: self.name.clone(),
                address: local_addr,
            },
        );

        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, close every connection and wait for them to finish
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown_tx.send(()).await;
        if let Err(e) = running.task.await {
            tracing::warn!(name = %self.name, error = %e, "accept loop failed");
        }
    }
}

impl<F: HandlerFactory> Drop for RtspServer<F> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

async fn accept_loop<F: HandlerFactory>(
    listener: TcpListener,
    factory: Arc<F>,
    ctx: Arc<ConnectionContext>,
    name: String,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let cancel = CancellationToken::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, client)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(client = %client, error = %e, "cannot set TCP_NODELAY");
                    }
                    let local = match stream.local_addr() {
                        Ok(local) => local,
                        Err(e) => {
                            tracing::error!(client = %client, error = %e, "connection has no local address");
                            continue;
                        }
                    };

                    tracing::info!(client = %client, "RTSP connection accepted");
                    emit(&ctx.events, ServerEvent::ClientConnected { address: client });

                    let handler = factory.create(client, local);
                    let ctx = ctx.clone();
                    let cancel = cancel.child_token();
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(stream, client, local, handler, &ctx, cancel).await {
                            tracing::error!(client = %client, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "accept error"),
            },
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "connection task failed");
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    drop(listener);
    cancel.cancel();
    while let Some(result) = connections.join_next().await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "connection task failed");
        }
    }

    tracing::info!(name = %name, "RTSP server stopped");
    emit(&ctx.events, ServerEvent::Stopped { name });
}
