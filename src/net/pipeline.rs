//! Per-connection proxy pipeline.
//!
//! # Responsibilities
//! - Terminate TLS on the client leg when configured
//! - Open the upstream leg, trying each bootstrap server in order
//! - Decode frames on both legs and run them through the connection's filter chain
//! - Apply backpressure between the legs through their outbound buffers
//! - Deliver replies to the client in request order
//!
//! # Design Decisions
//! - One task per connection on its worker loop; both directions are pumped by
//!   the same task, so the filter chain never runs concurrently with itself
//! - A direction reads its next frame only after the chain settled the previous one
//! - End of stream on one leg flushes the other leg's pending bytes, then closes both
//! - Any error closes both legs at once; late filter results are discarded

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::Instrument;

use super::buffer::OutboundBuffer;
use super::connection::{Connection, ConnectionState, ConnectionTracker, Leg};
use super::ordering::ReplyQueue;
use crate::config::{HostPort, ListenerConfig};
use crate::filter::{FilterChain, FilterChainFactory, RequestOutcome};
use crate::future::Cause;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics::{self, Direction};
use crate::protocol::{CodecError, InFlightRequests, RequestCodec, ResponseCodec};

/// Errors that end a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("no bootstrap server reachable ({addresses}): {source}")]
    Upstream {
        addresses: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("filter chain failed: {0}")]
    Filter(Cause),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Handshake(_) => "handshake",
            ConnectionError::Upstream { .. } => "upstream",
            ConnectionError::Codec(_) => "codec",
            ConnectionError::Filter(_) => "filter",
            ConnectionError::Io(_) => "io",
        }
    }
}

/// Per-connection tuning, fixed at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_frame_size: usize,
    pub connect_timeout: Duration,
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub log_network: bool,
    pub log_frames: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            connect_timeout: config.connect_timeout(),
            low_watermark: config.write_buffer.low_watermark,
            high_watermark: config.write_buffer.high_watermark,
            log_network: config.log_network,
            log_frames: config.log_frames,
        }
    }
}

/// Builds the pipeline for each accepted socket. Shared by every worker loop.
pub struct ProxyInitializer {
    upstreams: Vec<HostPort>,
    tls: Option<TlsAcceptor>,
    chain_factory: Arc<FilterChainFactory>,
    settings: PipelineSettings,
    tracker: ConnectionTracker,
}

impl ProxyInitializer {
    pub fn new(
        upstreams: Vec<HostPort>,
        tls: Option<TlsAcceptor>,
        chain_factory: Arc<FilterChainFactory>,
        settings: PipelineSettings,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            upstreams,
            tls,
            chain_factory,
            settings,
            tracker,
        }
    }

    /// Serve one client until either leg closes, an error occurs, or shutdown.
    pub async fn handle(self: Arc<Self>, stream: TcpStream, peer: SocketAddr, mut shutdown: ShutdownSignal) {
        let guard = self.tracker.track();
        let connection = Connection::new(guard.id(), peer);
        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);

        async move {
            tracing::debug!("Connection accepted");
            let result = tokio::select! {
                result = self.run(&connection, stream) => result,
                _ = shutdown.wait() => {
                    tracing::debug!("Closing for shutdown");
                    Ok(())
                }
            };
            connection.transition(ConnectionState::Closing);

            match result {
                Ok(()) => tracing::debug!("Connection closed"),
                Err(e) => {
                    metrics::connection_error(e.kind());
                    tracing::warn!(error = %e, upstream = ?connection.upstream_addr(), "Connection failed");
                }
            }
            drop(guard);
        }
        .instrument(span)
        .await
    }

    async fn run(&self, connection: &Connection, client: TcpStream) -> Result<(), ConnectionError> {
        client.set_nodelay(true)?;
        match &self.tls {
            Some(acceptor) => {
                let client = acceptor.accept(client).await.map_err(ConnectionError::Handshake)?;
                connection.mark_tls();
                self.proxy(connection, client).await
            }
            None => self.proxy(connection, client).await,
        }
    }

    async fn proxy<S>(&self, connection: &Connection, client: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        connection.transition(ConnectionState::Connecting);
        let upstream = self.connect_upstream().await?;
        if let Ok(addr) = upstream.peer_addr() {
            connection.bind_upstream(addr);
        }
        connection.transition(ConnectionState::Proxying);
        tracing::debug!(upstream = ?connection.upstream_addr(), tls = connection.is_tls(), "Proxying");

        let (client_read, mut client_write) = tokio::io::split(client);
        let (broker_read, mut broker_write) = upstream.into_split();

        let settings = &self.settings;
        let max = settings.max_frame_size;
        let in_flight = InFlightRequests::default();
        let chain = self.chain_factory.create_chain();
        let to_broker = OutboundBuffer::new(settings.low_watermark, settings.high_watermark);
        let to_client = OutboundBuffer::new(settings.low_watermark, settings.high_watermark);
        let replies = ReplyQueue::new(settings.high_watermark);

        let requests = FramedRead::new(client_read, RequestCodec::new(max));
        let responses = FramedRead::new(broker_read, ResponseCodec::new(max, in_flight.clone()));
        let legs = Legs {
            connection,
            chain: &chain,
            to_broker: &to_broker,
            to_client: &to_client,
            replies: &replies,
            settings,
        };

        tokio::select! {
            result = legs.pump_requests(requests, ResponseCodec::new(max, in_flight)) => result,
            result = legs.pump_responses(responses) => result,
            result = to_broker.drain_into(&mut broker_write) => result.map_err(ConnectionError::Io),
            result = to_client.drain_into(&mut client_write) => result.map_err(ConnectionError::Io),
        }
    }

    async fn connect_upstream(&self) -> Result<TcpStream, ConnectionError> {
        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no bootstrap servers configured");
        for address in &self.upstreams {
            let connect = TcpStream::connect((address.host.as_str(), address.port));
            match tokio::time::timeout(self.settings.connect_timeout, connect).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!(upstream = %address, error = %e, "Upstream connect failed");
                    last_error = e;
                }
                Err(_) => {
                    tracing::debug!(upstream = %address, "Upstream connect timed out");
                    last_error = io::Error::new(io::ErrorKind::TimedOut, format!("connect to {address} timed out"));
                }
            }
            metrics::upstream_connect_failure();
        }

        Err(ConnectionError::Upstream {
            addresses: self
                .upstreams
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            source: last_error,
        })
    }
}

/// The state both pumps of one connection share.
struct Legs<'a> {
    connection: &'a Connection,
    chain: &'a FilterChain,
    to_broker: &'a OutboundBuffer,
    to_client: &'a OutboundBuffer,
    replies: &'a ReplyQueue,
    settings: &'a PipelineSettings,
}

impl Legs<'_> {
    /// Client → filters → broker (or straight back to the client).
    async fn pump_requests<R>(
        &self,
        mut requests: FramedRead<R, RequestCodec>,
        mut broker_encoder: ResponseCodec,
    ) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut client_encoder = RequestCodec::new(self.settings.max_frame_size);
        loop {
            self.gate_client().await;
            let Some(frame) = requests.next().await else {
                tracing::debug!("Client closed its leg");
                self.to_broker.close();
                return std::future::pending().await;
            };
            let frame = frame?;

            metrics::frame(Direction::Request, frame.header.request_api_key);
            if self.settings.log_frames {
                tracing::debug!(
                    api_key = frame.header.request_api_key,
                    api_version = frame.api_version(),
                    correlation_id = frame.correlation_id(),
                    size = frame.body.len(),
                    "Request frame"
                );
            }

            let started = Instant::now();
            let outcome = self.chain.on_client_request(frame).await.map_err(ConnectionError::Filter)?;
            metrics::filter_chain_duration(Direction::Request, started.elapsed());

            match outcome {
                RequestOutcome::Forward(frame) => {
                    if frame.expects_response() {
                        self.replies.expect_broker(frame.correlation_id());
                    }
                    let mut wire = BytesMut::new();
                    broker_encoder.encode(frame, &mut wire)?;
                    self.queue("broker", self.to_broker, wire.freeze());
                }
                RequestOutcome::Respond(response) => {
                    metrics::short_circuit_response();
                    let mut wire = BytesMut::new();
                    client_encoder.encode(response, &mut wire)?;
                    self.log_queued("client", wire.len());
                    self.replies.reply_now(wire.freeze(), self.to_client);
                }
                RequestOutcome::Drop => metrics::frame_dropped(Direction::Request),
            }
        }
    }

    /// Broker → filters → client.
    async fn pump_responses<R>(&self, mut responses: FramedRead<R, ResponseCodec>) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut client_encoder = RequestCodec::new(self.settings.max_frame_size);
        loop {
            self.gate_broker().await;
            let Some(frame) = responses.next().await else {
                tracing::debug!("Broker closed its leg");
                self.to_client.close();
                return std::future::pending().await;
            };
            let frame = frame?;
            let correlation_id = frame.correlation_id();

            metrics::frame(Direction::Response, frame.api_key);
            if self.settings.log_frames {
                tracing::debug!(
                    api_key = frame.api_key,
                    api_version = frame.api_version,
                    correlation_id,
                    size = frame.body.len(),
                    "Response frame"
                );
            }

            let started = Instant::now();
            let response = self.chain.on_broker_response(frame).await.map_err(ConnectionError::Filter)?;
            metrics::filter_chain_duration(Direction::Response, started.elapsed());

            match response {
                Some(response) => {
                    let mut wire = BytesMut::new();
                    client_encoder.encode(response, &mut wire)?;
                    self.log_queued("client", wire.len());
                    self.replies.broker_replied(correlation_id, Some(wire.freeze()), self.to_client);
                }
                None => {
                    metrics::frame_dropped(Direction::Response);
                    self.replies.broker_replied(correlation_id, None, self.to_client);
                }
            }
        }
    }

    fn queue(&self, leg: &'static str, buffer: &OutboundBuffer, bytes: Bytes) {
        self.log_queued(leg, bytes.len());
        buffer.push(bytes);
    }

    fn log_queued(&self, leg: &'static str, bytes: usize) {
        if self.settings.log_network {
            tracing::trace!(leg, bytes, "Queued bytes");
        }
    }

    /// Suspends client reads while anything the client feeds is over its high watermark.
    ///
    /// Requests fill `to_broker`; filter answers fill `to_client` or wait in the reply queue.
    async fn gate_client(&self) {
        let blocked = |buffer: &OutboundBuffer| !buffer.is_writable() && !buffer.is_closed();
        if !blocked(self.to_broker) && !blocked(self.to_client) && self.replies.is_writable() {
            return;
        }
        self.connection.set_reads_enabled(Leg::Client, false);
        metrics::read_suspended(Leg::Client.name());
        tracing::trace!(
            to_broker = self.to_broker.pending_bytes(),
            to_client = self.to_client.pending_bytes(),
            held = self.replies.held_bytes(),
            "Client reads suspended"
        );
        loop {
            if blocked(self.to_broker) {
                self.to_broker.wait_writable().await;
            } else if blocked(self.to_client) {
                self.to_client.wait_writable().await;
            } else if !self.replies.is_writable() {
                self.replies.wait_writable().await;
            } else {
                break;
            }
        }
        self.connection.set_reads_enabled(Leg::Client, true);
        tracing::trace!("Client reads resumed");
    }

    /// Suspends broker reads while the client's outbound buffer is over its high watermark.
    async fn gate_broker(&self) {
        if self.to_client.is_writable() || self.to_client.is_closed() {
            return;
        }
        self.connection.set_reads_enabled(Leg::Broker, false);
        metrics::read_suspended(Leg::Broker.name());
        tracing::trace!(to_client = self.to_client.pending_bytes(), "Broker reads suspended");
        self.to_client.wait_writable().await;
        self.connection.set_reads_enabled(Leg::Broker, true);
        tracing::trace!("Broker reads resumed");
    }
}
