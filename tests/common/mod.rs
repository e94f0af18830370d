//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
use kafka_protocol::messages::{ApiKey, ProduceRequest, RequestHeader, TopicName};
use kafka_protocol::protocol::StrBytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use krpc_proxy::config::{ClusterConfig, FilterDefinition};
use krpc_proxy::filter::{FilterFactory, FilterRegistry};
use krpc_proxy::future::{Cause, Future};
use krpc_proxy::protocol::records::{self, Batch, RecordBatch};
use krpc_proxy::protocol::{RequestCodec, RequestFrame, ResponseCodec, ResponseFrame};
use krpc_proxy::{ProtocolFilter, ProxyConfig, ProxyRuntime, RequestAction};

pub const TIMEOUT: Duration = Duration::from_secs(5);

type Handler = dyn Fn(&RequestFrame) -> Option<ResponseFrame> + Send + Sync;

/// A broker stand-in that speaks length-prefixed Kafka frames.
///
/// Every request is recorded; the handler decides what, if anything, to answer.
pub struct MockBroker {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<RequestFrame>>>,
}

impl MockBroker {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> Option<ResponseFrame> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, RequestCodec::default());
                    while let Some(Ok(request)) = framed.next().await {
                        let response = handler(&request);
                        log.lock().unwrap().push(request);
                        if let Some(response) = response {
                            if framed.send(response).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self { addr, received }
    }

    /// Answers every request that expects a response with the request's own body.
    pub async fn echo() -> Self {
        Self::start(|request| request.expects_response().then(|| request.reply(request.body.clone()))).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn received(&self) -> Vec<RequestFrame> {
        self.received.lock().unwrap().clone()
    }
}

/// A Kafka client stand-in that tracks its own in-flight requests.
pub struct TestClient<S> {
    framed: Framed<S, ResponseCodec>,
}

impl TestClient<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self::over(stream)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn over(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, ResponseCodec::default()),
        }
    }

    pub async fn send(&mut self, request: RequestFrame) {
        self.framed.send(request).await.unwrap();
    }

    pub async fn receive(&mut self) -> ResponseFrame {
        tokio::time::timeout(TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for a response")
            .expect("connection closed")
            .unwrap()
    }

    pub async fn round_trip(&mut self, request: RequestFrame) -> ResponseFrame {
        self.send(request).await;
        self.receive().await
    }

    /// `true` if the proxy closed the connection within the timeout.
    pub async fn closed(&mut self) -> bool {
        matches!(tokio::time::timeout(TIMEOUT, self.framed.next()).await, Ok(None) | Ok(Some(Err(_))))
    }
}

pub fn request(api_key: ApiKey, api_version: i16, correlation_id: i32, body: Bytes) -> RequestFrame {
    let header = RequestHeader::default()
        .with_request_api_key(api_key as i16)
        .with_request_api_version(api_version)
        .with_correlation_id(correlation_id)
        .with_client_id(Some(StrBytes::from_static_str("krpc-test")));
    RequestFrame::new(header, body)
}

/// A Produce request writing `values` to partition 0 of `topic`.
pub fn produce_request(
    api_version: i16,
    correlation_id: i32,
    acks: i16,
    topic: &'static str,
    values: &[&'static [u8]],
) -> RequestFrame {
    let body = ProduceRequest::default()
        .with_acks(acks)
        .with_timeout_ms(5_000)
        .with_topic_data(vec![TopicProduceData::default()
            .with_name(TopicName(StrBytes::from_static_str(topic)))
            .with_partition_data(vec![PartitionProduceData::default()
                .with_index(0)
                .with_records(Some(record_set(values)))])]);
    let mut frame = request(ApiKey::Produce, api_version, correlation_id, Bytes::new());
    frame.encode_body(&body).unwrap();
    frame
}

/// A record set holding one uncompressed batch with the given values.
pub fn record_set(values: &[&'static [u8]]) -> Bytes {
    let batch = RecordBatch::of_values(0, values.iter().map(|v| Bytes::from_static(*v)));
    records::encode_batches(&[Batch::Decoded(batch)])
}

/// Values of the first batch of a record set.
pub fn record_values(record_set: Bytes) -> Vec<Bytes> {
    match records::decode_batches(record_set).unwrap().remove(0) {
        Batch::Decoded(batch) => batch.records.into_iter().filter_map(|r| r.value).collect(),
        Batch::Opaque(_) => panic!("expected a decoded batch"),
    }
}

/// Minimal config proxying to `bootstrap` on an ephemeral port.
pub fn proxy_config(bootstrap: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.proxy.address = "127.0.0.1:0".into();
    config.proxy.worker_threads = Some(2);
    config.proxy.connect_timeout_ms = 2_000;
    config.proxy.shutdown_grace_ms = 500;
    config.clusters.insert(
        "test".into(),
        ClusterConfig {
            bootstrap_servers: bootstrap.to_string(),
        },
    );
    config
}

pub fn filter(filter_type: &str, config: &str) -> FilterDefinition {
    FilterDefinition {
        filter_type: filter_type.into(),
        config: toml::from_str(config).unwrap(),
    }
}

/// Start a proxy and return it with its bound address.
pub fn start_proxy(config: ProxyConfig) -> (ProxyRuntime, SocketAddr) {
    let runtime = ProxyRuntime::new(config);
    let addr = runtime.startup().unwrap();
    (runtime, addr)
}

/// Start a proxy resolving `[[filters]]` against `registry`.
pub fn start_proxy_with(config: ProxyConfig, registry: FilterRegistry) -> (ProxyRuntime, SocketAddr) {
    let runtime = ProxyRuntime::with_registry(config, registry);
    let addr = runtime.startup().unwrap();
    (runtime, addr)
}

/// Answers ApiVersions requests itself with a body of `reply_size` bytes.
pub struct AnswerApiVersions {
    reply_size: usize,
}

impl ProtocolFilter for AnswerApiVersions {
    fn on_client_request(&mut self, frame: RequestFrame) -> Future<RequestAction> {
        if frame.api_key() == Some(ApiKey::ApiVersions) {
            let reply = frame.reply(Bytes::from(vec![0xab; self.reply_size]));
            return Future::succeeded(RequestAction::Respond(reply));
        }
        Future::succeeded(RequestAction::Forward(frame))
    }
}

/// Fails the filter chain on every request with the given api key.
pub struct RejectApiKey {
    api_key: ApiKey,
}

impl ProtocolFilter for RejectApiKey {
    fn on_client_request(&mut self, frame: RequestFrame) -> Future<RequestAction> {
        if frame.api_key() == Some(self.api_key) {
            return Future::failed(Cause::msg("request rejected"));
        }
        Future::succeeded(RequestAction::Forward(frame))
    }
}

/// Built-in filters plus `AnswerApiVersions` and `RejectDescribeGroups`.
pub fn test_registry(reply_size: usize) -> FilterRegistry {
    let mut registry = FilterRegistry::with_builtins();
    registry.register("AnswerApiVersions", move |_, _| {
        let factory = move || Box::new(AnswerApiVersions { reply_size }) as Box<dyn ProtocolFilter>;
        Ok(Arc::new(factory) as Arc<dyn FilterFactory>)
    });
    registry.register("RejectDescribeGroups", |_, _| {
        let factory = || {
            Box::new(RejectApiKey {
                api_key: ApiKey::DescribeGroups,
            }) as Box<dyn ProtocolFilter>
        };
        Ok(Arc::new(factory) as Arc<dyn FilterFactory>)
    });
    registry
}
