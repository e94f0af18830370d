//! End-to-end record transformation and broker address rewriting.

use bytes::Bytes;
use kafka_protocol::messages::fetch_response::{FetchableTopicResponse, PartitionData};
use kafka_protocol::messages::metadata_response::MetadataResponseBroker;
use kafka_protocol::messages::{
    ApiKey, BrokerId, FetchResponse, MetadataResponse, ProduceRequest, TopicName,
};
use kafka_protocol::protocol::StrBytes;

mod common;

use common::{MockBroker, TestClient};

const MY_TEST_TOPIC_ENCODED: [u8; 13] = [0x3d, 0x5a, 0x61, 0x61, 0x64, 0x21, 0x15, 0x6c, 0x64, 0x67, 0x61, 0x59, 0x16];
const OTHER_TEST_TOPIC_ENCODED: [u8; 13] =
    [0xa7, 0xc4, 0xcb, 0xcb, 0xce, 0x8b, 0x7f, 0xd6, 0xce, 0xd1, 0xcb, 0xc3, 0x80];

/// Values the broker saw in the Produce request with this correlation id.
fn produced_values(broker: &MockBroker, correlation_id: i32) -> Vec<Bytes> {
    let frame = broker
        .received()
        .into_iter()
        .find(|frame| frame.correlation_id() == correlation_id)
        .expect("request reached the broker");
    let request: ProduceRequest = frame.decode_body().unwrap();
    let records = request.topic_data[0].partition_data[0].records.clone().unwrap();
    common::record_values(records)
}

#[tokio::test]
async fn test_produce_values_are_encoded_per_topic() {
    let broker = MockBroker::start(|request| Some(request.reply(Bytes::new()))).await;
    let mut config = common::proxy_config(broker.addr());
    config.filters.push(common::filter(
        "ProduceRequestTransformation",
        "transformation = \"TopicRotationEncoder\"",
    ));
    let (runtime, proxy_addr) = common::start_proxy(config);

    let mut client = TestClient::connect(proxy_addr).await;
    client
        .round_trip(common::produce_request(7, 1, 1, "my-test-topic", &[b"Hello, world!"]))
        .await;
    client
        .round_trip(common::produce_request(7, 2, 1, "other-test-topic", &[b"Hello, world!"]))
        .await;

    assert_eq!(produced_values(&broker, 1), vec![Bytes::from_static(&MY_TEST_TOPIC_ENCODED)]);
    assert_eq!(produced_values(&broker, 2), vec![Bytes::from_static(&OTHER_TEST_TOPIC_ENCODED)]);

    runtime.shutdown().unwrap();
}

#[tokio::test]
async fn test_fetch_values_are_decoded_per_topic() {
    let broker = MockBroker::start(|request| {
        let body = FetchResponse::default().with_responses(vec![FetchableTopicResponse::default()
            .with_topic(TopicName(StrBytes::from_static_str("my-test-topic")))
            .with_partitions(vec![PartitionData::default()
                .with_partition_index(0)
                .with_records(Some(common::record_set(&[&MY_TEST_TOPIC_ENCODED])))])]);
        let mut response = request.reply(Bytes::new());
        response.encode_body(&body).unwrap();
        Some(response)
    })
    .await;

    let mut config = common::proxy_config(broker.addr());
    config.filters.push(common::filter(
        "FetchResponseTransformation",
        "transformation = \"TopicRotationDecoder\"",
    ));
    let (runtime, proxy_addr) = common::start_proxy(config);

    let mut client = TestClient::connect(proxy_addr).await;
    let response = client
        .round_trip(common::request(ApiKey::Fetch, 11, 3, Bytes::from_static(b"fetch")))
        .await;

    let fetched: FetchResponse = response.decode_body().unwrap();
    let records = fetched.responses[0].partitions[0].records.clone().unwrap();
    assert_eq!(common::record_values(records), vec![Bytes::from_static(b"Hello, world!")]);

    runtime.shutdown().unwrap();
}

#[tokio::test]
async fn test_metadata_points_clients_at_the_proxy() {
    let broker = MockBroker::start(|request| {
        let body = MetadataResponse::default().with_brokers(vec![MetadataResponseBroker::default()
            .with_node_id(BrokerId(1))
            .with_host(StrBytes::from_static_str("broker-1.internal"))
            .with_port(9092)]);
        let mut response = request.reply(Bytes::new());
        response.encode_body(&body).unwrap();
        Some(response)
    })
    .await;

    let mut config = common::proxy_config(broker.addr());
    config.filters.push(common::filter("BrokerAddress", ""));
    let (runtime, proxy_addr) = common::start_proxy(config);

    let mut client = TestClient::connect(proxy_addr).await;
    let response = client
        .round_trip(common::request(ApiKey::Metadata, 9, 4, Bytes::from_static(&[0, 0])))
        .await;

    let metadata: MetadataResponse = response.decode_body().unwrap();
    assert_eq!(&*metadata.brokers[0].host, "127.0.0.1");
    assert_eq!(metadata.brokers[0].port, i32::from(proxy_addr.port()));

    runtime.shutdown().unwrap();
}
