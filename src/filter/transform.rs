//! Filters that rewrite record values in Produce requests and Fetch responses.

use std::sync::Arc;

use bytes::Bytes;
use kafka_protocol::messages::{ApiKey, FetchResponse, ProduceRequest};
use serde::Deserialize;

use super::factory::{typed_config, FilterConfig, FilterConfigError, FilterFactory, FilterSetup};
use super::rotation::{transformation_named, ByteTransformation};
use super::{ProtocolFilter, RequestAction};
use crate::future::{join_all, Cause, Future};
use crate::protocol::records::{self, Batch};
use crate::protocol::{RequestFrame, ResponseFrame};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransformationConfig {
    transformation: String,
}

fn resolve(filter: &str, config: &FilterConfig) -> Result<Arc<dyn ByteTransformation>, FilterConfigError> {
    let config: TransformationConfig = typed_config(filter, config)?;
    transformation_named(&config.transformation).ok_or_else(|| FilterConfigError::UnknownTransformation {
        filter: filter.to_string(),
        transformation: config.transformation,
    })
}

/// Applies `transformation` to every record value in a records blob.
fn transform_records(
    transformation: &dyn ByteTransformation,
    topic: &str,
    records: Bytes,
) -> Future<Bytes> {
    let mut batches = match records::decode_batches(records) {
        Ok(batches) => batches,
        Err(e) => return Future::failed(Cause::new(e)),
    };

    let pending: Vec<Future<Bytes>> = batches
        .iter()
        .filter_map(|batch| match batch {
            Batch::Decoded(batch) => Some(batch),
            Batch::Opaque(_) => None,
        })
        .flat_map(|batch| batch.records.iter())
        .filter_map(|record| record.value.clone())
        .map(|value| transformation.transform(topic, value))
        .collect();

    join_all(pending).map(move |values| {
        let mut values = values.into_iter();
        for batch in batches.iter_mut() {
            if let Batch::Decoded(batch) = batch {
                for record in batch.records.iter_mut().filter(|r| r.value.is_some()) {
                    record.value = values.next();
                }
            }
        }
        records::encode_batches(&batches)
    })
}

/// Transforms record values of outgoing Produce requests.
pub struct ProduceRequestTransformation {
    transformation: Arc<dyn ByteTransformation>,
}

impl ProduceRequestTransformation {
    pub fn new(transformation: Arc<dyn ByteTransformation>) -> Self {
        Self { transformation }
    }

    pub fn factory(config: &FilterConfig, _setup: &FilterSetup) -> Result<Arc<dyn FilterFactory>, FilterConfigError> {
        let transformation = resolve("ProduceRequestTransformation", config)?;
        Ok(Arc::new(move || {
            Box::new(Self::new(Arc::clone(&transformation))) as Box<dyn ProtocolFilter>
        }))
    }
}

impl ProtocolFilter for ProduceRequestTransformation {
    fn on_client_request(&mut self, mut frame: RequestFrame) -> Future<RequestAction> {
        if frame.api_key() != Some(ApiKey::Produce) {
            return Future::succeeded(RequestAction::Forward(frame));
        }
        let mut request: ProduceRequest = match frame.decode_body() {
            Ok(request) => request,
            Err(e) => return Future::failed(Cause::new(e)),
        };

        let mut slots = Vec::new();
        let mut pending = Vec::new();
        for (t, topic) in request.topic_data.iter().enumerate() {
            for (p, partition) in topic.partition_data.iter().enumerate() {
                if let Some(records) = partition.records.clone() {
                    slots.push((t, p));
                    pending.push(transform_records(&*self.transformation, &topic.name, records));
                }
            }
        }

        join_all(pending).try_map(move |rewritten| {
            for ((t, p), records) in slots.into_iter().zip(rewritten) {
                request.topic_data[t].partition_data[p].records = Some(records);
            }
            frame.encode_body(&request).map_err(Cause::new)?;
            Ok(RequestAction::Forward(frame))
        })
    }
}

/// Transforms record values of incoming Fetch responses.
pub struct FetchResponseTransformation {
    transformation: Arc<dyn ByteTransformation>,
}

impl FetchResponseTransformation {
    pub fn new(transformation: Arc<dyn ByteTransformation>) -> Self {
        Self { transformation }
    }

    pub fn factory(config: &FilterConfig, _setup: &FilterSetup) -> Result<Arc<dyn FilterFactory>, FilterConfigError> {
        let transformation = resolve("FetchResponseTransformation", config)?;
        Ok(Arc::new(move || {
            Box::new(Self::new(Arc::clone(&transformation))) as Box<dyn ProtocolFilter>
        }))
    }
}

impl ProtocolFilter for FetchResponseTransformation {
    fn on_broker_response(&mut self, mut frame: ResponseFrame) -> Future<Option<ResponseFrame>> {
        if frame.api_key() != Some(ApiKey::Fetch) {
            return Future::succeeded(Some(frame));
        }
        let mut response: FetchResponse = match frame.decode_body() {
            Ok(response) => response,
            Err(e) => return Future::failed(Cause::new(e)),
        };

        let mut slots = Vec::new();
        let mut pending = Vec::new();
        for (t, topic) in response.responses.iter().enumerate() {
            for (p, partition) in topic.partitions.iter().enumerate() {
                if let Some(records) = partition.records.clone() {
                    slots.push((t, p));
                    pending.push(transform_records(&*self.transformation, &topic.topic, records));
                }
            }
        }

        join_all(pending).try_map(move |rewritten| {
            for ((t, p), records) in slots.into_iter().zip(rewritten) {
                response.responses[t].partitions[p].records = Some(records);
            }
            frame.encode_body(&response).map_err(Cause::new)?;
            Ok(Some(frame))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::rotation::{TopicRotationDecoder, TopicRotationEncoder};
    use crate::future::Promise;
    use crate::protocol::records::RecordBatch;
    use kafka_protocol::messages::fetch_response::{FetchableTopicResponse, PartitionData};
    use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
    use kafka_protocol::messages::{RequestHeader, TopicName};
    use kafka_protocol::protocol::StrBytes;
    use std::cell::RefCell;

    const ENCODED: [u8; 13] = [0x3d, 0x5a, 0x61, 0x61, 0x64, 0x21, 0x15, 0x6c, 0x64, 0x67, 0x61, 0x59, 0x16];

    fn records_of(value: &'static [u8]) -> Bytes {
        records::encode_batches(&[Batch::Decoded(RecordBatch::of_values(0, [Bytes::from_static(value)]))])
    }

    fn first_value(records: Bytes) -> Bytes {
        match records::decode_batches(records).unwrap().remove(0) {
            Batch::Decoded(mut batch) => batch.records.remove(0).value.unwrap(),
            Batch::Opaque(_) => panic!("expected a decoded batch"),
        }
    }

    fn produce_frame(topic: &'static str, value: &'static [u8]) -> RequestFrame {
        let request = ProduceRequest::default().with_acks(1).with_timeout_ms(5000).with_topic_data(vec![
            TopicProduceData::default()
                .with_name(TopicName(StrBytes::from_static_str(topic)))
                .with_partition_data(vec![PartitionProduceData::default()
                    .with_index(0)
                    .with_records(Some(records_of(value)))]),
        ]);
        let header = RequestHeader::default()
            .with_request_api_key(ApiKey::Produce as i16)
            .with_request_api_version(7)
            .with_correlation_id(1);
        let mut frame = RequestFrame::new(header, Bytes::new());
        frame.encode_body(&request).unwrap();
        frame
    }

    #[test]
    fn produce_values_are_encoded_per_topic() {
        let mut filter = ProduceRequestTransformation::new(Arc::new(TopicRotationEncoder));
        let action = filter
            .on_client_request(produce_frame("my-test-topic", b"Hello, world!"))
            .result()
            .unwrap()
            .unwrap();
        let RequestAction::Forward(frame) = action else {
            panic!("expected forward");
        };
        let request: ProduceRequest = frame.decode_body().unwrap();
        let records = request.topic_data[0].partition_data[0].records.clone().unwrap();
        assert_eq!(&first_value(records)[..], &ENCODED);
    }

    #[test]
    fn fetch_values_are_decoded_per_topic() {
        let response = FetchResponse::default().with_responses(vec![FetchableTopicResponse::default()
            .with_topic(TopicName(StrBytes::from_static_str("my-test-topic")))
            .with_partitions(vec![PartitionData::default()
                .with_partition_index(0)
                .with_records(Some(records_of(&ENCODED)))])]);
        let mut frame = ResponseFrame::new(ApiKey::Fetch as i16, 11, 5, Bytes::new());
        frame.encode_body(&response).unwrap();

        let mut filter = FetchResponseTransformation::new(Arc::new(TopicRotationDecoder));
        let out = filter.on_broker_response(frame).result().unwrap().unwrap().unwrap();
        let response: FetchResponse = out.decode_body().unwrap();
        let records = response.responses[0].partitions[0].records.clone().unwrap();
        assert_eq!(&first_value(records)[..], b"Hello, world!");
    }

    thread_local! {
        static PARKED: RefCell<Vec<(Promise<Bytes>, Bytes)>> = RefCell::new(Vec::new());
    }

    /// Hands back pending futures, settled later by the test.
    struct Parked;

    impl ByteTransformation for Parked {
        fn transform(&self, _topic: &str, original: Bytes) -> Future<Bytes> {
            let promise = Promise::new();
            let future = promise.future();
            PARKED.with(|parked| parked.borrow_mut().push((promise, original)));
            future
        }
    }

    #[test]
    fn asynchronous_transformation_holds_the_frame() {
        let mut filter = ProduceRequestTransformation::new(Arc::new(Parked));

        let action = filter.on_client_request(produce_frame("t", b"later"));
        assert!(action.is_pending());

        let parked: Vec<_> = PARKED.with(|parked| parked.borrow_mut().drain(..).collect());
        assert_eq!(parked.len(), 1);
        for (promise, original) in parked {
            let mut upper = original.to_vec();
            upper.make_ascii_uppercase();
            promise.succeed(Bytes::from(upper));
        }

        let RequestAction::Forward(frame) = action.result().unwrap().unwrap() else {
            panic!("expected forward");
        };
        let request: ProduceRequest = frame.decode_body().unwrap();
        let records = request.topic_data[0].partition_data[0].records.clone().unwrap();
        assert_eq!(&first_value(records)[..], b"LATER");
    }

    #[test]
    fn other_requests_pass_untouched() {
        let header = RequestHeader::default()
            .with_request_api_key(ApiKey::Metadata as i16)
            .with_request_api_version(9);
        let frame = RequestFrame::new(header, Bytes::from_static(b"opaque"));
        let mut filter = ProduceRequestTransformation::new(Arc::new(TopicRotationEncoder));
        match filter.on_client_request(frame.clone()).result().unwrap().unwrap() {
            RequestAction::Forward(out) => assert_eq!(out, frame),
            other => panic!("unexpected {other:?}"),
        }
    }
}
