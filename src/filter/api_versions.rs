//! Keeps clients from negotiating versions the proxy cannot handle.

use std::sync::Arc;

use kafka_protocol::messages::{ApiKey, ApiVersionsResponse, FetchRequest, ProduceRequest};
use kafka_protocol::protocol::Message;

use super::factory::{FilterConfig, FilterConfigError, FilterFactory, FilterSetup};
use super::ProtocolFilter;
use crate::future::{Cause, Future};
use crate::protocol::ResponseFrame;

/// Newer versions address topics by id only, which the record filters cannot key on.
const LAST_VERSION_WITH_TOPIC_NAMES: i16 = 12;

/// Highest version the proxy will let a client use for `key`, if capped.
fn version_ceiling(key: ApiKey) -> Option<i16> {
    match key {
        ApiKey::Produce => Some(ProduceRequest::VERSIONS.max.min(LAST_VERSION_WITH_TOPIC_NAMES)),
        ApiKey::Fetch => Some(FetchRequest::VERSIONS.max.min(LAST_VERSION_WITH_TOPIC_NAMES)),
        _ => None,
    }
}

/// Rewrites ApiVersions responses: drops api keys this build does not know
/// and caps Produce and Fetch versions.
#[derive(Debug, Default)]
pub struct ApiVersionsFilter;

impl ApiVersionsFilter {
    pub fn factory(_config: &FilterConfig, _setup: &FilterSetup) -> Result<Arc<dyn FilterFactory>, FilterConfigError> {
        Ok(Arc::new(|| Box::new(ApiVersionsFilter) as Box<dyn ProtocolFilter>))
    }

    fn rewrite(frame: &mut ResponseFrame) -> Result<(), Cause> {
        let mut response: ApiVersionsResponse = match frame.decode_body() {
            Ok(response) => response,
            Err(e) => {
                // brokers answer unsupported versions with a v0 body
                tracing::debug!(error = %e, "ApiVersions response left untouched");
                return Ok(());
            }
        };
        if response.error_code != 0 {
            return Ok(());
        }

        response.api_keys.retain(|entry| ApiKey::try_from(entry.api_key).is_ok());
        for entry in response.api_keys.iter_mut() {
            let ceiling = ApiKey::try_from(entry.api_key).ok().and_then(version_ceiling);
            if let Some(ceiling) = ceiling {
                entry.max_version = entry.max_version.min(ceiling);
            }
        }

        frame.encode_body(&response).map_err(Cause::new)
    }
}

impl ProtocolFilter for ApiVersionsFilter {
    fn on_broker_response(&mut self, mut frame: ResponseFrame) -> Future<Option<ResponseFrame>> {
        if frame.api_key() != Some(ApiKey::ApiVersions) {
            return Future::succeeded(Some(frame));
        }
        match Self::rewrite(&mut frame) {
            Ok(()) => Future::succeeded(Some(frame)),
            Err(cause) => Future::failed(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kafka_protocol::messages::api_versions_response::ApiVersion;

    fn entry(api_key: i16, max_version: i16) -> ApiVersion {
        ApiVersion::default()
            .with_api_key(api_key)
            .with_min_version(0)
            .with_max_version(max_version)
    }

    #[test]
    fn caps_and_prunes_advertised_versions() {
        let response = ApiVersionsResponse::default().with_api_keys(vec![
            entry(ApiKey::Produce as i16, 40),
            entry(ApiKey::Fetch as i16, 40),
            entry(ApiKey::Metadata as i16, 12),
            entry(i16::MAX, 3),
        ]);
        let mut frame = ResponseFrame::new(ApiKey::ApiVersions as i16, 3, 1, Bytes::new());
        frame.encode_body(&response).unwrap();

        let out = ApiVersionsFilter
            .on_broker_response(frame)
            .result()
            .unwrap()
            .unwrap()
            .unwrap();
        let rewritten: ApiVersionsResponse = out.decode_body().unwrap();

        let keys: Vec<(i16, i16)> = rewritten.api_keys.iter().map(|e| (e.api_key, e.max_version)).collect();
        assert_eq!(
            keys,
            vec![
                (ApiKey::Produce as i16, version_ceiling(ApiKey::Produce).unwrap()),
                (ApiKey::Fetch as i16, version_ceiling(ApiKey::Fetch).unwrap()),
                (ApiKey::Metadata as i16, 12),
            ]
        );
        assert!(version_ceiling(ApiKey::Fetch).unwrap() <= LAST_VERSION_WITH_TOPIC_NAMES);
    }

    #[test]
    fn undecodable_body_passes_through() {
        let frame = ResponseFrame::new(ApiKey::ApiVersions as i16, 3, 1, Bytes::from_static(b"\x00\x23"));
        let out = ApiVersionsFilter
            .on_broker_response(frame.clone())
            .result()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(out, frame);
    }
}
