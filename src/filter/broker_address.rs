//! Points clients back at the proxy whenever the broker advertises an address.

use std::sync::Arc;

use kafka_protocol::messages::{ApiKey, FindCoordinatorResponse, MetadataResponse};
use kafka_protocol::protocol::StrBytes;

use super::factory::{FilterConfig, FilterConfigError, FilterFactory, FilterSetup};
use super::ProtocolFilter;
use crate::future::{Cause, Future};
use crate::protocol::ResponseFrame;

/// FindCoordinator moved to a list of coordinators in v4.
const FIRST_BATCHED_COORDINATOR_VERSION: i16 = 4;

/// Rewrites broker host/port in Metadata and FindCoordinator responses.
#[derive(Debug, Clone)]
pub struct BrokerAddressFilter {
    host: StrBytes,
    port: i32,
}

impl BrokerAddressFilter {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: StrBytes::from_string(host.to_string()),
            port: i32::from(port),
        }
    }

    pub fn factory(_config: &FilterConfig, setup: &FilterSetup) -> Result<Arc<dyn FilterFactory>, FilterConfigError> {
        let filter = Self::new(&setup.proxy_host, setup.proxy_port);
        Ok(Arc::new(move || Box::new(filter.clone()) as Box<dyn ProtocolFilter>))
    }

    fn rewrite(&self, frame: &mut ResponseFrame, key: ApiKey) -> Result<(), Cause> {
        match key {
            ApiKey::Metadata => {
                let mut response: MetadataResponse = frame.decode_body().map_err(Cause::new)?;
                for broker in response.brokers.iter_mut() {
                    broker.host = self.host.clone();
                    broker.port = self.port;
                }
                frame.encode_body(&response).map_err(Cause::new)
            }
            ApiKey::FindCoordinator => {
                let mut response: FindCoordinatorResponse = frame.decode_body().map_err(Cause::new)?;
                if frame.api_version < FIRST_BATCHED_COORDINATOR_VERSION {
                    response.host = self.host.clone();
                    response.port = self.port;
                } else {
                    for coordinator in response.coordinators.iter_mut() {
                        coordinator.host = self.host.clone();
                        coordinator.port = self.port;
                    }
                }
                frame.encode_body(&response).map_err(Cause::new)
            }
            _ => Ok(()),
        }
    }
}

impl ProtocolFilter for BrokerAddressFilter {
    fn on_broker_response(&mut self, mut frame: ResponseFrame) -> Future<Option<ResponseFrame>> {
        let Some(key) = frame.api_key() else {
            return Future::succeeded(Some(frame));
        };
        match self.rewrite(&mut frame, key) {
            Ok(()) => Future::succeeded(Some(frame)),
            Err(cause) => Future::failed(cause),
        }
    }
}
