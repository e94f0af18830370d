//! Protocol filter subsystem.
//!
//! # Data Flow
//! ```text
//! startup:    [[filters]] config → FilterRegistry → FilterChainFactory (shared, immutable)
//! connection: FilterChainFactory::create_chain() → FilterChain (owned by the connection)
//!
//! request:    client ─▶ filter 0 ─▶ filter 1 ─▶ … ─▶ filter n-1 ─▶ broker
//! response:   client ◀─ filter 0 ◀─ filter 1 ◀─ … ◀─ filter n-1 ◀─ broker
//! ```
//!
//! # Design Decisions
//! - Every filter step returns a `Future`, so filters may finish later without blocking the loop
//! - A filter may answer a request itself; the answer travels back through the filters before it
//! - Filter instances are per connection; only factories cross threads

pub mod api_versions;
pub mod broker_address;
pub mod chain;
pub mod factory;
pub mod rotation;
pub mod transform;

use crate::future::Future;
use crate::protocol::{RequestFrame, ResponseFrame};

pub use chain::{ChainError, FilterChain, RequestOutcome};
pub use factory::{
    FilterChainFactory, FilterConfig, FilterConfigError, FilterFactory, FilterRegistry, FilterSetup,
};
pub use rotation::ByteTransformation;

/// What a filter decided to do with a client request.
#[derive(Debug, Clone)]
pub enum RequestAction {
    /// Pass the (possibly rewritten) request to the next filter.
    Forward(RequestFrame),
    /// Swallow the request. Nothing is sent to the client.
    Drop,
    /// Answer the request without contacting the broker.
    Respond(ResponseFrame),
}

/// A per-connection protocol filter.
///
/// Both hooks default to passing the frame through unchanged.
pub trait ProtocolFilter {
    fn on_client_request(&mut self, frame: RequestFrame) -> Future<RequestAction> {
        Future::succeeded(RequestAction::Forward(frame))
    }

    /// Returning `None` drops the response.
    fn on_broker_response(&mut self, frame: ResponseFrame) -> Future<Option<ResponseFrame>> {
        Future::succeeded(Some(frame))
    }
}
