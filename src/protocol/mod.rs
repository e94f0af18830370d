//! Kafka wire protocol plumbing.
//!
//! # Data Flow
//! ```text
//! client bytes ──▶ RequestCodec  ──▶ RequestFrame  ──▶ filter chain ──▶ ResponseCodec (encode, records in-flight)
//! broker bytes ──▶ ResponseCodec ──▶ ResponseFrame ──▶ filter chain ──▶ RequestCodec  (encode)
//! ```
//!
//! # Design Decisions
//! - Only headers are decoded generically; bodies stay opaque `Bytes`
//! - Response headers need the request's api key and version, tracked per connection
//! - Filters that need a body decode it on demand through `kafka-protocol`

pub mod codec;
pub mod frame;
pub mod records;
pub mod varint;

pub use codec::{CodecError, InFlightRequests, RequestCodec, ResponseCodec, DEFAULT_MAX_FRAME_SIZE};
pub use frame::{RequestFrame, ResponseFrame};
