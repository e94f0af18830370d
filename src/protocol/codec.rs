//! Length-prefixed frame codecs for both legs of a proxied connection.
//!
//! # Responsibilities
//! - Split the byte stream on the 4-byte big-endian size prefix
//! - Enforce the maximum frame size before buffering a frame
//! - Decode request headers, and response headers via the in-flight table
//! - Encode frames back to the wire

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader};
use kafka_protocol::protocol::{Decodable, Encodable};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{RequestFrame, ResponseFrame};

/// Default ceiling on a single frame (100 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 104_857_600;

const LENGTH_FIELD: usize = 4;

/// Errors raised while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("negative frame length {0}")]
    NegativeLength(i32),

    #[error("frame too short to carry a header")]
    Truncated,

    #[error("unknown api key {0}")]
    UnknownApiKey(i16),

    #[error("response with correlation id {0} matches no in-flight request")]
    UnknownCorrelation(i32),

    #[error("malformed header: {0}")]
    Header(String),

    #[error("malformed body for api key {api_key} v{version}: {message}")]
    Body {
        api_key: i16,
        version: i16,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Request metadata awaiting a response, keyed by correlation id.
///
/// Shared between the encoder that forwards requests and the decoder that
/// reads the matching responses on the same connection.
#[derive(Debug, Clone, Default)]
pub struct InFlightRequests {
    inner: Rc<RefCell<HashMap<i32, (i16, i16)>>>,
}

impl InFlightRequests {
    pub fn record(&self, frame: &RequestFrame) {
        if frame.expects_response() {
            self.inner.borrow_mut().insert(
                frame.correlation_id(),
                (frame.header.request_api_key, frame.api_version()),
            );
        }
    }

    /// Remove and return `(api_key, api_version)` for a correlation id.
    pub fn take(&self, correlation_id: i32) -> Option<(i16, i16)> {
        self.inner.borrow_mut().remove(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

fn split_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>, CodecError> {
    if src.len() < LENGTH_FIELD {
        return Ok(None);
    }

    let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    if length < 0 {
        return Err(CodecError::NegativeLength(length));
    }
    let length = length as usize;
    if length > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    if src.len() < LENGTH_FIELD + length {
        src.reserve(LENGTH_FIELD + length - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_FIELD);
    Ok(Some(src.split_to(length).freeze()))
}

fn put_frame<F>(dst: &mut BytesMut, write: F) -> Result<(), CodecError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), CodecError>,
{
    let start = dst.len();
    dst.put_i32(0);
    write(dst)?;
    let length = (dst.len() - start - LENGTH_FIELD) as i32;
    dst[start..start + LENGTH_FIELD].copy_from_slice(&length.to_be_bytes());
    Ok(())
}

fn known_api_key(raw: i16) -> Result<ApiKey, CodecError> {
    ApiKey::try_from(raw).map_err(|_| CodecError::UnknownApiKey(raw))
}

/// Client-facing codec: decodes requests, encodes responses.
#[derive(Debug, Clone)]
pub struct RequestCodec {
    max_frame_size: usize,
}

impl RequestCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for RequestCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for RequestCodec {
    type Item = RequestFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RequestFrame>, CodecError> {
        let Some(mut payload) = split_frame(src, self.max_frame_size)? else {
            return Ok(None);
        };
        if payload.len() < 4 {
            return Err(CodecError::Truncated);
        }

        let api_key = known_api_key(i16::from_be_bytes([payload[0], payload[1]]))?;
        let api_version = i16::from_be_bytes([payload[2], payload[3]]);
        let header_version = api_key.request_header_version(api_version);
        let header = RequestHeader::decode(&mut payload, header_version)
            .map_err(|e| CodecError::Header(e.to_string()))?;

        Ok(Some(RequestFrame::new(header, payload)))
    }
}

impl Encoder<ResponseFrame> for RequestCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: ResponseFrame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let header_version = known_api_key(frame.api_key)?.response_header_version(frame.api_version);
        put_frame(dst, |dst| {
            frame
                .header
                .encode(dst, header_version)
                .map_err(|e| CodecError::Header(e.to_string()))?;
            dst.extend_from_slice(&frame.body);
            Ok(())
        })
    }
}

/// Broker-facing codec: encodes requests, decodes the responses that answer them.
#[derive(Debug, Clone)]
pub struct ResponseCodec {
    max_frame_size: usize,
    in_flight: InFlightRequests,
}

impl ResponseCodec {
    pub fn new(max_frame_size: usize, in_flight: InFlightRequests) -> Self {
        Self {
            max_frame_size,
            in_flight,
        }
    }

    pub fn in_flight(&self) -> &InFlightRequests {
        &self.in_flight
    }
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE, InFlightRequests::default())
    }
}

impl Decoder for ResponseCodec {
    type Item = ResponseFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResponseFrame>, CodecError> {
        let Some(mut payload) = split_frame(src, self.max_frame_size)? else {
            return Ok(None);
        };
        if payload.len() < 4 {
            return Err(CodecError::Truncated);
        }

        let correlation_id = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let (api_key, api_version) = self
            .in_flight
            .take(correlation_id)
            .ok_or(CodecError::UnknownCorrelation(correlation_id))?;
        let header_version = known_api_key(api_key)?.response_header_version(api_version);
        let header = ResponseHeader::decode(&mut payload, header_version)
            .map_err(|e| CodecError::Header(e.to_string()))?;

        Ok(Some(ResponseFrame {
            api_key,
            api_version,
            header,
            body: payload,
        }))
    }
}

impl Encoder<RequestFrame> for ResponseCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: RequestFrame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let api_key = known_api_key(frame.header.request_api_key)?;
        let header_version = api_key.request_header_version(frame.api_version());
        put_frame(dst, |dst| {
            frame
                .header
                .encode(dst, header_version)
                .map_err(|e| CodecError::Header(e.to_string()))?;
            dst.extend_from_slice(&frame.body);
            Ok(())
        })?;
        self.in_flight.record(&frame);
        Ok(())
    }
}
