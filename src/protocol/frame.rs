//! Decoded request and response frames.
//!
//! A frame owns its decoded header and its body as opaque bytes. Filters that
//! understand a particular message decode the body on demand and write it back.

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader};
use kafka_protocol::protocol::{Decodable, Encodable};

use super::codec::CodecError;
use super::varint;

/// A client request on its way to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub header: RequestHeader,
    pub body: Bytes,
}

impl RequestFrame {
    pub fn new(header: RequestHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// The api key, if known to this build.
    pub fn api_key(&self) -> Option<ApiKey> {
        ApiKey::try_from(self.header.request_api_key).ok()
    }

    pub fn api_version(&self) -> i16 {
        self.header.request_api_version
    }

    pub fn correlation_id(&self) -> i32 {
        self.header.correlation_id
    }

    /// Whether the broker will answer this request.
    ///
    /// Produce requests sent with `acks=0` get no response.
    pub fn expects_response(&self) -> bool {
        if self.header.request_api_key != ApiKey::Produce as i16 {
            return true;
        }
        produce_acks(&self.body, self.api_version()) != Some(0)
    }

    /// Decode the body as message `M` at this frame's version.
    pub fn decode_body<M: Decodable>(&self) -> Result<M, CodecError> {
        let mut body = self.body.clone();
        M::decode(&mut body, self.api_version()).map_err(|e| CodecError::Body {
            api_key: self.header.request_api_key,
            version: self.api_version(),
            message: e.to_string(),
        })
    }

    /// Replace the body with `message` encoded at this frame's version.
    pub fn encode_body<M: Encodable>(&mut self, message: &M) -> Result<(), CodecError> {
        self.body = encode_message(message, self.header.request_api_key, self.api_version())?;
        Ok(())
    }

    /// A response to this request carrying `body`, ready to short-circuit the broker.
    pub fn reply(&self, body: Bytes) -> ResponseFrame {
        ResponseFrame::new(
            self.header.request_api_key,
            self.api_version(),
            self.correlation_id(),
            body,
        )
    }
}

/// A broker response on its way back to the client.
///
/// The api key and version come from the request this response answers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub api_key: i16,
    pub api_version: i16,
    pub header: ResponseHeader,
    pub body: Bytes,
}

impl ResponseFrame {
    pub fn new(api_key: i16, api_version: i16, correlation_id: i32, body: Bytes) -> Self {
        Self {
            api_key,
            api_version,
            header: ResponseHeader::default().with_correlation_id(correlation_id),
            body,
        }
    }

    pub fn api_key(&self) -> Option<ApiKey> {
        ApiKey::try_from(self.api_key).ok()
    }

    pub fn correlation_id(&self) -> i32 {
        self.header.correlation_id
    }

    pub fn decode_body<M: Decodable>(&self) -> Result<M, CodecError> {
        let mut body = self.body.clone();
        M::decode(&mut body, self.api_version).map_err(|e| CodecError::Body {
            api_key: self.api_key,
            version: self.api_version,
            message: e.to_string(),
        })
    }

    pub fn encode_body<M: Encodable>(&mut self, message: &M) -> Result<(), CodecError> {
        self.body = encode_message(message, self.api_key, self.api_version)?;
        Ok(())
    }
}

fn encode_message<M: Encodable>(message: &M, api_key: i16, version: i16) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    message.encode(&mut buf, version).map_err(|e| CodecError::Body {
        api_key,
        version,
        message: e.to_string(),
    })?;
    Ok(buf.freeze())
}

/// Reads `acks` without decoding the whole produce body.
fn produce_acks(body: &[u8], version: i16) -> Option<i16> {
    let mut buf = body;
    if version >= 9 {
        // compact nullable transactional id: length + 1, zero for null
        let len = varint::get_unsigned_varint(&mut buf)?;
        let skip = usize::try_from(len.saturating_sub(1)).ok()?;
        buf = buf.get(skip..)?;
    } else if version >= 3 {
        let len = i16::from_be_bytes([*buf.first()?, *buf.get(1)?]);
        buf = &buf[2..];
        if len > 0 {
            buf = buf.get(len as usize..)?;
        }
    }
    Some(i16::from_be_bytes([*buf.first()?, *buf.get(1)?]))
}
