//! Record batch (magic v2) codec.
//!
//! Used by filters that rewrite record payloads. Only uncompressed batches are
//! decoded; control batches and a truncated trailing batch are carried through
//! byte for byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::varint;

const LOG_OVERHEAD: usize = 12;
const BATCH_HEADER_LEN: usize = 61;
const MAGIC_OFFSET: usize = 16;
const CRC_OFFSET: usize = 17;
const ATTRIBUTES_OFFSET: usize = 21;
const COMPRESSION_MASK: i16 = 0x07;
const CONTROL_FLAG: i16 = 0x20;
const CURRENT_MAGIC: i8 = 2;

#[derive(Debug, Error, PartialEq)]
pub enum RecordsError {
    #[error("corrupt record batch: {0}")]
    Corrupt(&'static str),

    #[error("record batch magic {0} is not supported")]
    UnsupportedMagic(i8),

    #[error("compressed record batches are not supported (codec {0})")]
    Compressed(i16),

    #[error("record batch checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// One entry of a records blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Decoded(RecordBatch),
    /// Carried through untouched: control batches and truncated tails.
    Opaque(Bytes),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    pub base_offset: i64,
    pub partition_leader_epoch: i32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub base_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub records: Vec<Record>,
}

impl RecordBatch {
    /// A batch of plain values with sequential offset deltas.
    pub fn of_values<I>(base_timestamp: i64, values: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let records: Vec<Record> = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Record {
                offset_delta: i as i32,
                value: Some(value),
                ..Record::default()
            })
            .collect();
        Self {
            last_offset_delta: records.len().saturating_sub(1) as i32,
            base_timestamp,
            max_timestamp: base_timestamp,
            producer_id: -1,
            producer_epoch: -1,
            base_sequence: -1,
            records,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub attributes: i8,
    pub timestamp_delta: i64,
    pub offset_delta: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub key: Bytes,
    pub value: Option<Bytes>,
}

/// Split a records blob into batches.
pub fn decode_batches(mut buf: Bytes) -> Result<Vec<Batch>, RecordsError> {
    let mut batches = Vec::new();

    while buf.has_remaining() {
        if buf.len() < LOG_OVERHEAD {
            batches.push(Batch::Opaque(buf.split_off(0)));
            break;
        }
        let batch_length = i32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if batch_length < 0 {
            return Err(RecordsError::Corrupt("negative batch length"));
        }
        let total = LOG_OVERHEAD + batch_length as usize;
        if buf.len() < total {
            batches.push(Batch::Opaque(buf.split_off(0)));
            break;
        }

        let raw = buf.split_to(total);
        if raw.len() <= MAGIC_OFFSET {
            return Err(RecordsError::Corrupt("batch shorter than its header"));
        }
        let magic = raw[MAGIC_OFFSET] as i8;
        if magic != CURRENT_MAGIC {
            return Err(RecordsError::UnsupportedMagic(magic));
        }
        if raw.len() < BATCH_HEADER_LEN {
            return Err(RecordsError::Corrupt("batch shorter than its header"));
        }

        let attributes = i16::from_be_bytes([raw[ATTRIBUTES_OFFSET], raw[ATTRIBUTES_OFFSET + 1]]);
        if attributes & CONTROL_FLAG != 0 {
            batches.push(Batch::Opaque(raw));
            continue;
        }
        if attributes & COMPRESSION_MASK != 0 {
            return Err(RecordsError::Compressed(attributes & COMPRESSION_MASK));
        }

        let stored = u32::from_be_bytes([
            raw[CRC_OFFSET],
            raw[CRC_OFFSET + 1],
            raw[CRC_OFFSET + 2],
            raw[CRC_OFFSET + 3],
        ]);
        let computed = crc32c::crc32c(&raw[ATTRIBUTES_OFFSET..]);
        if stored != computed {
            return Err(RecordsError::ChecksumMismatch { stored, computed });
        }

        batches.push(Batch::Decoded(decode_batch(&raw)?));
    }

    Ok(batches)
}

fn decode_batch(raw: &[u8]) -> Result<RecordBatch, RecordsError> {
    let mut header = raw;
    let base_offset = header.get_i64();
    let _batch_length = header.get_i32();
    let partition_leader_epoch = header.get_i32();
    let _magic = header.get_i8();
    let _crc = header.get_u32();
    let attributes = header.get_i16();
    let last_offset_delta = header.get_i32();
    let base_timestamp = header.get_i64();
    let max_timestamp = header.get_i64();
    let producer_id = header.get_i64();
    let producer_epoch = header.get_i16();
    let base_sequence = header.get_i32();
    let count = header.get_i32();
    if count < 0 {
        return Err(RecordsError::Corrupt("negative record count"));
    }

    let mut body = &raw[BATCH_HEADER_LEN..];
    let mut records = Vec::with_capacity((count as usize).min(body.len()));
    for _ in 0..count {
        records.push(decode_record(&mut body)?);
    }
    if !body.is_empty() {
        return Err(RecordsError::Corrupt("trailing bytes after last record"));
    }

    Ok(RecordBatch {
        base_offset,
        partition_leader_epoch,
        attributes,
        last_offset_delta,
        base_timestamp,
        max_timestamp,
        producer_id,
        producer_epoch,
        base_sequence,
        records,
    })
}

fn decode_record(buf: &mut &[u8]) -> Result<Record, RecordsError> {
    const TRUNCATED: RecordsError = RecordsError::Corrupt("truncated record");

    let length = varint::get_varint(buf).ok_or(TRUNCATED)?;
    let length = usize::try_from(length).map_err(|_| RecordsError::Corrupt("negative record length"))?;
    if buf.len() < length {
        return Err(TRUNCATED);
    }
    let (mut record, rest) = buf.split_at(length);
    *buf = rest;

    let attributes = *record.first().ok_or(TRUNCATED)? as i8;
    record = &record[1..];
    let timestamp_delta = varint::get_varlong(&mut record).ok_or(TRUNCATED)?;
    let offset_delta = varint::get_varint(&mut record).ok_or(TRUNCATED)?;
    let key = nullable_bytes(&mut record)?;
    let value = nullable_bytes(&mut record)?;

    let header_count = varint::get_varint(&mut record).ok_or(TRUNCATED)?;
    let mut headers = Vec::new();
    for _ in 0..header_count.max(0) {
        let key = nullable_bytes(&mut record)?.ok_or(RecordsError::Corrupt("null header key"))?;
        let value = nullable_bytes(&mut record)?;
        headers.push(RecordHeader { key, value });
    }

    Ok(Record {
        attributes,
        timestamp_delta,
        offset_delta,
        key,
        value,
        headers,
    })
}

fn nullable_bytes(buf: &mut &[u8]) -> Result<Option<Bytes>, RecordsError> {
    let length = varint::get_varint(buf).ok_or(RecordsError::Corrupt("truncated record"))?;
    if length < 0 {
        return Ok(None);
    }
    let length = length as usize;
    if buf.len() < length {
        return Err(RecordsError::Corrupt("truncated record"));
    }
    let (bytes, rest) = buf.split_at(length);
    *buf = rest;
    Ok(Some(Bytes::copy_from_slice(bytes)))
}

/// Serialize batches back into a records blob.
pub fn encode_batches(batches: &[Batch]) -> Bytes {
    let mut dst = BytesMut::new();
    for batch in batches {
        match batch {
            Batch::Decoded(batch) => encode_batch(batch, &mut dst),
            Batch::Opaque(raw) => dst.extend_from_slice(raw),
        }
    }
    dst.freeze()
}

fn encode_batch(batch: &RecordBatch, dst: &mut BytesMut) {
    let start = dst.len();
    dst.put_i64(batch.base_offset);
    dst.put_i32(0);
    dst.put_i32(batch.partition_leader_epoch);
    dst.put_i8(CURRENT_MAGIC);
    dst.put_u32(0);
    dst.put_i16(batch.attributes & !COMPRESSION_MASK);
    dst.put_i32(batch.last_offset_delta);
    dst.put_i64(batch.base_timestamp);
    dst.put_i64(batch.max_timestamp);
    dst.put_i64(batch.producer_id);
    dst.put_i16(batch.producer_epoch);
    dst.put_i32(batch.base_sequence);
    dst.put_i32(batch.records.len() as i32);

    let mut body = BytesMut::new();
    for record in &batch.records {
        body.clear();
        body.put_i8(record.attributes);
        varint::put_varlong(&mut body, record.timestamp_delta);
        varint::put_varint(&mut body, record.offset_delta);
        put_nullable_bytes(&mut body, record.key.as_deref());
        put_nullable_bytes(&mut body, record.value.as_deref());
        varint::put_varint(&mut body, record.headers.len() as i32);
        for header in &record.headers {
            put_nullable_bytes(&mut body, Some(&header.key[..]));
            put_nullable_bytes(&mut body, header.value.as_deref());
        }
        varint::put_varint(dst, body.len() as i32);
        dst.extend_from_slice(&body);
    }

    let batch_length = (dst.len() - start - LOG_OVERHEAD) as i32;
    dst[start + 8..start + LOG_OVERHEAD].copy_from_slice(&batch_length.to_be_bytes());
    let crc = crc32c::crc32c(&dst[start + ATTRIBUTES_OFFSET..]);
    dst[start + CRC_OFFSET..start + ATTRIBUTES_OFFSET].copy_from_slice(&crc.to_be_bytes());
}

fn put_nullable_bytes(dst: &mut BytesMut, bytes: Option<&[u8]>) {
    match bytes {
        Some(bytes) => {
            varint::put_varint(dst, bytes.len() as i32);
            dst.extend_from_slice(bytes);
        }
        None => varint::put_varint(dst, -1),
    }
}
