//! Variable-length integers used by record batches and flexible versions.

use bytes::{BufMut, BytesMut};

/// Reads an unsigned LEB128 varint, advancing `buf`.
pub fn get_unsigned_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = buf.split_first()?;
        *buf = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// Reads a zig-zag encoded varlong.
pub fn get_varlong(buf: &mut &[u8]) -> Option<i64> {
    let raw = get_unsigned_varint(buf)?;
    Some(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

/// Reads a zig-zag encoded varint.
pub fn get_varint(buf: &mut &[u8]) -> Option<i32> {
    i32::try_from(get_varlong(buf)?).ok()
}

pub fn put_unsigned_varint(dst: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

pub fn put_varlong(dst: &mut BytesMut, value: i64) {
    put_unsigned_varint(dst, ((value << 1) ^ (value >> 63)) as u64);
}

pub fn put_varint(dst: &mut BytesMut, value: i32) {
    put_varlong(dst, i64::from(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_matches_kafka_encoding() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (-1, &[0x01]),
            (1, &[0x02]),
            (-64, &[0x7f]),
            (64, &[0x80, 0x01]),
            (300, &[0xd8, 0x04]),
        ];
        for (value, expected) in cases {
            let mut dst = BytesMut::new();
            put_varint(&mut dst, *value);
            assert_eq!(&dst[..], *expected, "encoding {value}");

            let mut slice = *expected;
            assert_eq!(get_varint(&mut slice), Some(*value));
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn truncated_varint_is_rejected() {
        let mut slice: &[u8] = &[0x80, 0x80];
        assert_eq!(get_unsigned_varint(&mut slice), None);
    }
}
