//! Wire primitives for the subset of the Kafka protocol the broker speaks.
//!
//! All fixed-width integers are big-endian. "Compact" arrays and strings carry
//! an unsigned varint length of `count + 1`, leaving 0 for null. Tag buffers
//! are written empty and skipped on read.
//!
//! https://kafka.apache.org/protocol.html#protocol_types

use crate::error::{BrokerError, Result};
use bytes::{Buf, BufMut, Bytes};

pub const API_KEY_API_VERSIONS: i16 = 18;
pub const API_KEY_DESCRIBE_TOPIC_PARTITIONS: i16 = 75;

/// Null value of a nullable int8-prefixed struct, e.g. the DescribeTopicPartitions cursor.
pub const NULL_CURSOR: u8 = 0xFF;

/// Topic id reported for topics the broker does not know.
pub const UNASSIGNED_TOPIC_ID: [u8; 16] = [0; 16];

/// Fixed part of request header v2: api_key, api_version, correlation_id.
pub const REQUEST_HEADER_FIXED_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKey {
    ApiVersions,
    DescribeTopicPartitions,
}

impl ApiKey {
    pub fn code(self) -> i16 {
        match self {
            ApiKey::ApiVersions => API_KEY_API_VERSIONS,
            ApiKey::DescribeTopicPartitions => API_KEY_DESCRIBE_TOPIC_PARTITIONS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ApiKey::ApiVersions => "ApiVersions",
            ApiKey::DescribeTopicPartitions => "DescribeTopicPartitions",
        }
    }
}

impl TryFrom<i16> for ApiKey {
    type Error = i16;

    fn try_from(code: i16) -> std::result::Result<Self, i16> {
        match code {
            API_KEY_API_VERSIONS => Ok(ApiKey::ApiVersions),
            API_KEY_DESCRIBE_TOPIC_PARTITIONS => Ok(ApiKey::DescribeTopicPartitions),
            other => Err(other),
        }
    }
}

/// Request header v2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl RequestHeader {
    /// Decodes the header from the front of `buf`, leaving `buf` at the start
    /// of the request body.
    ///
    /// A frame that stops right after the correlation id is accepted with no
    /// client id, and so is one that stops right after the client id (header
    /// v1, still sent by older ApiVersions clients).
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < REQUEST_HEADER_FIXED_SIZE {
            return Err(BrokerError::malformed(format!(
                "frame of {} bytes is too short for a request header",
                buf.remaining()
            )));
        }

        let api_key = buf.get_i16();
        let api_version = buf.get_i16();
        let correlation_id = buf.get_i32();

        let client_id = if buf.has_remaining() {
            get_nullable_string(buf)?
        } else {
            None
        };
        if buf.has_remaining() {
            skip_tag_buffer(buf)?;
        }

        Ok(Self {
            api_key,
            api_version,
            correlation_id,
            client_id,
        })
    }
}

/// Reads the api key of a request frame without consuming anything.
pub fn peek_api_key(frame: &[u8]) -> Result<i16> {
    match frame {
        [hi, lo, ..] if frame.len() >= REQUEST_HEADER_FIXED_SIZE => {
            Ok(i16::from_be_bytes([*hi, *lo]))
        }
        _ => Err(BrokerError::malformed(format!(
            "frame of {} bytes is too short for a request header",
            frame.len()
        ))),
    }
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(BrokerError::malformed(format!(
            "need {} bytes for {}, only {} left",
            needed,
            what,
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure_remaining(buf, 1, "int8")?;
    Ok(buf.get_u8())
}

pub fn get_i16<B: Buf>(buf: &mut B) -> Result<i16> {
    ensure_remaining(buf, 2, "int16")?;
    Ok(buf.get_i16())
}

pub fn get_i32<B: Buf>(buf: &mut B) -> Result<i32> {
    ensure_remaining(buf, 4, "int32")?;
    Ok(buf.get_i32())
}

pub fn put_unsigned_varint<B: BufMut>(buf: &mut B, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn get_unsigned_varint<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value: u32 = 0;
    for shift in (0..35).step_by(7) {
        let byte = get_u8(buf)?;
        value |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(BrokerError::malformed("unsigned varint longer than 5 bytes"))
}

/// Writes a compact array length: `count + 1`.
pub fn put_compact_array_len<B: BufMut>(buf: &mut B, count: usize) {
    put_unsigned_varint(buf, count as u32 + 1);
}

/// Reads a compact array length. `None` is the null array.
///
/// Every element takes at least one byte, so a count larger than what is
/// left in the buffer is rejected up front.
pub fn get_compact_array_len<B: Buf>(buf: &mut B) -> Result<Option<usize>> {
    match get_unsigned_varint(buf)? {
        0 => Ok(None),
        n => {
            let count = (n - 1) as usize;
            if count > buf.remaining() {
                return Err(BrokerError::malformed(format!(
                    "compact array declares {} elements but only {} bytes remain",
                    count,
                    buf.remaining()
                )));
            }
            Ok(Some(count))
        }
    }
}

pub fn put_compact_string<B: BufMut>(buf: &mut B, s: &str) {
    put_compact_array_len(buf, s.len());
    buf.put_slice(s.as_bytes());
}

/// Reads a non-nullable compact string. A length byte of 0 (null) is rejected.
pub fn get_compact_string<B: Buf>(buf: &mut B) -> Result<String> {
    let len = match get_unsigned_varint(buf)? {
        0 => return Err(BrokerError::malformed("null compact string where a value is required")),
        n => (n - 1) as usize,
    };
    read_utf8(buf, len, "compact string")
}

/// Reads an int16-prefixed nullable string; length -1 is null.
pub fn get_nullable_string<B: Buf>(buf: &mut B) -> Result<Option<String>> {
    match get_i16(buf)? {
        -1 => Ok(None),
        len if len < 0 => Err(BrokerError::malformed(format!("invalid string length {}", len))),
        len => read_utf8(buf, len as usize, "nullable string").map(Some),
    }
}

fn read_utf8<B: Buf>(buf: &mut B, len: usize, what: &str) -> Result<String> {
    ensure_remaining(buf, len, what)?;
    let raw: Bytes = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| BrokerError::malformed(format!("{} is not valid UTF-8", what)))
}

pub fn put_tag_buffer<B: BufMut>(buf: &mut B) {
    buf.put_u8(0);
}

/// Skips a tagged-field section. Fields, if any, are stepped over unread.
pub fn skip_tag_buffer<B: Buf>(buf: &mut B) -> Result<()> {
    let fields = get_unsigned_varint(buf)?;
    for _ in 0..fields {
        let _tag = get_unsigned_varint(buf)?;
        let size = get_unsigned_varint(buf)? as usize;
        ensure_remaining(buf, size, "tagged field")?;
        buf.advance(size);
    }
    Ok(())
}

pub fn put_uuid<B: BufMut>(buf: &mut B, uuid: &[u8; 16]) {
    buf.put_slice(uuid);
}

/// Response header v0: correlation id only.
pub fn put_response_header_v0<B: BufMut>(buf: &mut B, correlation_id: i32) {
    buf.put_i32(correlation_id);
}

/// Response header v1: correlation id followed by an empty tag buffer.
pub fn put_response_header_v1<B: BufMut>(buf: &mut B, correlation_id: i32) {
    buf.put_i32(correlation_id);
    put_tag_buffer(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn compact_lengths_are_count_plus_one() {
        let mut buf = BytesMut::new();
        put_compact_array_len(&mut buf, 0);
        put_compact_array_len(&mut buf, 2);
        assert_eq!(&buf[..], &[1, 3]);
    }

    #[test]
    fn long_compact_lengths_use_two_varint_bytes() {
        let mut buf = BytesMut::new();
        put_compact_array_len(&mut buf, 255);
        // 256 = 0b10_0000000
        assert_eq!(&buf[..], &[0x80, 0x02]);
        assert_eq!(get_unsigned_varint(&mut buf.freeze()).unwrap(), 256);
    }

    #[test]
    fn compact_string_layout() {
        let mut buf = BytesMut::new();
        put_compact_string(&mut buf, "foo");
        assert_eq!(&buf[..], &[0x04, b'f', b'o', b'o']);

        let mut empty = BytesMut::new();
        put_compact_string(&mut empty, "");
        assert_eq!(&empty[..], &[0x01]);
    }

    #[test]
    fn decodes_compact_string_and_rejects_null() {
        let mut buf = Bytes::from_static(&[0x04, b'b', b'a', b'r', 0xAA]);
        assert_eq!(get_compact_string(&mut buf).unwrap(), "bar");
        assert_eq!(buf.remaining(), 1);

        let mut null = Bytes::from_static(&[0x00]);
        assert!(matches!(
            get_compact_string(&mut null),
            Err(BrokerError::MalformedFrame(_))
        ));
    }

    #[test]
    fn truncated_compact_string_is_malformed() {
        let mut buf = Bytes::from_static(&[0x06, b'a', b'b']);
        assert!(matches!(
            get_compact_string(&mut buf),
            Err(BrokerError::MalformedFrame(_))
        ));
    }

    #[test]
    fn nullable_string_variants() {
        let mut absent = Bytes::from_static(&[0xFF, 0xFF, 0x07]);
        assert_eq!(get_nullable_string(&mut absent).unwrap(), None);
        assert_eq!(absent.remaining(), 1);

        let mut present = Bytes::from_static(&[0x00, 0x02, b'i', b'd']);
        assert_eq!(get_nullable_string(&mut present).unwrap().as_deref(), Some("id"));

        let mut empty = Bytes::from_static(&[0x00, 0x00]);
        assert_eq!(get_nullable_string(&mut empty).unwrap().as_deref(), Some(""));

        let mut bad = Bytes::from_static(&[0xFF, 0xFE]);
        assert!(get_nullable_string(&mut bad).is_err());
    }

    #[test]
    fn null_compact_array_and_oversized_count() {
        let mut null = Bytes::from_static(&[0x00]);
        assert_eq!(get_compact_array_len(&mut null).unwrap(), None);

        let mut lying = Bytes::from_static(&[0x0A, 0x00]);
        assert!(get_compact_array_len(&mut lying).is_err());
    }

    #[test]
    fn skips_tagged_fields() {
        // two fields: (tag 0, 2 bytes), (tag 5, 0 bytes), then one trailing byte
        let mut buf = Bytes::from_static(&[0x02, 0x00, 0x02, 0xAB, 0xCD, 0x05, 0x00, 0x7F]);
        skip_tag_buffer(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x7F]);
    }

    #[test]
    fn decodes_request_header_v2() {
        let mut frame = Bytes::from_static(&[
            0x00, 0x12, // api_key 18
            0x00, 0x04, // api_version 4
            0x00, 0x00, 0x00, 0x07, // correlation_id 7
            0x00, 0x03, b'c', b'l', b'i', // client_id "cli"
            0x00, // tag buffer
            0x42, // body
        ]);
        let header = RequestHeader::decode(&mut frame).unwrap();
        assert_eq!(
            header,
            RequestHeader {
                api_key: 18,
                api_version: 4,
                correlation_id: 7,
                client_id: Some("cli".to_string()),
            }
        );
        assert_eq!(&frame[..], &[0x42]);
    }

    #[test]
    fn header_without_client_id_is_accepted() {
        let mut frame = Bytes::from_static(&[0x00, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
        let header = RequestHeader::decode(&mut frame).unwrap();
        assert_eq!(header.correlation_id, 1);
        assert_eq!(header.client_id, None);
    }

    #[test]
    fn short_header_is_malformed() {
        let mut frame = Bytes::from_static(&[0x00, 0x12, 0x00]);
        assert!(matches!(
            RequestHeader::decode(&mut frame),
            Err(BrokerError::MalformedFrame(_))
        ));
        assert!(peek_api_key(&[0x00, 0x12, 0x00]).is_err());
        assert_eq!(peek_api_key(&[0x00, 0x63, 0, 0, 0, 0, 0, 0]).unwrap(), 99);
    }

    #[test]
    fn api_key_lookup() {
        assert_eq!(ApiKey::try_from(18i16), Ok(ApiKey::ApiVersions));
        assert_eq!(ApiKey::try_from(75i16), Ok(ApiKey::DescribeTopicPartitions));
        assert_eq!(ApiKey::try_from(99i16), Err(99));
        assert_eq!(ApiKey::DescribeTopicPartitions.code(), 75);
    }
}
