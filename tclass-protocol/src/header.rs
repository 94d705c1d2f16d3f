//! Wire Header Encoding and Decoding
//!
//! Every request and its echoed reply starts with a 14-byte envelope:
//!
//! ```text
//! byte 0     : type tag (0x2A = sequence + timestamp)
//! byte 1     : length of the fixed fields that follow (12)
//! bytes 2..5 : sequence number, big-endian u32
//! bytes 6..13: send timestamp, big-endian i64, sender clock units
//! bytes 14.. : payload body
//! ```

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 14;

/// Size of the fixed fields after the tag and length bytes
pub const FIXED_FIELDS_LEN: u8 = 12;

/// Type tag of the sequence + timestamp envelope
pub const TYPE_SEQ_NUM: u8 = 0x2A;

/// Envelope type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Sequence number and send timestamp
    SeqNum,
    /// Tag this codec does not understand
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            TYPE_SEQ_NUM => MessageType::SeqNum,
            other => MessageType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::SeqNum => TYPE_SEQ_NUM,
            MessageType::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::SeqNum => write!(f, "SeqNum"),
            MessageType::Unknown(tag) => write!(f, "Unknown(0x{:02x})", tag),
        }
    }
}

/// Decoded envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    /// Envelope type
    pub msg_type: MessageType,
    /// Length byte as found on the wire
    pub len: u8,
    /// Sequence number
    pub seq: SeqNumber,
    /// Send timestamp in the sender's clock units
    pub sent_time: i64,
}

impl WireHeader {
    /// Create a sequence + timestamp header
    pub fn new(seq: SeqNumber, sent_time: i64) -> Self {
        WireHeader {
            msg_type: MessageType::SeqNum,
            len: FIXED_FIELDS_LEN,
            seq,
            sent_time,
        }
    }

    /// Whether this is an envelope the stream can match against its request
    #[inline]
    pub fn is_seq_num(&self) -> bool {
        self.msg_type == MessageType::SeqNum
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u8(self.msg_type.as_u8());
        buf.put_u8(self.len);
        buf.put_u32(self.seq.as_raw());
        buf.put_i64(self.sent_time);
    }

    /// Parse header from the leading bytes of a datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let msg_type = MessageType::from_u8(buf.get_u8());
        let len = buf.get_u8();

        if msg_type == MessageType::SeqNum && len != FIXED_FIELDS_LEN {
            return Err(HeaderError::LengthMismatch {
                expected: FIXED_FIELDS_LEN,
                actual: len,
            });
        }

        Ok(WireHeader {
            msg_type,
            len,
            seq: SeqNumber::new(buf.get_u32()),
            sent_time: buf.get_i64(),
        })
    }
}

/// Encode a complete request datagram: header followed by `body`
pub fn encode(seq: SeqNumber, sent_time: i64, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    WireHeader::new(seq, sent_time).to_bytes(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}

/// Decode the envelope at the front of a datagram
pub fn decode(bytes: &[u8]) -> Result<WireHeader, HeaderError> {
    WireHeader::from_bytes(bytes)
}

/// Header parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Fixed field length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u8, actual: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let bytes = encode(SeqNumber::new(0x0102_0304), 0x1122_3344_5566_7788, b"abc");

        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(bytes[0], 0x2A);
        assert_eq!(bytes[1], 12);
        assert_eq!(&bytes[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            &bytes[6..14],
            &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
        assert_eq!(&bytes[14..], b"abc");
    }

    #[test]
    fn test_decode_request() {
        let bytes = encode(SeqNumber::new(7), 1234, b"Lorem ipsum");
        let header = decode(&bytes).unwrap();

        assert!(header.is_seq_num());
        assert_eq!(header.seq, SeqNumber::new(7));
        assert_eq!(header.sent_time, 1234);
    }

    #[test]
    fn test_sequence_wrap_on_the_wire() {
        let last = SeqNumber::new(u32::MAX);
        let bytes = encode(last, 0, &[]);
        assert_eq!(&bytes[2..6], &[0xFF; 4]);
        assert_eq!(decode(&bytes).unwrap().seq, last);

        let wrapped = encode(last.next(), 0, &[]);
        assert_eq!(&wrapped[2..6], &[0x00; 4]);
        assert_eq!(decode(&wrapped).unwrap().seq, SeqNumber::ZERO);
    }

    #[test]
    fn test_decode_negative_timestamp() {
        let bytes = encode(SeqNumber::new(1), -5, &[]);
        assert_eq!(decode(&bytes).unwrap().sent_time, -5);
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = encode(SeqNumber::new(1), 0, &[]);

        for len in 0..HEADER_SIZE {
            assert_eq!(
                decode(&bytes[..len]),
                Err(HeaderError::InsufficientData {
                    expected: HEADER_SIZE,
                    actual: len,
                })
            );
        }
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let mut bytes = encode(SeqNumber::new(3), 0, b"x").to_vec();
        bytes[0] = 0x17;
        bytes[1] = 200;

        let header = decode(&bytes).unwrap();
        assert_eq!(header.msg_type, MessageType::Unknown(0x17));
        assert!(!header.is_seq_num());
    }

    #[test]
    fn test_decode_bad_length() {
        let mut bytes = encode(SeqNumber::new(3), 0, &[]).to_vec();
        bytes[1] = 4;

        assert_eq!(
            decode(&bytes),
            Err(HeaderError::LengthMismatch {
                expected: 12,
                actual: 4
            })
        );
    }
}
