//! Decoding of BLEWIFI frames.
//!
//! The frame format is:
//!
//! Start Byte | End Byte     | Meaning
//! 0          | 1            | A constant sync marker with value [0xAA, 0x55]
//! 2          | 2            | `L`, the length in bytes of the rest of the frame, counting this byte and the type byte
//! 3          | 3            | The type code selecting the payload layout
//! 4          | L+1          | The payload
//!
//! All multi-byte fields in the payload are big-endian. Bytes after the end of the frame are
//! padding and are ignored unless a [`FrameDecoder`] is configured to be strict about length.

mod metrics_message;
mod status_message;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use metrics_message::MetricsRecord;
pub use status_message::StatusRecord;

/// The sync marker every frame starts with.
pub const SYNC_MARKER: [u8; 2] = [0xAA, 0x55];
/// Marker, length byte and type byte.
pub const HEADER_LEN: usize = 4;

const TYPE_STATUS: u8 = 0x01;
const TYPE_METRICS: u8 = 0x02;
// Request commands carry the type code of the frame they ask for with the high bit set.
const REQUEST_FLAG: u8 = 0x80;

/// Why a byte sequence could not be decoded as a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Bad sync marker {:02x}{:02x}", .found[0], .found[1])]
    BadMarker { found: [u8; 2] },

    #[error("Declared length {declared} is too short to hold a type code")]
    InvalidLength { declared: u8 },

    #[error("{extra} unexpected bytes after the end of the frame")]
    TrailingBytes { extra: usize },
}

/// The category of a decoded frame, used together with the charger id to correlate
/// responses with requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Status,
    Metrics,
    Unknown(u8),
}

impl RecordKind {
    pub fn type_code(&self) -> u8 {
        match self {
            RecordKind::Status => TYPE_STATUS,
            RecordKind::Metrics => TYPE_METRICS,
            RecordKind::Unknown(code) => *code,
        }
    }

    fn from_type_code(code: u8) -> Self {
        match code {
            TYPE_STATUS => RecordKind::Status,
            TYPE_METRICS => RecordKind::Metrics,
            other => RecordKind::Unknown(other),
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Status => f.write_str("status"),
            RecordKind::Metrics => f.write_str("metrics"),
            RecordKind::Unknown(code) => write!(f, "unknown(0x{code:02x})"),
        }
    }
}

/// A frame whose type code this crate does not understand. Kept so that newer firmware
/// frames can still be observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownRecord {
    pub type_code: u8,
    pub raw_bytes: Vec<u8>,
}

/// The structured content of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodedRecord {
    Status(StatusRecord),
    Metrics(MetricsRecord),
    Unknown(UnknownRecord),
}

impl DecodedRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            DecodedRecord::Status(_) => RecordKind::Status,
            DecodedRecord::Metrics(_) => RecordKind::Metrics,
            DecodedRecord::Unknown(unknown) => RecordKind::Unknown(unknown.type_code),
        }
    }
}

/// Frame decoder with a configurable policy for bytes following the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    /// Reject frames followed by extra bytes instead of ignoring them.
    pub strict_length: bool,
}

impl FrameDecoder {
    pub fn new(strict_length: bool) -> Self {
        Self { strict_length }
    }

    /// Decode one frame. The input is only borrowed for the duration of the call.
    pub fn decode(&self, buffer: &[u8]) -> Result<DecodedRecord, DecodeError> {
        if buffer.len() < HEADER_LEN {
            return Err(DecodeError::Truncated { needed: HEADER_LEN, available: buffer.len() });
        }

        if buffer[0..2] != SYNC_MARKER {
            return Err(DecodeError::BadMarker { found: [buffer[0], buffer[1]] });
        }

        let declared = buffer[2];
        if declared < 2 {
            return Err(DecodeError::InvalidLength { declared });
        }

        let frame_len = SYNC_MARKER.len() + declared as usize;
        if buffer.len() < frame_len {
            return Err(DecodeError::Truncated { needed: frame_len, available: buffer.len() });
        }

        if self.strict_length && buffer.len() > frame_len {
            return Err(DecodeError::TrailingBytes { extra: buffer.len() - frame_len });
        }

        let payload = &buffer[HEADER_LEN..frame_len];
        let record = match RecordKind::from_type_code(buffer[3]) {
            RecordKind::Status => DecodedRecord::Status(StatusRecord::parse(payload)?),
            RecordKind::Metrics => DecodedRecord::Metrics(MetricsRecord::parse(payload)?),
            RecordKind::Unknown(type_code) => {
                DecodedRecord::Unknown(UnknownRecord { type_code, raw_bytes: payload.to_vec() })
            }
        };

        Ok(record)
    }
}

/// Decode one frame, ignoring any padding after it.
pub fn decode(buffer: &[u8]) -> Result<DecodedRecord, DecodeError> {
    FrameDecoder::default().decode(buffer)
}

/// Build the command frame asking a charger to report a record of the given kind.
pub fn encode_request(kind: RecordKind) -> Vec<u8> {
    vec![SYNC_MARKER[0], SYNC_MARKER[1], 0x02, kind.type_code() | REQUEST_FLAG]
}

/// Fail with [`DecodeError::Truncated`] unless the payload holds at least `needed` bytes.
/// Lengths are reported in whole-frame terms.
pub(crate) fn require_payload(payload: &[u8], needed: usize) -> Result<(), DecodeError> {
    if payload.len() < needed {
        return Err(DecodeError::Truncated {
            needed: HEADER_LEN + needed,
            available: HEADER_LEN + payload.len(),
        });
    }
    Ok(())
}

pub(crate) fn be_u16(payload: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([payload[offset], payload[offset + 1]])
}

pub(crate) fn be_u32(payload: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([payload[offset], payload[offset + 1], payload[offset + 2], payload[offset + 3]])
}

#[test]
fn test_decode_too_short() {
    for len in 0..HEADER_LEN {
        let message = vec![0xAA; len];
        assert_eq!(decode(&message), Err(DecodeError::Truncated { needed: HEADER_LEN, available: len }));
    }
}

#[test]
fn test_decode_bad_marker() {
    let message = hex::decode("55aa0201").unwrap();
    assert_eq!(decode(&message), Err(DecodeError::BadMarker { found: [0x55, 0xAA] }));

    let message = hex::decode("aa5417000102030405060708090a0b0c0d0e0f101112131415").unwrap();
    assert_eq!(decode(&message), Err(DecodeError::BadMarker { found: [0xAA, 0x54] }));
}

#[test]
fn test_decode_declared_length_exceeds_buffer() {
    let message = hex::decode("aa55100001020304").unwrap();
    assert_eq!(decode(&message), Err(DecodeError::Truncated { needed: 18, available: 8 }));
}

#[test]
fn test_decode_declared_length_too_small() {
    let message = hex::decode("aa550101").unwrap();
    assert_eq!(decode(&message), Err(DecodeError::InvalidLength { declared: 1 }));
}

#[test]
fn test_decode_unknown_type() {
    // Sample capture with a type code that is neither status nor metrics.
    let message = hex::decode("aa5517000102030405060708090a0b0c0d0e0f101112131415").unwrap();
    let record = decode(&message).unwrap();
    assert_eq!(record.kind(), RecordKind::Unknown(0x00));
    match record {
        DecodedRecord::Unknown(unknown) => {
            assert_eq!(unknown.type_code, 0x00);
            assert_eq!(unknown.raw_bytes, hex::decode("0102030405060708090a0b0c0d0e0f101112131415").unwrap());
        }
        other => panic!("expected unknown record, got {other:?}"),
    }
}

#[test]
fn test_decode_trailing_bytes_lenient_and_strict() {
    let message = hex::decode("aa55037f42ffff").unwrap();

    let record = decode(&message).unwrap();
    assert_eq!(record, DecodedRecord::Unknown(UnknownRecord { type_code: 0x7f, raw_bytes: vec![0x42] }));

    let strict = FrameDecoder::new(true);
    assert_eq!(strict.decode(&message), Err(DecodeError::TrailingBytes { extra: 2 }));
    assert!(strict.decode(&message[..5]).is_ok());
}

#[test]
fn test_encode_request() {
    assert_eq!(hex::encode(encode_request(RecordKind::Status)), "aa550281");
    assert_eq!(hex::encode(encode_request(RecordKind::Metrics)), "aa550282");
}
