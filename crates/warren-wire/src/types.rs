// Shared protocol types used by both codec directions.
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec;
use crate::error::{CodecError, Result};

/// Server response codes. `Ok` is the only success value; everything else
/// maps to a command-level or connection-level failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    StreamDoesNotExist,
    SubscriptionIdAlreadyExists,
    SubscriptionIdDoesNotExist,
    StreamAlreadyExists,
    StreamNotAvailable,
    SaslMechanismNotSupported,
    AuthenticationFailure,
    SaslError,
    SaslChallenge,
    SaslAuthenticationFailureLoopback,
    VirtualHostAccessFailure,
    UnknownFrame,
    FrameTooLarge,
    InternalError,
    AccessRefused,
    PreconditionFailed,
    PublisherDoesNotExist,
    NoOffset,
}

impl ResponseCode {
    pub fn from_u16(value: u16) -> Result<Self> {
        let code = match value {
            0x01 => Self::Ok,
            0x02 => Self::StreamDoesNotExist,
            0x03 => Self::SubscriptionIdAlreadyExists,
            0x04 => Self::SubscriptionIdDoesNotExist,
            0x05 => Self::StreamAlreadyExists,
            0x06 => Self::StreamNotAvailable,
            0x07 => Self::SaslMechanismNotSupported,
            0x08 => Self::AuthenticationFailure,
            0x09 => Self::SaslError,
            0x0A => Self::SaslChallenge,
            0x0B => Self::SaslAuthenticationFailureLoopback,
            0x0C => Self::VirtualHostAccessFailure,
            0x0D => Self::UnknownFrame,
            0x0E => Self::FrameTooLarge,
            0x0F => Self::InternalError,
            0x10 => Self::AccessRefused,
            0x11 => Self::PreconditionFailed,
            0x12 => Self::PublisherDoesNotExist,
            0x13 => Self::NoOffset,
            other => return Err(CodecError::UnknownResponseCode(other)),
        };
        Ok(code)
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Ok => 0x01,
            Self::StreamDoesNotExist => 0x02,
            Self::SubscriptionIdAlreadyExists => 0x03,
            Self::SubscriptionIdDoesNotExist => 0x04,
            Self::StreamAlreadyExists => 0x05,
            Self::StreamNotAvailable => 0x06,
            Self::SaslMechanismNotSupported => 0x07,
            Self::AuthenticationFailure => 0x08,
            Self::SaslError => 0x09,
            Self::SaslChallenge => 0x0A,
            Self::SaslAuthenticationFailureLoopback => 0x0B,
            Self::VirtualHostAccessFailure => 0x0C,
            Self::UnknownFrame => 0x0D,
            Self::FrameTooLarge => 0x0E,
            Self::InternalError => 0x0F,
            Self::AccessRefused => 0x10,
            Self::PreconditionFailed => 0x11,
            Self::PublisherDoesNotExist => 0x12,
            Self::NoOffset => 0x13,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self> {
        Self::from_u16(codec::get_u16(buf)?)
    }

    pub(crate) fn encode(self, buf: &mut BytesMut) {
        buf.put_u16(self.to_u16());
    }
}

/// Where a subscription starts reading.
///
/// ```
/// use warren_wire::OffsetSpecification;
///
/// let spec = OffsetSpecification::Offset(42);
/// assert_ne!(spec, OffsetSpecification::Next);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetSpecification {
    First,
    Last,
    Next,
    Offset(u64),
    Timestamp(i64),
}

impl OffsetSpecification {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::First => buf.put_u16(1),
            Self::Last => buf.put_u16(2),
            Self::Next => buf.put_u16(3),
            Self::Offset(offset) => {
                buf.put_u16(4);
                buf.put_u64(*offset);
            }
            Self::Timestamp(timestamp) => {
                buf.put_u16(5);
                buf.put_i64(*timestamp);
            }
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self> {
        match codec::get_u16(buf)? {
            1 => Ok(Self::First),
            2 => Ok(Self::Last),
            3 => Ok(Self::Next),
            4 => Ok(Self::Offset(codec::get_u64(buf)?)),
            5 => Ok(Self::Timestamp(codec::get_i64(buf)?)),
            other => Err(CodecError::UnknownOffsetKind(other)),
        }
    }
}

/// One node of the cluster as reported by a metadata response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broker {
    pub reference: u16,
    pub host: String,
    pub port: u32,
}

/// Per-stream placement as reported by a metadata response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    pub response_code: ResponseCode,
    pub leader: u16,
    pub replicas: Vec<u16>,
}

/// One message inside a publish frame. The publishing id is the
/// caller-assigned deduplication sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub publishing_id: u64,
    pub body: Bytes,
}

impl PublishedMessage {
    pub fn new(publishing_id: u64, body: impl Into<Bytes>) -> Self {
        Self {
            publishing_id,
            body: body.into(),
        }
    }
}

/// The osiris chunk carried by a deliver frame. Records are kept raw;
/// unpacking entries is the consumer layer's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub num_entries: u16,
    pub num_records: u32,
    pub timestamp: i64,
    pub epoch: u64,
    pub chunk_first_offset: u64,
    pub crc: i32,
    pub records: Bytes,
}

const CHUNK_MAGIC_VERSION: u8 = 0x50;

impl Chunk {
    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self> {
        let _magic_version = codec::get_u8(buf)?;
        let _chunk_type = codec::get_u8(buf)?;
        let num_entries = codec::get_u16(buf)?;
        let num_records = codec::get_u32(buf)?;
        let timestamp = codec::get_i64(buf)?;
        let epoch = codec::get_u64(buf)?;
        let chunk_first_offset = codec::get_u64(buf)?;
        let crc = codec::get_i32(buf)?;
        let data_length = codec::get_u32(buf)? as usize;
        let _trailer_length = codec::get_u32(buf)?;
        let _reserved = codec::get_u32(buf)?;
        let records = codec::get_exact(buf, data_length)?;
        Ok(Self {
            num_entries,
            num_records,
            timestamp,
            epoch,
            chunk_first_offset,
            crc,
            records,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(CHUNK_MAGIC_VERSION);
        buf.put_u8(0);
        buf.put_u16(self.num_entries);
        buf.put_u32(self.num_records);
        buf.put_i64(self.timestamp);
        buf.put_u64(self.epoch);
        buf.put_u64(self.chunk_first_offset);
        buf.put_i32(self.crc);
        buf.put_u32(self.records.len() as u32);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_slice(&self.records);
    }
}
