//! Client-to-server commands.
//!
//! # Purpose
//! One tagged enum over the outbound command set, with bit-exact encode and
//! decode. Decode exists so a test peer (or a server) can read what the
//! client wrote with the same crate.
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::codec;
use crate::error::{CodecError, Result};
use crate::types::{OffsetSpecification, PublishedMessage, ResponseCode};
use crate::{PROTOCOL_VERSION, RESPONSE_FLAG};

/// Command identifiers, one per protocol key. The same key identifies the
/// request and its response; the response sets the high bit on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    DeclarePublisher,
    Publish,
    PublishConfirm,
    PublishError,
    QueryPublisherSequence,
    DeletePublisher,
    Subscribe,
    Deliver,
    Credit,
    StoreOffset,
    QueryOffset,
    Unsubscribe,
    CreateStream,
    DeleteStream,
    QueryMetadata,
    MetadataUpdate,
    PeerProperties,
    SaslHandshake,
    SaslAuthenticate,
    Tune,
    Open,
    Close,
    Heartbeat,
}

impl CommandKind {
    pub fn key(self) -> u16 {
        match self {
            Self::DeclarePublisher => 0x01,
            Self::Publish => 0x02,
            Self::PublishConfirm => 0x03,
            Self::PublishError => 0x04,
            Self::QueryPublisherSequence => 0x05,
            Self::DeletePublisher => 0x06,
            Self::Subscribe => 0x07,
            Self::Deliver => 0x08,
            Self::Credit => 0x09,
            Self::StoreOffset => 0x0A,
            Self::QueryOffset => 0x0B,
            Self::Unsubscribe => 0x0C,
            Self::CreateStream => 0x0D,
            Self::DeleteStream => 0x0E,
            Self::QueryMetadata => 0x0F,
            Self::MetadataUpdate => 0x10,
            Self::PeerProperties => 0x11,
            Self::SaslHandshake => 0x12,
            Self::SaslAuthenticate => 0x13,
            Self::Tune => 0x14,
            Self::Open => 0x15,
            Self::Close => 0x16,
            Self::Heartbeat => 0x17,
        }
    }

    pub fn from_key(key: u16) -> Result<Self> {
        let kind = match key {
            0x01 => Self::DeclarePublisher,
            0x02 => Self::Publish,
            0x03 => Self::PublishConfirm,
            0x04 => Self::PublishError,
            0x05 => Self::QueryPublisherSequence,
            0x06 => Self::DeletePublisher,
            0x07 => Self::Subscribe,
            0x08 => Self::Deliver,
            0x09 => Self::Credit,
            0x0A => Self::StoreOffset,
            0x0B => Self::QueryOffset,
            0x0C => Self::Unsubscribe,
            0x0D => Self::CreateStream,
            0x0E => Self::DeleteStream,
            0x0F => Self::QueryMetadata,
            0x10 => Self::MetadataUpdate,
            0x11 => Self::PeerProperties,
            0x12 => Self::SaslHandshake,
            0x13 => Self::SaslAuthenticate,
            0x14 => Self::Tune,
            0x15 => Self::Open,
            0x16 => Self::Close,
            0x17 => Self::Heartbeat,
            other => return Err(CodecError::UnknownKey(other)),
        };
        Ok(kind)
    }
}

/// An outbound frame payload.
///
/// `Tune` is the client echo of the server tune request. `CloseResponse`
/// answers a server-initiated close and is the one outbound frame that
/// carries the response bit.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    PeerProperties {
        correlation_id: u32,
        properties: HashMap<String, String>,
    },
    SaslHandshake {
        correlation_id: u32,
    },
    SaslAuthenticate {
        correlation_id: u32,
        mechanism: String,
        sasl_data: Bytes,
    },
    Tune {
        frame_max: u32,
        heartbeat: u32,
    },
    Open {
        correlation_id: u32,
        vhost: String,
    },
    Close {
        correlation_id: u32,
        code: u16,
        reason: String,
    },
    CloseResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    CreateStream {
        correlation_id: u32,
        stream: String,
        arguments: HashMap<String, String>,
    },
    DeleteStream {
        correlation_id: u32,
        stream: String,
    },
    DeclarePublisher {
        correlation_id: u32,
        publisher_id: u8,
        publisher_reference: Option<String>,
        stream: String,
    },
    DeletePublisher {
        correlation_id: u32,
        publisher_id: u8,
    },
    Publish {
        publisher_id: u8,
        messages: Vec<PublishedMessage>,
    },
    QueryPublisherSequence {
        correlation_id: u32,
        reference: String,
        stream: String,
    },
    StoreOffset {
        reference: String,
        stream: String,
        offset: u64,
    },
    QueryOffset {
        correlation_id: u32,
        reference: String,
        stream: String,
    },
    Subscribe {
        correlation_id: u32,
        subscription_id: u8,
        stream: String,
        offset: OffsetSpecification,
        credit: u16,
        properties: HashMap<String, String>,
    },
    Unsubscribe {
        correlation_id: u32,
        subscription_id: u8,
    },
    Credit {
        subscription_id: u8,
        credit: u16,
    },
    QueryMetadata {
        correlation_id: u32,
        streams: Vec<String>,
    },
    Heartbeat,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::PeerProperties { .. } => CommandKind::PeerProperties,
            Self::SaslHandshake { .. } => CommandKind::SaslHandshake,
            Self::SaslAuthenticate { .. } => CommandKind::SaslAuthenticate,
            Self::Tune { .. } => CommandKind::Tune,
            Self::Open { .. } => CommandKind::Open,
            Self::Close { .. } | Self::CloseResponse { .. } => CommandKind::Close,
            Self::CreateStream { .. } => CommandKind::CreateStream,
            Self::DeleteStream { .. } => CommandKind::DeleteStream,
            Self::DeclarePublisher { .. } => CommandKind::DeclarePublisher,
            Self::DeletePublisher { .. } => CommandKind::DeletePublisher,
            Self::Publish { .. } => CommandKind::Publish,
            Self::QueryPublisherSequence { .. } => CommandKind::QueryPublisherSequence,
            Self::StoreOffset { .. } => CommandKind::StoreOffset,
            Self::QueryOffset { .. } => CommandKind::QueryOffset,
            Self::Subscribe { .. } => CommandKind::Subscribe,
            Self::Unsubscribe { .. } => CommandKind::Unsubscribe,
            Self::Credit { .. } => CommandKind::Credit,
            Self::QueryMetadata { .. } => CommandKind::QueryMetadata,
            Self::Heartbeat => CommandKind::Heartbeat,
        }
    }

    /// Encode into a full length-prefixed frame.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(64);
        self.encode_payload(&mut payload);
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.extend_from_slice(&payload);
        frame.freeze()
    }

    fn put_header(&self, buf: &mut BytesMut) {
        let mut key = self.kind().key();
        if matches!(self, Self::CloseResponse { .. }) {
            key |= RESPONSE_FLAG;
        }
        buf.put_u16(key);
        buf.put_u16(PROTOCOL_VERSION);
    }

    pub(crate) fn encode_payload(&self, buf: &mut BytesMut) {
        self.put_header(buf);
        match self {
            Self::PeerProperties {
                correlation_id,
                properties,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string_map(buf, properties);
            }
            Self::SaslHandshake { correlation_id } => {
                buf.put_u32(*correlation_id);
            }
            Self::SaslAuthenticate {
                correlation_id,
                mechanism,
                sasl_data,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string(buf, Some(mechanism));
                codec::put_bytes(buf, sasl_data);
            }
            Self::Tune {
                frame_max,
                heartbeat,
            } => {
                buf.put_u32(*frame_max);
                buf.put_u32(*heartbeat);
            }
            Self::Open {
                correlation_id,
                vhost,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string(buf, Some(vhost));
            }
            Self::Close {
                correlation_id,
                code,
                reason,
            } => {
                buf.put_u32(*correlation_id);
                buf.put_u16(*code);
                codec::put_string(buf, Some(reason));
            }
            Self::CloseResponse {
                correlation_id,
                code,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
            }
            Self::CreateStream {
                correlation_id,
                stream,
                arguments,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string(buf, Some(stream));
                codec::put_string_map(buf, arguments);
            }
            Self::DeleteStream {
                correlation_id,
                stream,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string(buf, Some(stream));
            }
            Self::DeclarePublisher {
                correlation_id,
                publisher_id,
                publisher_reference,
                stream,
            } => {
                buf.put_u32(*correlation_id);
                buf.put_u8(*publisher_id);
                codec::put_string(buf, publisher_reference.as_deref());
                codec::put_string(buf, Some(stream));
            }
            Self::DeletePublisher {
                correlation_id,
                publisher_id,
            } => {
                buf.put_u32(*correlation_id);
                buf.put_u8(*publisher_id);
            }
            Self::Publish {
                publisher_id,
                messages,
            } => {
                buf.put_u8(*publisher_id);
                buf.put_u32(messages.len() as u32);
                for message in messages {
                    buf.put_u64(message.publishing_id);
                    codec::put_bytes(buf, &message.body);
                }
            }
            Self::QueryPublisherSequence {
                correlation_id,
                reference,
                stream,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string(buf, Some(reference));
                codec::put_string(buf, Some(stream));
            }
            Self::StoreOffset {
                reference,
                stream,
                offset,
            } => {
                codec::put_string(buf, Some(reference));
                codec::put_string(buf, Some(stream));
                buf.put_u64(*offset);
            }
            Self::QueryOffset {
                correlation_id,
                reference,
                stream,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string(buf, Some(reference));
                codec::put_string(buf, Some(stream));
            }
            Self::Subscribe {
                correlation_id,
                subscription_id,
                stream,
                offset,
                credit,
                properties,
            } => {
                buf.put_u32(*correlation_id);
                buf.put_u8(*subscription_id);
                codec::put_string(buf, Some(stream));
                offset.encode(buf);
                buf.put_u16(*credit);
                codec::put_string_map(buf, properties);
            }
            Self::Unsubscribe {
                correlation_id,
                subscription_id,
            } => {
                buf.put_u32(*correlation_id);
                buf.put_u8(*subscription_id);
            }
            Self::Credit {
                subscription_id,
                credit,
            } => {
                buf.put_u8(*subscription_id);
                buf.put_u16(*credit);
            }
            Self::QueryMetadata {
                correlation_id,
                streams,
            } => {
                buf.put_u32(*correlation_id);
                codec::put_string_list(buf, streams);
            }
            Self::Heartbeat => {}
        }
    }

    /// Decode a frame payload (without the length prefix).
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let key = codec::get_u16(&mut payload)?;
        let version = codec::get_u16(&mut payload)?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let buf = &mut payload;
        if key & RESPONSE_FLAG != 0 {
            // The close echo is the only response the client sends.
            if CommandKind::from_key(key & !RESPONSE_FLAG)? == CommandKind::Close {
                return Ok(Self::CloseResponse {
                    correlation_id: codec::get_u32(buf)?,
                    code: ResponseCode::decode(buf)?,
                });
            }
            return Err(CodecError::UnknownKey(key));
        }
        match CommandKind::from_key(key)? {
            CommandKind::PeerProperties => Ok(Self::PeerProperties {
                correlation_id: codec::get_u32(buf)?,
                properties: codec::get_string_map(buf)?,
            }),
            CommandKind::SaslHandshake => Ok(Self::SaslHandshake {
                correlation_id: codec::get_u32(buf)?,
            }),
            CommandKind::SaslAuthenticate => Ok(Self::SaslAuthenticate {
                correlation_id: codec::get_u32(buf)?,
                mechanism: codec::get_required_string(buf)?,
                sasl_data: codec::get_bytes(buf)?,
            }),
            CommandKind::Tune => Ok(Self::Tune {
                frame_max: codec::get_u32(buf)?,
                heartbeat: codec::get_u32(buf)?,
            }),
            CommandKind::Open => Ok(Self::Open {
                correlation_id: codec::get_u32(buf)?,
                vhost: codec::get_required_string(buf)?,
            }),
            CommandKind::Close => Ok(Self::Close {
                correlation_id: codec::get_u32(buf)?,
                code: codec::get_u16(buf)?,
                reason: codec::get_required_string(buf)?,
            }),
            CommandKind::CreateStream => Ok(Self::CreateStream {
                correlation_id: codec::get_u32(buf)?,
                stream: codec::get_required_string(buf)?,
                arguments: codec::get_string_map(buf)?,
            }),
            CommandKind::DeleteStream => Ok(Self::DeleteStream {
                correlation_id: codec::get_u32(buf)?,
                stream: codec::get_required_string(buf)?,
            }),
            CommandKind::DeclarePublisher => Ok(Self::DeclarePublisher {
                correlation_id: codec::get_u32(buf)?,
                publisher_id: codec::get_u8(buf)?,
                publisher_reference: codec::get_string(buf)?,
                stream: codec::get_required_string(buf)?,
            }),
            CommandKind::DeletePublisher => Ok(Self::DeletePublisher {
                correlation_id: codec::get_u32(buf)?,
                publisher_id: codec::get_u8(buf)?,
            }),
            CommandKind::Publish => {
                let publisher_id = codec::get_u8(buf)?;
                let count = codec::get_u32(buf)? as usize;
                let mut messages = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    messages.push(PublishedMessage {
                        publishing_id: codec::get_u64(buf)?,
                        body: codec::get_bytes(buf)?,
                    });
                }
                Ok(Self::Publish {
                    publisher_id,
                    messages,
                })
            }
            CommandKind::QueryPublisherSequence => Ok(Self::QueryPublisherSequence {
                correlation_id: codec::get_u32(buf)?,
                reference: codec::get_required_string(buf)?,
                stream: codec::get_required_string(buf)?,
            }),
            CommandKind::StoreOffset => Ok(Self::StoreOffset {
                reference: codec::get_required_string(buf)?,
                stream: codec::get_required_string(buf)?,
                offset: codec::get_u64(buf)?,
            }),
            CommandKind::QueryOffset => Ok(Self::QueryOffset {
                correlation_id: codec::get_u32(buf)?,
                reference: codec::get_required_string(buf)?,
                stream: codec::get_required_string(buf)?,
            }),
            CommandKind::Subscribe => Ok(Self::Subscribe {
                correlation_id: codec::get_u32(buf)?,
                subscription_id: codec::get_u8(buf)?,
                stream: codec::get_required_string(buf)?,
                offset: OffsetSpecification::decode(buf)?,
                credit: codec::get_u16(buf)?,
                properties: codec::get_string_map(buf)?,
            }),
            CommandKind::Unsubscribe => Ok(Self::Unsubscribe {
                correlation_id: codec::get_u32(buf)?,
                subscription_id: codec::get_u8(buf)?,
            }),
            CommandKind::Credit => Ok(Self::Credit {
                subscription_id: codec::get_u8(buf)?,
                credit: codec::get_u16(buf)?,
            }),
            CommandKind::QueryMetadata => Ok(Self::QueryMetadata {
                correlation_id: codec::get_u32(buf)?,
                streams: codec::get_string_list(buf)?,
            }),
            CommandKind::Heartbeat => Ok(Self::Heartbeat),
            other => Err(CodecError::UnknownKey(other.key())),
        }
    }
}
