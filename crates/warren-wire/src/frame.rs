//! Server-to-client frames.
//!
//! # Purpose
//! One tagged enum over everything the server can send: correlated
//! responses (key with the high bit set), server-initiated requests
//! (tune, close, metadata_update), and the asynchronous push frames
//! (deliver, publish_confirm, publish_error, heartbeat). Encode exists so
//! a test peer can script the server side with the same crate.
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::codec;
use crate::command::CommandKind;
use crate::error::{CodecError, Result};
use crate::types::{Broker, Chunk, ResponseCode, StreamMetadata};
use crate::{PROTOCOL_VERSION, RESPONSE_FLAG};

#[derive(Clone, Debug, PartialEq)]
pub enum ServerFrame {
    PeerPropertiesResponse {
        correlation_id: u32,
        code: ResponseCode,
        properties: HashMap<String, String>,
    },
    SaslHandshakeResponse {
        correlation_id: u32,
        code: ResponseCode,
        mechanisms: Vec<String>,
    },
    SaslAuthenticateResponse {
        correlation_id: u32,
        code: ResponseCode,
        sasl_data: Bytes,
    },
    Tune {
        frame_max: u32,
        heartbeat: u32,
    },
    OpenResponse {
        correlation_id: u32,
        code: ResponseCode,
        connection_properties: HashMap<String, String>,
    },
    // Server-initiated close; the client must echo a close response.
    Close {
        correlation_id: u32,
        code: u16,
        reason: String,
    },
    // Response to a close the client sent.
    CloseResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    CreateStreamResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    DeleteStreamResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    DeclarePublisherResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    DeletePublisherResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    QueryPublisherSequenceResponse {
        correlation_id: u32,
        code: ResponseCode,
        sequence: u64,
    },
    QueryOffsetResponse {
        correlation_id: u32,
        code: ResponseCode,
        offset: u64,
    },
    SubscribeResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    UnsubscribeResponse {
        correlation_id: u32,
        code: ResponseCode,
    },
    // Sent by the server only when a credit frame named an unknown
    // subscription.
    CreditResponse {
        code: ResponseCode,
        subscription_id: u8,
    },
    MetadataResponse {
        correlation_id: u32,
        brokers: Vec<Broker>,
        streams: Vec<(String, StreamMetadata)>,
    },
    MetadataUpdate {
        code: u16,
        stream: String,
    },
    Deliver {
        subscription_id: u8,
        chunk: Chunk,
    },
    PublishConfirm {
        publisher_id: u8,
        publishing_ids: Vec<u64>,
    },
    PublishError {
        publisher_id: u8,
        errors: Vec<(u64, ResponseCode)>,
    },
    Heartbeat,
}

impl ServerFrame {
    /// Decode a frame payload (without the length prefix).
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let key = codec::get_u16(&mut payload)?;
        let version = codec::get_u16(&mut payload)?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let buf = &mut payload;
        if key & RESPONSE_FLAG != 0 {
            return Self::decode_response(CommandKind::from_key(key & !RESPONSE_FLAG)?, buf);
        }
        match CommandKind::from_key(key)? {
            CommandKind::Tune => Ok(Self::Tune {
                frame_max: codec::get_u32(buf)?,
                heartbeat: codec::get_u32(buf)?,
            }),
            CommandKind::Close => Ok(Self::Close {
                correlation_id: codec::get_u32(buf)?,
                code: codec::get_u16(buf)?,
                reason: codec::get_required_string(buf)?,
            }),
            CommandKind::MetadataUpdate => Ok(Self::MetadataUpdate {
                code: codec::get_u16(buf)?,
                stream: codec::get_required_string(buf)?,
            }),
            CommandKind::Deliver => Ok(Self::Deliver {
                subscription_id: codec::get_u8(buf)?,
                chunk: Chunk::decode(buf)?,
            }),
            CommandKind::PublishConfirm => {
                let publisher_id = codec::get_u8(buf)?;
                let count = codec::get_u32(buf)? as usize;
                let mut publishing_ids = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    publishing_ids.push(codec::get_u64(buf)?);
                }
                Ok(Self::PublishConfirm {
                    publisher_id,
                    publishing_ids,
                })
            }
            CommandKind::PublishError => {
                let publisher_id = codec::get_u8(buf)?;
                let count = codec::get_u32(buf)? as usize;
                let mut errors = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    errors.push((codec::get_u64(buf)?, ResponseCode::decode(buf)?));
                }
                Ok(Self::PublishError {
                    publisher_id,
                    errors,
                })
            }
            CommandKind::Heartbeat => Ok(Self::Heartbeat),
            other => Err(CodecError::UnknownKey(other.key())),
        }
    }

    fn decode_response(kind: CommandKind, buf: &mut Bytes) -> Result<Self> {
        match kind {
            CommandKind::PeerProperties => Ok(Self::PeerPropertiesResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
                properties: codec::get_string_map(buf)?,
            }),
            CommandKind::SaslHandshake => Ok(Self::SaslHandshakeResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
                mechanisms: codec::get_string_list(buf)?,
            }),
            CommandKind::SaslAuthenticate => {
                let correlation_id = codec::get_u32(buf)?;
                let code = ResponseCode::decode(buf)?;
                // The opaque tail is optional; an absent tail is an empty
                // challenge.
                let sasl_data = if buf.is_empty() {
                    Bytes::new()
                } else {
                    codec::get_bytes(buf)?
                };
                Ok(Self::SaslAuthenticateResponse {
                    correlation_id,
                    code,
                    sasl_data,
                })
            }
            CommandKind::Open => {
                let correlation_id = codec::get_u32(buf)?;
                let code = ResponseCode::decode(buf)?;
                let connection_properties = if buf.is_empty() {
                    HashMap::new()
                } else {
                    codec::get_string_map(buf)?
                };
                Ok(Self::OpenResponse {
                    correlation_id,
                    code,
                    connection_properties,
                })
            }
            CommandKind::Close => Ok(Self::CloseResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::CreateStream => Ok(Self::CreateStreamResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::DeleteStream => Ok(Self::DeleteStreamResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::DeclarePublisher => Ok(Self::DeclarePublisherResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::DeletePublisher => Ok(Self::DeletePublisherResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::QueryPublisherSequence => Ok(Self::QueryPublisherSequenceResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
                sequence: codec::get_u64(buf)?,
            }),
            CommandKind::QueryOffset => Ok(Self::QueryOffsetResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
                offset: codec::get_u64(buf)?,
            }),
            CommandKind::Subscribe => Ok(Self::SubscribeResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::Unsubscribe => Ok(Self::UnsubscribeResponse {
                correlation_id: codec::get_u32(buf)?,
                code: ResponseCode::decode(buf)?,
            }),
            CommandKind::Credit => Ok(Self::CreditResponse {
                code: ResponseCode::decode(buf)?,
                subscription_id: codec::get_u8(buf)?,
            }),
            CommandKind::QueryMetadata => {
                let correlation_id = codec::get_u32(buf)?;
                let broker_count = codec::get_u32(buf)? as usize;
                let mut brokers = Vec::with_capacity(broker_count.min(64));
                for _ in 0..broker_count {
                    brokers.push(Broker {
                        reference: codec::get_u16(buf)?,
                        host: codec::get_required_string(buf)?,
                        port: codec::get_u32(buf)?,
                    });
                }
                let stream_count = codec::get_u32(buf)? as usize;
                let mut streams = Vec::with_capacity(stream_count.min(64));
                for _ in 0..stream_count {
                    let name = codec::get_required_string(buf)?;
                    let response_code = ResponseCode::decode(buf)?;
                    let leader = codec::get_u16(buf)?;
                    let replicas = codec::get_u16_list(buf)?;
                    streams.push((
                        name,
                        StreamMetadata {
                            response_code,
                            leader,
                            replicas,
                        },
                    ));
                }
                Ok(Self::MetadataResponse {
                    correlation_id,
                    brokers,
                    streams,
                })
            }
            other => Err(CodecError::UnknownKey(other.key() | RESPONSE_FLAG)),
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

    fn kind(&self) -> CommandKind {
        match self {
            Self::PeerPropertiesResponse { .. } => CommandKind::PeerProperties,
            Self::SaslHandshakeResponse { .. } => CommandKind::SaslHandshake,
            Self::SaslAuthenticateResponse { .. } => CommandKind::SaslAuthenticate,
            Self::Tune { .. } => CommandKind::Tune,
            Self::OpenResponse { .. } => CommandKind::Open,
            Self::Close { .. } | Self::CloseResponse { .. } => CommandKind::Close,
            Self::CreateStreamResponse { .. } => CommandKind::CreateStream,
            Self::DeleteStreamResponse { .. } => CommandKind::DeleteStream,
            Self::DeclarePublisherResponse { .. } => CommandKind::DeclarePublisher,
            Self::DeletePublisherResponse { .. } => CommandKind::DeletePublisher,
            Self::QueryPublisherSequenceResponse { .. } => CommandKind::QueryPublisherSequence,
            Self::QueryOffsetResponse { .. } => CommandKind::QueryOffset,
            Self::SubscribeResponse { .. } => CommandKind::Subscribe,
            Self::UnsubscribeResponse { .. } => CommandKind::Unsubscribe,
            Self::CreditResponse { .. } => CommandKind::Credit,
            Self::MetadataResponse { .. } => CommandKind::QueryMetadata,
            Self::MetadataUpdate { .. } => CommandKind::MetadataUpdate,
            Self::Deliver { .. } => CommandKind::Deliver,
            Self::PublishConfirm { .. } => CommandKind::PublishConfirm,
            Self::PublishError { .. } => CommandKind::PublishError,
            Self::Heartbeat => CommandKind::Heartbeat,
        }
    }

    fn is_response(&self) -> bool {
        !matches!(
            self,
            Self::Tune { .. }
                | Self::Close { .. }
                | Self::MetadataUpdate { .. }
                | Self::Deliver { .. }
                | Self::PublishConfirm { .. }
                | Self::PublishError { .. }
                | Self::Heartbeat
        )
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        let mut key = self.kind().key();
        if self.is_response() {
            key |= RESPONSE_FLAG;
        }
        buf.put_u16(key);
        buf.put_u16(PROTOCOL_VERSION);
        match self {
            Self::PeerPropertiesResponse {
                correlation_id,
                code,
                properties,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
                codec::put_string_map(buf, properties);
            }
            Self::SaslHandshakeResponse {
                correlation_id,
                code,
                mechanisms,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
                codec::put_string_list(buf, mechanisms);
            }
            Self::SaslAuthenticateResponse {
                correlation_id,
                code,
                sasl_data,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
                if !sasl_data.is_empty() {
                    codec::put_bytes(buf, sasl_data);
                }
            }
            Self::Tune {
                frame_max,
                heartbeat,
            } => {
                buf.put_u32(*frame_max);
                buf.put_u32(*heartbeat);
            }
            Self::OpenResponse {
                correlation_id,
                code,
                connection_properties,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
                codec::put_string_map(buf, connection_properties);
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
            }
            | Self::CreateStreamResponse {
                correlation_id,
                code,
            }
            | Self::DeleteStreamResponse {
                correlation_id,
                code,
            }
            | Self::DeclarePublisherResponse {
                correlation_id,
                code,
            }
            | Self::DeletePublisherResponse {
                correlation_id,
                code,
            }
            | Self::SubscribeResponse {
                correlation_id,
                code,
            }
            | Self::UnsubscribeResponse {
                correlation_id,
                code,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
            }
            Self::QueryPublisherSequenceResponse {
                correlation_id,
                code,
                sequence,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
                buf.put_u64(*sequence);
            }
            Self::QueryOffsetResponse {
                correlation_id,
                code,
                offset,
            } => {
                buf.put_u32(*correlation_id);
                code.encode(buf);
                buf.put_u64(*offset);
            }
            Self::CreditResponse {
                code,
                subscription_id,
            } => {
                code.encode(buf);
                buf.put_u8(*subscription_id);
            }
            Self::MetadataResponse {
                correlation_id,
                brokers,
                streams,
            } => {
                buf.put_u32(*correlation_id);
                buf.put_u32(brokers.len() as u32);
                for broker in brokers {
                    buf.put_u16(broker.reference);
                    codec::put_string(buf, Some(&broker.host));
                    buf.put_u32(broker.port);
                }
                buf.put_u32(streams.len() as u32);
                for (name, metadata) in streams {
                    codec::put_string(buf, Some(name));
                    metadata.response_code.encode(buf);
                    buf.put_u16(metadata.leader);
                    codec::put_u16_list(buf, &metadata.replicas);
                }
            }
            Self::MetadataUpdate { code, stream } => {
                buf.put_u16(*code);
                codec::put_string(buf, Some(stream));
            }
            Self::Deliver {
                subscription_id,
                chunk,
            } => {
                buf.put_u8(*subscription_id);
                chunk.encode(buf);
            }
            Self::PublishConfirm {
                publisher_id,
                publishing_ids,
            } => {
                buf.put_u8(*publisher_id);
                buf.put_u32(publishing_ids.len() as u32);
                for id in publishing_ids {
                    buf.put_u64(*id);
                }
            }
            Self::PublishError {
                publisher_id,
                errors,
            } => {
                buf.put_u8(*publisher_id);
                buf.put_u32(errors.len() as u32);
                for (id, code) in errors {
                    buf.put_u64(*id);
                    code.encode(buf);
                }
            }
            Self::Heartbeat => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: ServerFrame) {
        let encoded = frame.encode();
        let decoded = ServerFrame::decode(encoded.slice(4..)).expect("decode");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn every_server_frame_round_trips() {
        let mut properties = HashMap::new();
        properties.insert("version".to_string(), "4.0".to_string());
        round_trip(ServerFrame::PeerPropertiesResponse {
            correlation_id: 1,
            code: ResponseCode::Ok,
            properties,
        });
        round_trip(ServerFrame::SaslHandshakeResponse {
            correlation_id: 2,
            code: ResponseCode::Ok,
            mechanisms: vec!["PLAIN".to_string(), "EXTERNAL".to_string()],
        });
        round_trip(ServerFrame::SaslAuthenticateResponse {
            correlation_id: 3,
            code: ResponseCode::Ok,
            sasl_data: Bytes::new(),
        });
        round_trip(ServerFrame::SaslAuthenticateResponse {
            correlation_id: 3,
            code: ResponseCode::Ok,
            sasl_data: Bytes::from_static(b"opaque"),
        });
        round_trip(ServerFrame::Tune {
            frame_max: 1_048_576,
            heartbeat: 60,
        });
        round_trip(ServerFrame::OpenResponse {
            correlation_id: 4,
            code: ResponseCode::Ok,
            connection_properties: HashMap::new(),
        });
        round_trip(ServerFrame::Close {
            correlation_id: 9,
            code: 0,
            reason: "bye".to_string(),
        });
        round_trip(ServerFrame::CloseResponse {
            correlation_id: 5,
            code: ResponseCode::Ok,
        });
        round_trip(ServerFrame::CreateStreamResponse {
            correlation_id: 6,
            code: ResponseCode::StreamAlreadyExists,
        });
        round_trip(ServerFrame::DeleteStreamResponse {
            correlation_id: 7,
            code: ResponseCode::StreamDoesNotExist,
        });
        round_trip(ServerFrame::DeclarePublisherResponse {
            correlation_id: 8,
            code: ResponseCode::Ok,
        });
        round_trip(ServerFrame::DeletePublisherResponse {
            correlation_id: 10,
            code: ResponseCode::PublisherDoesNotExist,
        });
        round_trip(ServerFrame::QueryPublisherSequenceResponse {
            correlation_id: 11,
            code: ResponseCode::Ok,
            sequence: 41,
        });
        round_trip(ServerFrame::QueryOffsetResponse {
            correlation_id: 12,
            code: ResponseCode::NoOffset,
            offset: 0,
        });
        round_trip(ServerFrame::SubscribeResponse {
            correlation_id: 13,
            code: ResponseCode::Ok,
        });
        round_trip(ServerFrame::UnsubscribeResponse {
            correlation_id: 14,
            code: ResponseCode::SubscriptionIdDoesNotExist,
        });
        round_trip(ServerFrame::CreditResponse {
            code: ResponseCode::SubscriptionIdDoesNotExist,
            subscription_id: 3,
        });
        round_trip(ServerFrame::MetadataResponse {
            correlation_id: 15,
            brokers: vec![Broker {
                reference: 0,
                host: "localhost".to_string(),
                port: 5552,
            }],
            streams: vec![(
                "s1".to_string(),
                StreamMetadata {
                    response_code: ResponseCode::Ok,
                    leader: 0,
                    replicas: vec![1, 2],
                },
            )],
        });
        round_trip(ServerFrame::MetadataUpdate {
            code: 6,
            stream: "s1".to_string(),
        });
        round_trip(ServerFrame::Deliver {
            subscription_id: 1,
            chunk: Chunk {
                num_entries: 1,
                num_records: 1,
                timestamp: 0,
                epoch: 1,
                chunk_first_offset: 0,
                crc: 0,
                records: Bytes::from_static(b"record"),
            },
        });
        round_trip(ServerFrame::PublishConfirm {
            publisher_id: 1,
            publishing_ids: vec![1, 2, 3],
        });
        round_trip(ServerFrame::PublishError {
            publisher_id: 1,
            errors: vec![(4, ResponseCode::StreamNotAvailable)],
        });
        round_trip(ServerFrame::Heartbeat);
    }

    #[test]
    fn decode_rejects_unknown_response_kind() {
        // A "response" to deliver does not exist in the protocol.
        let mut buf = BytesMut::new();
        buf.put_u16(CommandKind::Deliver.key() | RESPONSE_FLAG);
        buf.put_u16(PROTOCOL_VERSION);
        let err = ServerFrame::decode(buf.freeze()).expect_err("unknown");
        assert_eq!(
            err,
            CodecError::UnknownKey(CommandKind::Deliver.key() | RESPONSE_FLAG)
        );
    }

    #[test]
    fn decode_rejects_truncated_response() {
        let mut buf = BytesMut::new();
        buf.put_u16(CommandKind::CreateStream.key() | RESPONSE_FLAG);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u32(1);
        let err = ServerFrame::decode(buf.freeze()).expect_err("truncated");
        assert_eq!(err, CodecError::Incomplete);
    }
}
