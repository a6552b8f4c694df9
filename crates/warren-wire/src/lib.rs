// Wire format for the RabbitMQ Stream protocol: length-prefixed frames,
// a 16-bit command key with the high bit marking responses, and bit-exact
// codecs for both directions.
mod codec;
mod command;
mod error;
mod frame;
mod types;

pub use command::{Command, CommandKind};
pub use error::{CodecError, Result};
pub use frame::ServerFrame;
pub use types::{
    Broker, Chunk, OffsetSpecification, PublishedMessage, ResponseCode, StreamMetadata,
};

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u16 = 1;

/// High bit of the command key distinguishing responses from requests.
pub const RESPONSE_FLAG: u16 = 0x8000;

/// Size of the length prefix preceding every frame.
pub const FRAME_HEADER_LEN: usize = 4;
