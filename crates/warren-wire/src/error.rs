// Codec failures. Every variant is fatal for the connection that hit it.
pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("incomplete frame")]
    Incomplete,
    #[error("unknown command key {0:#06x}")]
    UnknownKey(u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("frame of {length} bytes exceeds frame_max {frame_max}")]
    FrameTooLarge { length: usize, frame_max: usize },
    #[error("invalid length field")]
    InvalidLength,
    #[error("invalid utf-8 in string field")]
    InvalidString,
    #[error("unknown response code {0:#06x}")]
    UnknownResponseCode(u16),
    #[error("unknown offset specification kind {0}")]
    UnknownOffsetKind(u16),
}
