// Frame IO over the TCP stream halves.
pub(crate) use self::frame_io::{FrameReadError, read_frame};

mod frame_io;
