// Low-level frame reads: length prefix first, cap check before the
// payload allocation, whole frames only.
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use warren_wire::{CodecError, FRAME_HEADER_LEN};

#[derive(thiserror::Error, Debug)]
pub(crate) enum FrameReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Read one whole frame payload (without the length prefix). Returns
/// `None` on a clean EOF at a frame boundary; EOF mid-frame is an error.
pub(crate) async fn read_frame<R>(
    recv: &mut R,
    scratch: &mut BytesMut,
    frame_max: usize,
) -> Result<Option<Bytes>, FrameReadError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match recv.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let length = u32::from_be_bytes(header) as usize;
    // Key and version are mandatory, so anything shorter is malformed.
    if length < 4 {
        return Err(CodecError::InvalidLength.into());
    }
    if frame_max > 0 && length > frame_max {
        return Err(CodecError::FrameTooLarge { length, frame_max }.into());
    }

    // Reuse the scratch buffer to avoid per-frame allocations.
    scratch.clear();
    scratch.resize(length, 0u8);
    recv.read_exact(&mut scratch[..]).await?;
    Ok(Some(scratch.split().freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_whole_frames_in_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut payloads = Vec::new();
        for body in [b"abc".as_slice(), b"defg".as_slice()] {
            let mut frame = Vec::new();
            frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
            frame.extend_from_slice(body);
            payloads.push(frame);
        }
        for frame in &payloads {
            server.write_all(frame).await.expect("write");
        }
        drop(server);

        let mut scratch = BytesMut::new();
        let first = read_frame(&mut client, &mut scratch, 0)
            .await
            .expect("read")
            .expect("frame");
        assert_eq!(first.as_ref(), b"abc" as &[u8]);
        let second = read_frame(&mut client, &mut scratch, 0)
            .await
            .expect("read")
            .expect("frame");
        assert_eq!(second.as_ref(), b"defg" as &[u8]);
        let eof = read_frame(&mut client, &mut scratch, 0).await.expect("read");
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(&[0, 0, 0, 10, 1, 2, 3])
            .await
            .expect("write");
        drop(server);

        let mut scratch = BytesMut::new();
        let err = read_frame(&mut client, &mut scratch, 0)
            .await
            .expect_err("truncated frame");
        assert!(matches!(err, FrameReadError::Io(_)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_reading_it() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(&(64u32).to_be_bytes())
            .await
            .expect("write");

        let mut scratch = BytesMut::new();
        let err = read_frame(&mut client, &mut scratch, 16)
            .await
            .expect_err("oversized");
        match err {
            FrameReadError::Codec(CodecError::FrameTooLarge { length, frame_max }) => {
                assert_eq!(length, 64);
                assert_eq!(frame_max, 16);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undersized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server.write_all(&(2u32).to_be_bytes()).await.expect("write");

        let mut scratch = BytesMut::new();
        let err = read_frame(&mut client, &mut scratch, 0)
            .await
            .expect_err("undersized");
        assert!(matches!(
            err,
            FrameReadError::Codec(CodecError::InvalidLength)
        ));
    }
}
