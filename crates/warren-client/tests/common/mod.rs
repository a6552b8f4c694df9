// Scripted server peer for connection tests: a real TCP listener that
// reads client commands and answers with hand-built server frames.
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use warren_client::ClientConfig;
use warren_wire::{Command, ResponseCode, ServerFrame};

pub async fn listen() -> Result<(TcpListener, ClientConfig)> {
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind")?;
    let port = listener.local_addr().context("local addr")?.port();
    let config = ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ClientConfig::default()
    };
    Ok((listener, config))
}

pub async fn read_command(socket: &mut TcpStream) -> Result<Command> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await.context("read length")?;
    let length = u32::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; length];
    socket
        .read_exact(&mut payload)
        .await
        .context("read payload")?;
    Command::decode(payload.into()).context("decode command")
}

pub async fn write_frame(socket: &mut TcpStream, frame: &ServerFrame) -> Result<()> {
    socket
        .write_all(&frame.encode())
        .await
        .context("write frame")
}

/// Play the server side of a clean handshake with the default tune
/// values.
pub async fn run_handshake(socket: &mut TcpStream) -> Result<()> {
    run_handshake_with(socket, 1_048_576, 60).await
}

pub async fn run_handshake_with(
    socket: &mut TcpStream,
    frame_max: u32,
    heartbeat: u32,
) -> Result<()> {
    let correlation_id = match read_command(socket).await? {
        Command::PeerProperties { correlation_id, .. } => correlation_id,
        other => bail!("expected peer_properties, got {other:?}"),
    };
    let mut properties = HashMap::new();
    properties.insert("product".to_string(), "RabbitMQ Stream".to_string());
    write_frame(
        socket,
        &ServerFrame::PeerPropertiesResponse {
            correlation_id,
            code: ResponseCode::Ok,
            properties,
        },
    )
    .await?;

    let correlation_id = match read_command(socket).await? {
        Command::SaslHandshake { correlation_id } => correlation_id,
        other => bail!("expected sasl_handshake, got {other:?}"),
    };
    write_frame(
        socket,
        &ServerFrame::SaslHandshakeResponse {
            correlation_id,
            code: ResponseCode::Ok,
            mechanisms: vec!["PLAIN".to_string()],
        },
    )
    .await?;

    let correlation_id = match read_command(socket).await? {
        Command::SaslAuthenticate {
            correlation_id,
            mechanism,
            ..
        } => {
            if mechanism != "PLAIN" {
                bail!("expected PLAIN, got {mechanism}");
            }
            correlation_id
        }
        other => bail!("expected sasl_authenticate, got {other:?}"),
    };
    write_frame(
        socket,
        &ServerFrame::SaslAuthenticateResponse {
            correlation_id,
            code: ResponseCode::Ok,
            sasl_data: bytes::Bytes::new(),
        },
    )
    .await?;

    write_frame(
        socket,
        &ServerFrame::Tune {
            frame_max,
            heartbeat,
        },
    )
    .await?;
    match read_command(socket).await? {
        Command::Tune { .. } => {}
        other => bail!("expected tune echo, got {other:?}"),
    }

    let correlation_id = match read_command(socket).await? {
        Command::Open { correlation_id, .. } => correlation_id,
        other => bail!("expected open, got {other:?}"),
    };
    write_frame(
        socket,
        &ServerFrame::OpenResponse {
            correlation_id,
            code: ResponseCode::Ok,
            connection_properties: HashMap::new(),
        },
    )
    .await?;
    Ok(())
}
