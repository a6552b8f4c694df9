//! Public client handle.
//!
//! # Purpose
//! Exposes the command surface of one stream connection. Each call crosses
//! into the connection actor through a bounded mailbox and blocks on a
//! one-shot reply; arguments are validated locally before anything touches
//! the wire.
use std::collections::HashMap;
use tokio::sync::oneshot;
use warren_wire::{Broker, OffsetSpecification, PublishedMessage, StreamMetadata};

use crate::client::actor::{self, Op};
use crate::client::subscription::DeliverySink;
use crate::config::{ClientConfig, MAX_NAME_LEN};
use crate::error::{ClientError, Result};

/// The cached cluster view, merged from every metadata response with
/// last-write-wins per key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataSnapshot {
    pub brokers: HashMap<u16, Broker>,
    pub streams: HashMap<String, StreamMetadata>,
}

/// Handle to one stream connection.
///
/// Cloning is cheap; clones share the same connection actor. The
/// connection starts closed; call [`Client::connect`] to run the
/// handshake. When the last handle is dropped the actor releases the
/// socket and answers anything still parked.
///
/// ```no_run
/// use warren_client::{Client, ClientConfig};
///
/// # async fn run() -> warren_client::Result<()> {
/// let client = Client::new(ClientConfig::default());
/// client.connect().await?;
/// client.create_stream("events", Default::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    ops: tokio::sync::mpsc::Sender<Op>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            ops: actor::spawn(config),
        }
    }

    async fn call<T>(&self, op: Op, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.ops.send(op).await.map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Run the handshake. Concurrent callers share one connect sequence
    /// and all see its outcome.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(Op::Connect { reply }, rx).await
    }

    /// Close the connection, waiting for the server's close response.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::Close {
                code,
                reason: reason.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn create_stream(
        &self,
        stream: &str,
        arguments: HashMap<String, String>,
    ) -> Result<()> {
        validate_name("stream", stream)?;
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::CreateStream {
                stream: stream.to_string(),
                arguments,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn delete_stream(&self, stream: &str) -> Result<()> {
        validate_name("stream", stream)?;
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::DeleteStream {
                stream: stream.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Declare a publisher on `stream` and return its connection-local id.
    /// The id is allocated client-side before the request goes out.
    pub async fn declare_publisher(
        &self,
        stream: &str,
        reference: Option<&str>,
    ) -> Result<u8> {
        validate_name("stream", stream)?;
        if let Some(reference) = reference {
            validate_name("publisher_reference", reference)?;
        }
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::DeclarePublisher {
                stream: stream.to_string(),
                reference: reference.map(str::to_string),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn delete_publisher(&self, publisher_id: u8) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::DeletePublisher {
                publisher_id,
                reply,
            },
            rx,
        )
        .await
    }

    /// Append messages under a declared publisher. Fire and forget:
    /// success means the frame was written, confirmations arrive
    /// asynchronously.
    pub async fn publish(
        &self,
        publisher_id: u8,
        messages: Vec<PublishedMessage>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::Publish {
                publisher_id,
                messages,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn query_publisher_sequence(
        &self,
        reference: &str,
        stream: &str,
    ) -> Result<u64> {
        validate_name("reference", reference)?;
        validate_name("stream", stream)?;
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::QueryPublisherSequence {
                reference: reference.to_string(),
                stream: stream.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Persist a consumer offset server-side. No wire reply exists for
    /// this command.
    pub async fn store_offset(
        &self,
        reference: &str,
        stream: &str,
        offset: u64,
    ) -> Result<()> {
        validate_name("reference", reference)?;
        validate_name("stream", stream)?;
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::StoreOffset {
                reference: reference.to_string(),
                stream: stream.to_string(),
                offset,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn query_offset(&self, reference: &str, stream: &str) -> Result<u64> {
        validate_name("reference", reference)?;
        validate_name("stream", stream)?;
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::QueryOffset {
                reference: reference.to_string(),
                stream: stream.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Subscribe to `stream` and bind the sink to the returned
    /// connection-local subscription id. Deliveries are pushed to the
    /// sink; flow control is the caller's `credit` budget.
    pub async fn subscribe(
        &self,
        stream: &str,
        offset: OffsetSpecification,
        credit: u16,
        properties: HashMap<String, String>,
        sink: DeliverySink,
    ) -> Result<u8> {
        validate_name("stream", stream)?;
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::Subscribe {
                stream: stream.to_string(),
                offset,
                credit,
                properties,
                sink,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn unsubscribe(&self, subscription_id: u8) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::Unsubscribe {
                subscription_id,
                reply,
            },
            rx,
        )
        .await
    }

    /// Grant the server more delivery credit. No wire reply exists for
    /// this command.
    pub async fn credit(&self, subscription_id: u8, credit: u16) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::Credit {
                subscription_id,
                credit,
                reply,
            },
            rx,
        )
        .await
    }

    /// Query cluster metadata for the named streams and return the merged
    /// cache.
    pub async fn query_metadata(&self, streams: &[&str]) -> Result<MetadataSnapshot> {
        for stream in streams {
            validate_name("stream", stream)?;
        }
        let (reply, rx) = oneshot::channel();
        self.call(
            Op::QueryMetadata {
                streams: streams.iter().map(|s| s.to_string()).collect(),
                reply,
            },
            rx,
        )
        .await
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<()> {
    if value.len() > MAX_NAME_LEN {
        return Err(ClientError::InvalidArgument(format!(
            "{field} must be at most {MAX_NAME_LEN} bytes, got {}",
            value.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_accepts_up_to_255_bytes() {
        let name = "s".repeat(255);
        assert!(validate_name("stream", &name).is_ok());
    }

    #[test]
    fn validate_name_rejects_oversized_names() {
        let name = "s".repeat(256);
        let err = validate_name("stream", &name).expect_err("oversized");
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn oversized_stream_name_is_rejected_without_a_connection() {
        let client = Client::new(ClientConfig::default());
        let err = client
            .create_stream(&"s".repeat(300), HashMap::new())
            .await
            .expect_err("invalid argument");
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }
}
