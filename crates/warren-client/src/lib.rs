//! Connection core for the RabbitMQ Stream protocol.
//!
//! One TCP connection, one owning actor: the handshake state machine,
//! request/response correlation, heartbeats, and push dispatch of deliver
//! frames to subscription sinks. Publisher and consumer conveniences
//! belong to the layers above; this crate is the connection itself.
pub mod client;
pub mod config;
pub mod error;

mod wire;

pub use client::connection::{Client, MetadataSnapshot};
pub use client::subscription::{Delivery, DeliverySink, delivery_channel};
pub use config::ClientConfig;
pub use error::{ClientError, Result};

// Re-export the wire types that appear in the public API.
pub use warren_wire::{
    Broker, OffsetSpecification, PublishedMessage, ResponseCode, StreamMetadata,
};
