// Delivery records pushed to subscription sinks.
use bytes::Bytes;
use tokio::sync::mpsc;

/// Where deliver frames for one subscription are pushed. The channel is
/// unbounded on purpose: the actor must never block on a slow consumer,
/// and the credit protocol is what actually bounds the inflow.
pub type DeliverySink = mpsc::UnboundedSender<Delivery>;

/// Build a sink and the receiver a consumer drains.
///
/// ```
/// use warren_client::delivery_channel;
///
/// let (_sink, _deliveries) = delivery_channel();
/// ```
pub fn delivery_channel() -> (DeliverySink, mpsc::UnboundedReceiver<Delivery>) {
    mpsc::unbounded_channel()
}

/// One deliver frame: the osiris chunk header fields consumers need for
/// offset tracking, plus the raw records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub subscription_id: u8,
    pub epoch: u64,
    pub chunk_first_offset: u64,
    pub num_records: u32,
    pub timestamp: i64,
    pub records: Bytes,
}
