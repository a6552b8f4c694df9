//! Request tracker: pending replies keyed by command kind and correlation
//! id.
//!
//! # Design notes
//! Correlation ids are unique on their own (the sequence is monotonic),
//! but the composite key defends against a buggy server echoing a stale
//! id and lets each entry carry a waiter typed for its command. Entries
//! for pre-allocated resources (publisher and subscription ids) stash the
//! id as payload so the caller gets back exactly what was sent.
use std::collections::HashMap;
use tokio::sync::oneshot;
use warren_wire::CommandKind;

use crate::client::connection::MetadataSnapshot;
use crate::client::subscription::DeliverySink;
use crate::error::{ClientError, Result};

/// The waiter and payload parked for one in-flight request. Handshake
/// steps and internally triggered metadata queries have no caller waiter.
pub(crate) enum Pending {
    PeerProperties,
    SaslHandshake,
    SaslAuthenticate,
    Open,
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
    CreateStream {
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteStream {
        reply: oneshot::Sender<Result<()>>,
    },
    DeclarePublisher {
        publisher_id: u8,
        reply: oneshot::Sender<Result<u8>>,
    },
    DeletePublisher {
        reply: oneshot::Sender<Result<()>>,
    },
    QueryPublisherSequence {
        reply: oneshot::Sender<Result<u64>>,
    },
    QueryOffset {
        reply: oneshot::Sender<Result<u64>>,
    },
    Subscribe {
        subscription_id: u8,
        sink: DeliverySink,
        reply: oneshot::Sender<Result<u8>>,
    },
    Unsubscribe {
        subscription_id: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    QueryMetadata {
        reply: Option<oneshot::Sender<Result<MetadataSnapshot>>>,
    },
}

impl Pending {
    /// Answer the waiter (if any) with an error. Dropped receivers are
    /// fine; a cancelled caller simply never sees the reply.
    pub(crate) fn reject(self, err: ClientError) {
        match self {
            Self::PeerProperties | Self::SaslHandshake | Self::SaslAuthenticate | Self::Open => {}
            Self::Close { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::CreateStream { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::DeleteStream { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::DeclarePublisher { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::DeletePublisher { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::QueryPublisherSequence { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::QueryOffset { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::Subscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Unsubscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::QueryMetadata { reply } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }
}

/// Pending replies for one connection. The correlation sequence starts at
/// 1 and only ever moves forward.
pub(crate) struct RequestTracker {
    next_correlation: u32,
    pending: HashMap<(CommandKind, u32), Pending>,
}

impl RequestTracker {
    pub(crate) fn new() -> Self {
        Self {
            next_correlation: 1,
            pending: HashMap::new(),
        }
    }

    /// Assign the next correlation id and park the waiter under it.
    pub(crate) fn push(&mut self, kind: CommandKind, pending: Pending) -> u32 {
        let correlation_id = self.next_correlation;
        self.next_correlation += 1;
        self.pending.insert((kind, correlation_id), pending);
        metrics::gauge!("warren_client_pending_requests").set(self.pending.len() as f64);
        correlation_id
    }

    pub(crate) fn pop(&mut self, kind: CommandKind, correlation_id: u32) -> Option<Pending> {
        let entry = self.pending.remove(&(kind, correlation_id));
        metrics::gauge!("warren_client_pending_requests").set(self.pending.len() as f64);
        entry
    }

    /// Remove every entry, for the caller to reject. Used on connection
    /// loss and close.
    pub(crate) fn drain(&mut self) -> Vec<Pending> {
        metrics::gauge!("warren_client_pending_requests").set(0.0);
        self.pending.drain().map(|(_, pending)| pending).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_strictly_increasing_ids() {
        let mut tracker = RequestTracker::new();
        let first = tracker.push(CommandKind::CreateStream, Pending::PeerProperties);
        let second = tracker.push(CommandKind::DeleteStream, Pending::PeerProperties);
        let third = tracker.push(CommandKind::CreateStream, Pending::PeerProperties);
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 3);
    }

    #[test]
    fn pop_requires_matching_kind() {
        let mut tracker = RequestTracker::new();
        let correlation_id = tracker.push(CommandKind::QueryOffset, Pending::PeerProperties);
        assert!(tracker.pop(CommandKind::CreateStream, correlation_id).is_none());
        assert!(tracker.pop(CommandKind::QueryOffset, correlation_id).is_some());
        // Removed exactly once.
        assert!(tracker.pop(CommandKind::QueryOffset, correlation_id).is_none());
    }

    #[test]
    fn drain_rejects_every_waiter() {
        let mut tracker = RequestTracker::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        tracker.push(CommandKind::CreateStream, Pending::CreateStream { reply: tx1 });
        tracker.push(CommandKind::QueryOffset, Pending::QueryOffset { reply: tx2 });

        for pending in tracker.drain() {
            pending.reject(ClientError::TcpClosed);
        }
        assert!(tracker.is_empty());
        assert_eq!(rx1.try_recv().expect("reply"), Err(ClientError::TcpClosed));
        assert_eq!(rx2.try_recv().expect("reply"), Err(ClientError::TcpClosed));
    }

    #[test]
    fn declare_publisher_payload_survives_parking() {
        let mut tracker = RequestTracker::new();
        let (tx, _rx) = oneshot::channel();
        let correlation_id = tracker.push(
            CommandKind::DeclarePublisher,
            Pending::DeclarePublisher {
                publisher_id: 7,
                reply: tx,
            },
        );
        match tracker.pop(CommandKind::DeclarePublisher, correlation_id) {
            Some(Pending::DeclarePublisher { publisher_id, .. }) => assert_eq!(publisher_id, 7),
            _ => panic!("expected a declare_publisher entry"),
        }
    }
}
