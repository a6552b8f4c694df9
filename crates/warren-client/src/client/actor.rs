//! Connection actor: the single owner of the socket, the request tracker,
//! and every piece of mutable connection state.
//!
//! # Purpose
//! Drives the connection lifecycle (connect, authenticate, tune, open,
//! close) and dispatches every inbound frame: correlated responses wake
//! the parked caller, server-initiated requests are answered in place, and
//! deliver frames are pushed to subscription sinks.
//!
//! # Design notes
//! One task serializes all transitions. User calls arrive on a bounded
//! mailbox, inbound frames on an event queue fed by a reader task, and
//! heartbeats from a timer armed at tune. Outbound writes complete before
//! the next send starts, so wire order matches correlation order.
use bytes::BytesMut;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use warren_wire::{
    Broker, Chunk, Command, CommandKind, OffsetSpecification, PublishedMessage, ResponseCode,
    ServerFrame, StreamMetadata,
};

use crate::client::connection::MetadataSnapshot;
use crate::client::subscription::{Delivery, DeliverySink};
use crate::client::tracker::{Pending, RequestTracker};
use crate::config::{ClientConfig, EVENT_QUEUE_DEPTH, MAILBOX_DEPTH};
use crate::error::{ClientError, Result};
use crate::wire::{FrameReadError, read_frame};

const PLAIN_MECHANISM: &str = "PLAIN";

/// User calls crossing into the actor. Every variant carries the caller's
/// one-shot reply channel.
pub(crate) enum Op {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        code: u16,
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateStream {
        stream: String,
        arguments: HashMap<String, String>,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteStream {
        stream: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DeclarePublisher {
        stream: String,
        reference: Option<String>,
        reply: oneshot::Sender<Result<u8>>,
    },
    DeletePublisher {
        publisher_id: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    Publish {
        publisher_id: u8,
        messages: Vec<PublishedMessage>,
        reply: oneshot::Sender<Result<()>>,
    },
    QueryPublisherSequence {
        reference: String,
        stream: String,
        reply: oneshot::Sender<Result<u64>>,
    },
    StoreOffset {
        reference: String,
        stream: String,
        offset: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    QueryOffset {
        reference: String,
        stream: String,
        reply: oneshot::Sender<Result<u64>>,
    },
    Subscribe {
        stream: String,
        offset: OffsetSpecification,
        credit: u16,
        properties: HashMap<String, String>,
        sink: DeliverySink,
        reply: oneshot::Sender<Result<u8>>,
    },
    Unsubscribe {
        subscription_id: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    Credit {
        subscription_id: u8,
        credit: u16,
        reply: oneshot::Sender<Result<()>>,
    },
    QueryMetadata {
        streams: Vec<String>,
        reply: oneshot::Sender<Result<MetadataSnapshot>>,
    },
}

impl Op {
    fn reject(self, err: ClientError) {
        match self {
            Self::Connect { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::Close { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::CreateStream { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::DeleteStream { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::DeclarePublisher { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::DeletePublisher { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Publish { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::QueryPublisherSequence { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::StoreOffset { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::QueryOffset { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Subscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Unsubscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Credit { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::QueryMetadata { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Transport events from the reader task.
enum Event {
    Frame(ServerFrame),
    TcpClosed,
    TcpError(String),
    Malformed(warren_wire::CodecError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Connecting,
    Authenticating,
    Tuning,
    Opening,
    Open,
    Closing,
}

pub(crate) fn spawn(config: ClientConfig) -> mpsc::Sender<Op> {
    let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
    tokio::spawn(run(config, rx));
    tx
}

async fn run(config: ClientConfig, mut ops: mpsc::Receiver<Op>) {
    let (events_tx, mut events) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let mut conn = Connection::new(config, events_tx);
    let mut heartbeat_timer: Option<Interval> = None;
    loop {
        if conn.timer_dirty {
            heartbeat_timer = conn.heartbeat_period.map(|period| {
                let mut interval = time::interval_at(time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            conn.timer_dirty = false;
        }
        tokio::select! {
            op = ops.recv() => match op {
                Some(op) => conn.handle_op(op).await,
                // Every client handle is gone; release the socket and
                // answer anything still parked.
                None => break,
            },
            Some(event) = events.recv() => conn.handle_event(event).await,
            _ = heartbeat_tick(&mut heartbeat_timer) => conn.send_heartbeat().await,
        }
    }
    conn.teardown(ClientError::Closed);
}

async fn heartbeat_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Reads whole frames and forwards them in receive order. Any exit
/// condition is reported as a single terminal event.
async fn run_reader(mut read: OwnedReadHalf, events: mpsc::Sender<Event>, frame_max: u32) {
    let mut scratch = BytesMut::with_capacity(64 * 1024);
    loop {
        match read_frame(&mut read, &mut scratch, frame_max as usize).await {
            Ok(Some(payload)) => match ServerFrame::decode(payload) {
                Ok(frame) => {
                    if events.send(Event::Frame(frame)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = events.send(Event::Malformed(err)).await;
                    break;
                }
            },
            Ok(None) => {
                let _ = events.send(Event::TcpClosed).await;
                break;
            }
            Err(FrameReadError::Io(err)) => {
                let _ = events.send(Event::TcpError(err.to_string())).await;
                break;
            }
            Err(FrameReadError::Codec(err)) => {
                let _ = events.send(Event::Malformed(err)).await;
                break;
            }
        }
    }
}

struct Connection {
    config: ClientConfig,
    state: State,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<Event>,
    tracker: RequestTracker,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    subscriptions: HashMap<u8, DeliverySink>,
    publisher_sequence: u8,
    subscription_sequence: u8,
    peer_properties: HashMap<String, String>,
    mechanisms: Vec<String>,
    connection_properties: HashMap<String, String>,
    brokers: HashMap<u16, Broker>,
    streams: HashMap<String, StreamMetadata>,
    frame_max: u32,
    heartbeat: u32,
    heartbeat_period: Option<Duration>,
    timer_dirty: bool,
}

impl Connection {
    fn new(config: ClientConfig, events_tx: mpsc::Sender<Event>) -> Self {
        let frame_max = config.frame_max;
        let heartbeat = config.heartbeat;
        Self {
            config,
            state: State::Closed,
            writer: None,
            reader: None,
            events_tx,
            tracker: RequestTracker::new(),
            connect_waiters: Vec::new(),
            subscriptions: HashMap::new(),
            publisher_sequence: 1,
            subscription_sequence: 1,
            peer_properties: HashMap::new(),
            mechanisms: Vec::new(),
            connection_properties: HashMap::new(),
            brokers: HashMap::new(),
            streams: HashMap::new(),
            frame_max,
            heartbeat,
            heartbeat_period: None,
            timer_dirty: false,
        }
    }

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::Connect { reply } => self.handle_connect(reply).await,
            // Fail fast instead of queueing: callers see the connection
            // as closed until open completes.
            op if self.state != State::Open => op.reject(ClientError::Closed),
            Op::Close {
                code,
                reason,
                reply,
            } => {
                let correlation_id = self
                    .tracker
                    .push(CommandKind::Close, Pending::Close { reply });
                self.state = State::Closing;
                // No heartbeats once the close is in flight.
                self.heartbeat_period = None;
                self.timer_dirty = true;
                let _ = self
                    .send(&Command::Close {
                        correlation_id,
                        code,
                        reason,
                    })
                    .await;
            }
            Op::CreateStream {
                stream,
                arguments,
                reply,
            } => {
                let correlation_id = self
                    .tracker
                    .push(CommandKind::CreateStream, Pending::CreateStream { reply });
                let _ = self
                    .send(&Command::CreateStream {
                        correlation_id,
                        stream,
                        arguments,
                    })
                    .await;
            }
            Op::DeleteStream { stream, reply } => {
                let correlation_id = self
                    .tracker
                    .push(CommandKind::DeleteStream, Pending::DeleteStream { reply });
                let _ = self
                    .send(&Command::DeleteStream {
                        correlation_id,
                        stream,
                    })
                    .await;
            }
            Op::DeclarePublisher {
                stream,
                reference,
                reply,
            } => {
                // The id is allocated before the send and stashed as the
                // tracker payload; the reply carries only a code.
                let publisher_id = self.publisher_sequence;
                self.publisher_sequence = self.publisher_sequence.wrapping_add(1);
                let correlation_id = self.tracker.push(
                    CommandKind::DeclarePublisher,
                    Pending::DeclarePublisher {
                        publisher_id,
                        reply,
                    },
                );
                let _ = self
                    .send(&Command::DeclarePublisher {
                        correlation_id,
                        publisher_id,
                        publisher_reference: reference,
                        stream,
                    })
                    .await;
            }
            Op::DeletePublisher {
                publisher_id,
                reply,
            } => {
                let correlation_id = self.tracker.push(
                    CommandKind::DeletePublisher,
                    Pending::DeletePublisher { reply },
                );
                let _ = self
                    .send(&Command::DeletePublisher {
                        correlation_id,
                        publisher_id,
                    })
                    .await;
            }
            Op::Publish {
                publisher_id,
                messages,
                reply,
            } => {
                // Fire and forget; confirmations arrive asynchronously.
                let result = self
                    .send(&Command::Publish {
                        publisher_id,
                        messages,
                    })
                    .await;
                let _ = reply.send(result);
            }
            Op::QueryPublisherSequence {
                reference,
                stream,
                reply,
            } => {
                let correlation_id = self.tracker.push(
                    CommandKind::QueryPublisherSequence,
                    Pending::QueryPublisherSequence { reply },
                );
                let _ = self
                    .send(&Command::QueryPublisherSequence {
                        correlation_id,
                        reference,
                        stream,
                    })
                    .await;
            }
            Op::StoreOffset {
                reference,
                stream,
                offset,
                reply,
            } => {
                let result = self
                    .send(&Command::StoreOffset {
                        reference,
                        stream,
                        offset,
                    })
                    .await;
                let _ = reply.send(result);
            }
            Op::QueryOffset {
                reference,
                stream,
                reply,
            } => {
                let correlation_id = self
                    .tracker
                    .push(CommandKind::QueryOffset, Pending::QueryOffset { reply });
                let _ = self
                    .send(&Command::QueryOffset {
                        correlation_id,
                        reference,
                        stream,
                    })
                    .await;
            }
            Op::Subscribe {
                stream,
                offset,
                credit,
                properties,
                sink,
                reply,
            } => {
                let subscription_id = self.subscription_sequence;
                self.subscription_sequence = self.subscription_sequence.wrapping_add(1);
                let correlation_id = self.tracker.push(
                    CommandKind::Subscribe,
                    Pending::Subscribe {
                        subscription_id,
                        sink,
                        reply,
                    },
                );
                let _ = self
                    .send(&Command::Subscribe {
                        correlation_id,
                        subscription_id,
                        stream,
                        offset,
                        credit,
                        properties,
                    })
                    .await;
            }
            Op::Unsubscribe {
                subscription_id,
                reply,
            } => {
                let correlation_id = self.tracker.push(
                    CommandKind::Unsubscribe,
                    Pending::Unsubscribe {
                        subscription_id,
                        reply,
                    },
                );
                let _ = self
                    .send(&Command::Unsubscribe {
                        correlation_id,
                        subscription_id,
                    })
                    .await;
            }
            Op::Credit {
                subscription_id,
                credit,
                reply,
            } => {
                let result = self
                    .send(&Command::Credit {
                        subscription_id,
                        credit,
                    })
                    .await;
                let _ = reply.send(result);
            }
            Op::QueryMetadata { streams, reply } => {
                let correlation_id = self.tracker.push(
                    CommandKind::QueryMetadata,
                    Pending::QueryMetadata { reply: Some(reply) },
                );
                let _ = self
                    .send(&Command::QueryMetadata {
                        correlation_id,
                        streams,
                    })
                    .await;
            }
        }
    }

    async fn handle_connect(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.state {
            State::Open => {
                let _ = reply.send(Ok(()));
            }
            State::Closed => {
                self.connect_waiters.push(reply);
                self.state = State::Connecting;
                debug!(host = %self.config.host, port = self.config.port, "connecting");
                match TcpStream::connect((self.config.host.as_str(), self.config.port)).await {
                    Ok(socket) => {
                        let _ = socket.set_nodelay(true);
                        let (read, write) = socket.into_split();
                        self.writer = Some(write);
                        self.reader = Some(tokio::spawn(run_reader(
                            read,
                            self.events_tx.clone(),
                            self.config.frame_max,
                        )));
                        self.state = State::Authenticating;
                        let correlation_id = self
                            .tracker
                            .push(CommandKind::PeerProperties, Pending::PeerProperties);
                        let _ = self
                            .send(&Command::PeerProperties {
                                correlation_id,
                                properties: client_properties(),
                            })
                            .await;
                    }
                    Err(err) => {
                        warn!(error = %err, "tcp connect failed");
                        self.teardown(ClientError::Tcp(err.to_string()));
                    }
                }
            }
            // One in-flight connect sequence; later callers wait for its
            // outcome.
            _ => self.connect_waiters.push(reply),
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Frame(frame) => {
                metrics::counter!("warren_client_frames_in_total").increment(1);
                self.handle_frame(frame).await;
            }
            Event::TcpClosed => {
                if matches!(self.state, State::Connecting | State::Authenticating) {
                    warn!(
                        "peer closed the socket during the handshake; \
                         is the stream plugin enabled on the broker?"
                    );
                }
                self.teardown(ClientError::TcpClosed);
            }
            Event::TcpError(reason) => {
                warn!(%reason, "tcp error");
                self.teardown(ClientError::Tcp(reason));
            }
            Event::Malformed(err) => {
                warn!(error = %err, "malformed inbound frame");
                self.teardown(ClientError::Frame(err));
            }
        }
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::PeerPropertiesResponse {
                correlation_id,
                code,
                properties,
            } => {
                if self
                    .tracker
                    .pop(CommandKind::PeerProperties, correlation_id)
                    .is_none()
                {
                    self.unexpected_response(CommandKind::PeerProperties, correlation_id);
                    return;
                }
                if !code.is_ok() {
                    self.fail_handshake(code);
                    return;
                }
                self.peer_properties = properties;
                debug!(
                    product = self.peer_properties.get("product").map(String::as_str),
                    version = self.peer_properties.get("version").map(String::as_str),
                    "peer properties exchanged"
                );
                let correlation_id = self
                    .tracker
                    .push(CommandKind::SaslHandshake, Pending::SaslHandshake);
                let _ = self.send(&Command::SaslHandshake { correlation_id }).await;
            }
            ServerFrame::SaslHandshakeResponse {
                correlation_id,
                code,
                mechanisms,
            } => {
                if self
                    .tracker
                    .pop(CommandKind::SaslHandshake, correlation_id)
                    .is_none()
                {
                    self.unexpected_response(CommandKind::SaslHandshake, correlation_id);
                    return;
                }
                if !code.is_ok() {
                    self.fail_handshake(code);
                    return;
                }
                self.mechanisms = mechanisms;
                if !self.mechanisms.iter().any(|m| m == PLAIN_MECHANISM) {
                    self.fail_handshake(ResponseCode::SaslMechanismNotSupported);
                    return;
                }
                let sasl_data =
                    plain_sasl_payload(&self.config.username, &self.config.password);
                let correlation_id = self
                    .tracker
                    .push(CommandKind::SaslAuthenticate, Pending::SaslAuthenticate);
                let _ = self
                    .send(&Command::SaslAuthenticate {
                        correlation_id,
                        mechanism: PLAIN_MECHANISM.to_string(),
                        sasl_data,
                    })
                    .await;
            }
            ServerFrame::SaslAuthenticateResponse {
                correlation_id,
                code,
                sasl_data,
            } => {
                if self
                    .tracker
                    .pop(CommandKind::SaslAuthenticate, correlation_id)
                    .is_none()
                {
                    self.unexpected_response(CommandKind::SaslAuthenticate, correlation_id);
                    return;
                }
                if !code.is_ok() {
                    self.fail_handshake(code);
                    return;
                }
                if sasl_data.is_empty() {
                    debug!("authenticated; awaiting server tune");
                } else {
                    debug!("authenticated with opaque data; opening");
                    self.send_open().await;
                }
            }
            ServerFrame::Tune {
                frame_max,
                heartbeat,
            } => self.handle_tune(frame_max, heartbeat).await,
            ServerFrame::OpenResponse {
                correlation_id,
                code,
                connection_properties,
            } => {
                if self.tracker.pop(CommandKind::Open, correlation_id).is_none() {
                    self.unexpected_response(CommandKind::Open, correlation_id);
                    return;
                }
                if !code.is_ok() {
                    self.fail_handshake(code);
                    return;
                }
                self.connection_properties = connection_properties;
                self.state = State::Open;
                debug!(
                    vhost = %self.config.vhost,
                    properties = self.connection_properties.len(),
                    "connection open"
                );
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            ServerFrame::CloseResponse {
                correlation_id,
                code,
            } => {
                match self.tracker.pop(CommandKind::Close, correlation_id) {
                    Some(Pending::Close { reply }) => {
                        let _ = reply.send(code_result(code));
                    }
                    _ => self.unexpected_response(CommandKind::Close, correlation_id),
                }
                self.teardown(ClientError::Closed);
            }
            ServerFrame::Close {
                correlation_id,
                code,
                reason,
            } => {
                debug!(code, %reason, "server requested close");
                let _ = self
                    .send(&Command::CloseResponse {
                        correlation_id,
                        code: ResponseCode::Ok,
                    })
                    .await;
                self.teardown(ClientError::Closed);
            }
            ServerFrame::CreateStreamResponse {
                correlation_id,
                code,
            } => match self.tracker.pop(CommandKind::CreateStream, correlation_id) {
                Some(Pending::CreateStream { reply }) => {
                    let _ = reply.send(code_result(code));
                }
                _ => self.unexpected_response(CommandKind::CreateStream, correlation_id),
            },
            ServerFrame::DeleteStreamResponse {
                correlation_id,
                code,
            } => match self.tracker.pop(CommandKind::DeleteStream, correlation_id) {
                Some(Pending::DeleteStream { reply }) => {
                    let _ = reply.send(code_result(code));
                }
                _ => self.unexpected_response(CommandKind::DeleteStream, correlation_id),
            },
            ServerFrame::DeclarePublisherResponse {
                correlation_id,
                code,
            } => match self
                .tracker
                .pop(CommandKind::DeclarePublisher, correlation_id)
            {
                Some(Pending::DeclarePublisher {
                    publisher_id,
                    reply,
                }) => {
                    let _ = reply.send(code_result(code).map(|()| publisher_id));
                }
                _ => self.unexpected_response(CommandKind::DeclarePublisher, correlation_id),
            },
            ServerFrame::DeletePublisherResponse {
                correlation_id,
                code,
            } => match self
                .tracker
                .pop(CommandKind::DeletePublisher, correlation_id)
            {
                Some(Pending::DeletePublisher { reply }) => {
                    let _ = reply.send(code_result(code));
                }
                _ => self.unexpected_response(CommandKind::DeletePublisher, correlation_id),
            },
            ServerFrame::QueryPublisherSequenceResponse {
                correlation_id,
                code,
                sequence,
            } => match self
                .tracker
                .pop(CommandKind::QueryPublisherSequence, correlation_id)
            {
                Some(Pending::QueryPublisherSequence { reply }) => {
                    let _ = reply.send(code_result(code).map(|()| sequence));
                }
                _ => {
                    self.unexpected_response(CommandKind::QueryPublisherSequence, correlation_id)
                }
            },
            ServerFrame::QueryOffsetResponse {
                correlation_id,
                code,
                offset,
            } => match self.tracker.pop(CommandKind::QueryOffset, correlation_id) {
                Some(Pending::QueryOffset { reply }) => {
                    let _ = reply.send(code_result(code).map(|()| offset));
                }
                _ => self.unexpected_response(CommandKind::QueryOffset, correlation_id),
            },
            ServerFrame::SubscribeResponse {
                correlation_id,
                code,
            } => match self.tracker.pop(CommandKind::Subscribe, correlation_id) {
                Some(Pending::Subscribe {
                    subscription_id,
                    sink,
                    reply,
                }) => {
                    if code.is_ok() {
                        self.subscriptions.insert(subscription_id, sink);
                        let _ = reply.send(Ok(subscription_id));
                    } else {
                        let _ = reply.send(Err(ClientError::Response(code)));
                    }
                }
                _ => self.unexpected_response(CommandKind::Subscribe, correlation_id),
            },
            ServerFrame::UnsubscribeResponse {
                correlation_id,
                code,
            } => match self.tracker.pop(CommandKind::Unsubscribe, correlation_id) {
                Some(Pending::Unsubscribe {
                    subscription_id,
                    reply,
                }) => {
                    if code.is_ok() {
                        self.subscriptions.remove(&subscription_id);
                    }
                    let _ = reply.send(code_result(code));
                }
                _ => self.unexpected_response(CommandKind::Unsubscribe, correlation_id),
            },
            ServerFrame::CreditResponse {
                code,
                subscription_id,
            } => {
                warn!(subscription_id, code = ?code, "credit rejected by server");
            }
            ServerFrame::MetadataResponse {
                correlation_id,
                brokers,
                streams,
            } => {
                // Merge first, so even internally triggered queries
                // refresh the cache.
                for broker in brokers {
                    self.brokers.insert(broker.reference, broker);
                }
                for (name, metadata) in streams {
                    self.streams.insert(name, metadata);
                }
                match self.tracker.pop(CommandKind::QueryMetadata, correlation_id) {
                    Some(Pending::QueryMetadata { reply: Some(reply) }) => {
                        let _ = reply.send(Ok(self.metadata_snapshot()));
                    }
                    Some(Pending::QueryMetadata { reply: None }) => {}
                    _ => self.unexpected_response(CommandKind::QueryMetadata, correlation_id),
                }
            }
            ServerFrame::MetadataUpdate { code, stream } => {
                debug!(code, %stream, "metadata update; refreshing");
                let correlation_id = self.tracker.push(
                    CommandKind::QueryMetadata,
                    Pending::QueryMetadata { reply: None },
                );
                let _ = self
                    .send(&Command::QueryMetadata {
                        correlation_id,
                        streams: vec![stream],
                    })
                    .await;
            }
            ServerFrame::Deliver {
                subscription_id,
                chunk,
            } => self.dispatch_delivery(subscription_id, chunk),
            ServerFrame::PublishConfirm {
                publisher_id,
                publishing_ids,
            } => {
                debug!(
                    publisher_id,
                    count = publishing_ids.len(),
                    "publish confirm"
                );
                metrics::counter!("warren_client_publish_confirms_total")
                    .increment(publishing_ids.len() as u64);
            }
            ServerFrame::PublishError {
                publisher_id,
                errors,
            } => {
                warn!(publisher_id, count = errors.len(), "publish error");
                metrics::counter!("warren_client_publish_errors_total")
                    .increment(errors.len() as u64);
            }
            ServerFrame::Heartbeat => {
                debug!("heartbeat from server");
            }
        }
    }

    async fn handle_tune(&mut self, server_frame_max: u32, server_heartbeat: u32) {
        let from_authenticating = self.state == State::Authenticating;
        if from_authenticating {
            self.state = State::Tuning;
        }
        self.frame_max = negotiate(self.config.frame_max, server_frame_max);
        self.heartbeat = negotiate(self.config.heartbeat, server_heartbeat);
        debug!(
            frame_max = self.frame_max,
            heartbeat = self.heartbeat,
            "tuned"
        );
        let _ = self
            .send(&Command::Tune {
                frame_max: self.frame_max,
                heartbeat: self.heartbeat,
            })
            .await;
        self.heartbeat_period =
            (self.heartbeat > 0).then(|| Duration::from_secs(self.heartbeat as u64));
        self.timer_dirty = true;
        if from_authenticating {
            self.send_open().await;
        }
    }

    async fn send_open(&mut self) {
        let correlation_id = self.tracker.push(CommandKind::Open, Pending::Open);
        self.state = State::Opening;
        let vhost = self.config.vhost.clone();
        let _ = self
            .send(&Command::Open {
                correlation_id,
                vhost,
            })
            .await;
    }

    fn dispatch_delivery(&mut self, subscription_id: u8, chunk: Chunk) {
        match self.subscriptions.get(&subscription_id) {
            Some(sink) => {
                let delivery = Delivery {
                    subscription_id,
                    epoch: chunk.epoch,
                    chunk_first_offset: chunk.chunk_first_offset,
                    num_records: chunk.num_records,
                    timestamp: chunk.timestamp,
                    records: chunk.records,
                };
                if sink.send(delivery).is_err() {
                    debug!(subscription_id, "delivery sink dropped");
                }
            }
            // Late arrival after unsubscribe.
            None => {
                debug!(subscription_id, "deliver for unknown subscription dropped");
                metrics::counter!("warren_client_deliveries_dropped_total").increment(1);
            }
        }
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ClientError::Closed);
        };
        let frame = command.encode();
        match writer.write_all(&frame).await {
            Ok(()) => {
                metrics::counter!("warren_client_frames_out_total").increment(1);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "write failed");
                let err = ClientError::Tcp(err.to_string());
                self.teardown(err.clone());
                Err(err)
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        debug!("heartbeat");
        let _ = self.send(&Command::Heartbeat).await;
    }

    fn fail_handshake(&mut self, code: ResponseCode) {
        warn!(code = ?code, "handshake rejected");
        self.teardown(ClientError::Response(code));
    }

    fn unexpected_response(&self, kind: CommandKind, correlation_id: u32) {
        warn!(kind = ?kind, correlation_id, "response with no pending request");
    }

    /// Release the socket and answer everything still parked. Safe on
    /// every exit path; the state/socket invariant holds afterwards.
    fn teardown(&mut self, err: ClientError) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        self.heartbeat_period = None;
        self.timer_dirty = true;
        self.state = State::Closed;
        for pending in self.tracker.drain() {
            pending.reject(err.clone());
        }
        debug_assert!(self.tracker.is_empty());
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        self.subscriptions.clear();
    }

    fn metadata_snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            brokers: self.brokers.clone(),
            streams: self.streams.clone(),
        }
    }
}

fn code_result(code: ResponseCode) -> Result<()> {
    if code.is_ok() {
        Ok(())
    } else {
        Err(ClientError::Response(code))
    }
}

/// Effective tune value: the minimum of both proposals, where 0 means
/// unconstrained.
fn negotiate(ours: u32, theirs: u32) -> u32 {
    match (ours, theirs) {
        (0, other) | (other, 0) => other,
        (a, b) => a.min(b),
    }
}

fn client_properties() -> HashMap<String, String> {
    let mut properties = HashMap::new();
    properties.insert("product".to_string(), "warren".to_string());
    properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    properties.insert("platform".to_string(), "rust".to_string());
    properties
}

fn plain_sasl_payload(username: &str, password: &str) -> bytes::Bytes {
    let mut payload = Vec::with_capacity(username.len() + password.len() + 2);
    payload.push(0);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(password.as_bytes());
    payload.into()
}
