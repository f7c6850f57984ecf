use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::SessionError;
use crate::file::FileSource;
use crate::host::{DataChannel, MediaKind};
use crate::negotiation::NegotiationState;
use crate::signal::IceCandidate;

/// Incremented on every start and stop; inputs tagged with an older epoch are dropped.
pub type Epoch = u64;
pub type ChannelId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    AwaitingPeer,
    Negotiating,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub room: String,
    pub status: SessionStatus,
    pub started_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatSender {
    Local,
    Remote,
}

/// A file that appeared in the conversation. `blob` holds the reassembled
/// bytes for received files and is `None` for files this side sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
    pub blob: Option<Bytes>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatPayload {
    Text(String),
    File(FileRef),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ChatSender,
    pub payload: ChatPayload,
}

impl ChatMessage {
    pub fn text(sender: ChatSender, text: impl Into<String>) -> Self {
        Self {
            sender,
            payload: ChatPayload::Text(text.into()),
        }
    }
}

/// Notifications delivered to the embedding UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Status(SessionStatus),
    /// Seconds left before the session gives up on the peer; `None` once cleared.
    Countdown(Option<u32>),
    Chat(ChatMessage),
    IncomingFile { name: String, size: u64 },
    RoomSize(u32),
    Notice(SessionError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub status: SessionStatus,
    pub remaining: Option<u32>,
    pub negotiation: Option<NegotiationState>,
    pub buffered_candidates: usize,
    pub pending_messages: usize,
    pub history: Vec<ChatMessage>,
}

#[derive(Clone, Debug)]
pub enum RelayEvent {
    Open,
    Message(String),
    Closed,
    Error(String),
}

pub enum PeerEvent {
    Track { id: String, kind: Option<MediaKind> },
    IceCandidate(IceCandidate),
    DataChannel(Arc<dyn DataChannel>),
    ConnectionState(String),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::Track { id, kind } => f
                .debug_struct("Track")
                .field("id", id)
                .field("kind", kind)
                .finish(),
            PeerEvent::IceCandidate(candidate) => {
                f.debug_tuple("IceCandidate").field(candidate).finish()
            }
            PeerEvent::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            PeerEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum ChannelPayload {
    Text(String),
    Binary(Bytes),
}

#[derive(Clone, Debug)]
pub enum ChannelEvent {
    Open,
    Message(ChannelPayload),
    Closed,
    Error(String),
}

pub(crate) enum Command {
    Start {
        room: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendFile {
        file: Arc<dyn FileSource>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug)]
pub(crate) enum Input {
    Relay(Epoch, RelayEvent),
    Peer(Epoch, PeerEvent),
    Channel(Epoch, ChannelId, ChannelEvent),
    Tick(Epoch, u64),
    PumpTransfer(Epoch),
}

impl Input {
    pub(crate) fn epoch(&self) -> Epoch {
        match self {
            Input::Relay(epoch, _)
            | Input::Peer(epoch, _)
            | Input::Channel(epoch, _, _)
            | Input::Tick(epoch, _)
            | Input::PumpTransfer(epoch) => *epoch,
        }
    }
}

/// Handed to a [`RelayConnector`](crate::host::RelayConnector); every call
/// lands on the owning controller's queue.
#[derive(Clone)]
pub struct RelaySink {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<Input>,
}

impl RelaySink {
    pub(crate) fn new(epoch: Epoch, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { epoch, tx }
    }

    pub fn opened(&self) {
        self.post(RelayEvent::Open);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.post(RelayEvent::Message(text.into()));
    }

    pub fn closed(&self) {
        self.post(RelayEvent::Closed);
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.post(RelayEvent::Error(reason.into()));
    }

    /// True once the controller that owns this sink has gone away.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, event: RelayEvent) {
        let _ = self.tx.send(Input::Relay(self.epoch, event));
    }
}

impl RelaySink {
    /// A sink owned by no controller. Whatever a relay reports on it can be
    /// read back from the returned [`RelayProbe`].
    pub fn probe() -> (Self, RelayProbe) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(0, tx), RelayProbe { rx })
    }
}

pub struct RelayProbe {
    rx: mpsc::UnboundedReceiver<Input>,
}

impl RelayProbe {
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        while let Some(input) = self.rx.recv().await {
            if let Input::Relay(_, event) = input {
                return Some(event);
            }
        }
        None
    }
}

impl fmt::Debug for RelaySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySink").field("epoch", &self.epoch).finish()
    }
}

#[derive(Clone)]
pub struct PeerSink {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<Input>,
}

impl PeerSink {
    pub(crate) fn new(epoch: Epoch, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { epoch, tx }
    }

    pub fn track(&self, id: impl Into<String>, kind: Option<MediaKind>) {
        self.post(PeerEvent::Track {
            id: id.into(),
            kind,
        });
    }

    pub fn ice_candidate(&self, candidate: IceCandidate) {
        self.post(PeerEvent::IceCandidate(candidate));
    }

    pub fn data_channel(&self, channel: Arc<dyn DataChannel>) {
        self.post(PeerEvent::DataChannel(channel));
    }

    pub fn connection_state(&self, state: impl Into<String>) {
        self.post(PeerEvent::ConnectionState(state.into()));
    }

    fn post(&self, event: PeerEvent) {
        let _ = self.tx.send(Input::Peer(self.epoch, event));
    }
}

impl fmt::Debug for PeerSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSink").field("epoch", &self.epoch).finish()
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    epoch: Epoch,
    channel: ChannelId,
    tx: mpsc::UnboundedSender<Input>,
}

impl ChannelSink {
    pub(crate) fn new(epoch: Epoch, channel: ChannelId, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { epoch, channel, tx }
    }

    pub fn opened(&self) {
        self.post(ChannelEvent::Open);
    }

    pub fn text(&self, text: impl Into<String>) {
        self.post(ChannelEvent::Message(ChannelPayload::Text(text.into())));
    }

    pub fn binary(&self, data: Bytes) {
        self.post(ChannelEvent::Message(ChannelPayload::Binary(data)));
    }

    pub fn closed(&self) {
        self.post(ChannelEvent::Closed);
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.post(ChannelEvent::Error(reason.into()));
    }

    fn post(&self, event: ChannelEvent) {
        let _ = self.tx.send(Input::Channel(self.epoch, self.channel, event));
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("epoch", &self.epoch)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Fan-out of [`SessionEvent`]s to the host; a dropped receiver is not an error.
#[derive(Clone, Debug)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Notifier {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}
