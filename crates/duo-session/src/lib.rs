//! Session engine for two-party calls: relay signaling, offer/answer with
//! glare handling, ICE candidate buffering, a peer-arrival countdown, and
//! chat plus chunked file transfer over data channels.
//!
//! The engine is platform-neutral. Peers, channels, media and the relay are
//! reached through the traits in [`host`].

pub mod candidates;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod file;
pub mod host;
pub mod negotiation;
pub mod relay;
pub mod signal;
pub mod timeout;

pub use candidates::{CandidateBuffer, FlushReport};
pub use channel::{ChannelManager, ControlFrame, PumpState};
pub use config::SessionConfig;
pub use controller::{SessionController, SessionHandle};
pub use error::{ChannelError, MediaError, PeerError, RelayError, SessionError};
pub use event::{
    ChannelEvent, ChannelId, ChannelPayload, ChannelSink, ChatMessage, ChatPayload, ChatSender,
    FileRef, PeerEvent, PeerSink, RelayEvent, RelayProbe, RelaySink, Session, SessionEvent,
    SessionSnapshot, SessionStatus,
};
pub use file::{DiskFile, FileSource, MemoryFile};
pub use host::{
    Collaborators, DataChannel, LocalTrack, MediaKind, MediaSource, NoMedia, PeerConnection,
    PeerFactory, RelayConnector, RelayTransport,
};
pub use negotiation::{NegotiationEngine, NegotiationState, RemoteApplied, SignalingPhase};
pub use relay::LocalRelay;
pub use signal::{IceCandidate, RelayMessage, SdpKind, SessionDescription};
pub use timeout::{TickOutcome, TimeoutSupervisor};
