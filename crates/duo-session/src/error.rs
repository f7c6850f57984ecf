use thiserror::Error;

/// Failures surfaced by a [`PeerConnection`](crate::host::PeerConnection) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer connection closed")]
    Closed,
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("ice candidate rejected: {0}")]
    Candidate(String),
    #[error("track rejected: {0}")]
    Track(String),
    #[error("data channel could not be created: {0}")]
    Channel(String),
    #[error("peer backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("data channel is not open")]
    NotOpen,
    #[error("data channel send failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("relay connect failed: {0}")]
    Connect(String),
    #[error("room {0} already has two participants")]
    RoomFull(String),
    #[error("relay connection closed")]
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("media access denied: {0}")]
    Denied(String),
    #[error("media device unavailable: {0}")]
    Unavailable(String),
}

/// Everything a session reports to its host, either as a returned error or
/// as a [`SessionEvent::Notice`](crate::event::SessionEvent::Notice).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("a session for room {0} is already active")]
    AlreadyActive(String),
    #[error("no active session")]
    Inactive,
    #[error(transparent)]
    MediaAccess(#[from] MediaError),
    #[error("malformed signaling message: {0}")]
    Signaling(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("ice candidate failed: {0}")]
    Ice(String),
    #[error("no peer connected within {0} seconds")]
    Timeout(u32),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("file {name} is {size} bytes, limit is {limit}")]
    FileTooLarge { name: String, size: u64, limit: u64 },
    #[error("failed to read file {name}: {reason}")]
    FileRead { name: String, reason: String },
    #[error("relay ended the call: {0}")]
    RelayTimeout(String),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("session controller has shut down")]
    Closed,
}
