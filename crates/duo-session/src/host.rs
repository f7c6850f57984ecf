//! Seams between the session engine and the platform it runs on.
//!
//! The controller only talks to these traits. `duo-rtc` backs them with the
//! `webrtc` and `tokio-tungstenite` crates; tests back them with in-memory fakes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ChannelError, MediaError, PeerError, RelayError};
use crate::event::{ChannelSink, PeerSink, RelaySink};
use crate::signal::{IceCandidate, SessionDescription};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A captured local track. The `handle` is opaque to the engine and is handed
/// back to the [`PeerConnection`] that knows its concrete type.
#[derive(Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    handle: Option<Arc<dyn Any + Send + Sync>>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            handle: None,
        }
    }

    pub fn with_handle<T>(mut self, handle: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        self.handle = Some(handle);
        self
    }

    pub fn handle<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.handle.clone()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError>;

    async fn release(&self, _tracks: &[LocalTrack]) {}
}

/// Data-only sessions: no capture devices, no tracks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMedia;

#[async_trait]
impl MediaSource for NoMedia {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, sink: PeerSink) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;
    async fn add_track(&self, track: &LocalTrack) -> Result<(), PeerError>;
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, PeerError>;
    async fn close(&self);
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    /// Routes open, message, close and error callbacks into `sink`.
    fn attach(&self, sink: ChannelSink);

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError>;

    async fn close(&self);
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Joins `room`. Implementations report `opened` on the sink once the
    /// relay is usable and then forward every inbound frame.
    async fn connect(&self, room: &str, sink: RelaySink)
    -> Result<Arc<dyn RelayTransport>, RelayError>;
}

pub trait RelayTransport: Send + Sync {
    fn send(&self, text: String) -> Result<(), RelayError>;
    fn close(&self);
}

/// The platform pieces a controller is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub relay: Arc<dyn RelayConnector>,
    pub peers: Arc<dyn PeerFactory>,
    pub media: Arc<dyn MediaSource>,
}

impl Collaborators {
    pub fn new(
        relay: Arc<dyn RelayConnector>,
        peers: Arc<dyn PeerFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            relay,
            peers,
            media,
        }
    }
}
