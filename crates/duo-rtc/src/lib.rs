//! `webrtc` and WebSocket backends for the `duo-session` engine.

pub mod channel;
pub mod config;
pub mod media;
pub mod peer;
pub mod relay;

use thiserror::Error;

pub use channel::RtcDataChannel;
pub use config::{RtcConfig, build_room_url};
pub use media::SampleMedia;
pub use peer::{RtcPeer, RtcPeerFactory};
pub use relay::WsRelayConnector;

#[derive(Debug, Error)]
pub enum RtcError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error(transparent)]
    Webrtc(#[from] webrtc::Error),
}
