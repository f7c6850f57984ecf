//! Relay wire format.
//!
//! Every relay frame is one JSON object. Descriptions travel as
//! `{"sdp":{"type":"offer","sdp":"..."}}`, candidates as `{"ice":{...}}`,
//! and the relay's own hints carry a `type` tag (`roomSize`, `timeout`).

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Rollback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Discards a pending local offer when applied as the local description.
    pub fn rollback() -> Self {
        Self {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// One decoded relay frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
    RoomSize(u32),
    Timeout(Option<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Wire {
    Sdp { sdp: SessionDescription },
    Ice { ice: IceCandidate },
    Hint(Hint),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Hint {
    RoomSize {
        count: u32,
    },
    Timeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let wire: Wire =
            serde_json::from_str(text).map_err(|err| SessionError::Signaling(err.to_string()))?;
        Ok(match wire {
            Wire::Sdp { sdp } => Self::Description(sdp),
            Wire::Ice { ice } => Self::Candidate(ice),
            Wire::Hint(Hint::RoomSize { count }) => Self::RoomSize(count),
            Wire::Hint(Hint::Timeout { message }) => Self::Timeout(message),
        })
    }

    pub fn encode(&self) -> String {
        let wire = match self.clone() {
            Self::Description(sdp) => Wire::Sdp { sdp },
            Self::Candidate(ice) => Wire::Ice { ice },
            Self::RoomSize(count) => Wire::Hint(Hint::RoomSize { count }),
            Self::Timeout(message) => Wire::Hint(Hint::Timeout { message }),
        };
        // The wire types hold only strings and integers.
        serde_json::to_string(&wire).unwrap_or_default()
    }
}
