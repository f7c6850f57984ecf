use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::RtcError;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Where to find the relay and which ICE servers to hand the peer connection.
#[derive(Clone, Debug)]
pub struct RtcConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<RTCIceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: vec![RTCIceServer {
                urls: vec![DEFAULT_STUN_SERVER.to_string()],
                ..Default::default()
            }],
        }
    }
}

impl RtcConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// `DUO_ICE_SERVERS` is a comma separated list of STUN urls; when unset the
    /// public Google STUN server is used, when set but empty no STUN is used.
    /// `DUO_TURN_SERVER` adds one TURN entry with optional credentials.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ice_servers = match lookup("DUO_ICE_SERVERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(|url| RTCIceServer {
                    urls: vec![url.to_string()],
                    ..Default::default()
                })
                .collect(),
            None => Self::default().ice_servers,
        };
        if let Some(turn) = non_empty(lookup("DUO_TURN_SERVER")) {
            ice_servers.push(RTCIceServer {
                urls: vec![turn],
                username: non_empty(lookup("DUO_TURN_USERNAME")).unwrap_or_default(),
                credential: non_empty(lookup("DUO_TURN_PASSWORD")).unwrap_or_default(),
                ..Default::default()
            });
        }
        let signaling_url = non_empty(lookup("DUO_SIGNALING_URL"))
            .unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        Self {
            signaling_url,
            ice_servers,
        }
    }

    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    /// Relay url for `room`: the base with a percent-encoded `room` query parameter.
    pub fn room_url(&self, room: &str) -> Result<Url, RtcError> {
        build_room_url(&self.signaling_url, room)
    }
}

pub fn build_room_url(base: &str, room: &str) -> Result<Url, RtcError> {
    let mut url = Url::parse(base)
        .map_err(|err| RtcError::Setup(format!("invalid signaling url {base}: {err}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RtcError::Setup(format!(
                "signaling url must use ws or wss, got {other}"
            )));
        }
    }
    url.query_pairs_mut().append_pair("room", room);
    Ok(url)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
