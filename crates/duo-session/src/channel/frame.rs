use serde::{Deserialize, Serialize};

/// Text frames that bracket a binary file transfer on the chat channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlFrame {
    Start {
        #[serde(rename = "fileStart")]
        name: String,
        #[serde(default)]
        size: u64,
    },
    End {
        #[serde(rename = "fileEnd")]
        name: String,
    },
}

impl ControlFrame {
    /// Returns `None` for anything that is not a control frame; such text is chat.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.trim_start().starts_with('{') {
            return None;
        }
        serde_json::from_str(text).ok()
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
