use std::time::Duration;

use tracing::warn;

pub const DEFAULT_COUNTDOWN_SECS: u32 = 120;
pub const DEFAULT_CHUNK_BYTES: usize = 16 * 1024;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

/// Tunables for a single session controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub countdown_secs: u32,
    pub tick: Duration,
    pub chunk_size: usize,
    pub max_file_bytes: u64,
    pub channel_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            tick: Duration::from_secs(1),
            chunk_size: DEFAULT_CHUNK_BYTES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`SessionConfig::from_env`] but with an injectable variable lookup.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            countdown_secs: parse_env(&lookup, "DUO_COUNTDOWN_SECS", defaults.countdown_secs, 1),
            chunk_size: parse_env(&lookup, "DUO_CHUNK_BYTES", defaults.chunk_size, 1),
            max_file_bytes: parse_env(&lookup, "DUO_MAX_FILE_BYTES", defaults.max_file_bytes, 0),
            ..defaults
        }
    }

    pub fn with_countdown(mut self, secs: u32) -> Self {
        self.countdown_secs = secs.max(1);
        self
    }
}

fn parse_env<F, T>(lookup: &F, var: &str, default: T, min: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return default;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed >= min => parsed,
        Ok(parsed) => {
            warn!(
                target = "duo::config",
                var,
                parsed = %parsed,
                min = %min,
                default = %default,
                "session config below minimum; using default"
            );
            default
        }
        Err(err) => {
            warn!(
                target = "duo::config",
                var,
                error = %err,
                default = %default,
                "failed to parse session config from env; using default"
            );
            default
        }
    }
}
