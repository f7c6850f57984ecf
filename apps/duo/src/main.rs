mod console;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use duo_rtc::{RtcConfig, RtcPeerFactory, SampleMedia, WsRelayConnector};
use duo_session::{
    ChatPayload, ChatSender, Collaborators, DiskFile, FileRef, MediaSource, NoMedia,
    SessionConfig, SessionController, SessionEvent, SessionHandle, SessionStatus,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::console::{Action, parse_line, render, status_label};
use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "duo",
    about = "Two-party call with chat and file transfer over WebRTC",
    version
)]
struct Cli {
    /// Room to join; the first two participants are paired.
    room: String,

    #[arg(
        long,
        env = "DUO_SIGNALING_URL",
        help = "WebSocket relay base url (ws:// or wss://)"
    )]
    signaling_url: Option<String>,

    #[arg(long, value_name = "SECS", help = "Seconds to wait for a peer")]
    countdown: Option<u32>,

    #[arg(long, value_enum, default_value_t = Tracks::None)]
    tracks: Tracks,

    #[arg(
        long,
        value_name = "DIR",
        env = "DUO_DOWNLOAD_DIR",
        default_value = ".",
        help = "Where received files are written"
    )]
    download_dir: PathBuf,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Tracks {
    None,
    Audio,
    AudioVideo,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "DUO_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "DUO_LOG_FILE",
        help = "Write logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(&cli.logging.to_config()).context("initialising logging")?;

    let mut rtc = RtcConfig::from_env();
    if let Some(url) = &cli.signaling_url {
        rtc = rtc.with_signaling_url(url.clone());
    }
    // Fail on a bad relay url before anything else is set up.
    rtc.room_url(&cli.room)?;

    let mut config = SessionConfig::from_env();
    if let Some(secs) = cli.countdown {
        config = config.with_countdown(secs);
    }

    let media: Arc<dyn MediaSource> = match cli.tracks {
        Tracks::None => Arc::new(NoMedia),
        Tracks::Audio => Arc::new(SampleMedia::audio_only()),
        Tracks::AudioVideo => Arc::new(SampleMedia::audio_video()),
    };
    let host = Collaborators::new(
        Arc::new(WsRelayConnector::new(rtc.signaling_url.clone())),
        Arc::new(RtcPeerFactory::new(rtc)?),
        media,
    );

    let (session, mut events) = SessionController::spawn(config, host);
    info!(target = "duo::cli", room = %cli.room, "joining room");
    session
        .start(cli.room.clone())
        .await
        .with_context(|| format!("joining room {}", cli.room))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = render(&event) {
                    println!("{line}");
                }
                match event {
                    SessionEvent::Chat(message) if message.sender == ChatSender::Remote => {
                        if let ChatPayload::File(file) = message.payload {
                            save_download(&cli.download_dir, &file).await;
                        }
                    }
                    SessionEvent::Status(SessionStatus::Disconnected) => break,
                    _ => {}
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&session, &line).await {
                        session.stop().await;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(target = "duo::cli", error = %err, "stdin read failed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                session.stop().await;
            }
        }
    }
    Ok(())
}

/// Returns false when the user asked to leave.
async fn handle_line(session: &SessionHandle, line: &str) -> bool {
    match parse_line(line) {
        Action::Nothing => {}
        Action::Quit => return false,
        Action::Say(text) => {
            if let Err(err) = session.send_text(text).await {
                eprintln!("! {err}");
            }
        }
        Action::SendFile(path) => match DiskFile::open(&path).await {
            Ok(file) => {
                if let Err(err) = session.send_file(Arc::new(file)).await {
                    eprintln!("! {err}");
                }
            }
            Err(err) => eprintln!("! cannot open {}: {err}", path.display()),
        },
        Action::Status => match session.snapshot().await {
            Ok(snapshot) => {
                let room = snapshot
                    .session
                    .as_ref()
                    .map(|session| session.room.as_str())
                    .unwrap_or("-");
                println!(
                    "* room {room}, {}, {} queued, {} in history",
                    status_label(snapshot.status),
                    snapshot.pending_messages,
                    snapshot.history.len()
                );
            }
            Err(err) => eprintln!("! {err}"),
        },
    }
    true
}

async fn save_download(dir: &Path, file: &FileRef) {
    let Some(blob) = &file.blob else { return };
    // Only the final path component of a peer-chosen name is trusted.
    let name = Path::new(&file.name)
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "download.bin".into());
    let path = dir.join(name);
    match tokio::fs::write(&path, blob).await {
        Ok(()) => println!("* saved {}", path.display()),
        Err(err) => eprintln!("! could not save {}: {err}", path.display()),
    }
}
