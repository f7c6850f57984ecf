use std::path::PathBuf;

use duo_session::{ChatPayload, ChatSender, SessionEvent, SessionStatus};

/// What a line typed on stdin asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Say(String),
    SendFile(PathBuf),
    Status,
    Quit,
    Nothing,
}

pub fn parse_line(line: &str) -> Action {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Action::Nothing;
    }
    match trimmed.split_once(char::is_whitespace) {
        Some(("/send", path)) => Action::SendFile(PathBuf::from(path.trim())),
        None if trimmed == "/send" => Action::Nothing,
        None if trimmed == "/quit" => Action::Quit,
        None if trimmed == "/status" => Action::Status,
        _ => Action::Say(trimmed.to_string()),
    }
}

/// One line for the transcript, or `None` for events the console ignores.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Status(status) => Some(format!("* {}", status_label(*status))),
        SessionEvent::Countdown(Some(left)) if *left % 10 == 0 || *left <= 5 => {
            Some(format!("* waiting for peer, {left}s left"))
        }
        SessionEvent::Countdown(_) => None,
        SessionEvent::Chat(message) => {
            let who = match message.sender {
                ChatSender::Local => "you",
                ChatSender::Remote => "peer",
            };
            Some(match &message.payload {
                ChatPayload::Text(text) => format!("{who}: {text}"),
                ChatPayload::File(file) => {
                    format!("{who}: [file {} ({} bytes)]", file.name, file.size)
                }
            })
        }
        SessionEvent::IncomingFile { name, size } => {
            Some(format!("* receiving {name} ({size} bytes)"))
        }
        SessionEvent::RoomSize(count) => Some(format!("* {count} in room")),
        SessionEvent::Notice(err) => Some(format!("! {err}")),
    }
}

pub fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::AwaitingPeer => "waiting for peer",
        SessionStatus::Negotiating => "negotiating",
        SessionStatus::Connected => "connected",
        SessionStatus::Disconnected => "disconnected",
    }
}
