//! Chat and file transfer over the session's data channels.

mod frame;
mod transfer;

pub use frame::ControlFrame;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ChannelError, SessionError};
use crate::event::{
    ChannelId, ChannelPayload, ChatMessage, ChatPayload, ChatSender, FileRef, Notifier,
    SessionEvent,
};
use crate::file::FileSource;
use crate::host::DataChannel;

use transfer::{IncomingTransfer, OutgoingTransfer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpState {
    /// Nothing to do until a channel opens or another file is queued.
    Idle,
    /// Call [`ChannelManager::pump`] again.
    More,
}

struct ChannelSlot {
    id: ChannelId,
    channel: Arc<dyn DataChannel>,
    open: bool,
    incoming: Option<IncomingTransfer>,
}

/// Owns every data channel of a session plus the chat history, the queue of
/// messages typed while no channel was open, and outbound file transfers.
///
/// Outbound traffic always uses the most recently opened channel.
pub struct ChannelManager {
    chunk_size: usize,
    max_file_bytes: u64,
    notifier: Notifier,
    slots: Vec<ChannelSlot>,
    send_channel: Option<ChannelId>,
    pending: VecDeque<String>,
    history: Vec<ChatMessage>,
    queued_files: VecDeque<Arc<dyn FileSource>>,
    active: Option<OutgoingTransfer>,
}

impl ChannelManager {
    pub fn new(config: &SessionConfig, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self::with_notifier(config, Notifier::new(events))
    }

    pub(crate) fn with_notifier(config: &SessionConfig, notifier: Notifier) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_file_bytes: config.max_file_bytes,
            notifier,
            slots: Vec::new(),
            send_channel: None,
            pending: VecDeque::new(),
            history: Vec::new(),
            queued_files: VecDeque::new(),
            active: None,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn channel_count(&self) -> usize {
        self.slots.len()
    }

    pub fn has_outbound_files(&self) -> bool {
        self.active.is_some() || !self.queued_files.is_empty()
    }

    pub fn attach(&mut self, id: ChannelId, channel: Arc<dyn DataChannel>) {
        debug!(target = "duo::channel", channel = id, label = %channel.label(), "channel attached");
        self.slots.push(ChannelSlot {
            id,
            channel,
            open: false,
            incoming: None,
        });
    }

    /// Records and sends a chat line, queueing it while no channel can take it.
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::Validation(
                "chat message must not be blank".to_string(),
            ));
        }
        self.record(ChatMessage::text(ChatSender::Local, text));
        self.pending.push_back(text.to_string());
        self.drain_pending().await;
        Ok(())
    }

    /// Returns `true` when the channel was not already open.
    pub async fn on_open(&mut self, id: ChannelId) -> bool {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) else {
            warn!(target = "duo::channel", channel = id, "open reported for unknown channel");
            return false;
        };
        if slot.open {
            return false;
        }
        slot.open = true;
        self.send_channel = Some(id);
        info!(
            target = "duo::channel",
            channel = id,
            pending = self.pending.len(),
            "data channel open"
        );
        self.drain_pending().await;
        true
    }

    pub fn on_closed(&mut self, id: ChannelId) {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) else {
            return;
        };
        slot.open = false;
        if let Some(partial) = slot.incoming.take() {
            warn!(
                target = "duo::channel",
                channel = id,
                file = %partial.name,
                received = partial.received(),
                "channel closed mid-transfer; partial file discarded"
            );
        }
        if self.send_channel == Some(id) {
            self.send_channel = self
                .slots
                .iter()
                .rev()
                .find(|slot| slot.open)
                .map(|slot| slot.id);
        }
        if self.active.as_ref().is_some_and(|transfer| transfer.channel == id) {
            self.requeue_active(ChannelError::NotOpen);
        }
        info!(target = "duo::channel", channel = id, "data channel closed");
    }

    pub fn on_error(&mut self, id: ChannelId, reason: &str) {
        warn!(target = "duo::channel", channel = id, reason, "data channel error");
        let closed = self
            .slots
            .iter()
            .find(|slot| slot.id == id)
            .is_some_and(|slot| slot.open && !slot.channel.is_open());
        if closed {
            self.on_closed(id);
        }
    }

    pub async fn on_message(&mut self, id: ChannelId, payload: ChannelPayload) {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) else {
            return;
        };
        match payload {
            ChannelPayload::Text(text) => match ControlFrame::parse(&text) {
                Some(ControlFrame::Start { name, size }) => {
                    if let Some(previous) = slot.incoming.take() {
                        warn!(
                            target = "duo::channel",
                            channel = id,
                            file = %previous.name,
                            "new transfer started before previous one ended; discarding"
                        );
                    }
                    debug!(target = "duo::channel", channel = id, file = %name, size, "incoming file");
                    slot.incoming = Some(IncomingTransfer::new(name.clone(), size, self.max_file_bytes));
                    self.notifier.emit(SessionEvent::IncomingFile { name, size });
                }
                Some(ControlFrame::End { name }) => {
                    let matches = slot
                        .incoming
                        .as_ref()
                        .is_some_and(|transfer| transfer.name == name);
                    if !matches {
                        debug!(target = "duo::channel", channel = id, file = %name, "end frame without matching transfer ignored");
                        return;
                    }
                    if let Some(transfer) = slot.incoming.take() {
                        self.finish_incoming(id, transfer);
                    }
                }
                None => self.record(ChatMessage::text(ChatSender::Remote, text)),
            },
            ChannelPayload::Binary(chunk) => match slot.incoming.as_mut() {
                Some(transfer) => {
                    if !transfer.push(chunk) {
                        warn!(
                            target = "duo::channel",
                            channel = id,
                            file = %transfer.name,
                            declared = transfer.declared_size,
                            received = transfer.received(),
                            "incoming file overran its limit; transfer dropped"
                        );
                        slot.incoming = None;
                    }
                }
                None => debug!(
                    target = "duo::channel",
                    channel = id,
                    bytes = chunk.len(),
                    "binary payload outside a transfer dropped"
                ),
            },
        }
    }

    /// Queues a file for sending. Chunks go out through [`ChannelManager::pump`].
    pub fn send_file(&mut self, file: Arc<dyn FileSource>) -> Result<(), SessionError> {
        let size = file.size();
        if size > self.max_file_bytes {
            let err = SessionError::FileTooLarge {
                name: file.name().to_string(),
                size,
                limit: self.max_file_bytes,
            };
            warn!(target = "duo::channel", file = %file.name(), size, "file over the size limit refused");
            self.notifier.emit(SessionEvent::Notice(err.clone()));
            return Err(err);
        }
        self.record(ChatMessage {
            sender: ChatSender::Local,
            payload: ChatPayload::File(FileRef {
                name: file.name().to_string(),
                size,
                blob: None,
            }),
        });
        self.queued_files.push_back(file);
        Ok(())
    }

    /// Sends the next frame of the current transfer: a start frame, one chunk,
    /// or the end frame.
    pub async fn pump(&mut self) -> PumpState {
        let Some(mut transfer) = self.active.take() else {
            return self.begin_next_transfer().await;
        };
        let Some(channel) = self.open_channel(transfer.channel) else {
            self.active = Some(transfer);
            self.requeue_active(ChannelError::NotOpen);
            return PumpState::Idle;
        };

        if transfer.is_complete() {
            let frame = ControlFrame::End {
                name: transfer.file.name().to_string(),
            };
            if let Err(err) = channel.send_text(&frame.encode()).await {
                self.active = Some(transfer);
                self.requeue_active(err);
                return PumpState::Idle;
            }
            info!(
                target = "duo::channel",
                channel = transfer.channel,
                file = %transfer.file.name(),
                bytes = transfer.offset,
                "file sent"
            );
            return self.after_transfer();
        }

        let len = transfer.next_len(self.chunk_size);
        let chunk = match transfer.file.read_chunk(transfer.offset, len).await {
            Ok(chunk) if !chunk.is_empty() => chunk,
            Ok(_) => {
                self.abort_transfer(transfer, "file ended before its reported size".into());
                return self.after_transfer();
            }
            Err(err) => {
                self.abort_transfer(transfer, err.to_string());
                return self.after_transfer();
            }
        };
        let sent = chunk.len() as u64;
        if let Err(err) = channel.send_binary(chunk).await {
            self.active = Some(transfer);
            self.requeue_active(err);
            return PumpState::Idle;
        }
        transfer.offset += sent;
        self.active = Some(transfer);
        PumpState::More
    }

    pub async fn close_all(&mut self) {
        for slot in self.slots.drain(..) {
            slot.channel.close().await;
        }
        self.send_channel = None;
        self.active = None;
    }

    async fn begin_next_transfer(&mut self) -> PumpState {
        let Some(id) = self.send_channel else {
            if !self.queued_files.is_empty() {
                debug!(target = "duo::channel", queued = self.queued_files.len(), "file transfer parked until a channel opens");
            }
            return PumpState::Idle;
        };
        let Some(channel) = self.open_channel(id) else {
            return PumpState::Idle;
        };
        let Some(file) = self.queued_files.pop_front() else {
            return PumpState::Idle;
        };
        let frame = ControlFrame::Start {
            name: file.name().to_string(),
            size: file.size(),
        };
        if let Err(err) = channel.send_text(&frame.encode()).await {
            warn!(target = "duo::channel", channel = id, error = %err, "file start frame failed");
            self.queued_files.push_front(file);
            self.notifier.emit(SessionEvent::Notice(err.into()));
            return PumpState::Idle;
        }
        debug!(target = "duo::channel", channel = id, file = %file.name(), size = file.size(), "file transfer started");
        self.active = Some(OutgoingTransfer::new(file, id));
        PumpState::More
    }

    fn after_transfer(&self) -> PumpState {
        if self.queued_files.is_empty() {
            PumpState::Idle
        } else {
            PumpState::More
        }
    }

    fn open_channel(&self, id: ChannelId) -> Option<Arc<dyn DataChannel>> {
        self.slots
            .iter()
            .find(|slot| slot.id == id && slot.open)
            .map(|slot| slot.channel.clone())
    }

    /// Puts the interrupted transfer back at the head of the queue; it restarts
    /// from its start frame on the next open channel.
    fn requeue_active(&mut self, err: ChannelError) {
        let Some(transfer) = self.active.take() else {
            return;
        };
        warn!(
            target = "duo::channel",
            channel = transfer.channel,
            file = %transfer.file.name(),
            sent = transfer.offset,
            error = %err,
            "file transfer interrupted; will restart"
        );
        self.queued_files.push_front(transfer.file);
        self.notifier.emit(SessionEvent::Notice(err.into()));
    }

    fn abort_transfer(&mut self, transfer: OutgoingTransfer, reason: String) {
        warn!(
            target = "duo::channel",
            file = %transfer.file.name(),
            reason = %reason,
            "file transfer aborted"
        );
        self.notifier.emit(SessionEvent::Notice(SessionError::FileRead {
            name: transfer.file.name().to_string(),
            reason,
        }));
    }

    fn finish_incoming(&mut self, id: ChannelId, transfer: IncomingTransfer) {
        if transfer.received() != transfer.declared_size {
            warn!(
                target = "duo::channel",
                channel = id,
                file = %transfer.name,
                declared = transfer.declared_size,
                received = transfer.received(),
                "received file size differs from announced size"
            );
        }
        let name = transfer.name.clone();
        let size = transfer.received();
        let blob = transfer.assemble();
        info!(target = "duo::channel", channel = id, file = %name, bytes = size, "file received");
        self.record(ChatMessage {
            sender: ChatSender::Remote,
            payload: ChatPayload::File(FileRef {
                name,
                size,
                blob: Some(blob),
            }),
        });
    }

    async fn drain_pending(&mut self) {
        let Some(id) = self.send_channel else {
            return;
        };
        let Some(channel) = self.open_channel(id) else {
            return;
        };
        while let Some(text) = self.pending.front() {
            if let Err(err) = channel.send_text(text).await {
                warn!(
                    target = "duo::channel",
                    channel = id,
                    error = %err,
                    pending = self.pending.len(),
                    "chat send failed; message kept in queue"
                );
                return;
            }
            self.pending.pop_front();
        }
    }

    fn record(&mut self, message: ChatMessage) {
        self.history.push(message.clone());
        self.notifier.emit(SessionEvent::Chat(message));
    }
}
