use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::candidates::CandidateBuffer;
use crate::channel::{ChannelManager, PumpState};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{
    ChannelEvent, ChannelId, ChannelSink, ChatMessage, Command, Epoch, Input, Notifier, PeerEvent,
    PeerSink, RelayEvent, RelaySink, Session, SessionEvent, SessionSnapshot, SessionStatus,
};
use crate::file::FileSource;
use crate::host::{Collaborators, DataChannel, LocalTrack, PeerConnection, RelayTransport};
use crate::negotiation::NegotiationEngine;
use crate::signal::{RelayMessage, SessionDescription};
use crate::timeout::{TickOutcome, TimeoutSupervisor};

const RELAY_TIMEOUT_NOTICE: &str = "Call ended due to inactivity.";

struct PeerLink {
    peer: Arc<dyn PeerConnection>,
    negotiation: NegotiationEngine,
    candidates: CandidateBuffer,
}

struct ActiveSession {
    record: Session,
    relay: Option<Arc<dyn RelayTransport>>,
    link: Option<PeerLink>,
    tracks: Vec<LocalTrack>,
    supervisor: TimeoutSupervisor,
    channels: ChannelManager,
    next_channel: ChannelId,
    pump_scheduled: bool,
}

/// Drives one two-party call at a time.
///
/// Every platform callback is posted to a single queue tagged with the epoch
/// it was created under; [`SessionController::stop`] bumps the epoch so late
/// callbacks from a torn-down call are dropped on arrival.
pub struct SessionController {
    config: SessionConfig,
    host: Collaborators,
    notifier: Notifier,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    epoch: Epoch,
    status: SessionStatus,
    session: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        host: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let controller = Self {
            config,
            host,
            notifier: Notifier::new(events_tx),
            inputs_tx,
            inputs_rx,
            epoch: 0,
            status: SessionStatus::Disconnected,
            session: None,
        };
        (controller, events_rx)
    }

    /// Moves the controller onto its own task.
    pub fn spawn(
        config: SessionConfig,
        host: Collaborators,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (controller, events) = Self::new(config, host);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(controller.run(commands_rx));
        (SessionHandle { commands: commands_tx }, events)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.as_ref();
        let link = session.and_then(|active| active.link.as_ref());
        SessionSnapshot {
            session: session.map(|active| active.record.clone()),
            status: self.status,
            remaining: session.and_then(|active| active.supervisor.remaining()),
            negotiation: link.map(|link| link.negotiation.state()),
            buffered_candidates: link.map_or(0, |link| link.candidates.len()),
            pending_messages: session.map_or(0, |active| active.channels.pending_len()),
            history: session
                .map(|active| active.channels.history().to_vec())
                .unwrap_or_default(),
        }
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.session
            .as_ref()
            .map(|active| active.channels.history().to_vec())
            .unwrap_or_default()
    }

    pub async fn start(&mut self, room: &str) -> Result<(), SessionError> {
        let room = room.trim();
        if room.is_empty() {
            return Err(SessionError::Validation(
                "room token must not be empty".to_string(),
            ));
        }
        if let Some(active) = &self.session {
            return Err(SessionError::AlreadyActive(active.record.room.clone()));
        }

        self.epoch += 1;
        let epoch = self.epoch;
        info!(target = "duo::session", room, epoch, "starting session");
        self.session = Some(ActiveSession {
            record: Session {
                room: room.to_string(),
                status: SessionStatus::Idle,
                started_at: Instant::now(),
            },
            relay: None,
            link: None,
            tracks: Vec::new(),
            supervisor: TimeoutSupervisor::new(self.config.countdown_secs, self.config.tick),
            channels: ChannelManager::with_notifier(&self.config, self.notifier.clone()),
            next_channel: 0,
            pump_scheduled: false,
        });
        self.set_status(SessionStatus::Idle);

        let sink = RelaySink::new(epoch, self.inputs_tx.clone());
        match self.host.relay.connect(room, sink).await {
            Ok(relay) => {
                if let Some(active) = self.session.as_mut() {
                    active.relay = Some(relay);
                }
                Ok(())
            }
            Err(err) => {
                warn!(target = "duo::session", room, error = %err, "relay connect failed");
                self.stop().await;
                Err(err.into())
            }
        }
    }

    /// Tears the call down. Safe to call at any time, including twice.
    pub async fn stop(&mut self) {
        let Some(mut active) = self.session.take() else {
            return;
        };
        self.epoch += 1;
        if active.supervisor.cancel() {
            self.notifier.emit(SessionEvent::Countdown(None));
        }
        active.channels.close_all().await;
        if let Some(link) = active.link.take() {
            link.peer.close().await;
        }
        if !active.tracks.is_empty() {
            self.host.media.release(&active.tracks).await;
        }
        if let Some(relay) = active.relay.take() {
            relay.close();
        }
        info!(
            target = "duo::session",
            room = %active.record.room,
            elapsed_ms = active.record.started_at.elapsed().as_millis() as u64,
            "session stopped"
        );
        self.set_status(SessionStatus::Disconnected);
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        let active = self.session.as_mut().ok_or(SessionError::Inactive)?;
        active.channels.send_text(text).await
    }

    pub async fn send_file(&mut self, file: Arc<dyn FileSource>) -> Result<(), SessionError> {
        let active = self.session.as_mut().ok_or(SessionError::Inactive)?;
        active.channels.send_file(file)?;
        self.schedule_pump();
        Ok(())
    }

    /// Handles everything already queued, including work those inputs enqueue.
    /// Returns the number of inputs processed.
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.inputs_rx.try_recv() {
            self.handle_input(input).await;
            handled += 1;
        }
        handled
    }

    /// Waits for the next input and handles it.
    pub async fn dispatch_next(&mut self) {
        if let Some(input) = self.inputs_rx.recv().await {
            self.handle_input(input).await;
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(input) = self.inputs_rx.recv() => self.handle_input(input).await,
            }
        }
        debug!(target = "duo::session", "all handles dropped; shutting down");
        self.stop().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { room, reply } => {
                let _ = reply.send(self.start(&room).await);
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(&text).await);
            }
            Command::SendFile { file, reply } => {
                let _ = reply.send(self.send_file(file).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_input(&mut self, input: Input) {
        if input.epoch() != self.epoch || self.session.is_none() {
            debug!(target = "duo::session", ?input, current = self.epoch, "stale input dropped");
            return;
        }
        match input {
            Input::Relay(_, event) => self.on_relay(event).await,
            Input::Peer(_, event) => self.on_peer(event).await,
            Input::Channel(_, id, event) => self.on_channel(id, event).await,
            Input::Tick(_, generation) => self.on_tick(generation).await,
            Input::PumpTransfer(_) => self.on_pump().await,
        }
    }

    async fn on_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Open => self.on_relay_open().await,
            RelayEvent::Message(text) => match RelayMessage::parse(&text) {
                Ok(message) => self.on_relay_message(message).await,
                Err(err) => {
                    warn!(target = "duo::signaling", error = %err, "dropping relay frame");
                }
            },
            RelayEvent::Closed => {
                warn!(target = "duo::signaling", status = ?self.status, "relay connection closed");
                if let Some(active) = self.session.as_mut() {
                    active.relay = None;
                }
            }
            RelayEvent::Error(reason) => {
                warn!(target = "duo::signaling", reason = %reason, "relay error");
            }
        }
    }

    async fn on_relay_open(&mut self) {
        let epoch = self.epoch;
        let Some(active) = self.session.as_mut() else {
            return;
        };
        if active.link.is_some() {
            return;
        }
        info!(target = "duo::session", room = %active.record.room, "relay open; waiting for peer");
        self.set_status(SessionStatus::AwaitingPeer);
        self.start_countdown();

        let peer = match self
            .host
            .peers
            .create(PeerSink::new(epoch, self.inputs_tx.clone()))
            .await
        {
            Ok(peer) => peer,
            Err(err) => {
                warn!(target = "duo::session", error = %err, "peer connection could not be created");
                self.notifier.emit(SessionEvent::Notice(err.into()));
                self.stop().await;
                return;
            }
        };

        let tracks = match self.host.media.acquire().await {
            Ok(tracks) => tracks,
            Err(err) => {
                warn!(target = "duo::session", error = %err, "local media unavailable; aborting");
                peer.close().await;
                self.notifier.emit(SessionEvent::Notice(err.into()));
                self.stop().await;
                return;
            }
        };
        for track in &tracks {
            if let Err(err) = peer.add_track(track).await {
                warn!(target = "duo::session", track = %track.id, error = %err, "failed to add local track");
            }
        }

        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.tracks = tracks;
        active.link = Some(PeerLink {
            peer,
            negotiation: NegotiationEngine::new(),
            candidates: CandidateBuffer::new(),
        });
        self.open_outbound_channel().await;
        self.issue_offer().await;
    }

    async fn on_relay_message(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Description(desc) => self.on_remote_description(desc).await,
            RelayMessage::Candidate(candidate) => {
                let Some(link) = self.link_mut() else {
                    debug!(target = "duo::signaling", "candidate before peer exists; dropped");
                    return;
                };
                let peer = link.peer.clone();
                if let Err(err) = link.candidates.enqueue(peer.as_ref(), candidate).await {
                    warn!(target = "duo::signaling", error = %err, "remote candidate rejected");
                }
            }
            RelayMessage::RoomSize(count) => self.on_room_size(count).await,
            RelayMessage::Timeout(message) => {
                let message = message.unwrap_or_else(|| RELAY_TIMEOUT_NOTICE.to_string());
                info!(target = "duo::signaling", message = %message, "relay ended the call");
                self.notifier
                    .emit(SessionEvent::Notice(SessionError::RelayTimeout(message)));
                self.stop().await;
            }
        }
    }

    async fn on_remote_description(&mut self, desc: SessionDescription) {
        let Some(link) = self.link_mut() else {
            debug!(target = "duo::signaling", "description before peer exists; dropped");
            return;
        };
        let peer = link.peer.clone();
        let result = link
            .negotiation
            .apply_remote(peer.as_ref(), &mut link.candidates, desc)
            .await;
        match result {
            Ok(applied) => {
                if self.status == SessionStatus::AwaitingPeer {
                    self.set_status(SessionStatus::Negotiating);
                }
                if applied.flushed.applied + applied.flushed.failed > 0 {
                    debug!(
                        target = "duo::signaling",
                        applied = applied.flushed.applied,
                        failed = applied.flushed.failed,
                        "buffered candidates released"
                    );
                }
                if let Some(answer) = applied.answer {
                    self.relay_send(RelayMessage::Description(answer));
                }
            }
            Err(err) => warn!(target = "duo::signaling", error = %err, "remote description not applied"),
        }
    }

    async fn on_room_size(&mut self, count: u32) {
        self.notifier.emit(SessionEvent::RoomSize(count));
        if count < 2 {
            info!(target = "duo::session", count, "alone in room; restarting countdown");
            self.start_countdown();
            if self.status != SessionStatus::Connected {
                self.set_status(SessionStatus::AwaitingPeer);
            }
            return;
        }
        let Some(state) = self.link_mut().map(|link| link.negotiation.state()) else {
            return;
        };
        if !state.offer_issued() && !state.remote_description_set() {
            if self
                .session
                .as_ref()
                .is_some_and(|active| active.channels.channel_count() == 0)
            {
                self.open_outbound_channel().await;
            }
            self.issue_offer().await;
        }
        if self.status == SessionStatus::AwaitingPeer {
            self.set_status(SessionStatus::Negotiating);
        }
    }

    async fn on_peer(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Track { id, kind } => {
                info!(target = "duo::session", track = %id, ?kind, "remote track received");
                self.mark_connected();
            }
            PeerEvent::IceCandidate(candidate) => {
                self.relay_send(RelayMessage::Candidate(candidate));
            }
            PeerEvent::DataChannel(channel) => {
                debug!(target = "duo::session", label = %channel.label(), "inbound data channel");
                self.adopt_channel(channel).await;
            }
            PeerEvent::ConnectionState(state) => {
                info!(target = "duo::session", state = %state, "peer connection state changed");
            }
        }
    }

    async fn on_channel(&mut self, id: ChannelId, event: ChannelEvent) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        match event {
            ChannelEvent::Open => {
                if active.channels.on_open(id).await {
                    self.mark_connected();
                    self.schedule_pump();
                }
            }
            ChannelEvent::Message(payload) => active.channels.on_message(id, payload).await,
            ChannelEvent::Closed => active.channels.on_closed(id),
            ChannelEvent::Error(reason) => active.channels.on_error(id, &reason),
        }
    }

    async fn on_tick(&mut self, generation: u64) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        match active.supervisor.on_tick(generation) {
            TickOutcome::Ignored => {}
            TickOutcome::Remaining(left) => {
                self.notifier.emit(SessionEvent::Countdown(Some(left)));
            }
            TickOutcome::Expired => {
                let seconds = self.config.countdown_secs;
                info!(target = "duo::session", seconds, "no peer arrived; ending session");
                self.notifier.emit(SessionEvent::Countdown(Some(0)));
                self.notifier
                    .emit(SessionEvent::Notice(SessionError::Timeout(seconds)));
                self.stop().await;
            }
        }
    }

    async fn on_pump(&mut self) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.pump_scheduled = false;
        if active.channels.pump().await == PumpState::More {
            self.schedule_pump();
        }
    }

    async fn open_outbound_channel(&mut self) {
        let label = self.config.channel_label.clone();
        let Some(peer) = self.link_mut().map(|link| link.peer.clone()) else {
            return;
        };
        match peer.create_data_channel(&label).await {
            Ok(channel) => self.adopt_channel(channel).await,
            Err(err) => {
                warn!(target = "duo::session", label = %label, error = %err, "outbound data channel failed; relying on inbound");
            }
        }
    }

    async fn adopt_channel(&mut self, channel: Arc<dyn DataChannel>) {
        let epoch = self.epoch;
        let Some(active) = self.session.as_mut() else {
            return;
        };
        let id = active.next_channel;
        active.next_channel += 1;
        channel.attach(ChannelSink::new(epoch, id, self.inputs_tx.clone()));
        let already_open = channel.is_open();
        active.channels.attach(id, channel);
        if already_open && active.channels.on_open(id).await {
            self.mark_connected();
            self.schedule_pump();
        }
    }

    async fn issue_offer(&mut self) {
        let Some(link) = self.link_mut() else {
            return;
        };
        let peer = link.peer.clone();
        match link.negotiation.offer(peer.as_ref()).await {
            Ok(Some(offer)) => self.relay_send(RelayMessage::Description(offer)),
            Ok(None) => {}
            Err(err) => warn!(target = "duo::signaling", error = %err, "offer not issued"),
        }
    }

    fn mark_connected(&mut self) {
        if let Some(active) = self.session.as_mut() {
            if active.supervisor.cancel() {
                self.notifier.emit(SessionEvent::Countdown(None));
            }
        }
        self.set_status(SessionStatus::Connected);
    }

    fn start_countdown(&mut self) {
        let epoch = self.epoch;
        let Some(active) = self.session.as_mut() else {
            return;
        };
        let tx = self.inputs_tx.clone();
        let seconds = active
            .supervisor
            .start(move |generation| tx.send(Input::Tick(epoch, generation)).is_ok());
        self.notifier.emit(SessionEvent::Countdown(Some(seconds)));
    }

    fn schedule_pump(&mut self) {
        let epoch = self.epoch;
        let Some(active) = self.session.as_mut() else {
            return;
        };
        if active.pump_scheduled || !active.channels.has_outbound_files() {
            return;
        }
        active.pump_scheduled = true;
        let _ = self.inputs_tx.send(Input::PumpTransfer(epoch));
    }

    fn relay_send(&self, message: RelayMessage) {
        let Some(relay) = self.session.as_ref().and_then(|active| active.relay.as_ref()) else {
            debug!(target = "duo::signaling", "relay gone; outbound frame dropped");
            return;
        };
        if let Err(err) = relay.send(message.encode()) {
            warn!(target = "duo::signaling", error = %err, "relay send failed");
        }
    }

    fn link_mut(&mut self) -> Option<&mut PeerLink> {
        self.session.as_mut().and_then(|active| active.link.as_mut())
    }

    fn set_status(&mut self, status: SessionStatus) {
        if let Some(active) = self.session.as_mut() {
            active.record.status = status;
        }
        if self.status == status {
            return;
        }
        debug!(target = "duo::session", from = ?self.status, to = ?status, "status changed");
        self.status = status;
        self.notifier.emit(SessionEvent::Status(status));
    }
}

/// Cloneable front door to a controller running on its own task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub async fn start(&self, room: impl Into<String>) -> Result<(), SessionError> {
        let room = room.into();
        self.request(|reply| Command::Start { room, reply })
            .await?
    }

    pub async fn stop(&self) {
        let _ = self.request(|reply| Command::Stop { reply }).await;
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply })
            .await?
    }

    pub async fn send_file(&self, file: Arc<dyn FileSource>) -> Result<(), SessionError> {
        self.request(|reply| Command::SendFile { file, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}
