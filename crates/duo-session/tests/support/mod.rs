#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use duo_session::{
    ChannelError, ChannelSink, Collaborators, DataChannel, IceCandidate, LocalTrack, MediaError,
    MediaKind, MediaSource, PeerConnection, PeerError, PeerFactory, PeerSink, RelayConnector,
    RelayError, RelaySink, RelayTransport, SdpKind, SessionConfig, SessionController,
    SessionDescription, SessionEvent,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Binary(Bytes),
}

/// Data channel fake. Sends are recorded and, when paired, delivered to the
/// partner's sink.
pub struct MockChannel {
    label: String,
    sink: Mutex<Option<ChannelSink>>,
    open: AtomicBool,
    failing: AtomicBool,
    closed_by_owner: AtomicBool,
    sent: Mutex<Vec<Sent>>,
    partner: Mutex<Option<Arc<MockChannel>>>,
}

impl MockChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            sink: Mutex::new(None),
            open: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            closed_by_owner: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            partner: Mutex::new(None),
        })
    }

    pub fn pair(a: &Arc<MockChannel>, b: &Arc<MockChannel>) {
        *a.partner.lock() = Some(b.clone());
        *b.partner.lock() = Some(a.clone());
    }

    /// Marks the channel open and reports it, as the transport would.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.opened();
        }
    }

    /// Marks the channel open without telling anyone.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.closed();
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn deliver_text(&self, text: &str) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.text(text);
        }
    }

    pub fn deliver_binary(&self, data: Bytes) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.binary(data);
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text(text) => Some(text),
                Sent::Binary(_) => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn was_closed(&self) -> bool {
        self.closed_by_owner.load(Ordering::SeqCst)
    }

    fn check_send(&self) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::NotOpen);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Send("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn attach(&self, sink: ChannelSink) {
        *self.sink.lock() = Some(sink);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.check_send()?;
        self.sent.lock().push(Sent::Text(text.to_string()));
        let partner = self.partner.lock().clone();
        if let Some(partner) = partner {
            partner.deliver_text(text);
        }
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        self.check_send()?;
        self.sent.lock().push(Sent::Binary(data.clone()));
        let partner = self.partner.lock().clone();
        if let Some(partner) = partner {
            partner.deliver_binary(data);
        }
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed_by_owner.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    AddTrack(String),
    CreateChannel(String),
    Close,
}

/// Peer connection fake that records every call in order.
pub struct MockPeer {
    name: String,
    sink: Option<PeerSink>,
    ops: Mutex<Vec<PeerOp>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    remote_set: AtomicBool,
    fail_rollback: AtomicBool,
    fail_answer: AtomicBool,
    fail_channel: AtomicBool,
    rejected_candidates: Mutex<HashSet<String>>,
    counter: AtomicUsize,
}

impl MockPeer {
    pub fn detached(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, None))
    }

    fn build(name: &str, sink: Option<PeerSink>) -> Self {
        Self {
            name: name.to_string(),
            sink,
            ops: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            remote_set: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            fail_answer: AtomicBool::new(false),
            fail_channel: AtomicBool::new(false),
            rejected_candidates: Mutex::new(HashSet::new()),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn ops(&self) -> Vec<PeerOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, op: &PeerOp) -> usize {
        self.ops.lock().iter().filter(|seen| *seen == op).count()
    }

    pub fn channels(&self) -> Vec<Arc<MockChannel>> {
        self.channels.lock().clone()
    }

    pub fn channel(&self, index: usize) -> Arc<MockChannel> {
        self.channels.lock()[index].clone()
    }

    pub fn fail_rollback(&self) {
        self.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn fail_answer(&self) {
        self.fail_answer.store(true, Ordering::SeqCst);
    }

    pub fn fail_channel_creation(&self) {
        self.fail_channel.store(true, Ordering::SeqCst);
    }

    pub fn reject_candidate(&self, candidate: &str) {
        self.rejected_candidates.lock().insert(candidate.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.ops.lock().contains(&PeerOp::Close)
    }

    pub fn emit_track(&self, id: &str) {
        if let Some(sink) = &self.sink {
            sink.track(id, Some(MediaKind::Video));
        }
    }

    pub fn emit_candidate(&self, candidate: &str) {
        if let Some(sink) = &self.sink {
            sink.ice_candidate(IceCandidate::new(candidate));
        }
    }

    pub fn emit_data_channel(&self, channel: Arc<MockChannel>) {
        if let Some(sink) = &self.sink {
            sink.data_channel(channel);
        }
    }

    fn record(&self, op: PeerOp) {
        self.ops.lock().push(op);
    }

    fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.record(PeerOp::CreateOffer);
        Ok(SessionDescription::offer(format!("offer-{}-{}", self.name, self.next())))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record(PeerOp::CreateAnswer);
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(PeerError::Description("answer refused".into()));
        }
        Ok(SessionDescription::answer(format!("answer-{}-{}", self.name, self.next())))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.record(PeerOp::SetLocal(desc.kind));
        if desc.kind == SdpKind::Rollback && self.fail_rollback.load(Ordering::SeqCst) {
            return Err(PeerError::Description("rollback unsupported".into()));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.record(PeerOp::SetRemote(desc.kind));
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(PeerOp::AddCandidate(candidate.candidate.clone()));
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(PeerError::Candidate("no remote description".into()));
        }
        if self.rejected_candidates.lock().contains(&candidate.candidate) {
            return Err(PeerError::Candidate("malformed".into()));
        }
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        self.record(PeerOp::AddTrack(track.id.clone()));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, PeerError> {
        self.record(PeerOp::CreateChannel(label.to_string()));
        if self.fail_channel.load(Ordering::SeqCst) {
            return Err(PeerError::Channel("no sctp".into()));
        }
        let channel = MockChannel::new(label);
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn close(&self) {
        self.record(PeerOp::Close);
    }
}

#[derive(Default)]
pub struct MockPeerFactory {
    prefix: String,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn named(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.to_string(),
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn latest(&self) -> Arc<MockPeer> {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("no peer created yet")
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(&self, sink: PeerSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let mut peers = self.peers.lock();
        let name = format!("{}{}", self.prefix, peers.len());
        let peer = Arc::new(MockPeer::build(&name, Some(sink)));
        peers.push(peer.clone());
        Ok(peer)
    }
}

#[derive(Default)]
pub struct MockMedia {
    deny: AtomicBool,
    released: AtomicUsize,
}

impl MockMedia {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying() -> Arc<Self> {
        let media = Self::default();
        media.deny.store(true, Ordering::SeqCst);
        Arc::new(media)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::Denied("camera blocked".into()));
        }
        Ok(vec![
            LocalTrack::new("mic", MediaKind::Audio),
            LocalTrack::new("cam", MediaKind::Video),
        ])
    }

    async fn release(&self, tracks: &[LocalTrack]) {
        self.released.fetch_add(tracks.len(), Ordering::SeqCst);
    }
}

/// Relay fake driven by the test: frames the session sends are recorded and
/// inbound frames are injected by hand.
#[derive(Default)]
pub struct ScriptedRelay {
    sink: Mutex<Option<RelaySink>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl ScriptedRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        let relay = Self::default();
        relay.refuse.store(true, Ordering::SeqCst);
        Arc::new(relay)
    }

    pub fn inject(&self, text: &str) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.message(text);
        }
    }

    pub fn hang_up(&self) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.closed();
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).expect("relay frame is json"))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedTransport {
    relay: Arc<ScriptedRelay>,
}

impl RelayTransport for ScriptedTransport {
    fn send(&self, text: String) -> Result<(), RelayError> {
        if self.relay.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        self.relay.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.relay.closed.store(true, Ordering::SeqCst);
    }
}

/// Wraps a shared [`ScriptedRelay`] so tests keep a handle to it.
pub struct ScriptedConnector(pub Arc<ScriptedRelay>);

#[async_trait]
impl RelayConnector for ScriptedConnector {
    async fn connect(
        &self,
        _room: &str,
        sink: RelaySink,
    ) -> Result<Arc<dyn RelayTransport>, RelayError> {
        let relay = &self.0;
        relay.connects.fetch_add(1, Ordering::SeqCst);
        if relay.refuse.load(Ordering::SeqCst) {
            return Err(RelayError::Connect("connection refused".into()));
        }
        relay.closed.store(false, Ordering::SeqCst);
        sink.opened();
        *relay.sink.lock() = Some(sink);
        Ok(Arc::new(ScriptedTransport {
            relay: relay.clone(),
        }))
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub relay: Arc<ScriptedRelay>,
    pub peers: Arc<MockPeerFactory>,
    pub media: Arc<MockMedia>,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_parts(config, ScriptedRelay::new(), MockMedia::granting())
    }

    pub fn with_parts(
        config: SessionConfig,
        relay: Arc<ScriptedRelay>,
        media: Arc<MockMedia>,
    ) -> Self {
        init_tracing();
        let peers = MockPeerFactory::named("peer");
        let host = Collaborators::new(
            Arc::new(ScriptedConnector(relay.clone())),
            peers.clone(),
            media.clone(),
        );
        let (controller, events) = SessionController::new(config, host);
        Self {
            controller,
            events,
            relay,
            peers,
            media,
        }
    }

    /// Starts a session and processes the relay open.
    pub async fn started(mut self, room: &str) -> Self {
        self.controller.start(room).await.expect("start session");
        self.controller.dispatch_pending().await;
        self
    }

    pub async fn settle(&mut self) {
        while self.controller.dispatch_pending().await > 0 {}
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// The outbound channel created when the relay opened.
    pub fn outbound_channel(&self) -> Arc<MockChannel> {
        self.peers.latest().channel(0)
    }
}
