use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::RelayError;
use crate::event::RelaySink;
use crate::host::{RelayConnector, RelayTransport};
use crate::signal::RelayMessage;

const ROOM_CAPACITY: usize = 2;

#[derive(Debug)]
struct Member {
    id: u64,
    sink: RelaySink,
}

#[derive(Debug, Default)]
struct Rooms {
    rooms: RwLock<HashMap<String, Vec<Member>>>,
    next_id: AtomicU64,
}

/// In-process stand-in for the relay server: pairs at most two clients per
/// room, forwards frames between them and announces occupancy.
///
/// Frames sent while alone in a room are dropped.
#[derive(Debug, Default, Clone)]
pub struct LocalRelay {
    inner: Arc<Rooms>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupancy(&self, room: &str) -> usize {
        self.inner.rooms.read().get(room).map_or(0, Vec::len)
    }

    /// Ends the call for everyone in `room` the way the relay does after
    /// prolonged inactivity.
    pub fn expire_room(&self, room: &str, message: Option<&str>) {
        let frame = RelayMessage::Timeout(message.map(str::to_string)).encode();
        if let Some(members) = self.inner.rooms.read().get(room) {
            for member in members {
                member.sink.message(frame.clone());
            }
        }
    }

    fn announce(members: &[Member]) {
        let frame = RelayMessage::RoomSize(members.len() as u32).encode();
        for member in members {
            member.sink.message(frame.clone());
        }
    }
}

#[async_trait]
impl RelayConnector for LocalRelay {
    async fn connect(
        &self,
        room: &str,
        sink: RelaySink,
    ) -> Result<Arc<dyn RelayTransport>, RelayError> {
        let mut rooms = self.inner.rooms.write();
        let members = rooms.entry(room.to_string()).or_default();
        members.retain(|member| !member.sink.is_detached());
        if members.len() >= ROOM_CAPACITY {
            return Err(RelayError::RoomFull(room.to_string()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        sink.opened();
        members.push(Member { id, sink });
        Self::announce(members);
        debug!(target = "duo::relay", room, member = id, occupancy = members.len(), "joined room");
        Ok(Arc::new(LocalRelayMember {
            id,
            room: room.to_string(),
            relay: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LocalRelayMember {
    id: u64,
    room: String,
    relay: LocalRelay,
    closed: AtomicBool,
}

impl RelayTransport for LocalRelayMember {
    fn send(&self, text: String) -> Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }
        let rooms = self.relay.inner.rooms.read();
        let mut delivered = 0;
        for member in rooms.get(&self.room).into_iter().flatten() {
            if member.id != self.id {
                member.sink.message(text.clone());
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!(target = "duo::relay", room = %self.room, "no peer in room; frame dropped");
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rooms = self.relay.inner.rooms.write();
        if let Some(members) = rooms.get_mut(&self.room) {
            members.retain(|member| member.id != self.id);
            if members.is_empty() {
                rooms.remove(&self.room);
            } else {
                LocalRelay::announce(members);
            }
        }
        debug!(target = "duo::relay", room = %self.room, member = self.id, "left room");
    }
}

impl Drop for LocalRelayMember {
    fn drop(&mut self) {
        self.close();
    }
}
