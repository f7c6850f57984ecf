use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::event::ChannelId;
use crate::file::FileSource;

/// An outbound file bound to the channel it started on.
pub(crate) struct OutgoingTransfer {
    pub(crate) file: Arc<dyn FileSource>,
    pub(crate) channel: ChannelId,
    pub(crate) offset: u64,
}

impl OutgoingTransfer {
    pub(crate) fn new(file: Arc<dyn FileSource>, channel: ChannelId) -> Self {
        Self {
            file,
            channel,
            offset: 0,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.offset >= self.file.size()
    }

    pub(crate) fn next_len(&self, chunk_size: usize) -> usize {
        let left = self.file.size().saturating_sub(self.offset);
        usize::try_from(left).map_or(chunk_size, |left| left.min(chunk_size))
    }
}

/// Binary chunks collected between a start frame and its end frame.
#[derive(Debug)]
pub(crate) struct IncomingTransfer {
    pub(crate) name: String,
    pub(crate) declared_size: u64,
    cap: u64,
    chunks: Vec<Bytes>,
    received: u64,
}

impl IncomingTransfer {
    /// Accepts up to `max(declared_size, limit)` bytes.
    pub(crate) fn new(name: String, declared_size: u64, limit: u64) -> Self {
        Self {
            name,
            declared_size,
            cap: declared_size.max(limit),
            chunks: Vec::new(),
            received: 0,
        }
    }

    /// Returns `false` once the sender has gone past the cap; the transfer
    /// should then be dropped.
    pub(crate) fn push(&mut self, chunk: Bytes) -> bool {
        self.received += chunk.len() as u64;
        if self.received > self.cap {
            return false;
        }
        self.chunks.push(chunk);
        true
    }

    pub(crate) fn received(&self) -> u64 {
        self.received
    }

    pub(crate) fn assemble(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut blob = BytesMut::with_capacity(self.received as usize);
        for chunk in self.chunks {
            blob.extend_from_slice(&chunk);
        }
        blob.freeze()
    }
}
