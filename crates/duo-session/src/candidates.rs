use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::host::PeerConnection;
use crate::signal::IceCandidate;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
}

/// Holds remote ICE candidates until a remote description is committed.
///
/// Candidates are applied in arrival order. The buffer is released exactly
/// once by [`CandidateBuffer::flush`]; after that every candidate goes
/// straight to the peer.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
    released: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Returns `Ok(true)` when the candidate was applied immediately.
    pub async fn enqueue(
        &mut self,
        peer: &dyn PeerConnection,
        candidate: IceCandidate,
    ) -> Result<bool, SessionError> {
        if !self.released {
            debug!(
                target = "duo::candidates",
                queued = self.queue.len() + 1,
                "buffering remote candidate until remote description is set"
            );
            self.queue.push_back(candidate);
            return Ok(false);
        }
        peer.add_ice_candidate(candidate)
            .await
            .map_err(|err| SessionError::Ice(err.to_string()))?;
        Ok(true)
    }

    /// Applies everything buffered so far. A candidate the peer rejects is
    /// logged and skipped; the rest still go through.
    pub async fn flush(&mut self, peer: &dyn PeerConnection) -> FlushReport {
        let mut report = FlushReport::default();
        if self.released {
            return report;
        }
        self.released = true;
        while let Some(candidate) = self.queue.pop_front() {
            match peer.add_ice_candidate(candidate).await {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target = "duo::candidates",
                        error = %err,
                        "buffered ice candidate rejected"
                    );
                }
            }
        }
        debug!(
            target = "duo::candidates",
            applied = report.applied,
            failed = report.failed,
            "flushed buffered candidates"
        );
        report
    }
}
