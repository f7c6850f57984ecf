use tracing::{debug, info, warn};

use crate::candidates::{CandidateBuffer, FlushReport};
use crate::error::SessionError;
use crate::host::PeerConnection;
use crate::signal::{SdpKind, SessionDescription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalingPhase {
    Stable,
    LocalOfferPending,
    RemoteOfferPending,
}

/// Offer/answer progress of one peer connection.
///
/// Every variant implies a single combination of phase, remote-description
/// flag and offer-issued flag, so impossible mixes (a pending local offer with
/// a committed remote description, say) cannot be represented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NegotiationState {
    #[default]
    Fresh,
    OfferSent,
    /// A local offer was discarded because the remote offer won.
    RolledBack,
    AnswerPending { offer_issued: bool },
    Established { offer_issued: bool },
}

impl NegotiationState {
    pub fn phase(self) -> SignalingPhase {
        match self {
            NegotiationState::OfferSent => SignalingPhase::LocalOfferPending,
            NegotiationState::AnswerPending { .. } => SignalingPhase::RemoteOfferPending,
            NegotiationState::Fresh
            | NegotiationState::RolledBack
            | NegotiationState::Established { .. } => SignalingPhase::Stable,
        }
    }

    pub fn remote_description_set(self) -> bool {
        matches!(
            self,
            NegotiationState::AnswerPending { .. } | NegotiationState::Established { .. }
        )
    }

    pub fn offer_issued(self) -> bool {
        match self {
            NegotiationState::Fresh => false,
            NegotiationState::OfferSent | NegotiationState::RolledBack => true,
            NegotiationState::AnswerPending { offer_issued }
            | NegotiationState::Established { offer_issued } => offer_issued,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteApplied {
    /// Answer that must be relayed back to the peer.
    pub answer: Option<SessionDescription>,
    pub rolled_back: bool,
    pub flushed: FlushReport,
}

#[derive(Debug, Default)]
pub struct NegotiationEngine {
    state: NegotiationState,
}

impl NegotiationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Creates and commits a local offer, at most once per connection.
    ///
    /// Returns `Ok(None)` when an offer was already issued or the remote side
    /// has already described itself.
    pub async fn offer(
        &mut self,
        peer: &dyn PeerConnection,
    ) -> Result<Option<SessionDescription>, SessionError> {
        if self.state.offer_issued() || self.state.remote_description_set() {
            debug!(target = "duo::negotiation", state = ?self.state, "offer suppressed");
            return Ok(None);
        }
        let offer = peer
            .create_offer()
            .await
            .map_err(|err| SessionError::Negotiation(format!("create offer: {err}")))?;
        peer.set_local_description(offer.clone())
            .await
            .map_err(|err| SessionError::Negotiation(format!("set local offer: {err}")))?;
        self.state = NegotiationState::OfferSent;
        info!(target = "duo::negotiation", "local offer issued");
        Ok(Some(offer))
    }

    pub async fn apply_remote(
        &mut self,
        peer: &dyn PeerConnection,
        candidates: &mut CandidateBuffer,
        desc: SessionDescription,
    ) -> Result<RemoteApplied, SessionError> {
        match desc.kind {
            SdpKind::Offer => self.apply_offer(peer, candidates, desc).await,
            SdpKind::Answer => self.apply_answer(peer, candidates, desc).await,
            SdpKind::Rollback => Err(SessionError::Negotiation(
                "remote sent a rollback description".to_string(),
            )),
        }
    }

    async fn apply_offer(
        &mut self,
        peer: &dyn PeerConnection,
        candidates: &mut CandidateBuffer,
        offer: SessionDescription,
    ) -> Result<RemoteApplied, SessionError> {
        let mut applied = RemoteApplied::default();
        if self.state.phase() != SignalingPhase::Stable {
            // Glare: the remote offer wins and ours is discarded.
            if let Err(err) = peer.set_local_description(SessionDescription::rollback()).await {
                warn!(
                    target = "duo::negotiation",
                    error = %err,
                    state = ?self.state,
                    "rollback failed; applying remote offer anyway"
                );
            }
            self.state = if self.state.offer_issued() {
                NegotiationState::RolledBack
            } else {
                NegotiationState::Fresh
            };
            applied.rolled_back = true;
            info!(target = "duo::negotiation", "offer collision; rolled back local offer");
        }

        let offer_issued = self.state.offer_issued();
        peer.set_remote_description(offer)
            .await
            .map_err(|err| SessionError::Negotiation(format!("set remote offer: {err}")))?;
        self.state = NegotiationState::AnswerPending { offer_issued };
        applied.flushed = candidates.flush(peer).await;

        let answer = peer
            .create_answer()
            .await
            .map_err(|err| SessionError::Negotiation(format!("create answer: {err}")))?;
        peer.set_local_description(answer.clone())
            .await
            .map_err(|err| SessionError::Negotiation(format!("set local answer: {err}")))?;
        self.state = NegotiationState::Established { offer_issued };
        info!(target = "duo::negotiation", "answered remote offer");
        applied.answer = Some(answer);
        Ok(applied)
    }

    async fn apply_answer(
        &mut self,
        peer: &dyn PeerConnection,
        candidates: &mut CandidateBuffer,
        answer: SessionDescription,
    ) -> Result<RemoteApplied, SessionError> {
        if self.state != NegotiationState::OfferSent {
            return Err(SessionError::Negotiation(format!(
                "answer received while {:?}",
                self.state.phase()
            )));
        }
        peer.set_remote_description(answer)
            .await
            .map_err(|err| SessionError::Negotiation(format!("set remote answer: {err}")))?;
        self.state = NegotiationState::Established { offer_issued: true };
        info!(target = "duo::negotiation", "remote answer applied");
        Ok(RemoteApplied {
            answer: None,
            rolled_back: false,
            flushed: candidates.flush(peer).await,
        })
    }
}
