use std::sync::Arc;

use async_trait::async_trait;
use duo_session::{
    DataChannel, IceCandidate, LocalTrack, MediaKind, PeerConnection, PeerError, PeerFactory,
    PeerSink, SdpKind, SessionDescription,
};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::channel::RtcDataChannel;
use crate::config::RtcConfig;
use crate::RtcError;

/// Builds `webrtc` peer connections sharing one configured API instance.
pub struct RtcPeerFactory {
    api: API,
    config: RtcConfig,
}

impl RtcPeerFactory {
    pub fn new(config: RtcConfig) -> Result<Self, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, config })
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, sink: PeerSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.config.ice_servers.clone(),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|err| PeerError::Backend(err.to_string()))?;
        let pc = Arc::new(pc);
        wire_callbacks(&pc, sink);
        info!(
            target = "duo::rtc::peer",
            ice_servers = self.config.ice_servers.len(),
            "peer connection created"
        );
        Ok(Arc::new(RtcPeer { pc }))
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, sink: PeerSink) {
    let ice_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = ice_sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                debug!(target = "duo::rtc::peer", "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.ice_candidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                }),
                Err(err) => {
                    warn!(target = "duo::rtc::peer", error = %err, "local candidate not serializable");
                }
            }
        })
    }));

    let track_sink = sink.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = track_sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(MediaKind::Audio),
                    RTPCodecType::Video => Some(MediaKind::Video),
                    _ => None,
                };
                sink.track(track.id(), kind);
            })
        },
    ));

    let channel_sink = sink.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let sink = channel_sink.clone();
        Box::pin(async move {
            debug!(target = "duo::rtc::peer", label = %dc.label(), "remote opened data channel");
            sink.data_channel(Arc::new(RtcDataChannel::new(dc)));
        })
    }));

    let state_sink = sink;
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = state_sink.clone();
        Box::pin(async move {
            sink.connection_state(state.to_string());
        })
    }));
}

/// [`PeerConnection`] over a `webrtc` peer connection.
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

fn description_error(err: webrtc::Error) -> PeerError {
    PeerError::Description(err.to_string())
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp).map_err(description_error),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp).map_err(description_error),
        SdpKind::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            Ok(rollback)
        }
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, PeerError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(PeerError::Description(format!(
            "unexpected description type {other}"
        ))),
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(description_error)?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(description_error)?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(description_error)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(description_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| PeerError::Candidate(err.to_string()))
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        let Some(sample) = track.handle::<TrackLocalStaticSample>() else {
            return Err(PeerError::Track(format!(
                "track {} was not produced by this backend",
                track.id
            )));
        };
        let sender = self
            .pc
            .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| PeerError::Track(err.to_string()))?;
        // RTCP has to be read for interceptors such as NACK to work.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, PeerError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| PeerError::Channel(err.to_string()))?;
        Ok(Arc::new(RtcDataChannel::new(dc)))
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(target = "duo::rtc::peer", error = %err, "peer connection close failed");
        }
    }
}
