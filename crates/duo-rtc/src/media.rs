use std::sync::Arc;

use async_trait::async_trait;
use duo_session::{LocalTrack, MediaError, MediaKind, MediaSource};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Sample-fed local tracks: an Opus audio track and a VP8 video track that the
/// embedding application writes encoded samples into.
///
/// There is no capture device behind these; [`SampleMedia::tracks`] hands out
/// the writers for whatever produces the media.
#[derive(Default)]
pub struct SampleMedia {
    audio: bool,
    video: bool,
    live: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl SampleMedia {
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
            live: Mutex::new(Vec::new()),
        }
    }

    /// Tracks handed out by the most recent [`MediaSource::acquire`].
    pub fn tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.live.lock().clone()
    }

    fn track(kind: MediaKind, stream_id: &str) -> LocalTrack {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let id = format!("{}-{}", kind_label(kind), Uuid::new_v4());
        let sample = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.to_owned(),
        ));
        LocalTrack::new(id, kind).with_handle(sample)
    }
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

#[async_trait]
impl MediaSource for SampleMedia {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError> {
        if !self.audio && !self.video {
            return Err(MediaError::Unavailable("no media kinds enabled".to_string()));
        }
        let stream_id = format!("duo-{}", Uuid::new_v4());
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(Self::track(MediaKind::Audio, &stream_id));
        }
        if self.video {
            tracks.push(Self::track(MediaKind::Video, &stream_id));
        }
        *self.live.lock() = tracks
            .iter()
            .filter_map(|track| track.handle::<TrackLocalStaticSample>())
            .collect();
        debug!(target = "duo::rtc::media", stream = %stream_id, tracks = tracks.len(), "local tracks ready");
        Ok(tracks)
    }

    async fn release(&self, tracks: &[LocalTrack]) {
        self.live.lock().clear();
        debug!(target = "duo::rtc::media", tracks = tracks.len(), "local tracks released");
    }
}
