use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use duo_session::{ChannelError, ChannelSink, DataChannel};
use tokio::time::{sleep, timeout};
use tracing::{trace, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Sends wait while more than this many bytes sit in the SCTP buffer.
const HIGH_WATER_BYTES: usize = 1024 * 1024;
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// [`DataChannel`] over a `webrtc` data channel.
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcDataChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.dc.ready_state() == RTCDataChannelState::Open {
            Ok(())
        } else {
            Err(ChannelError::NotOpen)
        }
    }

    async fn wait_for_drain(&self) {
        while self.dc.buffered_amount().await > HIGH_WATER_BYTES {
            if self.dc.ready_state() != RTCDataChannelState::Open {
                return;
            }
            sleep(DRAIN_POLL).await;
        }
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn attach(&self, sink: ChannelSink) {
        let label = self.dc.label().to_string();

        let open_sink = sink.clone();
        self.dc.on_open(Box::new(move || {
            let sink = open_sink.clone();
            Box::pin(async move {
                sink.opened();
            })
        }));

        let close_sink = sink.clone();
        self.dc.on_close(Box::new(move || {
            let sink = close_sink.clone();
            Box::pin(async move {
                sink.closed();
            })
        }));

        let error_sink = sink.clone();
        self.dc.on_error(Box::new(move |err: webrtc::Error| {
            let sink = error_sink.clone();
            Box::pin(async move {
                sink.error(err.to_string());
            })
        }));

        let message_sink = sink;
        self.dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let sink = message_sink.clone();
            let label = label.clone();
            Box::pin(async move {
                if !msg.is_string {
                    sink.binary(msg.data);
                    return;
                }
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => sink.text(text),
                    Err(err) => warn!(
                        target = "duo::rtc::channel",
                        label = %label,
                        error = %err,
                        "dropping non-utf8 text message"
                    ),
                }
            })
        }));
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.ensure_open()?;
        match timeout(SEND_TIMEOUT, self.dc.send_text(text.to_string())).await {
            Ok(Ok(written)) => {
                trace!(target = "duo::rtc::channel", written, "sent text frame");
                Ok(())
            }
            Ok(Err(err)) => Err(ChannelError::Send(err.to_string())),
            Err(_) => Err(ChannelError::Send("send timed out".to_string())),
        }
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.wait_for_drain().await;
        match timeout(SEND_TIMEOUT, self.dc.send(&data)).await {
            Ok(Ok(written)) => {
                trace!(target = "duo::rtc::channel", written, "sent binary frame");
                Ok(())
            }
            Ok(Err(err)) => Err(ChannelError::Send(err.to_string())),
            Err(_) => Err(ChannelError::Send("send timed out".to_string())),
        }
    }

    async fn close(&self) {
        if let Err(err) = self.dc.close().await {
            warn!(target = "duo::rtc::channel", error = %err, "data channel close failed");
        }
    }
}
