use std::sync::Arc;

use async_trait::async_trait;
use duo_session::{RelayConnector, RelayError, RelaySink, RelayTransport};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tracing::{debug, trace, warn};

use crate::config::build_room_url;

/// Joins rooms on a WebSocket relay that forwards every text frame to the
/// other participant of the room.
#[derive(Clone, Debug)]
pub struct WsRelayConnector {
    base_url: String,
}

impl WsRelayConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    async fn connect(
        &self,
        room: &str,
        sink: RelaySink,
    ) -> Result<Arc<dyn RelayTransport>, RelayError> {
        let url = build_room_url(&self.base_url, room)
            .map_err(|err| RelayError::InvalidUrl(err.to_string()))?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| RelayError::Connect(err.to_string()))?;
        debug!(target = "duo::rtc::relay", url = %url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_write.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        sink.opened();
        let reader_sink = sink.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        trace!(target = "duo::rtc::relay", len = text.len(), "relay frame in");
                        reader_sink.message(text);
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => reader_sink.message(text),
                        Err(_) => debug!(target = "duo::rtc::relay", "non-utf8 binary relay frame dropped"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!(target = "duo::rtc::relay", "relay websocket closed: {err}");
                            }
                            _ => {
                                warn!(target = "duo::rtc::relay", "relay websocket error: {err}");
                                reader_sink.error(err.to_string());
                            }
                        }
                        break;
                    }
                }
            }
            reader_sink.closed();
        });

        Ok(Arc::new(WsRelay {
            send_tx,
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }
}

struct WsRelay {
    send_tx: mpsc::UnboundedSender<Message>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayTransport for WsRelay {
    fn send(&self, text: String) -> Result<(), RelayError> {
        self.send_tx
            .send(Message::Text(text))
            .map_err(|_| RelayError::Closed)
    }

    fn close(&self) {
        let _ = self.send_tx.send(Message::Close(None));
        let mut tasks = self.tasks.lock();
        // The writer is left to flush the close frame; the reader stops now.
        if tasks.len() > 1 {
            for task in tasks.drain(1..) {
                task.abort();
            }
        }
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duo_session::RelayEvent;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn invalid_base_url_is_reported_before_connecting() {
        let connector = WsRelayConnector::new("http://relay.example");
        let (sink, _probe) = RelaySink::probe();
        let Err(err) = connector.connect("room", sink).await else {
            panic!("expected url error");
        };
        assert!(matches!(err, RelayError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn unreachable_relay_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let connector = WsRelayConnector::new(format!("ws://{addr}/ws"));
        let (sink, _probe) = RelaySink::probe();
        let Err(err) = connector.connect("room", sink).await else {
            panic!("expected connect error");
        };
        assert!(matches!(err, RelayError::Connect(_)));
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(tcp).await.expect("handshake");
            ws.send(Message::Text(r#"{"type":"roomSize","count":1}"#.to_string()))
                .await
                .expect("hint");
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    ws.send(Message::Text(text)).await.expect("echo");
                }
            }
        });

        let connector = WsRelayConnector::new(format!("ws://{addr}/ws"));
        let (sink, mut probe) = RelaySink::probe();
        let relay = connector.connect("room", sink).await.expect("connect");

        assert!(matches!(probe.recv().await, Some(RelayEvent::Open)));
        let Some(RelayEvent::Message(hint)) = probe.recv().await else {
            panic!("expected room size hint");
        };
        assert_eq!(hint, r#"{"type":"roomSize","count":1}"#);

        relay.send("hello".to_string()).expect("send");
        let Some(RelayEvent::Message(echo)) = probe.recv().await else {
            panic!("expected echo");
        };
        assert_eq!(echo, "hello");
        relay.close();
    }
}
