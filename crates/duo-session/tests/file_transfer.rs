mod support;

use std::sync::Arc;

use bytes::Bytes;
use duo_session::{
    ChannelManager, ChannelPayload, ChatPayload, ChatSender, FileRef, MemoryFile, PumpState,
    SessionConfig, SessionError, SessionEvent,
};
use support::{Harness, MockChannel, Sent};
use tokio::sync::mpsc;

fn patterned(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
}

fn frames(sent: &[Sent]) -> Vec<String> {
    sent.iter()
        .map(|frame| match frame {
            Sent::Text(text) => text.clone(),
            Sent::Binary(data) => format!("<{}>", data.len()),
        })
        .collect()
}

async fn open_manager(
    config: &SessionConfig,
) -> (
    ChannelManager,
    Arc<MockChannel>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut manager = ChannelManager::new(config, tx);
    let channel = MockChannel::new("chat");
    channel.set_open(true);
    manager.attach(0, channel.clone());
    assert!(manager.on_open(0).await);
    (manager, channel, rx)
}

async fn pump_all(manager: &mut ChannelManager) {
    while manager.pump().await == PumpState::More {}
}

#[tokio::test]
async fn file_is_split_into_fixed_chunks() {
    let config = SessionConfig::default();
    let (mut manager, channel, _events) = open_manager(&config).await;

    manager
        .send_file(Arc::new(MemoryFile::new("photo.jpg", patterned(40_000))))
        .expect("queue");
    pump_all(&mut manager).await;

    assert_eq!(
        frames(&channel.sent()),
        vec![
            r#"{"fileStart":"photo.jpg","size":40000}"#.to_string(),
            "<16384>".into(),
            "<16384>".into(),
            "<7232>".into(),
            r#"{"fileEnd":"photo.jpg"}"#.into(),
        ]
    );
}

#[tokio::test]
async fn exact_multiple_and_empty_files() {
    let config = SessionConfig::default();
    let (mut manager, channel, _events) = open_manager(&config).await;

    manager
        .send_file(Arc::new(MemoryFile::new("two.bin", patterned(32_768))))
        .expect("queue");
    manager
        .send_file(Arc::new(MemoryFile::new("empty.txt", Bytes::new())))
        .expect("queue");
    pump_all(&mut manager).await;

    assert_eq!(
        frames(&channel.sent()),
        vec![
            r#"{"fileStart":"two.bin","size":32768}"#.to_string(),
            "<16384>".into(),
            "<16384>".into(),
            r#"{"fileEnd":"two.bin"}"#.into(),
            r#"{"fileStart":"empty.txt","size":0}"#.into(),
            r#"{"fileEnd":"empty.txt"}"#.into(),
        ]
    );
}

#[tokio::test]
async fn oversized_file_is_refused_outright() {
    let config = SessionConfig {
        max_file_bytes: 1024,
        ..SessionConfig::default()
    };
    let (mut manager, channel, mut events) = open_manager(&config).await;

    let err = manager
        .send_file(Arc::new(MemoryFile::new("big.iso", patterned(1025))))
        .expect_err("too large");
    assert_eq!(
        err,
        SessionError::FileTooLarge {
            name: "big.iso".into(),
            size: 1025,
            limit: 1024
        }
    );
    assert_eq!(manager.pump().await, PumpState::Idle);
    assert!(channel.sent().is_empty());
    assert!(manager.history().is_empty());
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::Notice(err)));
    assert!(events.try_recv().is_err());

    manager
        .send_file(Arc::new(MemoryFile::new("ok.bin", patterned(1024))))
        .expect("at the limit");
}

#[tokio::test]
async fn received_file_is_reassembled() {
    let config = SessionConfig::default();
    let (mut manager, _channel, mut events) = open_manager(&config).await;
    let payload = patterned(20_000);

    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileStart":"a.bin","size":20000}"#.into()))
        .await;
    manager
        .on_message(0, ChannelPayload::Binary(payload.slice(..16_384)))
        .await;
    manager
        .on_message(0, ChannelPayload::Binary(payload.slice(16_384..)))
        .await;
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"a.bin"}"#.into()))
        .await;

    assert_eq!(
        events.try_recv().expect("incoming"),
        SessionEvent::IncomingFile {
            name: "a.bin".into(),
            size: 20_000
        }
    );
    let Ok(SessionEvent::Chat(message)) = events.try_recv() else {
        panic!("expected chat event");
    };
    assert_eq!(message.sender, ChatSender::Remote);
    assert_eq!(
        message.payload,
        ChatPayload::File(FileRef {
            name: "a.bin".into(),
            size: 20_000,
            blob: Some(payload),
        })
    );
}

#[tokio::test]
async fn stray_frames_are_ignored() {
    let config = SessionConfig::default();
    let (mut manager, _channel, _events) = open_manager(&config).await;

    manager
        .on_message(0, ChannelPayload::Binary(Bytes::from_static(b"orphan")))
        .await;
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"nothing"}"#.into()))
        .await;
    assert!(manager.history().is_empty());

    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileStart":"x","size":3}"#.into()))
        .await;
    manager
        .on_message(0, ChannelPayload::Binary(Bytes::from_static(b"abc")))
        .await;
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"y"}"#.into()))
        .await;
    assert!(manager.history().is_empty());
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"x"}"#.into()))
        .await;
    assert_eq!(manager.history().len(), 1);
}

#[tokio::test]
async fn short_transfer_is_still_delivered() {
    let config = SessionConfig::default();
    let (mut manager, _channel, _events) = open_manager(&config).await;

    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileStart":"x","size":10}"#.into()))
        .await;
    manager
        .on_message(0, ChannelPayload::Binary(Bytes::from_static(b"abc")))
        .await;
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"x"}"#.into()))
        .await;

    let [message] = manager.history() else {
        panic!("expected one message");
    };
    let ChatPayload::File(file) = &message.payload else {
        panic!("expected a file");
    };
    assert_eq!(file.size, 3);
    assert_eq!(file.blob.as_deref(), Some(&b"abc"[..]));
}

#[tokio::test]
async fn new_start_frame_discards_the_partial_file() {
    let config = SessionConfig::default();
    let (mut manager, _channel, _events) = open_manager(&config).await;

    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileStart":"a","size":6}"#.into()))
        .await;
    manager
        .on_message(0, ChannelPayload::Binary(Bytes::from_static(b"aaa")))
        .await;
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileStart":"b","size":3}"#.into()))
        .await;
    manager
        .on_message(0, ChannelPayload::Binary(Bytes::from_static(b"bbb")))
        .await;
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"a"}"#.into()))
        .await;
    assert!(manager.history().is_empty());
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"b"}"#.into()))
        .await;

    let [message] = manager.history() else {
        panic!("expected exactly one delivered file");
    };
    assert_eq!(
        message.payload,
        ChatPayload::File(FileRef {
            name: "b".into(),
            size: 3,
            blob: Some(Bytes::from_static(b"bbb")),
        })
    );
}

#[tokio::test]
async fn overrunning_sender_is_cut_off() {
    let config = SessionConfig {
        max_file_bytes: 4,
        ..SessionConfig::default()
    };
    let (mut manager, _channel, _events) = open_manager(&config).await;

    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileStart":"flood","size":2}"#.into()))
        .await;
    for _ in 0..3 {
        manager
            .on_message(0, ChannelPayload::Binary(Bytes::from_static(b"xx")))
            .await;
    }
    manager
        .on_message(0, ChannelPayload::Text(r#"{"fileEnd":"flood"}"#.into()))
        .await;
    assert!(manager.history().is_empty());
}

#[tokio::test]
async fn file_sent_before_open_waits_for_channel() {
    let mut harness = Harness::new(SessionConfig::default()).started("room").await;
    harness
        .controller
        .send_file(Arc::new(MemoryFile::new("late.txt", patterned(10))))
        .await
        .expect("queue file");
    harness.settle().await;
    let channel = harness.outbound_channel();
    assert!(channel.sent().is_empty());

    channel.open();
    harness.settle().await;
    assert_eq!(
        frames(&channel.sent()),
        vec![
            r#"{"fileStart":"late.txt","size":10}"#.to_string(),
            "<10>".into(),
            r#"{"fileEnd":"late.txt"}"#.into(),
        ]
    );
    let history = harness.controller.history();
    assert!(matches!(
        &history[0].payload,
        ChatPayload::File(FileRef { name, blob: None, .. }) if name == "late.txt"
    ));
}

#[tokio::test]
async fn chat_can_interleave_with_transfer_chunks() {
    let mut harness = Harness::new(SessionConfig::default()).started("room").await;
    let channel = harness.outbound_channel();
    channel.open();
    harness.settle().await;

    harness
        .controller
        .send_file(Arc::new(MemoryFile::new("big.bin", patterned(50_000))))
        .await
        .expect("queue");
    // One pump step: the start frame.
    harness.controller.dispatch_next().await;
    harness.controller.send_text("still here").await.expect("chat");
    harness.settle().await;

    let sent = frames(&channel.sent());
    assert_eq!(sent[0], r#"{"fileStart":"big.bin","size":50000}"#);
    assert_eq!(sent[1], "still here");
    assert_eq!(sent.last().map(String::as_str), Some(r#"{"fileEnd":"big.bin"}"#));
    assert_eq!(sent.iter().filter(|frame| frame.starts_with('<')).count(), 4);
}

#[tokio::test]
async fn interrupted_transfer_restarts_on_next_open() {
    let mut harness = Harness::new(SessionConfig::default()).started("room").await;
    let channel = harness.outbound_channel();
    channel.open();
    harness.settle().await;

    harness
        .controller
        .send_file(Arc::new(MemoryFile::new("resume.bin", patterned(40_000))))
        .await
        .expect("queue");
    harness.controller.dispatch_next().await;
    harness.controller.dispatch_next().await;
    channel.drop_connection();
    harness.settle().await;
    assert!(
        harness
            .drain_events()
            .iter()
            .any(|event| matches!(event, SessionEvent::Notice(SessionError::Channel(_))))
    );

    channel.clear_sent();
    channel.open();
    harness.settle().await;
    assert_eq!(
        frames(&channel.sent()),
        vec![
            r#"{"fileStart":"resume.bin","size":40000}"#.to_string(),
            "<16384>".into(),
            "<16384>".into(),
            "<7232>".into(),
            r#"{"fileEnd":"resume.bin"}"#.into(),
        ]
    );
}

#[tokio::test]
async fn transfer_between_two_paired_channels() {
    let config = SessionConfig::default();
    let (mut sender, send_chan, _sender_events) = open_manager(&config).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut receiver = ChannelManager::new(&config, tx);
    let recv_chan = MockChannel::new("chat");
    receiver.attach(7, recv_chan.clone());

    sender
        .send_file(Arc::new(MemoryFile::new("doc.pdf", patterned(33_000))))
        .expect("queue");
    pump_all(&mut sender).await;

    for frame in send_chan.sent() {
        let payload = match frame {
            Sent::Text(text) => ChannelPayload::Text(text),
            Sent::Binary(data) => ChannelPayload::Binary(data),
        };
        receiver.on_message(7, payload).await;
    }
    let ChatPayload::File(file) = &receiver.history()[0].payload else {
        panic!("expected a file");
    };
    assert_eq!(file.blob.as_ref(), Some(&patterned(33_000)));
}
