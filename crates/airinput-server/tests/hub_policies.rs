//! Integration tests for the hub's admission and delivery policies through
//! the public `HubHandle` API.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use airinput_core::{Message, Origin};
use airinput_server::application::HubListener;
use airinput_server::infrastructure::{spawn_hub, HubError};

#[derive(Default)]
struct RecordingListener {
    counts: Mutex<Vec<usize>>,
}

impl HubListener for RecordingListener {
    fn local_count_changed(&self, count: usize) {
        self.counts.lock().unwrap().push(count);
    }
}

fn lan(last: u8) -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last)))
}

#[tokio::test]
async fn test_desk_and_phone_share_cards_and_phone_slot_is_reusable() {
    // Arrange
    let listener = Arc::new(RecordingListener::default());
    let (hub, _task) = spawn_hub(16, 32, listener.clone());

    let mut desk = hub.register(Origin::Local, None).await.unwrap();
    let mut phone = hub.register(Origin::Remote, lan(20)).await.unwrap();

    // Act: a second phone is turned away, a card reaches both.
    let busy = hub.register(Origin::Remote, lan(21)).await;
    hub.broadcast(Message::card("hello")).await;
    hub.unregister(phone.id).await;
    let again = hub.register(Origin::Remote, lan(21)).await;

    // Assert
    assert!(matches!(busy, Err(HubError::Rejected(_))));
    assert!(again.is_ok());

    let desk_saw: Vec<Message> = std::iter::from_fn(|| desk.outbox.try_recv().ok()).collect();
    assert_eq!(
        desk_saw,
        vec![
            Message::show_code(false),
            Message::card("hello"),
            Message::show_code(true),
            Message::show_code(false),
        ]
    );
    assert_eq!(phone.outbox.try_recv().unwrap(), Message::show_code(false));
    assert_eq!(phone.outbox.try_recv().unwrap(), Message::card("hello"));
    assert!(!phone.is_active());
    assert_eq!(*listener.counts.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_stalled_desk_is_dropped_without_blocking_others() {
    // Arrange: outboxes hold 2 messages.
    let (hub, _task) = spawn_hub(2, 32, Arc::new(RecordingListener::default()));
    let stalled = hub.register(Origin::Local, None).await.unwrap();
    let mut live = hub.register(Origin::Local, None).await.unwrap();

    // Act
    for i in 0..3 {
        hub.broadcast(Message::text(format!("t{i}"))).await;
        hub.stats().await.unwrap();
        // The live consumer keeps up; the stalled one never reads.
        while live.outbox.try_recv().is_ok() {}
    }

    // Assert
    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.local, 1);
    assert!(!stalled.is_active());
    assert!(stalled.closed.is_cancelled());
    assert!(live.is_active());
}

#[tokio::test]
async fn test_each_connection_sees_broadcasts_in_order() {
    let (hub, _task) = spawn_hub(64, 64, Arc::new(RecordingListener::default()));
    let mut a = hub.register(Origin::Local, None).await.unwrap();
    let mut b = hub.register(Origin::Local, None).await.unwrap();

    for i in 0..20 {
        hub.broadcast(Message::text(i.to_string())).await;
    }
    hub.stats().await.unwrap();

    for sub in [&mut a, &mut b] {
        let seen: Vec<String> = std::iter::from_fn(|| sub.outbox.try_recv().ok())
            .map(|m| m.data().to_string())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_phones_admit_exactly_one() {
    // Arrange
    let (hub, _task) = spawn_hub(16, 64, Arc::new(RecordingListener::default()));

    // Act
    let attempts: Vec<_> = (0..32u8)
        .map(|i| {
            let hub = hub.clone();
            tokio::spawn(async move { hub.register(Origin::Remote, lan(100 + i)).await })
        })
        .collect();

    let mut admitted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(phone) => admitted.push(phone),
            Err(HubError::Rejected(_)) => rejected += 1,
            Err(other) => panic!("unexpected hub error: {other}"),
        }
    }

    // Assert
    assert_eq!(admitted.len(), 1);
    assert_eq!(rejected, 31);
    assert_eq!(hub.stats().await.unwrap().remote, 1);
}
