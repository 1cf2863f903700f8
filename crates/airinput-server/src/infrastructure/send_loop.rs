//! Per-connection send loop, expressed as an SSE event stream.
//!
//! axum drives the stream: every item it yields is written to the client as
//! one framed event and flushed.  The stream emits, in order:
//!
//! 1. one `connected` event carrying `{"id": ..., "ip": ...}`;
//! 2. then, whichever comes first, repeatedly:
//!    - the close signal: the stream ends,
//!    - a queued [`Message`]: one `message` event with the wire JSON,
//!    - the heartbeat tick: one `heartbeat` event with data `{}`.
//!
//! The stream owns the connection's [`UnregisterGuard`], so when it is
//! dropped (the client went away, the hub closed the connection, or the
//! server is shutting down) the hub is told to remove the connection.

use std::convert::Infallible;
use std::time::Duration;

use airinput_core::{protocol::ConnectedPayload, Message};
use axum::response::sse::Event;
use futures_util::stream::{self, Stream};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::application::connection::Subscription;
use crate::infrastructure::hub::{Registration, UnregisterGuard};

/// SSE event name for queued messages.
pub const MESSAGE_EVENT: &str = "message";
/// SSE event name for the greeting.
pub const CONNECTED_EVENT: &str = "connected";
/// SSE event name for keepalives.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

struct LoopState {
    sub: Subscription,
    heartbeat: Interval,
    greeted: bool,
    _guard: UnregisterGuard,
}

/// Builds the event stream for one registered connection.
///
/// Must be called from within a Tokio runtime (the heartbeat timer is created
/// immediately).  The first heartbeat fires one full `heartbeat_every` after
/// the call.
pub fn event_stream(
    registration: Registration,
    heartbeat_every: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    // A zero period would make `interval_at` panic.
    let period = heartbeat_every.max(Duration::from_millis(1));
    let mut heartbeat = time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (sub, guard) = registration.into_parts();
    let state = LoopState {
        sub,
        _guard: guard,
        heartbeat,
        greeted: false,
    };

    stream::unfold(state, |mut st| async move {
        if !st.greeted {
            st.greeted = true;
            return Some((Ok::<_, Infallible>(connected_event(&st.sub)), st));
        }

        loop {
            let event = tokio::select! {
                biased;

                _ = st.sub.closed.cancelled() => {
                    debug!("{}: close signal received", st.sub.id);
                    return None;
                }

                queued = st.sub.outbox.recv() => match queued {
                    Some(message) if st.sub.is_active() => message_event(&message),
                    _ => return None,
                },

                _ = st.heartbeat.tick() => {
                    Some(Event::default().event(HEARTBEAT_EVENT).data("{}"))
                }
            };

            // A message that failed to serialize is skipped, not fatal.
            if let Some(event) = event {
                return Some((Ok::<_, Infallible>(event), st));
            }
        }
    })
}

fn connected_event(sub: &Subscription) -> Event {
    let payload = ConnectedPayload {
        id: sub.id.to_string(),
        ip: sub.client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
    };
    // Two plain strings always serialize.
    let data = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(CONNECTED_EVENT).data(data)
}

fn message_event(message: &Message) -> Option<Event> {
    match message.to_json() {
        Ok(json) => Some(Event::default().event(MESSAGE_EVENT).data(json)),
        Err(e) => {
            warn!("skipping {} message: {e}", message.kind());
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::HubListener;
    use crate::infrastructure::hub::{spawn_hub, HubHandle};
    use airinput_core::Origin;
    use futures_util::StreamExt;
    use std::sync::Arc;

    struct QuietListener;

    impl HubListener for QuietListener {
        fn local_count_changed(&self, _count: usize) {}
    }

    fn start_hub() -> HubHandle {
        spawn_hub(8, 16, Arc::new(QuietListener)).0
    }

    #[tokio::test]
    async fn test_stream_starts_with_connected_event() {
        let hub = start_hub();
        let sub = hub.register(Origin::Local, None).await.unwrap();
        let mut events = Box::pin(event_stream(sub, Duration::from_secs(60)));

        assert!(events.next().await.is_some());
    }

    #[tokio::test]
    async fn test_stream_ends_when_hub_closes_connection() {
        // Arrange
        let hub = start_hub();
        let sub = hub.register(Origin::Local, None).await.unwrap();
        let mut events = Box::pin(event_stream(sub, Duration::from_secs(60)));
        events.next().await; // connected

        // Act
        hub.close_all().await;

        // Assert
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_broadcast_messages() {
        let hub = start_hub();
        let sub = hub.register(Origin::Local, None).await.unwrap();
        let mut events = Box::pin(event_stream(sub, Duration::from_secs(60)));
        events.next().await; // connected

        hub.broadcast(Message::card("hi")).await;

        let next = time::timeout(Duration::from_secs(1), events.next()).await;
        assert!(matches!(next, Ok(Some(Ok(_)))));
    }

    #[tokio::test]
    async fn test_stream_emits_heartbeat_when_idle() {
        let hub = start_hub();
        let sub = hub.register(Origin::Local, None).await.unwrap();
        let mut events = Box::pin(event_stream(sub, Duration::from_millis(10)));
        events.next().await; // connected

        let next = time::timeout(Duration::from_secs(1), events.next()).await;
        assert!(matches!(next, Ok(Some(Ok(_)))));
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters_connection() {
        let hub = start_hub();
        let sub = hub.register(Origin::Remote, None).await.unwrap();
        let events = event_stream(sub, Duration::from_secs(60));

        drop(events);

        assert_eq!(hub.stats().await.unwrap().total, 0);
        assert!(hub.register(Origin::Remote, None).await.is_ok());
    }
}
