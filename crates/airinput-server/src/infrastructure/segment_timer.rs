//! Periodic idle check that drives continuous-mode segmentation.
//!
//! The timer always runs; [`RelayService::tick`] decides whether the current
//! mode is timer-driven.  Switching modes therefore never starts or stops a
//! task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::relay_service::RelayService;

/// Spawns the ticker.  It stops when `stop` is cancelled.
pub fn spawn_segment_timer(
    relay: Arc<RelayService>,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    relay.tick().await;
                }
            }
        }
        debug!("segment timer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::relay_service::Broadcaster;
    use airinput_core::{
        AggregatorConfig, ContentAggregator, Message, SegmentationMode,
        SegmentationModeController,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast(&self, message: Message) {
            self.sent.lock().unwrap().push(message);
        }
    }

    fn relay(mode: SegmentationMode, rec: Arc<RecordingBroadcaster>) -> Arc<RelayService> {
        Arc::new(RelayService::new(
            Arc::new(ContentAggregator::new(AggregatorConfig {
                segment_interval: Duration::from_millis(5),
                ..AggregatorConfig::default()
            })),
            Arc::new(SegmentationModeController::new(mode)),
            rec,
        ))
    }

    #[tokio::test]
    async fn test_timer_segments_idle_buffer_in_continuous_mode() {
        // Arrange
        let rec = Arc::new(RecordingBroadcaster::default());
        let relay = relay(SegmentationMode::Continuous, rec.clone());
        relay.handle_inbound(Message::text("idle words")).await;
        let stop = CancellationToken::new();

        // Act
        let task = spawn_segment_timer(relay.clone(), Duration::from_millis(2), stop.clone());
        time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
        task.await.unwrap();

        // Assert
        let sent = rec.sent.lock().unwrap().clone();
        assert!(sent.contains(&Message::segment("idle words")), "got {sent:?}");
        assert_eq!(relay.history(), vec!["idle words"]);
    }

    #[tokio::test]
    async fn test_timer_leaves_single_mode_buffer_alone() {
        let rec = Arc::new(RecordingBroadcaster::default());
        let relay = relay(SegmentationMode::Single, rec.clone());
        relay.handle_inbound(Message::text("waiting")).await;
        let stop = CancellationToken::new();

        let task = spawn_segment_timer(relay.clone(), Duration::from_millis(2), stop.clone());
        time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
        task.await.unwrap();

        assert_eq!(relay.current_content(), "waiting");
        assert!(relay.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_timer_exits() {
        let rec = Arc::new(RecordingBroadcaster::default());
        let stop = CancellationToken::new();
        stop.cancel();

        let task = spawn_segment_timer(relay(SegmentationMode::Continuous, rec), Duration::from_secs(1), stop);

        assert!(time::timeout(Duration::from_secs(1), task).await.is_ok());
    }
}
