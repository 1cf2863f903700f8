//! RelayService: the workflows that connect typed text, segmentation, and
//! the segmentation mode to the broadcast hub.
//!
//! Each public method corresponds to one request the outside world can make:
//!
//! | Trigger                       | Method                       | Broadcasts                        |
//! |-------------------------------|------------------------------|-----------------------------------|
//! | device pushes a text delta    | [`handle_inbound`]           | `text` (full buffer)              |
//! | device asks for a card        | [`handle_segment_request`]   | `card`…, `clear_input`            |
//! | client queries the mode       | [`query_mode`]               | `mode_sync`                       |
//! | client changes the mode       | [`change_mode`]              | `clear_input`, `mode_ack`         |
//! | idle timer fires (continuous) | [`tick`]                     | `segment`…, `mode_sync`           |
//!
//! # Architecture
//!
//! The service depends only on the [`Broadcaster`] trait and the domain types
//! from `airinput-core`.  The hub handle implements `Broadcaster` in
//! production; tests inject a recording double.
//!
//! [`handle_inbound`]: RelayService::handle_inbound
//! [`handle_segment_request`]: RelayService::handle_segment_request
//! [`query_mode`]: RelayService::query_mode
//! [`change_mode`]: RelayService::change_mode
//! [`tick`]: RelayService::tick

use std::sync::Arc;

use airinput_core::{
    ContentAggregator, Message, MessageKind, SegmentationMode, SegmentationModeController,
};
use async_trait::async_trait;
use tracing::{debug, info};

/// Delivers a message to every connected client.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, message: Message);
}

/// What happened to an inbound push message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Heartbeat or empty payload; acknowledged with no side effect.
    Ignored,
    /// Appended to the buffer and rebroadcast.
    Forwarded,
}

/// Relay workflows over a shared aggregator and mode controller.
pub struct RelayService {
    aggregator: Arc<ContentAggregator>,
    mode: Arc<SegmentationModeController>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl RelayService {
    pub fn new(
        aggregator: Arc<ContentAggregator>,
        mode: Arc<SegmentationModeController>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            aggregator,
            mode,
            broadcaster,
        }
    }

    pub fn mode(&self) -> SegmentationMode {
        self.mode.mode()
    }

    pub fn history(&self) -> Vec<String> {
        self.aggregator.history()
    }

    pub fn current_content(&self) -> String {
        self.aggregator.current_content()
    }

    /// Handles one pushed message from a device.
    ///
    /// Any non-heartbeat kind with a non-empty payload is treated as a text
    /// delta: it is appended, and the *whole* buffer is rebroadcast as `text`
    /// so a desktop that joined mid-utterance still shows everything.
    pub async fn handle_inbound(&self, message: Message) -> InboundOutcome {
        if message.kind() == MessageKind::Heartbeat || message.data().is_empty() {
            return InboundOutcome::Ignored;
        }

        self.aggregator.update_content(message.data());
        let full = self.aggregator.current_content();
        debug!("buffer now {} chars", full.chars().count());
        if !full.is_empty() {
            self.broadcaster.broadcast(Message::text(full)).await;
        }
        InboundOutcome::Forwarded
    }

    /// Handles a device-driven segmentation request.
    ///
    /// Every produced card is broadcast as `card`, in order, followed by one
    /// `clear_input`.  Aggregator state is then cleared.  Returns the
    /// produced cards (empty when the content was filtered).
    pub async fn handle_segment_request(&self, content: &str) -> Vec<String> {
        // A device that asks for cards is driving segmentation.
        self.mode.set(SegmentationMode::Single);

        let cards = self.aggregator.add_card(content);
        if cards.is_empty() {
            debug!("segment request filtered: {content:?}");
            self.aggregator.clear();
            return cards;
        }

        for card in &cards {
            self.broadcaster.broadcast(Message::card(card.clone())).await;
        }
        self.broadcaster.broadcast(Message::clear_input()).await;
        self.aggregator.clear();

        info!("segment (device-driven): {} card(s)", cards.len());
        cards
    }

    /// Broadcasts the current mode as `mode_sync` and returns it.
    pub async fn query_mode(&self) -> SegmentationMode {
        let mode = self.mode.mode();
        self.broadcaster.broadcast(Message::mode_sync(mode.as_str())).await;
        debug!("mode queried: {mode}");
        mode
    }

    /// Switches the segmentation mode.
    ///
    /// Accumulated text is discarded first so the two policies never mix
    /// within one card; every client is told to clear its input and then
    /// receives `mode_ack` carrying the new mode.
    pub async fn change_mode(&self, requested: SegmentationMode) {
        self.aggregator.clear();
        self.broadcaster.broadcast(Message::clear_input()).await;

        let previous = self.mode.set(requested);
        info!("segmentation mode: {previous} -> {requested}");

        self.broadcaster
            .broadcast(Message::mode_ack(requested.as_str()))
            .await;
    }

    /// One idle-timer tick.
    ///
    /// In continuous mode, an idle buffer becomes one or more `segment`
    /// broadcasts followed by a `mode_sync`.  In single mode this is a no-op.
    pub async fn tick(&self) -> Vec<String> {
        if !self.mode.is_timer_driven() {
            return Vec::new();
        }

        let cards = self.aggregator.segment_if_idle();
        if cards.is_empty() {
            return cards;
        }

        for card in &cards {
            self.broadcaster.broadcast(Message::segment(card.clone())).await;
        }
        self.broadcaster
            .broadcast(Message::mode_sync(self.mode.mode().as_str()))
            .await;

        info!("segment (timer-driven): {} card(s)", cards.len());
        cards
    }

    /// Discards all accumulated text.  Called on shutdown.
    pub fn shutdown(&self) {
        self.aggregator.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
