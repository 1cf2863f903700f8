//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is assembled once at startup from defaults, an optional TOML file, and
//! CLI/environment overrides, then shared (behind an `Arc`) with every task.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the domain) makes the relay easy to embed in tests: a test
//! builds a `ServerConfig` with tiny intervals and runs the real code paths.

use std::net::IpAddr;
use std::time::Duration;

use airinput_core::{AggregatorConfig, SegmentationMode};

/// All runtime configuration for the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.  `0.0.0.0` accepts LAN devices.
    pub bind_addr: IpAddr,

    /// First port tried when binding.
    pub port_start: u16,

    /// Number of consecutive ports tried before giving up.
    pub port_attempts: u16,

    /// Idle time after which continuous mode closes the buffer into a card.
    pub segment_interval: Duration,

    /// Maximum number of cards kept in history.
    pub max_card_count: usize,

    /// Maximum characters per card; longer content is split.
    pub max_card_length: usize,

    /// Capacity of each connection's outbox.  A connection whose outbox is
    /// full when a broadcast arrives is dropped.
    pub outbox_capacity: usize,

    /// Capacity of the hub's command queue.
    pub hub_queue_capacity: usize,

    /// Interval between `heartbeat` events on every stream.
    pub heartbeat_interval: Duration,

    /// How often continuous mode checks whether the buffer has gone idle.
    pub segment_tick: Duration,

    /// Pause after closing all streams, letting send loops observe the
    /// cancellation before the listener is torn down.
    pub shutdown_grace: Duration,

    /// Upper bound on the HTTP graceful shutdown.
    pub shutdown_timeout: Duration,

    /// Segmentation mode at startup.
    pub initial_mode: SegmentationMode,
}

impl ServerConfig {
    /// The aggregator's slice of the configuration.
    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            segment_interval: self.segment_interval,
            max_card_count: self.max_card_count,
            max_card_length: self.max_card_length,
        }
    }
}

impl Default for ServerConfig {
    /// Returns the settings the relay ships with.
    ///
    /// | Field              | Default     |
    /// |--------------------|-------------|
    /// | bind_addr          | `0.0.0.0`   |
    /// | port_start         | 5000        |
    /// | port_attempts      | 100         |
    /// | segment_interval   | 2 s         |
    /// | max_card_count     | 50          |
    /// | max_card_length    | 1000        |
    /// | outbox_capacity    | 256         |
    /// | hub_queue_capacity | 256         |
    /// | heartbeat_interval | 15 s        |
    /// | segment_tick       | 1 s         |
    /// | shutdown_grace     | 50 ms       |
    /// | shutdown_timeout   | 200 ms      |
    /// | initial_mode       | single      |
    fn default() -> Self {
        let aggregator = AggregatorConfig::default();
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port_start: 5000,
            port_attempts: 100,
            segment_interval: aggregator.segment_interval,
            max_card_count: aggregator.max_card_count,
            max_card_length: aggregator.max_card_length,
            outbox_capacity: 256,
            hub_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(15),
            segment_tick: Duration::from_secs(1),
            shutdown_grace: Duration::from_millis(50),
            shutdown_timeout: Duration::from_millis(200),
            initial_mode: SegmentationMode::Single,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
