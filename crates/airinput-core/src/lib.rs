//! # airinput-core
//!
//! Shared library for AirInput containing the JSON wire messages and the
//! content segmentation engine.
//!
//! AirInput relays text typed on a phone, over the local network, to a
//! desktop browser page in near-real time, and arranges the incoming stream
//! into readable "cards".
//!
//! This crate is the runtime-free foundation used by the relay server:
//!
//! - **`protocol`** – The `{type, data}` JSON messages pushed to every client
//!   and received from the phone.
//!
//! - **`domain`** – The [`ContentAggregator`] that buffers text and decides
//!   how it becomes cards, the [`SegmentationModeController`], and the
//!   local/remote [`Origin`] classification.
//!
//! It has no dependency on sockets, HTTP, or an async runtime.

pub mod domain;
pub mod protocol;

pub use domain::aggregator::{
    clean_leading_punctuation, is_content_meaningful, split_by_chars, AggregatorConfig,
    ContentAggregator,
};
pub use domain::mode::{ModeParseError, SegmentationMode, SegmentationModeController};
pub use domain::origin::Origin;
pub use protocol::messages::{Message, MessageError, MessageKind};
