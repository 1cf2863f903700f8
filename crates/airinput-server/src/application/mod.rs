//! Application layer for airinput-server.
//!
//! The application layer holds the relay's rules: it knows *what* to do, but
//! delegates *how* to do it to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - The connection lifecycle and the client registry (exclusivity,
//!   backpressure, derived notifications)
//! - The relay workflows: inbound text, segmentation requests, mode changes,
//!   and the idle tick
//!
//! # What does NOT belong here?
//!
//! - Spawning the hub task or binding sockets (that is infrastructure)
//! - HTTP status codes and SSE framing (handled by axum in infrastructure)

pub mod connection;
pub mod registry;
pub mod relay_service;

pub use connection::{ClientConnection, ConnectionId, ConnectionState, Subscription};
pub use registry::{AdmissionError, ConnectionRegistry, HubListener, LoggingListener};
pub use relay_service::{Broadcaster, InboundOutcome, RelayService};
