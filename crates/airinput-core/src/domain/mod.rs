//! Domain entities for AirInput.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no sockets, no async runtime, no HTTP types.
//!
//! - [`aggregator`] turns a stream of typed text into bounded cards.
//! - [`mode`] holds the segmentation policy (device- or timer-driven).
//! - [`origin`] decides whether a connection is the desktop or the phone.
//!
//! Code in outer layers (the hub, the HTTP handlers) depends on these types,
//! but they never depend on the outer layers, so every rule here can be unit
//! tested without starting a server.

pub mod aggregator;
pub mod mode;
pub mod origin;
