//! airinput-server library crate.
//!
//! This crate is the LAN relay: phones push typed text over HTTP, and every
//! connected page receives it (and the cards cut from it) over a
//! Server-Sent Events stream.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Phone (POST JSON)          Desktop page (SSE)
//!         ↘                    ↗
//! [airinput-server]
//!   ├── domain/           ServerConfig
//!   ├── application/      Connections, registry policies, relay workflows
//!   └── infrastructure/
//!         ├── hub/           The task that owns the registry
//!         ├── send_loop/     Per-connection SSE stream
//!         ├── http_server/   axum router, port retry, shutdown
//!         ├── segment_timer/ Continuous-mode idle ticker
//!         └── config_file/   TOML loading
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `airinput-core`, and channel types;
//!   it never touches a socket.
//! - `infrastructure` depends on all other layers plus `axum` and `tokio`.
//!
//! # For beginners: why this structure?
//!
//! The exclusivity and backpressure rules live in a plain struct
//! (`ConnectionRegistry`) that tests can drive one call at a time, with no
//! network and no timing.  The hub task only adds the "one owner, one queue"
//! discipline around it, and axum only adds HTTP framing.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: connection lifecycle, registry, relay workflows.
pub mod application;

/// Infrastructure layer: hub task, SSE streams, HTTP server, timers.
pub mod infrastructure;
