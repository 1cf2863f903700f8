//! Domain layer for airinput-server.
//!
//! Pure configuration types with no I/O.  Message types and the segmentation
//! rules live in `airinput-core`; this layer only adds what is specific to
//! running the relay as a server.

pub mod config;

pub use config::ServerConfig;
