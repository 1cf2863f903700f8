//! Infrastructure layer for airinput-server.
//!
//! The infrastructure layer handles all I/O and every long-running task.
//!
//! # Responsibilities
//!
//! - Running the hub task that owns the connection registry
//! - Turning each registered connection into an SSE event stream
//! - Binding the HTTP listener (with port retry) and routing requests
//! - Ticking continuous-mode segmentation
//! - Loading the TOML config file
//! - The ordered graceful shutdown
//!
//! # What does NOT belong here?
//!
//! - Admission and backpressure rules (that is the application layer)
//! - Text cleaning and card splitting (that is `airinput-core`)

pub mod config_file;
pub mod http_server;
pub mod hub;
pub mod segment_timer;
pub mod send_loop;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{load_config, ConfigError, FileConfig};
pub use http_server::{router, ApiError, AppState, RelayServer, ServerError};
pub use hub::{spawn_hub, HubError, HubHandle, Registration, UnregisterGuard};
