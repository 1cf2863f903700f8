//! Protocol module containing the JSON wire message types.

pub mod messages;

pub use messages::*;
