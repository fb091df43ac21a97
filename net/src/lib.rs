//! Peer-to-peer networking core: wire framing, hash engines, the per-peer
//! state machine, and the connection [`hub::Hub`] tying them together.
//!
//! This crate owns wire protocol mechanics only. It does not maintain a
//! block index, mempool, or address book; those live in the application
//! that implements [`handler::ApplicationHandler`] and constructs a
//! [`hub::Hub`] around its own [`config::Config`].

pub mod clock;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod handler;
pub mod hub;
pub mod peer;
pub mod signal;
pub mod tls;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use handler::ApplicationHandler;
pub use hub::Hub;
