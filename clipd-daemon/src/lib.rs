//! clipd-daemon: ownership protocol engine and daemon event loop
//!
//! The display server is reached only through the [`transport::Transport`]
//! trait; [`engine::Engine`] implements selection ownership, conversion
//! serving, polling with debounce, synchronization and history capture
//! on top of it, and [`daemon`] runs the single-threaded event loop.
//!
//! Chunked incremental transfer (the INCR protocol) is not supported:
//! oversized conversions from peers are dropped and we never offer
//! incremental delivery ourselves.

pub mod daemon;
pub mod engine;
pub mod transport;

pub use engine::Engine;
pub use transport::{Event, SelectionRequest, Transport};
