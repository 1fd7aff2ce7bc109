//! clipd-core: domain logic shared by the daemon and the CLI
//!
//! Pure, transport-free building blocks: the content digest, the
//! content-processing pipeline with embedded command sequences, the
//! per-selection history log, and the selection registry loaded from
//! configuration.

pub mod config;
pub mod hash;
pub mod history;
pub mod pipeline;
pub mod registry;

pub use config::Config;
pub use hash::hash_bytes;
pub use history::{Compression, HistoryStore, RecordChunk, Visit};
pub use pipeline::{process, CommandFlag, CommandSet, Processed};
pub use registry::{Atom, Ownership, Policy, Registry, Selection, SpecialSelection};
