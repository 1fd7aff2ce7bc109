//! Shared utilities for clipd
//!
//! Provides the unified error type, XDG path helpers, logging setup
//! and the single-instance lock used by the daemon and the CLI.

pub mod error;
pub mod lock;
pub mod logging;
pub mod paths;

pub use error::{ClipdError, Result};
pub use lock::InstanceLock;
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
