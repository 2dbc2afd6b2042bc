//! Logging initialization.
//!
//! The engine emits structured `tracing` events and `metrics` counters
//! throughout; this module wires a subscriber for embedders that do not
//! install their own.

use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Initializes a `tracing-subscriber` for the process.
///
/// Filter directives come from `ENGRAM_LOG` (falling back to `warn` for
/// everything and `info` for this crate). Host applications that install
/// their own subscriber should skip this and the engine's events will flow
/// into it.
///
/// # Errors
///
/// Returns [`Error::Storage`] with operation `logging_init` if a global
/// subscriber is already installed or logging was already initialized.
pub fn init_logging() -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(Error::Storage {
            operation: "logging_init".to_string(),
            cause: "logging already initialized".to_string(),
        });
    }

    let filter = EnvFilter::try_from_env("ENGRAM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn,engram=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Storage {
            operation: "logging_init".to_string(),
            cause: e.to_string(),
        })?;

    let _ = LOGGING_INIT.set(());
    Ok(())
}
