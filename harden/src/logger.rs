//! Logger setup for the `harden` binary.
//!
//! `RUST_LOG` is honoured unless a level is forced from the command line.

use env_logger::{Builder, Env};
use log::LevelFilter;

/// Initializes `env_logger`. `Some(level)` overrides `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger(level: Option<LevelFilter>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_timestamp_secs();
    let _ = builder.try_init();
}

/// The forced level for a run: `--quiet` silences everything, debug level 1
/// turns on debug output, otherwise `RUST_LOG` decides.
pub fn level_for(quiet: bool, debug_level: u8) -> Option<LevelFilter> {
    if quiet {
        Some(LevelFilter::Off)
    } else if debug_level >= 1 {
        Some(LevelFilter::Debug)
    } else {
        None
    }
}
