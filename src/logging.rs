//! Structured logging setup for the testhub binary.
//!
//! The library only emits `tracing` events and never installs a subscriber;
//! whoever embeds it decides where events go. The binary calls [`init`] once:
//! - `RUST_LOG` environment filter support
//! - Default level: `testhub=info`
//! - JSON or human-readable lines on stderr

use tracing_subscriber::EnvFilter;

use crate::config::OutputFormat;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "testhub=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global tracing subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: OutputFormat) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        OutputFormat::Json => {
            let _ = subscriber.json().try_init();
        }
        OutputFormat::Human => {
            let _ = subscriber.try_init();
        }
    }
}
