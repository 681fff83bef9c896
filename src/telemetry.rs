//! Internal diagnostics for the agent itself, kept apart from the telemetry
//! it collects about the page.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Wires the `tracing` spans and events emitted across the crate to a file
/// sink.
///
/// Off unless `PAGESCOPE_LOG` names a file path. The agent runs inside the
/// host it observes, so it never writes to the host's own output channels;
/// a side file is the only sink. `RUST_LOG` filters as usual, defaulting
/// to `info`.
pub fn init_tracing() {
    let Some(log_path) = std::env::var("PAGESCOPE_LOG").ok() else {
        return;
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Ok(file) = std::fs::File::create(&log_path) else {
        eprintln!("Warning: could not create diagnostics file: {}", log_path);
        return;
    };

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();
}
