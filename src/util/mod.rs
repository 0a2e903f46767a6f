//! Utility module
//!
//! Process-wide helpers shared by the binaries built on this library.

use tracing::Level;

/// Installs a plain-text `tracing` subscriber writing to stderr.
///
/// Calling it again once a subscriber is installed has no effect.
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

/// Parses a log level name such as `info` or `DEBUG`
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}
