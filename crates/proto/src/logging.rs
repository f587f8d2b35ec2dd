//! Shared logging setup. Every component takes an injected [`Logger`]
//! rather than reaching for a process-global one, so unit tests can pass in
//! a discarding logger and the daemon binary can wire one terminal sink.

pub use slog::{debug, error, info, o, trace, warn, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a terminal-sink logger at the given verbosity.
///
/// `verbosity` follows the CLI's repeated `-v` convention: `0` is
/// warn-and-above, each additional level drops the threshold by one step
/// down to `3` (trace).
pub fn init(verbosity: u8) -> Logger {
    let severity = match verbosity {
        0 => Severity::Warning,
        1 => Severity::Info,
        2 => Severity::Debug,
        _ => Severity::Trace,
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);
    builder.build().expect("terminal logger always builds")
}

/// A logger that discards everything, for use in tests.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
