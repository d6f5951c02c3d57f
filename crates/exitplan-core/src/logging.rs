//! Logging setup for binaries embedding a plan

use std::io::IsTerminal;

/// Padded label for a log level, with ANSI color when `color` is set.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

fn default_level(quiet: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize `env_logger`; `RUST_LOG` overrides the level picked from flags.
///
/// TTY: colored level labels. Non-TTY: plain `[LEVEL] msg` lines for log
/// aggregation.
pub fn init_logging(quiet: bool, debug: bool) {
    use std::io::Write;

    let color = std::io::stderr().is_terminal();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level(quiet, debug)),
    )
    .format(move |buf, record| {
        let (pre, label, post) = level_style(record.level(), color);
        if color {
            let ts = buf.timestamp_millis();
            writeln!(buf, "{ts} [{pre}{label}{post}] {}", record.args())
        } else {
            writeln!(buf, "[{label}] {}", record.args())
        }
    })
    .init();
}
