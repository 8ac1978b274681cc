use std::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOGGER: StderrLogger = StderrLogger;

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("{} {}", LevelFormat(record.level()), record.args());
        }
    }

    fn flush(&self) {}
}

pub fn init(level: LevelFilter) {
    // only fails if a logger is already installed
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

struct LevelFormat(Level);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            Level::Trace => 35,
            Level::Debug => 34,
            Level::Info => 32,
            Level::Warn => 33,
            Level::Error => 31,
        };
        let msg = match self.0 {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        };
        write!(f, "\x1B[{color};1m{msg}\x1B[0m")
    }
}
