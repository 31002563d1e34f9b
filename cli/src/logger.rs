use console::Style;
use log::{Level, LevelFilter, Metadata, Record};

/// Writes library log records to stderr.
struct StderrLogger;

static STDERR_LOGGER: StderrLogger = StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(
        &self,
        metadata: &Metadata<'_>,
    ) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(
        &self,
        record: &Record<'_>,
    ) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let style = match record.level() {
            Level::Error => Style::new().red().bold(),
            Level::Warn => Style::new().yellow(),
            Level::Info => Style::new().green(),
            Level::Debug | Level::Trace => Style::new().dim(),
        };
        eprintln!("{} {}: {}", style.apply_to(record.level()), record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Maps the number of `--verbose` flags to a level filter.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the stderr logger. Later calls keep the first logger.
pub fn init(verbosity: u8) {
    let _ = log::set_logger(&STDERR_LOGGER).map(|_| log::set_max_level(level_for_verbosity(verbosity)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Warn);
        assert_eq!(level_for_verbosity(2), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(7), LevelFilter::Trace);
    }
}
