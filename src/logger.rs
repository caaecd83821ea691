use std::fmt::Display;
use std::io::Write;

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

/// Environment variable naming the log level (`error` ... `trace`)
pub const LOG_ENV: &str = "FATDISK_LOG";

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}

fn write_with_color(out: &mut impl Write, color: Color, string: impl Display) {
    let string: &dyn Display = match color {
        Color::Default => &string,
        Color::Gray => &string.dimmed(),
        Color::BrightRed => &string.bright_red(),
        Color::BrightYellow => &string.bright_yellow(),
        Color::BrightBlue => &string.bright_blue(),
        Color::BrightCyan => &string.bright_cyan(),
        Color::BrightMagenta => &string.bright_magenta(),
    };
    // Nothing sensible to do if stderr is gone
    let _ = write!(out, "{string}");
}

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = std::io::stderr().lock();
        let level = record.level();
        write_with_color(
            &mut out,
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        let thread = std::thread::current();
        write_with_color(
            &mut out,
            Color::Gray,
            format_args!("[{}] ", thread.name().unwrap_or("worker")),
        );
        write_with_color(&mut out, Color::Default, record.args());
        write_with_color(&mut out, Color::Default, "\n");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Level from `-v` repetitions, overridden by [`LOG_ENV`] when it parses
pub fn level_for(verbosity: u8, env: Option<&str>) -> LevelFilter {
    if let Some(level) = env.and_then(|value| value.parse().ok()) {
        return level;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let env = std::env::var(LOG_ENV).ok();
    log::set_max_level(level_for(verbosity, env.as_deref()));
    log::set_logger(&LOGGER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for(0, None), LevelFilter::Warn);
        assert_eq!(level_for(1, None), LevelFilter::Info);
        assert_eq!(level_for(2, None), LevelFilter::Debug);
        assert_eq!(level_for(9, None), LevelFilter::Trace);
    }

    #[test]
    fn test_env_overrides_verbosity() {
        assert_eq!(level_for(0, Some("debug")), LevelFilter::Debug);
        assert_eq!(level_for(2, Some("off")), LevelFilter::Off);
        assert_eq!(level_for(1, Some("nonsense")), LevelFilter::Info);
    }
}
