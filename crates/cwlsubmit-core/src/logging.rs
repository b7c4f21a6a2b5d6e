use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use chrono::Local;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "cwlsubmit_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<u8> for LogLevel {
    fn from(val: u8) -> Self {
        match val {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

static DEFAULT_LOG_LEVEL: Mutex<LogLevel> = Mutex::new(LogLevel::Info);

pub fn set_log_level(level: LogLevel) {
    if let Ok(mut default_level) = DEFAULT_LOG_LEVEL.lock() {
        *default_level = level;
    }
}

/// `-v` selects debug, `-vv` and above select trace.
pub fn set_log_level_from_verbosity(verbose: u8) {
    if verbose > 0 {
        set_log_level(LogLevel::from(LogLevel::Info as u8 + verbose));
    }
}

pub fn set_log_level_from_env() {
    if let Ok(level) = env::var("CWLSUBMIT_LOG_LEVEL") {
        match level.to_uppercase().as_str() {
            "TRACE" => set_log_level(LogLevel::Trace),
            "DEBUG" => set_log_level(LogLevel::Debug),
            "INFO" => set_log_level(LogLevel::Info),
            "WARN" => set_log_level(LogLevel::Warn),
            "ERROR" => set_log_level(LogLevel::Error),
            _ => {}
        }
    }
}

fn get_default_log_level() -> Level {
    DEFAULT_LOG_LEVEL
        .lock()
        .map(|level| (*level).into())
        .unwrap_or(Level::INFO)
}

struct LocalClock;

impl FormatTime for LocalClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn log_file_date(path: &Path) -> Option<SystemTime> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let date_part = name.strip_prefix(LOG_PREFIX)?.split('_').next()?.to_string();
    let date = chrono::NaiveDate::parse_from_str(&date_part, "%Y-%m-%d").ok()?;
    let local = date
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()?;
    Some(SystemTime::from(local))
}

fn session_logs(log_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut logs: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
        })
        .collect();
    // Names embed the start time, so lexical order is chronological.
    logs.sort();
    Ok(logs)
}

/// Removes session logs older than `max_age_days`, then the oldest logs
/// beyond `max_files`. A zero limit disables that rule.
fn rotate_logs(log_dir: &Path, config: &LoggingConfig) -> Result<(), ConfigError> {
    fs::create_dir_all(log_dir)?;
    let mut logs = session_logs(log_dir)?;

    if config.max_age_days > 0 {
        let cutoff = Duration::from_secs(config.max_age_days * 24 * 60 * 60);
        let now = SystemTime::now();
        let (expired, kept): (Vec<PathBuf>, Vec<PathBuf>) = logs.into_iter().partition(|path| {
            log_file_date(path)
                .and_then(|started| now.duration_since(started).ok())
                .is_some_and(|age| age > cutoff)
        });
        for path in expired {
            let _ = fs::remove_file(path);
        }
        logs = kept;
    }

    if config.max_files > 0 {
        let excess = logs.len().saturating_sub(config.max_files);
        for path in &logs[..excess] {
            let _ = fs::remove_file(path);
        }
    }

    Ok(())
}

fn level_filter_str(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

fn init_tracing_subscriber(log_path: &Path, tee_stderr: bool) -> Result<(), ConfigError> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| ConfigError::PathIo {
            path: log_path.to_path_buf(),
            source,
        })?;

    let level_str = level_filter_str(get_default_log_level());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level_str))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .event_format(SessionFormatter);
    let stderr_layer = tee_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .event_format(SessionFormatter)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ConfigError::General(format!("Logger already initialized: {}", e)))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "session log started");

    Ok(())
}

struct SessionFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for SessionFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        LocalClock.format_time(&mut writer)?;
        write!(writer, " {:>5} {}", metadata.level(), metadata.target())?;
        if let Some(line) = metadata.line() {
            write!(writer, ":{}", line)?;
        }
        write!(writer, " | ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Starts a per-invocation log file under the XDG cache directory and points
/// the `cwlsubmit.log` symlink at it.
pub fn init_session_logger(config: &LoggingConfig, tee_stderr: bool) -> Result<(), ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cwlsubmit");
    let cache_home = xdg_dirs
        .get_cache_home()
        .ok_or(ConfigError::HomeDirectoryNotFound)?;
    let logs_dir = cache_home.join("logs");

    rotate_logs(&logs_dir, config)?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let pid = std::process::id();
    let filename = format!("{}{}_{}.log", LOG_PREFIX, timestamp, pid);
    let log_path = logs_dir.join(&filename);

    init_tracing_subscriber(&log_path, tee_stderr)?;

    let symlink_path = cache_home.join("cwlsubmit.log");
    let _ = fs::remove_file(&symlink_path);
    #[cfg(unix)]
    {
        use std::os::unix::fs::symlink;
        let target = Path::new("logs").join(filename);
        let _ = symlink(&target, &symlink_path);
    }

    Ok(())
}

pub fn init_stderr_logger() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_filter_str(get_default_log_level())));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_timer(LocalClock)
        .with_ansi(true)
        .with_target(false)
        .with_level(true)
        .try_init();
}

fn shell_quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("'{}'", arg)
    } else {
        arg.to_string()
    }
}

fn format_command_for_display(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| shell_quote(&part.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Logs a host command line at debug level before it is spawned.
pub fn log_and_print_command(command: &Command) {
    tracing::debug!(command = %format_command_for_display(command), "running host command");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_rotate_logs_max_files() {
        let dir = tempdir().unwrap();
        let path = dir.path();

        let filenames = vec![
            "cwlsubmit_2023-01-01_10-00-00_1.log",
            "cwlsubmit_2023-01-02_10-00-00_1.log",
            "cwlsubmit_2023-01-03_10-00-00_1.log",
            "cwlsubmit_2023-01-04_10-00-00_1.log",
        ];

        for name in &filenames {
            File::create(path.join(name)).unwrap();
        }
        File::create(path.join("notes.txt")).unwrap();

        let config = LoggingConfig {
            max_files: 2,
            max_age_days: 0,
        };

        rotate_logs(path, &config).unwrap();

        assert!(!path.join(filenames[0]).exists());
        assert!(!path.join(filenames[1]).exists());
        assert!(path.join(filenames[2]).exists());
        assert!(path.join(filenames[3]).exists());
        assert!(
            path.join("notes.txt").exists(),
            "Non-log file should be preserved"
        );
    }

    #[test]
    fn test_rotate_logs_max_age() {
        let dir = tempdir().unwrap();
        let path = dir.path();

        let now = Local::now();
        let fmt = "%Y-%m-%d";
        let name_now = format!("cwlsubmit_{}_10-00-00_1.log", now.format(fmt));
        let name_old = format!(
            "cwlsubmit_{}_10-00-00_1.log",
            (now - ChronoDuration::days(9)).format(fmt)
        );

        File::create(path.join(&name_now)).unwrap();
        File::create(path.join(&name_old)).unwrap();

        let config = LoggingConfig {
            max_files: 0,
            max_age_days: 7,
        };

        rotate_logs(path, &config).unwrap();

        assert!(path.join(&name_now).exists(), "Current file should exist");
        assert!(!path.join(&name_old).exists(), "Old file should be deleted");
    }

    #[test]
    fn test_verbosity_maps_to_levels() {
        assert_eq!(LogLevel::from(LogLevel::Info as u8 + 1), LogLevel::Debug);
        assert_eq!(LogLevel::from(LogLevel::Info as u8 + 5), LogLevel::Trace);
    }

    #[test]
    fn test_format_command_quotes_whitespace() {
        let mut cmd = Command::new("docker");
        cmd.arg("save").arg("my image").arg("");
        assert_eq!(format_command_for_display(&cmd), "docker save 'my image' ''");
    }
}
