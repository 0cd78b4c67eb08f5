//! Tracing subscriber setup: an `EnvFilter` over a stdout layer and an
//! optional rolling log file.

use std::path::Path;

use ovs_agent_common::{AgentError, AgentResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogRotation, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer flushing; dropping it flushes and stops the
/// background thread.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Opens the configured log file, creating its directory if needed.
pub fn file_appender(config: &LoggingConfig) -> AgentResult<Option<RollingFileAppender>> {
    let Some(path) = &config.file else {
        return Ok(None);
    };
    let prefix = path
        .file_name()
        .ok_or_else(|| AgentError::config("logging.file", "path does not name a file"))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(prefix.to_string_lossy());
    if config.max_files > 0 {
        builder = builder.max_log_files(config.max_files);
    }
    builder
        .build(dir)
        .map(Some)
        .map_err(|e| AgentError::config("logging.file", format!("{}: {e}", path.display())))
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(ansi);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

fn level_filter(level: &str) -> AgentResult<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| AgentError::config("logging.level", e.to_string()))
}

/// Installs the global subscriber. `RUST_LOG` wins over `config.level`.
pub fn init(config: &LoggingConfig) -> AgentResult<LogGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = LogGuard { _file: None };

    if let Some(appender) = file_appender(config)? {
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(config.format, writer, false));
        guard._file = Some(file_guard);
    }
    if config.to_stdout || layers.is_empty() {
        layers.push(fmt_layer(config.format, std::io::stdout, true));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| AgentError::config("logging", e.to_string()))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_config(path: &Path, rotation: LogRotation) -> LoggingConfig {
        LoggingConfig {
            file: Some(path.to_path_buf()),
            rotation,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_file_configured() {
        assert!(file_appender(&LoggingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("agent.log");

        let mut appender = file_appender(&file_config(&path, LogRotation::Never))
            .unwrap()
            .unwrap();
        writeln!(appender, "hello").unwrap();
        appender.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[test]
    fn test_rotated_file_gets_date_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");

        let mut appender = file_appender(&file_config(&path, LogRotation::Daily))
            .unwrap()
            .unwrap();
        writeln!(appender, "hello").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("agent.log."), "{names:?}");
    }

    #[test]
    fn test_level_filter() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("warn,ovs_agentd=debug").is_ok());

        let err = level_filter("ovs_agentd=notalevel").unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }), "{err}");
    }
}
