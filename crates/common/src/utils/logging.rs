//! Tracing subscriber setup shared by every binary in the workspace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// `[logging]` section of the indexer config. Missing keys fall back to
/// [`LoggingConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base filter directive, e.g. `info` or `tally_node=debug,info`
    pub level: String,
    pub format: LogFormat,
    pub console_logging: bool,
    pub file_logging: bool,
    pub log_dir: PathBuf,
    /// File name prefix; a new file starts every day
    pub log_file: String,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            console_logging: true,
            file_logging: false,
            log_dir: PathBuf::from("logs"),
            log_file: "tally.log".to_string(),
            include_target: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer<W>(config: &LoggingConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive until exit, otherwise buffered file output is lost.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = env_filter(&config.level, std::env::var("RUST_LOG").ok().as_deref())?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    if config.console_logging {
        layers.push(output_layer(config, std::io::stdout, true));
    }

    let mut guard = None;
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(&config.log_dir, &config.log_file));
        layers.push(output_layer(config, writer, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init()?;

    tracing::info!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(guard)
}

/// `RUST_LOG` directives are appended, so they refine the configured level.
fn env_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    let directives = match rust_log.filter(|extra| !extra.is_empty()) {
        Some(extra) => format!("{},{}", level, extra),
        None => level.to_string(),
    };
    Ok(EnvFilter::try_new(directives)?)
}
