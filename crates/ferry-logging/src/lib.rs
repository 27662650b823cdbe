//! # Ferry Logging
//!
//! Installs the `tracing` subscriber used by Ferry daemons and the simulator.
//!
//! Console lines are JSONL unless [`LogConfig`] asks for the pretty format.
//! Files written through `tracing-appender` are always JSONL. Spans opened
//! while a [`NodeContextGuard`] is live carry that node's endpoint id, which
//! keeps the records of a simulated topology apart in one shared stream.
//!
//! ```ignore
//! use ferry_logging::{FerrySubscriberBuilder, LogConfig};
//!
//! let _guard = FerrySubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{
    ConsoleFormat, ConsoleOutput, FileOutput, JsonFields, LogConfig, RotationStrategy,
};
pub use context::{NodeContextData, NodeContextGuard, NodeKind};
pub use layers::{NodeContextExtension, NodeContextLayer, node_context_of};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::layers::BoxedLayer;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rolling appender error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("global subscriber already set: {0}")]
    AlreadySet(#[from] tracing_subscriber::util::TryInitError),
}

/// Assembles the layer stack described by a [`LogConfig`]
pub struct FerrySubscriberBuilder {
    config: LogConfig,
}

impl FerrySubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_console_format(mut self, format: ConsoleFormat) -> Self {
        self.config.console.format = format;
        self
    }

    pub fn with_file_output(mut self, file: FileOutput) -> Self {
        self.config.file = Some(file);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install as the global default subscriber
    ///
    /// A set RUST_LOG replaces the configured levels. Keep the returned
    /// guard alive for as long as file output is wanted; dropping it flushes
    /// and stops the background writer.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.filter_directives())?,
        };

        let mut stack: Vec<BoxedLayer> = vec![NodeContextLayer::new().boxed()];
        let mut guard = None;

        let console = &self.config.console;
        if console.enabled {
            stack.push(match console.format {
                ConsoleFormat::Pretty => layers::pretty_layer(console.ansi),
                ConsoleFormat::Jsonl => layers::jsonl_layer(std::io::stdout, &self.config.json),
            });
        }

        if let Some(file) = &self.config.file {
            let (writer, file_guard) = file_writer(file)?;
            stack.push(layers::jsonl_layer(writer, &self.config.json));
            guard = Some(file_guard);
        }

        Registry::default().with(stack).with(filter).try_init()?;
        Ok(guard)
    }
}

impl Default for FerrySubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn file_writer(file: &FileOutput) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match file.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&file.directory)?;
            let path = file.directory.join(format!("{}.log", file.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file.prefix)
        .filename_suffix("log")
        .build(&file.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Colored debug output on the console
pub fn init_development() -> Result<(), LoggingError> {
    FerrySubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .map(|_| ())
}

/// Warnings only; keeps whatever subscriber an earlier test installed
pub fn init_testing() {
    let _ = FerrySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_jsonl() {
        let builder = FerrySubscriberBuilder::new();
        assert_eq!(builder.config().level, "info");
        assert!(!builder.config().console.is_pretty());
    }

    #[test]
    fn test_builder_setters() {
        let builder = FerrySubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false)
            .with_console_format(ConsoleFormat::Jsonl);
        assert_eq!(builder.config().level, "trace");
        assert!(!builder.config().console.enabled);
        assert_eq!(builder.config().console.format, ConsoleFormat::Jsonl);
    }

    #[test]
    fn test_single_file_writer_creates_directory() {
        let dir = std::env::temp_dir().join(format!("ferry-log-{}", uuid::Uuid::new_v4()));
        let file = FileOutput::new(&dir)
            .with_prefix("node")
            .with_rotation(RotationStrategy::Never);

        let (_writer, _guard) = file_writer(&file).unwrap();
        assert!(dir.join("node.log").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_init_testing_twice_is_harmless() {
        init_testing();
        init_testing();
        tracing::warn!("still logging");
    }
}
