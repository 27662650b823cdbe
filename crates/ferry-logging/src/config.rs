//! Logging configuration
//!
//! A [`LogConfig`] describes where log lines go (console, files) and how
//! they are shaped. Presets cover the usual cases; anything else is a plain
//! struct literal.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target without an override; RUST_LOG replaces it
    pub level: String,
    pub console: ConsoleOutput,
    /// Rolling JSONL files, written in addition to the console
    pub file: Option<FileOutput>,
    /// Field layout of JSONL records, console and file alike
    pub json: JsonFields,
    /// Per-target levels, e.g. `ferry_routing` at `trace`
    pub overrides: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleOutput::default(),
            file: None,
            json: JsonFields::default(),
            overrides: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Debug level, colored human-readable console
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleOutput::pretty(true),
            ..Default::default()
        }
    }

    /// Daemon deployment: JSONL into `log_dir`, rotated daily, no console
    pub fn production(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            console: ConsoleOutput::disabled(),
            file: Some(FileOutput::new(log_dir)),
            ..Default::default()
        }
    }

    /// Warnings and above, uncolored so captured test output stays readable
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleOutput::pretty(false),
            ..Default::default()
        }
    }

    /// Simulator runs: node lifecycle at info, forwarding decisions when verbose
    pub fn simulation(verbose: bool) -> Self {
        let level = if verbose { "debug" } else { "info" };
        Self {
            level: level.to_string(),
            console: ConsoleOutput::pretty(true),
            ..Default::default()
        }
        .with_override("ferry_storage", "warn")
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_override(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.overrides.insert(target.into(), level.into());
        self
    }

    pub fn with_console_format(mut self, format: ConsoleFormat) -> Self {
        self.console.format = format;
        self
    }

    pub fn with_file(mut self, file: FileOutput) -> Self {
        self.file = Some(file);
        self
    }

    /// `EnvFilter` directives: the base level, then overrides sorted by target
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.overrides
                    .iter()
                    .map(|(target, level)| format!("{}={}", target, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Shape of console lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleOutput {
    pub enabled: bool,
    pub format: ConsoleFormat,
    /// Color escapes, only meaningful for [`ConsoleFormat::Pretty`]
    pub ansi: bool,
}

impl ConsoleOutput {
    pub fn pretty(ansi: bool) -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Pretty,
            ansi,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_pretty(&self) -> bool {
        self.format == ConsoleFormat::Pretty
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Jsonl,
            ansi: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutput {
    pub directory: PathBuf,
    /// File names are `<prefix>.log`, or `<prefix>.<date>.log` when rotated
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl FileOutput {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "ferry".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rotation(mut self, rotation: RotationStrategy) -> Self {
        self.rotation = rotation;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated when the subscriber is installed
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFields {
    /// Event fields at the top level rather than under `fields`
    pub flatten: bool,
    /// Full span stack on every record, not only the current span
    pub span_list: bool,
    pub source_location: bool,
    pub thread_ids: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            span_list: true,
            source_location: true,
            thread_ids: false,
        }
    }
}
