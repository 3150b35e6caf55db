//! `relocator.toml` loading, validation and tracing setup.
//!
//! ```toml
//! strategy = "safe" # "safe" | "fast"
//! skip_source_namespace = true
//!
//! [[relocations]]
//! source = "javax/servlet"
//! target = "jakarta/servlet"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! Without a file the two classic Jakarta EE renames apply.

use std::path::Path;
use std::sync::Once;

use relocator_engine::{FrameStrategy, NameMapper, Relocation, RelocatorOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::prelude::*;

mod logging;

pub use crate::logging::LoggingConfig;

/// File name looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = "relocator.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid relocation {source_prefix:?} -> {target_prefix:?}: {reason}")]
    InvalidRelocation {
        source_prefix: String,
        target_prefix: String,
        reason: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending input; keep the message only.
        ConfigError::Toml(err.message().to_owned())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Safe,
    Fast,
}

impl From<Strategy> for FrameStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Safe => FrameStrategy::Safe,
            Strategy::Fast => FrameStrategy::Fast,
        }
    }
}

/// One `[[relocations]]` table. Prefixes may use `/` or `.` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelocationConfig {
    pub source: String,
    pub target: String,
}

impl RelocationConfig {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Parses the `SRC=DST` form accepted on the command line.
    pub fn parse_pair(pair: &str) -> Result<Self, ConfigError> {
        match pair.split_once('=') {
            Some((source, target)) => Ok(Self::new(source.trim(), target.trim())),
            None => Err(ConfigError::InvalidRelocation {
                source_prefix: pair.to_owned(),
                target_prefix: String::new(),
                reason: "expected SRC=DST".to_owned(),
            }),
        }
    }

    fn normalized(&self) -> Relocation {
        Relocation::new(self.source.trim(), self.target.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelocatorConfig {
    #[serde(default)]
    pub strategy: Strategy,

    /// Leave classes that themselves live in a source namespace untouched.
    #[serde(default = "default_skip_source_namespace")]
    pub skip_source_namespace: bool,

    /// Applied in order; an empty list falls back to the default table.
    #[serde(default = "default_relocations")]
    pub relocations: Vec<RelocationConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_skip_source_namespace() -> bool {
    true
}

fn default_relocations() -> Vec<RelocationConfig> {
    vec![
        RelocationConfig::new("javax/servlet", "jakarta/servlet"),
        RelocationConfig::new("javax/validation", "jakarta/validation"),
    ]
}

impl Default for RelocatorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            skip_source_namespace: default_skip_source_namespace(),
            relocations: default_relocations(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RelocatorConfig {
    /// Loads and validates a config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: RelocatorConfig = toml::from_str(text)?;
        if config.relocations.is_empty() {
            config.relocations = default_relocations();
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the relocation table: no empty prefix, no source listed
    /// twice, and no target that would match a source again.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let normalized: Vec<Relocation> = self
            .relocations
            .iter()
            .map(RelocationConfig::normalized)
            .collect();
        let invalid = |relocation: &Relocation, reason: &str| ConfigError::InvalidRelocation {
            source_prefix: relocation.source().to_owned(),
            target_prefix: relocation.target().to_owned(),
            reason: reason.to_owned(),
        };

        for (i, relocation) in normalized.iter().enumerate() {
            if relocation.source().is_empty() {
                return Err(invalid(relocation, "source prefix is empty"));
            }
            if relocation.target().is_empty() {
                return Err(invalid(relocation, "target prefix is empty"));
            }
            if normalized[..i]
                .iter()
                .any(|earlier| earlier.source() == relocation.source())
            {
                return Err(invalid(relocation, "source prefix is listed twice"));
            }
        }
        for relocation in &normalized {
            if let Some(source) = normalized
                .iter()
                .find(|other| relocation.target().contains(other.source()))
            {
                return Err(invalid(
                    relocation,
                    &format!("target contains source prefix {:?}", source.source()),
                ));
            }
        }
        Ok(())
    }

    /// Replaces the relocation table, as `--relocate` does.
    pub fn set_relocations(
        &mut self,
        relocations: Vec<RelocationConfig>,
    ) -> Result<(), ConfigError> {
        if relocations.is_empty() {
            return Ok(());
        }
        self.relocations = relocations;
        self.validate()
    }

    pub fn mapper(&self) -> NameMapper {
        NameMapper::new(self.relocations.iter().map(RelocationConfig::normalized))
    }

    pub fn options(&self) -> RelocatorOptions {
        RelocatorOptions {
            strategy: self.strategy.into(),
            skip_source_namespace: self.skip_source_namespace,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global subscriber, writing to stderr. Later calls, and
/// calls after another subscriber was installed, are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();
        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .boxed()
        };
        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::debug!(target: "relocator.config", level = %config.level, "tracing initialized");
        }
    });
}
