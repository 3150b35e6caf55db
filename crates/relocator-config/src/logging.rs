use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string
    /// such as `warn,relocator.engine=trace`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    /// Configured directives first, `rust_log` after them so it wins where
    /// both name the same target.
    fn directives(&self, rust_log: Option<&str>) -> String {
        let level = match self.level.trim() {
            "" => "info",
            "warning" => "warn",
            level => level,
        };
        match rust_log.map(str::trim).filter(|env| !env.is_empty()) {
            Some(env) => format!("{level},{env}"),
            None => level.to_owned(),
        }
    }

    /// The filter `init_tracing` installs. Unparsable directives fall back
    /// to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let rust_log = std::env::var("RUST_LOG").ok();
        EnvFilter::try_new(self.directives(rust_log.as_deref()))
            .or_else(|_| EnvFilter::try_new(self.directives(None)))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_owned(),
            json: false,
        }
    }

    #[test]
    fn rust_log_is_layered_after_the_configured_level() {
        assert_eq!(level(" warning ").directives(None), "warn");
        assert_eq!(level("").directives(Some("  ")), "info");
        assert_eq!(
            level("info").directives(Some("relocator.engine=trace")),
            "info,relocator.engine=trace"
        );
    }
}
