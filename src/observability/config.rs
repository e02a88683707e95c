//! Logging Configuration
//!
//! Loaded from environment variables:
//!
//! | Variable             | Default  | Meaning                              |
//! |----------------------|----------|--------------------------------------|
//! | `QUEUE_SIM_LOG`      | `info`   | `EnvFilter` directive                |
//! | `RUST_LOG`           |          | fallback when `QUEUE_SIM_LOG` unset  |
//! | `QUEUE_SIM_LOG_JSON` | `false`  | one JSON object per line             |

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `queue_sim::network=trace`
    pub filter: String,
    pub json: bool,
    /// Include span fields (replication index, seed) in every line
    pub with_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            json: false,
            with_spans: true,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = LoggingConfig::default();
        LoggingConfig {
            filter: lookup("QUEUE_SIM_LOG")
                .or_else(|| lookup("RUST_LOG"))
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.filter),
            json: lookup("QUEUE_SIM_LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.json),
            with_spans: defaults.with_spans,
        }
    }

    /// Quiet preset for tests: warnings only.
    pub fn test() -> Self {
        LoggingConfig {
            filter: "warn".to_string(),
            ..Default::default()
        }
    }
}
