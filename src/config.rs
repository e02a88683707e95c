//! Run configuration
//!
//! Plain data injected into the simulator by the setup phase. Loaded from a
//! TOML file and overridden from environment variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | QUEUE_SIM_CONFIG | unset | Path of a TOML config file |
//! | QUEUE_SIM_SEED | 42 | Seed of replication 0 |
//! | QUEUE_SIM_REPLICATIONS | 1 | Number of replications |
//! | QUEUE_SIM_THREADS | cores | Worker thread limit |
//! | QUEUE_SIM_TIMED_CHECK_MS | 0 | Timed check interval, 0 disables |
//! | QUEUE_SIM_CLIENT_COUNT | unset | Clients counted after warm-up before the run ends |
//! | QUEUE_SIM_TERMINATION_MS | unset | Simulated time after which a replication shuts down |
//!
//! A replication needs at least one end criterion: a termination time, a
//! client count, or a termination condition on the model.

use crate::error::ConfigError;
use crate::network::Network;
use crate::simulator::{Duration, VirtualTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordering of events scheduled for the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Insertion order
    #[default]
    Fifo,
    /// Reverse insertion order
    Lifo,
}

/// When statistics collection switches from discarded to counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WarmUp {
    #[default]
    None,
    /// Ends at a fixed simulated time.
    Time { until: VirtualTime },
    /// Ends once this many clients have entered the network.
    Arrivals { count: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of replication 0; replication `i` uses `seed + i`
    pub seed: u64,
    /// Number of independent replications
    pub replications: u32,
    /// Worker thread limit (default: available parallelism)
    pub threads: Option<usize>,
    /// Period of the timed fallback checks in ms (0 disables them)
    pub timed_check_interval: Duration,
    /// Simulated time after which a replication shuts down
    pub termination_time: Option<VirtualTime>,
    /// Clients that enter the network after the warm-up before arrivals
    /// stop; the run ends when the last of them is disposed
    pub client_count: Option<u64>,
    /// Delay of the follow-up broadcast after a listener reported new work
    pub state_change_retrigger: Duration,
    pub tie_break: TieBreak,
    /// Events between two progress samples
    pub progress_interval_events: u64,
    /// Emergency shutdown once more clients than this are in the system
    pub max_clients_in_system: Option<usize>,
    /// Treat a failed expression evaluation as an emergency shutdown
    pub stop_on_evaluation_error: bool,
    pub warm_up: WarmUp,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            seed: 42,
            replications: 1,
            threads: None,
            timed_check_interval: Duration::ZERO,
            termination_time: None,
            client_count: None,
            state_change_retrigger: Duration::from_millis(1),
            tie_break: TieBreak::Fifo,
            progress_interval_events: 10_000,
            max_clients_in_system: None,
            stop_on_evaluation_error: false,
            warm_up: WarmUp::None,
        }
    }
}

impl SimulationConfig {
    /// Single replication on one thread, no warm-up, ending after one
    /// simulated year.
    pub fn test() -> Self {
        SimulationConfig {
            threads: Some(1),
            termination_time: Some(VirtualTime::from_secs(365 * 24 * 3600)),
            progress_interval_events: 64,
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// `QUEUE_SIM_CONFIG` file if set, defaults otherwise; environment
    /// overrides on top.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("QUEUE_SIM_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        let config = base.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `QUEUE_SIM_*` overrides from `lookup`; unparsable values are ignored.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(seed) = lookup("QUEUE_SIM_SEED").and_then(|s| s.parse().ok()) {
            self.seed = seed;
        }
        if let Some(n) = lookup("QUEUE_SIM_REPLICATIONS").and_then(|s| s.parse().ok()) {
            self.replications = n;
        }
        if let Some(n) = lookup("QUEUE_SIM_THREADS").and_then(|s| s.parse().ok()) {
            self.threads = Some(n);
        }
        if let Some(ms) = lookup("QUEUE_SIM_TIMED_CHECK_MS").and_then(|s| s.parse().ok()) {
            self.timed_check_interval = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("QUEUE_SIM_CLIENT_COUNT").and_then(|s| s.parse().ok()) {
            self.client_count = Some(n);
        }
        if let Some(ms) = lookup("QUEUE_SIM_TERMINATION_MS").and_then(|s| s.parse().ok()) {
            self.termination_time = Some(VirtualTime::from_millis(ms));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replications == 0 {
            return Err(ConfigError::Invalid("replications must be at least 1".into()));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.progress_interval_events == 0 {
            return Err(ConfigError::Invalid(
                "progress_interval_events must be at least 1".into(),
            ));
        }
        if self.client_count == Some(0) {
            return Err(ConfigError::Invalid("client_count must be at least 1".into()));
        }
        Ok(())
    }

    /// `true` if a run of this config ends on its own. A termination
    /// condition of the model counts as well; see `validate_for`.
    pub fn has_end_criterion(&self) -> bool {
        self.termination_time.is_some() || self.client_count.is_some()
    }

    /// Validates the config together with the model it will run.
    pub fn validate_for(&self, network: &Network) -> Result<(), ConfigError> {
        self.validate()?;
        if !self.has_end_criterion() && !network.has_termination_condition() {
            return Err(ConfigError::Invalid(
                "no end criterion: set termination_time, client_count or a termination condition"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Number of worker threads actually started.
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let limit = self.threads.unwrap_or(cores).max(1);
        limit.min(self.replications.max(1) as usize)
    }

    /// Replication indices handled by `worker` out of `workers`. The first
    /// `replications % workers` workers take one extra replication.
    pub fn replications_for_worker(&self, worker: usize, workers: usize) -> std::ops::Range<u32> {
        let workers = workers.max(1) as u32;
        let worker = worker as u32;
        let base = self.replications / workers;
        let extra = self.replications % workers;
        let start = worker * base + worker.min(extra);
        let len = base + u32::from(worker < extra);
        start..start + len
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_replications(mut self, replications: u32) -> Self {
        self.replications = replications;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_warm_up(mut self, warm_up: WarmUp) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn with_timed_checks(mut self, interval: Duration) -> Self {
        self.timed_check_interval = interval;
        self
    }

    pub fn with_termination_time(mut self, time: VirtualTime) -> Self {
        self.termination_time = Some(time);
        self
    }

    pub fn with_client_count(mut self, count: u64) -> Self {
        self.client_count = Some(count);
        self
    }

    /// Clears the termination time, e.g. to rely on a client count only.
    pub fn without_termination_time(mut self) -> Self {
        self.termination_time = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Constant;
    use crate::registry::Registry;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.replications, 1);
        assert_eq!(config.tie_break, TieBreak::Fifo);
        assert_eq!(config.state_change_retrigger, Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SimulationConfig::from_toml_str(
            r#"
            seed = 7
            replications = 4
            timed_check_interval = 250
            tie_break = "lifo"

            [warm_up]
            mode = "time"
            until = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.replications, 4);
        assert_eq!(config.timed_check_interval, Duration::from_millis(250));
        assert_eq!(config.tie_break, TieBreak::Lifo);
        assert_eq!(
            config.warm_up,
            WarmUp::Time {
                until: VirtualTime::from_secs(60)
            }
        );
        assert_eq!(config.progress_interval_events, 10_000);
    }

    #[test]
    fn test_zero_replications_rejected() {
        let err = SimulationConfig::from_toml_str("replications = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_toml_reports_parse_error() {
        let err = SimulationConfig::from_toml_str("seed = \"abc\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 99\n[warm_up]\nmode = \"arrivals\"\ncount = 10").unwrap();
        let config = SimulationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.warm_up, WarmUp::Arrivals { count: 10 });
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SimulationConfig::from_file("/nonexistent/queue-sim.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("QUEUE_SIM_SEED", "1234"),
            ("QUEUE_SIM_THREADS", "3"),
            ("QUEUE_SIM_REPLICATIONS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = SimulationConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.seed, 1234);
        assert_eq!(config.threads, Some(3));
        assert_eq!(config.replications, 1);
    }

    #[test]
    fn test_replication_split_matches_counts() {
        let config = SimulationConfig::default().with_replications(10);
        let ranges: Vec<_> = (0..4).map(|w| config.replications_for_worker(w, 4)).collect();

        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);
    }

    #[test]
    fn test_worker_count_capped_by_replications() {
        let config = SimulationConfig::default()
            .with_replications(2)
            .with_threads(8);
        assert_eq!(config.worker_count(), 2);
    }

    #[test]
    fn test_model_without_end_criterion_rejected() {
        let config = SimulationConfig::test().without_termination_time();
        let network = Network::new(Arc::new(Registry::new()));
        let err = config.validate_for(&network).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("end criterion")));

        let network = Network::new(Arc::new(Registry::new())).with_termination_condition(Constant(0.0));
        assert!(config.validate_for(&network).is_ok());

        let network = Network::new(Arc::new(Registry::new()));
        assert!(config.clone().with_client_count(5).validate_for(&network).is_ok());
    }

    #[test]
    fn test_zero_client_count_rejected() {
        let err = SimulationConfig::from_toml_str("client_count = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_end_criteria_from_environment() {
        let vars: HashMap<&str, &str> = [
            ("QUEUE_SIM_CLIENT_COUNT", "250"),
            ("QUEUE_SIM_TERMINATION_MS", "60000"),
        ]
        .into_iter()
        .collect();
        let config = SimulationConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.client_count, Some(250));
        assert_eq!(config.termination_time, Some(VirtualTime::from_secs(60)));
        assert!(config.has_end_criterion());
        assert!(!SimulationConfig::default().has_end_criterion());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = SimulationConfig::test()
            .with_termination_time(VirtualTime::from_secs(3600))
            .with_client_count(500)
            .with_warm_up(WarmUp::Arrivals { count: 50 });
        let text = toml::to_string(&config).unwrap();
        assert_eq!(SimulationConfig::from_toml_str(&text).unwrap(), config);
    }
}
