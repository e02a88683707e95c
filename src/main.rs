//! queue-sim demo
//!
//! Runs an M/M/c queue (exponential arrivals, `c` servers with exponential
//! service times) for the configured number of replications and prints the
//! summary, or the full report as JSON with `--json`.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | QUEUE_SIM_CONFIG | - | TOML run configuration |
//! | QUEUE_SIM_SEED | 42 | Seed of replication 0 |
//! | QUEUE_SIM_REPLICATIONS | 1 | Number of replications |
//! | QUEUE_SIM_THREADS | cores | Worker threads |
//! | QUEUE_SIM_SERVERS | 3 | Servers (c) |
//! | QUEUE_SIM_ARRIVAL_MEAN | 1.0 | Mean inter-arrival time in seconds |
//! | QUEUE_SIM_SERVICE_MEAN | 2.5 | Mean service time in seconds |
//! | QUEUE_SIM_CLIENTS | 10000 | Clients per replication, unless another end criterion is configured |
//! | QUEUE_SIM_CLIENT_COUNT | - | Clients counted after warm-up before the run ends |
//! | QUEUE_SIM_TERMINATION_MS | - | Simulated time limit in ms |
//! | QUEUE_SIM_LOG | info | Log filter |
//! | QUEUE_SIM_LOG_JSON | false | JSON log lines |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use queue_sim::network::Network;
use queue_sim::observability::{init_tracing, LoggingConfig};
use queue_sim::registry::Registry;
use queue_sim::resources::{Resource, ResourceUse};
use queue_sim::sampler::Exponential;
use queue_sim::stations::{Dispose, Process, Source};
use queue_sim::{ConfigError, SimulationConfig, Simulator, StationId};
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_SERVERS: u32 = 3;
const DEFAULT_ARRIVAL_MEAN: f64 = 1.0;
const DEFAULT_SERVICE_MEAN: f64 = 2.5;
const DEFAULT_CLIENTS: u64 = 10_000;

/// Parameters of the demo queue
#[derive(Debug, Clone, Copy)]
struct DemoModel {
    servers: u32,
    arrival_mean: f64,
    service_mean: f64,
    clients: u64,
}

impl DemoModel {
    fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }
        DemoModel {
            servers: var("QUEUE_SIM_SERVERS", DEFAULT_SERVERS).max(1),
            arrival_mean: var("QUEUE_SIM_ARRIVAL_MEAN", DEFAULT_ARRIVAL_MEAN),
            service_mean: var("QUEUE_SIM_SERVICE_MEAN", DEFAULT_SERVICE_MEAN),
            clients: var("QUEUE_SIM_CLIENTS", DEFAULT_CLIENTS),
        }
    }

    /// Fails early on bad sampler parameters.
    fn validate(&self) -> Result<(), ConfigError> {
        Exponential::new(self.arrival_mean)?;
        Exponential::new(self.service_mean)?;
        Ok(())
    }

    /// source → server → sink
    fn build(&self, registry: &Arc<Registry>) -> Network {
        let mut network = Network::new(registry.clone());
        let servers = network.add_resource(Resource::fixed("servers", self.servers));
        let (server, sink) = (StationId(1), StationId(2));

        // Parameters were checked by `validate`.
        let (Ok(arrivals), Ok(service)) = (
            Exponential::new(self.arrival_mean),
            Exponential::new(self.service_mean),
        ) else {
            return network;
        };
        network.add_station(Source::new("arrivals", arrivals, server));
        network.add_station(Process::new("server", service, sink).with_resource(ResourceUse::new(servers, 1)));
        network.add_station(Dispose::new("departures"));
        network
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&LoggingConfig::from_env());

    let json = std::env::args().skip(1).any(|arg| arg == "--json");
    let mut config = SimulationConfig::load()?;
    let model = DemoModel::from_env();
    model.validate()?;
    if !config.has_end_criterion() {
        config.client_count = Some(model.clients.max(1));
    }

    info!(
        seed = config.seed,
        replications = config.replications,
        servers = model.servers,
        arrival_mean = model.arrival_mean,
        service_mean = model.service_mean,
        client_count = ?config.client_count,
        "starting M/M/c demo"
    );

    let registry = Arc::new(Registry::new());
    let simulator = Simulator::new(config, move |_: u32| model.build(&registry))?;
    let report = match simulator.run() {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "simulation failed");
            return Err(e.into());
        }
    };

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.summary());
        let rho = model.service_mean / (model.arrival_mean * f64::from(model.servers));
        println!("Offered load per server: {:.3}", rho);
    }

    if report.failed() > 0 {
        return Err(format!("{} replications failed", report.failed()).into());
    }
    Ok(())
}
