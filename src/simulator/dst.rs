//! Deterministic Simulation Testing for station networks
//!
//! VOPR-style harness that builds a random queueing network from a seed,
//! runs one replication event by event and checks kernel invariants after
//! every event:
//!
//! - resources never hold more units than their base capacity
//! - clients are conserved: created = disposed + in system
//! - occupancy of counting stations never exceeds clients in system
//! - the clock never goes backwards
//! - no event slot leaks: pool slots in use = queued events
//!
//! and once the queue drains:
//!
//! - every resource is idle again
//! - no announced arrival is left unresolved
//!
//! The same seed always produces the same network and the same run.

use super::{DeterministicRng, Duration, KernelCounters, Replication, VirtualTime};
use crate::config::{SimulationConfig, WarmUp};
use crate::error::ConfigError;
use crate::expression::{expr, Constant};
use crate::network::{Network, StationId};
use crate::registry::Registry;
use crate::resources::{Capacity, DownTime, Resource, ResourceId, ResourceUse};
use crate::sampler::{Exponential, Fixed, Uniform};
use crate::stations::{Barrier, Batch, Delay, Dispose, Hold, Process, SignalSource, Source};
use std::sync::Arc;

/// Configuration for network DST
#[derive(Debug, Clone)]
pub struct NetworkDSTConfig {
    /// Random seed for network shape and run
    pub seed: u64,
    /// Stations between source and sink
    pub stages: usize,
    /// Number of shared resource pools
    pub resources: usize,
    /// Units per resource pool
    pub servers: u32,
    /// Clients created by the source
    pub arrivals: u64,
    pub mean_inter_arrival_secs: f64,
    pub mean_service_secs: f64,
    /// Allow condition-gated stations
    pub holds: bool,
    /// Allow batching stations
    pub batches: bool,
    /// Allow signal-gated stations
    pub barriers: bool,
    /// Put a down-time window on the first resource
    pub down_time: bool,
    pub warm_up: WarmUp,
    pub termination_time: Option<VirtualTime>,
    pub timed_check_interval: Duration,
}

impl Default for NetworkDSTConfig {
    fn default() -> Self {
        NetworkDSTConfig {
            seed: 0,
            stages: 3,
            resources: 1,
            servers: 2,
            arrivals: 50,
            mean_inter_arrival_secs: 1.0,
            mean_service_secs: 1.5,
            holds: false,
            batches: false,
            barriers: false,
            down_time: false,
            warm_up: WarmUp::None,
            termination_time: None,
            timed_check_interval: Duration::ZERO,
        }
    }
}

impl NetworkDSTConfig {
    pub fn new(seed: u64) -> Self {
        NetworkDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// One server, arrivals faster than service (long queues, many wakes)
    pub fn contention(seed: u64) -> Self {
        NetworkDSTConfig {
            seed,
            stages: 2,
            resources: 1,
            servers: 1,
            arrivals: 80,
            mean_inter_arrival_secs: 0.5,
            mean_service_secs: 2.0,
            ..Default::default()
        }
    }

    /// Conditions, batches, signals, down-time and timed checks mixed in
    pub fn gated(seed: u64) -> Self {
        NetworkDSTConfig {
            seed,
            stages: 5,
            resources: 2,
            servers: 3,
            arrivals: 60,
            holds: true,
            batches: true,
            barriers: true,
            down_time: true,
            timed_check_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Warm-up by arrival count plus a hard end time
    pub fn bounded(seed: u64) -> Self {
        NetworkDSTConfig {
            seed,
            stages: 4,
            holds: true,
            arrivals: 200,
            warm_up: WarmUp::Arrivals { count: 20 },
            termination_time: Some(VirtualTime::from_secs(90)),
            ..Default::default()
        }
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        let mut config = SimulationConfig::test()
            .with_seed(self.seed)
            .with_warm_up(self.warm_up)
            .with_timed_checks(self.timed_check_interval);
        if let Some(end) = self.termination_time {
            config.termination_time = Some(end);
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Process,
    Delay,
    Hold,
    Batch,
    Gate,
}

/// Builds the network described by `config`. Deterministic in the seed.
pub fn build_network(config: &NetworkDSTConfig) -> Result<Network, ConfigError> {
    let mut shape = DeterministicRng::new(config.seed.rotate_left(17) ^ 0x5eed_5eed);

    let mut registry = Registry::new();
    let gate_signal = registry.signal("gate");
    let mut network = Network::new(Arc::new(registry));

    let mut pools: Vec<ResourceId> = Vec::new();
    for r in 0..config.resources.max(1) {
        let mut resource = Resource::fixed(format!("pool-{}", r), config.servers.max(1));
        if r == 0 && config.down_time && config.servers > 1 {
            resource = resource.with_down_time(DownTime {
                start: VirtualTime::from_secs(10),
                end: VirtualTime::from_secs(25),
                units: config.servers - 1,
            });
        }
        pools.push(network.add_resource(resource));
    }

    let mut kinds = vec![Stage::Process, Stage::Delay];
    if config.holds {
        kinds.push(Stage::Hold);
    }
    if config.batches {
        kinds.push(Stage::Batch);
    }
    if config.barriers {
        kinds.push(Stage::Gate);
    }
    let stages: Vec<Stage> = (0..config.stages)
        .map(|i| {
            if i == 0 {
                Stage::Process
            } else {
                kinds[shape.gen_range(0, kinds.len() as u64) as usize]
            }
        })
        .collect();

    let next = |network: &Network| StationId(network.next_station_id().0 + 1);

    let source = Source::new(
        "source",
        Exponential::new(config.mean_inter_arrival_secs)?,
        next(&network),
    )
    .with_limit(config.arrivals);
    network.add_station(source);

    for (i, stage) in stages.iter().enumerate() {
        let name = format!("stage-{}", i);
        match stage {
            Stage::Process => {
                let pool = pools[shape.gen_range(0, pools.len() as u64) as usize];
                let units = shape.gen_range(1, u64::from(config.servers.max(1)) + 1) as u32;
                let mut process = Process::new(name, Exponential::new(config.mean_service_secs)?, next(&network))
                    .with_resource(ResourceUse::new(pool, units))
                    .with_priority(Constant(shape.gen_range(0, 3) as f64));
                if shape.gen_bool(0.3) {
                    process = process.with_post_processing(Fixed(Duration::from_millis(shape.gen_range(1, 500))));
                }
                network.add_station(process);
            }
            Stage::Delay => {
                let mut delay = Delay::new(name, Uniform::new(0.1, 2.0)?, next(&network));
                if shape.gen_bool(0.5) {
                    delay = delay.by_transporter();
                }
                network.add_station(delay);
            }
            Stage::Hold => {
                let target = next(&network);
                let limit = shape.gen_range(1, 4) as f64;
                let condition = expr(move |ctx| Ok(if ctx.clients_at(target)? < limit { 1.0 } else { 0.0 }));
                let mut hold = Hold::new(name, condition, target);
                if shape.gen_bool(0.5) {
                    hold = hold.with_recheck(Duration::from_millis(750));
                }
                network.add_station(hold);
            }
            Stage::Batch => {
                let size = shape.gen_range(2, 4) as usize;
                network.add_station(Batch::new(name, size, next(&network)));
            }
            Stage::Gate => {
                let delay = Duration::from_millis(shape.gen_range(0, 3000));
                network.add_station(SignalSource::new(
                    format!("{}-signal", name),
                    gate_signal,
                    delay,
                    next(&network),
                ));
                let mut barrier = Barrier::new(name, gate_signal, next(&network))
                    .with_timeout(Duration::from_secs(4));
                if shape.gen_bool(0.5) {
                    barrier = barrier.with_per_signal(1);
                }
                network.add_station(barrier);
            }
        }
    }
    network.add_station(Dispose::new("sink"));
    Ok(network)
}

/// Result of a network DST run
#[derive(Debug, Clone)]
pub struct NetworkDSTResult {
    pub seed: u64,
    pub stations: usize,
    pub events: u64,
    pub end_time: VirtualTime,
    pub clients_created: u64,
    pub clients_disposed: u64,
    pub clients_in_system: usize,
    pub drained: bool,
    pub counters: KernelCounters,
    pub warnings: usize,
    pub fatal: Option<String>,
    pub invariant_violations: Vec<String>,
}

impl NetworkDSTResult {
    pub fn new(seed: u64) -> Self {
        NetworkDSTResult {
            seed,
            stations: 0,
            events: 0,
            end_time: VirtualTime::ZERO,
            clients_created: 0,
            clients_disposed: 0,
            clients_in_system: 0,
            drained: false,
            counters: KernelCounters::default(),
            warnings: 0,
            fatal: None,
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty() && self.fatal.is_none()
    }

    /// Same observable run; used for determinism checks.
    pub fn same_run(&self, other: &NetworkDSTResult) -> bool {
        self.events == other.events
            && self.end_time == other.end_time
            && self.clients_created == other.clients_created
            && self.clients_disposed == other.clients_disposed
            && self.counters == other.counters
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} stations, {} events to {}, clients {}/{} disposed ({} left), \
             {} moves, {} deferred, {} violations{}",
            self.seed,
            self.stations,
            self.events,
            self.end_time,
            self.clients_disposed,
            self.clients_created,
            self.clients_in_system,
            self.counters.client_moves,
            self.counters.deferred_arrivals,
            self.invariant_violations.len(),
            self.fatal
                .as_ref()
                .map(|e| format!(", FATAL: {}", e))
                .unwrap_or_default()
        )
    }
}

/// DST harness for one replication of a random network
pub struct NetworkDSTHarness {
    sim: Replication,
    result: NetworkDSTResult,
    capacities: Vec<Option<u32>>,
    last_time: VirtualTime,
}

impl NetworkDSTHarness {
    pub fn new(config: NetworkDSTConfig) -> Result<Self, ConfigError> {
        let network = build_network(&config)?;
        let mut result = NetworkDSTResult::new(config.seed);
        result.stations = network.station_count();
        let sim = Replication::with_network(config.simulation_config(), network);
        let capacities = sim
            .resources()
            .iter()
            .map(|(_, r)| match r.capacity() {
                Capacity::Fixed(n) => Some(*n),
                _ => None,
            })
            .collect();
        Ok(NetworkDSTHarness {
            sim,
            result,
            capacities,
            last_time: VirtualTime::ZERO,
        })
    }

    pub fn with_seed(seed: u64) -> Result<Self, ConfigError> {
        Self::new(NetworkDSTConfig::new(seed))
    }

    /// Runs up to `max_events` events, checking invariants after each.
    pub fn run(&mut self, max_events: usize) {
        let mut events = 0;
        while events < max_events {
            match self.sim.step() {
                Ok(true) => {
                    events += 1;
                    self.check_invariants();
                }
                Ok(false) => {
                    self.result.drained = !self.sim.is_halted();
                    break;
                }
                Err(e) => {
                    self.result.fatal = Some(e.to_string());
                    break;
                }
            }
        }
        if self.result.drained {
            self.check_drained();
        }
        self.collect();
    }

    fn violation(&mut self, message: String) {
        let message = format!("t={} {}", self.sim.now(), message);
        self.result.invariant_violations.push(message);
    }

    fn check_invariants(&mut self) {
        let now = self.sim.now();
        if now < self.last_time {
            self.violation(format!("clock went back from {}", self.last_time));
        }
        self.last_time = now;

        let over: Vec<String> = self
            .sim
            .resources()
            .iter()
            .zip(&self.capacities)
            .filter_map(|((_, r), cap)| match cap {
                Some(cap) if r.busy() > *cap => {
                    Some(format!("{} busy {} exceeds capacity {}", r.name(), r.busy(), cap))
                }
                _ => None,
            })
            .collect();
        for message in over {
            self.violation(message);
        }

        let clients = self.sim.clients();
        let (created, disposed, in_system) = (clients.created(), clients.disposed(), clients.in_system());
        if created != disposed + in_system as u64 {
            self.violation(format!(
                "clients not conserved: created {} disposed {} in system {}",
                created, disposed, in_system
            ));
        }

        let present: usize = (0..self.sim.station_count())
            .filter_map(|i| self.sim.station_data(StationId(i as u32)))
            .map(|d| d.clients_at_station)
            .sum();
        if present > in_system {
            self.violation(format!("{} clients at stations but {} in system", present, in_system));
        }

        let in_use = self.sim.pool.in_use();
        let queued = self.sim.queue_len();
        if in_use != queued {
            self.violation(format!("{} event slots in use but {} queued", in_use, queued));
        }
    }

    fn check_drained(&mut self) {
        let busy: Vec<String> = self
            .sim
            .resources()
            .iter()
            .filter(|(_, r)| r.busy() > 0)
            .map(|(_, r)| format!("{} still busy with {} units after drain", r.name(), r.busy()))
            .collect();
        for message in busy {
            self.violation(message);
        }
        let leaked = self.sim.report().leaked_announcements;
        if leaked > 0 {
            self.violation(format!("{} announcements never resolved", leaked));
        }
    }

    fn collect(&mut self) {
        let clients = self.sim.clients();
        self.result.events = self.sim.counters().events_processed;
        self.result.end_time = self.sim.now();
        self.result.clients_created = clients.created();
        self.result.clients_disposed = clients.disposed();
        self.result.clients_in_system = clients.in_system();
        self.result.counters = self.sim.counters().clone();
        self.result.warnings = self.sim.warnings().len();
    }

    pub fn result(&self) -> &NetworkDSTResult {
        &self.result
    }

    pub fn replication(&self) -> &Replication {
        &self.sim
    }
}

/// Runs one seed. A config that cannot be built counts as a failed run.
pub fn run_network_dst(config: NetworkDSTConfig, max_events: usize) -> NetworkDSTResult {
    let seed = config.seed;
    match NetworkDSTHarness::new(config) {
        Ok(mut harness) => {
            harness.run(max_events);
            harness.result().clone()
        }
        Err(e) => {
            let mut result = NetworkDSTResult::new(seed);
            result.invariant_violations.push(format!("network build failed: {}", e));
            result
        }
    }
}

/// Run a batch of network DST tests
pub fn run_network_dst_batch(
    start_seed: u64,
    num_seeds: usize,
    max_events: usize,
    config_fn: fn(u64) -> NetworkDSTConfig,
) -> Vec<NetworkDSTResult> {
    (0..num_seeds)
        .map(|i| run_network_dst(config_fn(start_seed + i as u64), max_events))
        .collect()
}

/// Runs every seed twice and reports the seeds whose runs differ.
pub fn check_determinism_batch(
    start_seed: u64,
    num_seeds: usize,
    max_events: usize,
    config_fn: fn(u64) -> NetworkDSTConfig,
) -> Vec<u64> {
    (0..num_seeds)
        .map(|i| start_seed + i as u64)
        .filter(|seed| {
            let first = run_network_dst(config_fn(*seed), max_events);
            let second = run_network_dst(config_fn(*seed), max_events);
            !first.same_run(&second)
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_network_dst_batch(results: &[NetworkDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_events: u64 = results.iter().map(|r| r.events).sum();
    let drained = results.iter().filter(|r| r.drained).count();

    let mut summary = format!(
        "Network DST Summary\n\
         ===================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Drained: {}\n\
         Total events: {}\n",
        total, passed, failed, drained, total_events
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  {}\n", result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}
