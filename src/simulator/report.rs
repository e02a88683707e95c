//! Run reports
//!
//! Plain serializable snapshots produced at the end of a replication and of
//! a whole simulation. The demo binary prints them as text or JSON.

use super::pool::PoolStats;
use super::time::VirtualTime;
use crate::resources::Resource;
use crate::statistics::RunStatistics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Protocol activity of one replication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KernelCounters {
    pub events_processed: u64,
    pub state_change_notifies: u64,
    pub broadcast_rounds: u64,
    pub retriggers: u64,
    pub released_resources_notifies: u64,
    pub client_moves: u64,
    /// Moves delivered by event because a target was busy
    pub deferred_arrivals: u64,
    pub announces: u64,
    pub unannounces: u64,
    pub evaluation_failures: u64,
    pub timed_checks: u64,
    pub signals: u64,
    pub resource_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReport {
    pub name: String,
    /// `None` for infinite resources
    pub capacity: Option<u32>,
    pub busy: u32,
    pub mean_busy: f64,
    pub max_busy: u32,
    pub acquisitions: u64,
    pub released_units: u64,
    pub over_released_units: u64,
    pub failures: u64,
}

impl ResourceReport {
    pub(crate) fn from_resource(resource: &Resource, now: VirtualTime) -> Self {
        let stats = resource.stats();
        ResourceReport {
            name: resource.name().to_string(),
            capacity: resource.capacity_at(now),
            busy: resource.busy(),
            mean_busy: stats.mean_busy(),
            max_busy: stats.max_busy,
            acquisitions: stats.acquisitions,
            released_units: stats.released_units,
            over_released_units: stats.over_released_units,
            failures: stats.failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicationReport {
    pub index: u32,
    pub seed: u64,
    pub end_time: VirtualTime,
    pub events_processed: u64,
    pub events_by_kind: BTreeMap<&'static str, u64>,
    /// Sampled every `progress_interval_events` events
    pub mean_queue_len: f64,
    pub max_queue_len: usize,
    pub warm_up_end: Option<VirtualTime>,
    pub warm_up_transitions: u32,
    pub clients_created: u64,
    pub clients_disposed: u64,
    pub clients_in_system: usize,
    pub leaked_announcements: usize,
    pub counters: KernelCounters,
    pub pool: PoolStats,
    pub resources: Vec<ResourceReport>,
    pub statistics: RunStatistics,
    pub warnings: Vec<String>,
    pub fatal: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub workers: usize,
    /// Sorted by replication index
    pub replications: Vec<ReplicationReport>,
    /// Statistics of all replications combined
    pub statistics: RunStatistics,
    pub total_events: u64,
    pub runtime_ms: u64,
    pub worker_runtime_ms: Vec<u64>,
    pub events_per_second: f64,
    pub cancelled: bool,
}

impl SimulationReport {
    pub(crate) fn assemble(
        seed: u64,
        mut replications: Vec<ReplicationReport>,
        worker_runtime_ms: Vec<u64>,
        runtime_ms: u64,
        cancelled: bool,
    ) -> Self {
        replications.sort_by_key(|r| r.index);
        let mut statistics = RunStatistics::default();
        for r in &replications {
            statistics.merge(&r.statistics);
        }
        let total_events = replications.iter().map(|r| r.events_processed).sum();
        let events_per_second = if runtime_ms == 0 {
            0.0
        } else {
            total_events as f64 * 1000.0 / runtime_ms as f64
        };
        SimulationReport {
            seed,
            workers: worker_runtime_ms.len(),
            replications,
            statistics,
            total_events,
            runtime_ms,
            worker_runtime_ms,
            events_per_second,
            cancelled,
        }
    }

    /// Replications that stopped on a fatal kernel error.
    pub fn failed(&self) -> usize {
        self.replications.iter().filter(|r| r.fatal.is_some()).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Simulation Summary\n\
             ==================\n\
             Seed: {}\n\
             Replications: {} ({} failed{})\n\
             Workers: {}\n\
             Events: {} in {} ms ({:.0}/s)\n",
            self.seed,
            self.replications.len(),
            self.failed(),
            if self.cancelled { ", cancelled" } else { "" },
            self.workers,
            self.total_events,
            self.runtime_ms,
            self.events_per_second,
        );

        let stats = &self.statistics;
        let _ = writeln!(
            out,
            "Clients disposed: {}, mean residence {:.3} s (sd {:.3})",
            stats.clients_disposed,
            stats.residence_time.mean,
            stats.residence_time.std_dev()
        );
        for r in &self.replications {
            let _ = writeln!(
                out,
                "  #{} seed {}: {} events, end {}, {} in system, {} warnings{}",
                r.index,
                r.seed,
                r.events_processed,
                r.end_time,
                r.clients_in_system,
                r.warnings.len(),
                r.fatal
                    .as_ref()
                    .map(|e| format!(", FATAL: {}", e))
                    .unwrap_or_default()
            );
            for res in &r.resources {
                let _ = writeln!(
                    out,
                    "      {}: mean busy {:.2}, max {}, {} acquisitions",
                    res.name, res.mean_busy, res.max_busy, res.acquisitions
                );
            }
        }
        out
    }
}
