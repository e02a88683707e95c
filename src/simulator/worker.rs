//! Worker pool
//!
//! Replications are split into contiguous index ranges, one per worker
//! thread. A worker owns one [`Replication`] and reuses it (event pool
//! included) for every replication in its range; the model is rebuilt by
//! the [`ModelFactory`] each time. Nothing mutable is shared between
//! workers except the progress counters and the cancel flag.

use super::replication::Replication;
use super::report::{ReplicationReport, SimulationReport};
use crate::config::SimulationConfig;
use crate::error::{ConfigError, KernelError};
use crate::network::Network;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span};

/// Builds a fresh model instance for a replication.
pub trait ModelFactory: Send + Sync {
    fn build(&self, replication: u32) -> Network;
}

impl<F> ModelFactory for F
where
    F: Fn(u32) -> Network + Send + Sync,
{
    fn build(&self, replication: u32) -> Network {
        self(replication)
    }
}

/// Counters a worker publishes while it runs.
#[derive(Debug, Default)]
pub struct WorkerProgress {
    events: AtomicU64,
    queue_length: AtomicU64,
    replications_done: AtomicU64,
}

impl WorkerProgress {
    pub(crate) fn record(&self, new_events: u64, queue_length: usize) {
        self.events.fetch_add(new_events, Ordering::Relaxed);
        self.queue_length
            .store(queue_length as u64, Ordering::Relaxed);
    }

    fn replication_done(&self) {
        self.replications_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn queue_length(&self) -> u64 {
        self.queue_length.load(Ordering::Relaxed)
    }

    pub fn replications_done(&self) -> u64 {
        self.replications_done.load(Ordering::Relaxed)
    }
}

pub struct Simulator {
    config: Arc<SimulationConfig>,
    factory: Arc<dyn ModelFactory>,
    cancel: Arc<AtomicBool>,
    progress: Vec<Arc<WorkerProgress>>,
}

impl Simulator {
    /// Validates `config` against the model of replication 0.
    pub fn new(config: SimulationConfig, factory: impl ModelFactory + 'static) -> Result<Self, ConfigError> {
        config.validate_for(&factory.build(0))?;
        let workers = config.worker_count();
        Ok(Simulator {
            config: Arc::new(config),
            factory: Arc::new(factory),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: (0..workers).map(|_| Arc::new(WorkerProgress::default())).collect(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.progress.len()
    }

    /// Stops every replication before its next event.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Shared flag for cancelling from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Events executed so far, summed over workers.
    pub fn event_count(&self) -> u64 {
        self.progress.iter().map(|p| p.events()).sum()
    }

    /// Last sampled queue lengths, summed over workers.
    pub fn event_queue_length(&self) -> u64 {
        self.progress.iter().map(|p| p.queue_length()).sum()
    }

    pub fn replications_done(&self) -> u64 {
        self.progress.iter().map(|p| p.replications_done()).sum()
    }

    pub fn progress(&self) -> &[Arc<WorkerProgress>] {
        &self.progress
    }

    /// Runs all replications and returns the combined report. Replications
    /// that hit a fatal kernel error are reported, not propagated; only a
    /// panicking worker fails the whole run.
    pub fn run(&self) -> Result<SimulationReport, KernelError> {
        let started = Instant::now();
        let workers = self.progress.len();
        info!(
            workers,
            replications = self.config.replications,
            seed = self.config.seed,
            "simulation starting"
        );

        let reports: Mutex<Vec<ReplicationReport>> =
            Mutex::new(Vec::with_capacity(self.config.replications as usize));
        let runtimes = Mutex::new(vec![0u64; workers]);
        let panicked: Mutex<Option<usize>> = Mutex::new(None);

        let scoped = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let reports = &reports;
                    let runtimes = &runtimes;
                    scope.spawn(move |_| {
                        let elapsed = self.run_worker(worker, workers, reports);
                        runtimes.lock()[worker] = elapsed;
                    })
                })
                .collect();
            for (worker, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    error!(worker, "worker panicked");
                    panicked.lock().get_or_insert(worker);
                }
            }
        });
        if scoped.is_err() {
            panicked.lock().get_or_insert(0);
        }
        if let Some(worker) = panicked.into_inner() {
            return Err(KernelError::WorkerPanicked(worker));
        }

        let report = SimulationReport::assemble(
            self.config.seed,
            reports.into_inner(),
            runtimes.into_inner(),
            started.elapsed().as_millis() as u64,
            self.cancel.load(Ordering::Relaxed),
        );
        info!(
            events = report.total_events,
            runtime_ms = report.runtime_ms,
            failed = report.failed(),
            "simulation finished"
        );
        Ok(report)
    }

    fn run_worker(&self, worker: usize, workers: usize, reports: &Mutex<Vec<ReplicationReport>>) -> u64 {
        let span = info_span!("worker", worker);
        let _guard = span.enter();
        let started = Instant::now();
        let progress = self.progress[worker].clone();

        let mut replication = Replication::new(self.config.clone());
        replication.attach(self.cancel.clone(), progress.clone());
        for index in self.config.replications_for_worker(worker, workers) {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            replication.install(index, self.factory.build(index));
            if let Err(e) = replication.run() {
                error!(replication = index, error = %e, "replication failed");
            }
            reports.lock().push(replication.report());
            progress.replication_done();
        }
        started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::simulator::{EventPayload, VirtualTime};

    fn empty_model(_replication: u32) -> Network {
        Network::new(Arc::new(Registry::new()))
    }

    #[test]
    fn test_runs_every_replication_once() {
        let config = SimulationConfig::test().with_replications(7).with_threads(3);
        let simulator = Simulator::new(config, empty_model).unwrap();
        let report = simulator.run().unwrap();

        let indices: Vec<u32> = report.replications.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        assert_eq!(report.workers, 3);
        assert_eq!(simulator.replications_done(), 7);
        assert_eq!(report.total_events, 7);
    }

    #[test]
    fn test_replication_seeds_offset_by_index() {
        let config = SimulationConfig::test().with_seed(100).with_replications(3);
        let report = Simulator::new(config, empty_model).unwrap().run().unwrap();
        let seeds: Vec<u64> = report.replications.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);
    }

    #[test]
    fn test_cancel_before_run_skips_replications() {
        let config = SimulationConfig::test().with_replications(4);
        let simulator = Simulator::new(config, empty_model).unwrap();
        simulator.cancel();
        let report = simulator.run().unwrap();
        assert!(report.cancelled);
        assert!(report.replications.is_empty());
    }

    #[test]
    fn test_zero_replications_rejected() {
        let config = SimulationConfig::test().with_replications(0);
        assert!(Simulator::new(config, empty_model).is_err());
    }

    #[test]
    fn test_model_without_end_criterion_rejected() {
        let config = SimulationConfig::test().without_termination_time();
        let err = Simulator::new(config.clone(), empty_model).err().unwrap();
        assert!(err.to_string().contains("end criterion"));
        assert!(Simulator::new(config.with_client_count(10), empty_model).is_ok());
    }

    #[test]
    fn test_fatal_replication_reported_not_propagated() {
        struct Bad;
        impl crate::network::Station for Bad {
            fn name(&self) -> &str {
                "bad"
            }
            fn initial_events(
                &mut self,
                sim: &mut Replication,
                _: crate::network::StationId,
            ) -> Result<(), KernelError> {
                sim.schedule_at(VirtualTime(10), EventPayload::SystemChange)?;
                Ok(())
            }
            fn listens_to_state_changes(&self) -> bool {
                true
            }
            fn system_state_change_notify(
                &mut self,
                sim: &mut Replication,
                _: crate::network::StationId,
            ) -> Result<bool, KernelError> {
                if sim.now() == VirtualTime(10) {
                    sim.schedule_at(VirtualTime(1), EventPayload::SystemChange)?;
                }
                Ok(false)
            }
            fn process_arrival(
                &mut self,
                _: &mut Replication,
                _: crate::network::StationId,
                _: crate::network::ClientId,
            ) -> Result<(), KernelError> {
                Ok(())
            }
        }

        let config = SimulationConfig::test().with_replications(2);
        let simulator = Simulator::new(config, |_: u32| {
            let mut network = Network::new(Arc::new(Registry::new()));
            network.add_station(Bad);
            network
        })
        .unwrap();
        let report = simulator.run().unwrap();
        assert_eq!(report.failed(), 2);
        assert!(report.replications[0]
            .fatal
            .as_ref()
            .unwrap()
            .contains("clock"));
    }
}
