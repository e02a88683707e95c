//! Replication
//!
//! One independent run of the model: clock, event queue, event pool,
//! random source, stations, clients, resources and statistics. A
//! replication is owned by exactly one worker thread and never shared.
//!
//! # Main loop
//!
//! ```text
//! loop {
//!     cancelled or halted?        → stop
//!     next = queue.peek()          → none: drained, stop
//!     next > termination_time?     → shut down, stop
//!     pop, advance clock, dispatch, recycle the slot
//! }
//! ```
//!
//! Two stop mechanisms exist. `request_stop` is cooperative: self-
//! rescheduling events stop re-queueing themselves and the queue drains.
//! `shut_down` is immediate: all pending events are deleted.

use super::event::{Event, EventKind, EventPayload};
use super::pool::{EventHandle, EventPool, PoolStats};
use super::queue::EventQueue;
use super::report::{KernelCounters, ReplicationReport, ResourceReport};
use super::rng::DeterministicRng;
use super::time::{Duration, VirtualTime};
use super::worker::WorkerProgress;
use crate::config::{SimulationConfig, WarmUp};
use crate::error::KernelError;
use crate::expression::{EvalContext, EvalError, Expression};
use crate::network::{
    Client, ClientId, Clients, MoveKind, Network, Station, StationData, StationId, StationRole,
};
use crate::registry::Registry;
use crate::resources::Resources;
use crate::statistics::{RunStatistics, RunningMean, StatisticsSink};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, trace, warn};

pub(crate) struct StationSlot {
    /// `None` while one of the station's hooks is running
    pub(crate) behavior: Option<Box<dyn Station>>,
    pub(crate) data: StationData,
    pub(crate) name: String,
    pub(crate) role: StationRole,
    pub(crate) counts_clients: bool,
}

/// Kernel-level record of protocol steps, kept only when tracing is enabled.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEntry {
    EventStarted {
        time: VirtualTime,
        kind: EventKind,
    },
    ReleasedResourcesNotify {
        time: VirtualTime,
    },
    StateChangeNotify {
        time: VirtualTime,
    },
    StationNotified {
        time: VirtualTime,
        station: StationId,
    },
    ClientMoved {
        time: VirtualTime,
        client: ClientId,
        from: Option<StationId>,
        to: StationId,
        kind: MoveKind,
    },
    ArrivalProcessed {
        time: VirtualTime,
        station: StationId,
        client: ClientId,
    },
    Announce {
        time: VirtualTime,
        client: ClientId,
        station: StationId,
    },
    Unannounce {
        time: VirtualTime,
        client: ClientId,
        station: StationId,
        by_arrival: bool,
    },
    WarmUpEnded {
        time: VirtualTime,
    },
}

pub struct Replication {
    pub(crate) index: u32,
    pub(crate) seed: u64,
    pub(crate) config: Arc<SimulationConfig>,
    pub(crate) registry: Arc<Registry>,

    pub(crate) current_time: VirtualTime,
    pub(crate) queue: EventQueue,
    pub(crate) pool: EventPool,
    pub(crate) rng: DeterministicRng,
    pub(crate) started: bool,
    /// Cooperative stop: no new self-rescheduling events
    pub(crate) stop: bool,
    /// Hard stop: the loop exits before the next event
    pub(crate) halted: bool,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) cancelled: bool,
    pub(crate) fatal: Option<KernelError>,

    pub(crate) is_warm_up: bool,
    pub(crate) warm_up_end_time: Option<VirtualTime>,
    pub(crate) warm_up_transitions: u32,
    pub(crate) clients_arrived: u64,

    pub(crate) stations: Vec<StationSlot>,
    pub(crate) state_listeners: Vec<StationId>,
    pub(crate) release_listeners: Vec<StationId>,
    pub(crate) clients: Clients,
    pub(crate) resources: Resources,
    pub(crate) statistics: RunStatistics,
    pub(crate) termination_condition: Option<Box<dyn Expression>>,

    pub(crate) timed_check_stations: BTreeSet<StationId>,
    pub(crate) timed_check_scheduled: bool,
    pub(crate) retrigger_at: Option<VirtualTime>,
    pub(crate) in_broadcast: bool,
    pub(crate) broadcast_again: bool,

    pub(crate) counters: KernelCounters,
    pub(crate) events_by_kind: [u64; EventKind::COUNT],
    pub(crate) queue_depth: RunningMean,
    pub(crate) max_queue_len: usize,
    pub(crate) warnings: Vec<String>,
    pub(crate) trace: Option<Vec<ProtocolEntry>>,
    pub(crate) progress: Option<Arc<WorkerProgress>>,
    pub(crate) events_reported: u64,
}

impl Replication {
    pub fn new(config: Arc<SimulationConfig>) -> Self {
        let tie_break = config.tie_break;
        Replication {
            index: 0,
            seed: config.seed,
            rng: DeterministicRng::new(config.seed),
            config,
            registry: Arc::new(Registry::new()),
            current_time: VirtualTime::ZERO,
            queue: EventQueue::new(tie_break),
            pool: EventPool::new(),
            started: false,
            stop: false,
            halted: false,
            cancel: Arc::new(AtomicBool::new(false)),
            cancelled: false,
            fatal: None,
            is_warm_up: false,
            warm_up_end_time: None,
            warm_up_transitions: 0,
            clients_arrived: 0,
            stations: Vec::new(),
            state_listeners: Vec::new(),
            release_listeners: Vec::new(),
            clients: Clients::new(),
            resources: Resources::new(),
            statistics: RunStatistics::default(),
            termination_condition: None,
            timed_check_stations: BTreeSet::new(),
            timed_check_scheduled: false,
            retrigger_at: None,
            in_broadcast: false,
            broadcast_again: false,
            counters: KernelCounters::default(),
            events_by_kind: [0; EventKind::COUNT],
            queue_depth: RunningMean::default(),
            max_queue_len: 0,
            warnings: Vec::new(),
            trace: None,
            progress: None,
            events_reported: 0,
        }
    }

    /// Shorthand for a replication with `network` already installed as index 0.
    pub fn with_network(config: SimulationConfig, network: Network) -> Self {
        let mut replication = Replication::new(Arc::new(config));
        replication.install(0, network);
        replication
    }

    pub(crate) fn attach(&mut self, cancel: Arc<AtomicBool>, progress: Arc<WorkerProgress>) {
        self.cancel = cancel;
        self.progress = Some(progress);
    }

    /// Resets all per-run state and loads a freshly built model. The event
    /// pool is kept, so slots allocated by earlier runs are reused.
    pub fn install(&mut self, index: u32, network: Network) {
        self.queue.clear(&mut self.pool);
        self.queue.reset(self.config.tie_break);

        self.index = index;
        self.seed = self.config.seed.wrapping_add(u64::from(index));
        self.rng.reseed(self.seed);
        self.current_time = VirtualTime::ZERO;
        self.started = false;
        self.stop = false;
        self.halted = false;
        self.cancelled = false;
        self.fatal = None;

        self.is_warm_up = match self.config.warm_up {
            WarmUp::None => false,
            WarmUp::Time { until } => until > VirtualTime::ZERO,
            WarmUp::Arrivals { count } => count > 0,
        };
        self.warm_up_end_time = None;
        self.warm_up_transitions = 0;
        self.clients_arrived = 0;

        let Network {
            stations,
            resources,
            registry,
            termination_condition,
        } = network;
        self.state_listeners.clear();
        self.release_listeners.clear();
        self.stations = Vec::with_capacity(stations.len());
        for (i, behavior) in stations.into_iter().enumerate() {
            let id = StationId(i as u32);
            if behavior.listens_to_state_changes() {
                self.state_listeners.push(id);
            }
            if behavior.listens_to_released_resources() {
                self.release_listeners.push(id);
            }
            self.stations.push(StationSlot {
                name: behavior.name().to_string(),
                role: behavior.role(),
                counts_clients: behavior.is_client_count_station(),
                data: StationData::new(),
                behavior: Some(behavior),
            });
        }
        self.resources = resources;
        self.resources.reset_stats(VirtualTime::ZERO);
        self.registry = registry;
        self.termination_condition = termination_condition;
        self.clients.clear();
        self.statistics = RunStatistics::new(self.stations.len());

        self.timed_check_stations.clear();
        self.timed_check_scheduled = false;
        self.retrigger_at = None;
        self.in_broadcast = false;
        self.broadcast_again = false;

        self.counters = KernelCounters::default();
        self.events_by_kind = [0; EventKind::COUNT];
        self.queue_depth = RunningMean::default();
        self.max_queue_len = 0;
        self.warnings.clear();
        if let Some(trace) = &mut self.trace {
            trace.clear();
        }
        self.events_reported = 0;
    }

    /// Seeds the run's initial events. Called by `run`/`step` if needed.
    pub fn start(&mut self) -> Result<(), KernelError> {
        if self.started {
            return Ok(());
        }
        if !self.config.has_end_criterion() && self.termination_condition.is_none() {
            return Err(KernelError::NoEndCriterion);
        }
        self.started = true;

        let mut initial = Vec::new();
        if let WarmUp::Time { until } = self.config.warm_up {
            if self.is_warm_up {
                initial.push((until, EventPayload::EndWarmUp));
            }
        }
        for (_, resource) in self.resources.iter() {
            for down_time in resource.down_times() {
                initial.push((
                    down_time.end,
                    EventPayload::ResourcesReCheck {
                        auto_schedule_next: None,
                    },
                ));
            }
        }
        // Lets listening stations initialise themselves.
        initial.push((VirtualTime::ZERO, EventPayload::SystemChange));
        self.add_initial_events(initial)?;
        self.arm_failures()?;

        for i in 0..self.stations.len() {
            let id = StationId(i as u32);
            self.with_station(id, |station, sim| station.initial_events(sim, id))?;
        }

        info!(
            stations = self.stations.len(),
            resources = self.resources.len(),
            queued = self.queue.len(),
            "replication started"
        );
        Ok(())
    }

    /// Runs until the queue drains, the run is cancelled or shut down, or a
    /// fatal kernel error occurs.
    pub fn run(&mut self) -> Result<(), KernelError> {
        let span = info_span!("replication", index = self.index, seed = self.seed);
        let _guard = span.enter();

        let outcome = loop {
            match self.step() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.finish();
        outcome
    }

    /// Executes one event. Returns `Ok(false)` once the run is over.
    pub fn step(&mut self) -> Result<bool, KernelError> {
        if !self.started {
            if let Err(e) = self.start() {
                self.fail(e.clone());
                return Err(e);
            }
        }
        if self.halted {
            return Ok(false);
        }
        if self.cancel.load(Ordering::Relaxed) {
            self.cancelled = true;
            self.stop = true;
            self.halted = true;
            warn!(time = %self.current_time, "replication cancelled");
            return Ok(false);
        }

        let Some(next) = self.queue.peek_time(&self.pool) else {
            return Ok(false);
        };
        if let Some(end) = self.config.termination_time {
            if next > end {
                self.current_time = self.current_time.max(end);
                debug!(time = %end, "termination time reached");
                self.shut_down();
                return Ok(false);
            }
        }

        let Some(handle) = self.queue.pop(&mut self.pool) else {
            return Ok(false);
        };
        let Some((time, payload)) = self.pool.take(handle) else {
            return Ok(true);
        };
        self.current_time = time;
        let kind = payload.kind();
        self.counters.events_processed += 1;
        self.events_by_kind[kind.index()] += 1;
        trace!(time = %time, kind = %kind, "event");
        self.record(ProtocolEntry::EventStarted { time, kind });

        let result = self.dispatch(&payload);
        self.pool.recycle(handle, payload);
        self.sample_progress();

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_fatal() => {
                self.fail(e.clone());
                Err(e)
            }
            Err(e) => {
                self.warn(format!("{} event at {} failed: {}", kind, time, e));
                Ok(true)
            }
        }
    }

    fn dispatch(&mut self, payload: &EventPayload) -> Result<(), KernelError> {
        match payload {
            EventPayload::Arrival { station } => self.enter_network(*station).map(|_| ()),
            EventPayload::DeferredMove { moves, from, kind } => {
                self.run_deferred_move(moves, *from, *kind)
            }
            EventPayload::StationLeave {
                station,
                client,
                statistics,
            } => self.run_station_leave(*station, *client, *statistics),
            EventPayload::ReleaseResources {
                origin,
                station,
                resources,
                ..
            } => {
                trace!(?origin, station = station.0, "releasing resources");
                self.release_resources(resources)
            }
            EventPayload::ReleaseRecheck { station } => self.recheck_station(*station),
            EventPayload::ResourcesReCheck { auto_schedule_next } => {
                self.fire_released_resources_notify()?;
                self.fire_state_change_notify()?;
                if let Some(interval) = auto_schedule_next {
                    if interval.is_zero() {
                        self.warn("resource recheck with zero interval not rescheduled");
                    } else {
                        self.schedule_recurring(
                            *interval,
                            EventPayload::ResourcesReCheck {
                                auto_schedule_next: Some(*interval),
                            },
                        )?;
                    }
                }
                Ok(())
            }
            EventPayload::ResourceFailure { resource, failure } => {
                self.run_resource_failure(*resource, *failure)
            }
            EventPayload::TimedCheck => self.run_timed_check(),
            EventPayload::SystemChange => {
                if self.retrigger_at == Some(self.current_time) {
                    self.retrigger_at = None;
                }
                self.fire_state_change_notify()
            }
            EventPayload::FireSignal { signal } => self.fire_signal(*signal),
            EventPayload::TimedAction { station, action } => {
                self.run_timed_action(*station, *action)
            }
            EventPayload::EndWarmUp => {
                self.end_warm_up();
                Ok(())
            }
        }
    }

    fn fail(&mut self, error: KernelError) {
        error!(error = %error, time = %self.current_time, "fatal kernel error, stopping replication");
        self.queue.clear(&mut self.pool);
        self.stop = true;
        self.halted = true;
        self.fatal = Some(error);
    }

    fn finish(&mut self) {
        let leaked: usize = self.stations.iter().map(|s| s.data.announced_count()).sum();
        if leaked > 0 {
            self.warn(format!("{} announced arrivals never resolved", leaked));
        }
        self.statistics.finish(self.current_time);
        self.resources.close_stats(self.current_time);
        self.report_progress();
        info!(
            events = self.counters.events_processed,
            time = %self.current_time,
            clients_in_system = self.clients.in_system(),
            "replication finished"
        );
    }

    fn sample_progress(&mut self) {
        if self.counters.events_processed % self.config.progress_interval_events.max(1) != 0 {
            return;
        }
        let len = self.queue.len();
        self.queue_depth.add(len as f64);
        self.max_queue_len = self.max_queue_len.max(len);
        self.report_progress();
        debug!(
            events = self.counters.events_processed,
            queue_len = len,
            time = %self.current_time,
            "progress"
        );
    }

    fn report_progress(&mut self) {
        if let Some(progress) = &self.progress {
            let delta = self.counters.events_processed - self.events_reported;
            progress.record(delta, self.queue.len());
            self.events_reported = self.counters.events_processed;
        }
    }

    // ---- scheduling ----

    pub fn get_event(&mut self, kind: EventKind) -> EventHandle {
        self.pool.get_event(kind)
    }

    pub fn init_event(
        &mut self,
        handle: EventHandle,
        time: VirtualTime,
        payload: EventPayload,
    ) -> Result<(), KernelError> {
        self.pool.init(handle, time, payload)
    }

    pub fn event(&self, handle: EventHandle) -> Option<&Event> {
        self.pool.get(handle)
    }

    pub fn add_event(&mut self, handle: EventHandle) -> Result<(), KernelError> {
        self.queue.push(&mut self.pool, handle, self.current_time)
    }

    /// Queues an event from a self-rescheduling path. After a stop request
    /// the event is dropped and `Ok(false)` returned.
    pub fn add_recurring_event(&mut self, handle: EventHandle) -> Result<bool, KernelError> {
        if self.stop {
            self.pool.release(handle);
            return Ok(false);
        }
        if let Err(e) = self.add_event(handle) {
            // A duplicate is still queued under its first schedule.
            if !matches!(e, KernelError::DuplicateEvent { .. }) {
                self.pool.release(handle);
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Cancels a pending event. `false` if it already ran or was deleted.
    pub fn delete_event(&mut self, handle: EventHandle) -> bool {
        self.queue.delete(&mut self.pool, handle)
    }

    pub fn add_initial_events(
        &mut self,
        events: impl IntoIterator<Item = (VirtualTime, EventPayload)>,
    ) -> Result<Vec<EventHandle>, KernelError> {
        events
            .into_iter()
            .map(|(time, payload)| self.schedule_at(time, payload))
            .collect()
    }

    pub fn schedule_at(
        &mut self,
        time: VirtualTime,
        payload: EventPayload,
    ) -> Result<EventHandle, KernelError> {
        let handle = self.pool.get_event(payload.kind());
        let queued = self
            .pool
            .init(handle, time, payload)
            .and_then(|_| self.add_event(handle));
        match queued {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.pool.release(handle);
                Err(e)
            }
        }
    }

    pub fn schedule(&mut self, delay: Duration, payload: EventPayload) -> Result<EventHandle, KernelError> {
        self.schedule_at(self.current_time + delay, payload)
    }

    pub(crate) fn schedule_recurring(
        &mut self,
        delay: Duration,
        payload: EventPayload,
    ) -> Result<Option<EventHandle>, KernelError> {
        self.schedule_recurring_at(self.current_time + delay, payload)
    }

    pub(crate) fn schedule_recurring_at(
        &mut self,
        time: VirtualTime,
        payload: EventPayload,
    ) -> Result<Option<EventHandle>, KernelError> {
        let handle = self.pool.get_event(payload.kind());
        if let Err(e) = self.pool.init(handle, time, payload) {
            self.pool.release(handle);
            return Err(e);
        }
        Ok(self.add_recurring_event(handle)?.then_some(handle))
    }

    /// Schedules `client` to leave `station` after `delay`.
    pub fn schedule_leave(
        &mut self,
        station: StationId,
        client: ClientId,
        delay: Duration,
    ) -> Result<EventHandle, KernelError> {
        self.schedule(
            delay,
            EventPayload::StationLeave {
                station,
                client,
                statistics: true,
            },
        )
    }

    pub fn schedule_timed_action(
        &mut self,
        station: StationId,
        action: usize,
        delay: Duration,
    ) -> Result<EventHandle, KernelError> {
        self.schedule(delay, EventPayload::TimedAction { station, action })
    }

    /// Re-evaluates only `station` after `delay`.
    pub fn schedule_release_recheck(
        &mut self,
        station: StationId,
        delay: Duration,
    ) -> Result<EventHandle, KernelError> {
        self.schedule(delay, EventPayload::ReleaseRecheck { station })
    }

    // ---- stop / warm-up ----

    pub fn request_stop(&mut self) {
        if !self.stop {
            debug!(time = %self.current_time, "stop requested");
        }
        self.stop = true;
    }

    /// Deletes all pending events and stops the run.
    pub fn shut_down(&mut self) {
        if !self.halted {
            info!(time = %self.current_time, pending = self.queue.len(), "replication shut down");
        }
        self.queue.clear(&mut self.pool);
        self.stop = true;
        self.halted = true;
    }

    /// Shuts down and records `message` as a warning.
    pub fn emergency_shut_down(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.warn(format!("emergency shutdown at {}: {}", self.current_time, message));
        self.shut_down();
    }

    /// Ends the warm-up phase. Returns `false` if it already ended.
    pub fn end_warm_up(&mut self) -> bool {
        if !self.is_warm_up {
            return false;
        }
        let now = self.current_time;
        self.is_warm_up = false;
        self.warm_up_end_time = Some(now);
        self.warm_up_transitions += 1;
        self.clients_arrived = 0;
        self.statistics.reset_for_warm_up_end(now);
        for (i, slot) in self.stations.iter().enumerate() {
            if slot.counts_clients {
                self.statistics.log_client_enters_station(
                    now,
                    StationId(i as u32),
                    slot.data.clients_at_station,
                );
            }
        }
        self.resources.reset_stats(now);
        self.record(ProtocolEntry::WarmUpEnded { time: now });
        info!(time = %now, "warm-up ended");
        true
    }

    pub(crate) fn check_arrival_warm_up(&mut self) {
        if let WarmUp::Arrivals { count } = self.config.warm_up {
            if self.is_warm_up && self.clients_arrived >= count {
                self.end_warm_up();
            }
        }
    }

    // ---- evaluation ----

    /// Evaluates `expression`, returning `fallback` on failure.
    pub fn evaluate_or(
        &mut self,
        expression: &dyn Expression,
        client: Option<ClientId>,
        fallback: f64,
    ) -> f64 {
        let result = expression.evaluate(&EvalContext::new(self, client));
        match result {
            Ok(value) => value,
            Err(e) => {
                self.note_evaluation_failure(&e);
                fallback
            }
        }
    }

    pub(crate) fn note_evaluation_failure(&mut self, error: &EvalError) {
        self.counters.evaluation_failures += 1;
        debug!(error = %error, "expression evaluation failed, using fallback");
        if self.config.stop_on_evaluation_error {
            self.emergency_shut_down(format!("expression evaluation failed: {}", error));
        }
    }

    // ---- station access ----

    /// Runs `f` with the station detached from the replication. `Ok(None)`
    /// if the station is already detached by an enclosing hook.
    pub(crate) fn with_station<R>(
        &mut self,
        id: StationId,
        f: impl FnOnce(&mut dyn Station, &mut Replication) -> Result<R, KernelError>,
    ) -> Result<Option<R>, KernelError> {
        let slot = self
            .stations
            .get_mut(id.index())
            .ok_or(KernelError::UnknownStation(id))?;
        let Some(mut behavior) = slot.behavior.take() else {
            return Ok(None);
        };
        let result = f(behavior.as_mut(), self);
        self.stations[id.index()].behavior = Some(behavior);
        result.map(Some)
    }

    pub(crate) fn record(&mut self, entry: ProtocolEntry) {
        if let Some(trace) = &mut self.trace {
            trace.push(entry);
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(time = %self.current_time, "{}", message);
        self.warnings.push(message);
    }

    /// Records protocol steps from now on; see [`ProtocolEntry`].
    pub fn enable_protocol_trace(&mut self) {
        self.trace.get_or_insert_with(Vec::new);
    }

    pub fn protocol_trace(&self) -> &[ProtocolEntry] {
        self.trace.as_deref().unwrap_or(&[])
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn now(&self) -> VirtualTime {
        self.current_time
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn is_warm_up(&self) -> bool {
        self.is_warm_up
    }

    pub fn warm_up_end_time(&self) -> Option<VirtualTime> {
        self.warm_up_end_time
    }

    pub fn stop_requested(&self) -> bool {
        self.stop
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn fatal_error(&self) -> Option<&KernelError> {
        self.fatal.as_ref()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn station_data(&self, id: StationId) -> Option<&StationData> {
        self.stations.get(id.index()).map(|s| &s.data)
    }

    pub fn station_data_mut(&mut self, id: StationId) -> Option<&mut StationData> {
        self.stations.get_mut(id.index()).map(|s| &mut s.data)
    }

    pub fn station_name(&self, id: StationId) -> Option<&str> {
        self.stations.get(id.index()).map(|s| s.name.as_str())
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.statistics
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn counters(&self) -> &KernelCounters {
        &self.counters
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn events_of_kind(&self, kind: EventKind) -> u64 {
        self.events_by_kind[kind.index()]
    }

    pub fn report(&self) -> ReplicationReport {
        ReplicationReport {
            index: self.index,
            seed: self.seed,
            end_time: self.current_time,
            events_processed: self.counters.events_processed,
            events_by_kind: EventKind::ALL
                .iter()
                .map(|k| (k.name(), self.events_by_kind[k.index()]))
                .filter(|(_, n)| *n > 0)
                .collect(),
            mean_queue_len: self.queue_depth.mean,
            max_queue_len: self.max_queue_len,
            warm_up_end: self.warm_up_end_time,
            warm_up_transitions: self.warm_up_transitions,
            clients_created: self.clients.created(),
            clients_disposed: self.clients.disposed(),
            clients_in_system: self.clients.in_system(),
            leaked_announcements: self
                .stations
                .iter()
                .map(|s| s.data.announced_count())
                .sum(),
            counters: self.counters.clone(),
            pool: self.pool.stats(),
            resources: self
                .resources
                .iter()
                .map(|(_, r)| ResourceReport::from_resource(r, self.current_time))
                .collect(),
            statistics: self.statistics.clone(),
            warnings: self.warnings.clone(),
            fatal: self.fatal.as_ref().map(|e| e.to_string()),
            cancelled: self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn empty(config: SimulationConfig) -> Replication {
        Replication::with_network(config, Network::new(Arc::new(Registry::new())))
    }

    #[test]
    fn test_empty_model_runs_initial_broadcast_only() {
        let mut sim = empty(SimulationConfig::test());
        sim.run().unwrap();
        assert_eq!(sim.events_of_kind(EventKind::SystemChange), 1);
        assert_eq!(sim.now(), VirtualTime::ZERO);
        assert!(sim.warnings().is_empty());
    }

    #[test]
    fn test_warm_up_event_twice_single_transition() {
        let config = SimulationConfig::test().with_warm_up(WarmUp::Time {
            until: VirtualTime(100),
        });
        let mut sim = empty(config);
        sim.add_initial_events([(VirtualTime(200), EventPayload::EndWarmUp)])
            .unwrap();
        sim.run().unwrap();

        assert_eq!(sim.events_of_kind(EventKind::EndWarmUp), 2);
        assert_eq!(sim.report().warm_up_transitions, 1);
        assert_eq!(sim.warm_up_end_time(), Some(VirtualTime(100)));
        assert!(!sim.is_warm_up());
    }

    #[test]
    fn test_recurring_add_dropped_after_stop() {
        let mut sim = empty(SimulationConfig::test());
        sim.request_stop();
        let handle = sim.get_event(EventKind::TimedCheck);
        sim.init_event(handle, VirtualTime(10), EventPayload::TimedCheck)
            .unwrap();
        assert!(!sim.add_recurring_event(handle).unwrap());
        assert_eq!(sim.queue_len(), 0);
        assert!(sim.event(handle).is_none());
    }

    #[test]
    fn test_termination_time_drops_later_events() {
        let config = SimulationConfig::test().with_termination_time(VirtualTime(1000));
        let mut sim = empty(config);
        sim.add_initial_events([
            (VirtualTime(500), EventPayload::SystemChange),
            (VirtualTime(5000), EventPayload::SystemChange),
        ])
        .unwrap();
        sim.run().unwrap();

        assert_eq!(sim.events_of_kind(EventKind::SystemChange), 2);
        assert_eq!(sim.now(), VirtualTime(1000));
        assert_eq!(sim.queue_len(), 0);
        assert!(sim.is_halted());
    }

    #[test]
    fn test_cancel_flag_stops_before_next_event() {
        let mut sim = empty(SimulationConfig::test());
        sim.add_initial_events([(VirtualTime(10), EventPayload::SystemChange)])
            .unwrap();
        sim.cancel.store(true, Ordering::Relaxed);
        sim.run().unwrap();
        assert_eq!(sim.counters().events_processed, 0);
        assert!(sim.report().cancelled);
    }

    #[test]
    fn test_install_resets_between_runs_and_keeps_pool() {
        let mut sim = empty(SimulationConfig::test());
        sim.add_initial_events((1..=20).map(|t| (VirtualTime(t), EventPayload::SystemChange)))
            .unwrap();
        sim.run().unwrap();
        let capacity = sim.pool.capacity();

        sim.install(1, Network::new(Arc::new(Registry::new())));
        assert_eq!(sim.now(), VirtualTime::ZERO);
        assert_eq!(sim.seed(), 43);
        sim.add_initial_events((1..=20).map(|t| (VirtualTime(t), EventPayload::SystemChange)))
            .unwrap();
        sim.run().unwrap();
        assert_eq!(sim.pool.capacity(), capacity);
        assert_eq!(sim.counters().events_processed, 21);
    }

    #[test]
    fn test_emergency_shutdown_records_warning() {
        let mut sim = empty(SimulationConfig::test());
        sim.add_initial_events([(VirtualTime(10), EventPayload::SystemChange)])
            .unwrap();
        sim.emergency_shut_down("too many clients");
        assert_eq!(sim.queue_len(), 0);
        assert_eq!(sim.warnings().len(), 1);
        assert!(sim.warnings()[0].contains("too many clients"));
        sim.run().unwrap();
        assert_eq!(sim.counters().events_processed, 0);
    }

    #[test]
    fn test_schedule_in_past_is_fatal() {
        let mut sim = empty(SimulationConfig::test());
        sim.add_initial_events([(VirtualTime(10), EventPayload::SystemChange)])
            .unwrap();
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.now(), VirtualTime(10));
        let err = sim
            .schedule_at(VirtualTime(5), EventPayload::SystemChange)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(sim.pool.in_use(), 0);
    }
}
