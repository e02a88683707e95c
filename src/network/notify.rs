//! State-change notification
//!
//! Stations that wait on a condition (free resources, an expression, a
//! signal) are woken by broadcasts instead of polling:
//!
//! | Trigger                         | Broadcast                          |
//! |---------------------------------|------------------------------------|
//! | client moved / left             | state change                       |
//! | resources released              | released resources, state change   |
//! | capacity grew / down time ended | released resources, state change   |
//! | signal fired                    | signal hooks, state change         |
//! | timed check                     | registered stations only           |
//!
//! A broadcast requested while one is running does not recurse; it turns
//! into another round of the running broadcast. A station that reports
//! new work gets a retrigger: one `SystemChange` event shortly after, so
//! stations see the effects of that work.

use super::StationId;
use crate::error::KernelError;
use crate::expression::{EvalContext, EvalError};
use crate::registry::SignalId;
use crate::simulator::{Duration, EventHandle, EventPayload, ProtocolEntry, Replication};
use rand::RngCore;
use tracing::{debug, info, trace};

/// Upper bound on rounds of one broadcast.
const MAX_BROADCAST_ROUNDS: u32 = 16;

impl Replication {
    /// Lets every state-change listener re-evaluate, then checks the
    /// termination conditions.
    pub fn fire_state_change_notify(&mut self) -> Result<(), KernelError> {
        if self.in_broadcast {
            self.broadcast_again = true;
            return Ok(());
        }
        self.counters.state_change_notifies += 1;
        self.record(ProtocolEntry::StateChangeNotify {
            time: self.current_time,
        });

        self.in_broadcast = true;
        let outcome = self.broadcast();
        self.in_broadcast = false;
        self.broadcast_again = false;
        outcome?;

        self.check_termination();
        Ok(())
    }

    fn broadcast(&mut self) -> Result<(), KernelError> {
        let mut rounds = 0;
        loop {
            self.broadcast_again = false;
            rounds += 1;
            self.counters.broadcast_rounds += 1;

            let mut started_work = false;
            for i in 0..self.state_listeners.len() {
                if self.halted {
                    return Ok(());
                }
                let id = self.state_listeners[i];
                if self.notify_station(id)? {
                    started_work = true;
                }
            }
            if started_work {
                self.schedule_retrigger()?;
            }

            if !self.broadcast_again {
                return Ok(());
            }
            if rounds >= MAX_BROADCAST_ROUNDS {
                debug!(rounds, time = %self.current_time, "broadcast round limit reached, retriggering");
                return self.schedule_retrigger();
            }
        }
    }

    fn notify_station(&mut self, id: StationId) -> Result<bool, KernelError> {
        self.record(ProtocolEntry::StationNotified {
            time: self.current_time,
            station: id,
        });
        let changed = self.with_station(id, |station, sim| station.system_state_change_notify(sim, id))?;
        Ok(changed.unwrap_or(false))
    }

    fn schedule_retrigger(&mut self) -> Result<(), KernelError> {
        let at = self.current_time + self.config.state_change_retrigger;
        if self.retrigger_at == Some(at) {
            return Ok(());
        }
        if self.schedule_recurring_at(at, EventPayload::SystemChange)?.is_some() {
            self.retrigger_at = Some(at);
            self.counters.retriggers += 1;
        }
        Ok(())
    }

    fn check_termination(&mut self) {
        if self.halted {
            return;
        }
        if let Some(end) = self.config.termination_time {
            if self.current_time > end {
                info!(time = %self.current_time, "termination time passed");
                self.shut_down();
                return;
            }
        }
        if let Some(condition) = self.termination_condition.take() {
            let value = self.evaluate_or(condition.as_ref(), None, 0.0);
            self.termination_condition = Some(condition);
            if value > 0.0 {
                info!(time = %self.current_time, "termination condition met");
                self.shut_down();
            }
        }
    }

    /// Offers freed resources to waiting stations, highest priority first.
    /// Stations of equal priority are offered in random order.
    pub fn fire_released_resources_notify(&mut self) -> Result<(), KernelError> {
        self.counters.released_resources_notifies += 1;
        self.record(ProtocolEntry::ReleasedResourcesNotify {
            time: self.current_time,
        });
        if self.release_listeners.is_empty() {
            return Ok(());
        }

        let mut failures: Vec<EvalError> = Vec::new();
        let mut ranked: Vec<(f64, u64, StationId)> = Vec::with_capacity(self.release_listeners.len());
        for &id in &self.release_listeners {
            let priority = self.stations[id.index()]
                .behavior
                .as_deref()
                .and_then(|s| s.resource_priority())
                .map(|expr| expr.evaluate(&EvalContext::new(self, None)));
            let priority = match priority {
                Some(Ok(value)) => value,
                Some(Err(e)) => {
                    failures.push(e);
                    0.0
                }
                None => 0.0,
            };
            ranked.push((priority, 0, id));
        }
        for e in &failures {
            self.note_evaluation_failure(e);
        }
        if ranked.len() > 1 {
            for entry in &mut ranked {
                entry.1 = self.rng.next_u64();
            }
            ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        }

        for (_, _, id) in ranked {
            if self.halted {
                break;
            }
            self.record(ProtocolEntry::StationNotified {
                time: self.current_time,
                station: id,
            });
            let acquired = self.with_station(id, |station, sim| station.released_resources_notify(sim, id))?;
            if acquired == Some(true) {
                trace!(station = id.0, "station acquired released resources");
            }
        }
        Ok(())
    }

    /// Runs the released-resources hook of one station only.
    pub(crate) fn recheck_station(&mut self, id: StationId) -> Result<(), KernelError> {
        self.record(ProtocolEntry::StationNotified {
            time: self.current_time,
            station: id,
        });
        if self.with_station(id, |station, sim| station.released_resources_notify(sim, id))? == Some(true) {
            self.fire_state_change_notify()?;
        }
        Ok(())
    }

    /// Registers `station` for periodic timed checks. Without a configured
    /// interval this does nothing.
    pub fn request_timed_checks(&mut self, station: StationId) -> Result<(), KernelError> {
        let interval = self.config.timed_check_interval;
        if interval.is_zero() {
            return Ok(());
        }
        self.timed_check_stations.insert(station);
        if !self.timed_check_scheduled {
            self.timed_check_scheduled = self
                .schedule_recurring(interval, EventPayload::TimedCheck)?
                .is_some();
        }
        Ok(())
    }

    /// Runs one timed-check pass. Interested stations are notified in id
    /// order until one starts work; one uninterested station is dropped
    /// from the set. Returns whether any station remains registered.
    pub fn run_timed_check_now(&mut self) -> Result<bool, KernelError> {
        self.counters.timed_checks += 1;
        let registered: Vec<StationId> = self.timed_check_stations.iter().copied().collect();
        let mut uninterested = None;
        for id in registered {
            let interested = self
                .stations
                .get(id.index())
                .and_then(|slot| slot.behavior.as_deref())
                .map(|station| station.interested_in_timed_checks(self, id));
            match interested {
                Some(true) => {
                    if self.notify_station(id)? {
                        self.schedule_retrigger()?;
                        break;
                    }
                }
                Some(false) => {
                    uninterested.get_or_insert(id);
                }
                None => {}
            }
        }
        if let Some(id) = uninterested {
            self.timed_check_stations.remove(&id);
        }
        Ok(!self.timed_check_stations.is_empty())
    }

    pub(crate) fn run_timed_check(&mut self) -> Result<(), KernelError> {
        self.timed_check_scheduled = false;
        if self.run_timed_check_now()? {
            let interval = self.config.timed_check_interval;
            self.timed_check_scheduled = self
                .schedule_recurring(interval, EventPayload::TimedCheck)?
                .is_some();
        }
        Ok(())
    }

    /// Delivers `signal` to every station, then broadcasts.
    pub fn fire_signal(&mut self, signal: SignalId) -> Result<(), KernelError> {
        self.counters.signals += 1;
        debug!(
            signal = self.registry.signal_name(signal).unwrap_or("?"),
            time = %self.current_time,
            "signal"
        );
        for i in 0..self.stations.len() {
            let id = StationId(i as u32);
            self.with_station(id, |station, sim| station.signal(sim, id, signal))?;
        }
        self.fire_state_change_notify()
    }

    pub fn fire_signal_delayed(&mut self, signal: SignalId, delay: Duration) -> Result<EventHandle, KernelError> {
        self.schedule(delay, EventPayload::FireSignal { signal })
    }

    pub(crate) fn run_timed_action(&mut self, station: StationId, action: usize) -> Result<(), KernelError> {
        let handled = self.with_station(station, |s, sim| s.timed_action(sim, station, action))?;
        if handled.is_none() {
            self.warn(format!("station {} busy, timed action {} dropped", station.0, action));
        }
        self.fire_state_change_notify()
    }
}
