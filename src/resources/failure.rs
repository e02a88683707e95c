//! Unit failures
//!
//! A failure model takes one unit of a fixed-capacity resource out of
//! service for a sampled down time. Usage-driven triggers count services or
//! busy unit time across the whole pool and fire when a unit is released,
//! so the failing unit is always an idle one. Time-driven triggers run one
//! clock per unit: the next failure of that unit is due one uptime after
//! its repair.
//!
//! ```text
//! failure ──► window [now, now + down) ──► ResourcesReCheck at repair
//!    ▲                                             │
//!    └──────────── uptime (time-driven only) ◄─────┘
//! ```

use super::{Capacity, ResourceId, Resources};
use crate::error::KernelError;
use crate::expression::Expression;
use crate::sampler::Sampler;
use crate::simulator::{Duration, EventPayload, Replication, VirtualTime};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// When a unit fails.
#[derive(Clone)]
pub enum FailureTrigger {
    /// After this many services since the previous failure
    Services(u64),
    /// After this much available time
    AvailableTime(Duration),
    /// After this much busy unit time since the previous failure
    WorkingTime(Duration),
    /// After a sampled available time
    Sampled(Arc<dyn Sampler>),
    /// After an available time in seconds; a non-positive or failed
    /// evaluation means the unit does not fail again
    Computed(Arc<dyn Expression>),
}

impl fmt::Debug for FailureTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureTrigger::Services(n) => f.debug_tuple("Services").field(n).finish(),
            FailureTrigger::AvailableTime(d) => f.debug_tuple("AvailableTime").field(d).finish(),
            FailureTrigger::WorkingTime(d) => f.debug_tuple("WorkingTime").field(d).finish(),
            FailureTrigger::Sampled(s) => f.debug_struct("Sampled").field("mean", &s.mean()).finish(),
            FailureTrigger::Computed(_) => f.write_str("Computed"),
        }
    }
}

#[derive(Clone)]
pub struct Failure {
    trigger: FailureTrigger,
    down_time: Arc<dyn Sampler>,
    services: u64,
    worked_ms: u64,
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("trigger", &self.trigger)
            .field("mean_down_time", &self.down_time.mean())
            .field("services", &self.services)
            .field("worked_ms", &self.worked_ms)
            .finish()
    }
}

impl Failure {
    pub fn new(trigger: FailureTrigger, down_time: impl Sampler + 'static) -> Self {
        Failure {
            trigger,
            down_time: Arc::new(down_time),
            services: 0,
            worked_ms: 0,
        }
    }

    pub fn after_services(count: u64, down_time: impl Sampler + 'static) -> Self {
        Self::new(FailureTrigger::Services(count), down_time)
    }

    pub fn after_available_time(uptime: Duration, down_time: impl Sampler + 'static) -> Self {
        Self::new(FailureTrigger::AvailableTime(uptime), down_time)
    }

    pub fn after_working_time(work: Duration, down_time: impl Sampler + 'static) -> Self {
        Self::new(FailureTrigger::WorkingTime(work), down_time)
    }

    pub fn after_sampled_uptime(uptime: impl Sampler + 'static, down_time: impl Sampler + 'static) -> Self {
        Self::new(FailureTrigger::Sampled(Arc::new(uptime)), down_time)
    }

    pub fn after_computed_uptime(uptime: impl Expression + 'static, down_time: impl Sampler + 'static) -> Self {
        Self::new(FailureTrigger::Computed(Arc::new(uptime)), down_time)
    }

    pub fn trigger(&self) -> &FailureTrigger {
        &self.trigger
    }

    pub(crate) fn is_time_driven(&self) -> bool {
        matches!(
            self.trigger,
            FailureTrigger::AvailableTime(_) | FailureTrigger::Sampled(_) | FailureTrigger::Computed(_)
        )
    }

    pub(super) fn record_services(&mut self, units: u64) {
        if let FailureTrigger::Services(_) = self.trigger {
            self.services = self.services.saturating_add(units);
        }
    }

    pub(super) fn record_work(&mut self, unit_ms: u64) {
        if let FailureTrigger::WorkingTime(_) = self.trigger {
            self.worked_ms = self.worked_ms.saturating_add(unit_ms);
        }
    }

    /// Usage-driven failures that became due, consuming their counts.
    fn take_due(&mut self) -> u32 {
        let mut due = 0;
        match self.trigger {
            FailureTrigger::Services(n) if n > 0 => {
                while self.services >= n {
                    self.services -= n;
                    due += 1;
                }
            }
            FailureTrigger::WorkingTime(work) if !work.is_zero() => {
                while self.worked_ms >= work.as_millis() {
                    self.worked_ms -= work.as_millis();
                    due += 1;
                }
            }
            _ => {}
        }
        due
    }
}

impl Resources {
    /// Indices of usage-driven failures of `id` that are due, one entry per
    /// unit to take down.
    pub(crate) fn take_due_failures(&mut self, id: ResourceId) -> Vec<usize> {
        let Some(resource) = self.items.get_mut(id.index()) else {
            return Vec::new();
        };
        if !matches!(resource.capacity, Capacity::Fixed(_)) {
            return Vec::new();
        }
        let mut due = Vec::new();
        for (index, failure) in resource.failures.iter_mut().enumerate() {
            for _ in 0..failure.take_due() {
                due.push(index);
            }
        }
        due
    }
}

impl Replication {
    /// Starts one failure clock per unit for every time-driven failure.
    pub(crate) fn arm_failures(&mut self) -> Result<(), KernelError> {
        let mut clocks = Vec::new();
        let mut ignored = Vec::new();
        for (id, resource) in self.resources.iter() {
            if resource.failures().is_empty() {
                continue;
            }
            let Capacity::Fixed(units) = *resource.capacity() else {
                ignored.push(resource.name().to_string());
                continue;
            };
            for (index, failure) in resource.failures().iter().enumerate() {
                if failure.is_time_driven() {
                    clocks.extend((0..units).map(|_| (id, index)));
                }
            }
        }
        for name in ignored {
            self.warn(format!("failures of resource {} ignored: capacity is not a fixed count", name));
        }
        for (resource, failure) in clocks {
            if let Some(uptime) = self.failure_uptime(resource, failure) {
                self.schedule_recurring(uptime, EventPayload::ResourceFailure { resource, failure })?;
            }
        }
        Ok(())
    }

    /// Takes one unit down and re-arms the unit's clock behind its repair.
    pub(crate) fn run_resource_failure(&mut self, resource: ResourceId, failure: usize) -> Result<(), KernelError> {
        let repaired = self.fail_unit(resource, failure)?;
        if let Some(uptime) = self.failure_uptime(resource, failure) {
            self.schedule_recurring_at(repaired + uptime, EventPayload::ResourceFailure { resource, failure })?;
        }
        Ok(())
    }

    /// Takes down the units whose usage-driven failures became due.
    pub(crate) fn check_usage_failures(&mut self, resource: ResourceId) -> Result<(), KernelError> {
        for failure in self.resources.take_due_failures(resource) {
            self.fail_unit(resource, failure)?;
        }
        Ok(())
    }

    /// Opens a one-unit down window and queues the recheck at its end.
    /// Returns the repair time.
    fn fail_unit(&mut self, resource: ResourceId, failure: usize) -> Result<VirtualTime, KernelError> {
        let down_time = self
            .resources
            .get(resource)
            .and_then(|r| r.failures().get(failure))
            .map(|f| f.down_time.clone())
            .ok_or(KernelError::UnknownResource(resource))?;
        let down = down_time.sample(&mut self.rng);
        let now = self.current_time;
        let repaired = self
            .resources
            .get_mut(resource)
            .ok_or(KernelError::UnknownResource(resource))?
            .fail_unit(now, down);
        self.counters.resource_failures += 1;
        debug!(resource = resource.0, until = %repaired, "resource unit failed");
        self.schedule_at(
            repaired,
            EventPayload::ResourcesReCheck {
                auto_schedule_next: None,
            },
        )?;
        Ok(repaired)
    }

    /// Available time before the next failure; at least one millisecond so
    /// a unit never fails twice at the same instant.
    fn failure_uptime(&mut self, resource: ResourceId, failure: usize) -> Option<Duration> {
        let trigger = self.resources.get(resource)?.failures().get(failure)?.trigger().clone();
        let uptime = match trigger {
            FailureTrigger::AvailableTime(uptime) => uptime,
            FailureTrigger::Sampled(sampler) => sampler.sample(&mut self.rng),
            FailureTrigger::Computed(expression) => {
                let secs = self.evaluate_or(expression.as_ref(), None, -1.0);
                if secs <= 0.0 {
                    return None;
                }
                Duration::from_secs_f64(secs)
            }
            FailureTrigger::Services(_) | FailureTrigger::WorkingTime(_) => return None,
        };
        Some(uptime.max(Duration::from_millis(1)))
    }
}
