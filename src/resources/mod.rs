//! Resources
//!
//! Capacity pools shared by the stations of one replication. Allocation is
//! all-or-nothing over a list of [`ResourceUse`]s; release happens through
//! release events scheduled at allocation time (see `protocol`).
//!
//! Capacity comes from one of three models:
//!
//! - `Fixed(n)`: constant, adjustable at runtime with `set_count`
//! - `Infinite`: never blocks
//! - `Schedule`: one value per time slot, optionally repeating
//!
//! Down-time windows reduce capacity while active. A reduction never
//! preempts busy units: `available = max(capacity, busy)`, so `busy` can
//! only drain until it fits again. Failures (see `failure`) take single
//! units down by opening such windows while the replication runs.

mod failure;
mod protocol;

pub use failure::{Failure, FailureTrigger};

use crate::error::KernelError;
use crate::simulator::{Duration, VirtualTime};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Units of one resource needed by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUse {
    pub resource: ResourceId,
    pub units: u32,
}

impl ResourceUse {
    pub fn new(resource: ResourceId, units: u32) -> Self {
        ResourceUse { resource, units }
    }
}

/// Capacity per time slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub slot: Duration,
    pub values: Vec<u32>,
    /// Start over after the last slot; otherwise the last value holds.
    pub repeat: bool,
}

impl Schedule {
    pub fn value_at(&self, now: VirtualTime) -> u32 {
        if self.values.is_empty() || self.slot.is_zero() {
            return 0;
        }
        let slot = (now.as_millis() / self.slot.as_millis()) as usize;
        let index = if self.repeat {
            slot % self.values.len()
        } else {
            slot.min(self.values.len() - 1)
        };
        self.values[index]
    }

    /// Start of the slot following the one containing `now`.
    pub fn next_boundary(&self, now: VirtualTime) -> VirtualTime {
        let slot = self.slot.as_millis().max(1);
        VirtualTime((now.as_millis() / slot + 1) * slot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity {
    Fixed(u32),
    Infinite,
    Schedule(Schedule),
}

/// Interval during which `units` of a resource are out of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownTime {
    pub start: VirtualTime,
    pub end: VirtualTime,
    pub units: u32,
}

impl DownTime {
    pub fn is_active(&self, now: VirtualTime) -> bool {
        self.start <= now && now < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceStats {
    pub acquisitions: u64,
    pub released_units: u64,
    /// Units released beyond the busy count (clamped)
    pub over_released_units: u64,
    pub max_busy: u32,
    /// Units taken down by failures
    pub failures: u64,
    busy_integral: f64,
    since: VirtualTime,
    last_change: VirtualTime,
}

impl ResourceStats {
    fn advance(&mut self, now: VirtualTime, busy: u32) {
        let span = now.saturating_since(self.last_change);
        self.busy_integral += span.as_millis() as f64 * f64::from(busy);
        self.last_change = now;
    }

    /// Time-averaged busy units since the last reset.
    pub fn mean_busy(&self) -> f64 {
        let span = self.last_change.saturating_since(self.since).as_millis();
        if span == 0 {
            0.0
        } else {
            self.busy_integral / span as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    capacity: Capacity,
    down_times: Vec<DownTime>,
    failures: Vec<Failure>,
    busy: u32,
    schedule_armed: bool,
    stats: ResourceStats,
}

impl Resource {
    pub fn new(name: impl Into<String>, capacity: Capacity) -> Self {
        Resource {
            name: name.into(),
            capacity,
            down_times: Vec::new(),
            failures: Vec::new(),
            busy: 0,
            schedule_armed: false,
            stats: ResourceStats::default(),
        }
    }

    pub fn fixed(name: impl Into<String>, count: u32) -> Self {
        Self::new(name, Capacity::Fixed(count))
    }

    pub fn infinite(name: impl Into<String>) -> Self {
        Self::new(name, Capacity::Infinite)
    }

    pub fn with_down_time(mut self, down_time: DownTime) -> Self {
        self.down_times.push(down_time);
        self
    }

    /// Adds a failure model. Only fixed capacities fail; on other
    /// capacities the failure is ignored with a warning at start.
    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failures.push(failure);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    /// Configured windows plus those opened by failures so far.
    pub fn down_times(&self) -> &[DownTime] {
        &self.down_times
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn busy(&self) -> u32 {
        self.busy
    }

    pub fn stats(&self) -> &ResourceStats {
        &self.stats
    }

    /// Units out of service at `now`.
    pub fn down_units(&self, now: VirtualTime) -> u32 {
        self.down_times
            .iter()
            .filter(|d| d.is_active(now))
            .fold(0u32, |sum, d| sum.saturating_add(d.units))
    }

    /// Capacity in effect at `now`; `None` for infinite resources.
    pub fn capacity_at(&self, now: VirtualTime) -> Option<u32> {
        let base = match &self.capacity {
            Capacity::Fixed(n) => *n,
            Capacity::Infinite => return None,
            Capacity::Schedule(schedule) => schedule.value_at(now),
        };
        Some(base.saturating_sub(self.down_units(now)))
    }

    /// Units that count as available; never below `busy`.
    pub fn available(&self, now: VirtualTime) -> Option<u32> {
        self.capacity_at(now).map(|c| c.max(self.busy))
    }

    pub fn free_units(&self, now: VirtualTime) -> Option<u32> {
        self.capacity_at(now).map(|c| c.saturating_sub(self.busy))
    }

    pub fn can_acquire(&self, units: u32, now: VirtualTime) -> bool {
        match self.free_units(now) {
            None => true,
            Some(free) => free >= units,
        }
    }

    /// Down for all units at `now`.
    pub fn is_down(&self, now: VirtualTime) -> bool {
        !self.down_times.is_empty() && self.capacity_at(now) == Some(0)
    }

    fn advance(&mut self, now: VirtualTime) {
        let span = now.saturating_since(self.stats.last_change).as_millis();
        let worked = span.saturating_mul(u64::from(self.busy));
        for failure in &mut self.failures {
            failure.record_work(worked);
        }
        self.stats.advance(now, self.busy);
    }

    fn acquire(&mut self, units: u32, now: VirtualTime) {
        self.advance(now);
        self.busy = self.busy.saturating_add(units);
        self.stats.acquisitions += 1;
        self.stats.max_busy = self.stats.max_busy.max(self.busy);
    }

    /// Returns the units that exceeded the busy count.
    fn release(&mut self, units: u32, now: VirtualTime) -> u32 {
        self.advance(now);
        let over = units.saturating_sub(self.busy);
        self.busy -= units - over;
        self.stats.released_units += u64::from(units - over);
        self.stats.over_released_units += u64::from(over);
        for failure in &mut self.failures {
            failure.record_services(u64::from(units - over));
        }
        over
    }

    /// Takes one unit down for `[now, now + down)`. Windows that already
    /// ended are dropped.
    fn fail_unit(&mut self, now: VirtualTime, down: Duration) -> VirtualTime {
        self.down_times.retain(|d| d.end > now);
        let end = now + down;
        self.down_times.push(DownTime {
            start: now,
            end,
            units: 1,
        });
        self.stats.failures += 1;
        end
    }

    fn reset_stats(&mut self, now: VirtualTime) {
        self.advance(now);
        self.stats = ResourceStats {
            max_busy: self.busy,
            since: now,
            last_change: now,
            ..Default::default()
        };
    }
}

/// Resources of one replication, indexed by [`ResourceId`].
#[derive(Debug, Clone, Default)]
pub struct Resources {
    items: Vec<Resource>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: Resource) -> ResourceId {
        self.items.push(resource);
        ResourceId((self.items.len() - 1) as u32)
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.items.get(id.index())
    }

    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.items
            .iter()
            .position(|r| r.name == name)
            .map(|i| ResourceId(i as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId(i as u32), r))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether every use in `uses` can be served at `now`. Units of the same
    /// resource listed twice are summed.
    pub fn can_acquire(&self, uses: &[ResourceUse], now: VirtualTime) -> Result<bool, KernelError> {
        for (i, u) in uses.iter().enumerate() {
            let resource = self
                .get(u.resource)
                .ok_or(KernelError::UnknownResource(u.resource))?;
            let total = uses[..=i]
                .iter()
                .filter(|other| other.resource == u.resource)
                .fold(0u32, |sum, other| sum.saturating_add(other.units));
            if !resource.can_acquire(total, now) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Acquires all of `uses` or nothing.
    pub fn try_acquire(&mut self, uses: &[ResourceUse], now: VirtualTime) -> Result<bool, KernelError> {
        if !self.can_acquire(uses, now)? {
            return Ok(false);
        }
        for u in uses {
            self.items[u.resource.index()].acquire(u.units, now);
        }
        Ok(true)
    }

    /// Returns units that were released beyond the busy count.
    pub fn release(&mut self, id: ResourceId, units: u32, now: VirtualTime) -> Result<u32, KernelError> {
        let resource = self
            .items
            .get_mut(id.index())
            .ok_or(KernelError::UnknownResource(id))?;
        Ok(resource.release(units, now))
    }

    /// Changes a fixed capacity. Returns `true` when capacity grew.
    pub fn set_count(&mut self, id: ResourceId, count: u32) -> Result<bool, KernelError> {
        let resource = self
            .items
            .get_mut(id.index())
            .ok_or(KernelError::UnknownResource(id))?;
        if !resource.down_times.is_empty() || !resource.failures.is_empty() {
            return Err(KernelError::CapacityNotAdjustable(id));
        }
        match &mut resource.capacity {
            Capacity::Fixed(n) => {
                let grew = count > *n;
                *n = count;
                Ok(grew)
            }
            _ => Err(KernelError::CapacityNotAdjustable(id)),
        }
    }

    /// Schedule-driven resources among `uses` not yet armed. Each is marked
    /// armed; the caller queues the periodic recheck.
    pub(crate) fn arm_schedules(&mut self, uses: &[ResourceUse]) -> Vec<(ResourceId, Schedule)> {
        let mut armed = Vec::new();
        for u in uses {
            if let Some(resource) = self.items.get_mut(u.resource.index()) {
                if let Capacity::Schedule(schedule) = &resource.capacity {
                    if !resource.schedule_armed {
                        resource.schedule_armed = true;
                        armed.push((u.resource, schedule.clone()));
                    }
                }
            }
        }
        armed
    }

    pub(crate) fn reset_stats(&mut self, now: VirtualTime) {
        for resource in &mut self.items {
            resource.reset_stats(now);
        }
    }

    pub(crate) fn close_stats(&mut self, now: VirtualTime) {
        for resource in &mut self.items {
            resource.advance(now);
        }
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.items.get_mut(id.index())
    }

    /// Units busy across all resources.
    pub fn total_busy(&self) -> u64 {
        self.items.iter().map(|r| u64::from(r.busy)).sum()
    }
}
