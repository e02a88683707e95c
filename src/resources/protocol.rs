//! Allocation and release protocol
//!
//! Every successful allocation is paired with a release event scheduled by
//! the allocating station. Running that event returns the units and then
//! always broadcasts twice: released-resources first, state change second.

use super::{ResourceId, ResourceUse};
use crate::error::KernelError;
use crate::network::{ClientId, StationId};
use crate::simulator::{Duration, EventHandle, EventKind, EventPayload, ReleaseOrigin, Replication};
use tracing::debug;

impl Replication {
    /// Acquires all of `uses` or nothing. The first request for a resource
    /// with a capacity schedule starts its periodic recheck.
    pub fn try_acquire(&mut self, uses: &[ResourceUse]) -> Result<bool, KernelError> {
        let now = self.current_time;
        if !self.stop {
            for (id, schedule) in self.resources.arm_schedules(uses) {
                let next = schedule.next_boundary(now);
                debug!(resource = id.0, next = %next, "capacity schedule armed");
                self.schedule_at(
                    next,
                    EventPayload::ResourcesReCheck {
                        auto_schedule_next: Some(schedule.slot),
                    },
                )?;
            }
        }
        self.resources.try_acquire(uses, now)
    }

    pub fn can_acquire(&self, uses: &[ResourceUse]) -> Result<bool, KernelError> {
        self.resources.can_acquire(uses, self.current_time)
    }

    /// Schedules the release of `uses` after `delay`. The slot's previous
    /// resource list is reused as the buffer.
    pub fn schedule_release(
        &mut self,
        delay: Duration,
        origin: ReleaseOrigin,
        station: StationId,
        client: Option<ClientId>,
        uses: &[ResourceUse],
    ) -> Result<EventHandle, KernelError> {
        let handle = self.pool.get_event(EventKind::ReleaseResources);
        let mut resources = match self.pool.payload_mut(handle) {
            Some(EventPayload::ReleaseResources { resources, .. }) => std::mem::take(resources),
            _ => Vec::new(),
        };
        resources.clear();
        resources.extend_from_slice(uses);

        let time = self.current_time + delay;
        let payload = EventPayload::ReleaseResources {
            origin,
            station,
            client,
            resources,
        };
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

    /// Returns `uses` and wakes waiting stations. Over-release is clamped
    /// and recorded as a warning. Units whose failure became due go down
    /// before anyone is woken.
    pub fn release_resources(&mut self, uses: &[ResourceUse]) -> Result<(), KernelError> {
        let now = self.current_time;
        for u in uses {
            let over = self.resources.release(u.resource, u.units, now)?;
            if over > 0 {
                self.warn(format!(
                    "released {} more units of resource {} than were busy",
                    over, u.resource.0
                ));
            }
            self.check_usage_failures(u.resource)?;
        }
        self.fire_released_resources_notify()?;
        self.fire_state_change_notify()
    }

    /// Changes a fixed capacity at runtime. Growth wakes waiting stations.
    pub fn set_resource_count(&mut self, id: ResourceId, count: u32) -> Result<(), KernelError> {
        if self.resources.set_count(id, count)? {
            self.fire_released_resources_notify()?;
            self.fire_state_change_notify()?;
        }
        Ok(())
    }
}
