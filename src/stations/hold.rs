use super::set_queue_len;
use crate::error::KernelError;
use crate::expression::Expression;
use crate::network::{ClientId, Station, StationId};
use crate::simulator::{Duration, Replication};
use std::collections::VecDeque;

/// Holds clients in arrival order until a condition is positive for the
/// client at the head. A released client is announced at the successor
/// before it leaves, so the successor's reported occupancy already counts
/// it.
///
/// The condition is re-evaluated on every state change, on timed checks
/// (if the replication has an interval configured) and, optionally, on a
/// fixed recheck delay while clients are waiting.
pub struct Hold {
    name: String,
    condition: Box<dyn Expression>,
    next: StationId,
    recheck: Option<Duration>,
    recheck_pending: bool,
    waiting: VecDeque<ClientId>,
}

impl Hold {
    pub fn new(name: impl Into<String>, condition: impl Expression + 'static, next: StationId) -> Self {
        Hold {
            name: name.into(),
            condition: Box::new(condition),
            next,
            recheck: None,
            recheck_pending: false,
            waiting: VecDeque::new(),
        }
    }

    pub fn with_recheck(mut self, every: Duration) -> Self {
        self.recheck = Some(every);
        self
    }

    fn try_release(&mut self, sim: &mut Replication, id: StationId) -> Result<bool, KernelError> {
        let mut released = false;
        while let Some(&client) = self.waiting.front() {
            if sim.evaluate_or(self.condition.as_ref(), Some(client), 0.0) <= 0.0 {
                break;
            }
            self.waiting.pop_front();
            sim.announce_client(client, self.next)?;
            sim.schedule_leave(id, client, Duration::ZERO)?;
            released = true;
        }
        set_queue_len(sim, id, self.waiting.len());

        if let Some(every) = self.recheck {
            if !self.waiting.is_empty() && !self.recheck_pending && !sim.stop_requested() {
                sim.schedule_release_recheck(id, every)?;
                self.recheck_pending = true;
            }
        }
        Ok(released)
    }
}

impl Station for Hold {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        self.waiting.push_back(client);
        sim.request_timed_checks(id)?;
        self.try_release(sim, id)?;
        Ok(())
    }

    fn process_leave(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        sim.send_to_station(client, Some(id), self.next)
    }

    fn listens_to_state_changes(&self) -> bool {
        true
    }

    fn system_state_change_notify(&mut self, sim: &mut Replication, id: StationId) -> Result<bool, KernelError> {
        self.try_release(sim, id)
    }

    fn listens_to_released_resources(&self) -> bool {
        self.recheck.is_some()
    }

    fn released_resources_notify(&mut self, sim: &mut Replication, id: StationId) -> Result<bool, KernelError> {
        self.recheck_pending = false;
        self.try_release(sim, id)
    }

    fn interested_in_timed_checks(&self, _sim: &Replication, _id: StationId) -> bool {
        !self.waiting.is_empty()
    }
}
