use super::set_queue_len;
use crate::error::KernelError;
use crate::expression::Expression;
use crate::network::{ClientId, Station, StationId};
use crate::resources::ResourceUse;
use crate::sampler::Sampler;
use crate::simulator::{Duration, ReleaseOrigin, Replication};
use std::collections::VecDeque;

/// FIFO service station. A client starts service once all of the station's
/// resource demand can be acquired; the units are released when service
/// (plus optional post-processing) ends.
pub struct Process {
    name: String,
    service: Box<dyn Sampler>,
    post_processing: Option<Box<dyn Sampler>>,
    demand: Vec<ResourceUse>,
    priority: Option<Box<dyn Expression>>,
    next: StationId,
    queue: VecDeque<ClientId>,
}

impl Process {
    pub fn new(name: impl Into<String>, service: impl Sampler + 'static, next: StationId) -> Self {
        Process {
            name: name.into(),
            service: Box::new(service),
            post_processing: None,
            demand: Vec::new(),
            priority: None,
            next,
            queue: VecDeque::new(),
        }
    }

    pub fn with_resource(mut self, demand: ResourceUse) -> Self {
        self.demand.push(demand);
        self
    }

    /// Keeps the resources busy for a while after the client has left.
    pub fn with_post_processing(mut self, delay: impl Sampler + 'static) -> Self {
        self.post_processing = Some(Box::new(delay));
        self
    }

    /// Priority when competing for released resources; higher goes first.
    pub fn with_priority(mut self, priority: impl Expression + 'static) -> Self {
        self.priority = Some(Box::new(priority));
        self
    }

    pub fn waiting(&self) -> usize {
        self.queue.len()
    }

    fn try_start(&mut self, sim: &mut Replication, id: StationId) -> Result<bool, KernelError> {
        let mut started = false;
        while let Some(&client) = self.queue.front() {
            if !sim.try_acquire(&self.demand)? {
                break;
            }
            self.queue.pop_front();
            let service = self.service.sample(sim.rng());
            let post = match &self.post_processing {
                Some(sampler) => sampler.sample(sim.rng()),
                None => Duration::ZERO,
            };
            sim.schedule_leave(id, client, service)?;
            if !self.demand.is_empty() {
                sim.schedule_release(service + post, ReleaseOrigin::Process, id, Some(client), &self.demand)?;
            }
            started = true;
        }
        set_queue_len(sim, id, self.queue.len());
        Ok(started)
    }
}

impl Station for Process {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        self.queue.push_back(client);
        self.try_start(sim, id)?;
        Ok(())
    }

    fn process_leave(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        sim.send_to_station(client, Some(id), self.next)
    }

    fn listens_to_state_changes(&self) -> bool {
        true
    }

    fn system_state_change_notify(&mut self, sim: &mut Replication, id: StationId) -> Result<bool, KernelError> {
        self.try_start(sim, id)
    }

    fn listens_to_released_resources(&self) -> bool {
        !self.demand.is_empty()
    }

    fn released_resources_notify(&mut self, sim: &mut Replication, id: StationId) -> Result<bool, KernelError> {
        self.try_start(sim, id)
    }

    fn resource_priority(&self) -> Option<&dyn Expression> {
        self.priority.as_deref()
    }
}
