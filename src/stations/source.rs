use crate::error::KernelError;
use crate::network::{ClientId, Station, StationId};
use crate::registry::ClientTypeId;
use crate::sampler::Sampler;
use crate::simulator::{EventKind, EventPayload, Replication};

/// Creates clients with sampled inter-arrival times and passes them on.
pub struct Source {
    name: String,
    inter_arrival: Box<dyn Sampler>,
    next: StationId,
    client_type: ClientTypeId,
    limit: Option<u64>,
    emitted: u64,
}

impl Source {
    pub fn new(name: impl Into<String>, inter_arrival: impl Sampler + 'static, next: StationId) -> Self {
        Source {
            name: name.into(),
            inter_arrival: Box::new(inter_arrival),
            next,
            client_type: ClientTypeId::DEFAULT,
            limit: None,
            emitted: 0,
        }
    }

    /// Stops after `limit` clients.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_client_type(mut self, client_type: ClientTypeId) -> Self {
        self.client_type = client_type;
        self
    }

    fn schedule_next(&mut self, sim: &mut Replication, id: StationId) -> Result<(), KernelError> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(());
        }
        let delay = self.inter_arrival.sample(sim.rng());
        let handle = sim.get_event(EventKind::Arrival);
        sim.init_event(
            handle,
            sim.now() + delay,
            EventPayload::Arrival { station: id },
        )?;
        sim.add_recurring_event(handle)?;
        Ok(())
    }
}

impl Station for Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_client_count_station(&self) -> bool {
        false
    }

    fn entry_client_type(&self) -> ClientTypeId {
        self.client_type
    }

    fn initial_events(&mut self, sim: &mut Replication, id: StationId) -> Result<(), KernelError> {
        self.schedule_next(sim, id)
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        self.emitted += 1;
        sim.send_to_station(client, Some(id), self.next)?;
        self.schedule_next(sim, id)
    }
}
