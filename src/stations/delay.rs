use crate::error::KernelError;
use crate::network::{ClientId, Station, StationId};
use crate::sampler::Sampler;
use crate::simulator::Replication;

/// Keeps each client for a sampled dwell time, without capacity limit.
pub struct Delay {
    name: String,
    dwell: Box<dyn Sampler>,
    next: StationId,
    transporter: bool,
}

impl Delay {
    pub fn new(name: impl Into<String>, dwell: impl Sampler + 'static, next: StationId) -> Self {
        Delay {
            name: name.into(),
            dwell: Box::new(dwell),
            next,
            transporter: false,
        }
    }

    /// Hands clients on as transporter moves.
    pub fn by_transporter(mut self) -> Self {
        self.transporter = true;
        self
    }
}

impl Station for Delay {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        let dwell = self.dwell.sample(sim.rng());
        sim.schedule_leave(id, client, dwell)?;
        Ok(())
    }

    fn process_leave(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        if self.transporter {
            sim.send_to_station_by_transporter(client, Some(id), self.next)
        } else {
            sim.send_to_station(client, Some(id), self.next)
        }
    }
}
