use super::set_queue_len;
use crate::error::KernelError;
use crate::network::{ClientId, Station, StationId};
use crate::simulator::Replication;

/// Collects clients until `size` are present, then moves them on together.
pub struct Batch {
    name: String,
    size: usize,
    next: StationId,
    collected: Vec<ClientId>,
}

impl Batch {
    pub fn new(name: impl Into<String>, size: usize, next: StationId) -> Self {
        Batch {
            name: name.into(),
            size: size.max(1),
            next,
            collected: Vec::new(),
        }
    }
}

impl Station for Batch {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        self.collected.push(client);
        if self.collected.len() >= self.size {
            let batch = std::mem::take(&mut self.collected);
            set_queue_len(sim, id, 0);
            return sim.multi_send_to_station_same(&batch, Some(id), self.next);
        }
        set_queue_len(sim, id, self.collected.len());
        Ok(())
    }
}
