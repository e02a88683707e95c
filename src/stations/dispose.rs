use crate::error::KernelError;
use crate::network::{ClientId, Station, StationId};
use crate::simulator::Replication;

/// Removes every arriving client from the system.
pub struct Dispose {
    name: String,
}

impl Dispose {
    pub fn new(name: impl Into<String>) -> Self {
        Dispose { name: name.into() }
    }
}

impl Station for Dispose {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_client_count_station(&self) -> bool {
        false
    }

    fn process_arrival(&mut self, sim: &mut Replication, _id: StationId, client: ClientId) -> Result<(), KernelError> {
        sim.dispose_client(client)
    }
}
