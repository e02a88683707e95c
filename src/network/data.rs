use super::ClientId;
use crate::simulator::VirtualTime;

/// Runtime record of one station in one replication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StationData {
    /// Clients that arrived here since the start of the run
    pub clients: u64,
    /// Clients currently at the station
    pub clients_at_station: usize,
    /// Clients currently waiting in the station's queue
    pub clients_at_station_queue: usize,
    pub last_arrival: Option<VirtualTime>,
    pub last_leave: Option<VirtualTime>,
    announced: Vec<ClientId>,
}

impl StationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending arrival. Returns `false` if already announced.
    pub fn announce(&mut self, client: ClientId) -> bool {
        if self.announced.contains(&client) {
            return false;
        }
        self.announced.push(client);
        true
    }

    /// Drops a pending arrival. Returns `false` if it was not announced.
    pub fn unannounce(&mut self, client: ClientId) -> bool {
        match self.announced.iter().position(|c| *c == client) {
            Some(pos) => {
                self.announced.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_announced(&self, client: ClientId) -> bool {
        self.announced.contains(&client)
    }

    pub fn announced_count(&self) -> usize {
        self.announced.len()
    }

    pub fn announced(&self) -> &[ClientId] {
        &self.announced
    }

    /// Occupancy including clients that are on their way here.
    pub fn reported_clients_at_station(&self) -> usize {
        self.clients_at_station + self.announced.len()
    }
}
