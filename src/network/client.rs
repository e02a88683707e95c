use super::{ClientId, StationId};
use crate::registry::ClientTypeId;
use crate::simulator::VirtualTime;
use fnv::FnvHashMap;

/// Where a client currently is. A client is held by at most one station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLocation {
    /// Between leaving one station and arriving at the next.
    InTransit,
    AtStation(StationId),
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub client_type: ClientTypeId,
    pub last_station: Option<StationId>,
    pub next_station: Option<StationId>,
    /// Station whose arrival processing last ran for this client
    pub arrival_processed_station: Option<StationId>,
    pub location: ClientLocation,
    /// Station this client has been announced to, if any
    pub announced_to: Option<StationId>,
    pub entered_system: VirtualTime,
    /// Created before the warm-up phase ended
    pub is_warm_up: bool,
    /// Last move was carried out by a transporter
    pub moved_by_transporter: bool,
    /// Last client counted towards the client count; disposing it ends the run
    pub is_last: bool,
    numbers: Vec<f64>,
    texts: FnvHashMap<String, String>,
}

impl Client {
    fn new(id: ClientId, client_type: ClientTypeId, now: VirtualTime, is_warm_up: bool) -> Self {
        Client {
            id,
            client_type,
            last_station: None,
            next_station: None,
            arrival_processed_station: None,
            location: ClientLocation::InTransit,
            announced_to: None,
            entered_system: now,
            is_warm_up,
            moved_by_transporter: false,
            is_last: false,
            numbers: Vec::new(),
            texts: FnvHashMap::default(),
        }
    }

    /// User number at `index`, 0.0 when never set.
    pub fn number(&self, index: usize) -> f64 {
        self.numbers.get(index).copied().unwrap_or(0.0)
    }

    pub fn set_number(&mut self, index: usize, value: f64) {
        if index >= self.numbers.len() {
            self.numbers.resize(index + 1, 0.0);
        }
        self.numbers[index] = value;
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.texts.get(key).map(String::as_str)
    }

    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.texts.insert(key.into(), value.into());
    }
}

#[derive(Debug, Default)]
struct ClientSlot {
    generation: u32,
    client: Option<Client>,
}

/// Client arena of one replication. Slots of disposed clients are reused
/// under a new generation.
#[derive(Debug, Default)]
pub struct Clients {
    slots: Vec<ClientSlot>,
    free: Vec<u32>,
    in_system: usize,
    created: u64,
    disposed: u64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(
        &mut self,
        client_type: ClientTypeId,
        now: VirtualTime,
        is_warm_up: bool,
    ) -> ClientId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(ClientSlot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = ClientId::new(index, slot.generation);
        slot.client = Some(Client::new(id, client_type, now, is_warm_up));
        self.in_system += 1;
        self.created += 1;
        id
    }

    pub(crate) fn remove(&mut self, id: ClientId) -> Option<Client> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let client = slot.client.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.in_system -= 1;
        self.disposed += 1;
        Some(client)
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.client.as_ref()
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.client.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.slots.iter().filter_map(|slot| slot.client.as_ref())
    }

    pub fn in_system(&self) -> usize {
        self.in_system
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn disposed(&self) -> u64 {
        self.disposed
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.in_system = 0;
        self.created = 0;
        self.disposed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_reused_after_remove() {
        let mut clients = Clients::new();
        let a = clients.create(ClientTypeId::DEFAULT, VirtualTime::ZERO, false);
        let b = clients.create(ClientTypeId::DEFAULT, VirtualTime::ZERO, false);
        assert_ne!(a, b);

        clients.remove(a).unwrap();
        let c = clients.create(ClientTypeId::DEFAULT, VirtualTime(5), false);
        assert_eq!(a.index(), c.index());
        assert_ne!(a, c);
        assert_eq!(clients.get(c).unwrap().entered_system, VirtualTime(5));
        assert_eq!(clients.in_system(), 2);
        assert_eq!(clients.created(), 3);
        assert_eq!(clients.disposed(), 1);
    }

    #[test]
    fn test_reused_client_starts_clean() {
        let mut clients = Clients::new();
        let a = clients.create(ClientTypeId::DEFAULT, VirtualTime::ZERO, true);
        {
            let client = clients.get_mut(a).unwrap();
            client.set_number(3, 1.5);
            client.set_text("lane", "b");
            client.announced_to = Some(StationId(2));
        }
        clients.remove(a);
        let b = clients.create(ClientTypeId(1), VirtualTime(10), false);
        let client = clients.get(b).unwrap();
        assert_eq!(client.number(3), 0.0);
        assert_eq!(client.text("lane"), None);
        assert_eq!(client.announced_to, None);
        assert!(!client.is_warm_up);
    }

    #[test]
    fn test_stale_id_does_not_reach_new_occupant() {
        let mut clients = Clients::new();
        let old = clients.create(ClientTypeId::DEFAULT, VirtualTime::ZERO, false);
        clients.remove(old).unwrap();
        let new = clients.create(ClientTypeId(1), VirtualTime(10), false);
        assert_eq!(new.generation(), old.generation() + 1);

        assert!(clients.get(old).is_none());
        assert!(clients.get_mut(old).is_none());
        assert!(clients.remove(old).is_none());
        assert_eq!(clients.get(new).unwrap().id, new);
        assert_eq!(clients.in_system(), 1);
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut clients = Clients::new();
        let a = clients.create(ClientTypeId::DEFAULT, VirtualTime::ZERO, false);
        assert!(clients.remove(a).is_some());
        assert!(clients.remove(a).is_none());
        assert_eq!(clients.in_system(), 0);
    }
}
