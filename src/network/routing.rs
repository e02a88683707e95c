//! Client routing
//!
//! Moving a client between stations runs in two phases:
//!
//! ```text
//! A (per client)  update last/next station
//!                 departure stats at the source, vacate the source
//!                 client-moved notification
//! B (per client)  resolve a pending announcement
//!                 arrival stats at the target (skipped across a
//!                 connector → sub-model boundary)
//!                 occupy the target, record the arrival
//!                 process_arrival hook
//! then            one state-change broadcast
//! ```
//!
//! For a batch, phase A completes for every client before phase B starts,
//! so no arrival hook sees a batch that is only partly on its way.
//!
//! If any target is inside one of its own hooks, the whole move is queued
//! as a single `DeferredMove` event at the current time and replayed
//! through the same two phases once that hook has returned.

use super::{ClientId, ClientLocation, StationId, StationRole};
use crate::error::KernelError;
use crate::registry::ClientTypeId;
use crate::simulator::{EventKind, EventPayload, ProtocolEntry, Replication};
use crate::statistics::StatisticsSink;
use tracing::{debug, info, trace};

/// How a client travels to its next station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Direct,
    Transporter,
}

impl Replication {
    pub fn send_to_station(
        &mut self,
        client: ClientId,
        from: Option<StationId>,
        to: StationId,
    ) -> Result<(), KernelError> {
        self.route(&[(client, to)], from, MoveKind::Direct)
    }

    pub fn send_to_station_by_transporter(
        &mut self,
        client: ClientId,
        from: Option<StationId>,
        to: StationId,
    ) -> Result<(), KernelError> {
        self.route(&[(client, to)], from, MoveKind::Transporter)
    }

    /// Moves several clients, each to its own target, as one batch.
    pub fn multi_send_to_station(
        &mut self,
        moves: &[(ClientId, StationId)],
        from: Option<StationId>,
    ) -> Result<(), KernelError> {
        self.route(moves, from, MoveKind::Direct)
    }

    /// Moves several clients to the same target as one batch.
    pub fn multi_send_to_station_same(
        &mut self,
        clients: &[ClientId],
        from: Option<StationId>,
        to: StationId,
    ) -> Result<(), KernelError> {
        let moves: Vec<(ClientId, StationId)> = clients.iter().map(|c| (*c, to)).collect();
        self.route(&moves, from, MoveKind::Direct)
    }

    fn route(
        &mut self,
        moves: &[(ClientId, StationId)],
        from: Option<StationId>,
        kind: MoveKind,
    ) -> Result<(), KernelError> {
        if let Some(from) = from {
            if from.index() >= self.stations.len() {
                return Err(KernelError::UnknownStation(from));
            }
        }
        for &(client, to) in moves {
            if self.clients.get(client).is_none() {
                return Err(KernelError::UnknownClient(client));
            }
            if to.index() >= self.stations.len() {
                return Err(KernelError::UnknownStation(to));
            }
        }

        if moves
            .iter()
            .any(|&(_, to)| self.stations[to.index()].behavior.is_none())
        {
            return self.defer_move(moves, from, kind);
        }

        for &(client, to) in moves {
            self.depart(client, from, to, kind);
        }
        for &(client, to) in moves {
            self.arrive(client, from, to)?;
        }
        if !moves.is_empty() {
            self.fire_state_change_notify()?;
        }
        Ok(())
    }

    /// Queues `moves` as one event at the current time. The slot's previous
    /// move list is reused as the buffer.
    fn defer_move(
        &mut self,
        moves: &[(ClientId, StationId)],
        from: Option<StationId>,
        kind: MoveKind,
    ) -> Result<(), KernelError> {
        let handle = self.pool.get_event(EventKind::DeferredMove);
        let mut buffer = match self.pool.payload_mut(handle) {
            Some(EventPayload::DeferredMove { moves, .. }) => std::mem::take(moves),
            _ => Vec::new(),
        };
        buffer.clear();
        buffer.extend_from_slice(moves);

        let payload = EventPayload::DeferredMove {
            moves: buffer,
            from,
            kind,
        };
        let queued = self
            .pool
            .init(handle, self.current_time, payload)
            .and_then(|_| self.add_event(handle));
        if let Err(e) = queued {
            self.pool.release(handle);
            return Err(e);
        }
        self.counters.deferred_arrivals += 1;
        trace!(clients = moves.len(), from = ?from.map(|s| s.0), "move deferred");
        Ok(())
    }

    /// Replays a move queued by `defer_move`.
    pub(crate) fn run_deferred_move(
        &mut self,
        moves: &[(ClientId, StationId)],
        from: Option<StationId>,
        kind: MoveKind,
    ) -> Result<(), KernelError> {
        self.route(moves, from, kind)
    }

    fn depart(&mut self, client: ClientId, from: Option<StationId>, to: StationId, kind: MoveKind) {
        let now = self.current_time;
        if let Some(c) = self.clients.get_mut(client) {
            c.last_station = from;
            c.next_station = Some(to);
            c.moved_by_transporter = kind == MoveKind::Transporter;
        }

        if let Some(from) = from {
            let data = &mut self.stations[from.index()].data;
            let interval = data.last_leave.map(|t| now.saturating_since(t));
            data.last_leave = Some(now);
            if !self.is_warm_up {
                self.statistics.log_station_leave(now, from, interval);
            }
        }
        self.vacate(client);

        self.counters.client_moves += 1;
        trace!(client = %client, from = ?from.map(|s| s.0), to = to.0, ?kind, "client moved");
        self.record(ProtocolEntry::ClientMoved {
            time: now,
            client,
            from,
            to,
            kind,
        });
    }

    fn arrive(&mut self, client: ClientId, from: Option<StationId>, to: StationId) -> Result<(), KernelError> {
        let now = self.current_time;
        if let Some(pending) = self.clients.get(client).and_then(|c| c.announced_to) {
            self.resolve_announcement(client, pending, true);
        }

        let crosses_into_sub_model = from
            .map(|f| self.stations[f.index()].role == StationRole::SubModelConnector)
            .unwrap_or(false)
            && self.stations[to.index()].role == StationRole::SubModel;
        if !crosses_into_sub_model {
            let data = &mut self.stations[to.index()].data;
            let interval = data.last_arrival.map(|t| now.saturating_since(t));
            data.last_arrival = Some(now);
            if !self.is_warm_up {
                self.statistics.log_station_arrival(now, to, interval);
            }
        }

        if let Some(c) = self.clients.get_mut(client) {
            c.location = ClientLocation::AtStation(to);
            c.arrival_processed_station = Some(to);
        }
        let slot = &mut self.stations[to.index()];
        slot.data.clients += 1;
        if slot.counts_clients {
            slot.data.clients_at_station += 1;
            let occupancy = slot.data.clients_at_station;
            if !self.is_warm_up {
                self.statistics.log_client_enters_station(now, to, occupancy);
            }
        }
        self.record(ProtocolEntry::ArrivalProcessed {
            time: now,
            station: to,
            client,
        });

        let handled = self.with_station(to, |station, sim| station.process_arrival(sim, to, client))?;
        if handled.is_none() {
            self.warn(format!("station {} busy, arrival of client {} not processed", to.0, client));
        }
        Ok(())
    }

    /// Takes the client off its current station's occupancy.
    pub(crate) fn vacate(&mut self, client: ClientId) {
        let now = self.current_time;
        let Some(c) = self.clients.get_mut(client) else {
            return;
        };
        let ClientLocation::AtStation(station) = c.location else {
            return;
        };
        c.location = ClientLocation::InTransit;
        let slot = &mut self.stations[station.index()];
        if slot.counts_clients {
            slot.data.clients_at_station = slot.data.clients_at_station.saturating_sub(1);
            let occupancy = slot.data.clients_at_station;
            if !self.is_warm_up {
                self.statistics.log_client_leaves_station(now, station, occupancy);
            }
        }
    }

    /// Creates a client at `station` as if it arrived from outside the model.
    pub fn enter_network(&mut self, station: StationId) -> Result<ClientId, KernelError> {
        let slot = self
            .stations
            .get(station.index())
            .ok_or(KernelError::UnknownStation(station))?;
        let client_type = slot
            .behavior
            .as_ref()
            .map(|b| b.entry_client_type())
            .unwrap_or(ClientTypeId::DEFAULT);
        let client = self.new_client(client_type);
        self.send_to_station(client, None, station)?;
        Ok(client)
    }

    /// Creates a client without placing it anywhere; the caller routes it.
    pub fn new_client(&mut self, client_type: ClientTypeId) -> ClientId {
        let client = self
            .clients
            .create(client_type, self.current_time, self.is_warm_up);
        self.clients_arrived += 1;
        self.check_arrival_warm_up();
        self.check_client_count(client);
        if let Some(max) = self.config.max_clients_in_system {
            if self.clients.in_system() > max {
                self.emergency_shut_down(format!(
                    "{} clients in system exceeds the limit of {}",
                    self.clients.in_system(),
                    max
                ));
            }
        }
        client
    }

    /// Removes a client from the model.
    pub fn dispose_client(&mut self, client: ClientId) -> Result<(), KernelError> {
        let pending = self
            .clients
            .get(client)
            .ok_or(KernelError::UnknownClient(client))?
            .announced_to;
        if let Some(station) = pending {
            self.resolve_announcement(client, station, false);
        }
        self.vacate(client);

        let now = self.current_time;
        let mut last = false;
        if let Some(removed) = self.clients.remove(client) {
            if !self.is_warm_up && !removed.is_warm_up {
                self.statistics
                    .log_client_disposed(now, now.saturating_since(removed.entered_system));
            }
            last = removed.is_last;
        }
        trace!(client = %client, "client disposed");
        if last {
            info!(time = %now, client = %client, "last client disposed");
            self.shut_down();
        }
        Ok(())
    }

    /// Marks `client` as the last one once the client count is reached after
    /// the warm-up, and stops further arrivals.
    fn check_client_count(&mut self, client: ClientId) {
        let Some(count) = self.config.client_count else {
            return;
        };
        if self.is_warm_up || self.stop || self.clients_arrived < count {
            return;
        }
        if let Some(c) = self.clients.get_mut(client) {
            c.is_last = true;
        }
        debug!(client = %client, arrived = self.clients_arrived, "client count reached");
        self.request_stop();
    }

    pub(crate) fn run_station_leave(
        &mut self,
        station: StationId,
        client: ClientId,
        statistics: bool,
    ) -> Result<(), KernelError> {
        let at_station = self
            .clients
            .get(client)
            .map(|c| c.location == ClientLocation::AtStation(station))
            .ok_or(KernelError::UnknownClient(client))?;
        if statistics && at_station {
            self.vacate(client);
        }
        let handled = self.with_station(station, |s, sim| s.process_leave(sim, station, client))?;
        if handled.is_none() {
            self.warn(format!("station {} busy, leave of client {} not processed", station.0, client));
        }
        self.fire_state_change_notify()
    }

    /// Reserves a slot for `client` at `to` before it moves there. A client
    /// carries at most one announcement; announcing elsewhere replaces it.
    /// Returns `false` if the client was already announced at `to`.
    pub fn announce_client(&mut self, client: ClientId, to: StationId) -> Result<bool, KernelError> {
        if to.index() >= self.stations.len() {
            return Err(KernelError::UnknownStation(to));
        }
        let previous = self
            .clients
            .get(client)
            .ok_or(KernelError::UnknownClient(client))?
            .announced_to;
        if previous == Some(to) {
            return Ok(false);
        }
        if let Some(previous) = previous {
            self.resolve_announcement(client, previous, false);
        }

        self.stations[to.index()].data.announce(client);
        if let Some(c) = self.clients.get_mut(client) {
            c.announced_to = Some(to);
        }
        self.counters.announces += 1;
        self.record(ProtocolEntry::Announce {
            time: self.current_time,
            client,
            station: to,
        });
        Ok(true)
    }

    /// Withdraws an announcement. `false` if there was none at `station`.
    pub fn unannounce_client(&mut self, client: ClientId, station: StationId) -> bool {
        match self.clients.get(client) {
            Some(c) if c.announced_to == Some(station) => {
                self.resolve_announcement(client, station, false);
                true
            }
            _ => false,
        }
    }

    fn resolve_announcement(&mut self, client: ClientId, station: StationId, by_arrival: bool) {
        if let Some(slot) = self.stations.get_mut(station.index()) {
            slot.data.unannounce(client);
        }
        if let Some(c) = self.clients.get_mut(client) {
            c.announced_to = None;
        }
        self.counters.unannounces += 1;
        self.record(ProtocolEntry::Unannounce {
            time: self.current_time,
            client,
            station,
            by_arrival,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::network::{Network, Station};
    use crate::registry::Registry;
    use crate::simulator::Duration;
    use std::sync::Arc;

    /// Keeps every arriving client.
    struct Park;

    impl Station for Park {
        fn name(&self) -> &str {
            "park"
        }

        fn process_arrival(&mut self, _: &mut Replication, _: StationId, _: ClientId) -> Result<(), KernelError> {
            Ok(())
        }
    }

    fn two_parks() -> Replication {
        let mut network = Network::new(Arc::new(Registry::new()));
        network.add_station(Park);
        network.add_station(Park);
        let mut sim = Replication::with_network(SimulationConfig::test(), network);
        sim.enable_protocol_trace();
        sim
    }

    #[test]
    fn test_move_updates_occupancy_and_history() {
        let mut sim = two_parks();
        let client = sim.enter_network(StationId(0)).unwrap();
        assert_eq!(sim.station_data(StationId(0)).unwrap().clients_at_station, 1);

        sim.send_to_station(client, Some(StationId(0)), StationId(1)).unwrap();
        let c = sim.client(client).unwrap();
        assert_eq!(c.location, ClientLocation::AtStation(StationId(1)));
        assert_eq!(c.last_station, Some(StationId(0)));
        assert_eq!(c.arrival_processed_station, Some(StationId(1)));
        assert_eq!(sim.station_data(StationId(0)).unwrap().clients_at_station, 0);
        assert_eq!(sim.station_data(StationId(1)).unwrap().clients_at_station, 1);
        assert_eq!(sim.station_data(StationId(1)).unwrap().clients, 1);
    }

    #[test]
    fn test_announce_replaced_and_resolved_by_arrival() {
        let mut sim = two_parks();
        let client = sim.enter_network(StationId(0)).unwrap();

        assert!(sim.announce_client(client, StationId(0)).unwrap());
        assert!(!sim.announce_client(client, StationId(0)).unwrap());
        assert!(sim.announce_client(client, StationId(1)).unwrap());
        assert_eq!(sim.station_data(StationId(0)).unwrap().announced_count(), 0);
        assert_eq!(sim.station_data(StationId(1)).unwrap().reported_clients_at_station(), 1);

        sim.send_to_station(client, Some(StationId(0)), StationId(1)).unwrap();
        assert_eq!(sim.station_data(StationId(1)).unwrap().announced_count(), 0);
        assert_eq!(sim.client(client).unwrap().announced_to, None);
        assert!(!sim.unannounce_client(client, StationId(1)));
        assert_eq!(sim.counters().announces, 2);
        assert_eq!(sim.counters().unannounces, 2);
    }

    #[test]
    fn test_batch_departs_before_any_arrival() {
        let mut sim = two_parks();
        let a = sim.enter_network(StationId(0)).unwrap();
        let b = sim.enter_network(StationId(0)).unwrap();
        let start = sim.protocol_trace().len();

        sim.multi_send_to_station_same(&[a, b], Some(StationId(0)), StationId(1))
            .unwrap();
        let steps: Vec<&ProtocolEntry> = sim.protocol_trace()[start..].iter().collect();
        assert!(matches!(steps[0], ProtocolEntry::ClientMoved { client, .. } if *client == a));
        assert!(matches!(steps[1], ProtocolEntry::ClientMoved { client, .. } if *client == b));
        assert!(matches!(steps[2], ProtocolEntry::ArrivalProcessed { client, .. } if *client == a));
        assert!(matches!(steps[3], ProtocolEntry::ArrivalProcessed { client, .. } if *client == b));
    }

    #[test]
    fn test_dispose_clears_announcement_and_occupancy() {
        let mut sim = two_parks();
        let client = sim.enter_network(StationId(0)).unwrap();
        sim.announce_client(client, StationId(1)).unwrap();
        sim.dispose_client(client).unwrap();

        assert_eq!(sim.clients().in_system(), 0);
        assert_eq!(sim.station_data(StationId(0)).unwrap().clients_at_station, 0);
        assert_eq!(sim.station_data(StationId(1)).unwrap().announced_count(), 0);
        assert_eq!(sim.statistics().clients_disposed, 1);
        assert_eq!(
            sim.dispose_client(client),
            Err(KernelError::UnknownClient(client))
        );
    }

    #[test]
    fn test_leave_of_disposed_client_skips_slot_reuser() {
        let mut sim = two_parks();
        let a = sim.enter_network(StationId(0)).unwrap();
        sim.schedule_leave(StationId(0), a, Duration::from_secs(1)).unwrap();
        sim.dispose_client(a).unwrap();
        let b = sim.enter_network(StationId(0)).unwrap();
        assert_eq!(a.index(), b.index());

        sim.run().unwrap();

        assert_eq!(sim.client(b).unwrap().location, ClientLocation::AtStation(StationId(0)));
        assert_eq!(sim.station_data(StationId(0)).unwrap().clients_at_station, 1);
        assert_eq!(sim.warnings().len(), 1);
        assert!(sim.warnings()[0].contains(&a.to_string()));
    }

    #[test]
    fn test_move_into_busy_station_deferred_whole() {
        let mut sim = two_parks();
        let a = sim.enter_network(StationId(0)).unwrap();
        let b = sim.enter_network(StationId(0)).unwrap();
        let behavior = sim.stations[1].behavior.take();

        sim.multi_send_to_station(&[(a, StationId(0)), (b, StationId(1))], Some(StationId(0)))
            .unwrap();
        assert_eq!(sim.counters().deferred_arrivals, 1);
        assert_eq!(sim.queue_len(), 1);
        // Neither client left while the move was parked.
        assert_eq!(sim.client(a).unwrap().location, ClientLocation::AtStation(StationId(0)));
        assert_eq!(sim.client(b).unwrap().location, ClientLocation::AtStation(StationId(0)));

        sim.stations[1].behavior = behavior;
        sim.run().unwrap();
        assert_eq!(sim.client(b).unwrap().location, ClientLocation::AtStation(StationId(1)));
        assert_eq!(sim.events_of_kind(EventKind::DeferredMove), 1);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut sim = two_parks();
        let client = sim.enter_network(StationId(0)).unwrap();
        assert_eq!(
            sim.send_to_station(client, Some(StationId(0)), StationId(9)),
            Err(KernelError::UnknownStation(StationId(9)))
        );
    }
}
