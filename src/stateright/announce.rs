//! Stateright Model for Announced Arrivals
//!
//! Clients are announced at a station before they move there. Verifies:
//! - ANNOUNCE_BALANCED: each station's announced list holds exactly the
//!   clients whose pending announcement points at it
//! - SINGLE_ANNOUNCEMENT: a client is announced at most once system-wide
//! - REPORTED_COVERS_PRESENT: reported occupancy never drops below the
//!   clients actually present
//!
//! Station records are the real `StationData`; the transitions follow the
//! replication's routing rules (re-announcing replaces, arrival resolves).

use crate::network::{ClientId, StationData};
use stateright::{Model, Property};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientState {
    Idle,
    Announced(usize),
    At(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AnnounceState {
    pub stations: Vec<StationData>,
    pub clients: Vec<ClientState>,
    /// Pending announcement per client, independent of location
    pub pending: Vec<Option<usize>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AnnounceAction {
    Announce { client: usize, station: usize },
    Unannounce { client: usize, station: usize },
    Arrive { client: usize, station: usize },
    Leave { client: usize },
}

pub struct AnnounceModel {
    pub stations: usize,
    pub clients: usize,
}

impl AnnounceModel {
    pub fn new(stations: usize, clients: usize) -> Self {
        AnnounceModel { stations, clients }
    }
}

impl Default for AnnounceModel {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

impl Model for AnnounceModel {
    type State = AnnounceState;
    type Action = AnnounceAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![AnnounceState {
            stations: vec![StationData::new(); self.stations],
            clients: vec![ClientState::Idle; self.clients],
            pending: vec![None; self.clients],
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for client in 0..self.clients {
            for station in 0..self.stations {
                actions.push(AnnounceAction::Announce { client, station });
                if state.pending[client] == Some(station) {
                    actions.push(AnnounceAction::Unannounce { client, station });
                }
                if state.clients[client] != ClientState::At(station) {
                    actions.push(AnnounceAction::Arrive { client, station });
                }
            }
            if matches!(state.clients[client], ClientState::At(_)) {
                actions.push(AnnounceAction::Leave { client });
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            AnnounceAction::Announce { client, station } => {
                if next.pending[client] == Some(station) {
                    return None;
                }
                if let Some(previous) = next.pending[client] {
                    next.stations[previous].unannounce(ClientId::new(client as u32, 0));
                }
                next.stations[station].announce(ClientId::new(client as u32, 0));
                next.pending[client] = Some(station);
                if next.clients[client] == ClientState::Idle {
                    next.clients[client] = ClientState::Announced(station);
                }
            }
            AnnounceAction::Unannounce { client, station } => {
                if next.pending[client] != Some(station) {
                    return None;
                }
                next.stations[station].unannounce(ClientId::new(client as u32, 0));
                next.pending[client] = None;
                if next.clients[client] == ClientState::Announced(station) {
                    next.clients[client] = ClientState::Idle;
                }
            }
            AnnounceAction::Arrive { client, station } => {
                if let Some(pending) = next.pending[client].take() {
                    next.stations[pending].unannounce(ClientId::new(client as u32, 0));
                }
                if let ClientState::At(from) = next.clients[client] {
                    next.stations[from].clients_at_station -= 1;
                }
                next.stations[station].clients_at_station += 1;
                next.clients[client] = ClientState::At(station);
            }
            AnnounceAction::Leave { client } => {
                let ClientState::At(from) = next.clients[client] else {
                    return None;
                };
                next.stations[from].clients_at_station -= 1;
                next.clients[client] = match next.pending[client] {
                    Some(station) => ClientState::Announced(station),
                    None => ClientState::Idle,
                };
            }
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("announce_balanced", |_: &AnnounceModel, state: &AnnounceState| {
                state.stations.iter().enumerate().all(|(s, data)| {
                    let expected = state.pending.iter().filter(|p| **p == Some(s)).count();
                    data.announced_count() == expected
                })
            }),
            Property::always("single_announcement", |_: &AnnounceModel, state: &AnnounceState| {
                (0..state.clients.len()).all(|c| {
                    let id = ClientId::new(c as u32, 0);
                    state.stations.iter().filter(|d| d.is_announced(id)).count() <= 1
                })
            }),
            Property::always("reported_covers_present", |_: &AnnounceModel, state: &AnnounceState| {
                state
                    .stations
                    .iter()
                    .all(|d| d.reported_clients_at_station() >= d.clients_at_station)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrival_resolves_pending() {
        let model = AnnounceModel::default();
        let state = model.init_states().remove(0);
        let state = model
            .next_state(&state, AnnounceAction::Announce { client: 0, station: 1 })
            .unwrap();
        assert_eq!(state.stations[1].announced_count(), 1);

        let state = model
            .next_state(&state, AnnounceAction::Arrive { client: 0, station: 1 })
            .unwrap();
        assert_eq!(state.stations[1].announced_count(), 0);
        assert_eq!(state.stations[1].clients_at_station, 1);
        assert_eq!(state.pending[0], None);
    }

    #[test]
    fn test_reannounce_moves_announcement() {
        let model = AnnounceModel::default();
        let state = model.init_states().remove(0);
        let state = model
            .next_state(&state, AnnounceAction::Announce { client: 1, station: 0 })
            .unwrap();
        let state = model
            .next_state(&state, AnnounceAction::Announce { client: 1, station: 1 })
            .unwrap();
        assert_eq!(state.stations[0].announced_count(), 0);
        assert_eq!(state.stations[1].announced_count(), 1);
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_announce -- --ignored --nocapture
    fn stateright_announce_model_check() {
        use stateright::Checker;

        let model = AnnounceModel::new(2, 2);
        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();
    }
}
