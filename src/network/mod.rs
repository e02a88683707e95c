//! Station network
//!
//! A model is a set of stations wired together by id, plus the resources
//! they share. Each replication builds its own [`Network`] from a
//! [`ModelFactory`](crate::simulator::ModelFactory), so station state is
//! never shared between threads.
//!
//! Stations plug into the kernel through the [`Station`] capability trait.
//! The kernel owns the protocols around them:
//!
//! - `routing`: leave → arrive handoff, batch moves, announce/unannounce
//! - `notify`: state-change broadcast, released-resources wake, timed
//!   checks, signals

mod client;
mod data;
mod notify;
mod routing;

pub use client::{Client, ClientLocation, Clients};
pub use data::StationData;
pub use routing::MoveKind;

use crate::error::KernelError;
use crate::expression::Expression;
use crate::registry::{ClientTypeId, Registry, SignalId};
use crate::resources::{Resource, ResourceId, Resources};
use crate::simulator::Replication;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StationId(pub u32);

impl StationId {
    pub const NONE: StationId = StationId(u32::MAX);

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Arena slot plus the generation of its occupant. Disposing a client bumps
/// the slot's generation, so ids still held by queued events no longer
/// resolve once the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ClientId {
    index: u32,
    generation: u32,
}

impl ClientId {
    pub const NONE: ClientId = ClientId {
        index: u32::MAX,
        generation: 0,
    };

    pub const fn new(index: u32, generation: u32) -> Self {
        ClientId { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Position of a station relative to sub-model boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StationRole {
    #[default]
    Standard,
    /// Entry point of a nested sub-model.
    SubModel,
    /// Station inside a sub-model that hands clients back to its
    /// enclosing [`StationRole::SubModel`] station.
    SubModelConnector,
}

/// Behaviour of one station.
///
/// Hooks receive the replication and their own id. While a hook runs, the
/// station is detached from the replication: a broadcast skips it and a
/// move with a client routed to it is queued whole as a deferred move.
pub trait Station: Send {
    fn name(&self) -> &str;

    fn role(&self) -> StationRole {
        StationRole::Standard
    }

    /// Whether clients at this station count towards its occupancy.
    fn is_client_count_station(&self) -> bool {
        true
    }

    /// Client type of clients created by network-entry arrivals here.
    fn entry_client_type(&self) -> ClientTypeId {
        ClientTypeId::DEFAULT
    }

    /// Seeds the station's first events before the run starts.
    fn initial_events(&mut self, _sim: &mut Replication, _id: StationId) -> Result<(), KernelError> {
        Ok(())
    }

    fn process_arrival(
        &mut self,
        sim: &mut Replication,
        id: StationId,
        client: ClientId,
    ) -> Result<(), KernelError>;

    fn process_leave(
        &mut self,
        _sim: &mut Replication,
        _id: StationId,
        _client: ClientId,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    fn listens_to_state_changes(&self) -> bool {
        false
    }

    /// Re-evaluates the station's enabling condition. Returns `true` when
    /// the station started new work.
    fn system_state_change_notify(
        &mut self,
        _sim: &mut Replication,
        _id: StationId,
    ) -> Result<bool, KernelError> {
        Ok(false)
    }

    fn listens_to_released_resources(&self) -> bool {
        false
    }

    /// Retries resource allocation after a release. Returns `true` when the
    /// station acquired resources.
    fn released_resources_notify(
        &mut self,
        _sim: &mut Replication,
        _id: StationId,
    ) -> Result<bool, KernelError> {
        Ok(false)
    }

    /// Wake-up priority among released-resources listeners, higher first.
    fn resource_priority(&self) -> Option<&dyn Expression> {
        None
    }

    fn interested_in_timed_checks(&self, _sim: &Replication, _id: StationId) -> bool {
        false
    }

    fn timed_action(
        &mut self,
        _sim: &mut Replication,
        _id: StationId,
        _action: usize,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    /// Returns `true` when the signal changed the station's state.
    fn signal(
        &mut self,
        _sim: &mut Replication,
        _id: StationId,
        _signal: SignalId,
    ) -> Result<bool, KernelError> {
        Ok(false)
    }
}

/// Stations, resources and symbols of one model instance.
pub struct Network {
    pub(crate) stations: Vec<Box<dyn Station>>,
    pub(crate) resources: Resources,
    pub(crate) registry: Arc<Registry>,
    pub(crate) termination_condition: Option<Box<dyn Expression>>,
}

impl Network {
    pub fn new(registry: Arc<Registry>) -> Self {
        Network {
            stations: Vec::new(),
            resources: Resources::new(),
            registry,
            termination_condition: None,
        }
    }

    /// Id the next added station will get, for wiring forward references.
    pub fn next_station_id(&self) -> StationId {
        StationId(self.stations.len() as u32)
    }

    pub fn add_station(&mut self, station: impl Station + 'static) -> StationId {
        let id = self.next_station_id();
        self.stations.push(Box::new(station));
        id
    }

    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        self.resources.add(resource)
    }

    /// Shuts the replication down once `condition` evaluates to a positive value.
    pub fn with_termination_condition(mut self, condition: impl Expression + 'static) -> Self {
        self.termination_condition = Some(Box::new(condition));
        self
    }

    pub fn has_termination_condition(&self) -> bool {
        self.termination_condition.is_some()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
