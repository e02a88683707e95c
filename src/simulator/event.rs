//! Event variants
//!
//! Every kind of scheduled work is one variant of [`EventPayload`]. The
//! replication dispatches on the variant with a `match`; the pool keeps a
//! separate free list per [`EventKind`] and resets recycled slots to
//! [`EventPayload::empty`].

use super::time::{Duration, VirtualTime};
use crate::network::{ClientId, MoveKind, StationId};
use crate::registry::SignalId;
use crate::resources::{ResourceId, ResourceUse};
use std::fmt;

/// Discriminant of an [`EventPayload`], used to key the pool free lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Arrival,
    DeferredMove,
    StationLeave,
    ReleaseResources,
    ReleaseRecheck,
    ResourcesReCheck,
    ResourceFailure,
    TimedCheck,
    SystemChange,
    FireSignal,
    TimedAction,
    EndWarmUp,
}

impl EventKind {
    pub const COUNT: usize = 12;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::Arrival,
        EventKind::DeferredMove,
        EventKind::StationLeave,
        EventKind::ReleaseResources,
        EventKind::ReleaseRecheck,
        EventKind::ResourcesReCheck,
        EventKind::ResourceFailure,
        EventKind::TimedCheck,
        EventKind::SystemChange,
        EventKind::FireSignal,
        EventKind::TimedAction,
        EventKind::EndWarmUp,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Arrival => "arrival",
            EventKind::DeferredMove => "deferred_move",
            EventKind::StationLeave => "station_leave",
            EventKind::ReleaseResources => "release_resources",
            EventKind::ReleaseRecheck => "release_recheck",
            EventKind::ResourcesReCheck => "resources_recheck",
            EventKind::ResourceFailure => "resource_failure",
            EventKind::TimedCheck => "timed_check",
            EventKind::SystemChange => "system_change",
            EventKind::FireSignal => "fire_signal",
            EventKind::TimedAction => "timed_action",
            EventKind::EndWarmUp => "end_warm_up",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of a station scheduled a resource release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOrigin {
    /// End of service (plus post-processing) at a process station.
    Process,
    /// Transporter or other release not tied to a service completion.
    Transport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A new client enters the network at `station`.
    Arrival { station: StationId },
    /// A move whose target station was busy in one of its own hooks,
    /// replayed as one batch.
    DeferredMove {
        moves: Vec<(ClientId, StationId)>,
        from: Option<StationId>,
        kind: MoveKind,
    },
    StationLeave {
        station: StationId,
        client: ClientId,
        statistics: bool,
    },
    ReleaseResources {
        origin: ReleaseOrigin,
        station: StationId,
        client: Option<ClientId>,
        resources: Vec<ResourceUse>,
    },
    /// Re-evaluates a single station.
    ReleaseRecheck { station: StationId },
    /// Resource availability changes that are not tied to a release.
    ResourcesReCheck { auto_schedule_next: Option<Duration> },
    /// A unit of `resource` fails; `failure` indexes its failure models.
    ResourceFailure { resource: ResourceId, failure: usize },
    TimedCheck,
    /// Deferred broadcast round.
    SystemChange,
    FireSignal { signal: SignalId },
    TimedAction { station: StationId, action: usize },
    EndWarmUp,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Arrival { .. } => EventKind::Arrival,
            EventPayload::DeferredMove { .. } => EventKind::DeferredMove,
            EventPayload::StationLeave { .. } => EventKind::StationLeave,
            EventPayload::ReleaseResources { .. } => EventKind::ReleaseResources,
            EventPayload::ReleaseRecheck { .. } => EventKind::ReleaseRecheck,
            EventPayload::ResourcesReCheck { .. } => EventKind::ResourcesReCheck,
            EventPayload::ResourceFailure { .. } => EventKind::ResourceFailure,
            EventPayload::TimedCheck => EventKind::TimedCheck,
            EventPayload::SystemChange => EventKind::SystemChange,
            EventPayload::FireSignal { .. } => EventKind::FireSignal,
            EventPayload::TimedAction { .. } => EventKind::TimedAction,
            EventPayload::EndWarmUp => EventKind::EndWarmUp,
        }
    }

    /// Zeroed payload of the given kind.
    pub fn empty(kind: EventKind) -> Self {
        match kind {
            EventKind::Arrival => EventPayload::Arrival {
                station: StationId::NONE,
            },
            EventKind::DeferredMove => EventPayload::DeferredMove {
                moves: Vec::new(),
                from: None,
                kind: MoveKind::Direct,
            },
            EventKind::StationLeave => EventPayload::StationLeave {
                station: StationId::NONE,
                client: ClientId::NONE,
                statistics: false,
            },
            EventKind::ReleaseResources => EventPayload::ReleaseResources {
                origin: ReleaseOrigin::Process,
                station: StationId::NONE,
                client: None,
                resources: Vec::new(),
            },
            EventKind::ReleaseRecheck => EventPayload::ReleaseRecheck {
                station: StationId::NONE,
            },
            EventKind::ResourcesReCheck => EventPayload::ResourcesReCheck {
                auto_schedule_next: None,
            },
            EventKind::ResourceFailure => EventPayload::ResourceFailure {
                resource: ResourceId(u32::MAX),
                failure: 0,
            },
            EventKind::TimedCheck => EventPayload::TimedCheck,
            EventKind::SystemChange => EventPayload::SystemChange,
            EventKind::FireSignal => EventPayload::FireSignal {
                signal: SignalId::NONE,
            },
            EventKind::TimedAction => EventPayload::TimedAction {
                station: StationId::NONE,
                action: 0,
            },
            EventKind::EndWarmUp => EventPayload::EndWarmUp,
        }
    }

    /// Resets the payload in place, keeping the allocation of any buffer.
    pub fn reset(&mut self) {
        match self {
            EventPayload::ReleaseResources {
                origin,
                station,
                client,
                resources,
            } => {
                *origin = ReleaseOrigin::Process;
                *station = StationId::NONE;
                *client = None;
                resources.clear();
            }
            EventPayload::DeferredMove { moves, from, kind } => {
                moves.clear();
                *from = None;
                *kind = MoveKind::Direct;
            }
            other => *other = EventPayload::empty(other.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: VirtualTime,
    pub payload: EventPayload,
}

impl Event {
    pub fn empty(kind: EventKind) -> Self {
        Event {
            time: VirtualTime::ZERO,
            payload: EventPayload::empty(kind),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
