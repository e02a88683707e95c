//! Error types
//!
//! `KernelError` covers scheduler invariant violations and bad references into
//! the model. Queue violations are fatal for the replication that hit them.
//! Everything the kernel treats as recoverable (cancelling an event that
//! already ran, unannouncing a client that was never announced, failed
//! expression evaluation) is not an error at all.

use crate::network::{ClientId, StationId};
use crate::resources::ResourceId;
use crate::simulator::{EventKind, VirtualTime};
use std::io::Error as IoError;

#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// The event is already pending in the queue.
    DuplicateEvent { kind: EventKind },
    /// The event would run before the current clock.
    EventInPast {
        kind: EventKind,
        scheduled: VirtualTime,
        now: VirtualTime,
    },
    /// The handle's slot has been recycled since the handle was issued.
    StaleHandle,
    /// `add_event` without a preceding `init`.
    EventNotInitialized { kind: EventKind },
    KindMismatch {
        expected: EventKind,
        actual: EventKind,
    },
    UnknownStation(StationId),
    UnknownClient(ClientId),
    UnknownResource(ResourceId),
    /// `set_count` on a resource whose capacity is not a plain fixed count.
    CapacityNotAdjustable(ResourceId),
    WorkerPanicked(usize),
    /// No termination time, client count or termination condition.
    NoEndCriterion,
}

impl KernelError {
    /// Whether the error breaks the event queue's ordering guarantees.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::DuplicateEvent { .. }
                | KernelError::EventInPast { .. }
                | KernelError::EventNotInitialized { .. }
                | KernelError::WorkerPanicked(_)
                | KernelError::NoEndCriterion
        )
    }
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::DuplicateEvent { kind } => {
                write!(f, "{} event is already queued", kind)
            }
            KernelError::EventInPast {
                kind,
                scheduled,
                now,
            } => write!(
                f,
                "{} event scheduled at {} but clock is at {}",
                kind, scheduled, now
            ),
            KernelError::StaleHandle => write!(f, "event handle refers to a recycled slot"),
            KernelError::EventNotInitialized { kind } => {
                write!(f, "{} event queued without init", kind)
            }
            KernelError::KindMismatch { expected, actual } => write!(
                f,
                "event slot holds {} but payload is {}",
                expected, actual
            ),
            KernelError::UnknownStation(id) => write!(f, "unknown station {}", id.0),
            KernelError::UnknownClient(id) => write!(f, "unknown client {}", id),
            KernelError::UnknownResource(id) => write!(f, "unknown resource {}", id.0),
            KernelError::CapacityNotAdjustable(id) => {
                write!(f, "resource {} does not have a fixed count", id.0)
            }
            KernelError::WorkerPanicked(worker) => write!(f, "worker {} panicked", worker),
            KernelError::NoEndCriterion => write!(f, "replication has no end criterion"),
        }
    }
}

impl std::error::Error for KernelError {}

/// Error type for loading run configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(IoError),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "TOML error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<IoError> for ConfigError {
    fn from(e: IoError) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}
