//! Discrete-event simulation kernel for queueing networks.
//!
//! A model is a [`Network`] of stations sharing [`resources`]. The
//! [`Simulator`] runs independent replications of it on worker threads;
//! each [`Replication`] owns its clock, event queue and event pool and
//! drives the kernel protocols (client handoff, state-change broadcast,
//! resource release, timed checks and signals).

pub mod config;
pub mod error;
pub mod expression;
pub mod network;
pub mod observability;
pub mod registry;
pub mod resources;
pub mod sampler;
pub mod simulator;
pub mod stations;
pub mod statistics;

#[cfg(test)]
mod stateright;

pub use config::{SimulationConfig, TieBreak, WarmUp};
pub use error::{ConfigError, KernelError};
pub use network::{ClientId, Network, Station, StationId};
pub use simulator::{Duration, Replication, SimulationReport, Simulator, VirtualTime};
