mod event;
mod pool;
mod queue;
mod replication;
mod report;
mod rng;
mod time;
mod worker;
pub mod dst;

pub use event::{Event, EventKind, EventPayload, ReleaseOrigin};
pub use pool::{EventHandle, EventPool, PoolStats};
pub use queue::EventQueue;
pub use replication::{ProtocolEntry, Replication};
pub use report::{KernelCounters, ReplicationReport, ResourceReport, SimulationReport};
pub use rng::DeterministicRng;
pub use time::{Duration, VirtualTime};
pub use worker::{ModelFactory, Simulator, WorkerProgress};
