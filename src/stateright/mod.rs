//! Stateright Model Checking for queue-sim
//!
//! Exhaustive state-space exploration of the two kernel contracts that are
//! easiest to break by interleaving:
//!
//! ```text
//!     ┌──────────────────────────────────────┐
//!     │  Stateright  │  DST batches  │ unit  │
//!     │ (exhaustive) │ (many seeds)  │ tests │
//!     └──────────────────────────────────────┘
//! ```
//!
//! ## Available Models
//!
//! - `announce`: announce / unannounce / arrival balance on `StationData`
//! - `scheduler`: ordering and lazy cancellation of `EventQueue`
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Exhaustive checks are #[ignore]d for CI speed
//! cargo test stateright -- --ignored --nocapture
//! ```
//!
//! | Model | Key Invariants |
//! |-------|----------------|
//! | `AnnounceModel` | announced count matches announced clients, one announcement per client |
//! | `SchedulerModel` | non-decreasing pop times, FIFO ties, cancelled events never run |

pub mod announce;
pub mod scheduler;

pub use announce::AnnounceModel;
pub use scheduler::SchedulerModel;
