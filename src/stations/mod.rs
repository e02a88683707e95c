//! Reference stations
//!
//! Small building blocks used by the demo binary and the tests. Each one
//! exercises a different part of the kernel protocol:
//!
//! | Station        | Protocol used                                     |
//! |----------------|---------------------------------------------------|
//! | `Source`       | network-entry arrivals, recurring events          |
//! | `Process`      | resource allocation + release events, both wakes  |
//! | `Delay`        | leave events, transporter moves                   |
//! | `Hold`         | conditions, announce, timed checks, rechecks      |
//! | `Batch`        | batch moves                                       |
//! | `SignalSource` | delayed signals                                   |
//! | `Barrier`      | signal hooks, timed actions                       |
//! | `Dispose`      | leaving the system                                |

mod batch;
mod delay;
mod dispose;
mod hold;
mod process;
mod signal;
mod source;

pub use batch::Batch;
pub use delay::Delay;
pub use dispose::Dispose;
pub use hold::Hold;
pub use process::Process;
pub use signal::{Barrier, SignalSource};
pub use source::Source;

use crate::network::StationId;
use crate::simulator::Replication;

/// Updates the queue-length field of a station's runtime data.
fn set_queue_len(sim: &mut Replication, id: StationId, len: usize) {
    if let Some(data) = sim.station_data_mut(id) {
        data.clients_at_station_queue = len;
    }
}
