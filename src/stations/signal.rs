use super::set_queue_len;
use crate::error::KernelError;
use crate::network::{ClientId, Station, StationId};
use crate::registry::SignalId;
use crate::simulator::{Duration, Replication};

/// Fires `signal` after `delay` for every client passing through.
pub struct SignalSource {
    name: String,
    signal: SignalId,
    delay: Duration,
    next: StationId,
}

impl SignalSource {
    pub fn new(name: impl Into<String>, signal: SignalId, delay: Duration, next: StationId) -> Self {
        SignalSource {
            name: name.into(),
            signal,
            delay,
            next,
        }
    }
}

impl Station for SignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        sim.fire_signal_delayed(self.signal, self.delay)?;
        sim.send_to_station(client, Some(id), self.next)
    }
}

const TIMEOUT: usize = 0;

/// Holds clients until `signal` fires. Each signal releases up to
/// `per_signal` clients (all of them by default). With a timeout, waiting
/// clients are released once the timeout after the first of them expires.
pub struct Barrier {
    name: String,
    signal: SignalId,
    next: StationId,
    per_signal: Option<usize>,
    timeout: Option<Duration>,
    timeout_pending: bool,
    waiting: Vec<ClientId>,
}

impl Barrier {
    pub fn new(name: impl Into<String>, signal: SignalId, next: StationId) -> Self {
        Barrier {
            name: name.into(),
            signal,
            next,
            per_signal: None,
            timeout: None,
            timeout_pending: false,
            waiting: Vec::new(),
        }
    }

    pub fn with_per_signal(mut self, count: usize) -> Self {
        self.per_signal = Some(count);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn release(&mut self, sim: &mut Replication, id: StationId, count: usize) -> Result<bool, KernelError> {
        if self.waiting.is_empty() {
            return Ok(false);
        }
        let count = count.min(self.waiting.len());
        let released: Vec<ClientId> = self.waiting.drain(..count).collect();
        set_queue_len(sim, id, self.waiting.len());
        sim.multi_send_to_station_same(&released, Some(id), self.next)?;
        Ok(true)
    }
}

impl Station for Barrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_arrival(&mut self, sim: &mut Replication, id: StationId, client: ClientId) -> Result<(), KernelError> {
        self.waiting.push(client);
        set_queue_len(sim, id, self.waiting.len());
        if let Some(timeout) = self.timeout {
            if !self.timeout_pending {
                sim.schedule_timed_action(id, TIMEOUT, timeout)?;
                self.timeout_pending = true;
            }
        }
        Ok(())
    }

    fn signal(&mut self, sim: &mut Replication, id: StationId, signal: SignalId) -> Result<bool, KernelError> {
        if signal != self.signal {
            return Ok(false);
        }
        let count = self.per_signal.unwrap_or(usize::MAX);
        self.release(sim, id, count)
    }

    fn timed_action(&mut self, sim: &mut Replication, id: StationId, action: usize) -> Result<(), KernelError> {
        if action == TIMEOUT {
            self.timeout_pending = false;
            self.release(sim, id, usize::MAX)?;
        }
        Ok(())
    }
}
