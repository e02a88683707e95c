//! Numeric evaluator interface
//!
//! Conditions and priorities of a model are opaque expressions evaluated
//! against the current replication state. A failed evaluation never aborts
//! the replication: callers go through
//! [`Replication::evaluate_or`](crate::simulator::Replication::evaluate_or)
//! and receive their fallback value instead.

use crate::network::{Client, ClientId, StationData, StationId};
use crate::simulator::{Replication, VirtualTime};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    DivisionByZero,
    UnknownStation(StationId),
    NoClient,
    /// Result was NaN or infinite
    NotFinite,
    Other(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::UnknownStation(id) => write!(f, "unknown station {}", id.0),
            EvalError::NoClient => write!(f, "expression needs a client"),
            EvalError::NotFinite => write!(f, "result is not a finite number"),
            EvalError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

/// Read-only view of the replication handed to expressions.
pub struct EvalContext<'a> {
    sim: &'a Replication,
    client: Option<ClientId>,
}

impl<'a> EvalContext<'a> {
    pub fn new(sim: &'a Replication, client: Option<ClientId>) -> Self {
        EvalContext { sim, client }
    }

    pub fn now(&self) -> VirtualTime {
        self.sim.now()
    }

    pub fn client(&self) -> Result<&'a Client, EvalError> {
        self.client
            .and_then(|id| self.sim.client(id))
            .ok_or(EvalError::NoClient)
    }

    pub fn station(&self, id: StationId) -> Result<&'a StationData, EvalError> {
        self.sim
            .station_data(id)
            .ok_or(EvalError::UnknownStation(id))
    }

    /// Occupancy including announced arrivals.
    pub fn clients_at(&self, id: StationId) -> Result<f64, EvalError> {
        Ok(self.station(id)?.reported_clients_at_station() as f64)
    }

    pub fn clients_in_system(&self) -> f64 {
        self.sim.clients().in_system() as f64
    }

    pub fn replication(&self) -> &'a Replication {
        self.sim
    }
}

pub trait Expression: Send + Sync {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<f64, EvalError>;
}

/// Expression with a fixed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f64);

impl Expression for Constant {
    fn evaluate(&self, _ctx: &EvalContext<'_>) -> Result<f64, EvalError> {
        Ok(self.0)
    }
}

/// Expression backed by a closure.
pub struct FnExpression<F>(pub F);

impl<F> Expression for FnExpression<F>
where
    F: Fn(&EvalContext<'_>) -> Result<f64, EvalError> + Send + Sync,
{
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<f64, EvalError> {
        let value = (self.0)(ctx)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NotFinite)
        }
    }
}

/// Wraps a closure as an [`Expression`].
pub fn expr<F>(f: F) -> FnExpression<F>
where
    F: Fn(&EvalContext<'_>) -> Result<f64, EvalError> + Send + Sync,
{
    FnExpression(f)
}

/// Index of the first condition evaluating to a positive value, used for
/// conditional routing. Failed conditions count as false.
pub fn first_true(sim: &mut Replication, conditions: &[Box<dyn Expression>], client: Option<ClientId>) -> Option<usize> {
    conditions
        .iter()
        .position(|c| sim.evaluate_or(c.as_ref(), client, 0.0) > 0.0)
}
