//! Stateright Model for the Event Queue
//!
//! Every state carries the sequence of scheduler operations that led to it.
//! Transitions replay that sequence against a fresh `EventPool` and
//! `EventQueue`, so the properties are checked on the real structures.
//!
//! Verifies:
//! - TIME_ORDER: popped events never go back in time
//! - FIFO_TIES: events scheduled for the same time run in scheduling order
//! - CANCELLED_NEVER_RUN: a deleted event is never popped
//! - LEN_MATCHES: `len()` equals scheduled minus popped minus deleted
//! - STALE_DELETE_REJECTED: deleting an event that already ran fails

use crate::config::TieBreak;
use crate::network::StationId;
use crate::simulator::{Duration, EventHandle, EventKind, EventPayload, EventPool, EventQueue, VirtualTime};
use stateright::{Model, Property};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SchedulerAction {
    /// Schedule a new event `delay` ms after the current clock
    Schedule { delay: u64 },
    /// Run the earliest event, advancing the clock
    Pop,
    /// Delete event `id`, whether or not it is still pending
    Delete { id: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SchedulerState {
    pub log: Vec<SchedulerAction>,
    /// (time, id) of every popped event in pop order
    pub popped: Vec<(u64, usize)>,
    pub pending: BTreeSet<usize>,
    pub deleted: BTreeSet<usize>,
    /// Ids whose delete was attempted after they already ran and succeeded
    pub stale_deletes_accepted: usize,
    pub now: u64,
    pub scheduled: usize,
    pub queue_len: usize,
}

pub struct SchedulerModel {
    pub max_events: usize,
    pub delays: Vec<u64>,
}

impl SchedulerModel {
    pub fn new(max_events: usize, delays: Vec<u64>) -> Self {
        SchedulerModel { max_events, delays }
    }

    /// Replays `log` on real queue structures and derives the observable state.
    fn replay(log: Vec<SchedulerAction>) -> SchedulerState {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let mut handles: Vec<EventHandle> = Vec::new();
        let mut state = SchedulerState::default();

        for action in &log {
            match *action {
                SchedulerAction::Schedule { delay } => {
                    let id = handles.len();
                    let handle = pool.get_event(EventKind::TimedAction);
                    let payload = EventPayload::TimedAction {
                        station: StationId(0),
                        action: id,
                    };
                    let time = VirtualTime(state.now) + Duration::from_millis(delay);
                    if pool.init(handle, time, payload).is_ok()
                        && queue.push(&mut pool, handle, VirtualTime(state.now)).is_ok()
                    {
                        state.pending.insert(id);
                    }
                    handles.push(handle);
                    state.scheduled += 1;
                }
                SchedulerAction::Pop => {
                    if let Some(handle) = queue.pop(&mut pool) {
                        if let Some(event) = pool.get(handle) {
                            if let EventPayload::TimedAction { action: id, .. } = event.payload {
                                state.now = event.time.0;
                                state.popped.push((event.time.0, id));
                                state.pending.remove(&id);
                            }
                        }
                        pool.release(handle);
                    }
                }
                SchedulerAction::Delete { id } => {
                    if let Some(&handle) = handles.get(id) {
                        let was_pending = state.pending.contains(&id);
                        if queue.delete(&mut pool, handle) {
                            if was_pending {
                                state.pending.remove(&id);
                                state.deleted.insert(id);
                            } else {
                                state.stale_deletes_accepted += 1;
                            }
                        }
                    }
                }
            }
        }

        state.queue_len = queue.len();
        state.log = log;
        state
    }
}

impl Default for SchedulerModel {
    fn default() -> Self {
        Self::new(4, vec![0, 5])
    }
}

impl Model for SchedulerModel {
    type State = SchedulerState;
    type Action = SchedulerAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![SchedulerState::default()]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        if state.scheduled < self.max_events {
            for &delay in &self.delays {
                actions.push(SchedulerAction::Schedule { delay });
            }
        }
        if !state.pending.is_empty() {
            actions.push(SchedulerAction::Pop);
        }
        for id in &state.pending {
            actions.push(SchedulerAction::Delete { id: *id });
        }
        // Deleting an event that already ran must be refused.
        if let Some(&(_, id)) = state.popped.last() {
            actions.push(SchedulerAction::Delete { id });
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut log = state.log.clone();
        log.push(action);
        Some(Self::replay(log))
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("time_order", |_: &SchedulerModel, state: &SchedulerState| {
                state.popped.windows(2).all(|w| w[0].0 <= w[1].0)
            }),
            Property::always("fifo_ties", |_: &SchedulerModel, state: &SchedulerState| {
                state
                    .popped
                    .windows(2)
                    .all(|w| w[0].0 != w[1].0 || w[0].1 < w[1].1)
            }),
            Property::always("cancelled_never_run", |_: &SchedulerModel, state: &SchedulerState| {
                state.popped.iter().all(|(_, id)| !state.deleted.contains(id))
            }),
            Property::always("len_matches", |_: &SchedulerModel, state: &SchedulerState| {
                state.queue_len == state.pending.len()
                    && state.queue_len + state.popped.len() + state.deleted.len() == state.scheduled
            }),
            Property::always("stale_delete_rejected", |_: &SchedulerModel, state: &SchedulerState| {
                state.stale_deletes_accepted == 0
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(model: &SchedulerModel, actions: &[SchedulerAction]) -> SchedulerState {
        let mut state = model.init_states().remove(0);
        for action in actions {
            state = model.next_state(&state, action.clone()).unwrap();
        }
        state
    }

    #[test]
    fn test_equal_times_pop_in_schedule_order() {
        let model = SchedulerModel::default();
        let state = apply(
            &model,
            &[
                SchedulerAction::Schedule { delay: 5 },
                SchedulerAction::Schedule { delay: 0 },
                SchedulerAction::Schedule { delay: 5 },
                SchedulerAction::Pop,
                SchedulerAction::Pop,
                SchedulerAction::Pop,
            ],
        );
        assert_eq!(state.popped, vec![(0, 1), (5, 0), (5, 2)]);
        assert_eq!(state.queue_len, 0);
    }

    #[test]
    fn test_deleted_event_is_skipped() {
        let model = SchedulerModel::default();
        let state = apply(
            &model,
            &[
                SchedulerAction::Schedule { delay: 0 },
                SchedulerAction::Schedule { delay: 5 },
                SchedulerAction::Delete { id: 0 },
                SchedulerAction::Pop,
            ],
        );
        assert_eq!(state.popped, vec![(5, 1)]);
        assert!(state.deleted.contains(&0));
        assert_eq!(state.now, 5);
    }

    #[test]
    fn test_delete_after_run_refused() {
        let model = SchedulerModel::default();
        let state = apply(
            &model,
            &[
                SchedulerAction::Schedule { delay: 0 },
                SchedulerAction::Pop,
                SchedulerAction::Delete { id: 0 },
            ],
        );
        assert_eq!(state.stale_deletes_accepted, 0);
        assert!(state.deleted.is_empty());
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_scheduler -- --ignored --nocapture
    fn stateright_scheduler_model_check() {
        use stateright::Checker;

        let model = SchedulerModel::new(4, vec![0, 5]);
        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();
    }
}
