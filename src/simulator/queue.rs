//! Event Queue
//!
//! Min-heap of pending events for one replication, ordered by scheduled
//! time and then by insertion sequence. Deletion is lazy: the slot is
//! recycled right away and its heap entry is skipped when it surfaces,
//! because the slot generation or sequence no longer matches.

use super::pool::{EventHandle, EventPool, SlotState};
use super::time::VirtualTime;
use crate::config::TieBreak;
use crate::error::KernelError;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct QueueEntry {
    time: VirtualTime,
    order: u64,
    seq: u64,
    handle: EventHandle,
}

// BinaryHeap is a max-heap; earliest (time, order) must surface first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => self.order.cmp(&other.order),
            ord => ord,
        }
        .reverse()
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.order == other.order
    }
}

impl Eq for QueueEntry {}

pub struct EventQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    live: usize,
    tie_break: TieBreak,
}

impl EventQueue {
    pub fn new(tie_break: TieBreak) -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
            live: 0,
            tie_break,
        }
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Queues an initialized event. Queueing an event twice or before `now`
    /// is a kernel bug and reported as a fatal error.
    pub fn push(
        &mut self,
        pool: &mut EventPool,
        handle: EventHandle,
        now: VirtualTime,
    ) -> Result<(), KernelError> {
        let state = pool.state(handle).ok_or(KernelError::StaleHandle)?;
        let event = pool.get(handle).ok_or(KernelError::StaleHandle)?;
        let kind = event.kind();
        match state {
            SlotState::Initialized => {}
            SlotState::Reserved => return Err(KernelError::EventNotInitialized { kind }),
            SlotState::Queued { .. } | SlotState::Running => {
                return Err(KernelError::DuplicateEvent { kind })
            }
            SlotState::Free => return Err(KernelError::StaleHandle),
        }
        if event.time < now {
            return Err(KernelError::EventInPast {
                kind,
                scheduled: event.time,
                now,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let order = match self.tie_break {
            TieBreak::Fifo => seq,
            TieBreak::Lifo => u64::MAX - seq,
        };
        self.heap.push(QueueEntry {
            time: event.time,
            order,
            seq,
            handle,
        });
        pool.set_state(handle, SlotState::Queued { seq });
        self.live += 1;
        Ok(())
    }

    /// Removes the earliest pending event and marks it running. The caller
    /// releases the handle to the pool once the event has executed.
    pub fn pop(&mut self, pool: &mut EventPool) -> Option<EventHandle> {
        while let Some(entry) = self.heap.pop() {
            if Self::is_current(pool, &entry) {
                pool.set_state(entry.handle, SlotState::Running);
                self.live -= 1;
                return Some(entry.handle);
            }
        }
        None
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&mut self, pool: &EventPool) -> Option<VirtualTime> {
        while let Some(entry) = self.heap.peek() {
            if Self::is_current(pool, entry) {
                return Some(entry.time);
            }
            self.heap.pop();
        }
        None
    }

    /// Cancels a pending event and recycles its slot. Returns `false` when
    /// the event already ran, was already deleted, or was never queued.
    pub fn delete(&mut self, pool: &mut EventPool, handle: EventHandle) -> bool {
        match pool.state(handle) {
            Some(SlotState::Queued { .. }) => {
                pool.release(handle);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Deletes every pending event.
    pub fn clear(&mut self, pool: &mut EventPool) {
        for entry in self.heap.drain() {
            if let Some(SlotState::Queued { seq }) = pool.state(entry.handle) {
                if seq == entry.seq {
                    pool.release(entry.handle);
                }
            }
        }
        self.live = 0;
    }

    /// Resets the insertion counter for a fresh run. The queue must be empty.
    pub fn reset(&mut self, tie_break: TieBreak) {
        debug_assert_eq!(self.live, 0);
        self.heap.clear();
        self.next_seq = 0;
        self.live = 0;
        self.tie_break = tie_break;
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn is_current(pool: &EventPool, entry: &QueueEntry) -> bool {
        matches!(pool.state(entry.handle), Some(SlotState::Queued { seq }) if seq == entry.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::event::{EventKind, EventPayload};

    fn queue_at(
        queue: &mut EventQueue,
        pool: &mut EventPool,
        time: u64,
        now: VirtualTime,
    ) -> EventHandle {
        let handle = pool.get_event(EventKind::TimedCheck);
        pool.init(handle, VirtualTime(time), EventPayload::TimedCheck)
            .unwrap();
        queue.push(pool, handle, now).unwrap();
        handle
    }

    #[test]
    fn test_pop_order_with_ties() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let handles: Vec<_> = [50, 10, 10, 30]
            .into_iter()
            .map(|t| queue_at(&mut queue, &mut pool, t, VirtualTime::ZERO))
            .collect();

        let mut popped = Vec::new();
        while let Some(h) = queue.pop(&mut pool) {
            popped.push(h);
        }
        assert_eq!(popped, vec![handles[1], handles[2], handles[3], handles[0]]);
    }

    #[test]
    fn test_lifo_tie_break() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Lifo);
        let first = queue_at(&mut queue, &mut pool, 10, VirtualTime::ZERO);
        let second = queue_at(&mut queue, &mut pool, 10, VirtualTime::ZERO);
        assert_eq!(queue.pop(&mut pool), Some(second));
        assert_eq!(queue.pop(&mut pool), Some(first));
    }

    #[test]
    fn test_delete_twice_is_noop() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let a = queue_at(&mut queue, &mut pool, 10, VirtualTime::ZERO);
        let b = queue_at(&mut queue, &mut pool, 20, VirtualTime::ZERO);

        assert!(queue.delete(&mut pool, a));
        assert!(!queue.delete(&mut pool, a));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(&mut pool), Some(b));
        assert_eq!(queue.pop(&mut pool), None);
    }

    #[test]
    fn test_delete_after_run_does_not_hit_new_occupant() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let a = queue_at(&mut queue, &mut pool, 10, VirtualTime::ZERO);
        let ran = queue.pop(&mut pool).unwrap();
        pool.release(ran);

        // Same slot, new generation.
        let b = queue_at(&mut queue, &mut pool, 20, VirtualTime(10));
        assert_eq!(a.index(), b.index());
        assert!(!queue.delete(&mut pool, a));
        assert_eq!(queue.pop(&mut pool), Some(b));
    }

    #[test]
    fn test_duplicate_push_rejected() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let a = queue_at(&mut queue, &mut pool, 10, VirtualTime::ZERO);
        let err = queue.push(&mut pool, a, VirtualTime::ZERO).unwrap_err();
        assert!(matches!(err, KernelError::DuplicateEvent { .. }));
        assert!(err.is_fatal());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_past_event_rejected() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let h = pool.get_event(EventKind::TimedCheck);
        pool.init(h, VirtualTime(5), EventPayload::TimedCheck).unwrap();
        let err = queue.push(&mut pool, h, VirtualTime(6)).unwrap_err();
        assert!(matches!(err, KernelError::EventInPast { .. }));
    }

    #[test]
    fn test_uninitialized_push_rejected() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let h = pool.get_event(EventKind::TimedCheck);
        let err = queue.push(&mut pool, h, VirtualTime::ZERO).unwrap_err();
        assert_eq!(
            err,
            KernelError::EventNotInitialized {
                kind: EventKind::TimedCheck
            }
        );
    }

    #[test]
    fn test_clear_recycles_everything() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        for t in 0..5 {
            queue_at(&mut queue, &mut pool, t, VirtualTime::ZERO);
        }
        queue.clear(&mut pool);
        assert!(queue.is_empty());
        assert_eq!(pool.in_use(), 0);
        assert_eq!(queue.peek_time(&pool), None);
    }

    #[test]
    fn test_peek_skips_deleted() {
        let mut pool = EventPool::new();
        let mut queue = EventQueue::new(TieBreak::Fifo);
        let a = queue_at(&mut queue, &mut pool, 10, VirtualTime::ZERO);
        queue_at(&mut queue, &mut pool, 40, VirtualTime::ZERO);
        queue.delete(&mut pool, a);
        assert_eq!(queue.peek_time(&pool), Some(VirtualTime(40)));
    }
}
