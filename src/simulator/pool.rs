//! Event Pool
//!
//! Arena of event slots with one free list per [`EventKind`]. Simulation
//! events are short-lived and created at a very high rate, so slots are
//! recycled instead of dropped.
//!
//! A handle is an `(index, generation)` pair. Releasing a slot resets its
//! payload and bumps the generation, so every handle issued before the
//! release goes stale and is rejected from then on.
//!
//! ```text
//!   get_event ──► Reserved ──init──► Initialized ──add──► Queued
//!       ▲                                                   │
//!       │                                      pop ◄────────┤
//!       │                                       │        delete
//!       └──────────────── release ◄── Running ◄─┘           │
//!       └──────────────── release ◄─────────────────────────┘
//! ```

use super::event::{Event, EventKind, EventPayload};
use super::time::VirtualTime;
use crate::error::KernelError;
use serde::Serialize;

/// Reference to a pooled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    index: u32,
    generation: u32,
}

impl EventHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Free,
    Reserved,
    Initialized,
    Queued { seq: u64 },
    Running,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
    event: Event,
}

/// Allocation counters for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Slots created because the kind's free list was empty
    pub allocated: u64,
    /// Handles served from a free list
    pub reused: u64,
    /// Slots returned to a free list
    pub released: u64,
}

pub struct EventPool {
    slots: Vec<Slot>,
    free: [Vec<u32>; EventKind::COUNT],
    stats: PoolStats,
}

impl EventPool {
    pub fn new() -> Self {
        EventPool {
            slots: Vec::new(),
            free: Default::default(),
            stats: PoolStats::default(),
        }
    }

    /// Hands out a slot of the requested kind with its payload reset.
    /// The caller must [`init`](Self::init) it before queueing.
    pub fn get_event(&mut self, kind: EventKind) -> EventHandle {
        if let Some(index) = self.free[kind.index()].pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert_eq!(slot.state, SlotState::Free);
            slot.state = SlotState::Reserved;
            self.stats.reused += 1;
            return EventHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            state: SlotState::Reserved,
            event: Event::empty(kind),
        });
        self.stats.allocated += 1;
        EventHandle {
            index,
            generation: 0,
        }
    }

    /// Sets schedule time and payload, overwriting whatever the slot held.
    pub fn init(
        &mut self,
        handle: EventHandle,
        time: VirtualTime,
        payload: EventPayload,
    ) -> Result<(), KernelError> {
        let slot = self.slot_mut(handle)?;
        match slot.state {
            SlotState::Reserved | SlotState::Initialized => {}
            SlotState::Queued { .. } | SlotState::Running => {
                return Err(KernelError::DuplicateEvent {
                    kind: slot.event.kind(),
                })
            }
            SlotState::Free => return Err(KernelError::StaleHandle),
        }
        let expected = slot.event.kind();
        if payload.kind() != expected {
            return Err(KernelError::KindMismatch {
                expected,
                actual: payload.kind(),
            });
        }
        slot.event.time = time;
        slot.event.payload = payload;
        slot.state = SlotState::Initialized;
        Ok(())
    }

    pub fn get(&self, handle: EventHandle) -> Option<&Event> {
        self.slot(handle).ok().map(|slot| &slot.event)
    }

    /// Payload of a reserved slot, for filling buffers in place before `init`.
    pub fn payload_mut(&mut self, handle: EventHandle) -> Option<&mut EventPayload> {
        match self.slot_mut(handle) {
            Ok(slot) if matches!(slot.state, SlotState::Reserved | SlotState::Initialized) => {
                Some(&mut slot.event.payload)
            }
            _ => None,
        }
    }

    /// Returns the slot to its kind's free list. `false` for stale handles.
    pub fn release(&mut self, handle: EventHandle) -> bool {
        let Ok(slot) = self.slot_mut(handle) else {
            return false;
        };
        if slot.state == SlotState::Free {
            return false;
        }
        let kind = slot.event.kind();
        slot.event.payload.reset();
        slot.event.time = VirtualTime::ZERO;
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.free[kind.index()].push(handle.index);
        self.stats.released += 1;
        true
    }

    /// Moves time and payload out of a running slot, leaving an empty
    /// payload of the same kind in place.
    pub(crate) fn take(&mut self, handle: EventHandle) -> Option<(VirtualTime, EventPayload)> {
        let slot = self.slot_mut(handle).ok()?;
        let kind = slot.event.kind();
        let payload = std::mem::replace(&mut slot.event.payload, EventPayload::empty(kind));
        Some((slot.event.time, payload))
    }

    /// Puts a taken payload back so its buffers survive, then releases.
    pub(crate) fn recycle(&mut self, handle: EventHandle, payload: EventPayload) -> bool {
        if let Ok(slot) = self.slot_mut(handle) {
            if slot.event.kind() == payload.kind() {
                slot.event.payload = payload;
            }
        }
        self.release(handle)
    }

    pub fn is_live(&self, handle: EventHandle) -> bool {
        self.slot(handle).is_ok()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Total slots ever created.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.iter().map(Vec::len).sum::<usize>()
    }

    pub(crate) fn state(&self, handle: EventHandle) -> Option<SlotState> {
        self.slot(handle).ok().map(|slot| slot.state)
    }

    pub(crate) fn set_state(&mut self, handle: EventHandle, state: SlotState) {
        if let Ok(slot) = self.slot_mut(handle) {
            slot.state = state;
        }
    }

    fn slot(&self, handle: EventHandle) -> Result<&Slot, KernelError> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.state != SlotState::Free => {
                Ok(slot)
            }
            _ => Err(KernelError::StaleHandle),
        }
    }

    fn slot_mut(&mut self, handle: EventHandle) -> Result<&mut Slot, KernelError> {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.state != SlotState::Free => {
                Ok(slot)
            }
            _ => Err(KernelError::StaleHandle),
        }
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ClientId, StationId};
    use crate::resources::{ResourceId, ResourceUse};
    use crate::simulator::event::ReleaseOrigin;

    #[test]
    fn test_get_event_allocates_then_reuses() {
        let mut pool = EventPool::new();
        let a = pool.get_event(EventKind::TimedCheck);
        assert!(pool.release(a));
        let b = pool.get_event(EventKind::TimedCheck);

        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(pool.stats().allocated, 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_free_lists_are_per_kind() {
        let mut pool = EventPool::new();
        let a = pool.get_event(EventKind::TimedCheck);
        pool.release(a);
        let b = pool.get_event(EventKind::EndWarmUp);
        assert_ne!(a.index(), b.index());
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_recycled_slot_exposes_no_previous_payload() {
        let mut pool = EventPool::new();
        let a = pool.get_event(EventKind::ReleaseResources);
        pool.init(
            a,
            VirtualTime(500),
            EventPayload::ReleaseResources {
                origin: ReleaseOrigin::Transport,
                station: StationId(7),
                client: Some(ClientId::new(3, 0)),
                resources: vec![ResourceUse::new(ResourceId(1), 4)],
            },
        )
        .unwrap();
        pool.release(a);

        let b = pool.get_event(EventKind::ReleaseResources);
        let event = pool.get(b).unwrap();
        assert_eq!(event.time, VirtualTime::ZERO);
        assert_eq!(event.payload, EventPayload::empty(EventKind::ReleaseResources));
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut pool = EventPool::new();
        let a = pool.get_event(EventKind::SystemChange);
        pool.release(a);
        let _b = pool.get_event(EventKind::SystemChange);

        assert!(!pool.is_live(a));
        assert!(!pool.release(a));
        assert_eq!(
            pool.init(a, VirtualTime(1), EventPayload::SystemChange),
            Err(KernelError::StaleHandle)
        );
    }

    #[test]
    fn test_init_rejects_other_kind() {
        let mut pool = EventPool::new();
        let a = pool.get_event(EventKind::TimedCheck);
        assert_eq!(
            pool.init(a, VirtualTime(1), EventPayload::EndWarmUp),
            Err(KernelError::KindMismatch {
                expected: EventKind::TimedCheck,
                actual: EventKind::EndWarmUp,
            })
        );
    }

    #[test]
    fn test_in_use_tracks_outstanding_handles() {
        let mut pool = EventPool::new();
        let a = pool.get_event(EventKind::TimedCheck);
        let _b = pool.get_event(EventKind::TimedCheck);
        assert_eq!(pool.in_use(), 2);
        pool.release(a);
        assert_eq!(pool.in_use(), 1);
    }
}
