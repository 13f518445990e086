//! Fixed pool of transfer buffers shared by the producer and the consumer.
//!
//! Every slot is in exactly one state, and the state says who owns it:
//!
//! | state     | owner    | transition                        |
//! |-----------|----------|-----------------------------------|
//! | `Empty`   | nobody   | producer: `acquire_for_fill`      |
//! | `Pending` | producer | producer: `mark_ready` / `abandon` |
//! | `Ready`   | nobody   | consumer: `acquire_for_drain`     |
//! | `Draining`| consumer | consumer: `release`               |
//!
//! Slots are handed out round-robin on both sides, so buffers drain in the
//! order they were filled. The two halves ([`FillSide`], [`DrainSide`]) may
//! live on different threads; the payload of a slot is only touched by the
//! side that owns it.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Empty = 0,
    Pending = 1,
    Ready = 2,
    Draining = 3,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::Pending,
            2 => SlotState::Ready,
            3 => SlotState::Draining,
            _ => SlotState::Empty,
        }
    }
}

/// Index of a slot in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// No slot is in the state the caller needs; try again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

impl fmt::Display for WouldBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no buffer available")
    }
}

impl std::error::Error for WouldBlock {}

struct Slot {
    state: AtomicU8,
    filled: AtomicUsize,
    data: UnsafeCell<Box<[u8]>>,
}

// Payload access is gated by `state`: only the owning side dereferences
// `data`, and ownership changes go through release/acquire stores.
unsafe impl Sync for Slot {}

struct Pool {
    slots: Box<[Slot]>,
    capacity: usize,
}

impl Pool {
    fn state(&self, id: SlotId) -> SlotState {
        SlotState::from_u8(self.slots[id.0].state.load(Ordering::Acquire))
    }

    fn transition(&self, id: SlotId, from: SlotState, to: SlotState) -> bool {
        self.slots[id.0]
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Create a pool of `count` buffers of `capacity` bytes each.
pub fn ring(count: usize, capacity: usize) -> (FillSide, DrainSide) {
    let slots = (0..count)
        .map(|_| Slot {
            state: AtomicU8::new(SlotState::Empty as u8),
            filled: AtomicUsize::new(0),
            data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        })
        .collect();
    let pool = Arc::new(Pool { slots, capacity });
    (
        FillSide {
            pool: Arc::clone(&pool),
            next: 0,
        },
        DrainSide { pool, next: 0 },
    )
}

// ── Producer half ──

pub struct FillSide {
    pool: Arc<Pool>,
    next: usize,
}

impl fmt::Debug for FillSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FillSide")
            .field("slots", &self.pool.slots.len())
            .field("next", &self.next)
            .finish()
    }
}

impl FillSide {
    pub fn capacity(&self) -> usize {
        self.pool.capacity
    }

    /// Take the next slot in ring order if it is empty.
    pub fn acquire_for_fill(&mut self) -> Result<SlotId, WouldBlock> {
        let id = SlotId(self.next);
        if !self.pool.transition(id, SlotState::Empty, SlotState::Pending) {
            return Err(WouldBlock);
        }
        self.pool.slots[id.0].filled.store(0, Ordering::Relaxed);
        self.next = (self.next + 1) % self.pool.slots.len();
        Ok(id)
    }

    /// Writable payload of a slot the producer owns.
    pub fn payload_mut(&mut self, id: SlotId) -> &mut [u8] {
        assert_eq!(
            self.pool.state(id),
            SlotState::Pending,
            "slot {} written while not owned by the producer",
            id.0
        );
        // SAFETY: the slot is Pending, so the consumer will not touch it until
        // mark_ready; `&mut self` keeps producer-side borrows exclusive.
        unsafe { &mut (&mut *self.pool.slots[id.0].data.get())[..] }
    }

    /// Hand `len` valid bytes to the consumer.
    pub fn mark_ready(&mut self, id: SlotId, len: usize) {
        let slot = &self.pool.slots[id.0];
        slot.filled.store(len.min(self.pool.capacity), Ordering::Relaxed);
        let ok = self.pool.transition(id, SlotState::Pending, SlotState::Ready);
        debug_assert!(ok, "mark_ready on slot {} not pending", id.0);
    }

    /// Give back a pending slot without data. Only used while tearing an
    /// item down: the ring is not reused afterwards.
    pub fn abandon(&mut self, id: SlotId) {
        let ok = self.pool.transition(id, SlotState::Pending, SlotState::Empty);
        debug_assert!(ok, "abandon on slot {} not pending", id.0);
    }

    pub fn state(&self, id: SlotId) -> SlotState {
        self.pool.state(id)
    }
}

// ── Consumer half ──

pub struct DrainSide {
    pool: Arc<Pool>,
    next: usize,
}

impl fmt::Debug for DrainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainSide")
            .field("slots", &self.pool.slots.len())
            .field("next", &self.next)
            .finish()
    }
}

impl DrainSide {
    /// Take the oldest filled slot, if the producer has finished it.
    pub fn acquire_for_drain(&mut self) -> Result<SlotId, WouldBlock> {
        let id = SlotId(self.next);
        if !self.pool.transition(id, SlotState::Ready, SlotState::Draining) {
            return Err(WouldBlock);
        }
        self.next = (self.next + 1) % self.pool.slots.len();
        Ok(id)
    }

    /// Filled bytes of a slot the consumer owns.
    pub fn payload(&self, id: SlotId) -> &[u8] {
        let slot = &self.pool.slots[id.0];
        assert_eq!(
            self.pool.state(id),
            SlotState::Draining,
            "slot {} read while not owned by the consumer",
            id.0
        );
        let len = slot.filled.load(Ordering::Relaxed);
        // SAFETY: the slot is Draining; the producer only writes Pending
        // slots and cannot take this one back until release.
        unsafe { &(&*slot.data.get())[..len] }
    }

    /// Return a drained slot to the pool.
    pub fn release(&mut self, id: SlotId) {
        let ok = self.pool.transition(id, SlotState::Draining, SlotState::Empty);
        debug_assert!(ok, "release on slot {} not draining", id.0);
    }

    pub fn state(&self, id: SlotId) -> SlotState {
        self.pool.state(id)
    }
}
