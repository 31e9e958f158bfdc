//! Lock-free bounded queue between the acquisition core and the storage core.
//!
//! Single producer, single consumer in steady state, but the producer may
//! also dequeue on the overflow path (`force_push`), so the dequeue side is
//! guarded by a per-slot sequence counter in the style of the bounded MPMC
//! queues (Vyukov). Plain head/tail Lamport rings are not safe once two
//! parties can pop; the slot sequence makes the hand-off race-free on a
//! two-core part without LDREX/STREX.
//!
//! Orderings: slot sequences use acquire/release to pair the payload write
//! with its visibility; the indices themselves only need relaxed loads plus
//! the CAS on `head`.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use portable_atomic::{AtomicU32, AtomicUsize, Ordering};

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// What `force_push` did to make the sample fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ForcedPush {
    /// Pushed without evicting anything.
    Clean,
    /// Pushed after evicting the oldest droppable entry.
    EvictedOldest,
    /// The oldest entry was protected; the incoming sample was dropped and
    /// the protected entry re-queued.
    DroppedIncoming,
}

/// Fixed-capacity sample queue. `N` must be a power of two.
pub struct SampleRing<T, const N: usize> {
    slots: [Slot<T>; N],
    /// Next dequeue position (claimed by CAS).
    head: AtomicUsize,
    /// Next enqueue position (single producer, plain store).
    tail: AtomicUsize,
    drops: AtomicU32,
}

// SAFETY: slot payloads are only touched by the party that owns the slot per
// the sequence protocol below; `T: Send` is all that crossing cores requires.
unsafe impl<T: Send, const N: usize> Sync for SampleRing<T, N> {}
unsafe impl<T: Send, const N: usize> Send for SampleRing<T, N> {}

impl<T, const N: usize> SampleRing<T, N> {
    pub fn new() -> Self {
        assert!(N.is_power_of_two() && N >= 2);
        Self {
            slots: core::array::from_fn(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            }),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            drops: AtomicU32::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Samples sacrificed by the overflow policy since boot.
    pub fn drops(&self) -> u32 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Approximate occupancy; exact only when neither side is mid-operation.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue without blocking. Fails (returning the sample) when full.
    ///
    /// Must only be called from the single producer.
    pub fn push(&self, value: T) -> Result<(), T> {
        let pos = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[pos & (N - 1)];
        if slot.seq.load(Ordering::Acquire) != pos {
            // Slot still holds an unconsumed entry from the previous lap.
            return Err(value);
        }
        // SAFETY: seq == pos means the slot is free and reserved for this
        // enqueue position; nobody else writes it until seq advances.
        unsafe { (*slot.value.get()).write(value) };
        self.tail.store(pos.wrapping_add(1), Ordering::Relaxed);
        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Dequeue without blocking. Safe to call from the consumer and from the
    /// producer's overflow path concurrently.
    pub fn pop(&self) -> Option<T> {
        loop {
            let pos = self.head.load(Ordering::Relaxed);
            let slot = &self.slots[pos & (N - 1)];
            if slot.seq.load(Ordering::Acquire) != pos.wrapping_add(1) {
                return None;
            }
            if self
                .head
                .compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }
            // SAFETY: the CAS claimed position `pos`; the producer will not
            // reuse this slot until seq is advanced to pos + N below.
            let value = unsafe { (*slot.value.get()).assume_init_read() };
            slot.seq.store(pos.wrapping_add(N), Ordering::Release);
            return Some(value);
        }
    }

    /// Enqueue, evicting the oldest entry if the queue is full.
    ///
    /// `droppable` decides whether an evicted entry may be discarded. A
    /// protected entry (a GPS fix) is re-queued and the *incoming* sample is
    /// counted as the drop instead, so protected data is never lost to the
    /// overflow policy. Producer-side only.
    pub fn force_push(&self, value: T, droppable: impl Fn(&T) -> bool) -> ForcedPush {
        let mut value = value;
        let mut evicted = false;
        loop {
            match self.push(value) {
                Ok(()) => {
                    return if evicted { ForcedPush::EvictedOldest } else { ForcedPush::Clean };
                }
                Err(v) => value = v,
            }
            match self.pop() {
                Some(old) if droppable(&old) => {
                    self.drops.fetch_add(1, Ordering::Relaxed);
                    evicted = true;
                }
                Some(old) => {
                    // One slot is free now; the protected entry goes back in
                    // and the incoming sample is the casualty.
                    self.drops.fetch_add(1, Ordering::Relaxed);
                    let _ = self.push(old);
                    return ForcedPush::DroppedIncoming;
                }
                None => {
                    // Consumer drained the queue between the failed push and
                    // the pop; retry the plain push.
                }
            }
        }
    }
}

impl<T, const N: usize> Default for SampleRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Sample, Vec3};

    #[test]
    fn fifo_order() {
        let ring: SampleRing<u32, 8> = SampleRing::new();
        for i in 0..8 {
            ring.push(i).unwrap();
        }
        assert!(ring.push(99).is_err());
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn wraps_many_laps() {
        let ring: SampleRing<u32, 4> = SampleRing::new();
        let mut next_out = 0u32;
        for i in 0..1000u32 {
            ring.push(i).unwrap();
            if i % 3 == 2 {
                for _ in 0..3 {
                    assert_eq!(ring.pop(), Some(next_out));
                    next_out += 1;
                }
            }
        }
    }

    #[test]
    fn force_push_evicts_oldest_droppable() {
        let ring: SampleRing<u32, 4> = SampleRing::new();
        for i in 0..4 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.force_push(4, |_| true), ForcedPush::EvictedOldest);
        assert_eq!(ring.drops(), 1);
        // Oldest (0) is gone; order of the rest is intact.
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
    }

    #[test]
    fn force_push_protects_gps_fixes() {
        let ring: SampleRing<Sample, 4> = SampleRing::new();
        let fix = Sample::gps_fix(1, Default::default());
        ring.push(fix).unwrap();
        for t in 2..5 {
            ring.push(Sample::accel(t, Vec3::ZERO)).unwrap();
        }
        let out = ring.force_push(Sample::accel(5, Vec3::ZERO), Sample::droppable);
        assert_eq!(out, ForcedPush::DroppedIncoming);
        assert_eq!(ring.drops(), 1);
        // The fix survived (re-queued after the remaining accel samples).
        let mut popped = heapless::Vec::<Sample, 4>::new();
        while let Some(s) = ring.pop() {
            popped.push(s).unwrap();
        }
        assert!(popped.iter().any(|s| !s.droppable()));
    }

    #[test]
    fn two_thread_order_is_push_order() {
        use std::sync::Arc;

        let ring: Arc<SampleRing<u32, 64>> = Arc::new(SampleRing::new());
        let producer_ring = Arc::clone(&ring);
        const COUNT: u32 = 100_000;

        let producer = std::thread::spawn(move || {
            let mut i = 0u32;
            while i < COUNT {
                if producer_ring.push(i).is_ok() {
                    i += 1;
                }
            }
        });

        let mut expected = 0u32;
        while expected < COUNT {
            if let Some(v) = ring.pop() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn lossy_producer_against_live_consumer() {
        use std::sync::Arc;

        let ring: Arc<SampleRing<u32, 8>> = Arc::new(SampleRing::new());
        let producer_ring = Arc::clone(&ring);
        const COUNT: u32 = 50_000;

        let producer = std::thread::spawn(move || {
            for i in 0..COUNT {
                producer_ring.force_push(i, |_| true);
            }
        });

        // Successful pops must be strictly increasing even while the producer
        // is evicting entries under our feet.
        let mut last: Option<u32> = None;
        let mut seen = 0u32;
        loop {
            match ring.pop() {
                Some(v) => {
                    if let Some(prev) = last {
                        assert!(v > prev, "out of order: {prev} then {v}");
                    }
                    last = Some(v);
                    seen += 1;
                }
                None => {
                    if producer.is_finished() && ring.is_empty() {
                        break;
                    }
                }
            }
        }
        producer.join().unwrap();
        assert_eq!(seen + ring.drops(), COUNT);
    }
}
