//! # Ring Core
//!
//! Fixed-capacity circular buffer driven by monotonic sequence counters, the
//! mechanics shared by the single-consumer ring-buffer dispatcher and the
//! multi-consumer work-queue dispatcher.
//!
//! Protocol:
//!
//! 1. A producer claims the next sequence (atomic increment of the claim
//!    cursor), waiting while `claimed - gate >= capacity` so an unconsumed
//!    slot is never overwritten.
//! 2. The producer writes the job into slot `sequence & mask`, then publishes
//!    the sequence. With multiple producers, publication is an in-order CAS
//!    hand-off: sequence `n` becomes visible only after `n - 1`, so a
//!    consumer never observes a gap or a partially written slot.
//! 3. Consumers read the published cursor with acquire ordering before
//!    touching a slot; the release store/CAS in step 2 makes the slot write
//!    visible.
//!
//! The claim cursor and the consumer-side cursors are independent atomics.
//! That is what makes re-entrant dispatch from a consumer callback safe: a
//! callback claiming a new slot never waits on its own cursor, only on ring
//! capacity.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::constants::system::SPIN_YIELD_THRESHOLD;
use crate::dispatch::task::Job;

/// Sequence value before anything has been claimed or published.
pub(crate) const INITIAL_SEQUENCE: i64 = -1;

/// Whether a ring accepts one producer or many.
///
/// Single-producer mode skips the claim `fetch_add` and the in-order publish
/// CAS; the caller asserts only one thread ever dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerMode {
    Single,
    Multi,
}

/// What a producer does when the ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Spin, then yield, until the consumer side frees a slot.
    Block,
    /// Fail the dispatch call with `CapacityExceeded`.
    FailFast,
}

/// Raised by a claim attempt under [`BackpressurePolicy::FailFast`].
#[derive(Debug)]
pub(crate) struct RingFull;

struct Slot<T> {
    cell: UnsafeCell<Option<Job<T>>>,
}

/// The shared ring: slot array plus producer-side cursors.
pub(crate) struct RingCore<T> {
    slots: Box<[Slot<T>]>,
    mask: i64,
    producer_mode: ProducerMode,
    backpressure: BackpressurePolicy,
    /// Highest sequence handed to any producer.
    claim: CachePadded<AtomicI64>,
    /// Highest sequence visible to consumers.
    published: CachePadded<AtomicI64>,
}

// Slots are only touched under the exclusive claim/consume protocol; the ring
// is shared across threads as long as the payload itself can move between
// them.
unsafe impl<T: Send> Send for RingCore<T> {}
unsafe impl<T: Send> Sync for RingCore<T> {}

impl<T> RingCore<T> {
    /// Build a ring. `capacity` must be a non-zero power of two; the
    /// dispatcher constructors validate before calling.
    pub(crate) fn new(
        capacity: usize,
        producer_mode: ProducerMode,
        backpressure: BackpressurePolicy,
    ) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| Slot {
                cell: UnsafeCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity as i64 - 1,
            producer_mode,
            backpressure,
            claim: CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)),
            published: CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the next sequence for this producer. `gate` yields the lowest
    /// sequence every consumer has fully processed; a claim never runs more
    /// than `capacity` ahead of it.
    pub(crate) fn claim<G: Fn() -> i64>(&self, gate: G) -> Result<i64, RingFull> {
        match (self.producer_mode, self.backpressure) {
            (ProducerMode::Single, policy) => {
                let sequence = self.claim.load(Ordering::Relaxed) + 1;
                if !self.acquire_room(sequence, &gate, policy) {
                    return Err(RingFull);
                }
                self.claim.store(sequence, Ordering::Relaxed);
                Ok(sequence)
            }
            (ProducerMode::Multi, BackpressurePolicy::Block) => {
                let sequence = self.claim.fetch_add(1, Ordering::SeqCst) + 1;
                self.acquire_room(sequence, &gate, BackpressurePolicy::Block);
                Ok(sequence)
            }
            (ProducerMode::Multi, BackpressurePolicy::FailFast) => {
                // CAS claim so a failed attempt leaves no hole in the
                // sequence stream.
                loop {
                    let current = self.claim.load(Ordering::SeqCst);
                    let sequence = current + 1;
                    if !self.has_room(sequence, &gate) {
                        return Err(RingFull);
                    }
                    if self
                        .claim
                        .compare_exchange_weak(
                            current,
                            sequence,
                            Ordering::SeqCst,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return Ok(sequence);
                    }
                    hint::spin_loop();
                }
            }
        }
    }

    /// Write the job into its slot, then make the sequence visible.
    pub(crate) fn write_and_publish(&self, sequence: i64, job: Job<T>) {
        let index = (sequence & self.mask) as usize;
        // Exclusive write access: this sequence was claimed by exactly one
        // producer, and `acquire_room` ensured every consumer has passed the
        // slot's previous occupant.
        unsafe {
            *self.slots[index].cell.get() = Some(job);
        }
        match self.producer_mode {
            ProducerMode::Single => self.published.store(sequence, Ordering::Release),
            ProducerMode::Multi => {
                // In-order hand-off: wait for sequence - 1 to be published so
                // consumers observe a contiguous stream.
                while self
                    .published
                    .compare_exchange_weak(
                        sequence - 1,
                        sequence,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    hint::spin_loop();
                }
            }
        }
    }

    /// Remove the job at `sequence`. The caller must hold exclusive
    /// consumption rights to this sequence (single consumer, or a won
    /// work-cursor claim) and the sequence must already be published.
    pub(crate) fn take(&self, sequence: i64) -> Option<Job<T>> {
        let index = (sequence & self.mask) as usize;
        unsafe { (*self.slots[index].cell.get()).take() }
    }

    pub(crate) fn published_cursor(&self) -> &AtomicI64 {
        &self.published
    }

    pub(crate) fn published(&self) -> i64 {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn claimed(&self) -> i64 {
        self.claim.load(Ordering::SeqCst)
    }

    /// Published-but-not-consumed count relative to a consumer cursor.
    pub(crate) fn backlog(&self, consumed: i64) -> u64 {
        (self.published() - consumed).max(0) as u64
    }

    fn has_room<G: Fn() -> i64>(&self, sequence: i64, gate: &G) -> bool {
        sequence - gate() <= self.slots.len() as i64
    }

    /// Wait (spin, then yield) for room, or report failure under fail-fast.
    fn acquire_room<G: Fn() -> i64>(
        &self,
        sequence: i64,
        gate: &G,
        policy: BackpressurePolicy,
    ) -> bool {
        if self.has_room(sequence, gate) {
            return true;
        }
        if policy == BackpressurePolicy::FailFast {
            return false;
        }
        let mut spins: u32 = 0;
        while !self.has_room(sequence, gate) {
            if spins < SPIN_YIELD_THRESHOLD {
                spins += 1;
                hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn run_job(job: Job<u64>) {
        job.run();
    }

    #[test]
    fn claim_write_take_round_trip() {
        let ring: RingCore<u64> = RingCore::new(8, ProducerMode::Multi, BackpressurePolicy::Block);
        let hits = Arc::new(AtomicUsize::new(0));

        for expected in 0..8i64 {
            let sequence = ring.claim(|| INITIAL_SEQUENCE).unwrap();
            assert_eq!(sequence, expected);
            let sink = hits.clone();
            ring.write_and_publish(
                sequence,
                Job::Run(Box::new(move || {
                    sink.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }

        assert_eq!(ring.published(), 7);
        for sequence in 0..8i64 {
            run_job(ring.take(sequence).expect("published slot holds a job"));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn fail_fast_rejects_when_full() {
        let ring: RingCore<u64> =
            RingCore::new(4, ProducerMode::Multi, BackpressurePolicy::FailFast);
        for _ in 0..4 {
            let sequence = ring.claim(|| INITIAL_SEQUENCE).unwrap();
            ring.write_and_publish(sequence, Job::Run(Box::new(|| {})));
        }
        // No consumer progress: the fifth claim must fail, not spin.
        assert!(ring.claim(|| INITIAL_SEQUENCE).is_err());
    }

    #[test]
    fn slots_are_reused_after_consumption() {
        let ring: RingCore<u64> = RingCore::new(2, ProducerMode::Single, BackpressurePolicy::Block);
        let mut consumed: i64 = INITIAL_SEQUENCE;
        for round in 0..10i64 {
            let sequence = ring.claim(|| consumed).unwrap();
            assert_eq!(sequence, round);
            ring.write_and_publish(sequence, Job::Run(Box::new(|| {})));
            run_job(ring.take(sequence).unwrap());
            consumed = sequence;
        }
        assert_eq!(ring.backlog(consumed), 0);
    }

    #[test]
    fn backlog_tracks_published_minus_consumed() {
        let ring: RingCore<u64> = RingCore::new(8, ProducerMode::Single, BackpressurePolicy::Block);
        for _ in 0..3 {
            let sequence = ring.claim(|| INITIAL_SEQUENCE).unwrap();
            ring.write_and_publish(sequence, Job::Run(Box::new(|| {})));
        }
        assert_eq!(ring.backlog(INITIAL_SEQUENCE), 3);
        assert_eq!(ring.backlog(1), 1);
    }
}
