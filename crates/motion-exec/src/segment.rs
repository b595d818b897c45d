//! Segment ring: the lock-free pipe between preparer and executor.
//!
//! Single producer (the preparer, main loop priority), single consumer
//! (the executor, step interrupt priority). `head` is written only by
//! the producer, `tail` only by the consumer; each side reads the
//! other's index with acquire ordering against the matching release
//! store, which is all the synchronization a SPSC ring needs. On
//! single-core interrupt-driven targets these compile down to plain
//! ordered loads and stores.
//!
//! Alongside the segment slots rides a small ring of per-block shared
//! data. Segments reference an entry by `data_index`; the entry must
//! stay valid until every segment referencing it has drained. Sizing
//! the data ring to `SEG_CAP - 1` guarantees this: the producer cannot
//! come back around to an entry while any of at most `SEG_CAP - 1`
//! in-flight segments still points at it.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Segment ring capacity. One slot is always kept open, so `SEG_CAP - 1`
/// segments can be in flight; at the nominal segment duration that is
/// well under the ~60 ms of buffered motion the pipeline tolerates.
pub const SEG_CAP: usize = 6;

/// Shared block-data ring capacity.
pub const DATA_CAP: usize = SEG_CAP - 1;

/// Segment flag: this segment carries the last step event of its block.
pub const SEG_FLAG_END_OF_BLOCK: u8 = 1 << 0;

/// A fixed-time slice of a block's velocity profile, executed at a
/// constant step rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    /// Step events this segment emits. Always at least one.
    pub n_step: u8,
    /// Timer ticks to run after the last step, preserving step-phase
    /// spacing into the next segment.
    pub n_phase_tick: u8,
    /// Decrement applied to the inverse-time counter each timer tick.
    pub dist_per_tick: u32,
    /// Which shared block-data entry this segment belongs to.
    pub data_index: u8,
    /// Flag bits (`SEG_FLAG_*`).
    pub flags: u8,
}

impl Segment {
    pub const EMPTY: Self = Self {
        n_step: 0,
        n_phase_tick: 0,
        dist_per_tick: 0,
        data_index: 0,
        flags: 0,
    };

    pub fn is_end_of_block(&self) -> bool {
        self.flags & SEG_FLAG_END_OF_BLOCK != 0
    }
}

/// Per-block preparation state, one ring entry per active block.
///
/// All fields are preparer-owned working state. The one value the
/// executor needs per block -- the inverse-time counter reload -- is
/// kept in a separate consumer-visible array (see
/// [`SegmentConsumer::dist_per_step`]) so the preparer can keep mutating
/// its bookkeeping here while earlier segments of the same block are
/// still executing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockData {
    /// Block step events still to be emitted (float bookkeeping).
    pub step_events_remaining: f32,
    pub step_per_mm: f32,
    /// Acceleration in steps/s^2.
    pub acceleration: f32,
    /// Speed at the end of the last prepared segment, steps/s.
    pub current_rate: f32,
    /// Cruise ceiling for this block, steps/s.
    pub maximum_rate: f32,
    /// Speed at the block boundary into the next block, steps/s.
    pub exit_rate: f32,
    /// Step events remaining at which acceleration ends.
    pub accelerate_until: f32,
    /// Step events remaining at which deceleration begins.
    pub decelerate_after: f32,
}

impl BlockData {
    pub const EMPTY: Self = Self {
        step_events_remaining: 0.0,
        step_per_mm: 0.0,
        acceleration: 0.0,
        current_rate: 0.0,
        maximum_rate: 0.0,
        exit_rate: 0.0,
        accelerate_until: 0.0,
        decelerate_after: 0.0,
    };
}

/// The ring itself. Construct one, then [`split`](Self::split) it into
/// its producer and consumer halves.
pub struct SegmentRing {
    /// Next free segment slot. Producer-written, release on publish.
    head: AtomicUsize,
    /// Segment slot being executed. Consumer-written, release on
    /// completion.
    tail: AtomicUsize,
    segments: [UnsafeCell<Segment>; SEG_CAP],
    data: [UnsafeCell<BlockData>; DATA_CAP],
    dist_per_step: [UnsafeCell<u32>; DATA_CAP],
}

// Slot access is arbitrated by head/tail index ownership; see the
// producer/consumer methods for the per-array discipline.
unsafe impl Sync for SegmentRing {}

impl SegmentRing {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            segments: [const { UnsafeCell::new(Segment::EMPTY) }; SEG_CAP],
            data: [const { UnsafeCell::new(BlockData::EMPTY) }; DATA_CAP],
            dist_per_step: [const { UnsafeCell::new(0) }; DATA_CAP],
        }
    }

    /// Splits the ring into its producer and consumer halves, resetting
    /// the indices. The exclusive borrow guarantees no stale half is
    /// still alive.
    pub fn split(&mut self) -> (SegmentProducer<'_>, SegmentConsumer<'_>) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        let ring = &*self;
        (
            SegmentProducer {
                ring,
                next_head: 1,
                data_index: 0,
            },
            SegmentConsumer { ring },
        )
    }

    fn next_slot(index: usize) -> usize {
        let next = index + 1;
        if next == SEG_CAP {
            0
        } else {
            next
        }
    }
}

impl Default for SegmentRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Preparer-side handle: publishes segments, owns the block-data ring.
pub struct SegmentProducer<'r> {
    ring: &'r SegmentRing,
    /// Cached `head + 1`, so the full check costs one atomic load.
    next_head: usize,
    data_index: usize,
}

// The producer only touches slots the consumer cannot see; moving it to
// another execution context is fine as long as it stays unique.
unsafe impl Send for SegmentProducer<'_> {}

impl SegmentProducer<'_> {
    pub fn is_full(&self) -> bool {
        self.next_head == self.ring.tail.load(Ordering::Acquire)
    }

    /// Publishes a segment at the head. The caller must have checked
    /// [`is_full`](Self::is_full).
    pub fn publish(&mut self, segment: Segment) {
        debug_assert!(segment.n_step >= 1, "zero-step segments are never enqueued");
        debug_assert!(!self.is_full());
        let head = self.ring.head.load(Ordering::Relaxed);
        // Sole writer of `head`; the slot at `head` is invisible to the
        // consumer until the release store below.
        unsafe { self.ring.segments[head].get().write(segment) };
        self.ring.head.store(self.next_head, Ordering::Release);
        self.next_head = SegmentRing::next_slot(self.next_head);
    }

    /// Index of the block-data entry currently being prepared into.
    pub fn data_index(&self) -> u8 {
        self.data_index as u8
    }

    /// Rotates to the next block-data entry and returns its index.
    /// Called once per block intake; the `DATA_CAP` sizing keeps the
    /// reclaimed entry unreferenced by any in-flight segment.
    pub fn advance_data(&mut self) -> u8 {
        self.data_index = (self.data_index + 1) % DATA_CAP;
        self.data_index as u8
    }

    /// Mutable access to a block-data entry. The `data` array is
    /// producer-private (the consumer reads only the `dist_per_step`
    /// array), so this cannot race.
    pub fn data(&mut self, index: u8) -> &mut BlockData {
        unsafe { &mut *self.ring.data[index as usize].get() }
    }

    pub fn dist_per_step(&self, index: u8) -> u32 {
        unsafe { *self.ring.dist_per_step[index as usize].get() }
    }

    /// Sets the consumer-visible counter reload for entry `index`.
    ///
    /// Must only be called before the first segment referencing `index`
    /// is published; the release store in [`publish`](Self::publish)
    /// then orders the write for the consumer, and no write ever races a
    /// read.
    pub fn set_dist_per_step(&mut self, index: u8, value: u32) {
        unsafe { self.ring.dist_per_step[index as usize].get().write(value) };
    }
}

/// Executor-side handle: peeks the tail segment, advances on completion.
pub struct SegmentConsumer<'r> {
    ring: &'r SegmentRing,
}

unsafe impl Send for SegmentConsumer<'_> {}

impl SegmentConsumer<'_> {
    pub fn is_empty(&self) -> bool {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        self.ring.head.load(Ordering::Acquire) == tail
    }

    /// Number of published, unconsumed segments.
    pub fn len(&self) -> usize {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        (head + SEG_CAP - tail) % SEG_CAP
    }

    /// Copies out the segment at the tail without releasing the slot.
    /// The slot stays guarded (and its block-data entry with it) until
    /// [`advance`](Self::advance).
    pub fn current(&self) -> Option<Segment> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        if self.ring.head.load(Ordering::Acquire) == tail {
            return None;
        }
        // The acquire load above pairs with the producer's release
        // publish, so the slot contents are visible.
        Some(unsafe { self.ring.segments[tail].get().read() })
    }

    /// Inverse-time counter reload for block-data entry `index`.
    /// Written once by the producer before the entry became reachable.
    pub fn dist_per_step(&self, index: u8) -> u32 {
        unsafe { *self.ring.dist_per_step[index as usize].get() }
    }

    /// Releases the tail slot after the segment has fully executed.
    pub fn advance(&mut self) {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        debug_assert!(self.ring.head.load(Ordering::Acquire) != tail);
        self.ring
            .tail
            .store(SegmentRing::next_slot(tail), Ordering::Release);
    }

    /// Discards every published segment. Used on reset, with the
    /// producer side quiescent.
    pub fn flush(&mut self) {
        while !self.is_empty() {
            self.advance();
        }
    }
}
