//! # Pool Allocator
//!
//! Segmented fixed-slot allocator underneath every heap node kind.
//!
//! ## Design
//!
//! A pool owns a list of segments, each a fixed run of slots. Free slots
//! are threaded into an intrusive free list by slot index; allocation pops
//! the head, release pushes it back. The pool grows by whole segments and
//! never compacts or returns segment memory before teardown, so a slot's
//! index is stable for the life of the pool.
//!
//! Slots are addressed by [`RawId`], an index paired with the generation
//! stamped when the slot was handed out. Release bumps the generation, so
//! a stale id can never silently reach a recycled slot: every accessor
//! validates and treats a mismatch as a fatal invariant violation.

use std::fmt;

use tracing::debug;

/// Generation counter for detecting stale ids.
pub type Generation = u32;

/// Reserved generation values.
pub mod generation {
    use super::Generation;

    /// Slot has never been handed out.
    pub const UNINITIALIZED: Generation = 0;
    /// First generation a live slot carries.
    pub const FIRST: Generation = 1;
    /// Saturation point; a slot reaching this is never recycled again.
    pub const OVERFLOW_GUARD: Generation = u32::MAX - 1;
}

/// Generation-stamped handle to a pool slot.
///
/// Plain data: copying an id never affects the slot. The id only grants
/// access while its generation matches the slot's current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawId {
    /// Slot index across all segments.
    pub index: u32,
    /// Generation the slot carried when this id was issued.
    pub generation: Generation,
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

/// One slot: either free (threaded into the free list) or occupied.
#[derive(Debug)]
enum Slot<T> {
    Free { next: Option<u32> },
    Occupied(T),
}

#[derive(Debug)]
struct SlotEntry<T> {
    generation: Generation,
    slot: Slot<T>,
}

#[derive(Debug)]
struct Segment<T> {
    slots: Vec<SlotEntry<T>>,
}

impl<T> Segment<T> {
    /// Build a segment whose slots chain `first..first + units` onto the
    /// free list, ending at `tail` (the previous free head).
    fn new(first: u32, units: u32, tail: Option<u32>) -> Self {
        let mut slots = Vec::with_capacity(units as usize);
        for i in 0..units {
            let next = if i + 1 < units { Some(first + i + 1) } else { tail };
            slots.push(SlotEntry {
                generation: generation::FIRST,
                slot: Slot::Free { next },
            });
        }
        Self { slots }
    }
}

/// Counters describing a pool's shape and history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of segments currently held.
    pub segments: usize,
    /// Total slots across all segments.
    pub capacity: usize,
    /// Slots currently occupied.
    pub live: usize,
    /// Slots currently on the free list.
    pub free: usize,
    /// Slots retired after generation saturation; never recycled.
    pub retired: usize,
    /// Allocations served over the pool's lifetime.
    pub allocated_total: u64,
    /// Releases over the pool's lifetime.
    pub freed_total: u64,
}

/// Segmented slot pool for one node kind.
#[derive(Debug)]
pub struct Pool<T> {
    segments: Vec<Segment<T>>,
    units_per_segment: u32,
    free_head: Option<u32>,
    free_count: u32,
    retired: u32,
    allocated_total: u64,
    freed_total: u64,
}

impl<T> Pool<T> {
    /// Create an empty pool; the first segment is added on first use.
    pub fn new(units_per_segment: u32) -> Self {
        assert!(units_per_segment > 0, "pool segment must hold at least one slot");
        Self {
            segments: Vec::new(),
            units_per_segment,
            free_head: None,
            free_count: 0,
            retired: 0,
            allocated_total: 0,
            freed_total: 0,
        }
    }

    /// Store `value` in a free slot, growing by one segment if none is left.
    pub fn allocate(&mut self, value: T) -> RawId {
        let index = match self.free_head {
            Some(index) => index,
            None => {
                self.grow();
                self.free_head.unwrap_or_else(|| unreachable!("grow always refills the free list"))
            }
        };
        let entry = self.entry_mut_unchecked(index);
        let Slot::Free { next } = entry.slot else {
            panic!("pool free list reached an occupied slot at index {index}");
        };
        let generation = entry.generation;
        entry.slot = Slot::Occupied(value);
        self.free_head = next;
        self.free_count -= 1;
        self.allocated_total += 1;
        RawId { index, generation }
    }

    /// Release the slot behind `id`, returning its value.
    ///
    /// The slot's generation is bumped so the released id (and any copy of
    /// it) is stale from here on. Releasing an already-free or stale id is
    /// fatal.
    pub fn free(&mut self, id: RawId) -> T {
        let free_head = self.free_head;
        let entry = self.entry_mut(id);
        let slot = std::mem::replace(&mut entry.slot, Slot::Free { next: free_head });
        let Slot::Occupied(value) = slot else {
            unreachable!("entry_mut only admits occupied slots");
        };
        entry.generation += 1;
        if entry.generation >= generation::OVERFLOW_GUARD {
            // Generation saturated: the slot leaves circulation for good.
            entry.slot = Slot::Free { next: None };
            self.retired += 1;
        } else {
            self.free_head = Some(id.index);
            self.free_count += 1;
        }
        self.freed_total += 1;
        value
    }

    /// Borrow the value behind `id`. Stale or freed ids are fatal.
    pub fn get(&self, id: RawId) -> &T {
        let entry = self.entry(id);
        match &entry.slot {
            Slot::Occupied(value) => value,
            Slot::Free { .. } => panic!("pool id {id} refers to a freed slot"),
        }
    }

    /// Mutably borrow the value behind `id`. Stale or freed ids are fatal.
    pub fn get_mut(&mut self, id: RawId) -> &mut T {
        match &mut self.entry_mut(id).slot {
            Slot::Occupied(value) => value,
            Slot::Free { .. } => unreachable!("entry_mut only admits occupied slots"),
        }
    }

    /// Whether `id` still addresses a live slot.
    pub fn contains(&self, id: RawId) -> bool {
        self.lookup(id.index)
            .map(|entry| {
                entry.generation == id.generation && matches!(entry.slot, Slot::Occupied(_))
            })
            .unwrap_or(false)
    }

    /// Keep every slot for which `keep` returns `true`; release the rest.
    ///
    /// This is the sweep primitive: one pass over every segment, freeing
    /// in place. Returns the number of slots released.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(RawId, &mut T) -> bool,
    {
        let mut freed = 0;
        for seg_index in 0..self.segments.len() {
            for slot_index in 0..self.segments[seg_index].slots.len() {
                let index = seg_index as u32 * self.units_per_segment + slot_index as u32;
                let entry = &mut self.segments[seg_index].slots[slot_index];
                let generation = entry.generation;
                let keep_it = match &mut entry.slot {
                    Slot::Occupied(value) => keep(RawId { index, generation }, value),
                    Slot::Free { .. } => continue,
                };
                if !keep_it {
                    self.free(RawId { index, generation });
                    freed += 1;
                }
            }
        }
        freed
    }

    /// Visit every live slot.
    pub fn iter(&self) -> impl Iterator<Item = (RawId, &T)> {
        self.segments.iter().enumerate().flat_map(move |(seg_index, segment)| {
            segment.slots.iter().enumerate().filter_map(move |(slot_index, entry)| {
                let index = seg_index as u32 * self.units_per_segment + slot_index as u32;
                match &entry.slot {
                    Slot::Occupied(value) => {
                        Some((RawId { index, generation: entry.generation }, value))
                    }
                    Slot::Free { .. } => None,
                }
            })
        })
    }

    /// Number of live slots. Retired slots are neither live nor free.
    pub fn len(&self) -> usize {
        self.capacity() - self.free_count as usize - self.retired as usize
    }

    /// Whether no slot is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots across all segments.
    pub fn capacity(&self) -> usize {
        self.segments.len() * self.units_per_segment as usize
    }

    /// Shape and lifetime counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            segments: self.segments.len(),
            capacity: self.capacity(),
            live: self.len(),
            free: self.free_count as usize,
            retired: self.retired as usize,
            allocated_total: self.allocated_total,
            freed_total: self.freed_total,
        }
    }

    fn grow(&mut self) {
        let first = self.capacity();
        let first = u32::try_from(first)
            .ok()
            .filter(|f| f.checked_add(self.units_per_segment).is_some())
            .unwrap_or_else(|| panic!("pool index space exhausted at {} slots", self.capacity()));
        self.segments
            .push(Segment::new(first, self.units_per_segment, self.free_head));
        self.free_head = Some(first);
        self.free_count += self.units_per_segment;
        debug!(
            segment = self.segments.len() - 1,
            units = self.units_per_segment,
            "pool segment added"
        );
    }

    /// Jump a live slot to `generation`, as if it had been recycled that
    /// many times. Returns the refreshed id.
    #[cfg(test)]
    fn age_slot(&mut self, id: RawId, generation: Generation) -> RawId {
        let entry = self.entry_mut(id);
        entry.generation = generation;
        RawId { index: id.index, generation }
    }

    fn split(&self, index: u32) -> (usize, usize) {
        (
            (index / self.units_per_segment) as usize,
            (index % self.units_per_segment) as usize,
        )
    }

    fn lookup(&self, index: u32) -> Option<&SlotEntry<T>> {
        let (seg, off) = self.split(index);
        self.segments.get(seg).and_then(|s| s.slots.get(off))
    }

    fn entry(&self, id: RawId) -> &SlotEntry<T> {
        let Some(entry) = self.lookup(id.index) else {
            panic!("pool id {id} is out of range");
        };
        if entry.generation != id.generation {
            panic!(
                "stale pool id {id}: slot is now at generation {}",
                entry.generation
            );
        }
        entry
    }

    fn entry_mut(&mut self, id: RawId) -> &mut SlotEntry<T> {
        // Validate through the shared path first; reborrow mutably after.
        let occupied = {
            let entry = self.entry(id);
            matches!(entry.slot, Slot::Occupied(_))
        };
        if !occupied {
            panic!("pool id {id} refers to a freed slot");
        }
        self.entry_mut_unchecked(id.index)
    }

    fn entry_mut_unchecked(&mut self, index: u32) -> &mut SlotEntry<T> {
        let (seg, off) = self.split(index);
        &mut self.segments[seg].slots[off]
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_distinct_ids() {
        let mut pool = Pool::new(4);
        let a = pool.allocate("a");
        let b = pool.allocate("b");
        assert_ne!(a, b);
        assert_eq!(*pool.get(a), "a");
        assert_eq!(*pool.get(b), "b");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_grow_by_segments() {
        let mut pool = Pool::new(2);
        assert_eq!(pool.capacity(), 0);
        let ids: Vec<_> = (0..5).map(|i| pool.allocate(i)).collect();
        assert_eq!(pool.capacity(), 6);
        assert_eq!(pool.stats().segments, 3);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*pool.get(*id), i);
        }
    }

    #[test]
    fn test_free_recycles_with_new_generation() {
        let mut pool = Pool::new(4);
        let a = pool.allocate(1u64);
        assert_eq!(pool.free(a), 1);
        // LIFO free list: the same slot index comes back first.
        let b = pool.allocate(2u64);
        assert_eq!(b.index, a.index);
        assert_eq!(b.generation, a.generation + 1);
        assert!(!pool.contains(a));
        assert!(pool.contains(b));
    }

    #[test]
    fn test_saturated_generation_retires_the_slot() {
        let mut pool = Pool::new(4);
        let a = pool.allocate(1u64);
        let b = pool.allocate(2u64);
        let a = pool.age_slot(a, generation::OVERFLOW_GUARD - 1);
        pool.free(a);

        // The slot leaves circulation and is neither live nor free.
        assert!(!pool.contains(a));
        assert_eq!(pool.len(), 1);
        let stats = pool.stats();
        assert_eq!(stats.retired, 1);
        assert_eq!(stats.live + stats.free + stats.retired, stats.capacity);

        let c = pool.allocate(3u64);
        assert_ne!(c.index, a.index);
        assert!(pool.contains(b));
    }

    #[test]
    #[should_panic(expected = "stale pool id")]
    fn test_stale_id_is_fatal() {
        let mut pool = Pool::new(4);
        let a = pool.allocate(1);
        pool.free(a);
        pool.allocate(2);
        pool.get(a);
    }

    #[test]
    #[should_panic(expected = "freed slot")]
    fn test_freed_id_is_fatal() {
        let mut pool = Pool::new(4);
        let a = pool.allocate(1);
        pool.free(a);
        // Forged id matching the post-free generation still lands on a
        // free slot and must not be admitted.
        let forged = RawId { index: a.index, generation: a.generation + 1 };
        pool.get(forged);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_id_is_fatal() {
        let pool: Pool<u8> = Pool::new(4);
        pool.get(RawId { index: 9, generation: generation::FIRST });
    }

    #[test]
    fn test_retain_releases_rejected_slots() {
        let mut pool = Pool::new(4);
        let ids: Vec<_> = (0..6).map(|i| pool.allocate(i)).collect();
        let freed = pool.retain(|_, value| *value % 2 == 0);
        assert_eq!(freed, 3);
        assert_eq!(pool.len(), 3);
        assert!(pool.contains(ids[0]));
        assert!(!pool.contains(ids[1]));
        assert!(pool.contains(ids[4]));
    }

    #[test]
    fn test_iter_visits_live_slots_only() {
        let mut pool = Pool::new(4);
        let a = pool.allocate("keep");
        let b = pool.allocate("drop");
        pool.free(b);
        let seen: Vec<_> = pool.iter().collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, a);
    }

    #[test]
    fn test_stats_track_lifetime_counts() {
        let mut pool = Pool::new(4);
        let a = pool.allocate(1);
        pool.allocate(2);
        pool.free(a);
        let stats = pool.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.free, 3);
        assert_eq!(stats.allocated_total, 2);
        assert_eq!(stats.freed_total, 1);
    }
}
