use std::sync::{Arc, Mutex};

use gracht_utils::safe_assert;
use tracing::trace;

/// Bump-carved, fixed-slot allocator backing in-flight messages in
/// multi-threaded dispatch mode.
///
/// The arena owns one contiguous heap region of `slot_count * slot_size`
/// bytes, sliced into `slot_count` disjoint, fixed-size slots. A single
/// mutex guards a free list of slot indices; there is no compaction and no
/// resizing — slots are reused as-is once released.
///
/// Ownership of a slot is represented by [`ArenaSlot`], a move-only handle
/// whose `Drop` impl returns the slot to the free list exactly once. This
/// is what keeps the receive-path -> dispatch -> handler -> free chain
/// (see the crate's handoff invariant) from ever double-freeing or
/// use-after-freeing a slot: the borrow checker enforces it instead of
/// manual discipline.
pub struct Arena {
    region: Box<[u8]>,
    slot_size: usize,
    slot_count: usize,
    free: Mutex<Vec<usize>>,
}

// Safety: `region` is never resized after construction and slots handed out
// via `allocate` are disjoint, non-overlapping byte ranges; concurrent
// access to distinct slots from distinct threads is therefore data-race
// free. Access to the free list itself is serialized by `free`.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocates a new arena sized for `slot_count` slots of `slot_size`
    /// bytes each, i.e. `workers * 32` slots of `max_message_size + 512`
    /// bytes in the server's default configuration.
    pub fn new(slot_size: usize, slot_count: usize) -> Arc<Self> {
        let region = vec![0u8; slot_size * slot_count].into_boxed_slice();
        let free = (0..slot_count).rev().collect();
        Arc::new(Self { region, slot_size, slot_count, free: Mutex::new(free) })
    }

    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Number of slots currently on the free list. Exposed for tests that
    /// assert the arena returns to its initial size at quiescence.
    pub fn free_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// Allocates a slot, or `None` if the free list is exhausted.
    /// A `None` here is transient backpressure, not a fatal error: callers
    /// on the receive path should treat it as "try again once a worker
    /// frees a slot".
    pub fn allocate(self: &Arc<Self>) -> Option<ArenaSlot> {
        let index = self.free.lock().unwrap().pop()?;
        trace!(index, "arena: slot allocated");
        Some(ArenaSlot { arena: self.clone(), index, len: 0 })
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        safe_assert!(index < self.slot_count, "arena slot index out of range: {index}");
        // Safety: index is in-bounds by the assertion above, and the
        // region's backing allocation is never moved or freed while `self`
        // is alive (it's owned by the Box for the Arena's lifetime).
        unsafe { self.region.as_ptr().add(index * self.slot_size).cast_mut() }
    }

    fn release(&self, index: usize) {
        trace!(index, "arena: slot released");
        self.free.lock().unwrap().push(index);
    }
}

/// Move-only handle to one arena slot. Dropping it returns the slot to the
/// arena's free list — this is the single place where the balanced
/// allocate/free invariant (every allocated slot is freed exactly once) is
/// enforced.
pub struct ArenaSlot {
    arena: Arc<Arena>,
    index: usize,
    len: usize,
}

impl ArenaSlot {
    /// Full backing storage for this slot (`arena.slot_size()` bytes),
    /// regardless of how many bytes of it currently hold a valid frame.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let ptr = self.arena.slot_ptr(self.index);
        // Safety: see Arena's Send/Sync justification; this slot's range is
        // exclusively owned by `self` until dropped.
        unsafe { std::slice::from_raw_parts_mut(ptr, self.arena.slot_size) }
    }

    /// The `len()` bytes of the slot that currently hold a valid frame.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        let ptr = self.arena.slot_ptr(self.index);
        // Safety: see `as_mut_slice`.
        unsafe { std::slice::from_raw_parts(ptr, self.len) }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.arena.slot_size
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks how many bytes of the slot hold a valid frame. `len` is
    /// clamped to the slot's capacity.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.arena.slot_size);
    }
}

impl Drop for ArenaSlot {
    fn drop(&mut self) {
        self.arena.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_round_trips_free_list() {
        let arena = Arena::new(64, 4);
        assert_eq!(arena.free_count(), 4);

        let slot = arena.allocate().unwrap();
        assert_eq!(arena.free_count(), 3);
        drop(slot);
        assert_eq!(arena.free_count(), 4);
    }

    #[test]
    fn exhausted_arena_returns_none() {
        let arena = Arena::new(32, 2);
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        assert!(arena.allocate().is_none());
        drop(a);
        assert!(arena.allocate().is_some());
        drop(b);
    }

    #[test]
    fn slots_are_disjoint_and_independently_writable() {
        let arena = Arena::new(16, 2);
        let mut a = arena.allocate().unwrap();
        let mut b = arena.allocate().unwrap();

        a.as_mut_slice().fill(0xAA);
        b.as_mut_slice().fill(0xBB);

        assert!(a.as_mut_slice().iter().all(|&b| b == 0xAA));
        assert!(b.as_mut_slice().iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn set_len_clamps_to_capacity() {
        let arena = Arena::new(8, 1);
        let mut slot = arena.allocate().unwrap();
        slot.set_len(1000);
        assert_eq!(slot.len(), 8);
    }

    #[test]
    fn stress_concurrent_allocate_free_never_double_allocates() {
        use std::thread;

        let arena = Arena::new(64, 8);
        thread::scope(|scope| {
            for _ in 0..8 {
                let arena = arena.clone();
                scope.spawn(move || {
                    for _ in 0..1000 {
                        if let Some(mut slot) = arena.allocate() {
                            slot.as_mut_slice()[0] = 1;
                        }
                    }
                });
            }
        });
        assert_eq!(arena.free_count(), arena.slot_count());
    }
}
