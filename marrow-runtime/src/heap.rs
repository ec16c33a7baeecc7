//! # Heap
//!
//! The explicit owner of all runtime memory: the series pool, the
//! auxiliary host-object pool, the collector's root set, the ballast
//! countdown that schedules collections, and the device-request
//! registry. There is no process-wide heap; every [`Heap`] is an
//! independent instance and dropping it releases everything it owns.
//!
//! ## Root set
//!
//! Series stay alive by being reachable from one of:
//!
//! - the protected stack (LIFO, scope-bounded holds),
//! - the guarded list (long-lived holds, any order),
//! - the recent ring (the last N allocations, covering the window
//!   between allocating a series and linking it somewhere reachable),
//! - the kept list (boot-registered permanent buffers, `KEEP`-flagged),
//! - the pending device requests,
//! - anything the caller passes to [`Heap::collect`] directly.
//!
//! ## Collection scheduling
//!
//! Every allocation ticks the ballast down by its byte size; underflow
//! requests a collection, which the evaluator honors at the next safe
//! point. While deferral is active a request stays pending instead of
//! running.

use std::fmt;

use tracing::trace;

use crate::config::MemoryConfig;
use crate::context;
use crate::device::{DeviceQueue, DeviceRequest, RequestId};
use crate::gc;
use crate::pool::{Pool, PoolStats, RawId};
use crate::series::{Series, SeriesId};
use crate::value::Value;

/// Handle to a host object in the auxiliary pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub(crate) RawId);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

/// Host-side object: opaque to evaluated code, optionally tied to a
/// series the host fills or drains.
#[derive(Debug)]
pub struct HostObject {
    /// Series the host object carries, if any.
    pub data: Option<SeriesId>,
    pub(crate) marked: bool,
}

/// Allocation and collection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Series allocated over the heap's lifetime.
    pub series_allocated: u64,
    /// Series freed, by sweep or explicitly.
    pub series_freed: u64,
    /// Bytes of series storage allocated over the heap's lifetime.
    pub bytes_allocated: u64,
    /// Collection cycles run.
    pub collections: u64,
    /// Nodes freed by the most recent collection.
    pub last_freed: usize,
}

/// The runtime heap.
pub struct Heap {
    pub(crate) series: Pool<Series>,
    pub(crate) hosts: Pool<HostObject>,
    pub(crate) protected: Vec<SeriesId>,
    pub(crate) guarded: Vec<SeriesId>,
    pub(crate) recent: Vec<Option<SeriesId>>,
    recent_next: usize,
    pub(crate) kept: Vec<SeriesId>,
    pub(crate) devices: DeviceQueue,
    pub(crate) stats: HeapStats,
    ballast: i64,
    defer_depth: u32,
    collect_pending: bool,
    root_frame: SeriesId,
    task_frame: SeriesId,
    config: MemoryConfig,
}

impl Heap {
    /// Build a heap: empty pools, a kept system root frame, and a kept
    /// task frame.
    pub fn new(config: MemoryConfig) -> Self {
        let placeholder = SeriesId(RawId { index: u32::MAX, generation: 0 });
        let mut heap = Self {
            series: Pool::new(config.segment_units),
            hosts: Pool::new(config.segment_units),
            protected: Vec::new(),
            guarded: Vec::new(),
            recent: vec![None; config.recent_ring],
            recent_next: 0,
            kept: Vec::new(),
            devices: DeviceQueue::new(),
            stats: HeapStats::default(),
            ballast: config.ballast as i64,
            defer_depth: 0,
            collect_pending: false,
            root_frame: placeholder,
            task_frame: placeholder,
            config,
        };
        let root_frame = context::make_frame(&mut heap, 16);
        let task_frame = context::make_frame(&mut heap, 8);
        heap.keep_series(root_frame);
        heap.keep_series(task_frame);
        heap.root_frame = root_frame;
        heap.task_frame = task_frame;
        heap
    }

    /// The memory configuration this heap runs with.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The system root frame; top-level words bind here.
    pub fn root_frame(&self) -> SeriesId {
        self.root_frame
    }

    /// The task frame for per-task system state.
    pub fn task_frame(&self) -> SeriesId {
        self.task_frame
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate a narrow series for `length` elements of `width` bytes.
    pub fn make_series(&mut self, length: u32, width: u8, pow2: bool) -> SeriesId {
        self.admit(Series::narrow(length, width, pow2))
    }

    /// Allocate a wide series for `length` cells. Blocks grow in
    /// power-of-two steps.
    pub fn make_block(&mut self, length: u32) -> SeriesId {
        self.admit(Series::wide(length, true))
    }

    /// Allocate a width-1 series holding the bytes of `text`.
    pub fn make_text(&mut self, text: &str) -> SeriesId {
        self.make_binary(text.as_bytes())
    }

    /// Allocate a width-1 series holding `content`.
    pub fn make_binary(&mut self, content: &[u8]) -> SeriesId {
        let length = content.len() as u32;
        let mut series = Series::narrow(length, 1, false);
        series.expand(0, length);
        if length > 0 {
            series.write_bytes(0, content);
        }
        self.admit(series)
    }

    /// Allocate a wide series holding `cells`.
    pub fn make_block_from(&mut self, cells: &[Value]) -> SeriesId {
        let length = cells.len() as u32;
        let mut series = Series::wide(length, true);
        series.expand(0, length);
        if length > 0 {
            series.write_cells(0, cells);
        }
        self.admit(series)
    }

    /// Adopt an already-built series: pool it, root it in the recent
    /// ring, and tick the ballast.
    pub(crate) fn admit(&mut self, series: Series) -> SeriesId {
        let bytes = (series.bias() + series.rest()) as usize * series.width() as usize;
        let id = SeriesId(self.series.allocate(series));
        self.note_recent(id);
        self.tick_ballast(bytes);
        self.stats.series_allocated += 1;
        id
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    /// Borrow a series. A stale id is fatal.
    pub fn series(&self, id: SeriesId) -> &Series {
        self.series.get(id.0)
    }

    /// Mutably borrow a series. A stale id is fatal.
    pub fn series_mut(&mut self, id: SeriesId) -> &mut Series {
        self.series.get_mut(id.0)
    }

    /// Whether `id` still addresses a live series.
    pub fn is_live(&self, id: SeriesId) -> bool {
        self.series.contains(id.0)
    }

    /// Explicitly free a series ahead of the sweep.
    ///
    /// Freeing a kept series is fatal. Freeing a series that is still
    /// protected, guarded, or reachable leaves a stale root; the next
    /// mark phase detects that as a fatal error.
    pub fn free_series(&mut self, id: SeriesId) {
        if self.series(id).is_kept() {
            panic!("cannot free kept series {id}");
        }
        for slot in &mut self.recent {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        self.series.free(id.0);
        self.stats.series_freed += 1;
    }

    /// Shallow-copy `length` elements of `id` starting at `index` into
    /// a fresh series.
    pub fn copy_series(&mut self, id: SeriesId, index: u32, length: u32) -> SeriesId {
        let copy = self.series(id).copy_range(index, length);
        self.admit(copy)
    }

    /// Open a gap of `delta` elements at `at`; see [`Series::expand`].
    pub fn expand_series(&mut self, id: SeriesId, at: u32, delta: u32) {
        let width = self.series(id).width() as usize;
        self.series_mut(id).expand(at, delta);
        self.tick_ballast(delta as usize * width);
    }

    /// Remove `len` elements at `at`, applying the configured bias
    /// limit; see [`Series::remove`].
    pub fn remove_series(&mut self, id: SeriesId, at: u32, len: u32) -> u32 {
        let bias_limit = self.config.bias_limit;
        self.series_mut(id).remove(at, len, bias_limit)
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// Push a scope-bounded hold on `id`. Pair with [`Heap::unprotect`]
    /// in LIFO order.
    pub fn protect(&mut self, id: SeriesId) {
        self.protected.push(id);
    }

    /// Pop the most recent hold, which must be `id`; popping out of
    /// order is fatal.
    pub fn unprotect(&mut self, id: SeriesId) {
        match self.protected.pop() {
            Some(top) if top == id => {}
            Some(top) => panic!("unbalanced unprotect: expected {top}, got {id}"),
            None => panic!("unprotect with an empty protect stack"),
        }
    }

    /// Depth of the protect stack.
    pub fn protected_depth(&self) -> usize {
        self.protected.len()
    }

    /// Add a long-lived hold on `id`.
    pub fn guard(&mut self, id: SeriesId) {
        self.guarded.push(id);
    }

    /// Drop a long-lived hold. Unguarding an id that was never guarded
    /// is fatal.
    pub fn unguard(&mut self, id: SeriesId) {
        let Some(at) = self.guarded.iter().position(|held| *held == id) else {
            panic!("series {id} is not guarded");
        };
        self.guarded.swap_remove(at);
    }

    /// Permanently root `id`; the sweep will never free it.
    pub fn keep_series(&mut self, id: SeriesId) {
        if !self.series(id).is_kept() {
            self.series_mut(id).keep();
            self.kept.push(id);
        }
    }

    /// Lock `id` against user-level mutation.
    pub fn lock_series(&mut self, id: SeriesId) {
        self.series_mut(id).lock();
    }

    /// Allow user-level mutation of `id` again.
    pub fn unlock_series(&mut self, id: SeriesId) {
        self.series_mut(id).unlock();
    }

    fn note_recent(&mut self, id: SeriesId) {
        if self.recent.is_empty() {
            return;
        }
        self.recent[self.recent_next] = Some(id);
        self.recent_next = (self.recent_next + 1) % self.recent.len();
    }

    /// Drop the recent-ring roots. Series allocated since the last ring
    /// wrap lose that root and survive only through real reachability;
    /// callers wanting precise reclamation use this before an explicit
    /// [`Heap::collect`].
    pub fn clear_recent(&mut self) {
        self.recent.fill(None);
        self.recent_next = 0;
    }

    // ------------------------------------------------------------------
    // Collection scheduling
    // ------------------------------------------------------------------

    fn tick_ballast(&mut self, bytes: usize) {
        self.stats.bytes_allocated += bytes as u64;
        self.ballast -= bytes as i64;
        if self.ballast <= 0 && !self.collect_pending {
            trace!("ballast exhausted, collection requested");
            self.collect_pending = true;
        }
    }

    /// Ask for a collection at the next safe point.
    pub fn request_collection(&mut self) {
        self.collect_pending = true;
    }

    /// Whether a collection request is waiting.
    pub fn collection_pending(&self) -> bool {
        self.collect_pending
    }

    /// Consume a pending request if collection is currently allowed.
    pub fn take_collect_request(&mut self) -> bool {
        if self.collect_pending && self.defer_depth == 0 {
            self.collect_pending = false;
            true
        } else {
            false
        }
    }

    /// Hold off collection while a multi-step mutation is in flight.
    pub fn defer_collection(&mut self) {
        self.defer_depth += 1;
    }

    /// Release one level of deferral.
    pub fn resume_collection(&mut self) {
        assert!(self.defer_depth > 0, "resume_collection without a matching defer");
        self.defer_depth -= 1;
    }

    /// Whether collection is currently held off.
    pub fn collection_deferred(&self) -> bool {
        self.defer_depth > 0
    }

    /// Collect now, with `roots` as additional temporary roots.
    ///
    /// While deferral is active the request is queued instead and zero
    /// is returned.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        if self.defer_depth > 0 {
            self.collect_pending = true;
            return 0;
        }
        self.collect_pending = false;
        let freed = gc::collect(self, roots);
        self.ballast = self.config.ballast as i64;
        freed
    }

    // ------------------------------------------------------------------
    // Host objects
    // ------------------------------------------------------------------

    /// Allocate a host object, optionally carrying `data`.
    pub fn alloc_handle(&mut self, data: Option<SeriesId>) -> HandleId {
        let id = HandleId(self.hosts.allocate(HostObject { data, marked: false }));
        self.tick_ballast(std::mem::size_of::<HostObject>());
        id
    }

    /// The series a host object carries. A stale handle is fatal.
    pub fn handle_data(&self, id: HandleId) -> Option<SeriesId> {
        self.hosts.get(id.0).data
    }

    /// Whether `id` still addresses a live host object.
    pub fn is_handle_live(&self, id: HandleId) -> bool {
        self.hosts.contains(id.0)
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Register a pending device request; roots `port` and `buffer`
    /// until completion.
    pub fn queue_device_request(
        &mut self,
        port: SeriesId,
        buffer: Option<SeriesId>,
    ) -> RequestId {
        self.devices.queue(port, buffer)
    }

    /// Complete a pending device request.
    pub fn complete_device_request(&mut self, id: RequestId) -> Option<DeviceRequest> {
        self.devices.complete(id)
    }

    /// The device requests currently pending.
    pub fn pending_device_requests(&self) -> &[DeviceRequest] {
        self.devices.pending()
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    /// Allocation and collection counters.
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Live series count.
    pub fn live_series(&self) -> usize {
        self.series.len()
    }

    /// Shape of the series pool.
    pub fn series_pool_stats(&self) -> PoolStats {
        self.series.stats()
    }

    /// Shape of the host-object pool.
    pub fn host_pool_stats(&self) -> PoolStats {
        self.hosts.stats()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live_series", &self.live_series())
            .field("ballast", &self.ballast)
            .field("defer_depth", &self.defer_depth)
            .field("collect_pending", &self.collect_pending)
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::new(MemoryConfig {
            segment_units: 8,
            ballast: 4096,
            bias_limit: 16,
            recent_ring: 8,
        })
    }

    #[test]
    fn test_new_heap_has_kept_frames() {
        let heap = Heap::default();
        assert!(heap.series(heap.root_frame()).is_kept());
        assert!(heap.series(heap.task_frame()).is_kept());
        assert_ne!(heap.root_frame(), heap.task_frame());
    }

    #[test]
    fn test_make_series_invariants() {
        let mut heap = small_heap();
        let id = heap.make_series(10, 1, false);
        let series = heap.series(id);
        assert_eq!(series.tail(), 0);
        assert!(series.rest() >= 10);
        assert!(series.check_terminator());
    }

    #[test]
    fn test_make_text_and_binary() {
        let mut heap = small_heap();
        let text = heap.make_text("abcd");
        assert_eq!(heap.series(text).bytes(), b"abcd");
        let binary = heap.make_binary(&[1, 2, 3]);
        assert_eq!(heap.series(binary).bytes(), &[1, 2, 3]);
        let empty = heap.make_text("");
        assert_eq!(heap.series(empty).tail(), 0);
    }

    #[test]
    fn test_make_block_from_cells() {
        let mut heap = small_heap();
        let id = heap.make_block_from(&[Value::Integer(1), Value::None]);
        let series = heap.series(id);
        assert_eq!(series.tail(), 2);
        assert_eq!(series.cell(0), &Value::Integer(1));
        assert_eq!(series.cell(1), &Value::None);
        assert!(series.check_terminator());
    }

    #[test]
    fn test_copy_series_is_independent() {
        let mut heap = small_heap();
        let original = heap.make_text("abcdef");
        let copy = heap.copy_series(original, 1, 3);
        assert_eq!(heap.series(copy).bytes(), b"bcd");

        heap.series_mut(copy).put_unit(0, u32::from(b'X'));
        assert_eq!(heap.series(copy).bytes(), b"Xcd");
        assert_eq!(heap.series(original).bytes(), b"abcdef");
    }

    #[test]
    fn test_expand_and_remove_through_heap() {
        let mut heap = small_heap();
        let id = heap.make_text("abcd");
        heap.expand_series(id, 2, 2);
        assert_eq!(heap.series(id).tail(), 6);
        let removed = heap.remove_series(id, 0, 1);
        assert_eq!(removed, 1);
        assert_eq!(heap.series(id).bias(), 1);
    }

    #[test]
    #[should_panic(expected = "stale pool id")]
    fn test_stale_series_access_is_fatal() {
        let mut heap = small_heap();
        let id = heap.make_text("x");
        heap.free_series(id);
        heap.make_text("y");
        heap.series(id);
    }

    #[test]
    #[should_panic(expected = "cannot free kept series")]
    fn test_free_kept_series_is_fatal() {
        let mut heap = small_heap();
        let root = heap.root_frame();
        heap.free_series(root);
    }

    #[test]
    fn test_protect_is_lifo() {
        let mut heap = small_heap();
        let a = heap.make_text("a");
        let b = heap.make_text("b");
        heap.protect(a);
        heap.protect(b);
        assert_eq!(heap.protected_depth(), 2);
        heap.unprotect(b);
        heap.unprotect(a);
        assert_eq!(heap.protected_depth(), 0);
    }

    #[test]
    #[should_panic(expected = "unbalanced unprotect")]
    fn test_out_of_order_unprotect_is_fatal() {
        let mut heap = small_heap();
        let a = heap.make_text("a");
        let b = heap.make_text("b");
        heap.protect(a);
        heap.protect(b);
        heap.unprotect(a);
    }

    #[test]
    fn test_guard_any_order() {
        let mut heap = small_heap();
        let a = heap.make_text("a");
        let b = heap.make_text("b");
        heap.guard(a);
        heap.guard(b);
        heap.unguard(a);
        heap.unguard(b);
    }

    #[test]
    #[should_panic(expected = "is not guarded")]
    fn test_unguard_unknown_is_fatal() {
        let mut heap = small_heap();
        let a = heap.make_text("a");
        heap.unguard(a);
    }

    #[test]
    fn test_keep_series_is_idempotent() {
        let mut heap = small_heap();
        let id = heap.make_text("sys");
        heap.keep_series(id);
        heap.keep_series(id);
        assert!(heap.series(id).is_kept());
        assert_eq!(heap.kept.iter().filter(|k| **k == id).count(), 1);
    }

    #[test]
    fn test_ballast_requests_collection() {
        let mut heap = small_heap();
        assert!(!heap.collection_pending());
        // 4096-byte ballast; each series claims its capacity in bytes.
        for _ in 0..64 {
            heap.make_series(100, 1, false);
        }
        assert!(heap.collection_pending());
        assert!(heap.take_collect_request());
        assert!(!heap.take_collect_request());
    }

    #[test]
    fn test_deferral_queues_requests() {
        let mut heap = small_heap();
        heap.defer_collection();
        heap.request_collection();
        assert!(!heap.take_collect_request());
        assert_eq!(heap.collect(&[]), 0);
        assert!(heap.collection_pending());
        heap.resume_collection();
        assert!(heap.take_collect_request());
    }

    #[test]
    #[should_panic(expected = "without a matching defer")]
    fn test_unbalanced_resume_is_fatal() {
        let mut heap = small_heap();
        heap.resume_collection();
    }

    #[test]
    fn test_host_objects() {
        let mut heap = small_heap();
        let data = heap.make_binary(&[9, 9]);
        let plain = heap.alloc_handle(None);
        let carrying = heap.alloc_handle(Some(data));
        assert_eq!(heap.handle_data(plain), None);
        assert_eq!(heap.handle_data(carrying), Some(data));
        assert!(heap.is_handle_live(plain));
    }

    #[test]
    fn test_device_requests_root_through_heap() {
        let mut heap = small_heap();
        let port = context::make_frame(&mut heap, 2);
        let buffer = heap.make_binary(&[0; 16]);
        let id = heap.queue_device_request(port, Some(buffer));
        assert_eq!(heap.pending_device_requests().len(), 1);
        let done = heap.complete_device_request(id).unwrap();
        assert_eq!(done.buffer, Some(buffer));
        assert!(heap.pending_device_requests().is_empty());
    }

    #[test]
    fn test_stats_track_allocations() {
        let mut heap = small_heap();
        let before = heap.stats();
        let id = heap.make_text("abc");
        heap.free_series(id);
        let after = heap.stats();
        assert_eq!(after.series_allocated, before.series_allocated + 1);
        assert_eq!(after.series_freed, before.series_freed + 1);
        assert!(after.bytes_allocated > before.bytes_allocated);
    }
}
