//! # Garbage Collector
//!
//! Two-phase, non-moving mark-and-sweep over the heap's pools.
//!
//! MARK starts from the fixed root set (protected stack, guarded list,
//! recent ring, kept series, pending device requests, plus any cells the
//! caller passes in) and walks reachable series with an explicit
//! worklist. Marking is idempotent: an already-marked series is never
//! revisited, which both bounds the walk on cyclic structures and keeps
//! re-marking shared series cheap.
//!
//! SWEEP visits every pool slot once, frees what is neither marked nor
//! kept, and clears the mark bit on survivors, so every live series is
//! unmarked again when the cycle ends. Host objects are swept in the
//! same pass discipline as series.
//!
//! Buffers never move; only whole nodes are reclaimed. Cells are plain
//! data, so there is nothing to pin.

use tracing::debug;

use crate::heap::{HandleId, Heap};
use crate::series::SeriesId;
use crate::value::Value;

/// Worklists for the mark phase.
#[derive(Default)]
struct Marker {
    series: Vec<SeriesId>,
    hosts: Vec<HandleId>,
}

impl Marker {
    fn series(&mut self, id: SeriesId) {
        self.series.push(id);
    }

    fn host(&mut self, id: HandleId) {
        self.hosts.push(id);
    }
}

/// Run one collection cycle. Returns the number of nodes freed.
pub(crate) fn collect(heap: &mut Heap, roots: &[Value]) -> usize {
    let mut marker = Marker::default();

    for cell in roots {
        scan_cell(cell, &mut marker);
    }
    for i in 0..heap.protected.len() {
        marker.series(heap.protected[i]);
    }
    for i in 0..heap.guarded.len() {
        marker.series(heap.guarded[i]);
    }
    for i in 0..heap.kept.len() {
        marker.series(heap.kept[i]);
    }
    for i in 0..heap.recent.len() {
        if let Some(id) = heap.recent[i] {
            marker.series(id);
        }
    }
    for i in 0..heap.devices.pending().len() {
        let request = heap.devices.pending()[i];
        marker.series(request.port);
        if let Some(buffer) = request.buffer {
            marker.series(buffer);
        }
    }

    mark(heap, &mut marker);
    let freed = sweep(heap);

    heap.stats.collections += 1;
    heap.stats.last_freed = freed;
    debug!(
        freed,
        live_series = heap.series.len(),
        live_hosts = heap.hosts.len(),
        "collection cycle complete"
    );
    freed
}

fn mark(heap: &mut Heap, marker: &mut Marker) {
    loop {
        if let Some(id) = marker.series.pop() {
            mark_series(heap, marker, id);
        } else if let Some(id) = marker.hosts.pop() {
            let host = heap.hosts.get_mut(id.0);
            if host.marked {
                continue;
            }
            host.marked = true;
            if let Some(data) = host.data {
                marker.series(data);
            }
        } else {
            break;
        }
    }
}

fn mark_series(heap: &mut Heap, marker: &mut Marker, id: SeriesId) {
    let series = heap.series.get_mut(id.0);
    if series.is_marked() {
        return;
    }
    series.set_mark();
    if !series.is_wide() {
        return;
    }
    for i in 0..heap.series.get(id.0).tail() {
        let cell = heap.series.get(id.0).cell(i).clone();
        scan_cell(&cell, marker);
    }
}

/// Queue everything a cell can reach. Scalars reach nothing; a raw
/// throw in flight is not a cell and never arrives here.
fn scan_cell(cell: &Value, marker: &mut Marker) {
    match cell {
        Value::Block(position)
        | Value::Paren(position)
        | Value::Text(position)
        | Value::Binary(position) => marker.series(position.series),
        Value::Object(id) | Value::Error(id) | Value::Port(id) => marker.series(*id),
        Value::Word(word)
        | Value::SetWord(word)
        | Value::GetWord(word)
        | Value::LitWord(word) => {
            if let Some(binding) = word.binding {
                marker.series(binding.frame);
            }
        }
        Value::Function(func) | Value::Closure(func) => {
            marker.series(func.spec);
            marker.series(func.body);
            marker.series(func.frame);
        }
        Value::Handle(id) => marker.host(*id),
        Value::End
        | Value::Unset
        | Value::None
        | Value::Logic(_)
        | Value::Integer(_)
        | Value::Decimal(_)
        | Value::Char(_)
        | Value::Native(_)
        | Value::Action(_) => {}
    }
}

fn sweep(heap: &mut Heap) -> usize {
    let freed_series = heap.series.retain(|_, series| {
        if series.is_kept() || series.is_marked() {
            series.clear_mark();
            #[cfg(debug_assertions)]
            series.assert_terminator();
            true
        } else {
            false
        }
    });
    let freed_hosts = heap.hosts.retain(|_, host| {
        let keep = host.marked;
        host.marked = false;
        keep
    });
    heap.stats.series_freed += freed_series as u64;
    freed_series + freed_hosts
}

// ============================================================================
// Tests
// ============================================================================
