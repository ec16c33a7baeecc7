//! # Series Modification
//!
//! One algorithm behind `insert`, `append`, and `change` on every
//! container series. The verbs differ only in where they write and what
//! they do to existing elements; the splice mechanics, `only`/`part`/
//! `dup` handling, and self-insertion safety live here once.
//!
//! The source elements are snapshotted before the target mutates, so
//! inserting a series into itself reads the pre-mutation content, and
//! the borrow of the source ends before the target is touched.

use crate::error::ErrorKind;
use crate::heap::Heap;
use crate::series::SeriesId;
use crate::value::{Position, Value};

/// Which modification verb is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    /// Open a gap at the index and write into it.
    Insert,
    /// Insert at the tail, wherever the index points.
    Append,
    /// Overwrite in place, growing or shrinking as the rules demand.
    Change,
}

/// Refinements shared by the modification verbs.
#[derive(Debug, Clone, Copy)]
pub struct ModifyArgs {
    /// Insert a block source as one cell instead of splicing its
    /// elements.
    pub only: bool,
    /// For insert/append: take at most this many elements from the
    /// source. For change: replace exactly this span of the target.
    pub part: Option<u32>,
    /// Write the source this many times; zero writes nothing, negative
    /// is a no-op.
    pub dup: i64,
}

impl Default for ModifyArgs {
    fn default() -> Self {
        Self { only: false, part: None, dup: 1 }
    }
}

/// Run `op` against `target`, writing `source`. Returns the element
/// index one past the written region (the unchanged index when nothing
/// was written).
pub fn modify(
    heap: &mut Heap,
    op: ModifyOp,
    target: Position,
    source: &Value,
    args: &ModifyArgs,
) -> Result<u32, ErrorKind> {
    let series = heap.series(target.series);
    if series.is_locked() {
        return Err(ErrorKind::Locked);
    }
    let wide = series.is_wide();
    let tail = series.tail();
    let index = if op == ModifyOp::Append { tail } else { target.index.min(tail) };

    if args.dup <= 0 {
        return Ok(index);
    }
    let dup = args.dup as u32;

    if wide {
        modify_wide(heap, op, target.series, index, tail, source, args, dup)
    } else {
        modify_narrow(heap, op, target.series, index, tail, source, args, dup)
    }
}

#[allow(clippy::too_many_arguments)]
fn modify_wide(
    heap: &mut Heap,
    op: ModifyOp,
    target: SeriesId,
    index: u32,
    tail: u32,
    source: &Value,
    args: &ModifyArgs,
    dup: u32,
) -> Result<u32, ErrorKind> {
    // Snapshot the source cells; self-insertion reads pre-mutation data.
    let cells: Vec<Value> = match source {
        Value::Block(position) | Value::Paren(position) if !args.only => {
            let src = heap.series(position.series);
            let at = position.index.min(src.tail());
            let take = source_take(op, args, src.tail() - at);
            src.cells()[at as usize..(at + take) as usize].to_vec()
        }
        other => vec![other.clone()],
    };
    let ilen = cells.len() as u32;
    if ilen == 0 {
        return Ok(index);
    }
    let total = checked_total(dup, ilen);

    open_target(heap, op, target, index, tail, total, args);

    let series = heap.series_mut(target);
    for copy in 0..dup {
        series.write_cells(index + copy * ilen, &cells);
    }
    Ok(index + total)
}

#[allow(clippy::too_many_arguments)]
fn modify_narrow(
    heap: &mut Heap,
    op: ModifyOp,
    target: SeriesId,
    index: u32,
    tail: u32,
    source: &Value,
    args: &ModifyArgs,
    dup: u32,
) -> Result<u32, ErrorKind> {
    let width = heap.series(target).width();
    let (bytes, ilen): (Vec<u8>, u32) = match source {
        Value::Text(position) | Value::Binary(position) => {
            let src = heap.series(position.series);
            if src.is_wide() || src.width() != width {
                return Err(ErrorKind::BadArgument {
                    expected: "series of matching width",
                    actual: source.datatype(),
                });
            }
            let at = position.index.min(src.tail());
            let take = source_take(op, args, src.tail() - at);
            let w = width as usize;
            let start = at as usize * w;
            (src.bytes()[start..start + take as usize * w].to_vec(), take)
        }
        Value::Char(_) | Value::Integer(_) => {
            let unit = narrow_unit(source, width)?;
            (unit.to_le_bytes()[..width as usize].to_vec(), 1)
        }
        other => {
            return Err(ErrorKind::BadArgument {
                expected: "text, binary, char, or integer",
                actual: other.datatype(),
            })
        }
    };
    if ilen == 0 {
        return Ok(index);
    }
    let total = checked_total(dup, ilen);

    open_target(heap, op, target, index, tail, total, args);

    let series = heap.series_mut(target);
    for copy in 0..dup {
        series.write_bytes(index + copy * ilen, &bytes);
    }
    Ok(index + total)
}

/// Elements to take from a series source. `part` limits insert/append
/// sources; change takes the whole source and applies `part` to the
/// target span instead.
fn source_take(op: ModifyOp, args: &ModifyArgs, avail: u32) -> u32 {
    match (op, args.part) {
        (ModifyOp::Change, _) | (_, None) => avail,
        (_, Some(part)) => part.min(avail),
    }
}

/// Make room for `total` elements at `index`.
///
/// Insert and append open a gap. Change replaces a span: the write
/// region grows when the write is longer than the span and shrinks when
/// a `part` span is longer than the write; without `part` the span is
/// capped at the write length, so short writes plainly overwrite.
fn open_target(
    heap: &mut Heap,
    op: ModifyOp,
    target: SeriesId,
    index: u32,
    tail: u32,
    total: u32,
    args: &ModifyArgs,
) {
    match op {
        ModifyOp::Insert | ModifyOp::Append => {
            heap.expand_series(target, index, total);
        }
        ModifyOp::Change => {
            let span = match args.part {
                Some(part) => part.min(tail - index),
                None => total.min(tail - index),
            };
            if total > span {
                heap.expand_series(target, index + span, total - span);
            } else if total < span {
                heap.remove_series(target, index + total, span - total);
            }
        }
    }
}

fn checked_total(dup: u32, ilen: u32) -> u32 {
    dup.checked_mul(ilen)
        .unwrap_or_else(|| panic!("series length overflow: {dup} copies of {ilen} elements"))
}

/// Convert a char or integer cell into a single narrow-series unit,
/// refusing values the series width cannot hold.
pub(crate) fn narrow_unit(value: &Value, width: u32) -> Result<u32, ErrorKind> {
    let unit = match value {
        Value::Char(c) => u32::from(*c),
        Value::Integer(n) => u32::try_from(*n).map_err(|_| ErrorKind::OutOfRange { index: *n })?,
        other => {
            return Err(ErrorKind::BadArgument {
                expected: "char or integer",
                actual: other.datatype(),
            })
        }
    };
    let fits = match width {
        1 => unit <= 0xFF,
        2 => unit <= 0xFFFF,
        _ => true,
    };
    if !fits {
        return Err(ErrorKind::BadArgument {
            expected: "value that fits the series width",
            actual: value.datatype(),
        });
    }
    Ok(unit)
}

// ============================================================================
// Tests
// ============================================================================
