//! # Contexts
//!
//! A context (frame) binds words to value slots. It is built from two
//! wide series:
//!
//! - the frame itself: slot 0 references the keylist, slots 1.. hold
//!   values;
//! - the keylist: slot 0 is the `self` word, slots 1.. name the frame's
//!   value slots one to one.
//!
//! A bound word carries `{frame, slot}` and resolves in O(1); binding a
//! block walks it deeply and rewrites its word cells in place. Frames
//! are ordinary series, so the collector traces them like any block and
//! object values are just frame references.

use std::collections::HashMap;

use crate::heap::Heap;
use crate::series::SeriesId;
use crate::value::{Position, Symbol, Value, Word};

/// Build an empty frame with room for `capacity` slots.
pub fn make_frame(heap: &mut Heap, capacity: u32) -> SeriesId {
    let keylist = heap.make_block(capacity + 1);
    heap.series_mut(keylist).push_cell(Value::Word(Word::unbound("self")));
    let frame = heap.make_block(capacity + 1);
    heap.series_mut(frame)
        .push_cell(Value::Block(Position::head(keylist)));
    frame
}

/// The keylist series of `frame`. A frame whose slot 0 is not a keylist
/// reference is corrupt, which is fatal.
pub fn keylist_of(heap: &Heap, frame: SeriesId) -> SeriesId {
    match heap.series(frame).cell(0) {
        Value::Block(position) => position.series,
        other => panic!("frame {frame} slot 0 holds {other} instead of its keylist"),
    }
}

/// Number of value slots in `frame` (excluding slot 0).
pub fn slot_count(heap: &Heap, frame: SeriesId) -> u32 {
    heap.series(frame).tail() - 1
}

/// Append a new slot named `symbol`, initialized to unset. Returns the
/// slot index.
pub fn append_slot(heap: &mut Heap, frame: SeriesId, symbol: Symbol) -> u32 {
    let keylist = keylist_of(heap, frame);
    heap.series_mut(keylist)
        .push_cell(Value::Word(Word { symbol, binding: None }));
    heap.series_mut(frame).push_cell(Value::Unset);
    heap.series(frame).tail() - 1
}

/// Find the slot named `symbol`, if the frame has one.
pub fn find_slot(heap: &Heap, frame: SeriesId, symbol: Symbol) -> Option<u32> {
    let keylist = keylist_of(heap, frame);
    heap.series(keylist)
        .cells()
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(slot, cell)| match cell {
            Value::Word(word) if word.symbol == symbol => Some(slot as u32),
            _ => None,
        })
}

/// Find the slot named `symbol`, appending one when missing.
pub fn ensure_slot(heap: &mut Heap, frame: SeriesId, symbol: Symbol) -> u32 {
    match find_slot(heap, frame, symbol) {
        Some(slot) => slot,
        None => append_slot(heap, frame, symbol),
    }
}

/// Read a value slot. Slot 0 is the keylist, not a value; addressing it
/// is fatal.
pub fn get_slot(heap: &Heap, frame: SeriesId, slot: u32) -> Value {
    assert!(slot >= 1, "frame slot 0 is the keylist reference");
    heap.series(frame).cell(slot).clone()
}

/// Write a value slot.
pub fn set_slot(heap: &mut Heap, frame: SeriesId, slot: u32, value: Value) {
    assert!(slot >= 1, "frame slot 0 is the keylist reference");
    heap.series_mut(frame).set_cell(slot, value);
}

/// The word naming `slot`.
pub fn slot_symbol(heap: &Heap, frame: SeriesId, slot: u32) -> Symbol {
    let keylist = keylist_of(heap, frame);
    match heap.series(keylist).cell(slot) {
        Value::Word(word) => word.symbol,
        other => panic!("keylist of {frame} slot {slot} holds {other} instead of a word"),
    }
}

/// Deeply bind the words of `block` into `frame`.
///
/// With `extend` set, every word flavor gets a slot (appended when
/// missing), which is how top-level code acquires its bindings; without
/// it only words the frame already names are rewritten. Nested blocks
/// and parens are bound through; other cells are untouched.
pub fn bind_block(heap: &mut Heap, block: SeriesId, frame: SeriesId, extend: bool) {
    let len = heap.series(block).tail();
    for i in 0..len {
        let cell = heap.series(block).cell(i).clone();
        match cell {
            Value::Word(word) => {
                if let Some(word) = bind_word(heap, word, frame, extend) {
                    heap.series_mut(block).set_cell(i, Value::Word(word));
                }
            }
            Value::SetWord(word) => {
                if let Some(word) = bind_word(heap, word, frame, extend) {
                    heap.series_mut(block).set_cell(i, Value::SetWord(word));
                }
            }
            Value::GetWord(word) => {
                if let Some(word) = bind_word(heap, word, frame, extend) {
                    heap.series_mut(block).set_cell(i, Value::GetWord(word));
                }
            }
            Value::LitWord(word) => {
                if let Some(word) = bind_word(heap, word, frame, extend) {
                    heap.series_mut(block).set_cell(i, Value::LitWord(word));
                }
            }
            Value::Block(position) | Value::Paren(position) => {
                bind_block(heap, position.series, frame, extend);
            }
            _ => {}
        }
    }
}

fn bind_word(heap: &mut Heap, word: Word, frame: SeriesId, extend: bool) -> Option<Word> {
    let slot = if extend {
        ensure_slot(heap, frame, word.symbol)
    } else {
        find_slot(heap, frame, word.symbol)?
    };
    Some(word.bound_to(frame, slot))
}

/// Deeply retarget bindings: every word in `block` bound into `from` is
/// rebound to the same slot of `to`. Bindings into other frames are
/// left alone.
pub fn rebind_block(heap: &mut Heap, block: SeriesId, from: SeriesId, to: SeriesId) {
    let len = heap.series(block).tail();
    for i in 0..len {
        let cell = heap.series(block).cell(i).clone();
        let rebound = |word: Word| -> Option<Word> {
            match word.binding {
                Some(binding) if binding.frame == from => Some(word.bound_to(to, binding.slot)),
                _ => None,
            }
        };
        match cell {
            Value::Word(word) => {
                if let Some(word) = rebound(word) {
                    heap.series_mut(block).set_cell(i, Value::Word(word));
                }
            }
            Value::SetWord(word) => {
                if let Some(word) = rebound(word) {
                    heap.series_mut(block).set_cell(i, Value::SetWord(word));
                }
            }
            Value::GetWord(word) => {
                if let Some(word) = rebound(word) {
                    heap.series_mut(block).set_cell(i, Value::GetWord(word));
                }
            }
            Value::LitWord(word) => {
                if let Some(word) = rebound(word) {
                    heap.series_mut(block).set_cell(i, Value::LitWord(word));
                }
            }
            Value::Block(position) | Value::Paren(position) => {
                rebind_block(heap, position.series, from, to);
            }
            _ => {}
        }
    }
}

/// Deep-clone the block family: the series and every nested block or
/// paren get fresh copies, cell positions preserved. Strings, binaries,
/// and every other payload stay shared. A shared or self-referential
/// nested block clones once; the clone reproduces the reference shape,
/// so a block that reaches itself yields a clone that reaches itself.
pub fn clone_block_deep(heap: &mut Heap, block: SeriesId) -> SeriesId {
    let mut cloned = HashMap::new();
    clone_block_walk(heap, block, &mut cloned)
}

fn clone_block_walk(
    heap: &mut Heap,
    block: SeriesId,
    cloned: &mut HashMap<SeriesId, SeriesId>,
) -> SeriesId {
    if let Some(&copy) = cloned.get(&block) {
        return copy;
    }
    let tail = heap.series(block).tail();
    let clone = heap.copy_series(block, 0, tail);
    // Recorded before the walk so a cycle resolves to the in-flight clone.
    cloned.insert(block, clone);
    for i in 0..tail {
        let cell = heap.series(clone).cell(i).clone();
        match cell {
            Value::Block(position) => {
                let nested = clone_block_walk(heap, position.series, cloned);
                heap.series_mut(clone).set_cell(
                    i,
                    Value::Block(Position { series: nested, index: position.index }),
                );
            }
            Value::Paren(position) => {
                let nested = clone_block_walk(heap, position.series, cloned);
                heap.series_mut(clone).set_cell(
                    i,
                    Value::Paren(Position { series: nested, index: position.index }),
                );
            }
            _ => {}
        }
    }
    clone
}

/// Clone a frame for a fresh activation: same keylist, fresh value
/// cells.
pub fn clone_frame(heap: &mut Heap, frame: SeriesId) -> SeriesId {
    let tail = heap.series(frame).tail();
    heap.copy_series(frame, 0, tail)
}

// ============================================================================
// Tests
// ============================================================================
