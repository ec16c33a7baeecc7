//! # Series
//!
//! The series is the one dynamic buffer every aggregate value is built
//! from: strings, binaries, blocks, object frames, and the evaluation
//! stack are all series.
//!
//! ## Design
//!
//! A series separates the allocated buffer from the used region:
//!
//! ```text
//!   |<-- bias -->|<-- tail -->|T|<-- slack -->|
//!   ^            ^            ^
//!   buffer       index 0      terminator
//! ```
//!
//! - `tail` is the used length, `rest` the element capacity past the
//!   bias. The slot at `tail` always holds a terminator (zero bytes for
//!   narrow series, [`Value::End`] for wide ones), so `tail < rest`.
//! - `bias` is slack in front of element 0. Removing at the head grows
//!   the bias instead of shifting memory, and a later head insertion can
//!   consume it back. `bias + rest` always equals the allocated element
//!   count.
//!
//! Narrow series store elements of 1, 2, or 4 bytes; wide series store
//! [`Value`] cells. Growth reallocates (resetting the bias); everything
//! else mutates in place, which is what keeps element indices and the
//! buffer address stable for aliasing references.

use std::fmt;

use crate::pool::RawId;
use crate::value::Value;

/// Handle to a series node owned by a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesId(pub(crate) RawId);

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "series:{}", self.0)
    }
}

// ============================================================================
// Flags
// ============================================================================

/// Per-series flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesFlags(u16);

impl SeriesFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Collector mark bit; only meaningful during a collection cycle.
    pub const MARK: Self = Self(1 << 0);
    /// Permanently rooted; the sweep never frees a kept series.
    pub const KEEP: Self = Self(1 << 1);
    /// Locked against user-level mutation.
    pub const LOCKED: Self = Self(1 << 2);
    /// Capacity growth rounds to powers of two.
    pub const POW2: Self = Self(1 << 3);

    /// Union of two flag sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Backing storage: raw bytes for narrow series, cells for wide ones.
#[derive(Debug, Clone)]
enum SeriesData {
    Narrow { bytes: Vec<u8>, width: u8 },
    Wide { cells: Vec<Value> },
}

/// Reported element width of a wide series, in bytes.
pub const CELL_WIDTH: u32 = std::mem::size_of::<Value>() as u32;

/// Minimum element capacity a fresh series is given.
const MIN_REST: u32 = 8;

/// Growable buffer with explicit used length, front bias, and terminator.
#[derive(Debug, Clone)]
pub struct Series {
    data: SeriesData,
    tail: u32,
    rest: u32,
    bias: u32,
    flags: SeriesFlags,
}

impl Series {
    /// Make a narrow series able to hold `length` elements of `width`
    /// bytes (1, 2, or 4) before regrowing. Born empty, terminated at 0.
    pub fn narrow(length: u32, width: u8, pow2: bool) -> Self {
        assert!(
            matches!(width, 1 | 2 | 4),
            "narrow series width must be 1, 2, or 4, got {width}"
        );
        let rest = initial_rest(length, pow2);
        let bytes = vec![0u8; rest as usize * width as usize];
        let mut series = Self {
            data: SeriesData::Narrow { bytes, width },
            tail: 0,
            rest,
            bias: 0,
            flags: if pow2 { SeriesFlags::POW2 } else { SeriesFlags::NONE },
        };
        series.write_terminator();
        series
    }

    /// Make a wide (cell-bearing) series able to hold `length` cells
    /// before regrowing. Born empty, terminated at 0.
    pub fn wide(length: u32, pow2: bool) -> Self {
        let rest = initial_rest(length, pow2);
        let cells = vec![Value::End; rest as usize];
        let mut series = Self {
            data: SeriesData::Wide { cells },
            tail: 0,
            rest,
            bias: 0,
            flags: if pow2 { SeriesFlags::POW2 } else { SeriesFlags::NONE },
        };
        series.write_terminator();
        series
    }

    // ------------------------------------------------------------------
    // Shape
    // ------------------------------------------------------------------

    /// Used length in elements.
    pub fn tail(&self) -> u32 {
        self.tail
    }

    /// Element capacity past the bias (used region plus slack).
    pub fn rest(&self) -> u32 {
        self.rest
    }

    /// Front slack in elements.
    pub fn bias(&self) -> u32 {
        self.bias
    }

    /// Whether the used region is empty.
    pub fn is_empty(&self) -> bool {
        self.tail == 0
    }

    /// Element width in bytes; wide series report [`CELL_WIDTH`].
    pub fn width(&self) -> u32 {
        match &self.data {
            SeriesData::Narrow { width, .. } => u32::from(*width),
            SeriesData::Wide { .. } => CELL_WIDTH,
        }
    }

    /// Whether this series stores cells.
    pub fn is_wide(&self) -> bool {
        matches!(self.data, SeriesData::Wide { .. })
    }

    /// Flag accessors.
    pub fn flags(&self) -> SeriesFlags {
        self.flags
    }

    /// Whether the collector mark bit is set.
    pub fn is_marked(&self) -> bool {
        self.flags.contains(SeriesFlags::MARK)
    }

    /// Set the collector mark bit.
    pub fn set_mark(&mut self) {
        self.flags.insert(SeriesFlags::MARK);
    }

    /// Clear the collector mark bit.
    pub fn clear_mark(&mut self) {
        self.flags.remove(SeriesFlags::MARK);
    }

    /// Whether this series is permanently rooted.
    pub fn is_kept(&self) -> bool {
        self.flags.contains(SeriesFlags::KEEP)
    }

    /// Root this series permanently.
    pub fn keep(&mut self) {
        self.flags.insert(SeriesFlags::KEEP);
    }

    /// Whether user-level mutation is refused.
    pub fn is_locked(&self) -> bool {
        self.flags.contains(SeriesFlags::LOCKED)
    }

    /// Refuse user-level mutation from here on.
    pub fn lock(&mut self) {
        self.flags.insert(SeriesFlags::LOCKED);
    }

    /// Allow user-level mutation again.
    pub fn unlock(&mut self) {
        self.flags.remove(SeriesFlags::LOCKED);
    }

    // ------------------------------------------------------------------
    // Growth and removal
    // ------------------------------------------------------------------

    /// Open a `delta`-element gap at `at` (clamped to the tail), growing
    /// the used region. The gap is zeroed (narrow) or unset (wide).
    ///
    /// A head expansion consumes bias without moving memory when enough
    /// is banked; an in-place shift covers the rest while slack lasts;
    /// otherwise the buffer reallocates and the bias resets to zero.
    /// Exceeding the index space is fatal.
    pub fn expand(&mut self, at: u32, delta: u32) {
        if delta == 0 {
            return;
        }
        let at = at.min(self.tail);
        let new_tail = self
            .tail
            .checked_add(delta)
            .unwrap_or_else(|| panic!("series length overflow: {} + {delta}", self.tail));

        if at == 0 && self.bias >= delta {
            // Head insertion repaying earlier head removals: slide the
            // logical origin left over banked slack.
            self.bias -= delta;
            self.rest = self.rest.checked_add(delta).unwrap_or_else(|| {
                panic!("series capacity overflow: {} + {delta}", self.rest)
            });
            self.tail = new_tail;
            self.fill_gap(0, delta);
            self.write_terminator();
            return;
        }

        if new_tail < self.rest {
            // Room between tail and rest: shift the right part over.
            self.shift_right(at, delta);
            self.tail = new_tail;
            self.fill_gap(at, delta);
            self.write_terminator();
            return;
        }

        self.regrow(new_tail);
        self.shift_right(at, delta);
        self.tail = new_tail;
        self.fill_gap(at, delta);
        self.write_terminator();
    }

    /// Remove `len` elements starting at `at`, clamped to the used
    /// region. Head removals bank the space as bias until `bias_limit`
    /// forces a physical shift; other removals shift left. Returns the
    /// number of elements removed.
    pub fn remove(&mut self, at: u32, len: u32, bias_limit: u32) -> u32 {
        if at >= self.tail || len == 0 {
            return 0;
        }
        let len = len.min(self.tail - at);
        if at == 0 {
            self.bias += len;
            self.rest -= len;
            self.tail -= len;
            if self.bias > bias_limit {
                self.unbias();
            }
            self.write_terminator();
            return len;
        }
        self.shift_left(at + len, len);
        self.tail -= len;
        self.write_terminator();
        len
    }

    /// Drop all elements, keeping the capacity.
    pub fn clear(&mut self) {
        self.tail = 0;
        self.write_terminator();
    }

    /// Cut the tail back to `len`. No-op when the series is already that
    /// short.
    pub fn truncate(&mut self, len: u32) {
        if len < self.tail {
            self.tail = len;
            self.write_terminator();
        }
    }

    /// Fold any banked bias back into the buffer by one physical shift.
    pub fn unbias(&mut self) {
        if self.bias == 0 {
            return;
        }
        let bias = self.bias;
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => {
                let w = *width as usize;
                let start = bias as usize * w;
                let used = (self.tail as usize + 1) * w;
                bytes.copy_within(start..start + used, 0);
            }
            SeriesData::Wide { cells } => {
                let start = bias as usize;
                let used = self.tail as usize + 1;
                cells.copy_within(start..start + used, 0);
            }
        }
        self.rest += bias;
        self.bias = 0;
    }

    /// Shallow copy of `length` elements starting at `index`, both
    /// clamped to the used region. The copy is a fresh unmarked,
    /// unlocked series with zero bias.
    pub fn copy_range(&self, index: u32, length: u32) -> Series {
        let index = index.min(self.tail);
        let length = length.min(self.tail - index);
        match &self.data {
            SeriesData::Narrow { width, .. } => {
                let mut copy = Series::narrow(length, *width, false);
                copy.expand(0, length);
                let w = *width as usize;
                let src = self.narrow_range(index, length);
                copy.bytes_mut()[..length as usize * w].copy_from_slice(src);
                copy
            }
            SeriesData::Wide { .. } => {
                let mut copy = Series::wide(length, false);
                copy.expand(0, length);
                let src: Vec<Value> = self.cells()[index as usize..(index + length) as usize].to_vec();
                copy.cells_mut().clone_from_slice(&src);
                copy
            }
        }
    }

    // ------------------------------------------------------------------
    // Narrow access
    // ------------------------------------------------------------------

    /// Logical content of a narrow series as bytes (no terminator).
    pub fn bytes(&self) -> &[u8] {
        self.narrow_range(0, self.tail)
    }

    /// Mutable logical content of a narrow series.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let (start, end) = self.narrow_span(0, self.tail);
        match &mut self.data {
            SeriesData::Narrow { bytes, .. } => &mut bytes[start..end],
            SeriesData::Wide { .. } => panic!("byte access on a wide series"),
        }
    }

    /// Overwrite elements starting at `at` with `src` (already
    /// width-scaled bytes). The range must lie within the used region.
    pub fn write_bytes(&mut self, at: u32, src: &[u8]) {
        let w = self.width() as usize;
        assert_eq!(src.len() % w, 0, "byte write not aligned to element width");
        let len = (src.len() / w) as u32;
        assert!(at + len <= self.tail, "byte write past the tail");
        let (start, end) = self.narrow_span(at, len);
        match &mut self.data {
            SeriesData::Narrow { bytes, .. } => bytes[start..end].copy_from_slice(src),
            SeriesData::Wide { .. } => panic!("byte access on a wide series"),
        }
    }

    /// Read one element of a narrow series as an unsigned unit.
    pub fn unit(&self, index: u32) -> u32 {
        assert!(index < self.tail, "unit read past the tail");
        let (start, _) = self.narrow_span(index, 1);
        match &self.data {
            SeriesData::Narrow { bytes, width } => match width {
                1 => u32::from(bytes[start]),
                2 => u32::from(u16::from_le_bytes([bytes[start], bytes[start + 1]])),
                4 => u32::from_le_bytes([
                    bytes[start],
                    bytes[start + 1],
                    bytes[start + 2],
                    bytes[start + 3],
                ]),
                _ => unreachable!("width checked at construction"),
            },
            SeriesData::Wide { .. } => panic!("unit access on a wide series"),
        }
    }

    /// Write one element of a narrow series from an unsigned unit.
    pub fn put_unit(&mut self, index: u32, unit: u32) {
        assert!(index < self.tail, "unit write past the tail");
        let (start, _) = self.narrow_span(index, 1);
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => match width {
                1 => bytes[start] = unit as u8,
                2 => bytes[start..start + 2].copy_from_slice(&(unit as u16).to_le_bytes()),
                4 => bytes[start..start + 4].copy_from_slice(&unit.to_le_bytes()),
                _ => unreachable!("width checked at construction"),
            },
            SeriesData::Wide { .. } => panic!("unit access on a wide series"),
        }
    }

    fn narrow_range(&self, index: u32, length: u32) -> &[u8] {
        let (start, end) = self.narrow_span(index, length);
        match &self.data {
            SeriesData::Narrow { bytes, .. } => &bytes[start..end],
            SeriesData::Wide { .. } => panic!("byte access on a wide series"),
        }
    }

    fn narrow_span(&self, index: u32, length: u32) -> (usize, usize) {
        let w = self.width() as usize;
        let start = (self.bias + index) as usize * w;
        (start, start + length as usize * w)
    }

    // ------------------------------------------------------------------
    // Wide access
    // ------------------------------------------------------------------

    /// Logical content of a wide series as cells (no terminator).
    pub fn cells(&self) -> &[Value] {
        match &self.data {
            SeriesData::Wide { cells } => {
                &cells[self.bias as usize..(self.bias + self.tail) as usize]
            }
            SeriesData::Narrow { .. } => panic!("cell access on a narrow series"),
        }
    }

    /// Mutable logical content of a wide series.
    pub fn cells_mut(&mut self) -> &mut [Value] {
        let (start, end) = (self.bias as usize, (self.bias + self.tail) as usize);
        match &mut self.data {
            SeriesData::Wide { cells } => &mut cells[start..end],
            SeriesData::Narrow { .. } => panic!("cell access on a narrow series"),
        }
    }

    /// Read one cell.
    pub fn cell(&self, index: u32) -> &Value {
        assert!(index < self.tail, "cell read past the tail");
        &self.cells()[index as usize]
    }

    /// Overwrite one cell.
    pub fn set_cell(&mut self, index: u32, value: Value) {
        assert!(index < self.tail, "cell write past the tail");
        self.cells_mut()[index as usize] = value;
    }

    /// Overwrite cells starting at `at`; the range must fit in the tail.
    pub fn write_cells(&mut self, at: u32, src: &[Value]) {
        let len = src.len() as u32;
        assert!(at + len <= self.tail, "cell write past the tail");
        self.cells_mut()[at as usize..(at + len) as usize].clone_from_slice(src);
    }

    /// Append one cell, growing as needed.
    pub fn push_cell(&mut self, value: Value) {
        let at = self.tail;
        self.expand(at, 1);
        self.set_cell(at, value);
    }

    /// Remove and return the last cell, or `None` when empty.
    pub fn pop_cell(&mut self) -> Option<Value> {
        if self.tail == 0 {
            return None;
        }
        let last = self.tail as usize - 1;
        let value = std::mem::replace(&mut self.cells_mut()[last], Value::End);
        self.tail -= 1;
        self.write_terminator();
        Some(value)
    }

    // ------------------------------------------------------------------
    // Terminator
    // ------------------------------------------------------------------

    /// Whether the one-past-tail terminator is in place.
    pub fn check_terminator(&self) -> bool {
        match &self.data {
            SeriesData::Narrow { bytes, width } => {
                let (start, end) = {
                    let w = *width as usize;
                    let start = (self.bias + self.tail) as usize * w;
                    (start, start + w)
                };
                bytes[start..end].iter().all(|b| *b == 0)
            }
            SeriesData::Wide { cells } => {
                matches!(cells[(self.bias + self.tail) as usize], Value::End)
            }
        }
    }

    /// Fatal check for the terminator invariant, used at checkpoints.
    pub fn assert_terminator(&self) {
        assert!(
            self.check_terminator(),
            "series terminator missing at tail {}",
            self.tail
        );
    }

    fn write_terminator(&mut self) {
        debug_assert!(self.tail < self.rest, "terminator slot requires tail < rest");
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => {
                let w = *width as usize;
                let start = (self.bias + self.tail) as usize * w;
                bytes[start..start + w].fill(0);
            }
            SeriesData::Wide { cells } => {
                cells[(self.bias + self.tail) as usize] = Value::End;
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal moves
    // ------------------------------------------------------------------

    fn fill_gap(&mut self, at: u32, len: u32) {
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => {
                let w = *width as usize;
                let start = (self.bias + at) as usize * w;
                bytes[start..start + len as usize * w].fill(0);
            }
            SeriesData::Wide { cells } => {
                let start = (self.bias + at) as usize;
                cells[start..start + len as usize].fill(Value::Unset);
            }
        }
    }

    /// Move `[at, tail]` (terminator included) right by `delta`; capacity
    /// must already cover the move.
    fn shift_right(&mut self, at: u32, delta: u32) {
        let count = self.tail - at + 1;
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => {
                let w = *width as usize;
                let src = (self.bias + at) as usize * w;
                let dst = (self.bias + at + delta) as usize * w;
                bytes.copy_within(src..src + count as usize * w, dst);
            }
            SeriesData::Wide { cells } => {
                let src = (self.bias + at) as usize;
                let dst = (self.bias + at + delta) as usize;
                cells.copy_within(src..src + count as usize, dst);
            }
        }
    }

    /// Move `[from, tail]` left by `delta`.
    fn shift_left(&mut self, from: u32, delta: u32) {
        let count = self.tail - from;
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => {
                let w = *width as usize;
                let src = (self.bias + from) as usize * w;
                let dst = (self.bias + from - delta) as usize * w;
                bytes.copy_within(src..src + count as usize * w, dst);
            }
            SeriesData::Wide { cells } => {
                let src = (self.bias + from) as usize;
                let dst = (self.bias + from - delta) as usize;
                cells.copy_within(src..src + count as usize, dst);
            }
        }
    }

    /// Reallocate so that `rest > needed_tail`, folding the bias away.
    fn regrow(&mut self, needed_tail: u32) {
        let required = needed_tail
            .checked_add(1)
            .unwrap_or_else(|| panic!("series capacity overflow at {needed_tail}"));
        let mut candidate = required.max(self.rest + (self.rest >> 1)).max(MIN_REST);
        if self.flags.contains(SeriesFlags::POW2) {
            candidate = candidate
                .checked_next_power_of_two()
                .unwrap_or_else(|| panic!("series capacity overflow at {candidate}"));
        }
        match &mut self.data {
            SeriesData::Narrow { bytes, width } => {
                let w = *width as usize;
                let mut grown = vec![0u8; candidate as usize * w];
                let start = self.bias as usize * w;
                let used = (self.tail as usize + 1) * w;
                grown[..used].copy_from_slice(&bytes[start..start + used]);
                *bytes = grown;
            }
            SeriesData::Wide { cells } => {
                let mut grown = vec![Value::End; candidate as usize];
                let start = self.bias as usize;
                let used = self.tail as usize + 1;
                grown[..used].clone_from_slice(&cells[start..start + used]);
                *cells = grown;
            }
        }
        self.bias = 0;
        self.rest = candidate;
    }
}

fn initial_rest(length: u32, pow2: bool) -> u32 {
    let required = length
        .checked_add(1)
        .unwrap_or_else(|| panic!("series capacity overflow at {length}"));
    let candidate = required.max(MIN_REST);
    if pow2 {
        candidate
            .checked_next_power_of_two()
            .unwrap_or_else(|| panic!("series capacity overflow at {candidate}"))
    } else {
        candidate
    }
}

// ============================================================================
// Tests
// ============================================================================
