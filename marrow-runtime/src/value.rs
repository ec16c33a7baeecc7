//! # Value Cells
//!
//! The fixed-width tagged cell every slot in the system holds: block
//! elements, frame slots, and evaluation-stack entries are all [`Value`]
//! cells.
//!
//! Cells never own storage. Series-flavored values carry a [`Position`]
//! (series id plus element index), so any number of cells can alias the
//! same buffer and mutation through one is visible through all. Words
//! carry their interned symbol and an optional [`Binding`] into a frame.
//!
//! ## Symbols
//!
//! Word spellings are interned once, process-wide, behind a lock; a
//! [`Symbol`] is a small copyable token. Interning is append-only, so
//! symbols stay valid for the life of the process.

use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use string_interner::{DefaultStringInterner, DefaultSymbol};

use crate::actions::ActionKind;
use crate::heap::HandleId;
use crate::natives::NativeId;
use crate::series::SeriesId;

// ============================================================================
// Symbols
// ============================================================================

/// Interned word spelling.
pub type Symbol = DefaultSymbol;

static SYMBOLS: OnceLock<RwLock<DefaultStringInterner>> = OnceLock::new();

fn symbols() -> &'static RwLock<DefaultStringInterner> {
    SYMBOLS.get_or_init(|| RwLock::new(DefaultStringInterner::new()))
}

/// Intern `name`, returning its symbol. Repeated calls with the same
/// spelling return the same symbol.
pub fn intern(name: &str) -> Symbol {
    symbols().write().get_or_intern(name)
}

/// Spelling of an interned symbol.
pub fn symbol_name(symbol: Symbol) -> String {
    symbols()
        .read()
        .resolve(symbol)
        .unwrap_or_else(|| panic!("symbol {symbol:?} was never interned"))
        .to_owned()
}

// ============================================================================
// Payloads
// ============================================================================

/// A series reference: which series, and the element index the value
/// stands at. Non-owning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// The referenced series.
    pub series: SeriesId,
    /// Element index the reference stands at.
    pub index: u32,
}

impl Position {
    /// Reference to the head of `series`.
    pub fn head(series: SeriesId) -> Self {
        Self { series, index: 0 }
    }
}

/// Where a word resolves: a frame and a slot in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    /// Frame series the word is bound into.
    pub frame: SeriesId,
    /// Slot index within the frame.
    pub slot: u32,
}

/// A word cell payload: interned spelling plus optional binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Word {
    /// Interned spelling.
    pub symbol: Symbol,
    /// Frame slot the word resolves to, if bound.
    pub binding: Option<Binding>,
}

impl Word {
    /// An unbound word with the given spelling.
    pub fn unbound(name: &str) -> Self {
        Self { symbol: intern(name), binding: None }
    }

    /// The same word rebound into `frame` at `slot`.
    pub fn bound_to(self, frame: SeriesId, slot: u32) -> Self {
        Self { symbol: self.symbol, binding: Some(Binding { frame, slot }) }
    }
}

/// Payload shared by function and closure cells: spec block, body block,
/// and the argument frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Func {
    /// Spec block the function was made from.
    pub spec: SeriesId,
    /// Body block evaluated on call.
    pub body: SeriesId,
    /// Argument frame; persistent for functions, a template for closures.
    pub frame: SeriesId,
}

// ============================================================================
// Datatypes
// ============================================================================

/// Tag of a value cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Datatype {
    /// Terminator / absence of a cell.
    End,
    /// No value (result of an expression with nothing to say).
    Unset,
    /// The none value.
    None,
    /// Boolean.
    Logic,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Decimal,
    /// Single character.
    Char,
    /// Evaluating word.
    Word,
    /// Assigning word (`name:`).
    SetWord,
    /// Fetching word (`:name`).
    GetWord,
    /// Quoting word (`'name`).
    LitWord,
    /// Evaluated block of cells.
    Block,
    /// Block evaluated inline.
    Paren,
    /// Character series.
    Text,
    /// Byte series.
    Binary,
    /// Object (frame reference).
    Object,
    /// Materialized error object.
    Error,
    /// Built-in function.
    Native,
    /// Per-datatype action verb.
    Action,
    /// Interpreted function.
    Function,
    /// Interpreted function with call-local frames.
    Closure,
    /// Host object handle.
    Handle,
    /// Port (device-facing frame reference).
    Port,
}

impl Datatype {
    /// Lowercase name used in messages.
    pub fn name(self) -> &'static str {
        match self {
            Datatype::End => "end",
            Datatype::Unset => "unset",
            Datatype::None => "none",
            Datatype::Logic => "logic",
            Datatype::Integer => "integer",
            Datatype::Decimal => "decimal",
            Datatype::Char => "char",
            Datatype::Word => "word",
            Datatype::SetWord => "set-word",
            Datatype::GetWord => "get-word",
            Datatype::LitWord => "lit-word",
            Datatype::Block => "block",
            Datatype::Paren => "paren",
            Datatype::Text => "text",
            Datatype::Binary => "binary",
            Datatype::Object => "object",
            Datatype::Error => "error",
            Datatype::Native => "native",
            Datatype::Action => "action",
            Datatype::Function => "function",
            Datatype::Closure => "closure",
            Datatype::Handle => "handle",
            Datatype::Port => "port",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Cells
// ============================================================================

/// One tagged value cell. Fixed-width and `Copy`: every payload is an
/// id, an index pair, or a scalar, so cells move by memcpy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Terminator; also what empty evaluation yields internally.
    End,
    /// No value.
    Unset,
    /// The none value.
    None,
    /// Boolean.
    Logic(bool),
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Decimal(f64),
    /// Single character.
    Char(char),
    /// Evaluating word.
    Word(Word),
    /// Assigning word.
    SetWord(Word),
    /// Fetching word.
    GetWord(Word),
    /// Quoting word.
    LitWord(Word),
    /// Block reference at a position.
    Block(Position),
    /// Paren reference at a position.
    Paren(Position),
    /// Text reference at a position.
    Text(Position),
    /// Binary reference at a position.
    Binary(Position),
    /// Object frame reference.
    Object(SeriesId),
    /// Materialized error frame reference.
    Error(SeriesId),
    /// Built-in function.
    Native(NativeId),
    /// Action verb, dispatched on its first argument's datatype.
    Action(ActionKind),
    /// Interpreted function.
    Function(Func),
    /// Interpreted function with call-local frames.
    Closure(Func),
    /// Host object handle.
    Handle(HandleId),
    /// Port frame reference.
    Port(SeriesId),
}

impl Value {
    /// The cell's datatype tag.
    pub fn datatype(&self) -> Datatype {
        match self {
            Value::End => Datatype::End,
            Value::Unset => Datatype::Unset,
            Value::None => Datatype::None,
            Value::Logic(_) => Datatype::Logic,
            Value::Integer(_) => Datatype::Integer,
            Value::Decimal(_) => Datatype::Decimal,
            Value::Char(_) => Datatype::Char,
            Value::Word(_) => Datatype::Word,
            Value::SetWord(_) => Datatype::SetWord,
            Value::GetWord(_) => Datatype::GetWord,
            Value::LitWord(_) => Datatype::LitWord,
            Value::Block(_) => Datatype::Block,
            Value::Paren(_) => Datatype::Paren,
            Value::Text(_) => Datatype::Text,
            Value::Binary(_) => Datatype::Binary,
            Value::Object(_) => Datatype::Object,
            Value::Error(_) => Datatype::Error,
            Value::Native(_) => Datatype::Native,
            Value::Action(_) => Datatype::Action,
            Value::Function(_) => Datatype::Function,
            Value::Closure(_) => Datatype::Closure,
            Value::Handle(_) => Datatype::Handle,
            Value::Port(_) => Datatype::Port,
        }
    }

    /// Condition truth: `none` and `false` are falsey, `unset` and `end`
    /// have no truth value, everything else is truthy.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Value::None => Some(false),
            Value::Logic(b) => Some(*b),
            Value::Unset | Value::End => None,
            _ => Some(true),
        }
    }

    /// Whether this is the terminator.
    pub fn is_end(&self) -> bool {
        matches!(self, Value::End)
    }

    /// The series a position-flavored cell references, if any. Covers
    /// the block family and the string family, not frame-flavored cells.
    pub fn position(&self) -> Option<Position> {
        match self {
            Value::Block(p) | Value::Paren(p) | Value::Text(p) | Value::Binary(p) => Some(*p),
            _ => None,
        }
    }

    /// Rebuild the same flavor of cell at a different position.
    ///
    /// Only meaningful for cells that carry a [`Position`]; anything else
    /// is returned unchanged.
    pub fn reposition(&self, position: Position) -> Value {
        match self {
            Value::Block(_) => Value::Block(position),
            Value::Paren(_) => Value::Paren(position),
            Value::Text(_) => Value::Text(position),
            Value::Binary(_) => Value::Binary(position),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::End => write!(f, "~end~"),
            Value::Unset => write!(f, "~unset~"),
            Value::None => write!(f, "none"),
            Value::Logic(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Char(c) => write!(f, "#\"{c}\""),
            Value::Word(w) => write!(f, "{}", symbol_name(w.symbol)),
            Value::SetWord(w) => write!(f, "{}:", symbol_name(w.symbol)),
            Value::GetWord(w) => write!(f, ":{}", symbol_name(w.symbol)),
            Value::LitWord(w) => write!(f, "'{}", symbol_name(w.symbol)),
            Value::Block(p) => write!(f, "block[{}+{}]", p.series, p.index),
            Value::Paren(p) => write!(f, "paren[{}+{}]", p.series, p.index),
            Value::Text(p) => write!(f, "text[{}+{}]", p.series, p.index),
            Value::Binary(p) => write!(f, "binary[{}+{}]", p.series, p.index),
            Value::Object(id) => write!(f, "object[{id}]"),
            Value::Error(id) => write!(f, "error[{id}]"),
            Value::Native(id) => write!(f, "native[{id}]"),
            Value::Action(kind) => write!(f, "action[{kind}]"),
            Value::Function(_) => write!(f, "function"),
            Value::Closure(_) => write!(f, "closure"),
            Value::Handle(id) => write!(f, "handle[{id}]"),
            Value::Port(id) => write!(f, "port[{id}]"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_are_plain_data() {
        fn moves_by_copy<T: Copy>() {}
        moves_by_copy::<Value>();
    }

    #[test]
    fn test_intern_reuses_symbols() {
        let a = intern("append");
        let b = intern("append");
        let c = intern("insert");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(symbol_name(a), "append");
    }

    #[test]
    fn test_word_binding() {
        let word = Word::unbound("x");
        assert!(word.binding.is_none());
        let id = SeriesId(crate::pool::RawId { index: 3, generation: 1 });
        let bound = word.bound_to(id, 2);
        assert_eq!(bound.symbol, word.symbol);
        assert_eq!(bound.binding, Some(Binding { frame: id, slot: 2 }));
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(Value::None.truthy(), Some(false));
        assert_eq!(Value::Logic(false).truthy(), Some(false));
        assert_eq!(Value::Logic(true).truthy(), Some(true));
        assert_eq!(Value::Integer(0).truthy(), Some(true));
        assert_eq!(Value::Unset.truthy(), None);
        assert_eq!(Value::End.truthy(), None);
    }

    #[test]
    fn test_datatype_names() {
        assert_eq!(Value::Integer(1).datatype().name(), "integer");
        assert_eq!(Value::Word(Word::unbound("q")).datatype().name(), "word");
        assert_eq!(Datatype::SetWord.to_string(), "set-word");
    }

    #[test]
    fn test_reposition_keeps_flavor() {
        let id = SeriesId(crate::pool::RawId { index: 1, generation: 1 });
        let other = Position { series: id, index: 4 };
        let block = Value::Block(Position::head(id));
        assert_eq!(block.reposition(other), Value::Block(other));
        let text = Value::Text(Position::head(id));
        assert_eq!(text.reposition(other), Value::Text(other));
        assert_eq!(Value::Integer(5).reposition(other), Value::Integer(5));
    }
}
