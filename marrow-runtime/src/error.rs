//! # Errors and Unwinds
//!
//! Three severities, three behaviors:
//!
//! - Internal invariant violations (stale pool ids, missing terminators,
//!   dispatch-table holes, allocator exhaustion) are fatal and panic at
//!   the point of detection. There is no recovery path through them.
//! - User-visible failures are [`ErrorKind`] values, materialized into a
//!   heap-resident error object and carried by [`Unwind::Error`] to the
//!   nearest trap.
//! - Everything else that interrupts straight-line evaluation rides the
//!   same [`Unwind`] channel: function return, loop break, user throw,
//!   and cooperative halt.
//!
//! A raw [`Unwind::Throw`] holds plain cells and is never stored in the
//! heap, so the collector never sees it; a materialized error object is
//! ordinary heap data from the moment a trap stores it. The distinction
//! is structural, not a runtime flag.

use thiserror::Error;

use crate::actions::ActionKind;
use crate::context;
use crate::heap::Heap;
use crate::series::SeriesId;
use crate::value::{intern, Datatype, Symbol, Value};

/// User-visible error categories.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    /// An argument had the wrong datatype.
    #[error("wrong argument type: expected {expected}, got {actual}")]
    BadArgument {
        /// What the operation accepts.
        expected: &'static str,
        /// What it was given.
        actual: Datatype,
    },
    /// No action table is registered for the datatype.
    #[error("{datatype} does not support the {action} action")]
    NoAction {
        /// Datatype of the dispatching argument.
        datatype: Datatype,
        /// Requested verb.
        action: ActionKind,
    },
    /// A series index fell outside the usable range.
    #[error("index {index} is out of range")]
    OutOfRange {
        /// The offending index.
        index: i64,
    },
    /// Mutation of a locked series was refused.
    #[error("series is locked against modification")]
    Locked,
    /// The evaluation stack hit its configured limit.
    #[error("evaluation stack overflow at depth {depth}")]
    StackOverflow {
        /// Cell depth at the point of refusal.
        depth: u32,
    },
    /// A word was evaluated but resolves to no value.
    #[error("{name} has no value")]
    NoValue {
        /// Spelling of the word.
        name: String,
    },
    /// A word carries no binding at all.
    #[error("{name} is not bound to a context")]
    NotBound {
        /// Spelling of the word.
        name: String,
    },
    /// A non-callable value sat in call position.
    #[error("cannot call a {datatype} value")]
    NotCallable {
        /// Datatype found in call position.
        datatype: Datatype,
    },
    /// A callable ran out of argument cells.
    #[error("{name} is missing an argument")]
    MissingArgument {
        /// Name of the callable being applied.
        name: String,
    },
    /// Integer or decimal division by zero.
    #[error("attempt to divide by zero")]
    DivideByZero,
    /// Integer arithmetic overflowed.
    #[error("integer arithmetic overflow")]
    Overflow,
    /// A condition evaluated to something with no truth value.
    #[error("{datatype} has no truth value")]
    NoTruthValue {
        /// Datatype of the condition result.
        datatype: Datatype,
    },
    /// A throw reached the top without a catch.
    #[error("no catch for throw")]
    UncaughtThrow,
    /// A control unwind escaped the scope that should have caught it.
    #[error("{name} used outside its valid context")]
    OutOfContext {
        /// Name of the escaping control word.
        name: &'static str,
    },
}

impl ErrorKind {
    /// Stable identifier word for the materialized error object.
    pub fn id(&self) -> &'static str {
        match self {
            ErrorKind::BadArgument { .. } => "bad-argument",
            ErrorKind::NoAction { .. } => "no-action",
            ErrorKind::OutOfRange { .. } => "out-of-range",
            ErrorKind::Locked => "locked",
            ErrorKind::StackOverflow { .. } => "stack-overflow",
            ErrorKind::NoValue { .. } => "no-value",
            ErrorKind::NotBound { .. } => "not-bound",
            ErrorKind::NotCallable { .. } => "not-callable",
            ErrorKind::MissingArgument { .. } => "missing-argument",
            ErrorKind::DivideByZero => "divide-by-zero",
            ErrorKind::Overflow => "overflow",
            ErrorKind::NoTruthValue { .. } => "no-truth-value",
            ErrorKind::UncaughtThrow => "uncaught-throw",
            ErrorKind::OutOfContext { .. } => "out-of-context",
        }
    }
}

/// A raised error: the kind plus its materialized heap object.
///
/// The object is an ordinary frame with `id` (word) and `message` (text)
/// slots, so evaluated code can inspect a caught error like any other
/// object.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct ErrorValue {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Frame holding the error's fields.
    pub object: SeriesId,
}

impl ErrorValue {
    /// Build the heap object for `kind`.
    pub fn materialize(heap: &mut Heap, kind: ErrorKind) -> Self {
        let object = context::make_frame(heap, 2);
        let id_slot = context::append_slot(heap, object, intern("id"));
        let message_slot = context::append_slot(heap, object, intern("message"));
        let message = heap.make_text(&kind.to_string());
        context::set_slot(
            heap,
            object,
            id_slot,
            Value::Word(crate::value::Word { symbol: intern(kind.id()), binding: None }),
        );
        context::set_slot(
            heap,
            object,
            message_slot,
            Value::Text(crate::value::Position::head(message)),
        );
        Self { kind, object }
    }
}

/// Everything that interrupts straight-line evaluation.
///
/// The display text is what each variant means when it escapes to the
/// top level uncaught.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Unwind {
    /// A raised error looking for the nearest trap.
    #[error(transparent)]
    Error(ErrorValue),
    /// Early function return.
    #[error("return used outside of a function")]
    Return(Value),
    /// Loop break.
    #[error("break used outside of a loop")]
    Break(Value),
    /// User throw in flight. Plain cells; never heap-resident.
    #[error("no catch for throw")]
    Throw {
        /// Optional catch label.
        name: Option<Symbol>,
        /// The thrown value.
        value: Value,
    },
    /// Escape requested through the interrupt flag; abandons the
    /// current top-level unit only.
    #[error("escaped")]
    Escape,
    /// Cooperative halt requested through the interrupt flag.
    #[error("halted")]
    Halt,
}

impl Unwind {
    /// Materialize `kind` and wrap it for propagation.
    pub fn error(heap: &mut Heap, kind: ErrorKind) -> Self {
        Unwind::Error(ErrorValue::materialize(heap, kind))
    }
}

impl From<ErrorValue> for Unwind {
    fn from(error: ErrorValue) -> Self {
        Unwind::Error(error)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ErrorKind::BadArgument { expected: "series", actual: Datatype::Integer };
        assert_eq!(err.to_string(), "wrong argument type: expected series, got integer");
        assert_eq!(err.id(), "bad-argument");

        let err = ErrorKind::NoValue { name: "foo".into() };
        assert_eq!(err.to_string(), "foo has no value");

        let err = ErrorKind::StackOverflow { depth: 512 };
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn test_unwind_top_level_meanings() {
        assert_eq!(Unwind::Halt.to_string(), "halted");
        assert_eq!(
            Unwind::Return(Value::None).to_string(),
            "return used outside of a function"
        );
        assert_eq!(
            Unwind::Throw { name: None, value: Value::Integer(1) }.to_string(),
            "no catch for throw"
        );
    }
}
