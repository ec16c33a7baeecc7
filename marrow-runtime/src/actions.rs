//! # Type-Action Dispatch
//!
//! Polymorphic verbs (`insert`, `pick`, `length`, ...) resolve through a
//! per-datatype table of function slots. The core registers one shared
//! table for the container types at boot; collaborating layers register
//! tables for their own datatypes through the same [`ActionRegistry`].
//!
//! ## Design
//!
//! Dispatch keys on the first argument's datatype. A datatype with no
//! registered table is a user-level type error and raises a recoverable
//! [`ErrorKind::NoAction`]. A *registered* table with an empty slot for
//! the requested verb is a registration bug, and that one panics.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ErrorKind, Unwind};
use crate::heap::Heap;
use crate::modify::{self, ModifyArgs, ModifyOp};
use crate::series::SeriesId;
use crate::value::{Datatype, Position, Value};

// ============================================================================
// Verbs
// ============================================================================

/// The verbs a datatype's action table can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Open a gap at the position and write the source into it.
    Insert,
    /// Insert at the tail regardless of the position's index.
    Append,
    /// Overwrite at the position, resizing per the replaced span.
    Change,
    /// Delete elements at the position.
    Remove,
    /// Slice a fresh series from the position to the tail.
    Copy,
    /// Read the nth element from the position, base 1.
    Pick,
    /// Write the nth element from the position, base 1.
    Poke,
    /// Move the position by a signed offset, clamped to the series.
    Skip,
    /// Element count from the position to the tail.
    Length,
    /// Truncate the series at the position.
    Clear,
    /// Scalar addition.
    Add,
    /// Scalar subtraction.
    Subtract,
    /// Scalar multiplication.
    Multiply,
    /// Scalar division.
    Divide,
}

impl ActionKind {
    /// Number of verbs, and so the width of every action table.
    pub const COUNT: usize = 14;

    /// Every verb, in table-slot order.
    pub const ALL: [ActionKind; Self::COUNT] = [
        ActionKind::Insert,
        ActionKind::Append,
        ActionKind::Change,
        ActionKind::Remove,
        ActionKind::Copy,
        ActionKind::Pick,
        ActionKind::Poke,
        ActionKind::Skip,
        ActionKind::Length,
        ActionKind::Clear,
        ActionKind::Add,
        ActionKind::Subtract,
        ActionKind::Multiply,
        ActionKind::Divide,
    ];

    /// The verb's source-level spelling.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Insert => "insert",
            ActionKind::Append => "append",
            ActionKind::Change => "change",
            ActionKind::Remove => "remove",
            ActionKind::Copy => "copy",
            ActionKind::Pick => "pick",
            ActionKind::Poke => "poke",
            ActionKind::Skip => "skip",
            ActionKind::Length => "length",
            ActionKind::Clear => "clear",
            ActionKind::Add => "add",
            ActionKind::Subtract => "subtract",
            ActionKind::Multiply => "multiply",
            ActionKind::Divide => "divide",
        }
    }

    /// Argument cells the evaluator gathers for the verb, counting the
    /// dispatching value itself.
    pub fn arity(self) -> u32 {
        match self {
            ActionKind::Remove
            | ActionKind::Copy
            | ActionKind::Length
            | ActionKind::Clear => 1,
            ActionKind::Poke => 3,
            _ => 2,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One gathered action invocation, handed to a table slot.
#[derive(Debug)]
pub struct ActionCall<'a> {
    /// The verb being applied.
    pub kind: ActionKind,
    /// The dispatching value (argument 1).
    pub target: &'a Value,
    /// The remaining gathered arguments.
    pub args: &'a [Value],
    /// Refinements for the modify family; defaulted everywhere else.
    pub modify: ModifyArgs,
}

impl<'a> ActionCall<'a> {
    /// A call with default refinements.
    pub fn new(kind: ActionKind, target: &'a Value, args: &'a [Value]) -> Self {
        Self { kind, target, args, modify: ModifyArgs::default() }
    }
}

/// A table-slot implementation of one verb for one datatype.
pub type ActionFn = fn(&mut Heap, &ActionCall<'_>) -> Result<Value, Unwind>;

/// Verb slots for a single datatype.
#[derive(Default)]
pub struct ActionTable {
    slots: [Option<ActionFn>; ActionKind::COUNT],
}

impl ActionTable {
    /// An all-empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot for `kind`. Chainable for registration code.
    pub fn on(mut self, kind: ActionKind, f: ActionFn) -> Self {
        self.slots[kind.slot()] = Some(f);
        self
    }

    /// Look up the slot for `kind`.
    pub fn get(&self, kind: ActionKind) -> Option<ActionFn> {
        self.slots[kind.slot()]
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled: Vec<&str> = ActionKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).is_some())
            .map(|kind| kind.name())
            .collect();
        f.debug_struct("ActionTable").field("filled", &filled).finish()
    }
}

/// Per-datatype action tables.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    tables: HashMap<Datatype, ActionTable>,
}

impl ActionRegistry {
    /// An empty registry; no datatype answers any verb.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the container tables the core provides: one
    /// shared implementation for block, paren, text, and binary.
    pub fn with_core_tables() -> Self {
        let mut registry = Self::new();
        for datatype in [Datatype::Block, Datatype::Paren, Datatype::Text, Datatype::Binary] {
            registry.register(datatype, container_table());
        }
        registry
    }

    /// Install (or replace) the table for a datatype.
    pub fn register(&mut self, datatype: Datatype, table: ActionTable) {
        self.tables.insert(datatype, table);
    }

    /// The table for a datatype, if one was registered.
    pub fn table(&self, datatype: Datatype) -> Option<&ActionTable> {
        self.tables.get(&datatype)
    }

    /// Resolve and run a call against the target's datatype.
    pub fn dispatch(&self, heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
        let datatype = call.target.datatype();
        let Some(table) = self.tables.get(&datatype) else {
            return Err(Unwind::error(
                heap,
                ErrorKind::NoAction { datatype, action: call.kind },
            ));
        };
        let Some(f) = table.get(call.kind) else {
            panic!("action table for {datatype} has no slot for {}", call.kind);
        };
        f(heap, call)
    }
}

// ============================================================================
// Container verbs
// ============================================================================

/// The shared table for the position-carrying container types.
pub fn container_table() -> ActionTable {
    ActionTable::new()
        .on(ActionKind::Insert, container_insert)
        .on(ActionKind::Append, container_append)
        .on(ActionKind::Change, container_change)
        .on(ActionKind::Remove, container_remove)
        .on(ActionKind::Copy, container_copy)
        .on(ActionKind::Pick, container_pick)
        .on(ActionKind::Poke, container_poke)
        .on(ActionKind::Skip, container_skip)
        .on(ActionKind::Length, container_length)
        .on(ActionKind::Clear, container_clear)
}

fn target_position(call: &ActionCall<'_>) -> Position {
    match call.target.position() {
        Some(position) => position,
        None => panic!(
            "container action {} dispatched on {}",
            call.kind,
            call.target.datatype()
        ),
    }
}

fn arg<'b>(heap: &mut Heap, call: &ActionCall<'b>, n: usize) -> Result<&'b Value, Unwind> {
    match call.args.get(n) {
        Some(value) => Ok(value),
        None => Err(Unwind::error(
            heap,
            ErrorKind::MissingArgument { name: call.kind.to_string() },
        )),
    }
}

fn int_arg(heap: &mut Heap, call: &ActionCall<'_>, n: usize) -> Result<i64, Unwind> {
    match arg(heap, call, n)? {
        Value::Integer(value) => Ok(*value),
        other => {
            let actual = other.datatype();
            Err(Unwind::error(heap, ErrorKind::BadArgument { expected: "integer", actual }))
        }
    }
}

fn check_unlocked(heap: &mut Heap, id: SeriesId) -> Result<(), Unwind> {
    if heap.series(id).is_locked() {
        return Err(Unwind::error(heap, ErrorKind::Locked));
    }
    Ok(())
}

fn run_modify(
    heap: &mut Heap,
    op: ModifyOp,
    position: Position,
    source: &Value,
    args: &ModifyArgs,
) -> Result<u32, Unwind> {
    match modify::modify(heap, op, position, source, args) {
        Ok(past) => Ok(past),
        Err(kind) => Err(Unwind::error(heap, kind)),
    }
}

fn container_insert(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let source = arg(heap, call, 0)?.clone();
    let past = run_modify(heap, ModifyOp::Insert, position, &source, &call.modify)?;
    Ok(call.target.reposition(Position { series: position.series, index: past }))
}

fn container_append(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let source = arg(heap, call, 0)?.clone();
    run_modify(heap, ModifyOp::Append, position, &source, &call.modify)?;
    Ok(call.target.reposition(Position::head(position.series)))
}

fn container_change(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let source = arg(heap, call, 0)?.clone();
    let past = run_modify(heap, ModifyOp::Change, position, &source, &call.modify)?;
    Ok(call.target.reposition(Position { series: position.series, index: past }))
}

fn container_remove(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    check_unlocked(heap, position.series)?;
    let len = call.modify.part.unwrap_or(1);
    heap.remove_series(position.series, position.index, len);
    Ok(call.target.clone())
}

fn container_copy(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let avail = heap.series(position.series).tail().saturating_sub(position.index);
    let length = call.modify.part.map_or(avail, |part| part.min(avail));
    let copy = heap.copy_series(position.series, position.index, length);
    Ok(call.target.reposition(Position::head(copy)))
}

fn container_pick(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let n = int_arg(heap, call, 0)?;
    let tail = i64::from(heap.series(position.series).tail());
    if n <= 0 {
        return Ok(Value::None);
    }
    let slot = i64::from(position.index).saturating_add(n - 1);
    if slot >= tail {
        return Ok(Value::None);
    }
    Ok(element_at(heap, call.target, position.series, slot as u32))
}

fn container_poke(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    check_unlocked(heap, position.series)?;
    let n = int_arg(heap, call, 0)?;
    let value = arg(heap, call, 1)?.clone();
    let tail = i64::from(heap.series(position.series).tail());
    let slot = i64::from(position.index).saturating_add(n).saturating_sub(1);
    if n <= 0 || slot >= tail {
        return Err(Unwind::error(heap, ErrorKind::OutOfRange { index: n }));
    }
    let slot = slot as u32;
    if heap.series(position.series).is_wide() {
        heap.series_mut(position.series).set_cell(slot, value.clone());
    } else {
        let width = heap.series(position.series).width();
        let unit = match modify::narrow_unit(&value, width) {
            Ok(unit) => unit,
            Err(kind) => return Err(Unwind::error(heap, kind)),
        };
        heap.series_mut(position.series).put_unit(slot, unit);
    }
    Ok(value)
}

fn container_skip(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let offset = int_arg(heap, call, 0)?;
    let tail = i64::from(heap.series(position.series).tail());
    let index = i64::from(position.index).saturating_add(offset).clamp(0, tail) as u32;
    Ok(call.target.reposition(Position { series: position.series, index }))
}

fn container_length(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    let tail = heap.series(position.series).tail();
    Ok(Value::Integer(i64::from(tail.saturating_sub(position.index))))
}

fn container_clear(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
    let position = target_position(call);
    check_unlocked(heap, position.series)?;
    let tail = heap.series(position.series).tail();
    if position.index == 0 {
        heap.series_mut(position.series).clear();
    } else if position.index < tail {
        heap.remove_series(position.series, position.index, tail - position.index);
    }
    Ok(call.target.clone())
}

/// Read one element as a cell: wide series yield the cell itself, text
/// yields a char, binary an integer.
fn element_at(heap: &Heap, target: &Value, id: SeriesId, slot: u32) -> Value {
    let series = heap.series(id);
    if series.is_wide() {
        return series.cell(slot).clone();
    }
    let unit = series.unit(slot);
    match target {
        Value::Text(_) => {
            Value::Char(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER))
        }
        _ => Value::Integer(i64::from(unit)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::default()
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|n| Value::Integer(*n)).collect()
    }

    fn block_value(heap: &mut Heap, cells: &[Value]) -> Value {
        let series = heap.make_block_from(cells);
        Value::Block(Position::head(series))
    }

    fn dispatch(
        heap: &mut Heap,
        registry: &ActionRegistry,
        kind: ActionKind,
        target: &Value,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        registry.dispatch(heap, &ActionCall::new(kind, target, args))
    }

    #[test]
    fn test_insert_returns_position_past_write() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let target = block_value(&mut heap, &ints(&[3]));
        let result = dispatch(
            &mut heap,
            &registry,
            ActionKind::Insert,
            &target,
            &[Value::Integer(7)],
        )
        .unwrap();
        let Value::Block(position) = result else { panic!("expected a block") };
        assert_eq!(position.index, 1);
        assert_eq!(
            heap.series(position.series).cells(),
            ints(&[7, 3]).as_slice()
        );
    }

    #[test]
    fn test_append_returns_head() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("ab");
        let target = Value::Text(Position { series, index: 1 });
        let result = dispatch(
            &mut heap,
            &registry,
            ActionKind::Append,
            &target,
            &[Value::Char('c')],
        )
        .unwrap();
        assert_eq!(result, Value::Text(Position::head(series)));
        assert_eq!(heap.series(series).bytes(), b"abc");
    }

    #[test]
    fn test_pick_is_one_based_and_forgiving() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let target = block_value(&mut heap, &ints(&[10, 20]));
        for (n, expected) in [
            (1, Value::Integer(10)),
            (2, Value::Integer(20)),
            (3, Value::None),
            (0, Value::None),
            (-1, Value::None),
        ] {
            let picked = dispatch(
                &mut heap,
                &registry,
                ActionKind::Pick,
                &target,
                &[Value::Integer(n)],
            )
            .unwrap();
            assert_eq!(picked, expected, "pick {n}");
        }
    }

    #[test]
    fn test_pick_respects_position() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("abc");
        let target = Value::Text(Position { series, index: 1 });
        let picked =
            dispatch(&mut heap, &registry, ActionKind::Pick, &target, &[Value::Integer(1)])
                .unwrap();
        assert_eq!(picked, Value::Char('b'));
    }

    #[test]
    fn test_poke_writes_and_range_checks() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let target = block_value(&mut heap, &ints(&[1, 2]));
        dispatch(
            &mut heap,
            &registry,
            ActionKind::Poke,
            &target,
            &[Value::Integer(2), Value::Integer(9)],
        )
        .unwrap();
        let Value::Block(position) = &target else { unreachable!() };
        assert_eq!(heap.series(position.series).cells(), ints(&[1, 9]).as_slice());

        let out = dispatch(
            &mut heap,
            &registry,
            ActionKind::Poke,
            &target,
            &[Value::Integer(3), Value::Integer(9)],
        );
        assert!(matches!(out, Err(Unwind::Error(_))));
    }

    #[test]
    fn test_poke_narrow_encodes_units() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_binary(&[0, 0]);
        let target = Value::Binary(Position::head(series));
        dispatch(
            &mut heap,
            &registry,
            ActionKind::Poke,
            &target,
            &[Value::Integer(1), Value::Integer(0xAB)],
        )
        .unwrap();
        assert_eq!(heap.series(series).bytes(), &[0xAB, 0]);

        let too_wide = dispatch(
            &mut heap,
            &registry,
            ActionKind::Poke,
            &target,
            &[Value::Integer(2), Value::Integer(0x100)],
        );
        assert!(matches!(too_wide, Err(Unwind::Error(_))));
    }

    #[test]
    fn test_skip_clamps_both_ends() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("abcd");
        let target = Value::Text(Position { series, index: 2 });
        for (offset, expected) in [(1, 3), (10, 4), (-1, 1), (-10, 0)] {
            let moved = dispatch(
                &mut heap,
                &registry,
                ActionKind::Skip,
                &target,
                &[Value::Integer(offset)],
            )
            .unwrap();
            assert_eq!(moved, Value::Text(Position { series, index: expected }));
        }
    }

    #[test]
    fn test_extreme_indexes_saturate() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let target = block_value(&mut heap, &ints(&[10, 20]));
        for n in [i64::MAX, i64::MIN] {
            let picked =
                dispatch(&mut heap, &registry, ActionKind::Pick, &target, &[Value::Integer(n)])
                    .unwrap();
            assert_eq!(picked, Value::None, "pick {n}");
            let poked = dispatch(
                &mut heap,
                &registry,
                ActionKind::Poke,
                &target,
                &[Value::Integer(n), Value::Integer(9)],
            );
            assert!(matches!(poked, Err(Unwind::Error(_))), "poke {n}");
        }
        let Value::Block(position) = &target else { unreachable!() };
        let series = position.series;
        for (offset, expected) in [(i64::MAX, 2), (i64::MIN, 0)] {
            let moved = dispatch(
                &mut heap,
                &registry,
                ActionKind::Skip,
                &target,
                &[Value::Integer(offset)],
            )
            .unwrap();
            assert_eq!(moved, Value::Block(Position { series, index: expected }));
        }
    }

    #[test]
    fn test_length_counts_from_position() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("abcd");
        let at_head = Value::Text(Position::head(series));
        let at_two = Value::Text(Position { series, index: 2 });
        assert_eq!(
            dispatch(&mut heap, &registry, ActionKind::Length, &at_head, &[]).unwrap(),
            Value::Integer(4)
        );
        assert_eq!(
            dispatch(&mut heap, &registry, ActionKind::Length, &at_two, &[]).unwrap(),
            Value::Integer(2)
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("abcd");

        let at_one = Value::Text(Position { series, index: 1 });
        dispatch(&mut heap, &registry, ActionKind::Remove, &at_one, &[]).unwrap();
        assert_eq!(heap.series(series).bytes(), b"acd");

        dispatch(&mut heap, &registry, ActionKind::Clear, &at_one, &[]).unwrap();
        assert_eq!(heap.series(series).bytes(), b"a");

        let at_head = Value::Text(Position::head(series));
        dispatch(&mut heap, &registry, ActionKind::Clear, &at_head, &[]).unwrap();
        assert_eq!(heap.series(series).tail(), 0);
    }

    #[test]
    fn test_copy_is_position_to_tail_slice() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("abcd");
        let target = Value::Text(Position { series, index: 1 });
        let copied =
            dispatch(&mut heap, &registry, ActionKind::Copy, &target, &[]).unwrap();
        let Value::Text(position) = copied else { panic!("expected text") };
        assert_ne!(position.series, series);
        assert_eq!(position.index, 0);
        assert_eq!(heap.series(position.series).bytes(), b"bcd");
    }

    #[test]
    fn test_unregistered_datatype_raises_no_action() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let target = Value::Integer(1);
        let result =
            dispatch(&mut heap, &registry, ActionKind::Add, &target, &[Value::Integer(2)]);
        let Err(Unwind::Error(error)) = result else { panic!("expected an error unwind") };
        assert_eq!(
            error.kind,
            ErrorKind::NoAction { datatype: Datatype::Integer, action: ActionKind::Add }
        );
    }

    #[test]
    #[should_panic(expected = "no slot")]
    fn test_table_hole_is_fatal() {
        let mut heap = heap();
        let mut registry = ActionRegistry::new();
        registry.register(Datatype::Integer, ActionTable::new());
        let target = Value::Integer(1);
        let _ = dispatch(&mut heap, &registry, ActionKind::Add, &target, &[Value::Integer(2)]);
    }

    #[test]
    fn test_locked_series_refuses_mutating_verbs() {
        let mut heap = heap();
        let registry = ActionRegistry::with_core_tables();
        let series = heap.make_text("ab");
        heap.lock_series(series);
        let target = Value::Text(Position::head(series));
        for (kind, args) in [
            (ActionKind::Remove, vec![]),
            (ActionKind::Clear, vec![]),
            (ActionKind::Poke, vec![Value::Integer(1), Value::Char('x')]),
            (ActionKind::Append, vec![Value::Char('x')]),
        ] {
            let result = dispatch(&mut heap, &registry, kind, &target, &args);
            let Err(Unwind::Error(error)) = result else {
                panic!("{kind} on a locked series should error")
            };
            assert_eq!(error.kind, ErrorKind::Locked, "{kind}");
        }
        assert_eq!(heap.series(series).bytes(), b"ab");
    }

    // ------------------------------------------------------------------------
    // Collaborator-supplied scalar table
    // ------------------------------------------------------------------------

    fn integer_math(heap: &mut Heap, call: &ActionCall<'_>) -> Result<Value, Unwind> {
        let Value::Integer(a) = call.target else {
            panic!("integer table dispatched on {}", call.target.datatype())
        };
        let b = int_arg(heap, call, 0)?;
        let result = match call.kind {
            ActionKind::Add => a.checked_add(b),
            ActionKind::Subtract => a.checked_sub(b),
            ActionKind::Multiply => a.checked_mul(b),
            ActionKind::Divide => {
                if b == 0 {
                    return Err(Unwind::error(heap, ErrorKind::DivideByZero));
                }
                a.checked_div(b)
            }
            other => panic!("integer table dispatched for {other}"),
        };
        match result {
            Some(value) => Ok(Value::Integer(value)),
            None => Err(Unwind::error(heap, ErrorKind::Overflow)),
        }
    }

    fn integer_table() -> ActionTable {
        ActionTable::new()
            .on(ActionKind::Add, integer_math)
            .on(ActionKind::Subtract, integer_math)
            .on(ActionKind::Multiply, integer_math)
            .on(ActionKind::Divide, integer_math)
    }

    #[test]
    fn test_collaborator_table_registration() {
        let mut heap = heap();
        let mut registry = ActionRegistry::with_core_tables();
        registry.register(Datatype::Integer, integer_table());

        let target = Value::Integer(6);
        for (kind, rhs, expected) in [
            (ActionKind::Add, 4, 10),
            (ActionKind::Subtract, 4, 2),
            (ActionKind::Multiply, 4, 24),
            (ActionKind::Divide, 3, 2),
        ] {
            let result =
                dispatch(&mut heap, &registry, kind, &target, &[Value::Integer(rhs)]).unwrap();
            assert_eq!(result, Value::Integer(expected), "{kind}");
        }

        let zero = dispatch(
            &mut heap,
            &registry,
            ActionKind::Divide,
            &target,
            &[Value::Integer(0)],
        );
        let Err(Unwind::Error(error)) = zero else { panic!("expected an error unwind") };
        assert_eq!(error.kind, ErrorKind::DivideByZero);

        let overflow = dispatch(
            &mut heap,
            &registry,
            ActionKind::Add,
            &Value::Integer(i64::MAX),
            &[Value::Integer(1)],
        );
        assert!(matches!(overflow, Err(Unwind::Error(_))));
    }
}
