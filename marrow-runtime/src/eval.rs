//! # Evaluation Core
//!
//! The evaluator walks block series cell by cell, resolving words
//! through their bindings and applying callables as it meets them. All
//! calling state lives on one growable wide series, the evaluation
//! stack, owned by the evaluator and permanently rooted, so everything
//! below the stack top is reachable by the collector and `u32` frame
//! indices survive stack growth.
//!
//! ## Design
//!
//! Calling convention: the dispatcher pushes the callable itself as the
//! frame's base cell (which also keeps a function's body and argument
//! frame reachable for the duration of the call), gathers the arity's
//! worth of argument cells above it, and hands the frame base to the
//! callee:
//!
//! - *natives* answer with an [`Outcome`] sentinel the dispatcher
//!   resolves into the return value;
//! - *actions* re-dispatch on argument 1's datatype through the
//!   [`ActionRegistry`];
//! - *functions* copy the arguments into their persistent frame (one
//!   frame per function, reused call to call) and evaluate the body;
//! - *closures* deep-clone body and frame per call and rebind the clone,
//!   trading allocation for call-local variables.
//!
//! Between expressions the evaluator passes a safe point: the interrupt
//! flag is polled and a pending collection (ballast underflow or an
//! explicit request while collection was deferred) runs. Values held
//! across safe points are parked on the stack, in frames, or on the
//! guard list, never only in Rust locals.

use tracing::{debug, warn};

use crate::actions::{ActionCall, ActionKind, ActionRegistry};
use crate::config::RuntimeConfig;
use crate::context;
use crate::error::{ErrorKind, ErrorValue, Unwind};
use crate::heap::Heap;
use crate::natives::{NativeFn, NativeId, NativeRegistry};
use crate::series::SeriesId;
use crate::signal::{Signal, SignalFlag};
use crate::value::{intern, symbol_name, Func, Position, Value, Word};

// ============================================================================
// Outcome sentinels
// ============================================================================

/// How a native tells the dispatcher what its frame returns.
///
/// The reuse variants avoid cloning through the native: they name a cell
/// already on the stack (the top two, or an argument by ordinal) as the
/// return value.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Return this value.
    Value(Value),
    /// Return the cell on top of the stack.
    ReuseTop,
    /// Return the cell one below the stack top.
    ReuseBelowTop,
    /// Return argument `n` (1-based).
    ReuseArg(u32),
    /// Return `none`.
    SetNone,
    /// Return unset.
    SetUnset,
    /// Return `true`.
    SetTrue,
    /// Return `false`.
    SetFalse,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluation state: the heap, the dispatch registries, the interrupt
/// flag, and the evaluation stack.
pub struct Evaluator {
    heap: Heap,
    natives: NativeRegistry,
    actions: ActionRegistry,
    signal: SignalFlag,
    stack: SeriesId,
    stack_limit: u32,
}

impl Evaluator {
    /// Boot an evaluator: fresh heap, core natives and action tables,
    /// vocabulary words installed into the root frame.
    pub fn new(config: RuntimeConfig) -> Self {
        let mut heap = Heap::new(config.memory);
        let stack = heap.make_block(config.eval.initial_stack);
        heap.keep_series(stack);
        let mut evaluator = Self {
            heap,
            natives: NativeRegistry::core(),
            actions: ActionRegistry::with_core_tables(),
            signal: SignalFlag::default(),
            stack,
            stack_limit: config.eval.stack_limit,
        };
        evaluator.install_vocabulary();
        evaluator
    }

    /// The heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// A shared handle to the interrupt flag, for delivery from other
    /// threads.
    pub fn signal(&self) -> SignalFlag {
        self.signal.clone()
    }

    /// The action registry, for collaborator table registration.
    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    /// Register a native and install its vocabulary word in the root
    /// frame.
    pub fn register_native(&mut self, name: &'static str, arity: u32, run: NativeFn) -> NativeId {
        let id = self.natives.register(name, arity, run);
        let root = self.heap.root_frame();
        let slot = context::ensure_slot(&mut self.heap, root, intern(name));
        context::set_slot(&mut self.heap, root, slot, Value::Native(id));
        id
    }

    fn install_vocabulary(&mut self) {
        let root = self.heap.root_frame();
        let natives: Vec<(NativeId, &'static str)> =
            self.natives.iter().map(|(id, def)| (id, def.name)).collect();
        for (id, name) in natives {
            let slot = context::ensure_slot(&mut self.heap, root, intern(name));
            context::set_slot(&mut self.heap, root, slot, Value::Native(id));
        }
        for kind in ActionKind::ALL {
            let slot = context::ensure_slot(&mut self.heap, root, intern(kind.name()));
            context::set_slot(&mut self.heap, root, slot, Value::Action(kind));
        }
    }

    // ------------------------------------------------------------------
    // Stack
    // ------------------------------------------------------------------

    /// Current stack depth in cells; also the next frame's base.
    pub fn top(&self) -> u32 {
        self.heap.series(self.stack).tail()
    }

    /// Read a stack cell.
    pub fn stack_cell(&self, index: u32) -> &Value {
        self.heap.series(self.stack).cell(index)
    }

    /// Overwrite a stack cell. Natives use this to park loop results
    /// where the collector can see them.
    pub fn stack_set(&mut self, index: u32, value: Value) {
        self.heap.series_mut(self.stack).set_cell(index, value);
    }

    /// Clone argument `n` (1-based) of the frame at `base`.
    pub fn arg(&self, base: u32, n: u32) -> Value {
        self.stack_cell(base + n).clone()
    }

    /// Push a cell, refusing past the configured limit.
    pub fn push(&mut self, value: Value) -> Result<(), Unwind> {
        let top = self.top();
        if top >= self.stack_limit {
            return Err(Unwind::error(
                &mut self.heap,
                ErrorKind::StackOverflow { depth: top },
            ));
        }
        self.heap.expand_series(self.stack, top, 1);
        self.heap.series_mut(self.stack).set_cell(top, value);
        Ok(())
    }

    fn truncate(&mut self, base: u32) {
        self.heap.series_mut(self.stack).truncate(base);
    }

    // ------------------------------------------------------------------
    // Safe points
    // ------------------------------------------------------------------

    /// Pass a safe point: deliver a pending interrupt and run a pending
    /// collection.
    pub fn checkpoint(&mut self) -> Result<(), Unwind> {
        match self.signal.take() {
            Signal::Halt => return Err(Unwind::Halt),
            Signal::Escape => return Err(Unwind::Escape),
            Signal::None => {}
        }
        if self.heap.take_collect_request() {
            self.collect_now();
        }
        Ok(())
    }

    /// Collect immediately. The stack is a kept series, so everything
    /// below the top roots itself.
    pub fn collect_now(&mut self) -> usize {
        self.heap.collect(&[])
    }

    // ------------------------------------------------------------------
    // Driving evaluation
    // ------------------------------------------------------------------

    /// Evaluate every expression from `block`'s position to its tail.
    /// Yields the last expression's value, or unset for an empty range.
    pub fn do_block(&mut self, block: Position) -> Result<Value, Unwind> {
        let base = self.top();
        // The unit result lives on the stack between expressions.
        self.push(Value::Unset)?;
        let mut at = block;
        let outcome = loop {
            if at.index >= self.heap.series(at.series).tail() {
                break Ok(());
            }
            match self.do_next(at) {
                Ok((value, next)) => {
                    self.stack_set(base, value);
                    at = next;
                }
                Err(unwind) => break Err(unwind),
            }
        };
        let result = self.stack_cell(base).clone();
        self.truncate(base);
        outcome.map(|()| result)
    }

    /// Evaluate one expression at `at`. Returns its value and the
    /// position after it; at the tail, returns the end marker without
    /// advancing.
    pub fn do_next(&mut self, at: Position) -> Result<(Value, Position), Unwind> {
        self.checkpoint()?;
        if at.index >= self.heap.series(at.series).tail() {
            return Ok((Value::End, at));
        }
        let cell = self.heap.series(at.series).cell(at.index).clone();
        let next = Position { series: at.series, index: at.index + 1 };
        match cell {
            Value::Word(word) => {
                let value = self.word_value(&word)?;
                match value {
                    Value::Native(_)
                    | Value::Action(_)
                    | Value::Function(_)
                    | Value::Closure(_) => self.call_from(value, next),
                    Value::Unset => {
                        let name = symbol_name(word.symbol);
                        Err(Unwind::error(&mut self.heap, ErrorKind::NoValue { name }))
                    }
                    value => Ok((value, next)),
                }
            }
            Value::SetWord(word) => {
                let (value, after) = self.do_next(next)?;
                if value.is_end() {
                    let name = symbol_name(word.symbol);
                    return Err(Unwind::error(
                        &mut self.heap,
                        ErrorKind::MissingArgument { name },
                    ));
                }
                if matches!(value, Value::Unset) {
                    let name = symbol_name(word.symbol);
                    return Err(Unwind::error(&mut self.heap, ErrorKind::NoValue { name }));
                }
                self.set_word(&word, value.clone())?;
                Ok((value, after))
            }
            Value::GetWord(word) => {
                // The no-error fetch: unset and callables pass through
                // as data.
                let value = self.word_value(&word)?;
                Ok((value, next))
            }
            Value::LitWord(word) => Ok((Value::Word(word), next)),
            Value::Paren(position) => {
                let value = self.do_block(position)?;
                Ok((value, next))
            }
            cell @ (Value::Native(_)
            | Value::Action(_)
            | Value::Function(_)
            | Value::Closure(_)) => self.call_from(cell, next),
            other => Ok((other, next)),
        }
    }

    /// Evaluate one top-level unit with top-level recovery: errors are
    /// reported and evaluation can continue at the returned position;
    /// escape abandons the rest of the unit's block; only halt
    /// propagates.
    pub fn do_top(&mut self, at: Position) -> Result<(Value, Position), Unwind> {
        match self.do_next(at) {
            Ok(pair) => Ok(pair),
            Err(Unwind::Halt) => Err(Unwind::Halt),
            Err(Unwind::Escape) => {
                debug!("escape: abandoning the current top-level block");
                let tail = self.heap.series(at.series).tail();
                Ok((Value::Unset, Position { series: at.series, index: tail }))
            }
            Err(unwind) => {
                let error = self.unwind_error(unwind);
                warn!(error = %error, "uncaught error at top level");
                Ok((
                    Value::Error(error.object),
                    Position { series: at.series, index: at.index + 1 },
                ))
            }
        }
    }

    /// Bind and evaluate a top-level block: top-level set-words get task
    /// frame slots, words bind against the root vocabulary and then the
    /// task frame, and each unit runs under [`Evaluator::do_top`]'s
    /// recovery.
    pub fn run(&mut self, block: SeriesId) -> Result<Value, Unwind> {
        let root = self.heap.root_frame();
        let task = self.heap.task_frame();
        let len = self.heap.series(block).tail();
        for i in 0..len {
            if let Value::SetWord(word) = self.heap.series(block).cell(i) {
                let symbol = word.symbol;
                context::ensure_slot(&mut self.heap, task, symbol);
            }
        }
        context::bind_block(&mut self.heap, block, root, false);
        context::bind_block(&mut self.heap, block, task, false);

        // The program block itself must survive collections while it
        // runs.
        self.heap.guard(block);
        let result = self.run_units(block);
        self.heap.unguard(block);
        result
    }

    fn run_units(&mut self, block: SeriesId) -> Result<Value, Unwind> {
        let base = self.top();
        self.push(Value::Unset)?;
        let mut at = Position::head(block);
        let outcome = loop {
            if at.index >= self.heap.series(at.series).tail() {
                break Ok(());
            }
            match self.do_top(at) {
                Ok((value, next)) => {
                    self.stack_set(base, value);
                    at = next;
                }
                Err(unwind) => break Err(unwind),
            }
        };
        let result = self.stack_cell(base).clone();
        self.truncate(base);
        outcome.map(|()| result)
    }

    /// Apply a callable to already-evaluated arguments. The single
    /// entry point behind every call the evaluator makes itself.
    pub fn apply(&mut self, callable: &Value, args: &[Value]) -> Result<Value, Unwind> {
        let arity = self.arity_of(callable) as usize;
        if args.len() < arity {
            let name = self.callable_name(callable);
            return Err(Unwind::error(&mut self.heap, ErrorKind::MissingArgument { name }));
        }
        let base = self.top();
        self.push(callable.clone())?;
        for value in &args[..arity] {
            if let Err(unwind) = self.push(value.clone()) {
                self.truncate(base);
                return Err(unwind);
            }
        }
        let result = self.dispatch_call(callable.clone(), base);
        self.truncate(base);
        result
    }

    // ------------------------------------------------------------------
    // Words
    // ------------------------------------------------------------------

    fn word_value(&mut self, word: &Word) -> Result<Value, Unwind> {
        match word.binding {
            Some(binding) => Ok(context::get_slot(&self.heap, binding.frame, binding.slot)),
            None => {
                let name = symbol_name(word.symbol);
                Err(Unwind::error(&mut self.heap, ErrorKind::NotBound { name }))
            }
        }
    }

    fn set_word(&mut self, word: &Word, value: Value) -> Result<(), Unwind> {
        match word.binding {
            Some(binding) => {
                context::set_slot(&mut self.heap, binding.frame, binding.slot, value);
                Ok(())
            }
            None => {
                let name = symbol_name(word.symbol);
                Err(Unwind::error(&mut self.heap, ErrorKind::NotBound { name }))
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Gather a call's arguments from the positions after the callable
    /// and dispatch it.
    fn call_from(&mut self, callable: Value, next: Position) -> Result<(Value, Position), Unwind> {
        let arity = self.arity_of(&callable);
        let base = self.top();
        // The base cell holds the callable; it is also what keeps a
        // function's body and frame alive through the call.
        self.push(callable.clone())?;
        let mut at = next;
        for _ in 0..arity {
            match self.do_next(at) {
                Ok((value, after)) => {
                    if value.is_end() {
                        let name = self.callable_name(&callable);
                        self.truncate(base);
                        return Err(Unwind::error(
                            &mut self.heap,
                            ErrorKind::MissingArgument { name },
                        ));
                    }
                    if let Err(unwind) = self.push(value) {
                        self.truncate(base);
                        return Err(unwind);
                    }
                    at = after;
                }
                Err(unwind) => {
                    self.truncate(base);
                    return Err(unwind);
                }
            }
        }
        let result = self.dispatch_call(callable, base);
        self.truncate(base);
        Ok((result?, at))
    }

    fn dispatch_call(&mut self, callable: Value, base: u32) -> Result<Value, Unwind> {
        match callable {
            Value::Native(id) => {
                let run = self.natives.def(id).run;
                let outcome = run(self, base)?;
                Ok(self.resolve_outcome(base, outcome))
            }
            Value::Action(kind) => {
                let target = self.arg(base, 1);
                let rest: Vec<Value> = (2..=kind.arity()).map(|n| self.arg(base, n)).collect();
                let call = ActionCall::new(kind, &target, &rest);
                self.actions.dispatch(&mut self.heap, &call)
            }
            Value::Function(func) => self.call_function(func, base),
            Value::Closure(func) => self.call_closure(func, base),
            other => {
                let datatype = other.datatype();
                Err(Unwind::error(&mut self.heap, ErrorKind::NotCallable { datatype }))
            }
        }
    }

    fn call_function(&mut self, func: Func, base: u32) -> Result<Value, Unwind> {
        let nargs = context::slot_count(&self.heap, func.frame);
        for n in 1..=nargs {
            let value = self.arg(base, n);
            context::set_slot(&mut self.heap, func.frame, n, value);
        }
        match self.do_block(Position::head(func.body)) {
            Err(Unwind::Return(value)) => Ok(value),
            other => other,
        }
    }

    fn call_closure(&mut self, func: Func, base: u32) -> Result<Value, Unwind> {
        let body = context::clone_block_deep(&mut self.heap, func.body);
        let frame = context::clone_frame(&mut self.heap, func.frame);
        context::rebind_block(&mut self.heap, body, func.frame, frame);
        let nargs = context::slot_count(&self.heap, frame);
        for n in 1..=nargs {
            let value = self.arg(base, n);
            context::set_slot(&mut self.heap, frame, n, value);
        }
        // The per-call clones have no rooted referent yet; guard them
        // across the body's safe points.
        self.heap.guard(body);
        self.heap.guard(frame);
        let result = self.do_block(Position::head(body));
        self.heap.unguard(frame);
        self.heap.unguard(body);
        match result {
            Err(Unwind::Return(value)) => Ok(value),
            other => other,
        }
    }

    fn resolve_outcome(&self, base: u32, outcome: Outcome) -> Value {
        match outcome {
            Outcome::Value(value) => value,
            Outcome::ReuseTop => self.stack_cell(self.top() - 1).clone(),
            Outcome::ReuseBelowTop => self.stack_cell(self.top() - 2).clone(),
            Outcome::ReuseArg(n) => self.stack_cell(base + n).clone(),
            Outcome::SetNone => Value::None,
            Outcome::SetUnset => Value::Unset,
            Outcome::SetTrue => Value::Logic(true),
            Outcome::SetFalse => Value::Logic(false),
        }
    }

    fn arity_of(&self, callable: &Value) -> u32 {
        match callable {
            Value::Native(id) => self.natives.def(*id).arity,
            Value::Action(kind) => kind.arity(),
            Value::Function(func) | Value::Closure(func) => {
                context::slot_count(&self.heap, func.frame)
            }
            _ => 0,
        }
    }

    fn callable_name(&self, callable: &Value) -> String {
        match callable {
            Value::Native(id) => self.natives.def(*id).name.to_owned(),
            Value::Action(kind) => kind.name().to_owned(),
            Value::Function(_) => "function".to_owned(),
            Value::Closure(_) => "closure".to_owned(),
            other => other.datatype().name().to_owned(),
        }
    }

    fn unwind_error(&mut self, unwind: Unwind) -> ErrorValue {
        match unwind {
            Unwind::Error(error) => error,
            Unwind::Return(_) => ErrorValue::materialize(
                &mut self.heap,
                ErrorKind::OutOfContext { name: "return" },
            ),
            Unwind::Break(_) => ErrorValue::materialize(
                &mut self.heap,
                ErrorKind::OutOfContext { name: "break" },
            ),
            Unwind::Throw { .. } => {
                ErrorValue::materialize(&mut self.heap, ErrorKind::UncaughtThrow)
            }
            Unwind::Escape | Unwind::Halt => {
                unreachable!("escape and halt are handled before error conversion")
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("stack", &self.stack)
            .field("top", &self.top())
            .field("natives", &self.natives.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Datatype;

    fn evaluator() -> Evaluator {
        Evaluator::default()
    }

    fn w(name: &str) -> Value {
        Value::Word(Word::unbound(name))
    }

    fn sw(name: &str) -> Value {
        Value::SetWord(Word::unbound(name))
    }

    fn gw(name: &str) -> Value {
        Value::GetWord(Word::unbound(name))
    }

    fn lw(name: &str) -> Value {
        Value::LitWord(Word::unbound(name))
    }

    fn text(eval: &mut Evaluator, content: &str) -> Value {
        let series = eval.heap_mut().make_text(content);
        Value::Text(Position::head(series))
    }

    fn block(eval: &mut Evaluator, cells: &[Value]) -> SeriesId {
        eval.heap_mut().make_block_from(cells)
    }

    fn block_value(eval: &mut Evaluator, cells: &[Value]) -> Value {
        let series = block(eval, cells);
        Value::Block(Position::head(series))
    }

    fn run(eval: &mut Evaluator, cells: &[Value]) -> Value {
        let program = block(eval, cells);
        eval.run(program).unwrap()
    }

    fn text_bytes(eval: &Evaluator, value: &Value) -> Vec<u8> {
        let Value::Text(position) = value else { panic!("expected text, got {value}") };
        eval.heap().series(position.series).bytes().to_vec()
    }

    fn error_kind(eval: &mut Evaluator, cells: &[Value]) -> ErrorKind {
        let program = block(eval, cells);
        let root = eval.heap().root_frame();
        context::bind_block(eval.heap_mut(), program, root, false);
        match eval.do_block(Position::head(program)) {
            Err(Unwind::Error(error)) => error.kind,
            other => panic!("expected an error unwind, got {other:?}"),
        }
    }

    #[test]
    fn test_literals_self_evaluate() {
        let mut eval = evaluator();
        assert_eq!(run(&mut eval, &[Value::Integer(42)]), Value::Integer(42));
        assert_eq!(run(&mut eval, &[Value::Logic(true)]), Value::Logic(true));
        assert_eq!(run(&mut eval, &[]), Value::Unset);

        let inert = block_value(&mut eval, &[Value::Integer(1)]);
        assert_eq!(run(&mut eval, &[inert.clone()]), inert);
    }

    #[test]
    fn test_set_word_and_word() {
        let mut eval = evaluator();
        let result = run(&mut eval, &[sw("x"), Value::Integer(5), w("x")]);
        assert_eq!(result, Value::Integer(5));

        // The slot landed in the task frame.
        let task = eval.heap().task_frame();
        let slot = context::find_slot(eval.heap(), task, intern("x")).unwrap();
        assert_eq!(context::get_slot(eval.heap(), task, slot), Value::Integer(5));
    }

    #[test]
    fn test_set_word_chains() {
        let mut eval = evaluator();
        run(&mut eval, &[sw("a"), sw("b"), Value::Integer(9)]);
        assert_eq!(run(&mut eval, &[w("a")]), Value::Integer(9));
        assert_eq!(run(&mut eval, &[w("b")]), Value::Integer(9));
    }

    #[test]
    fn test_unbound_word_errors() {
        let mut eval = evaluator();
        let kind = error_kind(&mut eval, &[w("nonesuch")]);
        assert_eq!(kind, ErrorKind::NotBound { name: "nonesuch".to_owned() });
    }

    #[test]
    fn test_set_word_without_value_errors() {
        let mut eval = evaluator();
        let kind = error_kind(&mut eval, &[sw("x")]);
        assert_eq!(kind, ErrorKind::MissingArgument { name: "x".to_owned() });
    }

    #[test]
    fn test_lit_word_and_get_word() {
        let mut eval = evaluator();
        let result = run(&mut eval, &[lw("abc")]);
        let Value::Word(word) = result else { panic!("expected a word") };
        assert_eq!(word.symbol, intern("abc"));

        // Get-word fetches a function as data instead of calling it.
        let spec = block_value(&mut eval, &[]);
        let body = block_value(&mut eval, &[Value::Integer(1)]);
        let fetched = run(&mut eval, &[sw("f"), w("func"), spec, body, gw("f")]);
        assert_eq!(fetched.datatype(), Datatype::Function);
    }

    #[test]
    fn test_paren_evaluates_inline() {
        let mut eval = evaluator();
        let inner = block(&mut eval, &[Value::Integer(7)]);
        let paren = Value::Paren(Position::head(inner));
        assert_eq!(run(&mut eval, &[paren]), Value::Integer(7));
    }

    #[test]
    fn test_if_branches() {
        let mut eval = evaluator();
        let then = block_value(&mut eval, &[Value::Integer(1)]);
        assert_eq!(
            run(&mut eval, &[w("if"), Value::Logic(true), then.clone()]),
            Value::Integer(1)
        );
        assert_eq!(run(&mut eval, &[w("if"), Value::Logic(false), then]), Value::None);
        assert_eq!(
            run(&mut eval, &[w("if"), Value::Integer(0), Value::Integer(8)]),
            Value::Integer(8)
        );
    }

    #[test]
    fn test_condition_without_truth_value_errors() {
        let mut eval = evaluator();
        run(&mut eval, &[w("set"), lw("u"), Value::Integer(1)]);
        // Clearing the slot back to unset, then testing it as a
        // condition through a get-word.
        let task = eval.heap().task_frame();
        let slot = context::find_slot(eval.heap(), task, intern("u")).unwrap();
        context::set_slot(eval.heap_mut(), task, slot, Value::Unset);

        let branch = block_value(&mut eval, &[Value::Integer(1)]);
        let program = block(&mut eval, &[w("if"), gw("u"), branch]);
        let root = eval.heap().root_frame();
        context::bind_block(eval.heap_mut(), program, root, false);
        let task = eval.heap().task_frame();
        context::bind_block(eval.heap_mut(), program, task, false);
        match eval.do_block(Position::head(program)) {
            Err(Unwind::Error(error)) => {
                assert_eq!(error.kind, ErrorKind::NoTruthValue { datatype: Datatype::Unset });
            }
            other => panic!("expected an error unwind, got {other:?}"),
        }
    }

    #[test]
    fn test_either_picks_a_branch() {
        let mut eval = evaluator();
        let yes = block_value(&mut eval, &[Value::Integer(1)]);
        let no = block_value(&mut eval, &[Value::Integer(2)]);
        assert_eq!(
            run(&mut eval, &[w("either"), Value::Logic(true), yes.clone(), no.clone()]),
            Value::Integer(1)
        );
        assert_eq!(
            run(&mut eval, &[w("either"), Value::None, yes, no]),
            Value::Integer(2)
        );
    }

    #[test]
    fn test_loop_repeats_body() {
        let mut eval = evaluator();
        let target = text(&mut eval, "");
        let body = block_value(&mut eval, &[w("append"), target.clone(), Value::Char('x')]);
        run(&mut eval, &[w("loop"), Value::Integer(3), body]);
        assert_eq!(text_bytes(&eval, &target), b"xxx");

        let empty = block_value(&mut eval, &[]);
        assert_eq!(run(&mut eval, &[w("loop"), Value::Integer(0), empty]), Value::Unset);
    }

    #[test]
    fn test_break_exits_loop_early() {
        let mut eval = evaluator();
        let target = text(&mut eval, "");
        let body = block_value(
            &mut eval,
            &[w("append"), target.clone(), Value::Char('x'), w("break")],
        );
        run(&mut eval, &[w("loop"), Value::Integer(5), body]);
        assert_eq!(text_bytes(&eval, &target), b"x");
    }

    #[test]
    fn test_while_drains_series() {
        let mut eval = evaluator();
        let target = text(&mut eval, "abc");
        let condition =
            block_value(&mut eval, &[w("pick"), target.clone(), Value::Integer(1)]);
        let body = block_value(&mut eval, &[w("remove"), target.clone()]);
        run(&mut eval, &[w("while"), condition, body]);
        assert_eq!(text_bytes(&eval, &target), b"");

        let never = block_value(&mut eval, &[Value::Logic(false)]);
        let unreached = block_value(&mut eval, &[Value::Integer(1)]);
        assert_eq!(run(&mut eval, &[w("while"), never, unreached]), Value::Unset);
    }

    #[test]
    fn test_func_call_binds_arguments() {
        let mut eval = evaluator();
        let spec = block_value(&mut eval, &[w("name")]);
        let prefix = text(&mut eval, "hi ");
        let body = block_value(&mut eval, &[w("append"), w("copy"), prefix, w("name")]);
        let greeting = text(&mut eval, "bob");
        let result = run(
            &mut eval,
            &[sw("greet"), w("func"), spec, body, w("greet"), greeting],
        );
        assert_eq!(text_bytes(&eval, &result), b"hi bob");
    }

    #[test]
    fn test_function_reuses_frame_across_calls() {
        // f recurses once, smashing the shared argument frame; the
        // outer activation then reads the inner call's argument.
        let mut eval = evaluator();
        let spec = block_value(&mut eval, &[w("x")]);
        let recurse = block_value(&mut eval, &[w("f"), Value::None, w("x")]);
        let plain = block_value(&mut eval, &[w("x")]);
        let body = block_value(&mut eval, &[w("either"), w("x"), recurse, plain]);
        let result = run(
            &mut eval,
            &[sw("f"), w("func"), spec, body, w("f"), Value::Integer(7)],
        );
        assert_eq!(result, Value::None);
    }

    #[test]
    fn test_closure_keeps_calls_local() {
        // Same shape as the function test, but the per-call frame means
        // the recursion cannot disturb the outer activation.
        let mut eval = evaluator();
        let spec = block_value(&mut eval, &[w("x")]);
        let recurse = block_value(&mut eval, &[w("f"), Value::None, w("x")]);
        let plain = block_value(&mut eval, &[w("x")]);
        let body = block_value(&mut eval, &[w("either"), w("x"), recurse, plain]);
        let result = run(
            &mut eval,
            &[sw("f"), w("closure"), spec, body, w("f"), Value::Integer(7)],
        );
        assert_eq!(result, Value::Integer(7));
    }

    #[test]
    fn test_return_unwinds_to_the_call() {
        let mut eval = evaluator();
        let spec = block_value(&mut eval, &[w("x")]);
        let body =
            block_value(&mut eval, &[w("return"), w("x"), Value::Integer(99)]);
        let result = run(
            &mut eval,
            &[sw("f"), w("func"), spec, body, w("f"), Value::Integer(5)],
        );
        assert_eq!(result, Value::Integer(5));
    }

    #[test]
    fn test_catch_and_throw() {
        let mut eval = evaluator();
        let inner = block_value(
            &mut eval,
            &[w("throw"), Value::Integer(42), Value::Integer(0)],
        );
        let result = run(&mut eval, &[w("catch"), inner]);
        assert_eq!(result, Value::Integer(42));
    }

    #[test]
    fn test_uncaught_throw_is_a_top_level_error() {
        let mut eval = evaluator();
        // Parenthesized so the whole throw is one top-level unit and the
        // error value is the program's last result.
        let inner = block(&mut eval, &[w("throw"), Value::Integer(1)]);
        let result = run(&mut eval, &[Value::Paren(Position::head(inner))]);
        let Value::Error(object) = result else { panic!("expected an error value") };
        let id = context::get_slot(eval.heap(), object, 1);
        let Value::Word(word) = id else { panic!("expected an id word") };
        assert_eq!(word.symbol, intern("uncaught-throw"));
    }

    #[test]
    fn test_try_traps_errors_into_values() {
        let mut eval = evaluator();
        // pick on an integer has no action table: a recoverable error.
        let failing =
            block_value(&mut eval, &[w("pick"), Value::Integer(5), Value::Integer(1)]);
        let result = run(&mut eval, &[w("try"), failing]);
        assert_eq!(result.datatype(), Datatype::Error);

        let fine = block_value(&mut eval, &[Value::Integer(3)]);
        assert_eq!(run(&mut eval, &[w("try"), fine]), Value::Integer(3));
    }

    #[test]
    fn test_recycle_reports_freed_series() {
        let mut eval = evaluator();
        // Allocate garbage the recent ring has already forgotten.
        for _ in 0..200 {
            eval.heap_mut().make_text("transient");
        }
        let keep = text(&mut eval, "still here");
        run(&mut eval, &[w("set"), lw("keep"), keep.clone()]);
        let freed = run(&mut eval, &[w("recycle")]);
        let Value::Integer(freed) = freed else { panic!("expected a count") };
        assert!(freed > 0);
        assert_eq!(text_bytes(&eval, &keep), b"still here");
    }

    #[test]
    fn test_set_and_get_natives() {
        let mut eval = evaluator();
        let result = run(
            &mut eval,
            &[w("set"), lw("y"), Value::Integer(3), w("get"), lw("y")],
        );
        assert_eq!(result, Value::Integer(3));

        let kind = error_kind(&mut eval, &[w("get"), lw("missing")]);
        assert_eq!(kind, ErrorKind::NotBound { name: "missing".to_owned() });
    }

    #[test]
    fn test_lock_native_freezes_series() {
        let mut eval = evaluator();
        let target = text(&mut eval, "ab");
        run(&mut eval, &[w("lock"), target.clone()]);
        let kind = error_kind(&mut eval, &[w("append"), target.clone(), Value::Char('c')]);
        assert_eq!(kind, ErrorKind::Locked);
        assert_eq!(text_bytes(&eval, &target), b"ab");
    }

    #[test]
    fn test_apply_drives_every_callable() {
        let mut eval = evaluator();
        let target = text(&mut eval, "ab");
        let appended = eval
            .apply(&Value::Action(ActionKind::Append), &[target.clone(), Value::Char('c')])
            .unwrap();
        assert_eq!(text_bytes(&eval, &appended), b"abc");

        let spec = block_value(&mut eval, &[w("v")]);
        let body = block_value(&mut eval, &[w("v")]);
        let func = run(&mut eval, &[w("func"), spec, body]);
        let result = eval.apply(&func, &[Value::Integer(11)]).unwrap();
        assert_eq!(result, Value::Integer(11));

        let missing = eval.apply(&func, &[]);
        match missing {
            Err(Unwind::Error(error)) => {
                assert_eq!(error.kind, ErrorKind::MissingArgument { name: "function".into() });
            }
            other => panic!("expected an error unwind, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_rejects_noncallables() {
        let mut eval = evaluator();
        let result = eval.apply(&Value::Integer(3), &[]);
        match result {
            Err(Unwind::Error(error)) => {
                assert_eq!(error.kind, ErrorKind::NotCallable { datatype: Datatype::Integer });
            }
            other => panic!("expected an error unwind, got {other:?}"),
        }
    }

    #[test]
    fn test_runaway_recursion_overflows_recoverably() {
        let config = RuntimeConfig::builder()
            .stack_limit(256)
            .initial_stack(64)
            .build()
            .unwrap();
        let mut eval = Evaluator::new(config);
        let spec = block_value(&mut eval, &[w("x")]);
        let body = block_value(&mut eval, &[w("f"), w("x")]);
        run(&mut eval, &[sw("f"), w("func"), spec, body]);

        let call = block(&mut eval, &[w("f"), Value::Integer(1)]);
        let task = eval.heap().task_frame();
        context::bind_block(eval.heap_mut(), call, task, false);
        match eval.do_block(Position::head(call)) {
            Err(Unwind::Error(error)) => {
                assert!(matches!(error.kind, ErrorKind::StackOverflow { .. }));
            }
            other => panic!("expected a stack overflow, got {other:?}"),
        }
        // The stack unwound fully.
        assert_eq!(eval.top(), 0);
    }

    #[test]
    fn test_halt_signal_stops_evaluation() {
        let mut eval = evaluator();
        eval.signal().raise(Signal::Halt);
        let program = block(&mut eval, &[Value::Integer(1)]);
        assert_eq!(eval.run(program), Err(Unwind::Halt));
    }

    #[test]
    fn test_escape_abandons_the_block() {
        let mut eval = evaluator();
        eval.signal().raise(Signal::Escape);
        let program = block(&mut eval, &[Value::Integer(1), Value::Integer(2)]);
        assert_eq!(eval.run(program), Ok(Value::Unset));
        // The machine stays usable afterwards.
        let again = block(&mut eval, &[Value::Integer(3)]);
        assert_eq!(eval.run(again), Ok(Value::Integer(3)));
    }

    #[test]
    fn test_top_level_error_reports_and_continues() {
        let mut eval = evaluator();
        let program = block(&mut eval, &[w("nonesuch"), Value::Integer(2)]);
        let result = eval.run(program).unwrap();
        // The failed unit yielded an error value; the next unit still
        // ran and its value won.
        assert_eq!(result, Value::Integer(2));
    }

    // ------------------------------------------------------------------
    // Outcome resolution and custom natives
    // ------------------------------------------------------------------

    fn emit_outcome(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
        match eval.arg(base, 1) {
            Value::Integer(0) => Ok(Outcome::SetNone),
            Value::Integer(1) => Ok(Outcome::SetTrue),
            Value::Integer(2) => Ok(Outcome::SetFalse),
            Value::Integer(3) => Ok(Outcome::SetUnset),
            Value::Integer(4) => Ok(Outcome::ReuseArg(1)),
            Value::Integer(5) => {
                eval.push(Value::Integer(50))?;
                Ok(Outcome::ReuseTop)
            }
            Value::Integer(6) => {
                eval.push(Value::Integer(60))?;
                eval.push(Value::Integer(61))?;
                Ok(Outcome::ReuseBelowTop)
            }
            other => Ok(Outcome::Value(other)),
        }
    }

    #[test]
    fn test_outcome_sentinels_resolve() {
        let mut eval = evaluator();
        eval.register_native("emit", 1, emit_outcome);
        for (input, expected) in [
            (0, Value::None),
            (1, Value::Logic(true)),
            (2, Value::Logic(false)),
            (3, Value::Unset),
            (4, Value::Integer(4)),
            (5, Value::Integer(50)),
            (6, Value::Integer(60)),
        ] {
            let program = block(&mut eval, &[w("emit"), Value::Integer(input)]);
            let root = eval.heap().root_frame();
            context::bind_block(eval.heap_mut(), program, root, false);
            let result = eval.do_block(Position::head(program)).unwrap();
            assert_eq!(result, expected, "emit {input}");
            assert_eq!(eval.top(), 0, "stack balanced after emit {input}");
        }
    }

    #[test]
    fn test_registered_native_joins_the_vocabulary() {
        let mut eval = evaluator();
        eval.register_native("emit", 1, emit_outcome);
        assert_eq!(run(&mut eval, &[w("emit"), Value::Integer(1)]), Value::Logic(true));
    }

    #[test]
    fn test_missing_arguments_at_block_end() {
        let mut eval = evaluator();
        let kind = error_kind(&mut eval, &[w("if"), Value::Logic(true)]);
        assert_eq!(kind, ErrorKind::MissingArgument { name: "if".to_owned() });
    }

    #[test]
    fn test_collaborator_scalar_table_through_words() {
        let mut eval = evaluator();
        eval.actions_mut().register(
            Datatype::Integer,
            crate::actions::ActionTable::new().on(ActionKind::Add, |heap, call| {
                let Value::Integer(a) = call.target else {
                    panic!("integer table dispatched on {}", call.target.datatype())
                };
                match call.args.first() {
                    Some(Value::Integer(b)) => Ok(Value::Integer(a + b)),
                    _ => Err(Unwind::error(
                        heap,
                        ErrorKind::BadArgument {
                            expected: "integer",
                            actual: Datatype::Unset,
                        },
                    )),
                }
            }),
        );
        let result = run(&mut eval, &[w("add"), Value::Integer(2), Value::Integer(3)]);
        assert_eq!(result, Value::Integer(5));
    }
}
