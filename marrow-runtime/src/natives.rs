//! # Native Functions
//!
//! The built-in vocabulary: Rust functions callable from evaluated code.
//! Each native receives the evaluator and the base index of its stack
//! frame (`base` holds the callable, `base + 1 ..` the gathered
//! arguments) and answers with an [`Outcome`] sentinel the dispatcher
//! resolves into the frame's return value.
//!
//! Long-running natives (`loop`, `while`) poll the interrupt flag and
//! the pending-collection request through [`Evaluator::checkpoint`]
//! every iteration, so halt and escape stay responsive inside tight
//! loops and body results are parked on the evaluation stack where the
//! collector can see them.

use std::fmt;

use crate::context;
use crate::error::{ErrorKind, Unwind};
use crate::eval::{Evaluator, Outcome};
use crate::value::{symbol_name, Func, Position, Value, Word};

// ============================================================================
// Registry
// ============================================================================

/// Index of a registered native.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(u16);

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A native's implementation, called with its stack frame base.
pub type NativeFn = fn(&mut Evaluator, u32) -> Result<Outcome, Unwind>;

/// One registered native.
#[derive(Clone, Copy)]
pub struct NativeDef {
    /// Source-level spelling.
    pub name: &'static str,
    /// Argument cells the evaluator gathers before dispatch.
    pub arity: u32,
    /// The implementation.
    pub run: NativeFn,
}

impl fmt::Debug for NativeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Append-only table of natives; a [`NativeId`] stays valid for the
/// registry's life.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    defs: Vec<NativeDef>,
}

impl NativeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in vocabulary.
    pub fn core() -> Self {
        let mut registry = Self::new();
        registry.register("do", 1, native_do);
        registry.register("if", 2, native_if);
        registry.register("either", 3, native_either);
        registry.register("loop", 2, native_loop);
        registry.register("while", 2, native_while);
        registry.register("break", 0, native_break);
        registry.register("func", 2, native_func);
        registry.register("closure", 2, native_closure);
        registry.register("return", 1, native_return);
        registry.register("catch", 1, native_catch);
        registry.register("throw", 1, native_throw);
        registry.register("try", 1, native_try);
        registry.register("recycle", 0, native_recycle);
        registry.register("set", 2, native_set);
        registry.register("get", 1, native_get);
        registry.register("lock", 1, native_lock);
        registry
    }

    /// Add a native, returning its id.
    pub fn register(&mut self, name: &'static str, arity: u32, run: NativeFn) -> NativeId {
        let index = u16::try_from(self.defs.len())
            .unwrap_or_else(|_| panic!("native id space exhausted registering {name}"));
        self.defs.push(NativeDef { name, arity, run });
        NativeId(index)
    }

    /// The definition behind `id`. An id this registry never issued is
    /// fatal.
    pub fn def(&self, id: NativeId) -> &NativeDef {
        self.defs
            .get(id.0 as usize)
            .unwrap_or_else(|| panic!("unregistered native id {id}"))
    }

    /// All registered natives in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NativeId, &NativeDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(index, def)| (NativeId(index as u16), def))
    }

    /// Number of registered natives.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn bad_argument<T>(
    eval: &mut Evaluator,
    expected: &'static str,
    value: &Value,
) -> Result<T, Unwind> {
    let actual = value.datatype();
    Err(Unwind::error(eval.heap_mut(), ErrorKind::BadArgument { expected, actual }))
}

fn block_arg(eval: &mut Evaluator, base: u32, n: u32) -> Result<Position, Unwind> {
    match eval.arg(base, n) {
        Value::Block(position) | Value::Paren(position) => Ok(position),
        other => bad_argument(eval, "block", &other),
    }
}

fn int_arg(eval: &mut Evaluator, base: u32, n: u32) -> Result<i64, Unwind> {
    match eval.arg(base, n) {
        Value::Integer(value) => Ok(value),
        other => bad_argument(eval, "integer", &other),
    }
}

fn word_arg(eval: &mut Evaluator, base: u32, n: u32) -> Result<Word, Unwind> {
    match eval.arg(base, n) {
        Value::Word(word)
        | Value::SetWord(word)
        | Value::GetWord(word)
        | Value::LitWord(word) => Ok(word),
        other => bad_argument(eval, "word", &other),
    }
}

fn truthy(eval: &mut Evaluator, value: &Value) -> Result<bool, Unwind> {
    match value.truthy() {
        Some(truth) => Ok(truth),
        None => {
            let datatype = value.datatype();
            Err(Unwind::error(eval.heap_mut(), ErrorKind::NoTruthValue { datatype }))
        }
    }
}

/// Evaluate a branch argument: blocks run, anything else is already the
/// branch's value.
fn run_branch(eval: &mut Evaluator, branch: &Value) -> Result<Value, Unwind> {
    match branch {
        Value::Block(position) => eval.do_block(*position),
        other => Ok(other.clone()),
    }
}

// ============================================================================
// Control flow
// ============================================================================

fn native_do(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    match eval.arg(base, 1) {
        Value::Block(position) | Value::Paren(position) => {
            eval.do_block(position).map(Outcome::Value)
        }
        _ => Ok(Outcome::ReuseArg(1)),
    }
}

fn native_if(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let condition = eval.arg(base, 1);
    if truthy(eval, &condition)? {
        let branch = eval.arg(base, 2);
        run_branch(eval, &branch).map(Outcome::Value)
    } else {
        Ok(Outcome::SetNone)
    }
}

fn native_either(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let condition = eval.arg(base, 1);
    let n = if truthy(eval, &condition)? { 2 } else { 3 };
    let branch = eval.arg(base, n);
    run_branch(eval, &branch).map(Outcome::Value)
}

fn native_loop(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let count = int_arg(eval, base, 1)?;
    let body = block_arg(eval, base, 2)?;
    if count <= 0 {
        return Ok(Outcome::SetUnset);
    }
    // Park the running result on the stack so it survives collections
    // triggered at the per-iteration checkpoint.
    let slot = eval.top();
    eval.push(Value::Unset)?;
    for _ in 0..count {
        eval.checkpoint()?;
        match eval.do_block(body) {
            Ok(value) => eval.stack_set(slot, value),
            Err(Unwind::Break(value)) => return Ok(Outcome::Value(value)),
            Err(unwind) => return Err(unwind),
        }
    }
    Ok(Outcome::Value(eval.stack_cell(slot).clone()))
}

fn native_while(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let condition = block_arg(eval, base, 1)?;
    let body = block_arg(eval, base, 2)?;
    let slot = eval.top();
    eval.push(Value::Unset)?;
    loop {
        eval.checkpoint()?;
        let decision = eval.do_block(condition)?;
        if !truthy(eval, &decision)? {
            return Ok(Outcome::Value(eval.stack_cell(slot).clone()));
        }
        match eval.do_block(body) {
            Ok(value) => eval.stack_set(slot, value),
            Err(Unwind::Break(value)) => return Ok(Outcome::Value(value)),
            Err(unwind) => return Err(unwind),
        }
    }
}

fn native_break(_eval: &mut Evaluator, _base: u32) -> Result<Outcome, Unwind> {
    Err(Unwind::Break(Value::Unset))
}

// ============================================================================
// Functions
// ============================================================================

fn native_func(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    build_function(eval, base).map(|func| Outcome::Value(Value::Function(func)))
}

fn native_closure(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    build_function(eval, base).map(|func| Outcome::Value(Value::Closure(func)))
}

/// Collect parameter words from the spec, build the argument frame, and
/// bind the body into it. The body series is bound in place, so every
/// value sharing it sees the function's bindings.
fn build_function(eval: &mut Evaluator, base: u32) -> Result<Func, Unwind> {
    let spec = match eval.arg(base, 1) {
        Value::Block(position) => position,
        other => return bad_argument(eval, "block", &other),
    };
    let body = match eval.arg(base, 2) {
        Value::Block(position) => position,
        other => return bad_argument(eval, "block", &other),
    };

    let mut params = Vec::new();
    {
        let series = eval.heap().series(spec.series);
        for i in spec.index..series.tail() {
            // Plain words are parameters; strings and other cells are
            // spec annotations.
            if let Value::Word(word) = series.cell(i) {
                params.push(word.symbol);
            }
        }
    }

    let frame = context::make_frame(eval.heap_mut(), params.len() as u32);
    for symbol in params {
        context::append_slot(eval.heap_mut(), frame, symbol);
    }
    context::bind_block(eval.heap_mut(), body.series, frame, false);
    Ok(Func { spec: spec.series, body: body.series, frame })
}

fn native_return(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    Err(Unwind::Return(eval.arg(base, 1)))
}

// ============================================================================
// Unwind scopes
// ============================================================================

fn native_catch(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let body = block_arg(eval, base, 1)?;
    match eval.do_block(body) {
        Ok(value) => Ok(Outcome::Value(value)),
        Err(Unwind::Throw { value, .. }) => Ok(Outcome::Value(value)),
        Err(unwind) => Err(unwind),
    }
}

fn native_throw(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    Err(Unwind::Throw { name: None, value: eval.arg(base, 1) })
}

fn native_try(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let body = block_arg(eval, base, 1)?;
    match eval.do_block(body) {
        Ok(value) => Ok(Outcome::Value(value)),
        Err(Unwind::Error(error)) => Ok(Outcome::Value(Value::Error(error.object))),
        Err(unwind) => Err(unwind),
    }
}

// ============================================================================
// Memory and bindings
// ============================================================================

fn native_recycle(eval: &mut Evaluator, _base: u32) -> Result<Outcome, Unwind> {
    let freed = eval.collect_now();
    Ok(Outcome::Value(Value::Integer(freed as i64)))
}

fn native_set(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let word = word_arg(eval, base, 1)?;
    let value = eval.arg(base, 2);
    if matches!(value, Value::Unset) {
        let name = symbol_name(word.symbol);
        return Err(Unwind::error(eval.heap_mut(), ErrorKind::NoValue { name }));
    }
    match word.binding {
        Some(binding) => {
            context::set_slot(eval.heap_mut(), binding.frame, binding.slot, value);
        }
        None => {
            // Unbound words land in the task frame.
            let task = eval.heap().task_frame();
            let slot = context::ensure_slot(eval.heap_mut(), task, word.symbol);
            context::set_slot(eval.heap_mut(), task, slot, value);
        }
    }
    Ok(Outcome::ReuseArg(2))
}

fn native_get(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let word = word_arg(eval, base, 1)?;
    let value = match word.binding {
        Some(binding) => context::get_slot(eval.heap(), binding.frame, binding.slot),
        None => {
            let task = eval.heap().task_frame();
            match context::find_slot(eval.heap(), task, word.symbol) {
                Some(slot) => context::get_slot(eval.heap(), task, slot),
                None => {
                    let name = symbol_name(word.symbol);
                    return Err(Unwind::error(eval.heap_mut(), ErrorKind::NotBound { name }));
                }
            }
        }
    };
    if matches!(value, Value::Unset) {
        let name = symbol_name(word.symbol);
        return Err(Unwind::error(eval.heap_mut(), ErrorKind::NoValue { name }));
    }
    Ok(Outcome::Value(value))
}

fn native_lock(eval: &mut Evaluator, base: u32) -> Result<Outcome, Unwind> {
    let target = eval.arg(base, 1);
    let id = match &target {
        Value::Block(position)
        | Value::Paren(position)
        | Value::Text(position)
        | Value::Binary(position) => position.series,
        Value::Object(id) | Value::Error(id) | Value::Port(id) => *id,
        other => return bad_argument(eval, "series or object", other),
    };
    eval.heap_mut().lock_series(id);
    Ok(Outcome::ReuseArg(1))
}

// ============================================================================
// Tests
// ============================================================================
