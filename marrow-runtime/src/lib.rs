//! # Marrow Runtime Library
//!
//! The Marrow runtime provides:
//!
//! - **Pooled Heap**: size-class pool allocator with generation-checked ids
//! - **Series**: growable narrow (byte) and wide (cell) buffers with a
//!   shared-position view model
//! - **Value Cells**: fixed-width tagged values, many cells aliasing one series
//! - **Garbage Collection**: non-moving mark-and-sweep over the pools
//! - **Evaluation Core**: block-walking evaluator with native, action,
//!   function, and closure dispatch
//!
//! ## Technical Standards
//!
//! Implementation follows these standards:
//!
//! - **Interning**: symbols per
//!   [string-interner](https://docs.rs/string_interner)
//! - **Locking**: interner access per [parking_lot](https://docs.rs/parking_lot)
//! - **Errors**: derived error types per [thiserror](https://docs.rs/thiserror)
//! - **Diagnostics**: structured events per [tracing](https://docs.rs/tracing)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       MARROW RUNTIME                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  Evaluator   │  │   Natives    │  │   Actions    │          │
//! │  │  (eval.rs)   │  │ (natives.rs) │  │ (actions.rs) │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Heap      │  │   Context    │  │    Modify    │          │
//! │  │  (heap.rs)   │  │ (context.rs) │  │ (modify.rs)  │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                                                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Pools     │  │    Series    │  │  Collector   │          │
//! │  │  (pool.rs)   │  │ (series.rs)  │  │   (gc.rs)    │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod actions;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod eval;
mod gc;
pub mod heap;
pub mod modify;
pub mod natives;
pub mod pool;
pub mod series;
pub mod signal;
pub mod value;

// Re-exports
pub use actions::{ActionFn, ActionKind, ActionRegistry, ActionTable};
pub use config::{ConfigError, EvalConfig, MemoryConfig, RuntimeConfig, RuntimeConfigBuilder};
pub use error::{ErrorKind, ErrorValue, Unwind};
pub use eval::{Evaluator, Outcome};
pub use heap::{HandleId, Heap, HeapStats};
pub use modify::{ModifyArgs, ModifyOp};
pub use natives::{NativeFn, NativeId, NativeRegistry};
pub use series::{SeriesFlags, SeriesId};
pub use signal::{Signal, SignalFlag};
pub use value::{Datatype, Position, Value, Word};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Boot an evaluator with default configuration.
pub fn boot() -> Evaluator {
    Evaluator::new(RuntimeConfig::default())
}

/// Boot an evaluator with the given configuration.
pub fn boot_with(config: RuntimeConfig) -> Evaluator {
    Evaluator::new(config)
}

/// Boot an evaluator configured from `MARROW_*` environment variables.
///
/// See [`RuntimeConfig::from_env`] for the full list of supported
/// variables.
pub fn boot_from_env() -> Evaluator {
    Evaluator::new(RuntimeConfig::from_env())
}
