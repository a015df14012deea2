//! # Binder Compiler Ground Truth
//!
//! ## Dirty-Flag Invariants
//!
//! 1. **Reserved Bit**: bit 0 is `_all`. It is set by `invalidateAll` and by
//!    the catch-all property notification, and is never handed to an
//!    expression.
//!
//! 2. **Stable Layout**: bits are allocated in one fixed order (observables,
//!    variables, notifiable field accesses, then two requirement bits per
//!    ternary). The same input always yields the same layout.
//!
//! 3. **One Width**: every `FlagSet` of a unit has the unit's bucket count.
//!
//! 4. **Dependency Order**: within a pass an expression is read only after
//!    each of its dependencies was read earlier in the pass or is clean.
//!
//! 5. **Lazy Branches**: a ternary arm is read only once its predicate has
//!    picked that arm, which the update routine records by setting the
//!    arm's requirement bit in the pass-local flags.
//!
//! 6. **Snapshot First**: `executeBindings` copies and clears the live flags
//!    under the lock before the first read. Notifications arriving later
//!    belong to the next pass.
//!
//! ## Pipeline
//!
//! `GraphInput` (JSON) → `ExprModel` → `FlagLayout` → `FlagTables` →
//! `UpdatePlan` → binder source, with the `BR` table merged across units.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod allocator;
mod br;
mod cache;
mod codegen;
mod discovery;
mod error;
mod finalize;
mod flag_set;
mod flags;
mod kcode;
mod model;
mod naming;
mod parse;
mod plan;
mod runtime;
mod scheduler;
mod tracing_config;
mod validate;

#[cfg(test)]
mod codegen_tests;
#[cfg(test)]
mod safety_tests;

pub use allocator::{
    allocate_layout, FlagAllocator, FlagLayout, FlagLayoutSnapshot, FlagOwner, INVALIDATE_ANY_BIT,
    INVALIDATE_ANY_NAME,
};
pub use br::PropertyTable;
pub use cache::IncrementalCache;
pub use codegen::{binder_class_name, emit_binder};
pub use discovery::{compile_directory, find_binding_files};
pub use error::{GenerationError, Result};
pub use finalize::{finalize_output, write_output, FinalizedOutput, GeneratedSource};
pub use flag_set::{AlreadyLocalized, FlagSet, BUCKET_SIZE};
pub use flags::FlagTables;
pub use model::{Condition, Dependency, Expr, ExprId, ExprModel};
pub use naming::{NameRegistry, NameScope};
pub use parse::{
    compile_graph, compile_layout_internal, compile_source, CompileOptions, CompileResult,
    CompiledUnit,
};
pub use plan::{Step, UpdatePlan};
pub use runtime::{DirtyState, Execution, FixedOracle, Oracle, PassFlags, PlanInterpreter};
pub use scheduler::{schedule, Scheduler};
pub use tracing_config::init_tracing;
pub use validate::*;

#[cfg(feature = "napi")]
pub use discovery::discover_bindings_native;
#[cfg(feature = "napi")]
pub use finalize::generate_binder_native;
#[cfg(feature = "napi")]
pub use parse::compile_layout_native;

#[cfg(feature = "napi")]
#[napi]
pub fn compile_bridge() -> String {
    "Binder Compiler Native Bridge Connected".to_string()
}
