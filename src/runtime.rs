//! Runtime Module for the Binder Compiler
//!
//! Host-independent rendition of what the generated binder does at runtime:
//! live dirty bits behind a lock, the snapshot-and-clear that starts every
//! update pass, and an interpreter that walks an `UpdatePlan` the way the
//! emitted `executeBindings` body would.

use crate::allocator::FlagLayout;
use crate::flag_set::FlagSet;
use crate::model::ExprId;
use crate::plan::{Step, UpdatePlan};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

// ═══════════════════════════════════════════════════════════════════════════════
// DIRTY STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Live dirty bits of one binder instance.
#[derive(Debug)]
pub struct DirtyState {
    live: Mutex<FlagSet>,
    invalidate_any: FlagSet,
}

impl DirtyState {
    /// A fresh binder starts fully invalidated.
    pub fn new(layout: &FlagLayout) -> Self {
        Self {
            live: Mutex::new(layout.invalidate_any.clone()),
            invalidate_any: layout.invalidate_any.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlagSet> {
        // A panic while holding the lock cannot leave the bits half-written.
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Property-change path: OR the given bits into the live flags.
    pub fn mark(&self, flags: &FlagSet) {
        self.lock().or_assign(flags);
    }

    pub fn invalidate_all(&self) {
        let mut live = self.lock();
        *live = self.invalidate_any.clone();
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Snapshot the live bits and clear them in one critical section. Bits
    /// marked after this call belong to the next pass.
    pub fn begin_pass(&self) -> PassFlags {
        let mut live = self.lock();
        let width = live.bucket_count();
        let snapshot = std::mem::replace(&mut *live, FlagSet::new(width));
        PassFlags { flags: snapshot }
    }
}

/// Pass-local copy of the dirty bits. Elevation adds requirement bits here;
/// they never reach the live flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PassFlags {
    flags: FlagSet,
}

impl PassFlags {
    pub fn from_flags(flags: FlagSet) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn matches(&self, guard: &FlagSet) -> bool {
        self.flags.intersects_any(guard)
    }

    fn set(&mut self, bit: usize) {
        self.flags.set(bit);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAN INTERPRETER
// ═══════════════════════════════════════════════════════════════════════════════

/// Supplies runtime values the plan branches on.
pub trait Oracle {
    /// Value of a ternary predicate.
    fn predicate(&mut self, expr: ExprId) -> bool;

    /// Whether a null-guard operand evaluated to null.
    fn is_null(&mut self, _expr: ExprId) -> bool {
        false
    }
}

/// Oracle backed by a fixed predicate table; unknown predicates are false.
#[derive(Debug, Default, Clone)]
pub struct FixedOracle {
    pub predicates: Vec<(ExprId, bool)>,
    pub nulls: Vec<ExprId>,
}

impl Oracle for FixedOracle {
    fn predicate(&mut self, expr: ExprId) -> bool {
        self.predicates
            .iter()
            .find(|(id, _)| *id == expr)
            .is_some_and(|(_, value)| *value)
    }

    fn is_null(&mut self, expr: ExprId) -> bool {
        self.nulls.contains(&expr)
    }
}

/// What one pass did, in order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Execution {
    pub reads: Vec<ExprId>,
    pub registrations: Vec<(ExprId, usize)>,
    /// `(ternary, branch)` for every requirement bit that was set.
    pub elevations: Vec<(ExprId, bool)>,
    /// Binding indices whose setters ran.
    pub assignments: Vec<usize>,
    pub old_value_captures: Vec<ExprId>,
}

impl Execution {
    pub fn is_noop(&self) -> bool {
        self.reads.is_empty()
            && self.registrations.is_empty()
            && self.elevations.is_empty()
            && self.assignments.is_empty()
            && self.old_value_captures.is_empty()
    }
}

pub struct PlanInterpreter<'a> {
    plan: &'a UpdatePlan,
    layout: &'a FlagLayout,
    sdk_int: u32,
}

impl<'a> PlanInterpreter<'a> {
    pub fn new(plan: &'a UpdatePlan, layout: &'a FlagLayout) -> Self {
        Self {
            plan,
            layout,
            sdk_int: u32::MAX,
        }
    }

    /// Platform level used for `minApi` gates.
    pub fn with_sdk_int(mut self, sdk_int: u32) -> Self {
        self.sdk_int = sdk_int;
        self
    }

    pub fn run(&self, mut pass: PassFlags, oracle: &mut dyn Oracle) -> Execution {
        let mut execution = Execution::default();
        self.run_steps(&self.plan.steps, &mut pass, oracle, &mut execution);

        for block in &self.plan.assignments {
            if !pass.matches(&block.flags) {
                continue;
            }
            for group in &block.api_groups {
                if group.min_api <= 1 || self.sdk_int >= group.min_api {
                    execution.assignments.extend(group.bindings.iter().copied());
                }
            }
        }
        for block in &self.plan.old_values {
            if pass.matches(&block.flags) {
                execution.old_value_captures.extend(block.captures.iter().copied());
            }
        }
        execution
    }

    fn run_steps(
        &self,
        steps: &[Step],
        pass: &mut PassFlags,
        oracle: &mut dyn Oracle,
        execution: &mut Execution,
    ) {
        for step in steps {
            match step {
                Step::Guarded { flags, body } => {
                    if pass.matches(flags) {
                        self.run_steps(body, pass, oracle, execution);
                    }
                }
                Step::NullGuarded { operands, body } => {
                    if !operands.iter().any(|o| oracle.is_null(*o)) {
                        self.run_steps(body, pass, oracle, execution);
                    }
                }
                Step::Read { expr } => execution.reads.push(*expr),
                Step::Register {
                    expr,
                    local_field_id,
                } => execution.registrations.push((*expr, *local_field_id)),
                Step::Elevate {
                    predicate,
                    guard,
                    ternaries,
                } => {
                    if guard.as_ref().is_some_and(|g| !pass.matches(g)) {
                        continue;
                    }
                    let value = oracle.predicate(*predicate);
                    for ternary in ternaries {
                        if let Some(bit) = self.layout.requirement_bit(*ternary, value) {
                            trace!(%ternary, value, bit, "requirement bit set");
                            pass.set(bit);
                            execution.elevations.push((*ternary, value));
                        }
                    }
                }
                Step::BatchFinished => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::allocate_layout;
    use crate::model::ExprModel;
    use crate::validate::{BindingInput, ExprKind, ExpressionInput, GraphInput};

    fn single_variable_layout() -> FlagLayout {
        let graph = GraphInput {
            layout: "one".into(),
            package: String::new(),
            class_name: None,
            expressions: vec![ExpressionInput {
                kind: ExprKind::Identifier,
                code: "name".into(),
                variable: true,
                ..Default::default()
            }],
            bindings: vec![BindingInput {
                target: "label".into(),
                attribute: "android:text".into(),
                expr: 0,
                components: None,
                setter: "{target}.setText({0})".into(),
                min_api: 1,
                requires_old_value: false,
            }],
            variables: vec![],
        };
        allocate_layout(&ExprModel::build(&graph).unwrap())
    }

    #[test]
    fn fresh_state_is_fully_invalidated() {
        let layout = single_variable_layout();
        let state = DirtyState::new(&layout);
        assert!(state.has_pending());
        let pass = state.begin_pass();
        assert_eq!(pass.flags().iter_ones().collect::<Vec<_>>(), vec![0, 1]);
        assert!(!state.has_pending());
    }

    #[test]
    fn marks_after_snapshot_go_to_next_pass() {
        let layout = single_variable_layout();
        let state = DirtyState::new(&layout);
        let first = state.begin_pass();
        state.mark(&FlagSet::of(1));
        assert!(first.flags().get(0));
        let second = state.begin_pass();
        assert_eq!(second.flags().iter_ones().collect::<Vec<_>>(), vec![1]);
        assert!(state.begin_pass().is_empty());
    }

    #[test]
    fn concurrent_marks_are_not_lost() {
        let layout = single_variable_layout();
        let state = DirtyState::new(&layout);
        state.begin_pass();
        std::thread::scope(|scope| {
            for bit in 1..5 {
                let state = &state;
                scope.spawn(move || state.mark(&FlagSet::of(bit)));
            }
        });
        let pass = state.begin_pass();
        assert_eq!(pass.flags().iter_ones().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn invalidate_all_restores_every_invalidate_bit() {
        let layout = single_variable_layout();
        let state = DirtyState::new(&layout);
        state.begin_pass();
        state.invalidate_all();
        assert_eq!(state.begin_pass().flags(), &layout.invalidate_any);
    }
}
