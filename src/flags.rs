//! Derived flag tables.
//!
//! Computed once per unit after allocation and then read-only:
//! - `invalid`: bits whose change means the expression's value may differ;
//! - `srwc`: bits that can require reading the expression, counting the
//!   requirement bits of ternary branches it sits behind;
//! - `predicate_invalid`: for ternaries, the invalid flags of the predicate.

use crate::allocator::{FlagLayout, INVALIDATE_ANY_BIT};
use crate::error::{GenerationError, Result};
use crate::flag_set::FlagSet;
use crate::model::{ExprId, ExprModel};

/// Recursion guard threaded through the memo walks. Re-entering an
/// expression that is still being resolved is a cycle.
#[derive(Debug)]
pub struct ResolutionStack {
    on_stack: Vec<bool>,
    path: Vec<ExprId>,
}

impl ResolutionStack {
    pub fn new(len: usize) -> Self {
        Self {
            on_stack: vec![false; len],
            path: Vec::new(),
        }
    }

    pub fn enter(&mut self, id: ExprId, model: &ExprModel) -> Result<()> {
        if self.on_stack[id.index()] {
            let start = self.path.iter().position(|p| *p == id).unwrap_or(0);
            let mut path: Vec<String> = self.path[start..]
                .iter()
                .map(|p| model.expr(*p).key.clone())
                .collect();
            path.push(model.expr(id).key.clone());
            return Err(GenerationError::Cycle { path });
        }
        self.on_stack[id.index()] = true;
        self.path.push(id);
        Ok(())
    }

    pub fn exit(&mut self, id: ExprId) {
        self.on_stack[id.index()] = false;
        self.path.pop();
    }
}

#[derive(Debug, Clone)]
pub struct FlagTables {
    invalid: Vec<FlagSet>,
    srwc: Vec<FlagSet>,
    predicate_invalid: Vec<Option<FlagSet>>,
}

impl FlagTables {
    pub fn compute(model: &ExprModel, layout: &FlagLayout) -> Result<FlagTables> {
        let mut invalid: Vec<Option<FlagSet>> = vec![None; model.len()];
        let mut stack = ResolutionStack::new(model.len());
        for id in model.ids() {
            resolve_invalid(id, model, layout, &mut invalid, &mut stack)?;
        }
        let invalid: Vec<FlagSet> = invalid
            .into_iter()
            .map(|f| f.unwrap_or_else(|| FlagSet::new(layout.bucket_count)))
            .collect();

        let mut srwc: Vec<Option<FlagSet>> = vec![None; model.len()];
        let mut stack = ResolutionStack::new(model.len());
        for id in model.ids() {
            resolve_srwc(id, model, layout, &invalid, &mut srwc, &mut stack)?;
        }
        let srwc: Vec<FlagSet> = srwc
            .into_iter()
            .map(|f| f.unwrap_or_else(|| FlagSet::new(layout.bucket_count)))
            .collect();

        let predicate_invalid = model
            .exprs
            .iter()
            .map(|e| e.predicate().map(|p| invalid[p.index()].clone()))
            .collect();

        Ok(FlagTables {
            invalid,
            srwc,
            predicate_invalid,
        })
    }

    pub fn invalid_flags(&self, id: ExprId) -> &FlagSet {
        &self.invalid[id.index()]
    }

    pub fn should_read_with_conditionals(&self, id: ExprId) -> &FlagSet {
        &self.srwc[id.index()]
    }

    pub fn predicate_invalid_flags(&self, id: ExprId) -> Option<&FlagSet> {
        self.predicate_invalid[id.index()].as_ref()
    }

    /// False when the ternary is only ever evaluated behind another
    /// ternary's branch: its srwc carries neither `_all` nor a requirement
    /// bit of its own.
    pub fn is_reachable_unconditionally(&self, id: ExprId, layout: &FlagLayout) -> bool {
        let srwc = self.should_read_with_conditionals(id);
        srwc.get(INVALIDATE_ANY_BIT) || srwc.iter_ones().any(|bit| layout.is_requirement_bit(bit))
    }
}

fn resolve_invalid(
    id: ExprId,
    model: &ExprModel,
    layout: &FlagLayout,
    memo: &mut [Option<FlagSet>],
    stack: &mut ResolutionStack,
) -> Result<FlagSet> {
    if let Some(done) = &memo[id.index()] {
        return Ok(done.clone());
    }
    stack.enter(id, model)?;
    let mut flags = FlagSet::new(layout.bucket_count);
    flags.set(INVALIDATE_ANY_BIT);
    if let Some(bit) = layout.expr_bit(id) {
        flags.set(bit);
    }
    for dep in &model.expr(id).dependencies {
        let other = resolve_invalid(dep.other, model, layout, memo, stack)?;
        flags.or_assign(&other);
    }
    stack.exit(id);
    memo[id.index()] = Some(flags.clone());
    Ok(flags)
}

fn resolve_srwc(
    id: ExprId,
    model: &ExprModel,
    layout: &FlagLayout,
    invalid: &[FlagSet],
    memo: &mut [Option<FlagSet>],
    stack: &mut ResolutionStack,
) -> Result<FlagSet> {
    if let Some(done) = &memo[id.index()] {
        return Ok(done.clone());
    }
    stack.enter(id, model)?;
    let expr = model.expr(id);
    let mut flags = FlagSet::new(layout.bucket_count);
    if expr.is_binding_expression {
        flags.or_assign(&invalid[id.index()]);
    }
    for link in &expr.dependants {
        let dep = model.dependency(*link);
        match dep.condition {
            None => {
                let parent = resolve_srwc(link.expr, model, layout, invalid, memo, stack)?;
                flags.or_assign(&parent);
            }
            Some(condition) => {
                if let Some(bit) = layout.requirement_bit(link.expr, condition.branch) {
                    flags.set(bit);
                }
            }
        }
    }
    stack.exit(id);
    memo[id.index()] = Some(flags.clone());
    Ok(flags)
}
