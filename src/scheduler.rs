//! Scheduler Module for the Binder Compiler
//!
//! Turns a sealed model into an `UpdatePlan`. The plan is built in passes.
//! Each pass reads every expression whose should-read flags are known
//! without ternary knowledge, in dependency order, sharing one guard per
//! distinct flag set. Between passes `mark_bits_read` records what has been
//! covered and elevates the ternary arms whose predicate is now known, which
//! makes them readable under the requirement bit of their branch.
//!
//! Pass-local state (`ReadState`) is kept apart from the immutable model and
//! flag tables, so scheduling the same unit twice yields the same plan.

use crate::allocator::FlagLayout;
use crate::error::{GenerationError, Result};
use crate::flag_set::FlagSet;
use crate::flags::FlagTables;
use crate::model::{DependantRef, ExprId, ExprModel};
use crate::plan::{outline, ApiGroup, AssignmentBlock, OldValueBlock, Step, UpdatePlan};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Mutable bookkeeping for one plan generation.
#[derive(Debug, Clone)]
pub struct ReadState {
    read: Vec<bool>,
    read_so_far: Vec<FlagSet>,
    /// Per expression, per dependency: the condition has been lifted.
    elevated: Vec<Vec<bool>>,
    should_read_memo: Vec<Option<FlagSet>>,
}

impl ReadState {
    pub fn new(model: &ExprModel, bucket_count: usize) -> Self {
        Self {
            read: vec![false; model.len()],
            read_so_far: vec![FlagSet::new(bucket_count); model.len()],
            elevated: model
                .exprs
                .iter()
                .map(|e| vec![false; e.dependencies.len()])
                .collect(),
            should_read_memo: vec![None; model.len()],
        }
    }

    pub fn is_read(&self, id: ExprId) -> bool {
        self.read[id.index()]
    }

    pub fn read_so_far(&self, id: ExprId) -> &FlagSet {
        &self.read_so_far[id.index()]
    }

    pub fn is_elevated(&self, link: DependantRef) -> bool {
        self.elevated[link.expr.index()][link.dep]
    }

    fn invalidate_should_read(&mut self) {
        self.should_read_memo.iter_mut().for_each(|m| *m = None);
    }
}

pub struct Scheduler<'a> {
    model: &'a ExprModel,
    layout: &'a FlagLayout,
    tables: &'a FlagTables,
    state: ReadState,
}

impl<'a> Scheduler<'a> {
    pub fn new(model: &'a ExprModel, layout: &'a FlagLayout, tables: &'a FlagTables) -> Self {
        Self {
            model,
            layout,
            tables,
            state: ReadState::new(model, layout.bucket_count),
        }
    }

    pub fn state(&self) -> &ReadState {
        &self.state
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FLAG QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// A dependency edge that is still gated by its ternary predicate.
    fn is_conditional(&self, link: DependantRef) -> bool {
        self.model.dependency(link).condition.is_some() && !self.state.is_elevated(link)
    }

    /// Bits that, when dirty, require reading `id` in the current pass.
    pub fn should_read(&mut self, id: ExprId) -> FlagSet {
        if let Some(memo) = &self.state.should_read_memo[id.index()] {
            return memo.clone();
        }
        let model = self.model;
        let mut flags = FlagSet::new(self.layout.bucket_count);
        if !self.state.is_read(id) {
            let expr = model.expr(id);
            if expr.is_binding_expression {
                flags.or_assign(self.tables.invalid_flags(id));
            }
            for link in &expr.dependants {
                if self.is_conditional(*link) {
                    continue;
                }
                let dep = model.dependency(*link);
                let unread_elevated = dep.condition.is_some() && !self.state.is_read(link.expr);
                if unread_elevated {
                    if let Some(condition) = dep.condition {
                        if let Some(bit) = self.layout.requirement_bit(link.expr, condition.branch)
                        {
                            flags.set(bit);
                        }
                    }
                } else {
                    let parent = self.should_read(link.expr);
                    flags.or_assign(&parent);
                }
            }
            flags = flags
                .and(self.tables.should_read_with_conditionals(id))
                .and_not(self.state.read_so_far(id));
        }
        self.state.should_read_memo[id.index()] = Some(flags.clone());
        flags
    }

    /// Unread expressions that are dynamic or decide a ternary.
    pub fn pending(&self) -> Vec<ExprId> {
        self.model
            .ids()
            .filter(|id| !self.state.is_read(*id))
            .filter(|id| {
                self.model.expr(*id).is_dynamic || self.model.has_conditional_dependant(*id)
            })
            .collect()
    }

    fn has_nested_cannot_read(&mut self, id: ExprId) -> bool {
        if self.state.is_read(id) {
            return false;
        }
        if self.should_read(id).is_empty() {
            return true;
        }
        self.has_conditional_or_nested_cannot_read_dependency(id)
    }

    fn has_conditional_or_nested_cannot_read_dependency(&mut self, id: ExprId) -> bool {
        let model = self.model;
        model.expr(id).dependencies.iter().enumerate().any(|(dep, d)| {
            self.is_conditional(DependantRef { expr: id, dep }) || self.has_nested_cannot_read(d.other)
        })
    }

    /// Members of `exprs` that can be scheduled without ternary knowledge.
    pub fn filter_should_read(&mut self, exprs: &[ExprId]) -> Vec<ExprId> {
        let mut out = Vec::new();
        for id in exprs {
            if !self.should_read(*id).is_empty()
                && !self.has_conditional_or_nested_cannot_read_dependency(*id)
            {
                out.push(*id);
            }
        }
        out
    }

    /// True once every dependency is read or was read earlier in this batch.
    pub fn should_read_now(&mut self, id: ExprId, just_read: &[ExprId]) -> bool {
        if self.should_read(id).is_empty() {
            return false;
        }
        self.model
            .expr(id)
            .dependencies
            .iter()
            .all(|d| self.state.is_read(d.other) || just_read.contains(&d.other))
    }

    /// Nullable mandatory dependencies that must be non-null before `id` is
    /// evaluated. A ternary unboxes its own predicate, so that edge is exempt.
    fn null_guard(&self, id: ExprId) -> Vec<ExprId> {
        let expr = self.model.expr(id);
        if expr.is_variable || expr.is_equality_check() {
            return Vec::new();
        }
        let predicate = expr.predicate();
        expr.dependencies
            .iter()
            .filter(|d| d.is_mandatory() && Some(d.other) != predicate)
            .filter(|d| self.model.expr(d.other).nullable)
            .map(|d| d.other)
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PLAN GENERATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn schedule(mut self) -> Result<UpdatePlan> {
        let declarations: Vec<ExprId> = self
            .pending()
            .into_iter()
            .filter(|id| self.model.expr(*id).needs_local_field())
            .collect();

        let mut steps: Vec<Step> = Vec::new();
        loop {
            let pending = self.pending();
            let mut batch = self.filter_should_read(&pending);
            let mut just_read: Vec<ExprId> = Vec::new();
            debug!(batch = batch.len(), "scheduling batch");
            while !batch.is_empty() {
                let mut read_now = Vec::new();
                for id in &batch {
                    if self.should_read_now(*id, &just_read) {
                        read_now.push(*id);
                    }
                }
                if read_now.is_empty() {
                    return Err(GenerationError::NoProgress {
                        pending: self.keys(&batch),
                        partial_code: outline(&steps, self.model),
                    });
                }
                trace!(batch = batch.len(), read_now = read_now.len(), "new read now");
                let block = self.read_with_dependants(&read_now, &mut just_read, &batch, None);
                steps.extend(block);
                batch.retain(|id| !just_read.contains(id));
            }
            steps.push(Step::BatchFinished);
            if !self.mark_bits_read() {
                break;
            }
        }

        // Anything still pending that a binding can reach was never read.
        let pending = self.pending();
        let mut unread = self.filter_should_read(&pending);
        for id in pending {
            if !unread.contains(&id) && !self.tables.should_read_with_conditionals(id).is_empty() {
                unread.push(id);
            }
        }
        if !unread.is_empty() {
            return Err(GenerationError::Unreadable {
                unread: self.keys(&unread),
                partial_code: outline(&steps, self.model),
            });
        }

        Ok(UpdatePlan {
            declarations,
            steps,
            assignments: self.assignment_blocks(),
            old_values: self.old_value_blocks(),
        })
    }

    fn read_with_dependants(
        &mut self,
        exprs: &[ExprId],
        just_read: &mut Vec<ExprId>,
        batch: &[ExprId],
        inherited: Option<&FlagSet>,
    ) -> Vec<Step> {
        let model = self.model;
        let mut groups: BTreeMap<FlagSet, Vec<ExprId>> = BTreeMap::new();
        for id in exprs {
            let flags = self.should_read(*id);
            groups.entry(flags).or_default().push(*id);
        }

        let mut out = Vec::new();
        for (flag_set, members) in groups {
            let needs_if = !matches!(inherited, Some(i) if flag_set.bits_equal(i));
            let mut body: Vec<Step> = Vec::new();
            let mut dependants: Vec<ExprId> = Vec::new();

            let mut by_guard: IndexMap<Vec<ExprId>, Vec<ExprId>> = IndexMap::new();
            for id in &members {
                by_guard.entry(self.null_guard(*id)).or_default().push(*id);
            }

            for (operands, sub) in by_guard {
                let reads: Vec<Step> = sub
                    .iter()
                    .filter(|id| {
                        let e = model.expr(**id);
                        e.needs_local_field() && !e.is_variable
                    })
                    .map(|id| Step::Read { expr: *id })
                    .collect();
                if !reads.is_empty() {
                    if operands.is_empty() {
                        body.extend(reads);
                    } else {
                        body.push(Step::NullGuarded {
                            operands,
                            body: reads,
                        });
                    }
                    for id in sub.iter().filter(|id| model.expr(**id).observable) {
                        if let Some(local_field_id) = self.layout.local_field_id(*id) {
                            body.push(Step::Register {
                                expr: *id,
                                local_field_id,
                            });
                        }
                    }
                }

                for id in &sub {
                    just_read.push(*id);
                    trace!(expr = %model.expr(*id).key, needs_if, "read with dependants");
                    body.extend(self.elevation_steps(*id));

                    for link in &model.expr(*id).dependants {
                        let dependant = link.expr;
                        if !batch.contains(&dependant)
                            || just_read.contains(&dependant)
                            || dependants.contains(&dependant)
                        {
                            continue;
                        }
                        let covered = self.should_read(dependant).and_not(&flag_set).is_empty();
                        if covered && self.should_read_now(dependant, just_read) {
                            dependants.push(dependant);
                        }
                    }
                }
            }

            if !dependants.is_empty() {
                let next = if needs_if { Some(&flag_set) } else { inherited };
                let nested = self.read_with_dependants(&dependants, just_read, batch, next);
                body.extend(nested);
            }

            if body.is_empty() {
                continue;
            }
            if needs_if {
                out.push(Step::Guarded {
                    flags: flag_set,
                    body,
                });
            } else {
                out.extend(body);
            }
        }
        out
    }

    /// Requirement-bit updates for the ternaries `predicate` decides.
    fn elevation_steps(&self, predicate: ExprId) -> Vec<Step> {
        let model = self.model;
        let mut by_guard: IndexMap<Option<FlagSet>, Vec<ExprId>> = IndexMap::new();
        for link in &model.expr(predicate).dependants {
            let ternary = model.expr(link.expr);
            if self.is_conditional(*link) || ternary.predicate() != Some(predicate) {
                continue;
            }
            let guard = if self.tables.is_reachable_unconditionally(ternary.id, self.layout) {
                Some(self.tables.should_read_with_conditionals(ternary.id).clone())
            } else {
                None
            };
            let entry = by_guard.entry(guard).or_default();
            if !entry.contains(&ternary.id) {
                entry.push(ternary.id);
            }
        }
        by_guard
            .into_iter()
            .map(|(guard, ternaries)| Step::Elevate {
                predicate,
                guard,
                ternaries,
            })
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BETWEEN PASSES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record the bits read by this pass and elevate what became decidable.
    /// Returns true when another pass is needed.
    pub fn mark_bits_read(&mut self) -> bool {
        let pending = self.pending();
        let marked = self.filter_should_read(&pending);
        let flags: Vec<FlagSet> = marked.iter().map(|id| self.should_read(*id)).collect();
        for (id, read) in marked.iter().zip(&flags) {
            self.state.read_so_far[id.index()].or_assign(read);
        }
        self.prune_done(marked)
    }

    fn prune_done(&mut self, mut partially_read: Vec<ExprId>) -> bool {
        let model = self.model;
        let mut newly_read = Vec::new();
        loop {
            let mut marked = false;
            for id in model.ids() {
                if self.state.is_read(id) {
                    continue;
                }
                if self.mark_as_read_if_done(id) {
                    trace!(expr = %model.expr(id).key, "marked as read");
                    marked = true;
                    newly_read.push(id);
                    partially_read.retain(|p| *p != id);
                }
            }
            if !marked {
                break;
            }
        }

        let mut elevated = false;
        for id in &newly_read {
            for link in &model.expr(*id).dependants {
                elevated |= self.consider_elevating(link.expr, *id);
            }
        }
        for id in &partially_read {
            let read_so_far = self.state.read_so_far(*id).clone();
            for link in &model.expr(*id).dependants {
                let dependant = link.expr;
                if model.expr(dependant).is_ternary()
                    && self.all_paths_satisfied(dependant, &read_so_far)
                {
                    elevated |= self.consider_elevating(dependant, *id);
                }
            }
        }

        self.state.invalidate_should_read();
        if elevated {
            debug!("conditionals elevated, running another pass");
        }
        elevated
    }

    fn mark_as_read_if_done(&mut self, id: ExprId) -> bool {
        let read_so_far = self.state.read_so_far(id);
        let remaining = self
            .tables
            .should_read_with_conditionals(id)
            .and_not(read_so_far);
        let mut done = remaining.is_empty();
        if !done && !read_so_far.is_empty() {
            // The rest may only be requirement bits of ternaries that this
            // expression's own reads already cover.
            done = remaining.iter_ones().all(|bit| {
                let Some(owner) = self.layout.owner_expr(bit) else {
                    return true;
                };
                self.model.expr(owner).is_ternary()
                    && self
                        .tables
                        .should_read_with_conditionals(owner)
                        .and_not(read_so_far)
                        .is_empty()
            });
        }
        if done {
            self.state.read[id.index()] = true;
        }
        done
    }

    /// Lift the conditions of `dependant` that wait on `predicate`.
    fn consider_elevating(&mut self, dependant: ExprId, predicate: ExprId) -> bool {
        let mut elevated = false;
        for (dep, d) in self.model.expr(dependant).dependencies.iter().enumerate() {
            let waits_on_predicate = d.condition.is_some_and(|c| c.predicate == predicate);
            if waits_on_predicate && !self.state.elevated[dependant.index()][dep] {
                self.state.elevated[dependant.index()][dep] = true;
                elevated = true;
                trace!(
                    ternary = %self.model.expr(dependant).key,
                    arm = %self.model.expr(d.other).key,
                    "elevated conditional"
                );
            }
        }
        elevated
    }

    /// Whether every path that leads to evaluating `id` is already covered
    /// by `read_so_far`.
    fn all_paths_satisfied(&self, id: ExprId, read_so_far: &FlagSet) -> bool {
        let expr = self.model.expr(id);
        let bits = if expr.is_ternary() {
            self.tables.predicate_invalid_flags(id).cloned().unwrap_or_default()
        } else {
            self.tables.invalid_flags(id).clone()
        };
        if !bits.and_not(read_so_far).is_empty() {
            if let [only] = expr.dependants[..] {
                if let Some(condition) = self.model.dependency(only).condition {
                    return self.condition_satisfied(only.expr, condition.branch, read_so_far);
                }
            }
            return false;
        }
        expr.dependants.iter().all(|link| {
            match self.model.dependency(*link).condition {
                Some(condition) => self.condition_satisfied(link.expr, condition.branch, read_so_far),
                None => self.all_paths_satisfied(link.expr, read_so_far),
            }
        })
    }

    fn condition_satisfied(&self, ternary: ExprId, branch: bool, read_so_far: &FlagSet) -> bool {
        self.layout
            .requirement_bit(ternary, branch)
            .is_some_and(|bit| read_so_far.get(bit))
            || self.all_paths_satisfied(ternary, read_so_far)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ASSIGNMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn assignment_blocks(&self) -> Vec<AssignmentBlock> {
        let mut by_flags: IndexMap<FlagSet, Vec<usize>> = IndexMap::new();
        for (index, binding) in self.model.bindings.iter().enumerate() {
            let flags = self.tables.invalid_flags(binding.expr).clone();
            by_flags.entry(flags).or_default().push(index);
        }
        by_flags
            .into_iter()
            .map(|(flags, bindings)| {
                let mut by_api: IndexMap<u32, Vec<usize>> = IndexMap::new();
                for index in bindings {
                    let min_api = self.model.bindings[index].min_api.max(1);
                    by_api.entry(min_api).or_default().push(index);
                }
                AssignmentBlock {
                    flags,
                    api_groups: by_api
                        .into_iter()
                        .map(|(min_api, bindings)| ApiGroup { min_api, bindings })
                        .collect(),
                }
            })
            .collect()
    }

    fn old_value_blocks(&self) -> Vec<OldValueBlock> {
        let mut by_flags: IndexMap<FlagSet, Vec<usize>> = IndexMap::new();
        for (index, binding) in self.model.bindings.iter().enumerate() {
            if binding.requires_old_value {
                let flags = self.tables.invalid_flags(binding.expr).clone();
                by_flags.entry(flags).or_default().push(index);
            }
        }
        by_flags
            .into_iter()
            .map(|(flags, bindings)| {
                let mut seen_exprs = Vec::new();
                let mut captures = Vec::new();
                for index in bindings {
                    let binding = &self.model.bindings[index];
                    if seen_exprs.contains(&binding.expr) {
                        continue;
                    }
                    seen_exprs.push(binding.expr);
                    captures.extend(binding.components.iter().copied());
                }
                OldValueBlock { flags, captures }
            })
            .collect()
    }

    fn keys(&self, ids: &[ExprId]) -> Vec<String> {
        ids.iter().map(|id| self.model.expr(*id).key.clone()).collect()
    }
}

/// Convenience wrapper: schedule one sealed unit.
pub fn schedule(model: &ExprModel, layout: &FlagLayout, tables: &FlagTables) -> Result<UpdatePlan> {
    Scheduler::new(model, layout, tables).schedule()
}
