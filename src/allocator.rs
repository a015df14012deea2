//! Flag Allocator Module for the Binder Compiler
//!
//! Assigns dirty-flag bits. Bit 0 is the catch-all `_all` flag; every other
//! bit is handed out once, in increasing order, to an expression that can be
//! invalidated or to one branch of a ternary.

use crate::flag_set::{buckets_for, FlagSet};
use crate::model::{Expr, ExprId, ExprModel};
use crate::validate::ExprKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub const INVALIDATE_ANY_BIT: usize = 0;
pub const INVALIDATE_ANY_NAME: &str = "_all";
const FALSE_SUFFIX: &str = "== FALSE";
const TRUE_SUFFIX: &str = "== TRUE";

/// What a flag bit stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlagOwner {
    InvalidateAll,
    Expr { expr: u32 },
    Requirement { expr: u32, branch: bool },
}

/// Monotonic bit counter. Never hands out the same bit twice.
#[derive(Debug)]
pub struct FlagAllocator {
    owners: Vec<FlagOwner>,
}

impl Default for FlagAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagAllocator {
    pub fn new() -> Self {
        Self {
            owners: vec![FlagOwner::InvalidateAll],
        }
    }

    pub fn allocate(&mut self, owner: FlagOwner) -> usize {
        self.owners.push(owner);
        let bit = self.owners.len() - 1;
        trace!(bit, ?owner, "allocated flag");
        bit
    }

    pub fn total_bits(&self) -> usize {
        self.owners.len()
    }

    pub fn bucket_count_needed(&self) -> usize {
        buckets_for(self.total_bits())
    }
}

/// The sealed bit layout of one compilation unit.
#[derive(Debug, Clone)]
pub struct FlagLayout {
    pub bucket_count: usize,
    /// Invalidate bit per expression, indexed by `ExprId`.
    pub expr_bits: Vec<Option<usize>>,
    /// First of the two requirement bits per ternary (FALSE, then TRUE).
    pub requirement_base: Vec<Option<usize>>,
    pub owners: Vec<FlagOwner>,
    /// Observable expressions in bit order. Their position is the local
    /// field id used for listener registration.
    pub observables: Vec<ExprId>,
    /// `_all` plus every invalidate bit. This is what `invalidateAll` sets.
    pub invalidate_any: FlagSet,
    pub mapping: Vec<String>,
}

impl FlagLayout {
    pub fn flag_owner(&self, bit: usize) -> Option<FlagOwner> {
        self.owners.get(bit).copied()
    }

    /// The expression owning `bit`, for both invalidate and requirement bits.
    pub fn owner_expr(&self, bit: usize) -> Option<ExprId> {
        match self.flag_owner(bit)? {
            FlagOwner::InvalidateAll => None,
            FlagOwner::Expr { expr } | FlagOwner::Requirement { expr, .. } => Some(ExprId(expr)),
        }
    }

    pub fn expr_bit(&self, id: ExprId) -> Option<usize> {
        self.expr_bits.get(id.index()).copied().flatten()
    }

    pub fn requirement_bit(&self, id: ExprId, branch: bool) -> Option<usize> {
        self.requirement_base
            .get(id.index())
            .copied()
            .flatten()
            .map(|base| if branch { base + 1 } else { base })
    }

    pub fn requirement_flags(&self, id: ExprId, branch: bool) -> FlagSet {
        let mut set = FlagSet::new(self.bucket_count);
        if let Some(bit) = self.requirement_bit(id, branch) {
            set.set(bit);
        }
        set
    }

    /// Single-bit set of the expression's own invalidate flag.
    pub fn invalidate_flag_set(&self, id: ExprId) -> FlagSet {
        let mut set = FlagSet::new(self.bucket_count);
        if let Some(bit) = self.expr_bit(id) {
            set.set(bit);
        }
        set
    }

    pub fn local_field_id(&self, id: ExprId) -> Option<usize> {
        self.observables.iter().position(|o| *o == id)
    }

    pub fn is_requirement_bit(&self, bit: usize) -> bool {
        matches!(self.flag_owner(bit), Some(FlagOwner::Requirement { .. }))
    }

    pub fn total_bits(&self) -> usize {
        self.owners.len()
    }

    pub fn snapshot(&self) -> FlagLayoutSnapshot {
        FlagLayoutSnapshot {
            bucket_count: self.bucket_count,
            mapping: self.mapping.clone(),
        }
    }
}

/// The part of a layout that must stay stable between builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagLayoutSnapshot {
    pub bucket_count: usize,
    pub mapping: Vec<String>,
}

/// Hand out every bit of a unit in a fixed order: observables, other
/// variables and dynamic leaves, notifiable field accesses on observables,
/// then two requirement bits per ternary.
pub fn allocate_layout(model: &ExprModel) -> FlagLayout {
    let mut allocator = FlagAllocator::new();
    let mut expr_bits: Vec<Option<usize>> = vec![None; model.len()];
    let mut requirement_base: Vec<Option<usize>> = vec![None; model.len()];
    let mut mapping: Vec<String> = vec![INVALIDATE_ANY_NAME.to_string()];

    let mut observables = Vec::new();
    for expr in model.exprs.iter().filter(|e| e.observable && (e.is_used || e.is_variable)) {
        expr_bits[expr.id.index()] = Some(allocator.allocate(FlagOwner::Expr { expr: expr.id.0 }));
        mapping.push(expr.key.clone());
        observables.push(expr.id);
    }

    let plain = |e: &&Expr| !e.observable && (e.is_variable || is_dynamic_leaf(e));
    for expr in model.exprs.iter().filter(plain) {
        expr_bits[expr.id.index()] = Some(allocator.allocate(FlagOwner::Expr { expr: expr.id.0 }));
        mapping.push(expr.key.clone());
    }

    for observable in &observables {
        for link in &model.expr(*observable).dependants {
            let parent = model.expr(link.expr);
            let notifiable = parent.kind == ExprKind::FieldAccess
                && parent.is_dynamic
                && parent.is_used
                && !parent.bindable_properties.is_empty()
                && parent.children.first() == Some(observable);
            if notifiable && expr_bits[parent.id.index()].is_none() {
                expr_bits[parent.id.index()] =
                    Some(allocator.allocate(FlagOwner::Expr { expr: parent.id.0 }));
                mapping.push(parent.key.clone());
            }
        }
    }

    let invalidatable_limit = allocator.total_bits();

    for expr in model.exprs.iter().filter(|e| e.is_ternary()) {
        let base = allocator.allocate(FlagOwner::Requirement {
            expr: expr.id.0,
            branch: false,
        });
        allocator.allocate(FlagOwner::Requirement {
            expr: expr.id.0,
            branch: true,
        });
        requirement_base[expr.id.index()] = Some(base);
        mapping.push(format!("{}{}", expr.key, FALSE_SUFFIX));
        mapping.push(format!("{}{}", expr.key, TRUE_SUFFIX));
    }

    let bucket_count = allocator.bucket_count_needed();
    let invalidate_any = FlagSet::from_bits(0..invalidatable_limit, bucket_count);

    debug!(
        layout = %model.layout,
        bits = allocator.total_bits(),
        buckets = bucket_count,
        "flag layout sealed"
    );

    FlagLayout {
        bucket_count,
        expr_bits,
        requirement_base,
        owners: allocator.owners,
        observables,
        invalidate_any,
        mapping,
    }
}

/// A used source with no dependencies that the input marks as changing.
fn is_dynamic_leaf(expr: &Expr) -> bool {
    expr.is_dynamic && expr.is_used && expr.dependencies.is_empty()
}
