//! Expression Model Module for the Binder Compiler
//!
//! Builds the arena of binding expressions from a `GraphInput`. Expressions
//! are addressed by `ExprId`, an ordinal assigned in first-use order. Edges
//! live in `Expr::dependencies`; the reverse edges are stored in
//! `Expr::dependants` as `(dependant, dependency index)` pairs so that no
//! expression owns another.

use crate::error::{GenerationError, Result};
use crate::validate::{validate_graph, BindingInput, ExprKind, ExpressionInput, GraphInput};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

lazy_static! {
    /// `{0}`, `{1}`... child placeholders in a code template.
    static ref CHILD_PLACEHOLDER_RE: Regex = Regex::new(r"\{(\d+)\}").unwrap();
}

/// Replace `{n}` placeholders with `lookup(n)`. Placeholders the lookup does
/// not know are left untouched.
pub fn expand_template<F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(usize) -> Option<String>,
{
    CHILD_PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(&mut lookup)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDS AND EDGES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The predicate value under which a conditional dependency is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub predicate: ExprId,
    pub branch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub dependant: ExprId,
    pub other: ExprId,
    /// Present for ternary arms; such edges are only followed on one branch.
    pub condition: Option<Condition>,
}

impl Dependency {
    pub fn is_mandatory(&self) -> bool {
        self.condition.is_none()
    }
}

/// Back-reference from a dependency target to the edge that points at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependantRef {
    pub expr: ExprId,
    pub dep: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    /// Position in the input `expressions` array.
    pub input_index: usize,
    pub key: String,
    pub kind: ExprKind,
    pub code: String,
    pub children: Vec<ExprId>,
    pub dependencies: Vec<Dependency>,
    pub dependants: Vec<DependantRef>,
    pub is_dynamic: bool,
    pub nullable: bool,
    pub observable: bool,
    pub is_variable: bool,
    pub is_binding_expression: bool,
    pub is_used: bool,
    pub bindable_properties: Vec<String>,
    pub type_name: String,
    pub default_value: String,
    pub op: Option<String>,
}

impl Expr {
    pub fn is_ternary(&self) -> bool {
        self.kind == ExprKind::Ternary
    }

    pub fn is_equality_check(&self) -> bool {
        self.kind == ExprKind::Comparison && self.op.as_deref().map(str::trim) == Some("==")
    }

    /// Predicate of a ternary.
    pub fn predicate(&self) -> Option<ExprId> {
        if self.is_ternary() {
            self.children.first().copied()
        } else {
            None
        }
    }

    /// Dynamic expressions get a local in the update routine. Unused
    /// variables are read straight from their field.
    pub fn needs_local_field(&self) -> bool {
        self.is_dynamic && !(self.is_variable && !self.is_used)
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub target: String,
    pub attribute: String,
    pub expr: ExprId,
    pub components: Vec<ExprId>,
    pub setter: String,
    pub min_api: u32,
    pub requires_old_value: bool,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub type_name: String,
    pub expr: Option<ExprId>,
}

#[derive(Debug, Clone)]
pub struct ExprModel {
    pub layout: String,
    pub package: String,
    pub class_name: Option<String>,
    pub exprs: Vec<Expr>,
    pub bindings: Vec<Binding>,
    pub variables: Vec<Variable>,
}

impl ExprModel {
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.exprs.iter().map(|e| e.id)
    }

    pub fn dependency(&self, link: DependantRef) -> &Dependency {
        &self.expr(link.expr).dependencies[link.dep]
    }

    /// The variable an identifier expression reads, if any.
    pub fn variable_for(&self, id: ExprId) -> Option<&Variable> {
        self.variables.iter().find(|v| v.expr == Some(id))
    }

    /// Ternaries whose predicate is `id`.
    pub fn has_conditional_dependant(&self, id: ExprId) -> bool {
        self.expr(id).dependants.iter().any(|link| {
            let dependant = self.expr(link.expr);
            dependant.predicate() == Some(id)
        })
    }

    /// Build and check the arena for one compilation unit.
    pub fn build(graph: &GraphInput) -> Result<ExprModel> {
        if let Some(e) = validate_graph(graph, &graph.layout) {
            return Err(e.into());
        }

        let order = first_use_order(graph);
        let mut id_of = vec![ExprId(0); graph.expressions.len()];
        for (ordinal, input_index) in order.iter().enumerate() {
            id_of[*input_index] = ExprId(ordinal as u32);
        }

        let keys = compute_keys(&graph.expressions);
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            if let Some(first) = seen.insert(key.as_str(), i) {
                return Err(GenerationError::InvalidInput(format!(
                    "expressions {} and {} share the key `{}`",
                    first, i, key
                )));
            }
        }

        let dynamic = compute_dynamic(&graph.expressions);

        let mut exprs: Vec<Expr> = order
            .iter()
            .map(|&input_index| {
                let input = &graph.expressions[input_index];
                let id = id_of[input_index];
                Expr {
                    id,
                    input_index,
                    key: keys[input_index].clone(),
                    kind: input.kind,
                    code: input.code.clone(),
                    children: input.children.iter().map(|c| id_of[*c]).collect(),
                    dependencies: build_dependencies(id, input, &id_of, &dynamic),
                    dependants: Vec::new(),
                    is_dynamic: dynamic[input_index],
                    nullable: input.nullable,
                    observable: input.observable,
                    is_variable: input.kind == ExprKind::Identifier && input.variable,
                    is_binding_expression: false,
                    is_used: false,
                    bindable_properties: input.bindable_properties.clone(),
                    type_name: input.type_name.clone().unwrap_or_else(|| "Object".to_string()),
                    default_value: input
                        .default_value
                        .clone()
                        .unwrap_or_else(|| "null".to_string()),
                    op: input.op.clone(),
                }
            })
            .collect();

        for index in 0..exprs.len() {
            let links: Vec<(ExprId, DependantRef)> = exprs[index]
                .dependencies
                .iter()
                .enumerate()
                .map(|(dep, d)| (d.other, DependantRef { expr: d.dependant, dep }))
                .collect();
            for (other, link) in links {
                exprs[other.index()].dependants.push(link);
            }
        }

        let bindings: Vec<Binding> = graph
            .bindings
            .iter()
            .map(|b| to_binding(b, &id_of))
            .collect();
        let variables: Vec<Variable> = graph
            .variables
            .iter()
            .map(|v| Variable {
                name: v.name.clone(),
                type_name: v.type_name.clone(),
                expr: v.expr.map(|i| id_of[i]),
            })
            .collect();

        let mut model = ExprModel {
            layout: graph.layout.clone(),
            package: graph.package.clone(),
            class_name: graph.class_name.clone(),
            exprs,
            bindings,
            variables,
        };
        for binding in model.bindings.clone() {
            for id in binding.components.iter().chain([&binding.expr]) {
                model.exprs[id.index()].is_binding_expression = true;
            }
        }
        model.mark_used();
        model.check_acyclic()?;

        debug!(
            layout = %model.layout,
            expressions = model.exprs.len(),
            bindings = model.bindings.len(),
            "expression model built"
        );
        Ok(model)
    }

    /// Flag every expression reachable from a binding through its children.
    pub fn mark_used(&mut self) {
        let mut stack: Vec<ExprId> = self
            .bindings
            .iter()
            .flat_map(|b| b.components.iter().copied().chain([b.expr]))
            .collect();
        while let Some(id) = stack.pop() {
            let expr = &mut self.exprs[id.index()];
            if expr.is_used {
                continue;
            }
            expr.is_used = true;
            stack.extend(expr.children.iter().copied());
        }
    }

    /// Reject any cycle made of mandatory edges, naming every key on it.
    pub fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.exprs.len()];
        for root in self.ids() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            // (node, next dependency to look at)
            let mut stack: Vec<(ExprId, usize)> = vec![(root, 0)];
            marks[root.index()] = Mark::OnStack;
            while let Some((node, cursor)) = stack.last().copied() {
                let deps = &self.expr(node).dependencies;
                let next = deps[cursor.min(deps.len())..]
                    .iter()
                    .position(|d| d.is_mandatory())
                    .map(|offset| cursor + offset);
                let Some(dep_index) = next else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 = dep_index + 1;
                }
                let other = deps[dep_index].other;
                match marks[other.index()] {
                    Mark::Unvisited => {
                        marks[other.index()] = Mark::OnStack;
                        stack.push((other, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(id, _)| *id == other).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|(id, _)| self.expr(*id).key.clone())
                            .collect();
                        path.push(self.expr(other).key.clone());
                        return Err(GenerationError::Cycle { path });
                    }
                    Mark::Done => {}
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Depth-first, children-first walk from the bindings in input order, then
/// every expression not reached yet in input order.
fn first_use_order(graph: &GraphInput) -> Vec<usize> {
    fn visit(index: usize, exprs: &[ExpressionInput], seen: &mut [bool], out: &mut Vec<usize>) {
        if seen[index] {
            return;
        }
        seen[index] = true;
        for child in &exprs[index].children {
            visit(*child, exprs, seen, out);
        }
        out.push(index);
    }

    let mut seen = vec![false; graph.expressions.len()];
    let mut out = Vec::with_capacity(graph.expressions.len());
    for binding in &graph.bindings {
        for index in [binding.expr].into_iter().chain(binding.component_indices()) {
            visit(index, &graph.expressions, &mut seen, &mut out);
        }
    }
    for variable in &graph.variables {
        if let Some(index) = variable.expr {
            visit(index, &graph.expressions, &mut seen, &mut out);
        }
    }
    for index in 0..graph.expressions.len() {
        visit(index, &graph.expressions, &mut seen, &mut out);
    }
    out
}

/// Explicit keys win. Otherwise the code template is expanded with the keys
/// of the children. A child already being expanded contributes its raw code.
fn compute_keys(exprs: &[ExpressionInput]) -> Vec<String> {
    fn key_of(
        index: usize,
        exprs: &[ExpressionInput],
        memo: &mut [Option<String>],
        in_progress: &mut [bool],
    ) -> String {
        if let Some(key) = &memo[index] {
            return key.clone();
        }
        let input = &exprs[index];
        if let Some(key) = &input.key {
            memo[index] = Some(key.clone());
            return key.clone();
        }
        if in_progress[index] {
            return input.code.clone();
        }
        in_progress[index] = true;
        let key = expand_template(&input.code, |n| {
            input
                .children
                .get(n)
                .map(|child| key_of(*child, exprs, memo, in_progress))
        });
        in_progress[index] = false;
        memo[index] = Some(key.clone());
        key
    }

    let mut memo = vec![None; exprs.len()];
    let mut in_progress = vec![false; exprs.len()];
    (0..exprs.len())
        .map(|i| key_of(i, exprs, &mut memo, &mut in_progress))
        .collect()
}

/// Leaves take the input flag; observables and variables are always
/// dynamic; composites are dynamic when any child is.
fn compute_dynamic(exprs: &[ExpressionInput]) -> Vec<bool> {
    fn dynamic_of(
        index: usize,
        exprs: &[ExpressionInput],
        memo: &mut [Option<bool>],
        in_progress: &mut [bool],
    ) -> bool {
        if let Some(value) = memo[index] {
            return value;
        }
        if in_progress[index] {
            return false;
        }
        in_progress[index] = true;
        let input = &exprs[index];
        let mut value = input.dynamic || input.observable || input.variable;
        for child in &input.children {
            value |= dynamic_of(*child, exprs, memo, in_progress);
        }
        in_progress[index] = false;
        memo[index] = Some(value);
        value
    }

    let mut memo = vec![None; exprs.len()];
    let mut in_progress = vec![false; exprs.len()];
    (0..exprs.len())
        .map(|i| dynamic_of(i, exprs, &mut memo, &mut in_progress))
        .collect()
}

fn build_dependencies(
    id: ExprId,
    input: &ExpressionInput,
    id_of: &[ExprId],
    dynamic: &[bool],
) -> Vec<Dependency> {
    let edge = |other: usize, condition: Option<Condition>| Dependency {
        dependant: id,
        other: id_of[other],
        condition,
    };

    if let Some(explicit) = &input.dependencies {
        return explicit
            .iter()
            .map(|d| {
                let condition = d.conditional.as_ref().map(|c| Condition {
                    predicate: id_of[c.predicate],
                    branch: c.branch,
                });
                edge(d.expr, condition)
            })
            .collect();
    }

    let mut deps: Vec<Dependency> = Vec::new();
    match input.kind {
        ExprKind::Ternary => {
            if let [pred, if_true, if_false] = input.children[..] {
                deps.push(edge(pred, None));
                for (arm, branch) in [(if_true, true), (if_false, false)] {
                    if dynamic[arm] {
                        let condition = Condition {
                            predicate: id_of[pred],
                            branch,
                        };
                        deps.push(edge(arm, Some(condition)));
                    }
                }
            }
        }
        _ => {
            for child in &input.children {
                if dynamic[*child] {
                    deps.push(edge(*child, None));
                }
            }
        }
    }
    deps.dedup_by(|a, b| a.other == b.other && a.condition == b.condition);
    deps
}

fn to_binding(input: &BindingInput, id_of: &[ExprId]) -> Binding {
    Binding {
        target: input.target.clone(),
        attribute: input.attribute.clone(),
        expr: id_of[input.expr],
        components: input
            .component_indices()
            .into_iter()
            .map(|i| id_of[i])
            .collect(),
        setter: input.setter.clone(),
        min_api: input.min_api,
        requires_old_value: input.requires_old_value,
    }
}
