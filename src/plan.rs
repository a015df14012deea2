//! Update plan produced by the scheduler.
//!
//! A plan is the host-independent form of an update routine: guarded read
//! blocks in evaluation order, followed by guarded assignment blocks. The
//! emitter renders it as code and `runtime::PlanInterpreter` executes it.

use crate::flag_set::FlagSet;
use crate::model::{ExprId, ExprModel};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum Step {
    /// Runs `body` when any of `flags` is set in the pass flags.
    Guarded { flags: FlagSet, body: Vec<Step> },
    /// Runs `body` when none of `operands` is null.
    NullGuarded { operands: Vec<ExprId>, body: Vec<Step> },
    /// Evaluate an expression into its local.
    Read { expr: ExprId },
    /// Attach a change listener to a freshly read observable.
    Register { expr: ExprId, local_field_id: usize },
    /// Once `predicate` is known, set the requirement bit of the live branch
    /// of each ternary. `guard` limits this to passes where the ternaries
    /// themselves may be evaluated.
    Elevate {
        predicate: ExprId,
        guard: Option<FlagSet>,
        ternaries: Vec<ExprId>,
    },
    BatchFinished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroup {
    pub min_api: u32,
    /// Indices into `ExprModel::bindings`.
    pub bindings: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentBlock {
    pub flags: FlagSet,
    pub api_groups: Vec<ApiGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OldValueBlock {
    pub flags: FlagSet,
    pub captures: Vec<ExprId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlan {
    /// Locals declared before the first read, in id order.
    pub declarations: Vec<ExprId>,
    pub steps: Vec<Step>,
    pub assignments: Vec<AssignmentBlock>,
    pub old_values: Vec<OldValueBlock>,
}

impl UpdatePlan {
    /// Every `Read` in emission order.
    pub fn reads(&self) -> Vec<ExprId> {
        let mut out = Vec::new();
        collect_reads(&self.steps, &mut out);
        out
    }

    /// Reads grouped by the batch that issues them.
    pub fn batches(&self) -> Vec<Vec<ExprId>> {
        let mut out = Vec::new();
        let mut current = Vec::new();
        for step in &self.steps {
            if matches!(step, Step::BatchFinished) {
                out.push(std::mem::take(&mut current));
            } else {
                collect_reads(std::slice::from_ref(step), &mut current);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    pub fn batch_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::BatchFinished))
            .count()
    }
}

fn collect_reads(steps: &[Step], out: &mut Vec<ExprId>) {
    for step in steps {
        match step {
            Step::Guarded { body, .. } | Step::NullGuarded { body, .. } => collect_reads(body, out),
            Step::Read { expr } => out.push(*expr),
            _ => {}
        }
    }
}

/// Short textual form of `steps` used in diagnostics.
pub fn outline(steps: &[Step], model: &ExprModel) -> String {
    let mut out = String::new();
    write_outline(steps, model, 0, &mut out);
    out
}

fn write_outline(steps: &[Step], model: &ExprModel, depth: usize, out: &mut String) {
    let pad = "    ".repeat(depth);
    for step in steps {
        match step {
            Step::Guarded { flags, body } => {
                out.push_str(&format!("{}if (dirty & {}) {{\n", pad, flags));
                write_outline(body, model, depth + 1, out);
                out.push_str(&format!("{}}}\n", pad));
            }
            Step::NullGuarded { operands, body } => {
                let names: Vec<&str> = operands.iter().map(|o| model.expr(*o).key.as_str()).collect();
                out.push_str(&format!("{}if non-null({}) {{\n", pad, names.join(", ")));
                write_outline(body, model, depth + 1, out);
                out.push_str(&format!("{}}}\n", pad));
            }
            Step::Read { expr } => {
                out.push_str(&format!("{}read {}\n", pad, model.expr(*expr).key));
            }
            Step::Register { expr, .. } => {
                out.push_str(&format!("{}register {}\n", pad, model.expr(*expr).key));
            }
            Step::Elevate { predicate, ternaries, .. } => {
                out.push_str(&format!(
                    "{}elevate {} for {} ternary(s)\n",
                    pad,
                    model.expr(*predicate).key,
                    ternaries.len()
                ));
            }
            Step::BatchFinished => out.push_str(&format!("{}// batch finished\n", pad)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_descend_into_guards() {
        let plan = UpdatePlan {
            steps: vec![
                Step::Guarded {
                    flags: FlagSet::of(1),
                    body: vec![
                        Step::Read { expr: ExprId(0) },
                        Step::NullGuarded {
                            operands: vec![ExprId(0)],
                            body: vec![Step::Read { expr: ExprId(1) }],
                        },
                    ],
                },
                Step::BatchFinished,
                Step::Read { expr: ExprId(2) },
                Step::BatchFinished,
            ],
            ..Default::default()
        };
        assert_eq!(plan.reads(), vec![ExprId(0), ExprId(1), ExprId(2)]);
        assert_eq!(plan.batch_count(), 2);
        assert_eq!(plan.batches(), vec![vec![ExprId(0), ExprId(1)], vec![ExprId(2)]]);
    }
}
