#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const BC_ERR_CYCLE: &str = "BC-ERR-CYCLE-001";
pub const BC_ERR_STALL: &str = "BC-ERR-STALL-002";
pub const BC_ERR_CACHE: &str = "BC-ERR-CACHE-003";
pub const BC_ERR_UNREAD: &str = "BC-ERR-UNREAD-004";
pub const BC_ERR_INPUT: &str = "BC-ERR-INPUT-005";
pub const BC_ERR_IO: &str = "BC-ERR-IO-006";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        BC_ERR_CYCLE => "Mandatory dependencies between binding expressions form no cycle.",
        BC_ERR_STALL => "Every scheduling batch makes progress until it is empty.",
        BC_ERR_CACHE => {
            "A cached flag layout is reused only when it matches the freshly allocated one."
        }
        BC_ERR_UNREAD => "Every expression that needs reading is read exactly once per pass.",
        BC_ERR_INPUT => "Every index in a binding graph refers to an existing entry.",
        BC_ERR_IO => "Generated sources are written completely or not at all.",
        _ => "Unknown invariant.",
    }
}

fn get_error_type(code: &str) -> &'static str {
    match code {
        BC_ERR_CYCLE | BC_ERR_STALL => "STRUCTURAL_ERROR",
        BC_ERR_CACHE => "CONSISTENCY_ERROR",
        BC_ERR_UNREAD => "UNREADABLE_EXPRESSION_ERROR",
        BC_ERR_INPUT => "INVALID_INPUT",
        _ => "IO_ERROR",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str) -> Self {
        Self::with_details(code, message, file, None, vec![])
    }

    /// Binding graphs carry no source positions; line and column stay at 1.
    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: get_error_type(code).to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line: 1,
            column: 1,
            context,
            hints,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExprKind {
    Identifier,
    FieldAccess,
    MethodCall,
    Ternary,
    Comparison,
    Symbol,
    #[default]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionInput {
    /// Index of the predicate expression.
    pub predicate: usize,
    pub branch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInput {
    pub expr: usize,
    #[serde(default)]
    pub conditional: Option<ConditionInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionInput {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub kind: ExprKind,
    pub code: String,
    #[serde(default)]
    pub children: Vec<usize>,
    /// Explicit edges. When absent they are derived from `children`.
    #[serde(default)]
    pub dependencies: Option<Vec<DependencyInput>>,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub observable: bool,
    #[serde(default)]
    pub variable: bool,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub bindable_properties: Vec<String>,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
}

fn default_min_api() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingInput {
    pub target: String,
    pub attribute: String,
    pub expr: usize,
    /// Values passed to a multi-value setter. Defaults to `[expr]`.
    #[serde(default)]
    pub components: Option<Vec<usize>>,
    pub setter: String,
    #[serde(default = "default_min_api")]
    pub min_api: u32,
    #[serde(default)]
    pub requires_old_value: bool,
}

impl BindingInput {
    pub fn component_indices(&self) -> Vec<usize> {
        self.components.clone().unwrap_or_else(|| vec![self.expr])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInput {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub expr: Option<usize>,
}

/// One compilation unit: the resolved binding graph of a single layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInput {
    pub layout: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub expressions: Vec<ExpressionInput>,
    #[serde(default)]
    pub bindings: Vec<BindingInput>,
    #[serde(default)]
    pub variables: Vec<VariableInput>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION FUNCTIONS (Return Option, not Result)
// ═══════════════════════════════════════════════════════════════════════════════

fn index_error(what: &str, index: usize, len: usize, file: &str) -> CompilerError {
    CompilerError::with_details(
        BC_ERR_INPUT,
        &format!("{} refers to expression {} but only {} exist.", what, index, len),
        file,
        None,
        vec!["Expression indices are zero-based positions in `expressions`.".to_string()],
    )
}

fn validate_expression_indices(graph: &GraphInput, file: &str) -> Option<CompilerError> {
    let len = graph.expressions.len();
    for (i, expr) in graph.expressions.iter().enumerate() {
        for child in &expr.children {
            if *child >= len {
                return Some(index_error(&format!("Child of expression {}", i), *child, len, file));
            }
        }
        for dep in expr.dependencies.iter().flatten() {
            if dep.expr >= len {
                return Some(index_error(
                    &format!("Dependency of expression {}", i),
                    dep.expr,
                    len,
                    file,
                ));
            }
            if let Some(cond) = &dep.conditional {
                if cond.predicate >= len {
                    return Some(index_error(
                        &format!("Condition of expression {}", i),
                        cond.predicate,
                        len,
                        file,
                    ));
                }
            }
        }
    }
    None
}

fn validate_ternaries(graph: &GraphInput, file: &str) -> Option<CompilerError> {
    for (i, expr) in graph.expressions.iter().enumerate() {
        let has_conditional = expr
            .dependencies
            .iter()
            .flatten()
            .any(|d| d.conditional.is_some());
        if expr.kind == ExprKind::Ternary && expr.children.len() != 3 {
            return Some(CompilerError::with_details(
                BC_ERR_INPUT,
                &format!(
                    "Ternary expression {} has {} children, expected 3.",
                    i,
                    expr.children.len()
                ),
                file,
                Some(expr.code.clone()),
                vec!["Children are [predicate, ifTrue, ifFalse].".to_string()],
            ));
        }
        if has_conditional && expr.kind != ExprKind::Ternary {
            return Some(CompilerError::with_details(
                BC_ERR_INPUT,
                &format!(
                    "Expression {} declares a conditional dependency but is not a ternary.",
                    i
                ),
                file,
                Some(expr.code.clone()),
                vec!["Only ternaries own requirement flags.".to_string()],
            ));
        }
        for dep in expr.dependencies.iter().flatten() {
            if let Some(cond) = &dep.conditional {
                if expr.children.first() != Some(&cond.predicate) {
                    return Some(CompilerError::with_details(
                        BC_ERR_INPUT,
                        &format!(
                            "Conditional dependency of expression {} is not gated by its predicate.",
                            i
                        ),
                        file,
                        Some(expr.code.clone()),
                        vec![],
                    ));
                }
            }
        }
    }
    None
}

fn validate_unique_keys(graph: &GraphInput, file: &str) -> Option<CompilerError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for expr in &graph.expressions {
        if let Some(key) = &expr.key {
            if !seen.insert(key.as_str()) {
                return Some(CompilerError::new(
                    BC_ERR_INPUT,
                    &format!("Duplicate expression key \"{}\".", key),
                    file,
                ));
            }
        }
    }
    None
}

fn validate_bindings(graph: &GraphInput, file: &str) -> Option<CompilerError> {
    let len = graph.expressions.len();
    for binding in &graph.bindings {
        for index in binding.component_indices().into_iter().chain([binding.expr]) {
            if index >= len {
                return Some(index_error(
                    &format!("Binding {}.{}", binding.target, binding.attribute),
                    index,
                    len,
                    file,
                ));
            }
        }
        if binding.target.is_empty() {
            return Some(CompilerError::new(
                BC_ERR_INPUT,
                &format!("Binding for \"{}\" has no target view.", binding.attribute),
                file,
            ));
        }
    }
    None
}

fn validate_variables(graph: &GraphInput, file: &str) -> Option<CompilerError> {
    let len = graph.expressions.len();
    let mut names: HashSet<&str> = HashSet::new();
    for variable in &graph.variables {
        if variable.name.is_empty() || !names.insert(variable.name.as_str()) {
            return Some(CompilerError::new(
                BC_ERR_INPUT,
                &format!("Variable name \"{}\" is empty or declared twice.", variable.name),
                file,
            ));
        }
        if let Some(index) = variable.expr {
            if index >= len {
                return Some(index_error(
                    &format!("Variable {}", variable.name),
                    index,
                    len,
                    file,
                ));
            }
        }
    }
    None
}

/// Structural checks on a graph before any model is built.
pub fn validate_graph(graph: &GraphInput, file: &str) -> Option<CompilerError> {
    if let Some(e) = validate_expression_indices(graph, file) {
        return Some(e);
    }

    if let Some(e) = validate_ternaries(graph, file) {
        return Some(e);
    }

    if let Some(e) = validate_unique_keys(graph, file) {
        return Some(e);
    }

    if let Some(e) = validate_bindings(graph, file) {
        return Some(e);
    }

    validate_variables(graph, file)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn validate_graph_native(graph_json: String) -> Option<CompilerError> {
    let graph: GraphInput = match serde_json::from_str(&graph_json) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Some(CompilerError::new(
                BC_ERR_INPUT,
                &format!("Failed to parse graph JSON: {}", e),
                "unknown",
            ));
        }
    };

    validate_graph(&graph, &graph.layout)
}
