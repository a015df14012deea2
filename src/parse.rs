//! Parse Module for the Binder Compiler
//!
//! Entry point for one compilation unit: JSON text in, binder source out.
//! The pipeline is validate, build the model, allocate flags, compute the
//! flag tables, schedule, check the cache, and emit.

#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::allocator::{allocate_layout, FlagLayout};
use crate::br::PropertyTable;
use crate::cache::IncrementalCache;
use crate::codegen::{binder_class_name, emit_binder};
use crate::error::Result;
use crate::flags::FlagTables;
use crate::model::ExprModel;
use crate::plan::UpdatePlan;
use crate::scheduler::schedule;
use crate::validate::{CompilerError, GraphInput};

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS AND RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

fn default_min_api() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_base_class() -> String {
    "androidx.databinding.ViewDataBinding".to_string()
}

fn default_property_table() -> String {
    "BR".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    /// Lowest platform level the host app supports. Setters that need no
    /// more than this are emitted without a runtime check.
    #[serde(default = "default_min_api")]
    pub min_api: u32,
    #[serde(default = "default_true")]
    pub emit_flag_mapping: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_base_class")]
    pub binding_base_class: String,
    #[serde(default = "default_property_table")]
    pub property_table_class: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            min_api: default_min_api(),
            emit_flag_mapping: true,
            cache_dir: None,
            binding_base_class: default_base_class(),
            property_table_class: default_property_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub file: String,
    pub layout: String,
    pub package: String,
    pub class_name: String,
    /// Generated binder source; `None` when the unit failed.
    pub source: Option<String>,
    /// Property names the unit contributes to the shared `BR` table.
    pub properties: Vec<String>,
    pub flag_mapping: Vec<String>,
    pub errors: Vec<CompilerError>,
}

/// Everything produced for one unit, kept for callers that want more than
/// the source text.
#[derive(Debug)]
pub struct CompiledUnit {
    pub model: ExprModel,
    pub layout: FlagLayout,
    pub tables: FlagTables,
    pub plan: UpdatePlan,
    pub properties: PropertyTable,
    pub source: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

pub fn compile_graph(graph: &GraphInput, options: &CompileOptions) -> Result<CompiledUnit> {
    let model = ExprModel::build(graph)?;
    let layout = allocate_layout(&model);
    let tables = FlagTables::compute(&model, &layout)?;
    let plan = schedule(&model, &layout, &tables)?;
    let source = emit_binder(&model, &layout, &plan, options)?;
    let properties = PropertyTable::for_model(&model);
    debug!(
        layout = %model.layout,
        reads = plan.reads().len(),
        batches = plan.batch_count(),
        "unit compiled"
    );
    Ok(CompiledUnit {
        model,
        layout,
        tables,
        plan,
        properties,
        source,
    })
}

/// Compile one unit, checking the flag layout against the cache first when
/// a cache directory is configured.
pub fn compile_source(source: &str, file: &str, options: &CompileOptions) -> Result<CompiledUnit> {
    let graph: GraphInput = serde_json::from_str(source)?;
    let unit = compile_graph(&graph, options)?;
    if let Some(dir) = &options.cache_dir {
        let cache = IncrementalCache::new(dir)?;
        let snapshot = unit.layout.snapshot();
        cache.verify(file, source, &graph.layout, &snapshot)?;
        if let Err(e) = cache.set(file, source, &snapshot) {
            warn!(file, error = %e, "could not update layout cache");
        }
    }
    Ok(unit)
}

pub fn compile_layout_internal(source: &str, file: &str, options: &CompileOptions) -> CompileResult {
    match compile_source(source, file, options) {
        Ok(unit) => CompileResult {
            file: file.to_string(),
            layout: unit.model.layout.clone(),
            package: unit.model.package.clone(),
            class_name: unit
                .model
                .class_name
                .clone()
                .unwrap_or_else(|| binder_class_name(&unit.model.layout)),
            properties: unit.properties.entries().skip(1).map(|(n, _)| n.to_string()).collect(),
            flag_mapping: unit.layout.mapping.clone(),
            source: Some(unit.source),
            errors: vec![],
        },
        Err(e) => CompileResult {
            file: file.to_string(),
            layout: String::new(),
            package: String::new(),
            class_name: String::new(),
            source: None,
            properties: vec![],
            flag_mapping: vec![],
            errors: vec![e.into_compiler_error(file)],
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn compile_layout_native(
    source: String,
    file_path: String,
    options_json: Option<String>,
) -> napi::Result<CompileResult> {
    let options = match options_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| napi::Error::from_reason(e.to_string()))?,
        None => CompileOptions::default(),
    };
    Ok(compile_layout_internal(&source, &file_path, &options))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"{
        "layout": "activity_main",
        "package": "com.example",
        "expressions": [
            { "kind": "fieldAccess", "code": "{0}.name", "children": [1], "type": "java.lang.String",
              "bindableProperties": ["name"] },
            { "kind": "identifier", "code": "user", "variable": true, "observable": true,
              "nullable": true, "type": "com.example.User" }
        ],
        "bindings": [
            { "target": "label", "attribute": "android:text", "expr": 0,
              "setter": "{target}.setText({0})" }
        ],
        "variables": [ { "name": "user", "type": "com.example.User", "expr": 1 } ]
    }"#;

    #[test]
    fn options_default_from_empty_json() {
        let options: CompileOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.min_api, 1);
        assert!(options.emit_flag_mapping);
        assert_eq!(options.property_table_class, "BR");
    }

    #[test]
    fn compiles_a_unit_end_to_end() {
        let result = compile_layout_internal(SIMPLE, "activity_main.binding.json", &CompileOptions::default());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.class_name, "ActivityMainBindingImpl");
        assert_eq!(result.properties, vec!["name", "user"]);
        assert_eq!(result.flag_mapping, vec!["_all", "user", "user.name"]);
        let source = result.source.unwrap();
        assert!(source.contains("public class ActivityMainBindingImpl extends androidx.databinding.ViewDataBinding {"));
        assert!(source.contains("this.label.setText(userName);"));
    }

    #[test]
    fn malformed_json_is_an_input_error() {
        let result = compile_layout_internal("{", "broken.binding.json", &CompileOptions::default());
        assert!(result.source.is_none());
        assert_eq!(result.errors[0].code, crate::validate::BC_ERR_INPUT);
    }
}
