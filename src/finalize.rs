//! Finalize Module for the Binder Compiler
//!
//! Collects per-unit results into the final output: one source per binder,
//! the merged `BR` table, and every diagnostic.

#[cfg(feature = "napi")]
use napi_derive::napi;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::br::PropertyTable;
use crate::error::{GenerationError, Result};
use crate::parse::{CompileOptions, CompileResult};

lazy_static! {
    static ref LEFTOVER_PLACEHOLDER_RE: Regex = Regex::new(r"\{(old)?\d+\}|\{target\}").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSource {
    /// Path relative to the output root, e.g. `com/example/MainBindingImpl.java`.
    pub path: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct FinalizedOutput {
    pub sources: Vec<GeneratedSource>,
    pub has_errors: bool,
    pub errors: Vec<String>,
}

fn source_path(package: &str, class_name: &str) -> String {
    if package.is_empty() {
        format!("{}.java", class_name)
    } else {
        format!("{}/{}.java", package.replace('.', "/"), class_name)
    }
}

/// Setter templates that referenced a component the binding does not have
/// leave their placeholder behind.
fn verify_no_placeholders(code: &str, file: &str) -> Vec<String> {
    let leftovers: Vec<&str> = LEFTOVER_PLACEHOLDER_RE
        .find_iter(code)
        .map(|m| m.as_str())
        .collect();
    if leftovers.is_empty() {
        return vec![];
    }
    vec![format!(
        "generated code still contains placeholders: {}\nFile: {}",
        leftovers.join(", "),
        file
    )]
}

/// Merge unit results. The `BR` class goes to `br_package`.
pub fn finalize_output(
    results: &[CompileResult],
    br_package: &str,
    options: &CompileOptions,
) -> FinalizedOutput {
    let mut sources = Vec::new();
    let mut errors = Vec::new();
    let mut tables = Vec::new();

    for result in results {
        for e in &result.errors {
            errors.push(format!("[{}] {}: {}", e.code, e.file, e.message));
        }
        let Some(code) = &result.source else {
            continue;
        };
        let leftovers = verify_no_placeholders(code, &result.file);
        if !leftovers.is_empty() {
            errors.extend(leftovers);
            continue;
        }
        tables.push(PropertyTable::from_names(result.properties.iter().cloned()));
        sources.push(GeneratedSource {
            path: source_path(&result.package, &result.class_name),
            code: code.clone(),
        });
    }

    let merged = PropertyTable::merge(tables.iter());
    sources.push(GeneratedSource {
        path: source_path(br_package, &options.property_table_class),
        code: merged.render(br_package, &options.property_table_class),
    });

    FinalizedOutput {
        has_errors: !errors.is_empty(),
        sources,
        errors,
    }
}

/// Write every source under `out_dir`. Each file is written to a temporary
/// sibling first and then renamed into place.
pub fn write_output(output: &FinalizedOutput, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let io_error = |path: &Path, source: std::io::Error| GenerationError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut written = Vec::new();
    for source in &output.sources {
        let path = out_dir.join(&source.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let staging = path.with_extension("java.tmp");
        fs::write(&staging, &source.code).map_err(|e| io_error(&staging, e))?;
        fs::rename(&staging, &path).map_err(|e| io_error(&path, e))?;
        written.push(path);
    }
    info!(files = written.len(), dir = %out_dir.display(), "generated sources written");
    Ok(written)
}

#[cfg(feature = "napi")]
#[napi]
pub fn generate_binder_native(
    graph_json: String,
    file_path: String,
    options_json: Option<String>,
) -> napi::Result<FinalizedOutput> {
    let options: CompileOptions = match options_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| napi::Error::from_reason(format!("Invalid options: {}", e)))?,
        None => CompileOptions::default(),
    };
    let result = crate::parse::compile_layout_internal(&graph_json, &file_path, &options);
    let package = result.package.clone();
    Ok(finalize_output(&[result], &package, &options))
}
