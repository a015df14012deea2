//! Discovery Module for the Binder Compiler
//!
//! Recursively scans a directory for `*.binding.json` units and compiles them
//! in parallel. Units share no mutable state, so results only need to be put
//! back in path order.

#[cfg(feature = "napi")]
use napi_derive::napi;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::GenerationError;
use crate::parse::{compile_layout_internal, CompileOptions, CompileResult};

pub const UNIT_SUFFIX: &str = ".binding.json";

/// Every unit under `dir`, sorted by path.
pub fn find_binding_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(UNIT_SUFFIX))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    debug!(dir = %dir.display(), units = files.len(), "discovered binding units");
    files
}

fn compile_file(path: &Path, options: &CompileOptions) -> CompileResult {
    let file = path.to_string_lossy().to_string();
    match fs::read_to_string(path) {
        Ok(source) => compile_layout_internal(&source, &file, options),
        Err(source) => CompileResult {
            file: file.clone(),
            layout: String::new(),
            package: String::new(),
            class_name: String::new(),
            source: None,
            properties: vec![],
            flag_mapping: vec![],
            errors: vec![GenerationError::Io {
                path: file.clone(),
                source,
            }
            .into_compiler_error(&file)],
        },
    }
}

/// Compile every unit under `dir`. The result order is the path order.
pub fn compile_directory(dir: &Path, options: &CompileOptions) -> Vec<CompileResult> {
    let files = find_binding_files(dir);
    files
        .par_iter()
        .map(|path| compile_file(path, options))
        .collect()
}

#[cfg(feature = "napi")]
#[napi]
pub fn discover_bindings_native(base_dir: String) -> Vec<String> {
    find_binding_files(Path::new(&base_dir))
        .into_iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect()
}
