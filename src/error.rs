//! Generation errors.
//!
//! Every fault is fatal for its compilation unit. `GenerationError` is what
//! the pipeline propagates with `?`; `into_compiler_error` turns it into the
//! diagnostic record handed to callers.

use crate::validate::{
    CompilerError, BC_ERR_CACHE, BC_ERR_CYCLE, BC_ERR_INPUT, BC_ERR_IO, BC_ERR_STALL,
    BC_ERR_UNREAD,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Mandatory dependencies loop back on themselves.
    #[error("circular dependency between expressions: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A batch still had members but none of them could be read.
    #[error("cannot make progress reading {} expression(s): {}", pending.len(), pending.join(", "))]
    NoProgress {
        pending: Vec<String>,
        partial_code: String,
    },

    #[error("flag layout for `{layout}` does not match the cached layout: {detail}")]
    Consistency { layout: String, detail: String },

    /// Expressions left unread after the scheduler reached its fixpoint.
    #[error("expression(s) left unread after scheduling: {}", unread.join(", "))]
    Unreadable {
        unread: Vec<String>,
        partial_code: String,
    },

    #[error("invalid binding graph: {0}")]
    InvalidInput(String),

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenerationError {
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::Cycle { .. } => BC_ERR_CYCLE,
            GenerationError::NoProgress { .. } => BC_ERR_STALL,
            GenerationError::Consistency { .. } => BC_ERR_CACHE,
            GenerationError::Unreadable { .. } => BC_ERR_UNREAD,
            GenerationError::InvalidInput(_) | GenerationError::Json(_) => BC_ERR_INPUT,
            GenerationError::Io { .. } => BC_ERR_IO,
        }
    }

    pub fn into_compiler_error(self, file: &str) -> CompilerError {
        let code = self.code();
        let message = self.to_string();
        let (context, hints) = match self {
            GenerationError::Cycle { path } => (
                Some(path.join(" -> ")),
                vec!["Break the loop by removing one of the listed references.".to_string()],
            ),
            GenerationError::NoProgress { partial_code, .. }
            | GenerationError::Unreadable { partial_code, .. } => (
                Some(partial_code),
                vec!["This usually means the graph has a circular dependency.".to_string()],
            ),
            GenerationError::Consistency { .. } => (
                None,
                vec!["Delete the cache directory and rebuild.".to_string()],
            ),
            _ => (None, vec![]),
        };
        CompilerError::with_details(code, &message, file, context, hints)
    }
}

impl From<CompilerError> for GenerationError {
    fn from(e: CompilerError) -> Self {
        GenerationError::InvalidInput(e.message)
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_maps_to_structural_code() {
        let err = GenerationError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency between expressions: a -> b -> a");
        let diag = err.into_compiler_error("main.binding.json");
        assert_eq!(diag.code, BC_ERR_CYCLE);
        assert_eq!(diag.error_type, "STRUCTURAL_ERROR");
        assert_eq!(diag.context.as_deref(), Some("a -> b -> a"));
    }

    #[test]
    fn unreadable_keeps_partial_code() {
        let err = GenerationError::Unreadable {
            unread: vec!["user.name".into()],
            partial_code: "if ((dirtyFlags & 0x1L) != 0) {".into(),
        };
        let diag = err.into_compiler_error("f");
        assert_eq!(diag.code, BC_ERR_UNREAD);
        assert_eq!(diag.context.as_deref(), Some("if ((dirtyFlags & 0x1L) != 0) {"));
    }
}
