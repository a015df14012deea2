//! Tracing configuration for the `binderc` tool.
//!
//! The subscriber is only installed when `BINDER_LOG` (or `RUST_LOG`) is set:
//!
//! ```bash
//! BINDER_LOG=debug binderc layouts/ --out gen/
//! BINDER_LOG="binder_compiler_native::scheduler=trace" binderc layouts/ --out gen/
//! BINDER_LOG=debug BINDER_LOG_FORMAT=compact binderc layouts/ --out gen/
//! ```

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Standard flat text lines (default).
    Text,
    /// One short line per event, without span context.
    Compact,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("BINDER_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "compact" => Self::Compact,
            _ => Self::Text,
        }
    }
}

/// `BINDER_LOG` wins over `RUST_LOG`; both use the `RUST_LOG` syntax.
fn build_filter() -> EnvFilter {
    if let Ok(val) = std::env::var("BINDER_LOG") {
        EnvFilter::builder().parse_lossy(val)
    } else {
        EnvFilter::from_default_env()
    }
}

/// Install the global subscriber, writing to stderr. Does nothing when no
/// log variable is set or a subscriber is already installed.
pub fn init_tracing() {
    let has_binder_log = std::env::var("BINDER_LOG").is_ok();
    let has_rust_log = std::env::var("RUST_LOG").is_ok();
    if !has_binder_log && !has_rust_log {
        return;
    }

    let filter = build_filter();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // try_init: a second call (tests, embedding) must not panic.
    let _ = match LogFormat::from_env() {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
