//! Process-wide logging setup shared by the binaries.

/// Tracing/logging initialization.
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize JSON logging with an `info` default filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json, "info");
}
