//! Process-wide tracing setup shared by the ledger binaries.

/// Initialize process-wide tracing.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing with an explicit fallback filter (used when `RUST_LOG`
/// is unset).
pub fn init_with_default(default_filter: &str) {
    tracing::init_with_default(default_filter);
}

/// Subscriber configuration (filters, JSON formatting).
pub mod tracing;
