//! Logging infrastructure for scheduler observability.
//!
//! Events go through `tracing` with the target `"baler"` and an `event`
//! field carrying a snake_case event name for filtering.
//!
//! The crate never initializes a global subscriber; applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! Conventions:
//! - `event`: snake_case event name (required)
//! - Use `%` for Display, `?` for Debug formatting
//! - Avoid high-cardinality fields without sampling

/// Target for all log events emitted by this crate.
pub(crate) const BALER_TARGET: &str = "baler";

/// Macro for info-level log events.
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::BALER_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::BALER_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::BALER_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::BALER_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
