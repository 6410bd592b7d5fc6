//! Utility modules for the LiverySync monitor.
//!
//! # Modules
//!
//! - [`debounce`]: Keyed event debouncing with cancellation

pub mod debounce;

pub use debounce::{Debouncer, DebouncerError, DEFAULT_DEBOUNCE_MS};
