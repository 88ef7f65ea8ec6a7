//! # taskcal-core
//!
//! Core types, traits, and validation rules for the taskcal data-access layer.
//!
//! This crate has no storage code. It defines the entities, the request and
//! filter types, the typed [`Error`], the [`AuthContext`] threaded through every
//! call, the [`EntityService`] contract, and the pure rules (validation,
//! recurrence shape, interval overlap) the storage layer applies.

pub mod context;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod recurrence;
pub mod schedule;
pub mod traits;
pub mod validation;

// Re-export commonly used types at crate root
pub use context::AuthContext;
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use schedule::{detect_conflicts, validate_event_interval, TimeInterval};
pub use traits::*;
