//! Testing utilities for update set development

#[cfg(feature = "sqlite")]
pub mod sqlite;
