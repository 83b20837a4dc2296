//! Core abstractions shared by every pipeline stage.
//!
//! - [`identifier`]: allow-list validation and quoting of SQL identifiers
//! - [`traits`]: session traits the stages execute against
//!
//! Stages are written against [`traits::SqlSession`] and
//! [`traits::CatalogSession`] so the pipeline can be driven by pooled
//! tiberius connections in production and by recording fakes in tests.

pub mod identifier;
pub mod traits;

pub use traits::{CatalogSession, SessionFactory, SqlSession};
