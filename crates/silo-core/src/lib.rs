//! Silo Core
//!
//! Shared vocabulary for the Silo build cache: the error taxonomy, the
//! operation context carrying cancellation and deadlines, and the cache
//! contract implemented by every backend. This crate has minimal
//! dependencies and is consumed by all other crates.

pub mod cache;
pub mod context;
pub mod error;

pub use cache::{Cache, ObjectReader};
pub use context::OpContext;
pub use error::{Error, Result};
