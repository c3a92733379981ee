//! Cache backends for Silo.
//!
//! The S3 backend reconstructs parallel range downloads into an ordered
//! byte stream through the block reassembly pipe; the in-memory LRU
//! backend serves tests and small deployments. Both implement the
//! [`Cache`](silo_core::Cache) contract.

pub mod keys;
pub mod memory;
pub mod pipe;
pub mod s3;

pub use memory::MemoryCache;
pub use s3::{S3Cache, S3Config};
