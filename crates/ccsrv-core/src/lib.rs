//! ccsrv Core - Shared types for control-channel modules
//!
//! This crate provides the small set of domain types shared between
//! the wire protocol (`ccsrv-protocol`) and the server framework
//! (`ccsrv-server`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod answer;
pub mod error;
pub mod module;

// Re-exports for convenience
pub use answer::{Answer, STATUS_FAILURE, STATUS_SUCCESS};
pub use error::{CoreError, CoreResult};
pub use module::ModuleName;
