//! Common types, protocol definitions, and errors shared across `interlock` crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
