//! Core types for Vassal
//!
//! This crate provides the SQS error taxonomy and request-id handling shared
//! by the queue runtime and the server binary.

pub mod error;
pub mod request_id;

pub use error::SqsError;
pub use request_id::RequestId;
