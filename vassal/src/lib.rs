//! Vassal - local in-memory SQS emulator
//!
//! Vassal speaks the SQS HTTP/XML query protocol against a single process
//! that keeps all queue and message state in RAM, for development and CI
//! pipelines where a real SQS endpoint is unavailable.

pub mod config;
pub mod router;

pub use config::Config;
pub use router::router;
