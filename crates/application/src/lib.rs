//! Ferrous Gate Application Layer
//!
//! Ports the transports and the cache plug into, plus the use cases that
//! turn a parsed query into an answer.
pub mod message;
pub mod ports;
pub mod use_cases;
