//! Core engine: the session polling loop and the order executor.

pub mod executor;
pub mod session;
