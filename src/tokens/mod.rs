//! Token counting module
//!
//! Provides token estimation using tiktoken-rs.

pub mod counter;

pub use counter::SharedTokenCounter;
