//! Control plane integration
//!
//! The control plane owns channel records, API tokens and quota.

pub mod client;
pub mod models;

pub use client::ControlPlaneClient;
pub use models::TokenInfo;
