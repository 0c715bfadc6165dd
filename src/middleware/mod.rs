//! Middleware module
//!
//! Contains Tower middleware for API-token and admin authentication.

pub mod auth;
