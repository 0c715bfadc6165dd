//! Integration tests for the Relaygate gateway
//!
//! Each test runs the full router against a mock control plane and mock
//! OpenAI-compatible upstreams.

mod admin;
mod disable;
mod health;
mod relay;
mod sticky;
