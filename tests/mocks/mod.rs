//! Mock infrastructure for testing external services
//!
//! - Control plane (channels, tokens, quota)
//! - OpenAI-compatible upstream providers

pub mod control_plane;
pub mod upstream;

pub use control_plane::MockControlPlane;
pub use upstream::MockUpstream;
