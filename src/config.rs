//! Configuration management for Relaygate
//!
//! Configuration is loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Redis connection URL (sticky sessions and token cache)
    pub redis_url: String,
    /// Whether sticky-session affinity is active
    pub sticky_sessions_enabled: bool,

    /// Control plane base URL (channels, tokens, quota)
    pub control_plane_url: String,
    /// Control plane API key
    pub control_plane_api_key: String,
    /// Bearer key for the admin routes; admin routes are hidden when unset
    pub admin_api_key: Option<String>,

    /// Maximum retries after the first failed attempt
    pub retry_times: u32,
    /// Wall-clock ceiling for the whole retry sequence (seconds)
    pub retry_timeout_seconds: u64,
    /// Default cooldown after a rate-limited attempt (seconds)
    pub retry_cooldown_seconds: i64,

    /// Weight given to channels configured with weight 0
    pub default_channel_weight: u32,
    /// Case-insensitive model name matching
    pub model_name_case_insensitive: bool,

    /// Periodic channel reload interval (seconds, 0 disables)
    pub channel_sync_seconds: u64,
    /// Cooldown sweep interval (seconds)
    pub cooldown_sweep_seconds: u64,

    /// TTL of sticky-session mappings (seconds)
    pub sticky_session_ttl_seconds: u64,
    /// Per-call timeout against the sticky-session store (milliseconds)
    pub sticky_store_timeout_ms: u64,

    /// Whether failed attempts may auto-disable channels
    pub auto_disable_enabled: bool,
    /// Consecutive auth failures before a channel is disabled
    pub auto_disable_auth_failures: u32,

    /// Cache TTL for resolved API tokens (seconds)
    pub token_cache_ttl_seconds: u64,

    /// Enable debug logging of raw upstream errors
    pub debug_enabled: bool,
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

fn flag_var(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("RELAY_PORT", "8080")?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            sticky_sessions_enabled: flag_var("STICKY_SESSIONS_ENABLED", true),

            control_plane_url: env::var("CONTROL_PLANE_URL")
                .context("CONTROL_PLANE_URL must be set")?,
            control_plane_api_key: env::var("CONTROL_PLANE_API_KEY")
                .context("CONTROL_PLANE_API_KEY must be set")?,
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),

            retry_times: parse_var("RETRY_TIMES", "3")?,
            retry_timeout_seconds: parse_var("RETRY_TIMEOUT_SECONDS", "30")?,
            retry_cooldown_seconds: parse_var("RETRY_COOLDOWN_SECONDS", "60")?,

            default_channel_weight: parse_var::<u32>("DEFAULT_CHANNEL_WEIGHT", "1")?.max(1),
            model_name_case_insensitive: flag_var("MODEL_NAME_CASE_INSENSITIVE", false),

            channel_sync_seconds: parse_var("CHANNEL_SYNC_SECONDS", "0")?,
            cooldown_sweep_seconds: parse_var("COOLDOWN_SWEEP_SECONDS", "3600")?,

            sticky_session_ttl_seconds: parse_var("STICKY_SESSION_TTL_SECONDS", "3600")?,
            sticky_store_timeout_ms: parse_var("STICKY_STORE_TIMEOUT_MS", "200")?,

            auto_disable_enabled: flag_var("AUTO_DISABLE_ENABLED", true),
            auto_disable_auth_failures: parse_var("AUTO_DISABLE_AUTH_FAILURES", "3")?,

            token_cache_ttl_seconds: parse_var("TOKEN_CACHE_TTL_SECONDS", "300")?,

            debug_enabled: flag_var("RELAY_DEBUG", false),
        })
    }

    /// Retry orchestration settings
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.retry_times,
            timeout: Duration::from_secs(self.retry_timeout_seconds),
            log_raw_errors: self.debug_enabled,
        }
    }

    /// Routing table settings
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            default_weight: self.default_channel_weight.max(1),
            case_insensitive: self.model_name_case_insensitive,
        }
    }

    /// Sticky-session store settings
    pub fn sticky_options(&self) -> StickyOptions {
        StickyOptions {
            enabled: self.sticky_sessions_enabled,
            ttl_seconds: self.sticky_session_ttl_seconds,
            call_timeout: Duration::from_millis(self.sticky_store_timeout_ms),
        }
    }

    /// Auto-disable policy settings
    pub fn disable_policy_options(&self) -> DisablePolicyOptions {
        DisablePolicyOptions {
            enabled: self.auto_disable_enabled,
            auth_failure_threshold: self.auto_disable_auth_failures.max(1),
        }
    }
}

/// Bounds for one request's retry sequence
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Configured retry ceiling (further bounded by available channels)
    pub max_retries: u32,
    /// Wall-clock ceiling measured from request start
    pub timeout: Duration,
    /// Log upstream errors before sanitisation
    pub log_raw_errors: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            log_raw_errors: false,
        }
    }
}

/// Settings applied when the routing table is rebuilt
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Effective weight of channels configured with weight 0
    pub default_weight: u32,
    /// Fall back to case-insensitive model matching
    pub case_insensitive: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            default_weight: 1,
            case_insensitive: false,
        }
    }
}

/// Sticky-session store settings
#[derive(Debug, Clone)]
pub struct StickyOptions {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub call_timeout: Duration,
}

impl Default for StickyOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3600,
            call_timeout: Duration::from_millis(200),
        }
    }
}

/// Auto-disable policy settings
#[derive(Debug, Clone)]
pub struct DisablePolicyOptions {
    pub enabled: bool,
    pub auth_failure_threshold: u32,
}

impl Default for DisablePolicyOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_failure_threshold: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        // Set required env vars
        env::set_var("CONTROL_PLANE_URL", "http://localhost:3000");
        env::set_var("CONTROL_PLANE_API_KEY", "test-key");

        let config = Config::from_env().unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.retry_times, 3);
        assert_eq!(config.retry_cooldown_seconds, 60);
        assert_eq!(config.default_channel_weight, 1);
        assert_eq!(config.cooldown_sweep_seconds, 3600);
        assert!(config.sticky_sessions_enabled);

        let retry = config.retry_options();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.timeout, Duration::from_secs(30));

        // Clean up
        env::remove_var("CONTROL_PLANE_URL");
        env::remove_var("CONTROL_PLANE_API_KEY");
    }
}
