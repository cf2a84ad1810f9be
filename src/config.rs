//! Process configuration from `SIGNING_AGENT_*` environment variables.
//!
//! Optional settings fall back to their defaults when unset or unparsable.
//! Identity, secret and endpoint URLs have no default.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::approver::RetryConfig;
use crate::dedup::DedupConfig;
use crate::hub::ReconnectConfig;
use crate::server::FeedClientConfig;
use crate::types::AgentId;

const DEFAULT_HTTP_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 8007);
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Errors loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A required variable is set but unusable.
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Complete agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub http_addr: SocketAddr,
    pub agent_id: AgentId,
    /// HMAC key, decoded from hex.
    pub secret: Vec<u8>,
    pub custody_api_url: String,
    pub feed_url: String,
    pub reconnect: ReconnectConfig,
    pub feed_client: FeedClientConfig,
    pub auto_approve: bool,
    pub retry: RetryConfig,
    pub load_balancing: bool,
    pub dedup: DedupConfig,
    pub redis_url: String,
}

impl AgentConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let secret_hex = env.required("SIGNING_AGENT_SECRET")?;
        let secret = hex::decode(secret_hex.trim()).map_err(|e| ConfigError::Invalid {
            var: "SIGNING_AGENT_SECRET",
            reason: e.to_string(),
        })?;
        if secret.is_empty() {
            return Err(ConfigError::Missing("SIGNING_AGENT_SECRET"));
        }

        Ok(AgentConfig {
            http_addr: env.parsed("SIGNING_AGENT_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            agent_id: AgentId::new(env.required("SIGNING_AGENT_AGENT_ID")?),
            secret,
            custody_api_url: env.required("SIGNING_AGENT_CUSTODY_API_URL")?,
            feed_url: env.required("SIGNING_AGENT_FEED_URL")?,
            reconnect: ReconnectConfig {
                timeout: env.secs("SIGNING_AGENT_RECONNECT_TIMEOUT_SECS", 300),
                interval: env.secs("SIGNING_AGENT_RECONNECT_INTERVAL_SECS", 5),
            },
            feed_client: FeedClientConfig {
                ping_period: env.secs("SIGNING_AGENT_PING_PERIOD_SECS", 5),
                write_wait: env.secs("SIGNING_AGENT_WRITE_WAIT_SECS", 10),
            },
            auto_approve: env.parsed("SIGNING_AGENT_AUTO_APPROVE", false),
            retry: RetryConfig {
                base: env.secs("SIGNING_AGENT_APPROVE_RETRY_INTERVAL_SECS", 5),
                max_elapsed: env.secs("SIGNING_AGENT_APPROVE_RETRY_MAX_SECS", 300),
            },
            load_balancing: env.parsed("SIGNING_AGENT_LOAD_BALANCING", false),
            dedup: DedupConfig {
                lock_error_delay: Duration::from_millis(
                    env.parsed("SIGNING_AGENT_LOCK_ERROR_DELAY_MS", 300),
                ),
                action_ttl: env.secs("SIGNING_AGENT_ACTION_ID_TTL_SECS", 6),
            },
            redis_url: env
                .get("SIGNING_AGENT_REDIS_URL")
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.parsed(key, default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("SIGNING_AGENT_AGENT_ID", "agent-1"),
        ("SIGNING_AGENT_SECRET", "00ff10"),
        ("SIGNING_AGENT_CUSTODY_API_URL", "https://custody.example/api"),
        ("SIGNING_AGENT_FEED_URL", "wss://custody.example/feed"),
    ];

    fn with_required(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        REQUIRED.iter().chain(extra).copied().collect()
    }

    // ─── Defaults ───

    #[test]
    fn defaults_apply_when_optional_vars_unset() {
        let config = AgentConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:8007".parse().unwrap());
        assert_eq!(config.agent_id, AgentId::new("agent-1"));
        assert_eq!(config.secret, vec![0x00, 0xff, 0x10]);
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.feed_client, FeedClientConfig::default());
        assert!(!config.auto_approve);
        assert_eq!(config.retry, RetryConfig::DEFAULT);
        assert!(!config.load_balancing);
        assert_eq!(config.dedup, DedupConfig::default());
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
    }

    #[test]
    fn overrides_are_read() {
        let vars = with_required(&[
            ("SIGNING_AGENT_HTTP_ADDR", "0.0.0.0:9000"),
            ("SIGNING_AGENT_RECONNECT_TIMEOUT_SECS", "60"),
            ("SIGNING_AGENT_AUTO_APPROVE", "true"),
            ("SIGNING_AGENT_LOAD_BALANCING", "true"),
            ("SIGNING_AGENT_LOCK_ERROR_DELAY_MS", "50"),
            ("SIGNING_AGENT_REDIS_URL", "redis://cache:6379/2"),
        ]);

        let config = AgentConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.reconnect.timeout, Duration::from_secs(60));
        assert!(config.auto_approve);
        assert!(config.load_balancing);
        assert_eq!(config.dedup.lock_error_delay, Duration::from_millis(50));
        assert_eq!(config.redis_url, "redis://cache:6379/2");
    }

    #[test]
    fn unparsable_optional_value_falls_back() {
        let vars = with_required(&[
            ("SIGNING_AGENT_PING_PERIOD_SECS", "often"),
            ("SIGNING_AGENT_AUTO_APPROVE", "yes please"),
        ]);

        let config = AgentConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.feed_client.ping_period, Duration::from_secs(5));
        assert!(!config.auto_approve);
    }

    // ─── Required values ───

    #[test]
    fn each_required_var_is_enforced() {
        for (missing, _) in REQUIRED {
            let vars: Vec<_> = REQUIRED.iter().filter(|(k, _)| *k != missing).copied().collect();

            let err = AgentConfig::from_lookup(lookup(&vars)).unwrap_err();

            assert_eq!(err, ConfigError::Missing(missing));
        }
    }

    #[test]
    fn blank_required_var_counts_as_missing() {
        let vars: Vec<_> = REQUIRED
            .iter()
            .map(|&(k, v)| if k == "SIGNING_AGENT_AGENT_ID" { (k, "  ") } else { (k, v) })
            .collect();

        let err = AgentConfig::from_lookup(lookup(&vars)).unwrap_err();

        assert_eq!(err, ConfigError::Missing("SIGNING_AGENT_AGENT_ID"));
    }

    #[test]
    fn non_hex_secret_is_invalid() {
        let vars: Vec<_> = REQUIRED
            .iter()
            .map(|&(k, v)| if k == "SIGNING_AGENT_SECRET" { (k, "not-hex") } else { (k, v) })
            .collect();

        let err = AgentConfig::from_lookup(lookup(&vars)).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "SIGNING_AGENT_SECRET",
                ..
            }
        ));
    }
}
