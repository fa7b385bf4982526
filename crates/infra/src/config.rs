//! Process configuration, read from environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::catalog::DeletePolicy;
use crate::workers::{ConsumerConfig, MAX_POLL_TIMEOUT};

const DEFAULT_POLL_TIMEOUT_MS: u64 = 500;
const DEFAULT_REDELIVERY_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    /// PostgreSQL connection URL (item store).
    pub database_url: String,
    /// Redis URL, shared by the category cache and the stream broker.
    pub redis_url: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub poll_timeout: Duration,
    /// How often unacked stream entries are re-read while new entries keep arriving.
    pub redelivery_interval: Duration,
    pub delete_policy: DeletePolicy,
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let poll_timeout = match get("CONSUMER_POLL_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = parse(&raw, "CONSUMER_POLL_TIMEOUT_MS")?;
                Duration::from_millis(ms).clamp(Duration::from_millis(1), MAX_POLL_TIMEOUT)
            }
            None => Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        };

        let redelivery_ms = match get("CONSUMER_REDELIVERY_INTERVAL_MS") {
            Some(raw) => parse(&raw, "CONSUMER_REDELIVERY_INTERVAL_MS")?,
            None => DEFAULT_REDELIVERY_INTERVAL_MS,
        };

        let delete_policy = match get("CATEGORY_DELETE_POLICY") {
            Some(raw) => raw.parse::<DeletePolicy>().map_err(|e| ConfigError::Invalid {
                name: "CATEGORY_DELETE_POLICY",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DeletePolicy::default(),
        };

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            redis_url: require("REDIS_URL")?,
            consumer_group: get("CONSUMER_GROUP").unwrap_or_else(|| "catalog".to_string()),
            consumer_name: get("CONSUMER_NAME").unwrap_or_else(|| "catalog-worker".to_string()),
            poll_timeout,
            redelivery_interval: Duration::from_millis(redelivery_ms),
            delete_policy,
        })
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig::default()
            .with_name(self.consumer_name.clone())
            .with_poll_timeout(self.poll_timeout)
    }
}

fn parse<T>(raw: &str, name: &'static str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<CatalogConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        CatalogConfig::from_lookup(|name| vars.get(name).cloned())
    }

    const BASE: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/catalog"),
        ("REDIS_URL", "redis://localhost:6379"),
    ];

    #[test]
    fn defaults_apply_when_only_urls_are_set() {
        let config = load(&BASE).unwrap();
        assert_eq!(config.consumer_group, "catalog");
        assert_eq!(config.poll_timeout, Duration::from_millis(500));
        assert_eq!(config.redelivery_interval, Duration::from_secs(5));
        assert_eq!(config.delete_policy, DeletePolicy::Orphan);
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = load(&[("REDIS_URL", "redis://x")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));

        let err = load(&[("DATABASE_URL", ""), ("REDIS_URL", "redis://x")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn poll_timeout_is_clamped_below_one_second() {
        let mut vars = BASE.to_vec();
        vars.push(("CONSUMER_POLL_TIMEOUT_MS", "5000"));
        let config = load(&vars).unwrap();
        assert!(config.poll_timeout < Duration::from_secs(1));
        assert_eq!(config.consumer().poll_timeout, config.poll_timeout);
    }

    #[test]
    fn optional_knobs_are_parsed() {
        let mut vars = BASE.to_vec();
        vars.push(("CONSUMER_REDELIVERY_INTERVAL_MS", "250"));
        vars.push(("CATEGORY_DELETE_POLICY", "reject-with-children"));
        let config = load(&vars).unwrap();
        assert_eq!(config.redelivery_interval, Duration::from_millis(250));
        assert_eq!(config.delete_policy, DeletePolicy::RejectWithChildren);

        let mut vars = BASE.to_vec();
        vars.push(("CONSUMER_REDELIVERY_INTERVAL_MS", "soon"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { name: "CONSUMER_REDELIVERY_INTERVAL_MS", .. }
        ));
    }
}
