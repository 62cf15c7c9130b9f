//! Startup configuration, read from `TOOLTRACK_*` environment variables.
//!
//! | Variable                 | Default                 |
//! |--------------------------|-------------------------|
//! | `TOOLTRACK_DB_URL`       | `ws://127.0.0.1:8000`   |
//! | `TOOLTRACK_DB_NAMESPACE` | `tooltrack`             |
//! | `TOOLTRACK_DB_DATABASE`  | `main`                  |
//! | `TOOLTRACK_DB_USER`      | `root`                  |
//! | `TOOLTRACK_DB_PASSWORD`  | `root`                  |
//! | `TOOLTRACK_LOG_JSON`     | `false`                 |

use std::env;

use anyhow::{Context, Result, bail};
use tooltrack_db::DbConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = DbConfig::default();
        let var = |key: &str, default: String| lookup(key).unwrap_or(default);

        let log_json = match lookup("TOOLTRACK_LOG_JSON") {
            Some(raw) => raw.trim().parse().with_context(|| {
                format!("TOOLTRACK_LOG_JSON must be 'true' or 'false', got '{raw}'")
            })?,
            None => false,
        };

        let config = Self {
            db: DbConfig {
                url: var("TOOLTRACK_DB_URL", defaults.url),
                namespace: var("TOOLTRACK_DB_NAMESPACE", defaults.namespace),
                database: var("TOOLTRACK_DB_DATABASE", defaults.database),
                username: var("TOOLTRACK_DB_USER", defaults.username),
                password: var("TOOLTRACK_DB_PASSWORD", defaults.password),
            },
            log_json,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        const SCHEMES: [&str; 5] = ["mem://", "ws://", "wss://", "http://", "https://"];

        if !SCHEMES.iter().any(|s| self.db.url.starts_with(s)) {
            bail!(
                "TOOLTRACK_DB_URL '{}' must start with one of {}",
                self.db.url,
                SCHEMES.join(", ")
            );
        }
        if self.db.namespace.trim().is_empty() {
            bail!("TOOLTRACK_DB_NAMESPACE cannot be empty");
        }
        if self.db.database.trim().is_empty() {
            bail!("TOOLTRACK_DB_DATABASE cannot be empty");
        }
        if !self.db.is_embedded() && self.db.username.is_empty() {
            bail!("TOOLTRACK_DB_USER is required for remote databases");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.db.url, "ws://127.0.0.1:8000");
        assert_eq!(config.db.namespace, "tooltrack");
        assert!(!config.log_json);
    }

    #[test]
    fn embedded_store_needs_no_credentials() {
        let config = config(&[
            ("TOOLTRACK_DB_URL", "mem://"),
            ("TOOLTRACK_DB_USER", ""),
            ("TOOLTRACK_LOG_JSON", "true"),
        ])
        .unwrap();
        assert!(config.db.is_embedded());
        assert!(config.log_json);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = config(&[("TOOLTRACK_DB_URL", "postgres://localhost")]).unwrap_err();
        assert!(err.to_string().contains("TOOLTRACK_DB_URL"));
    }

    #[test]
    fn rejects_bad_log_flag() {
        assert!(config(&[("TOOLTRACK_LOG_JSON", "yes")]).is_err());
    }

    #[test]
    fn remote_store_requires_a_user() {
        assert!(config(&[("TOOLTRACK_DB_USER", "")]).is_err());
    }
}
