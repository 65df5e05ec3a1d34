//! Runtime configuration, read from the environment.

use crate::catalog::{CatalogConfig, DEFAULT_TMDB_BASE_URL, DEFAULT_YOUTUBE_BASE_URL};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_CACHE_SWEEP_SECS: u64 = 15 * 60;
pub const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be at least 32 bytes long")]
    SessionKeyTooShort { var: &'static str },
    #[error("{var} is not a valid bcrypt cost (4..=31): {value:?}")]
    BadCost { var: &'static str, value: String },
    #[error("{var} is not a number of seconds: {value:?}")]
    BadInterval { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    /// `None` runs on a throwaway database.
    pub db_path: Option<PathBuf>,
    pub session_key: Vec<u8>,
    pub bcrypt_cost: u32,
    /// `None` disables the background sweep and leaves expiry purely lazy.
    pub cache_sweep: Option<Duration>,
    pub catalog: CatalogConfig,
}

impl Config {
    /// Optional:
    /// - `MOVIESPHERE_BIND`: default `127.0.0.1:8080`
    /// - `MOVIESPHERE_DB_PATH`: temporary database when absent
    /// - `MOVIESPHERE_SESSION_KEY`: at least 32 bytes; random per process when absent
    /// - `BCRYPT_COST`: default `bcrypt::DEFAULT_COST`
    /// - `CACHE_SWEEP_SECS`: default 900, `0` disables
    /// - `TMDB_API_KEY`, `YOUTUBE_API_KEY`, `TMDB_BASE_URL`, `YOUTUBE_BASE_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let session_key = match var("MOVIESPHERE_SESSION_KEY") {
            Some(key) if key.len() >= SESSION_KEY_LEN => key.into_bytes(),
            Some(_) => {
                return Err(ConfigError::SessionKeyTooShort {
                    var: "MOVIESPHERE_SESSION_KEY",
                })
            }
            None => rand::random::<[u8; SESSION_KEY_LEN]>().to_vec(),
        };

        let bcrypt_cost = match var("BCRYPT_COST") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(cost) if (4..=31).contains(&cost) => cost,
                _ => {
                    return Err(ConfigError::BadCost {
                        var: "BCRYPT_COST",
                        value: raw,
                    })
                }
            },
            None => bcrypt::DEFAULT_COST,
        };

        let sweep_secs = match var("CACHE_SWEEP_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::BadInterval {
                    var: "CACHE_SWEEP_SECS",
                    value: raw.clone(),
                })?,
            None => DEFAULT_CACHE_SWEEP_SECS,
        };

        let base_url = |key: &str, default: &str| {
            var(key)
                .unwrap_or_else(|| default.to_owned())
                .trim_end_matches('/')
                .to_owned()
        };

        Ok(Config {
            bind: var("MOVIESPHERE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_owned()),
            db_path: var("MOVIESPHERE_DB_PATH").map(PathBuf::from),
            session_key,
            bcrypt_cost,
            cache_sweep: if sweep_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(sweep_secs))
            },
            catalog: CatalogConfig {
                tmdb_base_url: base_url("TMDB_BASE_URL", DEFAULT_TMDB_BASE_URL),
                tmdb_api_key: var("TMDB_API_KEY").unwrap_or_default(),
                youtube_base_url: base_url("YOUTUBE_BASE_URL", DEFAULT_YOUTUBE_BASE_URL),
                youtube_api_key: var("YOUTUBE_API_KEY").unwrap_or_default(),
            },
        })
    }

    pub fn sled_config(&self) -> sled::Config {
        match &self.db_path {
            Some(path) => sled::Config::new().path(path),
            None => sled::Config::new().temporary(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = from(&[]).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert!(config.db_path.is_none());
        assert_eq!(config.session_key.len(), SESSION_KEY_LEN);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(
            config.cache_sweep,
            Some(Duration::from_secs(DEFAULT_CACHE_SWEEP_SECS))
        );
        assert_eq!(config.catalog.tmdb_base_url, DEFAULT_TMDB_BASE_URL);
        assert_eq!(config.catalog.tmdb_api_key, "");
    }

    #[test]
    fn overrides() {
        let config = from(&[
            ("MOVIESPHERE_BIND", "0.0.0.0:9000"),
            ("MOVIESPHERE_DB_PATH", "/var/lib/moviesphere"),
            ("MOVIESPHERE_SESSION_KEY", "0123456789abcdef0123456789abcdef"),
            ("BCRYPT_COST", "5"),
            ("CACHE_SWEEP_SECS", "0"),
            ("TMDB_BASE_URL", "http://localhost:9999/3/"),
            ("TMDB_API_KEY", "abc"),
        ])
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/moviesphere")));
        assert_eq!(config.session_key, b"0123456789abcdef0123456789abcdef".to_vec());
        assert_eq!(config.bcrypt_cost, 5);
        assert_eq!(config.cache_sweep, None);
        assert_eq!(config.catalog.tmdb_base_url, "http://localhost:9999/3");
        assert_eq!(config.catalog.tmdb_api_key, "abc");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            from(&[("MOVIESPHERE_SESSION_KEY", "short")]),
            Err(ConfigError::SessionKeyTooShort { .. })
        ));
        assert!(matches!(
            from(&[("BCRYPT_COST", "2")]),
            Err(ConfigError::BadCost { .. })
        ));
        assert!(matches!(
            from(&[("BCRYPT_COST", "lots")]),
            Err(ConfigError::BadCost { .. })
        ));
        assert!(matches!(
            from(&[("CACHE_SWEEP_SECS", "-5")]),
            Err(ConfigError::BadInterval { .. })
        ));
        assert!(matches!(
            from(&[("CACHE_SWEEP_SECS", "15m")]),
            Err(ConfigError::BadInterval { .. })
        ));
    }
}
