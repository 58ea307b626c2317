//! Application configuration management

use std::env;

use anyhow::Result;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database path or URL (SQLite)
    pub database_url: String,

    /// Default page size for list queries when no limit is given
    pub default_limit: i64,

    /// Hard ceiling for list query limits; exceeding it is an error
    pub max_limit: i64,

    /// Maximum nesting depth accepted by the filter compiler
    pub max_filter_depth: usize,

    /// Exclude soft-deleted records from list queries.
    /// The source data is inconsistent on this, so it is configuration
    /// rather than a baked-in default.
    pub exclude_deleted: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/registro.db".to_string());

        Ok(Self {
            database_url,
            default_limit: parse_env("API_DEFAULT_LIMIT", 25),
            max_limit: parse_env("API_MAX_LIMIT", 100),
            max_filter_depth: parse_env("API_MAX_FILTER_DEPTH", 10),
            exclude_deleted: parse_env("API_EXCLUDE_DELETED", false),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            default_limit: 25,
            max_limit: 100,
            max_filter_depth: 10,
            exclude_deleted: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.default_limit, 25);
        assert_eq!(config.max_limit, 100);
        assert_eq!(config.max_filter_depth, 10);
        assert!(!config.exclude_deleted);
    }
}
