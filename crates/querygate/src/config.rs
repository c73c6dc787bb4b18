//! # Configuration
//!
//! Gateway configuration is managed by [`confique`], layered in priority order:
//!
//! 1. **Environment variables**: `QUERYGATE_ROUTE_PREFIX`,
//!    `QUERYGATE_PER_PAGE`, `QUERYGATE_MAX_PER_PAGE`, `QUERYGATE_CACHE`.
//! 2. **Config file**: an optional `querygate.toml` passed by the host.
//! 3. **Compiled defaults**: via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `route.prefix` | `query` | Path prefix for every generated route |
//! | `pagination.per_page` | `20` | Page size when the caller sends none |
//! | `pagination.max_per_page` | `100` | Upper clamp for requested page sizes |
//! | `cache.enabled` | `true` | Use the in-process result cache |
//!
//! Per-entity cache TTLs and keys live on the entity descriptors, not here.

use crate::error::{GatewayError, Result};
use confique::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    #[config(nested)]
    pub route: RouteConfig,

    #[config(nested)]
    pub pagination: PaginationConfig,

    #[config(nested)]
    pub cache: CacheConfig,
}

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// Path prefix for list and action routes, without slashes.
    #[config(default = "query", env = "QUERYGATE_ROUTE_PREFIX")]
    pub prefix: String,
}

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaginationConfig {
    /// Page size used when a list request does not send `per_page`.
    #[config(default = 20, env = "QUERYGATE_PER_PAGE")]
    pub per_page: u32,

    /// Requested page sizes above this are clamped down to it.
    #[config(default = 100, env = "QUERYGATE_MAX_PER_PAGE")]
    pub max_per_page: u32,
}

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache list payloads for entities that declare a cache policy.
    #[config(default = true, env = "QUERYGATE_CACHE")]
    pub enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            route: RouteConfig {
                prefix: "query".to_string(),
            },
            pagination: PaginationConfig {
                per_page: 20,
                max_per_page: 100,
            },
            cache: CacheConfig { enabled: true },
        }
    }
}

impl GatewayConfig {
    /// Loads environment over the optional file over compiled defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder().env();
        if let Some(path) = path {
            if !path.exists() {
                return Err(GatewayError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.file(path);
        }
        let config = builder.load()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pagination = &self.pagination;
        if pagination.max_per_page == 0 {
            return Err(GatewayError::Configuration(
                "pagination.max_per_page must be at least 1".to_string(),
            ));
        }
        if pagination.per_page == 0 || pagination.per_page > pagination.max_per_page {
            return Err(GatewayError::Configuration(format!(
                "pagination.per_page must be between 1 and {}",
                pagination.max_per_page
            )));
        }
        if self.route.prefix.contains('/') {
            return Err(GatewayError::Configuration(
                "route.prefix must not contain '/'".to_string(),
            ));
        }
        Ok(())
    }

    /// Commented TOML template listing every setting with its default.
    pub fn template() -> String {
        confique::toml::template::<GatewayConfig>(confique::toml::FormatOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.route.prefix, "query");
        assert_eq!(config.pagination.per_page, 20);
        assert_eq!(config.pagination.max_per_page, 100);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pagination]\nper_page = 5\nmax_per_page = 10").unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pagination.per_page, 5);
        assert_eq!(config.pagination.max_per_page, 10);
        assert_eq!(config.route.prefix, "query");
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let err = GatewayConfig::load(Some(Path::new("/nonexistent/querygate.toml"))).unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[test]
    fn test_per_page_above_max_is_rejected() {
        let mut config = GatewayConfig::default();
        config.pagination.per_page = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_mentions_every_section() {
        let template = GatewayConfig::template();
        assert!(template.contains("[route]"));
        assert!(template.contains("[pagination]"));
        assert!(template.contains("max_per_page"));
        assert!(template.contains("[cache]"));
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let config = GatewayConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
