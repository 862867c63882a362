//! Pipeline configuration
//!
//! Built once from the environment (a `.env` file is honored) and handed to
//! the orchestrator; nothing reads configuration globally after that.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EtlError, Result};
use crate::load::{LoadPolicy, TableDescriptor};
use crate::schema::{self, TableSchema};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost:5432/liftoff";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_LAUNCHES_URL: &str = "https://api.spacexdata.com/v5/launches";
pub const DEFAULT_LATEST_URL: &str = "https://api.spacexdata.com/v5/launches/latest";
pub const DEFAULT_DIMENSIONS: &str =
    "payloads=https://api.spacexdata.com/v4/payloads,launchpads=https://api.spacexdata.com/v4/launchpads";
pub const DEFAULT_PRIMARY_TABLE: &str = "raw_level";
pub const DEFAULT_AGGREGATED_TABLE: &str = "aggregated";
pub const DEFAULT_CHUNK_SIZE: usize = 20_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FETCH_RETRIES: u32 = 2;
pub const DEFAULT_INCREMENTAL_QUERY: &str = "sql/raw_level_incremental_load.sql";
pub const DEFAULT_AGGREGATION_SQL: &str = "sql/aggregated.sql";

/// Dimension tables are named `dim_<name>`
pub const DIMENSION_TABLE_PREFIX: &str = "dim_";

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub store: StoreConfig,
    pub endpoints: EndpointConfig,
    pub dimensions: Vec<DimensionSource>,
    pub primary_table: String,
    pub aggregated_table: String,
    pub chunk_size: usize,
    pub request_timeout_secs: u64,
    pub fetch_retries: u32,
    pub incremental_query_path: PathBuf,
    pub aggregation_sql_path: PathBuf,
}

/// Warehouse connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sink connection target
    pub url: String,
    /// Target of the identifier query; the sink when unset
    pub query_url: Option<String>,
    /// Schema namespace for every table
    pub schema: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Source endpoints for the primary table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Full launch collection, used by Bootstrap
    pub launches_url: String,
    /// Single most recent launch, used by the incremental path
    pub latest_url: String,
}

/// A dimension table and the endpoint it is refreshed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSource {
    pub name: String,
    pub url: String,
}

impl StoreConfig {
    /// How long a pool waits for a connection before failing
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl DimensionSource {
    pub fn table_name(&self) -> String {
        format!("{}{}", DIMENSION_TABLE_PREFIX, self.name)
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                query_url: None,
                schema: DEFAULT_SCHEMA.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            endpoints: EndpointConfig {
                launches_url: DEFAULT_LAUNCHES_URL.to_string(),
                latest_url: DEFAULT_LATEST_URL.to_string(),
            },
            // The default list is static and well-formed
            dimensions: parse_dimensions(DEFAULT_DIMENSIONS).unwrap_or_default(),
            primary_table: DEFAULT_PRIMARY_TABLE.to_string(),
            aggregated_table: DEFAULT_AGGREGATED_TABLE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            incremental_query_path: PathBuf::from(DEFAULT_INCREMENTAL_QUERY),
            aggregation_sql_path: PathBuf::from(DEFAULT_AGGREGATION_SQL),
        }
    }
}

impl EtlConfig {
    /// Load from the environment and defaults, then validate
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `load` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            store: StoreConfig {
                url: get("DATABASE_URL").unwrap_or(defaults.store.url),
                query_url: get("QUERY_DATABASE_URL"),
                schema: get("LIFTOFF_SCHEMA").unwrap_or(defaults.store.schema),
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", defaults.store.max_connections)?,
                connect_timeout_secs: parse_or(
                    &get,
                    "DATABASE_CONNECT_TIMEOUT",
                    defaults.store.connect_timeout_secs,
                )?,
            },
            endpoints: EndpointConfig {
                launches_url: get("LIFTOFF_LAUNCHES_URL").unwrap_or(defaults.endpoints.launches_url),
                latest_url: get("LIFTOFF_LATEST_URL").unwrap_or(defaults.endpoints.latest_url),
            },
            dimensions: match get("LIFTOFF_DIMENSIONS") {
                Some(raw) => parse_dimensions(&raw)?,
                None => defaults.dimensions,
            },
            primary_table: get("LIFTOFF_PRIMARY_TABLE").unwrap_or(defaults.primary_table),
            aggregated_table: get("LIFTOFF_AGGREGATED_TABLE").unwrap_or(defaults.aggregated_table),
            chunk_size: parse_or(&get, "LIFTOFF_CHUNK_SIZE", defaults.chunk_size)?,
            request_timeout_secs: parse_or(
                &get,
                "LIFTOFF_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            fetch_retries: parse_or(&get, "LIFTOFF_FETCH_RETRIES", defaults.fetch_retries)?,
            incremental_query_path: get("LIFTOFF_INCREMENTAL_QUERY")
                .map(PathBuf::from)
                .unwrap_or(defaults.incremental_query_path),
            aggregation_sql_path: get("LIFTOFF_AGGREGATION_SQL")
                .map(PathBuf::from)
                .unwrap_or(defaults.aggregation_sql_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (key, url) in [
            ("DATABASE_URL", Some(&self.store.url)),
            ("QUERY_DATABASE_URL", self.store.query_url.as_ref()),
        ] {
            if let Some(url) = url {
                if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                    return Err(EtlError::Config(format!("{} must be a postgres:// URL", key)));
                }
            }
        }

        if self.store.max_connections == 0 {
            return Err(EtlError::Config(
                "DATABASE_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }
        if self.store.schema.is_empty() || self.primary_table.is_empty() {
            return Err(EtlError::Config(
                "schema and primary table names cannot be empty".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(EtlError::Config("LIFTOFF_CHUNK_SIZE must be greater than 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(EtlError::Config(
                "LIFTOFF_REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        validate_http_url("LIFTOFF_LAUNCHES_URL", &self.endpoints.launches_url)?;
        validate_http_url("LIFTOFF_LATEST_URL", &self.endpoints.latest_url)?;

        let mut seen = std::collections::HashSet::new();
        for dimension in &self.dimensions {
            if !seen.insert(dimension.name.as_str()) {
                return Err(EtlError::Config(format!(
                    "dimension '{}' is configured twice",
                    dimension.name
                )));
            }
            if schema::registered(&dimension.name).is_none() {
                return Err(EtlError::Config(format!(
                    "dimension '{}' has no registered schema",
                    dimension.name
                )));
            }
            validate_http_url(&dimension.name, &dimension.url)?;
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Primary fact table under the given load policy
    pub fn primary_descriptor(&self, policy: LoadPolicy) -> TableDescriptor {
        TableDescriptor::new(&self.store.schema, &self.primary_table, policy)
    }

    /// Dimension tables are always fully replaced
    pub fn dimension_targets(&self) -> Result<Vec<(DimensionSource, TableDescriptor, TableSchema)>> {
        self.dimensions
            .iter()
            .map(|dimension| {
                let schema = schema::registered(&dimension.name).ok_or_else(|| {
                    EtlError::Config(format!("dimension '{}' has no registered schema", dimension.name))
                })?;
                let descriptor =
                    TableDescriptor::new(&self.store.schema, dimension.table_name(), LoadPolicy::Replace);
                Ok((dimension.clone(), descriptor, schema))
            })
            .collect()
    }
}

/// Parse `name=url` pairs separated by commas
pub fn parse_dimensions(raw: &str) -> Result<Vec<DimensionSource>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, url) = entry.split_once('=').ok_or_else(|| {
                EtlError::Config(format!("dimension entry '{}' must look like name=url", entry))
            })?;
            Ok(DimensionSource {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EtlError::Config(format!("{} = '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn validate_http_url(key: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(EtlError::Config(format!("{} must be an http(s) URL, got '{}'", key, url)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EtlConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.chunk_size, 20_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.store.connect_timeout(),
            Duration::from_secs(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS)
        );
        assert_eq!(config.dimensions.len(), 2);
        assert_eq!(config.dimensions[0].table_name(), "dim_payloads");
        assert_eq!(config.primary_descriptor(LoadPolicy::Append).name, "raw_level");
    }

    #[test]
    fn test_environment_overrides() {
        let config = EtlConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgresql://etl:etl@db:5432/warehouse"),
            ("LIFTOFF_SCHEMA", "spacex"),
            ("LIFTOFF_CHUNK_SIZE", "500"),
            ("LIFTOFF_DIMENSIONS", "launchpads=http://localhost:9000/pads"),
        ]))
        .unwrap();

        assert_eq!(config.store.schema, "spacex");
        assert_eq!(config.chunk_size, 500);
        assert_eq!(
            config.dimensions,
            vec![DimensionSource {
                name: "launchpads".into(),
                url: "http://localhost:9000/pads".into()
            }]
        );
        let targets = config.dimension_targets().unwrap();
        assert_eq!(targets[0].1.qualified_name(), "\"spacex\".\"dim_launchpads\"");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EtlConfig::from_lookup(lookup(&[("LIFTOFF_CHUNK_SIZE", "0")])).is_err());
        assert!(EtlConfig::from_lookup(lookup(&[("LIFTOFF_CHUNK_SIZE", "lots")])).is_err());
        assert!(EtlConfig::from_lookup(lookup(&[("DATABASE_URL", "mysql://x")])).is_err());
        assert!(EtlConfig::from_lookup(lookup(&[("LIFTOFF_LATEST_URL", "ftp://x")])).is_err());
    }

    #[test]
    fn test_dimension_validation() {
        let unknown = EtlConfig::from_lookup(lookup(&[("LIFTOFF_DIMENSIONS", "rockets=http://x/r")]));
        assert!(matches!(unknown, Err(EtlError::Config(_))));

        let twice = EtlConfig::from_lookup(lookup(&[(
            "LIFTOFF_DIMENSIONS",
            "payloads=http://x/a,payloads=http://x/b",
        )]));
        assert!(twice.is_err());

        assert!(parse_dimensions("payloads").is_err());
    }
}
