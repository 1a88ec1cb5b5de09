//! Server configuration, read once from `AVAILD_*` environment variables.

use std::path::PathBuf;

use chrono_tz::Tz;

use crate::catalog::{CatalogError, CatalogSpec, SlotCatalog};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("AVAILD_TIMEZONE: unknown timezone {0:?}")]
    InvalidTimezone(String),
    #[error("AVAILD_CATALOG: cannot read {}: {source}", path.display())]
    CatalogRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("AVAILD_CATALOG: malformed {}: {source}", path.display())]
    CatalogParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("AVAILD_CATALOG: {0}")]
    Catalog(#[from] CatalogError),
    #[error("both AVAILD_TLS_CERT and AVAILD_TLS_KEY must be set, or neither")]
    TlsPair,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub retention_days: u64,
    pub timezone: Tz,
    pub catalog: SlotCatalog,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timezone = match lookup("AVAILD_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(name))?,
            None => Tz::UTC,
        };
        let catalog = match lookup("AVAILD_CATALOG") {
            Some(path) => load_catalog(PathBuf::from(path))?,
            None => SlotCatalog::default(),
        };
        let tls_cert = lookup("AVAILD_TLS_CERT");
        let tls_key = lookup("AVAILD_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        Ok(Self {
            port: parse_or(&lookup, "AVAILD_PORT", 5433)?,
            bind: lookup("AVAILD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(lookup("AVAILD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("AVAILD_PASSWORD").unwrap_or_else(|| "availd".into()),
            max_connections: parse_or(&lookup, "AVAILD_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "AVAILD_COMPACT_THRESHOLD", 1000)?,
            retention_days: parse_or(&lookup, "AVAILD_RETENTION_DAYS", 90)?,
            timezone,
            catalog,
            metrics_port: lookup("AVAILD_METRICS_PORT")
                .map(|v| v.parse().map_err(|_| ConfigError::Invalid { var: "AVAILD_METRICS_PORT", value: v }))
                .transpose()?,
            tls_cert,
            tls_key,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// Read a `{ "weekday": [...], "weekend": [...] }` catalog file.
pub fn load_catalog(path: PathBuf) -> Result<SlotCatalog, ConfigError> {
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(source) => return Err(ConfigError::CatalogRead { path, source }),
    };
    let spec: CatalogSpec = match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(source) => return Err(ConfigError::CatalogParse { path, source }),
    };
    Ok(SlotCatalog::from_spec(spec)?)
}
