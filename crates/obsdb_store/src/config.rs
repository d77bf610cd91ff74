use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use obsdb_core::{
    DEFAULT_ATTEMPTS, DEFAULT_NATURAL_KEY, ObsError, ObsResult, ObsTime, TsField, ValidWindow,
};

const DEFAULT_CONFIG_NAME: &str = "obsdb.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub max_lifetime_ms: Option<u64>,
}

impl PoolConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_connections: Some(25),
            min_connections: None,
            connect_timeout_ms: None,
            acquire_timeout_ms: None,
            idle_timeout_ms: Some(300_000),
            max_lifetime_ms: Some(300_000),
        }
    }

    /// Fill every unset field from [`Self::with_defaults`].
    pub fn or_defaults(&self) -> Self {
        let defaults = Self::with_defaults();
        Self {
            max_connections: self.max_connections.or(defaults.max_connections),
            min_connections: self.min_connections.or(defaults.min_connections),
            connect_timeout_ms: self.connect_timeout_ms.or(defaults.connect_timeout_ms),
            acquire_timeout_ms: self.acquire_timeout_ms.or(defaults.acquire_timeout_ms),
            idle_timeout_ms: self.idle_timeout_ms.or(defaults.idle_timeout_ms),
            max_lifetime_ms: self.max_lifetime_ms.or(defaults.max_lifetime_ms),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_batch: Option<usize>,
    pub chunk_size: Option<usize>,
    pub resolve_attempts: Option<u32>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_batch: Some(50_000),
            chunk_size: Some(1_000),
            resolve_attempts: Some(DEFAULT_ATTEMPTS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ValidWindowConfig {
    /// Fixed bounds in microseconds since the Unix epoch.
    Static { lo: i64, hi: i64 },
    /// Bounds that move with the wall clock.
    Relative { lo_secs_ago: i64, hi_secs_ahead: i64 },
}

impl ValidWindowConfig {
    pub fn with_defaults() -> Self {
        Self::Relative {
            lo_secs_ago: 24 * 3_600,
            hi_secs_ahead: 600,
        }
    }

    pub fn resolve_at(&self, now: ObsTime) -> ObsResult<ValidWindow> {
        match self {
            Self::Static { lo, hi } => ValidWindow::new(ObsTime(*lo), ObsTime(*hi)),
            Self::Relative {
                lo_secs_ago,
                hi_secs_ahead,
            } => ValidWindow::new(now.plus_secs(-lo_secs_ago), now.plus_secs(*hi_secs_ahead)),
        }
    }

    pub fn resolve(&self) -> ObsResult<ValidWindow> {
        self.resolve_at(ObsTime::now())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: Option<bool>,
    pub sweep_interval_ms: Option<u64>,
}

impl RetentionConfig {
    pub fn with_defaults() -> Self {
        Self {
            enabled: Some(true),
            sweep_interval_ms: Some(600_000),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObsConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub limits: Option<LimitsConfig>,
    pub valid_window: Option<ValidWindowConfig>,
    pub retention: Option<RetentionConfig>,
    pub natural_key: Option<Vec<String>>,
    pub int_string_fallback: Option<bool>,
}

impl ObsConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
            valid_window: Some(ValidWindowConfig::with_defaults()),
            retention: Some(RetentionConfig::with_defaults()),
            natural_key: None,
            int_string_fallback: Some(true),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> ObsResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| ObsError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| ObsError::storage(format!("read config: {err}")))?;
            let config: ObsConfig =
                serde_json::from_str(&raw).map_err(|err| ObsError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = ObsConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| ObsError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| ObsError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> ObsResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| "obsdb.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(ObsError::invalid("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
        }
    }

    pub fn window(&self) -> ValidWindowConfig {
        self.valid_window
            .clone()
            .unwrap_or_else(ValidWindowConfig::with_defaults)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        let retention = self
            .retention
            .clone()
            .unwrap_or_else(RetentionConfig::with_defaults);
        if !retention.enabled.unwrap_or(true) {
            return None;
        }
        Some(Duration::from_millis(
            retention.sweep_interval_ms.unwrap_or(600_000).max(1),
        ))
    }

    /// Natural key to declare when the schema is created; the live key is read back
    /// from the database afterwards.
    pub fn declared_natural_key(&self) -> ObsResult<Vec<TsField>> {
        let Some(names) = &self.natural_key else {
            return Ok(DEFAULT_NATURAL_KEY.to_vec());
        };
        if names.is_empty() {
            return Err(ObsError::invalid("natural key must name at least one field"));
        }
        names
            .iter()
            .map(|name| {
                TsField::from_name(name)
                    .ok_or_else(|| ObsError::invalid(format!("unknown natural key field: {name}")))
            })
            .collect()
    }
}
