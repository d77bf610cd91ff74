use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Condition, Expr, JoinType, Order, Query, SelectStatement};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;

use crate::config::{LimitsConfig, PoolConfig, ValidWindowConfig};
use crate::db::*;
use crate::facts::{group_facts, upsert_facts};
use crate::filter::FilterCompiler;
use crate::migration::Migrator;
use crate::resolver::{GeoPointDimension, TimeSeriesDimension, read_field, resolve_ids};
use crate::schema::{discover_natural_key, ensure_unique_main};
use crate::sweeper::{RetentionSweeper, SweeperHandle};
use crate::{DatabaseConfig, ObsConfig};
use obsdb_core::{
    BatchLimits, DEFAULT_ATTEMPTS, FieldValue, FilterSpec, GeoPoint, GetObservationsInput,
    LocationCandidate, LocationItem, ObsError, ObsMetadata, ObsResult, ObsTime, Observation,
    ObservationReadApi, ObservationWriteApi, PutReport, QueryableField, TsAttrGroup,
    TsAttrGroupsInput, TsField, TsMetadata, ValidWindow, aggregate_latest_locations,
    enforce_window,
};

#[derive(Clone)]
pub struct ObsStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    limits: BatchLimits,
    resolve_attempts: u32,
    window: ValidWindowConfig,
    natural_key: Vec<TsField>,
    int_string_fallback: bool,
    sweep_interval: Option<Duration>,
}

impl ObsStore {
    pub async fn connect(config: &ObsConfig, base_dir: &Path) -> ObsResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        let pool = config
            .pool
            .as_ref()
            .map(PoolConfig::or_defaults)
            .unwrap_or_else(PoolConfig::with_defaults);
        if let Some(max) = pool.max_connections {
            options.max_connections(max);
        }
        if let Some(min) = pool.min_connections {
            options.min_connections(min);
        }
        if let Some(timeout_ms) = pool.connect_timeout_ms {
            options.connect_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(timeout_ms) = pool.acquire_timeout_ms {
            options.acquire_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(timeout_ms) = pool.idle_timeout_ms {
            options.idle_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(lifetime_ms) = pool.max_lifetime_ms {
            options.max_lifetime(Duration::from_millis(lifetime_ms));
        }
        let conn = Database::connect(options)
            .await
            .map_err(|err| ObsError::from(err).context("connect"))?;
        let backend = conn.get_database_backend();

        let limits_config = config
            .limits
            .clone()
            .unwrap_or_else(LimitsConfig::with_defaults);
        let limits = BatchLimits::new(
            limits_config.max_batch.unwrap_or(50_000),
            limits_config.chunk_size.unwrap_or(1_000),
            TS_PARAMS_PER_ROW.max(FACT_PARAMS_PER_ROW),
        )?;
        let resolve_attempts = limits_config.resolve_attempts.unwrap_or(DEFAULT_ATTEMPTS);
        if resolve_attempts == 0 {
            return Err(ObsError::invalid("resolve_attempts must be at least 1"));
        }
        let window = config.window();
        window.resolve()?;

        Migrator::up(&conn, None)
            .await
            .map_err(|err| ObsError::from(err).context("migrate"))?;
        ensure_unique_main(&conn, &config.declared_natural_key()?).await?;
        let natural_key = discover_natural_key(&conn).await?;
        log::info!(
            "obsdb store ready on {} with natural key [{}]",
            config.backend_name(),
            natural_key
                .iter()
                .map(|field| field.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            conn,
            backend,
            limits,
            resolve_attempts,
            window,
            natural_key,
            int_string_fallback: config.int_string_fallback.unwrap_or(true),
            sweep_interval: config.sweep_interval(),
        })
    }

    pub async fn connect_sqlite(path: &Path) -> ObsResult<Self> {
        let config = ObsConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Time-series columns of `unique_main`, as read from the engine.
    pub fn natural_key(&self) -> &[TsField] {
        &self.natural_key
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn valid_window(&self) -> ObsResult<ValidWindow> {
        self.window.resolve()
    }

    pub fn retention_sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(self.conn.clone(), self.window.clone())
    }

    /// Spawn the periodic retention task, unless retention is disabled.
    pub fn start_retention(&self) -> Option<SweeperHandle> {
        let period = self.sweep_interval?;
        log::info!("retention sweeper every {}ms", period.as_millis());
        Some(self.retention_sweeper().start(period))
    }

    fn filter_compiler(&self) -> ObsResult<FilterCompiler> {
        Ok(FilterCompiler::new(
            self.valid_window()?,
            self.int_string_fallback,
        ))
    }

    async fn write_chunk(&self, chunk: &[Observation]) -> ObsResult<u64> {
        let txn = self
            .conn
            .begin()
            .await
            .map_err(|err| ObsError::from(err).context("begin chunk"))?;
        let ts_dimension = TimeSeriesDimension::new(&txn, &self.natural_key);
        let geo_dimension = GeoPointDimension::new(&txn);
        let (ts_ids, geo_ids) = tokio::try_join!(
            resolve_ids(
                &ts_dimension,
                chunk.iter().map(|observation| observation.ts.clone()),
                self.resolve_attempts,
            ),
            resolve_ids(
                &geo_dimension,
                chunk.iter().map(|observation| observation.obs.geo_point),
                self.resolve_attempts,
            ),
        )?;
        log::debug!(
            "resolved {} time series and {} geo points for {} observations",
            ts_ids.len(),
            geo_ids.len(),
            chunk.len()
        );

        let groups = group_facts(chunk, &self.natural_key, &ts_ids, &geo_ids)?;
        let written = upsert_facts(&txn, &groups).await?;
        txn.commit()
            .await
            .map_err(|err| ObsError::from(err).context("commit chunk"))?;
        Ok(written)
    }

    fn joined_select(&self, condition: Condition) -> SelectStatement {
        let mut select = joined_tables();
        select.cond_where(condition);
        select
    }

    /// Facts matching `condition`, or with `latest` only the newest matching fact of each
    /// time series. `(ts_id, obstime)` is the primary key, so the newest instant names one row.
    fn matching_select(&self, condition: Condition, latest: bool) -> SelectStatement {
        if !latest {
            return self.joined_select(condition);
        }
        let newest = Alias::new("newest");
        let mut per_series = self.joined_select(condition);
        per_series
            .expr_as(
                Expr::col((Observations::Table, Observations::TsId)),
                Alias::new("ts_id"),
            )
            .expr_as(
                Expr::col((Observations::Table, Observations::Obstime)).max(),
                Alias::new("obstime"),
            )
            .group_by_col((Observations::Table, Observations::TsId));
        let mut select = joined_tables();
        select.join_subquery(
            JoinType::InnerJoin,
            per_series,
            newest.clone(),
            Condition::all()
                .add(
                    Expr::col((Observations::Table, Observations::TsId))
                        .equals((newest.clone(), Alias::new("ts_id"))),
                )
                .add(
                    Expr::col((Observations::Table, Observations::Obstime))
                        .equals((newest, Alias::new("obstime"))),
                ),
        );
        select
    }
}

fn joined_tables() -> SelectStatement {
    Query::select()
        .from(Observations::Table)
        .inner_join(
            TimeSeries::Table,
            Expr::col((TimeSeries::Table, TimeSeries::Id))
                .equals((Observations::Table, Observations::TsId)),
        )
        .inner_join(
            GeoPoints::Table,
            Expr::col((GeoPoints::Table, GeoPoints::Id))
                .equals((Observations::Table, Observations::GeoPointId)),
        )
        .to_owned()
}

fn build_connection_url(config: &ObsConfig, base_dir: &Path) -> ObsResult<String> {
    match &config.database {
        DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        DatabaseConfig::Postgres { url } => Ok(url.clone()),
    }
}

fn decode_observation(row: &QueryResult) -> ObsResult<Observation> {
    let mut ts = TsMetadata::default();
    for field in TsField::ALL {
        field.assign(&mut ts, read_field(row, *field)?)?;
    }
    let obs = ObsMetadata {
        obs_id: get(row, "obs_id")?,
        geo_point: GeoPoint::new(get(row, "lon")?, get(row, "lat")?),
        pubtime: ObsTime(get(row, "pubtime")?),
        data_id: get(row, "data_id")?,
        history: get(row, "history")?,
        processing_level: get(row, "processing_level")?,
        quality_code: get(row, "quality_code")?,
        camsl: get(row, "camsl")?,
        obstime: ObsTime(get(row, "obstime")?),
        value: get(row, "value")?,
    };
    Ok(Observation { ts, obs })
}

fn ts_queryable_names() -> Vec<String> {
    QueryableField::sorted_names()
        .into_iter()
        .filter(|name| TsField::from_name(name).is_some())
        .collect()
}

#[async_trait]
impl ObservationWriteApi for ObsStore {
    async fn put_observations(&self, batch: Vec<Observation>) -> ObsResult<PutReport> {
        self.limits.check_batch(batch.len())?;
        let window = self.valid_window()?;
        let mut report = PutReport::default();
        for chunk in self.limits.chunks(&batch) {
            enforce_window(&window, chunk)?;
            let written = self.write_chunk(chunk).await?;
            report.chunks += 1;
            report.observations += chunk.len();
            log::debug!(
                "chunk {}/{}: {} observations, {written} rows written",
                report.chunks,
                self.limits.chunk_count(batch.len()),
                chunk.len()
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl ObservationReadApi for ObsStore {
    async fn get_observations(&self, input: GetObservationsInput) -> ObsResult<Vec<Observation>> {
        let condition = self.filter_compiler()?.compile(&input.filter)?;
        let mut select = self.matching_select(condition, input.latest);
        select
            .columns(
                [Observations::TsId, Observations::Obstime]
                    .into_iter()
                    .chain(FACT_VALUE_COLUMNS)
                    .map(|column| (Observations::Table, column)),
            )
            .columns(
                TsField::ALL
                    .iter()
                    .map(|field| (TimeSeries::Table, ts_col(*field))),
            )
            .columns([
                (GeoPoints::Table, GeoPoints::Lon),
                (GeoPoints::Table, GeoPoints::Lat),
            ])
            .order_by((Observations::Table, Observations::TsId), Order::Asc)
            .order_by((Observations::Table, Observations::Obstime), Order::Asc);
        let rows = query_all(&self.conn, &select)
            .await
            .map_err(|err| err.context("get observations"))?;

        rows.iter().map(decode_observation).collect()
    }

    async fn get_locations(&self, filter: FilterSpec) -> ObsResult<Vec<LocationItem>> {
        let condition = self.filter_compiler()?.compile(&filter)?;
        // Each series' newest fact carries its platform and parameter, so the roster survives.
        let mut select = self.matching_select(condition, true);
        select
            .columns([
                (Observations::Table, Observations::TsId),
                (Observations::Table, Observations::GeoPointId),
                (Observations::Table, Observations::Obstime),
            ])
            .columns(
                [
                    TsField::Platform,
                    TsField::PlatformName,
                    TsField::ParameterName,
                ]
                .map(|field| (TimeSeries::Table, ts_col(field))),
            )
            .columns([
                (GeoPoints::Table, GeoPoints::Lon),
                (GeoPoints::Table, GeoPoints::Lat),
            ]);
        let rows = query_all(&self.conn, &select)
            .await
            .map_err(|err| err.context("get locations"))?;

        let candidates = rows
            .iter()
            .map(|row| {
                Ok(LocationCandidate {
                    ts_id: get(row, "ts_id")?,
                    geo_point_id: get(row, "geo_point_id")?,
                    platform: get(row, "platform")?,
                    platform_name: get(row, "platform_name")?,
                    parameter_name: get(row, "parameter_name")?,
                    point: GeoPoint::new(get(row, "lon")?, get(row, "lat")?),
                    obstime: ObsTime(get(row, "obstime")?),
                })
            })
            .collect::<ObsResult<Vec<_>>>()?;
        Ok(aggregate_latest_locations(candidates))
    }

    async fn get_ts_attr_groups(&self, input: TsAttrGroupsInput) -> ObsResult<Vec<TsAttrGroup>> {
        if input.attrs.is_empty() {
            return Err(ObsError::invalid("at least one attribute is required"));
        }
        let mut fields: Vec<TsField> = Vec::new();
        for name in &input.attrs {
            match QueryableField::lookup(name) {
                Ok(QueryableField::TimeSeries(field)) => {
                    if !fields.contains(&field) {
                        fields.push(field);
                    }
                }
                _ => return Err(ObsError::unknown_field(name, ts_queryable_names())),
            }
        }

        let mut select = Query::select();
        select
            .distinct()
            .columns(fields.iter().map(|field| (TimeSeries::Table, ts_col(*field))))
            .from(TimeSeries::Table);
        for field in &fields {
            select.order_by((TimeSeries::Table, ts_col(*field)), Order::Asc);
        }
        let rows = query_all(&self.conn, &select)
            .await
            .map_err(|err| err.context("get time series attribute groups"))?;

        rows.iter()
            .map(|row| {
                let values = fields
                    .iter()
                    .map(|field| Ok((field.name().to_string(), read_field(row, *field)?)))
                    .collect::<ObsResult<BTreeMap<String, FieldValue>>>()?;
                Ok(TsAttrGroup { values })
            })
            .collect()
    }
}
