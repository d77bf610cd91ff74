use sea_orm::sea_query;
use sea_orm::sea_query::{
    Alias, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder, Values,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement, TryGetable};
use sea_orm_migration::prelude::Iden;

use obsdb_core::{ObsError, ObsField, ObsResult, TsField};

/// Name of the uniqueness index whose columns form the time-series natural key.
pub const UNIQUE_MAIN: &str = "unique_main";

/// Metadata columns of `time_series` are addressed through [`ts_col`].
#[derive(Iden, Clone, Copy)]
pub enum TimeSeries {
    Table,
    Id,
}

#[derive(Iden, Clone, Copy)]
pub enum GeoPoints {
    #[iden = "geo_point"]
    Table,
    Id,
    Lon,
    Lat,
}

#[derive(Iden, Clone, Copy)]
pub enum Observations {
    #[iden = "observation"]
    Table,
    TsId,
    Obstime,
    ObsId,
    GeoPointId,
    Pubtime,
    DataId,
    History,
    ProcessingLevel,
    QualityCode,
    Camsl,
    Value,
}

/// Non-key fact columns, in insert order after `ts_id` and `obstime`.
pub const FACT_VALUE_COLUMNS: [Observations; 9] = [
    Observations::ObsId,
    Observations::GeoPointId,
    Observations::Pubtime,
    Observations::DataId,
    Observations::History,
    Observations::ProcessingLevel,
    Observations::QualityCode,
    Observations::Camsl,
    Observations::Value,
];

pub const FACT_PARAMS_PER_ROW: usize = FACT_VALUE_COLUMNS.len() + 2;

/// Bound parameters per `time_series` row in the identity upsert.
pub const TS_PARAMS_PER_ROW: usize = TsField::ALL.len();

pub fn ts_col(field: TsField) -> Alias {
    Alias::new(field.name())
}

pub fn obs_col(field: ObsField) -> Observations {
    match field {
        ObsField::QualityCode => Observations::QualityCode,
        ObsField::ProcessingLevel => Observations::ProcessingLevel,
        ObsField::DataId => Observations::DataId,
        ObsField::History => Observations::History,
    }
}

pub fn excluded() -> Alias {
    Alias::new("excluded")
}

pub fn build_stmt<S: QueryStatementWriter>(backend: DatabaseBackend, stmt: &S) -> (String, Values) {
    match backend {
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub async fn exec<C, S>(conn: &C, stmt: &S) -> ObsResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub async fn query_all<C, S>(conn: &C, stmt: &S) -> ObsResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub fn get<T: TryGetable>(row: &QueryResult, column: &str) -> ObsResult<T> {
    row.try_get::<T>("", column)
        .map_err(|err| ObsError::storage(format!("read column {column}: {err}")))
}
