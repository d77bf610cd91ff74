use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use sea_orm_migration::SchemaManager;
use sea_orm_migration::prelude::Index;

use crate::db::{TimeSeries, UNIQUE_MAIN, get, ts_col};
use obsdb_core::{ObsError, ObsResult, TsField};

/// Create the `unique_main` index over `declared` unless the engine already has one.
///
/// An existing index wins over the configured key; the live definition is what
/// [`discover_natural_key`] reports.
pub async fn ensure_unique_main(conn: &DatabaseConnection, declared: &[TsField]) -> ObsResult<()> {
    if declared.is_empty() {
        return Err(ObsError::invalid("natural key must name at least one field"));
    }
    let mut index = Index::create();
    index
        .name(UNIQUE_MAIN)
        .table(TimeSeries::Table)
        .unique()
        .if_not_exists();
    for field in declared {
        index.col(ts_col(*field));
    }
    SchemaManager::new(conn)
        .create_index(index)
        .await
        .map_err(|err| ObsError::from(err).context("create unique_main"))
}

/// Read the columns of `unique_main` back from the engine catalog, in index order.
pub async fn discover_natural_key<C: ConnectionTrait>(conn: &C) -> ObsResult<Vec<TsField>> {
    let backend = conn.get_database_backend();
    let stmt = match backend {
        DatabaseBackend::Sqlite => Statement::from_string(
            backend,
            format!("PRAGMA index_info('{UNIQUE_MAIN}')"),
        ),
        DatabaseBackend::Postgres => Statement::from_sql_and_values(
            backend,
            "SELECT a.attname::text AS name, array_position(i.indkey::int2[], a.attnum) AS seqno \
             FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indexrelid \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE c.relname = $1 \
             ORDER BY seqno",
            [UNIQUE_MAIN.into()],
        ),
        other => {
            return Err(ObsError::invalid(format!(
                "unsupported database backend: {other:?}"
            )));
        }
    };
    let rows = conn
        .query_all(stmt)
        .await
        .map_err(|err| ObsError::from(err).context("discover natural key"))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let seqno: i64 = match backend {
            DatabaseBackend::Postgres => get::<i32>(row, "seqno")?.into(),
            _ => get::<i64>(row, "seqno")?,
        };
        let name: String = get(row, "name")?;
        columns.push((seqno, name));
    }
    columns.sort();

    if columns.is_empty() {
        return Err(ObsError::storage(format!(
            "index {UNIQUE_MAIN} on time_series not found or has no columns"
        )));
    }
    columns
        .into_iter()
        .map(|(_, name)| {
            TsField::from_name(&name).ok_or_else(|| {
                ObsError::storage(format!("{UNIQUE_MAIN} references unknown column {name}"))
            })
        })
        .collect()
}
