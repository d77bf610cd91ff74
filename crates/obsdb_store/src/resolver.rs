//! Surrogate-id resolution for the time-series and geo-point dimensions.
//!
//! One attempt issues a bulk upsert that reports the ids of the rows it
//! inserted or changed, then looks up every key the upsert did not report.
//! Keys that are still invisible after the lookup (a concurrent insert that has
//! not committed yet) make the whole attempt retry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Alias, Condition, Expr, OnConflict, Query, SimpleExpr};

use crate::db::{GeoPoints, TimeSeries, excluded, get, query_all, ts_col};
use obsdb_core::{
    Attempt, FieldKind, FieldValue, GeoKey, GeoPoint, ObsError, ObsResult, TsField, TsKey,
    TsMetadata, retry_bounded,
};

/// Keys per lookup statement. Each key adds a disjunct to the `WHERE` clause and
/// SQLite caps expression depth at 1000.
pub const FETCH_BATCH: usize = 100;

/// A dimension table addressed by natural key.
#[async_trait]
pub trait Dimension: Sync {
    type Row: Send + Sync;
    type Key: Clone + Ord + Debug + Send + Sync;

    fn name(&self) -> &'static str;

    fn key_of(&self, row: &Self::Row) -> Self::Key;

    /// Insert or update `rows`, returning the ids of the rows the statement touched.
    async fn upsert(&self, rows: &[Self::Row]) -> ObsResult<Vec<(Self::Key, i64)>>;

    /// Look up the ids of existing rows by natural key.
    async fn fetch(&self, keys: &[Self::Key]) -> ObsResult<Vec<(Self::Key, i64)>>;
}

/// Resolve every row to its surrogate id. Rows sharing a key collapse to the last one.
pub async fn resolve_ids<D: Dimension>(
    dimension: &D,
    rows: impl IntoIterator<Item = D::Row>,
    max_attempts: u32,
) -> ObsResult<BTreeMap<D::Key, i64>> {
    let mut distinct: BTreeMap<D::Key, D::Row> = BTreeMap::new();
    for row in rows {
        distinct.insert(dimension.key_of(&row), row);
    }
    if distinct.is_empty() {
        return Ok(BTreeMap::new());
    }
    let keys: BTreeSet<D::Key> = distinct.keys().cloned().collect();
    let rows: Vec<D::Row> = distinct.into_values().collect();
    let (rows, keys) = (&rows, &keys);

    let ids = retry_bounded(max_attempts, move |attempt| async move {
        let mut ids: BTreeMap<D::Key, i64> = BTreeMap::new();
        for (key, id) in dimension.upsert(rows).await? {
            if keys.contains(&key) {
                ids.insert(key, id);
            }
        }
        let missing: Vec<D::Key> = keys
            .iter()
            .filter(|key| !ids.contains_key(*key))
            .cloned()
            .collect();
        for batch in missing.chunks(FETCH_BATCH) {
            for (key, id) in dimension.fetch(batch).await? {
                if keys.contains(&key) {
                    ids.insert(key, id);
                }
            }
        }
        let unresolved = keys.len() - ids.len();
        if unresolved > 0 {
            log::debug!(
                "{}: {unresolved} of {} keys unresolved on attempt {attempt}",
                dimension.name(),
                keys.len()
            );
            return Ok(Attempt::Retry(format!(
                "{unresolved} {} keys not visible after upsert; concurrent writers are \
                 inserting the same keys",
                dimension.name()
            )));
        }
        Ok(Attempt::Done(ids))
    })
    .await?;

    if ids.len() != keys.len() {
        return Err(ObsError::storage(format!(
            "{}: resolved {} ids for {} keys",
            dimension.name(),
            ids.len(),
            keys.len()
        )));
    }
    Ok(ids)
}

pub struct TimeSeriesDimension<'a, C> {
    conn: &'a C,
    key_fields: &'a [TsField],
}

impl<'a, C: ConnectionTrait> TimeSeriesDimension<'a, C> {
    pub fn new(conn: &'a C, key_fields: &'a [TsField]) -> Self {
        Self { conn, key_fields }
    }

    fn value_columns(&self) -> Vec<TsField> {
        TsField::ALL
            .iter()
            .copied()
            .filter(|field| !self.key_fields.contains(field))
            .collect()
    }

    fn decode_key(&self, row: &sea_orm::QueryResult) -> ObsResult<TsKey> {
        self.key_fields
            .iter()
            .map(|field| read_field(row, *field))
            .collect::<ObsResult<Vec<_>>>()
            .map(TsKey)
    }

    fn decode_ids(&self, rows: &[sea_orm::QueryResult]) -> ObsResult<Vec<(TsKey, i64)>> {
        rows.iter()
            .map(|row| Ok((self.decode_key(row)?, get::<i64>(row, "id")?)))
            .collect()
    }
}

pub(crate) fn read_field(row: &sea_orm::QueryResult, field: TsField) -> ObsResult<FieldValue> {
    match field.kind() {
        FieldKind::Int64 => get::<i64>(row, field.name()).map(FieldValue::Int),
        FieldKind::String | FieldKind::Links => get::<String>(row, field.name()).map(FieldValue::Str),
    }
}

fn field_expr(value: FieldValue) -> SimpleExpr {
    match value {
        FieldValue::Int(value) => Expr::val(value).into(),
        FieldValue::Str(value) => Expr::val(value).into(),
    }
}

#[async_trait]
impl<'a, C: ConnectionTrait> Dimension for TimeSeriesDimension<'a, C> {
    type Row = TsMetadata;
    type Key = TsKey;

    fn name(&self) -> &'static str {
        "time_series"
    }

    fn key_of(&self, row: &TsMetadata) -> TsKey {
        TsKey::of(row, self.key_fields)
    }

    async fn upsert(&self, rows: &[TsMetadata]) -> ObsResult<Vec<(TsKey, i64)>> {
        let mut insert = Query::insert();
        insert
            .into_table(TimeSeries::Table)
            .columns(TsField::ALL.iter().map(|field| ts_col(*field)));
        for ts in rows {
            insert
                .values(TsField::ALL.iter().map(|field| field_expr(field.value_of(ts))))
                .map_err(|err| ObsError::storage(format!("build time_series upsert: {err}")))?;
        }

        let value_columns = self.value_columns();
        let mut on_conflict = OnConflict::columns(self.key_fields.iter().map(|field| ts_col(*field)));
        match changed_any(&value_columns) {
            Some(changed) => {
                on_conflict
                    .update_columns(value_columns.iter().map(|field| ts_col(*field)))
                    .action_and_where(changed);
            }
            None => {
                on_conflict.do_nothing();
            }
        }
        insert.on_conflict(on_conflict).returning(
            Query::returning().columns(
                std::iter::once(Alias::new("id"))
                    .chain(self.key_fields.iter().map(|field| ts_col(*field))),
            ),
        );

        let rows = query_all(self.conn, &insert)
            .await
            .map_err(|err| err.context("upsert time_series"))?;
        self.decode_ids(&rows)
    }

    async fn fetch(&self, keys: &[TsKey]) -> ObsResult<Vec<(TsKey, i64)>> {
        let mut any = Condition::any();
        for key in keys {
            let mut all = Condition::all();
            for (field, value) in self.key_fields.iter().zip(key.0.iter()) {
                all = all.add(
                    Expr::col((TimeSeries::Table, ts_col(*field))).eq(field_expr(value.clone())),
                );
            }
            any = any.add(all);
        }
        let select = Query::select()
            .column((TimeSeries::Table, TimeSeries::Id))
            .columns(
                self.key_fields
                    .iter()
                    .map(|field| (TimeSeries::Table, ts_col(*field))),
            )
            .from(TimeSeries::Table)
            .cond_where(any)
            .to_owned();
        let rows = query_all(self.conn, &select)
            .await
            .map_err(|err| err.context("select time_series"))?;
        self.decode_ids(&rows)
    }
}

// `col <> excluded.col` for every updatable column; `None` when every column is part of the key.
fn changed_any(columns: &[TsField]) -> Option<SimpleExpr> {
    columns
        .iter()
        .map(|field| {
            Expr::col((TimeSeries::Table, ts_col(*field)))
                .ne(Expr::col((excluded(), ts_col(*field))))
        })
        .reduce(|left, right| left.or(right))
}

pub struct GeoPointDimension<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> GeoPointDimension<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

fn decode_geo_ids(rows: &[sea_orm::QueryResult]) -> ObsResult<Vec<(GeoKey, i64)>> {
    rows.iter()
        .map(|row| {
            let point = GeoPoint::new(get::<f64>(row, "lon")?, get::<f64>(row, "lat")?);
            Ok((point.key(), get::<i64>(row, "id")?))
        })
        .collect()
}

#[async_trait]
impl<'a, C: ConnectionTrait> Dimension for GeoPointDimension<'a, C> {
    type Row = GeoPoint;
    type Key = GeoKey;

    fn name(&self) -> &'static str {
        "geo_point"
    }

    fn key_of(&self, row: &GeoPoint) -> GeoKey {
        row.key()
    }

    async fn upsert(&self, rows: &[GeoPoint]) -> ObsResult<Vec<(GeoKey, i64)>> {
        let mut insert = Query::insert();
        insert
            .into_table(GeoPoints::Table)
            .columns([GeoPoints::Lon, GeoPoints::Lat]);
        for point in rows {
            if !point.lon.is_finite() || !point.lat.is_finite() {
                return Err(ObsError::invalid(format!(
                    "geo point coordinates must be finite: ({}, {})",
                    point.lon, point.lat
                )));
            }
            insert
                .values([point.lon.into(), point.lat.into()])
                .map_err(|err| ObsError::storage(format!("build geo_point upsert: {err}")))?;
        }
        insert
            .on_conflict(
                OnConflict::columns([GeoPoints::Lon, GeoPoints::Lat])
                    .do_nothing()
                    .to_owned(),
            )
            .returning(Query::returning().columns([GeoPoints::Id, GeoPoints::Lon, GeoPoints::Lat]));
        let rows = query_all(self.conn, &insert)
            .await
            .map_err(|err| err.context("upsert geo_point"))?;
        decode_geo_ids(&rows)
    }

    async fn fetch(&self, keys: &[GeoKey]) -> ObsResult<Vec<(GeoKey, i64)>> {
        let mut any = Condition::any();
        for key in keys {
            let point = key.point();
            any = any.add(
                Condition::all()
                    .add(Expr::col((GeoPoints::Table, GeoPoints::Lon)).eq(point.lon))
                    .add(Expr::col((GeoPoints::Table, GeoPoints::Lat)).eq(point.lat)),
            );
        }
        let select = Query::select()
            .columns([
                (GeoPoints::Table, GeoPoints::Id),
                (GeoPoints::Table, GeoPoints::Lon),
                (GeoPoints::Table, GeoPoints::Lat),
            ])
            .from(GeoPoints::Table)
            .cond_where(any)
            .to_owned();
        let rows = query_all(self.conn, &select)
            .await
            .map_err(|err| err.context("select geo_point"))?;
        decode_geo_ids(&rows)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{Dimension, FETCH_BATCH, resolve_ids};
    use obsdb_core::{ObsError, ObsResult};

    /// In-memory dimension keyed by name whose committed rows can lag behind the
    /// statements that create them, the way a concurrent writer's insert does.
    struct RacyDimension {
        state: Mutex<RacyState>,
    }

    #[derive(Default)]
    struct RacyState {
        committed: BTreeMap<String, (i64, u32)>,
        next_id: i64,
        /// Number of fetches during which a racing insert stays invisible.
        hidden_fetches: u32,
        racing_key: Option<String>,
        upserts: u32,
        fetch_sizes: Vec<usize>,
    }

    impl RacyDimension {
        fn new(state: RacyState) -> Self {
            Self {
                state: Mutex::new(state),
            }
        }

        fn upserts(&self) -> u32 {
            self.state.lock().expect("state").upserts
        }
    }

    #[async_trait]
    impl Dimension for RacyDimension {
        type Row = (String, u32);
        type Key = String;

        fn name(&self) -> &'static str {
            "racy"
        }

        fn key_of(&self, row: &(String, u32)) -> String {
            row.0.clone()
        }

        async fn upsert(&self, rows: &[(String, u32)]) -> ObsResult<Vec<(String, i64)>> {
            let mut state = self.state.lock().expect("state");
            state.upserts += 1;
            let mut touched = Vec::new();
            for (key, attr) in rows {
                // A concurrent writer owns this key: the statement waits on it and reports nothing.
                if state.racing_key.as_deref() == Some(key.as_str()) {
                    continue;
                }
                match state.committed.get(key).copied() {
                    Some((_, stored)) if stored == *attr => {}
                    Some((id, _)) => {
                        state.committed.insert(key.clone(), (id, *attr));
                        touched.push((key.clone(), id));
                    }
                    None => {
                        state.next_id += 1;
                        let id = state.next_id;
                        state.committed.insert(key.clone(), (id, *attr));
                        touched.push((key.clone(), id));
                    }
                }
            }
            Ok(touched)
        }

        async fn fetch(&self, keys: &[String]) -> ObsResult<Vec<(String, i64)>> {
            let mut state = self.state.lock().expect("state");
            state.fetch_sizes.push(keys.len());
            if state.hidden_fetches > 0 {
                state.hidden_fetches -= 1;
            } else if let Some(key) = state.racing_key.take() {
                // The racing writer commits.
                state.next_id += 1;
                let id = state.next_id;
                state.committed.entry(key).or_insert((id, 0));
            }
            Ok(keys
                .iter()
                .filter_map(|key| state.committed.get(key).map(|(id, _)| (key.clone(), *id)))
                .collect())
        }
    }

    fn rows(items: &[(&str, u32)]) -> Vec<(String, u32)> {
        items
            .iter()
            .map(|(key, attr)| (key.to_string(), *attr))
            .collect()
    }

    #[tokio::test]
    async fn unchanged_rows_are_found_by_lookup() {
        let dimension = RacyDimension::new(RacyState::default());
        let first = resolve_ids(&dimension, rows(&[("a", 1), ("b", 1)]), 3)
            .await
            .expect("first");
        let second = resolve_ids(&dimension, rows(&[("a", 1), ("b", 1)]), 3)
            .await
            .expect("second");
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_keys_keep_last_attributes() {
        let dimension = RacyDimension::new(RacyState::default());
        let ids = resolve_ids(&dimension, rows(&[("a", 1), ("a", 7)]), 3)
            .await
            .expect("resolve");
        assert_eq!(ids.len(), 1);
        let state = dimension.state.lock().expect("state");
        assert_eq!(state.committed.get("a").map(|(_, attr)| *attr), Some(7));
    }

    #[tokio::test]
    async fn racing_insert_converges_within_attempts() {
        let dimension = RacyDimension::new(RacyState {
            hidden_fetches: 2,
            racing_key: Some("a".to_string()),
            ..Default::default()
        });
        let ids = resolve_ids(&dimension, rows(&[("a", 0), ("b", 0)]), 3)
            .await
            .expect("converges");
        assert_eq!(ids.len(), 2);
        assert_eq!(dimension.upserts(), 3);
        let committed = dimension.state.lock().expect("state").committed.clone();
        assert_eq!(ids.get("a"), committed.get("a").map(|(id, _)| id));
    }

    #[tokio::test]
    async fn persistent_race_exhausts_attempts() {
        let dimension = RacyDimension::new(RacyState {
            hidden_fetches: 3,
            racing_key: Some("a".to_string()),
            ..Default::default()
        });
        let err = resolve_ids(&dimension, rows(&[("a", 0)]), 3)
            .await
            .expect_err("exhausted");
        match err {
            ObsError::UnresolvedIdentity { message, attempts } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("concurrent writers"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dimension.upserts(), 3);
    }

    #[tokio::test]
    async fn lookups_are_split_into_bounded_batches() {
        let dimension = RacyDimension::new(RacyState::default());
        let keys: Vec<(String, u32)> = (0..FETCH_BATCH * 2 + 50)
            .map(|index| (format!("key-{index:04}"), 1))
            .collect();
        resolve_ids(&dimension, keys.clone(), 3).await.expect("first");
        let ids = resolve_ids(&dimension, keys.clone(), 3).await.expect("second");
        assert_eq!(ids.len(), keys.len());
        let sizes = dimension.state.lock().expect("state").fetch_sizes.clone();
        assert_eq!(sizes, vec![FETCH_BATCH, FETCH_BATCH, 50]);
    }

    #[tokio::test]
    async fn empty_input_skips_the_backend() {
        let dimension = RacyDimension::new(RacyState::default());
        let ids = resolve_ids(&dimension, Vec::new(), 3).await.expect("empty");
        assert!(ids.is_empty());
        assert_eq!(dimension.upserts(), 0);
    }
}
