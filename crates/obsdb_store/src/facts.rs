use std::collections::{BTreeMap, btree_map::Entry};

use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Expr, OnConflict, Query, SimpleExpr};

use crate::db::{FACT_VALUE_COLUMNS, Observations, exec, excluded};
use obsdb_core::{GeoKey, ObsError, ObsMetadata, ObsResult, ObsTime, Observation, TsField, TsKey};

/// One observation row with both dimension references resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct FactRow<'a> {
    pub ts_id: i64,
    pub geo_point_id: i64,
    pub obs: &'a ObsMetadata,
}

/// Fact rows of a chunk grouped by time series, then ordered by instant.
pub type FactGroups<'a> = BTreeMap<i64, BTreeMap<ObsTime, FactRow<'a>>>;

pub fn group_facts<'a>(
    chunk: &'a [Observation],
    key_fields: &[TsField],
    ts_ids: &BTreeMap<TsKey, i64>,
    geo_ids: &BTreeMap<GeoKey, i64>,
) -> ObsResult<FactGroups<'a>> {
    let mut groups = FactGroups::new();
    for observation in chunk {
        let ts_id = ts_ids
            .get(&TsKey::of(&observation.ts, key_fields))
            .copied()
            .ok_or_else(|| ObsError::storage("time series id missing after resolve"))?;
        let geo_point_id = geo_ids
            .get(&observation.obs.geo_point.key())
            .copied()
            .ok_or_else(|| ObsError::storage("geo point id missing after resolve"))?;
        match groups.entry(ts_id).or_default().entry(observation.obs.obstime) {
            Entry::Occupied(_) => {
                return Err(ObsError::storage(format!(
                    "duplicate observation for time series {ts_id} at {} in one chunk",
                    observation.obs.obstime
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(FactRow {
                    ts_id,
                    geo_point_id,
                    obs: &observation.obs,
                });
            }
        }
    }
    Ok(groups)
}

fn fact_values(row: &FactRow<'_>) -> [SimpleExpr; 11] {
    let obs = row.obs;
    [
        row.ts_id.into(),
        obs.obstime.as_micros().into(),
        obs.obs_id.clone().into(),
        row.geo_point_id.into(),
        obs.pubtime.as_micros().into(),
        obs.data_id.clone().into(),
        obs.history.clone().into(),
        obs.processing_level.clone().into(),
        obs.quality_code.into(),
        obs.camsl.into(),
        obs.value.into(),
    ]
}

/// Write every fact of the chunk with one statement. Rows whose stored values
/// already match are left untouched.
pub async fn upsert_facts<C: ConnectionTrait>(conn: &C, groups: &FactGroups<'_>) -> ObsResult<u64> {
    let rows: Vec<&FactRow<'_>> = groups.values().flat_map(|group| group.values()).collect();
    if rows.is_empty() {
        return Ok(0);
    }

    let mut insert = Query::insert();
    insert.into_table(Observations::Table).columns(
        [Observations::TsId, Observations::Obstime]
            .into_iter()
            .chain(FACT_VALUE_COLUMNS),
    );
    for row in &rows {
        insert
            .values(fact_values(row))
            .map_err(|err| ObsError::storage(format!("build observation upsert: {err}")))?;
    }

    let changed = FACT_VALUE_COLUMNS
        .into_iter()
        .map(|column| {
            Expr::col((Observations::Table, column)).ne(Expr::col((excluded(), column)))
        })
        .reduce(|left, right| left.or(right));
    let mut on_conflict = OnConflict::columns([Observations::TsId, Observations::Obstime]);
    on_conflict.update_columns(FACT_VALUE_COLUMNS);
    if let Some(changed) = changed {
        on_conflict.action_and_where(changed);
    }
    insert.on_conflict(on_conflict);

    exec(conn, &insert)
        .await
        .map_err(|err| err.context("upsert observation"))
}
