use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::ObsTime;
use crate::api::LocationItem;
use crate::model::GeoPoint;

/// One matching observation as seen by the latest-location view.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationCandidate {
    pub ts_id: i64,
    pub geo_point_id: i64,
    pub platform: String,
    pub platform_name: String,
    pub parameter_name: String,
    pub point: GeoPoint,
    pub obstime: ObsTime,
}

// Newer wins; equal instants fall back to the lower (ts_id, geo_point_id).
fn supersedes(candidate: &LocationCandidate, current: &LocationCandidate) -> bool {
    match candidate.obstime.cmp(&current.obstime) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            (candidate.ts_id, candidate.geo_point_id) < (current.ts_id, current.geo_point_id)
        }
    }
}

/// Reduce matching observations to the most recent one per (platform, parameter),
/// each carrying the sorted parameter roster of its platform. Output is ordered
/// by platform, then parameter.
pub fn aggregate_latest_locations(
    candidates: impl IntoIterator<Item = LocationCandidate>,
) -> Vec<LocationItem> {
    let mut rosters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut latest: BTreeMap<(String, String), LocationCandidate> = BTreeMap::new();

    for candidate in candidates {
        rosters
            .entry(candidate.platform.clone())
            .or_default()
            .insert(candidate.parameter_name.clone());
        let key = (candidate.platform.clone(), candidate.parameter_name.clone());
        match latest.get(&key) {
            Some(current) if !supersedes(&candidate, current) => {}
            _ => {
                latest.insert(key, candidate);
            }
        }
    }

    latest
        .into_values()
        .map(|winner| {
            let parameter_names = rosters
                .get(&winner.platform)
                .map(|roster| roster.iter().cloned().collect())
                .unwrap_or_default();
            LocationItem {
                platform: winner.platform,
                platform_name: winner.platform_name,
                parameter_name: winner.parameter_name,
                point: winner.point,
                obstime: winner.obstime,
                parameter_names,
            }
        })
        .collect()
}
