use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fields::FieldValue;
use crate::model::{GeoPoint, Observation};
use crate::{ObsResult, ObsTime};

/// Half-open interval `[start, end)`; a missing bound leaves that side open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Option<ObsTime>,
    pub end: Option<ObsTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: GeoPoint,
    pub radius_km: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub interval: Option<TimeInterval>,
    pub polygon: Option<Vec<GeoPoint>>,
    pub circle: Option<Circle>,
    pub camsl_range: Option<String>,
    /// Field name to patterns; patterns of one field are alternatives.
    pub metadata: BTreeMap<String, Vec<String>>,
}

impl FilterSpec {
    pub fn with_patterns(mut self, field: &str, patterns: &[&str]) -> Self {
        self.metadata.insert(
            field.to_string(),
            patterns.iter().map(|pattern| pattern.to_string()).collect(),
        );
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetObservationsInput {
    pub filter: FilterSpec,
    /// Keep only the most recent matching observation of each time series.
    pub latest: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationItem {
    pub platform: String,
    pub platform_name: String,
    pub parameter_name: String,
    pub point: GeoPoint,
    pub obstime: ObsTime,
    /// Every parameter observed for the platform, sorted.
    pub parameter_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TsAttrGroupsInput {
    pub attrs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TsAttrGroup {
    pub values: BTreeMap<String, FieldValue>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutReport {
    pub observations: usize,
    pub chunks: usize,
}

#[async_trait]
pub trait ObservationWriteApi {
    async fn put_observations(&self, batch: Vec<Observation>) -> ObsResult<PutReport>;
}

#[async_trait]
pub trait ObservationReadApi {
    async fn get_observations(&self, input: GetObservationsInput) -> ObsResult<Vec<Observation>>;
    async fn get_locations(&self, filter: FilterSpec) -> ObsResult<Vec<LocationItem>>;
    async fn get_ts_attr_groups(&self, input: TsAttrGroupsInput) -> ObsResult<Vec<TsAttrGroup>>;
}
