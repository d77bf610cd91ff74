use serde::{Deserialize, Serialize};

use crate::ObsTime;
use crate::fields::{FieldValue, TsField};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type")]
    pub link_type: String,
    pub hreflang: String,
    pub title: String,
}

/// Descriptive metadata of one time series. Which fields form the natural key is
/// decided by the backing store, not by this type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TsMetadata {
    pub title: String,
    pub summary: String,
    pub keywords: String,
    pub license: String,
    pub naming_authority: String,
    pub creator_name: String,
    pub institution: String,
    pub source: String,
    pub platform: String,
    pub platform_vocabulary: String,
    pub platform_name: String,
    pub standard_name: String,
    pub unit: String,
    pub instrument: String,
    pub instrument_vocabulary: String,
    pub parameter_name: String,
    pub function: String,
    pub level: i64,
    pub period: i64,
    pub links: Vec<Link>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn key(&self) -> GeoKey {
        GeoKey::from_point(*self)
    }
}

/// Exact-match identity of a geo point, usable as a map key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeoKey {
    lon_bits: u64,
    lat_bits: u64,
}

impl GeoKey {
    pub fn from_point(point: GeoPoint) -> Self {
        Self {
            lon_bits: canonical_bits(point.lon),
            lat_bits: canonical_bits(point.lat),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lon: f64::from_bits(self.lon_bits),
            lat: f64::from_bits(self.lat_bits),
        }
    }
}

// -0.0 and 0.0 compare equal in SQL, so they must share a key.
fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 { 0.0f64.to_bits() } else { value.to_bits() }
}

/// Natural-key values of a time series, in the order of the discovered key columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TsKey(pub Vec<FieldValue>);

impl TsKey {
    pub fn of(ts: &TsMetadata, key_fields: &[TsField]) -> Self {
        Self(key_fields.iter().map(|field| field.value_of(ts)).collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObsMetadata {
    pub obs_id: String,
    pub geo_point: GeoPoint,
    pub pubtime: ObsTime,
    pub data_id: String,
    pub history: String,
    pub processing_level: String,
    pub quality_code: i64,
    pub camsl: f64,
    pub obstime: ObsTime,
    pub value: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts: TsMetadata,
    pub obs: ObsMetadata,
}

#[cfg(test)]
mod tests {
    use super::{GeoPoint, TsKey, TsMetadata};
    use crate::fields::{FieldValue, TsField};

    #[test]
    fn signed_zero_shares_a_geo_key() {
        assert_eq!(
            GeoPoint::new(0.0, 10.0).key(),
            GeoPoint::new(-0.0, 10.0).key()
        );
        assert_ne!(GeoPoint::new(1.0, 2.0).key(), GeoPoint::new(2.0, 1.0).key());
    }

    #[test]
    fn geo_key_round_trips_point() {
        let point = GeoPoint::new(10.75, 59.91);
        assert_eq!(point.key().point(), point);
    }

    #[test]
    fn ts_key_follows_key_field_order() {
        let ts = TsMetadata {
            platform: "P1".into(),
            level: 2,
            ..Default::default()
        };
        let key = TsKey::of(&ts, &[TsField::Level, TsField::Platform]);
        assert_eq!(
            key.0,
            vec![FieldValue::Int(2), FieldValue::Str("P1".into())]
        );
    }
}
