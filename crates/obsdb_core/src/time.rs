use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{ObsError, ObsResult};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Observation instant in microseconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct ObsTime(pub i64);

impl ObsTime {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        Self(micros)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(MICROS_PER_SECOND))
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn plus_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs.saturating_mul(MICROS_PER_SECOND)))
    }
}

impl fmt::Display for ObsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Closed interval of instants the store accepts and serves.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ValidWindow {
    pub lo: ObsTime,
    pub hi: ObsTime,
}

impl ValidWindow {
    pub fn new(lo: ObsTime, hi: ObsTime) -> ObsResult<Self> {
        if lo > hi {
            return Err(ObsError::invalid(format!(
                "valid window lower bound {lo} is after upper bound {hi}"
            )));
        }
        Ok(Self { lo, hi })
    }

    pub fn contains(&self, instant: ObsTime) -> bool {
        self.lo <= instant && instant <= self.hi
    }

    pub fn check(&self, instant: ObsTime) -> ObsResult<()> {
        if instant < self.lo {
            return Err(ObsError::out_of_range(format!(
                "obs time too old: {instant} < {} (valid range: [{}, {}])",
                self.lo, self.lo, self.hi
            )));
        }
        if instant > self.hi {
            return Err(ObsError::out_of_range(format!(
                "obs time too new: {instant} > {} (valid range: [{}, {}])",
                self.hi, self.lo, self.hi
            )));
        }
        Ok(())
    }
}
