pub mod api;
pub mod chunk;
pub mod error;
pub mod fields;
pub mod location;
pub mod model;
pub mod pattern;
pub mod retry;
pub mod time;

pub use api::*;
pub use chunk::{BatchLimits, PARAM_CEILING, enforce_window};
pub use error::{ObsError, ObsResult, StatusCode, status_of};
pub use fields::{DEFAULT_NATURAL_KEY, FieldKind, FieldValue, ObsField, QueryableField, TsField};
pub use location::{LocationCandidate, aggregate_latest_locations};
pub use model::*;
pub use retry::{Attempt, DEFAULT_ATTEMPTS, retry_bounded};
pub use time::*;
