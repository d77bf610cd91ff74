use crate::model::Observation;
use crate::{ObsError, ObsResult, ValidWindow};

/// Lowest bound-parameter ceiling among the supported engines (SQLite).
pub const PARAM_CEILING: usize = 32_766;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    /// Hard limit on the size of one write call.
    pub max_batch: usize,
    /// Maximum number of observations per upsert statement.
    pub chunk_size: usize,
}

impl BatchLimits {
    pub fn new(max_batch: usize, chunk_size: usize, params_per_row: usize) -> ObsResult<Self> {
        if chunk_size == 0 {
            return Err(ObsError::invalid("chunk size must be positive"));
        }
        if chunk_size > max_batch {
            return Err(ObsError::invalid(format!(
                "chunk size {chunk_size} exceeds batch limit {max_batch}"
            )));
        }
        if chunk_size.saturating_mul(params_per_row) >= PARAM_CEILING {
            return Err(ObsError::invalid(format!(
                "chunk size {chunk_size} x {params_per_row} parameters per row reaches the \
                 bound parameter ceiling {PARAM_CEILING}"
            )));
        }
        Ok(Self {
            max_batch,
            chunk_size,
        })
    }

    pub fn check_batch(&self, len: usize) -> ObsResult<()> {
        if len > self.max_batch {
            return Err(ObsError::out_of_range(format!(
                "too many observations in a single call: {len} > {}",
                self.max_batch
            )));
        }
        Ok(())
    }

    /// Consecutive, order-preserving slices of at most `chunk_size` elements.
    pub fn chunks<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.chunk_size)
    }

    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }
}

/// Fail on the first observation of the chunk that lies outside `window`.
pub fn enforce_window(window: &ValidWindow, chunk: &[Observation]) -> ObsResult<()> {
    chunk
        .iter()
        .try_for_each(|observation| window.check(observation.obs.obstime))
}
