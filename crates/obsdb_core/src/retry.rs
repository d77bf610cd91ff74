use std::future::Future;

use crate::{ObsError, ObsResult};

pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Outcome of one attempt of a retried operation.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient condition; the reason is reported if every attempt ends this way.
    Retry(String),
}

/// Run `operation` up to `max_attempts` times without backoff.
///
/// Errors returned by the operation end the loop immediately; only
/// [`Attempt::Retry`] consumes another attempt. Exhaustion yields
/// [`ObsError::UnresolvedIdentity`] carrying the last reason and attempt count.
pub async fn retry_bounded<T, F, Fut>(max_attempts: u32, mut operation: F) -> ObsResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ObsResult<Attempt<T>>>,
{
    let mut last_reason = String::from("no attempt made");
    for attempt in 1..=max_attempts {
        match operation(attempt).await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry(reason) => last_reason = reason,
        }
    }
    Err(ObsError::unresolved(last_reason, max_attempts))
}
