use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::db::is_contention;
use crate::mastery::config::RetryParams;
use crate::mastery::error::EngineError;

/// Outcome of one optimistic transaction attempt.
pub enum TxOutcome<T> {
    Committed(T),
    Conflict,
}

/// Re-runs the whole read-modify-write until it commits.
///
/// Version conflicts and SQLite lock contention both restart from the read;
/// other database errors surface as `Upstream` immediately.
pub async fn retry_optimistic<T, F, Fut>(
    params: &RetryParams,
    key: &str,
    mut run: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TxOutcome<T>, sqlx::Error>>,
{
    for attempt in 1..=params.max_attempts {
        match run().await {
            Ok(TxOutcome::Committed(value)) => return Ok(value),
            Ok(TxOutcome::Conflict) => {
                tracing::debug!(key, attempt, "version conflict, retrying");
            }
            Err(err) if is_contention(&err) => {
                tracing::debug!(key, attempt, error = %err, "store contention, retrying");
            }
            Err(err) => return Err(EngineError::Upstream(err)),
        }

        if attempt < params.max_attempts {
            tokio::time::sleep(backoff(params, attempt)).await;
        }
    }

    tracing::warn!(key, attempts = params.max_attempts, "optimistic update gave up");
    Err(EngineError::Conflict {
        key: key.to_string(),
        attempts: params.max_attempts,
    })
}

fn backoff(params: &RetryParams, attempt: u32) -> Duration {
    let base = params.base_backoff_ms.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::rng().random_range(0..=params.base_backoff_ms.max(1));
    Duration::from_millis(base + jitter)
}
