//! Retry decorator: up to 3 retries with exponential backoff (1s, 2s, 4s),
//! applied only to transient errors (spawn failures, timeouts). A structured
//! `ToolError` from the collaborator itself is not retried — the collaborator
//! already ran and gave a definitive answer.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::CollaboratorError;

const BACKOFFS_MS: [u64; 3] = [1000, 2000, 4000];

fn is_transient(err: &CollaboratorError) -> bool {
    matches!(
        err,
        CollaboratorError::SpawnFailed { .. } | CollaboratorError::Timeout { .. }
    )
}

/// Run `attempt` up to `1 + BACKOFFS_MS.len()` times, sleeping between
/// retries only when the prior failure was transient.
pub async fn with_retry<T, F, Fut>(label: &str, mut attempt: F) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut last_err = None;
    for (i, backoff_ms) in std::iter::once(&0u64).chain(BACKOFFS_MS.iter()).enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
        }
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_transient(&err) {
                    return Err(err);
                }
                warn!(collaborator = label, attempt = i + 1, error = %err, "transient failure, retrying");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

</content>
