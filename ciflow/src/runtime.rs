//! Stage timeout helpers.
//!
//! Fetch and test stages run under an optional wall-clock budget. A budget of
//! zero seconds in the configuration means "no limit".

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Result of a timed operation.
#[derive(Debug)]
pub enum TimedResult<T, E> {
    /// Operation completed successfully.
    Ok(T),
    /// Operation failed with an error.
    Err(E),
    /// Operation timed out.
    Timeout,
}

/// Runs a fallible future under an optional timeout.
///
/// The future is dropped when the budget runs out, which kills any child
/// process spawned with `kill_on_drop`.
pub async fn run_with_timeout<T, E, F>(budget: Option<Duration>, future: F) -> TimedResult<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let outcome = match budget {
        Some(duration) => match timeout(duration, future).await {
            Ok(outcome) => outcome,
            Err(_) => return TimedResult::Timeout,
        },
        None => future.await,
    };

    match outcome {
        Ok(value) => TimedResult::Ok(value),
        Err(error) => TimedResult::Err(error),
    }
}

/// Converts a configured number of seconds into a budget.
#[must_use]
pub fn budget_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_from_secs() {
        assert_eq!(budget_from_secs(0), None);
        assert_eq!(budget_from_secs(90), Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn test_run_with_timeout_success() {
        let result: TimedResult<i32, &str> =
            run_with_timeout(Some(Duration::from_secs(1)), async { Ok(42) }).await;
        assert!(matches!(result, TimedResult::Ok(42)));
    }

    #[tokio::test]
    async fn test_run_without_budget() {
        let result: TimedResult<i32, &str> = run_with_timeout(None, async { Err("error") }).await;
        assert!(matches!(result, TimedResult::Err("error")));
    }

    #[tokio::test]
    async fn test_run_with_timeout_timeout() {
        let budget = Some(Duration::from_millis(10));
        let result: TimedResult<i32, &str> = run_with_timeout(budget, async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(42)
        })
        .await;
        assert!(matches!(result, TimedResult::Timeout));
    }
}
