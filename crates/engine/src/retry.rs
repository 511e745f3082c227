//! Bounded retry of idempotent reads

use crate::error::Result;
use mantle_storage::StoreResult;
use tracing::warn;

/// Run a read, reissuing it up to `retries` times on retryable driver errors
///
/// Writes never go through here: a write that timed out may have been
/// applied, so reissuing it is not safe.
pub(crate) fn read_with_retries<T>(
    retries: u32,
    operation: &str,
    mut read: impl FnMut() -> StoreResult<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match read() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(target: "mantle::storage", operation, attempt, error = %e, "Retrying read");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use mantle_storage::StoreError;

    #[test]
    fn test_transient_errors_are_retried() {
        let mut calls = 0;
        let out = read_with_retries(2, "find", || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Transient("primary stepped down".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let mut calls = 0;
        let out: Result<()> = read_with_retries(1, "find", || {
            calls += 1;
            Err(StoreError::Transient("flaky".into()))
        });
        assert!(matches!(out, Err(Error::Storage(StoreError::Transient(_)))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let out: Result<()> = read_with_retries(5, "find", || {
            calls += 1;
            Err(StoreError::Connection("refused".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }
}
