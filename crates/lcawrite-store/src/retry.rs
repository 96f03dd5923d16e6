use tracing::warn;

use crate::StoreError;

/// Extra attempts after the first one.
pub const DEFAULT_RETRIES: usize = 2;

/// Run `op`, retrying up to `retries` more times while the error is
/// retryable. Returns the last error once attempts run out.
pub fn with_retries<T, F>(retries: usize, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(attempt, retries, error = %err, "store call failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_retries(2, || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Transport("timeout".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(1, || {
            calls += 1;
            Err(StoreError::Transport("timeout".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn conflict_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(5, || {
            calls += 1;
            Err(StoreError::Conflict {
                id: "p1".into(),
                version: "01.00.000".into(),
            })
        });
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_retries_is_a_single_attempt() {
        let mut calls = 0;
        let _: Result<(), _> = with_retries(0, || {
            calls += 1;
            Err(StoreError::Transport("boom".into()))
        });
        assert_eq!(calls, 1);
    }
}
