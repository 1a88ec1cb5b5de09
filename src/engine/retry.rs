use std::future::Future;
use std::io;
use std::time::Duration;

use crate::limits::{STORE_RETRY_ATTEMPTS, STORE_RETRY_BACKOFF_MS};

/// Data and input errors will fail the same way again; everything else is
/// treated as transient.
fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::PermissionDenied
    )
}

/// Run `op`, retrying transient I/O failures a bounded number of times with
/// linear backoff.
pub(crate) async fn retry_io<T, F, Fut>(what: &'static str, mut op: F) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < STORE_RETRY_ATTEMPTS && is_transient(&e) => {
                attempt += 1;
                tracing::warn!("{what} failed (attempt {attempt}): {e}; retrying");
                metrics::counter!(crate::observability::STORE_RETRIES_TOTAL, "store" => what)
                    .increment(1);
                tokio::time::sleep(Duration::from_millis(STORE_RETRY_BACKOFF_MS * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = retry_io("test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(io::Error::new(io::ErrorKind::TimedOut, "slow disk"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result: io::Result<()> = retry_io("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("down"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), STORE_RETRY_ATTEMPTS + 1);
    }

    #[tokio::test]
    async fn invalid_data_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: io::Result<()> = retry_io("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad json"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
