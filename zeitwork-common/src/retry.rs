use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, ErrorKind};

/// Retries `f` up to `max_tries` times with exponential backoff plus jitter,
/// but only for errors whose [`ErrorKind`] is [`ErrorKind::Transient`]
/// (spec §7: "retry transient I/O locally up to a small bound (3 tries with
/// jitter); otherwise let the task fail").
pub async fn with_retry<T, F, Fut>(max_tries: u32, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if err.kind() == ErrorKind::Transient && attempt + 1 < max_tries => {
                let backoff_ms = 2u64.pow(attempt) * 100;
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff_ms / 2 + 1);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let tries = AtomicU32::new(0);
        let result = with_retry(3, || async {
            if tries.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::from_kind(ErrorKind::Transient))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(tries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let tries = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(3, || async {
            tries.fetch_add(1, Ordering::SeqCst);
            Err(Error::from_kind(ErrorKind::Conflict))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(tries.load(Ordering::SeqCst), 1);
    }
}
