use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Fibonacci backoff delays starting at `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    fib: (Duration, Duration),
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self {
            fib: (initial, initial),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.fib.0;
        self.fib = (self.fib.1, self.fib.0 + self.fib.1);
        Some(delay)
    }
}

/// Retries `operation` with Fibonacci backoff until it succeeds or
/// `max_retries` retries have failed, returning the last error.
pub async fn retry_with_backoff<T, E, Fut, F>(
    mut operation: F,
    initial_delay: Duration,
    max_retries: usize,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut retries = 0;
    let mut delays = Backoff::new(initial_delay);

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if retries < max_retries => {
                let delay = delays.next().unwrap_or(initial_delay);
                debug!(
                    "Operation failed: {:?}. Retrying in {:?} (attempt {}/{})",
                    e,
                    delay,
                    retries + 1,
                    max_retries
                );
                sleep(delay).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
