use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::Backoff;

/// Most write requests DynamoDB accepts in one `BatchWriteItem` call.
pub const MAX_BATCH_WRITE: usize = 25;
/// Most keys DynamoDB accepts in one `BatchGetItem` call.
pub const MAX_BATCH_GET: usize = 100;
/// Most actions DynamoDB accepts in one `TransactWriteItems` call.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// How batched calls are chunked, run and retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Write requests per `BatchWriteItem` call, capped at 25.
    pub batch_size: usize,
    /// Keys per `BatchGetItem` call, capped at 100.
    pub get_batch_size: usize,
    /// Batch calls in flight at once.
    pub concurrency: usize,
    /// Resends of unprocessed items before giving up.
    pub max_retries: usize,
    pub initial_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_WRITE,
            get_batch_size: MAX_BATCH_GET,
            concurrency: 4,
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl BatchOptions {
    pub fn write_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_WRITE)
    }

    pub fn get_size(&self) -> usize {
        self.get_batch_size.clamp(1, MAX_BATCH_GET)
    }
}

/// Splits `items` into chunks of at most `size`, keeping their order.
pub fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sends one chunk of `requests` until DynamoDB has processed all of it.
///
/// `send` makes a single batch call and returns what it found together with
/// the requests left unprocessed. Leftovers are resent after a Fibonacci
/// backoff delay; once `max_retries` resends have not cleared them the call
/// fails with `Error::Unprocessed`.
pub async fn send_until_processed<R, T, F, Fut>(
    options: &BatchOptions,
    requests: Vec<R>,
    mut send: F,
) -> Result<Vec<T>>
where
    F: FnMut(Vec<R>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Vec<R>)>>,
{
    let mut pending = requests;
    let mut found = Vec::new();
    let mut delays = Backoff::new(options.initial_delay);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let (items, unprocessed) = send(pending).await?;
        found.extend(items);
        pending = unprocessed;

        if pending.is_empty() {
            return Ok(found);
        }
        if attempts > options.max_retries {
            return Err(Error::Unprocessed {
                count: pending.len(),
                attempts,
            });
        }

        let delay = delays.next().unwrap_or(options.initial_delay);
        debug!("{} requests unprocessed, retrying in {:?}", pending.len(), delay);
        sleep(delay).await;
    }
}
