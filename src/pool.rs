//! Bounded task pool.
//!
//! Runs a queue of futures with at most `concurrency` of them in flight.
//! Results come back in the order the tasks were queued, whatever order they
//! finish in. The first task to fail fails the whole batch; futures still in
//! flight are dropped with the stream.

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::pin::pin;

/// Runs `tasks` with at most `concurrency` in flight and collects their
/// results by original index.
pub async fn run_bounded<I, Fut, T, E>(tasks: I, concurrency: usize) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    let mut slots: Vec<Option<T>> = Vec::new();

    let mut running = pin!(stream::iter(Indexed(tasks.into_iter().enumerate()))
        .buffer_unordered(concurrency.max(1)));

    while let Some((index, result)) = running.next().await {
        let value = result?;
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        slots[index] = Some(value);
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Tags each task's output with its queue index.
struct Indexed<I>(std::iter::Enumerate<I>);

impl<I> Iterator for Indexed<I>
where
    I: Iterator,
    I::Item: Future,
{
    type Item = future::Join<future::Ready<usize>, I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, task) = self.0.next()?;
        Some(future::join(future::ready(index), task))
    }
}
