//! Bounded worker pool shared by Validator, Monitor, and Synchronizer
//! (§4.6-§4.8, §5 "bounded worker pool per network"). No teacher module
//! spawns concurrent I/O (chemflow's workflow engine is single-threaded
//! per step), so this is built fresh on the standard Tokio idiom — a
//! `Semaphore` bounding concurrency plus a `JoinSet` draining results —
//! rather than ported from any one example.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs `f(item)` for every item in `items`, at most `concurrency` futures
/// in flight at once. Results are collected in completion order, not
/// input order — callers that need per-item identity should carry it
/// inside `R`.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let mut set = JoinSet::new();

    for item in items {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore is never closed");
        let f = f.clone();
        set.spawn(async move {
            let result = f(item).await;
            drop(permit);
            result
        });
    }

    let mut results = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_every_item_exactly_once() {
        let items: Vec<u32> = (0..20).collect();
        let results = run_bounded(items, 4, |i| async move { i * 2 }).await;
        let sum: u32 = results.iter().sum();
        let expected: u32 = (0..20).map(|i| i * 2).sum();
        assert_eq!(results.len(), 20);
        assert_eq!(sum, expected);
    }

    #[tokio::test]
    async fn never_exceeds_configured_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..30).collect();

        let in_flight_for_closure = in_flight.clone();
        let max_seen_for_closure = max_seen.clone();
        run_bounded(items, 5, move |_i| {
            let in_flight = in_flight_for_closure.clone();
            let max_seen = max_seen_for_closure.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(max_seen.load(Ordering::SeqCst) <= 5);
    }
}
