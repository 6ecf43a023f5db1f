//! Bounded worker pool shared by the scrape and check phases

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Run `work` over every unit with at most `max_workers` units in flight.
///
/// Units run as tasks on the multi-thread runtime, so they execute in
/// parallel. A permit is taken before a unit is spawned, which keeps the
/// number of live tasks bounded however many units are queued. Outputs come
/// back in completion order. A unit that panics is logged and contributes no
/// output; its siblings are unaffected.
pub async fn run_bounded<T, R, F, Fut>(
    units: impl IntoIterator<Item = T>,
    max_workers: usize,
    work: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();
    let mut outputs = Vec::new();

    for unit in units {
        // The semaphore is never closed, so acquiring cannot fail.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let work = Arc::clone(&work);
        tasks.spawn(async move {
            let output = work(unit).await;
            drop(permit);
            output
        });

        while let Some(joined) = tasks.try_join_next() {
            collect(joined, &mut outputs);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        collect(joined, &mut outputs);
    }

    outputs
}

fn collect<R>(joined: Result<R, tokio::task::JoinError>, outputs: &mut Vec<R>) {
    match joined {
        Ok(output) => outputs.push(output),
        Err(e) => error!("worker task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_every_unit() {
        let mut outputs = run_bounded(0..100u32, 8, |n| async move { n * 2 }).await;
        outputs.sort_unstable();
        assert_eq!(outputs, (0..100u32).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_max_workers() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (live_c, peak_c) = (Arc::clone(&live), Arc::clone(&peak));
        run_bounded(0..40, 3, move |_| {
            let live = Arc::clone(&live_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_workers_is_clamped() {
        let outputs = run_bounded(vec![1, 2, 3], 0, |n| async move { n }).await;
        assert_eq!(outputs.len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let mut outputs = run_bounded(vec![1, 2, 3], 2, |n| async move {
            if n == 2 {
                panic!("boom");
            }
            n
        })
        .await;
        outputs.sort_unstable();
        assert_eq!(outputs, vec![1, 3]);
    }
}
