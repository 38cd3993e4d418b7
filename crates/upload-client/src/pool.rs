//! Fixed-width worker pool over a queue of chunk indices.
//!
//! `width` workers pop indices from a shared queue and report each outcome
//! on a result channel. The pool finishes when every worker has exited: the
//! queue ran dry, the stop token fired, or a job failed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a pool run ended.
#[derive(Debug)]
pub enum PoolOutcome<E> {
    /// Every index was processed successfully.
    Drained,
    /// The stop token fired before the queue was empty.
    Stopped,
    /// A job failed; the remaining workers stopped taking new indices.
    Failed { index: u32, error: E },
}

/// Runs `job` for every index with at most `width` jobs in flight.
///
/// `on_done` is called on the caller's task for each successful job, in
/// completion order. After the first failure no new index is started and
/// jobs already running are awaited.
pub async fn run_pool<J, Fut, T, E>(
    indices: Vec<u32>,
    width: usize,
    stop: &CancellationToken,
    job: J,
    mut on_done: impl FnMut(u32, T),
) -> PoolOutcome<E>
where
    J: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    if indices.is_empty() {
        return PoolOutcome::Drained;
    }

    // Workers stop on external stop, first failure, or this future being dropped.
    let halt = stop.child_token();
    let _guard = halt.clone().drop_guard();

    let queue = Arc::new(Mutex::new(VecDeque::from(indices)));
    let job = Arc::new(job);
    let (tx, mut rx) = mpsc::unbounded_channel::<(u32, Result<T, E>)>();

    for _ in 0..width.max(1) {
        let queue = queue.clone();
        let job = job.clone();
        let halt = halt.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                if halt.is_cancelled() {
                    break;
                }
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(index) = next else { break };
                let result = job(index).await;
                let failed = result.is_err();
                if tx.send((index, result)).is_err() || failed {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut failure = None;
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(value) => on_done(index, value),
            Err(error) => {
                halt.cancel();
                failure.get_or_insert((index, error));
            }
        }
    }

    if let Some((index, error)) = failure {
        return PoolOutcome::Failed { index, error };
    }
    let remaining = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
    if remaining == 0 {
        PoolOutcome::Drained
    } else {
        PoolOutcome::Stopped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn processes_every_index_once() {
        let stop = CancellationToken::new();
        let mut done = Vec::new();
        let outcome = run_pool(
            (0..20).collect(),
            3,
            &stop,
            |i| async move { Ok::<_, ()>(i * 2) },
            |i, v| {
                assert_eq!(v, i * 2);
                done.push(i);
            },
        )
        .await;

        assert!(matches!(outcome, PoolOutcome::Drained));
        done.sort();
        assert_eq!(done, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_width() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let (r, p) = (running.clone(), peak.clone());
        let outcome = run_pool(
            (0..12).collect(),
            4,
            &stop,
            move |_| {
                let (r, p) = (r.clone(), p.clone());
                async move {
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            },
            |_, _| {},
        )
        .await;

        assert!(matches!(outcome, PoolOutcome::Drained));
        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_stops_new_work() {
        let started = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let s = started.clone();
        let outcome = run_pool(
            (0..50).collect(),
            1,
            &stop,
            move |i| {
                s.fetch_add(1, Ordering::SeqCst);
                async move { if i == 2 { Err("boom") } else { Ok(()) } }
            },
            |_, _| {},
        )
        .await;

        match outcome {
            PoolOutcome::Failed { index, error } => {
                assert_eq!(index, 2);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_leaves_queue_unfinished() {
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        let mut completed = 0;

        let outcome = run_pool(
            (0..10).collect(),
            2,
            &stop,
            move |i| {
                let trigger = trigger.clone();
                async move {
                    if i == 3 {
                        trigger.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, ()>(())
                }
            },
            |_, _| completed += 1,
        )
        .await;

        assert!(matches!(outcome, PoolOutcome::Stopped));
        assert!(completed < 10);
    }

    #[tokio::test]
    async fn empty_queue_is_drained() {
        let stop = CancellationToken::new();
        let outcome =
            run_pool(Vec::new(), 3, &stop, |_| async { Ok::<(), ()>(()) }, |_, _| {}).await;
        assert!(matches!(outcome, PoolOutcome::Drained));
    }
}
