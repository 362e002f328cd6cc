//! Bounded-concurrency fan-out over a fixed list of jobs.
//!
//! Jobs start in input order, at most `max` at a time; a new one starts as soon
//! as any running job settles. Every job runs to completion regardless of how
//! its siblings ended. Jobs are polled on the caller's task, so they may borrow
//! from it.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tracing::{debug, trace};

/// Run `jobs` with at most `max` in flight and resolve once all have settled.
///
/// Results are returned in completion order. When one or more jobs fail the
/// first failure (in completion order) is returned, but only after every job
/// has finished.
///
/// # Panics
/// When `max` is zero.
pub async fn run_bounded<I, F, T, E>(jobs: I, max: usize) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    assert!(max > 0, "run_bounded requires a positive concurrency cap");

    let mut pending = jobs.into_iter();
    let mut running = FuturesUnordered::new();
    let mut started = 0usize;
    for job in pending.by_ref().take(max) {
        running.push(job);
        started += 1;
    }
    trace!(target: "queue", started, max, "queue_primed");

    let mut done = Vec::new();
    let mut first_err = None;
    while let Some(result) = running.next().await {
        match result {
            Ok(value) => done.push(value),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
        if let Some(job) = pending.next() {
            running.push(job);
            started += 1;
        }
    }
    debug!(target: "queue", started, failed = first_err.is_some(), "queue_settled");

    match first_err {
        Some(e) => Err(e),
        None => Ok(done),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn empty_list_resolves_immediately() {
        let jobs: Vec<std::future::Ready<Result<(), ()>>> = Vec::new();
        assert_eq!(run_bounded(jobs, 3).await, Ok(vec![]));
    }

    #[tokio::test]
    async fn never_exceeds_cap_and_starts_in_order() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let starts = Mutex::new(Vec::new());
        let jobs = (0..6u64).map(|i| {
            let (in_flight, peak, starts) = (&in_flight, &peak, &starts);
            async move {
                starts.lock().unwrap().push(i);
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 * (6 - i))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<u64, ()>(i)
            }
        });
        let mut out = run_bounded(jobs, 2).await.unwrap();
        out.sort();
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(*starts.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn failure_does_not_stop_siblings() {
        let finished = AtomicUsize::new(0);
        let jobs = (0..5).map(|i| {
            let finished = &finished;
            async move {
                tokio::time::sleep(Duration::from_millis(if i == 0 { 1 } else { 10 })).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i == 0 { Err(format!("job {i}")) } else { Ok(i) }
            }
        });
        let res = run_bounded(jobs, 2).await;
        assert_eq!(res, Err("job 0".to_string()));
        assert_eq!(finished.load(Ordering::SeqCst), 5);
    }

    #[test]
    #[should_panic(expected = "positive concurrency cap")]
    fn zero_cap_is_a_contract_violation() {
        let jobs = vec![std::future::ready(Ok::<(), ()>(()))];
        let _ = futures::executor::block_on(run_bounded(jobs, 0));
    }
}
