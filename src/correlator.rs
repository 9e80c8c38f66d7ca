//! Dispatch/collect correlation.
//!
//! Submits a batch of payloads to a pool and puts the out-of-order results
//! back into submission order. A failed job never aborts its batch; its
//! message ends up in the report's joined error text instead.

use crate::error::{Result, TrafficError};
use crate::job::{Job, JobPayload, JobResult, Outcome};
use crate::pool::WorkerPool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Most payloads accepted in one batch.
pub const MAX_BATCH_SIZE: usize = 20;

/// The two pool operations a correlator needs.
pub trait WorkQueue {
    /// Non-blocking enqueue.
    fn dispatch(&self, job: Job) -> Result<()>;

    /// Next completed result. `None` timeout blocks; a timeout that expires
    /// yields `Ok(None)`.
    fn next_result(&self, timeout: Option<Duration>) -> Result<Option<JobResult>>;
}

impl WorkQueue for WorkerPool {
    fn dispatch(&self, job: Job) -> Result<()> {
        self.dispatch_job(job)
    }

    fn next_result(&self, timeout: Option<Duration>) -> Result<Option<JobResult>> {
        match timeout {
            Some(timeout) => self.get_result_timeout(timeout),
            None => self.get_result().map(Some),
        }
    }
}

impl<T: WorkQueue + ?Sized> WorkQueue for Arc<T> {
    fn dispatch(&self, job: Job) -> Result<()> {
        (**self).dispatch(job)
    }

    fn next_result(&self, timeout: Option<Duration>) -> Result<Option<JobResult>> {
        (**self).next_result(timeout)
    }
}

/// One job of a finished batch, for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDetail {
    pub index: usize,
    pub payload: JobPayload,
    pub outcome: Outcome,
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchReport {
    /// Jobs submitted.
    pub submitted: usize,
    /// Jobs that succeeded.
    pub completed: usize,
    /// Success values in submission order.
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<serde_json::Value>,
    /// Failure messages joined by newlines, in submission order.
    pub error: Option<String>,
    #[serde(skip)]
    pub details: Vec<JobDetail>,
}

impl BatchReport {
    fn empty() -> Self {
        Self {
            submitted: 0,
            completed: 0,
            results: Vec::new(),
            error: None,
            details: Vec::new(),
        }
    }

    /// Successful jobs with their payloads, in submission order.
    pub fn successes(&self) -> impl Iterator<Item = (&JobPayload, &serde_json::Value)> {
        self.details.iter().filter_map(|d| match &d.outcome {
            Outcome::Success { value } => Some((&d.payload, value)),
            Outcome::Failure { .. } => None,
        })
    }
}

/// Runs batches against a [`WorkQueue`], one batch at a time.
///
/// Batches never overlap: a second caller waits until the current batch has
/// collected all of its results. This caps throughput: concurrent single-job
/// requests run one after another, each on one worker, while the other
/// workers sit idle.
pub struct Correlator<Q> {
    queue: Q,
    next_batch: AtomicU64,
    /// Held for the whole of a batch so that concurrent callers never
    /// consume each other's results.
    batch_lock: Mutex<()>,
    result_timeout: Option<Duration>,
}

impl<Q: WorkQueue> Correlator<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            next_batch: AtomicU64::new(1),
            batch_lock: Mutex::new(()),
            result_timeout: None,
        }
    }

    /// Bound every retrieval. Indices still missing when a retrieval times
    /// out are reported as failures.
    pub fn with_result_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.result_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Submit `payloads` as indices `0..M` and collect exactly `M` results.
    pub fn run_batch(&self, payloads: Vec<JobPayload>) -> Result<BatchReport> {
        let submitted = payloads.len();
        if submitted == 0 {
            return Ok(BatchReport::empty());
        }
        if submitted > MAX_BATCH_SIZE {
            return Err(TrafficError::BatchTooLarge {
                count: submitted,
                max: MAX_BATCH_SIZE,
            });
        }

        let _batch_guard = self
            .batch_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let batch = self.next_batch.fetch_add(1, Ordering::Relaxed);
        debug!(batch, jobs = submitted, "Dispatching batch");

        for (index, payload) in payloads.iter().enumerate() {
            self.queue
                .dispatch(Job::new(batch, index, payload.clone()))?;
        }

        let mut outcomes: BTreeMap<usize, Outcome> = BTreeMap::new();
        while outcomes.len() < submitted {
            let Some(result) = self.queue.next_result(self.result_timeout)? else {
                let secs = self.result_timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
                warn!(
                    batch,
                    missing = submitted - outcomes.len(),
                    "Timed out waiting for results"
                );
                for index in 0..submitted {
                    outcomes.entry(index).or_insert_with(|| {
                        Outcome::failure(format!("job {}: no result within {}s", index, secs))
                    });
                }
                break;
            };

            if result.batch != batch {
                warn!(
                    batch,
                    stale_batch = result.batch,
                    index = result.index,
                    "Discarding result from an earlier batch"
                );
                continue;
            }
            if result.index >= submitted || outcomes.contains_key(&result.index) {
                warn!(batch, index = result.index, "Discarding unexpected result index");
                continue;
            }
            outcomes.insert(result.index, result.outcome);
        }

        let report = assemble(payloads, outcomes);
        info!(
            batch,
            submitted = report.submitted,
            completed = report.completed,
            "Batch finished"
        );
        Ok(report)
    }

    /// Run a single job. A failed job is returned as [`TrafficError::JobFailed`].
    pub fn run_one(&self, payload: JobPayload) -> Result<serde_json::Value> {
        let mut report = self.run_batch(vec![payload])?;
        match report.details.pop().map(|d| d.outcome) {
            Some(Outcome::Success { value }) => Ok(value),
            Some(Outcome::Failure { message, .. }) => Err(TrafficError::JobFailed { index: 0, message }),
            None => Err(TrafficError::Worker("Single job produced no result".into())),
        }
    }
}

fn assemble(payloads: Vec<JobPayload>, mut outcomes: BTreeMap<usize, Outcome>) -> BatchReport {
    let submitted = payloads.len();
    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut details = Vec::with_capacity(submitted);

    for (index, payload) in payloads.into_iter().enumerate() {
        let Some(outcome) = outcomes.remove(&index) else {
            continue;
        };
        match &outcome {
            Outcome::Success { value } => results.push(value.clone()),
            Outcome::Failure { message, .. } => errors.push(message.clone()),
        }
        details.push(JobDetail {
            index,
            payload,
            outcome,
        });
    }

    BatchReport {
        submitted,
        completed: results.len(),
        results,
        error: (!errors.is_empty()).then(|| errors.join("\n")),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Records dispatched jobs and replays results in a scripted order.
    struct Scripted {
        dispatched: Mutex<Vec<Job>>,
        /// Indices to complete, in completion order. Failing indices get a
        /// failure outcome.
        order: Mutex<VecDeque<usize>>,
        failing: Vec<usize>,
        /// Results injected before the scripted ones.
        leftovers: Mutex<VecDeque<JobResult>>,
    }

    impl Scripted {
        fn new(order: Vec<usize>, failing: Vec<usize>) -> Self {
            Self {
                dispatched: Mutex::new(Vec::new()),
                order: Mutex::new(order.into()),
                failing,
                leftovers: Mutex::new(VecDeque::new()),
            }
        }
    }

    impl WorkQueue for Scripted {
        fn dispatch(&self, job: Job) -> Result<()> {
            self.dispatched.lock().unwrap().push(job);
            Ok(())
        }

        fn next_result(&self, _timeout: Option<Duration>) -> Result<Option<JobResult>> {
            if let Some(leftover) = self.leftovers.lock().unwrap().pop_front() {
                return Ok(Some(leftover));
            }
            let Some(index) = self.order.lock().unwrap().pop_front() else {
                return Ok(None);
            };
            let dispatched = self.dispatched.lock().unwrap();
            let job = dispatched.iter().rev().find(|j| j.index == index).unwrap();
            let outcome = if self.failing.contains(&index) {
                Outcome::failure(format!("location {} failed", index))
            } else {
                Outcome::success(json!({"index": index, "lat": job.payload.lat}))
            };
            Ok(Some(JobResult::new(job.batch, index, 0, outcome)))
        }
    }

    fn payloads(n: usize) -> Vec<JobPayload> {
        (0..n).map(|i| JobPayload::at(i as f64, 0.0)).collect()
    }

    #[test]
    fn test_out_of_order_completion_is_reordered() {
        let correlator = Correlator::new(Scripted::new(vec![2, 0, 1], vec![]));
        let report = correlator.run_batch(payloads(3)).unwrap();

        assert_eq!(report.submitted, 3);
        assert_eq!(report.completed, 3);
        let indices: Vec<_> = report.results.iter().map(|r| r["index"].clone()).collect();
        assert_eq!(indices, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(report.error, None);
    }

    #[test]
    fn test_partial_failure() {
        let correlator = Correlator::new(Scripted::new(vec![1, 2, 0], vec![1]));
        let report = correlator.run_batch(payloads(3)).unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.results[0]["index"], 0);
        assert_eq!(report.results[1]["index"], 2);
        assert_eq!(report.error.as_deref(), Some("location 1 failed"));
        assert_eq!(report.successes().count(), 2);
    }

    #[test]
    fn test_errors_joined_in_index_order() {
        let correlator = Correlator::new(Scripted::new(vec![3, 0, 2, 1], vec![0, 3]));
        let report = correlator.run_batch(payloads(4)).unwrap();
        assert_eq!(
            report.error.as_deref(),
            Some("location 0 failed\nlocation 3 failed")
        );
    }

    #[test]
    fn test_empty_batch_short_circuits() {
        let correlator = Correlator::new(Scripted::new(vec![], vec![]));
        let report = correlator.run_batch(Vec::new()).unwrap();
        assert_eq!(report, BatchReport::empty());
        assert!(correlator.queue().dispatched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batch_too_large() {
        let correlator = Correlator::new(Scripted::new(vec![], vec![]));
        let err = correlator.run_batch(payloads(MAX_BATCH_SIZE + 1)).unwrap_err();
        assert!(matches!(err, TrafficError::BatchTooLarge { count: 21, max: 20 }));
    }

    #[test]
    fn test_stale_results_are_discarded() {
        let queue = Scripted::new(vec![1, 0], vec![]);
        queue.leftovers.lock().unwrap().push_back(JobResult::new(
            999,
            0,
            0,
            Outcome::success(json!("stale")),
        ));
        let correlator = Correlator::new(queue);
        let report = correlator.run_batch(payloads(2)).unwrap();

        assert_eq!(report.completed, 2);
        assert!(report.results.iter().all(|r| r != &json!("stale")));
    }

    #[test]
    fn test_batches_get_distinct_tags() {
        let correlator = Correlator::new(Scripted::new(vec![0, 0], vec![]));
        correlator.run_batch(payloads(1)).unwrap();
        correlator.run_batch(payloads(1)).unwrap();

        let dispatched = correlator.queue().dispatched.lock().unwrap();
        assert_ne!(dispatched[0].batch, dispatched[1].batch);
    }

    #[test]
    fn test_timeout_reports_missing_indices() {
        // Only index 1 ever completes
        let correlator = Correlator::new(Scripted::new(vec![1], vec![]))
            .with_result_timeout(Some(Duration::from_millis(10)));
        let report = correlator.run_batch(payloads(3)).unwrap();

        assert_eq!(report.completed, 1);
        let error = report.error.unwrap();
        assert!(error.contains("job 0: no result within"));
        assert!(error.contains("job 2: no result within"));
        assert!(!error.contains("job 1"));
    }

    #[test]
    fn test_run_one() {
        let correlator = Correlator::new(Scripted::new(vec![0], vec![]));
        let value = correlator.run_one(JobPayload::at(5.0, 0.0)).unwrap();
        assert_eq!(value["lat"], 5.0);

        let correlator = Correlator::new(Scripted::new(vec![0], vec![0]));
        let err = correlator.run_one(JobPayload::at(5.0, 0.0)).unwrap_err();
        match err {
            TrafficError::JobFailed { index, message } => {
                assert_eq!(index, 0);
                assert_eq!(message, "location 0 failed");
            }
            other => panic!("Expected JobFailed, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_any_completion_order_is_restored(
            order in (1usize..=MAX_BATCH_SIZE)
                .prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        ) {
            let n = order.len();
            let correlator = Correlator::new(Scripted::new(order, vec![]));
            let report = correlator.run_batch(payloads(n)).unwrap();

            prop_assert_eq!(report.completed, n);
            for (i, value) in report.results.iter().enumerate() {
                prop_assert_eq!(&value["index"], &json!(i));
            }
        }
    }
}
