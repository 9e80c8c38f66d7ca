//! Hand-off point for persisting finished batches.
//!
//! The pool only produces in-memory results. When a request asks for its
//! results to be saved, the server builds a [`BatchRecord`] and passes it to
//! a [`ResultSink`]. Storage itself lives behind that trait.

use crate::correlator::BatchReport;
use crate::job::{JobPayload, StorefrontDirection};
use serde::Serialize;
use tracing::debug;

/// One request's worth of results, shaped for storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub request_id: String,
    pub locations_count: usize,
    pub completed: usize,
    pub saved_to_static: bool,
    /// One entry per successful location, in submission order.
    pub logs: Vec<TrafficLog>,
}

/// A successful location and its analysis result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficLog {
    pub lat: f64,
    pub lng: f64,
    pub storefront_direction: StorefrontDirection,
    pub day: Option<String>,
    pub time: Option<String>,
    pub result: serde_json::Value,
}

impl BatchRecord {
    pub fn from_report(request_id: impl Into<String>, report: &BatchReport, saved_to_static: bool) -> Self {
        let logs = report
            .successes()
            .map(|(payload, value)| TrafficLog {
                lat: payload.lat,
                lng: payload.lng,
                storefront_direction: payload.storefront_direction,
                day: payload.day.clone(),
                time: payload.time.clone(),
                result: value.clone(),
            })
            .collect();

        Self {
            request_id: request_id.into(),
            locations_count: report.submitted,
            completed: report.completed,
            saved_to_static,
            logs,
        }
    }

    /// Record for a single successful location.
    pub fn single(
        request_id: impl Into<String>,
        payload: &JobPayload,
        result: serde_json::Value,
        saved_to_static: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            locations_count: 1,
            completed: 1,
            saved_to_static,
            logs: vec![TrafficLog {
                lat: payload.lat,
                lng: payload.lng,
                storefront_direction: payload.storefront_direction,
                day: payload.day.clone(),
                time: payload.time.clone(),
                result,
            }],
        }
    }
}

/// Receives finished batches for persistence.
///
/// A failing sink never fails the request that produced the batch; callers
/// log the error and move on.
pub trait ResultSink: Send + Sync {
    fn save(&self, record: &BatchRecord) -> anyhow::Result<()>;
}

/// Sink that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl ResultSink for DiscardSink {
    fn save(&self, record: &BatchRecord) -> anyhow::Result<()> {
        debug!(
            request_id = %record.request_id,
            logs = record.logs.len(),
            "No result store configured, discarding batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::JobDetail;
    use crate::job::Outcome;
    use serde_json::json;

    #[test]
    fn test_record_keeps_only_successes() {
        let mut failed = JobPayload::at(2.0, 2.0);
        failed.day = Some("Friday".into());
        let report = BatchReport {
            submitted: 2,
            completed: 1,
            results: vec![json!({"traffic_score": 10.0})],
            error: Some("boom".into()),
            details: vec![
                JobDetail {
                    index: 0,
                    payload: JobPayload::at(1.0, 1.0),
                    outcome: Outcome::success(json!({"traffic_score": 10.0})),
                },
                JobDetail {
                    index: 1,
                    payload: failed,
                    outcome: Outcome::failure("boom"),
                },
            ],
        };

        let record = BatchRecord::from_report("abc", &report, true);
        assert_eq!(record.locations_count, 2);
        assert_eq!(record.completed, 1);
        assert_eq!(record.logs.len(), 1);
        assert_eq!(record.logs[0].lat, 1.0);
        assert_eq!(record.logs[0].result["traffic_score"], 10.0);
        assert!(DiscardSink.save(&record).is_ok());
    }

    #[test]
    fn test_single_record() {
        let record = BatchRecord::single("r1", &JobPayload::at(3.0, 4.0), json!({"traffic_score": 1.5}), false);
        assert_eq!(record.locations_count, 1);
        assert_eq!(record.logs[0].lng, 4.0);
        assert_eq!(record.logs[0].storefront_direction, StorefrontDirection::North);
    }
}
