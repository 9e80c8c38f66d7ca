//! Read-only health snapshot of a worker pool.

use serde::Serialize;
use utoipa::ToSchema;

/// Pool-level health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    /// Every configured worker process is alive.
    Healthy,
    /// At least one worker process has exited.
    Degraded,
}

impl PoolStatus {
    pub fn classify(workers_alive: usize, workers_expected: usize) -> Self {
        if workers_alive == workers_expected {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }

    /// Short label used by the health endpoint ("ok" / "degraded").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "ok",
            Self::Degraded => "degraded",
        }
    }
}

/// Point-in-time view of a pool, taken without mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PoolHealth {
    /// Configured worker count.
    pub workers_expected: usize,
    /// Worker processes the OS still reports as running.
    pub workers_alive: usize,
    /// Jobs waiting in the job channel (stop sentinels included).
    pub job_queue_size: usize,
    /// Results waiting to be collected.
    pub result_queue_size: usize,
    /// Jobs finished by all workers since start.
    pub jobs_completed: usize,
    pub status: PoolStatus,
}

impl PoolHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == PoolStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(PoolStatus::classify(4, 4), PoolStatus::Healthy);
        assert_eq!(PoolStatus::classify(3, 4), PoolStatus::Degraded);
        assert_eq!(PoolStatus::classify(0, 4), PoolStatus::Degraded);
    }

    #[test]
    fn test_stopped_pool_with_no_workers_is_degraded() {
        // A stopped pool reports zero live workers against its configured count
        assert_eq!(PoolStatus::classify(0, 2), PoolStatus::Degraded);
        assert_eq!(PoolStatus::Degraded.label(), "degraded");
        assert_eq!(PoolStatus::Healthy.label(), "ok");
    }

    #[test]
    fn test_serialized_status_is_lowercase() {
        let health = PoolHealth {
            workers_expected: 2,
            workers_alive: 2,
            job_queue_size: 0,
            result_queue_size: 1,
            jobs_completed: 5,
            status: PoolStatus::Healthy,
        };
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["result_queue_size"], 1);
        assert!(health.is_healthy());
    }
}
