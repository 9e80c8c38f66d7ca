//! Deterministic stand-in for the browser backend.
//!
//! Launching a "browser" takes a configurable delay and can be made to fail,
//! and each analysis sleeps for a configurable latency before returning a
//! score derived only from the query. Used for development and for exercising
//! the pool end to end without a real browser. It never captures an image,
//! so its results carry no `image_url`.

use super::session::{Analyzer, SessionProvider};
use crate::job::JobPayload;
use anyhow::{Context, bail};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Knobs for the simulated backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedConfig {
    /// Time it takes to "launch the browser" at worker start.
    pub launch_delay: Duration,
    /// Make session acquisition fail.
    pub fail_launch: bool,
    /// Time each analysis takes.
    pub job_latency: Duration,
}

/// A simulated browser session.
#[derive(Debug)]
pub struct SimulatedSession {
    pub session_id: uuid::Uuid,
    pub launched_at: Instant,
    pub jobs_served: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    config: SimulatedConfig,
}

impl SimulatedProvider {
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }
}

impl SessionProvider for SimulatedProvider {
    type Session = SimulatedSession;

    fn acquire(&mut self) -> anyhow::Result<SimulatedSession> {
        std::thread::sleep(self.config.launch_delay);
        if self.config.fail_launch {
            bail!("simulated browser failed to launch");
        }

        let session = SimulatedSession {
            session_id: uuid::Uuid::new_v4(),
            launched_at: Instant::now(),
            jobs_served: 0,
        };
        info!(session_id = %session.session_id, "Browser resources initialized");
        Ok(session)
    }

    fn release(&mut self, session: SimulatedSession) -> anyhow::Result<()> {
        debug!(
            session_id = %session.session_id,
            jobs_served = session.jobs_served,
            uptime_ms = session.launched_at.elapsed().as_millis() as u64,
            "Closing simulated browser"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedAnalyzer {
    latency: Duration,
}

impl SimulatedAnalyzer {
    pub fn new(config: &SimulatedConfig) -> Self {
        Self {
            latency: config.job_latency,
        }
    }
}

impl Analyzer for SimulatedAnalyzer {
    type Session = SimulatedSession;

    fn analyze(
        &self,
        session: &mut SimulatedSession,
        payload: &JobPayload,
    ) -> anyhow::Result<serde_json::Value> {
        validate_coordinates(payload.lat, payload.lng).context("invalid location")?;

        std::thread::sleep(self.latency);
        session.jobs_served += 1;

        let mode = if payload.day.is_some() || payload.time.is_some() {
            "typical"
        } else {
            "live"
        };

        Ok(json!({
            "lat": payload.lat,
            "lng": payload.lng,
            "storefront_direction": payload.storefront_direction,
            "zoom": payload.zoom,
            "day": payload.day,
            "time": payload.time,
            "mode": mode,
            "traffic_score": traffic_score(payload),
        }))
    }
}

fn validate_coordinates(lat: f64, lng: f64) -> anyhow::Result<()> {
    if !(-90.0..=90.0).contains(&lat) {
        bail!("latitude {} out of range [-90, 90]", lat);
    }
    if !(-180.0..=180.0).contains(&lng) {
        bail!("longitude {} out of range [-180, 180]", lng);
    }
    Ok(())
}

/// Score in `0.0..=100.0`, a pure function of the query.
fn traffic_score(payload: &JobPayload) -> f64 {
    // FNV-1a over the fields that identify a query
    let key = format!(
        "{:.6}|{:.6}|{}|{}|{}|{}",
        payload.lat,
        payload.lng,
        payload.storefront_direction,
        payload.zoom,
        payload.day.as_deref().unwrap_or(""),
        payload.time.as_deref().unwrap_or("")
    );
    let hash = key.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    (hash % 10_001) as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::StorefrontDirection;

    fn session() -> SimulatedSession {
        SimulatedProvider::default().acquire().unwrap()
    }

    #[test]
    fn test_score_is_deterministic() {
        let analyzer = SimulatedAnalyzer::default();
        let payload = JobPayload::at(40.7128, -74.006);

        let a = analyzer.analyze(&mut session(), &payload).unwrap();
        let b = analyzer.analyze(&mut session(), &payload).unwrap();
        assert_eq!(a["traffic_score"], b["traffic_score"]);

        let score = a["traffic_score"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn test_score_depends_on_query() {
        let mut east = JobPayload::at(40.7128, -74.006);
        east.storefront_direction = StorefrontDirection::East;
        let north = JobPayload::at(40.7128, -74.006);
        assert_ne!(traffic_score(&east), traffic_score(&north));
    }

    #[test]
    fn test_out_of_range_coordinates_fail() {
        let analyzer = SimulatedAnalyzer::default();
        let err = analyzer
            .analyze(&mut session(), &JobPayload::at(91.0, 0.0))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid location");
        assert!(format!("{:#}", err).contains("latitude 91 out of range"));

        assert!(analyzer.analyze(&mut session(), &JobPayload::at(0.0, -180.5)).is_err());
    }

    #[test]
    fn test_typical_mode_without_capture() {
        let analyzer = SimulatedAnalyzer::default();
        let mut payload = JobPayload::at(1.0, 2.0);
        payload.day = Some("Monday".into());
        payload.save_to_static = true;
        payload.base_url = Some("http://localhost:8000/".into());

        let mut session = session();
        let value = analyzer.analyze(&mut session, &payload).unwrap();
        assert_eq!(value["mode"], "typical");
        // Nothing is captured, so there is no image to link to
        assert!(value.get("image_url").is_none());
        assert_eq!(session.jobs_served, 1);
    }

    #[test]
    fn test_failing_launch() {
        let mut provider = SimulatedProvider::new(SimulatedConfig {
            fail_launch: true,
            ..Default::default()
        });
        assert!(provider.acquire().is_err());
    }
}
