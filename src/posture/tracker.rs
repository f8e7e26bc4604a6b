//! Dwell-time tracking that separates brief bad posture from sustained bad posture.
//!
//! Observations arrive once per analysis tick. Each observation stands for the
//! whole tick it was sampled in, so dwell time is measured from the start of
//! the first tick in the current status to the end of the current one.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::score::{PostureScore, PostureStatus};

pub const DEFAULT_BAD_THRESHOLD: u8 = 70;
pub const DEFAULT_SUSTAINED_SECS: u64 = 30;
pub const DEFAULT_TICK_SECS: u64 = 5;

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub bad_threshold: u8,
    pub sustained_duration: std::time::Duration,
    pub tick_period: std::time::Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bad_threshold: DEFAULT_BAD_THRESHOLD,
            sustained_duration: std::time::Duration::from_secs(DEFAULT_SUSTAINED_SECS),
            tick_period: std::time::Duration::from_secs(DEFAULT_TICK_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingState {
    Uninitialized,
    Tracking {
        status: PostureStatus,
        started_at: DateTime<Utc>,
        bad_count: u32,
    },
}

/// Emitted when bad posture has held for the sustained duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SustainedPosture {
    pub posture: PostureScore,
    pub duration_secs: u64,
}

#[derive(Debug)]
pub struct PostureStateTracker {
    config: TrackerConfig,
    state: TrackingState,
    last: Option<PostureScore>,
}

impl PostureStateTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackingState::Uninitialized,
            last: None,
        }
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn current_status(&self) -> Option<PostureStatus> {
        match self.state {
            TrackingState::Tracking { status, .. } => Some(status),
            TrackingState::Uninitialized => None,
        }
    }

    pub fn is_currently_bad(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|p| p.is_bad(self.config.bad_threshold))
    }

    /// Seconds spent in the current status as of `now`.
    pub fn current_duration_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.state {
            TrackingState::Tracking { started_at, .. } => self.dwell(started_at, now).as_secs(),
            TrackingState::Uninitialized => 0,
        }
    }

    /// Feeds one tick, timed by the score's own timestamp.
    pub fn observe(&mut self, posture: PostureScore) -> Option<SustainedPosture> {
        let now = posture.timestamp;
        self.observe_at(posture, now)
    }

    pub fn observe_at(
        &mut self,
        posture: PostureScore,
        now: DateTime<Utc>,
    ) -> Option<SustainedPosture> {
        let is_bad = posture.is_bad(self.config.bad_threshold);
        let seeded = u32::from(is_bad);

        let (status, started_at, bad_count) = match self.state {
            TrackingState::Uninitialized => {
                debug!(status = %posture.status, score = posture.score, "posture tracking started");
                self.state = TrackingState::Tracking {
                    status: posture.status,
                    started_at: now,
                    bad_count: seeded,
                };
                self.last = Some(posture);
                return None;
            }
            TrackingState::Tracking {
                status,
                started_at,
                bad_count,
            } => (status, started_at, bad_count),
        };

        if status != posture.status {
            info!(from = %status, to = %posture.status, "posture status changed");
            let previous = self
                .qualifies(bad_count, started_at, now)
                .then(|| self.last.take())
                .flatten()
                .map(|last| self.annotate(last, started_at, now));

            self.state = TrackingState::Tracking {
                status: posture.status,
                started_at: now,
                bad_count: seeded,
            };
            self.last = Some(posture);
            return previous;
        }

        if !is_bad {
            self.state = TrackingState::Tracking {
                status,
                started_at,
                bad_count: 0,
            };
            self.last = Some(posture);
            return None;
        }

        let bad_count = bad_count + 1;
        debug!(
            dwell_secs = self.dwell(started_at, now).as_secs(),
            bad_count,
            "bad posture continuing"
        );

        if self.qualifies(bad_count, started_at, now) {
            let sustained = self.annotate(posture.clone(), started_at, now);
            warn!(
                duration_secs = sustained.duration_secs,
                score = posture.score,
                "sustained bad posture detected"
            );
            self.state = TrackingState::Tracking {
                status,
                started_at: now,
                bad_count: 0,
            };
            self.last = Some(posture);
            return Some(sustained);
        }

        self.state = TrackingState::Tracking {
            status,
            started_at,
            bad_count,
        };
        self.last = Some(posture);
        None
    }

    pub fn reset(&mut self) {
        self.state = TrackingState::Uninitialized;
        self.last = None;
        info!("posture tracker reset");
    }

    pub fn summary(&self, now: DateTime<Utc>) -> String {
        match self.state {
            TrackingState::Uninitialized => "Status: none".to_string(),
            TrackingState::Tracking {
                status, bad_count, ..
            } => format!(
                "Status: {status}, Duration: {}s, Bad count: {bad_count}",
                self.current_duration_secs(now)
            ),
        }
    }

    /// Time in the current status including the tick being observed, so a
    /// 15 s window at a 5 s period fires on the third bad tick rather than
    /// waiting for a fourth.
    fn dwell(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
        let elapsed = (now - started_at).max(Duration::zero());
        elapsed.to_std().unwrap_or_default() + self.config.tick_period
    }

    fn qualifies(&self, bad_count: u32, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let bad_time = self.config.tick_period * bad_count;
        bad_time >= self.config.sustained_duration
            && self.dwell(started_at, now) >= self.config.sustained_duration
    }

    fn annotate(
        &self,
        mut posture: PostureScore,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SustainedPosture {
        let duration_secs = self.dwell(started_at, now).as_secs();
        posture.issues.push(format!("Sustained for {duration_secs}s"));
        SustainedPosture {
            posture,
            duration_secs,
        }
    }
}

impl Default for PostureStateTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posture::score::{BodyAngles, PostureAssessment};

    fn config(sustained_secs: u64) -> TrackerConfig {
        TrackerConfig {
            bad_threshold: 70,
            sustained_duration: std::time::Duration::from_secs(sustained_secs),
            tick_period: std::time::Duration::from_secs(5),
        }
    }

    fn posture(score: u8, at: DateTime<Utc>) -> PostureScore {
        let mut p = PostureScore::new(
            PostureAssessment {
                score,
                issues: vec![],
                recommendations: vec![],
            },
            BodyAngles::default(),
        );
        p.timestamp = at;
        p
    }

    fn ticks(tracker: &mut PostureStateTracker, scores: &[u8]) -> Vec<usize> {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        scores
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| {
                let at = base + Duration::seconds(5 * i as i64);
                tracker.observe(posture(s, at)).map(|_| i)
            })
            .collect()
    }

    #[test]
    fn first_observation_never_fires() {
        let mut tracker = PostureStateTracker::new(config(5));
        assert!(ticks(&mut tracker, &[10]).is_empty());
        assert_eq!(tracker.current_status(), Some(PostureStatus::Poor));
        assert!(tracker.is_currently_bad());
    }

    #[test]
    fn three_bad_ticks_fire_once_at_fifteen_seconds() {
        let mut tracker = PostureStateTracker::new(config(15));
        assert!(ticks(&mut tracker, &[50, 50]).is_empty());

        let mut tracker = PostureStateTracker::new(config(15));
        assert_eq!(ticks(&mut tracker, &[50, 50, 50]), vec![2]);
    }

    #[test]
    fn refires_at_most_once_per_window() {
        let mut tracker = PostureStateTracker::new(config(15));
        assert_eq!(ticks(&mut tracker, &[50; 9]), vec![2, 5, 8]);
    }

    #[test]
    fn good_tick_resets_the_bad_streak() {
        let mut tracker = PostureStateTracker::new(config(15));
        // 65 and 72 share the FAIR band, so the status never changes
        let fired = ticks(&mut tracker, &[65, 65, 72, 65, 65, 72, 65, 72, 65]);
        assert!(fired.is_empty());

        let fired = ticks(&mut PostureStateTracker::new(config(15)), &[65, 65, 72, 65, 65, 65]);
        assert_eq!(fired, vec![5]);
    }

    #[test]
    fn status_change_below_threshold_reports_nothing() {
        let mut tracker = PostureStateTracker::new(config(30));
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        assert!(tracker.observe(posture(40, base)).is_none());
        for i in 1..5 {
            let at = base + Duration::seconds(5 * i);
            assert!(tracker.observe(posture(40, at)).is_none());
        }
        // five bad ticks: 25s of bad time, not yet 30
        let at = base + Duration::seconds(40);
        assert!(tracker.observe(posture(95, at)).is_none());
        assert_eq!(tracker.current_status(), Some(PostureStatus::Excellent));

        let mut tracker = PostureStateTracker::new(config(15));
        tracker.observe(posture(40, base));
        tracker.observe(posture(40, base + Duration::seconds(5)));
        // third bad tick lands in a different band
        let fired = tracker.observe(posture(65, base + Duration::seconds(10)));
        assert!(fired.is_none());
    }

    #[test]
    fn exit_from_sustained_state_is_reported() {
        let mut tracker = PostureStateTracker::new(TrackerConfig {
            bad_threshold: 70,
            sustained_duration: std::time::Duration::from_secs(15),
            tick_period: std::time::Duration::from_secs(5),
        });
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        tracker.observe(posture(40, base));
        tracker.observe(posture(40, base + Duration::seconds(5)));
        // the third observation arrives late and in a new band
        let fired = tracker
            .observe(posture(80, base + Duration::seconds(20)))
            .map(|s| s.duration_secs);
        // two bad ticks cover only 10s of bad time
        assert_eq!(fired, None);

        // two samples in the same instant: enough bad ticks, too little dwell
        let mut tracker = PostureStateTracker::new(config(10));
        assert!(tracker.observe(posture(40, base)).is_none());
        assert!(tracker.observe(posture(40, base)).is_none());
        let fired = tracker.observe(posture(80, base + Duration::seconds(10)));
        let sustained = fired.expect("previous state should qualify on exit");
        assert_eq!(sustained.duration_secs, 15);
        assert_eq!(sustained.posture.score, 40);
        assert_eq!(tracker.current_status(), Some(PostureStatus::Good));
    }

    #[test]
    fn sustained_event_is_annotated() {
        let mut tracker = PostureStateTracker::new(config(15));
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        tracker.observe(posture(50, base));
        tracker.observe(posture(50, base + Duration::seconds(5)));
        let sustained = tracker
            .observe(posture(50, base + Duration::seconds(10)))
            .unwrap();
        assert_eq!(sustained.duration_secs, 15);
        assert_eq!(sustained.posture.issues.last().unwrap(), "Sustained for 15s");
    }

    #[test]
    fn reset_returns_to_uninitialized() {
        let mut tracker = PostureStateTracker::new(config(15));
        ticks(&mut tracker, &[50, 50]);
        tracker.reset();
        assert_eq!(tracker.state(), &TrackingState::Uninitialized);
        assert!(!tracker.is_currently_bad());
        assert!(ticks(&mut tracker, &[50, 50]).is_empty());
    }
}
