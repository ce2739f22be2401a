//! A target's time-ordered history, partitioned into gap-bounded segments,
//! with linear/circular interpolation and centred-difference motion
//! features.
//!
//! The cache and the track have a natural cyclic dependency (track posts
//! updates to the cache; recognition reads tracks refreshed from the
//! cache). We break the cycle with a one-way write path — the track owns
//! its own history and nothing calls back into it from the cache — and a
//! narrow pull-on-read path: `interpolate` consults a recent-state source
//! (backed by the cache) only when asked for a time close to wall-clock
//! now, so near-real-time reads see freshly ingested data even before it
//! threads through the track object. See [`RecentStateSource`].

use crate::attributes::{MotionFeatures, TargetState};
use crate::geo::heading_interp;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Looks up the freshest published state for a target, independent of
/// whatever a `TargetTrack` currently has buffered. Implemented by the
/// cache; the track never imports the cache module directly.
pub trait RecentStateSource {
    fn recent_state(&self, target_id: Uuid) -> Option<TargetState>;
}

/// A contiguous run of strictly timestamp-increasing states.
pub type Segment = Vec<TargetState>;

#[derive(Debug, Clone)]
pub struct TargetTrack {
    pub target_id: Uuid,
    segments: Vec<Segment>,
    segment_gap: Duration,
}

impl TargetTrack {
    pub fn new(target_id: Uuid, segment_gap: Duration) -> Self {
        Self {
            target_id,
            segments: vec![Vec::new()],
            segment_gap,
        }
    }

    /// Appends a state, sealing the current segment first if the gap from
    /// the last observation exceeds `segment_gap`. `sync_to_cache` is
    /// accepted for interface parity with the source design but is a
    /// caller concern here: posting to the cache is the stream service's
    /// job, not the track's (see module docs).
    pub fn add_state(&mut self, state: TargetState, _sync_to_cache: bool) {
        if let Some(last) = self.last_state()
            && state.timestamp - last.timestamp > self.segment_gap
        {
            self.segments.push(Vec::new());
        }
        self.segments
            .last_mut()
            .expect("segments is never empty")
            .push(state);
    }

    /// Seals a trailing non-empty segment so the next `add_state` always
    /// starts a fresh one regardless of the gap.
    pub fn finalize(&mut self) {
        if !self.segments.last().is_some_and(Vec::is_empty) {
            self.segments.push(Vec::new());
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn last_state(&self) -> Option<&TargetState> {
        self.segments.iter().rev().find_map(|s| s.last())
    }

    pub fn last_n_states(&self, n: usize) -> Vec<&TargetState> {
        self.segments
            .iter()
            .rev()
            .flat_map(|s| s.iter().rev())
            .take(n)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    fn all_states(&self) -> impl Iterator<Item = &TargetState> {
        self.segments.iter().flatten()
    }

    pub fn states_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&TargetState> {
        self.all_states()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .collect()
    }

    /// Linear interpolation of position/speed, shortest-arc for heading,
    /// between the nearest state at or before `t` and the nearest at or
    /// after `t`. Clamps to whichever side exists if only one does.
    ///
    /// If `t` is within 5 seconds of wall-clock now and `recent` is
    /// supplied, the cache's freshest state is preferred.
    pub fn interpolate(
        &self,
        t: DateTime<Utc>,
        recent: Option<&dyn RecentStateSource>,
    ) -> Option<TargetState> {
        if let Some(source) = recent
            && (Utc::now() - t).abs() <= Duration::seconds(5)
            && let Some(state) = source.recent_state(self.target_id)
        {
            return Some(state);
        }

        let mut before: Option<&TargetState> = None;
        let mut after: Option<&TargetState> = None;
        for state in self.all_states() {
            if state.timestamp <= t
                && before.is_none_or(|b: &TargetState| state.timestamp > b.timestamp)
            {
                before = Some(state);
            }
            if state.timestamp >= t && after.is_none_or(|a: &TargetState| state.timestamp < a.timestamp)
            {
                after = Some(state);
            }
        }

        match (before, after) {
            (Some(b), Some(a)) if b.timestamp == a.timestamp => Some(b.clone()),
            (Some(b), Some(a)) => {
                let span = (a.timestamp - b.timestamp).num_milliseconds() as f64;
                let f = if span <= 0.0 {
                    0.0
                } else {
                    (t - b.timestamp).num_milliseconds() as f64 / span
                };
                Some(TargetState {
                    timestamp: t,
                    position: crate::geo::GeoPosition::new(
                        b.position.lon + (a.position.lon - b.position.lon) * f,
                        b.position.lat + (a.position.lat - b.position.lat) * f,
                        b.position.alt + (a.position.alt - b.position.alt) * f,
                    ),
                    heading: heading_interp(b.heading, a.heading, f),
                    speed: b.speed + (a.speed - b.speed) * f,
                    pitch: b.pitch,
                    roll: b.roll,
                })
            }
            (Some(b), None) => Some(b.clone()),
            (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        }
    }

    /// Motion features for every state that has both neighbours within the
    /// same segment. Windows never cross a segment boundary, so a feature
    /// is never computed across a `segment_gap`-sized hole in coverage.
    pub fn motion_features(&self) -> Vec<(DateTime<Utc>, MotionFeatures)> {
        self.segments
            .iter()
            .flat_map(|s| s.windows(3))
            .map(|w| (w[1].timestamp, MotionFeatures::compute(w[0], w[2])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPosition;

    fn state(secs: i64, lon: f64, heading: f64, speed: f64) -> TargetState {
        TargetState {
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            position: GeoPosition::new(lon, 39.9, 5000.0),
            heading,
            speed,
            pitch: None,
            roll: None,
        }
    }

    #[test]
    fn gap_beyond_segment_gap_starts_new_segment() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        track.add_state(state(0, 0.0, 0.0, 100.0), false);
        track.add_state(state(500, 0.0, 0.0, 100.0), false);
        assert_eq!(track.segments().len(), 2);
    }

    #[test]
    fn within_gap_stays_in_one_segment() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        track.add_state(state(0, 0.0, 0.0, 100.0), false);
        track.add_state(state(60, 0.0, 0.0, 100.0), false);
        assert_eq!(track.segments().len(), 1);
        assert_eq!(track.segments()[0].len(), 2);
    }

    #[test]
    fn interpolate_midpoint_averages_position_and_speed() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        track.add_state(state(0, 0.0, 90.0, 100.0), false);
        track.add_state(state(10, 10.0, 90.0, 200.0), false);
        let mid = track
            .interpolate(DateTime::from_timestamp(5, 0).unwrap(), None)
            .unwrap();
        assert!((mid.position.lon - 5.0).abs() < 1e-9);
        assert!((mid.speed - 150.0).abs() < 1e-9);
    }

    #[test]
    fn interpolate_wraps_heading_through_zero() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        track.add_state(state(0, 0.0, 350.0, 100.0), false);
        track.add_state(state(10, 0.0, 10.0, 100.0), false);
        let mid = track
            .interpolate(DateTime::from_timestamp(5, 0).unwrap(), None)
            .unwrap();
        assert!((mid.heading - 0.0).abs() < 1e-6 || (mid.heading - 360.0).abs() < 1e-6);
    }

    #[test]
    fn interpolate_clamps_outside_range() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        track.add_state(state(10, 1.0, 0.0, 100.0), false);
        track.add_state(state(20, 2.0, 0.0, 100.0), false);
        let before = track
            .interpolate(DateTime::from_timestamp(0, 0).unwrap(), None)
            .unwrap();
        assert_eq!(before.position.lon, 1.0);
        let after = track
            .interpolate(DateTime::from_timestamp(100, 0).unwrap(), None)
            .unwrap();
        assert_eq!(after.position.lon, 2.0);
    }

    #[test]
    fn empty_track_interpolates_to_none() {
        let track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        assert!(
            track
                .interpolate(DateTime::from_timestamp(0, 0).unwrap(), None)
                .is_none()
        );
    }

    #[test]
    fn motion_features_require_both_neighbours() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        track.add_state(state(0, 0.0, 0.0, 100.0), false);
        track.add_state(state(1, 0.0, 20.0, 100.0), false);
        track.add_state(state(2, 0.0, 0.0, 100.0), false);
        let features = track.motion_features();
        assert_eq!(features.len(), 1);
        assert!(features[0].1.maneuvering);
    }

    #[test]
    fn motion_features_never_window_across_a_segment_boundary() {
        let mut track = TargetTrack::new(Uuid::new_v4(), Duration::seconds(120));
        // Two states close together, then a gap beyond segment_gap, then two more.
        // A naive flattened window would still see this as one run of four states
        // and produce two 3-state windows spanning the gap.
        track.add_state(state(0, 0.0, 0.0, 100.0), false);
        track.add_state(state(1, 0.0, 0.0, 100.0), false);
        track.add_state(state(500, 0.0, 0.0, 100.0), false);
        track.add_state(state(501, 0.0, 0.0, 100.0), false);
        assert_eq!(track.segments().len(), 2);
        assert!(track.motion_features().is_empty());
    }
}
