//! Heuristic track estimation.
//!
//! Many transponders omit track over ground, send zero, or keep repeating a
//! stale value after the sensor freezes on the ground. The estimator keeps
//! a small amount of hidden per-aircraft state and decides, for every
//! position sample, whether to trust the reported track or to derive one
//! from movement relative to an anchor position.

use crate::geo;

/// Minimum movement from the anchor before an airborne track is derived.
pub const AIRBORNE_MOVEMENT_THRESHOLD_M: f64 = 250.0;
/// Minimum movement from the anchor before a surface track is derived.
pub const GROUND_MOVEMENT_THRESHOLD_M: f64 = 10.0;
/// A ground track repeated unchanged for this long is a stuck sensor.
pub const GROUND_TRACK_LOCK_MS: i64 = 30 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    latitude: f64,
    longitude: f64,
    on_ground: bool,
}

/// Hidden per-aircraft estimator state.
#[derive(Debug, Clone, Default)]
pub struct TrackEstimator {
    anchor: Option<Anchor>,
    is_transmitting_track: bool,
    last_ground_track: Option<f32>,
    ground_track_first_seen_ms: Option<i64>,
}

impl TrackEstimator {
    /// Evaluate one position sample. `reported` is the track from the feed
    /// (zero means "not transmitted"). Returns the track to store, or
    /// `None` to leave the aircraft's track unchanged.
    pub fn estimate(
        &mut self,
        latitude: f64,
        longitude: f64,
        on_ground: bool,
        reported: Option<f32>,
        now_ms: i64,
    ) -> Option<f32> {
        // Air/ground transitions invalidate both the anchor and the
        // stuck-sensor lock state.
        if self.anchor.is_some_and(|a| a.on_ground != on_ground) {
            self.anchor = None;
            self.last_ground_track = None;
            self.ground_track_first_seen_ms = None;
        }

        match reported.filter(|t| *t != 0.0) {
            Some(track) if !on_ground => {
                self.is_transmitting_track = true;
                self.move_anchor(latitude, longitude, on_ground);
                Some(track)
            }
            Some(track) => {
                if self.last_ground_track != Some(track) {
                    self.last_ground_track = Some(track);
                    self.ground_track_first_seen_ms = Some(now_ms);
                    self.move_anchor(latitude, longitude, on_ground);
                    Some(track)
                } else if self
                    .ground_track_first_seen_ms
                    .is_some_and(|first| now_ms - first >= GROUND_TRACK_LOCK_MS)
                {
                    // Stuck sensor: ignore the reported value.
                    self.derive_from_movement(latitude, longitude, on_ground)
                } else {
                    self.move_anchor(latitude, longitude, on_ground);
                    Some(track)
                }
            }
            None => self.derive_from_movement(latitude, longitude, on_ground),
        }
    }

    /// Whether a genuine (airborne, non-zero) track has ever been seen.
    /// Never reset by position-derived computation.
    pub fn is_transmitting_track(&self) -> bool {
        self.is_transmitting_track
    }

    fn derive_from_movement(
        &mut self,
        latitude: f64,
        longitude: f64,
        on_ground: bool,
    ) -> Option<f32> {
        let anchor = match self.anchor {
            Some(a) => a,
            None => {
                self.move_anchor(latitude, longitude, on_ground);
                return None;
            }
        };

        let threshold = if on_ground {
            GROUND_MOVEMENT_THRESHOLD_M
        } else {
            AIRBORNE_MOVEMENT_THRESHOLD_M
        };
        let moved = geo::distance_m(anchor.latitude, anchor.longitude, latitude, longitude);
        if moved < threshold {
            return None;
        }

        let bearing = geo::bearing_deg(anchor.latitude, anchor.longitude, latitude, longitude);
        self.move_anchor(latitude, longitude, on_ground);
        Some(bearing as f32)
    }

    fn move_anchor(&mut self, latitude: f64, longitude: f64, on_ground: bool) {
        self.anchor = Some(Anchor {
            latitude,
            longitude,
            on_ground,
        });
    }
}
