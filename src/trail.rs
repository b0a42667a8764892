//! Bounded dual-resolution position trail.
//!
//! Each aircraft keeps two views of its recent path:
//!
//! - a **full** history with straight-line compaction: a new point whose
//!   rounded heading matches the previous two points replaces the last one
//!   instead of appending, so long straight segments cost two points;
//! - a **short** rolling window bounded by a configurable duration, used
//!   for the fading "recent path" display.
//!
//! Sensor glitches that teleport an aircraft are detected by an implied
//! over-ground speed above roughly Mach 2; the whole trail is discarded and
//! restarted from the glitched point.

use std::collections::VecDeque;

use crate::geo;

/// Jump distance above which the implied-speed glitch check applies.
pub const GLITCH_DISTANCE_KM: f64 = 18.0;
/// Implied over-ground speed (km/s, ~Mach 2) above which a long jump is
/// treated as a sensor glitch rather than real movement.
pub const GLITCH_SPEED_KM_PER_SEC: f64 = 0.4;
/// Minimum spacing between recorded points.
const MIN_POINT_SPACING_MS: i64 = 1_000;

/// One recorded position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Track over ground at this point, if known.
    pub track: Option<f32>,
    pub time_ms: i64,
}

impl TrailPoint {
    fn rounded_track(&self) -> Option<i32> {
        self.track.map(|t| t.round() as i32)
    }
}

/// Bounded position history for one aircraft.
#[derive(Debug, Clone, Default)]
pub struct Trail {
    full: Vec<TrailPoint>,
    short: VecDeque<TrailPoint>,
}

impl Trail {
    /// Record a position sample. `short_window_secs` bounds the short trail.
    pub fn update(
        &mut self,
        latitude: f64,
        longitude: f64,
        track: Option<f32>,
        now_ms: i64,
        short_window_secs: u32,
    ) {
        if let Some(last) = self.full.last() {
            if last.latitude == latitude && last.longitude == longitude {
                return;
            }

            let distance_km =
                geo::distance_m(last.latitude, last.longitude, latitude, longitude) / 1_000.0;
            if distance_km > GLITCH_DISTANCE_KM {
                let elapsed_s = (now_ms - last.time_ms).max(0) as f64 / 1_000.0;
                if elapsed_s < distance_km / GLITCH_SPEED_KM_PER_SEC {
                    tracing::debug!(
                        "discarding trail: {:.1} km jump in {:.1} s",
                        distance_km,
                        elapsed_s
                    );
                    self.clear();
                }
            }
        }

        let point = TrailPoint {
            latitude,
            longitude,
            track,
            time_ms: now_ms,
        };

        match self.full.last() {
            Some(last) if now_ms - last.time_ms < MIN_POINT_SPACING_MS => {}
            _ => {
                if self.extends_straight_line(&point) {
                    if let Some(last) = self.full.last_mut() {
                        *last = point;
                    }
                } else {
                    self.full.push(point);
                }
                self.short.push_back(point);
            }
        }

        let cutoff = now_ms - short_window_secs as i64 * 1_000;
        while self.short.front().is_some_and(|p| p.time_ms < cutoff) {
            self.short.pop_front();
        }
    }

    /// True when the new point and the previous two share a rounded heading,
    /// so the last point can be slid forward instead of appended.
    fn extends_straight_line(&self, point: &TrailPoint) -> bool {
        let heading = match point.rounded_track() {
            Some(h) => h,
            None => return false,
        };
        let n = self.full.len();
        if n < 2 {
            return false;
        }
        self.full[n - 1].rounded_track() == Some(heading)
            && self.full[n - 2].rounded_track() == Some(heading)
    }

    pub fn clear(&mut self) {
        self.full.clear();
        self.short.clear();
    }

    pub fn full(&self) -> &[TrailPoint] {
        &self.full
    }

    pub fn short(&self) -> impl Iterator<Item = &TrailPoint> {
        self.short.iter()
    }

    pub fn short_len(&self) -> usize {
        self.short.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u32 = 30;

    #[test]
    fn test_appends_spaced_points() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.00, Some(90.0), 0, WINDOW);
        trail.update(51.0, 6.01, Some(95.0), 1_000, WINDOW);
        trail.update(51.0, 6.02, Some(100.0), 2_000, WINDOW);
        assert_eq!(trail.full().len(), 3);
    }

    #[test]
    fn test_skips_unchanged_position() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.0, Some(90.0), 0, WINDOW);
        trail.update(51.0, 6.0, Some(90.0), 5_000, WINDOW);
        assert_eq!(trail.full().len(), 1);
    }

    #[test]
    fn test_skips_points_closer_than_one_second() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.00, Some(90.0), 0, WINDOW);
        trail.update(51.0, 6.01, Some(90.0), 400, WINDOW);
        assert_eq!(trail.full().len(), 1);
    }

    #[test]
    fn test_straight_line_compaction() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.00, Some(90.0), 0, WINDOW);
        trail.update(51.0, 6.01, Some(90.2), 1_000, WINDOW);
        // Third point rounds to the same heading as the previous two:
        // it replaces the second point rather than appending.
        trail.update(51.0, 6.02, Some(89.8), 2_000, WINDOW);
        assert_eq!(trail.full().len(), 2);
        assert_eq!(trail.full()[1].longitude, 6.02);

        // A turn breaks the straight line and appends again.
        trail.update(51.0, 6.03, Some(120.0), 3_000, WINDOW);
        assert_eq!(trail.full().len(), 3);
    }

    #[test]
    fn test_glitch_jump_discards_trail() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.0, Some(90.0), 0, WINDOW);
        trail.update(51.0, 6.1, Some(90.0), 1_000, WINDOW);

        // ~70 km east in two seconds: far above Mach 2, trail resets.
        trail.update(51.0, 7.1, Some(90.0), 3_000, WINDOW);
        assert_eq!(trail.full().len(), 1);
        assert_eq!(trail.full()[0].longitude, 7.1);
        assert_eq!(trail.short_len(), 1);
    }

    #[test]
    fn test_long_jump_at_sane_speed_is_kept() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.0, Some(90.0), 0, WINDOW);
        // ~70 km in 5 minutes is ordinary jet speed after a coverage gap.
        trail.update(51.0, 7.0, Some(90.0), 300_000, WINDOW);
        assert_eq!(trail.full().len(), 2);
    }

    #[test]
    fn test_short_window_trimming() {
        let mut trail = Trail::default();
        trail.update(51.0, 6.00, None, 0, WINDOW);
        trail.update(51.0, 6.01, None, 10_000, WINDOW);
        trail.update(51.0, 6.02, None, 40_000, WINDOW);

        // The point at t=0 is older than 40s - 30s window.
        assert_eq!(trail.short_len(), 2);
        // Full history is unaffected by the window.
        assert_eq!(trail.full().len(), 3);
    }
}
