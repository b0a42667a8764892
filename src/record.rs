//! Per-airframe aircraft record.
//!
//! One record accumulates everything known about a tracked airframe: the
//! latest value of every feed and enrichment field (each stamped with the
//! data version at which it last changed), the bounded position trail, and
//! the hidden track-estimator state. Records are created on first sight,
//! mutated in place by the ingestion path and the enrichment applier, and
//! cloned wholesale for snapshots.

use std::path::PathBuf;

use crate::enrichment::EnrichmentUpdate;
use crate::track::TrackEstimator;
use crate::trail::Trail;
use crate::types::{EngineType, IcaoAddress, Species, SurveillanceMessage, WakeTurbulence};
use crate::versioned::Versioned;

/// Squawk codes that signal an emergency: hijack, radio failure, general.
pub const EMERGENCY_SQUAWKS: [u16; 3] = [7500, 7600, 7700];

/// All tracked state for one airframe.
#[derive(Debug, Clone)]
pub struct AircraftRecord {
    icao: IcaoAddress,
    hex: String,
    /// Set once, on record creation.
    pub first_seen_ms: i64,
    /// Set on every accepted message.
    pub last_update_ms: i64,
    pub count_messages_received: u64,

    // Fields merged from the message feed.
    pub callsign: Versioned<String>,
    pub altitude: Versioned<i32>,
    pub ground_speed: Versioned<f32>,
    pub latitude: Versioned<f64>,
    pub longitude: Versioned<f64>,
    pub track: Versioned<f32>,
    pub vertical_rate: Versioned<i32>,
    pub squawk: Versioned<u16>,
    /// Derived from the squawk alone; the feed's own flag is ignored.
    pub emergency: Versioned<bool>,
    pub on_ground: Versioned<bool>,

    // Fields owned by the enrichment pipeline.
    pub registration: Versioned<String>,
    pub icao_type_code: Versioned<String>,
    pub manufacturer: Versioned<String>,
    pub model: Versioned<String>,
    pub operator: Versioned<String>,
    pub operator_code: Versioned<String>,
    pub engine_count: Versioned<String>,
    pub engine_type: Versioned<EngineType>,
    pub species: Versioned<Species>,
    pub wake_turbulence: Versioned<WakeTurbulence>,
    pub military: Versioned<bool>,
    pub user_notes: Versioned<String>,
    pub interested: Versioned<bool>,
    pub country: Versioned<String>,
    pub origin: Versioned<String>,
    pub destination: Versioned<String>,
    pub via: Versioned<Vec<String>>,
    pub picture_path: Versioned<PathBuf>,
    pub flights_count: Versioned<i64>,

    pub trail: Trail,
    pub(crate) estimator: TrackEstimator,
    max_changed_version: Option<i64>,

    // Enrichment scheduling bookkeeping (owned by the registry).
    pub(crate) last_database_check_ms: i64,
    pub(crate) database_recheck_done: bool,
}

impl AircraftRecord {
    pub fn new(icao: IcaoAddress, now_ms: i64) -> Self {
        Self {
            icao,
            hex: icao.to_string(),
            first_seen_ms: now_ms,
            last_update_ms: now_ms,
            count_messages_received: 0,
            callsign: Versioned::default(),
            altitude: Versioned::default(),
            ground_speed: Versioned::default(),
            latitude: Versioned::default(),
            longitude: Versioned::default(),
            track: Versioned::default(),
            vertical_rate: Versioned::default(),
            squawk: Versioned::default(),
            emergency: Versioned::default(),
            on_ground: Versioned::default(),
            registration: Versioned::default(),
            icao_type_code: Versioned::default(),
            manufacturer: Versioned::default(),
            model: Versioned::default(),
            operator: Versioned::default(),
            operator_code: Versioned::default(),
            engine_count: Versioned::default(),
            engine_type: Versioned::default(),
            species: Versioned::default(),
            wake_turbulence: Versioned::default(),
            military: Versioned::default(),
            user_notes: Versioned::default(),
            interested: Versioned::default(),
            country: Versioned::default(),
            origin: Versioned::default(),
            destination: Versioned::default(),
            via: Versioned::default(),
            picture_path: Versioned::default(),
            flights_count: Versioned::default(),
            trail: Trail::default(),
            estimator: TrackEstimator::default(),
            max_changed_version: None,
            last_database_check_ms: now_ms,
            database_recheck_done: false,
        }
    }

    pub fn icao(&self) -> IcaoAddress {
        self.icao
    }

    /// Canonical upper-case hex form of the address.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The highest changed-at stamp across all fields, or `None` if no
    /// field ever changed from its default.
    pub fn max_changed_version(&self) -> Option<i64> {
        self.max_changed_version
    }

    /// Fold one accepted message into the record under a single version:
    /// field merge, emergency derivation, track estimation, trail update,
    /// counters. Present fields win, absent fields never overwrite.
    pub fn apply_message(
        &mut self,
        msg: &SurveillanceMessage,
        version: i64,
        now_ms: i64,
        short_trail_secs: u32,
    ) {
        let mut changed = false;
        changed |= self.callsign.merge(msg.callsign.clone(), version);
        changed |= self.altitude.merge(msg.altitude, version);
        changed |= self.ground_speed.merge(msg.ground_speed, version);
        changed |= self.latitude.merge(msg.latitude, version);
        changed |= self.longitude.merge(msg.longitude, version);
        changed |= self.vertical_rate.merge(msg.vertical_rate, version);
        changed |= self.squawk.merge(msg.squawk, version);
        changed |= self.on_ground.merge(msg.on_ground, version);

        // Emergency follows the squawk, never the feed's own flag.
        if let Some(&squawk) = self.squawk.get() {
            changed |= self
                .emergency
                .set(EMERGENCY_SQUAWKS.contains(&squawk), version);
        }

        if let (Some(latitude), Some(longitude)) = (msg.latitude, msg.longitude) {
            let on_ground = self.on_ground.get().copied().unwrap_or(false);
            if let Some(track) =
                self.estimator
                    .estimate(latitude, longitude, on_ground, msg.track, now_ms)
            {
                changed |= self.track.set(track, version);
            }
            self.trail.update(
                latitude,
                longitude,
                self.track.get().copied(),
                now_ms,
                short_trail_secs,
            );
        }

        if changed {
            self.bump_version(version);
        }
        self.count_messages_received += 1;
        self.last_update_ms = now_ms;
    }

    /// Fold a completed enrichment batch into the record under a single
    /// version, using the same merge rule as the feed path. Returns whether
    /// the registration changed (which re-keys the picture lookup).
    pub fn apply_enrichment(&mut self, update: &EnrichmentUpdate, version: i64) -> bool {
        let registration_changed = self.registration.merge(update.registration.clone(), version);

        let mut changed = registration_changed;
        changed |= self.icao_type_code.merge(update.icao_type_code.clone(), version);
        changed |= self.manufacturer.merge(update.manufacturer.clone(), version);
        changed |= self.model.merge(update.model.clone(), version);
        changed |= self.operator.merge(update.operator.clone(), version);
        changed |= self.operator_code.merge(update.operator_code.clone(), version);
        changed |= self.engine_count.merge(update.engine_count.clone(), version);
        changed |= self.engine_type.merge(update.engine_type, version);
        changed |= self.species.merge(update.species, version);
        changed |= self.wake_turbulence.merge(update.wake_turbulence, version);
        changed |= self.military.merge(update.military, version);
        changed |= self.user_notes.merge(update.user_notes.clone(), version);
        changed |= self.interested.merge(update.interested, version);
        changed |= self.country.merge(update.country.clone(), version);
        changed |= self.origin.merge(update.origin.clone(), version);
        changed |= self.destination.merge(update.destination.clone(), version);
        changed |= self.via.merge(update.via.clone(), version);
        changed |= self.picture_path.merge(update.picture_path.clone(), version);
        changed |= self.flights_count.merge(update.flights_count, version);

        if changed {
            self.bump_version(version);
        }
        registration_changed
    }

    fn bump_version(&mut self, version: i64) {
        self.max_changed_version = Some(self.max_changed_version.unwrap_or(i64::MIN).max(version));
    }
}
