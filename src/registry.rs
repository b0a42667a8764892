//! The aircraft registry: ingestion, versioning, queries, lifecycle.
//!
//! The registry owns the identity→record table behind one coarse lock.
//! Three contexts touch it concurrently: the ingestion path (self-serial),
//! the heartbeat timer, and arbitrary reader threads calling
//! [`AircraftRegistry::find`] / [`AircraftRegistry::snapshot`]. Enrichment
//! lookups run on a dedicated worker task; their results come back over a
//! channel and are applied by re-resolving the record id, never through a
//! held reference, so a record cleared mid-lookup is a silent no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::clock::{SystemTimeSource, TimeSource, VersionClock};
use crate::config::SettingsStore;
use crate::enrichment::{
    self, AircraftDatabase, EnrichmentError, EnrichmentJob, JobContext, JobKind, Pipeline,
    PictureSource, StandingData, WorkItem, WorkResult,
};
use crate::record::AircraftRecord;
use crate::types::{FeedEvent, IcaoAddress, SurveillanceMessage};

/// Minimum spacing between heartbeat-driven database re-checks per record.
pub const DATABASE_RECHECK_INTERVAL_MS: i64 = 60 * 1_000;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("registry already started")]
    AlreadyStarted,
}

/// Notifications published by the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// The number of tracked aircraft changed.
    CountChanged(usize),
    /// An enrichment lookup faulted; ingestion was unaffected.
    FaultCaught(Arc<EnrichmentError>),
}

/// Counters exposed for monitoring, in the usual relaxed-atomics shape.
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub messages_received: AtomicU64,
    pub messages_rejected: AtomicU64,
    pub records_created: AtomicU64,
    pub lookups_completed: AtomicU64,
    pub enrichment_faults: AtomicU64,
}

impl RegistryStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            records_created: self.records_created.load(Ordering::Relaxed),
            lookups_completed: self.lookups_completed.load(Ordering::Relaxed),
            enrichment_faults: self.enrichment_faults.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_rejected: u64,
    pub records_created: u64,
    pub lookups_completed: u64,
    pub enrichment_faults: u64,
}

/// A consistent, fully-cloned view of the visible aircraft.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub aircraft: Vec<AircraftRecord>,
    /// Source time at which the snapshot was taken.
    pub timestamp_ms: i64,
    /// Highest changed-at stamp among the included records, or -1 when the
    /// snapshot is empty. Clients poll "changed since" against this.
    pub latest_version: i64,
}

/// In-flight enrichment job accounting; lets callers await quiescence.
struct InFlight {
    count: watch::Sender<usize>,
}

impl InFlight {
    fn new() -> Self {
        let (count, _rx) = watch::channel(0);
        Self { count }
    }

    fn begin(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    fn end(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn settled(&self) {
        let mut rx = self.count.subscribe();
        // wait_for inspects the current value before sleeping, so a count
        // that is already zero returns immediately.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// The aircraft registry engine. Construct via [`RegistryBuilder`], share
/// via `Arc`, and inject into callers; there is no ambient global instance.
pub struct AircraftRegistry {
    table: Mutex<HashMap<u32, AircraftRecord>>,
    clock: VersionClock,
    time: Arc<dyn TimeSource>,
    settings: Arc<SettingsStore>,
    stats: Arc<RegistryStats>,
    events: broadcast::Sender<RegistryEvent>,
    started: AtomicBool,

    database: Option<Arc<dyn AircraftDatabase>>,
    standing_data: Option<Arc<dyn StandingData>>,
    pictures: Option<Arc<dyn PictureSource>>,
    source: Mutex<Option<mpsc::UnboundedReceiver<FeedEvent>>>,

    jobs: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    in_flight: InFlight,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AircraftRegistry {
    /// Validate collaborators and spawn the enrichment worker and applier.
    /// Fails fast when the message source, database, or standing-data
    /// collaborator is missing.
    pub fn start(self: &Arc<Self>) -> Result<(), RegistryError> {
        if self.source.lock().is_none() {
            return Err(RegistryError::MissingCollaborator("message source"));
        }
        let database = self
            .database
            .clone()
            .ok_or(RegistryError::MissingCollaborator("aircraft database"))?;
        let standing_data = self
            .standing_data
            .clone()
            .ok_or(RegistryError::MissingCollaborator("standing data"))?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::AlreadyStarted);
        }

        let pipeline = Arc::new(Pipeline::new(database, standing_data, self.pictures.clone()));
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<WorkResult>();

        let worker = enrichment::spawn_worker(pipeline, jobs_rx, results_tx);

        // The applier holds only a weak handle so dropping the registry
        // tears the task chain down instead of leaking it.
        let weak = Arc::downgrade(self);
        let applier = tokio::spawn(async move {
            while let Some(result) = results_rx.recv().await {
                match weak.upgrade() {
                    Some(registry) => registry.apply_result(result),
                    None => break,
                }
            }
        });

        *self.jobs.lock() = Some(jobs_tx);
        self.handles.lock().extend([worker, applier]);
        tracing::info!("aircraft registry started");
        Ok(())
    }

    /// Consume the message source until it closes, dispatching each event.
    pub async fn run(&self) -> Result<(), RegistryError> {
        let mut source = self
            .source
            .lock()
            .take()
            .ok_or(RegistryError::MissingCollaborator("message source"))?;
        while let Some(event) = source.recv().await {
            match event {
                FeedEvent::Message(msg) => self.ingest(&msg),
                FeedEvent::SourceChanged => self.source_changed(),
                FeedEvent::PositionReset(hex) => self.position_reset(&hex),
            }
        }
        tracing::info!("message source closed");
        Ok(())
    }

    /// Stop ingesting and drain the background tasks. Queued enrichment
    /// results are still applied; teardown itself raises no faults.
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        *self.jobs.lock() = None;
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("aircraft registry stopped");
    }

    /// Fold one decoded message into the registry. No-op when the registry
    /// is not started or the message is not a position/identity
    /// transmission; malformed addresses are dropped silently.
    pub fn ingest(&self, msg: &SurveillanceMessage) {
        if !self.started.load(Ordering::SeqCst) || !msg.kind.is_transmission() {
            return;
        }
        let icao = match IcaoAddress::parse(&msg.hex) {
            Some(icao) => icao,
            None => {
                self.stats.messages_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("dropping message with unparsable address {:?}", msg.hex);
                return;
            }
        };

        let now = self.time.now_ms();
        let short_trail_secs = self.settings.current().short_trail_secs;
        let mut created = false;
        let mut new_context = None;
        let count;
        {
            let mut table = self.table.lock();
            let record = table.entry(icao.raw()).or_insert_with(|| {
                created = true;
                AircraftRecord::new(icao, now)
            });
            let version = self.clock.next();
            record.apply_message(msg, version, now, short_trail_secs);
            if created {
                new_context = Some(job_context(record));
            }
            count = table.len();
        }

        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        if created {
            self.stats.records_created.fetch_add(1, Ordering::Relaxed);
            if let Some(context) = new_context {
                self.schedule(JobKind::FullLookup, context);
            }
            self.publish(RegistryEvent::CountChanged(count));
        }
    }

    /// Heartbeat tick: retry the database fetch (and the catalogue lookups
    /// keyed on it) for records still lacking a registration. Runs at most
    /// once per record per [`DATABASE_RECHECK_INTERVAL_MS`], and only once
    /// total per record.
    pub fn heartbeat(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let now = self.time.now_ms();
        let mut due = Vec::new();
        {
            let mut table = self.table.lock();
            for record in table.values_mut() {
                if record.registration.is_some() || record.database_recheck_done {
                    continue;
                }
                if now - record.last_database_check_ms < DATABASE_RECHECK_INTERVAL_MS {
                    continue;
                }
                record.database_recheck_done = true;
                record.last_database_check_ms = now;
                due.push(job_context(record));
            }
        }
        for context in due {
            self.schedule(JobKind::DatabaseRefresh, context);
        }
    }

    /// Standing data was reloaded: re-look-up every record whose route,
    /// code block, or type is still missing.
    pub fn standing_data_reloaded(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let due: Vec<_> = {
            let table = self.table.lock();
            table
                .values()
                .map(job_context)
                .filter(|c| c.needs_route || c.needs_code_block || c.needs_type)
                .collect()
        };
        tracing::debug!("standing data reloaded; re-checking {} records", due.len());
        for context in due {
            self.schedule(JobKind::StandingDataRefresh, context);
        }
    }

    /// The picture directory cache was invalidated: re-key every record's
    /// picture lookup.
    pub fn picture_cache_changed(&self) {
        if !self.started.load(Ordering::SeqCst) || self.pictures.is_none() {
            return;
        }
        let due: Vec<_> = { self.table.lock().values().map(job_context).collect() };
        for context in due {
            self.schedule(JobKind::PictureRefresh, context);
        }
    }

    pub fn request_picture_refresh(&self, icao: IcaoAddress) {
        if let Some(context) = self.context_for(icao) {
            self.schedule(JobKind::PictureRefresh, context);
        }
    }

    pub fn request_database_refresh(&self, icao: IcaoAddress) {
        if let Some(context) = self.context_for(icao) {
            self.schedule(JobKind::DatabaseRefresh, context);
        }
    }

    /// The feed switched sources: every accumulated record is stale.
    pub fn source_changed(&self) {
        self.table.lock().clear();
        tracing::info!("message source changed; registry table cleared");
        self.publish(RegistryEvent::CountChanged(0));
    }

    /// Clear the position trail of one airframe.
    pub fn position_reset(&self, hex: &str) {
        let Some(icao) = IcaoAddress::parse(hex) else {
            return;
        };
        if let Some(record) = self.table.lock().get_mut(&icao.raw()) {
            record.trail.clear();
        }
    }

    /// Deep clone of one record, visible or not.
    pub fn find(&self, icao: IcaoAddress) -> Option<AircraftRecord> {
        self.table.lock().get(&icao.raw()).cloned()
    }

    /// Deep clones of every record updated within the display timeout.
    /// Mutations after the snapshot returns never alter it.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let now = self.time.now_ms();
        let timeout_ms = self.settings.current().display_timeout_secs as i64 * 1_000;

        let table = self.table.lock();
        let mut latest_version = -1;
        let mut aircraft = Vec::new();
        for record in table.values() {
            if now - record.last_update_ms > timeout_ms {
                continue;
            }
            if let Some(version) = record.max_changed_version() {
                latest_version = latest_version.max(version);
            }
            aircraft.push(record.clone());
        }

        RegistrySnapshot {
            aircraft,
            timestamp_ms: now,
            latest_version,
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn stats(&self) -> Arc<RegistryStats> {
        Arc::clone(&self.stats)
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Wait until no enrichment job is queued or in flight.
    pub async fn settle(&self) {
        self.in_flight.settled().await;
    }

    fn context_for(&self, icao: IcaoAddress) -> Option<JobContext> {
        self.table.lock().get(&icao.raw()).map(job_context)
    }

    fn schedule(&self, kind: JobKind, context: JobContext) {
        let style = self.settings.current().airport_codes;
        let guard = self.jobs.lock();
        if let Some(jobs) = guard.as_ref() {
            self.in_flight.begin();
            let item = WorkItem {
                job: EnrichmentJob { kind, context },
                style,
            };
            if jobs.send(item).is_err() {
                self.in_flight.end();
            }
        }
    }

    /// Apply a completed enrichment result under the registry lock. The
    /// record is re-resolved by id; a record cleared while the lookup was
    /// in flight is a silent no-op.
    fn apply_result(&self, result: WorkResult) {
        for fault in result.faults {
            self.stats.enrichment_faults.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("enrichment fault: {}", fault);
            self.publish(RegistryEvent::FaultCaught(Arc::new(fault)));
        }

        let mut picture_context = None;
        {
            let mut table = self.table.lock();
            if let Some(record) = table.get_mut(&result.update.icao.raw()) {
                let version = self.clock.next();
                let registration_changed = record.apply_enrichment(&result.update, version);
                if registration_changed {
                    picture_context = Some(job_context(record));
                }
            }
        }

        self.stats.lookups_completed.fetch_add(1, Ordering::Relaxed);
        if let Some(context) = picture_context {
            // A changed registration re-keys the picture lookup.
            self.schedule(JobKind::PictureRefresh, context);
        }
        self.in_flight.end();
    }

    fn publish(&self, event: RegistryEvent) {
        // Err just means nobody is listening right now.
        let _ = self.events.send(event);
    }
}

fn job_context(record: &AircraftRecord) -> JobContext {
    JobContext {
        icao: record.icao(),
        hex: record.hex().to_string(),
        callsign: record.callsign.value(),
        operator_code: record.operator_code.value(),
        registration: record.registration.value(),
        icao_type_code: record.icao_type_code.value(),
        needs_route: record.origin.is_none() && record.destination.is_none(),
        needs_code_block: record.country.is_none(),
        needs_type: record.model.is_none(),
    }
}

/// Wires a registry together. Collaborators are injected here; `start`
/// verifies the mandatory ones.
pub struct RegistryBuilder {
    time: Arc<dyn TimeSource>,
    settings: Arc<SettingsStore>,
    database: Option<Arc<dyn AircraftDatabase>>,
    standing_data: Option<Arc<dyn StandingData>>,
    pictures: Option<Arc<dyn PictureSource>>,
    source: Option<mpsc::UnboundedReceiver<FeedEvent>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            time: Arc::new(SystemTimeSource),
            settings: Arc::new(SettingsStore::default()),
            database: None,
            standing_data: None,
            pictures: None,
            source: None,
        }
    }

    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn settings(mut self, settings: Arc<SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn database(mut self, database: Arc<dyn AircraftDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn standing_data(mut self, standing_data: Arc<dyn StandingData>) -> Self {
        self.standing_data = Some(standing_data);
        self
    }

    pub fn pictures(mut self, pictures: Arc<dyn PictureSource>) -> Self {
        self.pictures = Some(pictures);
        self
    }

    pub fn source(mut self, source: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> Arc<AircraftRegistry> {
        let (events, _rx) = broadcast::channel(64);
        Arc::new(AircraftRegistry {
            table: Mutex::new(HashMap::new()),
            clock: VersionClock::new(Arc::clone(&self.time)),
            time: self.time,
            settings: self.settings,
            stats: Arc::new(RegistryStats::default()),
            events,
            started: AtomicBool::new(false),
            database: self.database,
            standing_data: self.standing_data,
            pictures: self.pictures,
            source: Mutex::new(self.source),
            jobs: Mutex::new(None),
            in_flight: InFlight::new(),
            handles: Mutex::new(Vec::new()),
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::config::Settings;
    use crate::enrichment::{AircraftTypeInfo, CodeBlock, DatabaseAircraft, LookupError, Route};
    use crate::types::{MessageKind, Species};

    struct CountingDatabase {
        registration: Option<String>,
        lookups: AtomicU64,
    }

    impl CountingDatabase {
        fn new(registration: Option<&str>) -> Self {
            Self {
                registration: registration.map(String::from),
                lookups: AtomicU64::new(0),
            }
        }

        fn lookups(&self) -> u64 {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl AircraftDatabase for CountingDatabase {
        fn lookup_by_address(&self, _hex: &str) -> Result<Option<DatabaseAircraft>, LookupError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.registration.as_ref().map(|r| DatabaseAircraft {
                registration: Some(r.clone()),
                ..Default::default()
            }))
        }

        fn count_flights(&self, _registration: &str) -> Result<i64, LookupError> {
            Ok(0)
        }
    }

    struct FailingDatabase;

    impl AircraftDatabase for FailingDatabase {
        fn lookup_by_address(&self, _hex: &str) -> Result<Option<DatabaseAircraft>, LookupError> {
            Err("database offline".into())
        }

        fn count_flights(&self, _registration: &str) -> Result<i64, LookupError> {
            Err("database offline".into())
        }
    }

    struct EmptyStandingData;

    impl StandingData for EmptyStandingData {
        fn find_route(&self, _callsign: &str) -> Result<Option<Route>, LookupError> {
            Ok(None)
        }

        fn find_code_block(&self, _hex: &str) -> Result<Option<CodeBlock>, LookupError> {
            Ok(None)
        }

        fn find_aircraft_type(
            &self,
            _type_code: &str,
        ) -> Result<Option<AircraftTypeInfo>, LookupError> {
            Ok(None)
        }
    }

    /// Database whose row only exists from the second lookup onwards, the
    /// way a registry sees airframes newer than its reference snapshot.
    #[derive(Default)]
    struct LateDatabase {
        lookups: AtomicU64,
    }

    impl AircraftDatabase for LateDatabase {
        fn lookup_by_address(&self, _hex: &str) -> Result<Option<DatabaseAircraft>, LookupError> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            Ok(Some(DatabaseAircraft {
                registration: Some("D-AIZZ".into()),
                icao_type_code: Some("A320".into()),
                ..Default::default()
            }))
        }

        fn count_flights(&self, _registration: &str) -> Result<i64, LookupError> {
            Ok(3)
        }
    }

    struct TypeCatalogue;

    impl StandingData for TypeCatalogue {
        fn find_route(&self, _callsign: &str) -> Result<Option<Route>, LookupError> {
            Ok(None)
        }

        fn find_code_block(&self, _hex: &str) -> Result<Option<CodeBlock>, LookupError> {
            Ok(None)
        }

        fn find_aircraft_type(
            &self,
            type_code: &str,
        ) -> Result<Option<AircraftTypeInfo>, LookupError> {
            if type_code != "A320" {
                return Ok(None);
            }
            Ok(Some(AircraftTypeInfo {
                species: Some(Species::Landplane),
                ..Default::default()
            }))
        }
    }

    fn registry_with(
        time: Arc<ManualTimeSource>,
        database: Arc<dyn AircraftDatabase>,
    ) -> Arc<AircraftRegistry> {
        let (_feed, source) = mpsc::unbounded_channel();
        let registry = RegistryBuilder::new()
            .time_source(time)
            .database(database)
            .standing_data(Arc::new(EmptyStandingData))
            .source(source)
            .build();
        registry.start().expect("start");
        registry
    }

    fn position_msg(hex: &str, lat: f64, lon: f64) -> SurveillanceMessage {
        SurveillanceMessage::new(hex, MessageKind::AirbornePosition).with_position(lat, lon)
    }

    #[tokio::test]
    async fn test_start_requires_collaborators() {
        let registry = RegistryBuilder::new().build();
        assert!(matches!(
            registry.start(),
            Err(RegistryError::MissingCollaborator("message source"))
        ));

        let (_feed, source) = mpsc::unbounded_channel();
        let registry = RegistryBuilder::new().source(source).build();
        assert!(matches!(
            registry.start(),
            Err(RegistryError::MissingCollaborator("aircraft database"))
        ));
    }

    #[tokio::test]
    async fn test_ingest_before_start_is_a_no_op() {
        let (_feed, source) = mpsc::unbounded_channel();
        let registry = RegistryBuilder::new()
            .database(Arc::new(CountingDatabase::new(None)))
            .standing_data(Arc::new(EmptyStandingData))
            .source(source)
            .build();

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_versions_follow_source_time() {
        let time = Arc::new(ManualTimeSource::new(100));
        let registry = registry_with(time.clone(), Arc::new(CountingDatabase::new(None)));

        // Two different airframes at the same source time get consecutive
        // versions 100 and 101.
        registry.ingest(&position_msg("400001", 51.0, 6.0));
        registry.ingest(&position_msg("400002", 51.0, 6.0));

        let first = registry.find(IcaoAddress::new(0x400001)).unwrap();
        let second = registry.find(IcaoAddress::new(0x400002)).unwrap();
        assert_eq!(first.latitude.changed_at(), Some(100));
        assert_eq!(second.latitude.changed_at(), Some(101));

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_track_derived_end_to_end() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let registry = registry_with(time.clone(), Arc::new(CountingDatabase::new(None)));

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        time.advance(10_000);
        registry.ingest(&position_msg("4008F6", 51.0, 7.0));

        let record = registry.find(IcaoAddress::new(0x4008F6)).unwrap();
        let track = *record.track.get().expect("track derived");
        assert!((track - 89.6).abs() < 0.1, "got {}", track);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_isolation() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let registry = registry_with(time.clone(), Arc::new(CountingDatabase::new(None)));

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.aircraft.len(), 1);

        time.advance(5_000);
        registry.ingest(&position_msg("4008F6", 52.0, 7.0));

        // The already-taken snapshot must not see the mutation.
        assert_eq!(snapshot.aircraft[0].latitude.get(), Some(&51.0));
        assert_eq!(snapshot.aircraft[0].longitude.get(), Some(&6.0));

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_display_timeout_window() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let registry = registry_with(time.clone(), Arc::new(CountingDatabase::new(None)));
        let timeout_ms = 30 * 1_000; // default display_timeout_secs

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));

        // Exactly at the timeout boundary: still visible.
        time.set(1_000 + timeout_ms);
        assert_eq!(registry.snapshot().aircraft.len(), 1);

        // One millisecond older: hidden from snapshots, still findable.
        time.advance(1);
        let snapshot = registry.snapshot();
        assert!(snapshot.aircraft.is_empty());
        assert_eq!(snapshot.latest_version, -1);
        assert!(registry.find(IcaoAddress::new(0x4008F6)).is_some());

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_latest_version() {
        let time = Arc::new(ManualTimeSource::new(500));
        let registry = registry_with(time.clone(), Arc::new(CountingDatabase::new(None)));

        assert_eq!(registry.snapshot().latest_version, -1);

        registry.ingest(&position_msg("400001", 51.0, 6.0));
        registry.ingest(&position_msg("400002", 52.0, 6.0));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.latest_version, 501);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_addresses_are_dropped_silently() {
        let time = Arc::new(ManualTimeSource::new(0));
        let registry = registry_with(time, Arc::new(CountingDatabase::new(None)));

        registry.ingest(&position_msg("", 51.0, 6.0));
        registry.ingest(&position_msg("not-hex", 51.0, 6.0));

        assert!(registry.is_empty());
        assert_eq!(registry.stats().snapshot().messages_rejected, 2);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_non_transmission_messages_are_ignored() {
        let time = Arc::new(ManualTimeSource::new(0));
        let registry = registry_with(time, Arc::new(CountingDatabase::new(None)));

        registry.ingest(&SurveillanceMessage::new("4008F6", MessageKind::Other));
        assert!(registry.is_empty());

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_count_changed_on_new_record() {
        let time = Arc::new(ManualTimeSource::new(0));
        let registry = registry_with(time, Arc::new(CountingDatabase::new(None)));
        let mut events = registry.subscribe();

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        // A second message for the same airframe creates nothing.
        registry.ingest(&position_msg("4008F6", 51.0, 6.1));

        let mut count_events = 0;
        while let Ok(event) = events.try_recv() {
            if let RegistryEvent::CountChanged(count) = event {
                assert_eq!(count, 1);
                count_events += 1;
            }
        }
        assert_eq!(count_events, 1);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_source_changed_clears_table() {
        let time = Arc::new(ManualTimeSource::new(0));
        let registry = registry_with(time, Arc::new(CountingDatabase::new(None)));

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        assert_eq!(registry.len(), 1);

        registry.source_changed();
        assert!(registry.is_empty());
        assert!(registry.find(IcaoAddress::new(0x4008F6)).is_none());

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_position_reset_clears_only_the_trail() {
        let time = Arc::new(ManualTimeSource::new(0));
        let registry = registry_with(time.clone(), Arc::new(CountingDatabase::new(None)));

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        time.advance(2_000);
        registry.ingest(&position_msg("4008F6", 51.0, 6.01));
        assert!(!registry
            .find(IcaoAddress::new(0x4008F6))
            .unwrap()
            .trail
            .is_empty());

        registry.position_reset("4008F6");
        let record = registry.find(IcaoAddress::new(0x4008F6)).unwrap();
        assert!(record.trail.is_empty());
        assert!(record.latitude.is_some());

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_enrichment_applies_registration() {
        let time = Arc::new(ManualTimeSource::new(0));
        let database = Arc::new(CountingDatabase::new(Some("G-EZTH")));
        let registry = registry_with(time, database);

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        registry.settle().await;

        let record = registry.find(IcaoAddress::new(0x4008F6)).unwrap();
        assert_eq!(record.registration.get().map(String::as_str), Some("G-EZTH"));
        assert!(record.registration.changed_at().is_some());

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_database_recheck_runs_exactly_once() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let database = Arc::new(CountingDatabase::new(None));
        let registry = registry_with(time.clone(), database.clone());

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        registry.settle().await;
        assert_eq!(database.lookups(), 1);

        // Three heartbeats spaced one refresh interval apart: only the
        // first may retry, for 2 lookups total.
        for _ in 0..3 {
            time.advance(DATABASE_RECHECK_INTERVAL_MS);
            registry.heartbeat();
            registry.settle().await;
        }
        assert_eq!(database.lookups(), 2);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_recheck_skipped_once_registration_known() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let database = Arc::new(CountingDatabase::new(Some("G-EZTH")));
        let registry = registry_with(time.clone(), database.clone());

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        registry.settle().await;
        assert_eq!(database.lookups(), 1);

        time.advance(DATABASE_RECHECK_INTERVAL_MS);
        registry.heartbeat();
        registry.settle().await;
        assert_eq!(database.lookups(), 1);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_recheck_also_resolves_type_catalogue() {
        let time = Arc::new(ManualTimeSource::new(1_000));
        let (_feed, source) = mpsc::unbounded_channel();
        let registry = RegistryBuilder::new()
            .time_source(time.clone())
            .database(Arc::new(LateDatabase::default()))
            .standing_data(Arc::new(TypeCatalogue))
            .source(source)
            .build();
        registry.start().expect("start");

        // The creation-time batch finds no database row.
        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        registry.settle().await;
        let record = registry.find(IcaoAddress::new(0x4008F6)).unwrap();
        assert!(record.registration.is_none());

        // The row exists by the retry; the catalogue entry keyed on its
        // type code must land in the same pass.
        time.advance(DATABASE_RECHECK_INTERVAL_MS);
        registry.heartbeat();
        registry.settle().await;

        let record = registry.find(IcaoAddress::new(0x4008F6)).unwrap();
        assert_eq!(record.registration.get().map(String::as_str), Some("D-AIZZ"));
        assert_eq!(record.icao_type_code.get().map(String::as_str), Some("A320"));
        assert_eq!(record.species.get(), Some(&Species::Landplane));

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_enrichment_fault_is_surfaced_not_fatal() {
        let time = Arc::new(ManualTimeSource::new(0));
        let registry = registry_with(time, Arc::new(FailingDatabase));
        let mut events = registry.subscribe();

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        registry.settle().await;

        // Ingestion survived the fault.
        registry.ingest(&position_msg("4008F6", 51.0, 6.1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().snapshot().enrichment_faults, 1);

        let mut saw_fault = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RegistryEvent::FaultCaught(_)) {
                saw_fault = true;
            }
        }
        assert!(saw_fault);

        registry.stop().await;
    }

    #[tokio::test]
    async fn test_run_consumes_feed_events() {
        let time = Arc::new(ManualTimeSource::new(0));
        let (feed, source) = mpsc::unbounded_channel();
        let registry = RegistryBuilder::new()
            .time_source(time)
            .database(Arc::new(CountingDatabase::new(None)))
            .standing_data(Arc::new(EmptyStandingData))
            .source(source)
            .build();
        registry.start().unwrap();

        feed.send(FeedEvent::Message(position_msg("4008F6", 51.0, 6.0)))
            .unwrap();
        feed.send(FeedEvent::SourceChanged).unwrap();
        drop(feed);
        registry.run().await.unwrap();

        assert!(registry.is_empty());
        registry.stop().await;
    }

    #[tokio::test]
    async fn test_display_timeout_is_live_reloadable() {
        let time = Arc::new(ManualTimeSource::new(0));
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let (_feed, source) = mpsc::unbounded_channel();
        let registry = RegistryBuilder::new()
            .time_source(time.clone())
            .settings(settings.clone())
            .database(Arc::new(CountingDatabase::new(None)))
            .standing_data(Arc::new(EmptyStandingData))
            .source(source)
            .build();
        registry.start().unwrap();

        registry.ingest(&position_msg("4008F6", 51.0, 6.0));
        time.set(60_000);
        assert!(registry.snapshot().aircraft.is_empty());

        settings.update(|s| s.display_timeout_secs = 120);
        assert_eq!(registry.snapshot().aircraft.len(), 1);

        registry.stop().await;
    }
}
