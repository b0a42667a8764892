//! Background enrichment of aircraft records from reference sources.
//!
//! Reference lookups (aircraft database, standing data, picture directory)
//! are slow relative to message ingestion, so they run on a dedicated
//! worker task. The registry schedules an [`EnrichmentJob`] carrying a
//! snapshot of the fields the lookups key on; the worker executes it via a
//! [`Pipeline`] and posts the resulting field updates back to the registry,
//! which applies them under its own lock by re-resolving the record id.
//! A fault in one lookup is reported and never aborts the others.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::AirportCodeStyle;
use crate::types::{EngineType, IcaoAddress, Species, WakeTurbulence};

/// Boxed error produced by a collaborator lookup.
pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

/// Aircraft master-data row from the reference database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseAircraft {
    pub registration: Option<String>,
    pub icao_type_code: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub operator: Option<String>,
    pub operator_code: Option<String>,
    pub engine_count: Option<String>,
    pub engine_type: Option<EngineType>,
    pub species: Option<Species>,
    pub wake_turbulence: Option<WakeTurbulence>,
    /// Free-text notes the operator attached to this airframe.
    pub user_notes: Option<String>,
    /// Operator-flagged "interesting" marker.
    pub interested: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Airport {
    pub icao: String,
    pub iata: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub origin: Airport,
    pub destination: Airport,
    pub via: Vec<Airport>,
}

/// Country code-block entry for an address range.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub country: String,
    pub is_military: bool,
}

/// Aircraft type catalogue entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftTypeInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub engine_count: Option<String>,
    pub engine_type: Option<EngineType>,
    pub species: Option<Species>,
    pub wake_turbulence: Option<WakeTurbulence>,
}

/// Reference database collaborator.
pub trait AircraftDatabase: Send + Sync {
    fn lookup_by_address(&self, hex: &str) -> Result<Option<DatabaseAircraft>, LookupError>;
    fn count_flights(&self, registration: &str) -> Result<i64, LookupError>;
}

/// Standing-data collaborator (routes, code blocks, type catalogue).
pub trait StandingData: Send + Sync {
    fn find_route(&self, callsign: &str) -> Result<Option<Route>, LookupError>;
    fn find_code_block(&self, hex: &str) -> Result<Option<CodeBlock>, LookupError>;
    fn find_aircraft_type(&self, type_code: &str) -> Result<Option<AircraftTypeInfo>, LookupError>;
}

/// Picture directory collaborator.
pub trait PictureSource: Send + Sync {
    fn find_picture(
        &self,
        hex: &str,
        registration: Option<&str>,
    ) -> Result<Option<PathBuf>, LookupError>;
}

/// A fault raised by one collaborator lookup. Surfaced via the registry's
/// event channel; never propagated into ingestion.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("database lookup failed for {hex}: {cause}")]
    Database { hex: String, cause: LookupError },
    #[error("standing data lookup failed for {hex}: {cause}")]
    StandingData { hex: String, cause: LookupError },
    #[error("picture lookup failed for {hex}: {cause}")]
    Picture { hex: String, cause: LookupError },
}

/// What a job should look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// One-shot batch for a newly created record: database row, flight
    /// count, code block, type catalogue, route, picture.
    FullLookup,
    /// Heartbeat-driven retry for a record still lacking a registration.
    DatabaseRefresh,
    /// Re-lookup of route/code-block/type after a standing-data reload.
    StandingDataRefresh,
    /// Picture re-lookup after a registration change or cache invalidation.
    PictureRefresh,
}

/// Snapshot of the record fields lookups key on, taken under the registry
/// lock at scheduling time. The worker never holds a record reference.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub icao: IcaoAddress,
    pub hex: String,
    pub callsign: Option<String>,
    pub operator_code: Option<String>,
    pub registration: Option<String>,
    pub icao_type_code: Option<String>,
    pub needs_route: bool,
    pub needs_code_block: bool,
    pub needs_type: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentJob {
    pub kind: JobKind,
    pub context: JobContext,
}

/// Field updates produced by a completed job, applied to the record via
/// the usual versioned merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentUpdate {
    pub icao: IcaoAddress,
    pub registration: Option<String>,
    pub icao_type_code: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub operator: Option<String>,
    pub operator_code: Option<String>,
    pub engine_count: Option<String>,
    pub engine_type: Option<EngineType>,
    pub species: Option<Species>,
    pub wake_turbulence: Option<WakeTurbulence>,
    pub user_notes: Option<String>,
    pub interested: Option<bool>,
    pub country: Option<String>,
    pub military: Option<bool>,
    pub flights_count: Option<i64>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub via: Option<Vec<String>>,
    pub picture_path: Option<PathBuf>,
}

impl EnrichmentUpdate {
    pub fn new(icao: IcaoAddress) -> Self {
        Self {
            icao,
            ..Default::default()
        }
    }
}

/// Executes enrichment jobs against the collaborators. Synchronous: the
/// async worker task is a thin loop around [`Pipeline::run`].
pub struct Pipeline {
    database: Arc<dyn AircraftDatabase>,
    standing_data: Arc<dyn StandingData>,
    pictures: Option<Arc<dyn PictureSource>>,
}

impl Pipeline {
    pub fn new(
        database: Arc<dyn AircraftDatabase>,
        standing_data: Arc<dyn StandingData>,
        pictures: Option<Arc<dyn PictureSource>>,
    ) -> Self {
        Self {
            database,
            standing_data,
            pictures,
        }
    }

    /// Run one job. Every lookup fault is collected rather than short-
    /// circuiting, so a broken collaborator degrades the result instead of
    /// losing it.
    pub fn run(
        &self,
        job: &EnrichmentJob,
        style: AirportCodeStyle,
    ) -> (EnrichmentUpdate, Vec<EnrichmentError>) {
        let ctx = &job.context;
        let mut update = EnrichmentUpdate::new(ctx.icao);
        let mut faults = Vec::new();

        match job.kind {
            JobKind::FullLookup => {
                self.database_lookup(ctx, &mut update, &mut faults);
                self.code_block_lookup(ctx, &mut update, &mut faults);
                self.type_lookup(ctx, &mut update, &mut faults);
                let operator_code = update.operator_code.clone();
                self.route_lookup(ctx, &operator_code, style, &mut update, &mut faults);
                let registration = update.registration.clone();
                self.picture_lookup(ctx, registration.as_deref(), &mut update, &mut faults);
            }
            JobKind::DatabaseRefresh => {
                self.database_lookup(ctx, &mut update, &mut faults);
                // A row that only appears on the retry carries the type code
                // and registration the catalogue lookups key on, so the
                // re-check repeats them as well.
                self.type_lookup(ctx, &mut update, &mut faults);
                if ctx.needs_code_block {
                    self.code_block_lookup(ctx, &mut update, &mut faults);
                }
            }
            JobKind::StandingDataRefresh => {
                if ctx.needs_code_block {
                    self.code_block_lookup(ctx, &mut update, &mut faults);
                }
                if ctx.needs_type {
                    self.type_lookup(ctx, &mut update, &mut faults);
                }
                if ctx.needs_route {
                    self.route_lookup(ctx, &None, style, &mut update, &mut faults);
                }
            }
            JobKind::PictureRefresh => {
                self.picture_lookup(ctx, ctx.registration.as_deref(), &mut update, &mut faults);
            }
        }

        (update, faults)
    }

    fn database_lookup(
        &self,
        ctx: &JobContext,
        update: &mut EnrichmentUpdate,
        faults: &mut Vec<EnrichmentError>,
    ) {
        match self.database.lookup_by_address(&ctx.hex) {
            Ok(Some(row)) => {
                update.registration = row.registration;
                update.icao_type_code = row.icao_type_code;
                update.manufacturer = row.manufacturer;
                update.model = row.model;
                update.operator = row.operator;
                update.operator_code = row.operator_code;
                update.engine_count = row.engine_count;
                update.engine_type = row.engine_type;
                update.species = row.species;
                update.wake_turbulence = row.wake_turbulence;
                update.user_notes = row.user_notes;
                update.interested = row.interested;
            }
            Ok(None) => {}
            Err(cause) => faults.push(EnrichmentError::Database {
                hex: ctx.hex.clone(),
                cause,
            }),
        }

        let registration = update
            .registration
            .as_deref()
            .or(ctx.registration.as_deref());
        if let Some(registration) = registration {
            match self.database.count_flights(registration) {
                Ok(count) => update.flights_count = Some(count),
                Err(cause) => faults.push(EnrichmentError::Database {
                    hex: ctx.hex.clone(),
                    cause,
                }),
            }
        }
    }

    fn code_block_lookup(
        &self,
        ctx: &JobContext,
        update: &mut EnrichmentUpdate,
        faults: &mut Vec<EnrichmentError>,
    ) {
        match self.standing_data.find_code_block(&ctx.hex) {
            Ok(Some(block)) => {
                update.country = Some(block.country);
                update.military = Some(block.is_military);
            }
            Ok(None) => {}
            Err(cause) => faults.push(EnrichmentError::StandingData {
                hex: ctx.hex.clone(),
                cause,
            }),
        }
    }

    fn type_lookup(
        &self,
        ctx: &JobContext,
        update: &mut EnrichmentUpdate,
        faults: &mut Vec<EnrichmentError>,
    ) {
        let type_code = update
            .icao_type_code
            .clone()
            .or_else(|| ctx.icao_type_code.clone());
        let type_code = match type_code {
            Some(code) => code,
            None => return,
        };

        match self.standing_data.find_aircraft_type(&type_code) {
            Ok(Some(info)) => {
                update.manufacturer = update.manufacturer.take().or(info.manufacturer);
                update.model = update.model.take().or(info.model);
                update.engine_count = update.engine_count.take().or(info.engine_count);
                update.engine_type = update.engine_type.or(info.engine_type);
                update.species = update.species.or(info.species);
                update.wake_turbulence = update.wake_turbulence.or(info.wake_turbulence);
            }
            Ok(None) => {}
            Err(cause) => faults.push(EnrichmentError::StandingData {
                hex: ctx.hex.clone(),
                cause,
            }),
        }
    }

    /// Route lookup keyed on the callsign. When the callsign carries no
    /// embedded operator code but the operator code is known, a lookup with
    /// the code prefixed is tried as well and preferred when it hits.
    fn route_lookup(
        &self,
        ctx: &JobContext,
        fresh_operator_code: &Option<String>,
        style: AirportCodeStyle,
        update: &mut EnrichmentUpdate,
        faults: &mut Vec<EnrichmentError>,
    ) {
        let callsign = match ctx.callsign.as_deref() {
            Some(cs) if !cs.is_empty() => cs,
            _ => return,
        };

        let mut route = match self.standing_data.find_route(callsign) {
            Ok(route) => route,
            Err(cause) => {
                faults.push(EnrichmentError::StandingData {
                    hex: ctx.hex.clone(),
                    cause,
                });
                None
            }
        };

        let operator_code = fresh_operator_code
            .as_deref()
            .or(ctx.operator_code.as_deref());
        if let Some(code) = operator_code {
            if !callsign_has_operator_code(callsign) {
                let prefixed = format!("{}{}", code, callsign);
                match self.standing_data.find_route(&prefixed) {
                    Ok(Some(found)) => route = Some(found),
                    Ok(None) => {}
                    Err(cause) => faults.push(EnrichmentError::StandingData {
                        hex: ctx.hex.clone(),
                        cause,
                    }),
                }
            }
        }

        if let Some(route) = route {
            update.origin = Some(airport_label(&route.origin, style));
            update.destination = Some(airport_label(&route.destination, style));
            update.via = Some(route.via.iter().map(|a| airport_label(a, style)).collect());
        }
    }

    fn picture_lookup(
        &self,
        ctx: &JobContext,
        registration: Option<&str>,
        update: &mut EnrichmentUpdate,
        faults: &mut Vec<EnrichmentError>,
    ) {
        let pictures = match &self.pictures {
            Some(p) => p,
            None => return,
        };
        match pictures.find_picture(&ctx.hex, registration) {
            Ok(Some(path)) => update.picture_path = Some(path),
            Ok(None) => {}
            Err(cause) => faults.push(EnrichmentError::Picture {
                hex: ctx.hex.clone(),
                cause,
            }),
        }
    }
}

/// A callsign embeds an operator code when it leads with three letters
/// followed by a flight number, e.g. "BAW123" as opposed to "4572".
pub fn callsign_has_operator_code(callsign: &str) -> bool {
    let mut chars = callsign.chars();
    let prefix_alpha = chars.by_ref().take(3).filter(|c| c.is_ascii_alphabetic()).count();
    prefix_alpha == 3 && chars.next().is_some()
}

fn airport_label(airport: &Airport, style: AirportCodeStyle) -> String {
    let code = match style {
        AirportCodeStyle::Iata if !airport.iata.is_empty() => &airport.iata,
        _ => &airport.icao,
    };
    if airport.name.is_empty() {
        code.clone()
    } else {
        format!("{} {}", code, airport.name)
    }
}

/// One unit of work handed to the worker task.
#[derive(Debug)]
pub(crate) struct WorkItem {
    pub job: EnrichmentJob,
    pub style: AirportCodeStyle,
}

/// What the worker posts back to the registry's applier.
#[derive(Debug)]
pub(crate) struct WorkResult {
    pub update: EnrichmentUpdate,
    pub faults: Vec<EnrichmentError>,
}

/// Spawn the enrichment worker: drains jobs, runs them, posts results.
/// Exits quietly when either channel closes; teardown is not a fault.
pub(crate) fn spawn_worker(
    pipeline: Arc<Pipeline>,
    mut jobs: mpsc::UnboundedReceiver<WorkItem>,
    results: mpsc::UnboundedSender<WorkResult>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = jobs.recv().await {
            let (update, faults) = pipeline.run(&item.job, item.style);
            if results.send(WorkResult { update, faults }).is_err() {
                break;
            }
        }
        tracing::debug!("enrichment worker stopped");
    })
}
