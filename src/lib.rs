//! In-memory aircraft state registry.
//!
//! Decoded surveillance messages stream in; the registry folds them into
//! one living record per airframe, stamps every field change with a
//! globally monotonic data version (so clients can poll "what changed
//! since V"), estimates a track when the transponder omits or garbles one,
//! and enriches records in the background from reference sources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ message feed │───▶│ AircraftRegistry │───▶│   readers    │
//! │  (decoded)   │    │ (records+clock)  │    │snapshot/find │
//! └──────────────┘    └──────────────────┘    └──────────────┘
//!                        │           ▲
//!                  jobs  │           │ results
//!                        ▼           │
//!                     ┌──────────────────┐
//!                     │ enrichment worker│
//!                     │ (db/sdm/pictures)│
//!                     └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use skystate::{
//!     registry::RegistryBuilder,
//!     types::{FeedEvent, MessageKind, SurveillanceMessage},
//! };
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! # use skystate::enrichment::{AircraftDatabase, DatabaseAircraft, LookupError,
//! #     StandingData, Route, CodeBlock, AircraftTypeInfo};
//! # struct Db;
//! # impl AircraftDatabase for Db {
//! #     fn lookup_by_address(&self, _: &str) -> Result<Option<DatabaseAircraft>, LookupError> { Ok(None) }
//! #     fn count_flights(&self, _: &str) -> Result<i64, LookupError> { Ok(0) }
//! # }
//! # struct Sdm;
//! # impl StandingData for Sdm {
//! #     fn find_route(&self, _: &str) -> Result<Option<Route>, LookupError> { Ok(None) }
//! #     fn find_code_block(&self, _: &str) -> Result<Option<CodeBlock>, LookupError> { Ok(None) }
//! #     fn find_aircraft_type(&self, _: &str) -> Result<Option<AircraftTypeInfo>, LookupError> { Ok(None) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (feed, source) = mpsc::unbounded_channel();
//!     let registry = RegistryBuilder::new()
//!         .database(Arc::new(Db))
//!         .standing_data(Arc::new(Sdm))
//!         .source(source)
//!         .build();
//!     registry.start()?;
//!
//!     let msg = SurveillanceMessage::new("4008F6", MessageKind::AirbornePosition)
//!         .with_position(51.0, 6.0);
//!     feed.send(FeedEvent::Message(msg))?;
//!     drop(feed);
//!     registry.run().await?;
//!
//!     println!("tracking {} aircraft", registry.snapshot().aircraft.len());
//!     registry.stop().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod enrichment;
pub mod geo;
pub mod record;
pub mod registry;
pub mod track;
pub mod trail;
pub mod types;
pub mod versioned;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource, VersionClock};
pub use config::{AirportCodeStyle, Settings, SettingsStore};
pub use enrichment::{
    AircraftDatabase, EnrichmentError, EnrichmentUpdate, Pipeline, PictureSource, StandingData,
};
pub use record::AircraftRecord;
pub use registry::{
    AircraftRegistry, RegistryBuilder, RegistryError, RegistryEvent, RegistrySnapshot,
    RegistryStats, StatsSnapshot,
};
pub use types::{FeedEvent, IcaoAddress, MessageKind, SurveillanceMessage};
pub use versioned::Versioned;
