//! Core data types for aircraft surveillance tracking.

use std::fmt;

/// ICAO 24-bit airframe address, the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IcaoAddress(u32);

impl IcaoAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr & 0x00FF_FFFF)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Parse a hex surveillance address. Returns `None` for empty or
    /// malformed input; callers drop such messages silently.
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.is_empty() || hex.len() > 6 {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(Self::new)
    }
}

impl fmt::Display for IcaoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

/// Transmission type of a decoded surveillance message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    /// ES identification and category (carries callsign).
    Identification,
    SurfacePosition,
    AirbornePosition,
    AirborneVelocity,
    SurveillanceAltitude,
    SurveillanceId,
    AirToAir,
    AllCallReply,
    /// Anything that is not a position/identity transmission; ignored.
    #[default]
    Other,
}

impl MessageKind {
    pub const fn is_transmission(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Engine type from the aircraft type catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineType {
    #[default]
    None,
    Piston,
    Turboprop,
    Jet,
    Electric,
}

/// Wake turbulence category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeTurbulence {
    #[default]
    None,
    Light,
    Medium,
    Heavy,
}

/// Broad airframe species from the type catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Species {
    #[default]
    None,
    Landplane,
    Seaplane,
    Amphibian,
    Helicopter,
    Gyrocopter,
    Tiltwing,
    GroundVehicle,
    Tower,
}

/// A decoded surveillance message as delivered by the (external) feed
/// decoder. Every telemetry field is optional; absent fields never
/// overwrite registry state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveillanceMessage {
    /// Hex surveillance address, e.g. "4008F6".
    pub hex: String,
    pub kind: MessageKind,
    pub callsign: Option<String>,
    /// Barometric altitude in feet.
    pub altitude: Option<i32>,
    /// Ground speed in knots.
    pub ground_speed: Option<f32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Track over ground in degrees. Zero is treated as "not transmitted".
    pub track: Option<f32>,
    /// Vertical rate in feet per minute.
    pub vertical_rate: Option<i32>,
    /// Squawk code as decimal digits, e.g. 7700.
    pub squawk: Option<u16>,
    pub on_ground: Option<bool>,
    /// Emergency flag as reported by the feed. Ignored by the registry,
    /// which derives emergency state from the squawk alone.
    pub emergency: Option<bool>,
}

impl SurveillanceMessage {
    pub fn new(hex: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            hex: hex.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_callsign(mut self, callsign: impl Into<String>) -> Self {
        self.callsign = Some(callsign.into());
        self
    }

    pub fn with_track(mut self, track: f32) -> Self {
        self.track = Some(track);
        self
    }

    pub fn with_squawk(mut self, squawk: u16) -> Self {
        self.squawk = Some(squawk);
        self
    }

    pub fn with_on_ground(mut self, on_ground: bool) -> Self {
        self.on_ground = Some(on_ground);
        self
    }
}

/// Events delivered by the message source.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Message(SurveillanceMessage),
    /// The feed switched to a different source; all accumulated state is
    /// stale and the registry clears its table.
    SourceChanged,
    /// Position history for one airframe is unreliable; only its trail is
    /// cleared.
    PositionReset(String),
}
