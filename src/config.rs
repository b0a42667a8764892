//! Live-reloadable registry settings.
//!
//! Settings are owned by a [`SettingsStore`] backed by a `tokio::sync::watch`
//! channel: the registry reads the current value at each use (so changes
//! apply to the next operation without a restart) and interested tasks can
//! subscribe to change notifications.

use tokio::sync::watch;

/// How airports are labelled in route descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AirportCodeStyle {
    #[default]
    Icao,
    Iata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Records whose last update is older than this are hidden from
    /// snapshots (but stay reachable via `find`).
    pub display_timeout_secs: u32,
    /// Duration bound of the short position trail.
    pub short_trail_secs: u32,
    pub airport_codes: AirportCodeStyle,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_timeout_secs: 30,
            short_trail_secs: 30,
            airport_codes: AirportCodeStyle::Icao,
        }
    }
}

/// Shared, live-reloadable settings with change notification.
pub struct SettingsStore {
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// Mutate the settings in place and notify subscribers.
    pub fn update(&self, mutate: impl FnOnce(&mut Settings)) {
        self.tx.send_modify(mutate);
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
