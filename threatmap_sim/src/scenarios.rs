//! Replay scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// A handful of slow drones, steady polling
    QuietNight,

    /// Hundreds of drones; the map must switch to clusters
    MassAttack,

    /// A quarter of every payload is garbage
    MalformedFeed,

    /// Backend fails for a while, then recovers
    Outage,

    /// Bursts of pushes while a fetch is in flight
    PushBurst,

    /// Rapid zoom changes during steady polling
    ZoomStorm,

    /// Guided bombs, border shelling and approach hints near the front
    KabFront,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::QuietNight,
            ScenarioId::MassAttack,
            ScenarioId::MalformedFeed,
            ScenarioId::Outage,
            ScenarioId::PushBurst,
            ScenarioId::ZoomStorm,
            ScenarioId::KabFront,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::QuietNight => "quiet_night",
            ScenarioId::MassAttack => "mass_attack",
            ScenarioId::MalformedFeed => "malformed_feed",
            ScenarioId::Outage => "outage",
            ScenarioId::PushBurst => "push_burst",
            ScenarioId::ZoomStorm => "zoom_storm",
            ScenarioId::KabFront => "kab_front",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::QuietNight => "10 drones, periodic refresh only, every frame direct",
            ScenarioId::MassAttack => "800 drones over the 650 marker threshold, clustered frames",
            ScenarioId::MalformedFeed => "25% malformed entries, drop counters match injection",
            ScenarioId::Outage => "6 failed fetches, previous snapshot kept, error cleared on recovery",
            ScenarioId::PushBurst => "20 pushes per burst, coalesced into single follow-up fetches",
            ScenarioId::ZoomStorm => "zoom changes every 50ms, one re-render per settled zoom",
            ScenarioId::KabFront => "KAB cones, border shelling sector and approach arcs",
        }
    }

    /// Scenarios that need the track count above the cluster threshold.
    pub fn is_heavy(&self) -> bool {
        matches!(self, ScenarioId::MassAttack)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quiet_night" | "quietnight" => Ok(ScenarioId::QuietNight),
            "mass_attack" | "massattack" => Ok(ScenarioId::MassAttack),
            "malformed_feed" | "malformed" => Ok(ScenarioId::MalformedFeed),
            "outage" => Ok(ScenarioId::Outage),
            "push_burst" | "pushburst" => Ok(ScenarioId::PushBurst),
            "zoom_storm" | "zoomstorm" => Ok(ScenarioId::ZoomStorm),
            "kab_front" | "kab" => Ok(ScenarioId::KabFront),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
