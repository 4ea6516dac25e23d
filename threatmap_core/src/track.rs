//! Canonical track model and the threat type taxonomy.

use crate::geodesy::GeoPoint;
use serde::{Deserialize, Serialize};

/// Closed threat taxonomy driving icon selection.
///
/// Variant order is the resolution priority: when a label mentions more
/// than one keyword, the earlier variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatType {
    Shahed,
    Raketa,
    Fpv,
    Kab,
    Obstril,
    Avia,
    Pusk,
    Rszv,
    Rozved,
    Vibuh,
    Vidboi,
    Other,
}

impl ThreatType {
    /// All variants in resolution order.
    pub const ALL: [ThreatType; 12] = [
        ThreatType::Shahed,
        ThreatType::Raketa,
        ThreatType::Fpv,
        ThreatType::Kab,
        ThreatType::Obstril,
        ThreatType::Avia,
        ThreatType::Pusk,
        ThreatType::Rszv,
        ThreatType::Rozved,
        ThreatType::Vibuh,
        ThreatType::Vidboi,
        ThreatType::Other,
    ];

    /// Backend string constant for this type.
    pub fn key(&self) -> &'static str {
        match self {
            ThreatType::Shahed => "shahed",
            ThreatType::Raketa => "raketa",
            ThreatType::Fpv => "fpv",
            ThreatType::Kab => "kab",
            ThreatType::Obstril => "obstril",
            ThreatType::Avia => "avia",
            ThreatType::Pusk => "pusk",
            ThreatType::Rszv => "rszv",
            ThreatType::Rozved => "rozved",
            ThreatType::Vibuh => "vibuh",
            ThreatType::Vidboi => "vidboi",
            ThreatType::Other => "other",
        }
    }

    /// Ukrainian label shown in legends and popups.
    pub fn display_name(&self) -> &'static str {
        match self {
            ThreatType::Shahed => "Шахед",
            ThreatType::Raketa => "Ракета",
            ThreatType::Fpv => "FPV",
            ThreatType::Kab => "КАБ",
            ThreatType::Obstril => "Обстріл",
            ThreatType::Avia => "Авіація",
            ThreatType::Pusk => "Пуск",
            ThreatType::Rszv => "РСЗВ",
            ThreatType::Rozved => "Розвідка",
            ThreatType::Vibuh => "Вибух",
            ThreatType::Vidboi => "Відбій",
            ThreatType::Other => "Інше",
        }
    }

    /// Lowercase substrings that identify this type in free-form labels.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ThreatType::Shahed => &["shahed", "шахед"],
            ThreatType::Raketa => &["raketa", "ракет", "missile"],
            ThreatType::Fpv => &["fpv", "фпв"],
            ThreatType::Kab => &["kab", "каб"],
            ThreatType::Obstril => &["obstril", "обстріл", "artillery", "артилер"],
            ThreatType::Avia => &["avia", "авіа"],
            ThreatType::Pusk => &["pusk", "пуск"],
            ThreatType::Rszv => &["rszv", "рсзв", "mlrs"],
            ThreatType::Rozved => &["rozved", "розвід", "pvo"],
            ThreatType::Vibuh => &["vibuh", "вибух"],
            ThreatType::Vidboi => &["vidboi", "відбій", "alarm_cancel"],
            ThreatType::Other => &[],
        }
    }

    /// Matches a free-form label against the keyword table.
    pub fn from_label(label: &str) -> Option<ThreatType> {
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return None;
        }
        ThreatType::ALL
            .iter()
            .copied()
            .find(|t| t.keywords().iter().any(|k| label.contains(k)))
    }

    /// Drones that approach slowly and get gentler trajectory arcs.
    pub fn is_drone(&self) -> bool {
        matches!(self, ThreatType::Shahed | ThreatType::Fpv)
    }

    /// Types that get an approach arc when the place carries a direction hint.
    pub fn has_trajectory(&self) -> bool {
        matches!(self, ThreatType::Raketa | ThreatType::Shahed | ThreatType::Fpv | ThreatType::Pusk)
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl std::str::FromStr for ThreatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ThreatType::ALL
            .iter()
            .copied()
            .find(|t| t.key() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown threat type: {}", s))
    }
}

/// Resolves the threat type of a feed entry.
///
/// The explicit `threat_type` label wins when it names a known type; the
/// marker icon file name is the fallback; anything else is `Other`.
/// Total: never fails, for any input.
pub fn resolve_type(marker_icon: Option<&str>, threat_type: Option<&str>) -> ThreatType {
    threat_type
        .and_then(ThreatType::from_label)
        .or_else(|| marker_icon.and_then(ThreatType::from_label))
        .unwrap_or(ThreatType::Other)
}

/// A single geolocated threat report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Backend identifier, unique within a snapshot
    pub id: String,

    pub lat: f64,
    pub lon: f64,

    /// Original message text
    pub text: String,

    pub threat_type: ThreatType,

    /// Explicit icon reference from the backend (URL or asset name)
    pub marker_icon: Option<String>,

    /// Place label, may carry "(N)" counts and "←direction" hints
    pub place: Option<String>,

    /// Number of merged occurrences behind this report
    pub count: Option<u32>,

    /// Unix milliseconds; 0 when the backend gave no usable time
    pub timestamp: i64,

    pub channel: Option<String>,

    /// Shelling from across the border (drawn as a sector)
    pub border_shelling: bool,

    /// Free-form course, e.g. "на Київ"
    pub course_direction: Option<String>,
}

impl Track {
    /// Creates a track with only the required fields set.
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, threat_type: ThreatType) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
            text: String::new(),
            threat_type,
            marker_icon: None,
            place: None,
            count: None,
            timestamp: 0,
            channel: None,
            border_shelling: false,
            course_direction: None,
        }
    }

    #[inline]
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Number of occurrences this marker stands for (at least 1).
    pub fn occurrences(&self) -> u32 {
        self.count.unwrap_or(1).max(1)
    }

    /// Direction hint after the `←` arrow in the place label.
    pub fn approach_hint(&self) -> Option<&str> {
        let place = self.place.as_deref()?;
        let (_, hint) = place.rsplit_once('←')?;
        let hint = hint.trim();
        (!hint.is_empty()).then_some(hint)
    }

    /// Guided bombs are often reported under the missile channel.
    pub fn mentions_kab(&self) -> bool {
        self.text.to_lowercase().contains("каб")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_type_explicit_wins() {
        assert_eq!(resolve_type(Some("raketa.png"), Some("shahed")), ThreatType::Shahed);
        assert_eq!(resolve_type(None, Some("Шахед")), ThreatType::Shahed);
        assert_eq!(resolve_type(None, Some("artillery")), ThreatType::Obstril);
        assert_eq!(resolve_type(None, Some("mlrs")), ThreatType::Rszv);
        assert_eq!(resolve_type(None, Some("alarm_cancel")), ThreatType::Vidboi);
    }

    #[test]
    fn test_resolve_type_icon_fallback() {
        assert_eq!(resolve_type(Some("/static/kab.png"), None), ThreatType::Kab);
        assert_eq!(resolve_type(Some("avia.png"), Some("unknown_xyz")), ThreatType::Avia);
        assert_eq!(resolve_type(Some("FPV.PNG"), Some("")), ThreatType::Fpv);
    }

    #[test]
    fn test_resolve_type_is_total() {
        let labels = [
            None,
            Some(""),
            Some("   "),
            Some("unknown_xyz"),
            Some("🚀"),
            Some("shahed"),
            Some("ВИБУХ"),
            Some("\u{0}"),
        ];
        for icon in labels {
            for kind in labels {
                let t = resolve_type(icon, kind);
                assert!(ThreatType::ALL.contains(&t));
                // Deterministic
                assert_eq!(t, resolve_type(icon, kind));
            }
        }
        assert_eq!(resolve_type(None, None), ThreatType::Other);
        assert_eq!(resolve_type(Some("x.png"), Some("unknown_xyz")), ThreatType::Other);
    }

    #[test]
    fn test_threat_type_key_roundtrip() {
        for t in ThreatType::ALL {
            assert_eq!(t.key().parse::<ThreatType>().unwrap(), t);
        }
        assert!("bogus".parse::<ThreatType>().is_err());
    }

    #[test]
    fn test_approach_hint() {
        let mut track = Track::new("1", 50.0, 30.0, ThreatType::Shahed);
        track.place = Some("Полтава (3) ←півдня".into());
        assert_eq!(track.approach_hint(), Some("півдня"));
        track.place = Some("Полтава".into());
        assert_eq!(track.approach_hint(), None);
    }
}
