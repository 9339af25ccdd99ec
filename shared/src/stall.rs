use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stalls keyed by their raw stall number. Ordered so every consumer iterates the
/// same way.
pub type StallMap = BTreeMap<String, Stall>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StallStatus {
    Vacant,
    Available,
    Occupied,
    Maintenance,
    #[default]
    Unknown,
}

impl StallStatus {
    /// Parse a status string from the stall store. Anything unrecognised maps to
    /// `Unknown` rather than failing the whole payload.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vacant" => Self::Vacant,
            "available" => Self::Available,
            "occupied" => Self::Occupied,
            "maintenance" => Self::Maintenance,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vacant => "vacant",
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }

    /// Open for applications: the only statuses a visitor may click on.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Vacant | Self::Available)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Vacant => "Vacant",
            Self::Available => "Available",
            Self::Occupied => "Occupied",
            Self::Maintenance => "Under maintenance",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StallStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StallStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stall {
    pub stall_number: String,
    #[serde(default)]
    pub status: StallStatus,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_desc: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Stall {
    pub fn new(stall_number: impl Into<String>, status: StallStatus) -> Self {
        Self {
            stall_number: stall_number.into(),
            status,
            section_id: None,
            location_desc: None,
            updated_at: None,
        }
    }

    /// Same occupancy-relevant content, ignoring the store's bookkeeping timestamp.
    pub fn same_listing(&self, other: &Stall) -> bool {
        self.stall_number == other.stall_number
            && self.status == other.status
            && self.section_id == other.section_id
            && self.location_desc == other.location_desc
    }
}

/// Cheap change detector for a stall list: CRC32 over stall numbers and statuses
/// in list order.
pub fn stalls_fingerprint(stalls: &[Stall]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for stall in stalls {
        hasher.update(stall.stall_number.as_bytes());
        hasher.update(&[0]);
        hasher.update(stall.status.as_str().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::{Stall, StallStatus, stalls_fingerprint};

    #[test]
    fn status_parse_is_case_and_whitespace_insensitive() {
        assert_eq!(StallStatus::parse(" Vacant "), StallStatus::Vacant);
        assert_eq!(StallStatus::parse("AVAILABLE"), StallStatus::Available);
        assert_eq!(StallStatus::parse("occupied"), StallStatus::Occupied);
        assert_eq!(StallStatus::parse("Maintenance"), StallStatus::Maintenance);
        assert_eq!(StallStatus::parse("reserved"), StallStatus::Unknown);
        assert_eq!(StallStatus::parse(""), StallStatus::Unknown);
    }

    #[test]
    fn only_vacant_and_available_are_open() {
        assert!(StallStatus::Vacant.is_open());
        assert!(StallStatus::Available.is_open());
        assert!(!StallStatus::Occupied.is_open());
        assert!(!StallStatus::Maintenance.is_open());
        assert!(!StallStatus::Unknown.is_open());
    }

    #[test]
    fn stall_deserializes_with_null_and_missing_fields() {
        let payload = r#"[
            {"stall_number": "A-1", "status": "Vacant", "section_id": null},
            {"stall_number": "A-2", "status": null, "location_desc": "Corner by the gate"},
            {"stall_number": "A-3"}
        ]"#;
        let stalls: Vec<Stall> = serde_json::from_str(payload).expect("stall payload should parse");

        assert_eq!(stalls[0].status, StallStatus::Vacant);
        assert_eq!(stalls[0].section_id, None);
        assert_eq!(stalls[1].status, StallStatus::Unknown);
        assert_eq!(
            stalls[1].location_desc.as_deref(),
            Some("Corner by the gate")
        );
        assert_eq!(stalls[2].status, StallStatus::Unknown);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Stall::new("B-7", StallStatus::Maintenance))
            .expect("stall should serialize");
        assert_eq!(json, r#"{"stall_number":"B-7","status":"maintenance"}"#);
    }

    #[test]
    fn fingerprint_tracks_status_changes_and_order() {
        let a = vec![
            Stall::new("A-1", StallStatus::Vacant),
            Stall::new("A-2", StallStatus::Occupied),
        ];
        let mut b = a.clone();
        assert_eq!(stalls_fingerprint(&a), stalls_fingerprint(&b));

        b[1].status = StallStatus::Vacant;
        assert_ne!(stalls_fingerprint(&a), stalls_fingerprint(&b));

        let reversed: Vec<Stall> = a.iter().rev().cloned().collect();
        assert_ne!(stalls_fingerprint(&a), stalls_fingerprint(&reversed));
    }

    #[test]
    fn same_listing_ignores_updated_at() {
        let a = Stall::new("C-4", StallStatus::Occupied);
        let mut b = a.clone();
        b.updated_at = Some(chrono::Utc::now());
        assert!(a.same_listing(&b));
        b.status = StallStatus::Vacant;
        assert!(!a.same_listing(&b));
    }
}
