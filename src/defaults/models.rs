//! Raw defaults payload and the per-date view model built from it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response of the defaults summary endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsResponse {
    #[serde(default)]
    pub late_duties: Vec<LateDuty>,
    #[serde(default)]
    pub uniform_checks: Vec<UniformCheck>,
    #[serde(default)]
    pub geofence_logs: Vec<GeofenceLog>,
    #[serde(default)]
    pub alertness_checks: Vec<AlertnessCheck>,
    /// Backend-computed totals, passed through untouched.
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateDuty {
    #[serde(default)]
    pub id: String,
    pub duty_date: String,
    #[serde(default)]
    pub is_late: bool,
    #[serde(default)]
    pub late_minutes: i64,
    #[serde(default)]
    pub scheduled_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformCheck {
    pub id: String,
    pub duty_date: String,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeofenceEvent {
    Entry,
    Exit,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceLog {
    #[serde(default)]
    pub id: String,
    /// Falls back to the local date of `timestamp` when absent.
    #[serde(default)]
    pub duty_date: Option<String>,
    pub event_type: GeofenceEvent,
    pub timestamp: DateTime<Utc>,
    /// Minutes spent outside the fence, known once the guard re-enters.
    #[serde(default)]
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertnessCheck {
    #[serde(default)]
    pub id: String,
    pub duty_date: String,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub minimum_score: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

/// Flag summary rendered as the "time wheel" on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWheel {
    pub late: bool,
    pub first_alertness_test_missed: bool,
    pub second_alertness_test_missed: bool,
    pub geofence_breached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedDefault {
    pub time_wheel: TimeWheel,
    pub display_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceDefault {
    pub time_wheel: TimeWheel,
    pub display_text: String,
    pub total_minutes_outside: i64,
    pub exit_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Approved,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformFailure {
    /// `<checkId>_<index>`, stable across rebuilds of the same payload.
    pub id: String,
    pub name: String,
    pub status: VerificationStatus,
    pub evidence_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformDefault {
    pub check_id: String,
    pub items: Vec<UniformFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatrolRecord {
    pub route_name: String,
    pub checkpoint_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatrolDefault {
    pub records: Vec<PatrolRecord>,
}

/// One behavioural exception on a duty date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultEntry {
    Late(TimedDefault),
    Uniform(UniformDefault),
    Alertness(TimedDefault),
    Geofence(GeofenceDefault),
    Patrol(PatrolDefault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultKind {
    Late,
    Uniform,
    Alertness,
    Geofence,
    Patrol,
}

impl DefaultEntry {
    pub fn kind(&self) -> DefaultKind {
        match self {
            DefaultEntry::Late(_) => DefaultKind::Late,
            DefaultEntry::Uniform(_) => DefaultKind::Uniform,
            DefaultEntry::Alertness(_) => DefaultKind::Alertness,
            DefaultEntry::Geofence(_) => DefaultKind::Geofence,
            DefaultEntry::Patrol(_) => DefaultKind::Patrol,
        }
    }
}

/// Defaults grouped by duty date. Dates without defaults are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuardDefaultsByDate(BTreeMap<NaiveDate, Vec<DefaultEntry>>);

impl GuardDefaultsByDate {
    pub(crate) fn push(&mut self, date: NaiveDate, entry: DefaultEntry) {
        self.0.entry(date).or_default().push(entry);
    }

    /// Entries for `date`; empty when the date is absent.
    pub fn entries_on(&self, date: NaiveDate) -> &[DefaultEntry] {
        self.0.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &Vec<DefaultEntry>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Per-type totals across all dates.
    pub fn counts(&self) -> DefaultsCounts {
        let mut counts = DefaultsCounts {
            days_affected: self.0.values().filter(|v| !v.is_empty()).count(),
            ..Default::default()
        };
        for entry in self.0.values().flatten() {
            match entry.kind() {
                DefaultKind::Late => counts.late += 1,
                DefaultKind::Uniform => counts.uniform += 1,
                DefaultKind::Alertness => counts.alertness += 1,
                DefaultKind::Geofence => counts.geofence += 1,
                DefaultKind::Patrol => counts.patrol += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsCounts {
    pub late: usize,
    pub uniform: usize,
    pub alertness: usize,
    pub geofence: usize,
    pub patrol: usize,
    pub days_affected: usize,
}
