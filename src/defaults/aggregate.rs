//! Builds the per-date defaults view from the raw record streams.

use super::models::*;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Group the four raw streams into typed defaults keyed by duty date.
///
/// Only deviating records produce entries. Times are rendered in `tz`.
pub fn aggregate<Tz>(raw: &DefaultsResponse, tz: &Tz) -> GuardDefaultsByDate
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut by_date = GuardDefaultsByDate::default();

    for duty in raw.late_duties.iter().filter(|d| d.is_late && d.late_minutes > 0) {
        let Some(date) = duty_day(&duty.duty_date) else {
            tracing::warn!("Skipping late duty {} with bad date {:?}", duty.id, duty.duty_date);
            continue;
        };
        let start = duty.actual_start_time.or(duty.scheduled_start_time);
        by_date.push(
            date,
            DefaultEntry::Late(TimedDefault {
                time_wheel: TimeWheel {
                    late: true,
                    ..Default::default()
                },
                display_text: format!("{} - {} MIN. LATE", clock(start, tz), duty.late_minutes),
            }),
        );
    }

    for check in raw
        .uniform_checks
        .iter()
        .filter(|c| !c.passed || !c.failure_reasons.is_empty())
    {
        let Some(date) = duty_day(&check.duty_date) else {
            tracing::warn!("Skipping uniform check {} with bad date {:?}", check.id, check.duty_date);
            continue;
        };
        let status = if check.passed {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Pending
        };
        let items = check
            .failure_reasons
            .iter()
            .enumerate()
            .map(|(index, reason)| UniformFailure {
                id: format!("{}_{}", check.id, index),
                name: human_case(reason),
                status,
                evidence_url: check.photo_url.clone(),
            })
            .collect();
        by_date.push(
            date,
            DefaultEntry::Uniform(UniformDefault {
                check_id: check.id.clone(),
                items,
            }),
        );
    }

    for (date, exits) in geofence_exits_by_date(&raw.geofence_logs, tz) {
        let (Some(first), Some(last)) = (exits.first(), exits.last()) else {
            continue;
        };
        let total: i64 = exits.iter().filter_map(|log| log.duration).sum();
        by_date.push(
            date,
            DefaultEntry::Geofence(GeofenceDefault {
                time_wheel: TimeWheel {
                    geofence_breached: true,
                    ..Default::default()
                },
                display_text: format!(
                    "{} TO {} - {} MIN. OUTSIDE",
                    clock(Some(first.timestamp), tz),
                    clock(Some(last.timestamp), tz),
                    total
                ),
                total_minutes_outside: total,
                exit_count: exits.len(),
            }),
        );
    }

    for check in raw.alertness_checks.iter().filter(|c| !c.passed) {
        let Some(date) = duty_day(&check.duty_date) else {
            tracing::warn!("Skipping alertness check {} with bad date {:?}", check.id, check.duty_date);
            continue;
        };
        by_date.push(
            date,
            DefaultEntry::Alertness(TimedDefault {
                time_wheel: TimeWheel {
                    first_alertness_test_missed: true,
                    second_alertness_test_missed: check.retry_count > 0,
                    ..Default::default()
                },
                display_text: format!(
                    "{} - SCORE: {}/{}",
                    clock(check.checked_at, tz),
                    check.score,
                    check.minimum_score
                ),
            }),
        );
    }

    by_date
}

/// Closed geofence exits grouped by date, each group in timestamp order.
fn geofence_exits_by_date<'a, Tz: TimeZone>(
    logs: &'a [GeofenceLog],
    tz: &Tz,
) -> BTreeMap<NaiveDate, Vec<&'a GeofenceLog>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&GeofenceLog>> = BTreeMap::new();
    for log in logs
        .iter()
        .filter(|l| l.event_type == GeofenceEvent::Exit && l.duration.is_some())
    {
        let date = match &log.duty_date {
            Some(raw) => duty_day(raw),
            None => Some(log.timestamp.with_timezone(tz).date_naive()),
        };
        match date {
            Some(date) => grouped.entry(date).or_default().push(log),
            None => tracing::warn!("Skipping geofence log {} with bad date", log.id),
        }
    }
    for exits in grouped.values_mut() {
        exits.sort_by_key(|l| l.timestamp);
    }
    grouped
}

/// Date part of a backend duty date (`YYYY-MM-DD` or a full timestamp).
pub fn duty_day(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// `hh:mm AM` in `tz`, or a placeholder when the time is unknown.
fn clock<Tz>(time: Option<DateTime<Utc>>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match time {
        Some(t) => t.with_timezone(tz).format("%I:%M %p").to_string(),
        None => "--:--".to_string(),
    }
}

/// `NO_NAME_TAG` -> `No name tag`.
pub fn human_case(reason: &str) -> String {
    let lowered = reason
        .split('_')
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
