//! Date-range resolution for the guard performance dashboards.
//!
//! A dashboard view is a `(selected date, view type)` pair. The resolver turns
//! it into the day-boundary interval the backend is queried with, and
//! `DateViewState` carries the navigation rules around it.

use chrono::offset::LocalResult;
use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone,
    Utc,
};
use serde::{Deserialize, Serialize};

/// Dashboard period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    Day,
    Week,
    Month,
    Custom,
}

/// A closed interval of local instants, `from` at 00:00:00.000 and `to` at
/// 23:59:59.999 of their respective days.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange<Tz: TimeZone> {
    pub from: DateTime<Tz>,
    pub to: DateTime<Tz>,
}

/// Backend query parameters for a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRange {
    pub from_date: String,
    pub to_date: String,
}

impl<Tz: TimeZone> DateRange<Tz> {
    /// Render both bounds the way the backend expects them: UTC, millisecond
    /// precision, `Z` suffix.
    pub fn to_query(&self) -> QueryRange {
        QueryRange {
            from_date: self
                .from
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            to_date: self
                .to
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Whether the local calendar day `date` lies inside the range.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.from.date_naive() <= date && date <= self.to.date_naive()
    }
}

/// First instant of `date` in `tz`.
///
/// If local midnight does not exist (a DST gap), the first valid instant
/// after it is used.
pub fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            for minutes in 1..=24 * 60 {
                let Some(candidate) = midnight.checked_add_signed(Duration::minutes(minutes)) else {
                    break;
                };
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return dt;
                }
            }
            tz.from_utc_datetime(&midnight)
        }
    }
}

/// Last millisecond of `date` in `tz`.
pub fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    match date.succ_opt() {
        Some(next) => start_of_day(tz, next) - Duration::milliseconds(1),
        None => {
            start_of_day(tz, date)
                .checked_add_signed(Duration::milliseconds(86_399_999))
                .unwrap_or_else(|| tz.from_utc_datetime(&NaiveDateTime::MAX))
        }
    }
}

/// Calendar days spanned by the period of `view` containing `date`.
pub fn period_bounds(date: NaiveDate, view: ViewType) -> (NaiveDate, NaiveDate) {
    match view {
        ViewType::Day | ViewType::Custom => (date, date),
        ViewType::Week => {
            // Clamped to the representable calendar at either end.
            let monday = date
                .checked_sub_signed(Duration::days(i64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(NaiveDate::MIN);
            let sunday = monday
                .checked_add_signed(Duration::days(6))
                .unwrap_or(NaiveDate::MAX);
            (monday, sunday)
        }
        ViewType::Month => {
            let first = date.with_day(1).unwrap_or(date);
            let last = first
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(NaiveDate::MAX);
            (first, last)
        }
    }
}

/// Resolve the backend query interval for `selected` under `view`.
pub fn resolve<Tz: TimeZone>(selected: &DateTime<Tz>, view: ViewType) -> DateRange<Tz> {
    let tz = selected.timezone();
    let (first, last) = period_bounds(selected.date_naive(), view);
    DateRange {
        from: start_of_day(&tz, first),
        to: end_of_day(&tz, last),
    }
}

/// Navigation state of a dashboard date picker.
#[derive(Debug, Clone)]
pub struct DateViewState<Tz: TimeZone> {
    pub view_type: ViewType,
    pub selected_date: DateTime<Tz>,
    /// Set when the user drilled into one day of a week or month view.
    pub is_specific_date_selected: bool,
}

impl<Tz: TimeZone> DateViewState<Tz> {
    /// Day view anchored at `now`.
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            view_type: ViewType::Day,
            selected_date: now,
            is_specific_date_selected: false,
        }
    }

    /// Rebuild a view state from request parameters.
    pub fn from_parts(tz: &Tz, view_type: ViewType, date: NaiveDate, specific: bool) -> Self {
        Self {
            view_type,
            selected_date: start_of_day(tz, date),
            is_specific_date_selected: specific
                && matches!(view_type, ViewType::Week | ViewType::Month),
        }
    }

    /// Change the view type.
    ///
    /// Every view except `Custom` jumps back to `now`; `Custom` keeps the
    /// current date because a picker opens instead.
    pub fn switch_view(&mut self, view_type: ViewType, now: DateTime<Tz>) {
        self.view_type = view_type;
        self.is_specific_date_selected = false;
        if view_type != ViewType::Custom {
            self.selected_date = now;
        }
    }

    /// Drill into a single day of the current period.
    ///
    /// Returns `false` and leaves the state untouched when `date` is outside
    /// the period.
    pub fn select_specific_date(&mut self, date: NaiveDate) -> bool {
        let tz = self.selected_date.timezone();
        match self.view_type {
            ViewType::Week | ViewType::Month => {
                let (first, last) = period_bounds(self.selected_date.date_naive(), self.view_type);
                if date < first || date > last {
                    return false;
                }
                self.selected_date = start_of_day(&tz, date);
                self.is_specific_date_selected = true;
            }
            ViewType::Day | ViewType::Custom => {
                self.selected_date = start_of_day(&tz, date);
            }
        }
        true
    }

    pub fn clear_specific_date(&mut self) {
        self.is_specific_date_selected = false;
    }

    /// Interval to query: the whole period, or the drilled-into day.
    pub fn query_range(&self) -> DateRange<Tz> {
        if self.is_specific_date_selected {
            resolve(&self.selected_date, ViewType::Day)
        } else {
            resolve(&self.selected_date, self.view_type)
        }
    }

    /// Move `step` periods backwards (negative) or forwards.
    pub fn shift(&mut self, step: i32) {
        let tz = self.selected_date.timezone();
        let date = self.selected_date.date_naive();
        let magnitude = step.unsigned_abs();
        let shifted = match self.view_type {
            ViewType::Day | ViewType::Custom => {
                date.checked_add_signed(Duration::days(i64::from(step)))
            }
            ViewType::Week => date.checked_add_signed(Duration::weeks(i64::from(step))),
            ViewType::Month if step >= 0 => date.checked_add_months(Months::new(magnitude)),
            ViewType::Month => date.checked_sub_months(Months::new(magnitude)),
        };
        if let Some(shifted) = shifted {
            self.selected_date = start_of_day(&tz, shifted);
        }
        self.is_specific_date_selected = false;
    }

    /// Header text for the current selection.
    pub fn display_label(&self) -> String {
        let date = self.selected_date.date_naive();
        if self.is_specific_date_selected {
            return date.format("%a, %d %b %Y").to_string();
        }
        match self.view_type {
            ViewType::Day | ViewType::Custom => date.format("%a, %d %b %Y").to_string(),
            ViewType::Week => {
                let (first, last) = period_bounds(date, ViewType::Week);
                format!("{} - {}", first.format("%d %b"), last.format("%d %b %Y"))
            }
            ViewType::Month => date.format("%B %Y").to_string(),
        }
    }

    /// Days offered by the drill-down dropdown of a week or month view.
    pub fn day_options(&self) -> Vec<NaiveDate> {
        match self.view_type {
            ViewType::Week | ViewType::Month => {
                let (first, last) = period_bounds(self.selected_date.date_naive(), self.view_type);
                first.iter_days().take_while(|d| *d <= last).collect()
            }
            ViewType::Day | ViewType::Custom => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Weekday};
    use chrono_tz::America::{New_York, Sao_Paulo};
    use chrono_tz::Asia::Kolkata;

    fn local(tz: &chrono_tz::Tz, y: i32, m: u32, d: u32, h: u32) -> DateTime<chrono_tz::Tz> {
        tz.with_ymd_and_hms(y, m, d, h, 30, 0).single().unwrap()
    }

    fn assert_day_bounds<Tz: TimeZone>(range: &DateRange<Tz>) {
        assert_eq!(range.from.time(), NaiveTime::MIN);
        assert_eq!(
            (range.to.hour(), range.to.minute(), range.to.second()),
            (23, 59, 59)
        );
        assert_eq!(range.to.nanosecond(), 999_000_000);
    }

    #[test]
    fn test_selected_day_lies_within_every_view() {
        let mut date = NaiveDate::from_ymd_opt(2023, 12, 20).unwrap();
        for _ in 0..120 {
            let selected = Kolkata
                .from_local_datetime(&date.and_hms_opt(15, 45, 0).unwrap())
                .single()
                .unwrap();
            for view in [ViewType::Day, ViewType::Week, ViewType::Month] {
                let range = resolve(&selected, view);
                assert!(range.from <= selected && selected <= range.to, "{view:?} {date}");
                assert!(range.contains_date(date));
                assert_day_bounds(&range);
            }
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_week_is_monday_to_sunday() {
        let start = NaiveDate::from_ymd_opt(2024, 10, 14).unwrap();
        for offset in 0..7 {
            let selected = start_of_day(&Kolkata, start + Duration::days(offset))
                + Duration::hours(10);
            let range = resolve(&selected, ViewType::Week);
            assert_eq!(range.from.weekday(), Weekday::Mon);
            assert_eq!(range.from.date_naive(), start);
            assert_eq!(range.to.weekday(), Weekday::Sun);
            assert_eq!(range.to.date_naive(), NaiveDate::from_ymd_opt(2024, 10, 20).unwrap());
        }
    }

    #[test]
    fn test_month_bounds_honour_leap_years() {
        let leap = resolve(&local(&Kolkata, 2024, 2, 15, 9), ViewType::Month);
        assert_eq!(leap.from.date_naive(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(leap.to.date_naive(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let common = resolve(&local(&Kolkata, 2023, 2, 15, 9), ViewType::Month);
        assert_eq!(common.to.date_naive(), NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());

        let december = resolve(&local(&Kolkata, 2024, 12, 31, 23), ViewType::Month);
        assert_eq!(december.from.date_naive(), NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(december.to.date_naive(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn test_query_strings_are_utc_millis() {
        let range = resolve(&local(&Kolkata, 2024, 10, 16, 12), ViewType::Day);
        let query = range.to_query();
        assert_eq!(query.from_date, "2024-10-15T18:30:00.000Z");
        assert_eq!(query.to_date, "2024-10-16T18:29:59.999Z");
    }

    #[test]
    fn test_week_across_spring_forward() {
        // 2024-03-10 is a Sunday; clocks jump at 02:00 local.
        let selected = local(&New_York, 2024, 3, 10, 12);
        let range = resolve(&selected, ViewType::Week);
        assert_eq!(range.from.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_day_bounds(&range);
        assert_eq!(range.to_query().from_date, "2024-03-04T05:00:00.000Z");
        assert_eq!(range.to_query().to_date, "2024-03-11T03:59:59.999Z");
    }

    #[test]
    fn test_midnight_gap_starts_at_first_valid_instant() {
        // Brazil moved clocks from 00:00 to 01:00 on 2018-11-04.
        let day = NaiveDate::from_ymd_opt(2018, 11, 4).unwrap();
        let start = start_of_day(&Sao_Paulo, day);
        assert_eq!(start.date_naive(), day);
        assert_eq!(start.hour(), 1);

        let previous_end = end_of_day(&Sao_Paulo, day.pred_opt().unwrap());
        assert_eq!(start - previous_end, Duration::milliseconds(1));
    }

    #[test]
    fn test_specific_date_collapses_to_single_day() {
        let mut state = DateViewState::new(local(&Kolkata, 2024, 10, 16, 9));
        state.switch_view(ViewType::Month, local(&Kolkata, 2024, 10, 16, 9));
        assert_eq!(state.day_options().len(), 31);

        assert!(state.select_specific_date(NaiveDate::from_ymd_opt(2024, 10, 3).unwrap()));
        let range = state.query_range();
        assert_eq!(range.from.date_naive(), NaiveDate::from_ymd_opt(2024, 10, 3).unwrap());
        assert_eq!(range.to.date_naive(), NaiveDate::from_ymd_opt(2024, 10, 3).unwrap());
        assert_eq!(state.display_label(), "Thu, 03 Oct 2024");

        assert!(!state.select_specific_date(NaiveDate::from_ymd_opt(2024, 11, 3).unwrap()));
        assert!(state.is_specific_date_selected);
    }

    #[test]
    fn test_switch_view_resets_selection_except_custom() {
        let now = local(&Kolkata, 2024, 10, 16, 9);
        let mut state = DateViewState::from_parts(
            &Kolkata,
            ViewType::Week,
            NaiveDate::from_ymd_opt(2024, 9, 4).unwrap(),
            true,
        );
        assert!(state.is_specific_date_selected);

        state.switch_view(ViewType::Custom, now);
        assert!(!state.is_specific_date_selected);
        assert_eq!(state.selected_date.date_naive(), NaiveDate::from_ymd_opt(2024, 9, 4).unwrap());

        state.switch_view(ViewType::Week, now);
        assert_eq!(state.selected_date, now);
        assert_eq!(state.display_label(), "14 Oct - 20 Oct 2024");
    }

    #[test]
    fn test_shift_month_clamps_day() {
        let mut state = DateViewState::from_parts(
            &Kolkata,
            ViewType::Month,
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            false,
        );
        state.shift(1);
        assert_eq!(state.selected_date.date_naive(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(state.display_label(), "February 2024");
        state.shift(-2);
        assert_eq!(state.selected_date.date_naive(), NaiveDate::from_ymd_opt(2023, 12, 29).unwrap());
    }

    #[test]
    fn test_bounds_clamp_at_calendar_ends() {
        for view in [ViewType::Day, ViewType::Week, ViewType::Month] {
            let (first, last) = period_bounds(NaiveDate::MAX, view);
            assert!(first <= NaiveDate::MAX && last == NaiveDate::MAX, "{view:?}");

            let (first, last) = period_bounds(NaiveDate::MIN, view);
            assert!(first == NaiveDate::MIN && last >= NaiveDate::MIN, "{view:?}");
        }

        let last_day = Utc.from_utc_datetime(&NaiveDate::MAX.and_time(NaiveTime::MIN));
        let range = resolve(&last_day, ViewType::Week);
        assert!(range.from <= last_day && last_day <= range.to);
        assert_day_bounds(&range);
    }

    #[test]
    fn test_day_view_has_no_dropdown() {
        let state = DateViewState::new(local(&Kolkata, 2024, 10, 16, 9));
        assert!(state.day_options().is_empty());
        assert_eq!(state.display_label(), "Wed, 16 Oct 2024");
    }
}
