use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use std::collections::BTreeSet;

/// Regular session close, New York local hour.
pub const SESSION_CLOSE_HOUR: u32 = 16;

const HOLIDAY_TABLE_FIRST_YEAR: i32 = 1990;
const HOLIDAY_TABLE_LAST_YEAR: i32 = 2050;

/// Unscheduled full-day closures that no weekday rule produces.
const SPECIAL_CLOSURES: &[(i32, u32, u32)] = &[
    (2001, 9, 11),
    (2001, 9, 12),
    (2001, 9, 13),
    (2001, 9, 14),
    (2004, 6, 11),
    (2007, 1, 2),
    (2012, 10, 29),
    (2012, 10, 30),
    (2018, 12, 5),
    (2025, 1, 9),
];

/// Source of "now". Injected so the as-of date never comes from process state.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(now)
    }

    /// A moment on `date` (New York) after the regular session has closed.
    pub fn after_close(date: NaiveDate) -> Self {
        // 23:00 UTC is 18:00 or 19:00 in New York, still the same local date.
        Self(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)) + Duration::hours(23))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Friday that closes the Mon-Fri week containing `date`. Weekend dates roll forward.
pub fn week_ending_friday(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    date + Duration::days((4 - weekday).rem_euclid(7))
}

pub fn week_starting_monday(date: NaiveDate) -> NaiveDate {
    week_ending_friday(date) - Duration::days(4)
}

/// New York calendar date for an instant.
pub fn session_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&New_York).date_naive()
}

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::nyse()
    }
}

impl TradingCalendar {
    pub fn new<I: IntoIterator<Item = NaiveDate>>(holidays: I) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// US equity market full-day holidays plus known special closures.
    pub fn nyse() -> Self {
        let mut holidays: BTreeSet<NaiveDate> = (HOLIDAY_TABLE_FIRST_YEAR
            ..=HOLIDAY_TABLE_LAST_YEAR)
            .flat_map(nyse_holidays_for_year)
            .collect();
        holidays.extend(
            SPECIAL_CLOSURES
                .iter()
                .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        );
        Self { holidays }
    }

    pub fn with_extra_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, extra: I) -> Self {
        self.holidays.extend(extra);
        self
    }

    pub fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    pub fn trading_day_on_or_before(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        while !self.is_trading_day(day) {
            day -= Duration::days(1);
        }
        day
    }

    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        self.trading_day_on_or_before(date - Duration::days(1))
    }

    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date + Duration::days(1);
        while !self.is_trading_day(day) {
            day += Duration::days(1);
        }
        day
    }

    /// Trading days in `(from, to]`; zero when `to <= from`.
    pub fn trading_days_between(&self, from: NaiveDate, to: NaiveDate) -> usize {
        let mut count = 0;
        let mut day = from + Duration::days(1);
        while day <= to {
            if self.is_trading_day(day) {
                count += 1;
            }
            day += Duration::days(1);
        }
        count
    }

    /// The `count`-th trading day after `from`.
    pub fn add_trading_days(&self, from: NaiveDate, count: usize) -> NaiveDate {
        let mut day = from;
        for _ in 0..count {
            day = self.next_trading_day(day);
        }
        day
    }

    pub fn is_session_closed(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&New_York);
        !self.is_trading_day(local.date_naive()) || local.hour() >= SESSION_CLOSE_HOUR
    }

    /// Latest trading day whose regular session has fully closed as of `now`.
    pub fn latest_completed_trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = session_date(now);
        if self.is_session_closed(now) {
            self.trading_day_on_or_before(today)
        } else {
            self.previous_trading_day(today)
        }
    }
}

fn nyse_holidays_for_year(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(10);

    // New Year's Day falling on a Saturday is not observed on the prior Friday.
    if let Some(new_year) = NaiveDate::from_ymd_opt(year, 1, 1) {
        match new_year.weekday() {
            Weekday::Sat => {}
            Weekday::Sun => days.push(new_year + Duration::days(1)),
            _ => days.push(new_year),
        }
    }
    if year >= 1998 {
        days.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    }
    days.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    days.extend(easter_sunday(year).map(|easter| easter - Duration::days(2)));
    days.extend(last_weekday(year, 5, Weekday::Mon));
    if year >= 2022 {
        days.extend(NaiveDate::from_ymd_opt(year, 6, 19).map(observed));
    }
    days.extend(NaiveDate::from_ymd_opt(year, 7, 4).map(observed));
    days.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    days.extend(nth_weekday(year, 11, Weekday::Thu, 4));
    days.extend(NaiveDate::from_ymd_opt(year, 12, 25).map(observed));
    days
}

fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut day = first_of_next - Duration::days(1);
    while day.weekday() != weekday {
        day -= Duration::days(1);
    }
    Some(day)
}

/// Gregorian Easter Sunday (anonymous algorithm).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_and_holidays_are_not_trading_days() {
        let calendar = TradingCalendar::nyse();
        assert!(!calendar.is_trading_day(d(2024, 7, 6)));
        assert!(!calendar.is_trading_day(d(2024, 7, 4)));
        assert!(!calendar.is_trading_day(d(2024, 3, 29))); // Good Friday
        assert!(!calendar.is_trading_day(d(2024, 11, 28))); // Thanksgiving
        assert!(!calendar.is_trading_day(d(2021, 12, 24))); // Christmas observed
        assert!(!calendar.is_trading_day(d(2025, 1, 9))); // national day of mourning
        assert!(calendar.is_trading_day(d(2024, 7, 5)));
        assert!(calendar.is_trading_day(d(2021, 12, 31)));
        assert!(calendar.is_trading_day(d(2021, 6, 18)));
        assert!(!calendar.is_trading_day(d(2023, 6, 19)));
    }

    #[test]
    fn easter_dates_match_known_years() {
        assert_eq!(easter_sunday(2024), Some(d(2024, 3, 31)));
        assert_eq!(easter_sunday(2019), Some(d(2019, 4, 21)));
        assert_eq!(easter_sunday(2025), Some(d(2025, 4, 20)));
    }

    #[test]
    fn week_ending_friday_anchors_mon_to_fri_window() {
        assert_eq!(week_ending_friday(d(2024, 1, 8)), d(2024, 1, 12));
        assert_eq!(week_ending_friday(d(2024, 1, 12)), d(2024, 1, 12));
        assert_eq!(week_ending_friday(d(2024, 1, 13)), d(2024, 1, 19));
        assert_eq!(week_starting_monday(d(2024, 1, 10)), d(2024, 1, 8));
    }

    #[test]
    fn trading_days_between_skips_weekends_and_holidays() {
        let calendar = TradingCalendar::nyse();
        // Wed 2024-07-03 -> Wed 2024-07-10: Jul 5, 8, 9, 10 (Jul 4 closed).
        assert_eq!(calendar.trading_days_between(d(2024, 7, 3), d(2024, 7, 10)), 4);
        assert_eq!(calendar.trading_days_between(d(2024, 7, 10), d(2024, 7, 3)), 0);
        assert_eq!(calendar.add_trading_days(d(2024, 7, 3), 1), d(2024, 7, 5));
    }

    #[test]
    fn latest_completed_trading_day_respects_session_close() {
        let calendar = TradingCalendar::nyse();
        // 2024-01-10 15:00 New York (20:00 UTC) is mid-session.
        let during = Utc.with_ymd_and_hms(2024, 1, 10, 20, 0, 0).unwrap();
        assert_eq!(calendar.latest_completed_trading_day(during), d(2024, 1, 9));

        // 2024-01-10 16:30 New York (21:30 UTC) is after the close.
        let after = Utc.with_ymd_and_hms(2024, 1, 10, 21, 30, 0).unwrap();
        assert_eq!(calendar.latest_completed_trading_day(after), d(2024, 1, 10));

        // Saturday resolves to Friday.
        let weekend = FixedClock::after_close(d(2024, 1, 13)).now();
        assert_eq!(calendar.latest_completed_trading_day(weekend), d(2024, 1, 12));

        // Tuesday morning after a Monday holiday walks back to Friday.
        let morning = Utc.with_ymd_and_hms(2024, 1, 16, 14, 0, 0).unwrap();
        assert_eq!(calendar.latest_completed_trading_day(morning), d(2024, 1, 12));
    }
}
