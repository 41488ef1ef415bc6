//! Dutch business calendar
//!
//! Stagnation deadlines are expressed as "end of the next workday after"
//! some instant, where workdays exclude weekends and Dutch national
//! holidays. Movable feasts are derived from the Gregorian Easter
//! computus, so the calendar needs no data files.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

/// End (23:59:59) of the first workday strictly after `after`
pub fn end_of_next_workday_after(after: DateTime<Utc>) -> DateTime<Utc> {
    let mut date = after.date_naive() + Duration::days(1);
    while !is_workday(date) {
        date += Duration::days(1);
    }

    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).expect("valid wall-clock time");
    Utc.from_utc_datetime(&date.and_time(end_of_day))
}

/// Weekdays that are not Dutch national holidays
pub fn is_workday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !is_nl_holiday(date)
}

/// Dutch national holidays as observed by the banking calendar
pub fn is_nl_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    let easter = easter_sunday(year);

    // fixed-date holidays
    let nieuwjaarsdag = (date.month(), date.day()) == (1, 1);
    let bevrijdingsdag = (date.month(), date.day()) == (5, 5);
    let eerste_kerstdag = (date.month(), date.day()) == (12, 25);
    let tweede_kerstdag = (date.month(), date.day()) == (12, 26);

    // Koningsdag is April 27, observed a day early when it falls on Sunday
    let koningsdag = {
        let april_27 = NaiveDate::from_ymd_opt(year, 4, 27).expect("valid date");
        if april_27.weekday() == Weekday::Sun {
            date == april_27 - Duration::days(1)
        } else {
            date == april_27
        }
    };

    // movable feasts relative to Easter Sunday
    let goede_vrijdag = date == easter - Duration::days(2);
    let eerste_paasdag = date == easter;
    let tweede_paasdag = date == easter + Duration::days(1);
    let hemelvaartsdag = date == easter + Duration::days(39);
    let eerste_pinksterdag = date == easter + Duration::days(49);
    let tweede_pinksterdag = date == easter + Duration::days(50);

    nieuwjaarsdag
        || goede_vrijdag
        || eerste_paasdag
        || tweede_paasdag
        || koningsdag
        || bevrijdingsdag
        || hemelvaartsdag
        || eerste_pinksterdag
        || tweede_pinksterdag
        || eerste_kerstdag
        || tweede_kerstdag
}

/// Anonymous Gregorian computus
fn easter_sunday(year: i32) -> NaiveDate {
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
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).expect("computus yields a valid date")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        let naive = NaiveDateTime::new(
            date(year, month, day),
            NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        );
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn test_easter_sunday_known_years() {
        assert_eq!(easter_sunday(2024), date(2024, 3, 31));
        assert_eq!(easter_sunday(2025), date(2025, 4, 20));
        assert_eq!(easter_sunday(2026), date(2026, 4, 5));
    }

    #[test]
    fn test_fixed_holidays() {
        assert!(is_nl_holiday(date(2024, 1, 1)));
        assert!(is_nl_holiday(date(2024, 5, 5)));
        assert!(is_nl_holiday(date(2024, 12, 25)));
        assert!(is_nl_holiday(date(2024, 12, 26)));
        assert!(!is_nl_holiday(date(2024, 12, 27)));
    }

    #[test]
    fn test_koningsdag_moves_off_sunday() {
        // April 27, 2025 is a Sunday, so Koningsdag is observed on the 26th
        assert!(is_nl_holiday(date(2025, 4, 26)));
        assert!(!is_nl_holiday(date(2025, 4, 27)));
        // 2024: regular Saturday observation
        assert!(is_nl_holiday(date(2024, 4, 27)));
    }

    #[test]
    fn test_movable_feasts_2024() {
        assert!(is_nl_holiday(date(2024, 3, 29))); // Goede Vrijdag
        assert!(is_nl_holiday(date(2024, 4, 1))); // Tweede Paasdag
        assert!(is_nl_holiday(date(2024, 5, 9))); // Hemelvaartsdag
        assert!(is_nl_holiday(date(2024, 5, 20))); // Tweede Pinksterdag
    }

    #[test]
    fn test_next_workday_skips_weekend() {
        // Friday afternoon -> end of Monday
        let deadline = end_of_next_workday_after(at(2024, 7, 12, 15));
        assert_eq!(deadline.date_naive(), date(2024, 7, 15));
        assert_eq!(deadline.time(), NaiveTime::from_hms_opt(23, 59, 59).unwrap());
    }

    #[test]
    fn test_next_workday_skips_holiday() {
        // Dec 24, 2024 is a Tuesday; the 25th and 26th are holidays
        let deadline = end_of_next_workday_after(at(2024, 12, 24, 9));
        assert_eq!(deadline.date_naive(), date(2024, 12, 27));
    }

    #[test]
    fn test_next_workday_is_strictly_after() {
        // mid-Wednesday rolls to Thursday, not the same day
        let deadline = end_of_next_workday_after(at(2024, 7, 10, 9));
        assert_eq!(deadline.date_naive(), date(2024, 7, 11));
    }
}
