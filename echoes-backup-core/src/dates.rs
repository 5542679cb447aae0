//! Day-name handling: the filename pattern, retention arithmetic and the
//! locale date formatter used by the daily report.

use std::sync::{Arc, OnceLock};

use chrono::{Days, Duration, Local, NaiveDate};
use regex::Regex;

/// Source of "today" for retention and scheduling decisions.
pub type Today = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// The local calendar date.
pub fn local_today() -> Today {
    Arc::new(|| Local::now().date_naive())
}

/// A fixed date, for tests and one-off reruns.
pub fn fixed_today(date: NaiveDate) -> Today {
    Arc::new(move || date)
}

// The separators are captured twice and compared by hand: `regex` has no back-references.
fn day_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^((?:19|20)\d\d)([-/. ])(0[1-9]|1[012])([-/. ])(0[1-9]|[12][0-9]|3[01])$",
        )
        .expect("day pattern is a valid regex")
    })
}

/// True if `name` looks like a per-day work item (`YYYY-MM-DD`, or the same with
/// `/`, `.` or a space as separator, used consistently).
pub fn is_day_name(name: &str) -> bool {
    match day_pattern().captures(name) {
        Some(caps) => caps[2] == caps[4],
        None => false,
    }
}

/// Parses a day name into a calendar date. `None` for names that do not match
/// the pattern or name an impossible date (e.g. `2020-02-31`).
pub fn parse_day(name: &str) -> Option<NaiveDate> {
    let caps = day_pattern().captures(name)?;
    if caps[2] != caps[4] {
        return None;
    }
    let year = caps[1].parse().ok()?;
    let month = caps[3].parse().ok()?;
    let day = caps[5].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Strips a trailing `.zip` from a directory entry name.
pub fn strip_archive_extension(entry: &str) -> &str {
    entry.strip_suffix(".zip").unwrap_or(entry)
}

/// Retention check: `today - offset > date(filename)`, strictly. The boundary
/// day itself is kept. No offset, an unparseable name, or an offset reaching
/// past the calendar's start never removes.
pub fn should_remove(filename: &str, removal_offset_days: Option<u32>, today: NaiveDate) -> bool {
    let Some(offset) = removal_offset_days else {
        return false;
    };
    let Some(file_date) = parse_day(filename) else {
        return false;
    };
    match today.checked_sub_days(Days::new(offset.into())) {
        Some(removal_date) => removal_date > file_date,
        None => false,
    }
}

/// Name of the day before `today`, in canonical `YYYY-MM-DD` form.
pub fn previous_day(today: NaiveDate) -> String {
    (today - Duration::days(1)).format("%Y-%m-%d").to_string()
}

fn month_number(token: &str) -> Option<&'static str> {
    let month = match token {
        "ene" => "01",
        "feb" => "02",
        "mar" => "03",
        "abr" => "04",
        "may" => "05",
        "jun" => "06",
        "jul" => "07",
        "ago" => "08",
        "sept" => "09",
        "oct" => "10",
        "nov" => "11",
        "dic" => "12",
        _ => return None,
    };
    Some(month)
}

/// Formats a report date such as `mié. sept. 9 2020` into `2020-09-09`.
///
/// The input is split on `". "` and must yield exactly three parts: weekday,
/// abbreviated month, and `"<day> <year>"`. Anything else yields `None`.
pub fn format_report_date(input: &str) -> Option<String> {
    let parts: Vec<&str> = input.split(". ").collect();
    let [_weekday, month, rest] = parts.as_slice() else {
        return None;
    };
    let month = month_number(month.trim())?;
    let mut rest = rest.split_whitespace();
    let day: u32 = rest.next()?.parse().ok()?;
    let year = rest.next()?;
    Some(format!("{year}-{month}-{day:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_names_follow_the_pattern() {
        assert!(is_day_name("2020-09-10"));
        assert!(is_day_name("1999/12/31"));
        assert!(is_day_name("2020.01.01"));
        assert!(!is_day_name("2020-09/10"));
        assert!(!is_day_name("2020-13-01"));
        assert!(!is_day_name("2020-09-10.zip"));
        assert!(!is_day_name("daily.csv"));
        assert!(!is_day_name("1899-01-01"));
    }

    #[test]
    fn parse_day_rejects_impossible_dates() {
        assert_eq!(parse_day("2020-09-10"), Some(date(2020, 9, 10)));
        assert_eq!(parse_day("2020/02/29"), Some(date(2020, 2, 29)));
        assert_eq!(parse_day("2020-02-31"), None);
        assert_eq!(parse_day("not-a-day"), None);
    }

    #[test]
    fn strips_only_a_trailing_zip() {
        assert_eq!(strip_archive_extension("2020-09-10.zip"), "2020-09-10");
        assert_eq!(strip_archive_extension("2020-09-10"), "2020-09-10");
        assert_eq!(strip_archive_extension("a.zip.bak"), "a.zip.bak");
    }

    #[test]
    fn retention_boundary_day_is_kept() {
        let today = date(2020, 10, 1);
        // today - 21 days = 2020-09-10
        assert!(!should_remove("2020-09-10", Some(21), today));
        assert!(should_remove("2020-09-09", Some(21), today));
        assert!(!should_remove("2020-09-11", Some(21), today));
    }

    #[test]
    fn retention_without_offset_never_removes() {
        assert!(!should_remove("2000-01-01", None, date(2020, 10, 1)));
        assert!(!should_remove("garbage", Some(1), date(2020, 10, 1)));
    }

    #[test]
    fn retention_with_an_oversized_offset_never_removes() {
        assert!(!should_remove("2020-09-01", Some(u32::MAX), date(2020, 10, 1)));
    }

    #[test]
    fn previous_day_crosses_month_boundaries() {
        assert_eq!(previous_day(date(2020, 3, 1)), "2020-02-29");
        assert_eq!(previous_day(date(2021, 1, 1)), "2020-12-31");
    }

    #[test]
    fn formats_spanish_report_dates() {
        assert_eq!(format_report_date("mié. sept. 9 2020").as_deref(), Some("2020-09-09"));
        assert_eq!(format_report_date("mar. sept. 8 2020").as_deref(), Some("2020-09-08"));
        assert_eq!(format_report_date("lun. dic. 21 2020").as_deref(), Some("2020-12-21"));
        assert_eq!(format_report_date("Date:"), None);
        assert_eq!(format_report_date(""), None);
        assert_eq!(format_report_date("mié. foo. 9 2020"), None);
    }
}
