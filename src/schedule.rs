use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::Serialize;

/// Every generated batch covers one 12-week teaching term.
pub const SECTIONS_PER_TERM: usize = 12;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
}

impl ScheduleError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    Spring,
    Summer,
    Fall,
}

impl Term {
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        match raw.trim() {
            "Spring" => Ok(Term::Spring),
            "Summer" => Ok(Term::Summer),
            "Fall" => Ok(Term::Fall),
            other => Err(ScheduleError::new(
                "bad_params",
                format!("unknown term: {}", other),
            )),
        }
    }

    /// Calendar month the term starts in.
    pub fn start_month(self) -> u32 {
        match self {
            Term::Spring => 1,
            Term::Summer => 5,
            Term::Fall => 9,
        }
    }
}

pub fn parse_weekday(raw: &str) -> Result<Weekday, ScheduleError> {
    match raw.trim() {
        "Monday" => Ok(Weekday::Mon),
        "Tuesday" => Ok(Weekday::Tue),
        "Wednesday" => Ok(Weekday::Wed),
        "Thursday" => Ok(Weekday::Thu),
        "Friday" => Ok(Weekday::Fri),
        "Saturday" => Ok(Weekday::Sat),
        "Sunday" => Ok(Weekday::Sun),
        other => Err(ScheduleError::new(
            "bad_params",
            format!("unknown weekday: {}", other),
        )),
    }
}

pub fn parse_clock(raw: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ScheduleError::new("bad_params", format!("time must be HH:MM, got {}", raw)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDate {
    pub index: usize,
    pub date: NaiveDate,
}

/// Derives the class dates for one unit's teaching term: the first date on or
/// after (year, term start month, 1) that falls on `weekday`, then one date
/// every 7 days, 12 in total. Pure; all dates are naive calendar dates.
pub fn generate_sections(
    term: Term,
    year: i32,
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
) -> Result<Vec<SectionDate>, ScheduleError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(ScheduleError::new(
            "bad_params",
            format!("year must be between {} and {}", MIN_YEAR, MAX_YEAR),
        ));
    }
    if start >= end {
        return Err(ScheduleError::new(
            "bad_params",
            "start time must be earlier than end time",
        ));
    }

    // Day 1 of the start month always exists for the validated year range.
    let mut date = NaiveDate::from_ymd_opt(year, term.start_month(), 1)
        .ok_or_else(|| ScheduleError::new("bad_params", "invalid term start date"))?;
    while date.weekday() != weekday {
        date += Duration::days(1);
    }

    let mut sections = Vec::with_capacity(SECTIONS_PER_TERM);
    for i in 0..SECTIONS_PER_TERM {
        sections.push(SectionDate {
            index: i + 1,
            date,
        });
        date += Duration::days(7);
    }
    Ok(sections)
}
