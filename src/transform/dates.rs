use crate::clients::types::DateValue;
use crate::config::DateSettings;
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use std::fmt::Write;

/// Formats upstream dates for front-matter and date mentions.
#[derive(Debug, Clone, Default)]
pub struct DateFormatter {
    settings: DateSettings,
}

enum ParsedDate {
    Day(NaiveDate),
    Moment(DateTime<FixedOffset>),
}

fn parse(raw: &str) -> Option<ParsedDate> {
    if let Ok(moment) = DateTime::parse_from_rfc3339(raw) {
        return Some(ParsedDate::Moment(moment));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(ParsedDate::Day)
}

impl DateFormatter {
    pub fn new(settings: DateSettings) -> Self {
        Self { settings }
    }

    /// Midnight datetimes and plain dates collapse to the configured date
    /// format; everything else is returned as given.
    pub fn format(&self, raw: &str) -> String {
        if !self.settings.transform_empty_datetime_to_date {
            return raw.to_string();
        }

        let day = match parse(raw) {
            Some(ParsedDate::Day(day)) => day,
            Some(ParsedDate::Moment(moment)) if moment.time().num_seconds_from_midnight() == 0 => {
                moment.date_naive()
            }
            _ => return raw.to_string(),
        };

        // An invalid user-supplied format surfaces as a fmt error, not a panic.
        let mut formatted = String::new();
        if write!(formatted, "{}", day.format(&self.settings.date_format)).is_err() {
            return raw.to_string();
        }
        if self.settings.link_daily_notes {
            format!(
                "[{}]({}{}.md)",
                formatted, self.settings.daily_note_path_prefix, formatted
            )
        } else {
            formatted
        }
    }

    /// `start/end` for property values.
    pub fn format_range(&self, date: &DateValue) -> String {
        match &date.end {
            Some(end) => format!("{}/{}", self.format(&date.start), self.format(end)),
            None => self.format(&date.start),
        }
    }

    /// `start → end` for inline mentions.
    pub fn format_mention(&self, date: &DateValue) -> String {
        match &date.end {
            Some(end) => format!("{} → {}", self.format(&date.start), self.format(end)),
            None => self.format(&date.start),
        }
    }
}
