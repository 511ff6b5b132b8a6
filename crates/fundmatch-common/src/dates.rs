//! Lenient date parsing for feed and web-derived date strings
//!
//! Feeds disagree wildly on date formats (ISO, US slash, month-name
//! variants, dotted European). The parser tries an ordered format list and
//! falls back to a month-name regex scan for dates embedded in prose like
//! "Applications due August 20, 2025".

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Accepted explicit formats, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m-%d-%Y",
    "%d/%m/%Y",
    "%Y.%m.%d",
    "%d.%m.%Y",
];

static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),?\s+(\d{4})",
    )
    .expect("month-name date pattern is valid")
});

/// Parse a date string against the accepted formats.
///
/// Returns `None` for empty input and for anything that matches no format,
/// including sentinels like "Continuous"; those are the caller's business.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    // Date embedded in surrounding text, e.g. "due by August 20, 2025."
    if let Some(m) = MONTH_NAME_DATE.find(trimmed) {
        let normalized = m.as_str().replace(',', "");
        if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%B %d %Y") {
            return Some(date);
        }
    }

    None
}
