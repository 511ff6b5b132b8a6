//! Feed shape detection and row normalization
//!
//! Three recognized CSV shapes: NSF program exports, SBIR topic exports, and
//! a generic fallback for any table with a title-like and description-like
//! column. Rows are tagged internally and collapse to the common
//! [`Opportunity`] record at the boundary.

use std::collections::BTreeMap;

use csv::StringRecord;
use fundmatch_common::{CloseDate, Opportunity};

/// Recognized CSV layouts. Column detection is case-sensitive against the
/// exact export headers; anything unrecognized falls through to `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvShape {
    Nsf,
    Sbir,
    Generic,
}

impl CsvShape {
    pub fn detect(headers: &StringRecord) -> Self {
        let has = |name: &str| headers.iter().any(|h| h == name);

        if has("Topic Title") && has("Topic Number") {
            CsvShape::Sbir
        } else if has("Title") && has("Synopsis") && has("Program ID") {
            CsvShape::Nsf
        } else {
            CsvShape::Generic
        }
    }
}

/// One raw row, tagged by the feed shape it came from.
#[derive(Debug, Clone)]
pub enum RawRow {
    Nsf(BTreeMap<String, String>),
    Sbir(BTreeMap<String, String>),
    Generic(BTreeMap<String, String>),
}

impl RawRow {
    pub fn from_record(shape: CsvShape, headers: &StringRecord, record: &StringRecord) -> Self {
        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.trim().to_string()))
            .collect();

        match shape {
            CsvShape::Nsf => RawRow::Nsf(fields),
            CsvShape::Sbir => RawRow::Sbir(fields),
            CsvShape::Generic => RawRow::Generic(fields),
        }
    }

    /// Collapse to the common opportunity record. The canonical id is NOT
    /// assigned here; that is the pipeline's first step.
    pub fn normalize(self, source_file: &str) -> Opportunity {
        match self {
            RawRow::Nsf(fields) => normalize_nsf(fields, source_file),
            RawRow::Sbir(fields) => normalize_sbir(fields, source_file),
            RawRow::Generic(fields) => normalize_generic(fields, source_file),
        }
    }
}

fn take(fields: &BTreeMap<String, String>, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

fn take_opt(fields: &BTreeMap<String, String>, key: &str) -> Option<String> {
    fields.get(key).filter(|v| !v.is_empty()).cloned()
}

fn normalize_nsf(fields: BTreeMap<String, String>, source_file: &str) -> Opportunity {
    let accepts_anytime = take(&fields, "Proposals accepted anytime") == "True";
    let raw_close = take(&fields, "Next due date (Y-m-d)");

    let close_date = if raw_close.is_empty() && accepts_anytime {
        CloseDate::Continuous
    } else {
        CloseDate::from_label(&raw_close)
    };

    let url = {
        let primary = take(&fields, "URL");
        if primary.is_empty() {
            take(&fields, "Solicitation URL")
        } else {
            primary
        }
    };

    let mut extra = BTreeMap::new();
    if let Some(sol_url) = take_opt(&fields, "Solicitation URL") {
        extra.insert("solicitation_url".to_string(), sol_url);
    }

    Opportunity {
        title: take(&fields, "Title"),
        agency: "NSF".to_string(),
        program: take(&fields, "Award Type"),
        description: take(&fields, "Synopsis"),
        close_date,
        url,
        program_id: take_opt(&fields, "Program ID"),
        posted_date: take_opt(&fields, "Posted date (Y-m-d)"),
        status: take(&fields, "Status"),
        accepts_anytime,
        source_file: source_file.to_string(),
        extra,
        ..Default::default()
    }
}

fn normalize_sbir(fields: BTreeMap<String, String>, source_file: &str) -> Opportunity {
    let url = {
        let primary = take(&fields, "Solicitation Agency URL");
        if primary.is_empty() {
            take(&fields, "SBIRTopicLink")
        } else {
            primary
        }
    };

    let mut extra = BTreeMap::new();
    if let Some(link) = take_opt(&fields, "SBIRTopicLink") {
        extra.insert("sbir_topic_link".to_string(), link);
    }

    let program = {
        let p = take(&fields, "Program");
        if p.is_empty() {
            "SBIR".to_string()
        } else {
            p
        }
    };

    Opportunity {
        title: take(&fields, "Topic Title"),
        agency: take(&fields, "Agency"),
        program,
        description: take(&fields, "Topic Description"),
        close_date: CloseDate::from_label(&take(&fields, "Close Date")),
        url,
        topic_number: take_opt(&fields, "Topic Number"),
        branch: take_opt(&fields, "Branch"),
        phase: take_opt(&fields, "Phase"),
        year: take_opt(&fields, "Solicitation Year"),
        release_date: take_opt(&fields, "Release Date"),
        open_date: take_opt(&fields, "Open Date"),
        status: take(&fields, "Solicitation Status"),
        source_file: source_file.to_string(),
        extra,
        ..Default::default()
    }
}

fn normalize_generic(mut fields: BTreeMap<String, String>, source_file: &str) -> Opportunity {
    fn pick(fields: &mut BTreeMap<String, String>, keys: &[&str]) -> String {
        for key in keys {
            if let Some(value) = fields.remove(*key) {
                if !value.is_empty() {
                    return value;
                }
            }
        }
        String::new()
    }

    let title = pick(&mut fields, &["title", "Title", "Name"]);
    let description = pick(&mut fields, &["description", "Description", "Synopsis"]);
    let agency = pick(&mut fields, &["agency", "Agency", "Organization"]);
    let close_raw = pick(&mut fields, &["close_date", "Close Date", "deadline", "Deadline"]);
    let url = pick(&mut fields, &["url", "URL", "link", "Link", "website"]);
    let program = pick(&mut fields, &["program", "Program"]);
    let topic_number = {
        let t = pick(&mut fields, &["topic_number", "Topic Number"]);
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    };

    // Everything unrecognized survives in the stored document blob
    fields.retain(|_, v| !v.is_empty());

    Opportunity {
        title,
        agency,
        program,
        description,
        close_date: CloseDate::from_label(&close_raw),
        url,
        topic_number,
        source_file: source_file.to_string(),
        extra: fields,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(values: &[&str]) -> StringRecord {
        StringRecord::from(values.to_vec())
    }

    const SBIR_HEADERS: &[&str] = &[
        "Topic Title",
        "Topic Description",
        "Agency",
        "Branch",
        "Program",
        "Phase",
        "Topic Number",
        "Close Date",
        "Release Date",
        "Open Date",
        "Solicitation Agency URL",
        "SBIRTopicLink",
        "Solicitation Status",
        "Solicitation Year",
    ];

    const NSF_HEADERS: &[&str] = &[
        "Title",
        "Synopsis",
        "Program ID",
        "Award Type",
        "Next due date (Y-m-d)",
        "Posted date (Y-m-d)",
        "URL",
        "Solicitation URL",
        "Status",
        "Proposals accepted anytime",
    ];

    #[test]
    fn test_shape_detection() {
        assert_eq!(CsvShape::detect(&record(SBIR_HEADERS)), CsvShape::Sbir);
        assert_eq!(CsvShape::detect(&record(NSF_HEADERS)), CsvShape::Nsf);
        assert_eq!(
            CsvShape::detect(&record(&["name", "summary", "link"])),
            CsvShape::Generic
        );
    }

    #[test]
    fn test_shape_detection_is_case_sensitive() {
        assert_eq!(
            CsvShape::detect(&record(&["topic title", "topic number"])),
            CsvShape::Generic
        );
    }

    #[test]
    fn test_sbir_normalization() {
        let headers = record(SBIR_HEADERS);
        let row = record(&[
            "FAST Sensing",
            "On-orbit autonomy.",
            "NASA",
            "ARC",
            "STTR",
            "I",
            "T1.01",
            "2099-01-15",
            "2098-11-01",
            "2098-12-01",
            "https://sbir.nasa.gov/t101",
            "https://sbir.gov/topics/t101",
            "Open",
            "2099",
        ]);

        let opp = RawRow::from_record(CsvShape::Sbir, &headers, &row).normalize("topics.csv");

        assert_eq!(opp.title, "FAST Sensing");
        assert_eq!(opp.agency, "NASA");
        assert_eq!(opp.program, "STTR");
        assert_eq!(opp.topic_number.as_deref(), Some("T1.01"));
        assert_eq!(opp.close_date, CloseDate::from_label("2099-01-15"));
        assert_eq!(opp.url, "https://sbir.nasa.gov/t101");
        assert_eq!(opp.extra["sbir_topic_link"], "https://sbir.gov/topics/t101");
        assert_eq!(opp.source_file, "topics.csv");
    }

    #[test]
    fn test_nsf_normalization() {
        let headers = record(NSF_HEADERS);
        let row = record(&[
            "Cyber-Physical Systems",
            "Research on CPS.",
            "PD-19-7918",
            "Standard Grant",
            "2099-03-01",
            "2098-09-01",
            "https://nsf.gov/cps",
            "https://nsf.gov/pubs/cps",
            "Active",
            "False",
        ]);

        let opp = RawRow::from_record(CsvShape::Nsf, &headers, &row).normalize("nsf.csv");

        assert_eq!(opp.agency, "NSF");
        assert_eq!(opp.program_id.as_deref(), Some("PD-19-7918"));
        assert_eq!(opp.close_date, CloseDate::from_label("2099-03-01"));
        assert!(!opp.accepts_anytime);
    }

    #[test]
    fn test_nsf_anytime_maps_to_continuous() {
        let headers = record(NSF_HEADERS);
        let row = record(&[
            "Rolling Program",
            "Always open.",
            "PD-20-1234",
            "Standard Grant",
            "",
            "",
            "https://nsf.gov/rolling",
            "",
            "Active",
            "True",
        ]);

        let opp = RawRow::from_record(CsvShape::Nsf, &headers, &row).normalize("nsf.csv");
        assert_eq!(opp.close_date, CloseDate::Continuous);
    }

    #[test]
    fn test_generic_preserves_unknown_columns() {
        let headers = record(&["Title", "Description", "Agency", "Funding Ceiling"]);
        let row = record(&["Open Call", "Anything goes.", "DOE", "$2M"]);

        let opp = RawRow::from_record(CsvShape::Generic, &headers, &row).normalize("misc.csv");

        assert_eq!(opp.title, "Open Call");
        assert_eq!(opp.agency, "DOE");
        assert_eq!(opp.extra["Funding Ceiling"], "$2M");
        assert_eq!(opp.close_date, CloseDate::NotSpecified);
    }
}
