//! Core domain types for FundMatch

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::parse_date;

/// Close date of a solicitation.
///
/// Feeds either carry a real date, declare the solicitation open-ended, or
/// say nothing. `Continuous` never expires; `NotSpecified` is accepted but
/// flagged by the ingestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CloseDate {
    Date(NaiveDate),
    Continuous,
    NotSpecified,
}

impl CloseDate {
    pub const CONTINUOUS_LABEL: &'static str = "Continuous";
    pub const NOT_SPECIFIED_LABEL: &'static str = "Not specified";

    /// Interpret a raw label: sentinels first, then the lenient date parser.
    /// Anything unparsable collapses to `NotSpecified`.
    pub fn from_label(label: &str) -> Self {
        let trimmed = label.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("not specified") {
            return CloseDate::NotSpecified;
        }
        if trimmed.eq_ignore_ascii_case("continuous") || trimmed.eq_ignore_ascii_case("anytime") {
            return CloseDate::Continuous;
        }
        match parse_date(trimmed) {
            Some(date) => CloseDate::Date(date),
            None => CloseDate::NotSpecified,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            CloseDate::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// An opportunity expires only when it carries an absolute date strictly
    /// in the past. `Continuous` and `NotSpecified` never expire.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        matches!(self, CloseDate::Date(d) if *d < today)
    }
}

impl fmt::Display for CloseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseDate::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CloseDate::Continuous => f.write_str(Self::CONTINUOUS_LABEL),
            CloseDate::NotSpecified => f.write_str(Self::NOT_SPECIFIED_LABEL),
        }
    }
}

impl From<String> for CloseDate {
    fn from(value: String) -> Self {
        CloseDate::from_label(&value)
    }
}

impl From<CloseDate> for String {
    fn from(value: CloseDate) -> Self {
        value.to_string()
    }
}

impl Default for CloseDate {
    fn default() -> Self {
        CloseDate::NotSpecified
    }
}

/// One funding solicitation, normalized from any feed shape.
///
/// The `id` is a canonical content hash assigned by the ingestor; all other
/// fields mirror what the source row and URL enrichment provided. Unknown
/// columns from generic feeds survive in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Opportunity {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub agency: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub close_date: CloseDate,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub accepts_anytime: bool,
    #[serde(default)]
    pub source_file: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Opportunity {
    /// Text handed to the embedding model: title, description, agency and
    /// the merged keyword set.
    pub fn embeddable_text(&self) -> String {
        let mut text = format!("{} {} {}", self.title, self.description, self.agency);
        if !self.keywords.is_empty() {
            text.push(' ');
            text.push_str(
                &self
                    .keywords
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        text
    }
}

/// A link attached to a researcher profile (personal page, lab site, ORCID).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileLink {
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// One researcher, synthesized from structured JSON plus extracted documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearcherProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub research_interests: Vec<String>,
    #[serde(default)]
    pub education: Vec<serde_json::Value>,
    #[serde(default)]
    pub awards: Vec<String>,
    #[serde(default)]
    pub experience: String,
    #[serde(default)]
    pub publications: String,
    #[serde(default)]
    pub skills: String,
    #[serde(default)]
    pub urls: Vec<ProfileLink>,
    /// Document filename -> full extracted text.
    #[serde(default)]
    pub extracted_pdfs: BTreeMap<String, String>,
    /// Deterministic synthesis of all profile inputs, used for embedding.
    #[serde(default)]
    pub combined_text: String,
}

/// One ranked match as persisted in the match store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingMatch {
    pub user_id: String,
    pub opportunity_id: String,
    pub title: String,
    pub agency: String,
    pub deadline: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub confidence_score: f64,
    pub similarity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_date_labels() {
        assert_eq!(CloseDate::from_label("Continuous"), CloseDate::Continuous);
        assert_eq!(CloseDate::from_label("ANYTIME"), CloseDate::Continuous);
        assert_eq!(CloseDate::from_label(""), CloseDate::NotSpecified);
        assert_eq!(CloseDate::from_label("Not specified"), CloseDate::NotSpecified);
        assert_eq!(
            CloseDate::from_label("2099-01-15"),
            CloseDate::Date(NaiveDate::from_ymd_opt(2099, 1, 15).unwrap())
        );
    }

    #[test]
    fn test_close_date_expiry() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(CloseDate::from_label("2025-05-31").is_expired(today));
        assert!(!CloseDate::from_label("2025-06-01").is_expired(today));
        assert!(!CloseDate::Continuous.is_expired(today));
        assert!(!CloseDate::NotSpecified.is_expired(today));
    }

    #[test]
    fn test_close_date_serde_round_trip() {
        let dated = CloseDate::from_label("2030-03-01");
        let json = serde_json::to_string(&dated).unwrap();
        assert_eq!(json, "\"2030-03-01\"");
        assert_eq!(serde_json::from_str::<CloseDate>(&json).unwrap(), dated);

        let json = serde_json::to_string(&CloseDate::Continuous).unwrap();
        assert_eq!(json, "\"Continuous\"");
        assert_eq!(
            serde_json::from_str::<CloseDate>(&json).unwrap(),
            CloseDate::Continuous
        );
    }

    #[test]
    fn test_embeddable_text_includes_keywords() {
        let mut opp = Opportunity {
            title: "FAST Sensing".into(),
            description: "On-orbit sensing platforms".into(),
            agency: "NASA".into(),
            ..Default::default()
        };
        opp.keywords.insert("sensors".into());
        opp.keywords.insert("autonomy".into());

        let text = opp.embeddable_text();
        assert!(text.contains("FAST Sensing"));
        assert!(text.contains("NASA"));
        // BTreeSet keeps keyword order stable
        assert!(text.contains("autonomy, sensors"));
    }

    #[test]
    fn test_opportunity_document_round_trip() {
        let opp = Opportunity {
            id: "abc".into(),
            title: "Future Program".into(),
            agency: "NSF".into(),
            close_date: CloseDate::from_label("2099-12-31"),
            topic_number: Some("T1.01".into()),
            ..Default::default()
        };
        let doc = serde_json::to_string(&opp).unwrap();
        let parsed: Opportunity = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed.id, "abc");
        assert_eq!(parsed.close_date, opp.close_date);
        assert_eq!(parsed.topic_number.as_deref(), Some("T1.01"));
    }
}
