//! Canonical opportunity identity
//!
//! The id is a hash over a canonical tuple of the row's stable identity
//! fields. For SBIR-style feeds, title + agency + topic number is practically
//! unique, so volatile date fields stay out of the tuple and a re-observed
//! sighting without dates still deduplicates. Rows without a topic number
//! fall back to program id / branch, then to date fields, then to the final
//! URL path segment.

use fundmatch_common::{sha256_hex, Opportunity};

/// Deterministic id for one logical solicitation.
pub fn canonical_id(opp: &Opportunity) -> String {
    let mut parts: Vec<String> = vec![
        opp.title.trim().to_lowercase(),
        opp.agency.trim().to_string(),
    ];

    let push_present = |parts: &mut Vec<String>, value: &Option<String>| {
        if let Some(v) = value {
            let v = v.trim();
            if !v.is_empty() {
                parts.push(v.to_string());
            }
        }
    };

    let topic = opp
        .topic_number
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();

    if !topic.is_empty() {
        parts.push(topic.to_string());
        push_present(&mut parts, &opp.phase);
        push_present(&mut parts, &opp.year);
    } else {
        parts.push(opp.program_id.clone().unwrap_or_default().trim().to_string());
        parts.push(opp.branch.clone().unwrap_or_default().trim().to_string());
        push_present(&mut parts, &opp.phase);
        push_present(&mut parts, &opp.year);

        let mut has_date = false;
        if let Some(date) = opp.close_date.date() {
            parts.push(date.format("%Y-%m-%d").to_string());
            has_date = true;
        }
        if let Some(release) = opp.release_date.as_deref().map(str::trim) {
            if !release.is_empty() {
                parts.push(release.to_string());
                has_date = true;
            }
        }

        // Last resort for rows with no distinguishing ids or dates
        if !has_date {
            if let Some(segment) = last_url_segment(&opp.url) {
                parts.push(segment.to_string());
            }
        }
    }

    sha256_hex(&parts.join("|"))
}

fn last_url_segment(url: &str) -> Option<&str> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    trimmed.rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundmatch_common::CloseDate;

    fn sbir_row(close_date: &str) -> Opportunity {
        Opportunity {
            title: "FAST Sensing".into(),
            agency: "NASA".into(),
            topic_number: Some("T1.01".into()),
            close_date: CloseDate::from_label(close_date),
            ..Default::default()
        }
    }

    #[test]
    fn test_id_stable_across_dated_and_undated_sightings() {
        // The same SBIR topic re-observed without its close date must map to
        // the same id so it deduplicates
        assert_eq!(canonical_id(&sbir_row("2099-01-15")), canonical_id(&sbir_row("")));
    }

    #[test]
    fn test_title_case_insensitive() {
        let mut upper = sbir_row("");
        upper.title = "FAST SENSING".into();
        assert_eq!(canonical_id(&upper), canonical_id(&sbir_row("")));
    }

    #[test]
    fn test_topic_number_differentiates() {
        let mut other = sbir_row("");
        other.topic_number = Some("T2.02".into());
        assert_ne!(canonical_id(&other), canonical_id(&sbir_row("")));
    }

    #[test]
    fn test_nsf_uses_program_id() {
        let a = Opportunity {
            title: "CPS".into(),
            agency: "NSF".into(),
            program_id: Some("PD-19-7918".into()),
            ..Default::default()
        };
        let mut b = a.clone();
        b.program_id = Some("PD-20-0001".into());

        assert_ne!(canonical_id(&a), canonical_id(&b));
    }

    #[test]
    fn test_dates_differentiate_when_no_topic_or_program() {
        let base = Opportunity {
            title: "Open Call".into(),
            agency: "DOE".into(),
            ..Default::default()
        };
        let mut dated = base.clone();
        dated.close_date = CloseDate::from_label("2099-06-01");
        let mut other_date = base.clone();
        other_date.close_date = CloseDate::from_label("2100-06-01");

        assert_ne!(canonical_id(&dated), canonical_id(&other_date));
    }

    #[test]
    fn test_url_segment_as_last_resort() {
        let a = Opportunity {
            title: "Open Call".into(),
            agency: "DOE".into(),
            url: "https://energy.gov/foa/0003201".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.url = "https://energy.gov/foa/0003202".into();

        assert_ne!(canonical_id(&a), canonical_id(&b));
    }
}
