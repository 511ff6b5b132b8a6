//! Explanation prompt construction
//!
//! The prompt enumerates the user's key fields, the opportunity's fields,
//! and the user's documents grouped by filename heuristic, then pins the
//! model to an exact three-section response format so the parser has stable
//! anchors.

use fundmatch_common::{Opportunity, ResearcherProfile};

/// Documents grouped for the prompt.
#[derive(Debug, Default)]
pub(crate) struct DocumentGroups {
    pub proposals: Vec<String>,
    pub papers: Vec<String>,
    pub other: Vec<String>,
}

/// Group by filename heuristic: proposal-ish names first, then anything
/// paper-like, then the rest.
pub(crate) fn group_documents<'a>(names: impl Iterator<Item = &'a String>) -> DocumentGroups {
    let mut groups = DocumentGroups::default();

    for name in names {
        let lower = name.to_lowercase();
        if lower.contains("proposal") || lower.contains("sbir") || lower.contains("nsf") {
            groups.proposals.push(name.clone());
        } else if lower.contains("paper") || lower.contains("journal") || lower.ends_with(".pdf") {
            groups.papers.push(name.clone());
        } else {
            groups.other.push(name.clone());
        }
    }

    groups
}

fn list_or_none(items: &[String], cap: usize) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items
            .iter()
            .take(cap)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn prefix(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// The full explanation prompt.
pub fn build_prompt(profile: &ResearcherProfile, opportunity: &Opportunity) -> String {
    let groups = group_documents(profile.extracted_pdfs.keys());
    let interests = profile
        .research_interests
        .iter()
        .take(10)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    let awards = profile
        .awards
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    let keywords = opportunity
        .keywords
        .iter()
        .take(10)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are an expert grant consultant helping researchers match with funding opportunities.\n\n\
         USER PROFILE:\n\
         - Name: {name}\n\
         - Research Interests: {interests}\n\
         - Awards: {awards}\n\
         - Experience Summary: {experience}\n\
         - Key Skills: {skills}\n\n\
         FUNDING OPPORTUNITY:\n\
         - Title: {title}\n\
         - Agency: {agency}\n\
         - Description: {description}\n\
         - Keywords: {keywords}\n\
         - Deadline: {deadline}\n\
         - URL: {url}\n\n\
         USER'S AVAILABLE DOCUMENTS:\n\
         - Proposals: {proposals}\n\
         - Research Papers: {papers}\n\
         - Other Documents: {other}\n\n\
         Please provide:\n\
         1. A brief explanation (2-3 sentences) of why this funding opportunity is a good match for the user's profile\n\
         2. List 2-3 specific documents from the user's portfolio that could be reused, explaining exactly how each document's content relates to this opportunity\n\
         3. Concrete next steps the user should take to apply\n\n\
         Format your response EXACTLY as follows:\n\
         MATCH EXPLANATION:\n\
         [Your 2-3 sentence explanation here]\n\n\
         REUSABLE CONTENT:\n\
         - [Exact document filename from the list above]: [Specific explanation of how this document's research/methods/results can be adapted for this opportunity]\n\
         - [Another exact document filename]: [Specific explanation of relevant sections or content that applies]\n\n\
         NEXT STEPS:\n\
         1. Review solicitation requirements: [Specific action]\n\
         2. Prepare application materials: [Specific action]\n\
         3. Submit proposal: [Specific action with timeline if mentioned]\n",
        name = profile.name,
        interests = interests,
        awards = awards,
        experience = prefix(&profile.experience, 300),
        skills = prefix(&profile.skills, 200),
        title = opportunity.title,
        agency = opportunity.agency,
        description = prefix(&opportunity.description, 500),
        keywords = keywords,
        deadline = opportunity.close_date,
        url = opportunity.url,
        proposals = list_or_none(&groups.proposals, 5),
        papers = list_or_none(&groups.papers, 5),
        other = list_or_none(&groups.other, 5),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundmatch_common::CloseDate;
    use std::collections::BTreeMap;

    #[test]
    fn test_document_grouping() {
        let names = vec![
            "NSF21_SBIR_AutoML.pdf".to_string(),
            "journal_2023_sensors.pdf".to_string(),
            "random_notes.txt".to_string(),
        ];
        let groups = group_documents(names.iter());

        assert_eq!(groups.proposals, vec!["NSF21_SBIR_AutoML.pdf"]);
        assert_eq!(groups.papers, vec!["journal_2023_sensors.pdf"]);
        assert_eq!(groups.other, vec!["random_notes.txt"]);
    }

    #[test]
    fn test_prompt_carries_anchors_and_fields() {
        let mut extracted_pdfs = BTreeMap::new();
        extracted_pdfs.insert("proposal_draft.pdf".to_string(), "text".to_string());

        let profile = ResearcherProfile {
            name: "Jane Doe".into(),
            research_interests: vec!["AutoML".into()],
            awards: vec!["NSF CAREER".into()],
            extracted_pdfs,
            ..Default::default()
        };
        let opportunity = Opportunity {
            title: "On-Device ML".into(),
            agency: "NSF".into(),
            close_date: CloseDate::from_label("2099-03-01"),
            ..Default::default()
        };

        let prompt = build_prompt(&profile, &opportunity);

        assert!(prompt.contains("MATCH EXPLANATION:"));
        assert!(prompt.contains("REUSABLE CONTENT:"));
        assert!(prompt.contains("NEXT STEPS:"));
        assert!(prompt.contains("Name: Jane Doe"));
        assert!(prompt.contains("Deadline: 2099-03-01"));
        assert!(prompt.contains("proposal_draft.pdf"));
        assert!(prompt.contains("- Research Papers: None"));
    }
}
