//! Solicitation page fetching and field extraction
//!
//! Fetches funding opportunity URLs with a browser-like user agent and pulls
//! structured hints out of the HTML: deadline, eligibility, award and contact
//! snippets plus page keywords. All heuristics are best-effort; a miss is
//! `None`, never a fabricated value.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pdf::truncate_chars;
use crate::ExtractError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";

static DEADLINE_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(submission deadline|application deadline|proposal due|applications due|next deadline|upcoming deadline|closing date|close date|due date|deadline)[:\s]*([^\n]{0,200})",
    )
    .unwrap()
});

static ANY_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+\d{4}|\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}-\d{1,2}-\d{4})\b",
    )
    .unwrap()
});

static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+(\d{4})\b")
        .unwrap()
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// Structured content extracted from a solicitation page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlContent {
    pub url: String,
    pub title: String,
    pub description: String,
    pub main_content: String,
    pub deadline_info: Option<String>,
    pub eligibility_info: Option<String>,
    pub award_info: Option<String>,
    pub contact_info: Option<String>,
    pub keywords: Vec<String>,
}

/// Fetches and extracts content from solicitation URLs.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    client: reqwest::Client,
    timeout_s: u64,
    max_chars: usize,
}

impl UrlFetcher {
    pub fn new(timeout_s: u64, max_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()
            .unwrap_or_default();

        Self {
            client,
            timeout_s,
            max_chars,
        }
    }

    /// Fetch a URL and extract its fields.
    pub async fn fetch(&self, url: &str) -> Result<UrlContent, ExtractError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ExtractError::Unsupported(format!("not an http(s) URL: {url}")));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?
            .error_for_status()
            .map_err(|e| ExtractError::Network(e.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_lowercase();

        let is_html =
            content_type.contains("text/html") || content_type.contains("application/xhtml");
        let is_plain = content_type.contains("text/plain");

        if !is_html && !is_plain {
            return Err(ExtractError::Unsupported(content_type));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        debug!(url, bytes = body.len(), "fetched solicitation page");

        if is_plain {
            return Ok(UrlContent {
                url: url.to_string(),
                main_content: collapse_whitespace(&truncate_chars(&body, self.max_chars)),
                deadline_info: extract_deadline(&body, current_year()),
                ..Default::default()
            });
        }

        Ok(extract_content(url, &body, self.max_chars))
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> ExtractError {
        if e.is_timeout() {
            ExtractError::Timeout(self.timeout_s)
        } else {
            ExtractError::Network(e.to_string())
        }
    }
}

fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// Extract all fields from an HTML body. Split out from `fetch` so the
/// heuristics are testable without a network.
pub fn extract_content(url: &str, html: &str, max_chars: usize) -> UrlContent {
    let doc = Html::parse_document(html);
    let text = visible_text(&doc);

    UrlContent {
        url: url.to_string(),
        title: extract_title(&doc),
        description: extract_description(&doc),
        main_content: truncate_chars(&main_content(&doc, &text), max_chars),
        deadline_info: extract_deadline(&text, current_year()),
        eligibility_info: keyword_context(
            &text,
            &["eligibility", "eligible", "qualification", "who can apply"],
            500,
        ),
        award_info: keyword_context(
            &text,
            &["award amount", "grant amount", "funding amount", "award", "budget"],
            300,
        ),
        contact_info: extract_contact(&text),
        keywords: extract_keywords(&doc),
    }
}

fn extract_title(doc: &Html) -> String {
    let title_sel = Selector::parse("title").unwrap();
    if let Some(el) = doc.select(&title_sel).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }

    let h1_sel = Selector::parse("h1").unwrap();
    doc.select(&h1_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn extract_description(doc: &Html) -> String {
    let meta_sel = Selector::parse(r#"meta[name="description"]"#).unwrap();
    if let Some(el) = doc.select(&meta_sel).next() {
        if let Some(content) = el.value().attr("content") {
            return content.trim().to_string();
        }
    }

    // Summary/abstract/overview sections as a fallback
    let section_sel = Selector::parse(
        r#"[class*="summary"], [class*="abstract"], [class*="overview"], [id*="summary"], [id*="abstract"], [id*="overview"]"#,
    )
    .unwrap();
    doc.select(&section_sel)
        .next()
        .map(|el| truncate_chars(collapse_whitespace(&el.text().collect::<String>()).as_str(), 1000))
        .unwrap_or_default()
}

fn main_content(doc: &Html, full_text: &str) -> String {
    let main_sel =
        Selector::parse(r#"main, article, div[class*="content"], div[class*="main"]"#).unwrap();
    if let Some(el) = doc.select(&main_sel).next() {
        let mut out = String::new();
        collect_visible(*el, &mut out);
        let collapsed = collapse_whitespace(&out);
        if !collapsed.is_empty() {
            return collapsed;
        }
    }
    full_text.to_string()
}

/// Page text with script/style/noscript subtrees removed.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    collect_visible(doc.tree.root(), &mut out);
    collapse_whitespace(&out)
}

fn collect_visible(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            scraper::Node::Text(t) => {
                out.push_str(&t.text);
                out.push(' ');
            }
            scraper::Node::Element(e) => {
                if !matches!(e.name(), "script" | "style" | "noscript") {
                    collect_visible(child, out);
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a deadline date: a date near a deadline keyword first, then any
/// month-name date in the current or next two calendar years.
pub fn extract_deadline(text: &str, current_year: i32) -> Option<String> {
    for caps in DEADLINE_CONTEXT.captures_iter(text) {
        if let Some(m) = ANY_DATE.find(&caps[2]) {
            return Some(m.as_str().to_string());
        }
    }

    for caps in MONTH_NAME_DATE.captures_iter(text) {
        if let Ok(year) = caps[1].parse::<i32>() {
            if (current_year..=current_year + 2).contains(&year) {
                return Some(caps[0].to_string());
            }
        }
    }

    None
}

fn keyword_context(text: &str, keywords: &[&str], cap: usize) -> Option<String> {
    let lower = text.to_lowercase();
    for keyword in keywords {
        if let Some(pos) = lower.find(keyword) {
            // Byte offsets into `lower` are only valid for `text` while the
            // lowercase mapping is length-preserving; fall back to `lower`
            // when it is not.
            let tail = text.get(pos..).unwrap_or(&lower[pos..]);
            let snippet = truncate_chars(tail, cap).trim().to_string();
            if !snippet.is_empty() {
                return Some(snippet);
            }
        }
    }
    None
}

fn extract_contact(text: &str) -> Option<String> {
    if let Some(m) = EMAIL.find(text) {
        return Some(format!("Contact: {}", m.as_str()));
    }
    keyword_context(text, &["program officer", "contact"], 300)
}

fn extract_keywords(doc: &Html) -> Vec<String> {
    let mut keywords = Vec::new();

    let meta_sel = Selector::parse(r#"meta[name="keywords"]"#).unwrap();
    if let Some(el) = doc.select(&meta_sel).next() {
        if let Some(content) = el.value().attr("content") {
            keywords.extend(
                content
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty()),
            );
        }
    }

    let heading_sel = Selector::parse("h1, h2, h3").unwrap();
    for el in doc.select(&heading_sel).take(10) {
        let text = collapse_whitespace(&el.text().collect::<String>());
        if !text.is_empty() && text.len() < 50 {
            keywords.push(text);
        }
    }

    keywords.truncate(20);
    keywords
}
