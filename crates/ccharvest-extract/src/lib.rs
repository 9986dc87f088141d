//! Structured fact extraction and page confidence scoring for one decoded
//! HTML page.

use ccharvest_core::{AtsProvider, Evidence, ExtractionMethod, Fact, FactValue};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;

pub const CRATE_NAME: &str = "ccharvest-extract";

const MAX_TEXT_EMAILS: usize = 10;
const MAX_SERVICES: usize = 25;

// Per-source extraction confidences.
const CONF_JSONLD_NAME: f64 = 0.95;
const CONF_JSONLD_URL: f64 = 0.9;
const CONF_JSONLD_OTHER: f64 = 0.85;
const CONF_OG_SITE_NAME: f64 = 0.7;
const CONF_META_DESCRIPTION: f64 = 0.6;
const CONF_EMAIL_TEXT: f64 = 0.5;
const CONF_SERVICES_DOM: f64 = 0.55;
const CONF_TITLE: f64 = 0.35;

/// Where the page came from; turned into per-fact `Evidence`.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub source_url: String,
    pub crawl_id: String,
    pub capture_timestamp: String,
    pub observed_at: DateTime<Utc>,
}

impl PageContext {
    pub fn evidence(&self, method: ExtractionMethod) -> Evidence {
        Evidence {
            source_url: self.source_url.clone(),
            crawl_id: self.crawl_id.clone(),
            capture_timestamp: self.capture_timestamp.clone(),
            observed_at: self.observed_at,
            method,
        }
    }
}

/// Minimal structural view of a schema.org Organization node. Anything that
/// does not fit this shape is treated as absent.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct OrgNode {
    #[serde(rename = "@type", deserialize_with = "one_or_many", default)]
    node_type: Vec<String>,
    name: Option<String>,
    url: Option<String>,
    #[serde(rename = "sameAs", deserialize_with = "one_or_many", default)]
    same_as: Vec<String>,
    telephone: Option<String>,
    email: Option<String>,
    address: Option<OrgAddress>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OrgAddress {
    Text(String),
    Postal {
        #[serde(rename = "streetAddress")]
        street_address: Option<String>,
        #[serde(rename = "addressLocality")]
        locality: Option<String>,
        #[serde(rename = "addressRegion")]
        region: Option<String>,
        #[serde(rename = "addressCountry", deserialize_with = "country_label", default)]
        country: Option<String>,
    },
    // Shapes we do not understand count as absent, not as parse failures.
    Other(serde_json::Value),
}

impl OrgAddress {
    fn display(&self) -> Option<String> {
        match self {
            OrgAddress::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            OrgAddress::Postal {
                street_address,
                locality,
                region,
                country,
            } => {
                let parts: Vec<&str> = [street_address, locality, region, country]
                    .into_iter()
                    .filter_map(|p| p.as_deref())
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            }
            OrgAddress::Other(_) => None,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Other(serde_json::Value),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Other(_) => Vec::new(),
    })
}

fn country_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Country {
        Text(String),
        Node { name: Option<String> },
        Other(serde_json::Value),
    }
    Ok(match Option::<Country>::deserialize(deserializer)? {
        Some(Country::Text(name)) => Some(name),
        Some(Country::Node { name }) => name,
        _ => None,
    })
}

const ORG_TYPES: [&str; 6] = [
    "organization",
    "corporation",
    "localbusiness",
    "professionalservice",
    "ngo",
    "educationalorganization",
];

fn is_org_type(node_type: &[String]) -> bool {
    node_type.iter().any(|t| {
        let t = t.to_ascii_lowercase();
        ORG_TYPES.contains(&t.as_str()) || t.ends_with("organization")
    })
}

/// Walk one JSON-LD document, collecting organization-like nodes from the
/// top level, arrays, and `@graph` containers.
fn collect_org_nodes(value: &JsonValue, out: &mut Vec<OrgNode>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                collect_org_nodes(item, out);
            }
        }
        JsonValue::Object(map) => {
            if let Ok(node) = serde_json::from_value::<OrgNode>(value.clone()) {
                if is_org_type(&node.node_type) {
                    out.push(node);
                }
            }
            if let Some(graph) = map.get("@graph") {
                collect_org_nodes(graph, out);
            }
        }
        _ => {}
    }
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email regex")
});

static SERVICE_VOCAB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(service|solution|consult|develop|design|engineer|software|marketing|brand|product|platform|analytics|cloud|security|data|strateg|automation|integrat|staffing|support)",
    )
    .expect("service vocab regex")
});

static GENERIC_NAV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(home|about|about us|contact|contact us|blog|news|careers?|jobs|login|log in|sign in|sign up|privacy|privacy policy|terms|cookies?|menu|search|learn more|read more|get started|faq)$",
    )
    .expect("generic nav regex")
});

fn select_all(document: &Html, selector: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|node| {
            let text: String = node.text().collect::<String>();
            let trimmed = text.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        })
        .collect()
}

fn select_first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|node| node.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn select_attrs(document: &Html, selector: &str, attr: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|node| node.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn body_text(document: &Html) -> String {
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

fn jsonld_org_nodes(document: &Html) -> Vec<OrgNode> {
    let mut nodes = Vec::new();
    let Ok(sel) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return nodes;
    };
    for script in document.select(&sel) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<JsonValue>(&raw) else {
            continue;
        };
        collect_org_nodes(&value, &mut nodes);
    }
    nodes
}

/// Pull structured facts out of one HTML page. Pure given the parsed text.
pub fn extract_facts(html: &str, ctx: &PageContext) -> Vec<Fact> {
    let document = Html::parse_document(html);
    let mut facts = Vec::new();

    for node in jsonld_org_nodes(&document) {
        if let Some(name) = node.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            facts.push(Fact::new(
                FactValue::Name(name.to_string()),
                CONF_JSONLD_NAME,
                ctx.evidence(ExtractionMethod::StructuredData),
            ));
        }
        if let Some(url) = node.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            facts.push(Fact::new(
                FactValue::Website(url.to_string()),
                CONF_JSONLD_URL,
                ctx.evidence(ExtractionMethod::StructuredData),
            ));
        }
        if !node.same_as.is_empty() {
            facts.push(Fact::new(
                FactValue::ProfileLinks(node.same_as.clone()),
                CONF_JSONLD_OTHER,
                ctx.evidence(ExtractionMethod::StructuredData),
            ));
        }
        if let Some(telephone) = node.telephone.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            facts.push(Fact::new(
                FactValue::Phones(vec![telephone.to_string()]),
                CONF_JSONLD_OTHER,
                ctx.evidence(ExtractionMethod::StructuredData),
            ));
        }
        if let Some(email) = node.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            facts.push(Fact::new(
                FactValue::Emails(vec![email.to_string()]),
                CONF_JSONLD_OTHER,
                ctx.evidence(ExtractionMethod::StructuredData),
            ));
        }
        if let Some(address) = node.address.as_ref().and_then(OrgAddress::display) {
            facts.push(Fact::new(
                FactValue::Locations(vec![address]),
                CONF_JSONLD_OTHER,
                ctx.evidence(ExtractionMethod::StructuredData),
            ));
        }
    }

    if let Some(site_name) = select_first_attr(&document, r#"meta[property="og:site_name"]"#, "content")
    {
        facts.push(Fact::new(
            FactValue::Name(site_name),
            CONF_OG_SITE_NAME,
            ctx.evidence(ExtractionMethod::MetaTag),
        ));
    }

    let description = select_first_attr(&document, r#"meta[name="description"]"#, "content")
        .or_else(|| select_first_attr(&document, r#"meta[property="description"]"#, "content"));
    if let Some(description) = description {
        facts.push(Fact::new(
            FactValue::Description(description),
            CONF_META_DESCRIPTION,
            ctx.evidence(ExtractionMethod::MetaTag),
        ));
    }

    if let Some(title) = select_all(&document, "title").into_iter().next() {
        facts.push(Fact::new(
            FactValue::Title(title),
            CONF_TITLE,
            ctx.evidence(ExtractionMethod::MetaTag),
        ));
    }

    let emails = text_emails(&body_text(&document));
    if !emails.is_empty() {
        facts.push(Fact::new(
            FactValue::Emails(emails),
            CONF_EMAIL_TEXT,
            ctx.evidence(ExtractionMethod::TextHeuristic),
        ));
    }

    let services = service_candidates(&document);
    if !services.is_empty() {
        facts.push(Fact::new(
            FactValue::Services(services),
            CONF_SERVICES_DOM,
            ctx.evidence(ExtractionMethod::DomHeuristic),
        ));
    }

    facts
}

fn text_emails(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in EMAIL_RE.find_iter(text) {
        let email = m.as_str().to_lowercase();
        if !seen.contains(&email) {
            seen.push(email);
        }
        if seen.len() >= MAX_TEXT_EMAILS {
            break;
        }
    }
    seen
}

/// Heading and link text that reads like a service offering, minus the
/// generic navigation chrome.
fn service_candidates(document: &Html) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for text in select_all(document, "h1, h2, h3, h4, h5, h6, a") {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.len() < 3 || text.len() > 80 {
            continue;
        }
        if GENERIC_NAV_RE.is_match(&text) || !SERVICE_VOCAB_RE.is_match(&text) {
            continue;
        }
        if !out.iter().any(|existing| existing.eq_ignore_ascii_case(&text)) {
            out.push(text);
        }
        if out.len() >= MAX_SERVICES {
            break;
        }
    }
    out
}

/// Every confidence-scoring constant, tunable without touching the scorer.
/// Defaults are the shipped behavioral contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub structured_identity: f64,
    pub services_nav: f64,
    pub portfolio_nav: f64,
    pub about_nav: f64,
    pub contact_nav: f64,
    pub intent_terms_strong: f64,
    pub intent_terms_weak: f64,
    pub intent_strong_min: usize,
    pub services_breadth_high: f64,
    pub services_breadth_mid: f64,
    pub services_high_min: usize,
    pub services_mid_min: usize,
    pub locations_present: f64,
    pub phones_present: f64,
    pub spam_penalty: f64,
    pub high_confidence_threshold: f64,
    pub low_confidence_threshold: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            structured_identity: 0.18,
            services_nav: 0.18,
            portfolio_nav: 0.18,
            about_nav: 0.08,
            contact_nav: 0.08,
            intent_terms_strong: 0.18,
            intent_terms_weak: 0.10,
            intent_strong_min: 3,
            services_breadth_high: 0.12,
            services_breadth_mid: 0.07,
            services_high_min: 6,
            services_mid_min: 3,
            locations_present: 0.05,
            phones_present: 0.03,
            spam_penalty: 0.6,
            high_confidence_threshold: 0.75,
            low_confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageScore {
    /// In `[0, 1]`.
    pub score: f64,
    pub reasons: Vec<String>,
}

static SERVICES_NAV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(services|capabilities|solutions|what[\s-]we[\s-]do)").expect("services nav regex")
});
static PORTFOLIO_NAV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bwork\b|case[\s-]stud|clients|portfolio|projects)").expect("portfolio nav regex")
});
static ABOUT_NAV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(about|company|team)").expect("about nav regex"));
static CONTACT_NAV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)contact").expect("contact nav regex"));

const INTENT_TERMS: [&str; 12] = [
    "our services",
    "our clients",
    "our work",
    "our team",
    "case studies",
    "expertise",
    "consulting",
    "solutions",
    "portfolio",
    "partners",
    "projects",
    "industries",
];

const SPAM_TERMS: [&str; 9] = [
    "casino",
    "poker",
    "slots",
    "betting",
    "viagra",
    "cialis",
    "porn",
    "xxx",
    "escort",
];

/// How much this page looks like a real company site of the target kind.
/// Additive weighted signals, each with a human-readable reason; always
/// clamped to `[0, 1]`.
pub fn score_page(html: &str, facts: &[Fact], weights: &ScoreWeights) -> PageScore {
    let document = Html::parse_document(html);
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let has_structured_identity = facts.iter().any(|fact| {
        matches!(fact.value, FactValue::Name(_))
            && fact.evidence.method == ExtractionMethod::StructuredData
    });
    if has_structured_identity {
        score += weights.structured_identity;
        reasons.push("structured organization identity present".to_string());
    }

    let anchor_texts = select_all(&document, "a");
    let anchor_hrefs = select_attrs(&document, "a", "href");

    if anchor_texts.iter().any(|t| SERVICES_NAV_RE.is_match(t))
        || anchor_hrefs.iter().any(|h| SERVICES_NAV_RE.is_match(h))
    {
        score += weights.services_nav;
        reasons.push("services navigation present".to_string());
    }
    if anchor_texts.iter().any(|t| PORTFOLIO_NAV_RE.is_match(t))
        || anchor_hrefs.iter().any(|h| PORTFOLIO_NAV_RE.is_match(h))
    {
        score += weights.portfolio_nav;
        reasons.push("work/clients navigation present".to_string());
    }
    if anchor_texts.iter().any(|t| ABOUT_NAV_RE.is_match(t))
        || anchor_hrefs.iter().any(|h| ABOUT_NAV_RE.is_match(h))
    {
        score += weights.about_nav;
        reasons.push("about/company navigation present".to_string());
    }
    if anchor_texts.iter().any(|t| CONTACT_NAV_RE.is_match(t))
        || anchor_hrefs
            .iter()
            .any(|h| h.starts_with("mailto:") || h.starts_with("tel:") || CONTACT_NAV_RE.is_match(h))
    {
        score += weights.contact_nav;
        reasons.push("contact affordances present".to_string());
    }

    let text = body_text(&document).to_lowercase();
    let intent_hits = INTENT_TERMS.iter().filter(|term| text.contains(*term)).count();
    if intent_hits >= weights.intent_strong_min {
        score += weights.intent_terms_strong;
        reasons.push(format!("{intent_hits} domain intent terms in body text"));
    } else if intent_hits >= 1 {
        score += weights.intent_terms_weak;
        reasons.push(format!("{intent_hits} domain intent terms in body text"));
    }

    let service_count = facts
        .iter()
        .filter_map(|fact| match &fact.value {
            FactValue::Services(items) => Some(items.len()),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    if service_count >= weights.services_high_min {
        score += weights.services_breadth_high;
        reasons.push(format!("{service_count} extracted services"));
    } else if service_count >= weights.services_mid_min {
        score += weights.services_breadth_mid;
        reasons.push(format!("{service_count} extracted services"));
    }

    let has_locations = facts
        .iter()
        .any(|fact| matches!(&fact.value, FactValue::Locations(items) if !items.is_empty()));
    if has_locations {
        score += weights.locations_present;
        reasons.push("location facts present".to_string());
    }
    let has_phones = facts
        .iter()
        .any(|fact| matches!(&fact.value, FactValue::Phones(items) if !items.is_empty()));
    if has_phones {
        score += weights.phones_present;
        reasons.push("phone facts present".to_string());
    }

    if SPAM_TERMS.iter().any(|term| text.contains(term)) {
        score -= weights.spam_penalty;
        reasons.push("spam vocabulary present".to_string());
    }

    let score = score.clamp(0.0, 1.0);
    if score >= weights.high_confidence_threshold {
        reasons.push("high confidence overall".to_string());
    } else if score < weights.low_confidence_threshold {
        reasons.push("low confidence overall".to_string());
    }

    PageScore { score, reasons }
}

const SOCIAL_DOMAINS: [&str; 11] = [
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "youtube.com",
    "github.com",
    "medium.com",
    "tiktok.com",
    "pinterest.com",
    "crunchbase.com",
];

const ATS_ROOT_DOMAINS: [&str; 5] = [
    "ashbyhq.com",
    "greenhouse.io",
    "lever.co",
    "workable.com",
    "myworkdayjobs.com",
];

fn host_matches(host: &str, root: &str) -> bool {
    host == root || host.ends_with(&format!(".{root}"))
}

fn is_ats_host(host: &str) -> bool {
    ATS_ROOT_DOMAINS.iter().any(|root| host_matches(host, root))
        || AtsProvider::ALL.iter().any(|p| host == p.host())
}

fn is_social_host(host: &str) -> bool {
    SOCIAL_DOMAINS.iter().any(|root| host_matches(host, root))
}

fn bare_host(raw_url: &str) -> Option<String> {
    let parsed = Url::parse(raw_url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    (host.contains('.')).then_some(host)
}

fn domain_preference(host: &str) -> i32 {
    let mut score = 0;
    if !is_social_host(host) {
        score += 5;
    }
    if host.split('.').count() <= 3 {
        score += 2;
    }
    if !host.contains("careers") {
        score += 1;
    }
    score
}

/// Given a decoded job-board page, pick the employer's own domain.
///
/// Candidates come from the canonical link, JSON-LD organization url/sameAs
/// fields, and absolute anchor hrefs as a last resort. Anything pointing
/// back at an ATS host is discarded.
pub fn resolve_company_domain(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let mut candidates: Vec<String> = Vec::new();

    let mut push = |host: Option<String>, candidates: &mut Vec<String>| {
        if let Some(host) = host {
            if !is_ats_host(&host) && !candidates.contains(&host) {
                candidates.push(host);
            }
        }
    };

    if let Some(canonical) = select_first_attr(&document, r#"link[rel="canonical"]"#, "href") {
        push(bare_host(&canonical), &mut candidates);
    }
    for node in jsonld_org_nodes(&document) {
        if let Some(url) = &node.url {
            push(bare_host(url), &mut candidates);
        }
        for same_as in &node.same_as {
            push(bare_host(same_as), &mut candidates);
        }
    }
    for href in select_attrs(&document, r#"a[href^="http"]"#, "href") {
        push(bare_host(&href), &mut candidates);
    }

    candidates.sort_by(|a, b| {
        domain_preference(b)
            .cmp(&domain_preference(a))
            .then_with(|| a.len().cmp(&b.len()))
            .then_with(|| a.cmp(b))
    });
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> PageContext {
        PageContext {
            source_url: "https://example.com/".to_string(),
            crawl_id: "CC-MAIN-2026-04".to_string(),
            capture_timestamp: "20260115083000".to_string(),
            observed_at: Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).single().unwrap(),
        }
    }

    const ORG_PAGE: &str = r#"<!doctype html><html><head>
        <title>Example Co | Digital Product Studio</title>
        <meta property="og:site_name" content="Example Co">
        <meta name="description" content="We build software products.">
        <script type="application/ld+json">
        {"@type":"Organization","name":"Example Co","url":"https://example.com",
         "sameAs":["https://www.linkedin.com/company/example"],
         "telephone":"+1 (555) 010-2030",
         "address":{"addressLocality":"Berlin","addressCountry":"DE"}}
        </script>
        </head><body>
        <nav><a href="/services">Services</a><a href="/work">Our Work</a>
        <a href="/about">About</a><a href="mailto:hello@example.com">Contact</a></nav>
        <h2>Product Design Services</h2>
        <h2>Cloud Engineering</h2>
        <p>Contact hello@example.com for consulting and case studies.</p>
        </body></html>"#;

    #[test]
    fn jsonld_org_facts_carry_structured_method() {
        let facts = extract_facts(ORG_PAGE, &ctx());
        let name = facts
            .iter()
            .find(|f| matches!(&f.value, FactValue::Name(n) if n == "Example Co" && f.confidence >= 0.9))
            .expect("structured name fact");
        assert_eq!(name.evidence.method, ExtractionMethod::StructuredData);

        assert!(facts
            .iter()
            .any(|f| matches!(&f.value, FactValue::Website(u) if u == "https://example.com")));
        assert!(facts
            .iter()
            .any(|f| matches!(&f.value, FactValue::Locations(l) if l == &vec!["Berlin, DE".to_string()])));
        assert!(facts
            .iter()
            .any(|f| matches!(&f.value, FactValue::Phones(p) if p[0].contains("555"))));
    }

    #[test]
    fn meta_and_title_fallbacks_have_lower_confidence() {
        let facts = extract_facts(ORG_PAGE, &ctx());
        let og = facts
            .iter()
            .find(|f| matches!(&f.value, FactValue::Name(_)) && f.evidence.method == ExtractionMethod::MetaTag)
            .expect("og site name");
        assert_eq!(og.confidence, 0.7);
        let title = facts
            .iter()
            .find(|f| matches!(&f.value, FactValue::Title(_)))
            .expect("title fact");
        assert_eq!(title.confidence, 0.35);
    }

    #[test]
    fn text_emails_are_deduped_and_capped() {
        let mut blob = String::from("<html><body>");
        for i in 0..30 {
            blob.push_str(&format!("person{i}@example.com "));
        }
        blob.push_str("PERSON0@example.com</body></html>");
        let facts = extract_facts(&blob, &ctx());
        let emails = facts
            .iter()
            .find_map(|f| match &f.value {
                FactValue::Emails(e) if f.evidence.method == ExtractionMethod::TextHeuristic => {
                    Some(e.clone())
                }
                _ => None,
            })
            .expect("email fact");
        assert_eq!(emails.len(), 10);
        assert_eq!(emails[0], "person0@example.com");
    }

    #[test]
    fn generic_nav_text_is_not_a_service() {
        let html = r#"<html><body>
            <a href="/">Home</a><a href="/about">About</a>
            <h2>Managed Cloud Services</h2>
            </body></html>"#;
        let facts = extract_facts(html, &ctx());
        let services = facts
            .iter()
            .find_map(|f| match &f.value {
                FactValue::Services(s) => Some(s.clone()),
                _ => None,
            })
            .expect("services fact");
        assert_eq!(services, vec!["Managed Cloud Services".to_string()]);
    }

    #[test]
    fn jsonld_graph_and_type_arrays_are_handled() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@graph":[{"@type":["Organization","Thing"],"name":"Graph Co"}]}
            </script></head><body><html></body></html>"#;
        let facts = extract_facts(html, &ctx());
        assert!(facts
            .iter()
            .any(|f| matches!(&f.value, FactValue::Name(n) if n == "Graph Co")));
    }

    #[test]
    fn score_is_bounded_for_empty_input() {
        let score = score_page("", &[], &ScoreWeights::default());
        assert!(score.score >= 0.0 && score.score <= 1.0);
        assert!(score.reasons.contains(&"low confidence overall".to_string()));
    }

    #[test]
    fn rich_company_page_scores_high() {
        let facts = extract_facts(ORG_PAGE, &ctx());
        let score = score_page(ORG_PAGE, &facts, &ScoreWeights::default());
        assert!(score.score > 0.5, "score was {}", score.score);
        assert!(score
            .reasons
            .iter()
            .any(|r| r.contains("structured organization identity")));
    }

    #[test]
    fn spam_vocabulary_applies_fixed_penalty() {
        let html = "<html><body>Best online casino and slots bonuses</body></html>";
        let clean = "<html><body>plain text</body></html>";
        let spam_score = score_page(html, &[], &ScoreWeights::default());
        let clean_score = score_page(clean, &[], &ScoreWeights::default());
        assert!(spam_score.score <= clean_score.score);
        assert!(spam_score.reasons.contains(&"spam vocabulary present".to_string()));
        assert!(spam_score.score >= 0.0);
    }

    #[test]
    fn score_never_exceeds_one() {
        let mut weights = ScoreWeights::default();
        weights.structured_identity = 5.0;
        let facts = extract_facts(ORG_PAGE, &ctx());
        let score = score_page(ORG_PAGE, &facts, &weights);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn resolver_prefers_canonical_company_domain() {
        let html = r#"<html><head>
            <link rel="canonical" href="https://acme.io/careers">
            </head><body>
            <a href="https://jobs.ashbyhq.com/acme/123">Role</a>
            <a href="https://www.linkedin.com/company/acme">LinkedIn</a>
            </body></html>"#;
        assert_eq!(resolve_company_domain(html), Some("acme.io".to_string()));
    }

    #[test]
    fn resolver_never_returns_the_board_host() {
        let html = r#"<html><body>
            <a href="https://jobs.ashbyhq.com/acme">Board</a>
            <a href="https://jobs.lever.co/acme">Lever</a>
            </body></html>"#;
        assert_eq!(resolve_company_domain(html), None);
    }

    #[test]
    fn resolver_favors_root_domains_over_careers_subdomains() {
        let html = r#"<html><body>
            <a href="https://careers.deep.sub.acme.example.org/x">Careers</a>
            <a href="https://acme.org/about">Site</a>
            </body></html>"#;
        assert_eq!(resolve_company_domain(html), Some("acme.org".to_string()));
    }

    #[test]
    fn default_weights_match_shipped_contract() {
        let weights = ScoreWeights::default();
        assert_eq!(weights.structured_identity, 0.18);
        assert_eq!(weights.services_nav, 0.18);
        assert_eq!(weights.portfolio_nav, 0.18);
        assert_eq!(weights.about_nav, 0.08);
        assert_eq!(weights.contact_nav, 0.08);
        assert_eq!(weights.spam_penalty, 0.6);
        assert_eq!(weights.high_confidence_threshold, 0.75);
        assert_eq!(weights.low_confidence_threshold, 0.5);
    }
}
