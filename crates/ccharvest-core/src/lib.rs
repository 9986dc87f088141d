//! Core domain model and provenance types for ccharvest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ccharvest-core";

/// How a fact was pulled out of a page. Ordered by trustworthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    StructuredData,
    MetaTag,
    DomHeuristic,
    TextHeuristic,
}

impl ExtractionMethod {
    /// Higher rank wins fusion tie-breaks.
    pub fn quality_rank(self) -> u8 {
        match self {
            ExtractionMethod::StructuredData => 3,
            ExtractionMethod::MetaTag => 2,
            ExtractionMethod::DomHeuristic => 1,
            ExtractionMethod::TextHeuristic => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::StructuredData => "structured-data",
            ExtractionMethod::MetaTag => "meta-tag",
            ExtractionMethod::DomHeuristic => "dom-heuristic",
            ExtractionMethod::TextHeuristic => "text-heuristic",
        }
    }
}

/// Provenance payload attached to a fact. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub source_url: String,
    pub crawl_id: String,
    /// 14-digit UTC capture timestamp (`YYYYMMDDHHMMSS`), lexicographically
    /// sortable.
    pub capture_timestamp: String,
    pub observed_at: DateTime<Utc>,
    pub method: ExtractionMethod,
}

/// One typed field observation. List-valued kinds carry the whole list seen
/// on a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FactValue {
    Name(String),
    /// `<title>` text kept as a low-confidence name fallback.
    Title(String),
    Description(String),
    Website(String),
    Services(Vec<String>),
    Locations(Vec<String>),
    Phones(Vec<String>),
    Emails(Vec<String>),
    ProfileLinks(Vec<String>),
}

impl FactValue {
    pub fn field_name(&self) -> &'static str {
        match self {
            FactValue::Name(_) => "name",
            FactValue::Title(_) => "title",
            FactValue::Description(_) => "description",
            FactValue::Website(_) => "website",
            FactValue::Services(_) => "services",
            FactValue::Locations(_) => "locations",
            FactValue::Phones(_) => "phones",
            FactValue::Emails(_) => "emails",
            FactValue::ProfileLinks(_) => "profile_links",
        }
    }

    /// Stable grouping key for fusion: scalars lowercased and trimmed, lists
    /// lowercased, deduped and sorted before joining.
    pub fn normalized_key(&self) -> String {
        match self {
            FactValue::Name(s)
            | FactValue::Title(s)
            | FactValue::Description(s)
            | FactValue::Website(s) => s.trim().to_lowercase(),
            FactValue::Services(items)
            | FactValue::Locations(items)
            | FactValue::Phones(items)
            | FactValue::Emails(items)
            | FactValue::ProfileLinks(items) => {
                let mut normalized: Vec<String> = items
                    .iter()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                normalized.sort();
                normalized.dedup();
                normalized.join("\u{1f}")
            }
        }
    }
}

/// One (field, value) observation with confidence and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub value: FactValue,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub evidence: Evidence,
}

impl Fact {
    pub fn new(value: FactValue, confidence: f64, evidence: Evidence) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
        }
    }
}

/// Where a golden record's best page came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRef {
    pub source_url: String,
    pub crawl_id: String,
    pub capture_timestamp: String,
}

/// Fused, scored, best-known-facts view of one company. Built fresh each
/// harvest run; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenRecord {
    pub company_id: Uuid,
    pub canonical_domain: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub services: Vec<String>,
    pub locations: Vec<String>,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub profile_links: Vec<String>,
    /// In `[0, 1]`.
    pub score: f64,
    pub reasons: Vec<String>,
    pub last_seen: CaptureRef,
    pub facts: Vec<Fact>,
}

impl GoldenRecord {
    /// Deterministic identity derived from the canonical domain, stable
    /// across runs.
    pub fn derive_company_id(canonical_domain: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical_domain.as_bytes())
    }
}

/// One archive index hit, mirroring the CDX NDJSON shape. Offsets and
/// lengths arrive as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdxRecord {
    pub url: String,
    pub timestamp: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default, rename = "mime-detected")]
    pub mime_detected: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub length: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

impl CdxRecord {
    pub fn offset_u64(&self) -> Option<u64> {
        self.offset.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn length_u64(&self) -> Option<u64> {
        self.length.as_deref().and_then(|s| s.parse().ok())
    }

    /// Server-detected mime takes priority over the declared one.
    pub fn effective_mime(&self) -> Option<&str> {
        self.mime_detected.as_deref().or(self.mime.as_deref())
    }
}

/// Hosted job-board platforms whose public board pages we mine for
/// employer domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtsProvider {
    Ashby,
    Greenhouse,
    Lever,
    Workable,
}

impl AtsProvider {
    pub const ALL: [AtsProvider; 4] = [
        AtsProvider::Ashby,
        AtsProvider::Greenhouse,
        AtsProvider::Lever,
        AtsProvider::Workable,
    ];

    pub fn host(self) -> &'static str {
        match self {
            AtsProvider::Ashby => "jobs.ashbyhq.com",
            AtsProvider::Greenhouse => "job-boards.greenhouse.io",
            AtsProvider::Lever => "jobs.lever.co",
            AtsProvider::Workable => "apply.workable.com",
        }
    }

    /// URL-prefix used for archive-index prefix queries.
    pub fn index_prefix(self) -> String {
        format!("{}/", self.host())
    }

    pub fn board_url(self, slug: &str) -> String {
        format!("https://{}/{}", self.host(), slug)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AtsProvider::Ashby => "ashby",
            AtsProvider::Greenhouse => "greenhouse",
            AtsProvider::Lever => "lever",
            AtsProvider::Workable => "workable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ashby" => Some(AtsProvider::Ashby),
            "greenhouse" | "gh" => Some(AtsProvider::Greenhouse),
            "lever" | "lv" => Some(AtsProvider::Lever),
            "workable" => Some(AtsProvider::Workable),
            _ => None,
        }
    }

    /// Extract the company slug from a board URL, confirming it matches this
    /// provider's path shape. Reserved path segments are not company slugs.
    pub fn board_slug(self, url: &str) -> Option<String> {
        const RESERVED: [&str; 7] = [
            "api",
            "static",
            "assets",
            "favicon.ico",
            "robots.txt",
            "sitemap.xml",
            "jobs",
        ];

        let url = url.trim_end_matches('/');
        let prefix = self.index_prefix();
        let idx = url.find(&prefix)?;
        let after = &url[idx + prefix.len()..];
        let slug = after.split('/').next().unwrap_or("");
        let slug = slug.split('?').next().unwrap_or(slug);
        let slug = slug.split('#').next().unwrap_or(slug);
        if slug.is_empty() || RESERVED.contains(&slug) {
            return None;
        }
        Some(slug.to_lowercase())
    }
}

/// A job board discovered in the archive index. Transient hand-off from
/// discovery to domain resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtsBoard {
    pub provider: AtsProvider,
    pub url: String,
    pub slug: String,
    pub crawl_id: String,
    pub capture_timestamp: String,
}

const TRACKING_PARAMS: [&str; 5] = ["gclid", "fbclid", "ref", "source", "trk"];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Enumerate protocol/host/trailing-slash variants of a URL for archive
/// lookups. Pure; falls back to the input on parse failure.
pub fn lookup_variants(raw: &str) -> Vec<String> {
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return vec![raw.to_string()],
    };
    let host = match parsed.host_str() {
        Some(h) => h.to_lowercase(),
        None => return vec![raw.to_string()],
    };
    let bare = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let hosts = [bare.clone(), format!("www.{bare}")];

    let path = parsed.path().to_string();
    let toggled = if path == "/" || path.is_empty() {
        String::new()
    } else if let Some(stripped) = path.strip_suffix('/') {
        stripped.to_string()
    } else {
        format!("{path}/")
    };
    let paths = [path, toggled];
    let query = parsed
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();

    let mut variants = Vec::with_capacity(8);
    for scheme in ["https", "http"] {
        for host in &hosts {
            for path in &paths {
                let candidate = format!("{scheme}://{host}{path}{query}");
                if !variants.contains(&candidate) {
                    variants.push(candidate);
                }
            }
        }
    }
    variants
}

/// Identity form used for dedup: fragment stripped, tracking parameters
/// dropped, remaining query pairs sorted lexically. Idempotent.
pub fn canonical_form(raw: &str) -> String {
    let mut parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return raw.trim().to_string(),
    };
    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &pairs {
            serializer.append_pair(name, value);
        }
        let query = serializer.finish();
        parsed.set_query(Some(&query));
    }
    parsed.to_string()
}

/// Normalize a bare domain or URL to its canonical domain: lowercase host,
/// no leading `www.`, no path or query.
pub fn canonical_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&candidate).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn evidence(method: ExtractionMethod) -> Evidence {
        Evidence {
            source_url: "https://example.com/".to_string(),
            crawl_id: "CC-MAIN-2026-04".to_string(),
            capture_timestamp: "20260115083000".to_string(),
            observed_at: Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).single().unwrap(),
            method,
        }
    }

    #[test]
    fn method_ranks_order_by_trust() {
        assert!(
            ExtractionMethod::StructuredData.quality_rank()
                > ExtractionMethod::MetaTag.quality_rank()
        );
        assert!(
            ExtractionMethod::MetaTag.quality_rank()
                > ExtractionMethod::DomHeuristic.quality_rank()
        );
        assert!(
            ExtractionMethod::DomHeuristic.quality_rank()
                > ExtractionMethod::TextHeuristic.quality_rank()
        );
    }

    #[test]
    fn fact_confidence_is_clamped() {
        let fact = Fact::new(
            FactValue::Name("Acme".into()),
            1.7,
            evidence(ExtractionMethod::StructuredData),
        );
        assert_eq!(fact.confidence, 1.0);
    }

    #[test]
    fn normalized_key_ignores_list_order_and_case() {
        let a = FactValue::Services(vec!["Web Design".into(), "SEO ".into()]);
        let b = FactValue::Services(vec!["seo".into(), "web design".into()]);
        assert_eq!(a.normalized_key(), b.normalized_key());
    }

    #[test]
    fn company_id_is_stable() {
        assert_eq!(
            GoldenRecord::derive_company_id("acme.io"),
            GoldenRecord::derive_company_id("acme.io")
        );
        assert_ne!(
            GoldenRecord::derive_company_id("acme.io"),
            GoldenRecord::derive_company_id("acme.com")
        );
    }

    #[test]
    fn lookup_variants_cover_scheme_www_and_slash() {
        let variants = lookup_variants("https://www.example.com/about");
        assert_eq!(variants.len(), 8);
        assert!(variants.contains(&"https://example.com/about".to_string()));
        assert!(variants.contains(&"http://www.example.com/about/".to_string()));
        // First variant keeps the bare-host https form.
        assert_eq!(variants[0], "https://example.com/about");
    }

    #[test]
    fn lookup_variants_fall_back_on_garbage() {
        assert_eq!(lookup_variants("not a url"), vec!["not a url".to_string()]);
    }

    #[test]
    fn canonical_form_is_idempotent() {
        let once = canonical_form("https://example.com/a?b=2&a=1&utm_source=x#frag");
        let twice = canonical_form(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn canonical_form_drops_tracking_params_only() {
        let a = canonical_form("https://example.com/p?gclid=123&x=1");
        let b = canonical_form("https://example.com/p?x=1&fbclid=9&utm_medium=email");
        assert_eq!(a, b);
        assert_eq!(a, "https://example.com/p?x=1");
    }

    #[test]
    fn canonical_domain_strips_www_and_paths() {
        assert_eq!(
            canonical_domain("https://www.Example.COM/careers?x=1"),
            Some("example.com".to_string())
        );
        assert_eq!(canonical_domain("acme.io"), Some("acme.io".to_string()));
        assert_eq!(canonical_domain("   "), None);
        assert_eq!(canonical_domain("localhost"), None);
    }

    #[test]
    fn board_slug_requires_provider_path_shape() {
        let ashby = AtsProvider::Ashby;
        assert_eq!(
            ashby.board_slug("https://jobs.ashbyhq.com/Acme?utm_source=x"),
            Some("acme".to_string())
        );
        assert_eq!(ashby.board_slug("https://jobs.ashbyhq.com/api/v1"), None);
        assert_eq!(ashby.board_slug("https://jobs.ashbyhq.com/"), None);
        assert_eq!(ashby.board_slug("https://example.com/acme"), None);
        assert_eq!(
            AtsProvider::Workable.board_slug("https://apply.workable.com/acme-inc/j/123"),
            Some("acme-inc".to_string())
        );
    }

    #[test]
    fn cdx_record_parses_index_line() {
        let line = r#"{"url":"https://jobs.ashbyhq.com/acme","timestamp":"20260104120000","status":"200","mime":"text/html","mime-detected":"text/html","filename":"crawl-data/CC-MAIN-2026-04/warc/x.warc.gz","offset":"123","length":"4567","digest":"AAAA"}"#;
        let record: CdxRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.offset_u64(), Some(123));
        assert_eq!(record.length_u64(), Some(4567));
        assert_eq!(record.effective_mime(), Some("text/html"));
    }
}
