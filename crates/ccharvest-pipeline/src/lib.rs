//! Orchestration: fuse page-level facts into golden records, persist them
//! idempotently, and drive harvest runs over worker pools.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ccharvest_archive::{discover_boards, CdxClient, RecordDecoder};
use ccharvest_core::{
    canonical_domain, canonical_form, AtsBoard, AtsProvider, CaptureRef, CdxRecord, Fact,
    FactValue, GoldenRecord,
};
use ccharvest_extract::{
    extract_facts, resolve_company_domain, score_page, PageContext, ScoreWeights,
};
use ccharvest_fetch::{FetchGovernor, GovernorConfig};

pub const CRATE_NAME: &str = "ccharvest-pipeline";

/// Key pages probed per domain, in priority order. The homepage comes first
/// so a domain with a single usable capture still yields identity facts.
pub const KEY_PAGES: [&str; 10] = [
    "/",
    "/about",
    "/about-us",
    "/services",
    "/solutions",
    "/work",
    "/case-studies",
    "/company",
    "/team",
    "/contact",
];

// ---------------------------------------------------------------------------
// Capture source seam
// ---------------------------------------------------------------------------

/// A capture together with the crawl it was found in. The index record alone
/// does not say which collection answered the query.
#[derive(Debug, Clone)]
pub struct LocatedCapture {
    pub crawl_id: String,
    pub record: CdxRecord,
}

/// Where pages come from. The production impl reads the public archive;
/// tests script it.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Best capture of `url` across the given crawls, newest crawl first.
    async fn locate(&self, url: &str, crawl_ids: &[String]) -> Option<LocatedCapture>;

    /// Decoded HTML for a located capture, or `None` on any miss.
    async fn decode(&self, capture: &LocatedCapture) -> Option<String>;
}

pub struct ArchiveCaptureSource {
    cdx: CdxClient,
    decoder: RecordDecoder,
}

impl ArchiveCaptureSource {
    pub fn new(cdx: CdxClient, decoder: RecordDecoder) -> Self {
        Self { cdx, decoder }
    }
}

#[async_trait]
impl CaptureSource for ArchiveCaptureSource {
    async fn locate(&self, url: &str, crawl_ids: &[String]) -> Option<LocatedCapture> {
        for crawl_id in crawl_ids {
            match self.cdx.find_best_capture(url, crawl_id).await {
                Ok(Some(record)) => {
                    return Some(LocatedCapture {
                        crawl_id: crawl_id.clone(),
                        record,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(url, crawl_id, %err, "index lookup failed, trying next crawl");
                }
            }
        }
        None
    }

    async fn decode(&self, capture: &LocatedCapture) -> Option<String> {
        let filename = capture.record.filename.as_deref()?;
        let offset = capture.record.offset_u64()?;
        let length = capture.record.length_u64()?;
        self.decoder.fetch_and_decode(filename, offset, length).await
    }
}

// ---------------------------------------------------------------------------
// Fusion
// ---------------------------------------------------------------------------

/// Total preference order between two facts claiming the same thing.
/// Confidence wins, then extraction method quality, then the newer capture,
/// then the newer observation.
fn fusion_order(a: &Fact, b: &Fact) -> std::cmp::Ordering {
    a.confidence
        .partial_cmp(&b.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| {
            a.evidence
                .method
                .quality_rank()
                .cmp(&b.evidence.method.quality_rank())
        })
        .then_with(|| {
            a.evidence
                .capture_timestamp
                .cmp(&b.evidence.capture_timestamp)
        })
        .then_with(|| a.evidence.observed_at.cmp(&b.evidence.observed_at))
}

/// Collapse facts that assert the same value for the same field, keeping the
/// preferred witness per group. Output order follows first appearance, so
/// running this twice over its own output is a no-op.
pub fn dedupe_facts(facts: Vec<Fact>) -> Vec<Fact> {
    let mut groups: Vec<((&'static str, String), Fact)> = Vec::new();
    for fact in facts {
        let key = (fact.value.field_name(), fact.value.normalized_key());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, held)) => {
                if fusion_order(&fact, held) == std::cmp::Ordering::Greater {
                    *held = fact;
                }
            }
            None => groups.push((key, fact)),
        }
    }
    groups.into_iter().map(|(_, fact)| fact).collect()
}

/// Flat fields of a golden record, before scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub services: Vec<String>,
    pub locations: Vec<String>,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub profile_links: Vec<String>,
}

fn normalize_email(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    lowered
        .strip_prefix("mailto:")
        .unwrap_or(&lowered)
        .to_string()
}

/// Digits plus an optional leading `+`. Formatting variants of one number
/// collapse to the same string.
fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::new();
    for (i, ch) in trimmed.chars().enumerate() {
        if ch.is_ascii_digit() || (i == 0 && ch == '+') {
            out.push(ch);
        }
    }
    out
}

/// Scheme, host and path only. Queries and fragments on profile URLs are
/// session noise.
fn normalize_profile_link(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let path = parsed.path().trim_end_matches('/');
            format!("{}://{}{}", parsed.scheme(), host, path)
        }
        Err(_) => raw.trim().to_string(),
    }
}

fn normalize_list(values: &mut Vec<String>, f: impl Fn(&str) -> String) {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(values.len());
    for value in values.iter() {
        let normalized = f(value);
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    *values = out;
}

/// Normalize field-specific value shapes across already-deduplicated facts,
/// then pick the preferred fact per field into a flat record. The normalized
/// facts come back alongside so provenance survives fusion.
pub fn aggregate(mut facts: Vec<Fact>) -> (FusedFields, Vec<Fact>) {
    for fact in &mut facts {
        match &mut fact.value {
            FactValue::Emails(values) => normalize_list(values, normalize_email),
            FactValue::Phones(values) => normalize_list(values, normalize_phone),
            FactValue::ProfileLinks(values) => normalize_list(values, normalize_profile_link),
            FactValue::Services(values) | FactValue::Locations(values) => {
                normalize_list(values, |v| v.trim().to_string())
            }
            FactValue::Website(value) => *value = canonical_form(value),
            _ => {}
        }
    }

    let best = |field: &str| -> Option<&Fact> {
        facts
            .iter()
            .filter(|fact| fact.value.field_name() == field)
            .max_by(|a, b| fusion_order(a, b))
    };

    let scalar = |fact: &Fact| -> Option<String> {
        match &fact.value {
            FactValue::Name(v)
            | FactValue::Title(v)
            | FactValue::Description(v)
            | FactValue::Website(v) => Some(v.clone()),
            _ => None,
        }
    };
    let list = |fact: &Fact| -> Vec<String> {
        match &fact.value {
            FactValue::Services(v)
            | FactValue::Locations(v)
            | FactValue::Phones(v)
            | FactValue::Emails(v)
            | FactValue::ProfileLinks(v) => v.clone(),
            _ => Vec::new(),
        }
    };

    let fused = FusedFields {
        // The document title is a name of last resort.
        name: best("name")
            .or_else(|| best("title"))
            .and_then(scalar),
        description: best("description").and_then(scalar),
        website: best("website").and_then(scalar),
        services: best("services").map(list).unwrap_or_default(),
        locations: best("locations").map(list).unwrap_or_default(),
        phones: best("phones").map(list).unwrap_or_default(),
        emails: best("emails").map(list).unwrap_or_default(),
        profile_links: best("profile_links").map(list).unwrap_or_default(),
    };

    (fused, facts)
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Invalid(String),
}

/// One extraction snapshot of a company, hashed over its stable content so
/// identical re-runs collapse to the existing row.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub content_hash: String,
    pub source_url: String,
    pub crawl_id: String,
    pub capture_timestamp: String,
    pub dominant_method: String,
    pub payload: serde_json::Value,
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity of a fact within a company. Excludes observation time, so the
/// same fact seen again on a later run is not a new row.
pub fn fact_identity_hash(company_id: Uuid, fact: &Fact) -> String {
    sha256_hex(&format!(
        "{company_id}:{}:{}",
        fact.value.field_name(),
        fact.value.normalized_key()
    ))
}

/// Build the snapshot row for a record. The hashed payload holds only fields
/// that are deterministic for identical archive inputs; wall-clock
/// observation times stay out of it.
pub fn snapshot_row(record: &GoldenRecord) -> SnapshotRow {
    let payload = serde_json::json!({
        "canonical_domain": record.canonical_domain,
        "name": record.name,
        "description": record.description,
        "website": record.website,
        "services": record.services,
        "locations": record.locations,
        "phones": record.phones,
        "emails": record.emails,
        "profile_links": record.profile_links,
        "score": record.score,
    });

    let mut method_counts: HashMap<&'static str, usize> = HashMap::new();
    for fact in &record.facts {
        *method_counts
            .entry(fact.evidence.method.as_str())
            .or_default() += 1;
    }
    let dominant_method = method_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(method, _)| method.to_string())
        .unwrap_or_else(|| "text-heuristic".to_string());

    SnapshotRow {
        content_hash: sha256_hex(&payload.to_string()),
        source_url: record.last_seen.source_url.clone(),
        crawl_id: record.last_seen.crawl_id.clone(),
        capture_timestamp: record.last_seen.capture_timestamp.clone(),
        dominant_method,
        payload,
    }
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Create or update the company row; returns its id. Existing fields are
    /// only overwritten by non-empty values, and the score never decreases.
    async fn upsert_company(&self, record: &GoldenRecord) -> Result<Uuid, PersistenceError>;

    /// Insert a snapshot unless one with the same content hash already exists
    /// for the company; returns the (existing or new) snapshot id.
    async fn insert_snapshot(
        &self,
        company_id: Uuid,
        row: &SnapshotRow,
    ) -> Result<Uuid, PersistenceError>;

    /// Insert facts not seen before for this company; returns how many were new.
    async fn insert_facts(&self, company_id: Uuid, facts: &[Fact])
        -> Result<usize, PersistenceError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id UUID PRIMARY KEY,
                canonical_domain TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                website TEXT NOT NULL DEFAULT '',
                services JSONB NOT NULL DEFAULT '[]'::jsonb,
                locations JSONB NOT NULL DEFAULT '[]'::jsonb,
                phones JSONB NOT NULL DEFAULT '[]'::jsonb,
                emails JSONB NOT NULL DEFAULT '[]'::jsonb,
                profile_links JSONB NOT NULL DEFAULT '[]'::jsonb,
                score DOUBLE PRECISION NOT NULL DEFAULT 0,
                reasons JSONB NOT NULL DEFAULT '[]'::jsonb,
                last_seen_url TEXT NOT NULL DEFAULT '',
                last_seen_crawl TEXT NOT NULL DEFAULT '',
                last_seen_timestamp TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS company_snapshots (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                content_hash TEXT NOT NULL,
                source_url TEXT NOT NULL,
                crawl_id TEXT NOT NULL,
                capture_timestamp TEXT NOT NULL,
                dominant_method TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (company_id, content_hash)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS company_facts (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                identity_hash TEXT NOT NULL,
                field TEXT NOT NULL,
                value JSONB NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                method TEXT NOT NULL,
                source_url TEXT NOT NULL,
                crawl_id TEXT NOT NULL,
                capture_timestamp TEXT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL,
                UNIQUE (company_id, identity_hash)
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for PgStore {
    async fn upsert_company(&self, record: &GoldenRecord) -> Result<Uuid, PersistenceError> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO companies (
                id, canonical_domain, name, description, website,
                services, locations, phones, emails, profile_links,
                score, reasons, last_seen_url, last_seen_crawl, last_seen_timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (canonical_domain) DO UPDATE SET
                name = CASE WHEN EXCLUDED.name <> '' THEN EXCLUDED.name ELSE companies.name END,
                description = CASE WHEN EXCLUDED.description <> '' THEN EXCLUDED.description ELSE companies.description END,
                website = CASE WHEN EXCLUDED.website <> '' THEN EXCLUDED.website ELSE companies.website END,
                services = CASE WHEN jsonb_array_length(EXCLUDED.services) > 0 THEN EXCLUDED.services ELSE companies.services END,
                locations = CASE WHEN jsonb_array_length(EXCLUDED.locations) > 0 THEN EXCLUDED.locations ELSE companies.locations END,
                phones = CASE WHEN jsonb_array_length(EXCLUDED.phones) > 0 THEN EXCLUDED.phones ELSE companies.phones END,
                emails = CASE WHEN jsonb_array_length(EXCLUDED.emails) > 0 THEN EXCLUDED.emails ELSE companies.emails END,
                profile_links = CASE WHEN jsonb_array_length(EXCLUDED.profile_links) > 0 THEN EXCLUDED.profile_links ELSE companies.profile_links END,
                score = GREATEST(companies.score, EXCLUDED.score),
                reasons = EXCLUDED.reasons,
                last_seen_url = EXCLUDED.last_seen_url,
                last_seen_crawl = EXCLUDED.last_seen_crawl,
                last_seen_timestamp = EXCLUDED.last_seen_timestamp,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(record.company_id)
        .bind(&record.canonical_domain)
        .bind(record.name.clone().unwrap_or_default())
        .bind(record.description.clone().unwrap_or_default())
        .bind(record.website.clone().unwrap_or_default())
        .bind(serde_json::json!(record.services))
        .bind(serde_json::json!(record.locations))
        .bind(serde_json::json!(record.phones))
        .bind(serde_json::json!(record.emails))
        .bind(serde_json::json!(record.profile_links))
        .bind(record.score)
        .bind(serde_json::json!(record.reasons))
        .bind(&record.last_seen.source_url)
        .bind(&record.last_seen.crawl_id)
        .bind(&record.last_seen.capture_timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_snapshot(
        &self,
        company_id: Uuid,
        row: &SnapshotRow,
    ) -> Result<Uuid, PersistenceError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO company_snapshots (
                id, company_id, content_hash, source_url, crawl_id,
                capture_timestamp, dominant_method, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (company_id, content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(&row.content_hash)
        .bind(&row.source_url)
        .bind(&row.crawl_id)
        .bind(&row.capture_timestamp)
        .bind(&row.dominant_method)
        .bind(&row.payload)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }
        let (id,): (Uuid,) = sqlx::query_as(
            "SELECT id FROM company_snapshots WHERE company_id = $1 AND content_hash = $2",
        )
        .bind(company_id)
        .bind(&row.content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_facts(
        &self,
        company_id: Uuid,
        facts: &[Fact],
    ) -> Result<usize, PersistenceError> {
        let mut inserted = 0usize;
        for fact in facts {
            let value = serde_json::to_value(&fact.value)
                .map_err(|err| PersistenceError::Invalid(err.to_string()))?;
            let result = sqlx::query(
                r#"
                INSERT INTO company_facts (
                    id, company_id, identity_hash, field, value, confidence,
                    method, source_url, crawl_id, capture_timestamp, observed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (company_id, identity_hash) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(company_id)
            .bind(fact_identity_hash(company_id, fact))
            .bind(fact.value.field_name())
            .bind(value)
            .bind(fact.confidence)
            .bind(fact.evidence.method.as_str())
            .bind(&fact.evidence.source_url)
            .bind(&fact.evidence.crawl_id)
            .bind(&fact.evidence.capture_timestamp)
            .bind(fact.evidence.observed_at)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }
}

/// In-memory store with the same merge semantics as the database one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    companies: HashMap<String, StoredCompany>,
    snapshots: HashMap<(Uuid, String), Uuid>,
    facts: HashSet<(Uuid, String)>,
}

#[derive(Debug, Clone)]
pub struct StoredCompany {
    pub id: Uuid,
    pub canonical_domain: String,
    pub name: String,
    pub description: String,
    pub website: String,
    pub services: Vec<String>,
    pub emails: Vec<String>,
    pub score: f64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn company(&self, canonical_domain: &str) -> Option<StoredCompany> {
        self.lock().companies.get(canonical_domain).cloned()
    }

    pub fn company_count(&self) -> usize {
        self.lock().companies.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshots.len()
    }

    pub fn fact_count(&self) -> usize {
        self.lock().facts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn upsert_company(&self, record: &GoldenRecord) -> Result<Uuid, PersistenceError> {
        let mut state = self.lock();
        let entry = state
            .companies
            .entry(record.canonical_domain.clone())
            .or_insert_with(|| StoredCompany {
                id: record.company_id,
                canonical_domain: record.canonical_domain.clone(),
                name: String::new(),
                description: String::new(),
                website: String::new(),
                services: Vec::new(),
                emails: Vec::new(),
                score: 0.0,
            });
        if let Some(name) = record.name.as_deref().filter(|v| !v.is_empty()) {
            entry.name = name.to_string();
        }
        if let Some(description) = record.description.as_deref().filter(|v| !v.is_empty()) {
            entry.description = description.to_string();
        }
        if let Some(website) = record.website.as_deref().filter(|v| !v.is_empty()) {
            entry.website = website.to_string();
        }
        if !record.services.is_empty() {
            entry.services = record.services.clone();
        }
        if !record.emails.is_empty() {
            entry.emails = record.emails.clone();
        }
        entry.score = entry.score.max(record.score);
        Ok(entry.id)
    }

    async fn insert_snapshot(
        &self,
        company_id: Uuid,
        row: &SnapshotRow,
    ) -> Result<Uuid, PersistenceError> {
        let mut state = self.lock();
        let id = *state
            .snapshots
            .entry((company_id, row.content_hash.clone()))
            .or_insert_with(Uuid::new_v4);
        Ok(id)
    }

    async fn insert_facts(
        &self,
        company_id: Uuid,
        facts: &[Fact],
    ) -> Result<usize, PersistenceError> {
        let mut state = self.lock();
        let mut inserted = 0usize;
        for fact in facts {
            if state
                .facts
                .insert((company_id, fact_identity_hash(company_id, fact)))
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub database_url: String,
    pub user_agent: String,
    pub seed_path: PathBuf,
    /// How many of the newest crawls to search.
    pub crawl_count: usize,
    pub max_key_pages: usize,
    pub harvest_workers: usize,
    pub resolver_workers: usize,
    /// Records below this score are not persisted.
    pub min_score: f64,
    pub discovery_enabled: bool,
    pub per_provider_cap: usize,
    /// Boards at or under this posting count are imported wholesale by the
    /// downstream job ingester; carried here so one config block drives both.
    pub board_import_threshold: usize,
    pub weights_path: Option<PathBuf>,
    pub harvest_cron: Option<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/ccharvest".to_string(),
            user_agent: "ccharvest/0.1 (archive research)".to_string(),
            seed_path: PathBuf::from("seeds.txt"),
            crawl_count: 3,
            max_key_pages: KEY_PAGES.len(),
            harvest_workers: 8,
            resolver_workers: 3,
            min_score: 0.3,
            discovery_enabled: false,
            per_provider_cap: 200,
            board_import_threshold: 20,
            weights_path: None,
            harvest_cron: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw, "unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_parse("CCH_DATABASE_URL", defaults.database_url),
            user_agent: env_parse("CCH_USER_AGENT", defaults.user_agent),
            seed_path: std::env::var("CCH_SEED_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.seed_path),
            crawl_count: env_parse("CCH_CRAWL_COUNT", defaults.crawl_count),
            max_key_pages: env_parse("CCH_MAX_KEY_PAGES", defaults.max_key_pages),
            harvest_workers: env_parse("CCH_HARVEST_WORKERS", defaults.harvest_workers),
            resolver_workers: env_parse("CCH_RESOLVER_WORKERS", defaults.resolver_workers),
            min_score: env_parse("CCH_MIN_SCORE", defaults.min_score),
            discovery_enabled: env_parse("CCH_DISCOVERY", defaults.discovery_enabled),
            per_provider_cap: env_parse("CCH_PER_PROVIDER_CAP", defaults.per_provider_cap),
            board_import_threshold: env_parse(
                "CCH_BOARD_IMPORT_THRESHOLD",
                defaults.board_import_threshold,
            ),
            weights_path: std::env::var("CCH_WEIGHTS_PATH").ok().map(PathBuf::from),
            harvest_cron: std::env::var("CCH_HARVEST_CRON").ok(),
        }
    }
}

/// Scoring weights from a YAML file, or the built-in defaults when no path
/// is configured. Missing keys in the file fall back field by field.
pub fn load_weights(path: Option<&Path>) -> anyhow::Result<ScoreWeights> {
    let Some(path) = path else {
        return Ok(ScoreWeights::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading weights file {}", path.display()))?;
    let weights: ScoreWeights =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(weights)
}

/// One canonical domain per non-empty, non-comment line. Lines that do not
/// reduce to a domain are dropped with a warning.
pub fn load_seed_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut domains = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match canonical_domain(line) {
            Some(domain) => {
                if seen.insert(domain.clone()) {
                    domains.push(domain);
                }
            }
            None => warn!(line, "seed line is not a domain, skipping"),
        }
    }
    domains
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_low_score: usize,
    pub persisted_facts: usize,
    /// Persisted records, best first.
    pub records: Vec<GoldenRecord>,
}

#[derive(Clone)]
pub struct Harvester {
    source: Arc<dyn CaptureSource>,
    weights: ScoreWeights,
    config: HarvestConfig,
}

impl Harvester {
    pub fn new(source: Arc<dyn CaptureSource>, weights: ScoreWeights, config: HarvestConfig) -> Self {
        Self {
            source,
            weights,
            config,
        }
    }

    /// Harvest one domain: probe key pages across the configured crawls,
    /// extract facts from every decodable page, fuse and score them. `None`
    /// when not a single page decoded.
    pub async fn harvest_domain(&self, domain: &str, crawl_ids: &[String]) -> Option<GoldenRecord> {
        let page_count = self.config.max_key_pages.clamp(1, KEY_PAGES.len());
        let mut all_facts = Vec::new();
        // Highest-scoring page so far; its HTML anchors the final score and
        // its capture becomes the record's last-seen reference.
        let mut representative: Option<(f64, String, CaptureRef)> = None;
        let mut decoded_pages = 0usize;

        for path in &KEY_PAGES[..page_count] {
            let url = format!("https://{domain}{path}");
            let Some(capture) = self.source.locate(&url, crawl_ids).await else {
                continue;
            };
            let Some(html) = self.source.decode(&capture).await else {
                continue;
            };
            decoded_pages += 1;

            let ctx = PageContext {
                source_url: capture.record.url.clone(),
                crawl_id: capture.crawl_id.clone(),
                capture_timestamp: capture.record.timestamp.clone(),
                observed_at: Utc::now(),
            };
            let facts = extract_facts(&html, &ctx);
            let page = score_page(&html, &facts, &self.weights);
            debug!(
                domain,
                url,
                facts = facts.len(),
                score = page.score,
                "key page extracted"
            );

            if representative
                .as_ref()
                .is_none_or(|(best, _, _)| page.score > *best)
            {
                representative = Some((
                    page.score,
                    html,
                    CaptureRef {
                        source_url: ctx.source_url.clone(),
                        crawl_id: ctx.crawl_id.clone(),
                        capture_timestamp: ctx.capture_timestamp.clone(),
                    },
                ));
            }
            all_facts.extend(facts);
        }

        if decoded_pages == 0 {
            warn!(domain, "no key page could be located and decoded");
            return None;
        }
        let (_, representative_html, last_seen) = representative?;

        let (fused, facts) = aggregate(dedupe_facts(all_facts));
        let graded = score_page(&representative_html, &facts, &self.weights);
        info!(
            domain,
            decoded_pages,
            facts = facts.len(),
            score = graded.score,
            "domain harvested"
        );

        Some(GoldenRecord {
            company_id: GoldenRecord::derive_company_id(domain),
            canonical_domain: domain.to_string(),
            name: fused.name,
            description: fused.description,
            website: fused.website,
            services: fused.services,
            locations: fused.locations,
            phones: fused.phones,
            emails: fused.emails,
            profile_links: fused.profile_links,
            score: graded.score,
            reasons: graded.reasons,
            last_seen,
            facts,
        })
    }

    /// Turn discovered ATS boards into company domains by decoding each
    /// board's capture and following its outbound identity links. Boards
    /// that resolve nowhere are dropped.
    pub async fn resolve_boards(&self, boards: Vec<AtsBoard>, crawl_ids: &[String]) -> Vec<String> {
        let boards = Arc::new(boards);
        let crawl_ids = Arc::new(crawl_ids.to_vec());
        let cursor = Arc::new(AtomicUsize::new(0));
        let workers = self.config.resolver_workers.clamp(1, boards.len().max(1));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let harvester = self.clone();
            let boards = Arc::clone(&boards);
            let crawl_ids = Arc::clone(&crawl_ids);
            let cursor = Arc::clone(&cursor);
            handles.push(tokio::spawn(async move {
                let mut resolved = Vec::new();
                loop {
                    let index = cursor.fetch_add(1, AtomicOrdering::SeqCst);
                    let Some(board) = boards.get(index) else {
                        break;
                    };
                    // Discovery keeps only the index row's location;
                    // re-locate to get a fetchable record.
                    let Some(located) = harvester.source.locate(&board.url, &crawl_ids).await
                    else {
                        debug!(board = %board.url, "board capture not locatable");
                        continue;
                    };
                    let Some(html) = harvester.source.decode(&located).await else {
                        debug!(board = %board.url, "board capture did not decode");
                        continue;
                    };
                    match resolve_company_domain(&html) {
                        Some(domain) => {
                            debug!(board = %board.url, domain, "board resolved");
                            resolved.push(domain);
                        }
                        None => {
                            debug!(board = %board.url, "board page had no company link");
                        }
                    }
                }
                resolved
            }));
        }

        let mut seen = HashSet::new();
        let mut domains = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(resolved) => {
                    for domain in resolved {
                        if seen.insert(domain.clone()) {
                            domains.push(domain);
                        }
                    }
                }
                Err(err) => warn!(%err, "board resolver task panicked"),
            }
        }
        domains
    }

    /// Harvest all domains over a worker pool and persist everything at or
    /// above the score floor. An empty domain list is a configuration error;
    /// per-domain failures are not.
    pub async fn run(
        &self,
        domains: Vec<String>,
        crawl_ids: &[String],
        store: Arc<dyn Persistence>,
    ) -> anyhow::Result<RunSummary> {
        if domains.is_empty() {
            anyhow::bail!("no domains to harvest: seed list empty and discovery found nothing");
        }
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, domains = domains.len(), crawls = crawl_ids.len(), "harvest run starting");

        let attempted = domains.len();
        let domains = Arc::new(domains);
        let crawl_ids = Arc::new(crawl_ids.to_vec());
        let cursor = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let persisted_facts = Arc::new(AtomicUsize::new(0));

        let workers = self.config.harvest_workers.clamp(1, attempted);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let harvester = self.clone();
            let domains = Arc::clone(&domains);
            let crawl_ids = Arc::clone(&crawl_ids);
            let cursor = Arc::clone(&cursor);
            let succeeded = Arc::clone(&succeeded);
            let failed = Arc::clone(&failed);
            let skipped = Arc::clone(&skipped);
            let persisted_facts = Arc::clone(&persisted_facts);
            let store = Arc::clone(&store);

            handles.push(tokio::spawn(async move {
                let mut records = Vec::new();
                loop {
                    let index = cursor.fetch_add(1, AtomicOrdering::SeqCst);
                    let Some(domain) = domains.get(index) else {
                        break;
                    };
                    let Some(record) = harvester.harvest_domain(domain, &crawl_ids).await else {
                        failed.fetch_add(1, AtomicOrdering::SeqCst);
                        continue;
                    };
                    if record.score < harvester.config.min_score {
                        info!(domain, score = record.score, "record below score floor, not persisted");
                        skipped.fetch_add(1, AtomicOrdering::SeqCst);
                        continue;
                    }
                    match persist_record(store.as_ref(), &record).await {
                        Ok(new_facts) => {
                            succeeded.fetch_add(1, AtomicOrdering::SeqCst);
                            persisted_facts.fetch_add(new_facts, AtomicOrdering::SeqCst);
                            records.push(record);
                        }
                        Err(err) => {
                            warn!(domain, %err, "persistence failed for domain");
                            failed.fetch_add(1, AtomicOrdering::SeqCst);
                        }
                    }
                }
                records
            }));
        }

        let mut records = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(worker_records) => records.extend(worker_records),
                Err(err) => warn!(%err, "harvest worker panicked"),
            }
        }
        records.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            attempted,
            succeeded: succeeded.load(AtomicOrdering::SeqCst),
            failed: failed.load(AtomicOrdering::SeqCst),
            skipped_low_score: skipped.load(AtomicOrdering::SeqCst),
            persisted_facts: persisted_facts.load(AtomicOrdering::SeqCst),
            records,
        };
        info!(
            %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped_low_score,
            facts = summary.persisted_facts,
            "harvest run finished"
        );
        Ok(summary)
    }
}

/// Upsert the company, then its snapshot, then its facts. Returns how many
/// facts were new this run.
pub async fn persist_record(
    store: &dyn Persistence,
    record: &GoldenRecord,
) -> Result<usize, PersistenceError> {
    let company_id = store.upsert_company(record).await?;
    let row = snapshot_row(record);
    let snapshot_id = store.insert_snapshot(company_id, &row).await?;
    let inserted = store.insert_facts(company_id, &record.facts).await?;
    debug!(
        domain = %record.canonical_domain,
        %company_id,
        %snapshot_id,
        new_facts = inserted,
        "record persisted"
    );
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Wire the whole pipeline from environment configuration and run one
/// harvest: seeds, optional board discovery, worker pool, Postgres.
pub async fn run_harvest_from_env() -> anyhow::Result<RunSummary> {
    run_harvest(HarvestConfig::from_env()).await
}

/// Run one harvest against an explicit configuration.
pub async fn run_harvest(config: HarvestConfig) -> anyhow::Result<RunSummary> {
    let weights = load_weights(config.weights_path.as_deref())?;

    let governor = Arc::new(FetchGovernor::new(GovernorConfig {
        user_agent: Some(config.user_agent.clone()),
        ..GovernorConfig::default()
    })?);
    let cdx = CdxClient::new(Arc::clone(&governor));
    let decoder = RecordDecoder::new(governor);
    let source = Arc::new(ArchiveCaptureSource::new(cdx.clone(), decoder));

    let crawl_ids: Vec<String> = cdx
        .list_crawls()
        .await
        .context("listing archive crawls")?
        .into_iter()
        .take(config.crawl_count.max(1))
        .collect();
    if crawl_ids.is_empty() {
        anyhow::bail!("archive collection listing was empty");
    }

    let mut domains = match tokio::fs::read_to_string(&config.seed_path).await {
        Ok(text) => load_seed_list(&text),
        Err(err) => {
            warn!(path = %config.seed_path.display(), %err, "seed file unreadable, continuing without seeds");
            Vec::new()
        }
    };

    let harvester = Harvester::new(source, weights, config.clone());
    if config.discovery_enabled {
        let boards =
            discover_boards(&cdx, &crawl_ids, &AtsProvider::ALL, config.per_provider_cap).await;
        info!(boards = boards.len(), "board discovery finished");
        let resolved = harvester.resolve_boards(boards, &crawl_ids).await;
        let known: HashSet<String> = domains.iter().cloned().collect();
        for domain in resolved {
            if !known.contains(&domain) {
                domains.push(domain);
            }
        }
    }

    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    store.migrate().await.context("running migrations")?;

    harvester.run(domains, &crawl_ids, store).await
}

/// Cron-driven harvesting when `CCH_HARVEST_CRON` is set; `None` otherwise.
/// The returned scheduler must be kept alive by the caller.
pub async fn maybe_build_scheduler(config: &HarvestConfig) -> anyhow::Result<Option<JobScheduler>> {
    let Some(cron) = config.harvest_cron.clone() else {
        return Ok(None);
    };
    let scheduler = JobScheduler::new().await?;
    let job = Job::new_async(cron.as_str(), |_id, _lock| {
        Box::pin(async {
            match run_harvest_from_env().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "scheduled harvest finished"
                ),
                Err(err) => warn!(%err, "scheduled harvest failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    info!(cron, "harvest scheduler started");
    Ok(Some(scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccharvest_core::{Evidence, ExtractionMethod};
    use chrono::TimeZone;

    fn evidence(
        method: ExtractionMethod,
        capture_timestamp: &str,
        observed_minute: u32,
    ) -> Evidence {
        Evidence {
            source_url: "https://example.com/".to_string(),
            crawl_id: "CC-MAIN-2025-26".to_string(),
            capture_timestamp: capture_timestamp.to_string(),
            observed_at: Utc
                .with_ymd_and_hms(2025, 6, 1, 12, observed_minute, 0)
                .single()
                .unwrap(),
            method,
        }
    }

    fn name_fact(
        value: &str,
        confidence: f64,
        method: ExtractionMethod,
        capture_timestamp: &str,
        observed_minute: u32,
    ) -> Fact {
        Fact::new(
            FactValue::Name(value.to_string()),
            confidence,
            evidence(method, capture_timestamp, observed_minute),
        )
    }

    #[test]
    fn dedupe_collapses_same_value_and_is_idempotent() {
        let facts = vec![
            name_fact("Acme", 0.95, ExtractionMethod::StructuredData, "20250101000000", 0),
            name_fact("ACME", 0.35, ExtractionMethod::TextHeuristic, "20250101000000", 0),
            name_fact("Other Co", 0.7, ExtractionMethod::MetaTag, "20250101000000", 0),
        ];
        let once = dedupe_facts(facts);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].confidence, 0.95);

        let twice = dedupe_facts(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn fusion_prefers_confidence_then_method_then_capture_then_observation() {
        // Confidence dominates even against a better method.
        let a = name_fact("acme", 0.9, ExtractionMethod::TextHeuristic, "20250101000000", 0);
        let b = name_fact("acme", 0.8, ExtractionMethod::StructuredData, "20250601000000", 9);
        assert_eq!(dedupe_facts(vec![a, b])[0].confidence, 0.9);

        // Equal confidence: method rank decides.
        let a = name_fact("acme", 0.8, ExtractionMethod::MetaTag, "20250601000000", 9);
        let b = name_fact("acme", 0.8, ExtractionMethod::StructuredData, "20250101000000", 0);
        assert_eq!(
            dedupe_facts(vec![a, b])[0].evidence.method,
            ExtractionMethod::StructuredData
        );

        // Equal confidence and method: newer capture wins.
        let a = name_fact("acme", 0.8, ExtractionMethod::MetaTag, "20250101000000", 9);
        let b = name_fact("acme", 0.8, ExtractionMethod::MetaTag, "20250601000000", 0);
        assert_eq!(
            dedupe_facts(vec![a, b])[0].evidence.capture_timestamp,
            "20250601000000"
        );

        // All else equal: newer observation wins.
        let a = name_fact("acme", 0.8, ExtractionMethod::MetaTag, "20250101000000", 0);
        let b = name_fact("acme", 0.8, ExtractionMethod::MetaTag, "20250101000000", 5);
        assert_eq!(
            dedupe_facts(vec![a, b])[0].evidence.observed_at.to_rfc3339(),
            "2025-06-01T12:05:00+00:00"
        );
    }

    #[test]
    fn aggregate_normalizes_emails_phones_and_links() {
        let facts = vec![
            Fact::new(
                FactValue::Emails(vec![
                    "MAILTO:Hello@Acme.com ".to_string(),
                    "hello@acme.com".to_string(),
                    "  team@acme.com".to_string(),
                ]),
                0.5,
                evidence(ExtractionMethod::TextHeuristic, "20250101000000", 0),
            ),
            Fact::new(
                FactValue::Phones(vec!["+1 (415) 555-0100".to_string()]),
                0.85,
                evidence(ExtractionMethod::StructuredData, "20250101000000", 0),
            ),
            Fact::new(
                FactValue::ProfileLinks(vec![
                    "https://linkedin.com/company/acme/?trk=nav".to_string(),
                ]),
                0.85,
                evidence(ExtractionMethod::StructuredData, "20250101000000", 0),
            ),
        ];
        let (fused, _) = aggregate(facts);
        assert_eq!(fused.emails, vec!["hello@acme.com", "team@acme.com"]);
        assert_eq!(fused.phones, vec!["+14155550100"]);
        assert_eq!(fused.profile_links, vec!["https://linkedin.com/company/acme"]);
    }

    #[test]
    fn aggregate_falls_back_to_title_for_name() {
        let facts = vec![Fact::new(
            FactValue::Title("Acme Digital | Home".to_string()),
            0.35,
            evidence(ExtractionMethod::DomHeuristic, "20250101000000", 0),
        )];
        let (fused, _) = aggregate(facts);
        assert_eq!(fused.name.as_deref(), Some("Acme Digital | Home"));

        let facts = vec![
            Fact::new(
                FactValue::Title("Acme Digital | Home".to_string()),
                0.35,
                evidence(ExtractionMethod::DomHeuristic, "20250101000000", 0),
            ),
            name_fact("Acme Digital", 0.95, ExtractionMethod::StructuredData, "20250101000000", 0),
        ];
        let (fused, _) = aggregate(facts);
        assert_eq!(fused.name.as_deref(), Some("Acme Digital"));
    }

    #[test]
    fn fact_identity_ignores_observation_time_and_case() {
        let company = Uuid::new_v4();
        let a = name_fact("Acme", 0.9, ExtractionMethod::StructuredData, "20250101000000", 0);
        let b = name_fact("ACME", 0.5, ExtractionMethod::TextHeuristic, "20250601000000", 9);
        assert_eq!(fact_identity_hash(company, &a), fact_identity_hash(company, &b));
        assert_ne!(
            fact_identity_hash(company, &a),
            fact_identity_hash(Uuid::new_v4(), &a)
        );
    }

    #[test]
    fn snapshot_hash_is_stable_across_observation_times() {
        let record = GoldenRecord {
            company_id: GoldenRecord::derive_company_id("acme.com"),
            canonical_domain: "acme.com".to_string(),
            name: Some("Acme".to_string()),
            description: None,
            website: None,
            services: vec!["design".to_string()],
            locations: Vec::new(),
            phones: Vec::new(),
            emails: Vec::new(),
            profile_links: Vec::new(),
            score: 0.62,
            reasons: vec!["structured identity".to_string()],
            last_seen: CaptureRef {
                source_url: "https://acme.com/".to_string(),
                crawl_id: "CC-MAIN-2025-26".to_string(),
                capture_timestamp: "20250601000000".to_string(),
            },
            facts: vec![name_fact("Acme", 0.95, ExtractionMethod::StructuredData, "20250601000000", 0)],
        };
        let mut later = record.clone();
        later.facts = vec![name_fact("Acme", 0.95, ExtractionMethod::StructuredData, "20250601000000", 30)];
        assert_eq!(snapshot_row(&record).content_hash, snapshot_row(&later).content_hash);
        assert_eq!(snapshot_row(&record).dominant_method, "structured-data");
    }

    #[test]
    fn seed_list_canonicalizes_and_dedupes() {
        let text = "\n# agencies\nhttps://www.acme.com/about\nacme.com\nbeta.io\nnot a domain\n";
        assert_eq!(load_seed_list(text), vec!["acme.com", "beta.io"]);
    }

    #[test]
    fn weights_default_when_no_path_configured() {
        let weights = load_weights(None).unwrap();
        assert_eq!(weights, ScoreWeights::default());
    }

    #[tokio::test]
    async fn memory_store_second_identical_insert_is_a_noop() {
        let store = MemoryStore::new();
        let record = GoldenRecord {
            company_id: GoldenRecord::derive_company_id("acme.com"),
            canonical_domain: "acme.com".to_string(),
            name: Some("Acme".to_string()),
            description: None,
            website: None,
            services: Vec::new(),
            locations: Vec::new(),
            phones: Vec::new(),
            emails: Vec::new(),
            profile_links: Vec::new(),
            score: 0.5,
            reasons: Vec::new(),
            last_seen: CaptureRef {
                source_url: "https://acme.com/".to_string(),
                crawl_id: "CC-MAIN-2025-26".to_string(),
                capture_timestamp: "20250601000000".to_string(),
            },
            facts: vec![name_fact("Acme", 0.95, ExtractionMethod::StructuredData, "20250601000000", 0)],
        };

        let first = persist_record(&store, &record).await.unwrap();
        assert_eq!(first, 1);
        let second = persist_record(&store, &record).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.snapshot_count(), 1);
        assert_eq!(store.company_count(), 1);
    }

    #[test]
    fn upsert_merge_keeps_existing_when_update_is_empty() {
        let store = MemoryStore::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut record = GoldenRecord {
                company_id: GoldenRecord::derive_company_id("acme.com"),
                canonical_domain: "acme.com".to_string(),
                name: Some("Acme".to_string()),
                description: Some("Design studio".to_string()),
                website: None,
                services: vec!["design".to_string()],
                locations: Vec::new(),
                phones: Vec::new(),
                emails: Vec::new(),
                profile_links: Vec::new(),
                score: 0.7,
                reasons: Vec::new(),
                last_seen: CaptureRef {
                    source_url: "https://acme.com/".to_string(),
                    crawl_id: "CC-MAIN-2025-26".to_string(),
                    capture_timestamp: "20250601000000".to_string(),
                },
                facts: Vec::new(),
            };
            store.upsert_company(&record).await.unwrap();

            record.name = None;
            record.services = Vec::new();
            record.score = 0.4;
            store.upsert_company(&record).await.unwrap();

            let stored = store.company("acme.com").unwrap();
            assert_eq!(stored.name, "Acme");
            assert_eq!(stored.services, vec!["design"]);
            assert_eq!(stored.score, 0.7);
        });
    }
}
