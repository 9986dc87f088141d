//! Common Crawl access: index (CDX) queries, capture ranking, WARC record
//! decoding, and ATS board discovery.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use ccharvest_core::{lookup_variants, AtsBoard, AtsProvider, CdxRecord};
use ccharvest_fetch::FetchGovernor;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "ccharvest-archive";

pub const DEFAULT_INDEX_BASE: &str = "https://index.commoncrawl.org";
pub const DEFAULT_DATA_BASE: &str = "https://data.commoncrawl.org";

/// Per-URL lookups stay small on purpose: one variant, few candidates.
const CAPTURE_RESULT_CAP: usize = 10;
/// Prefix scans for board discovery pull larger pages per (provider, crawl).
const DISCOVERY_RESULT_CAP: usize = 500;

#[derive(Debug, Error)]
pub enum CdxError {
    #[error(transparent)]
    Fetch(#[from] ccharvest_fetch::FetchError),
    #[error("collinfo response did not parse: {0}")]
    Collinfo(#[from] serde_json::Error),
}

/// Read-only client for the archive's columnar index.
#[derive(Debug, Clone)]
pub struct CdxClient {
    governor: Arc<FetchGovernor>,
    index_base: String,
}

#[derive(Debug, Clone)]
pub struct CdxQuery<'a> {
    pub url: &'a str,
    pub crawl_id: &'a str,
    pub match_prefix: bool,
    pub limit: usize,
}

impl CdxClient {
    pub fn new(governor: Arc<FetchGovernor>) -> Self {
        Self {
            governor,
            index_base: DEFAULT_INDEX_BASE.to_string(),
        }
    }

    pub fn with_index_base(mut self, base: impl Into<String>) -> Self {
        self.index_base = base.into();
        self
    }

    /// Crawl ids, newest first, from the index's collection listing.
    pub async fn list_crawls(&self) -> Result<Vec<String>, CdxError> {
        #[derive(Deserialize)]
        struct Collection {
            id: String,
        }
        let url = format!("{}/collinfo.json", self.index_base);
        let response = self.governor.fetch(&url).await?;
        let collections: Vec<Collection> = serde_json::from_slice(&response.body)?;
        Ok(collections.into_iter().map(|c| c.id).collect())
    }

    /// Run one index query and parse the NDJSON response tolerantly.
    pub async fn query(&self, query: &CdxQuery<'_>) -> Result<Vec<CdxRecord>, CdxError> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.url.as_bytes()).collect();
        let mut request_url = format!(
            "{}/{}-index?url={}&output=json&limit={}\
             &filter=~status:[23][0-9][0-9]\
             &fl=url,timestamp,status,mime,mime-detected,filename,offset,length,digest",
            self.index_base, query.crawl_id, encoded, query.limit
        );
        if query.match_prefix {
            request_url.push_str("&matchType=prefix");
        }

        let response = self.governor.fetch(&request_url).await?;
        let text = String::from_utf8_lossy(&response.body);
        Ok(parse_cdx_lines(&text))
    }

    /// Best usable capture of a URL within one crawl, or `None`.
    ///
    /// Only the first lookup variant is queried; widening to all eight would
    /// multiply index traffic for marginal recall.
    pub async fn find_best_capture(
        &self,
        url: &str,
        crawl_id: &str,
    ) -> Result<Option<CdxRecord>, CdxError> {
        let variants = lookup_variants(url);
        let target = variants.first().map(String::as_str).unwrap_or(url);
        let records = self
            .query(&CdxQuery {
                url: target,
                crawl_id,
                match_prefix: false,
                limit: CAPTURE_RESULT_CAP,
            })
            .await?;
        Ok(pick_best_capture(records))
    }
}

/// Parse newline-delimited JSON index records, skipping lines that do not
/// parse. The index occasionally interleaves error text with records.
pub fn parse_cdx_lines(text: &str) -> Vec<CdxRecord> {
    let mut parse_errors = 0u32;
    let records: Vec<CdxRecord> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<CdxRecord>(line) {
            Ok(record) => Some(record),
            Err(err) => {
                if parse_errors < 3 {
                    warn!(%err, line = &line[..line.len().min(200)], "skipping unparseable cdx line");
                }
                parse_errors += 1;
                None
            }
        })
        .collect();
    if parse_errors > 0 {
        debug!(parse_errors, parsed = records.len(), "cdx response had bad lines");
    }
    records
}

/// Capture-ranking weights. Candidates missing the fields needed to fetch
/// the record (timestamp, filename, offset, length) are discarded before
/// scoring.
mod capture_scoring {
    pub const STATUS_OK: f64 = 10.0;
    pub const STATUS_OTHER_2XX: f64 = 6.0;
    pub const STATUS_REDIRECT: f64 = 2.0;
    pub const MIME_HTML: f64 = 10.0;
    pub const MIME_CONTAINS_HTML: f64 = 5.0;
    /// Compressed length band of a normal HTML page.
    pub const LENGTH_BAND_MIN: u64 = 50 * 1024;
    pub const LENGTH_BAND_MAX: u64 = 2 * 1024 * 1024;
    pub const LENGTH_PARTIAL_MAX: u64 = 5 * 1024 * 1024;
    pub const LENGTH_IN_BAND: f64 = 5.0;
    pub const LENGTH_PARTIAL: f64 = 2.5;
    pub const RECENCY_NEW: f64 = 3.0;
    pub const RECENCY_MID: f64 = 1.5;
    pub const RECENCY_NEW_YEAR: u32 = 2024;
    pub const RECENCY_MID_YEAR: u32 = 2021;
}

/// Likelihood that a capture is a usable, recent HTML page.
pub fn score_capture(record: &CdxRecord) -> f64 {
    use capture_scoring::*;

    let mut score = 0.0;

    match record.status.as_deref() {
        Some("200") => score += STATUS_OK,
        Some(s) if s.starts_with('2') => score += STATUS_OTHER_2XX,
        Some(s) if s.starts_with('3') => score += STATUS_REDIRECT,
        _ => {}
    }

    if let Some(mime) = record.effective_mime() {
        let mime = mime.to_ascii_lowercase();
        if mime == "text/html" || mime == "application/xhtml+xml" {
            score += MIME_HTML;
        } else if mime.contains("html") {
            score += MIME_CONTAINS_HTML;
        }
    }

    if let Some(length) = record.length_u64() {
        if (LENGTH_BAND_MIN..=LENGTH_BAND_MAX).contains(&length) {
            score += LENGTH_IN_BAND;
        } else if length <= LENGTH_PARTIAL_MAX {
            score += LENGTH_PARTIAL;
        }
    }

    if let Some(year) = record
        .timestamp
        .get(..4)
        .and_then(|y| y.parse::<u32>().ok())
    {
        if year >= RECENCY_NEW_YEAR {
            score += RECENCY_NEW;
        } else if year >= RECENCY_MID_YEAR {
            score += RECENCY_MID;
        }
    }

    score
}

fn is_fetchable(record: &CdxRecord) -> bool {
    !record.timestamp.is_empty()
        && record.filename.is_some()
        && record.offset_u64().is_some()
        && record.length_u64().is_some()
}

/// Highest score wins; ties go to the newest timestamp (fixed-width UTC, so
/// lexicographic compare is chronological).
pub fn pick_best_capture(records: Vec<CdxRecord>) -> Option<CdxRecord> {
    records
        .into_iter()
        .filter(is_fetchable)
        .map(|record| (score_capture(&record), record))
        .max_by(|(score_a, record_a), (score_b, record_b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| record_a.timestamp.cmp(&record_b.timestamp))
        })
        .map(|(_, record)| record)
}

/// Hard ceiling on the declared compressed slice we are willing to download.
pub const MAX_COMPRESSED_LEN: u64 = 5 * 1024 * 1024;
/// Hard ceiling on the record after gunzipping the envelope.
pub const MAX_DECOMPRESSED_LEN: usize = 20 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("declared compressed length exceeds ceiling")]
    OversizedCompressed,
    #[error("decompressed record exceeds ceiling")]
    OversizedRecord,
    #[error("gzip envelope could not be read")]
    Envelope,
    #[error("record is missing a header/body boundary")]
    MalformedContainer,
    #[error("embedded response status is {0}, not 200")]
    EmbeddedStatus(u16),
    #[error("embedded response has no parseable status line")]
    NoStatusLine,
    #[error("decoded payload has no html signal")]
    NotHtml,
}

/// Fetches compressed record slices by byte range and decodes them to HTML.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    governor: Arc<FetchGovernor>,
    data_base: String,
}

impl RecordDecoder {
    pub fn new(governor: Arc<FetchGovernor>) -> Self {
        Self {
            governor,
            data_base: DEFAULT_DATA_BASE.to_string(),
        }
    }

    pub fn with_data_base(mut self, base: impl Into<String>) -> Self {
        self.data_base = base.into();
        self
    }

    /// Fetch one record slice and decode it to HTML text. Every rejection is
    /// a page-level miss, logged and reported as `None`.
    pub async fn fetch_and_decode(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Option<String> {
        if length > MAX_COMPRESSED_LEN {
            debug!(filename, length, "record slice over compressed ceiling");
            return None;
        }

        let url = format!("{}/{}", self.data_base, filename);
        let response = match self.governor.fetch_range(&url, offset, length).await {
            Ok(response) => response,
            Err(err) => {
                debug!(filename, %err, "range fetch failed");
                return None;
            }
        };

        // A 200 here means the range header was ignored and we were about to
        // read a whole container file.
        if response.status.as_u16() != 206 {
            warn!(filename, status = response.status.as_u16(), "expected 206 partial content");
            return None;
        }
        let expected_prefix = format!("bytes {offset}-");
        if !response
            .content_range
            .as_deref()
            .is_some_and(|range| range.starts_with(&expected_prefix))
        {
            warn!(filename, "content-range does not match requested offset");
            return None;
        }

        match decode_record_slice(&response.body) {
            Ok(html) => Some(html),
            Err(err) => {
                debug!(filename, %err, "record slice rejected");
                None
            }
        }
    }
}

/// Decode one gzip-compressed container record into HTML text.
///
/// The slice wraps an archival header block and an embedded HTTP response;
/// both boundaries are located at the first CRLFCRLF (LFLF for malformed
/// captures). Only embedded 200 responses with an HTML signal survive.
pub fn decode_record_slice(compressed: &[u8]) -> Result<String, DecodeError> {
    let record = gunzip_limited(compressed, MAX_DECOMPRESSED_LEN)?;

    let (_, http_response) =
        split_at_boundary(&record).ok_or(DecodeError::MalformedContainer)?;
    let (header_block, body) =
        split_at_boundary(http_response).ok_or(DecodeError::MalformedContainer)?;

    let header_text = String::from_utf8_lossy(header_block);
    let mut lines = header_text.lines();
    let status_line = lines.next().ok_or(DecodeError::NoStatusLine)?;
    let status = parse_status_code(status_line).ok_or(DecodeError::NoStatusLine)?;
    if status != 200 {
        return Err(DecodeError::EmbeddedStatus(status));
    }

    let mut content_type: Option<String> = None;
    let mut transfer_encoding: Option<String> = None;
    let mut content_encoding: Option<String> = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-type" => content_type = Some(value),
            "transfer-encoding" => transfer_encoding = Some(value),
            "content-encoding" => content_encoding = Some(value),
            _ => {}
        }
    }

    let body = if transfer_encoding
        .as_deref()
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        // A malformed chunk stream falls back to the raw body rather than
        // dropping the page.
        dechunk(body).unwrap_or_else(|| body.to_vec())
    } else {
        body.to_vec()
    };

    let body = decode_content_encoding(&body, content_encoding.as_deref());

    let header_charset = content_type.as_deref().and_then(charset_from_params);
    let charset = header_charset.or_else(|| sniff_meta_charset(&body));
    let text = decode_text(&body, charset.as_deref());

    let claims_html = content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("html"));
    if !claims_html && !has_html_signal(&text) {
        return Err(DecodeError::NotHtml);
    }

    Ok(text)
}

fn gunzip_limited(compressed: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let decoder = flate2::read::MultiGzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| DecodeError::Envelope)?;
    if out.len() > limit {
        return Err(DecodeError::OversizedRecord);
    }
    if out.is_empty() {
        return Err(DecodeError::Envelope);
    }
    Ok(out)
}

/// Split at the first CRLFCRLF, falling back to LFLF for captures whose
/// line endings were mangled in transit.
fn split_at_boundary(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find_subslice(bytes, b"\r\n\r\n") {
        return Some((&bytes[..pos], &bytes[pos + 4..]));
    }
    find_subslice(bytes, b"\n\n").map(|pos| (&bytes[..pos], &bytes[pos + 2..]))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_status_code(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let protocol = parts.next()?;
    if !protocol.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Undo chunked transfer encoding: hex size-prefixed segments until a
/// zero-size segment.
fn dechunk(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    loop {
        let rest = &body[pos..];
        let (line_len, delim_len) = match find_subslice(rest, b"\r\n") {
            Some(idx) => (idx, 2),
            None => (find_subslice(rest, b"\n")?, 1),
        };
        let size_text = std::str::from_utf8(&rest[..line_len]).ok()?;
        let size_text = size_text.split(';').next()?.trim();
        let size = usize::from_str_radix(size_text, 16).ok()?;
        pos += line_len + delim_len;
        if size == 0 {
            return Some(out);
        }
        if pos + size > body.len() {
            return None;
        }
        out.extend_from_slice(&body[pos..pos + size]);
        pos += size;
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        } else if body[pos..].starts_with(b"\n") {
            pos += 1;
        }
    }
}

/// Undo Content-Encoding, tolerating failure by falling back to the raw
/// bytes.
fn decode_content_encoding(body: &[u8], encoding: Option<&str>) -> Vec<u8> {
    let Some(encoding) = encoding else {
        return body.to_vec();
    };
    let decoded = match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => {
            let mut out = Vec::new();
            flate2::read::MultiGzDecoder::new(body)
                .take(MAX_DECOMPRESSED_LEN as u64)
                .read_to_end(&mut out)
                .ok()
                .map(|_| out)
        }
        "br" => {
            let mut out = Vec::new();
            brotli::Decompressor::new(body, 4096)
                .take(MAX_DECOMPRESSED_LEN as u64)
                .read_to_end(&mut out)
                .ok()
                .map(|_| out)
        }
        "deflate" => {
            let mut out = Vec::new();
            let zlib_ok = flate2::read::ZlibDecoder::new(body)
                .take(MAX_DECOMPRESSED_LEN as u64)
                .read_to_end(&mut out)
                .is_ok();
            if zlib_ok {
                Some(out)
            } else {
                // Some servers send raw deflate without the zlib wrapper.
                let mut raw = Vec::new();
                flate2::read::DeflateDecoder::new(body)
                    .take(MAX_DECOMPRESSED_LEN as u64)
                    .read_to_end(&mut raw)
                    .ok()
                    .map(|_| raw)
            }
        }
        _ => None,
    };
    decoded.unwrap_or_else(|| body.to_vec())
}

fn charset_from_params(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let idx = lower.find("charset=")?;
    Some(read_charset_token(&lower[idx + "charset=".len()..]))
}

/// Sniff a `<meta charset=...>` / http-equiv declaration from the first
/// ~4KB of the body.
fn sniff_meta_charset(body: &[u8]) -> Option<String> {
    let window = &body[..body.len().min(4096)];
    let text = String::from_utf8_lossy(window).to_ascii_lowercase();
    let idx = text.find("charset=")?;
    let token = read_charset_token(&text[idx + "charset=".len()..]);
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn read_charset_token(after: &str) -> String {
    after
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        .collect()
}

fn decode_text(body: &[u8], charset: Option<&str>) -> String {
    if let Some(label) = charset {
        if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
            let (text, _, _) = encoding.decode(body);
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

fn has_html_signal(text: &str) -> bool {
    let probe = prefix_at_char_boundary(text, 16 * 1024).to_ascii_lowercase();
    probe.contains("<html") || probe.contains("<body") || probe.contains("<!doctype")
}

fn prefix_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Scan the archive index for ATS board URLs, newest crawls first.
/// Per-(provider, crawl) failures are swallowed; discovery returns whatever
/// succeeded.
pub async fn discover_boards(
    cdx: &CdxClient,
    crawl_ids: &[String],
    providers: &[AtsProvider],
    per_provider_cap: usize,
) -> Vec<AtsBoard> {
    let mut seen: HashSet<(AtsProvider, String)> = HashSet::new();
    let mut boards = Vec::new();

    for &provider in providers {
        let mut provider_count = 0usize;
        for crawl_id in crawl_ids {
            if provider_count >= per_provider_cap {
                break;
            }
            let prefix = provider.index_prefix();
            let records = match cdx
                .query(&CdxQuery {
                    url: &prefix,
                    crawl_id,
                    match_prefix: true,
                    limit: DISCOVERY_RESULT_CAP,
                })
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    warn!(provider = provider.as_str(), crawl_id, %err, "board discovery query failed");
                    continue;
                }
            };

            // Newest captures first so the first slug occurrence is also the
            // freshest one within the crawl.
            let mut records = records;
            records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

            for record in records {
                if provider_count >= per_provider_cap {
                    break;
                }
                if !record.status.as_deref().is_some_and(|s| s == "200") {
                    continue;
                }
                if !record
                    .effective_mime()
                    .is_some_and(|m| m.to_ascii_lowercase().contains("html"))
                {
                    continue;
                }
                let Some(slug) = provider.board_slug(&record.url) else {
                    continue;
                };
                if !seen.insert((provider, slug.clone())) {
                    continue;
                }
                boards.push(AtsBoard {
                    provider,
                    url: record.url,
                    slug,
                    crawl_id: crawl_id.clone(),
                    capture_timestamp: record.timestamp,
                });
                provider_count += 1;
            }
        }
    }

    boards
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn record(status: &str, mime: &str, length: u64, timestamp: &str) -> CdxRecord {
        CdxRecord {
            url: "https://example.com/".to_string(),
            timestamp: timestamp.to_string(),
            status: Some(status.to_string()),
            mime: Some(mime.to_string()),
            mime_detected: None,
            filename: Some("crawl-data/x.warc.gz".to_string()),
            offset: Some("100".to_string()),
            length: Some(length.to_string()),
            digest: None,
        }
    }

    #[test]
    fn status_200_outscores_redirect() {
        let ok = record("200", "text/html", 100_000, "20260101000000");
        let redirect = record("301", "text/html", 100_000, "20260101000000");
        assert!(score_capture(&ok) > score_capture(&redirect));
    }

    #[test]
    fn html_mime_outscores_non_html() {
        let html = record("200", "text/html", 100_000, "20260101000000");
        let pdf = record("200", "application/pdf", 100_000, "20260101000000");
        assert!(score_capture(&html) > score_capture(&pdf));
    }

    #[test]
    fn mime_containing_html_gets_partial_credit() {
        let exact = record("200", "text/html", 100_000, "20260101000000");
        let loose = record("200", "text/html; charset=utf-8", 100_000, "20260101000000");
        let none = record("200", "image/png", 100_000, "20260101000000");
        assert!(score_capture(&loose) < score_capture(&exact));
        assert!(score_capture(&loose) > score_capture(&none));
    }

    #[test]
    fn pick_best_prefers_newest_on_score_tie() {
        let older = record("200", "text/html", 100_000, "20250101000000");
        let newer = record("200", "text/html", 100_000, "20250601000000");
        let best = pick_best_capture(vec![older, newer.clone()]).unwrap();
        assert_eq!(best.timestamp, newer.timestamp);
    }

    #[test]
    fn pick_best_discards_unfetchable_candidates() {
        let mut incomplete = record("200", "text/html", 100_000, "20260101000000");
        incomplete.offset = None;
        let fallback = record("301", "text/html", 100_000, "20240101000000");
        let best = pick_best_capture(vec![incomplete, fallback.clone()]).unwrap();
        assert_eq!(best.status.as_deref(), Some("301"));
    }

    #[test]
    fn cdx_lines_parse_tolerantly() {
        let text = concat!(
            r#"{"url":"https://jobs.ashbyhq.com/acme","timestamp":"20260104120000","status":"200"}"#,
            "\n",
            "<html>index error page</html>\n",
            "\n",
            r#"{"url":"https://jobs.ashbyhq.com/beta","timestamp":"20260104120001","status":"200"}"#,
            "\n",
        );
        let records = parse_cdx_lines(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].url, "https://jobs.ashbyhq.com/beta");
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn chunked(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        // Two segments to exercise the hex-size loop.
        let mid = bytes.len() / 2;
        for part in [&bytes[..mid], &bytes[mid..]] {
            out.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
            out.extend_from_slice(part);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
        out
    }

    fn synthetic_record(http_response: &[u8]) -> Vec<u8> {
        let mut record = Vec::new();
        record.extend_from_slice(
            b"WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: https://example.com/\r\n\r\n",
        );
        record.extend_from_slice(http_response);
        gzip(&record)
    }

    #[test]
    fn decoder_round_trips_chunked_gzip_body() {
        let html = "<html><body><h1>Example Co</h1></body></html>";
        let body = chunked(&gzip(html.as_bytes()));
        let mut response = Vec::new();
        response.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\
              Transfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n",
        );
        response.extend_from_slice(&body);

        let decoded = decode_record_slice(&synthetic_record(&response)).unwrap();
        assert_eq!(decoded, html);
    }

    #[test]
    fn decoder_rejects_embedded_redirect() {
        let response = b"HTTP/1.1 301 Moved Permanently\r\nLocation: https://example.com/\r\n\r\n";
        let err = decode_record_slice(&synthetic_record(response)).unwrap_err();
        assert_eq!(err, DecodeError::EmbeddedStatus(301));
    }

    #[test]
    fn decoder_rejects_payload_without_html_signal() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":true}";
        let err = decode_record_slice(&synthetic_record(response)).unwrap_err();
        assert_eq!(err, DecodeError::NotHtml);
    }

    #[test]
    fn decoder_keeps_html_payload_with_wrong_content_type() {
        let response =
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n<!doctype html><html><body>hi</body></html>";
        let decoded = decode_record_slice(&synthetic_record(response)).unwrap();
        assert!(decoded.contains("<body>hi</body>"));
    }

    #[test]
    fn decoder_honors_meta_charset_sniff() {
        // "Müller" in ISO-8859-1; no charset in the header.
        let mut response: Vec<u8> = Vec::new();
        response.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n");
        response.extend_from_slice(b"<html><head><meta charset=\"iso-8859-1\"></head><body>M\xfcller</body></html>");
        let decoded = decode_record_slice(&synthetic_record(&response)).unwrap();
        assert!(decoded.contains("M\u{fc}ller"));
    }

    #[test]
    fn decoder_splits_on_lflf_fallback() {
        let response =
            b"HTTP/1.1 200 OK\nContent-Type: text/html\n\n<html><body>lf only</body></html>";
        let mut record = Vec::new();
        record.extend_from_slice(b"WARC/1.0\nWARC-Type: response\n\n");
        record.extend_from_slice(response);
        let decoded = decode_record_slice(&gzip(&record)).unwrap();
        assert!(decoded.contains("lf only"));
    }

    #[test]
    fn decoder_rejects_oversized_record() {
        let huge = vec![b'a'; MAX_DECOMPRESSED_LEN + 1];
        let err = decode_record_slice(&gzip(&huge)).unwrap_err();
        assert_eq!(err, DecodeError::OversizedRecord);
    }

    #[test]
    fn dechunk_handles_hex_sizes_and_trailers() {
        let body = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        assert_eq!(dechunk(body).unwrap(), b"hello world");
    }

    #[test]
    fn malformed_chunk_stream_returns_none() {
        assert!(dechunk(b"zz\r\nhello\r\n").is_none());
    }
}
