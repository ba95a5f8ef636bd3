use crate::config::SearchConfig;
use crate::filters::ImageFilters;
use crate::http::{build_client, clip_text};
use crate::models::ImageVariant;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Timeout,
    Transport,
    RateLimited,
    Upstream,
    NoResults,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ResolveError {
    kind: ErrorKind,
    message: String,
}

impl ResolveError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Input,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: "Search API rate limited (429)".into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Upstream,
            message: message.into(),
        }
    }

    pub fn no_results() -> Self {
        Self {
            kind: ErrorKind::NoResults,
            message: "No images returned".into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Per-call retry bookkeeping. The attempt counter is carried in the state
/// itself; only timeouts and rate limiting earn another attempt, and only
/// while the attempt budget lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Retrying { attempt: u8 },
    Succeeded,
    Failed(ErrorKind),
}

impl RetryState {
    pub fn attempt_number(&self) -> u8 {
        match self {
            RetryState::Pending => 1,
            RetryState::Retrying { attempt } => *attempt,
            RetryState::Succeeded | RetryState::Failed(_) => 0,
        }
    }

    pub fn on_success(self) -> Self {
        RetryState::Succeeded
    }

    pub fn on_error(self, kind: ErrorKind, max_attempts: u8) -> Self {
        let attempt = self.attempt_number();
        match kind {
            ErrorKind::Timeout | ErrorKind::RateLimited if attempt < max_attempts => {
                RetryState::Retrying {
                    attempt: attempt + 1,
                }
            }
            _ => RetryState::Failed(kind),
        }
    }
}

static MIME_EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("image/jpeg", ".jpg"),
        ("image/jpg", ".jpg"),
        ("image/png", ".png"),
        ("image/gif", ".gif"),
        ("image/webp", ".webp"),
        ("image/bmp", ".bmp"),
        ("image/tiff", ".tiff"),
        ("image/x-icon", ".ico"),
        ("image/svg+xml", ".svg"),
    ])
});

/// File extension for a `content-type` header value, `.jpg` when unknown.
pub fn extension_for_mime(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    MIME_EXTENSIONS.get(essence.as_str()).copied().unwrap_or(".jpg")
}

/// Strips the characters that are unsafe in archive entry names.
pub fn sanitize_item_id(item_id: &str) -> String {
    item_id
        .chars()
        .filter(|ch| !matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}

/// Lowercased host with any leading `www.` removed; `None` for unparseable
/// URLs.
pub fn normalize_host(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// `"https://www.Nike.com/"` → `"nike.com"`.
pub fn clean_site(site: &str) -> String {
    let mut value = site.trim().to_lowercase();
    if let Some(rest) = value.split_once("://").map(|(_, rest)| rest.to_string()) {
        value = rest;
    }
    if let Some(rest) = value.strip_prefix("www.") {
        value = rest.to_string();
    }
    value.trim_end_matches('/').to_string()
}

pub fn clean_sites(sites: &str) -> Vec<String> {
    sites
        .split(',')
        .map(clean_site)
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn build_query(query_text: &str, sites: &[String]) -> String {
    if sites.is_empty() {
        return query_text.to_string();
    }
    let scoped = sites
        .iter()
        .map(|site| format!("site:{site}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("{query_text} ({scoped})")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub image: Option<SearchResultImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResultImage {
    #[serde(rename = "thumbnailLink", default)]
    pub thumbnail_link: String,
}

/// Resolves image variants from the paginated search API and from direct
/// URLs. Holds its own clients so each call type keeps its own timeout.
pub struct VariantResolver {
    config: SearchConfig,
    search_client: Client,
    probe_client: Client,
}

impl VariantResolver {
    pub fn new(config: SearchConfig) -> Self {
        let search_client = build_client(config.request_timeout);
        let probe_client = build_client(config.probe_timeout);
        Self {
            config,
            search_client,
            probe_client,
        }
    }

    /// One search call with the retry state machine applied. Result count is
    /// capped at the upstream per-call maximum.
    pub async fn search_raw(
        &self,
        query: &str,
        count: usize,
        filters: &ImageFilters,
        start: usize,
    ) -> Result<Vec<SearchResult>, ResolveError> {
        if self.config.api_key.is_empty() {
            return Err(ResolveError::input("Search API key not configured"));
        }

        let mut state = RetryState::Pending;
        loop {
            let attempt = state.attempt_number();
            debug!(
                target = "itemgen.search",
                query, start, attempt, "search request"
            );
            let result = self.search_once(query, count, filters, start).await;
            state = match &result {
                Ok(_) => state.on_success(),
                Err(err) => state.on_error(err.kind(), self.config.max_attempts),
            };
            match state {
                RetryState::Retrying { attempt } => {
                    if let Err(err) = &result {
                        warn!(
                            target = "itemgen.search",
                            error = %err,
                            attempt,
                            "search retry"
                        );
                    }
                }
                _ => return result,
            }
        }
    }

    async fn search_once(
        &self,
        query: &str,
        count: usize,
        filters: &ImageFilters,
        start: usize,
    ) -> Result<Vec<SearchResult>, ResolveError> {
        let num = count.min(self.config.page_size);
        let mut params = vec![
            ("key", self.config.api_key.clone()),
            ("cx", self.config.engine_id.clone()),
            ("q", query.to_string()),
            ("searchType", "image".to_string()),
            ("num", num.to_string()),
            ("start", start.to_string()),
        ];
        params.extend(filters.as_params());

        let response = self
            .search_client
            .get(&self.config.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(classify_search_error)?;

        if response.status().as_u16() == 429 {
            return Err(ResolveError::rate_limited());
        }
        if !response.status().is_success() {
            return Err(ResolveError::transport(format!(
                "Search API error: HTTP {}",
                response.status()
            )));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| ResolveError::transport(format!("Search API error: {err}")))?;
        if let Some(error) = payload.error {
            return Err(ResolveError::upstream(format!("Search API error: {error}")));
        }
        if payload.items.is_empty() {
            return Err(ResolveError::no_results());
        }
        Ok(payload.items)
    }

    /// Search-based resolution for up to `desired` variants starting at the
    /// 1-based `start` offset. Partial results with no error are success; the
    /// caller checks the count.
    pub async fn resolve_by_search(
        &self,
        query_text: &str,
        item_id: &str,
        sites: &[String],
        desired: usize,
        filters: &ImageFilters,
        start: usize,
    ) -> (Vec<ImageVariant>, Option<ResolveError>) {
        let query = build_query(query_text, sites);
        match self.search_raw(&query, desired, filters, start).await {
            Ok(results) => {
                let variants = map_results_to_variants(&results, query_text, item_id, desired, start);
                (variants, None)
            }
            Err(err) => (Vec::new(), Some(err)),
        }
    }

    /// Pagination wrapper over `resolve_by_search`; one call suffices when
    /// `desired` fits a single page.
    pub async fn resolve_search_paged(
        &self,
        query_text: &str,
        item_id: &str,
        sites: &[String],
        desired: usize,
        filters: &ImageFilters,
        start: usize,
    ) -> (Vec<ImageVariant>, Option<ResolveError>) {
        if desired <= self.config.page_size {
            return self
                .resolve_by_search(query_text, item_id, sites, desired, filters, start)
                .await;
        }

        let resolver = self;
        collect_pages(
            move |batch, page_start| {
                resolver.resolve_by_search(query_text, item_id, sites, batch, filters, page_start)
            },
            self.config.page_size,
            desired,
            start,
        )
        .await
    }

    /// Direct-URL resolution: fetches the URL to confirm reachability and
    /// that it actually serves an image, then derives the slot file name from
    /// the response content type.
    pub async fn resolve_by_url(
        &self,
        url: &str,
        item_id: &str,
        label: &str,
    ) -> Result<ImageVariant, ResolveError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ResolveError::input("Empty URL"));
        }

        let response = self
            .probe_client
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;
        if !response.status().is_success() {
            return Err(ResolveError::upstream(format!(
                "Failed to download: HTTP {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.starts_with("image/") {
            return Err(ResolveError::upstream(format!(
                "URL does not point to an image (content-type: {content_type})"
            )));
        }

        let extension = extension_for_mime(&content_type);
        let source = normalize_host(url).unwrap_or_else(|| "Direct URL".to_string());
        let file_name = format!(
            "{}_{}{}",
            sanitize_item_id(item_id),
            label.to_lowercase(),
            extension
        );

        Ok(ImageVariant {
            file_name,
            original_url: url.to_string(),
            preview_url: url.to_string(),
            description: format!("{label} Image from {source}"),
            short_description: format!("{label} Image"),
            source,
            item_id: item_id.to_string(),
            is_placeholder: false,
        })
    }

    /// Sentinel variant substituted when a URL slot cannot be resolved, so
    /// every requested slot always yields exactly one entry.
    pub fn placeholder(item_id: &str, label: &str) -> ImageVariant {
        ImageVariant {
            file_name: format!(
                "{}_{}_placeholder",
                sanitize_item_id(item_id),
                label.to_lowercase()
            ),
            original_url: String::new(),
            preview_url: String::new(),
            source: "Failed".to_string(),
            short_description: format!("{label} Image"),
            description: format!("{label} Image - Failed to load"),
            item_id: item_id.to_string(),
            is_placeholder: true,
        }
    }
}

/// Pagination loop over a page-fetch call: requests up to `page_size` results
/// at a time, advances the start offset by the number of variants each page
/// actually returned so sequence suffixes stay gap-free, stops on exhaustion
/// (a short page) or when an erroring call contributes nothing, and truncates
/// to `desired`.
async fn collect_pages<F, Fut>(
    mut fetch_page: F,
    page_size: usize,
    desired: usize,
    start: usize,
) -> (Vec<ImageVariant>, Option<ResolveError>)
where
    F: FnMut(usize, usize) -> Fut,
    Fut: std::future::Future<Output = (Vec<ImageVariant>, Option<ResolveError>)>,
{
    let mut collected: Vec<ImageVariant> = Vec::new();
    let mut remaining = desired;
    let mut current_start = start;
    let mut last_error = None;

    while remaining > 0 && collected.len() < desired {
        let batch = remaining.min(page_size);
        let (variants, error) = fetch_page(batch, current_start).await;
        let returned = variants.len();
        if let Some(err) = error {
            last_error = Some(err);
            if returned == 0 {
                break;
            }
        }
        collected.extend(variants);
        remaining = remaining.saturating_sub(returned);
        current_start += returned;
        if returned < batch {
            break;
        }
    }

    collected.truncate(desired);
    (collected, last_error)
}

fn classify_search_error(err: reqwest::Error) -> ResolveError {
    if err.is_timeout() {
        ResolveError::timeout("Search API timeout")
    } else {
        let message = clip_text(err.to_string(), 80);
        ResolveError::transport(format!("Search API error: {message}"))
    }
}

fn classify_request_error(err: reqwest::Error) -> ResolveError {
    if err.is_timeout() {
        ResolveError::timeout("Timeout downloading image")
    } else {
        let message = clip_text(err.to_string(), 80);
        ResolveError::transport(format!("Failed to download: {message}"))
    }
}

/// Maps raw search results into variants. The sequence suffix is the start
/// offset plus the index within the batch, so suffixes stay unique across
/// paginated calls; results without a link are skipped but still consume
/// their index.
pub(crate) fn map_results_to_variants(
    results: &[SearchResult],
    query_text: &str,
    item_id: &str,
    desired: usize,
    start: usize,
) -> Vec<ImageVariant> {
    let base = sanitize_item_id(item_id);
    let mut variants = Vec::new();
    for (idx, result) in results.iter().enumerate() {
        if result.link.is_empty() {
            continue;
        }
        let variant_number = start + idx;
        let thumbnail = result
            .image
            .as_ref()
            .map(|img| img.thumbnail_link.clone())
            .filter(|link| !link.is_empty())
            .unwrap_or_else(|| result.link.clone());
        variants.push(ImageVariant {
            file_name: format!("{base}_v{variant_number:02}"),
            original_url: result.link.clone(),
            preview_url: thumbnail,
            source: normalize_host(&result.link).unwrap_or_default(),
            short_description: query_text.to_string(),
            description: query_text.to_string(),
            item_id: item_id.to_string(),
            is_placeholder: false,
        });
        if variants.len() >= desired {
            break;
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(link: &str) -> SearchResult {
        SearchResult {
            link: link.to_string(),
            image: Some(SearchResultImage {
                thumbnail_link: format!("{link}?thumb"),
            }),
        }
    }

    #[test]
    fn sanitize_strips_forbidden_characters() {
        assert_eq!(sanitize_item_id(r#"AB:12/34?*"<>|"#), "AB1234");
        assert_eq!(sanitize_item_id("plain-id_9"), "plain-id_9");
    }

    #[test]
    fn normalize_host_strips_www_and_lowercases() {
        assert_eq!(
            normalize_host("https://WWW.Example.COM/img/a.jpg").as_deref(),
            Some("example.com")
        );
        assert_eq!(normalize_host("not a url"), None);
    }

    #[test]
    fn clean_sites_handles_scheme_and_trailing_slash() {
        assert_eq!(
            clean_sites("https://www.Nike.com/, amazon.com , "),
            vec!["nike.com", "amazon.com"]
        );
    }

    #[test]
    fn query_joins_sites_with_or_clauses() {
        let sites = vec!["nike.com".to_string(), "amazon.com".to_string()];
        assert_eq!(
            build_query("Running Shoe", &sites),
            "Running Shoe (site:nike.com OR site:amazon.com)"
        );
        assert_eq!(build_query("Running Shoe", &[]), "Running Shoe");
    }

    #[test]
    fn variant_suffixes_stay_gap_free_across_pages() {
        let page: Vec<SearchResult> = (0..10)
            .map(|i| result(&format!("https://example.com/{i}.jpg")))
            .collect();
        let mut all = Vec::new();
        all.extend(map_results_to_variants(&page, "q", "ITEM1", 10, 1));
        all.extend(map_results_to_variants(&page, "q", "ITEM1", 10, 11));
        all.extend(map_results_to_variants(&page[..5], "q", "ITEM1", 5, 21));

        assert_eq!(all.len(), 25);
        let names: Vec<&str> = all.iter().map(|v| v.file_name.as_str()).collect();
        for (idx, name) in names.iter().enumerate() {
            assert_eq!(*name, format!("ITEM1_v{:02}", idx + 1));
        }
        let unique: std::collections::HashSet<&&str> = names.iter().collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn linkless_results_consume_their_sequence_number() {
        let results = vec![
            result("https://example.com/a.jpg"),
            SearchResult {
                link: String::new(),
                image: None,
            },
            result("https://example.com/b.jpg"),
        ];
        let variants = map_results_to_variants(&results, "q", "X", 5, 1);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].file_name, "X_v01");
        assert_eq!(variants[1].file_name, "X_v03");
    }

    #[test]
    fn mapping_stops_at_desired_count() {
        let results: Vec<SearchResult> = (0..10)
            .map(|i| result(&format!("https://example.com/{i}.jpg")))
            .collect();
        let variants = map_results_to_variants(&results, "q", "X", 3, 1);
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[2].file_name, "X_v03");
    }

    fn page(start: usize, count: usize) -> Vec<ImageVariant> {
        let results: Vec<SearchResult> = (0..count)
            .map(|i| result(&format!("https://example.com/{}.jpg", start + i)))
            .collect();
        map_results_to_variants(&results, "q", "X", count, start)
    }

    #[tokio::test]
    async fn paging_advances_start_by_returned_counts_and_stops_on_short_page() {
        use std::cell::RefCell;
        use std::collections::VecDeque;

        let pages = RefCell::new(VecDeque::from(vec![page(1, 10), page(11, 5)]));
        let calls = RefCell::new(Vec::new());
        let (variants, error) = collect_pages(
            |batch, start| {
                calls.borrow_mut().push((batch, start));
                let next = pages.borrow_mut().pop_front().unwrap_or_default();
                async move { (next, None) }
            },
            10,
            25,
            1,
        )
        .await;

        assert!(error.is_none());
        assert_eq!(variants.len(), 15);
        assert_eq!(*calls.borrow(), vec![(10, 1), (10, 11)]);
        assert_eq!(variants[0].file_name, "X_v01");
        assert_eq!(variants[14].file_name, "X_v15");
    }

    #[tokio::test]
    async fn paging_keeps_earlier_pages_when_a_later_call_fails() {
        use std::cell::RefCell;
        use std::collections::VecDeque;

        let pages: RefCell<VecDeque<(Vec<ImageVariant>, Option<ResolveError>)>> =
            RefCell::new(VecDeque::from(vec![
                (page(1, 10), None),
                (Vec::new(), Some(ResolveError::rate_limited())),
            ]));
        let (variants, error) = collect_pages(
            |_batch, _start| {
                let next = pages.borrow_mut().pop_front().unwrap_or_default();
                async move { next }
            },
            10,
            25,
            1,
        )
        .await;

        assert_eq!(variants.len(), 10);
        assert_eq!(variants[9].file_name, "X_v10");
        assert_eq!(error.unwrap().kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn paging_truncates_over_delivery_to_the_desired_count() {
        use std::cell::RefCell;
        use std::collections::VecDeque;

        let pages = RefCell::new(VecDeque::from(vec![page(1, 10), page(11, 10)]));
        let (variants, error) = collect_pages(
            |_batch, _start| {
                let next = pages.borrow_mut().pop_front().unwrap_or_default();
                async move { (next, None) }
            },
            10,
            12,
            1,
        )
        .await;

        assert!(error.is_none());
        assert_eq!(variants.len(), 12);
        assert_eq!(variants[11].file_name, "X_v12");
    }

    #[test]
    fn retry_state_budgets_timeouts_and_rate_limits() {
        let max = 3;
        let state = RetryState::Pending.on_error(ErrorKind::Timeout, max);
        assert_eq!(state, RetryState::Retrying { attempt: 2 });
        let state = state.on_error(ErrorKind::RateLimited, max);
        assert_eq!(state, RetryState::Retrying { attempt: 3 });
        let state = state.on_error(ErrorKind::Timeout, max);
        assert_eq!(state, RetryState::Failed(ErrorKind::Timeout));
    }

    #[test]
    fn success_is_terminal_from_any_state() {
        assert_eq!(RetryState::Pending.on_success(), RetryState::Succeeded);
        assert_eq!(
            RetryState::Retrying { attempt: 2 }.on_success(),
            RetryState::Succeeded
        );
    }

    #[test]
    fn retry_state_fails_fast_on_hard_errors() {
        for kind in [ErrorKind::Transport, ErrorKind::Upstream, ErrorKind::NoResults] {
            assert_eq!(
                RetryState::Pending.on_error(kind, 3),
                RetryState::Failed(kind)
            );
        }
    }

    #[test]
    fn placeholder_has_sentinel_shape() {
        let variant = VariantResolver::placeholder("AB/1", "URL1");
        assert!(variant.is_placeholder);
        assert_eq!(variant.file_name, "AB1_url1_placeholder");
        assert_eq!(variant.source, "Failed");
        assert!(variant.original_url.is_empty());
        assert!(variant.preview_url.is_empty());
        assert_eq!(variant.description, "URL1 Image - Failed to load");
    }

    #[test]
    fn mime_extension_falls_back_to_jpg() {
        assert_eq!(extension_for_mime("image/png; charset=binary"), ".png");
        assert_eq!(extension_for_mime("image/webp"), ".webp");
        assert_eq!(extension_for_mime("application/pdf"), ".jpg");
        assert_eq!(extension_for_mime(""), ".jpg");
    }

    #[tokio::test]
    async fn blank_url_is_an_input_error() {
        let resolver = VariantResolver::new(crate::config::AppConfig::from_env().search);
        let err = resolver.resolve_by_url("   ", "X", "URL1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(err.message(), "Empty URL");
    }
}
