//! Concurrent, rate-limited source collector.
//!
//! Fetches every URL of a [`LinkSet`] with bounded concurrency, reduces each
//! response to plain text, and returns whatever succeeded together with one
//! error entry per URL that did not.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use scholarflow_shared::{CollectorConfig, LinkSet, Result, ScholarflowError};

use crate::extract::{SourceKind, extract_paragraphs, extract_title};

/// User-Agent string for collection requests.
const USER_AGENT: &str = concat!("scholarflow/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// CollectResult
// ---------------------------------------------------------------------------

/// One successfully collected source.
#[derive(Debug, Clone)]
pub struct CollectedSource {
    /// The URL as requested.
    pub url: String,
    /// `<title>` or first `<h1>` for HTML sources.
    pub title: Option<String>,
    /// Extracted text.
    pub content: String,
    pub kind: SourceKind,
}

/// Summary of a completed collection.
#[derive(Debug, Clone, Default)]
pub struct CollectResult {
    /// Sources in URL order.
    pub sources: Vec<CollectedSource>,
    /// Errors encountered (URL, error message).
    pub errors: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Fetches sources for the report step.
pub struct Collector {
    config: CollectorConfig,
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Collector {
    /// Create a new collector with the given configuration.
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScholarflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for tests against mock servers).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Fetch every link. Never fails as a whole: each failing URL is logged,
    /// skipped, and recorded in [`CollectResult::errors`].
    #[instrument(skip_all, fields(links = links.len()))]
    pub async fn collect(&self, links: &LinkSet) -> CollectResult {
        let start_time = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut seen = HashSet::<String>::new();
        let mut duplicates = 0usize;
        let mut result = CollectResult::default();

        info!(
            concurrency = self.config.concurrency,
            rate_limit_ms = self.config.rate_limit_ms,
            "starting source collection"
        );

        let mut handles = Vec::new();
        for link in links.iter() {
            let url = match Url::parse(link) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %link, error = %e, "invalid source URL, skipping");
                    result.errors.push((link.clone(), format!("invalid URL: {e}")));
                    continue;
                }
            };

            if !seen.insert(normalize_url(&url)) {
                debug!(%url, "duplicate source URL, skipping");
                duplicates += 1;
                continue;
            }

            if !self.allow_localhost && is_ssrf_target(&url) {
                warn!(%url, "SSRF protection: blocked");
                result.errors.push((link.clone(), "blocked by SSRF protection".into()));
                continue;
            }

            let client = self.client.clone();
            let sem = semaphore.clone();
            let rate_limit = self.config.rate_limit_ms;
            let min_chars = self.config.min_paragraph_chars;

            handles.push((
                link.clone(),
                tokio::spawn(async move {
                    let _permit = sem
                        .acquire()
                        .await
                        .map_err(|e| ScholarflowError::internal(format!("semaphore closed: {e}")))?;

                    // Rate limiting
                    if rate_limit > 0 {
                        tokio::time::sleep(Duration::from_millis(rate_limit)).await;
                    }

                    fetch_source(&client, &url, min_chars).await
                }),
            ));
        }

        // Collect results in URL order
        for (link, handle) in handles {
            match handle.await {
                Ok(Ok(source)) => result.sources.push(source),
                Ok(Err(e)) => {
                    warn!(url = %link, error = %e, "source fetch failed, skipping");
                    result.errors.push((link, e.to_string()));
                }
                Err(e) => {
                    warn!(url = %link, error = %e, "source fetch task failed, skipping");
                    result.errors.push((link, e.to_string()));
                }
            }
        }

        info!(
            sources = result.sources.len(),
            duplicates,
            errors = result.errors.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "source collection completed"
        );

        result
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Fetch a single source and reduce it to text.
async fn fetch_source(client: &Client, url: &Url, min_chars: usize) -> Result<CollectedSource> {
    debug!(%url, "fetching source");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| ScholarflowError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ScholarflowError::Network(format!("{url}: HTTP {status}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/html")
        .to_ascii_lowercase();

    let kind = SourceKind::from_content_type(&content_type).ok_or_else(|| {
        ScholarflowError::Network(format!("{url}: unsupported content type '{content_type}'"))
    })?;

    let body = response
        .text()
        .await
        .map_err(|e| ScholarflowError::Network(format!("{url}: body read failed: {e}")))?;

    let (title, content) = match kind {
        SourceKind::Html => (extract_title(&body), extract_paragraphs(&body, min_chars)),
        SourceKind::Text => (None, body.trim().to_string()),
    };

    if content.is_empty() {
        return Err(ScholarflowError::Network(format!("{url}: no usable content")));
    }

    Ok(CollectedSource {
        url: url.to_string(),
        title,
        content,
        kind,
    })
}

/// Normalize a URL for deduplication (strip fragment).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.to_string()
}

#[cfg(test)]
mod collector_tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CollectorConfig {
        CollectorConfig {
            concurrency: 2,
            rate_limit_ms: 0,
            timeout_secs: 5,
            min_paragraph_chars: 40,
            max_source_chars: 4000,
        }
    }

    const ARTICLE: &str = r#"<html><head><title>Ligand Field Models</title></head><body>
        <nav><p>Home</p></nav>
        <main>
            <p>Short.</p>
            <p>Machine learning models predict spin-state splittings of transition metal complexes.</p>
            <p>Graph neural networks encode metal-ligand connectivity directly from structures.</p>
        </main>
    </body></html>"#;

    #[test]
    fn test_ssrf_protection() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://127.0.0.1:8080/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://[::1]/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("https://pubs.acs.org/doi/10.1021/x").unwrap()));
    }

    #[tokio::test]
    async fn collects_sources_and_records_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(ARTICLE, "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/notes.md"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("# Notes\n\nRaw markdown is kept as is.\n", "text/markdown"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(vec![0x25, 0x50, 0x44, 0x46], "application/pdf"),
            )
            .mount(&server)
            .await;

        let links: LinkSet = ["/article", "/notes.md", "/missing", "/paper.pdf"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .chain(std::iter::once("not a url".to_string()))
            .collect();

        let collector = Collector::new(test_config()).unwrap().allow_localhost();
        let result = collector.collect(&links).await;

        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.errors.len(), 3);

        let article = result
            .sources
            .iter()
            .find(|s| s.url.ends_with("/article"))
            .expect("article collected");
        assert_eq!(article.title.as_deref(), Some("Ligand Field Models"));
        assert!(article.content.contains("spin-state splittings"));
        assert!(!article.content.contains("Short."));
        assert_eq!(article.kind, SourceKind::Html);

        let notes = result
            .sources
            .iter()
            .find(|s| s.url.ends_with("/notes.md"))
            .expect("notes collected");
        assert!(notes.content.starts_with("# Notes"));
        assert_eq!(notes.kind, SourceKind::Text);

        assert!(result.errors.iter().any(|(u, e)| u.ends_with("/missing") && e.contains("404")));
        assert!(result.errors.iter().any(|(_, e)| e.contains("unsupported content type")));
    }

    #[tokio::test]
    async fn blocks_private_hosts_by_default() {
        let links: LinkSet = ["http://127.0.0.1:9/secret".to_string()].into_iter().collect();
        let collector = Collector::new(test_config()).unwrap();
        let result = collector.collect(&links).await;
        assert!(result.sources.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].1.contains("SSRF"));
    }

    #[tokio::test]
    async fn fragment_variants_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(ARTICLE, "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let links: LinkSet = ["#intro", "#methods"]
            .iter()
            .map(|f| format!("{}/article{f}", server.uri()))
            .collect();

        let collector = Collector::new(test_config()).unwrap().allow_localhost();
        let result = collector.collect(&links).await;
        assert_eq!(result.sources.len(), 1);
        assert!(result.errors.is_empty());
    }
}
