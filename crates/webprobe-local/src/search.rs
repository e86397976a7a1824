use crate::config::{env, env_either, show_snippet_from_env};
use crate::perturb::Perturber;
use crate::retry::RetryPolicy;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use webprobe_core::{Error, Result, Scenario, SearchProvider, SearchQuery, SearchResult};

pub const SERPER_DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";
pub const SERPAPI_DEFAULT_ENDPOINT: &str = "https://serpapi.com/search";

/// Serper returns at most this many hits per request.
const SERPER_MAX_NUM: usize = 10;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

fn serper_api_key_from_env() -> Option<String> {
    env_either("WEBPROBE_SERPER_API_KEY", "SERPER_API_KEY")
}

fn serpapi_api_key_from_env() -> Option<String> {
    env_either("WEBPROBE_SERPAPI_API_KEY", "SERPAPI_API_KEY")
}

/// Which credentials are present, without exposing them.
pub fn configured_backends() -> (bool, bool) {
    (
        serper_api_key_from_env().is_some(),
        serpapi_api_key_from_env().is_some(),
    )
}

#[derive(Debug, Clone)]
pub struct SerperBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Clone)]
pub struct SerpApiBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SerperBackend {
    pub fn new(client: reqwest::Client, api_key: String, endpoint: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: endpoint.unwrap_or_else(|| SERPER_DEFAULT_ENDPOINT.to_string()),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serper_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured("missing WEBPROBE_SERPER_API_KEY (or SERPER_API_KEY)".to_string())
        })?;
        Ok(Self::new(client, api_key, env("WEBPROBE_SERPER_ENDPOINT")))
    }

    fn payload(q: &SearchQuery) -> Value {
        // Serper wants gl/hl country codes; region is not mapped.
        serde_json::json!({
            "q": q.keywords,
            "num": q.max_results.min(SERPER_MAX_NUM),
        })
    }

    async fn request(&self, q: &SearchQuery) -> Result<Value> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&Self::payload(q))
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("serper HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Error::Search(format!("serper HTTP {status}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| Error::Search(format!("serper returned a malformed payload: {e}")))
    }
}

impl SerpApiBackend {
    pub fn new(client: reqwest::Client, api_key: String, endpoint: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: endpoint.unwrap_or_else(|| SERPAPI_DEFAULT_ENDPOINT.to_string()),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serpapi_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing WEBPROBE_SERPAPI_API_KEY (or SERPAPI_API_KEY)".to_string(),
            )
        })?;
        Ok(Self::new(client, api_key, env("WEBPROBE_SERPAPI_ENDPOINT")))
    }

    fn params<'a>(&'a self, q: &'a SearchQuery) -> [(&'static str, &'a str); 5] {
        [
            ("engine", "duckduckgo"),
            ("q", q.keywords.as_str()),
            ("kl", q.region.as_str()),
            ("api_key", self.api_key.as_str()),
            ("output", "json"),
        ]
    }

    async fn request(&self, q: &SearchQuery) -> Result<Value> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&self.params(q))
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("serpapi HTTP {status}")));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(Error::Search(format!("serpapi HTTP {status}")));
            }
            Err(e) => {
                return Err(Error::Search(format!(
                    "serpapi returned a malformed payload: {e}"
                )));
            }
        };

        // SerpApi often reports failures (rate limits included) inline with a 200.
        if let Some(err) = parsed.get("error") {
            let msg = match err {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if msg.contains("429") {
                return Err(Error::RateLimited(format!("serpapi: {msg}")));
            }
            return Err(Error::Search(format!("serpapi HTTP {status}: {msg}")));
        }
        if !status.is_success() {
            return Err(Error::Search(format!("serpapi HTTP {status}")));
        }
        Ok(parsed)
    }
}

/// The configured search backend. Serper wins when both credentials are present.
#[derive(Debug, Clone)]
pub enum SearchBackend {
    Serper(SerperBackend),
    SerpApi(SerpApiBackend),
}

impl SearchBackend {
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        if let Ok(b) = SerperBackend::from_env(client.clone()) {
            return Some(Self::Serper(b));
        }
        SerpApiBackend::from_env(client).ok().map(Self::SerpApi)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Serper(_) => "serper",
            Self::SerpApi(_) => "serpapi",
        }
    }

    fn results_field(&self) -> &'static str {
        match self {
            Self::Serper(_) => "organic",
            Self::SerpApi(_) => "organic_results",
        }
    }

    async fn request(&self, q: &SearchQuery) -> Result<Value> {
        match self {
            Self::Serper(b) => b.request(q).await,
            Self::SerpApi(b) => b.request(q).await,
        }
    }
}

fn str_field<'a>(entry: &'a Value, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Turn a backend payload into result records.
///
/// Takes the first `max_results` entries of `payload[field]`, then drops any without a title
/// or link. Backend order is kept.
pub fn normalize_results(
    payload: &Value,
    field: &str,
    max_results: usize,
    show_snippet: bool,
    perturber: &Perturber,
) -> Vec<SearchResult> {
    let Some(entries) = payload.get(field).and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.iter().take(max_results) {
        let title = str_field(entry, "title");
        let href = str_field(entry, "link");
        if title.is_empty() || href.is_empty() {
            continue;
        }
        let body = show_snippet.then(|| {
            let snippet = str_field(entry, "snippet");
            if snippet.is_empty() {
                String::new()
            } else {
                perturber.apply(snippet)
            }
        });
        out.push(SearchResult {
            title: title.to_string(),
            href: href.to_string(),
            body,
        });
    }
    out
}

/// Keyword search over the configured backend.
///
/// Never fails: a missing backend, a non-rate-limit error or an odd payload all yield an
/// empty list. Rate limits are retried until they clear.
#[derive(Debug, Clone)]
pub struct SearchClient {
    backend: Option<SearchBackend>,
    retry: RetryPolicy,
    show_snippet: bool,
    perturber: Arc<Perturber>,
}

impl SearchClient {
    pub fn new(backend: Option<SearchBackend>, perturber: Arc<Perturber>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            show_snippet: true,
            perturber,
        }
    }

    pub fn from_env(client: reqwest::Client, perturber: Arc<Perturber>) -> Self {
        Self::new(SearchBackend::from_env(client), perturber)
            .with_show_snippet(show_snippet_from_env())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_show_snippet(mut self, show_snippet: bool) -> Self {
        self.show_snippet = show_snippet;
        self
    }

    pub fn load_scenario(&mut self, scenario: &Scenario) {
        self.show_snippet = scenario.show_snippet;
    }

    pub fn show_snippet(&self) -> bool {
        self.show_snippet
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(SearchBackend::name)
    }

    pub async fn search_engine_query(&self, q: &SearchQuery) -> Vec<SearchResult> {
        let Some(backend) = &self.backend else {
            tracing::warn!(
                "no search API key configured; set WEBPROBE_SERPER_API_KEY or WEBPROBE_SERPAPI_API_KEY"
            );
            return Vec::new();
        };

        let t0 = Instant::now();
        let mut backoff = self.retry.start();
        let mut attempts = 0u32;
        let payload = loop {
            attempts += 1;
            match backend.request(q).await {
                Ok(v) => break v,
                Err(Error::RateLimited(msg)) => {
                    let wait = backoff.next_wait();
                    tracing::warn!(
                        backend = backend.name(),
                        attempt = attempts,
                        "{msg}; retrying in {:.1}s",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    tracing::error!(
                        backend = backend.name(),
                        "{e}; not a rate-limit error, not retrying"
                    );
                    return Vec::new();
                }
            }
        };

        let out = normalize_results(
            &payload,
            backend.results_field(),
            q.max_results,
            self.show_snippet,
            &self.perturber,
        );
        tracing::debug!(
            backend = backend.name(),
            attempts,
            results = out.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "search finished"
        );
        out
    }
}

#[async_trait::async_trait]
impl SearchProvider for SearchClient {
    fn name(&self) -> &'static str {
        self.backend_name().unwrap_or("none")
    }

    async fn query(&self, q: &SearchQuery) -> Vec<SearchResult> {
        self.search_engine_query(q).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerturbConfig;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode as AxStatus},
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    fn serper_client(addr: SocketAddr) -> SearchClient {
        let backend = SerperBackend::new(
            reqwest::Client::new(),
            "test-key".to_string(),
            Some(format!("http://{addr}/search")),
        );
        SearchClient::new(
            Some(SearchBackend::Serper(backend)),
            Arc::new(Perturber::disabled()),
        )
        .with_retry_policy(fast_retry())
    }

    fn serpapi_client(addr: SocketAddr) -> SearchClient {
        let backend = SerpApiBackend::new(
            reqwest::Client::new(),
            "test-key".to_string(),
            Some(format!("http://{addr}/search")),
        );
        SearchClient::new(
            Some(SearchBackend::SerpApi(backend)),
            Arc::new(Perturber::disabled()),
        )
        .with_retry_policy(fast_retry())
    }

    fn organic(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                serde_json::json!({
                    "title": format!("Result {i}"),
                    "link": format!("https://example.com/{i}"),
                    "snippet": format!("snippet {i}"),
                })
            })
            .collect()
    }

    #[test]
    fn normalize_drops_entries_without_title_or_link() {
        let payload = serde_json::json!({
            "organic": [
                {"title": "A", "link": "https://a.example", "snippet": "sa"},
                {"title": "", "link": "https://b.example"},
                {"link": "https://c.example", "snippet": "no title"},
                {"title": "D"},
                {"title": 5, "link": "https://e.example"},
                {"title": "F", "link": "https://f.example"}
            ]
        });
        let p = Perturber::disabled();
        let out = normalize_results(&payload, "organic", 10, true, &p);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "A");
        assert_eq!(out[0].body.as_deref(), Some("sa"));
        assert_eq!(out[1].href, "https://f.example");
        assert_eq!(out[1].body.as_deref(), Some(""));
    }

    #[test]
    fn normalize_truncates_before_filtering() {
        let payload = serde_json::json!({
            "organic_results": [
                {"title": "A", "link": "https://a.example"},
                {"title": "", "link": "https://b.example"},
                {"title": "C", "link": "https://c.example"},
                {"title": "D", "link": "https://d.example"}
            ]
        });
        let p = Perturber::disabled();
        let out = normalize_results(&payload, "organic_results", 3, true, &p);
        let titles: Vec<_> = out.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
    }

    #[test]
    fn normalize_handles_missing_empty_and_wrong_shapes() {
        let p = Perturber::disabled();
        for payload in [
            serde_json::json!({}),
            serde_json::json!({"organic": []}),
            serde_json::json!({"organic": null}),
            serde_json::json!({"organic": "nope"}),
            serde_json::json!([1, 2, 3]),
        ] {
            assert!(normalize_results(&payload, "organic", 10, true, &p).is_empty());
        }
    }

    #[test]
    fn normalize_omits_body_when_snippets_hidden() {
        let payload = serde_json::json!({ "organic": organic(3) });
        let p = Perturber::disabled();
        let out = normalize_results(&payload, "organic", 10, false, &p);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r.body.is_none()));
    }

    #[test]
    fn normalize_perturbs_snippets() {
        let payload = serde_json::json!({
            "organic": [{"title": "T", "link": "https://t.example", "snippet": "hello world"}]
        });
        let p = Perturber::new(PerturbConfig {
            enabled: true,
            rate: 1.0,
            pool: vec!["X".to_string()],
            seed: 42,
        });
        let out = normalize_results(&payload, "organic", 10, true, &p);
        assert_eq!(out[0].body.as_deref(), Some("hello X  world X "));
        assert_eq!(out[0].title, "T");
    }

    #[test]
    fn serper_payload_caps_num_at_ten() {
        let q = SearchQuery::new("rust").with_max_results(25);
        assert_eq!(
            SerperBackend::payload(&q),
            serde_json::json!({"q": "rust", "num": 10})
        );
        let q = SearchQuery::new("rust").with_max_results(3);
        assert_eq!(SerperBackend::payload(&q)["num"], 3);
    }

    #[tokio::test]
    async fn no_backend_yields_empty_list() {
        let c = SearchClient::new(None, Arc::new(Perturber::disabled()));
        assert_eq!(c.name(), "none");
        assert!(c.query(&SearchQuery::new("anything")).await.is_empty());
    }

    #[tokio::test]
    async fn serper_retries_429_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/search",
            post({
                let hits = hits.clone();
                move |headers: HeaderMap, Json(body): Json<Value>| {
                    let hits = hits.clone();
                    async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        let key = headers
                            .get("x-api-key")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("");
                        if key != "test-key" || body["q"] != "rust async" {
                            return (AxStatus::BAD_REQUEST, Json(serde_json::json!({})));
                        }
                        if n < 3 {
                            return (
                                AxStatus::TOO_MANY_REQUESTS,
                                Json(serde_json::json!({"message": "slow down"})),
                            );
                        }
                        (AxStatus::OK, Json(serde_json::json!({ "organic": organic(4) })))
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let c = serper_client(addr);
        assert_eq!(c.name(), "serper");

        let out = c.query(&SearchQuery::new("rust async")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].title, "Result 0");
        assert_eq!(out[0].href, "https://example.com/0");
        assert_eq!(out[0].body.as_deref(), Some("snippet 0"));
    }

    #[tokio::test]
    async fn serper_server_error_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/search",
            post({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (AxStatus::INTERNAL_SERVER_ERROR, "boom")
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let out = serper_client(addr).query(&SearchQuery::new("x")).await;
        assert!(out.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serper_malformed_payload_is_empty() {
        let app = Router::new().route("/search", post(|| async { "not json at all" }));
        let addr = serve(app).await;
        assert!(serper_client(addr)
            .query(&SearchQuery::new("x"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn serper_respects_max_results_and_snippet_flag() {
        let app = Router::new().route(
            "/search",
            post(|| async { Json(serde_json::json!({ "organic": organic(8) })) }),
        );
        let addr = serve(app).await;
        let mut c = serper_client(addr);
        c.load_scenario(&Scenario {
            show_snippet: false,
        });
        let out = c
            .query(&SearchQuery::new("x").with_max_results(5))
            .await;
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|r| r.body.is_none()));
    }

    #[tokio::test]
    async fn serpapi_retries_inline_rate_limit_and_passes_region() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/search",
            get({
                let hits = hits.clone();
                move |Query(params): Query<HashMap<String, String>>| {
                    let hits = hits.clone();
                    async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        let ok = params.get("engine").map(String::as_str) == Some("duckduckgo")
                            && params.get("kl").map(String::as_str) == Some("de-de")
                            && params.get("api_key").map(String::as_str) == Some("test-key")
                            && params.get("q").map(String::as_str) == Some("wetter");
                        if !ok {
                            return Json(serde_json::json!({"error": "bad params"}));
                        }
                        if n == 0 {
                            return Json(serde_json::json!({
                                "error": "429: hourly throughput limit exceeded"
                            }));
                        }
                        Json(serde_json::json!({ "organic_results": organic(2) }))
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let c = serpapi_client(addr);
        assert_eq!(c.name(), "serpapi");
        let out = c
            .query(&SearchQuery::new("wetter").with_region("de-de"))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].title, "Result 1");
    }

    #[tokio::test]
    async fn serpapi_http_429_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/search",
            get({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                            return (AxStatus::TOO_MANY_REQUESTS, Json(serde_json::json!({})));
                        }
                        (
                            AxStatus::OK,
                            Json(serde_json::json!({ "organic_results": organic(1) })),
                        )
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let out = serpapi_client(addr).query(&SearchQuery::new("x")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn serpapi_inline_non_rate_limit_error_is_empty() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/search",
            get({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (
                            AxStatus::UNAUTHORIZED,
                            Json(serde_json::json!({"error": "Invalid API key."})),
                        )
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let out = serpapi_client(addr).query(&SearchQuery::new("x")).await;
        assert!(out.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
