use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl Error {
    /// Input errors are the only ones a tool surfaces to its caller.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::InvalidUrl(_) | Error::UnsupportedMode(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Region code meaning "no region".
pub const DEFAULT_REGION: &str = "wt-wt";
pub const DEFAULT_MAX_RESULTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl SearchQuery {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            max_results: DEFAULT_MAX_RESULTS,
            region: DEFAULT_REGION.to_string(),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

/// One normalized search hit. `title` and `href` are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    /// Present only when snippet display is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Raw,
    Markdown,
    Truncate,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Raw => "raw",
            FetchMode::Markdown => "markdown",
            FetchMode::Truncate => "truncate",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(FetchMode::Raw),
            "markdown" => Ok(FetchMode::Markdown),
            "truncate" => Ok(FetchMode::Truncate),
            other => Err(Error::UnsupportedMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub mode: FetchMode,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, mode: FetchMode) -> Self {
        Self {
            url: url.into(),
            mode,
        }
    }

    /// Checks the scheme only. Never touches the network.
    pub fn validate(&self) -> Result<()> {
        validate_http_url(&self.url)
    }

    /// Full parse. A malformed URL with an accepted scheme is a fetch failure, not an input
    /// error, so this is kept apart from [`FetchRequest::validate`].
    pub fn parse_url(&self) -> std::result::Result<url::Url, url::ParseError> {
        url::Url::parse(&self.url)
    }
}

/// Accept only `http://` and `https://` URLs.
pub fn validate_http_url(raw: &str) -> Result<()> {
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(Error::InvalidUrl(raw.to_string()));
    }
    Ok(())
}

/// Outcome of a fetch: exactly one of `content` or `error`.
///
/// Serializes as `{"content": "..."}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchResult {
    Content(String),
    Error(String),
}

impl FetchResult {
    pub fn content(&self) -> Option<&str> {
        match self {
            FetchResult::Content(s) => Some(s),
            FetchResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FetchResult::Content(_) => None,
            FetchResult::Error(s) => Some(s),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FetchResult::Error(_))
    }
}

/// Per-scenario knobs pushed in by the evaluation harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_show_snippet")]
    pub show_snippet: bool,
}

fn default_show_snippet() -> bool {
    true
}

impl Default for Scenario {
    fn default() -> Self {
        Self { show_snippet: true }
    }
}

/// A search tool. Failures degrade to an empty list; they are never surfaced.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn query(&self, q: &SearchQuery) -> Vec<SearchResult>;
}

/// A page fetch tool. Only input errors are returned as `Err`; network failures come back as
/// `FetchResult::Error`.
#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_defaults() {
        let q = SearchQuery::new("rust");
        assert_eq!(q.max_results, 10);
        assert_eq!(q.region, "wt-wt");

        let q: SearchQuery = serde_json::from_str(r#"{"keywords":"rust"}"#).unwrap();
        assert_eq!(q, SearchQuery::new("rust"));
    }

    #[test]
    fn search_result_omits_missing_body() {
        let r = SearchResult {
            title: "T".to_string(),
            href: "https://example.com".to_string(),
            body: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("body").is_none());
        assert_eq!(v["href"], "https://example.com");
    }

    #[test]
    fn fetch_mode_parses_known_names_only() {
        assert_eq!("raw".parse::<FetchMode>().unwrap(), FetchMode::Raw);
        assert_eq!(
            "markdown".parse::<FetchMode>().unwrap(),
            FetchMode::Markdown
        );
        assert_eq!(
            "truncate".parse::<FetchMode>().unwrap(),
            FetchMode::Truncate
        );
        let err = "bogus".parse::<FetchMode>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedMode(ref m) if m == "bogus"));
        assert!(err.is_input_error());
        assert!("RAW".parse::<FetchMode>().is_err());
    }

    #[test]
    fn fetch_result_is_a_single_key_object() {
        let ok = serde_json::to_value(FetchResult::Content("hi".to_string())).unwrap();
        assert_eq!(ok, serde_json::json!({"content": "hi"}));
        let bad = serde_json::to_value(FetchResult::Error("boom".to_string())).unwrap();
        assert_eq!(bad, serde_json::json!({"error": "boom"}));
    }

    #[test]
    fn validate_rejects_non_http_schemes() {
        assert!(matches!(
            validate_http_url("ftp://example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_http_url("example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(validate_http_url("https://example.com/a?b=c").is_ok());
        let req = FetchRequest::new("http://localhost:8080/", FetchMode::Raw);
        assert!(req.validate().is_ok());
        assert_eq!(req.parse_url().unwrap().port(), Some(8080));
    }

    #[test]
    fn malformed_urls_with_http_scheme_pass_the_scheme_check() {
        for raw in ["http://", "http://exa mple.com/", "https://[::1"] {
            let req = FetchRequest::new(raw, FetchMode::Raw);
            assert!(req.validate().is_ok(), "{raw}");
            assert!(req.parse_url().is_err(), "{raw}");
        }
    }

    #[test]
    fn scenario_defaults_to_showing_snippets() {
        let s: Scenario = serde_json::from_str("{}").unwrap();
        assert!(s.show_snippet);
        let s: Scenario = serde_json::from_str(r#"{"show_snippet": false}"#).unwrap();
        assert!(!s.show_snippet);
    }
}
