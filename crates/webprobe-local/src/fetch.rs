use crate::extract::{html_to_markdown, html_visible_text, MARKDOWN_WIDTH};
use crate::fault::FaultInjector;
use crate::perturb::Perturber;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, UPGRADE_INSECURE_REQUESTS,
};
use std::sync::Arc;
use std::time::Duration;
use webprobe_core::{
    validate_http_url, Error, FetchBackend, FetchMode, FetchRequest, FetchResult, Result,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

const FETCH_ERROR_PREFIX: &str = "An error occurred while fetching";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36";

const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
     image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

fn browser_headers() -> HeaderMap {
    // Accept-Encoding is left to reqwest so it can decode gzip/brotli/deflate itself.
    let mut h = HeaderMap::new();
    h.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    h.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    h.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    h.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
    h.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
    h.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    h.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    h.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    h
}

/// Fetches a page with browser-like headers and renders it as raw, markdown or visible text.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    perturber: Arc<Perturber>,
    faults: Arc<FaultInjector>,
}

impl PageFetcher {
    pub fn new(perturber: Arc<Perturber>, faults: Arc<FaultInjector>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(browser_headers())
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            perturber,
            faults,
        })
    }

    /// String-typed entry point, as tools are called with JSON arguments.
    ///
    /// The URL is checked first, then the mode; both fail before any network traffic.
    pub async fn fetch_url_content(&self, url: &str, mode: &str) -> Result<FetchResult> {
        validate_http_url(url)?;
        let mode: FetchMode = mode.parse()?;
        self.fetch(&FetchRequest::new(url, mode)).await
    }

    async fn get_text(&self, url: url::Url) -> std::result::Result<String, reqwest::Error> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        resp.text().await
    }

    fn render(&self, body: &str, mode: FetchMode) -> String {
        let text = match mode {
            FetchMode::Raw => return self.perturber.apply(body),
            FetchMode::Markdown => html_to_markdown(body, MARKDOWN_WIDTH),
            FetchMode::Truncate => html_visible_text(body),
        };
        self.perturber.apply(&text)
    }
}

#[async_trait::async_trait]
impl FetchBackend for PageFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult> {
        req.validate()?;
        let url = match req.parse_url() {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(url = %req.url, "unparseable url: {e}");
                return Ok(FetchResult::Error(format!(
                    "{FETCH_ERROR_PREFIX} {}: Invalid URL: {e}",
                    req.url
                )));
            }
        };
        let body = match self.get_text(url).await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(url = %req.url, "fetch failed: {e}");
                return Ok(FetchResult::Error(format!(
                    "{FETCH_ERROR_PREFIX} {}: {e}",
                    req.url
                )));
            }
        };
        if let Some(msg) = self.faults.maybe_fail(&req.url) {
            tracing::debug!(url = %req.url, "simulated fetch failure");
            return Ok(FetchResult::Error(msg));
        }
        Ok(FetchResult::Content(self.render(&body, req.mode)))
    }
}
