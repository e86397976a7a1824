use std::sync::Arc;
use webprobe_core::{
    FetchBackend, FetchRequest, FetchResult, Result, Scenario, SearchProvider, SearchQuery,
    SearchResult,
};

pub mod config;
pub mod extract;
pub mod fault;
pub mod fetch;
pub mod openai_compat;
pub mod perturb;
pub mod retry;
pub mod search;

pub use fetch::PageFetcher;
pub use openai_compat::ChatGateway;
pub use perturb::Perturber;
pub use search::SearchClient;

/// The web search tool set handed to the evaluation harness: search plus page fetch, sharing
/// one perturbation stream.
#[derive(Debug, Clone)]
pub struct WebTools {
    search: SearchClient,
    fetcher: PageFetcher,
}

impl WebTools {
    pub fn new(search: SearchClient, fetcher: PageFetcher) -> Self {
        Self { search, fetcher }
    }

    /// Build everything from the environment. Configuration is read here and nowhere else.
    pub fn from_env() -> Result<Self> {
        let perturber = Arc::new(Perturber::from_env());
        let faults = Arc::new(fault::FaultInjector::from_env());
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| webprobe_core::Error::Search(e.to_string()))?;
        tracing::debug!(
            perturbation = perturber.is_enabled(),
            fault_injection = faults.is_enabled(),
            "web tools configured"
        );
        let search = SearchClient::from_env(client, perturber.clone());
        let fetcher = PageFetcher::new(perturber, faults)?;
        Ok(Self::new(search, fetcher))
    }

    pub fn load_scenario(&mut self, scenario: &Scenario) {
        self.search.load_scenario(scenario);
    }

    pub fn search_client(&self) -> &SearchClient {
        &self.search
    }

    pub async fn search_engine_query(&self, q: &SearchQuery) -> Vec<SearchResult> {
        self.search.query(q).await
    }

    pub async fn fetch_url_content(&self, url: &str, mode: &str) -> Result<FetchResult> {
        self.fetcher.fetch_url_content(url, mode).await
    }

    pub async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult> {
        self.fetcher.fetch(req).await
    }
}
