use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::errors::SearchError;
use crate::models::SearchResult;

const INSTRUCTION: &str = "Here are the real-time web search results provided for your reference. \
                           Please synthesize and answer the user's question based on this information. \
                           If the results are irrelevant, rely on your own knowledge.";
const RESULTS_HEADER: &str = "--- Web Search Results ---";
const RESULTS_FOOTER: &str = "--- End of Search Results ---";

// Hit-highlighting markers the search provider wraps around matched terms.
const HIGHLIGHT_MARKERS: [char; 2] = ['\u{e50a}', '\u{e50b}'];

#[derive(Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default, rename = "webPages")]
    web_pages: Option<WebPages>,
}

#[derive(Debug, Deserialize)]
struct WebPages {
    #[serde(default)]
    value: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebPage {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

impl From<WebPage> for SearchResult {
    fn from(page: WebPage) -> Self {
        let title = page
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "No Title".to_string());
        let snippet = page
            .summary
            .filter(|s| !s.trim().is_empty())
            .or(page.snippet)
            .unwrap_or_else(|| "No content available.".to_string());
        Self { title, snippet: clean_snippet(&snippet) }
    }
}

/// Client for the web-search service.
#[derive(Clone)]
pub struct WebSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    count: usize,
    timeout: Duration,
}

impl WebSearchClient {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            count: config.result_count,
            timeout: config.timeout,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let response = self
            .http
            .post(format!("{}/web-search", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&SearchBody { query, count: self.count })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let parsed: SearchResponse = serde_json::from_str(&body)?;
        if parsed.code != 200 {
            return Err(SearchError::Api {
                code: parsed.code,
                message: parsed.msg.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        let results: Vec<SearchResult> = parsed
            .data
            .and_then(|d| d.web_pages)
            .map(|w| w.value)
            .unwrap_or_default()
            .into_iter()
            .take(self.count)
            .map(SearchResult::from)
            .collect();

        if results.is_empty() {
            return Err(SearchError::Empty);
        }
        Ok(results)
    }

    fn classify(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Timeout { seconds: self.timeout.as_secs() }
        } else {
            SearchError::Network(e)
        }
    }
}

/// Rewrites the user's question to carry web-search context.
#[derive(Clone)]
pub struct PromptAugmenter {
    search: WebSearchClient,
}

impl PromptAugmenter {
    pub fn new(search: WebSearchClient) -> Self {
        Self { search }
    }

    /// Returns `query` untouched when disabled or when the search fails in any way.
    pub async fn augment(&self, query: &str, enabled: bool) -> String {
        if !enabled {
            return query.to_string();
        }

        debug!("Running web search for prompt augmentation");
        match self.search.search(query).await {
            Ok(results) => {
                info!("Web search returned {} results", results.len());
                build_prompt(query, &results)
            }
            Err(e) => {
                warn!("Web search unavailable, using the plain question: {e}");
                query.to_string()
            }
        }
    }
}

pub fn build_prompt(query: &str, results: &[SearchResult]) -> String {
    let listing = results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] Title: {}\n    Content: {}", i + 1, r.title, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{INSTRUCTION}\n\n{RESULTS_HEADER}\n\n{listing}\n\n{RESULTS_FOOTER}\n\nUser's Question: {query}"
    )
}

pub fn clean_snippet(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && !HIGHLIGHT_MARKERS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}
