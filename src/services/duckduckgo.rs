//! # DuckDuckGo Search
//!
//! Key-less fallback [`SearchService`] that scrapes the DuckDuckGo HTML
//! endpoint. Used when no FireCrawl key is configured.
//!
//! DuckDuckGo has no free JSON web-search API, so results are pulled out of
//! the `result__a` / `result__snippet` anchors of the HTML page. Result links
//! are redirect URLs carrying the real target in the `uddg` parameter.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{SearchHit, SearchService};
use crate::error::{status_error, ServiceError};

const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(max_results: usize) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchService for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError> {
        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        debug!(url = %url, "Fetching search results");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body = response.text().await?;
        let hits = parse_results(&body, self.max_results);

        if hits.is_empty() {
            warn!(query, "No search results found");
        } else {
            info!(query, count = hits.len(), "Search completed");
        }
        Ok(hits)
    }
}

/// Pull search hits out of a DuckDuckGo HTML result page.
fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let mut seen = HashSet::new();

    for block in html.split("class=\"result__a\"").skip(1) {
        if hits.len() >= max_results {
            break;
        }

        let Some(url) = attribute(block, "href").and_then(|href| resolve_link(&href)) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let title = anchor_text(block).unwrap_or_else(|| domain_of(&url));
        let description = block
            .find("result__snippet")
            .and_then(|at| anchor_text(&block[at..]))
            .unwrap_or_default();

        hits.push(SearchHit {
            url,
            title,
            description,
        });
    }

    hits
}

/// Value of the first `name="..."` attribute in `fragment`.
fn attribute(fragment: &str, name: &str) -> Option<String> {
    let marker = format!("{name}=\"");
    let start = fragment.find(&marker)? + marker.len();
    let end = fragment[start..].find('"')?;
    Some(decode_entities(&fragment[start..start + end]))
}

/// Text between the end of the current tag and the next `</a>`, tags stripped.
fn anchor_text(fragment: &str) -> Option<String> {
    let open_end = fragment.find('>')? + 1;
    let close = fragment[open_end..].find("</a>")?;
    let text = decode_entities(&strip_tags(&fragment[open_end..open_end + close]));
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Turn a result href into the target URL.
fn resolve_link(href: &str) -> Option<String> {
    let target = match href.split_once("uddg=") {
        Some((_, rest)) => {
            let encoded = rest.split('&').next().unwrap_or(rest);
            urlencoding::decode(encoded).ok()?.into_owned()
        }
        None if href.starts_with("//") => format!("https:{href}"),
        None => href.to_string(),
    };

    (target.starts_with("http") && !target.contains("duckduckgo.com")).then_some(target)
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

fn domain_of(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_string()
}
