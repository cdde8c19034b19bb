//! Text sources
//!
//! Resolve a place to plain text: local files are read as UTF-8, web pages
//! are fetched and stripped down to their visible text lines.

use std::time::Duration;

use async_trait::async_trait;
use ontofill_core::{OntofillError, Result, TextSource};
use scraper::{ElementRef, Html};

/// Reads places as local UTF-8 files
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTextSource;

#[async_trait]
impl TextSource for FileTextSource {
    async fn get_text(&self, place: &str) -> Result<String> {
        tokio::fs::read_to_string(place)
            .await
            .map_err(|e| OntofillError::fetch(place, e))
    }
}

// ============================================================================
// Web pages
// ============================================================================

/// Subtrees that never carry article text
const SKIPPED_ELEMENTS: &[&str] = &[
    "nav", "footer", "aside", "header", "script", "style", "noscript", "template", "iframe",
];

/// Elements that start a new line
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "table", "section", "article", "main", "blockquote", "pre", "dd", "dt", "figcaption",
];

const USER_AGENT: &str = concat!("ontofill/", env!("CARGO_PKG_VERSION"));

/// Fetches places as URLs and converts the HTML to text
#[derive(Debug, Clone)]
pub struct WebTextSource {
    client: reqwest::Client,
}

impl WebTextSource {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| OntofillError::ConfigError(format!("HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TextSource for WebTextSource {
    async fn get_text(&self, place: &str) -> Result<String> {
        let response = self
            .client
            .get(place)
            .send()
            .await
            .map_err(|e| OntofillError::fetch(place, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OntofillError::fetch(place, format!("HTTP {status}")));
        }

        let html = response
            .text()
            .await
            .map_err(|e| OntofillError::fetch(place, format!("Failed to read body: {e}")))?;

        let text = html_to_text(&html);
        tracing::debug!(place, html_len = html.len(), text_len = text.len(), "Page fetched");
        Ok(text)
    }
}

/// Visible text of an HTML document as trimmed, non-empty lines
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }

            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                out.push('\n');
            }
            collect_text(child, out);
            if block {
                out.push('\n');
            }
        }
    }
}
