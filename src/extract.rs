//! Per-topic text extraction.
//!
//! One topic is one document: the title from the first page plus the
//! stripped text of every post body across all of the topic's pages,
//! concatenated in page order with a newline after each post. Pagination
//! within a topic is strictly sequential and never leaves the dataset host.

use std::time::Duration;

use scraper::Html;
use tokio::time::sleep;
use url::Url;

use crate::config::DatasetConfig;
use crate::engine::EngineProfile;
use crate::http::{FetchError, FetchedPage, HttpClient};
use crate::pagination::next_page_url;
use crate::selector::SelectorSpec;

const TEXT_SEPARATOR: &str = "\n";

/// What processing one topic produced.
#[derive(Debug)]
pub enum TopicOutcome {
    /// Raw text (not yet length-checked) and the title found on page one.
    Extracted { text: String, title: String },
    Skipped(SkipReason),
}

/// Why a topic produced no text. The reason string lands in logs and the
/// skip flag lands in the visited table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyVisited,
    Robots,
    Error,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyVisited => "visited",
            Self::Robots => "robots.txt",
            Self::Error => "error",
        }
    }
}

/// Worker-local extractor: borrows the worker's own HTTP session plus the
/// shared read-only profile and config.
pub struct TopicExtractor<'a> {
    pub http: &'a HttpClient,
    pub config: &'a DatasetConfig,
    pub profile: &'a EngineProfile,
    pub delay: Duration,
}

impl TopicExtractor<'_> {
    /// Fetch a topic and every one of its pages, returning the concatenated
    /// post text and the page-one title.
    pub async fn extract(&self, topic_url: &Url) -> TopicOutcome {
        let first = match self.fetch_page(topic_url).await {
            Ok(page) => page,
            Err(reason) => return TopicOutcome::Skipped(reason),
        };

        let mut current_url = first.final_url.clone();
        let (title, mut text, mut next) = {
            let html = Html::parse_document(&self.decode(&first));
            let title = first_non_empty_text(&html, &self.profile.title);
            let text = collect_post_text(&html, &self.profile.body);
            let next = next_page_url(&current_url, &html, &self.profile.pagination);
            (title, text, next)
        };
        if text.is_empty() {
            tracing::warn!("no post bodies matched on {topic_url}");
        }
        sleep(self.delay).await;

        let mut page_num = 1usize;
        let mut seen_pages = std::collections::HashSet::new();
        seen_pages.insert(current_url.to_string());
        while let Some(next_url) = next {
            if !self.config.same_host(&next_url) {
                tracing::debug!("topic pagination left the host, stopping: {next_url}");
                break;
            }
            if !seen_pages.insert(next_url.to_string()) {
                tracing::debug!("pagination revisited {next_url}, stopping");
                break;
            }
            let page = match self.fetch_page(&next_url).await {
                Ok(page) => page,
                Err(_) => {
                    tracing::warn!("failed to fetch page {} of {topic_url}", page_num + 1);
                    break;
                }
            };
            page_num += 1;
            tracing::debug!("page {page_num} of topic {topic_url}: {next_url}");
            current_url = page.final_url.clone();
            next = {
                let html = Html::parse_document(&self.decode(&page));
                text.push_str(&collect_post_text(&html, &self.profile.body));
                next_page_url(&current_url, &html, &self.profile.pagination)
            };
            sleep(self.delay).await;
        }

        if text.trim().is_empty() {
            return TopicOutcome::Skipped(SkipReason::Error);
        }
        TopicOutcome::Extracted { text, title }
    }

    async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, SkipReason> {
        match self.http.get(url).await {
            Ok(page) if page.ok() && !page.body.is_empty() => Ok(page),
            Ok(page) if page.ok() => {
                tracing::warn!("empty body from {url}");
                Err(SkipReason::Error)
            }
            Ok(page) => {
                tracing::warn!("{url} returned {}", page.status);
                Err(SkipReason::Error)
            }
            Err(FetchError::BodyTooLarge(url)) => {
                tracing::warn!("{url} skipped: body exceeds the size cap");
                Err(SkipReason::Error)
            }
            Err(err) => {
                tracing::warn!("fetch failed: {err}");
                Err(SkipReason::Error)
            }
        }
    }

    /// Decode a response body: the forced encoding when configured, else the
    /// advertised charset, else UTF-8. Decoding never fails outright —
    /// malformed sequences are replaced and the text is kept.
    fn decode(&self, page: &FetchedPage) -> String {
        let label = self
            .config
            .forced_encoding
            .as_deref()
            .or(page.charset.as_deref());

        if let Some(label) = label {
            if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
                let (text, _, had_errors) = encoding.decode(&page.body);
                if had_errors {
                    tracing::error!(
                        "response from {} had malformed {} sequences, replaced",
                        page.final_url,
                        encoding.name()
                    );
                }
                return text.into_owned();
            }
            tracing::warn!("unknown encoding label `{label}`, falling back to UTF-8");
        }

        match String::from_utf8(page.body.clone()) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(
                    "response from {} is not valid UTF-8 ({err}), decoding lossily",
                    page.final_url
                );
                String::from_utf8_lossy(&page.body).into_owned()
            }
        }
    }
}

/// First selector with any matches wins; each matched element contributes
/// its stripped text plus a separator.
fn collect_post_text(html: &Html, body_selectors: &[SelectorSpec]) -> String {
    for spec in body_selectors {
        let posts = spec.select(html);
        if posts.is_empty() {
            continue;
        }
        let mut text = String::new();
        for post in posts {
            let post_text = element_text(post);
            let trimmed = post_text.trim();
            if !trimmed.is_empty() {
                text.push_str(trimmed);
                text.push_str(TEXT_SEPARATOR);
            }
        }
        if !text.is_empty() {
            return text;
        }
    }
    String::new()
}

/// First non-empty stripped text across the title selectors.
fn first_non_empty_text(html: &Html, title_selectors: &[SelectorSpec]) -> String {
    for spec in title_selectors {
        for element in spec.select(html) {
            let text = element_text(element);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}

fn element_text(element: scraper::ElementRef) -> String {
    element.text().collect::<String>()
}
