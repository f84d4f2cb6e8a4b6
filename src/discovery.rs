//! Topic discovery: turning a forum base URL into the set of topic URLs to
//! scrape.
//!
//! Three routes, tried in order. A topics table persisted by a previous run
//! wins outright (resume). Otherwise the sitemap tree is walked — seeded by
//! the operator override, the robots.txt hints, or the homepage. Only when
//! the sitemaps yield nothing does discovery fall back to a breadth-first
//! crawl of the forum's thread listings, collecting topic anchors page by
//! page. Whatever the route, every kept URL is on the dataset host and has
//! passed the allow/deny filters and the robots gate.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use scraper::{ElementRef, Html};
use tokio::time::sleep;
use url::Url;

use crate::config::DatasetConfig;
use crate::error::{Result, ScrapeError};
use crate::http::HttpClient;
use crate::pagination::next_page_url;
use crate::robots::RobotsGate;
use crate::selector::SelectorSpec;
use crate::sitemap::SitemapWalker;
use crate::state::{StateStore, TopicRecord};

pub struct Discovery<'a> {
    config: &'a DatasetConfig,
    gate: &'a RobotsGate,
    http: &'a HttpClient,
    delay: Duration,
}

impl<'a> Discovery<'a> {
    pub fn new(config: &'a DatasetConfig, gate: &'a RobotsGate, http: &'a HttpClient) -> Self {
        let delay = Duration::from_secs_f64(gate.effective_delay(config.delay_secs).max(0.0));
        Self {
            config,
            gate,
            http,
            delay,
        }
    }

    /// Produce (and persist) the topics table.
    pub async fn run(&self, state: &StateStore) -> Result<Vec<TopicRecord>> {
        if state.has_topics() {
            tracing::info!("topics table already on disk, skipping discovery");
            return state.load_topics();
        }

        let mut topics = self.from_sitemaps().await?;
        if topics.is_empty() {
            tracing::warn!(
                "sitemaps yielded no topic URLs, crawling {} listings manually",
                self.config.engine
            );
            topics = self.crawl_forum().await?;
        }

        if topics.is_empty() {
            return Err(ScrapeError::NoTopics(self.config.base_url.to_string()));
        }

        let records: Vec<TopicRecord> = topics
            .into_iter()
            .map(|(url, title)| TopicRecord { url, title })
            .collect();
        state.save_topics(&records)?;
        tracing::info!("discovery finished with {} topic(s)", records.len());
        Ok(records)
    }

    /// Sitemap route: walk every seed and keep the pages that pass the
    /// topic filters. Titles are unknown here; the scraper extracts them.
    async fn from_sitemaps(&self) -> Result<IndexMap<String, String>> {
        let walker = SitemapWalker::new(self.http)?;
        let mut seeds: Vec<Url> = Vec::new();

        if !self.config.sitemaps.is_empty() {
            for raw in &self.config.sitemaps {
                match Url::parse(raw) {
                    Ok(url) => seeds.push(url),
                    Err(_) => tracing::warn!("ignoring unparsable sitemap override `{raw}`"),
                }
            }
        } else if !self.gate.sitemaps().is_empty() {
            for raw in self.gate.sitemaps() {
                if let Ok(url) = Url::parse(raw) {
                    seeds.push(url);
                }
            }
        } else {
            seeds.push(self.config.site_root());
        }

        let profile = self.config.profile();
        let mut topics = IndexMap::new();
        let trees = join_all(seeds.iter().map(|seed| walker.collect_pages(seed))).await;
        for page in trees.into_iter().flatten() {
            if !self.config.same_host(&page) {
                tracing::debug!("sitemap URL off-host, dropped: {page}");
                continue;
            }
            if !profile.topic_href_ok(page.as_str()) {
                continue;
            }
            if !self.gate.allowed(page.as_str()) {
                tracing::debug!("sitemap URL denied by robots: {page}");
                continue;
            }
            topics.entry(page.to_string()).or_insert_with(String::new);
        }
        Ok(topics)
    }

    /// Crawl route: breadth-first over thread listings, following listing
    /// pagination, collecting topic anchors along the way.
    async fn crawl_forum(&self) -> Result<IndexMap<String, String>> {
        let profile = self.config.profile();
        let mut queue: VecDeque<Url> = VecDeque::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut fetched: HashSet<String> = HashSet::new();
        let mut topics: IndexMap<String, String> = IndexMap::new();

        let base = self.config.base_url.clone();
        queued.insert(base.to_string());
        queue.push_back(base);

        while let Some(listing) = queue.pop_front() {
            let mut page_url = listing;
            // Walk this listing's pagination chain before the next listing.
            loop {
                if !fetched.insert(page_url.to_string()) {
                    break;
                }
                let page = match self.http.get(&page_url).await {
                    Ok(page) if page.ok() => page,
                    Ok(page) => {
                        tracing::warn!("listing {page_url} returned {}", page.status);
                        break;
                    }
                    Err(err) => {
                        tracing::warn!("listing {page_url} failed: {err}");
                        break;
                    }
                };
                let html = Html::parse_document(&String::from_utf8_lossy(&page.body));

                let found_topics = self.collect_anchors(
                    &html,
                    &profile.topics,
                    |href| profile.topic_href_ok(href),
                );
                if found_topics.is_empty() {
                    tracing::debug!("no topic anchors on {page_url}, treating as sub-forum index");
                }
                for (url, title) in found_topics {
                    topics
                        .entry(url.to_string())
                        .and_modify(|t| {
                            if t.is_empty() && !title.is_empty() {
                                *t = title.clone();
                            }
                        })
                        .or_insert(title);
                }

                let found_threads = self.collect_anchors(
                    &html,
                    &profile.threads,
                    |href| profile.thread_href_ok(href),
                );
                for (url, title) in found_threads {
                    if queued.insert(url.to_string()) {
                        tracing::debug!("queueing thread `{title}` at {url}");
                        queue.push_back(url);
                    }
                }

                tracing::info!(
                    "crawled {page_url}: {} topic(s) so far, {} listing(s) queued",
                    topics.len(),
                    queue.len()
                );
                sleep(self.delay).await;

                match next_page_url(&page_url, &html, &profile.pagination) {
                    Some(next) if self.config.same_host(&next) => page_url = next,
                    Some(next) => {
                        tracing::debug!("listing pagination left the host, stopping: {next}");
                        break;
                    }
                    None => break,
                }
            }
        }

        Ok(topics)
    }

    /// Anchors under the given selectors that pass `href_ok`, the robots
    /// gate and host confinement, resolved to absolute URLs with their
    /// stripped anchor text.
    fn collect_anchors<F>(
        &self,
        html: &Html,
        specs: &[SelectorSpec],
        href_ok: F,
    ) -> Vec<(Url, String)>
    where
        F: Fn(&str) -> bool,
    {
        let mut found = Vec::new();
        for spec in specs {
            for element in spec.select(html) {
                for anchor in anchors_of(element) {
                    let Some(href) = anchor.value().attr("href") else {
                        continue;
                    };
                    if !href_ok(href) {
                        continue;
                    }
                    let Ok(url) = self.config.base_url.join(href) else {
                        tracing::debug!("unresolvable href dropped: {href}");
                        continue;
                    };
                    if !self.config.same_host(&url) {
                        continue;
                    }
                    if !self.gate.allowed(url.as_str()) {
                        tracing::debug!("denied by robots: {url}");
                        continue;
                    }
                    let title = anchor.text().collect::<String>().trim().to_string();
                    found.push((url, title));
                }
            }
        }
        found
    }
}

/// The element itself when it is an anchor with an href, otherwise every
/// anchor in its subtree.
fn anchors_of(element: ElementRef) -> Vec<ElementRef> {
    if element.value().name().eq_ignore_ascii_case("a") && element.value().attr("href").is_some() {
        return vec![element];
    }
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name().eq_ignore_ascii_case("a") && el.value().attr("href").is_some())
        .collect()
}
