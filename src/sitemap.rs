//! A small sitemap tree walker.
//!
//! Given a seed — a sitemap URL from robots.txt, an operator override, or
//! just the forum homepage — the walker descends through `<sitemapindex>`
//! documents and collects every page URL from the `<urlset>` leaves.
//! Gzipped sitemaps (`.xml.gz`) are decompressed transparently. The walker
//! is deliberately tolerant: forum software loves serving sitemaps as PHP
//! endpoints with odd content types, so detection is by document content,
//! not by URL shape or headers.

use std::collections::HashSet;
use std::io::Read;

use async_recursion::async_recursion;
use regex::Regex;
use url::Url;

use crate::http::HttpClient;

const MAX_DEPTH: usize = 8;

/// Well-known locations probed when the seed is a homepage rather than a
/// sitemap document.
const PROBE_PATHS: &[&str] = &["sitemap.xml", "sitemap_index.xml", "sitemap.php"];

pub struct SitemapWalker<'a> {
    http: &'a HttpClient,
    loc: Regex,
}

impl<'a> SitemapWalker<'a> {
    pub fn new(http: &'a HttpClient) -> crate::error::Result<Self> {
        // <loc> contents; tolerant of attributes, whitespace and CDATA.
        let loc = Regex::new(r"(?is)<loc[^>]*>\s*(?:<!\[CDATA\[)?\s*(.*?)\s*(?:\]\]>)?\s*</loc>")
            .map_err(|e| crate::error::ScrapeError::Config(format!("sitemap regex: {e}")))?;
        Ok(Self { http, loc })
    }

    /// Collect every page URL reachable from the seed's sitemap tree.
    /// Failures along the way shrink the result instead of aborting: an
    /// empty result simply sends discovery down the HTML-crawl path.
    pub async fn collect_pages(&self, seed: &Url) -> Vec<Url> {
        let mut pages = Vec::new();
        let mut visited = HashSet::new();

        let looks_like_sitemap = seed.path().to_ascii_lowercase().contains("sitemap");
        if looks_like_sitemap {
            self.walk(seed.clone(), 0, &mut visited, &mut pages).await;
        } else {
            for probe in PROBE_PATHS {
                if let Ok(candidate) = seed.join(probe) {
                    self.walk(candidate, 0, &mut visited, &mut pages).await;
                    if !pages.is_empty() {
                        break;
                    }
                }
            }
        }

        tracing::info!("sitemap walk from {seed} yielded {} page(s)", pages.len());
        pages
    }

    #[async_recursion]
    async fn walk(
        &self,
        url: Url,
        depth: usize,
        visited: &mut HashSet<String>,
        pages: &mut Vec<Url>,
    ) {
        if depth > MAX_DEPTH || !visited.insert(url.to_string()) {
            return;
        }

        let page = match self.http.get(&url).await {
            Ok(page) if page.ok() => page,
            Ok(page) => {
                tracing::debug!("sitemap fetch {url} returned {}", page.status);
                return;
            }
            Err(err) => {
                tracing::debug!("sitemap fetch {url} failed: {err}");
                return;
            }
        };

        let body = decompress_if_gzip(&page.body);
        let text = String::from_utf8_lossy(&body);

        if !text.contains("<urlset") && !text.contains("<sitemapindex") {
            tracing::debug!("{url} is not a sitemap document");
            return;
        }

        let is_index = text.contains("<sitemapindex");
        for capture in self.loc.captures_iter(&text) {
            let Some(loc) = capture.get(1) else { continue };
            let Ok(entry) = url.join(loc.as_str().trim()) else {
                continue;
            };
            if is_index {
                self.walk(entry, depth + 1, visited, pages).await;
            } else {
                pages.push(entry);
            }
        }
    }
}

fn decompress_if_gzip(body: &[u8]) -> Vec<u8> {
    if body.len() >= 2 && body[0] == 0x1f && body[1] == 0x8b {
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
        tracing::warn!("gzip sitemap failed to decompress, using raw bytes");
    }
    body.to_vec()
}
