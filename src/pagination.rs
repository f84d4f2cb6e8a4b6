//! The "next page" resolver shared by discovery (thread listings) and the
//! scraper (topic pages).
//!
//! Selectors are tried in profile order; the first one that matches any
//! element wins. The matched element's own `href` is used when present,
//! otherwise the first anchor beneath it. Two phpBB quirks are handled:
//! arrow-style pagination controls that only differ by an inner icon, and
//! old boards whose only pagination is the `start=` offset in the query
//! string. A candidate equal to the current URL is always rejected, which
//! is what guarantees page iteration terminates.

use scraper::{ElementRef, Html};
use url::Url;

use crate::selector::SelectorSpec;

/// Resolve the next page of `current`, or `None` when the last page is
/// reached.
pub fn next_page_url(current: &Url, html: &Html, pagination: &[SelectorSpec]) -> Option<Url> {
    for spec in pagination {
        let mut candidates = spec.select(html);

        // phpBB renders both arrows with the same class; only the inner
        // icon distinguishes "next" from "previous".
        if spec.raw().contains("pagination-arrow") {
            candidates.retain(|el| has_right_arrow_icon(*el));
        }

        for element in candidates {
            let Some(href) = element_href(element) else {
                continue;
            };
            let Ok(next) = current.join(href) else {
                tracing::debug!("pagination href does not resolve: {href}");
                continue;
            };
            if &next == current {
                continue;
            }
            tracing::debug!("next page via `{}`: {next}", spec.raw());
            return Some(next);
        }
    }

    query_offset_fallback(current, html)
}

/// The element's `href`, or the `href` of the first anchor inside it.
fn element_href(element: ElementRef<'_>) -> Option<&str> {
    if let Some(href) = element.value().attr("href") {
        return Some(href);
    }
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name().eq_ignore_ascii_case("a") && el.value().attr("href").is_some())
        .and_then(|el| el.value().attr("href"))
}

fn has_right_arrow_icon(element: ElementRef) -> bool {
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .any(|el| {
            el.value().name().eq_ignore_ascii_case("i")
                && el.value().classes().any(|c| c == "fa")
                && el.value().classes().any(|c| c == "fa-arrow-right")
        })
}

/// phpBB fallback for boards without usable pagination markup: pick the
/// anchor sharing the current `f`/`t` query values whose `start` offset is
/// the smallest one strictly greater than ours.
fn query_offset_fallback(current: &Url, html: &Html) -> Option<Url> {
    let forum = query_param(current, "f");
    let topic = query_param(current, "t");
    if forum.is_none() && topic.is_none() {
        return None;
    }
    let current_start: u64 = query_param(current, "start")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let mut best: Option<(u64, Url)> = None;
    for element in html
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name().eq_ignore_ascii_case("a"))
    {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if !href.contains("start=") {
            continue;
        }
        let Ok(candidate) = current.join(href) else {
            continue;
        };
        if query_param(&candidate, "f") != forum || query_param(&candidate, "t") != topic {
            continue;
        }
        let Some(start) = query_param(&candidate, "start").and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        if start <= current_start {
            continue;
        }
        if &candidate == current {
            continue;
        }
        match &best {
            Some((lowest, _)) if *lowest <= start => {}
            _ => best = Some((start, candidate)),
        }
    }

    best.map(|(start, url)| {
        tracing::debug!("next page via start= fallback (start={start}): {url}");
        url
    })
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
