//! The selector grammar used by engine profiles and operator overrides.
//!
//! Selectors come in three shapes, all normalising to `(tag, attribute,
//! value)`:
//!
//! 1. `tag >> attr :: value` — full form, e.g. `a >> class :: topictitle`;
//! 2. `attr :: value` — the tag defaults to any of `li`, `a`, `div`;
//! 3. `value` — shorthand for `class :: value` with the default tag set.
//!
//! An empty attribute side (`h2 >>  :: `) matches the bare tag.

use scraper::{ElementRef, Html};

use crate::error::{Result, ScrapeError};

/// Tags searched when a selector does not name one.
const DEFAULT_TAGS: &[&str] = &["li", "a", "div"];

/// One parsed selector. Built once at config resolution so malformed
/// operator input fails before any page is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSpec {
    tag: Option<String>,
    attr: Option<(String, String)>,
    raw: String,
}

impl SelectorSpec {
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.to_string();
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ScrapeError::InvalidSelector {
                spec: raw,
                reason: "empty selector".into(),
            });
        }

        let (tag, rest) = match split_once_trim(trimmed, ">>") {
            Some((tag, rest)) => {
                if tag.is_empty() {
                    return Err(ScrapeError::InvalidSelector {
                        spec: raw,
                        reason: "missing tag before `>>`".into(),
                    });
                }
                (Some(tag.to_ascii_lowercase()), rest)
            }
            None => (None, trimmed.to_string()),
        };

        let attr = match split_once_trim(&rest, "::") {
            Some((name, value)) => {
                if name.is_empty() && value.is_empty() {
                    // Bare-tag form such as `h2 >>  :: `.
                    None
                } else if name.is_empty() {
                    return Err(ScrapeError::InvalidSelector {
                        spec: raw,
                        reason: "attribute value without a name".into(),
                    });
                } else {
                    Some((name.to_ascii_lowercase(), value))
                }
            }
            None => {
                if tag.is_some() {
                    return Err(ScrapeError::InvalidSelector {
                        spec: raw,
                        reason: "tag form requires `attr :: value`".into(),
                    });
                }
                // Class shorthand.
                Some(("class".into(), rest.clone()))
            }
        };

        if tag.is_none() && attr.is_none() {
            return Err(ScrapeError::InvalidSelector {
                spec: raw,
                reason: "selector matches nothing".into(),
            });
        }

        Ok(Self { tag, attr, raw })
    }

    /// The selector string as the operator wrote it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether a single element satisfies this selector.
    ///
    /// `class` values match per token: every whitespace-separated token of
    /// the selector value must be present on the element, so `arrow next`
    /// matches `class="arrow next right"`. Other attributes compare exactly.
    pub fn matches(&self, element: &ElementRef) -> bool {
        let name = element.value().name();
        match &self.tag {
            Some(tag) => {
                if !name.eq_ignore_ascii_case(tag) {
                    return false;
                }
            }
            None => {
                if !DEFAULT_TAGS.iter().any(|t| name.eq_ignore_ascii_case(t)) {
                    return false;
                }
            }
        }

        match &self.attr {
            None => true,
            Some((attr, value)) if attr == "class" => {
                let mut wanted = value.split_whitespace().peekable();
                if wanted.peek().is_none() {
                    return element.value().attr("class").is_some();
                }
                wanted.all(|token| element.value().classes().any(|c| c == token))
            }
            Some((attr, value)) => element.value().attr(attr) == Some(value.as_str()),
        }
    }

    /// All matching elements of a document, in document order.
    pub fn select<'a>(&self, html: &'a Html) -> Vec<ElementRef<'a>> {
        html.root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| self.matches(el))
            .collect()
    }
}

/// Parse a whole override list, failing on the first malformed entry.
pub fn parse_all(specs: &[String]) -> Result<Vec<SelectorSpec>> {
    specs.iter().map(|s| SelectorSpec::parse(s)).collect()
}

fn split_once_trim(input: &str, sep: &str) -> Option<(String, String)> {
    input
        .split_once(sep)
        .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
}
