//! Per-engine extraction profiles.
//!
//! Each supported forum software ships a baked-in bundle of selectors and
//! URL filters; operator overrides are appended to the defaults, never
//! substituted, so a partially wrong default can be patched from the command
//! line without re-specifying the rest.

use std::fmt;
use std::str::FromStr;

use crate::config::SelectorOverrides;
use crate::error::{Result, ScrapeError};
use crate::selector::{parse_all, SelectorSpec};

/// Supported forum software families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForumEngine {
    Invision,
    PhpBb,
    IpBoard,
    XenForo,
    Other,
}

impl FromStr for ForumEngine {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "invision" => Ok(Self::Invision),
            "phpbb" => Ok(Self::PhpBb),
            "ipboard" => Ok(Self::IpBoard),
            "xenforo" => Ok(Self::XenForo),
            "other" => Ok(Self::Other),
            other => Err(ScrapeError::Config(format!(
                "unknown forum engine `{other}` (expected invision, phpbb, ipboard, xenforo or other)"
            ))),
        }
    }
}

impl fmt::Display for ForumEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invision => "invision",
            Self::PhpBb => "phpbb",
            Self::IpBoard => "ipboard",
            Self::XenForo => "xenforo",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// The selector bundle one dataset runs with: engine defaults merged with
/// operator overrides, parsed and validated once at config resolution.
#[derive(Debug, Clone, Default)]
pub struct EngineProfile {
    /// Anchors (or containers of anchors) linking to thread listings.
    pub threads: Vec<SelectorSpec>,
    /// Anchors (or containers of anchors) linking to topics.
    pub topics: Vec<SelectorSpec>,
    /// Candidates for the "next page" control, tried in order.
    pub pagination: Vec<SelectorSpec>,
    /// Topic title on a topic page; first non-empty hit wins.
    pub title: Vec<SelectorSpec>,
    /// Post bodies on a topic page; first selector with any hits wins.
    pub body: Vec<SelectorSpec>,
    /// Substring filters applied to thread hrefs.
    pub thread_allow: Vec<String>,
    pub thread_deny: Vec<String>,
    /// Substring filters applied to topic hrefs.
    pub topic_allow: Vec<String>,
    pub topic_deny: Vec<String>,
}

struct Defaults {
    threads: &'static [&'static str],
    topics: &'static [&'static str],
    pagination: &'static [&'static str],
    title: &'static [&'static str],
    body: &'static [&'static str],
    thread_allow: &'static [&'static str],
    thread_deny: &'static [&'static str],
    topic_allow: &'static [&'static str],
    topic_deny: &'static [&'static str],
}

const EMPTY: Defaults = Defaults {
    threads: &[],
    topics: &[],
    pagination: &[],
    title: &[],
    body: &[],
    thread_allow: &[],
    thread_deny: &[],
    topic_allow: &[],
    topic_deny: &[],
};

fn defaults_for(engine: ForumEngine) -> Defaults {
    match engine {
        ForumEngine::Invision => Defaults {
            threads: &["div >> class :: ipsDataItem_main"],
            topics: &["div >> class :: ipsDataItem_main"],
            pagination: &["ipsPagination_next"],
            title: &["h1 >> class :: ipsType_pageTitle"],
            body: &["div >> data-role :: commentContent"],
            thread_allow: &["forum"],
            thread_deny: &["topic"],
            topic_allow: &["topic"],
            topic_deny: &["page", "#comments"],
            ..EMPTY
        },
        ForumEngine::PhpBb => Defaults {
            threads: &["a >> class :: forumtitle", "a >> class :: forumlink"],
            topics: &["a >> class :: topictitle"],
            pagination: &[
                "pagination-arrow",
                "next",
                "arrow next",
                "right-box right",
                "title :: Dalej",
                "pag-img",
                "span >> class :: pagination",
            ],
            title: &["h2 >>  :: ", "h2 >> class :: topic-title"],
            body: &["div >> class :: content", "div >> class :: postbody"],
            ..EMPTY
        },
        ForumEngine::IpBoard => Defaults {
            threads: &["td >> class :: col_c_forum"],
            topics: &["a >> class :: topic_title"],
            pagination: &["next"],
            title: &["h1 >> class :: ipsType_pagetitle"],
            body: &["div >> class :: post entry-content"],
            ..EMPTY
        },
        ForumEngine::XenForo => Defaults {
            threads: &["h3 >> class :: node-title"],
            topics: &["div >> class :: structItem-title"],
            pagination: &["pageNav-jump--next"],
            title: &["h1 >> class :: p-title-value"],
            body: &["article >> class :: message-body js-selectToQuote"],
            thread_deny: &["prefix_id"],
            topic_allow: &["threads"],
            topic_deny: &["preview"],
            ..EMPTY
        },
        ForumEngine::Other => EMPTY,
    }
}

impl EngineProfile {
    /// Build the resolved profile for an engine plus operator overrides.
    pub fn resolve(engine: ForumEngine, overrides: &SelectorOverrides) -> Result<Self> {
        let defaults = defaults_for(engine);

        let mut profile = Self {
            threads: parse_static(defaults.threads)?,
            topics: parse_static(defaults.topics)?,
            pagination: parse_static(defaults.pagination)?,
            title: parse_static(defaults.title)?,
            body: parse_static(defaults.body)?,
            thread_allow: to_owned(defaults.thread_allow),
            thread_deny: to_owned(defaults.thread_deny),
            topic_allow: to_owned(defaults.topic_allow),
            topic_deny: to_owned(defaults.topic_deny),
        };

        profile.threads.extend(parse_all(&overrides.threads_class)?);
        profile.topics.extend(parse_all(&overrides.topics_class)?);
        profile.pagination.extend(parse_all(&overrides.pagination)?);
        profile
            .title
            .extend(parse_all(&overrides.topic_title_class)?);
        profile.body.extend(parse_all(&overrides.content_class)?);
        profile
            .thread_allow
            .extend(overrides.threads_whitelist.iter().cloned());
        profile
            .thread_deny
            .extend(overrides.threads_blacklist.iter().cloned());
        profile
            .topic_allow
            .extend(overrides.topics_whitelist.iter().cloned());
        profile
            .topic_deny
            .extend(overrides.topics_blacklist.iter().cloned());

        Ok(profile)
    }

    /// The uniform allow/deny predicate for thread hrefs.
    pub fn thread_href_ok(&self, href: &str) -> bool {
        href_passes(href, &self.thread_allow, &self.thread_deny)
    }

    /// The uniform allow/deny predicate for topic hrefs.
    pub fn topic_href_ok(&self, href: &str) -> bool {
        href_passes(href, &self.topic_allow, &self.topic_deny)
    }
}

fn href_passes(href: &str, allow: &[String], deny: &[String]) -> bool {
    if !allow.is_empty() && !allow.iter().any(|a| href.contains(a.as_str())) {
        return false;
    }
    if !deny.is_empty() && deny.iter().any(|d| href.contains(d.as_str())) {
        return false;
    }
    true
}

fn parse_static(specs: &[&str]) -> Result<Vec<SelectorSpec>> {
    specs.iter().map(|s| SelectorSpec::parse(s)).collect()
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_tags_round_trip() {
        for name in ["invision", "phpbb", "ipboard", "xenforo", "other"] {
            let engine: ForumEngine = name.parse().unwrap();
            assert_eq!(engine.to_string(), name);
        }
        assert!("vbulletin".parse::<ForumEngine>().is_err());
    }

    #[test]
    fn all_default_profiles_parse() {
        let overrides = SelectorOverrides::default();
        for engine in [
            ForumEngine::Invision,
            ForumEngine::PhpBb,
            ForumEngine::IpBoard,
            ForumEngine::XenForo,
            ForumEngine::Other,
        ] {
            EngineProfile::resolve(engine, &overrides).unwrap();
        }
    }

    #[test]
    fn overrides_append_to_defaults() {
        let overrides = SelectorOverrides {
            content_class: vec!["div >> class :: my-post".into()],
            topics_blacklist: vec!["mode=print".into()],
            ..Default::default()
        };
        let profile = EngineProfile::resolve(ForumEngine::PhpBb, &overrides).unwrap();
        // phpBB ships two body selectors; the override lands after them.
        assert_eq!(profile.body.len(), 3);
        assert_eq!(profile.body[2].raw(), "div >> class :: my-post");
        assert!(profile.topic_deny.contains(&"mode=print".to_string()));
    }

    #[test]
    fn invision_filters_behave() {
        let profile =
            EngineProfile::resolve(ForumEngine::Invision, &SelectorOverrides::default()).unwrap();
        assert!(profile.topic_href_ok("/topic/123-welcome/"));
        assert!(!profile.topic_href_ok("/topic/123-welcome/page/2/"));
        assert!(!profile.topic_href_ok("/forum/5-general/"));
        assert!(profile.thread_href_ok("/forum/5-general/"));
        assert!(!profile.thread_href_ok("/topic/123-welcome/"));
    }

    #[test]
    fn empty_filters_allow_everything() {
        let profile =
            EngineProfile::resolve(ForumEngine::PhpBb, &SelectorOverrides::default()).unwrap();
        assert!(profile.topic_href_ok("/viewtopic.php?f=1&t=10"));
        assert!(profile.thread_href_ok("/viewforum.php?f=1"));
    }
}
