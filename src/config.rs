//! Dataset configuration.
//!
//! Operator input is resolved once, up front, into an immutable
//! [`DatasetConfig`]: URLs are parsed, derived fields (dataset name,
//! description, license) are filled in, numeric bounds are enforced and the
//! selector overrides are validated against the grammar. Every later stage
//! shares the resolved value read-only.

use std::path::{Path, PathBuf};

use url::Url;

use crate::engine::{EngineProfile, ForumEngine};
use crate::error::{Result, ScrapeError};

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_DELAY_SECS: f64 = 0.5;
const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;
const DEFAULT_MIN_TEXT_LEN: usize = 20;
const DEFAULT_CATEGORY: &str = "Forum";
const DEFAULT_WORKSPACE_ROOT: &str = "scraper_workspace";

/// The nine operator override lists. Entries are appended to the engine
/// defaults when the profile is resolved.
#[derive(Debug, Clone, Default)]
pub struct SelectorOverrides {
    pub threads_class: Vec<String>,
    pub threads_whitelist: Vec<String>,
    pub threads_blacklist: Vec<String>,
    pub topics_class: Vec<String>,
    pub topics_whitelist: Vec<String>,
    pub topics_blacklist: Vec<String>,
    pub pagination: Vec<String>,
    pub topic_title_class: Vec<String>,
    pub content_class: Vec<String>,
}

/// Immutable, resolved configuration for one dataset run.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub base_url: Url,
    pub engine: ForumEngine,
    pub category: String,
    pub name: String,
    pub description: String,
    pub license: String,
    pub workers: usize,
    pub delay_secs: f64,
    pub checkpoint_interval: usize,
    pub min_text_len: usize,
    /// Sitemap seeds supplied by the operator; robots.txt hints are used
    /// when this is empty.
    pub sitemaps: Vec<String>,
    /// Decode responses with this encoding instead of the advertised one.
    pub forced_encoding: Option<String>,
    pub force_crawl: bool,
    /// When false, robots.txt is neither fetched nor consulted.
    pub check_robots: bool,
    pub workspace_root: PathBuf,
    profile: EngineProfile,
    host: String,
}

impl DatasetConfig {
    pub fn builder(base_url: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(base_url)
    }

    /// The resolved selector profile (engine defaults plus overrides).
    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    /// Dataset host with any leading `www.` stripped.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether a URL stays on the dataset host, ignoring `www.`.
    pub fn same_host(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => host.trim_start_matches("www.") == self.host,
            None => false,
        }
    }

    /// `scheme://host/` of the forum, the base for `robots.txt` and for
    /// resolving relative hrefs.
    pub fn site_root(&self) -> Url {
        let mut root = self.base_url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }

    /// `scraper_workspace/<dataset>/`, the run's only on-disk footprint
    /// besides the final outputs.
    pub fn dataset_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.name)
    }
}

/// Builder for [`DatasetConfig`]; unset fields take the documented defaults.
pub struct ConfigBuilder {
    base_url: String,
    engine: ForumEngine,
    category: String,
    name: Option<String>,
    description: Option<String>,
    license: Option<String>,
    workers: usize,
    delay_secs: f64,
    checkpoint_interval: usize,
    min_text_len: usize,
    sitemaps: Vec<String>,
    forced_encoding: Option<String>,
    force_crawl: bool,
    check_robots: bool,
    workspace_root: PathBuf,
    overrides: SelectorOverrides,
}

impl ConfigBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            engine: ForumEngine::Other,
            category: DEFAULT_CATEGORY.into(),
            name: None,
            description: None,
            license: None,
            workers: DEFAULT_WORKERS,
            delay_secs: DEFAULT_DELAY_SECS,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            min_text_len: DEFAULT_MIN_TEXT_LEN,
            sitemaps: Vec::new(),
            forced_encoding: None,
            force_crawl: false,
            check_robots: true,
            workspace_root: DEFAULT_WORKSPACE_ROOT.into(),
            overrides: SelectorOverrides::default(),
        }
    }

    pub fn engine(mut self, engine: ForumEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Explicit dataset name; derived from category and host when absent.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = Some(name);
        }
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn delay_secs(mut self, delay: f64) -> Self {
        self.delay_secs = delay;
        self
    }

    pub fn checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn min_text_len(mut self, len: usize) -> Self {
        self.min_text_len = len;
        self
    }

    pub fn sitemaps(mut self, sitemaps: Vec<String>) -> Self {
        self.sitemaps = sitemaps;
        self
    }

    pub fn forced_encoding(mut self, encoding: impl Into<String>) -> Self {
        let encoding = encoding.into();
        if !encoding.is_empty() {
            self.forced_encoding = Some(encoding);
        }
        self
    }

    pub fn force_crawl(mut self, force: bool) -> Self {
        self.force_crawl = force;
        self
    }

    pub fn check_robots(mut self, check: bool) -> Self {
        self.check_robots = check;
        self
    }

    pub fn workspace_root(mut self, root: impl AsRef<Path>) -> Self {
        self.workspace_root = root.as_ref().to_path_buf();
        self
    }

    pub fn overrides(mut self, overrides: SelectorOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<DatasetConfig> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|_| ScrapeError::InvalidUrl(self.base_url.clone()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ScrapeError::InvalidUrl(self.base_url.clone()));
        }
        let host = base_url
            .host_str()
            .ok_or_else(|| ScrapeError::InvalidUrl(self.base_url.clone()))?
            .trim_start_matches("www.")
            .to_string();

        if self.workers < 1 {
            return Err(ScrapeError::Config("workers must be at least 1".into()));
        }
        if self.delay_secs < 0.0 || !self.delay_secs.is_finite() {
            return Err(ScrapeError::Config(
                "request delay must be a non-negative number of seconds".into(),
            ));
        }
        if self.checkpoint_interval < 1 {
            return Err(ScrapeError::Config(
                "checkpoint interval must be at least 1".into(),
            ));
        }

        let profile = EngineProfile::resolve(self.engine, &self.overrides)?;

        let name = self
            .name
            .unwrap_or_else(|| format!("{}_{}_corpus", self.category.to_lowercase(), host.replace('.', "_")));
        let description = self
            .description
            .unwrap_or_else(|| format!("Collection of forum discussions from {host}"));
        let license = self.license.unwrap_or_else(|| format!("(c) {host}"));

        Ok(DatasetConfig {
            base_url,
            engine: self.engine,
            category: self.category,
            name,
            description,
            license,
            workers: self.workers,
            delay_secs: self.delay_secs,
            checkpoint_interval: self.checkpoint_interval,
            min_text_len: self.min_text_len,
            sitemaps: self.sitemaps,
            forced_encoding: self.forced_encoding,
            force_crawl: self.force_crawl,
            check_robots: self.check_robots,
            workspace_root: self.workspace_root,
            profile,
            host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_name_description_and_license() {
        let config = DatasetConfig::builder("https://www.forum.example.pl/index.php")
            .engine(ForumEngine::PhpBb)
            .build()
            .unwrap();
        assert_eq!(config.name, "forum_forum_example_pl_corpus");
        assert_eq!(
            config.description,
            "Collection of forum discussions from forum.example.pl"
        );
        assert_eq!(config.license, "(c) forum.example.pl");
        assert_eq!(config.host(), "forum.example.pl");
    }

    #[test]
    fn explicit_name_wins() {
        let config = DatasetConfig::builder("https://forum.example.pl")
            .name("my_corpus")
            .build()
            .unwrap();
        assert_eq!(config.name, "my_corpus");
        assert_eq!(config.dataset_dir(), Path::new("scraper_workspace/my_corpus"));
    }

    #[test]
    fn same_host_ignores_www() {
        let config = DatasetConfig::builder("https://www.forum.example.pl")
            .build()
            .unwrap();
        let url = Url::parse("https://forum.example.pl/viewtopic.php?t=1").unwrap();
        assert!(config.same_host(&url));
        let other = Url::parse("https://elsewhere.example.com/t/1").unwrap();
        assert!(!config.same_host(&other));
    }

    #[test]
    fn site_root_drops_path_and_query() {
        let config = DatasetConfig::builder("https://forum.example.pl/foo/bar?x=1")
            .build()
            .unwrap();
        assert_eq!(config.site_root().as_str(), "https://forum.example.pl/");
    }

    #[test]
    fn rejects_bad_numbers_and_urls() {
        assert!(DatasetConfig::builder("not a url").build().is_err());
        assert!(DatasetConfig::builder("ftp://forum.example.pl").build().is_err());
        assert!(DatasetConfig::builder("https://forum.example.pl")
            .workers(0)
            .build()
            .is_err());
        assert!(DatasetConfig::builder("https://forum.example.pl")
            .delay_secs(-1.0)
            .build()
            .is_err());
        assert!(DatasetConfig::builder("https://forum.example.pl")
            .checkpoint_interval(0)
            .build()
            .is_err());
    }

    #[test]
    fn rejects_malformed_override_selectors() {
        let overrides = SelectorOverrides {
            content_class: vec!["div >> broken".into()],
            ..Default::default()
        };
        let result = DatasetConfig::builder("https://forum.example.pl")
            .overrides(overrides)
            .build();
        assert!(result.is_err());
    }
}
