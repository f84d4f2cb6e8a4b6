//! The robots.txt gate.
//!
//! Fetched once at start-up and shared read-only by every stage. Besides the
//! per-URL allow/deny answer, the gate surfaces the crawl hints that
//! override operator settings: `Crawl-delay`, `Request-rate` and `Sitemap`
//! lines. `texting_robots` handles the allow rules, delay and sitemaps; the
//! rarely seen `Request-rate` directive is recovered with a tolerant line
//! scan of the same text.

use texting_robots::Robot;

use crate::config::DatasetConfig;
use crate::error::{Result, ScrapeError};
use crate::http::HttpClient;

/// Parsed robots policy for the dataset host.
pub struct RobotsGate {
    robot: Option<Robot>,
    force_crawl: bool,
    crawl_delay: Option<u64>,
    request_rate: Option<(u32, u32)>,
    sitemaps: Vec<String>,
}

impl RobotsGate {
    /// Fetch and parse `scheme://host/robots.txt`.
    ///
    /// Failure to fetch or parse aborts the run unless the operator forces
    /// the crawl, in which case an allow-all gate is returned. A policy that
    /// denies the base URL itself also aborts unless forced.
    pub async fn fetch(config: &DatasetConfig, http: &HttpClient) -> Result<Self> {
        if !config.check_robots {
            tracing::info!("robots.txt check disabled by configuration");
            return Ok(Self::allow_all(true));
        }

        let robots_url = config
            .site_root()
            .join("robots.txt")
            .map_err(|_| ScrapeError::InvalidUrl(config.base_url.to_string()))?;
        tracing::info!("fetching robots policy from {robots_url}");

        let page = match http.get(&robots_url).await {
            Ok(page) if page.ok() => page,
            Ok(page) if page.status.is_client_error() => {
                // No robots.txt means no restrictions.
                tracing::warn!(
                    "robots.txt fetch returned {}, assuming no restrictions",
                    page.status
                );
                return Ok(Self::allow_all(config.force_crawl));
            }
            Ok(page) => {
                tracing::warn!("robots.txt fetch returned {}", page.status);
                return Self::fallback(config);
            }
            Err(err) => {
                tracing::warn!("robots.txt fetch failed: {err}");
                return Self::fallback(config);
            }
        };

        // UTF-8 first; forums in the wild serve robots.txt in Latin-1 often
        // enough that a second decode attempt is worth it.
        let text = match std::str::from_utf8(&page.body) {
            Ok(text) => text.to_string(),
            Err(err) => {
                tracing::warn!("robots.txt is not valid UTF-8 ({err}), retrying as Latin-1");
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&page.body);
                decoded.into_owned()
            }
        };

        let robot = match Robot::new(crate::http::USER_AGENT, text.as_bytes()) {
            Ok(robot) => robot,
            Err(err) => {
                tracing::error!("robots.txt could not be parsed: {err}");
                return Self::fallback(config);
            }
        };

        if !robot.allowed(config.base_url.as_str()) && !config.force_crawl {
            return Err(ScrapeError::RobotsDenied(config.base_url.to_string()));
        }

        let crawl_delay = robot.delay.map(u64::from);
        let request_rate = parse_request_rate(&text);
        let sitemaps = robot.sitemaps.clone();

        if let Some(delay) = crawl_delay {
            tracing::info!("robots.txt crawl-delay: {delay}s");
        }
        if let Some((n, secs)) = request_rate {
            tracing::info!("robots.txt request-rate: {n}/{secs}s");
        }
        if !sitemaps.is_empty() {
            tracing::info!("robots.txt advertises {} sitemap(s)", sitemaps.len());
        }

        Ok(Self {
            robot: Some(robot),
            force_crawl: config.force_crawl,
            crawl_delay,
            request_rate,
            sitemaps,
        })
    }

    /// Build a gate around an already parsed policy.
    pub fn from_robot(robot: Robot, force_crawl: bool) -> Self {
        let crawl_delay = robot.delay.map(u64::from);
        let sitemaps = robot.sitemaps.clone();
        Self {
            robot: Some(robot),
            force_crawl,
            crawl_delay,
            request_rate: None,
            sitemaps,
        }
    }

    /// A gate that permits everything. Used for `--force-crawl` recoveries
    /// and when robots checking is disabled outright.
    pub fn allow_all(force_crawl: bool) -> Self {
        Self {
            robot: None,
            force_crawl,
            crawl_delay: None,
            request_rate: None,
            sitemaps: Vec::new(),
        }
    }

    fn fallback(config: &DatasetConfig) -> Result<Self> {
        if config.force_crawl {
            tracing::warn!("continuing without a robots policy (forced)");
            Ok(Self::allow_all(true))
        } else {
            Err(ScrapeError::RobotsUnavailable(config.host().to_string()))
        }
    }

    /// The raw policy answer for a URL, before any forcing.
    pub fn policy_allows(&self, url: &str) -> bool {
        match &self.robot {
            Some(robot) => robot.allowed(url),
            None => true,
        }
    }

    /// Whether the URL may actually be fetched on this run.
    pub fn allowed(&self, url: &str) -> bool {
        self.force_crawl || self.policy_allows(url)
    }

    pub fn crawl_delay(&self) -> Option<u64> {
        self.crawl_delay
    }

    pub fn request_rate(&self) -> Option<(u32, u32)> {
        self.request_rate
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// The per-worker inter-request sleep, in seconds:
    /// `crawl-delay`, else `seconds / n` of the request rate, else the
    /// operator's configured delay.
    pub fn effective_delay(&self, configured: f64) -> f64 {
        if let Some(delay) = self.crawl_delay {
            return delay as f64;
        }
        if let Some((n, secs)) = self.request_rate {
            if n > 0 {
                return secs as f64 / n as f64;
            }
        }
        configured
    }

    /// Worker count after politeness clamping: any robots-specified pacing
    /// caps the pool at two workers.
    pub fn effective_workers(&self, configured: usize) -> usize {
        if self.crawl_delay.is_some() || self.request_rate.is_some() {
            configured.min(2)
        } else {
            configured
        }
    }
}

/// Scan for a `Request-rate: n/s` directive in a `User-agent: *` group.
///
/// Groups are tracked the tolerant way: a directive is taken when the
/// wildcard agent is active or when no agent line has been seen at all.
fn parse_request_rate(text: &str) -> Option<(u32, u32)> {
    // Directives before any User-agent line apply to everyone. A run of
    // consecutive User-agent lines opens a new group.
    let mut star_active = true;
    let mut reading_agents = false;

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();

        if field == "user-agent" {
            if !reading_agents {
                star_active = false;
                reading_agents = true;
            }
            if value == "*" {
                star_active = true;
            }
            continue;
        }

        reading_agents = false;
        if field == "request-rate" && star_active {
            let (n, secs) = value.split_once('/')?;
            let n: u32 = n.trim().parse().ok()?;
            let secs: u32 = secs.trim().split_whitespace().next()?.parse().ok()?;
            if n > 0 && secs > 0 {
                return Some((n, secs));
            }
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rate_in_star_group() {
        let txt = "User-agent: *\nRequest-rate: 1/5\nDisallow: /admin\n";
        assert_eq!(parse_request_rate(txt), Some((1, 5)));
    }

    #[test]
    fn request_rate_in_named_group_is_ignored() {
        let txt = "User-agent: OtherBot\nRequest-rate: 1/5\n\nUser-agent: *\nDisallow:\n";
        assert_eq!(parse_request_rate(txt), None);
    }

    #[test]
    fn request_rate_tolerates_junk() {
        assert_eq!(parse_request_rate("Request-rate: banana"), None);
        assert_eq!(parse_request_rate("Request-rate: 0/5"), None);
        assert_eq!(parse_request_rate("Request-rate: 2/10 # comment"), Some((2, 10)));
    }

    #[test]
    fn effective_delay_prefers_crawl_delay() {
        let mut gate = RobotsGate::allow_all(false);
        gate.crawl_delay = Some(7);
        gate.request_rate = Some((1, 5));
        assert_eq!(gate.effective_delay(0.5), 7.0);
        assert_eq!(gate.effective_workers(8), 2);
    }

    #[test]
    fn effective_delay_falls_back_to_rate_then_config() {
        let mut gate = RobotsGate::allow_all(false);
        gate.request_rate = Some((2, 5));
        assert_eq!(gate.effective_delay(0.5), 2.5);

        let plain = RobotsGate::allow_all(false);
        assert_eq!(plain.effective_delay(0.5), 0.5);
        assert_eq!(plain.effective_workers(8), 8);
    }

    #[test]
    fn allow_all_permits_everything() {
        let gate = RobotsGate::allow_all(true);
        assert!(gate.allowed("https://forum.example.pl/anything"));
        assert!(gate.policy_allows("https://forum.example.pl/anything"));
        assert!(gate.sitemaps().is_empty());
    }
}
