//! Fetch-with-fallback
//!
//! The one piece of real machinery in this crate. Given a URL, a
//! [`FetchSession`] tries direct access, then a search-engine cache, then a
//! rotating pool of public proxies, until content is obtained or every
//! option is exhausted. Total failure is an empty string, never an error:
//! callers treat it as "no data for this page" and carry on.
//!
//! Hosts that serve a block page, or that have answered more direct
//! requests than the configured limit, are excluded for the remainder of
//! the run. Per-host failure/success counters back those decisions and the
//! end-of-run report.

pub mod providers;
pub mod proxy;

pub use proxy::{ProxyEntry, ProxyPool};

use crate::config::Settings;
use crate::{BibError, Result};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::REFERER;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Meta-refresh redirect marker; such a page is refetched once with a
/// Referer before being taken at face value
const REFRESH_PATTERN: &str = r#"http-equiv="?refresh"?"#;

/// Which fallback stages a call site wants after a failed direct attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Direct attempt only
    DirectOnly,
    /// Direct, then proxies
    NoCache,
    /// Direct, then the search-engine cache, then proxies
    Full,
}

impl Fallback {
    fn cache_enabled(self) -> bool {
        self == Fallback::Full
    }

    fn proxies_enabled(self) -> bool {
        matches!(self, Fallback::NoCache | Fallback::Full)
    }
}

#[derive(Debug, Default)]
struct HostCounters {
    failures: u32,
    successes: u32,
}

/// One run's worth of fetch state: HTTP clients, host counters, exclusions,
/// and the lazily loaded proxy pool
pub struct FetchSession {
    settings: Settings,
    client: Client,
    block_patterns: Vec<(String, Regex)>,
    refresh_re: Regex,
    cache_host: String,
    counters: HashMap<String, HostCounters>,
    excluded: HashSet<String>,
    pool: Option<ProxyPool>,
    proxy_client: Option<Client>,
    proxy_referer: String,
    proxy_successes: u32,
}

impl FetchSession {
    pub fn new(settings: Settings) -> Result<Self> {
        let client = build_client(&settings, None)?;

        let cache_host = host_of(&settings.cache_query_url).unwrap_or_default();
        let mut block_patterns = Vec::new();
        for block in &settings.block_patterns {
            block_patterns.push((block.host.clone(), compile_ci(&block.pattern)?));
        }
        // The cache's "about this page" boilerplate is its block pattern
        block_patterns.push((
            cache_host.clone(),
            compile_ci(&settings.cache_boilerplate_pattern)?,
        ));

        Ok(FetchSession {
            client,
            block_patterns,
            refresh_re: compile_ci(REFRESH_PATTERN)?,
            cache_host,
            counters: HashMap::new(),
            excluded: HashSet::new(),
            pool: None,
            proxy_client: None,
            proxy_referer: String::new(),
            proxy_successes: 0,
            settings,
        })
    }

    /// The plain (unproxied) client, for cover downloads
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fetches a page, falling back per `fallback`
    ///
    /// # Fallback Flow
    ///
    /// 1. Direct GET with the configured User-Agent and an empty Referer,
    ///    unless the host is excluded
    /// 2. The search-engine cache copy, when the call site enables it
    /// 3. The proxy pool, in random order, discarding proxies that return
    ///    nothing, until one answers or the pool runs dry
    ///
    /// # Arguments
    ///
    /// * `url` - The page to fetch
    /// * `fallback` - Which fallback stages this call site wants
    ///
    /// # Returns
    ///
    /// The page text, or an empty string when every strategy fails. This
    /// never errors: a page that cannot be fetched is simply no data.
    pub fn fetch(&mut self, url: &str, fallback: Fallback) -> String {
        let Some(host) = host_of(url) else {
            debug!("unparseable URL: {}", url);
            return String::new();
        };

        if !self.host_excluded(&host) {
            debug!("trying to open directly: {}", url);
            let client = self.client.clone();
            if let Some(page) = self.get_page(&client, url, "", &host, false) {
                self.dump(&page);
                return page;
            }
        }

        if fallback.cache_enabled() {
            debug!("trying the search-engine cache for: {}", url);
            if let Some(page) = self.fetch_cached(url) {
                self.dump(&page);
                return page;
            }
        }

        if fallback.proxies_enabled() {
            debug!("trying to open through a proxy: {}", url);
            if let Some(page) = self.fetch_via_proxies(url, &host) {
                self.dump(&page);
                return page;
            }
        }

        String::new()
    }

    /// Direct fetch that treats transport failure as fatal. Used by sources
    /// whose primary host being down means the run cannot proceed.
    pub fn fetch_required(&mut self, url: &str) -> Result<String> {
        let host = host_of(url).unwrap_or_default();
        let unreachable = |message: String| BibError::PrimarySourceUnreachable {
            host: host.clone(),
            message,
        };

        let response = self
            .client
            .get(url)
            .header(REFERER, "")
            .send()
            .map_err(|e| unreachable(e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| unreachable(e.to_string()))?;
        let page = response.text().map_err(|e| unreachable(e.to_string()))?;

        self.count_success(&host);
        self.dump(&page);
        Ok(page)
    }

    /// Logs the per-host page counts accumulated over the run
    pub fn report(&self) {
        for (host, counters) in &self.counters {
            info!(
                "{} page(s) obtained from {} (and {} failures)",
                counters.successes, host, counters.failures
            );
        }
    }

    fn host_excluded(&mut self, host: &str) -> bool {
        if self.excluded.contains(host) {
            return true;
        }
        let successes = self
            .counters
            .get(host)
            .map(|c| c.successes)
            .unwrap_or_default();
        if successes >= self.settings.host_access_limit {
            debug!("access limit reached for {}, rotating away from it", host);
            self.excluded.insert(host.to_string());
            return true;
        }
        false
    }

    /// GET through `client` with block-page detection. A meta-refresh page
    /// is refetched once with a Referer; a block-page match counts as a
    /// failure and, on direct access, excludes the host for the run.
    fn get_page(
        &mut self,
        client: &Client,
        url: &str,
        referer: &str,
        host: &str,
        via_proxy: bool,
    ) -> Option<String> {
        let mut referer = referer.to_string();
        for attempt in 0..2 {
            let page = do_get(client, url, &referer)?;
            if let Some(re) = self.block_pattern_for(host) {
                if re.is_match(&page) {
                    self.count_failure(host);
                    if !via_proxy {
                        info!("block page detected, excluding {} for this run", host);
                        self.excluded.insert(host.to_string());
                    }
                    return None;
                }
            }
            if attempt == 0 && self.refresh_re.is_match(&page) {
                trace!("refresh page from {}, retrying with a referer", host);
                referer = url.to_string();
                continue;
            }
            self.count_success(host);
            return Some(page);
        }
        None
    }

    fn fetch_cached(&mut self, url: &str) -> Option<String> {
        let query = format!(
            "{}{}",
            self.settings.cache_query_url,
            urlquote(&format!("cache:{}", url))
        );
        let client = self.client.clone();
        let cache_host = self.cache_host.clone();
        self.get_page(&client, &query, "", &cache_host, false)
    }

    fn fetch_via_proxies(&mut self, url: &str, host: &str) -> Option<String> {
        self.ensure_pool();
        let len_before = self.pool_len();

        loop {
            if self.proxy_client.is_none() && !self.select_proxy() {
                break;
            }
            let Some(client) = self.proxy_client.clone() else {
                break;
            };
            let referer = self.proxy_referer.clone();
            if let Some(page) = self.get_page(&client, url, &referer, host, true) {
                self.count_success("proxy");
                self.proxy_successes += 1;
                if self.proxy_successes % self.settings.proxy_rotate_every == 0 {
                    // Spread the load without dropping a live proxy
                    self.select_proxy();
                }
                if self.pool_len() < len_before {
                    info!("{} proxies remaining", self.pool_len());
                }
                self.persist_pool();
                return Some(page);
            }
            trace!("proxy did not answer, dropping it");
            self.count_failure("proxy");
            self.discard_proxy();
        }

        info!("no proxies left, failed fetching {}", url);
        self.persist_pool();
        None
    }

    fn ensure_pool(&mut self) {
        if self.pool.is_some() {
            return;
        }
        let max_age = Duration::from_secs(self.settings.proxy_cache_max_age_secs);
        let path = self.settings.proxy_cache_path.clone();
        let pool = match ProxyPool::load_cache(&path, max_age) {
            Some(pool) => pool,
            None => {
                info!("scraping providers for a fresh proxy list");
                let entries = providers::gather(&self.client, &self.settings);
                let mut pool = ProxyPool::new(entries);
                pool.save_cache(&path);
                pool
            }
        };
        info!("{} proxies available", pool.len());
        self.pool = Some(pool);
    }

    /// Picks a random proxy from the pool and builds a client bound to it.
    /// Entries that cannot even be turned into a client are discarded on
    /// the spot. Returns false when the pool is exhausted.
    fn select_proxy(&mut self) -> bool {
        loop {
            let Some(pool) = self.pool.as_mut() else {
                return false;
            };
            let Some(entry) = pool.pick().cloned() else {
                return false;
            };
            trace!("switching to proxy {}", entry.endpoint());
            let proxy = match reqwest::Proxy::http(format!("http://{}", entry.endpoint())) {
                Ok(proxy) => proxy,
                Err(_) => {
                    pool.discard_current();
                    continue;
                }
            };
            match build_client(&self.settings, Some(proxy)) {
                Ok(client) => {
                    self.proxy_client = Some(client);
                    self.proxy_referer = entry.source;
                    return true;
                }
                Err(_) => {
                    pool.discard_current();
                }
            }
        }
    }

    fn discard_proxy(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.discard_current();
        }
        self.proxy_client = None;
    }

    fn persist_pool(&mut self) {
        let path = self.settings.proxy_cache_path.clone();
        if let Some(pool) = self.pool.as_mut() {
            if pool.is_dirty() {
                pool.save_cache(&path);
            }
        }
    }

    fn pool_len(&self) -> usize {
        self.pool.as_ref().map(ProxyPool::len).unwrap_or_default()
    }

    fn block_pattern_for(&self, host: &str) -> Option<&Regex> {
        self.block_patterns
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, re)| re)
    }

    fn count_failure(&mut self, host: &str) {
        self.counters.entry(host.to_string()).or_default().failures += 1;
    }

    fn count_success(&mut self, host: &str) {
        self.counters.entry(host.to_string()).or_default().successes += 1;
    }

    /// Debug copy of the last successfully fetched page; failures to write
    /// it are logged and ignored
    fn dump(&self, page: &str) {
        if let Err(e) = std::fs::write(&self.settings.debug_dump_path, page) {
            debug!(
                "unable to write debug dump {}: {}",
                self.settings.debug_dump_path.display(),
                e
            );
        }
    }
}

fn build_client(settings: &Settings, proxy: Option<reqwest::Proxy>) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.timeout_secs))
        .gzip(true)
        .brotli(true);
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder.build()
}

fn do_get(client: &Client, url: &str, referer: &str) -> Option<String> {
    let response = client.get(url).header(REFERER, referer).send().ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().ok()
}

fn compile_ci(pattern: &str) -> Result<Regex> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| crate::ConfigError::Validation(e.to_string()).into())
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.to_string())
}

/// Percent-encodes a query-string value
pub fn urlquote(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_stages() {
        assert!(!Fallback::DirectOnly.cache_enabled());
        assert!(!Fallback::DirectOnly.proxies_enabled());
        assert!(!Fallback::NoCache.cache_enabled());
        assert!(Fallback::NoCache.proxies_enabled());
        assert!(Fallback::Full.cache_enabled());
        assert!(Fallback::Full.proxies_enabled());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(
            host_of("http://www.bedetheque.com/album-1-x.html").as_deref(),
            Some("www.bedetheque.com")
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn query_values_are_percent_encoded() {
        assert_eq!(urlquote("cache:http://a/b c"), "cache%3Ahttp%3A%2F%2Fa%2Fb+c");
    }

    #[test]
    fn access_limit_excludes_host() {
        let settings = Settings {
            host_access_limit: 2,
            ..Settings::default()
        };
        let mut session = FetchSession::new(settings).unwrap();
        session.count_success("example.com");
        assert!(!session.host_excluded("example.com"));
        session.count_success("example.com");
        assert!(session.host_excluded("example.com"));
        // And it stays excluded
        assert!(session.host_excluded("example.com"));
    }
}
