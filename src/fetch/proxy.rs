//! Proxy pool
//!
//! Proxies scraped from public list pages live in memory for one run and are
//! cached on disk between runs. The cache is a flat text file: a freshness
//! stamp on the first line, then one `address:port<TAB>source` record per
//! line. A cache older than the configured maximum age is ignored.

use rand::Rng;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// One public HTTP proxy and the list page it was scraped from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub addr: String,
    pub port: u16,
    /// Used as the Referer when routing a request through this proxy
    pub source: String,
}

impl ProxyEntry {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

/// The set of proxies known to this run
///
/// Selection is uniform-random among the remaining entries; a proxy that
/// fails to return content is discarded and never retried within the run.
#[derive(Debug, Default)]
pub struct ProxyPool {
    entries: Vec<ProxyEntry>,
    current: Option<usize>,
    dirty: bool,
}

impl ProxyPool {
    pub fn new(entries: Vec<ProxyEntry>) -> Self {
        ProxyPool {
            entries,
            current: None,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn current(&self) -> Option<&ProxyEntry> {
        self.current.map(|i| &self.entries[i])
    }

    /// Picks a new current proxy at random
    pub fn pick(&mut self) -> Option<&ProxyEntry> {
        if self.entries.is_empty() {
            self.current = None;
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.entries.len());
        self.current = Some(index);
        Some(&self.entries[index])
    }

    /// Removes the current proxy from the pool
    pub fn discard_current(&mut self) {
        if let Some(index) = self.current.take() {
            let entry = self.entries.remove(index);
            debug!("dropped proxy {}", entry.endpoint());
            self.dirty = true;
        }
    }

    /// Loads the pool from the cache file if it is younger than `max_age`
    ///
    /// Returns `None` when the file is missing, unreadable, stale, or holds
    /// no records; callers fall back to scraping the providers.
    pub fn load_cache(path: &Path, max_age: Duration) -> Option<ProxyPool> {
        let content = std::fs::read_to_string(path).ok()?;
        let stamp_re = Regex::new(r"Last updated : ([0-9]+)").expect("stamp pattern compiles");
        let stamp: i64 = stamp_re.captures(&content)?.get(1)?.as_str().parse().ok()?;
        let age = chrono::Utc::now().timestamp() - stamp;
        if age < 0 || age as u64 >= max_age.as_secs() {
            debug!("proxy cache is {} min old, ignoring it", age / 60);
            return None;
        }

        let record_re =
            Regex::new(r"(?m)^([0-9.]+):([0-9]+)\t(.*)$").expect("record pattern compiles");
        let entries: Vec<ProxyEntry> = record_re
            .captures_iter(&content)
            .filter_map(|caps| {
                Some(ProxyEntry {
                    addr: caps.get(1)?.as_str().to_string(),
                    port: caps.get(2)?.as_str().parse().ok()?,
                    source: caps.get(3)?.as_str().to_string(),
                })
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        debug!(
            "proxy cache is {} min old with {} proxies in it",
            age / 60,
            entries.len()
        );
        Some(ProxyPool::new(entries))
    }

    /// Writes the pool back to the cache file, best effort
    pub fn save_cache(&mut self, path: &Path) {
        let mut out = format!(
            "Last updated : {} ({})\n",
            chrono::Utc::now().timestamp(),
            chrono::Local::now().format("%a, %d %b %Y %H:%M:%S")
        );
        for entry in &self.entries {
            out.push_str(&format!(
                "{}:{}\t{}\n",
                entry.addr, entry.port, entry.source
            ));
        }
        match std::fs::write(path, out) {
            Ok(()) => self.dirty = false,
            Err(e) => debug!("unable to write proxy cache {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_entries() -> Vec<ProxyEntry> {
        vec![
            ProxyEntry {
                addr: "10.0.0.1".to_string(),
                port: 8080,
                source: "http://lists.example/a".to_string(),
            },
            ProxyEntry {
                addr: "10.0.0.2".to_string(),
                port: 3128,
                source: "http://lists.example/b".to_string(),
            },
        ]
    }

    #[test]
    fn discard_shrinks_the_pool() {
        let mut pool = ProxyPool::new(sample_entries());
        assert_eq!(pool.len(), 2);
        pool.pick().unwrap();
        pool.discard_current();
        assert_eq!(pool.len(), 1);
        assert!(pool.is_dirty());
        pool.pick().unwrap();
        pool.discard_current();
        assert!(pool.is_empty());
        assert!(pool.pick().is_none());
    }

    #[test]
    fn discard_without_pick_is_a_no_op() {
        let mut pool = ProxyPool::new(sample_entries());
        pool.discard_current();
        assert_eq!(pool.len(), 2);
        assert!(!pool.is_dirty());
    }

    #[test]
    fn cache_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut pool = ProxyPool::new(sample_entries());
        pool.save_cache(file.path());

        let loaded = ProxyPool::load_cache(file.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(loaded.entries, pool.entries);
    }

    #[test]
    fn fresh_cache_is_reused_and_stale_cache_is_not() {
        let file = NamedTempFile::new().unwrap();
        let now = chrono::Utc::now().timestamp();
        let fresh = format!("Last updated : {} (test)\n10.0.0.1:8080\tsrc\n", now - 60);
        std::fs::write(file.path(), fresh).unwrap();
        assert!(ProxyPool::load_cache(file.path(), Duration::from_secs(3600)).is_some());

        let stale = format!("Last updated : {} (test)\n10.0.0.1:8080\tsrc\n", now - 7200);
        std::fs::write(file.path(), stale).unwrap();
        assert!(ProxyPool::load_cache(file.path(), Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn empty_or_malformed_cache_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "no stamp here\n").unwrap();
        assert!(ProxyPool::load_cache(file.path(), Duration::from_secs(3600)).is_none());

        let now = chrono::Utc::now().timestamp();
        std::fs::write(file.path(), format!("Last updated : {} (test)\n", now)).unwrap();
        assert!(ProxyPool::load_cache(file.path(), Duration::from_secs(3600)).is_none());
    }
}
