//! Runtime settings
//!
//! Every source runs fine with the compiled-in defaults; a TOML file given
//! with `--config` can override individual knobs. The proxy-provider table
//! lives here so that a provider changing its page layout is a data edit,
//! not a code change.

use crate::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A page that publishes a list of public HTTP proxies, with the pattern
/// used to pull `(address, port)` pairs out of it
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyProvider {
    pub url: String,
    pub pattern: String,
}

/// A host-specific pattern that identifies a block page ("banned") response
#[derive(Debug, Clone, Deserialize)]
pub struct BlockPattern {
    pub host: String,
    pub pattern: String,
}

/// Runtime settings shared by all sources
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// User-Agent header sent on every request
    pub user_agent: String,

    /// Socket timeout in seconds, applied to every request
    pub timeout_secs: u64,

    /// Direct successes allowed per host before rotating away from it
    pub host_access_limit: u32,

    /// Proxy successes between forced proxy changes
    pub proxy_rotate_every: u32,

    /// Where the scraped proxy list is cached between runs
    pub proxy_cache_path: PathBuf,

    /// Seconds a cached proxy list stays fresh
    pub proxy_cache_max_age_secs: u64,

    /// Debug copy of the last successfully fetched page
    pub debug_dump_path: PathBuf,

    /// Optional remote list of additional proxy providers
    /// (one `url<TAB>pattern` per line)
    pub provider_list_url: Option<String>,

    /// Proxy-list pages to scrape when the cache is stale
    pub providers: Vec<ProxyProvider>,

    /// Block-page detection patterns, per host
    pub block_patterns: Vec<BlockPattern>,

    /// Search-engine cache endpoint; the percent-encoded `cache:<url>`
    /// query is appended to it
    pub cache_query_url: String,

    /// Pattern identifying the search-engine cache's "about this page"
    /// boilerplate, which is a non-answer
    pub cache_boilerplate_pattern: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            user_agent: "Mozilla/4.0 (compatible; MSIE 5.5; Windows NT)".to_string(),
            timeout_secs: 5,
            host_access_limit: 10,
            proxy_rotate_every: 10,
            proxy_cache_path: std::env::temp_dir().join("bibfetch_proxy_list.txt"),
            proxy_cache_max_age_secs: 3600,
            debug_dump_path: std::env::temp_dir().join("bibfetch_last_page.html"),
            provider_list_url: None,
            providers: default_providers(),
            block_patterns: default_block_patterns(),
            cache_query_url: "http://www.google.com/search?hl=fr&q=".to_string(),
            cache_boilerplate_pattern:
                r#"<a href="/intl/fr/about\.html">[^ ]* propos de Google</a>"#.to_string(),
        }
    }
}

fn default_providers() -> Vec<ProxyProvider> {
    let table: &[(&str, &str)] = &[
        (
            "http://www.free-proxy.fr/",
            r#"<tr><td width="50%" align="left">([0-9.]*):([0-9]*)</td><td width="50%" align="center">[^<]*</td></tr>"#,
        ),
        (
            "http://www.aliveproxy.com/fr-proxy-list/",
            r"([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+):([0-9]+)",
        ),
        (
            "http://proxynext.com/proxylist1.php",
            r"([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)</td>\s*?<td.*?>([0-9]+)</td>",
        ),
        (
            "http://www.proxy4free.com/page1.html",
            r"([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)</td>\s*?<td.*?>([0-9]+)</td>",
        ),
    ];
    table
        .iter()
        .map(|(url, pattern)| ProxyProvider {
            url: (*url).to_string(),
            pattern: (*pattern).to_string(),
        })
        .collect()
}

fn default_block_patterns() -> Vec<BlockPattern> {
    let table: &[(&str, &str)] = &[
        ("www.bedetheque.com", "IP interdite pour abus. Contactez"),
        ("www.bdgest.com", "IP interdite pour abus. Contactez"),
    ];
    table
        .iter()
        .map(|(host, pattern)| BlockPattern {
            host: (*host).to_string(),
            pattern: (*pattern).to_string(),
        })
        .collect()
}

/// Loads settings from an optional TOML file, falling back to defaults
///
/// # Arguments
///
/// * `path` - Path to a TOML settings file, or `None` for the defaults
///
/// # Returns
///
/// * `Ok(Settings)` - Successfully loaded and validated settings
/// * `Err(ConfigError)` - Failed to read, parse, or validate the file
pub fn load_settings(path: Option<&Path>) -> ConfigResult<Settings> {
    let settings = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => Settings::default(),
    };
    validate(&settings)?;
    Ok(settings)
}

/// Validates settings values that would make a run nonsensical
fn validate(settings: &Settings) -> ConfigResult<()> {
    if settings.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be at least 1".to_string(),
        ));
    }
    if settings.host_access_limit == 0 {
        return Err(ConfigError::Validation(
            "host-access-limit must be at least 1".to_string(),
        ));
    }
    if settings.proxy_rotate_every == 0 {
        return Err(ConfigError::Validation(
            "proxy-rotate-every must be at least 1".to_string(),
        ));
    }
    for provider in &settings.providers {
        if regex::Regex::new(&provider.pattern).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid provider pattern for {}",
                provider.url
            )));
        }
    }
    for block in &settings.block_patterns {
        if regex::Regex::new(&block.pattern).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid block pattern for {}",
                block.host
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.timeout_secs, 5);
        assert_eq!(settings.host_access_limit, 10);
        assert!(!settings.providers.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let file = create_temp_config(
            r#"
timeout-secs = 2
host-access-limit = 3
"#,
        );
        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.timeout_secs, 2);
        assert_eq!(settings.host_access_limit, 3);
        // Unmentioned knobs keep their defaults
        assert_eq!(settings.proxy_rotate_every, 10);
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(load_settings(Some(file.path())).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let file = create_temp_config("timeout-secs = 0");
        let result = load_settings(Some(file.path()));
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn bad_provider_pattern_is_rejected() {
        let file = create_temp_config(
            r#"
[[providers]]
url = "http://example.com/proxies"
pattern = "([0-9]+"
"#,
        );
        let result = load_settings(Some(file.path()));
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::Validation(_)
        ));
    }
}
