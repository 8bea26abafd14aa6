//! Proxy-list provider scraping
//!
//! Each provider is a public page listing open HTTP proxies, paired with the
//! pattern that pulls `(address, port)` out of its markup. The provider
//! table itself can be extended at runtime from a remote list, so a new
//! provider does not require a release.

use crate::config::{ProxyProvider, Settings};
use crate::fetch::proxy::ProxyEntry;
use regex::Regex;
use reqwest::blocking::Client;
use tracing::{debug, info};

/// Scrapes every configured provider and returns the merged proxy list
pub fn gather(client: &Client, settings: &Settings) -> Vec<ProxyEntry> {
    let mut providers = settings.providers.clone();
    if let Some(list_url) = &settings.provider_list_url {
        merge_remote_providers(client, list_url, &mut providers);
    }

    let mut entries = Vec::new();
    for provider in &providers {
        debug!("looking for proxies in {}", provider.url);
        let Some(page) = fetch_page(client, &provider.url) else {
            debug!("provider {} is unreachable", provider.url);
            continue;
        };
        let Ok(pattern) = Regex::new(&provider.pattern) else {
            debug!("provider {} has an invalid pattern", provider.url);
            continue;
        };
        let before = entries.len();
        for caps in pattern.captures_iter(&page) {
            let (Some(addr), Some(port)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Ok(port) = port.as_str().parse::<u16>() else {
                continue;
            };
            entries.push(ProxyEntry {
                addr: addr.as_str().to_string(),
                port,
                source: provider.url.clone(),
            });
        }
        let found = entries.len() - before;
        if found == 0 {
            debug!("the pattern for {} returned nothing", provider.url);
        } else {
            debug!("{} new proxies found at {}", found, provider.url);
        }
    }
    info!("{} proxies scraped from {} providers", entries.len(), providers.len());
    entries
}

/// Extends the provider table from a remote `url<TAB>pattern` list
fn merge_remote_providers(client: &Client, list_url: &str, providers: &mut Vec<ProxyProvider>) {
    let Some(listing) = fetch_page(client, list_url) else {
        debug!("provider list {} was not found", list_url);
        return;
    };
    for provider in parse_provider_lines(&listing) {
        let known = providers
            .iter()
            .any(|p| p.url == provider.url && p.pattern == provider.pattern);
        if !known {
            debug!("new provider from remote list: {}", provider.url);
            providers.push(provider);
        }
    }
}

/// One provider per line: its URL, a tab, and its extraction pattern
fn parse_provider_lines(listing: &str) -> Vec<ProxyProvider> {
    let line_re = Regex::new(r"(?m)^(http\S*)\t(.+)$").expect("provider line pattern compiles");
    line_re
        .captures_iter(listing)
        .map(|caps| ProxyProvider {
            url: caps[1].to_string(),
            pattern: caps[2].to_string(),
        })
        .collect()
}

fn fetch_page(client: &Client, url: &str) -> Option<String> {
    let response = client.get(url).send().ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().ok()
}
