//! Blocklist fetching and periodic refresh.
//!
//! Downloads each configured list, parses it, and publishes the union
//! as one snapshot. A list that fails to download is skipped; a refresh
//! in which every list fails leaves the previous snapshot in place.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::AdBlockFilter;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BlocklistUpdater {
    filter: Arc<AdBlockFilter>,
    lists: Vec<String>,
    period: Duration,
    client: reqwest::Client,
}

impl BlocklistUpdater {
    pub fn new(filter: Arc<AdBlockFilter>, lists: Vec<String>, period: Duration) -> Self {
        Self {
            filter,
            lists,
            period,
            client: reqwest::Client::new(),
        }
    }

    /// Load the lists at startup, then refresh on the configured
    /// interval, forever.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }

    /// Fetch every list and publish the union snapshot.
    pub async fn refresh(&self) {
        let mut domains = HashSet::new();
        let mut loaded = 0usize;

        for url in &self.lists {
            match self.fetch_list(url).await {
                Ok(parsed) => {
                    info!(url = %url, domains = parsed.len(), "blocklist loaded");
                    domains.extend(parsed);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "blocklist fetch failed");
                }
            }
        }

        if loaded == 0 && !self.lists.is_empty() {
            warn!("every blocklist fetch failed, keeping previous snapshot");
            return;
        }

        info!(
            lists = loaded,
            domains = domains.len(),
            "ad-block rules updated"
        );
        self.filter.publish(domains);
    }

    async fn fetch_list(&self, url: &str) -> Result<Vec<String>, reqwest::Error> {
        let body = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_list(&body))
    }
}

/// Parse one blocklist payload.
///
/// Accepts AdGuard-style `||domain^` rules and plain domain-per-line
/// lists; `#` and `!` comment lines are skipped, as is anything that
/// does not look like a domain.
pub fn parse_list(contents: &str) -> Vec<String> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("||") {
        let domain = rest.split('^').next()?;
        return plausible_domain(domain).then(|| domain.to_lowercase());
    }

    plausible_domain(line).then(|| line.to_lowercase())
}

fn plausible_domain(s: &str) -> bool {
    !s.is_empty()
        && s.contains('.')
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_domain_lines() {
        let parsed = parse_list("ads.example.com\ntracker.example.net\n");

        assert_eq!(parsed, vec!["ads.example.com", "tracker.example.net"]);
    }

    #[test]
    fn parses_adguard_rules() {
        let parsed = parse_list("||ads.example.com^\n||metrics.example.net^$important\n");

        assert_eq!(parsed, vec!["ads.example.com", "metrics.example.net"]);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let parsed = parse_list("# hosts comment\n! adguard comment\n\nads.example.com\n");

        assert_eq!(parsed, vec!["ads.example.com"]);
    }

    #[test]
    fn skips_lines_that_are_not_domains() {
        let parsed = parse_list("||^\nnot a domain\n127.0.0.1 localhost?\nlocalhost\n");

        assert!(parsed.is_empty());
    }

    #[test]
    fn lowercases_domains() {
        let parsed = parse_list("ADS.Example.COM\n");

        assert_eq!(parsed, vec!["ads.example.com"]);
    }
}
