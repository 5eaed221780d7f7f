//! Configuration types and loading.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::balancer::{Strategy, UpstreamServer};
use crate::error::ConfigError;
use crate::router::{RouteClass, RoutingRule};

/// Top-level configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub adblock: AdblockConfig,

    #[serde(default)]
    pub balancer: BalancerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ordered routing rules; first suffix match wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        self.rules
            .iter()
            .map(|r| RoutingRule {
                suffix: r.domain.clone(),
                action: r.action,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream resolution timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Informational bound; failover actually runs until the candidate
    /// pool is exhausted.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_http_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached resolutions.
    #[serde(default = "default_cache_size")]
    pub size: usize,

    /// Freshness TTL: how long an entry may be served.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Store TTL: how long an entry may exist before eviction.
    /// Independent of the freshness TTL.
    #[serde(default = "default_store_ttl")]
    pub store_ttl_secs: u64,

    /// How often the maintenance job prunes expired entries.
    #[serde(default = "default_check_period")]
    pub check_period_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            ttl_secs: default_cache_ttl(),
            store_ttl_secs: default_store_ttl(),
            check_period_secs: default_check_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdblockConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Blocklist URLs, fetched and unioned on every refresh.
    #[serde(default)]
    pub lists: Vec<String>,

    #[serde(default = "default_adblock_interval")]
    pub update_interval_secs: u64,
}

impl Default for AdblockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lists: Vec::new(),
            update_interval_secs: default_adblock_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BalancerConfig {
    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_probe_domain")]
    pub probe_domain: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_health_interval(),
            timeout_ms: default_health_timeout_ms(),
            probe_domain: default_probe_domain(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_client_limit")]
    pub per_client_per_minute: u64,

    #[serde(default = "default_global_limit")]
    pub global_per_second: u64,

    #[serde(default = "default_ban_secs")]
    pub ban_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            per_client_per_minute: default_client_limit(),
            global_per_second: default_global_limit(),
            ban_secs: default_ban_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "divert=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub domain: String,
    pub action: RouteClass,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub domestic: Vec<ServerEntry>,

    #[serde(default)]
    pub foreign: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub ip: IpAddr,

    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default = "default_dns_port")]
    pub port: u16,
}

impl ServerEntry {
    pub fn to_server(&self) -> UpstreamServer {
        UpstreamServer {
            addr: SocketAddr::new(self.ip, self.port),
            name: self.name.clone(),
            weight: self.weight,
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5353
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    3
}

fn default_http_listen() -> SocketAddr {
    ([127, 0, 0, 1], 3000).into()
}

fn default_cache_size() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_store_ttl() -> u64 {
    600
}

fn default_check_period() -> u64 {
    600
}

fn default_adblock_interval() -> u64 {
    86400
}

fn default_true() -> bool {
    true
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout_ms() -> u64 {
    2000
}

fn default_probe_domain() -> String {
    "www.google.com".to_string()
}

fn default_client_limit() -> u64 {
    1000
}

fn default_global_limit() -> u64 {
    5000
}

fn default_ban_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_dns_port() -> u16 {
    53
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [[upstream.domestic]]
            ip = "223.5.5.5"
            name = "alidns"

            [[upstream.foreign]]
            ip = "8.8.8.8"
            name = "google"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 5353);
        assert_eq!(config.server.timeout_ms, 3000);
        assert_eq!(config.cache.size, 1000);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.store_ttl_secs, 600);
        assert_eq!(config.balancer.strategy, Strategy::Weighted);
        assert!(config.balancer.health_check.enabled);
        assert_eq!(config.balancer.health_check.probe_domain, "www.google.com");
        assert!(config.rules.is_empty());

        let server = config.upstream.domestic[0].to_server();
        assert_eq!(server.addr, "223.5.5.5:53".parse().unwrap());
        assert_eq!(server.weight, 1.0);
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0"
            port = 53
            timeout_ms = 2000

            [http]
            enabled = true
            listen = "127.0.0.1:8080"

            [cache]
            size = 5000
            ttl_secs = 120
            store_ttl_secs = 900

            [adblock]
            enabled = true
            lists = ["https://example.com/list.txt"]
            update_interval_secs = 3600

            [balancer]
            strategy = "roundrobin"

            [balancer.health_check]
            interval_secs = 10
            probe_domain = "example.com"

            [[rules]]
            domain = "baidu.com"
            action = "domestic"

            [[rules]]
            domain = "google.com"
            action = "foreign"

            [[upstream.domestic]]
            ip = "114.114.114.114"
            name = "114dns"
            weight = 2.0

            [[upstream.foreign]]
            ip = "1.1.1.1"
            name = "cloudflare"
            port = 5353
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen_addr(), "0.0.0.0:53".parse().unwrap());
        assert_eq!(config.balancer.strategy, Strategy::RoundRobin);
        assert_eq!(config.balancer.health_check.interval_secs, 10);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].action, RouteClass::Domestic);
        assert_eq!(
            config.upstream.foreign[0].to_server().addr,
            "1.1.1.1:5353".parse().unwrap()
        );
        assert_eq!(config.upstream.domestic[0].weight, 2.0);
        assert!(config.adblock.enabled);
    }
}
