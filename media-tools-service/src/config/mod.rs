use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MediaToolsConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub usage: UsageConfig,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub resolver: ResolverConfig,
    pub rate_limit: RateLimitConfig,
    /// OTLP collector endpoint; span export is disabled when unset.
    pub otlp_endpoint: Option<String>,
}

/// Which backend holds the per-user usage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStoreKind {
    Memory,
    Mongodb,
    Redis,
}

impl std::str::FromStr for UsageStoreKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "mongodb" | "mongo" => Ok(Self::Mongodb),
            "redis" => Ok(Self::Redis),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown USAGE_STORE '{}', expected memory, mongodb or redis",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageConfig {
    pub store: UsageStoreKind,
    /// Generations allowed per window.
    pub limit: u32,
    pub window_secs: u64,
}

impl UsageConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Hosts whose links are expanded with a redirect-following HEAD request.
    pub short_link_hosts: Vec<String>,
    /// Query parameters that survive URL cleaning.
    pub allowed_query_params: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            short_link_hosts: vec!["vm.tiktok.com".to_string(), "vt.tiktok.com".to_string()],
            allowed_query_params: vec![
                "v".to_string(),
                "share_item_id".to_string(),
                "item_id".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute per IP on the link resolver; 0 disables the limit.
    pub tiktok_per_minute: u32,
    /// Peers allowed to set `x-forwarded-for`; the socket address is used
    /// for everyone else.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

impl MediaToolsConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = common_config.is_production();

        let store: UsageStoreKind = get_env("USAGE_STORE", Some("memory"), false)?.parse()?;
        let resolver_defaults = ResolverConfig::default();

        Ok(MediaToolsConfig {
            common: common_config,
            usage: UsageConfig {
                store,
                limit: parse_env("USAGE_LIMIT", 2)?,
                window_secs: parse_env("USAGE_WINDOW_SECS", 3600)?,
            },
            mongodb: MongoConfig {
                uri: get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod && store == UsageStoreKind::Mongodb,
                )?,
                database: get_env("MONGODB_DATABASE", Some("media_tools"), false)?,
            },
            redis: RedisConfig {
                url: get_env(
                    "REDIS_URL",
                    Some("redis://localhost:6379"),
                    is_prod && store == UsageStoreKind::Redis,
                )?,
            },
            resolver: ResolverConfig {
                timeout_secs: parse_env("RESOLVER_TIMEOUT_SECS", resolver_defaults.timeout_secs)?,
                user_agent: env::var("RESOLVER_USER_AGENT")
                    .unwrap_or(resolver_defaults.user_agent),
                short_link_hosts: env::var("RESOLVER_SHORT_LINK_HOSTS")
                    .map(|v| split_list(&v))
                    .unwrap_or(resolver_defaults.short_link_hosts),
                allowed_query_params: env::var("RESOLVER_ALLOWED_QUERY_PARAMS")
                    .map(|v| split_list(&v))
                    .unwrap_or(resolver_defaults.allowed_query_params),
            },
            rate_limit: RateLimitConfig {
                tiktok_per_minute: parse_env("TIKTOK_RATE_LIMIT_PER_MINUTE", 30)?,
                trusted_proxies: env::var("TRUSTED_PROXIES")
                    .map(|v| parse_ip_list("TRUSTED_PROXIES", &v))
                    .unwrap_or_else(|_| Ok(Vec::new()))?,
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_ip_list(key: &str, value: &str) -> Result<Vec<IpAddr>, AppError> {
    split_list(value)
        .iter()
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}: {}", key, s, e))
            })
        })
        .collect()
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_kind() {
        assert_eq!("memory".parse::<UsageStoreKind>().unwrap(), UsageStoreKind::Memory);
        assert_eq!("MongoDB".parse::<UsageStoreKind>().unwrap(), UsageStoreKind::Mongodb);
        assert_eq!(" redis ".parse::<UsageStoreKind>().unwrap(), UsageStoreKind::Redis);
        assert!("firestore".parse::<UsageStoreKind>().is_err());
    }

    #[test]
    fn splits_comma_lists() {
        assert_eq!(
            split_list("vm.tiktok.com, vt.tiktok.com,,"),
            vec!["vm.tiktok.com".to_string(), "vt.tiktok.com".to_string()]
        );
    }

    #[test]
    fn parses_trusted_proxy_list() {
        let proxies = parse_ip_list("TRUSTED_PROXIES", "10.0.0.1, ::1").unwrap();
        assert_eq!(
            proxies,
            vec!["10.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse().unwrap()]
        );
        assert!(parse_ip_list("TRUSTED_PROXIES", "").unwrap().is_empty());
        assert!(parse_ip_list("TRUSTED_PROXIES", "10.0.0.1, proxy.local").is_err());
    }

    #[test]
    fn resolver_defaults_cover_short_links() {
        let defaults = ResolverConfig::default();
        assert!(defaults.short_link_hosts.contains(&"vm.tiktok.com".to_string()));
        assert!(defaults.allowed_query_params.contains(&"share_item_id".to_string()));
    }
}
