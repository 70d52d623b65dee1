use std::env;

/// Broker connection and exchange settings, shared by every binary that
/// talks to the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub uri: String,
    pub connection_timeout_secs: u64,
}

/// Fetcher/crawler tuning, used by the crawler binary.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub retrieve_timeout_secs: u64,
    /// Shell-glob patterns (single `*` wildcard) for query parameters to
    /// strip when deriving a canonical URL.
    pub canonical_url_query_exclude: Vec<String>,
}

/// Scheduler sweep intervals, used by the controller binary.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub crawl_feeds_rate_secs: u64,
    pub crawl_articles_rate_secs: u64,
    pub scrape_articles_rate_secs: u64,
}

/// Web/API server settings, used by the api binary.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub recommendations_default_limit: u32,
    pub articles_default_limit: u32,
    pub jwt_secret: String,
    pub jwt_issuer: String,
}

/// Application configuration loaded from environment variables. Each binary
/// target populates only the sub-configs it needs; the others are left at
/// their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub broker: BrokerConfig,
    pub crawler: CrawlerConfig,
    pub controller: ControllerConfig,
    pub web: WebConfig,
}

impl Config {
    /// Load config for the crawler binary: database + broker + crawler.
    pub fn crawler_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            broker: broker_from_env(),
            crawler: crawler_from_env(),
            controller: controller_defaults(),
            web: web_defaults(),
        }
    }

    /// Load config for the controller binary: database + broker + controller.
    pub fn controller_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            broker: broker_from_env(),
            crawler: crawler_defaults(),
            controller: controller_from_env(),
            web: web_defaults(),
        }
    }

    /// Load config for the api binary: database + broker + web.
    pub fn api_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            broker: broker_from_env(),
            crawler: crawler_defaults(),
            controller: controller_defaults(),
            web: web_from_env(),
        }
    }

    /// Log the presence (not the value) of sensitive config for debugging.
    pub fn log_redacted(&self) {
        tracing::info!(
            database_url_set = !self.database_url.is_empty(),
            broker_uri_set = !self.broker.uri.is_empty(),
            jwt_secret_len = self.web.jwt_secret.len(),
            "configuration loaded"
        );
    }
}

fn broker_from_env() -> BrokerConfig {
    BrokerConfig {
        uri: required_env("BROKER_URI"),
        connection_timeout_secs: env_u64("BROKER_CONNECTION_TIMEOUT_SECS", 10),
    }
}

fn crawler_from_env() -> CrawlerConfig {
    CrawlerConfig {
        retrieve_timeout_secs: env_u64("CRAWLER_RETRIEVE_TIMEOUT_SECS", 30),
        canonical_url_query_exclude: env::var("CRAWLER_CANONICAL_URL_QUERY_EXCLUDE")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["utm_*".to_string()]),
    }
}

fn crawler_defaults() -> CrawlerConfig {
    CrawlerConfig {
        retrieve_timeout_secs: 30,
        canonical_url_query_exclude: vec!["utm_*".to_string()],
    }
}

fn controller_from_env() -> ControllerConfig {
    ControllerConfig {
        crawl_feeds_rate_secs: env_u64("CONTROLLER_CRAWL_FEEDS_RATE_SECS", 900),
        crawl_articles_rate_secs: env_u64("CONTROLLER_CRAWL_ARTICLES_RATE_SECS", 300),
        scrape_articles_rate_secs: env_u64("CONTROLLER_SCRAPE_ARTICLES_RATE_SECS", 300),
    }
}

fn controller_defaults() -> ControllerConfig {
    ControllerConfig {
        crawl_feeds_rate_secs: 900,
        crawl_articles_rate_secs: 300,
        scrape_articles_rate_secs: 300,
    }
}

fn web_from_env() -> WebConfig {
    WebConfig {
        host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: env::var("WEB_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .expect("WEB_PORT must be a number"),
        recommendations_default_limit: env_u64("RECOMMENDATIONS_DEFAULT_LIMIT", 20) as u32,
        articles_default_limit: env_u64("ARTICLES_DEFAULT_LIMIT", 50) as u32,
        jwt_secret: required_env("JWT_SECRET"),
        jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "crawlmesh".to_string()),
    }
}

fn web_defaults() -> WebConfig {
    WebConfig {
        host: String::new(),
        port: 0,
        recommendations_default_limit: 20,
        articles_default_limit: 50,
        jwt_secret: String::new(),
        jwt_issuer: "crawlmesh".to_string(),
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
