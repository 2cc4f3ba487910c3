use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Discovery model
    pub openai_api_key: String,
    pub model_name: String,
    pub model_base_url: Option<String>,

    // Platform base URLs
    pub legistar_base_url: String,
    pub nixle_base_url: String,

    // Tuning
    pub discovery_cache_ttl_hours: u64,
    pub collect_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            openai_api_key: required_env("OPENAI_API_KEY"),
            model_name: env::var("MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            model_base_url: env::var("MODEL_BASE_URL").ok(),
            legistar_base_url: env::var("LEGISTAR_BASE_URL")
                .unwrap_or_else(|_| "https://webapi.legistar.com/v1".to_string()),
            nixle_base_url: env::var("NIXLE_BASE_URL")
                .unwrap_or_else(|_| "https://local.nixle.com".to_string()),
            discovery_cache_ttl_hours: env::var("DISCOVERY_CACHE_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("DISCOVERY_CACHE_TTL_HOURS must be a number"),
            collect_concurrency: env::var("COLLECT_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .expect("COLLECT_CONCURRENCY must be a number"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
