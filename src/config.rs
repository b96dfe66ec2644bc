use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub store_backend: StoreBackend,
    /// Prefix for shareable recipe links, without trailing slash.
    pub public_base_url: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            mongo_uri: try_load("MONGO_URI", "mongodb://localhost:27017/"),
            mongo_database: try_load("MONGO_DATABASE", "foodgram"),
            store_backend: try_load("STORE_BACKEND", "mongo"),
            public_base_url: try_load::<String>("PUBLIC_BASE_URL", "http://localhost:8000")
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017/".to_string(),
            mongo_database: "foodgram".to_string(),
            store_backend: StoreBackend::Memory,
            public_base_url: "http://localhost:8000".to_string(),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_from_str() {
        assert_eq!("Mongo".parse::<StoreBackend>(), Ok(StoreBackend::Mongo));
        assert_eq!(" memory ".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_try_load_falls_back_to_default() {
        let value: String = try_load("FOODGRAM_TEST_SURELY_UNSET", "fallback");
        assert_eq!(value, "fallback");
    }
}
