use crate::core::errors::ConfigError;
use std::env;
use std::time::Duration;
use tracing::{warn, Level};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Remote classification service configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL of the model service; `/predict` and `/predict_batch` hang off it
    pub endpoint: String,
    pub timeout_seconds: u64,
    /// Outer partition of a URL list (fetched together before classification)
    pub chunk_size: usize,
    /// Inner partition of fetched bytes (one classification request)
    pub batch_size: usize,
}

/// Image host configuration (probes and fetches)
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub base_url: String,
    pub resolution: Option<String>,
    pub probe_timeout_seconds: u64,
    pub fetch_timeout_seconds: u64,
}

/// Worker pool sizes
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent probes / byte fetches
    pub io_pool_size: usize,
    /// Concurrent classification requests
    pub compute_pool_size: usize,
}

/// URL validation configuration
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Number of probes between two merges into the shared cache
    pub wave_size: usize,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
    pub url_cache_key: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub classifier: ClassifierConfig,
    pub images: ImageConfig,
    pub pools: PoolConfig,
    pub validation: ValidationConfig,
    pub storage: StorageConfig,
}

const MAX_TIMEOUT_SECONDS: u64 = 600;

/// Parse a setting, falling back to `default` when it is unset or blank.
/// An unparsable value also falls back, with a warning.
fn parse_setting<T: std::str::FromStr>(name: &str, raw: Option<&str>, default: T) -> T {
    match raw.map(str::trim) {
        None | Some("") => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("{}={:?} is not valid, using the default", name, value);
            default
        }),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    parse_setting(name, env::var(name).ok().as_deref(), default)
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let endpoint = env::var("CLASSIFIER_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingClassifierUrl)?;

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Ok(Self {
            server: ServerConfig {
                port: env_parse("SERVER_PORT", 8000),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            classifier: ClassifierConfig {
                endpoint,
                timeout_seconds: env_parse("CLASSIFIER_TIMEOUT_SECONDS", 60),
                chunk_size: env_parse("CLASSIFY_CHUNK_SIZE", 50),
                batch_size: env_parse("CLASSIFY_BATCH_SIZE", 12),
            },
            images: ImageConfig {
                base_url: env::var("IMAGE_BASE_URL")
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .unwrap_or_else(|_| {
                        "https://images.openfoodfacts.org/images/products".to_string()
                    }),
                resolution: env::var("IMAGE_RESOLUTION")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                probe_timeout_seconds: env_parse("PROBE_TIMEOUT_SECONDS", 10),
                fetch_timeout_seconds: env_parse("FETCH_TIMEOUT_SECONDS", 20),
            },
            pools: PoolConfig {
                io_pool_size: env_parse("IO_POOL_SIZE", 20),
                // Inference is compute-bound on the model side; stay well under the I/O pool
                compute_pool_size: env_parse("COMPUTE_POOL_SIZE", num_cpus::get().clamp(1, 10)),
            },
            validation: ValidationConfig {
                wave_size: env_parse("VALIDATION_WAVE_SIZE", 500),
            },
            storage: StorageConfig {
                data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                url_cache_key: env::var("URL_CACHE_KEY")
                    .unwrap_or_else(|_| "url_cache.json".to_string()),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("CLASSIFIER_URL", &self.classifier.endpoint),
            ("IMAGE_BASE_URL", &self.images.base_url),
        ] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl {
                    name,
                    value: value.clone(),
                });
            }
        }

        for (name, value) in [
            ("CLASSIFY_CHUNK_SIZE", self.classifier.chunk_size),
            ("CLASSIFY_BATCH_SIZE", self.classifier.batch_size),
            ("IO_POOL_SIZE", self.pools.io_pool_size),
            ("COMPUTE_POOL_SIZE", self.pools.compute_pool_size),
            ("VALIDATION_WAVE_SIZE", self.validation.wave_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidSize { name, value });
            }
        }

        for (name, value) in [
            ("CLASSIFIER_TIMEOUT_SECONDS", self.classifier.timeout_seconds),
            ("PROBE_TIMEOUT_SECONDS", self.images.probe_timeout_seconds),
            ("FETCH_TIMEOUT_SECONDS", self.images.fetch_timeout_seconds),
        ] {
            if !(1..=MAX_TIMEOUT_SECONDS).contains(&value) {
                return Err(ConfigError::InvalidTimeout {
                    name,
                    value,
                    max: MAX_TIMEOUT_SECONDS,
                });
            }
        }

        if self.storage.data_dir.trim().is_empty() {
            return Err(ConfigError::InvalidStorage(
                "DATA_DIR must not be empty".to_string(),
            ));
        }
        if self.storage.url_cache_key.trim().is_empty() {
            return Err(ConfigError::InvalidStorage(
                "URL_CACHE_KEY must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Test configuration: every value defaulted, classifier pointed at `endpoint`
    #[cfg(test)]
    pub(crate) fn with_classifier_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                port: 8000,
                host: "127.0.0.1".to_string(),
                log_level: Level::INFO,
            },
            classifier: ClassifierConfig {
                endpoint: endpoint.into(),
                timeout_seconds: 60,
                chunk_size: 50,
                batch_size: 12,
            },
            images: ImageConfig {
                base_url: "https://images.openfoodfacts.org/images/products".to_string(),
                resolution: None,
                probe_timeout_seconds: 10,
                fetch_timeout_seconds: 20,
            },
            pools: PoolConfig {
                io_pool_size: 20,
                compute_pool_size: 4,
            },
            validation: ValidationConfig { wave_size: 500 },
            storage: StorageConfig {
                data_dir: "data".to_string(),
                url_cache_key: "url_cache.json".to_string(),
            },
        }
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn classifier_endpoint(&self) -> &str {
        &self.classifier.endpoint
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.images.probe_timeout_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.images.fetch_timeout_seconds)
    }

    pub fn chunk_size(&self) -> usize {
        self.classifier.chunk_size
    }

    pub fn batch_size(&self) -> usize {
        self.classifier.batch_size
    }

    pub fn io_pool_size(&self) -> usize {
        self.pools.io_pool_size
    }

    pub fn compute_pool_size(&self) -> usize {
        self.pools.compute_pool_size
    }

    pub fn wave_size(&self) -> usize {
        self.validation.wave_size
    }

    pub fn image_base_url(&self) -> &str {
        &self.images.base_url
    }

    pub fn image_resolution(&self) -> Option<&str> {
        self.images.resolution.as_deref()
    }

    pub fn data_dir(&self) -> &str {
        &self.storage.data_dir
    }

    pub fn url_cache_key(&self) -> &str {
        &self.storage.url_cache_key
    }
}

// No Default implementation: the classifier endpoint has no sensible default
// and Config::new() refuses to start without it.
