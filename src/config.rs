use crate::{semantic::EngineError, storage::BackendLocal};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_IMAGE_DIR: &str = "./random-images";
const DEFAULT_MODEL: &str = crate::semantic::DEFAULT_MODEL;
const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:8000/images/";
const DEFAULT_SCORE_PRECISION: u32 = 3;
const DEFAULT_TOP_K: i64 = 5;
const MAX_TOP_K: i64 = 25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// HTTP server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Prefix joined with an image file name to build result URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Decimal places kept in reported similarity scores
    #[serde(default = "default_score_precision")]
    pub score_precision: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_origins: default_allowed_origins(),
            public_base_url: default_public_base_url(),
            score_precision: default_score_precision(),
        }
    }
}

/// Bounds applied to incoming queries
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,

    #[serde(default = "max_top_k")]
    pub max_top_k: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: max_top_k(),
        }
    }
}

impl QueryConfig {
    /// Resolve a requested result count against the configured range.
    ///
    /// `None` takes the default; anything outside `[1, max_top_k]` is rejected.
    pub fn resolve_top_k(&self, requested: Option<i64>) -> Result<usize, EngineError> {
        let top_k = requested.unwrap_or(self.default_top_k);
        if top_k < 1 || top_k > self.max_top_k {
            return Err(EngineError::InvalidQuery(format!(
                "top_k must be between 1 and {}, got {}",
                self.max_top_k, top_k
            )));
        }
        Ok(top_k as usize)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned (recursively) for corpus images
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    /// Embedding model name (e.g., "clip-vit-b-32")
    #[serde(default = "default_model")]
    pub model: String,

    /// Images per embedding call while indexing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Image decode threads: "auto" or a positive integer
    #[serde(default = "default_decode_parallelism")]
    pub decode_parallelism: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            model: default_model(),
            batch_size: default_batch_size(),
            decode_parallelism: default_decode_parallelism(),
            server: ServerConfig::default(),
            query: QueryConfig::default(),
            base_path: String::new(),
        }
    }
}

fn default_image_dir() -> String {
    DEFAULT_IMAGE_DIR.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_decode_parallelism() -> String {
    "auto".to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![DEFAULT_ALLOWED_ORIGIN.to_string()]
}

fn default_public_base_url() -> String {
    DEFAULT_PUBLIC_BASE_URL.to_string()
}

fn default_score_precision() -> u32 {
    DEFAULT_SCORE_PRECISION
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

fn max_top_k() -> i64 {
    MAX_TOP_K
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_dir.trim().is_empty() {
            return Err(ConfigError::invalid("image_dir", "must not be empty"));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be greater than 0"));
        }

        // "auto" or positive integer
        if self.decode_parallelism != "auto" {
            match self.decode_parallelism.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(ConfigError::invalid(
                        "decode_parallelism",
                        format!(
                            "must be 'auto' or a positive integer, got '{}'",
                            self.decode_parallelism
                        ),
                    ))
                }
            }
        }

        if self.server.score_precision > 9 {
            return Err(ConfigError::invalid(
                "server.score_precision",
                format!("must be at most 9, got {}", self.server.score_precision),
            ));
        }

        let query = &self.query;
        if query.max_top_k < 1 {
            return Err(ConfigError::invalid(
                "query.max_top_k",
                format!("must be at least 1, got {}", query.max_top_k),
            ));
        }
        if !(1..=query.max_top_k).contains(&query.default_top_k) {
            return Err(ConfigError::invalid(
                "query.default_top_k",
                format!(
                    "must be between 1 and {}, got {}",
                    query.max_top_k, query.default_top_k
                ),
            ));
        }

        Ok(())
    }

    /// Decode thread count for rayon; 0 means automatic.
    pub fn decode_threads(&self) -> usize {
        self.decode_parallelism.parse::<usize>().unwrap_or(0)
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn load_with(base_path: &str) -> Result<Self, ConfigError> {
        let store = BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}
