use serde::{Deserialize, Serialize};

use crate::storage::{BackendLocal, StorageManager};

const MAX_ATTEMPTS: u8 = 3;
const POLL_INTERVAL_MS: u64 = 5_000;
const BACKOFF_UNIT_MS: u64 = 1_000;

/// Default multimodal model served by an Ollama-compatible endpoint
const DEFAULT_PROVIDER_MODEL: &str = "qwen2.5vl:7b";
const DEFAULT_PROVIDER_URL: &str = "http://localhost:11434";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 120;

/// Default embedding model (bge-base offers +13% accuracy vs MiniLM)
const DEFAULT_EMBED_MODEL: &str = "bge-base-en-v1.5";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SUMMARY_MAX_CHARS: usize = 500;

/// Configuration for the multimodal analysis provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    #[serde(default = "default_provider_model")]
    pub model: String,

    /// Hard timeout per generate call in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            model: DEFAULT_PROVIDER_MODEL.to_string(),
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

fn default_provider_url() -> String {
    DEFAULT_PROVIDER_URL.to_string()
}

fn default_provider_model() -> String {
    DEFAULT_PROVIDER_MODEL.to_string()
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

/// Configuration for the semantic index
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Embedding model name (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embed_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Character budget for generated session summaries
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBED_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

fn default_embed_model() -> String {
    DEFAULT_EMBED_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_summary_max_chars() -> usize {
    DEFAULT_SUMMARY_MAX_CHARS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Retry budget shared by parse, rate-limit and transient failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Worker poll interval when the queue is quiet
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// One backoff "time unit"; rate-limit waits are 2^retry_count units
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Exact page URLs that never produce an analysis (home/default pages)
    #[serde(default = "default_url_blacklist")]
    pub url_blacklist: Vec<String>,

    /// URL scheme prefixes treated as internal/non-content pages
    #[serde(default = "default_internal_schemes")]
    pub internal_schemes: Vec<String>,

    /// Record full prompt/response exchanges to the per-user debug log
    #[serde(default = "default_debug_logging")]
    pub debug_logging: bool,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            poll_interval_ms: POLL_INTERVAL_MS,
            backoff_unit_ms: BACKOFF_UNIT_MS,
            url_blacklist: default_url_blacklist(),
            internal_schemes: default_internal_schemes(),
            debug_logging: true,
            provider: ProviderConfig::default(),
            semantic: SemanticConfig::default(),
            base_path: String::new(),
        }
    }
}

fn default_max_attempts() -> u8 {
    MAX_ATTEMPTS
}

fn default_poll_interval_ms() -> u64 {
    POLL_INTERVAL_MS
}

fn default_backoff_unit_ms() -> u64 {
    BACKOFF_UNIT_MS
}

fn default_url_blacklist() -> Vec<String> {
    vec![
        "about:blank".to_string(),
        "about:newtab".to_string(),
        "chrome://newtab/".to_string(),
        "chrome://new-tab-page/".to_string(),
        "edge://newtab/".to_string(),
    ]
}

fn default_internal_schemes() -> Vec<String> {
    vec![
        "about".to_string(),
        "chrome".to_string(),
        "edge".to_string(),
        "brave".to_string(),
        "devtools".to_string(),
        "view-source".to_string(),
    ]
}

fn default_debug_logging() -> bool {
    true
}

impl Config {
    fn validate(&mut self) {
        if self.max_attempts == 0 {
            self.max_attempts = 1
        }

        if self.poll_interval_ms == 0 {
            panic!("poll_interval_ms must be greater than 0");
        }

        if self.backoff_unit_ms == 0 {
            panic!("backoff_unit_ms must be greater than 0");
        }

        if self.provider.base_url.is_empty() {
            panic!("provider.base_url must not be empty");
        }

        if self.semantic.download_timeout_secs == 0 {
            panic!("semantic.download_timeout_secs must be greater than 0");
        }

        if self.semantic.summary_max_chars < 64 {
            panic!(
                "semantic.summary_max_chars must be at least 64, got {}",
                self.semantic.summary_max_chars
            );
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = match BackendLocal::new(base_path) {
            Ok(s) => s,
            Err(e) => panic!("cannot open config directory {base_path}: {e}"),
        };

        // create new if does not exist
        if !store.exists("config.yaml") {
            let _ = store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            );
        }

        let config_str = String::from_utf8(store.read("config.yaml").expect("config is readable"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();
        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store = match BackendLocal::new(self.base_path.as_str()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to open config directory: {e}");
                return;
            }
        };

        let config_str = serde_yml::to_string(&self).unwrap();
        if let Err(e) = store.write("config.yaml", config_str.as_bytes()) {
            log::error!("failed to save config: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_validation() {
        let mut config = Config::default();
        config.validate();
        assert_eq!(config.max_attempts, 3);
        assert!(config.url_blacklist.contains(&"about:blank".to_string()));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let mut config = Config {
            max_attempts: 0,
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    #[should_panic(expected = "backoff_unit_ms")]
    fn test_zero_backoff_unit_rejected() {
        let mut config = Config {
            backoff_unit_ms: 0,
            ..Default::default()
        };
        config.validate();
    }

    #[test]
    fn test_load_creates_and_rereads_config() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();

        let first = Config::load_with(base);
        let second = Config::load_with(base);

        assert_eq!(first.provider.model, second.provider.model);
        assert_eq!(first.semantic.model, second.semantic.model);
    }
}
