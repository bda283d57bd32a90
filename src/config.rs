use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::{DEFAULT_MODEL, DEFAULT_THRESHOLD};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// In-flight comment fetches per reconcile
const DEFAULT_COMMENT_CONCURRENCY: usize = 5;

/// GitHub API access settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Personal access token; the GITHUB_TOKEN env var overrides this
    #[serde(default)]
    pub token: Option<String>,

    /// API root, swappable for tests and GitHub Enterprise hosts
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_comment_concurrency")]
    pub comment_concurrency: usize,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            comment_concurrency: DEFAULT_COMMENT_CONCURRENCY,
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_comment_concurrency() -> usize {
    DEFAULT_COMMENT_CONCURRENCY
}

/// Similarity search settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Embedding model name (e.g. "bge-base-en-v1.5")
    #[serde(default = "default_model")]
    pub model: String,

    /// Default similarity threshold [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            default_threshold: DEFAULT_THRESHOLD,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    pub fn load() -> Self {
        Self::load_with(&base_path())
    }

    pub fn load_with(base_path: &str) -> Self {
        let path = Path::new(base_path).join("config.yaml");

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path).expect("could not create base directory");
            std::fs::write(&path, serde_yml::to_string(&Self::default()).unwrap())
                .expect("could not write default config");
        }

        let config_str = std::fs::read_to_string(&path).expect("config file is not readable");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");
        config.base_path = base_path.to_string();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        // env token wins but never lands in the file
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                config.github.token = Some(token);
            }
        }

        config.validate();
        config
    }

    pub fn save(&self) {
        let path = Path::new(&self.base_path).join("config.yaml");
        std::fs::write(&path, serde_yml::to_string(&self).unwrap())
            .expect("could not write config");
    }

    /// Directory holding per-repository cache files
    pub fn cache_dir(&self) -> PathBuf {
        Path::new(&self.base_path).join("issues")
    }

    /// Directory the embedder caches downloaded models under
    pub fn model_cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.base_path)
    }

    fn validate(&self) {
        if !(0.0..=1.0).contains(&self.search.default_threshold) {
            panic!(
                "search.default_threshold must be between 0.0 and 1.0, got {}",
                self.search.default_threshold
            );
        }

        if self.github.comment_concurrency == 0 {
            panic!("github.comment_concurrency must be greater than 0");
        }

        if self.github.request_timeout_secs == 0 {
            panic!("github.request_timeout_secs must be greater than 0");
        }
    }
}

fn base_path() -> String {
    std::env::var("KINDRED_BASE_PATH").unwrap_or_else(|_| {
        let home = my_home()
            .expect("Could not determine home directory")
            .expect("Home directory path is empty");
        format!("{}/.local/share/kindred", home.to_string_lossy())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();

        let config = Config::load_with(base);
        assert!(dir.path().join("config.yaml").exists());
        assert_eq!(config.github.api_base, DEFAULT_API_BASE);
        assert_eq!(config.github.comment_concurrency, 5);
        assert_eq!(config.search.model, DEFAULT_MODEL);
        assert_eq!(config.search.default_threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_partial_file_filled_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "github:\n  api_base: http://localhost:9100\nsearch:\n  default_threshold: 0.7\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path().to_str().unwrap());
        assert_eq!(config.github.api_base, "http://localhost:9100");
        assert_eq!(config.search.default_threshold, 0.7);
        assert_eq!(config.github.request_timeout_secs, 30);
        assert_eq!(config.search.model, DEFAULT_MODEL);
    }

    #[test]
    #[should_panic(expected = "default_threshold")]
    fn test_threshold_out_of_range_panics() {
        let config = Config {
            search: SearchConfig {
                default_threshold: 1.5,
                ..SearchConfig::default()
            },
            ..Config::default()
        };
        config.validate();
    }

    #[test]
    #[should_panic(expected = "comment_concurrency")]
    fn test_zero_concurrency_panics() {
        let config = Config {
            github: GithubConfig {
                comment_concurrency: 0,
                ..GithubConfig::default()
            },
            ..Config::default()
        };
        config.validate();
    }

    #[test]
    fn test_cache_dirs_under_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path().to_str().unwrap());
        assert_eq!(config.cache_dir(), dir.path().join("issues"));
        assert_eq!(config.model_cache_dir(), dir.path().to_path_buf());
    }
}
