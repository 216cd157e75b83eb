//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (the relay bearer token and the upstream API key) are loaded from
//! env vars or `*_file` paths, never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Cap on the base64 image field; larger payloads get 413.
    #[serde(default = "default_max_image_base64_bytes")]
    pub max_image_base64_bytes: usize,
    #[serde(skip)]
    pub auth_token: Option<Secret<String>>,
    /// Path to a file containing the bearer token (alternative to
    /// RELAY_AUTH_TOKEN env var)
    #[serde(default)]
    pub auth_token_file: Option<PathBuf>,
}

/// Upstream vision-model provider settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Ordered candidate models for the tier-1 pre-filter.
    #[serde(default = "default_tier1_models")]
    pub tier1_models: Vec<String>,
    /// Ordered candidate models for the tier-2 analysis.
    #[serde(default = "default_tier2_models")]
    pub tier2_models: Vec<String>,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
    /// Path to a file containing the API key (alternative to GEMINI_API_KEY
    /// env var)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

/// Device rate limiting and image deduplication
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Authoritative per-device daily analysis limit.
    #[serde(default = "default_daily_per_device")]
    pub daily_per_device: u32,
    /// Identical images within this window are rejected as duplicates.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_per_device: default_daily_per_device(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    256
}

fn default_max_image_base64_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_daily_per_device() -> u32 {
    10
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_tier1_models() -> Vec<String> {
    vision::client::DEFAULT_TIER1_MODELS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_tier2_models() -> Vec<String> {
    vision::client::DEFAULT_TIER2_MODELS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order (each):
    /// 1. env var (RELAY_AUTH_TOKEN / GEMINI_API_KEY)
    /// 2. `*_file` path from config
    ///
    /// Both secrets are mandatory; the relay refuses to start without them.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.upstream.base_url.starts_with("http://")
            && !config.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.upstream.base_url
            )));
        }

        if config.relay.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.relay.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.relay.max_image_base64_bytes == 0 {
            return Err(common::Error::Config(
                "max_image_base64_bytes must be greater than 0".into(),
            ));
        }

        if config.limits.daily_per_device == 0 {
            return Err(common::Error::Config(
                "daily_per_device must be greater than 0".into(),
            ));
        }

        if config.upstream.tier1_models.is_empty() || config.upstream.tier2_models.is_empty() {
            return Err(common::Error::Config(
                "tier1_models and tier2_models must each list at least one model".into(),
            ));
        }

        config.relay.auth_token = Secret::resolve(
            "RELAY_AUTH_TOKEN",
            config.relay.auth_token_file.as_deref(),
        )?;
        if config.relay.auth_token.is_none() {
            return Err(common::Error::Config(
                "no auth token: set RELAY_AUTH_TOKEN or auth_token_file".into(),
            ));
        }

        config.upstream.api_key =
            Secret::resolve("GEMINI_API_KEY", config.upstream.api_key_file.as_deref())?;
        if config.upstream.api_key.is_none() {
            return Err(common::Error::Config(
                "no upstream API key: set GEMINI_API_KEY or api_key_file".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("mealscope-relay.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    unsafe fn with_secrets_from_env() {
        unsafe {
            set_env("RELAY_AUTH_TOKEN", "relay-test-token");
            set_env("GEMINI_API_KEY", "gm-test-key");
        }
    }

    unsafe fn clear_secret_env() {
        unsafe {
            remove_env("RELAY_AUTH_TOKEN");
            remove_env("GEMINI_API_KEY");
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[relay]
listen_addr = "127.0.0.1:8787"

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { with_secrets_from_env() };
        let config = Config::load(&path).unwrap();
        unsafe { clear_secret_env() };

        assert_eq!(config.relay.timeout_secs, 30);
        assert_eq!(config.relay.max_connections, 256);
        assert_eq!(config.relay.max_image_base64_bytes, 5 * 1024 * 1024);
        assert_eq!(config.limits.daily_per_device, 10);
        assert_eq!(config.limits.dedup_window_secs, 300);
        assert!(!config.upstream.tier1_models.is_empty());
        assert!(!config.upstream.tier2_models.is_empty());
        assert_eq!(
            config.relay.auth_token.as_ref().unwrap().expose(),
            "relay-test-token"
        );
        assert_eq!(
            config.upstream.api_key.as_ref().unwrap().expose(),
            "gm-test-key"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_secrets_from_files() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("auth_token");
        let key_path = dir.path().join("api_key");
        std::fs::write(&token_path, "relay-file-token\n").unwrap();
        std::fs::write(&key_path, "gm-file-key\n").unwrap();

        let toml_content = format!(
            r#"
[relay]
listen_addr = "127.0.0.1:8787"
auth_token_file = "{}"

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
api_key_file = "{}"
"#,
            token_path.display(),
            key_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { clear_secret_env() };
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.relay.auth_token.as_ref().unwrap().expose(),
            "relay-file-token"
        );
        assert_eq!(
            config.upstream.api_key.as_ref().unwrap().expose(),
            "gm-file-key"
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("auth_token");
        std::fs::write(&token_path, "file-loses").unwrap();

        let toml_content = format!(
            r#"
[relay]
listen_addr = "127.0.0.1:8787"
auth_token_file = "{}"

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
"#,
            token_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { with_secrets_from_env() };
        let config = Config::load(&path).unwrap();
        unsafe { clear_secret_env() };

        assert_eq!(
            config.relay.auth_token.as_ref().unwrap().expose(),
            "relay-test-token",
            "env var must take precedence over auth_token_file"
        );
    }

    #[test]
    fn test_missing_auth_token_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_secret_env() };
        let result = Config::load(&path);
        assert!(result.is_err(), "relay must refuse to start without a token");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("RELAY_AUTH_TOKEN"), "got: {err}");
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe {
            clear_secret_env();
            set_env("RELAY_AUTH_TOKEN", "relay-test-token");
        }
        let result = Config::load(&path);
        unsafe { clear_secret_env() };

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_whitespace_only_token_file_counts_as_absent() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("auth_token");
        std::fs::write(&token_path, "  \n  ").unwrap();

        let toml_content = format!(
            r#"
[relay]
listen_addr = "127.0.0.1:8787"
auth_token_file = "{}"

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
"#,
            token_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { clear_secret_env() };
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[relay]
listen_addr = "127.0.0.1:8787"

[upstream]
base_url = "generativelanguage.googleapis.com"
"#,
        );

        unsafe { with_secrets_from_env() };
        let result = Config::load(&path);
        unsafe { clear_secret_env() };

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("base_url must start with http")
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[relay]
listen_addr = "127.0.0.1:8787"
timeout_secs = 0

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
"#,
        );

        unsafe { with_secrets_from_env() };
        let result = Config::load(&path);
        unsafe { clear_secret_env() };
        assert!(result.is_err(), "timeout_secs = 0 must be rejected");
    }

    #[test]
    fn test_zero_daily_limit_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[relay]
listen_addr = "127.0.0.1:8787"

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"

[limits]
daily_per_device = 0
"#,
        );

        unsafe { with_secrets_from_env() };
        let result = Config::load(&path);
        unsafe { clear_secret_env() };
        assert!(result.is_err(), "daily_per_device = 0 must be rejected");
    }

    #[test]
    fn test_empty_model_chain_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[relay]
listen_addr = "127.0.0.1:8787"

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
tier1_models = []
"#,
        );

        unsafe { with_secrets_from_env() };
        let result = Config::load(&path);
        unsafe { clear_secret_env() };
        assert!(result.is_err(), "empty tier1_models must be rejected");
    }

    #[test]
    fn test_custom_limits_and_models() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[relay]
listen_addr = "127.0.0.1:8787"
max_image_base64_bytes = 1048576

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"
tier1_models = ["cheap-model"]
tier2_models = ["big-model", "fallback-model"]

[limits]
daily_per_device = 25
dedup_window_secs = 60
"#,
        );

        unsafe { with_secrets_from_env() };
        let config = Config::load(&path).unwrap();
        unsafe { clear_secret_env() };

        assert_eq!(config.relay.max_image_base64_bytes, 1048576);
        assert_eq!(config.upstream.tier1_models, vec!["cheap-model"]);
        assert_eq!(
            config.upstream.tier2_models,
            vec!["big-model", "fallback-model"]
        );
        assert_eq!(config.limits.daily_per_device, 25);
        assert_eq!(config.limits.dedup_window_secs, 60);
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("mealscope-relay.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
