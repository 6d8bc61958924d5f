//! Configuration system for the chat server.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHAT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/udpchat/config.toml
//!   3. ~/.config/udpchat/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub dispatcher: DispatcherConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Size in bytes of the UDP receive buffer.
    pub buffer_size: usize,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `db/` and `keys/` subdirectories.
    pub storage_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of inactivity after which a session is evicted from the
    /// in-memory table and purged from the repository.
    pub inactivity_timeout_secs: u64,
    /// How often the sweeper scans for inactive sessions.
    pub sweep_interval_secs: u64,
    /// Sweeps between each repository-level purge.
    pub sweeps_per_purge: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_retries: u32,
    pub retry_interval_secs: u64,
}

/// Which language-model backend to use for AI_MESSAGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    Ollama,
    Gpt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub ai_mode: AiMode,
    /// API key for the hosted chat-completion provider (AiMode::Gpt).
    pub openai_api_key: Option<String>,
    /// Base URL for the local model runner (AiMode::Ollama).
    pub ollama_base_url: String,
    pub model: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            dispatcher: DispatcherConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            server_port: 9999,
            buffer_size: 8192,
            debug: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: data_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 60,
            sweep_interval_secs: 10,
            sweeps_per_purge: 6,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_interval_secs: 2,
        }
    }
}

impl Default for AiMode {
    fn default() -> Self {
        AiMode::Ollama
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            ai_mode: AiMode::default(),
            openai_api_key: None,
            ollama_base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn db_dir(&self) -> PathBuf {
        self.storage_dir.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("udpchat.sqlite3")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.storage_dir.join("keys")
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.keys_dir().join("server_private.pem")
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.keys_dir().join("server_public.pem")
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("udpchat")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("udpchat")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ChatConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ChatConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ChatConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply environment variable overrides using bare names (`SERVER_IP`,
    /// `SERVER_PORT`, ...) rather than a `CHAT_NETWORK__*`-style prefix, to
    /// stay compatible with how operators already set these.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SERVER_IP") {
            self.network.server_ip = v;
        }
        if let Ok(v) = std::env::var("SERVER_PORT") {
            if let Ok(p) = v.parse() {
                self.network.server_port = p;
            }
        }
        if let Ok(v) = std::env::var("BUFFER_SIZE") {
            if let Ok(n) = v.parse() {
                self.network.buffer_size = n;
            }
        }
        if let Ok(v) = std::env::var("DEBUG") {
            self.network.debug = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("STORAGE_DIR") {
            self.storage.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AI_MODE") {
            self.assistant.ai_mode = match v.as_str() {
                "gpt" => AiMode::Gpt,
                _ => AiMode::Ollama,
            };
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.assistant.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OLLAMA_BASE_URL") {
            self.assistant.ollama_base_url = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.network.server_ip, "127.0.0.1");
        assert_eq!(config.network.server_port, 9999);
        assert_eq!(config.network.buffer_size, 8192);
        assert!(!config.network.debug);
        assert_eq!(config.assistant.ai_mode, AiMode::Ollama);
    }

    #[test]
    fn storage_paths_nest_under_storage_dir() {
        let mut config = ChatConfig::default();
        config.storage.storage_dir = PathBuf::from("/tmp/udpchat-test");
        assert_eq!(config.storage.db_path(), PathBuf::from("/tmp/udpchat-test/db/udpchat.sqlite3"));
        assert_eq!(
            config.storage.private_key_path(),
            PathBuf::from("/tmp/udpchat-test/keys/server_private.pem")
        );
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("udpchat-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("CHAT_CONFIG", config_path.to_str().unwrap());
        }

        let path = ChatConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = ChatConfig::load().expect("load should succeed");
        assert_eq!(config.network.server_port, 9999);

        unsafe {
            std::env::remove_var("CHAT_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
