//! Configuration loading, validation, and management for Tooloop.
//!
//! Loads configuration from `~/.tooloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.tooloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model backend (also forwarded to tools)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible model backend
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Deployment (model) the agent talks to
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_endpoint() -> String {
    "http://localhost:8080/v1".into()
}
fn default_deployment() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool-calling rounds allowed per request before the loop gives up
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Read the system prompt from this file instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
}

fn default_max_rounds() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Deployment used by the image generation tool (None disables it)
    #[serde(default = "default_image_deployment")]
    pub image_deployment: Option<String>,

    /// Whether to register the file content extraction tool
    #[serde(default = "default_true")]
    pub file_extraction: bool,

    /// Characters per page returned by file extraction
    #[serde(default = "default_file_page_size")]
    pub file_page_size: usize,

    /// MCP servers whose tools are exposed to the model
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// MCP-backed code interpreter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_interpreter: Option<CodeInterpreterConfig>,
}

fn default_image_deployment() -> Option<String> {
    Some("dall-e-3".into())
}
fn default_file_page_size() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            image_deployment: default_image_deployment(),
            file_extraction: true,
            file_page_size: default_file_page_size(),
            mcp_servers: vec![],
            code_interpreter: None,
        }
    }
}

/// A streamable-HTTP MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeInterpreterConfig {
    /// Streamable-HTTP endpoint of the interpreter's MCP server
    pub url: String,

    /// Name of the execution tool on that server
    #[serde(default = "default_code_tool")]
    pub tool_name: String,
}

fn default_code_tool() -> String {
    "execute_code".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.tooloop/config.toml).
    ///
    /// Environment overrides:
    /// - `TOOLOOP_API_KEY`, then `OPENAI_API_KEY` (only when the file has no key)
    /// - `TOOLOOP_ENDPOINT`
    /// - `TOOLOOP_DEPLOYMENT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("TOOLOOP_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(endpoint) = var("TOOLOOP_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(deployment) = var("TOOLOOP_DEPLOYMENT") {
            self.deployment = deployment;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tooloop")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }

        if self.tools.file_page_size == 0 {
            return Err(ConfigError::ValidationError(
                "tools.file_page_size must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.tools.mcp_servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate MCP server name: {}",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve the system prompt: file, then inline text, then `None`
    /// (caller falls back to its built-in prompt).
    pub fn system_prompt(&self) -> Result<Option<String>, ConfigError> {
        if let Some(path) = &self.agent.system_prompt_file {
            let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(Some(text));
        }
        Ok(self.agent.system_prompt.clone())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            deployment: default_deployment(),
            temperature: default_temperature(),
            max_tokens: None,
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.deployment, "gpt-4o");
        assert_eq!(config.agent.max_rounds, 10);
        assert_eq!(config.tools.file_page_size, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.endpoint, config.endpoint);
        assert_eq!(parsed.tools.image_deployment.as_deref(), Some("dall-e-3"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/tooloop.toml")).unwrap();
        assert_eq!(config.deployment, "gpt-4o");
    }

    #[test]
    fn parses_tools_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
deployment = "claude-haiku-4-5"

[agent]
max_rounds = 4

[tools]
file_page_size = 500

[[tools.mcp_servers]]
name = "fetch"
url = "http://localhost:8051/mcp"

[tools.code_interpreter]
url = "http://localhost:8050/mcp"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.deployment, "claude-haiku-4-5");
        assert_eq!(config.agent.max_rounds, 4);
        assert_eq!(config.tools.file_page_size, 500);
        assert_eq!(config.tools.mcp_servers[0].name, "fetch");
        let ci = config.tools.code_interpreter.unwrap();
        assert_eq!(ci.tool_name, "execute_code");
    }

    #[test]
    fn zero_rounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_rounds = 0\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn duplicate_mcp_servers_rejected() {
        let mut config = AppConfig::default();
        config.tools.mcp_servers = vec![
            McpServerConfig { name: "a".into(), url: "http://x".into() },
            McpServerConfig { name: "a".into(), url: "http://y".into() },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("TOOLOOP_DEPLOYMENT", "gpt-4o-mini"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.deployment, "gpt-4o-mini");
        assert_eq!(config.endpoint, default_endpoint());
    }

    #[test]
    fn file_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("sk-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| (k == "TOOLOOP_API_KEY").then(|| "sk-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn debug_redacts_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let text = format!("{config:?}");
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("[REDACTED]"));
    }
}
