use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub swap: SwapConfig,
    pub registries: Vec<RegistryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Reject chat requests that carry no session with 401
    pub require_session: bool,
    pub max_duration_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            require_session: true,
            max_duration_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Models a request may select; empty means only `model`
    pub allowed_models: Vec<String>,
    pub max_tokens: u32,
    pub max_steps: usize,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            allowed_models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
            max_tokens: 4096,
            max_steps: 5,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 30000,
        }
    }
}

impl LlmConfig {
    /// Whether a request may ask for `model`
    pub fn allows(&self, model: &str) -> bool {
        model == self.model || self.allowed_models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    pub enabled: bool,
    pub base_url: String,
    pub chain_id: u64,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.1inch.com/swap/v6.1".to_string(),
            chain_id: 8453,
            api_key_env: "ONEINCH_API_KEY".to_string(),
            timeout_ms: 10000,
        }
    }
}

/// How a registry authenticates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryAuthConfig {
    /// Bearer token of the caller's session
    Session,
    /// Static key read from the environment
    ApiKey { header: String, env: String },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryPolicy {
    /// Connected per request and closed when it ends
    Transient,
    /// One process-wide session
    Cached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    pub url: String,
    pub auth: RegistryAuthConfig,
    pub policy: RegistryPolicy,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub close_when_idle: bool,
}

fn default_registry_timeout_ms() -> u64 {
    10000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            swap: SwapConfig::default(),
            registries: vec![
                RegistryConfig {
                    name: "nexus".to_string(),
                    url: "https://nexus.civic.com/hub/mcp".to_string(),
                    auth: RegistryAuthConfig::Session,
                    policy: RegistryPolicy::Transient,
                    timeout_ms: default_registry_timeout_ms(),
                    close_when_idle: false,
                },
                RegistryConfig {
                    name: "nansen".to_string(),
                    url: "https://mcp.nansen.ai/ra/mcp/".to_string(),
                    auth: RegistryAuthConfig::ApiKey {
                        header: "NANSEN-API-KEY".to_string(),
                        env: "NANSEN_API_KEY".to_string(),
                    },
                    policy: RegistryPolicy::Cached,
                    timeout_ms: default_registry_timeout_ms(),
                    close_when_idle: true,
                },
            ],
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings that cannot work together
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.server.max_duration_secs == 0 {
            bail!("server.max_duration_secs must be greater than zero");
        }
        if self.llm.max_steps == 0 {
            bail!("llm.max_steps must be at least 1");
        }

        let mut names = HashSet::new();
        for registry in &self.registries {
            if !names.insert(registry.name.as_str()) {
                bail!("Duplicate registry name: {}", registry.name);
            }
            if !registry.url.starts_with("http://") && !registry.url.starts_with("https://") {
                bail!("Registry {} has a non-HTTP url: {}", registry.name, registry.url);
            }
            if registry.policy == RegistryPolicy::Cached && registry.auth == RegistryAuthConfig::Session {
                bail!(
                    "Registry {} is cached but authenticates per session; a shared session cannot carry a user token",
                    registry.name
                );
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .context(format!("Invalid server.bind address: {}", self.server.bind))
    }
}

/// Credentials read from the environment once at start
#[derive(Clone, Default)]
pub struct Credentials {
    pub llm_api_key: Option<String>,
    pub swap_api_key: Option<String>,
    /// Static keys per registry name
    pub registry_keys: Vec<(String, String)>,
}

impl Credentials {
    pub fn from_env(config: &Config) -> Self {
        let read = |var: &str| std::env::var(var).ok().filter(|v| !v.is_empty());

        let registry_keys = config
            .registries
            .iter()
            .filter_map(|r| match &r.auth {
                RegistryAuthConfig::ApiKey { env, .. } => read(env).map(|key| (r.name.clone(), key)),
                _ => None,
            })
            .collect();

        Self {
            llm_api_key: read(&config.llm.api_key_env),
            swap_api_key: read(&config.swap.api_key_env),
            registry_keys,
        }
    }

    pub fn registry_key(&self, name: &str) -> Option<&str> {
        self.registry_keys
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, key)| key.as_str())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registries: Vec<&str> = self.registry_keys.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Credentials")
            .field("llm_api_key", &self.llm_api_key.is_some())
            .field("swap_api_key", &self.swap_api_key.is_some())
            .field("registry_keys", &registries)
            .finish()
    }
}
