use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use crate::secret::{PrivateKey, PRIVATE_KEY_ENV};
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use sui_agent::agent::DEFAULT_MAX_TURNS;
use sui_agent::providers::configs::{
    EmbeddingConfig, OpenAiProviderConfig, DEFAULT_EMBEDDING_MODEL, DEFAULT_HOST, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE,
};
use sui_agent::rag::{RagConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K};
use sui_agent::systems::mcp::McpServerConfig;

/// Read when `provider.api_key` is not set
pub const FALLBACK_API_KEY_ENV: &str = "GOOGLE_API_KEY";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                host: self.host.clone(),
                port: self.port,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: default_provider_host(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Where document and query embeddings are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// all-MiniLM-L6-v2 in process, no API key needed
    #[default]
    Local,
    /// An OpenAI-compatible `/embeddings` endpoint
    Remote,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub backend: EmbeddingBackend,
    /// Model cache for the local backend, fastembed's default when unset
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default = "default_provider_host")]
    pub host: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            cache_dir: None,
            host: default_provider_host(),
            model: default_embedding_model(),
        }
    }
}

impl EmbeddingSettings {
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.as_deref().map(expand_path)
    }
}

#[derive(Debug, Deserialize)]
pub struct RagSettings {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            index_dir: default_index_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
        }
    }
}

impl RagSettings {
    pub fn to_config(&self) -> RagConfig {
        RagConfig {
            docs_dir: expand_path(&self.docs_dir),
            index_dir: expand_path(&self.index_dir),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct McpSettings {
    #[serde(default = "default_mcp_name")]
    pub name: String,
    /// Empty disables the tool server
    #[serde(default = "default_mcp_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_mcp_rust_log")]
    pub rust_log: String,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            name: default_mcp_name(),
            command: default_mcp_command(),
            args: Vec::new(),
            rust_log: default_mcp_rust_log(),
        }
    }
}

impl McpSettings {
    /// Launch settings for the tool server, with the key in its environment only
    pub fn server_config(&self, private_key: &PrivateKey) -> Option<McpServerConfig> {
        if self.command.trim().is_empty() {
            return None;
        }

        let env = HashMap::from([
            (PRIVATE_KEY_ENV.to_string(), private_key.expose().to_string()),
            ("RUST_LOG".to_string(), self.rust_log.clone()),
        ]);
        Some(McpServerConfig {
            name: self.name.clone(),
            command: expand_path(&self.command),
            args: self.args.clone(),
            env,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub rag: RagSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.host", default_provider_host())?
            .set_default("provider.model", default_model())?;

        if let Ok(api_key) = env::var(FALLBACK_API_KEY_ENV) {
            builder = builder.set_default("provider.api_key", api_key)?;
        }

        // Layer on the environment variables
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mcp.args")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = match config.try_deserialize() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                return if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `name`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                };
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.provider.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            }),
        }
    }

    fn api_key(&self) -> String {
        self.provider.api_key.clone().unwrap_or_default()
    }

    pub fn provider_config(&self) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            host: self.provider.host.clone(),
            api_key: self.api_key(),
            model: self.provider.model.clone(),
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        }
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            host: self.embedding.host.clone(),
            api_key: self.api_key(),
            model: self.embedding.model.clone(),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn default_host() -> String {
    "::".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_provider_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> Option<f32> {
    Some(DEFAULT_TEMPERATURE)
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_docs_dir() -> String {
    "docs".to_string()
}

fn default_index_dir() -> String {
    "rag_index".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_mcp_name() -> String {
    "sui_tools".to_string()
}

fn default_mcp_command() -> String {
    "sui-mcp".to_string()
}

fn default_mcp_rust_log() -> String {
    "info".to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}
