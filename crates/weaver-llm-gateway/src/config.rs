//! Gateway configuration with memory-safe environment variable handling.
//!
//! Recognised keys:
//!
//! | Key | Effect |
//! |---|---|
//! | `MODEL_REGION` (alias `BEDROCK_REGION`) | Model region; substituted into `{region}` in the base URL |
//! | `DEFAULT_MODEL_ID` | Fallback model identifier |
//! | `LLM_PROVIDER` | `http` (default) or `static` |
//! | `LLM_API_KEY` | Provider API key (kept behind `secrecy`) |
//! | `LLM_BASE_URL` | Provider endpoint override |
//! | `LLM_TIMEOUT_SECS` | Per-request timeout (default 60) |

use std::env;

use secrecy::Secret;
use tracing::warn;

use crate::providers::{HttpCompletionsProvider, LlmProvider, StaticProvider};
use crate::GatewayError;

/// Default model region when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Provider selection with secure secret storage.
pub enum ProviderConfig {
    /// OpenAI-style chat-completions endpoint over HTTP.
    Http {
        /// API key (securely stored).
        api_key: Secret<String>,
        /// Endpoint base URL; `{region}` is substituted with the configured
        /// region.
        base_url: String,
    },
    /// Deterministic in-process provider answering a fixed response; used
    /// by tests and local development.
    Static {
        /// The canned response content.
        content: String,
    },
}

/// Configuration for the LLM gateway.
pub struct Config {
    region: String,
    default_model: String,
    timeout_secs: u64,
    provider: ProviderConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, GatewayError> {
        let region = env::var("MODEL_REGION")
            .or_else(|_| env::var("BEDROCK_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let default_model = env::var("DEFAULT_MODEL_ID")
            .map_err(|_| GatewayError::InvalidRequest("DEFAULT_MODEL_ID is not set".into()))?;
        let timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| {
                v.parse().map_err(|e| warn!("ignoring bad LLM_TIMEOUT_SECS: {e}")).ok()
            })
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let provider = match env::var("LLM_PROVIDER").as_deref() {
            Ok("static") => ProviderConfig::Static {
                content: String::new(),
            },
            _ => {
                let api_key = env::var("LLM_API_KEY").map_err(|_| {
                    GatewayError::InvalidRequest("LLM_API_KEY is not set".into())
                })?;
                ProviderConfig::Http {
                    api_key: Secret::new(api_key),
                    base_url: env::var("LLM_BASE_URL")
                        .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                }
            }
        };

        Ok(Self {
            region,
            default_model,
            timeout_secs,
            provider,
        })
    }

    /// A static-provider configuration for unit tests.
    pub fn for_tests(default_model: impl Into<String>) -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            default_model: default_model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            provider: ProviderConfig::Static {
                content: String::new(),
            },
        }
    }

    /// An explicit configuration; used when the operator wires the gateway
    /// programmatically.
    pub fn new(
        region: impl Into<String>,
        default_model: impl Into<String>,
        timeout_secs: u64,
        provider: ProviderConfig,
    ) -> Self {
        Self {
            region: region.into(),
            default_model: default_model.into(),
            timeout_secs,
            provider,
        }
    }

    /// The configured model region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The fallback model identifier.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// The per-request timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Instantiate the configured provider.
    pub fn create_provider(&self) -> Result<Box<dyn LlmProvider>, GatewayError> {
        match &self.provider {
            ProviderConfig::Http { api_key, base_url } => {
                let resolved = base_url.replace("{region}", &self.region);
                Ok(Box::new(HttpCompletionsProvider::new(
                    api_key.clone(),
                    self.default_model.clone(),
                    resolved,
                    self.timeout_secs,
                )?))
            }
            ProviderConfig::Static { content } => {
                Ok(Box::new(StaticProvider::new(content.clone())))
            }
        }
    }
}
