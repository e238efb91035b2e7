//! LLM Provider implementations for Tooloop.
//!
//! All providers implement the `tooloop_core::Provider` trait.
//! [`build_from_config`] turns the loaded configuration into the backend
//! the agent talks to.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;
use tooloop_config::AppConfig;
use tooloop_core::error::ProviderError;
use tooloop_core::provider::Provider;

/// Build the model backend described by the configuration.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    if config.endpoint.trim().is_empty() {
        return Err(ProviderError::NotConfigured("endpoint is empty".into()));
    }

    tracing::debug!(endpoint = %config.endpoint, deployment = %config.deployment, "Building provider");

    let provider = OpenAiCompatProvider::new("openai_compat", &config.endpoint, config.api_key.clone())?;
    Ok(Arc::new(provider))
}
