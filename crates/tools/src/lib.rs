//! Built-in tool implementations for Tooloop.
//!
//! Tools give the agent the ability to act: generate images through another
//! deployment, read uploaded files, run code and call whatever an MCP
//! server exposes.

pub mod code_interpreter;
pub mod deployment;
pub mod file_extraction;
pub mod file_store;
pub mod mcp;

use std::sync::Arc;
use tooloop_config::AppConfig;
use tooloop_core::error::ToolError;
use tooloop_core::provider::Provider;
use tooloop_core::tool::{Tool, ToolRegistry};
use tracing::{info, warn};

pub use code_interpreter::CodeInterpreterTool;
pub use deployment::{DeploymentOutput, DeploymentTool, ImageGenerationTool};
pub use file_extraction::FileExtractionTool;
pub use file_store::{AppDataStore, FileStore};
pub use mcp::{McpClient, McpSession, McpTool, McpToolSpec, ResourceData};

/// Build the tool registry described by the configuration.
///
/// Local tools that fail to build are configuration errors. Remote servers
/// that cannot be reached are logged and skipped so the agent still starts,
/// as are MCP tools whose names are already taken.
pub async fn build_registry(config: &AppConfig, provider: Arc<dyn Provider>) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    let tools = &config.tools;

    if let Some(deployment) = &tools.image_deployment {
        registry.register(Arc::new(ImageGenerationTool::new(provider.clone(), deployment.clone())))?;
    }

    if tools.file_extraction {
        registry.register(Arc::new(FileExtractionTool::new(&config.endpoint, tools.file_page_size)?))?;
    }

    if let Some(interpreter) = &tools.code_interpreter {
        let files = Arc::new(AppDataStore::new(&config.endpoint)?);
        match CodeInterpreterTool::connect(&interpreter.url, &interpreter.tool_name, files).await {
            Ok(tool) => registry.register(Arc::new(tool))?,
            Err(e) => warn!(url = %interpreter.url, error = %e, "Code interpreter unavailable, skipping"),
        }
    }

    for server in &tools.mcp_servers {
        let discovered = match mcp::discover(&server.name, &server.url).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %server.name, error = %e, "MCP server unavailable, skipping");
                continue;
            }
        };
        for tool in discovered {
            let name = tool.name().to_string();
            if let Err(e) = registry.register(Arc::new(tool)) {
                warn!(server = %server.name, tool = %name, error = %e, "Skipping MCP tool");
            }
        }
    }

    info!(tools = ?registry.names(), "Tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tooloop_config::{CodeInterpreterConfig, McpServerConfig};
    use tooloop_core::error::ProviderError;
    use tooloop_core::provider::{ProviderRequest, ProviderResponse};

    struct Offline;

    #[async_trait::async_trait]
    impl Provider for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("offline".into()))
        }
    }

    #[tokio::test]
    async fn default_config_registers_local_tools() {
        let registry = build_registry(&AppConfig::default(), Arc::new(Offline)).await.unwrap();
        assert_eq!(registry.names(), vec!["image_generation", "file_content_extraction"]);
    }

    #[tokio::test]
    async fn disabled_tools_are_left_out() {
        let mut config = AppConfig::default();
        config.tools.image_deployment = None;
        config.tools.file_extraction = false;
        let registry = build_registry(&config, Arc::new(Offline)).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unreachable_servers_are_skipped() {
        let mut config = AppConfig::default();
        config.tools.mcp_servers = vec![McpServerConfig {
            name: "nowhere".into(),
            url: "http://127.0.0.1:1/mcp".into(),
        }];
        config.tools.code_interpreter = Some(CodeInterpreterConfig {
            url: "http://127.0.0.1:1/mcp".into(),
            tool_name: "execute_code".into(),
        });
        let registry = build_registry(&config, Arc::new(Offline)).await.unwrap();
        assert_eq!(registry.len(), 2);
    }
}
