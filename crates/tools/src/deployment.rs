//! Tools backed by another model deployment.
//!
//! A deployment tool forwards the model's `prompt` argument to a separate
//! deployment (an image model, say) and collects what it streams back.
//! Every other argument travels along as `custom_fields`.

use std::sync::Arc;
use async_trait::async_trait;
use tooloop_core::error::ToolError;
use tooloop_core::message::{Attachment, Message};
use tooloop_core::provider::{Provider, ProviderRequest};
use tooloop_core::tool::{Tool, ToolCall, ToolContext, ToolResult};
use tracing::debug;

/// Text and attachments streamed back by a deployment.
#[derive(Debug, Default)]
pub struct DeploymentOutput {
    pub content: String,
    pub attachments: Vec<Attachment>,
}

/// Client for one deployment reached through the shared provider.
pub struct DeploymentTool {
    provider: Arc<dyn Provider>,
    deployment: String,
    system_prompt: Option<String>,
}

impl DeploymentTool {
    pub fn new(provider: Arc<dyn Provider>, deployment: impl Into<String>) -> Self {
        Self {
            provider,
            deployment: deployment.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Send the call's prompt to the deployment and drain its stream.
    ///
    /// `api_key` is the caller's credential; without one the provider
    /// authenticates with its own.
    pub async fn invoke(&self, call: &ToolCall, api_key: Option<&str>) -> Result<DeploymentOutput, ToolError> {
        let mut arguments = match &call.arguments {
            serde_json::Value::Object(map) => map.clone(),
            _ => {
                return Err(ToolError::InvalidArguments(
                    "Arguments must be a JSON object".into(),
                ));
            }
        };
        let prompt = match arguments.remove("prompt") {
            Some(serde_json::Value::String(p)) => p,
            Some(_) => return Err(ToolError::InvalidArguments("'prompt' must be a string".into())),
            None => String::new(),
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let mut request =
            ProviderRequest::new(self.deployment.clone(), messages).with_api_key(api_key.map(str::to_string));
        if !arguments.is_empty() {
            request.custom_fields = Some(serde_json::Value::Object(arguments));
        }

        debug!(deployment = %self.deployment, tool = %call.name, "Calling deployment");

        let mut rx = self
            .provider
            .stream(request)
            .await
            .map_err(|e| self.failed(call, e))?;

        let mut output = DeploymentOutput::default();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(|e| self.failed(call, e))?;
            if let Some(text) = chunk.content {
                output.content.push_str(&text);
            }
            output.attachments.extend(chunk.attachments);
        }
        Ok(output)
    }

    fn failed(&self, call: &ToolCall, err: impl std::fmt::Display) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: call.name.clone(),
            reason: format!("deployment '{}': {err}", self.deployment),
        }
    }
}

const IMAGE_SHOWN: &str = "The image has been successfully generated according to request and shown to user!";

/// Generates images from a text prompt using an image deployment.
pub struct ImageGenerationTool {
    deployment: DeploymentTool,
}

impl ImageGenerationTool {
    pub fn new(provider: Arc<dyn Provider>, deployment: impl Into<String>) -> Self {
        Self {
            deployment: DeploymentTool::new(provider, deployment),
        }
    }
}

#[async_trait]
impl Tool for ImageGenerationTool {
    fn name(&self) -> &str {
        "image_generation"
    }

    fn description(&self) -> &str {
        "Generates images from a detailed prompt. Use it when the user asks for an image, \
         illustration or other visual content. Size, style and quality can be chosen. \
         Generated images are shown to the user directly in the chat."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Extensive description of the image to generate"
                },
                "size": {
                    "type": "string",
                    "enum": ["1024x1024", "1024x1792", "1792x1024"],
                    "description": "Size of the generated image. Optional."
                },
                "style": {
                    "type": "string",
                    "enum": ["natural", "vivid"],
                    "description": "Style of the generated image. Optional."
                },
                "quality": {
                    "type": "string",
                    "enum": ["standard", "hd"],
                    "description": "Quality of the generated image. Optional."
                }
            },
            "required": ["prompt"]
        })
    }

    fn trace_visible(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let output = self.deployment.invoke(call, ctx.api_key.as_deref()).await?;
        let images: Vec<Attachment> = output.attachments.into_iter().filter(Attachment::is_image).collect();
        Ok(ToolResult::success(call, image_answer(output.content, &images)).with_attachments(images))
    }
}

/// Append a markdown link per image; fall back to a fixed notice when the
/// deployment produced nothing to show.
fn image_answer(mut content: String, images: &[Attachment]) -> String {
    for image in images {
        content.push_str(&format!("\n\r![image]({})\n\r", image.url));
    }
    if content.trim().is_empty() {
        return IMAGE_SHOWN.to_string();
    }
    content
}
