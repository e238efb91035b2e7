//! `tooloop tools`: list the tools the agent would be given.

use tooloop_config::AppConfig;
use tooloop_core::provider::ToolDefinition;

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = tooloop_providers::build_from_config(&config)?;
    let registry = tooloop_tools::build_registry(&config, provider).await?;
    let definitions = registry.definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
    } else {
        print!("{}", listing(&definitions));
    }
    Ok(())
}

fn listing(definitions: &[ToolDefinition]) -> String {
    if definitions.is_empty() {
        return "No tools configured.\n".to_string();
    }
    let width = definitions.iter().map(|d| d.name.len()).max().unwrap_or(0);
    let mut out = format!("{} tools:\n", definitions.len());
    for def in definitions {
        let summary = def.description.split(". ").next().unwrap_or("").trim_end_matches('.');
        out.push_str(&format!("  {:<width$}  {summary}\n", def.name));
    }
    out
}
