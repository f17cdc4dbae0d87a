//! Provider listing

use anyhow::{bail, Result};
use loom_gen::providers::{available_providers, create_provider};
use loom_gen::{LoomConfig, ProviderStatus};

pub fn run(config: &LoomConfig, schemas: bool, format: &str) -> Result<()> {
    let credentials = config.credentials();
    let mut rows = Vec::new();

    for name in available_providers() {
        let provider = create_provider(name, config)?;
        let status = if !config.is_enabled(name) {
            ProviderStatus::Disabled
        } else {
            provider.health_check(credentials.get(name))
        };
        rows.push((provider, status));
    }

    match format {
        "json" => {
            let items: Vec<serde_json::Value> = rows
                .iter()
                .map(|(provider, status)| {
                    let capabilities: Vec<serde_json::Value> = provider
                        .capabilities()
                        .into_iter()
                        .map(|cap| {
                            let model = config
                                .default_model(provider.name())
                                .unwrap_or_else(|| provider.default_model(cap));
                            let mut item = serde_json::json!({
                                "capability": cap.as_str(),
                                "default_model": model,
                            });
                            if schemas {
                                item["params"] =
                                    serde_json::to_value(&provider.schema(cap, model).params)
                                        .unwrap_or_default();
                            }
                            item
                        })
                        .collect();
                    serde_json::json!({
                        "name": provider.name(),
                        "status": status_label(status),
                        "capabilities": capabilities,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        "text" => {
            println!("{} provider(s):\n", rows.len());
            for (provider, status) in &rows {
                println!("  {:<10} {}", provider.name(), status_label(status));
                for cap in provider.capabilities() {
                    let model = config
                        .default_model(provider.name())
                        .unwrap_or_else(|| provider.default_model(cap));
                    println!("    {:<18} {}", cap.as_str(), model);
                    if schemas {
                        for spec in &provider.schema(cap, model).params {
                            let default = spec
                                .default
                                .as_ref()
                                .map(|d| format!(" = {}", d))
                                .unwrap_or_default();
                            let required = if spec.required { " (required)" } else { "" };
                            println!(
                                "      --param {}: {}{}{}  {}",
                                spec.name, spec.kind, default, required, spec.help
                            );
                        }
                    }
                }
            }
        }
        other => bail!("unknown format '{}' (expected text or json)", other),
    }
    Ok(())
}

fn status_label(status: &ProviderStatus) -> &'static str {
    match status {
        ProviderStatus::Available => "available",
        ProviderStatus::Disabled => "disabled",
        ProviderStatus::NoApiKey => "no API key",
    }
}
