//! Configuration management commands.

use anyhow::{Context, Result};
use sepol_config::{CompilerConfig, Paths};
use std::path::Path;

/// Show current configuration.
pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = CompilerConfig::load_from_dir(project).context("Failed to load configuration")?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        "toml" => {
            println!("{}", config.to_toml()?);
        }
        _ => {
            let unset = |v: Option<String>| v.unwrap_or_else(|| "from policy".to_string());
            let c = &config.compiler;

            println!("secilc Configuration");
            println!("====================\n");

            println!("Sources:");
            let files = Paths::new().existing_config_files(project);
            if files.is_empty() {
                println!("  (built-in defaults)");
            }
            for file in files {
                println!("  {}", file.display());
            }
            println!();

            println!("Compiler:");
            println!("  Policy version: {}", c.policy_version);
            println!("  Target: {}", c.target);
            println!("  MLS: {}", unset(c.mls.map(|m| m.to_string())));
            println!("  Handle unknown: {}", unset(c.handle_unknown.map(|h| h.to_string())));
            println!("  Qualified names: {}", c.qualified_names);
            println!("  Disable neverallow: {}", c.disable_neverallow);
            println!("  Multiple declarations: {}", c.multiple_decls);
            println!("  Expand attributes: {}", c.expand_attributes);
            println!();

            println!("Output:");
            println!("  Policy file: {}", config.policy_file().display());
            println!("  File contexts: {}", config.output.file_contexts.display());
            println!();

            println!("Log:");
            println!("  Level: {}", config.log.level);
        }
    }

    Ok(())
}
