//! Info command - show the header of a binary policy.

use std::path::Path;

use anyhow::{Context, Result};
use sepol_policydb::PolicyHeader;
use serde::Serialize;

use crate::style::print_info_table;

#[derive(Serialize)]
struct HeaderInfo {
    target: &'static str,
    version: u32,
    mls: bool,
    handle_unknown: String,
    symbol_tables: u32,
    object_contexts: u32,
    capabilities: Vec<String>,
}

pub fn run(policy: &Path, format: &str) -> Result<()> {
    let data = std::fs::read(policy).with_context(|| format!("Failed to read {}", policy.display()))?;
    let header = PolicyHeader::read(&data)
        .with_context(|| format!("{} is not a binary policy", policy.display()))?;

    let info = HeaderInfo {
        target: header.target.target_string(),
        version: header.version,
        mls: header.mls(),
        handle_unknown: header.handle_unknown().to_string(),
        symbol_tables: header.sym_num,
        object_contexts: header.ocon_num,
        capabilities: header.capabilities.clone(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => {
            let version = info.version.to_string();
            let symbol_tables = info.symbol_tables.to_string();
            let object_contexts = info.object_contexts.to_string();
            let capabilities = if info.capabilities.is_empty() {
                "none".to_string()
            } else {
                info.capabilities.join(", ")
            };
            print_info_table(&[
                ("Target", info.target),
                ("Version", &version),
                ("MLS", if info.mls { "yes" } else { "no" }),
                ("Handle unknown", &info.handle_unknown),
                ("Symbol tables", &symbol_tables),
                ("Object contexts", &object_contexts),
                ("Capabilities", &capabilities),
            ]);
        }
    }
    Ok(())
}
