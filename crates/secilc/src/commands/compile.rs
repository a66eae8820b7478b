//! Compile, check and stats commands.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;
use tracing::debug;

use super::CompilerArgs;
use crate::style::{print_info_table, print_labeled, print_success};

/// Compiles the inputs and writes the binary policy and file_contexts.
pub fn run(
    args: &CompilerArgs,
    verbose: u8,
    output: Option<PathBuf>,
    filecontexts: Option<PathBuf>,
) -> Result<()> {
    let config = args.config()?;
    let compiled = args
        .compiler(&config, verbose)?
        .compile()
        .context("Failed to compile policy")?;

    let policy_file = output.unwrap_or_else(|| config.policy_file());
    let fc_file = filecontexts.unwrap_or_else(|| config.output.file_contexts.clone());
    write_outputs(&[
        (policy_file.as_path(), &compiled.policy[..]),
        (fc_file.as_path(), compiled.file_contexts.as_bytes()),
    ])?;
    debug!(
        policy = %policy_file.display(),
        file_contexts = %fc_file.display(),
        "wrote outputs"
    );

    print_success(&format!(
        "Compiled {} file(s) into {}",
        args.files.len(),
        policy_file.display()
    ));
    print_labeled("Policy version", &config.compiler.policy_version.to_string());
    print_labeled("MLS", &compiled.settings.mls.to_string());
    print_labeled("File contexts", &fc_file.display().to_string());
    Ok(())
}

/// Runs every check without writing anything.
pub fn check(args: &CompilerArgs, verbose: u8) -> Result<()> {
    let config = args.config()?;
    args.compiler(&config, verbose)?
        .check()
        .context("Policy check failed")?;
    print_success(&format!("{} file(s) passed all checks", args.files.len()));
    Ok(())
}

/// Compiles the inputs and prints the size of the result.
pub fn stats(args: &CompilerArgs, verbose: u8, format: &str) -> Result<()> {
    let config = args.config()?;
    let compiled = args
        .compiler(&config, verbose)?
        .compile()
        .context("Failed to compile policy")?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&compiled.stats)?);
        }
        _ => {
            let value = serde_json::to_value(&compiled.stats)?;
            let rows: Vec<(String, String)> = value
                .as_object()
                .into_iter()
                .flatten()
                .map(|(key, value)| {
                    let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                    (key.replace('_', " "), value)
                })
                .collect();
            let entries: Vec<(&str, &str)> = rows.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            print_info_table(&entries);
        }
    }
    Ok(())
}

/// Stages every output beside its destination and moves them into place
/// only once all of them were written.
fn write_outputs(outputs: &[(&Path, &[u8])]) -> Result<()> {
    let mut staged = Vec::with_capacity(outputs.len());
    for &(path, data) in outputs {
        staged.push((stage(path, data)?, path));
    }
    for (file, path) in staged {
        file.persist(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn stage(path: &Path, data: &[u8]) -> Result<NamedTempFile> {
    if path.is_dir() {
        bail!("Failed to write {}: is a directory", path.display());
    }
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
            parent
        }
        None => Path::new("."),
    };
    let failed = || format!("Failed to write {}", path.display());
    let mut file = NamedTempFile::new_in(dir).with_context(failed)?;
    file.write_all(data).with_context(failed)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .with_context(failed)?;
    }
    Ok(file)
}
