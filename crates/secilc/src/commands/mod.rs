//! CLI command implementations.

pub mod compile;
pub mod config;
pub mod info;
pub mod version;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use sepol_cil::{Compiler, LogLevel, Logger};
use sepol_config::{CompilerConfig, ConfigLoader};
use sepol_types::{HandleUnknown, TargetPlatform};

use crate::style::TerminalSink;

/// Inputs and switches shared by every command that compiles.
#[derive(Args, Debug)]
pub struct CompilerArgs {
    /// CIL source files, compiled as one policy.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Read configuration from this file instead of the layered defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Kernel policy version to build.
    #[arg(short = 'c', long = "policyvers", value_parser = clap::value_parser!(u32).range(24..=33))]
    pub policy_version: Option<u32>,

    /// Target platform (selinux, xen).
    #[arg(short, long)]
    pub target: Option<TargetPlatform>,

    /// Build an MLS policy regardless of the policy's mls statement.
    #[arg(short = 'M', long, value_name = "true|false")]
    pub mls: Option<bool>,

    /// How the kernel treats unknown classes (deny, reject, allow).
    #[arg(short = 'U', long)]
    pub handle_unknown: Option<HandleUnknown>,

    /// Allow dots in declared names.
    #[arg(short = 'Q', long)]
    pub qualified_names: bool,

    /// Skip neverallow checking.
    #[arg(short = 'N', long)]
    pub disable_neverallow: bool,

    /// Allow repeated type and typeattribute declarations.
    #[arg(short = 'm', long)]
    pub multiple_decls: bool,

    /// Expand attributes used only in access rules into their types.
    #[arg(long)]
    pub expand_attributes: bool,
}

impl CompilerArgs {
    /// Loads configuration and lays the command-line flags over it.
    pub fn config(&self) -> Result<CompilerConfig> {
        let mut config = match &self.config {
            Some(path) => CompilerConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => ConfigLoader::new().load().context("Failed to load configuration")?,
        };

        let c = &mut config.compiler;
        if let Some(version) = self.policy_version {
            c.policy_version = version;
        }
        if let Some(target) = self.target {
            c.target = target;
        }
        if self.mls.is_some() {
            c.mls = self.mls;
        }
        if self.handle_unknown.is_some() {
            c.handle_unknown = self.handle_unknown;
        }
        c.qualified_names |= self.qualified_names;
        c.disable_neverallow |= self.disable_neverallow;
        c.multiple_decls |= self.multiple_decls;
        c.expand_attributes |= self.expand_attributes;

        config.validate()?;
        Ok(config)
    }

    /// Parses every input file into a compiler built from `config`.
    pub fn compiler(&self, config: &CompilerConfig, verbose: u8) -> Result<Compiler> {
        let level = match verbose {
            0 => config.log.level,
            1 => config.log.level.max(LogLevel::Warn),
            _ => LogLevel::Info,
        };
        let mut compiler = Compiler::with_logger(config.compiler_options(), Logger::new(level, TerminalSink));
        for file in &self.files {
            compiler
                .add_file(file)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
        }
        Ok(compiler)
    }
}
