//! secilc: compile SELinux CIL policy.
//!
//! # Quick Start
//!
//! ```bash
//! # Build policy.33 and file_contexts from CIL sources
//! secilc compile base.cil modules/*.cil
//!
//! # Only check the policy
//! secilc check base.cil modules/*.cil
//!
//! # Inspect a compiled policy
//! secilc info policy.33
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::CompilerArgs;

/// secilc - the SELinux Common Intermediate Language policy compiler.
#[derive(Parser)]
#[command(name = "secilc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Print more diagnostics (-v warnings, -vv progress notes).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Compile CIL files into a binary policy and file_contexts.
    Compile {
        #[command(flatten)]
        compiler: CompilerArgs,

        /// Write the binary policy here (default: policy.<version>).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write file_contexts here (default: file_contexts).
        #[arg(short = 'f', long)]
        filecontexts: Option<PathBuf>,
    },

    /// Run every check without writing output.
    Check {
        #[command(flatten)]
        compiler: CompilerArgs,
    },

    /// Show the header of a compiled binary policy.
    Info {
        /// Path to the binary policy.
        policy: PathBuf,

        /// Output format (text, json).
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Compile CIL files and report symbol and rule counts.
    Stats {
        #[command(flatten)]
        compiler: CompilerArgs,

        /// Output format (text, json).
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Configuration commands.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration.
    Show {
        /// Project directory holding secilc.toml.
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Output format (text, toml, json).
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Compile {
            compiler,
            output,
            filecontexts,
        } => commands::compile::run(&compiler, cli.verbose, output, filecontexts),
        Commands::Check { compiler } => commands::compile::check(&compiler, cli.verbose),
        Commands::Info { policy, format } => commands::info::run(&policy, &format),
        Commands::Stats { compiler, format } => {
            commands::compile::stats(&compiler, cli.verbose, &format)
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { project, format } => commands::config::show(&project, &format),
        },
    }
}
