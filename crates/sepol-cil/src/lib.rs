//! # sepol-cil: Common Intermediate Language policy compiler
//!
//! This crate turns CIL source into a binary SELinux kernel policy and a
//! `file_contexts` file.
//!
//! ## Pipeline
//!
//! 1. [`parser`]: tokens to a parse tree plus a [`parser::SourceMap`]
//! 2. [`build`]: parse tree to typed statements, names validated
//! 3. [`resolve`]: statements to a semantic [`db::Db`]
//! 4. [`order`]: partial ordering statements merged into total orders
//! 5. [`verify::pre_verify`]: checks that must hold before evaluation
//! 6. [`post`]: attribute and category evaluation, labeling sort
//! 7. [`verify::verify`]: contexts, levels and global settings
//! 8. [`binary`]: kernel values assigned, rules expanded, neverallows checked
//! 9. [`fc`]: `file_contexts` rendering
//!
//! ## Usage
//!
//! ```ignore
//! use sepol_cil::{Compiler, CompilerOptions};
//!
//! let mut compiler = Compiler::new(CompilerOptions::default());
//! compiler.add_file("policy.cil")?;
//! let compiled = compiler.compile()?;
//! std::fs::write("policy.33", &compiled.policy)?;
//! std::fs::write("file_contexts", &compiled.file_contexts)?;
//! ```

pub mod ast;
pub mod binary;
pub mod build;
pub mod db;
mod error;
pub mod fc;
pub mod lexer;
pub mod log;
pub mod order;
pub mod parser;
pub mod post;
pub mod resolve;
pub mod tree;
pub mod verify;

use std::path::Path;

use bytes::Bytes;
pub use error::{CilError, Location, Result};
pub use log::{LogLevel, LogSink, Logger, MemorySink, StderrSink, TracingSink};
use sepol_policydb::PolicyDb;
pub use sepol_policydb::PolicyStats;
pub use sepol_types::{HandleUnknown, PolicyVersion, TargetPlatform};
use tracing::{debug, info};

use crate::binary::{BinaryOptions, build_policydb};
use crate::build::BuildOptions;
use crate::db::Db;
use crate::order::order_policy;
use crate::parser::ParseTree;
use crate::post::PostOptions;
use crate::resolve::ResolveOptions;
use crate::verify::{PolicySettings, VerifyOptions};

/// Compiler switches; the defaults match `secilc` without flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    pub policy_version: PolicyVersion,
    pub target: TargetPlatform,
    /// Overrides the policy's `mls` statement.
    pub mls: Option<bool>,
    /// Overrides the policy's `handleunknown` statement.
    pub handle_unknown: Option<HandleUnknown>,
    /// Allow dots in declared names.
    pub qualified_names: bool,
    pub disable_neverallow: bool,
    /// Allow repeated type and type attribute declarations.
    pub multiple_decls: bool,
    /// Expand attributes only used by allow-style rules into their members.
    pub expand_attributes: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            policy_version: PolicyVersion::latest(),
            target: TargetPlatform::SELinux,
            mls: None,
            handle_unknown: None,
            qualified_names: false,
            disable_neverallow: false,
            multiple_decls: false,
            expand_attributes: false,
        }
    }
}

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// The binary kernel policy.
    pub policy: Bytes,
    pub file_contexts: String,
    pub settings: PolicySettings,
    pub stats: PolicyStats,
}

/// Collects CIL sources and compiles them as one policy.
///
/// Every added source becomes a sibling subtree of one parse tree, so
/// declarations in one file are visible from every other.
#[derive(Debug)]
pub struct Compiler {
    options: CompilerOptions,
    logger: Logger,
    tree: ParseTree,
    files: usize,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self::with_logger(options, Logger::default())
    }

    pub fn with_logger(options: CompilerOptions, logger: Logger) -> Self {
        Self {
            options,
            logger,
            tree: ParseTree::new(),
            files: 0,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Log level and sink may be changed between runs.
    pub fn logger_mut(&mut self) -> &mut Logger {
        &mut self.logger
    }

    pub fn parse_tree(&self) -> &ParseTree {
        &self.tree
    }

    /// Parses one source buffer; `path` is only used in diagnostics.
    pub fn add_source(&mut self, path: &str, src: &str) -> Result<()> {
        parser::parse(&self.logger, path, src, &mut self.tree)?;
        self.files += 1;
        Ok(())
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| CilError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_source(&path.display().to_string(), &src)
    }

    /// Runs every check without encoding the policy.
    pub fn check(&self) -> Result<PolicySettings> {
        let (_, settings, _) = self.lower()?;
        Ok(settings)
    }

    /// Compiles every added source into a binary policy and its
    /// `file_contexts`.
    pub fn compile(&self) -> Result<CompiledPolicy> {
        let (db, settings, policydb) = self.lower()?;
        let policy = policydb.to_bytes()?;
        let file_contexts = fc::file_contexts(&db, self.tree.sources(), settings.mls)?;
        let stats = policydb.stats();
        info!(
            bytes = policy.len(),
            version = self.options.policy_version.as_u32(),
            filecons = db.labeling.filecons.len(),
            "compiled policy"
        );
        Ok(CompiledPolicy {
            policy,
            file_contexts,
            settings,
            stats,
        })
    }

    fn lower(&self) -> Result<(Db, PolicySettings, PolicyDb)> {
        let logger = &self.logger;
        let sources = self.tree.sources();
        if self.files == 0 {
            return Err(CilError::policy("No input files given"));
        }

        logger.info("Building AST from Parse Tree");
        let stmts = build::build(
            logger,
            &self.tree,
            BuildOptions {
                qualified_names: self.options.qualified_names,
            },
        )?;

        logger.info("Resolving AST");
        let mut db = resolve::resolve(
            logger,
            sources,
            &stmts,
            ResolveOptions {
                multiple_decls: self.options.multiple_decls,
            },
        )?;
        order_policy(logger, sources, &mut db)?;
        verify::pre_verify(logger, sources, &db)?;

        logger.info("Qualifying Names");
        post::evaluate(
            logger,
            sources,
            &mut db,
            PostOptions {
                multiple_decls: self.options.multiple_decls,
            },
        )?;
        let settings = verify::verify(
            logger,
            sources,
            &db,
            VerifyOptions {
                mls: self.options.mls,
                handle_unknown: self.options.handle_unknown,
            },
        )?;

        logger.info("Building policy binary");
        let policydb = build_policydb(
            logger,
            sources,
            &db,
            settings,
            BinaryOptions {
                version: self.options.policy_version,
                target: self.options.target,
                disable_neverallow: self.options.disable_neverallow,
                expand_attributes: self.options.expand_attributes,
            },
        )?;
        debug!(files = self.files, statements = stmts.len(), "lowered policy");
        Ok((db, settings, policydb))
    }
}
