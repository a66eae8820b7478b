//! End-to-end compilation through the public `Compiler` API.

use std::fmt::Write as _;
use std::io::Write as _;

use sepol_cil::{
    CilError, Compiler, CompilerOptions, HandleUnknown, LogLevel, Logger, MemorySink, PolicyVersion,
};
use sepol_policydb::PolicyHeader;

const MINIMAL: &str = "\
(class file (read write))
(classorder (file))
(sid kernel)
(sidorder (kernel))
(sensitivity s0)
(sensitivity s1)
(sensitivity s2)
(sensitivityorder (s0 s1 s2))
(category c0)
(category c1)
(categoryorder (c0 c1))
(sensitivitycategory s0 (c0 c1))
(sensitivitycategory s1 (c0 c1))
(sensitivitycategory s2 (c0 c1))
(user u)
(role r)
(type t)
(userrole u r)
(roletype r t)
(userlevel u (s0))
(userrange u ((s0) (s2 (c0 c1))))
(sidcontext kernel (u r t ((s0) (s0))))
(allow t t (file (read)))
";

fn compiler_with(extra: &str, options: CompilerOptions) -> Compiler {
    let mut compiler = Compiler::new(options);
    compiler
        .add_source("policy.cil", &format!("{MINIMAL}{extra}"))
        .unwrap();
    compiler
}

fn check(extra: &str) -> Result<(), CilError> {
    compiler_with(extra, CompilerOptions::default()).check().map(|_| ())
}

#[test]
fn minimal_policy_has_a_valid_header() {
    let compiled = compiler_with("", CompilerOptions::default()).compile().unwrap();
    let header = PolicyHeader::read(&compiled.policy).unwrap();
    assert_eq!(header.version, PolicyVersion::latest().as_u32());
    assert!(!header.mls());
    assert_eq!(header.handle_unknown(), HandleUnknown::Deny);
    assert_eq!(compiled.stats.types, 1);
    assert_eq!(compiled.stats.av_rules, 1);
    assert!(compiled.file_contexts.is_empty());
}

#[test]
fn options_override_policy_settings() {
    let options = CompilerOptions {
        mls: Some(true),
        handle_unknown: Some(HandleUnknown::Allow),
        policy_version: PolicyVersion::new(30),
        ..CompilerOptions::default()
    };
    let compiled = compiler_with("(mls false) (handleunknown reject)", options)
        .compile()
        .unwrap();
    let header = PolicyHeader::read(&compiled.policy).unwrap();
    assert_eq!(header.version, 30);
    assert!(header.mls());
    assert_eq!(header.handle_unknown(), HandleUnknown::Allow);
}

#[test]
fn file_contexts_are_sorted_and_rendered() {
    let compiled = compiler_with(
        "(filecon \"/usr/bin/ls\" file (u r t ((s0) (s0))))\n\
         (filecon \"/usr(/.*)?\" any (u r t ((s0) (s0))))\n\
         (filecon \"/tmp\" dir ())\n",
        CompilerOptions::default(),
    )
    .compile()
    .unwrap();
    assert_eq!(
        compiled.file_contexts,
        "/usr(/.*)?\tu:r:t\n/tmp\t-d\t<<none>>\n/usr/bin/ls\t--\tu:r:t\n"
    );
}

#[test]
fn sources_from_several_files_share_one_namespace() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    compiler.add_source("base.cil", MINIMAL).unwrap();
    compiler
        .add_source("extra.cil", "(type t2)\n(roletype r t2)\n(allow t2 t (file (write)))\n")
        .unwrap();
    let compiled = compiler.compile().unwrap();
    assert_eq!(compiled.stats.types, 2);
    assert_eq!(compiled.stats.av_rules, 2);
}

#[test]
fn misspelled_class_is_reported_with_its_line() {
    let err = check("(allow t t (fiel (read)))\n").unwrap_err();
    let lines = MINIMAL.lines().count() + 1;
    assert_eq!(
        err.to_string(),
        format!("Failed to resolve class fiel in allow statement at policy.cil:{lines}")
    );
}

#[test]
fn circular_bounds_are_rejected() {
    let err = check("(type b1) (type b2) (type b3) (typebounds b1 b2) (typebounds b2 b3) (typebounds b3 b1)")
        .unwrap_err();
    assert!(err.to_string().starts_with("Circular bounds found for type"), "{err}");
}

#[test]
fn long_bounds_chain_is_accepted() {
    let mut extra = String::new();
    for n in 0..1000 {
        let _ = write!(extra, "(type b{n}) ");
    }
    for n in 1..1000 {
        let _ = write!(extra, "(typebounds b{} b{n}) ", n - 1);
    }
    check(&extra).unwrap();
}

#[test]
fn level_ranges_must_be_ordered() {
    let err = check("(levelrange bad ((s2) (s0)))").unwrap_err();
    assert!(err.to_string().contains("Sensitivity s0 does not dominate s2"), "{err}");

    let err = check("(levelrange bad ((s0 (c0 c1)) (s2 (c0))))").unwrap_err();
    assert!(
        err.to_string()
            .contains("Low level category set must be a subset of the high level category set"),
        "{err}"
    );

    check("(levelrange same ((s1 (c0)) (s1 (c0))))").unwrap();
}

#[test]
fn neverallow_can_be_disabled() {
    let extra = "(neverallow t t (file (read)))";
    let err = check(extra).unwrap_err();
    assert!(err.to_string().starts_with("neverallow check failed"), "{err}");

    let options = CompilerOptions {
        disable_neverallow: true,
        ..CompilerOptions::default()
    };
    compiler_with(extra, options).compile().unwrap();
}

#[test]
fn warnings_reach_the_configured_sink() {
    let sink = MemorySink::new();
    let logger = Logger::new(LogLevel::Warn, sink.clone());
    let mut compiler = Compiler::with_logger(CompilerOptions::default(), logger);
    compiler
        .add_source(
            "policy.cil",
            &format!("{MINIMAL}(typetransition t t file t)\n(typetransition t t file t)\n"),
        )
        .unwrap();
    compiler.compile().unwrap();
    assert!(sink.contains(LogLevel::Warn, "Duplicate typetransition rule"));
    assert!(!sink.contains(LogLevel::Info, "Parsing"));
}

#[test]
fn compiling_without_sources_fails() {
    let err = Compiler::new(CompilerOptions::default()).compile().unwrap_err();
    assert_eq!(err.to_string(), "No input files given");
}

#[test]
fn files_are_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.cil");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(MINIMAL.as_bytes()).unwrap();
    drop(file);

    let mut compiler = Compiler::new(CompilerOptions::default());
    compiler.add_file(&path).unwrap();
    compiler.check().unwrap();

    let err = compiler.add_file(dir.path().join("missing.cil")).unwrap_err();
    assert!(matches!(err, CilError::Io { .. }));
}
