//! Version command implementation.

use sepol_types::PolicyVersion;

/// Version information for the CLI.
const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

pub fn run() {
    println!("{NAME} {VERSION}");
    println!();
    println!("SELinux Common Intermediate Language policy compiler.");
    println!();
    println!("Build info:");
    println!(
        "  Policy versions: {}-{}",
        PolicyVersion::MIN_WRITABLE,
        PolicyVersion::MAX
    );
    println!("  Targets:         selinux, xen");
    println!("  Arch:            {}", std::env::consts::ARCH);
    println!("  OS:              {}", std::env::consts::OS);
}
