//! # sepol-types: Kernel policy vocabulary shared across the compiler
//!
//! This crate holds the small, copyable types that both the CIL front end
//! and the binary policy database agree on:
//! - Symbol table kinds ([`SymbolKind`])
//! - Format versions and their feature gates ([`PolicyVersion`])
//! - Target platforms ([`TargetPlatform`]) and unknown-permission handling ([`HandleUnknown`])
//! - Object context vocabularies ([`PortProtocol`], [`FsUseBehavior`], [`FileType`])
//! - Class defaults ([`DefaultObject`], [`DefaultRange`])
//! - Policy capabilities ([`PolicyCapability`])

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Magic numbers
// ============================================================================

/// Magic number at the start of every kernel policy file.
pub const POLICYDB_MAGIC: u32 = 0xf97c_ff8c;

/// `highbit` values and start bits in serialized bitmaps are multiples of this.
pub const MAPSIZE: u32 = 64;

/// Config flag set in the header when the policy is MLS-enabled.
pub const POLICYDB_CONFIG_MLS: u32 = 1;

/// Mask of the header config bits that carry [`HandleUnknown`].
pub const POLICYDB_CONFIG_UNKNOWN_MASK: u32 = 0x6;

// ============================================================================
// Symbol kinds
// ============================================================================

/// The eight kernel symbol tables, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Commons,
    Classes,
    Roles,
    Types,
    Users,
    Bools,
    Levels,
    Cats,
}

impl SymbolKind {
    /// Number of symbol tables in a kernel policy.
    pub const COUNT: usize = 8;

    /// All kinds in the order they are written.
    pub const ALL: [SymbolKind; Self::COUNT] = [
        SymbolKind::Commons,
        SymbolKind::Classes,
        SymbolKind::Roles,
        SymbolKind::Types,
        SymbolKind::Users,
        SymbolKind::Bools,
        SymbolKind::Levels,
        SymbolKind::Cats,
    ];

    /// Index of this table in the symbol table array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bucket count used for the name table of this kind.
    pub fn table_size(self) -> usize {
        match self {
            SymbolKind::Commons => 2,
            SymbolKind::Classes => 32,
            SymbolKind::Roles | SymbolKind::Bools | SymbolKind::Levels | SymbolKind::Cats => 16,
            SymbolKind::Types => 512,
            SymbolKind::Users => 128,
        }
    }
}

// ============================================================================
// Policy versions
// ============================================================================

/// A kernel policy format version.
///
/// Each feature the encoder emits is gated on a minimum version; the
/// `supports_*` methods name those gates so call sites read as intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyVersion(u32);

impl PolicyVersion {
    pub const BASE: u32 = 15;
    pub const BOOL: u32 = 16;
    pub const IPV6: u32 = 17;
    pub const NLCLASS: u32 = 18;
    pub const MLS: u32 = 19;
    pub const AVTAB: u32 = 20;
    pub const RANGETRANS: u32 = 21;
    pub const POLCAP: u32 = 22;
    pub const PERMISSIVE: u32 = 23;
    pub const BOUNDARY: u32 = 24;
    pub const FILENAME_TRANS: u32 = 25;
    pub const ROLETRANS: u32 = 26;
    pub const NEW_OBJECT_DEFAULTS: u32 = 27;
    pub const DEFAULT_TYPE: u32 = 28;
    pub const CONSTRAINT_NAMES: u32 = 29;
    pub const XPERMS_IOCTL: u32 = 30;
    pub const INFINIBAND: u32 = 31;
    pub const GLBLUB: u32 = 32;
    pub const COMP_FTRANS: u32 = 33;

    /// Xen reuses the numbering; devicetree contexts arrived with 30.
    pub const XEN_DEVICETREE: u32 = 30;

    /// Oldest version the encoder writes.
    pub const MIN_WRITABLE: u32 = Self::BOUNDARY;
    /// Newest version known to this crate.
    pub const MAX: u32 = Self::COMP_FTRANS;

    pub fn new(version: u32) -> Self {
        Self(version)
    }

    pub fn latest() -> Self {
        Self(Self::MAX)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// True when the encoder can produce this version.
    pub fn is_writable(self) -> bool {
        (Self::MIN_WRITABLE..=Self::MAX).contains(&self.0)
    }

    /// Avtab records use the tagged (non-legacy) layout.
    pub fn has_tagged_avtab(self) -> bool {
        self.0 >= Self::AVTAB
    }

    pub fn supports_permissive(self) -> bool {
        self.0 >= Self::PERMISSIVE
    }

    pub fn supports_bounds(self) -> bool {
        self.0 >= Self::BOUNDARY
    }

    pub fn supports_filename_trans(self) -> bool {
        self.0 >= Self::FILENAME_TRANS
    }

    pub fn supports_compact_filename_trans(self) -> bool {
        self.0 >= Self::COMP_FTRANS
    }

    pub fn supports_roletrans_class(self) -> bool {
        self.0 >= Self::ROLETRANS
    }

    pub fn supports_rangetrans_class(self) -> bool {
        self.0 >= Self::RANGETRANS
    }

    pub fn supports_object_defaults(self) -> bool {
        self.0 >= Self::NEW_OBJECT_DEFAULTS
    }

    pub fn supports_default_type(self) -> bool {
        self.0 >= Self::DEFAULT_TYPE
    }

    pub fn supports_xperms(self) -> bool {
        self.0 >= Self::XPERMS_IOCTL
    }

    pub fn supports_glblub(self) -> bool {
        self.0 >= Self::GLBLUB
    }

    /// Number of object context lists written for the given target.
    pub fn ocon_count(self, target: TargetPlatform) -> u32 {
        match target {
            TargetPlatform::SELinux => {
                if self.0 >= Self::INFINIBAND {
                    OCON_IBENDPORT + 1
                } else {
                    OCON_NODE6 + 1
                }
            }
            TargetPlatform::Xen => {
                if self.0 >= Self::XEN_DEVICETREE {
                    OCON_XEN_DEVICETREE + 1
                } else {
                    OCON_XEN_PCIDEVICE + 1
                }
            }
        }
    }
}

impl Default for PolicyVersion {
    fn default() -> Self {
        Self::latest()
    }
}

impl Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PolicyVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<PolicyVersion> for u32 {
    fn from(version: PolicyVersion) -> Self {
        version.0
    }
}

// ============================================================================
// Object context slots
// ============================================================================

pub const OCON_ISID: u32 = 0;
pub const OCON_FS: u32 = 1;
pub const OCON_PORT: u32 = 2;
pub const OCON_NETIF: u32 = 3;
pub const OCON_NODE: u32 = 4;
pub const OCON_FSUSE: u32 = 5;
pub const OCON_NODE6: u32 = 6;
pub const OCON_IBPKEY: u32 = 7;
pub const OCON_IBENDPORT: u32 = 8;

pub const OCON_XEN_ISID: u32 = 0;
pub const OCON_XEN_PIRQ: u32 = 1;
pub const OCON_XEN_IOPORT: u32 = 2;
pub const OCON_XEN_IOMEM: u32 = 3;
pub const OCON_XEN_PCIDEVICE: u32 = 4;
pub const OCON_XEN_DEVICETREE: u32 = 5;

// ============================================================================
// Platform and global settings
// ============================================================================

/// Which kernel the policy is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetPlatform {
    #[default]
    #[serde(rename = "selinux")]
    SELinux,
    Xen,
}

impl TargetPlatform {
    /// Identification string written after the magic number.
    pub fn target_string(self) -> &'static str {
        match self {
            TargetPlatform::SELinux => "SE Linux",
            TargetPlatform::Xen => "XenFlask",
        }
    }

    pub fn from_target_string(s: &str) -> Option<Self> {
        match s {
            "SE Linux" => Some(TargetPlatform::SELinux),
            "XenFlask" => Some(TargetPlatform::Xen),
            _ => None,
        }
    }
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "selinux" => Ok(TargetPlatform::SELinux),
            "xen" => Ok(TargetPlatform::Xen),
            other => Err(format!("unknown target platform '{other}'")),
        }
    }
}

impl Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPlatform::SELinux => f.write_str("selinux"),
            TargetPlatform::Xen => f.write_str("xen"),
        }
    }
}

/// How the kernel treats classes and permissions missing from the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandleUnknown {
    #[default]
    Deny,
    Reject,
    Allow,
}

impl HandleUnknown {
    /// Bits OR-ed into the header config word.
    pub fn config_bits(self) -> u32 {
        match self {
            HandleUnknown::Deny => 0,
            HandleUnknown::Reject => 2,
            HandleUnknown::Allow => 4,
        }
    }

    pub fn from_config_bits(config: u32) -> Self {
        match config & POLICYDB_CONFIG_UNKNOWN_MASK {
            2 => HandleUnknown::Reject,
            4 => HandleUnknown::Allow,
            _ => HandleUnknown::Deny,
        }
    }
}

impl FromStr for HandleUnknown {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny" => Ok(HandleUnknown::Deny),
            "reject" => Ok(HandleUnknown::Reject),
            "allow" => Ok(HandleUnknown::Allow),
            other => Err(format!("unknown handleunknown value '{other}'")),
        }
    }
}

impl Display for HandleUnknown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleUnknown::Deny => "deny",
            HandleUnknown::Reject => "reject",
            HandleUnknown::Allow => "allow",
        })
    }
}

// ============================================================================
// Object context vocabularies
// ============================================================================

/// Transport protocol of a `portcon`, stored as its IP protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PortProtocol {
    Tcp,
    Udp,
    Dccp,
    Sctp,
}

impl PortProtocol {
    pub fn number(self) -> u32 {
        match self {
            PortProtocol::Tcp => 6,
            PortProtocol::Udp => 17,
            PortProtocol::Dccp => 33,
            PortProtocol::Sctp => 132,
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(PortProtocol::Tcp),
            "udp" => Some(PortProtocol::Udp),
            "dccp" => Some(PortProtocol::Dccp),
            "sctp" => Some(PortProtocol::Sctp),
            _ => None,
        }
    }
}

/// Labeling behavior of an `fsuse` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsUseBehavior {
    Xattr,
    Trans,
    Task,
}

impl FsUseBehavior {
    pub fn number(self) -> u32 {
        match self {
            FsUseBehavior::Xattr => 1,
            FsUseBehavior::Trans => 2,
            FsUseBehavior::Task => 3,
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "xattr" => Some(FsUseBehavior::Xattr),
            "trans" => Some(FsUseBehavior::Trans),
            "task" => Some(FsUseBehavior::Task),
            _ => None,
        }
    }
}

/// Object type selector of a `filecon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    File,
    Dir,
    Char,
    Block,
    Socket,
    Pipe,
    Symlink,
    Any,
}

impl FileType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "file" => Some(FileType::File),
            "dir" => Some(FileType::Dir),
            "char" => Some(FileType::Char),
            "block" => Some(FileType::Block),
            "socket" => Some(FileType::Socket),
            "pipe" => Some(FileType::Pipe),
            "symlink" => Some(FileType::Symlink),
            "any" => Some(FileType::Any),
            _ => None,
        }
    }

    /// Mode flag used in `file_contexts` lines (empty for `any`).
    pub fn fc_flag(self) -> &'static str {
        match self {
            FileType::File => "--",
            FileType::Dir => "-d",
            FileType::Char => "-c",
            FileType::Block => "-b",
            FileType::Socket => "-s",
            FileType::Pipe => "-p",
            FileType::Symlink => "-l",
            FileType::Any => "",
        }
    }
}

/// Which side of a computation a `defaultuser`/`defaultrole`/`defaulttype` picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultObject {
    Source,
    Target,
}

impl DefaultObject {
    pub fn number(self) -> u32 {
        match self {
            DefaultObject::Source => 1,
            DefaultObject::Target => 2,
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "source" => Some(DefaultObject::Source),
            "target" => Some(DefaultObject::Target),
            _ => None,
        }
    }
}

/// Range selection of a `defaultrange` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultRange {
    SourceLow,
    SourceHigh,
    SourceLowHigh,
    TargetLow,
    TargetHigh,
    TargetLowHigh,
    Glblub,
}

impl DefaultRange {
    pub fn number(self) -> u32 {
        match self {
            DefaultRange::SourceLow => 1,
            DefaultRange::SourceHigh => 2,
            DefaultRange::SourceLowHigh => 3,
            DefaultRange::TargetLow => 4,
            DefaultRange::TargetHigh => 5,
            DefaultRange::TargetLowHigh => 6,
            DefaultRange::Glblub => 7,
        }
    }

    /// Parses `(defaultrange class source low)` style operands.
    pub fn from_keywords(object: &str, range: Option<&str>) -> Option<Self> {
        match (object, range) {
            ("source", Some("low")) => Some(DefaultRange::SourceLow),
            ("source", Some("high")) => Some(DefaultRange::SourceHigh),
            ("source", Some("low-high")) => Some(DefaultRange::SourceLowHigh),
            ("target", Some("low")) => Some(DefaultRange::TargetLow),
            ("target", Some("high")) => Some(DefaultRange::TargetHigh),
            ("target", Some("low-high")) => Some(DefaultRange::TargetLowHigh),
            ("glblub", None) => Some(DefaultRange::Glblub),
            _ => None,
        }
    }
}

// ============================================================================
// Policy capabilities
// ============================================================================

/// A kernel policy capability, identified by its bit number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyCapability(u32);

const POLICY_CAPABILITY_NAMES: [&str; 8] = [
    "network_peer_controls",
    "open_perms",
    "extended_socket_class",
    "always_check_network",
    "cgroup_seclabel",
    "nnp_nosuid_transition",
    "genfs_seclabel_symlinks",
    "ioctl_skip_cloexec",
];

impl PolicyCapability {
    /// Looks up a capability by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        POLICY_CAPABILITY_NAMES
            .iter()
            .position(|known| known.eq_ignore_ascii_case(name))
            .map(|pos| Self(pos as u32))
    }

    /// Capability for a bit number, when the bit is known.
    pub fn from_number(number: u32) -> Option<Self> {
        ((number as usize) < POLICY_CAPABILITY_NAMES.len()).then_some(Self(number))
    }

    pub fn number(self) -> u32 {
        self.0
    }

    pub fn name(self) -> &'static str {
        POLICY_CAPABILITY_NAMES[self.0 as usize]
    }
}

impl Display for PolicyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(24, true; "boundary is the oldest writable")]
    #[test_case(23, false; "permissive is too old")]
    #[test_case(33, true; "newest")]
    #[test_case(34, false; "unknown future version")]
    fn writable_versions(version: u32, expected: bool) {
        assert_eq!(PolicyVersion::new(version).is_writable(), expected);
    }

    #[test_case(30, TargetPlatform::SELinux => 7; "selinux before infiniband")]
    #[test_case(31, TargetPlatform::SELinux => 9; "selinux with infiniband")]
    #[test_case(24, TargetPlatform::Xen => 5; "xen before devicetree")]
    #[test_case(30, TargetPlatform::Xen => 6; "xen with devicetree")]
    fn ocon_counts(version: u32, target: TargetPlatform) -> u32 {
        PolicyVersion::new(version).ocon_count(target)
    }

    #[test]
    fn capability_lookup_ignores_case() {
        let cap = PolicyCapability::from_name("Open_Perms").unwrap();
        assert_eq!(cap.number(), 1);
        assert_eq!(cap.name(), "open_perms");
        assert!(PolicyCapability::from_name("no_such_cap").is_none());
    }

    #[test]
    fn handle_unknown_round_trips_through_config_bits() {
        for hu in [HandleUnknown::Deny, HandleUnknown::Reject, HandleUnknown::Allow] {
            let config = POLICYDB_CONFIG_MLS | hu.config_bits();
            assert_eq!(HandleUnknown::from_config_bits(config), hu);
        }
    }

    #[test]
    fn target_strings() {
        assert_eq!(TargetPlatform::SELinux.target_string(), "SE Linux");
        assert_eq!(
            TargetPlatform::from_target_string("XenFlask"),
            Some(TargetPlatform::Xen)
        );
        assert_eq!("xen".parse::<TargetPlatform>(), Ok(TargetPlatform::Xen));
    }

    #[test]
    fn default_range_keywords() {
        assert_eq!(
            DefaultRange::from_keywords("target", Some("low-high")).map(DefaultRange::number),
            Some(6)
        );
        assert_eq!(DefaultRange::from_keywords("glblub", None), Some(DefaultRange::Glblub));
        assert_eq!(DefaultRange::from_keywords("glblub", Some("low")), None);
    }

    #[test]
    fn symbol_kinds_are_in_file_order() {
        for (i, kind) in SymbolKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(SymbolKind::Types.table_size(), 512);
    }
}
