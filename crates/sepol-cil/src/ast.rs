//! Typed statements produced from the parse tree.
//!
//! Every statement keeps the [`NodeId`] of the parse list it came from so
//! later stages can report errors at the right source position. Names are
//! still plain strings here; resolution happens in [`crate::resolve`].

use std::fmt;
use std::net::IpAddr;

use sepol_types::{DefaultObject, DefaultRange, FileType, FsUseBehavior, HandleUnknown, PortProtocol};

use crate::tree::NodeId;

// ============================================================================
// Expressions
// ============================================================================

/// Operators allowed at the head of an expression list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprOp {
    And,
    Or,
    Xor,
    Not,
    All,
    Range,
    Eq,
    Neq,
}

impl ExprOp {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "and" => Some(ExprOp::And),
            "or" => Some(ExprOp::Or),
            "xor" => Some(ExprOp::Xor),
            "not" => Some(ExprOp::Not),
            "all" => Some(ExprOp::All),
            "range" => Some(ExprOp::Range),
            "eq" => Some(ExprOp::Eq),
            "neq" => Some(ExprOp::Neq),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ExprOp::And => "and",
            ExprOp::Or => "or",
            ExprOp::Xor => "xor",
            ExprOp::Not => "not",
            ExprOp::All => "all",
            ExprOp::Range => "range",
            ExprOp::Eq => "eq",
            ExprOp::Neq => "neq",
        }
    }
}

impl fmt::Display for ExprOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// What an expression selects; decides which operators are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprFlavor {
    /// Types, roles, users and permissions.
    Set,
    /// Booleans in a `booleanif` condition.
    Bool,
    /// Categories; `range` is allowed.
    Cat,
    /// Extended permission numbers; `range` is allowed.
    PermX,
}

/// A set or boolean expression with unresolved names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Name(String),
    /// Plain list; the union of its items.
    List(Vec<Expr>),
    Op(ExprOp, Vec<Expr>),
}

impl Expr {
    /// Visits every name in the expression.
    pub fn names(&self) -> Vec<&str> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
            match expr {
                Expr::Name(name) => out.push(name),
                Expr::List(items) | Expr::Op(_, items) => {
                    for item in items {
                        walk(item, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

// ============================================================================
// Compound arguments
// ============================================================================

/// Permissions of one class, or a named `classpermission`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassPerms {
    Named(String),
    Anon { class: String, perms: Expr },
}

/// Sensitivity plus optional category expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSpec {
    pub sens: String,
    pub cats: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelArg {
    Named(String),
    Anon(LevelSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub low: LevelArg,
    pub high: LevelArg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeArg {
    Named(String),
    Anon(Box<RangeSpec>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSpec {
    pub user: String,
    pub role: String,
    pub type_: String,
    pub range: RangeArg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextArg {
    Named(String),
    Anon(Box<ContextSpec>),
}

/// Extended permissions: `(ioctl class (expr))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionXSpec {
    pub kind: PermXKind,
    pub class: String,
    pub perms: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermXKind {
    Ioctl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionXArg {
    Named(String),
    Anon(PermissionXSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpArg {
    Named(String),
    Anon(IpAddr),
}

// ============================================================================
// Rule kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvRuleKind {
    Allow,
    AuditAllow,
    DontAudit,
    NeverAllow,
}

impl AvRuleKind {
    pub fn keyword(self, extended: bool) -> &'static str {
        match (self, extended) {
            (AvRuleKind::Allow, false) => "allow",
            (AvRuleKind::AuditAllow, false) => "auditallow",
            (AvRuleKind::DontAudit, false) => "dontaudit",
            (AvRuleKind::NeverAllow, false) => "neverallow",
            (AvRuleKind::Allow, true) => "allowx",
            (AvRuleKind::AuditAllow, true) => "auditallowx",
            (AvRuleKind::DontAudit, true) => "dontauditx",
            (AvRuleKind::NeverAllow, true) => "neverallowx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRuleKind {
    Transition,
    Change,
    Member,
}

impl TypeRuleKind {
    pub fn keyword(self) -> &'static str {
        match self {
            TypeRuleKind::Transition => "typetransition",
            TypeRuleKind::Change => "typechange",
            TypeRuleKind::Member => "typemember",
        }
    }
}

/// Which `default*` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultKind {
    User,
    Role,
    Type,
}

/// The arms of a `booleanif`; anything else is rejected during verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchKind {
    True,
    False,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondBranch {
    pub node: NodeId,
    pub kind: BranchKind,
    pub body: Vec<Stmt>,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub node: NodeId,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    // Types
    Type(String),
    TypeAlias(String),
    TypeAliasActual { alias: String, actual: String },
    TypeAttribute(String),
    TypeAttributeSet { attr: String, expr: Expr },
    TypeBounds { parent: String, child: String },
    TypePermissive(String),

    // Roles
    Role(String),
    RoleType { role: String, type_: String },
    RoleAttribute(String),
    RoleAttributeSet { attr: String, expr: Expr },
    RoleBounds { parent: String, child: String },
    RoleAllow { source: String, target: String },
    RoleTransition { source: String, target: String, class: String, result: String },

    // Users
    User(String),
    UserRole { user: String, role: String },
    UserLevel { user: String, level: LevelArg },
    UserRange { user: String, range: RangeArg },
    UserBounds { parent: String, child: String },
    UserAttribute(String),
    UserAttributeSet { attr: String, expr: Expr },

    // Classes and permissions
    Common { name: String, perms: Vec<String> },
    Class { name: String, perms: Vec<String> },
    ClassCommon { class: String, common: String },
    ClassOrder(Vec<String>),
    ClassPermission(String),
    ClassPermissionSet { name: String, perms: ClassPerms },
    ClassMap { name: String, perms: Vec<String> },
    ClassMapping { map: String, perm: String, perms: ClassPerms },
    Default { kind: DefaultKind, classes: Vec<String>, object: DefaultObject },
    DefaultRange { classes: Vec<String>, range: DefaultRange },

    // MLS
    Sensitivity(String),
    SensitivityAlias(String),
    SensitivityAliasActual { alias: String, actual: String },
    SensitivityOrder(Vec<String>),
    Category(String),
    CategoryAlias(String),
    CategoryAliasActual { alias: String, actual: String },
    CategoryOrder(Vec<String>),
    CategorySet { name: String, expr: Expr },
    SensitivityCategory { sens: String, cats: Expr },
    Level { name: String, level: LevelSpec },
    LevelRange { name: String, range: RangeSpec },

    // Booleans
    Boolean { name: String, value: bool },
    BooleanIf { expr: Expr, branches: Vec<CondBranch> },

    // Rules
    AvRule { kind: AvRuleKind, source: String, target: String, perms: ClassPerms },
    AvRuleX { kind: AvRuleKind, source: String, target: String, perms: PermissionXArg },
    PermissionX { name: String, spec: PermissionXSpec },
    TypeRule { kind: TypeRuleKind, source: String, target: String, class: String, result: String },
    NameTypeTransition {
        source: String,
        target: String,
        class: String,
        object_name: String,
        result: String,
    },
    RangeTransition { source: String, target: String, class: String, range: RangeArg },

    // SIDs and contexts
    Sid(String),
    SidOrder(Vec<String>),
    SidContext { sid: String, context: ContextArg },
    Context { name: String, spec: ContextSpec },

    // Labeling
    FileCon { path: String, file_type: FileType, context: Option<ContextArg> },
    FsUse { behavior: FsUseBehavior, fs: String, context: ContextArg },
    GenfsCon { fs: String, path: String, context: ContextArg },
    PortCon { protocol: PortProtocol, low: u32, high: u32, context: ContextArg },
    NodeCon { addr: IpArg, mask: IpArg, context: ContextArg },
    NetifCon { name: String, if_context: ContextArg, packet_context: ContextArg },
    IpAddr { name: String, addr: IpAddr },
    IbPkeyCon { subnet_prefix: String, low: u32, high: u32, context: ContextArg },
    IbEndportCon { dev_name: String, port: u32, context: ContextArg },
    PirqCon { pirq: u32, context: ContextArg },
    IomemCon { low: u64, high: u64, context: ContextArg },
    IoportCon { low: u32, high: u32, context: ContextArg },
    PciDeviceCon { device: u32, context: ContextArg },
    DeviceTreeCon { path: String, context: ContextArg },

    // Global settings
    HandleUnknown(HandleUnknown),
    Mls(bool),
    PolicyCap(String),
}

impl StmtKind {
    /// Keyword a statement is written with, for diagnostics.
    pub fn keyword(&self) -> &'static str {
        match self {
            StmtKind::Type(_) => "type",
            StmtKind::TypeAlias(_) => "typealias",
            StmtKind::TypeAliasActual { .. } => "typealiasactual",
            StmtKind::TypeAttribute(_) => "typeattribute",
            StmtKind::TypeAttributeSet { .. } => "typeattributeset",
            StmtKind::TypeBounds { .. } => "typebounds",
            StmtKind::TypePermissive(_) => "typepermissive",
            StmtKind::Role(_) => "role",
            StmtKind::RoleType { .. } => "roletype",
            StmtKind::RoleAttribute(_) => "roleattribute",
            StmtKind::RoleAttributeSet { .. } => "roleattributeset",
            StmtKind::RoleBounds { .. } => "rolebounds",
            StmtKind::RoleAllow { .. } => "roleallow",
            StmtKind::RoleTransition { .. } => "roletransition",
            StmtKind::User(_) => "user",
            StmtKind::UserRole { .. } => "userrole",
            StmtKind::UserLevel { .. } => "userlevel",
            StmtKind::UserRange { .. } => "userrange",
            StmtKind::UserBounds { .. } => "userbounds",
            StmtKind::UserAttribute(_) => "userattribute",
            StmtKind::UserAttributeSet { .. } => "userattributeset",
            StmtKind::Common { .. } => "common",
            StmtKind::Class { .. } => "class",
            StmtKind::ClassCommon { .. } => "classcommon",
            StmtKind::ClassOrder(_) => "classorder",
            StmtKind::ClassPermission(_) => "classpermission",
            StmtKind::ClassPermissionSet { .. } => "classpermissionset",
            StmtKind::ClassMap { .. } => "classmap",
            StmtKind::ClassMapping { .. } => "classmapping",
            StmtKind::Default { kind: DefaultKind::User, .. } => "defaultuser",
            StmtKind::Default { kind: DefaultKind::Role, .. } => "defaultrole",
            StmtKind::Default { kind: DefaultKind::Type, .. } => "defaulttype",
            StmtKind::DefaultRange { .. } => "defaultrange",
            StmtKind::Sensitivity(_) => "sensitivity",
            StmtKind::SensitivityAlias(_) => "sensitivityalias",
            StmtKind::SensitivityAliasActual { .. } => "sensitivityaliasactual",
            StmtKind::SensitivityOrder(_) => "sensitivityorder",
            StmtKind::Category(_) => "category",
            StmtKind::CategoryAlias(_) => "categoryalias",
            StmtKind::CategoryAliasActual { .. } => "categoryaliasactual",
            StmtKind::CategoryOrder(_) => "categoryorder",
            StmtKind::CategorySet { .. } => "categoryset",
            StmtKind::SensitivityCategory { .. } => "sensitivitycategory",
            StmtKind::Level { .. } => "level",
            StmtKind::LevelRange { .. } => "levelrange",
            StmtKind::Boolean { .. } => "boolean",
            StmtKind::BooleanIf { .. } => "booleanif",
            StmtKind::AvRule { kind, .. } => kind.keyword(false),
            StmtKind::AvRuleX { kind, .. } => kind.keyword(true),
            StmtKind::PermissionX { .. } => "permissionx",
            StmtKind::TypeRule { kind, .. } => kind.keyword(),
            StmtKind::NameTypeTransition { .. } => "typetransition",
            StmtKind::RangeTransition { .. } => "rangetransition",
            StmtKind::Sid(_) => "sid",
            StmtKind::SidOrder(_) => "sidorder",
            StmtKind::SidContext { .. } => "sidcontext",
            StmtKind::Context { .. } => "context",
            StmtKind::FileCon { .. } => "filecon",
            StmtKind::FsUse { .. } => "fsuse",
            StmtKind::GenfsCon { .. } => "genfscon",
            StmtKind::PortCon { .. } => "portcon",
            StmtKind::NodeCon { .. } => "nodecon",
            StmtKind::NetifCon { .. } => "netifcon",
            StmtKind::IpAddr { .. } => "ipaddr",
            StmtKind::IbPkeyCon { .. } => "ibpkeycon",
            StmtKind::IbEndportCon { .. } => "ibendportcon",
            StmtKind::PirqCon { .. } => "pirqcon",
            StmtKind::IomemCon { .. } => "iomemcon",
            StmtKind::IoportCon { .. } => "ioportcon",
            StmtKind::PciDeviceCon { .. } => "pcidevicecon",
            StmtKind::DeviceTreeCon { .. } => "devicetreecon",
            StmtKind::HandleUnknown(_) => "handleunknown",
            StmtKind::Mls(_) => "mls",
            StmtKind::PolicyCap(_) => "policycap",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_round_trip_keywords() {
        for op in [
            ExprOp::And,
            ExprOp::Or,
            ExprOp::Xor,
            ExprOp::Not,
            ExprOp::All,
            ExprOp::Range,
            ExprOp::Eq,
            ExprOp::Neq,
        ] {
            assert_eq!(ExprOp::from_keyword(op.keyword()), Some(op));
        }
        assert_eq!(ExprOp::from_keyword("self"), None);
    }

    #[test]
    fn expression_names_are_collected_in_order() {
        let expr = Expr::Op(
            ExprOp::And,
            vec![
                Expr::Name("a".into()),
                Expr::List(vec![Expr::Name("b".into()), Expr::Name("c".into())]),
            ],
        );
        assert_eq!(expr.names(), vec!["a", "b", "c"]);
    }
}
