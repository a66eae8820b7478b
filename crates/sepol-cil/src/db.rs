//! # sepol-cil: Semantic database
//!
//! The resolved form of a policy:
//!
//! - one [`Namespace`] per CIL symbol space, backed by the policy
//!   database hashtab so duplicate names surface as `AlreadyExists`
//! - declaration records per symbol kind, in declaration order
//! - rules, conditionals and object contexts with every name replaced by
//!   an index into the matching namespace
//!
//! Indices are plain `usize` positions ([`Id`]); kernel values are only
//! assigned when the database is lowered to a binary policy.

use std::net::IpAddr;
use std::ops::{Index, IndexMut};

use sepol_policydb::{Ebitmap, PolicyDbError, SymHashTab};
use sepol_types::{DefaultObject, DefaultRange, FileType, FsUseBehavior, HandleUnknown, PortProtocol};

use crate::ast::{AvRuleKind, BranchKind, ExprOp, PermXKind, TypeRuleKind};
use crate::order::OrderedList;
use crate::tree::NodeId;

/// Position of a declaration inside its [`Namespace`].
pub type Id = usize;

// ============================================================================
// Namespaces
// ============================================================================

/// Names of one symbol space mapped to declarations kept in insertion order.
#[derive(Debug)]
pub struct Namespace<T> {
    names: SymHashTab<Id>,
    items: Vec<T>,
}

impl<T> Namespace<T> {
    pub fn new(size: usize) -> Self {
        Self {
            names: SymHashTab::with_symhash(size),
            items: Vec::new(),
        }
    }

    /// Adds `item` under `name`; fails with `AlreadyExists` on a clash.
    pub fn declare(&mut self, name: &str, item: T) -> Result<Id, PolicyDbError> {
        let id = self.items.len();
        self.names.insert(name.to_string(), id)?;
        self.items.push(item);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<Id> {
        self.names.search(name).copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)> {
        self.items.iter().enumerate()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut T)> {
        self.items.iter_mut().enumerate()
    }
}

impl<T> Index<Id> for Namespace<T> {
    type Output = T;

    fn index(&self, id: Id) -> &T {
        &self.items[id]
    }
}

impl<T> IndexMut<Id> for Namespace<T> {
    fn index_mut(&mut self, id: Id) -> &mut T {
        &mut self.items[id]
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// An expression whose leaves are namespace indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetExpr {
    Item(Id),
    List(Vec<SetExpr>),
    Op(ExprOp, Vec<SetExpr>),
}

impl SetExpr {
    /// Every leaf, in order of appearance.
    pub fn items(&self) -> Vec<Id> {
        fn walk(expr: &SetExpr, out: &mut Vec<Id>) {
            match expr {
                SetExpr::Item(id) => out.push(*id),
                SetExpr::List(items) | SetExpr::Op(_, items) => items.iter().for_each(|i| walk(i, out)),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Type,
    Alias,
    Attribute,
}

/// How a type attribute is referenced by rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrUse {
    pub avrule: bool,
    pub neverallow: bool,
}

#[derive(Debug)]
pub struct TypeDecl {
    pub name: String,
    pub node: NodeId,
    pub kind: TypeKind,
    /// Target of an alias.
    pub actual: Option<Id>,
    pub bounds: Option<Id>,
    pub permissive: bool,
    /// `typeattributeset` expressions of an attribute.
    pub exprs: Vec<(NodeId, SetExpr)>,
    /// Evaluated members of an attribute; bits are type ids.
    pub members: Option<Ebitmap>,
    pub used: AttrUse,
}

impl TypeDecl {
    pub fn new(name: &str, node: NodeId, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            node,
            kind,
            actual: None,
            bounds: None,
            permissive: false,
            exprs: Vec::new(),
            members: None,
            used: AttrUse::default(),
        }
    }
}

#[derive(Debug)]
pub struct RoleDecl {
    pub name: String,
    pub node: NodeId,
    pub is_attribute: bool,
    pub bounds: Option<Id>,
    /// Types and type attributes granted with `roletype`.
    pub type_refs: Vec<Id>,
    pub exprs: Vec<(NodeId, SetExpr)>,
    /// Evaluated members of an attribute; bits are role ids.
    pub members: Option<Ebitmap>,
    /// Evaluated types; bits are type ids.
    pub types: Ebitmap,
}

impl RoleDecl {
    pub fn new(name: &str, node: NodeId, is_attribute: bool) -> Self {
        Self {
            name: name.to_string(),
            node,
            is_attribute,
            bounds: None,
            type_refs: Vec::new(),
            exprs: Vec::new(),
            members: None,
            types: Ebitmap::new(),
        }
    }
}

#[derive(Debug)]
pub struct UserDecl {
    pub name: String,
    pub node: NodeId,
    pub is_attribute: bool,
    pub bounds: Option<Id>,
    pub role_refs: Vec<Id>,
    pub level: Option<LevelRef>,
    pub range: Option<RangeRef>,
    pub exprs: Vec<(NodeId, SetExpr)>,
    pub members: Option<Ebitmap>,
    /// Evaluated roles; bits are role ids.
    pub roles: Ebitmap,
}

impl UserDecl {
    pub fn new(name: &str, node: NodeId, is_attribute: bool) -> Self {
        Self {
            name: name.to_string(),
            node,
            is_attribute,
            bounds: None,
            role_refs: Vec::new(),
            level: None,
            range: None,
            exprs: Vec::new(),
            members: None,
            roles: Ebitmap::new(),
        }
    }
}

#[derive(Debug)]
pub struct SensDecl {
    pub name: String,
    pub node: NodeId,
    pub is_alias: bool,
    pub actual: Option<Id>,
    /// `sensitivitycategory` expressions.
    pub cat_exprs: Vec<SetExpr>,
    /// Position in the merged sensitivity order.
    pub order: Option<u32>,
    /// Categories usable with this sensitivity; bits are category orders.
    pub cats: Ebitmap,
}

impl SensDecl {
    pub fn new(name: &str, node: NodeId, is_alias: bool) -> Self {
        Self {
            name: name.to_string(),
            node,
            is_alias,
            actual: None,
            cat_exprs: Vec::new(),
            order: None,
            cats: Ebitmap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatKind {
    Cat,
    Alias,
    Set,
}

#[derive(Debug)]
pub struct CatDecl {
    pub name: String,
    pub node: NodeId,
    pub kind: CatKind,
    pub actual: Option<Id>,
    pub expr: Option<SetExpr>,
    pub order: Option<u32>,
    /// Evaluated category set; bits are category orders.
    pub members: Option<Ebitmap>,
}

impl CatDecl {
    pub fn new(name: &str, node: NodeId, kind: CatKind) -> Self {
        Self {
            name: name.to_string(),
            node,
            kind,
            actual: None,
            expr: None,
            order: None,
            members: None,
        }
    }
}

/// A permission of a class, common or map class.
#[derive(Debug)]
pub struct PermDecl {
    pub name: String,
    /// Class permissions a map permission stands for.
    pub mappings: Vec<ClassPermsRef>,
}

#[derive(Debug)]
pub struct CommonDecl {
    pub name: String,
    pub node: NodeId,
    pub perms: Namespace<PermDecl>,
}

#[derive(Debug)]
pub struct ClassDecl {
    pub name: String,
    pub node: NodeId,
    pub is_map: bool,
    pub perms: Namespace<PermDecl>,
    pub common: Option<Id>,
    pub order: Option<u32>,
    pub default_user: Option<DefaultObject>,
    pub default_role: Option<DefaultObject>,
    pub default_type: Option<DefaultObject>,
    pub default_range: Option<DefaultRange>,
}

#[derive(Debug)]
pub struct ClassPermissionDecl {
    pub name: String,
    pub node: NodeId,
    pub sets: Vec<ClassPermsRef>,
}

#[derive(Debug)]
pub struct BoolDecl {
    pub name: String,
    pub node: NodeId,
    pub value: bool,
}

#[derive(Debug)]
pub struct SidDecl {
    pub name: String,
    pub node: NodeId,
    pub context: Option<ContextRef>,
    pub order: Option<u32>,
}

#[derive(Debug)]
pub struct Named<T> {
    pub name: String,
    pub node: NodeId,
    pub value: T,
}

// ============================================================================
// Resolved arguments
// ============================================================================

/// Permissions of one class as written in a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassPermsRef {
    /// Permission expression over the class's combined permission list.
    Perms { class: Id, perms: SetExpr },
    /// A named `classpermission`.
    Set(Id),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSpec {
    /// The actual sensitivity; aliases are followed.
    pub sens: Id,
    pub cats: Option<SetExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelRef {
    Named(Id),
    Anon(LevelSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub low: LevelRef,
    pub high: LevelRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRef {
    Named(Id),
    Anon(Box<RangeSpec>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSpec {
    pub user: Id,
    pub role: Id,
    pub type_: Id,
    pub range: RangeRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextRef {
    Named(Id),
    Anon(Box<ContextSpec>),
}

impl ContextRef {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, ContextRef::Anon(_))
    }
}

/// Extended permissions: a class and a set of 16-bit ioctl numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionXSpec {
    pub kind: PermXKind,
    pub class: Id,
    pub perms: Ebitmap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionXRef {
    Named(Id),
    Anon(PermissionXSpec),
}

/// Target of an access or type rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Type(Id),
    SelfType,
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Av {
        node: NodeId,
        kind: AvRuleKind,
        source: Id,
        target: Target,
        perms: ClassPermsRef,
    },
    AvX {
        node: NodeId,
        kind: AvRuleKind,
        source: Id,
        target: Target,
        perms: PermissionXRef,
    },
    Type {
        node: NodeId,
        kind: TypeRuleKind,
        source: Id,
        target: Target,
        class: Id,
        result: Id,
    },
    NameTransition {
        node: NodeId,
        source: Id,
        target: Target,
        class: Id,
        name: String,
        result: Id,
    },
    RoleTransition {
        node: NodeId,
        source: Id,
        target: Id,
        class: Id,
        result: Id,
    },
    RoleAllow {
        node: NodeId,
        source: Id,
        target: Id,
    },
    RangeTransition {
        node: NodeId,
        source: Id,
        target: Id,
        class: Id,
        range: RangeRef,
    },
}

impl Rule {
    pub fn node(&self) -> NodeId {
        match self {
            Rule::Av { node, .. }
            | Rule::AvX { node, .. }
            | Rule::Type { node, .. }
            | Rule::NameTransition { node, .. }
            | Rule::RoleTransition { node, .. }
            | Rule::RoleAllow { node, .. }
            | Rule::RangeTransition { node, .. } => *node,
        }
    }
}

/// One arm of a resolved `booleanif`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondBlock {
    pub node: NodeId,
    pub kind: BranchKind,
    pub rules: Vec<Rule>,
}

/// A resolved `booleanif`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
    pub node: NodeId,
    /// Leaves are boolean ids.
    pub expr: SetExpr,
    pub blocks: Vec<CondBlock>,
}

impl Conditional {
    /// Rules of the true or the false arm.
    pub fn rules(&self, branch: bool) -> impl Iterator<Item = &Rule> {
        let kind = if branch { BranchKind::True } else { BranchKind::False };
        self.blocks
            .iter()
            .filter(move |block| block.kind == kind)
            .flat_map(|block| block.rules.iter())
    }
}

// ============================================================================
// Object contexts
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileCon {
    pub node: NodeId,
    pub path: String,
    pub file_type: FileType,
    pub context: Option<ContextRef>,
}

#[derive(Debug, Clone)]
pub struct FsUse {
    pub node: NodeId,
    pub behavior: FsUseBehavior,
    pub fs: String,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct GenfsCon {
    pub node: NodeId,
    pub fs: String,
    pub path: String,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct PortCon {
    pub node: NodeId,
    pub protocol: PortProtocol,
    pub low: u32,
    pub high: u32,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct NodeCon {
    pub node: NodeId,
    pub addr: IpAddr,
    pub mask: IpAddr,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct NetifCon {
    pub node: NodeId,
    pub name: String,
    pub if_context: ContextRef,
    pub packet_context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct IbPkeyCon {
    pub node: NodeId,
    pub subnet_prefix: String,
    pub prefix: [u8; 8],
    pub low: u32,
    pub high: u32,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct IbEndportCon {
    pub node: NodeId,
    pub dev_name: String,
    pub port: u32,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct PirqCon {
    pub node: NodeId,
    pub pirq: u32,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct IomemCon {
    pub node: NodeId,
    pub low: u64,
    pub high: u64,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct IoportCon {
    pub node: NodeId,
    pub low: u32,
    pub high: u32,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct PciDeviceCon {
    pub node: NodeId,
    pub device: u32,
    pub context: ContextRef,
}

#[derive(Debug, Clone)]
pub struct DeviceTreeCon {
    pub node: NodeId,
    pub path: String,
    pub context: ContextRef,
}

/// Every labeling statement, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct Labeling {
    pub filecons: Vec<FileCon>,
    pub fsuses: Vec<FsUse>,
    pub genfscons: Vec<GenfsCon>,
    pub portcons: Vec<PortCon>,
    pub nodecons: Vec<NodeCon>,
    pub netifcons: Vec<NetifCon>,
    pub ibpkeycons: Vec<IbPkeyCon>,
    pub ibendportcons: Vec<IbEndportCon>,
    pub pirqcons: Vec<PirqCon>,
    pub iomemcons: Vec<IomemCon>,
    pub ioportcons: Vec<IoportCon>,
    pub pcidevicecons: Vec<PciDeviceCon>,
    pub devicetreecons: Vec<DeviceTreeCon>,
}

// ============================================================================
// Database
// ============================================================================

/// Ordering statements gathered per kind before merging.
#[derive(Debug, Default)]
pub struct OrderStatements {
    pub classes: Vec<OrderedList>,
    pub unordered_classes: Vec<OrderedList>,
    pub sids: Vec<OrderedList>,
    pub sensitivities: Vec<OrderedList>,
    pub categories: Vec<OrderedList>,
}

/// The merged total orders.
#[derive(Debug, Default)]
pub struct Orders {
    pub classes: Vec<Id>,
    pub sids: Vec<Id>,
    pub sensitivities: Vec<Id>,
    pub categories: Vec<Id>,
}

#[derive(Debug)]
pub struct Db {
    pub types: Namespace<TypeDecl>,
    pub roles: Namespace<RoleDecl>,
    pub users: Namespace<UserDecl>,
    pub sensitivities: Namespace<SensDecl>,
    pub categories: Namespace<CatDecl>,
    pub commons: Namespace<CommonDecl>,
    pub classes: Namespace<ClassDecl>,
    pub classpermissions: Namespace<ClassPermissionDecl>,
    pub bools: Namespace<BoolDecl>,
    pub sids: Namespace<SidDecl>,
    pub levels: Namespace<Named<Option<LevelSpec>>>,
    pub levelranges: Namespace<Named<Option<RangeSpec>>>,
    pub contexts: Namespace<Named<Option<ContextSpec>>>,
    pub ipaddrs: Namespace<Named<IpAddr>>,
    pub permissionxs: Namespace<Named<Option<PermissionXSpec>>>,

    /// The built-in `object_r` role.
    pub object_r: Id,

    pub rules: Vec<Rule>,
    pub conditionals: Vec<Conditional>,
    pub labeling: Labeling,
    pub order_statements: OrderStatements,
    pub orders: Orders,

    pub handle_unknown: Vec<(NodeId, HandleUnknown)>,
    pub mls: Vec<(NodeId, bool)>,
    pub policycaps: Vec<(NodeId, String)>,
}

/// Name of the built-in role every object context uses.
pub const OBJECT_R: &str = "object_r";

impl Db {
    /// An empty database holding only the built-in `object_r` role.
    pub fn new(root: NodeId) -> Self {
        let mut roles = Namespace::new(256);
        // A fresh namespace cannot already hold the name.
        let object_r = roles.declare(OBJECT_R, RoleDecl::new(OBJECT_R, root, false)).unwrap_or(0);
        Self {
            types: Namespace::new(1 << 12),
            roles,
            users: Namespace::new(256),
            sensitivities: Namespace::new(256),
            categories: Namespace::new(256),
            commons: Namespace::new(256),
            classes: Namespace::new(256),
            classpermissions: Namespace::new(256),
            bools: Namespace::new(256),
            sids: Namespace::new(64),
            levels: Namespace::new(256),
            levelranges: Namespace::new(256),
            contexts: Namespace::new(256),
            ipaddrs: Namespace::new(256),
            permissionxs: Namespace::new(256),
            object_r,
            rules: Vec::new(),
            conditionals: Vec::new(),
            labeling: Labeling::default(),
            order_statements: OrderStatements::default(),
            orders: Orders::default(),
            handle_unknown: Vec::new(),
            mls: Vec::new(),
            policycaps: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Classes and permissions
    // ------------------------------------------------------------------------

    /// Number of permissions a class inherits from its common.
    pub fn common_perm_count(&self, class: Id) -> usize {
        self.classes[class].common.map_or(0, |c| self.commons[c].perms.len())
    }

    /// Total permissions of a class, common ones included.
    pub fn perm_count(&self, class: Id) -> usize {
        self.common_perm_count(class) + self.classes[class].perms.len()
    }

    /// Index of `perm` in the class's combined list: common permissions
    /// first, then the class's own.
    pub fn lookup_perm(&self, class: Id, perm: &str) -> Option<Id> {
        let common = self.common_perm_count(class);
        if let Some(own) = self.classes[class].perms.lookup(perm) {
            return Some(common + own);
        }
        self.classes[class]
            .common
            .and_then(|c| self.commons[c].perms.lookup(perm))
    }

    /// Name of a permission by combined index.
    pub fn perm_name(&self, class: Id, perm: Id) -> &str {
        let common = self.common_perm_count(class);
        match (perm < common, self.classes[class].common) {
            (true, Some(c)) => &self.commons[c].perms[perm].name,
            _ => &self.classes[class].perms[perm - common].name,
        }
    }

    // ------------------------------------------------------------------------
    // Derived sets
    // ------------------------------------------------------------------------

    /// Ids of every concrete type.
    pub fn type_universe(&self) -> Ebitmap {
        self.types
            .iter()
            .filter(|(_, t)| t.kind == TypeKind::Type)
            .map(|(id, _)| id as u32)
            .collect()
    }

    /// Concrete types a type id stands for.
    pub fn expand_type(&self, id: Id) -> Ebitmap {
        match self.types[id].kind {
            TypeKind::Attribute => self.types[id].members.clone().unwrap_or_default(),
            TypeKind::Alias => self.types[id].actual.map(|a| self.expand_type(a)).unwrap_or_default(),
            TypeKind::Type => [id as u32].into_iter().collect(),
        }
    }

    /// Concrete roles a role id stands for.
    pub fn expand_role(&self, id: Id) -> Ebitmap {
        if self.roles[id].is_attribute {
            self.roles[id].members.clone().unwrap_or_default()
        } else {
            [id as u32].into_iter().collect()
        }
    }

    /// Concrete users a user id stands for.
    pub fn expand_user(&self, id: Id) -> Ebitmap {
        if self.users[id].is_attribute {
            self.users[id].members.clone().unwrap_or_default()
        } else {
            [id as u32].into_iter().collect()
        }
    }

    /// Looks up a level by reference; named levels must be complete.
    pub fn level_spec<'a>(&'a self, level: &'a LevelRef) -> Option<&'a LevelSpec> {
        match level {
            LevelRef::Named(id) => self.levels[*id].value.as_ref(),
            LevelRef::Anon(spec) => Some(spec),
        }
    }

    pub fn range_spec<'a>(&'a self, range: &'a RangeRef) -> Option<&'a RangeSpec> {
        match range {
            RangeRef::Named(id) => self.levelranges[*id].value.as_ref(),
            RangeRef::Anon(spec) => Some(spec),
        }
    }

    pub fn context_spec<'a>(&'a self, context: &'a ContextRef) -> Option<&'a ContextSpec> {
        match context {
            ContextRef::Named(id) => self.contexts[*id].value.as_ref(),
            ContextRef::Anon(spec) => Some(spec),
        }
    }

    pub fn permissionx_spec<'a>(&'a self, permx: &'a PermissionXRef) -> Option<&'a PermissionXSpec> {
        match permx {
            PermissionXRef::Named(id) => self.permissionxs[*id].value.as_ref(),
            PermissionXRef::Anon(spec) => Some(spec),
        }
    }

    /// Number of access vector rules outside conditionals.
    pub fn avrule_count(&self) -> usize {
        self.rules.iter().filter(|r| matches!(r, Rule::Av { .. })).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeId {
        NodeId::from_index(0)
    }

    #[test]
    fn namespaces_reject_duplicates() {
        let mut ns: Namespace<TypeDecl> = Namespace::new(16);
        let a = ns.declare("a", TypeDecl::new("a", node(), TypeKind::Type)).unwrap();
        assert_eq!(ns.lookup("a"), Some(a));
        assert_eq!(
            ns.declare("a", TypeDecl::new("a", node(), TypeKind::Attribute)).unwrap_err(),
            PolicyDbError::AlreadyExists
        );
        assert_eq!(ns.len(), 1);
        assert_eq!(ns[a].kind, TypeKind::Type);
    }

    #[test]
    fn object_r_is_built_in() {
        let db = Db::new(node());
        assert_eq!(db.roles.lookup(OBJECT_R), Some(db.object_r));
        assert_eq!(db.object_r, 0);
    }

    #[test]
    fn permissions_put_common_first() {
        let mut db = Db::new(node());
        let mut common_perms = Namespace::new(8);
        for p in ["read", "write"] {
            common_perms.declare(p, PermDecl { name: p.into(), mappings: Vec::new() }).unwrap();
        }
        let common = db
            .commons
            .declare("file_common", CommonDecl { name: "file_common".into(), node: node(), perms: common_perms })
            .unwrap();
        let mut own = Namespace::new(8);
        own.declare("execute", PermDecl { name: "execute".into(), mappings: Vec::new() }).unwrap();
        let class = db
            .classes
            .declare(
                "file",
                ClassDecl {
                    name: "file".into(),
                    node: node(),
                    is_map: false,
                    perms: own,
                    common: Some(common),
                    order: None,
                    default_user: None,
                    default_role: None,
                    default_type: None,
                    default_range: None,
                },
            )
            .unwrap();
        assert_eq!(db.lookup_perm(class, "write"), Some(1));
        assert_eq!(db.lookup_perm(class, "execute"), Some(2));
        assert_eq!(db.perm_name(class, 2), "execute");
        assert_eq!(db.perm_name(class, 0), "read");
        assert_eq!(db.perm_count(class), 3);
        assert_eq!(db.lookup_perm(class, "append"), None);
    }
}
