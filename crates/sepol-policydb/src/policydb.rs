//! Kernel-side policy database.
//!
//! [`PolicyDb`] holds everything the binary encoder writes: the eight symbol
//! tables, the access vector tables, conditional lists, transition tables,
//! object contexts and per-type attribute maps. Values stored here are the
//! final kernel values (1-based for symbols, 0-based as ebitmap bits).

use std::collections::BTreeMap;

use serde::Serialize;
use sepol_types::{
    DefaultObject, DefaultRange, FsUseBehavior, HandleUnknown, PolicyVersion, PortProtocol,
    SymbolKind, TargetPlatform,
};

use crate::avtab::{AvTab, AvTabNodeRef};
use crate::ebitmap::Ebitmap;
use crate::symtab::{SymTab, Valued};
use crate::{PolicyDbError, Result};

// ============================================================================
// Symbol datums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermDatum {
    pub value: u32,
}

#[derive(Debug)]
pub struct CommonDatum {
    pub value: u32,
    pub perms: SymTab<PermDatum>,
}

#[derive(Debug)]
pub struct ClassDatum {
    pub value: u32,
    /// Name of the common this class inherits permissions from.
    pub comkey: Option<String>,
    /// Own permissions; values continue after the common's.
    pub perms: SymTab<PermDatum>,
    /// Common permissions plus own permissions.
    pub nprim: u32,
    pub default_user: Option<DefaultObject>,
    pub default_role: Option<DefaultObject>,
    pub default_type: Option<DefaultObject>,
    pub default_range: Option<DefaultRange>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleDatum {
    pub value: u32,
    pub bounds: u32,
    pub dominates: Ebitmap,
    pub types: Ebitmap,
}

/// Type flavors as the kernel sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFlavor {
    Type,
    Attribute,
    Alias,
}

#[derive(Debug, Clone)]
pub struct TypeDatum {
    pub value: u32,
    pub flavor: TypeFlavor,
    pub bounds: u32,
}

pub const TYPEDATUM_PROPERTY_PRIMARY: u32 = 0x0001;
pub const TYPEDATUM_PROPERTY_ATTRIBUTE: u32 = 0x0002;

impl TypeDatum {
    /// Property word written for version 24 and later.
    pub fn properties(&self) -> u32 {
        match self.flavor {
            TypeFlavor::Type => TYPEDATUM_PROPERTY_PRIMARY,
            TypeFlavor::Attribute => TYPEDATUM_PROPERTY_PRIMARY | TYPEDATUM_PROPERTY_ATTRIBUTE,
            TypeFlavor::Alias => 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserDatum {
    pub value: u32,
    pub bounds: u32,
    pub roles: Ebitmap,
    pub range: MlsRange,
    pub dfltlevel: MlsLevel,
}

#[derive(Debug, Clone, Copy)]
pub struct BoolDatum {
    pub value: u32,
    pub state: bool,
}

/// A sensitivity and the categories it may be combined with.
#[derive(Debug, Clone)]
pub struct LevelDatum {
    pub isalias: bool,
    pub level: MlsLevel,
}

#[derive(Debug, Clone, Copy)]
pub struct CatDatum {
    pub value: u32,
    pub isalias: bool,
}

macro_rules! valued {
    ($($ty:ty),*) => {
        $(impl Valued for $ty {
            fn value(&self) -> u32 {
                self.value
            }
        })*
    };
}

valued!(PermDatum, CommonDatum, ClassDatum, RoleDatum, TypeDatum, UserDatum, BoolDatum, CatDatum);

impl Valued for LevelDatum {
    fn value(&self) -> u32 {
        self.level.sens
    }
}

// ============================================================================
// MLS and contexts
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MlsLevel {
    pub sens: u32,
    pub cats: Ebitmap,
}

impl MlsLevel {
    /// True when `self` dominates `other`.
    pub fn dominates(&self, other: &MlsLevel) -> bool {
        self.sens >= other.sens && self.cats.contains(&other.cats)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MlsRange {
    pub low: MlsLevel,
    pub high: MlsLevel,
}

impl MlsRange {
    pub fn single(level: MlsLevel) -> Self {
        Self {
            low: level.clone(),
            high: level,
        }
    }

    pub fn contains(&self, other: &MlsRange) -> bool {
        other.low.dominates(&self.low) && self.high.dominates(&other.high)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Context {
    pub user: u32,
    pub role: u32,
    pub type_: u32,
    pub range: MlsRange,
}

// ============================================================================
// Object contexts
// ============================================================================

#[derive(Debug, Clone)]
pub struct InitialSid {
    pub sid: u32,
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct FsCon {
    pub name: String,
    pub fs_context: Context,
    pub file_context: Context,
}

#[derive(Debug, Clone)]
pub struct PortCon {
    pub protocol: PortProtocol,
    pub low: u32,
    pub high: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct NetifCon {
    pub name: String,
    pub if_context: Context,
    pub packet_context: Context,
}

/// IPv4 node; address and mask are kept in network byte order.
#[derive(Debug, Clone)]
pub struct NodeCon {
    pub addr: [u8; 4],
    pub mask: [u8; 4],
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct Node6Con {
    pub addr: [u8; 16],
    pub mask: [u8; 16],
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct FsUseCon {
    pub behavior: FsUseBehavior,
    pub fs_name: String,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct IbPkeyCon {
    /// Subnet prefix in network byte order.
    pub subnet_prefix: [u8; 8],
    pub low: u32,
    pub high: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct IbEndportCon {
    pub dev_name: String,
    pub port: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct PirqCon {
    pub pirq: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct IoPortCon {
    pub low: u32,
    pub high: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct IoMemCon {
    pub low: u64,
    pub high: u64,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct PciDeviceCon {
    pub device: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct DeviceTreeCon {
    pub path: String,
    pub context: Context,
}

/// All object context lists, in the order they are written.
#[derive(Debug, Clone, Default)]
pub struct OContexts {
    pub isids: Vec<InitialSid>,
    pub fs: Vec<FsCon>,
    pub ports: Vec<PortCon>,
    pub netifs: Vec<NetifCon>,
    pub nodes: Vec<NodeCon>,
    pub fsuses: Vec<FsUseCon>,
    pub node6s: Vec<Node6Con>,
    pub ibpkeys: Vec<IbPkeyCon>,
    pub ibendports: Vec<IbEndportCon>,
    pub pirqs: Vec<PirqCon>,
    pub ioports: Vec<IoPortCon>,
    pub iomems: Vec<IoMemCon>,
    pub pcidevices: Vec<PciDeviceCon>,
    pub devicetrees: Vec<DeviceTreeCon>,
}

impl OContexts {
    pub fn len(&self) -> usize {
        self.isids.len()
            + self.fs.len()
            + self.ports.len()
            + self.netifs.len()
            + self.nodes.len()
            + self.fsuses.len()
            + self.node6s.len()
            + self.ibpkeys.len()
            + self.ibendports.len()
            + self.pirqs.len()
            + self.ioports.len()
            + self.iomems.len()
            + self.pcidevices.len()
            + self.devicetrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct GenfsEntry {
    pub path: String,
    pub sclass: u32,
    pub context: Context,
}

#[derive(Debug, Clone)]
pub struct Genfs {
    pub fstype: String,
    pub entries: Vec<GenfsEntry>,
}

// ============================================================================
// Rule tables
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTrans {
    pub role: u32,
    pub type_: u32,
    pub new_role: u32,
    pub tclass: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleAllow {
    pub role: u32,
    pub new_role: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTrans {
    pub source_type: u32,
    pub target_type: u32,
    pub target_class: u32,
    pub range: MlsRange,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilenameTransKey {
    pub ttype: u32,
    pub tclass: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTransDatum {
    /// Source types, as 0-based bits.
    pub stypes: Ebitmap,
    pub otype: u32,
}

/// Name-based type transitions, grouped by `(target, class, name)`.
#[derive(Debug, Clone, Default)]
pub struct FilenameTrans {
    entries: BTreeMap<FilenameTransKey, Vec<FilenameTransDatum>>,
}

impl FilenameTrans {
    /// Adds one `(stype, key) -> otype` rule.
    ///
    /// Returns `false` when an identical rule was already present; a rule
    /// for the same source and key with a different result is a conflict.
    pub fn add(&mut self, stype: u32, key: FilenameTransKey, otype: u32) -> Result<bool> {
        let bit = stype - 1;
        let datums = self.entries.entry(key).or_default();
        if let Some(existing) = datums.iter().find(|d| d.stypes.get_bit(bit)) {
            if existing.otype == otype {
                return Ok(false);
            }
            return Err(PolicyDbError::Conflict {
                kind: "typetransition",
                detail: format!(
                    "source type {stype} already transitions to {} instead of {otype}",
                    existing.otype
                ),
            });
        }
        match datums.iter_mut().find(|d| d.otype == otype) {
            Some(datum) => datum.stypes.set_bit(bit, true),
            None => {
                let mut stypes = Ebitmap::new();
                stypes.set_bit(bit, true);
                datums.push(FilenameTransDatum { stypes, otype });
            }
        }
        Ok(true)
    }

    /// Number of distinct keys.
    pub fn nkeys(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Number of individual `(source, key)` rules.
    pub fn nrules(&self) -> u32 {
        self.entries
            .values()
            .flat_map(|datums| datums.iter())
            .map(|d| d.stypes.cardinality())
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FilenameTransKey, &[FilenameTransDatum])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

/// Boolean expression element in reverse Polish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondExpr {
    Bool(u32),
    Not,
    Or,
    And,
    Xor,
    Eq,
    Neq,
}

impl CondExpr {
    /// `(expr_type, bool)` pair as written to the policy.
    pub fn encode(self) -> (u32, u32) {
        match self {
            CondExpr::Bool(value) => (1, value),
            CondExpr::Not => (2, 0),
            CondExpr::Or => (3, 0),
            CondExpr::And => (4, 0),
            CondExpr::Xor => (5, 0),
            CondExpr::Eq => (6, 0),
            CondExpr::Neq => (7, 0),
        }
    }
}

/// Evaluates a reverse Polish boolean expression against bool values.
///
/// Returns `None` for a malformed expression.
pub fn evaluate_cond(expr: &[CondExpr], state: impl Fn(u32) -> bool) -> Option<bool> {
    let mut stack: Vec<bool> = Vec::with_capacity(expr.len());
    for item in expr {
        let value = match item {
            CondExpr::Bool(b) => state(*b),
            CondExpr::Not => !stack.pop()?,
            binary => {
                let rhs = stack.pop()?;
                let lhs = stack.pop()?;
                match binary {
                    CondExpr::Or => lhs || rhs,
                    CondExpr::And => lhs && rhs,
                    CondExpr::Xor => lhs ^ rhs,
                    CondExpr::Eq => lhs == rhs,
                    CondExpr::Neq => lhs != rhs,
                    CondExpr::Bool(_) | CondExpr::Not => return None,
                }
            }
        };
        stack.push(value);
    }
    match stack.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// A conditional block whose rule lists live in the conditional avtab.
#[derive(Debug, Clone, Default)]
pub struct CondNode {
    pub cur_state: bool,
    pub expr: Vec<CondExpr>,
    pub true_list: Vec<AvTabNodeRef>,
    pub false_list: Vec<AvTabNodeRef>,
}

// ============================================================================
// Policy database
// ============================================================================

/// A fully expanded kernel policy.
#[derive(Debug)]
pub struct PolicyDb {
    pub target: TargetPlatform,
    pub version: PolicyVersion,
    pub mls: bool,
    pub handle_unknown: HandleUnknown,
    pub policycaps: Ebitmap,
    pub permissive_map: Ebitmap,

    pub commons: SymTab<CommonDatum>,
    pub classes: SymTab<ClassDatum>,
    pub roles: SymTab<RoleDatum>,
    pub types: SymTab<TypeDatum>,
    pub users: SymTab<UserDatum>,
    pub bools: SymTab<BoolDatum>,
    pub levels: SymTab<LevelDatum>,
    pub cats: SymTab<CatDatum>,

    pub te_avtab: AvTab,
    pub te_cond_avtab: AvTab,
    pub cond_list: Vec<CondNode>,
    pub role_trans: Vec<RoleTrans>,
    pub role_allow: Vec<RoleAllow>,
    pub filename_trans: FilenameTrans,
    pub ocontexts: OContexts,
    pub genfs: Vec<Genfs>,
    pub range_trans: Vec<RangeTrans>,
    /// Attributes of each type, indexed by type value minus one.
    pub type_attr_map: Vec<Ebitmap>,
}

impl PolicyDb {
    pub fn new(target: TargetPlatform, version: PolicyVersion) -> Self {
        Self {
            target,
            version,
            mls: false,
            handle_unknown: HandleUnknown::default(),
            policycaps: Ebitmap::new(),
            permissive_map: Ebitmap::new(),
            commons: SymTab::new(SymbolKind::Commons.table_size()),
            classes: SymTab::new(SymbolKind::Classes.table_size()),
            roles: SymTab::new(SymbolKind::Roles.table_size()),
            types: SymTab::new(SymbolKind::Types.table_size()),
            users: SymTab::new(SymbolKind::Users.table_size()),
            bools: SymTab::new(SymbolKind::Bools.table_size()),
            levels: SymTab::new(SymbolKind::Levels.table_size()),
            cats: SymTab::new(SymbolKind::Cats.table_size()),
            te_avtab: AvTab::default(),
            te_cond_avtab: AvTab::default(),
            cond_list: Vec::new(),
            role_trans: Vec::new(),
            role_allow: Vec::new(),
            filename_trans: FilenameTrans::default(),
            ocontexts: OContexts::default(),
            genfs: Vec::new(),
            range_trans: Vec::new(),
            type_attr_map: Vec::new(),
        }
    }

    /// `(nprim, nel)` of a symbol table.
    pub fn symtab_counts(&self, kind: SymbolKind) -> (u32, u32) {
        match kind {
            SymbolKind::Commons => (self.commons.nprim(), self.commons.nel()),
            SymbolKind::Classes => (self.classes.nprim(), self.classes.nel()),
            SymbolKind::Roles => (self.roles.nprim(), self.roles.nel()),
            SymbolKind::Types => (self.types.nprim(), self.types.nel()),
            SymbolKind::Users => (self.users.nprim(), self.users.nel()),
            SymbolKind::Bools => (self.bools.nprim(), self.bools.nel()),
            SymbolKind::Levels => (self.levels.nprim(), self.levels.nel()),
            SymbolKind::Cats => (self.cats.nprim(), self.cats.nel()),
        }
    }

    pub fn stats(&self) -> PolicyStats {
        let attributes = self
            .types
            .iter()
            .filter(|(_, t)| t.flavor == TypeFlavor::Attribute)
            .count() as u32;
        let aliases = self
            .types
            .iter()
            .filter(|(_, t)| t.flavor == TypeFlavor::Alias)
            .count() as u32;
        PolicyStats {
            version: self.version.as_u32(),
            target: self.target.to_string(),
            mls: self.mls,
            handle_unknown: self.handle_unknown.to_string(),
            classes: self.classes.nprim(),
            commons: self.commons.nprim(),
            types: self.types.nprim() - attributes,
            attributes,
            type_aliases: aliases,
            roles: self.roles.nprim(),
            users: self.users.nprim(),
            booleans: self.bools.nprim(),
            sensitivities: self.levels.nprim(),
            categories: self.cats.nprim(),
            av_rules: self.te_avtab.nel(),
            cond_rules: self.te_cond_avtab.nel(),
            role_transitions: self.role_trans.len() as u32,
            role_allows: self.role_allow.len() as u32,
            filename_transitions: self.filename_trans.nrules(),
            range_transitions: self.range_trans.len() as u32,
            ocontexts: self.ocontexts.len() as u32,
            genfs: self.genfs.iter().map(|g| g.entries.len() as u32).sum(),
            permissive_types: self.permissive_map.cardinality(),
            policy_capabilities: self.policycaps.cardinality(),
        }
    }
}

/// Summary counts of a compiled policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStats {
    pub version: u32,
    pub target: String,
    pub mls: bool,
    pub handle_unknown: String,
    pub classes: u32,
    pub commons: u32,
    pub types: u32,
    pub attributes: u32,
    pub type_aliases: u32,
    pub roles: u32,
    pub users: u32,
    pub booleans: u32,
    pub sensitivities: u32,
    pub categories: u32,
    pub av_rules: u32,
    pub cond_rules: u32,
    pub role_transitions: u32,
    pub role_allows: u32,
    pub filename_transitions: u32,
    pub range_transitions: u32,
    pub ocontexts: u32,
    pub genfs: u32,
    pub permissive_types: u32,
    pub policy_capabilities: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> FilenameTransKey {
        FilenameTransKey {
            ttype: 2,
            tclass: 1,
            name: name.to_string(),
        }
    }

    #[test]
    fn filename_rules_merge_by_result() {
        let mut trans = FilenameTrans::default();
        assert!(trans.add(1, key("a"), 9).unwrap());
        assert!(trans.add(3, key("a"), 9).unwrap());
        assert!(trans.add(4, key("a"), 8).unwrap());
        assert_eq!(trans.nkeys(), 1);
        assert_eq!(trans.nrules(), 3);
        let (_, datums) = trans.iter().next().unwrap();
        assert_eq!(datums.len(), 2);
        assert_eq!(datums[0].stypes.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn filename_rule_duplicates_and_conflicts() {
        let mut trans = FilenameTrans::default();
        trans.add(1, key("a"), 9).unwrap();
        assert!(!trans.add(1, key("a"), 9).unwrap());
        assert!(matches!(
            trans.add(1, key("a"), 7),
            Err(PolicyDbError::Conflict { .. })
        ));
        assert!(trans.add(1, key("b"), 7).unwrap());
    }

    #[test]
    fn cond_expressions_evaluate_in_postfix() {
        let expr = [CondExpr::Bool(1), CondExpr::Bool(2), CondExpr::And, CondExpr::Not];
        assert_eq!(evaluate_cond(&expr, |b| b == 1), Some(true));
        assert_eq!(evaluate_cond(&expr, |_| true), Some(false));
        assert_eq!(evaluate_cond(&[CondExpr::And], |_| true), None);
        assert_eq!(evaluate_cond(&[CondExpr::Bool(1), CondExpr::Bool(1)], |_| true), None);
    }

    #[test]
    fn level_dominance_needs_sensitivity_and_categories() {
        let low = MlsLevel {
            sens: 1,
            cats: [0u32].into_iter().collect(),
        };
        let high = MlsLevel {
            sens: 2,
            cats: [0u32, 1].into_iter().collect(),
        };
        assert!(high.dominates(&low));
        assert!(!low.dominates(&high));
        let range = MlsRange {
            low: low.clone(),
            high: high.clone(),
        };
        assert!(range.contains(&MlsRange::single(low)));
        assert!(!MlsRange::single(high.clone()).contains(&range));
    }

    #[test]
    fn type_properties() {
        let attr = TypeDatum {
            value: 3,
            flavor: TypeFlavor::Attribute,
            bounds: 0,
        };
        assert_eq!(attr.properties(), TYPEDATUM_PROPERTY_PRIMARY | TYPEDATUM_PROPERTY_ATTRIBUTE);
    }
}
