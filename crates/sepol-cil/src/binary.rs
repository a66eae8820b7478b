//! Lowering of the evaluated database into a kernel [`PolicyDb`].
//!
//! Kernel values are handed out here:
//!
//! - types and kept attributes share one sequence in declaration order,
//!   aliases reuse their actual's value
//! - roles follow declaration order, so the built-in `object_r` is value 1
//! - classes, sensitivities and categories follow their merged order
//! - commons, users and booleans follow declaration order
//!
//! Rules are expanded on the way: attributes that were dropped become their
//! member types, `self` targets become one rule per source type, and map
//! classes and named class permissions become the real permissions they
//! stand for. Neverallow rules are checked last, against the finished
//! access vector tables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

use sepol_policydb::avtab::{
    AVTAB_ALLOWED, AVTAB_AUDITALLOW, AVTAB_AUDITDENY, AVTAB_CHANGE, AVTAB_MEMBER, AVTAB_TRANSITION,
    AVTAB_XPERMS_ALLOWED, AVTAB_XPERMS_AUDITALLOW, AVTAB_XPERMS_DONTAUDIT, AVTAB_XPERMS_IOCTLDRIVER,
    AVTAB_XPERMS_IOCTLFUNCTION,
};
use sepol_policydb::policydb::{
    BoolDatum, CatDatum, ClassDatum, CommonDatum, CondExpr, CondNode, Context, DeviceTreeCon, FilenameTransKey,
    FsUseCon, Genfs, GenfsEntry, IbEndportCon, IbPkeyCon, InitialSid, IoMemCon, IoPortCon, LevelDatum, MlsLevel,
    MlsRange, NetifCon, Node6Con, NodeCon, PciDeviceCon, PermDatum, PirqCon, PortCon, RangeTrans, RoleAllow, RoleDatum,
    RoleTrans, TypeDatum, TypeFlavor, UserDatum, evaluate_cond,
};
use sepol_policydb::{AvTab, AvTabDatum, AvTabKey, Ebitmap, ExtendedPerms, PolicyDb, PolicyDbError, SymTab};
use sepol_types::{PolicyCapability, PolicyVersion, TargetPlatform};
use tracing::debug;

use crate::ast::{AvRuleKind, ExprOp, TypeRuleKind};
use crate::db::{CatKind, ClassPermsRef, ContextRef, Db, Id, RangeRef, Rule, SetExpr, Target, TypeKind};
use crate::error::{CilError, Result, report_all};
use crate::log::Logger;
use crate::parser::SourceMap;
use crate::post::{EvalLevel, attribute_kept, eval_level, eval_range, perm_bits};
use crate::tree::NodeId;
use crate::verify::PolicySettings;

#[derive(Debug, Clone, Copy)]
pub struct BinaryOptions {
    pub version: PolicyVersion,
    pub target: TargetPlatform,
    /// Skip neverallow checking.
    pub disable_neverallow: bool,
    /// Expand every attribute that is not needed for neverallow checking.
    pub expand_attributes: bool,
}

impl Default for BinaryOptions {
    fn default() -> Self {
        Self {
            version: PolicyVersion::latest(),
            target: TargetPlatform::default(),
            disable_neverallow: false,
            expand_attributes: false,
        }
    }
}

// ============================================================================
// Kernel values
// ============================================================================

/// Kernel value of every database id, `None` where the symbol does not
/// make it into the binary policy.
#[derive(Debug, Default)]
struct Values {
    types: Vec<Option<u32>>,
    roles: Vec<Option<u32>>,
    users: Vec<Option<u32>>,
    classes: Vec<Option<u32>>,
    bools: Vec<u32>,
    sensitivities: Vec<Option<u32>>,
    /// Type names by value minus one.
    type_names: Vec<String>,
    /// Concrete type ids each type value stands for, by value minus one.
    type_members: Vec<Ebitmap>,
}

/// Access vector keys hold 16-bit values.
fn as_u16(value: u32, what: &str) -> std::result::Result<u16, String> {
    u16::try_from(value).map_err(|_| format!("{what} value {value} does not fit in an access vector key"))
}

fn perm_word(bits: &Ebitmap) -> u32 {
    bits.iter().fold(0, |acc, bit| acc | 1u32.checked_shl(bit).unwrap_or(0))
}

// ============================================================================
// Access vector collection
// ============================================================================

/// Access vector entries in insertion order, merged by key.
#[derive(Debug, Default)]
struct AvRules {
    entries: Vec<(AvTabKey, AvTabDatum)>,
    index: HashMap<AvTabKey, usize>,
    /// Ioctl numbers per extended permission key.
    xperms: Vec<(AvTabKey, Ebitmap)>,
    xperm_index: HashMap<AvTabKey, usize>,
}

impl AvRules {
    fn get(&self, key: &AvTabKey) -> Option<&AvTabDatum> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    fn push(&mut self, key: AvTabKey, datum: AvTabDatum) {
        self.index.insert(key, self.entries.len());
        self.entries.push((key, datum));
    }

    /// Adds access permissions. Denials are stored inverted, so they merge
    /// by intersection.
    fn merge_av(&mut self, key: AvTabKey, perms: u32) {
        let auditdeny = key.specified == AVTAB_AUDITDENY;
        let data = if auditdeny { !perms } else { perms };
        match self.index.get(&key) {
            Some(&i) if auditdeny => self.entries[i].1.data &= data,
            Some(&i) => self.entries[i].1.data |= data,
            None => self.push(key, AvTabDatum::data(data)),
        }
    }

    fn merge_xperms(&mut self, key: AvTabKey, ioctls: &Ebitmap) {
        match self.xperm_index.get(&key) {
            Some(&i) => self.xperms[i].1.union_with(ioctls),
            None => {
                self.xperm_index.insert(key, self.xperms.len());
                self.xperms.push((key, ioctls.clone()));
            }
        }
    }

    /// Every entry, extended permissions split into per-driver records.
    fn finish(&self) -> Vec<(AvTabKey, AvTabDatum)> {
        let mut out = self.entries.clone();
        for (key, ioctls) in &self.xperms {
            out.extend(ioctl_xperms(ioctls).into_iter().map(|x| (*key, AvTabDatum::xperms(x))));
        }
        out
    }

    fn len(&self) -> usize {
        self.entries.len() + self.xperms.len()
    }
}

/// Splits 16-bit ioctl numbers into records: one driver-level record for
/// drivers whose 256 functions are all present, and one function-level
/// record for each other driver.
fn ioctl_xperms(ioctls: &Ebitmap) -> Vec<ExtendedPerms> {
    let mut drivers: BTreeMap<u8, ExtendedPerms> = BTreeMap::new();
    for number in ioctls.iter() {
        let driver = ((number >> 8) & 0xff) as u8;
        let function = (number & 0xff) as u8;
        drivers
            .entry(driver)
            .or_insert_with(|| ExtendedPerms {
                specified: AVTAB_XPERMS_IOCTLFUNCTION,
                driver,
                perms: [0; 8],
            })
            .set(function);
    }

    let mut complete = ExtendedPerms {
        specified: AVTAB_XPERMS_IOCTLDRIVER,
        driver: 0,
        perms: [0; 8],
    };
    let mut out = Vec::new();
    for (driver, functions) in drivers {
        if functions.perms.iter().all(|w| *w == u32::MAX) {
            complete.set(driver);
        } else {
            out.push(functions);
        }
    }
    if !complete.is_empty() {
        out.insert(0, complete);
    }
    out
}

fn av_specified(kind: AvRuleKind) -> Option<u16> {
    match kind {
        AvRuleKind::Allow => Some(AVTAB_ALLOWED),
        AvRuleKind::AuditAllow => Some(AVTAB_AUDITALLOW),
        AvRuleKind::DontAudit => Some(AVTAB_AUDITDENY),
        AvRuleKind::NeverAllow => None,
    }
}

fn xperm_specified(kind: AvRuleKind) -> Option<u16> {
    match kind {
        AvRuleKind::Allow => Some(AVTAB_XPERMS_ALLOWED),
        AvRuleKind::AuditAllow => Some(AVTAB_XPERMS_AUDITALLOW),
        AvRuleKind::DontAudit => Some(AVTAB_XPERMS_DONTAUDIT),
        AvRuleKind::NeverAllow => None,
    }
}

fn type_specified(kind: TypeRuleKind) -> u16 {
    match kind {
        TypeRuleKind::Transition => AVTAB_TRANSITION,
        TypeRuleKind::Member => AVTAB_MEMBER,
        TypeRuleKind::Change => AVTAB_CHANGE,
    }
}

/// A neverallow rule waiting to be checked.
#[derive(Debug)]
struct Neverallow {
    node: NodeId,
    source: Ebitmap,
    target: Option<Ebitmap>,
    /// Denied permissions per class id.
    perms: Vec<(Id, u32)>,
    /// Ioctl numbers for `neverallowx`.
    ioctls: Option<Ebitmap>,
}

// ============================================================================
// Lowering
// ============================================================================

struct Lowering<'a> {
    logger: &'a Logger,
    sources: &'a SourceMap,
    db: &'a Db,
    options: BinaryOptions,
    mls: bool,
    kept: Vec<bool>,
    values: Values,
    pdb: PolicyDb,
    neverallows: Vec<Neverallow>,
}

/// Builds the kernel policy database for an evaluated and verified policy.
pub fn build_policydb(
    logger: &Logger,
    sources: &SourceMap,
    db: &Db,
    settings: PolicySettings,
    options: BinaryOptions,
) -> Result<PolicyDb> {
    let mut pdb = PolicyDb::new(options.target, options.version);
    pdb.mls = settings.mls;
    pdb.handle_unknown = settings.handle_unknown;

    let kept = db
        .types
        .iter()
        .map(|(_, t)| t.kind == TypeKind::Attribute && attribute_kept(t, options.expand_attributes))
        .collect();
    let mut lowering = Lowering {
        logger,
        sources,
        db,
        options,
        mls: settings.mls,
        kept,
        values: Values::default(),
        pdb,
        neverallows: Vec::new(),
    };

    lowering.symbols()?;
    lowering.policycaps();
    let top = lowering.rules()?;
    let conds = lowering.conditionals(&top)?;
    lowering.fill_avtabs(&top, conds)?;
    if !options.disable_neverallow {
        lowering.check_neverallows()?;
    }
    lowering.ocontexts()?;
    lowering.type_attr_map();

    let pdb = lowering.pdb;
    debug!(
        types = pdb.types.nprim(),
        roles = pdb.roles.nprim(),
        avtab = pdb.te_avtab.nel(),
        cond_avtab = pdb.te_cond_avtab.nel(),
        conditionals = pdb.cond_list.len(),
        "built policy database"
    );
    Ok(pdb)
}

impl Lowering<'_> {
    fn error(&self, node: NodeId, message: impl Into<String>) -> CilError {
        CilError::semantic(message, self.sources.locate(node))
    }

    fn version_error(&self, reason: &str) -> CilError {
        CilError::Encode(PolicyDbError::UnsupportedVersion {
            version: self.options.version.as_u32(),
            reason: reason.to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------------

    fn symbols(&mut self) -> Result<()> {
        // Levels in user ranges need sensitivity values up front.
        self.values.sensitivities = vec![None; self.db.sensitivities.len()];
        for (position, &id) in self.db.orders.sensitivities.iter().enumerate() {
            self.values.sensitivities[id] = Some(position as u32 + 1);
        }
        self.commons()?;
        self.classes()?;
        self.roles()?;
        self.types()?;
        self.users()?;
        self.bools()?;
        self.sensitivities()?;
        self.categories()?;
        self.role_types();
        Ok(())
    }

    fn commons(&mut self) -> Result<()> {
        for (_, common) in self.db.commons.iter() {
            let mut perms = SymTab::new(32);
            for (_, perm) in common.perms.iter() {
                let value = perms.next_value();
                perms.insert(perm.name.as_str(), PermDatum { value })?;
            }
            let value = self.pdb.commons.next_value();
            self.pdb.commons.insert(common.name.as_str(), CommonDatum { value, perms })?;
        }
        Ok(())
    }

    fn classes(&mut self) -> Result<()> {
        let db = self.db;
        self.values.classes = vec![None; db.classes.len()];
        for &id in &db.orders.classes {
            let class = &db.classes[id];
            if class.is_map {
                continue;
            }
            let common = db.common_perm_count(id) as u32;
            let mut perms = SymTab::new(32);
            for (index, perm) in class.perms.iter() {
                perms.insert(perm.name.as_str(), PermDatum {
                    value: common + index as u32 + 1,
                })?;
            }
            let value = self.pdb.classes.next_value();
            self.values.classes[id] = Some(value);
            self.pdb.classes.insert(class.name.as_str(), ClassDatum {
                value,
                comkey: class.common.map(|c| db.commons[c].name.clone()),
                perms,
                nprim: db.perm_count(id) as u32,
                default_user: class.default_user,
                default_role: class.default_role,
                default_type: class.default_type,
                default_range: class.default_range,
            })?;
        }
        Ok(())
    }

    fn roles(&mut self) -> Result<()> {
        let db = self.db;
        self.values.roles = vec![None; db.roles.len()];
        for (id, _) in db.roles.iter().filter(|(_, r)| !r.is_attribute) {
            self.values.roles[id] = Some(self.pdb.roles.next_value());
        }
        for (id, role) in db.roles.iter() {
            let Some(value) = self.values.roles[id] else {
                continue;
            };
            let mut dominates = Ebitmap::new();
            dominates.set_bit(value - 1, true);
            let bounds = role.bounds.and_then(|b| self.values.roles[b]).unwrap_or(0);
            self.pdb.roles.insert(role.name.as_str(), RoleDatum {
                value,
                bounds,
                dominates,
                types: Ebitmap::new(),
            })?;
        }
        Ok(())
    }

    fn types(&mut self) -> Result<()> {
        let db = self.db;
        self.values.types = vec![None; db.types.len()];
        for (id, decl) in db.types.iter() {
            let primary = match decl.kind {
                TypeKind::Type => true,
                TypeKind::Attribute => self.kept[id],
                TypeKind::Alias => false,
            };
            if !primary {
                continue;
            }
            let value = self.pdb.types.next_value();
            self.values.types[id] = Some(value);
            self.values.type_names.push(decl.name.clone());
            self.values.type_members.push(db.expand_type(id));
        }
        for (id, decl) in db.types.iter() {
            if decl.kind == TypeKind::Alias {
                self.values.types[id] = decl.actual.and_then(|a| self.values.types[a]);
            }
        }

        for (id, decl) in db.types.iter() {
            let Some(value) = self.values.types[id] else {
                continue;
            };
            let (flavor, bounds) = match decl.kind {
                TypeKind::Type => (
                    TypeFlavor::Type,
                    decl.bounds.and_then(|b| self.values.types[b]).unwrap_or(0),
                ),
                TypeKind::Attribute => (TypeFlavor::Attribute, 0),
                TypeKind::Alias => (TypeFlavor::Alias, 0),
            };
            self.pdb.types.insert(decl.name.as_str(), TypeDatum { value, flavor, bounds })?;
            if decl.permissive && decl.kind == TypeKind::Type {
                self.pdb.permissive_map.set_bit(value, true);
            }
        }
        Ok(())
    }

    fn level(&self, level: &EvalLevel) -> MlsLevel {
        MlsLevel {
            sens: self.values.sensitivities[level.sens].unwrap_or(0),
            cats: level.cats.clone(),
        }
    }

    fn users(&mut self) -> Result<()> {
        let db = self.db;
        self.values.users = vec![None; db.users.len()];
        for (id, _) in db.users.iter().filter(|(_, u)| !u.is_attribute) {
            self.values.users[id] = Some(self.pdb.users.next_value());
        }

        for (id, user) in db.users.iter() {
            let Some(value) = self.values.users[id] else {
                continue;
            };
            let mut roles = Ebitmap::new();
            for role in user.roles.iter() {
                if let Some(role_value) = self.values.roles[role as usize] {
                    roles.set_bit(role_value - 1, true);
                }
            }
            let (range, dfltlevel) = if self.mls {
                let range = match &user.range {
                    Some(range) => {
                        let (low, high) = eval_range(db, range).map_err(|m| self.error(user.node, m))?;
                        MlsRange {
                            low: self.level(&low),
                            high: self.level(&high),
                        }
                    }
                    None => MlsRange::default(),
                };
                let level = match &user.level {
                    Some(level) => {
                        let level = eval_level(db, level).map_err(|m| self.error(user.node, m))?;
                        self.level(&level)
                    }
                    None => MlsLevel::default(),
                };
                (range, level)
            } else {
                (MlsRange::default(), MlsLevel::default())
            };
            let bounds = user.bounds.and_then(|b| self.values.users[b]).unwrap_or(0);
            self.pdb.users.insert(user.name.as_str(), UserDatum {
                value,
                bounds,
                roles,
                range,
                dfltlevel,
            })?;
        }
        Ok(())
    }

    fn bools(&mut self) -> Result<()> {
        for (_, boolean) in self.db.bools.iter() {
            let value = self.pdb.bools.next_value();
            self.values.bools.push(value);
            self.pdb.bools.insert(boolean.name.as_str(), BoolDatum {
                value,
                state: boolean.value,
            })?;
        }
        Ok(())
    }

    fn sensitivities(&mut self) -> Result<()> {
        let db = self.db;
        for &id in &db.orders.sensitivities {
            let sens = &db.sensitivities[id];
            let value = self.pdb.levels.next_value();
            self.pdb.levels.insert(sens.name.as_str(), LevelDatum {
                isalias: false,
                level: MlsLevel {
                    sens: value,
                    cats: sens.cats.clone(),
                },
            })?;
        }
        for (_, alias) in db.sensitivities.iter().filter(|(_, s)| s.is_alias) {
            let Some(actual) = alias.actual else {
                continue;
            };
            let Some(sens) = self.values.sensitivities[actual] else {
                continue;
            };
            self.pdb.levels.insert(alias.name.as_str(), LevelDatum {
                isalias: true,
                level: MlsLevel {
                    sens,
                    cats: db.sensitivities[actual].cats.clone(),
                },
            })?;
        }
        Ok(())
    }

    fn categories(&mut self) -> Result<()> {
        let db = self.db;
        for &id in &db.orders.categories {
            let value = self.pdb.cats.next_value();
            self.pdb.cats.insert(db.categories[id].name.as_str(), CatDatum { value, isalias: false })?;
        }
        for (_, alias) in db.categories.iter().filter(|(_, c)| c.kind == CatKind::Alias) {
            let Some(order) = alias.actual.and_then(|a| db.categories[a].order) else {
                continue;
            };
            self.pdb.cats.insert(alias.name.as_str(), CatDatum {
                value: order + 1,
                isalias: true,
            })?;
        }
        Ok(())
    }

    /// Fills each role's type set; runs once roles and types have values.
    fn role_types(&mut self) {
        let db = self.db;
        for (id, role) in db.roles.iter() {
            if self.values.roles[id].is_none() {
                continue;
            }
            let Some(datum) = self.pdb.roles.search_mut(&role.name) else {
                continue;
            };
            for ty in role.types.iter() {
                let ty = ty as usize;
                if db.types[ty].kind != TypeKind::Type {
                    continue;
                }
                if let Some(value) = self.values.types[ty] {
                    datum.types.set_bit(value - 1, true);
                }
            }
        }
    }

    fn policycaps(&mut self) {
        for (_, name) in &self.db.policycaps {
            if let Some(cap) = PolicyCapability::from_name(name) {
                self.pdb.policycaps.set_bit(cap.number(), true);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Rule expansion helpers
    // ------------------------------------------------------------------------

    /// Type values an access rule names for `id`: a kept attribute stands
    /// for itself, anything else for its member types.
    fn rule_types(&self, id: Id) -> Vec<u32> {
        let decl = &self.db.types[id];
        let has_members = decl.members.as_ref().is_some_and(|m| !m.is_empty());
        if decl.kind == TypeKind::Attribute && self.kept[id] && !self.options.expand_attributes && has_members {
            return self.values.types[id].into_iter().collect();
        }
        self.concrete_types(id)
    }

    fn concrete_types(&self, id: Id) -> Vec<u32> {
        self.db
            .expand_type(id)
            .iter()
            .filter_map(|t| self.values.types[t as usize])
            .collect()
    }

    /// `(source, target)` value pairs of a rule.
    fn pairs(&self, source: Id, target: Target, expand: bool) -> Vec<(u32, u32)> {
        let types = |id| if expand { self.concrete_types(id) } else { self.rule_types(id) };
        match target {
            Target::SelfType => self.concrete_types(source).into_iter().map(|s| (s, s)).collect(),
            Target::Type(target) => {
                let targets = types(target);
                types(source)
                    .into_iter()
                    .flat_map(|s| targets.iter().map(move |&t| (s, t)))
                    .collect()
            }
        }
    }

    /// Real permissions per class that a class-permissions reference grants.
    fn class_perms(&self, perms: &ClassPermsRef, out: &mut Vec<(Id, u32)>) {
        let db = self.db;
        match perms {
            ClassPermsRef::Perms { class, perms } => {
                let bits = perm_bits(db, *class, perms);
                if db.classes[*class].is_map {
                    for perm in bits.iter() {
                        for mapping in &db.classes[*class].perms[perm as usize].mappings {
                            self.class_perms(mapping, out);
                        }
                    }
                    return;
                }
                let word = perm_word(&bits);
                match out.iter_mut().find(|(c, _)| c == class) {
                    Some((_, existing)) => *existing |= word,
                    None => out.push((*class, word)),
                }
            }
            ClassPermsRef::Set(id) => {
                for set in &db.classpermissions[*id].sets {
                    self.class_perms(set, out);
                }
            }
        }
    }

    fn avtab_key(&self, node: NodeId, source: u32, target: u32, class: Id, specified: u16) -> Result<AvTabKey> {
        let class = self.values.classes[class].ok_or_else(|| self.error(node, "Invalid class"))?;
        let narrow = |value, what| as_u16(value, what).map_err(|m| self.error(node, m));
        Ok(AvTabKey::new(
            narrow(source, "Type")?,
            narrow(target, "Type")?,
            narrow(class, "Class")?,
            specified,
        ))
    }

    fn type_name(&self, value: u32) -> &str {
        self.values
            .type_names
            .get(value as usize - 1)
            .map_or("", String::as_str)
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    fn rules(&mut self) -> Result<AvRules> {
        let db = self.db;
        let mut top = AvRules::default();
        let mut errors = Vec::new();
        let mut role_trans: HashMap<(u32, u32, u32), u32> = HashMap::new();
        let mut role_allows: HashSet<(u32, u32)> = HashSet::new();
        let mut range_trans: HashMap<(u32, u32, u32), MlsRange> = HashMap::new();

        for rule in &db.rules {
            let result = match rule {
                Rule::Av { .. } | Rule::AvX { .. } => self.av_rule(rule, &mut top),
                Rule::Type { .. } => self.type_rule(rule, None, &mut top),
                Rule::NameTransition {
                    node,
                    source,
                    target,
                    class,
                    name,
                    result,
                } => self.name_transition(*node, *source, *target, *class, name, *result),
                Rule::RoleTransition {
                    node,
                    source,
                    target,
                    class,
                    result,
                } => self.role_transition(*node, *source, *target, *class, *result, &mut role_trans),
                Rule::RoleAllow { source, target, .. } => {
                    for role in db.expand_role(*source).iter() {
                        for new_role in db.expand_role(*target).iter() {
                            let (Some(role), Some(new_role)) =
                                (self.values.roles[role as usize], self.values.roles[new_role as usize])
                            else {
                                continue;
                            };
                            if role_allows.insert((role, new_role)) {
                                self.pdb.role_allow.push(RoleAllow { role, new_role });
                            }
                        }
                    }
                    Ok(())
                }
                Rule::RangeTransition {
                    node,
                    source,
                    target,
                    class,
                    range,
                } => self.range_transition(*node, *source, *target, *class, range, &mut range_trans),
            };
            if let Err(error) = result {
                errors.push(error);
            }
        }
        report_all(self.logger, errors)?;
        Ok(top)
    }

    fn av_rule(&mut self, rule: &Rule, rules: &mut AvRules) -> Result<()> {
        let db = self.db;
        match rule {
            Rule::Av {
                node,
                kind,
                source,
                target,
                perms,
            } => {
                let mut class_perms = Vec::new();
                self.class_perms(perms, &mut class_perms);
                let Some(specified) = av_specified(*kind) else {
                    self.neverallows.push(Neverallow {
                        node: *node,
                        source: db.expand_type(*source),
                        target: match target {
                            Target::Type(t) => Some(db.expand_type(*t)),
                            Target::SelfType => None,
                        },
                        perms: class_perms,
                        ioctls: None,
                    });
                    return Ok(());
                };
                for (s, t) in self.pairs(*source, *target, false) {
                    for &(class, data) in &class_perms {
                        if data == 0 {
                            continue;
                        }
                        let key = self.avtab_key(*node, s, t, class, specified)?;
                        rules.merge_av(key, data);
                    }
                }
                Ok(())
            }
            Rule::AvX {
                node,
                kind,
                source,
                target,
                perms,
            } => {
                let spec = db
                    .permissionx_spec(perms)
                    .ok_or_else(|| self.error(*node, "Invalid permissionx"))?;
                let Some(specified) = xperm_specified(*kind) else {
                    let ioctl = db.lookup_perm(spec.class, "ioctl").map_or(0, |p| 1u32 << p);
                    self.neverallows.push(Neverallow {
                        node: *node,
                        source: db.expand_type(*source),
                        target: match target {
                            Target::Type(t) => Some(db.expand_type(*t)),
                            Target::SelfType => None,
                        },
                        perms: vec![(spec.class, ioctl)],
                        ioctls: Some(spec.perms.clone()),
                    });
                    return Ok(());
                };
                if !self.options.version.supports_xperms() {
                    return Err(self.version_error("extended permission rules need version 30"));
                }
                for (s, t) in self.pairs(*source, *target, false) {
                    let key = self.avtab_key(*node, s, t, spec.class, specified)?;
                    rules.merge_xperms(key, &spec.perms);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Adds a type rule; `base` holds the unconditional rules when adding
    /// to a conditional branch.
    fn type_rule(&self, rule: &Rule, base: Option<&AvRules>, rules: &mut AvRules) -> Result<()> {
        let Rule::Type {
            node,
            kind,
            source,
            target,
            class,
            result,
        } = rule
        else {
            return Ok(());
        };
        let Some(result) = self.values.types[*result] else {
            return Err(self.error(*node, "Invalid type rule result"));
        };
        let specified = type_specified(*kind);
        for (s, t) in self.pairs(*source, *target, true) {
            let key = self.avtab_key(*node, s, t, *class, specified)?;
            let existing = base.and_then(|b| b.get(&key)).or_else(|| rules.get(&key)).map(|d| d.data);
            match existing {
                Some(data) if data == result => {
                    self.logger.warn(format!(
                        "Duplicate {} rule (scontext={} tcontext={} tclass={} result={}){}",
                        kind.keyword(),
                        self.type_name(s),
                        self.type_name(t),
                        self.db.classes[*class].name,
                        self.type_name(result),
                        self.sources.locate(*node)
                    ));
                }
                Some(data) => {
                    return Err(self.error(
                        *node,
                        format!(
                            "Conflicting type rules (scontext={} tcontext={} tclass={} result={}), existing={}",
                            self.type_name(s),
                            self.type_name(t),
                            self.db.classes[*class].name,
                            self.type_name(result),
                            self.type_name(data)
                        ),
                    ));
                }
                None => rules.push(key, AvTabDatum::data(result)),
            }
        }
        Ok(())
    }

    fn name_transition(
        &mut self,
        node: NodeId,
        source: Id,
        target: Target,
        class: Id,
        name: &str,
        result: Id,
    ) -> Result<()> {
        if !self.options.version.supports_filename_trans() {
            return Err(self.version_error("typetransition with an object name needs version 25"));
        }
        let Some(otype) = self.values.types[result] else {
            return Err(self.error(node, "Invalid typetransition result"));
        };
        let tclass = self.values.classes[class].unwrap_or(0);
        for (s, t) in self.pairs(source, target, true) {
            let key = FilenameTransKey {
                ttype: t,
                tclass,
                name: name.to_string(),
            };
            match self.pdb.filename_trans.add(s, key, otype) {
                Ok(true) => {}
                Ok(false) => self.logger.warn(format!(
                    "Duplicate typetransition rule for object name \"{name}\"{}",
                    self.sources.locate(node)
                )),
                Err(PolicyDbError::Conflict { .. }) => {
                    return Err(self.error(node, "Conflicting name type transition rules"));
                }
                Err(other) => return Err(other.into()),
            }
        }
        Ok(())
    }

    fn role_transition(
        &mut self,
        node: NodeId,
        source: Id,
        target: Id,
        class: Id,
        result: Id,
        seen: &mut HashMap<(u32, u32, u32), u32>,
    ) -> Result<()> {
        let db = self.db;
        let Some(new_role) = self.values.roles[result] else {
            return Err(self.error(node, "Invalid roletransition result"));
        };
        let tclass = self.values.classes[class].unwrap_or(0);
        let types = self.concrete_types(target);
        for role in db.expand_role(source).iter() {
            let Some(role) = self.values.roles[role as usize] else {
                continue;
            };
            for &type_ in &types {
                match seen.get(&(role, type_, tclass)) {
                    Some(&existing) if existing == new_role => self.logger.warn(format!(
                        "Duplicate roletransition rule{}",
                        self.sources.locate(node)
                    )),
                    Some(_) => return Err(self.error(node, "Conflicting role transition rules")),
                    None => {
                        seen.insert((role, type_, tclass), new_role);
                        self.pdb.role_trans.push(RoleTrans {
                            role,
                            type_,
                            new_role,
                            tclass,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn range_transition(
        &mut self,
        node: NodeId,
        source: Id,
        target: Id,
        class: Id,
        range: &RangeRef,
        seen: &mut HashMap<(u32, u32, u32), MlsRange>,
    ) -> Result<()> {
        if !self.mls {
            return Ok(());
        }
        let (low, high) = eval_range(self.db, range).map_err(|m| self.error(node, m))?;
        let range = MlsRange {
            low: self.level(&low),
            high: self.level(&high),
        };
        let target_class = self.values.classes[class].unwrap_or(0);
        for (source_type, target_type) in self.pairs(source, Target::Type(target), true) {
            match seen.get(&(source_type, target_type, target_class)) {
                Some(existing) if *existing == range => {}
                Some(_) => return Err(self.error(node, "Conflicting Range transition rules")),
                None => {
                    seen.insert((source_type, target_type, target_class), range.clone());
                    self.pdb.range_trans.push(RangeTrans {
                        source_type,
                        target_type,
                        target_class,
                        range: range.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Conditionals
    // ------------------------------------------------------------------------

    fn cond_expr(&self, expr: &SetExpr, out: &mut Vec<CondExpr>) -> std::result::Result<(), String> {
        match expr {
            SetExpr::Item(id) => out.push(CondExpr::Bool(self.values.bools[*id])),
            SetExpr::List(items) => match items.as_slice() {
                [single] => self.cond_expr(single, out)?,
                _ => return Err("Invalid booleanif expression".to_string()),
            },
            SetExpr::Op(op, items) => {
                let (arity, item) = match op {
                    ExprOp::Not => (1, CondExpr::Not),
                    ExprOp::And => (2, CondExpr::And),
                    ExprOp::Or => (2, CondExpr::Or),
                    ExprOp::Xor => (2, CondExpr::Xor),
                    ExprOp::Eq => (2, CondExpr::Eq),
                    ExprOp::Neq => (2, CondExpr::Neq),
                    ExprOp::All | ExprOp::Range => return Err("Invalid booleanif expression".to_string()),
                };
                if items.len() != arity {
                    return Err("Invalid booleanif expression".to_string());
                }
                for item in items {
                    self.cond_expr(item, out)?;
                }
                out.push(item);
            }
        }
        Ok(())
    }

    /// Collects each conditional's expression and its two rule lists.
    fn conditionals(&mut self, top: &AvRules) -> Result<Vec<(Vec<CondExpr>, AvRules, AvRules)>> {
        let db = self.db;
        let mut out = Vec::new();
        let mut errors = Vec::new();
        for cond in &db.conditionals {
            let mut expr = Vec::new();
            if let Err(message) = self.cond_expr(&cond.expr, &mut expr) {
                errors.push(self.error(cond.node, message));
                continue;
            }
            let mut branches = [AvRules::default(), AvRules::default()];
            for (branch, rules) in [true, false].into_iter().zip(branches.iter_mut()) {
                for rule in cond.rules(branch) {
                    let result = match rule {
                        Rule::Av { .. } => self.av_rule(rule, rules),
                        Rule::Type { .. } => self.type_rule(rule, Some(top), rules),
                        Rule::NameTransition { node, .. } => Err(self.error(
                            *node,
                            "typetransition with file name not allowed within a booleanif block.",
                        )),
                        other => Err(self.error(other.node(), "Rule not allowed within a booleanif block")),
                    };
                    if let Err(error) = result {
                        errors.push(error);
                    }
                }
            }
            let [true_rules, false_rules] = branches;
            out.push((expr, true_rules, false_rules));
        }
        report_all(self.logger, errors)?;
        Ok(out)
    }

    fn fill_avtabs(&mut self, top: &AvRules, conds: Vec<(Vec<CondExpr>, AvRules, AvRules)>) -> Result<()> {
        let mut te_avtab = AvTab::with_capacity(top.len() as u32);
        for (key, datum) in top.finish() {
            te_avtab.insert(key, datum)?;
        }
        self.pdb.te_avtab = te_avtab;

        let total: usize = conds.iter().map(|(_, t, f)| t.len() + f.len()).sum();
        let mut cond_avtab = AvTab::with_capacity(total as u32);
        let states: Vec<bool> = self.db.bools.iter().map(|(_, b)| b.value).collect();
        for (expr, true_rules, false_rules) in conds {
            let cur_state = evaluate_cond(&expr, |b| states.get(b as usize - 1).copied().unwrap_or(false))
                .unwrap_or(false);
            let mut node = CondNode {
                cur_state,
                expr,
                true_list: Vec::new(),
                false_list: Vec::new(),
            };
            for (key, datum) in true_rules.finish() {
                node.true_list.push(cond_avtab.insert_nonunique(key, datum));
            }
            for (key, datum) in false_rules.finish() {
                node.false_list.push(cond_avtab.insert_nonunique(key, datum));
            }
            self.pdb.cond_list.push(node);
        }
        self.pdb.te_cond_avtab = cond_avtab;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Neverallow checking
    // ------------------------------------------------------------------------

    fn types_match(&self, rule: &Neverallow, key: &AvTabKey) -> bool {
        let members = |value: u16| self.values.type_members.get(usize::from(value).wrapping_sub(1));
        let (Some(sources), Some(targets)) = (members(key.source_type), members(key.target_type)) else {
            return false;
        };
        let hit = sources.and(&rule.source);
        match &rule.target {
            Some(target) => !hit.is_empty() && targets.match_any(target),
            None => hit.match_any(targets),
        }
    }

    /// True when the allowed ioctl numbers of `key` reach into `ioctls`. An
    /// allow rule without extended permissions allows every number.
    fn ioctls_overlap(&self, table: &AvTab, key: &AvTabKey, ioctls: &Ebitmap) -> bool {
        let mut restricted = false;
        for (other, datum) in table.iter() {
            if other.specified & AVTAB_XPERMS_ALLOWED == 0
                || (other.source_type, other.target_type, other.target_class)
                    != (key.source_type, key.target_type, key.target_class)
            {
                continue;
            }
            restricted = true;
            let Some(xperms) = datum.xperms else {
                continue;
            };
            let hit = ioctls.iter().any(|number| {
                let (driver, function) = (((number >> 8) & 0xff) as u8, (number & 0xff) as u8);
                match xperms.specified {
                    AVTAB_XPERMS_IOCTLDRIVER => xperms.is_set(driver),
                    _ => xperms.driver == driver && xperms.is_set(function),
                }
            });
            if hit {
                return true;
            }
        }
        !restricted
    }

    fn check_neverallows(&self) -> Result<()> {
        let db = self.db;
        let mut errors = Vec::new();
        for rule in &self.neverallows {
            let mut violations = Vec::new();
            for table in [&self.pdb.te_avtab, &self.pdb.te_cond_avtab] {
                for (key, datum) in table.iter() {
                    if key.specified & AVTAB_ALLOWED == 0 {
                        continue;
                    }
                    let Some(&(class, denied)) = rule
                        .perms
                        .iter()
                        .find(|(class, _)| self.values.classes[*class] == Some(u32::from(key.target_class)))
                    else {
                        continue;
                    };
                    let overlap = datum.data & denied;
                    if overlap == 0 || !self.types_match(rule, key) {
                        continue;
                    }
                    if let Some(ioctls) = &rule.ioctls {
                        if !self.ioctls_overlap(table, key, ioctls) {
                            continue;
                        }
                    }
                    let perms: Vec<&str> = (0..32u32)
                        .filter(|bit| overlap & (1 << bit) != 0)
                        .map(|bit| db.perm_name(class, bit as usize))
                        .collect();
                    violations.push(format!(
                        "  allow {} {}:{} {{ {} }};",
                        self.type_name(u32::from(key.source_type)),
                        self.type_name(u32::from(key.target_type)),
                        db.classes[class].name,
                        perms.join(" ")
                    ));
                }
            }
            if violations.is_empty() {
                continue;
            }
            self.logger.error(format!(
                "neverallow check failed{}\n{}",
                self.sources.locate(rule.node),
                violations.join("\n")
            ));
            errors.push(self.error(rule.node, "neverallow check failed"));
        }
        debug!(neverallows = self.neverallows.len(), failed = errors.len(), "checked neverallow rules");
        report_all(self.logger, errors)
    }

    // ------------------------------------------------------------------------
    // Object contexts
    // ------------------------------------------------------------------------

    fn context(&self, node: NodeId, context: &ContextRef) -> Result<Context> {
        let db = self.db;
        let invalid = || self.error(node, "Invalid context");
        let spec = db.context_spec(context).ok_or_else(invalid)?;
        let user = self.values.users[spec.user].ok_or_else(invalid)?;
        let role = self.values.roles[spec.role].ok_or_else(invalid)?;
        let type_ = self.values.types[spec.type_].ok_or_else(invalid)?;
        let range = if self.mls {
            let (low, high) = eval_range(db, &spec.range).map_err(|m| self.error(node, m))?;
            MlsRange {
                low: self.level(&low),
                high: self.level(&high),
            }
        } else {
            MlsRange::default()
        };
        Ok(Context {
            user,
            role,
            type_,
            range,
        })
    }

    fn ignore_for_target(&self, keyword: &str, count: usize) {
        if count > 0 {
            self.logger.warn(format!(
                "Ignoring {count} {keyword} statements, not used by the {} target",
                self.options.target
            ));
        }
    }

    fn ocontexts(&mut self) -> Result<()> {
        let db = self.db;
        let labeling = &db.labeling;
        let mut ocontexts = std::mem::take(&mut self.pdb.ocontexts);

        for (position, &id) in db.orders.sids.iter().enumerate() {
            let sid = &db.sids[id];
            let Some(context) = &sid.context else {
                continue;
            };
            ocontexts.isids.push(InitialSid {
                sid: position as u32 + 1,
                name: sid.name.clone(),
                context: self.context(sid.node, context)?,
            });
        }

        match self.options.target {
            TargetPlatform::SELinux => {
                for con in &labeling.portcons {
                    ocontexts.ports.push(PortCon {
                        protocol: con.protocol,
                        low: con.low,
                        high: con.high,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.netifcons {
                    ocontexts.netifs.push(NetifCon {
                        name: con.name.clone(),
                        if_context: self.context(con.node, &con.if_context)?,
                        packet_context: self.context(con.node, &con.packet_context)?,
                    });
                }
                for con in &labeling.nodecons {
                    let context = self.context(con.node, &con.context)?;
                    match (con.addr, con.mask) {
                        (IpAddr::V4(addr), IpAddr::V4(mask)) => ocontexts.nodes.push(NodeCon {
                            addr: addr.octets(),
                            mask: mask.octets(),
                            context,
                        }),
                        (IpAddr::V6(addr), IpAddr::V6(mask)) => ocontexts.node6s.push(Node6Con {
                            addr: addr.octets(),
                            mask: mask.octets(),
                            context,
                        }),
                        _ => {
                            return Err(self.error(con.node, "nodecon address and mask must be the same IP version"));
                        }
                    }
                }
                for con in &labeling.fsuses {
                    ocontexts.fsuses.push(FsUseCon {
                        behavior: con.behavior,
                        fs_name: con.fs.clone(),
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.ibpkeycons {
                    ocontexts.ibpkeys.push(IbPkeyCon {
                        subnet_prefix: con.prefix,
                        low: con.low,
                        high: con.high,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.ibendportcons {
                    ocontexts.ibendports.push(IbEndportCon {
                        dev_name: con.dev_name.clone(),
                        port: con.port,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                self.ignore_for_target("pirqcon", labeling.pirqcons.len());
                self.ignore_for_target("iomemcon", labeling.iomemcons.len());
                self.ignore_for_target("ioportcon", labeling.ioportcons.len());
                self.ignore_for_target("pcidevicecon", labeling.pcidevicecons.len());
                self.ignore_for_target("devicetreecon", labeling.devicetreecons.len());
            }
            TargetPlatform::Xen => {
                for con in &labeling.pirqcons {
                    ocontexts.pirqs.push(PirqCon {
                        pirq: con.pirq,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.ioportcons {
                    ocontexts.ioports.push(IoPortCon {
                        low: con.low,
                        high: con.high,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.iomemcons {
                    ocontexts.iomems.push(IoMemCon {
                        low: con.low,
                        high: con.high,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.pcidevicecons {
                    ocontexts.pcidevices.push(PciDeviceCon {
                        device: con.device,
                        context: self.context(con.node, &con.context)?,
                    });
                }
                for con in &labeling.devicetreecons {
                    ocontexts.devicetrees.push(DeviceTreeCon {
                        path: con.path.clone(),
                        context: self.context(con.node, &con.context)?,
                    });
                }
                self.ignore_for_target("portcon", labeling.portcons.len());
                self.ignore_for_target("netifcon", labeling.netifcons.len());
                self.ignore_for_target("nodecon", labeling.nodecons.len());
                self.ignore_for_target("fsuse", labeling.fsuses.len());
                self.ignore_for_target("ibpkeycon", labeling.ibpkeycons.len());
                self.ignore_for_target("ibendportcon", labeling.ibendportcons.len());
            }
        }
        self.pdb.ocontexts = ocontexts;

        // Sorted by filesystem, then path.
        let mut genfs: Vec<Genfs> = Vec::new();
        for con in &labeling.genfscons {
            let entry = GenfsEntry {
                path: con.path.clone(),
                sclass: 0,
                context: self.context(con.node, &con.context)?,
            };
            match genfs.last_mut() {
                Some(last) if last.fstype == con.fs => last.entries.push(entry),
                _ => genfs.push(Genfs {
                    fstype: con.fs.clone(),
                    entries: vec![entry],
                }),
            }
        }
        self.pdb.genfs = genfs;
        Ok(())
    }

    /// Each type value maps to itself plus the kept attributes holding it.
    fn type_attr_map(&mut self) {
        let db = self.db;
        let mut map = vec![Ebitmap::new(); self.pdb.types.nprim() as usize];
        for (bit, attrs) in map.iter_mut().enumerate() {
            attrs.set_bit(bit as u32, true);
        }
        for (id, decl) in db.types.iter() {
            if decl.kind != TypeKind::Attribute {
                continue;
            }
            let Some(attr) = self.values.types[id] else {
                continue;
            };
            for member in db.expand_type(id).iter() {
                if let Some(attrs) = self.values.types[member as usize].and_then(|v| map.get_mut(v as usize - 1)) {
                    attrs.set_bit(attr - 1, true);
                }
            }
        }
        self.pdb.type_attr_map = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, build};
    use crate::order::order_policy;
    use crate::parser::{ParseTree, parse};
    use crate::post::{PostOptions, evaluate};
    use crate::resolve::{ResolveOptions, resolve};
    use crate::verify::{VerifyOptions, pre_verify, verify};

    const BASE: &str = "\
(class file (read write ioctl))
(classorder (file))
(sid kernel)
(sidorder (kernel))
(sensitivity s0)
(sensitivityorder (s0))
(user u) (role r) (type t) (type t2)
(userrole u r) (roletype r t) (roletype r t2)
(userlevel u (s0))
(userrange u ((s0) (s0)))
(sidcontext kernel (u r t ((s0) (s0))))
";

    fn lower(extra: &str, options: BinaryOptions) -> Result<PolicyDb> {
        let logger = Logger::default();
        let mut tree = ParseTree::new();
        let src = format!("{BASE}{extra}");
        parse(&logger, "test.cil", &src, &mut tree)?;
        let stmts = build(&logger, &tree, BuildOptions::default())?;
        let mut db = resolve(&logger, tree.sources(), &stmts, ResolveOptions::default())?;
        order_policy(&logger, tree.sources(), &mut db)?;
        pre_verify(&logger, tree.sources(), &db)?;
        evaluate(&logger, tree.sources(), &mut db, PostOptions::default())?;
        let settings = verify(&logger, tree.sources(), &db, VerifyOptions::default())?;
        build_policydb(&logger, tree.sources(), &db, settings, options)
    }

    fn key(source: u16, target: u16, specified: u16) -> AvTabKey {
        AvTabKey::new(source, target, 1, specified)
    }

    #[test]
    fn values_follow_declaration_and_order() {
        let pdb = lower(
            "(class dir (search)) (classorder (dir file)) (allow t t (file (read)))",
            BinaryOptions::default(),
        )
        .unwrap();
        assert_eq!(pdb.classes.search("dir").map(|c| c.value), Some(1));
        assert_eq!(pdb.classes.search("file").map(|c| c.value), Some(2));
        assert_eq!(pdb.roles.search("object_r").map(|r| r.value), Some(1));
        assert_eq!(pdb.roles.search("r").map(|r| r.value), Some(2));
        assert_eq!(pdb.types.search("t2").map(|t| t.value), Some(2));
        assert_eq!(pdb.ocontexts.isids.len(), 1);
    }

    #[test]
    fn avtab_values_must_fit_in_16_bits() {
        assert_eq!(as_u16(65_535, "Type"), Ok(u16::MAX));
        assert_eq!(
            as_u16(65_536, "Type").unwrap_err(),
            "Type value 65536 does not fit in an access vector key"
        );
    }

    #[test]
    fn access_rules_merge_by_key() {
        let pdb = lower(
            "(allow t t (file (read)))
(allow t t (file (write)))
(dontaudit t t2 (file (read)))
(dontaudit t t2 (file (write)))",
            BinaryOptions::default(),
        )
        .unwrap();
        assert_eq!(pdb.te_avtab.search(&key(1, 1, AVTAB_ALLOWED)).map(|d| d.data), Some(0b11));
        assert_eq!(pdb.te_avtab.search(&key(1, 2, AVTAB_AUDITDENY)).map(|d| d.data), Some(!0b11));
        assert_eq!(pdb.te_avtab.nel(), 2);
    }

    #[test]
    fn self_target_expands_per_source_type() {
        let pdb = lower(
            "(typeattribute dom) (typeattributeset dom (t t2)) (allow dom self (file (read)))",
            BinaryOptions::default(),
        )
        .unwrap();
        assert!(pdb.te_avtab.search(&key(1, 1, AVTAB_ALLOWED)).is_some());
        assert!(pdb.te_avtab.search(&key(2, 2, AVTAB_ALLOWED)).is_some());
        assert!(pdb.te_avtab.search(&key(1, 2, AVTAB_ALLOWED)).is_none());
        assert_eq!(pdb.te_avtab.nel(), 2);
    }

    #[test]
    fn kept_attribute_names_itself_unless_expanded() {
        let src = "(typeattribute dom) (typeattributeset dom (t t2)) (allow dom t (file (read)))";

        let pdb = lower(src, BinaryOptions::default()).unwrap();
        assert!(pdb.te_avtab.search(&key(3, 1, AVTAB_ALLOWED)).is_some());
        assert_eq!(pdb.te_avtab.nel(), 1);
        assert_eq!(pdb.type_attr_map[0].iter().collect::<Vec<_>>(), vec![0, 2]);

        let expanded = lower(
            src,
            BinaryOptions {
                expand_attributes: true,
                ..BinaryOptions::default()
            },
        )
        .unwrap();
        assert!(expanded.types.search("dom").is_none());
        assert!(expanded.te_avtab.search(&key(1, 1, AVTAB_ALLOWED)).is_some());
        assert!(expanded.te_avtab.search(&key(2, 1, AVTAB_ALLOWED)).is_some());
    }

    #[test]
    fn conflicting_type_transitions_are_rejected() {
        let err = lower(
            "(allow t t (file (read)))\n(typetransition t t2 file t)\n(typetransition t t2 file t2)",
            BinaryOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Conflicting type rules (scontext=t tcontext=t2 tclass=file result=t2), existing=t at test.cil:14"
        );
    }

    #[test]
    fn duplicate_type_transition_is_kept_once() {
        let pdb = lower(
            "(allow t t (file (read)))\n(typetransition t t2 file t)\n(typetransition t t2 file t)",
            BinaryOptions::default(),
        )
        .unwrap();
        assert_eq!(pdb.te_avtab.search(&key(1, 2, AVTAB_TRANSITION)).map(|d| d.data), Some(1));
        assert_eq!(pdb.te_avtab.nel(), 2);
    }

    #[test]
    fn neverallow_violation_fails_unless_disabled() {
        let src = "(allow t t2 (file (write)))\n(neverallow t t2 (file (write)))";
        let err = lower(src, BinaryOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "neverallow check failed at test.cil:13");

        let disabled = BinaryOptions {
            disable_neverallow: true,
            ..BinaryOptions::default()
        };
        assert!(lower(src, disabled).is_ok());
    }

    #[test]
    fn neverallow_sees_through_kept_attributes() {
        let err = lower(
            "(typeattribute dom) (typeattributeset dom (t t2))
(allow dom t (file (write)))
(neverallow t2 t (file (write)))",
            BinaryOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "neverallow check failed at test.cil:14");
        assert!(
            lower(
                "(allow t t (file (read)))\n(neverallow t t (file (write)))",
                BinaryOptions::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn conditional_rules_go_to_their_branch() {
        let pdb = lower(
            "(allow t t (file (read)))
(boolean b true)
(booleanif b (true (allow t t2 (file (write)))) (false (allow t t2 (file (read)))))",
            BinaryOptions::default(),
        )
        .unwrap();
        assert_eq!(pdb.cond_list.len(), 1);
        let cond = &pdb.cond_list[0];
        assert!(cond.cur_state);
        assert_eq!(cond.expr, vec![CondExpr::Bool(1)]);
        assert_eq!((cond.true_list.len(), cond.false_list.len()), (1, 1));
        assert_eq!(pdb.te_cond_avtab.datum(cond.true_list[0]).data, 0b10);
        assert_eq!(pdb.te_avtab.nel(), 1);
    }

    #[test]
    fn name_transition_in_booleanif_is_rejected() {
        let err = lower(
            "(allow t t (file (read)))
(boolean b false)
(booleanif b (true (typetransition t t2 file \"log\" t)))",
            BinaryOptions::default(),
        )
        .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("typetransition with file name not allowed within a booleanif block."),
            "{err}"
        );
    }

    #[test]
    fn name_transitions_are_recorded() {
        let pdb = lower(
            "(allow t t (file (read)))\n(typetransition t t2 file \"log\" t)",
            BinaryOptions::default(),
        )
        .unwrap();
        assert_eq!(pdb.filename_trans.nrules(), 1);
    }

    #[test]
    fn ioctl_numbers_split_by_driver() {
        let mut ioctls: Ebitmap = (0x8900..=0x89ff).collect();
        ioctls.set_bit(0x1234, true);
        let xperms = ioctl_xperms(&ioctls);
        assert_eq!(xperms.len(), 2);
        assert_eq!(xperms[0].specified, AVTAB_XPERMS_IOCTLDRIVER);
        assert!(xperms[0].is_set(0x89));
        assert!(!xperms[0].is_set(0x12));
        assert_eq!((xperms[1].specified, xperms[1].driver), (AVTAB_XPERMS_IOCTLFUNCTION, 0x12));
        assert!(xperms[1].is_set(0x34));
    }

    #[test]
    fn extended_permissions_land_in_the_avtab() {
        let pdb = lower(
            "(allow t t (file (ioctl)))\n(allowx t t (ioctl file (0x1234 0x1235)))",
            BinaryOptions::default(),
        )
        .unwrap();
        let xperms: Vec<ExtendedPerms> = pdb
            .te_avtab
            .iter()
            .filter(|(k, _)| k.specified == AVTAB_XPERMS_ALLOWED)
            .filter_map(|(_, d)| d.xperms)
            .collect();
        assert_eq!(xperms.len(), 1);
        assert!(xperms[0].is_set(0x34) && xperms[0].is_set(0x35));

        let err = lower(
            "(allow t t (file (ioctl)))\n(allowx t t (ioctl file (0x1234)))",
            BinaryOptions {
                version: PolicyVersion::new(29),
                ..BinaryOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, CilError::Encode(PolicyDbError::UnsupportedVersion { version: 29, .. })));
    }

    #[test]
    fn xen_target_keeps_only_xen_contexts() {
        let pdb = lower(
            "(allow t t (file (read)))
(portcon tcp 80 (u r t ((s0) (s0))))
(pirqcon 33 (u r t ((s0) (s0))))",
            BinaryOptions {
                target: TargetPlatform::Xen,
                ..BinaryOptions::default()
            },
        )
        .unwrap();
        assert_eq!(pdb.ocontexts.pirqs.len(), 1);
        assert!(pdb.ocontexts.ports.is_empty());
    }
}
