//! Evaluation of the resolved database.
//!
//! Runs after ordering, once every category and sensitivity has a position:
//!
//! - attribute expressions of types, roles and users become member bitmaps
//! - `roletype` and `userrole` grants are expanded to concrete ids
//! - category sets and `sensitivitycategory` associations become bitmaps
//!   over category order positions
//! - labeling statements are sorted into kernel match order and exact
//!   duplicates are dropped

use std::cmp::{Ordering, Reverse};

use sepol_policydb::Ebitmap;
use tracing::debug;

use crate::ast::ExprOp;
use crate::db::{
    CatKind, ContextRef, Db, Id, LevelRef, Namespace, RangeRef, RoleDecl, SetExpr, TypeDecl, TypeKind, UserDecl,
};
use crate::error::{CilError, Result, report_all};
use crate::fc::compare_filecons;
use crate::log::Logger;
use crate::parser::SourceMap;
use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostOptions {
    /// Identical labeling statements with identical contexts are merged
    /// instead of reported.
    pub multiple_decls: bool,
}

/// Evaluates every set in `db` and puts labeling statements in order.
pub fn evaluate(logger: &Logger, sources: &SourceMap, db: &mut Db, options: PostOptions) -> Result<()> {
    evaluate_attributes(db);
    assign_role_types(db);
    assign_user_roles(db);
    evaluate_categories(logger, sources, db)?;
    sort_labeling(logger, sources, db, options)?;

    debug!(
        types = db.types.len(),
        roles = db.roles.len(),
        users = db.users.len(),
        "evaluated policy sets"
    );
    Ok(())
}

// ============================================================================
// Set expressions
// ============================================================================

fn single(id: Id) -> Ebitmap {
    [id as u32].into_iter().collect()
}

fn apply(op: ExprOp, operands: &[Ebitmap], universe: &Ebitmap) -> Ebitmap {
    match (op, operands) {
        (ExprOp::All, _) => universe.clone(),
        (ExprOp::Not, [a]) => universe.andnot(a, universe.highbit()),
        (ExprOp::And, [a, b]) => a.and(b),
        (ExprOp::Or, [a, b]) => a.or(b),
        (ExprOp::Xor, [a, b]) => a.xor(b).and(universe),
        _ => operands.iter().fold(Ebitmap::new(), |acc, o| acc.or(o)),
    }
}

/// Evaluates `expr` with `leaf` giving the bitmap of each named item.
fn eval_set(expr: &SetExpr, universe: &Ebitmap, leaf: &mut dyn FnMut(Id) -> Ebitmap) -> Ebitmap {
    match expr {
        SetExpr::Item(id) => leaf(*id),
        SetExpr::List(items) => items
            .iter()
            .fold(Ebitmap::new(), |acc, item| acc.or(&eval_set(item, universe, leaf))),
        SetExpr::Op(op, items) => {
            let operands: Vec<Ebitmap> = items.iter().map(|item| eval_set(item, universe, leaf)).collect();
            apply(*op, &operands, universe)
        }
    }
}

/// Evaluates a permission expression over the combined permission list of
/// `class`; bits are permission indices.
pub fn perm_bits(db: &Db, class: Id, expr: &SetExpr) -> Ebitmap {
    let universe: Ebitmap = (0..db.perm_count(class) as u32).collect();
    eval_set(expr, &universe, &mut single)
}

/// A declaration that may stand for a set of its own kind.
trait Group {
    fn is_group(&self) -> bool;
    fn alias_of(&self) -> Option<Id> {
        None
    }
    fn exprs(&self) -> &[(NodeId, SetExpr)];
    fn members(&self) -> Option<&Ebitmap>;
    fn set_members(&mut self, members: Ebitmap);
}

impl Group for TypeDecl {
    fn is_group(&self) -> bool {
        self.kind == TypeKind::Attribute
    }
    fn alias_of(&self) -> Option<Id> {
        self.actual.filter(|_| self.kind == TypeKind::Alias)
    }
    fn exprs(&self) -> &[(NodeId, SetExpr)] {
        &self.exprs
    }
    fn members(&self) -> Option<&Ebitmap> {
        self.members.as_ref()
    }
    fn set_members(&mut self, members: Ebitmap) {
        self.members = Some(members);
    }
}

impl Group for RoleDecl {
    fn is_group(&self) -> bool {
        self.is_attribute
    }
    fn exprs(&self) -> &[(NodeId, SetExpr)] {
        &self.exprs
    }
    fn members(&self) -> Option<&Ebitmap> {
        self.members.as_ref()
    }
    fn set_members(&mut self, members: Ebitmap) {
        self.members = Some(members);
    }
}

impl Group for UserDecl {
    fn is_group(&self) -> bool {
        self.is_attribute
    }
    fn exprs(&self) -> &[(NodeId, SetExpr)] {
        &self.exprs
    }
    fn members(&self) -> Option<&Ebitmap> {
        self.members.as_ref()
    }
    fn set_members(&mut self, members: Ebitmap) {
        self.members = Some(members);
    }
}

/// Concrete members of `id`, evaluating nested attributes once.
fn group_members<T: Group>(ns: &mut Namespace<T>, id: Id, universe: &Ebitmap) -> Ebitmap {
    if let Some(actual) = ns[id].alias_of() {
        return group_members(ns, actual, universe);
    }
    if !ns[id].is_group() {
        return single(id);
    }
    if let Some(members) = ns[id].members() {
        return members.clone();
    }
    let exprs: Vec<SetExpr> = ns[id].exprs().iter().map(|(_, e)| e.clone()).collect();
    // Placeholder while evaluating; cycles are rejected before this stage.
    ns[id].set_members(Ebitmap::new());
    let mut members = Ebitmap::new();
    for expr in &exprs {
        let value = eval_set(expr, universe, &mut |leaf| group_members(ns, leaf, universe));
        members.union_with(&value);
    }
    let members = members.and(universe);
    ns[id].set_members(members.clone());
    members
}

fn universe_of<T: Group>(ns: &Namespace<T>) -> Ebitmap {
    ns.iter()
        .filter(|(_, item)| !item.is_group() && item.alias_of().is_none())
        .map(|(id, _)| id as u32)
        .collect()
}

fn evaluate_group<T: Group>(ns: &mut Namespace<T>) {
    let universe = universe_of(ns);
    for id in 0..ns.len() {
        if ns[id].is_group() {
            group_members(ns, id, &universe);
        }
    }
}

fn evaluate_attributes(db: &mut Db) {
    evaluate_group(&mut db.types);
    evaluate_group(&mut db.roles);
    evaluate_group(&mut db.users);
}

/// Expands `roletype` grants; a role attribute passes them to its members.
fn assign_role_types(db: &mut Db) {
    let mut grants = Vec::new();
    for (id, role) in db.roles.iter().filter(|(_, r)| !r.type_refs.is_empty()) {
        let types = role
            .type_refs
            .iter()
            .fold(Ebitmap::new(), |acc, &t| acc.or(&db.expand_type(t)));
        grants.extend(db.expand_role(id).iter().map(|r| (r as Id, types.clone())));
    }
    for (role, types) in grants {
        db.roles[role].types.union_with(&types);
    }
}

/// Expands `userrole` grants; a user attribute passes them to its members.
fn assign_user_roles(db: &mut Db) {
    let mut grants = Vec::new();
    for (id, user) in db.users.iter().filter(|(_, u)| !u.role_refs.is_empty()) {
        let roles = user
            .role_refs
            .iter()
            .fold(Ebitmap::new(), |acc, &r| acc.or(&db.expand_role(r)));
        grants.extend(db.expand_user(id).iter().map(|u| (u as Id, roles.clone())));
    }
    for (user, roles) in grants {
        db.users[user].roles.union_with(&roles);
    }
}

/// Whether an attribute survives into the binary policy.
///
/// Attributes never used by a rule are dropped. Attributes used only by
/// allow-style rules are expanded into their members when they have none,
/// or always when `expand` is set; the rules then name the member types
/// directly.
pub fn attribute_kept(decl: &TypeDecl, expand: bool) -> bool {
    let used = decl.used;
    if !used.avrule && !used.neverallow {
        return false;
    }
    if used.neverallow {
        return true;
    }
    let size = decl.members.as_ref().map_or(0, Ebitmap::cardinality);
    let threshold = if expand { u32::MAX } else { 1 };
    size >= threshold
}

// ============================================================================
// Categories and levels
// ============================================================================

/// Every ordered category, as order positions.
pub fn category_universe(db: &Db) -> Ebitmap {
    (0..db.orders.categories.len() as u32).collect()
}

fn category_order(db: &Db, id: Id) -> std::result::Result<u32, String> {
    let cat = &db.categories[id];
    match (cat.kind, cat.actual) {
        (CatKind::Alias, Some(actual)) => category_order(db, actual),
        _ => cat.order.ok_or_else(|| format!("Category {} has no order", cat.name)),
    }
}

/// Evaluates a category expression to order positions.
pub fn category_bits(db: &Db, expr: &SetExpr) -> std::result::Result<Ebitmap, String> {
    let universe = category_universe(db);
    category_bits_in(db, expr, &universe)
}

fn category_bits_in(db: &Db, expr: &SetExpr, universe: &Ebitmap) -> std::result::Result<Ebitmap, String> {
    match expr {
        SetExpr::Item(id) => {
            let cat = &db.categories[*id];
            match (cat.kind, &cat.members, &cat.expr) {
                (CatKind::Set, Some(members), _) => Ok(members.clone()),
                (CatKind::Set, None, Some(expr)) => category_bits_in(db, expr, universe),
                (CatKind::Set, None, None) => Ok(Ebitmap::new()),
                _ => category_order(db, *id).map(|order| single(order as Id)),
            }
        }
        SetExpr::Op(ExprOp::Range, items) => match items.as_slice() {
            [SetExpr::Item(low), SetExpr::Item(high)] => {
                let (low, high) = (category_order(db, *low)?, category_order(db, *high)?);
                if low > high {
                    return Err("Invalid category range".to_string());
                }
                Ok((low..=high).collect())
            }
            _ => Err("Invalid category range".to_string()),
        },
        SetExpr::List(items) => items.iter().try_fold(Ebitmap::new(), |acc, item| {
            Ok(acc.or(&category_bits_in(db, item, universe)?))
        }),
        SetExpr::Op(op, items) => {
            let operands = items
                .iter()
                .map(|item| category_bits_in(db, item, universe))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(apply(*op, &operands, universe))
        }
    }
}

fn evaluate_categories(logger: &Logger, sources: &SourceMap, db: &mut Db) -> Result<()> {
    let mut errors = Vec::new();

    let sets: Vec<Id> = db
        .categories
        .iter()
        .filter(|(_, c)| c.kind == CatKind::Set)
        .map(|(id, _)| id)
        .collect();
    for id in sets {
        let Some(expr) = db.categories[id].expr.clone() else {
            continue;
        };
        match category_bits(db, &expr) {
            Ok(members) => db.categories[id].members = Some(members),
            Err(message) => errors.push(CilError::semantic(message, sources.locate(db.categories[id].node))),
        }
    }

    for id in 0..db.sensitivities.len() {
        let exprs = db.sensitivities[id].cat_exprs.clone();
        for expr in &exprs {
            match category_bits(db, expr) {
                Ok(cats) => db.sensitivities[id].cats.union_with(&cats),
                Err(message) => errors.push(CilError::semantic(message, sources.locate(db.sensitivities[id].node))),
            }
        }
    }

    report_all(logger, errors)
}

/// A level with its category set evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalLevel {
    pub sens: Id,
    /// Bits are category order positions.
    pub cats: Ebitmap,
}

pub fn eval_level(db: &Db, level: &LevelRef) -> std::result::Result<EvalLevel, String> {
    let spec = db.level_spec(level).ok_or_else(|| "Invalid level".to_string())?;
    let cats = match &spec.cats {
        Some(expr) => category_bits(db, expr)?,
        None => Ebitmap::new(),
    };
    Ok(EvalLevel { sens: spec.sens, cats })
}

pub fn eval_range(db: &Db, range: &RangeRef) -> std::result::Result<(EvalLevel, EvalLevel), String> {
    let spec = db.range_spec(range).ok_or_else(|| "Invalid level range".to_string())?;
    Ok((eval_level(db, &spec.low)?, eval_level(db, &spec.high)?))
}

// ============================================================================
// Labeling order
// ============================================================================

fn same_context(db: &Db, a: &ContextRef, b: &ContextRef) -> bool {
    db.context_spec(a) == db.context_spec(b)
}

/// Sorts `items`, drops duplicates and records conflicting ones.
fn dedupe<T>(
    sources: &SourceMap,
    items: &mut Vec<T>,
    keyword: &str,
    multiple_decls: bool,
    errors: &mut Vec<CilError>,
    cmp: impl Fn(&T, &T) -> Ordering,
    same: impl Fn(&T, &T) -> bool,
    node: impl Fn(&T) -> NodeId,
) {
    items.sort_by(&cmp);
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if let Some(last) = kept.last() {
            if cmp(last, &item) == Ordering::Equal {
                if !multiple_decls || !same(last, &item) {
                    errors.push(CilError::semantic(
                        format!("Found conflicting {keyword} rules"),
                        sources.locate(node(&item)),
                    ));
                }
                continue;
            }
        }
        kept.push(item);
    }
    *items = kept;
}

fn sort_labeling(logger: &Logger, sources: &SourceMap, db: &mut Db, options: PostOptions) -> Result<()> {
    let mut labeling = std::mem::take(&mut db.labeling);
    let multiple = options.multiple_decls;
    let mut errors = Vec::new();
    let db_ref: &Db = db;
    let ctx = |a: &ContextRef, b: &ContextRef| same_context(db_ref, a, b);

    dedupe(
        sources,
        &mut labeling.filecons,
        "filecon",
        multiple,
        &mut errors,
        compare_filecons,
        |a, b| match (&a.context, &b.context) {
            (Some(a), Some(b)) => ctx(a, b),
            (None, None) => true,
            _ => false,
        },
        |f| f.node,
    );
    dedupe(
        sources,
        &mut labeling.fsuses,
        "fsuse",
        multiple,
        &mut errors,
        |a, b| (a.behavior.number(), &a.fs).cmp(&(b.behavior.number(), &b.fs)),
        |a, b| ctx(&a.context, &b.context),
        |f| f.node,
    );
    dedupe(
        sources,
        &mut labeling.genfscons,
        "genfscon",
        multiple,
        &mut errors,
        |a, b| (&a.fs, &a.path).cmp(&(&b.fs, &b.path)),
        |a, b| ctx(&a.context, &b.context),
        |g| g.node,
    );
    dedupe(
        sources,
        &mut labeling.portcons,
        "portcon",
        multiple,
        &mut errors,
        |a, b| {
            (a.high.saturating_sub(a.low), a.low, a.protocol.number()).cmp(&(b.high.saturating_sub(b.low), b.low, b.protocol.number()))
        },
        |a, b| ctx(&a.context, &b.context),
        |p| p.node,
    );
    dedupe(
        sources,
        &mut labeling.nodecons,
        "nodecon",
        multiple,
        &mut errors,
        |a, b| {
            (a.addr.is_ipv6(), Reverse(a.mask), a.addr).cmp(&(b.addr.is_ipv6(), Reverse(b.mask), b.addr))
        },
        |a, b| ctx(&a.context, &b.context),
        |n| n.node,
    );
    dedupe(
        sources,
        &mut labeling.netifcons,
        "netifcon",
        multiple,
        &mut errors,
        |a, b| a.name.cmp(&b.name),
        |a, b| ctx(&a.if_context, &b.if_context) && ctx(&a.packet_context, &b.packet_context),
        |n| n.node,
    );
    dedupe(
        sources,
        &mut labeling.ibpkeycons,
        "ibpkeycon",
        multiple,
        &mut errors,
        |a, b| (a.prefix, a.high.saturating_sub(a.low), a.low).cmp(&(b.prefix, b.high.saturating_sub(b.low), b.low)),
        |a, b| ctx(&a.context, &b.context),
        |i| i.node,
    );
    dedupe(
        sources,
        &mut labeling.ibendportcons,
        "ibendportcon",
        multiple,
        &mut errors,
        |a, b| (&a.dev_name, a.port).cmp(&(&b.dev_name, b.port)),
        |a, b| ctx(&a.context, &b.context),
        |i| i.node,
    );
    dedupe(
        sources,
        &mut labeling.pirqcons,
        "pirqcon",
        multiple,
        &mut errors,
        |a, b| a.pirq.cmp(&b.pirq),
        |a, b| ctx(&a.context, &b.context),
        |p| p.node,
    );
    dedupe(
        sources,
        &mut labeling.iomemcons,
        "iomemcon",
        multiple,
        &mut errors,
        |a, b| (a.high.saturating_sub(a.low), a.low).cmp(&(b.high.saturating_sub(b.low), b.low)),
        |a, b| ctx(&a.context, &b.context),
        |i| i.node,
    );
    dedupe(
        sources,
        &mut labeling.ioportcons,
        "ioportcon",
        multiple,
        &mut errors,
        |a, b| (a.high.saturating_sub(a.low), a.low).cmp(&(b.high.saturating_sub(b.low), b.low)),
        |a, b| ctx(&a.context, &b.context),
        |i| i.node,
    );
    dedupe(
        sources,
        &mut labeling.pcidevicecons,
        "pcidevicecon",
        multiple,
        &mut errors,
        |a, b| a.device.cmp(&b.device),
        |a, b| ctx(&a.context, &b.context),
        |p| p.node,
    );
    dedupe(
        sources,
        &mut labeling.devicetreecons,
        "devicetreecon",
        multiple,
        &mut errors,
        |a, b| a.path.cmp(&b.path),
        |a, b| ctx(&a.context, &b.context),
        |d| d.node,
    );

    db.labeling = labeling;
    report_all(logger, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, build};
    use crate::order::order_policy;
    use crate::parser::{ParseTree, parse};
    use crate::resolve::{ResolveOptions, resolve};

    fn evaluate_src(src: &str, options: PostOptions) -> Result<Db> {
        let logger = Logger::default();
        let mut tree = ParseTree::new();
        parse(&logger, "test.cil", src, &mut tree)?;
        let stmts = build(&logger, &tree, BuildOptions::default())?;
        let mut db = resolve(
            &logger,
            tree.sources(),
            &stmts,
            ResolveOptions {
                multiple_decls: options.multiple_decls,
            },
        )?;
        order_policy(&logger, tree.sources(), &mut db)?;
        evaluate(&logger, tree.sources(), &mut db, options)?;
        Ok(db)
    }

    fn ids(bits: &Ebitmap) -> Vec<u32> {
        bits.iter().collect()
    }

    #[test]
    fn type_attributes_evaluate_nested_expressions() {
        let db = evaluate_src(
            "(type a) (type b) (type c) \
             (typeattribute inner) (typeattributeset inner (a b)) \
             (typeattribute outer) (typeattributeset outer (and (all) (not inner)))",
            PostOptions::default(),
        )
        .unwrap();
        let outer = db.types.lookup("outer").unwrap();
        let c = db.types.lookup("c").unwrap() as u32;
        assert_eq!(ids(db.types[outer].members.as_ref().unwrap()), vec![c]);
    }

    #[test]
    fn roletype_on_role_attribute_reaches_members() {
        let db = evaluate_src(
            "(type t) (role r1) (role r2) (roleattribute ra) (roleattributeset ra (r1 r2)) (roletype ra t)",
            PostOptions::default(),
        )
        .unwrap();
        let t = db.types.lookup("t").unwrap() as u32;
        for name in ["r1", "r2"] {
            let role = db.roles.lookup(name).unwrap();
            assert!(db.roles[role].types.get_bit(t), "{name}");
        }
    }

    #[test]
    fn category_sets_use_order_positions() {
        let db = evaluate_src(
            "(category c0) (category c1) (category c2) (category c3) \
             (categoryorder (c0 c1 c2 c3)) \
             (categoryset lowcats (range c0 c2)) \
             (categoryset rest (not lowcats))",
            PostOptions::default(),
        )
        .unwrap();
        let low = db.categories.lookup("lowcats").unwrap();
        let rest = db.categories.lookup("rest").unwrap();
        assert_eq!(ids(db.categories[low].members.as_ref().unwrap()), vec![0, 1, 2]);
        assert_eq!(ids(db.categories[rest].members.as_ref().unwrap()), vec![3]);
    }

    #[test]
    fn backwards_category_range_is_rejected() {
        let err = evaluate_src(
            "(category c0) (category c1) (categoryorder (c0 c1)) (categoryset bad (range c1 c0))",
            PostOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid category range at test.cil:1");
    }

    #[test]
    fn attribute_kept_follows_usage() {
        let mut decl = TypeDecl::new("a", NodeId::from_index(0), TypeKind::Attribute);
        assert!(!attribute_kept(&decl, false));
        decl.used.neverallow = true;
        assert!(attribute_kept(&decl, true));
        decl.used = crate::db::AttrUse {
            avrule: true,
            neverallow: false,
        };
        decl.members = Some([1, 2].into_iter().collect());
        assert!(attribute_kept(&decl, false));
        assert!(!attribute_kept(&decl, true));
        decl.members = Some(Ebitmap::new());
        assert!(!attribute_kept(&decl, false));
    }

    const LABELED: &str = "(user u) (role r) (type t) (type t2) \
        (context c1 (u r t ((s0) (s0)))) (context c2 (u r t2 ((s0) (s0)))) \
        (sensitivity s0) (sensitivityorder (s0)) ";

    #[test]
    fn ports_sort_by_range_size_then_low() {
        let src = format!(
            "{LABELED} (portcon tcp (1 1023) c1) (portcon tcp 80 c1) (portcon udp 53 c1) (portcon tcp 22 c1)"
        );
        let db = evaluate_src(&src, PostOptions::default()).unwrap();
        let order: Vec<(u32, u32)> = db.labeling.portcons.iter().map(|p| (p.low, p.high)).collect();
        assert_eq!(order, vec![(22, 22), (53, 53), (80, 80), (1, 1023)]);
    }

    #[test]
    fn duplicate_labeling_conflicts_unless_merged() {
        let src = format!("{LABELED} (genfscon proc / c1)\n(genfscon proc / c1)");
        let err = evaluate_src(&src, PostOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "Found conflicting genfscon rules at test.cil:2");

        let db = evaluate_src(&src, PostOptions { multiple_decls: true }).unwrap();
        assert_eq!(db.labeling.genfscons.len(), 1);

        let differing = format!("{LABELED} (genfscon proc / c1)\n(genfscon proc / c2)");
        assert!(evaluate_src(&differing, PostOptions { multiple_decls: true }).is_err());
    }

    #[test]
    fn nodecons_put_ipv4_first_and_longest_mask_first() {
        let src = format!(
            "{LABELED} (nodecon (::1) (ffff::) c1) (nodecon (10.0.0.0) (255.0.0.0) c1) \
             (nodecon (10.1.0.0) (255.255.0.0) c1)"
        );
        let db = evaluate_src(&src, PostOptions::default()).unwrap();
        let addrs: Vec<String> = db.labeling.nodecons.iter().map(|n| n.addr.to_string()).collect();
        assert_eq!(addrs, vec!["10.1.0.0", "10.0.0.0", "::1"]);
    }
}
