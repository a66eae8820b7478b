//! Semantic verification.
//!
//! [`pre_verify`] runs before sets are evaluated and rejects anything that
//! would make evaluation loop: circular bounds, self-referencing
//! attributes and class permissions that expand into themselves.
//! [`verify`] runs on the evaluated database and checks what the kernel
//! relies on: level ranges, contexts and global statements.

use std::collections::HashSet;

use sepol_types::{HandleUnknown, PolicyCapability};
use tracing::debug;

use crate::ast::{AvRuleKind, BranchKind};
use crate::db::{
    CatKind, ClassPermsRef, ContextRef, ContextSpec, Db, Id, LevelRef, PermissionXRef, RangeRef, Rule, SetExpr, TypeKind,
};
use crate::error::{CilError, Result, report_all};
use crate::log::Logger;
use crate::parser::SourceMap;
use crate::post::{EvalLevel, eval_level, eval_range, perm_bits};
use crate::tree::NodeId;

// ============================================================================
// Cycle detection
// ============================================================================

/// Follows `next` from `start` and reports whether the chain loops.
///
/// The slow pointer jumps to the fast one whenever the step limit is
/// reached and the limit doubles, so long chains cost linear time and
/// short loops are caught quickly.
pub fn bounds_cycle(start: Id, next: impl Fn(Id) -> Option<Id>) -> bool {
    let mut slow = start;
    let mut fast = next(start);
    let mut steps = 0u64;
    let mut limit = 2u64;
    while let Some(current) = fast {
        if current == slow {
            return true;
        }
        steps += 1;
        if steps == limit {
            slow = current;
            steps = 0;
            limit *= 2;
        }
        fast = next(current);
    }
    false
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    Active,
    Done,
}

/// Depth-first search for a group that contains itself. Returns the group
/// found on its own ancestor stack.
fn self_reference(count: usize, children: impl Fn(Id) -> Vec<Id>) -> Option<Id> {
    fn walk(id: Id, children: &dyn Fn(Id) -> Vec<Id>, state: &mut [Visit]) -> Option<Id> {
        state[id] = Visit::Active;
        for child in children(id) {
            match state[child] {
                Visit::Active => return Some(child),
                Visit::Unseen => {
                    if let Some(found) = walk(child, children, state) {
                        return Some(found);
                    }
                }
                Visit::Done => {}
            }
        }
        state[id] = Visit::Done;
        None
    }

    let mut state = vec![Visit::Unseen; count];
    (0..count).find_map(|id| {
        if state[id] == Visit::Unseen {
            walk(id, &children, &mut state)
        } else {
            None
        }
    })
}

fn group_items(exprs: &[(NodeId, SetExpr)], is_group: impl Fn(Id) -> bool) -> Vec<Id> {
    exprs
        .iter()
        .flat_map(|(_, expr)| expr.items())
        .filter(|&id| is_group(id))
        .collect()
}

/// A node of the class permission graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PermNode {
    Set(Id),
    Map { class: Id, perm: Id },
}

fn perm_targets(db: &Db, refs: &[ClassPermsRef]) -> Vec<PermNode> {
    let mut out = Vec::new();
    for r in refs {
        match r {
            ClassPermsRef::Set(id) => out.push(PermNode::Set(*id)),
            ClassPermsRef::Perms { class, perms } if db.classes[*class].is_map => {
                out.extend(perm_bits(db, *class, perms).iter().map(|perm| PermNode::Map {
                    class: *class,
                    perm: perm as Id,
                }));
            }
            ClassPermsRef::Perms { .. } => {}
        }
    }
    out
}

fn perm_refs(db: &Db, node: PermNode) -> &[ClassPermsRef] {
    match node {
        PermNode::Set(id) => &db.classpermissions[id].sets,
        PermNode::Map { class, perm } => &db.classes[class].perms[perm].mappings,
    }
}

fn circular_perms(db: &Db, node: PermNode, stack: &mut Vec<PermNode>, done: &mut HashSet<PermNode>) -> Option<PermNode> {
    stack.push(node);
    for target in perm_targets(db, perm_refs(db, node)) {
        if stack.contains(&target) {
            return Some(target);
        }
        if done.contains(&target) {
            continue;
        }
        if let Some(found) = circular_perms(db, target, stack, done) {
            return Some(found);
        }
    }
    stack.pop();
    done.insert(node);
    None
}

// ============================================================================
// Pre-pass
// ============================================================================

/// Checks run before set evaluation.
pub fn pre_verify(logger: &Logger, sources: &SourceMap, db: &Db) -> Result<()> {
    let mut errors = Vec::new();
    let mut fail = |message: String, node: NodeId| errors.push(CilError::semantic(message, sources.locate(node)));

    for (id, user) in db.users.iter().filter(|(_, u)| !u.is_attribute) {
        if user.level.is_none() {
            fail(format!("User {} does not have a default level", user.name), user.node);
        }
        if user.range.is_none() {
            fail(format!("User {} does not have a level range", user.name), user.node);
        }
        if bounds_cycle(id, |u| db.users[u].bounds) {
            fail(format!("Circular bounds found for user {}", user.name), user.node);
        }
    }

    for (_, class) in db.classes.iter().filter(|(_, c)| c.is_map) {
        for (_, perm) in class.perms.iter().filter(|(_, p)| p.mappings.is_empty()) {
            fail(
                format!("Map class {} does not have a classmapping for {}", class.name, perm.name),
                class.node,
            );
        }
    }

    for (_, set) in db.classpermissions.iter().filter(|(_, s)| s.sets.is_empty()) {
        fail(format!("Classpermission {} does not have a classpermissionset", set.name), set.node);
    }

    let mut done = HashSet::new();
    let starts = db
        .classpermissions
        .iter()
        .map(|(id, _)| PermNode::Set(id))
        .chain(db.classes.iter().filter(|(_, c)| c.is_map).flat_map(|(class, c)| {
            c.perms.iter().map(move |(perm, _)| PermNode::Map { class, perm })
        }));
    for start in starts {
        if done.contains(&start) {
            continue;
        }
        let Some(found) = circular_perms(db, start, &mut Vec::new(), &mut done) else {
            continue;
        };
        match found {
            PermNode::Set(id) => fail(
                format!(
                    "Found circular class permissions involving the set {}",
                    db.classpermissions[id].name
                ),
                db.classpermissions[id].node,
            ),
            PermNode::Map { class, perm } => fail(
                format!(
                    "Found circular class permissions involving the map class {} and permission {}",
                    db.classes[class].name, db.classes[class].perms[perm].name
                ),
                db.classes[class].node,
            ),
        }
        break;
    }

    if let Some(id) = self_reference(db.types.len(), |id| {
        group_items(&db.types[id].exprs, |t| db.types[t].kind == TypeKind::Attribute)
    }) {
        fail(format!("Self-reference found for {}", db.types[id].name), db.types[id].node);
    }
    if let Some(id) = self_reference(db.roles.len(), |id| {
        group_items(&db.roles[id].exprs, |r| db.roles[r].is_attribute)
    }) {
        fail(format!("Self-reference found for {}", db.roles[id].name), db.roles[id].node);
    }
    if let Some(id) = self_reference(db.users.len(), |id| {
        group_items(&db.users[id].exprs, |u| db.users[u].is_attribute)
    }) {
        fail(format!("Self-reference found for {}", db.users[id].name), db.users[id].node);
    }
    if let Some(id) = self_reference(db.categories.len(), |id| {
        db.categories[id]
            .expr
            .iter()
            .flat_map(SetExpr::items)
            .filter(|&c| db.categories[c].kind == CatKind::Set)
            .collect()
    }) {
        fail(
            format!("Self-reference found for {}", db.categories[id].name),
            db.categories[id].node,
        );
    }

    report_all(logger, errors)
}

// ============================================================================
// Levels and contexts
// ============================================================================

fn sens_order(db: &Db, sens: Id) -> u32 {
    db.sensitivities[sens].order.unwrap_or(u32::MAX)
}

fn category_name(db: &Db, bit: u32) -> &str {
    db.orders
        .categories
        .get(bit as usize)
        .map_or("", |&id| db.categories[id].name.as_str())
}

/// Every category of `level` must be usable with its sensitivity.
pub fn check_level(db: &Db, level: &EvalLevel) -> std::result::Result<(), String> {
    if level.cats.is_empty() {
        return Ok(());
    }
    let sens = &db.sensitivities[level.sens];
    if sens.cats.is_empty() {
        return Err(format!("No categories can be used with sensitivity {}", sens.name));
    }
    match level.cats.iter().find(|&cat| !sens.cats.get_bit(cat)) {
        Some(cat) => Err(format!(
            "Category {} cannot be used with sensitivity {}",
            category_name(db, cat),
            sens.name
        )),
        None => Ok(()),
    }
}

/// `high` must dominate `low` and both levels must be valid.
pub fn check_range(db: &Db, low: &EvalLevel, high: &EvalLevel) -> std::result::Result<(), String> {
    if sens_order(db, low.sens) > sens_order(db, high.sens) {
        return Err(format!(
            "Sensitivity {} does not dominate {}",
            db.sensitivities[high.sens].name, db.sensitivities[low.sens].name
        ));
    }
    if !high.cats.contains(&low.cats) {
        return Err("Low level category set must be a subset of the high level category set".to_string());
    }
    check_level(db, low)?;
    check_level(db, high)
}

fn check_range_ref(db: &Db, range: &RangeRef) -> std::result::Result<(), String> {
    let (low, high) = eval_range(db, range)?;
    check_range(db, &low, &high)
}

/// A context is valid when its user may take its role, its role may take
/// its type and its range lies inside the user's range.
pub fn check_context(db: &Db, spec: &ContextSpec) -> std::result::Result<(), String> {
    let user = &db.users[spec.user];
    let role = &db.roles[spec.role];
    let type_name = &db.types[spec.type_].name;

    if user.roles.is_empty() {
        return Err(format!("No roles given to the user {}", user.name));
    }
    if !user.roles.get_bit(spec.role as u32) {
        return Err(format!("Role {} is invalid for user {}", role.name, user.name));
    }
    if role.types.is_empty() {
        return Err(format!("No types associated with role {}", role.name));
    }
    if !role.types.get_bit(spec.type_ as u32) {
        return Err(format!("Type {} is invalid for role {}", type_name, role.name));
    }

    if matches!(spec.range, RangeRef::Anon(_)) {
        check_range_ref(db, &spec.range)?;
    }
    if let Some(user_range) = &user.range {
        let (user_low, user_high) = eval_range(db, user_range)?;
        let (low, high) = eval_range(db, &spec.range)?;
        let within = sens_order(db, user_low.sens) <= sens_order(db, low.sens)
            && sens_order(db, high.sens) <= sens_order(db, user_high.sens);
        if !within {
            let name = match &spec.range {
                RangeRef::Named(id) => db.levelranges[*id].name.clone(),
                RangeRef::Anon(_) => "<anonymous>".to_string(),
            };
            return Err(format!("Range {} is invalid for user {}", name, user.name));
        }
    }
    Ok(())
}

fn check_context_ref(db: &Db, context: &ContextRef) -> std::result::Result<(), String> {
    let spec = db.context_spec(context).ok_or_else(|| "Invalid context".to_string())?;
    check_context(db, spec)
}

// ============================================================================
// Passes
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Overrides any `mls` statement.
    pub mls: Option<bool>,
    /// Overrides any `handleunknown` statement.
    pub handle_unknown: Option<HandleUnknown>,
}

/// Global settings of the compiled policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySettings {
    pub mls: bool,
    pub handle_unknown: HandleUnknown,
}

/// Verifies the evaluated database and settles the global settings.
pub fn verify(logger: &Logger, sources: &SourceMap, db: &Db, options: VerifyOptions) -> Result<PolicySettings> {
    let mut errors = Vec::new();
    declarations(sources, db, &mut errors);
    report_all(logger, std::mem::take(&mut errors))?;
    contexts(sources, db, &mut errors);
    report_all(logger, errors)?;

    if db.avrule_count() == 0 {
        return Err(CilError::policy("Policy must include at least one avrule"));
    }
    if db.sids.is_empty() {
        return Err(CilError::policy("At least one initial sid must be defined in the policy"));
    }
    for (_, sid) in db.sids.iter().filter(|(_, s)| s.context.is_none()) {
        logger.info(format!(
            "No context assigned to SID {}, omitting from policy{}",
            sid.name,
            sources.locate(sid.node)
        ));
    }

    let settings = PolicySettings {
        mls: options
            .mls
            .or_else(|| db.mls.first().map(|&(_, mls)| mls))
            .unwrap_or(false),
        handle_unknown: options
            .handle_unknown
            .or_else(|| db.handle_unknown.first().map(|&(_, h)| h))
            .unwrap_or(HandleUnknown::Deny),
    };
    debug!(mls = settings.mls, handle_unknown = %settings.handle_unknown, "verified policy");
    Ok(settings)
}

/// Per-declaration checks.
fn declarations(sources: &SourceMap, db: &Db, errors: &mut Vec<CilError>) {
    let mut fail = |message: String, node: NodeId| errors.push(CilError::semantic(message, sources.locate(node)));

    for (_, user) in db.users.iter() {
        if let Some(range @ RangeRef::Anon(_)) = &user.range {
            if let Err(message) = check_range_ref(db, range) {
                fail(message, user.node);
            }
        }
        if let Some(level) = &user.level {
            if let Err(message) = eval_level(db, level).and_then(|l| check_level(db, &l)) {
                fail(message, user.node);
            }
        }
    }
    for (id, role) in db.roles.iter() {
        if bounds_cycle(id, |r| db.roles[r].bounds) {
            fail(format!("Circular bounds found for role {}", role.name), role.node);
        }
    }
    for (id, t) in db.types.iter() {
        if bounds_cycle(id, |t| db.types[t].bounds) {
            fail(format!("Circular bounds found for type {}", t.name), t.node);
        }
    }

    if let Some(&(node, _)) = db.handle_unknown.get(1) {
        fail("Policy can not have more than one handleunknown".to_string(), node);
    }
    if let Some(&(node, _)) = db.mls.get(1) {
        fail("Policy can not have more than one mls".to_string(), node);
    }

    for cond in &db.conditionals {
        let (mut trues, mut falses) = (0, 0);
        for block in &cond.blocks {
            match &block.kind {
                BranchKind::True => trues += 1,
                BranchKind::False => falses += 1,
                BranchKind::Other(_) => fail("Expected true or false block in conditional".to_string(), block.node),
            }
            for rule in &block.rules {
                if let Rule::Av {
                    kind: AvRuleKind::NeverAllow,
                    node,
                    ..
                } = rule
                {
                    fail("Neverallow found in booleanif block".to_string(), *node);
                }
            }
        }
        if trues > 1 {
            fail("More than one true block in conditional".to_string(), cond.node);
        }
        if falses > 1 {
            fail("More than one false block in conditional".to_string(), cond.node);
        }
    }

    for (_, named) in db.levels.iter() {
        let Some(spec) = &named.value else { continue };
        let level = LevelRef::Anon(spec.clone());
        if let Err(message) = eval_level(db, &level).and_then(|l| check_level(db, &l)) {
            fail(message, named.node);
        }
    }
    for (id, named) in db.levelranges.iter() {
        if let Err(message) = check_range_ref(db, &RangeRef::Named(id)) {
            fail(format!("Invalid named range: {message}"), named.node);
        }
    }
    for rule in &db.rules {
        if let Rule::RangeTransition {
            node,
            range: range @ RangeRef::Anon(_),
            ..
        } = rule
        {
            if let Err(message) = check_range_ref(db, range) {
                fail(message, *node);
            }
        }
    }

    for (_, class) in db.classes.iter() {
        let Some(common) = class.common else { continue };
        let common = &db.commons[common];
        if class.perms.iter().any(|(_, p)| common.perms.lookup(&p.name).is_some()) {
            fail(
                format!(
                    "Duplicate permissions between {} common and class declarations",
                    common.name
                ),
                class.node,
            );
        }
    }

    for (node, name) in &db.policycaps {
        if PolicyCapability::from_name(name).is_none() {
            fail(format!("Invalid policycap ({name})"), *node);
        }
    }
}

/// Context and extended permission checks.
fn contexts(sources: &SourceMap, db: &Db, errors: &mut Vec<CilError>) {
    let mut fail = |message: String, node: NodeId| errors.push(CilError::semantic(message, sources.locate(node)));

    for (_, named) in db.contexts.iter() {
        let Some(spec) = &named.value else { continue };
        if let Err(message) = check_context(db, spec) {
            fail(message, named.node);
        }
    }

    let labeling = &db.labeling;
    let anonymous = labeling
        .filecons
        .iter()
        .filter_map(|f| f.context.as_ref().map(|c| (f.node, c)))
        .chain(labeling.fsuses.iter().map(|f| (f.node, &f.context)))
        .chain(labeling.genfscons.iter().map(|g| (g.node, &g.context)))
        .chain(labeling.portcons.iter().map(|p| (p.node, &p.context)))
        .chain(labeling.nodecons.iter().map(|n| (n.node, &n.context)))
        .chain(labeling.netifcons.iter().map(|n| (n.node, &n.if_context)))
        .chain(labeling.netifcons.iter().map(|n| (n.node, &n.packet_context)))
        .chain(labeling.ibpkeycons.iter().map(|i| (i.node, &i.context)))
        .chain(labeling.ibendportcons.iter().map(|i| (i.node, &i.context)))
        .chain(labeling.pirqcons.iter().map(|p| (p.node, &p.context)))
        .chain(labeling.iomemcons.iter().map(|i| (i.node, &i.context)))
        .chain(labeling.ioportcons.iter().map(|i| (i.node, &i.context)))
        .chain(labeling.pcidevicecons.iter().map(|p| (p.node, &p.context)))
        .chain(labeling.devicetreecons.iter().map(|d| (d.node, &d.context)))
        .filter(|(_, context)| context.is_anonymous());
    for (node, context) in anonymous {
        if let Err(message) = check_context_ref(db, context) {
            fail(message, node);
        }
    }

    let ioctl = |class: Id| db.lookup_perm(class, "ioctl").is_some();
    for (_, named) in db.permissionxs.iter() {
        if let Some(spec) = &named.value {
            if !ioctl(spec.class) {
                fail(
                    format!(
                        "Invalid permissionx: ioctl is not a permission of class {}",
                        db.classes[spec.class].name
                    ),
                    named.node,
                );
            }
        }
    }
    for rule in &db.rules {
        if let Rule::AvX {
            node,
            perms: PermissionXRef::Anon(spec),
            ..
        } = rule
        {
            if !ioctl(spec.class) {
                fail(
                    format!(
                        "Invalid permissionx: ioctl is not a permission of class {}",
                        db.classes[spec.class].name
                    ),
                    *node,
                );
            }
        }
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

    const BASE: &str = "\
(class file (read write ioctl))
(classorder (file))
(sid kernel)
(sidorder (kernel))
(sensitivity s0) (sensitivity s1) (sensitivity s2)
(sensitivityorder (s0 s1 s2))
(category c0) (category c1)
(categoryorder (c0 c1))
(sensitivitycategory s0 (c0 c1))
(sensitivitycategory s1 (c0 c1))
(sensitivitycategory s2 (c0 c1))
(user u) (role r) (type t)
(userrole u r) (roletype r t)
(userlevel u (s0))
(userrange u ((s0) (s2 (c0 c1))))
(sidcontext kernel (u r t ((s0) (s0))))
(allow t t (file (read)))
";

    fn verify_src(extra: &str) -> Result<PolicySettings> {
        let logger = Logger::default();
        let mut tree = ParseTree::new();
        let src = format!("{BASE}{extra}");
        parse(&logger, "test.cil", &src, &mut tree)?;
        let stmts = build(&logger, &tree, BuildOptions::default())?;
        let mut db = resolve(&logger, tree.sources(), &stmts, ResolveOptions::default())?;
        order_policy(&logger, tree.sources(), &mut db)?;
        pre_verify(&logger, tree.sources(), &db)?;
        evaluate(&logger, tree.sources(), &mut db, PostOptions::default())?;
        verify(&logger, tree.sources(), &db, VerifyOptions::default())
    }

    fn chain(len: usize, looped: bool) -> impl Fn(Id) -> Option<Id> {
        move |id| match id + 1 {
            next if next < len => Some(next),
            _ if looped => Some(0),
            _ => None,
        }
    }

    #[test]
    fn bounds_cycles_are_found() {
        assert!(bounds_cycle(0, chain(3, true)));
        assert!(bounds_cycle(0, |id| Some(id)));
        assert!(bounds_cycle(0, chain(1000, true)));
        assert!(!bounds_cycle(0, chain(1000, false)));
        assert!(!bounds_cycle(0, |_| None));
    }

    #[test]
    fn minimal_policy_verifies_with_defaults() {
        let settings = verify_src("").unwrap();
        assert_eq!(
            settings,
            PolicySettings {
                mls: false,
                handle_unknown: HandleUnknown::Deny
            }
        );
        assert!(verify_src("(mls true) (handleunknown allow)").unwrap().mls);
    }

    #[test]
    fn circular_type_bounds_are_rejected() {
        let err = verify_src("(type t1) (type t2) (type t3) (typebounds t1 t2) (typebounds t2 t3) (typebounds t3 t1)")
            .unwrap_err();
        assert!(err.to_string().starts_with("Circular bounds found for type"), "{err}");
    }

    #[test]
    fn user_without_level_is_rejected() {
        let err = verify_src("(user nolevel)").unwrap_err();
        assert!(err.to_string().starts_with("User nolevel does not have a default level"), "{err}");
    }

    #[test]
    fn self_referencing_attribute_is_rejected() {
        let err = verify_src(
            "(typeattribute a1) (typeattribute a2) (typeattributeset a1 (a2 t)) (typeattributeset a2 (a1))",
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Self-reference found for"), "{err}");
    }

    #[test]
    fn circular_class_permissions_are_rejected() {
        let err = verify_src(
            "(classmap cmap (p1)) (classpermission cp) \
             (classpermissionset cp (cmap (p1))) (classmapping cmap p1 cp)",
        )
        .unwrap_err();
        assert!(
            err.to_string().starts_with("Found circular class permissions involving the set"),
            "{err}"
        );
    }

    #[test]
    fn backwards_level_range_is_rejected() {
        let err = verify_src("(levelrange bad ((s2) (s0)))").unwrap_err();
        assert!(err.to_string().contains("Sensitivity s0 does not dominate s2"), "{err}");
    }

    #[test]
    fn non_subset_categories_are_rejected() {
        let err = verify_src("(levelrange bad ((s0 (c0 c1)) (s2 (c0))))").unwrap_err();
        assert!(
            err.to_string()
                .contains("Low level category set must be a subset of the high level category set"),
            "{err}"
        );
    }

    #[test]
    fn equal_levels_are_accepted() {
        verify_src("(levelrange same ((s1 (c0)) (s1 (c0))))").unwrap();
    }

    #[test]
    fn context_role_must_belong_to_user() {
        let err = verify_src("(role other) (roletype other t) (context bad (u other t ((s0) (s0))))").unwrap_err();
        assert!(err.to_string().starts_with("Role other is invalid for user u"), "{err}");
    }

    #[test]
    fn context_range_must_lie_inside_user_range() {
        let err = verify_src(
            "(user v) (userrole v r) (userlevel v (s0)) (userrange v ((s0) (s1))) \
             (context bad (v r t ((s0) (s2))))",
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Range <anonymous> is invalid for user v"), "{err}");
    }

    #[test]
    fn neverallow_in_booleanif_is_rejected() {
        let err = verify_src("(boolean b true) (booleanif b (true (neverallow t t (file (write)))))").unwrap_err();
        assert!(err.to_string().starts_with("Neverallow found in booleanif block"), "{err}");
    }

    #[test]
    fn unknown_policycap_is_rejected() {
        let err = verify_src("(policycap no_such_capability)").unwrap_err();
        assert!(err.to_string().starts_with("Invalid policycap (no_such_capability)"), "{err}");
    }

    #[test]
    fn permissionx_needs_ioctl_permission() {
        let err = verify_src("(class dir (search)) (classorder (file dir)) (allowx t t (ioctl dir (0x10)))")
            .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Invalid permissionx: ioctl is not a permission of class dir"),
            "{err}"
        );
    }
}
