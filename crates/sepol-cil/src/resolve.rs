//! Name resolution.
//!
//! Resolution turns built statements into a [`Db`] in three sweeps:
//! 1. every declaration enters its namespace
//! 2. aliases and class commons are bound, since later lookups go through them
//! 3. every remaining statement is resolved into records of the database
//!
//! Aliases are followed at every reference, so nothing past this point
//! sees an alias id. Type attributes referenced by access rules are marked
//! as used; the binary encoder decides from those marks which attributes
//! are kept.

use std::net::{IpAddr, Ipv6Addr};

use sepol_policydb::Ebitmap;
use tracing::debug;

use crate::ast::{
    self, AvRuleKind, ClassPerms, ContextArg, DefaultKind, Expr, ExprOp, IpArg, LevelArg, PermissionXArg, RangeArg,
    Stmt, StmtKind,
};
use crate::db::{
    BoolDecl, CatDecl, CatKind, ClassDecl, ClassPermissionDecl, ClassPermsRef, CommonDecl, CondBlock, Conditional,
    ContextRef, ContextSpec, Db, DeviceTreeCon, FileCon, FsUse, GenfsCon, IbEndportCon, IbPkeyCon, Id, IomemCon,
    IoportCon, LevelRef, LevelSpec, Named, Namespace, NetifCon, NodeCon, PciDeviceCon, PermDecl, PermissionXRef,
    PermissionXSpec, PirqCon, PortCon, RangeRef, RangeSpec, RoleDecl, Rule, SensDecl, SetExpr, SidDecl, Target,
    TypeDecl, TypeKind, UserDecl,
};
use crate::error::{CilError, Location, Result};
use crate::log::Logger;
use crate::order::OrderedList;
use crate::parser::SourceMap;
use crate::tree::NodeId;

/// Most permissions a kernel class may carry, common ones included.
pub const PERMS_PER_CLASS: usize = 32;

/// Upper bound (exclusive) of an extended permission number.
pub const PERMX_LIMIT: u32 = 0x10000;

/// Options that change how declarations are resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Allow a type or type attribute to be declared more than once.
    pub multiple_decls: bool,
}

/// Resolves `stmts` into a semantic database.
pub fn resolve(logger: &Logger, sources: &SourceMap, stmts: &[Stmt], options: ResolveOptions) -> Result<Db> {
    let mut resolver = Resolver {
        db: Db::new(NodeId::from_index(0)),
        sources,
        options,
    };

    for stmt in stmts {
        resolver.check_placement(stmt)?;
        resolver.declare(stmt)?;
    }
    for stmt in stmts {
        resolver.bind(stmt)?;
    }
    resolver.follow_aliases()?;
    for stmt in stmts {
        resolver.statement(stmt)?;
    }

    let db = resolver.db;
    logger.info(format!("Resolved {} rules", db.rules.len()));
    debug!(
        types = db.types.len(),
        roles = db.roles.len(),
        users = db.users.len(),
        classes = db.classes.len(),
        rules = db.rules.len(),
        conditionals = db.conditionals.len(),
        "resolved policy"
    );
    Ok(db)
}

/// Evaluates an extended permission expression to the set of numbers it names.
pub fn permx_bits(expr: &Expr) -> std::result::Result<Ebitmap, String> {
    fn value(text: &str) -> std::result::Result<u32, String> {
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => text.parse::<u32>().ok(),
        };
        parsed
            .filter(|v| *v < PERMX_LIMIT)
            .ok_or_else(|| format!("Invalid permissionx value {text}"))
    }

    match expr {
        Expr::Name(text) => Ok([value(text)?].into_iter().collect()),
        Expr::List(items) => items.iter().try_fold(Ebitmap::new(), |mut acc, item| {
            acc.union_with(&permx_bits(item)?);
            Ok(acc)
        }),
        Expr::Op(ExprOp::Range, items) => {
            let [Expr::Name(low), Expr::Name(high)] = items.as_slice() else {
                return Err("Invalid permissionx range".to_string());
            };
            let (low, high) = (value(low)?, value(high)?);
            if low > high {
                return Err(format!("Invalid permissionx range {low:#x} {high:#x}"));
            }
            Ok((low..=high).collect())
        }
        Expr::Op(ExprOp::All, _) => Ok((0..PERMX_LIMIT).collect()),
        Expr::Op(ExprOp::Not, items) => match items.as_slice() {
            [operand] => Ok(permx_bits(operand)?.not(PERMX_LIMIT)),
            _ => Err("Invalid permissionx expression".to_string()),
        },
        Expr::Op(op @ (ExprOp::And | ExprOp::Or | ExprOp::Xor), items) => match items.as_slice() {
            [lhs, rhs] => {
                let (lhs, rhs) = (permx_bits(lhs)?, permx_bits(rhs)?);
                Ok(match op {
                    ExprOp::And => lhs.and(&rhs),
                    ExprOp::Or => lhs.or(&rhs),
                    _ => lhs.xor(&rhs),
                })
            }
            _ => Err("Invalid permissionx expression".to_string()),
        },
        Expr::Op(op, _) => Err(format!("Invalid operator ({op}) in permissionx expression")),
    }
}

/// Replaces every name of `expr` with the id `leaf` finds for it.
fn set_expr<F>(expr: &Expr, leaf: &F) -> Result<SetExpr>
where
    F: Fn(&str) -> Result<Id>,
{
    Ok(match expr {
        Expr::Name(name) => SetExpr::Item(leaf(name)?),
        Expr::List(items) => SetExpr::List(items.iter().map(|i| set_expr(i, leaf)).collect::<Result<_>>()?),
        Expr::Op(op, items) => SetExpr::Op(*op, items.iter().map(|i| set_expr(i, leaf)).collect::<Result<_>>()?),
    })
}

/// One link of an alias chain, detached from its namespace.
struct AliasLink<'a> {
    name: &'a str,
    node: NodeId,
    is_alias: bool,
    actual: Option<Id>,
}

/// Follows every alias chain to its end, detecting unbound aliases and
/// cycles with a step-doubling walk. Returns `(alias, actual)` pairs.
fn follow_alias_chains(sources: &SourceMap, links: &[AliasLink<'_>]) -> Result<Vec<(Id, Id)>> {
    let mut resolved = Vec::new();
    for (start, link) in links.iter().enumerate().filter(|(_, l)| l.is_alias) {
        let error = |message: String| CilError::semantic(message, sources.locate(link.node));
        if link.actual.is_none() {
            return Err(error("Alias declared but not used".to_string()));
        }

        let (mut current, mut anchor) = (start, start);
        let (mut steps, mut limit) = (0, 2);
        while links[current].is_alias {
            let Some(next) = links[current].actual else {
                return Err(error(format!(
                    "Alias {} references an unused alias {}",
                    link.name, links[current].name
                )));
            };
            current = next;
            steps += 1;
            if current == anchor {
                let mut cycle = vec![links[current].name];
                let mut walk = links[current].actual;
                while let Some(id) = walk.filter(|&id| id != anchor) {
                    cycle.push(links[id].name);
                    walk = links[id].actual;
                }
                return Err(error(format!("Circular alias found: {}", cycle.join(" "))));
            }
            if steps == limit {
                steps = 0;
                limit *= 2;
                anchor = current;
            }
        }
        resolved.push((start, current));
    }
    Ok(resolved)
}

struct Resolver<'a> {
    db: Db,
    sources: &'a SourceMap,
    options: ResolveOptions,
}

impl Resolver<'_> {
    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    fn at(&self, node: NodeId) -> Location {
        self.sources.locate(node)
    }

    fn error(&self, stmt: &Stmt, message: impl Into<String>) -> CilError {
        CilError::semantic(message, self.at(stmt.node))
    }

    fn redeclared(&self, stmt: &Stmt, name: &str) -> CilError {
        CilError::Redeclared {
            kind: stmt.kind.keyword(),
            name: name.to_string(),
            location: Some(self.at(stmt.node)),
        }
    }

    fn unresolved(&self, stmt: &Stmt, kind: &'static str, name: &str) -> CilError {
        CilError::Unresolved {
            kind,
            name: name.to_string(),
            statement: stmt.kind.keyword(),
            location: Some(self.at(stmt.node)),
        }
    }

    // ------------------------------------------------------------------------
    // Sweep 1: declarations
    // ------------------------------------------------------------------------

    /// Only rules may appear inside a `booleanif`.
    fn check_placement(&self, stmt: &Stmt) -> Result<()> {
        let StmtKind::BooleanIf { branches, .. } = &stmt.kind else {
            return Ok(());
        };
        for inner in branches.iter().flat_map(|b| b.body.iter()) {
            let allowed = matches!(
                inner.kind,
                StmtKind::AvRule { .. } | StmtKind::TypeRule { .. } | StmtKind::NameTypeTransition { .. }
            );
            if !allowed {
                return Err(self.error(inner, format!("{} is not allowed in booleanif", inner.kind.keyword())));
            }
        }
        Ok(())
    }

    fn declare(&mut self, stmt: &Stmt) -> Result<()> {
        let node = stmt.node;
        let declared = match &stmt.kind {
            StmtKind::Type(name) => return self.declare_type(stmt, name, TypeKind::Type),
            StmtKind::TypeAlias(name) => return self.declare_type(stmt, name, TypeKind::Alias),
            StmtKind::TypeAttribute(name) => return self.declare_type(stmt, name, TypeKind::Attribute),
            StmtKind::Role(name) => self.db.roles.declare(name, RoleDecl::new(name, node, false)).map_err(|_| name),
            StmtKind::RoleAttribute(name) => {
                self.db.roles.declare(name, RoleDecl::new(name, node, true)).map_err(|_| name)
            }
            StmtKind::User(name) => self.db.users.declare(name, UserDecl::new(name, node, false)).map_err(|_| name),
            StmtKind::UserAttribute(name) => {
                self.db.users.declare(name, UserDecl::new(name, node, true)).map_err(|_| name)
            }
            StmtKind::Common { name, perms } => {
                let perms = self.permissions(stmt, name, perms, Some("common"))?;
                let common = CommonDecl {
                    name: name.clone(),
                    node,
                    perms,
                };
                self.db.commons.declare(name, common).map_err(|_| name)
            }
            StmtKind::Class { name, perms } | StmtKind::ClassMap { name, perms } => {
                let is_map = matches!(stmt.kind, StmtKind::ClassMap { .. });
                let perms = self.permissions(stmt, name, perms, (!is_map).then_some("class"))?;
                let class = ClassDecl {
                    name: name.clone(),
                    node,
                    is_map,
                    perms,
                    common: None,
                    order: None,
                    default_user: None,
                    default_role: None,
                    default_type: None,
                    default_range: None,
                };
                self.db.classes.declare(name, class).map_err(|_| name)
            }
            StmtKind::ClassPermission(name) => {
                let set = ClassPermissionDecl {
                    name: name.clone(),
                    node,
                    sets: Vec::new(),
                };
                self.db.classpermissions.declare(name, set).map_err(|_| name)
            }
            StmtKind::Sensitivity(name) => {
                self.db.sensitivities.declare(name, SensDecl::new(name, node, false)).map_err(|_| name)
            }
            StmtKind::SensitivityAlias(name) => {
                self.db.sensitivities.declare(name, SensDecl::new(name, node, true)).map_err(|_| name)
            }
            StmtKind::Category(name) => {
                self.db.categories.declare(name, CatDecl::new(name, node, CatKind::Cat)).map_err(|_| name)
            }
            StmtKind::CategoryAlias(name) => {
                self.db.categories.declare(name, CatDecl::new(name, node, CatKind::Alias)).map_err(|_| name)
            }
            StmtKind::CategorySet { name, .. } => {
                self.db.categories.declare(name, CatDecl::new(name, node, CatKind::Set)).map_err(|_| name)
            }
            StmtKind::Level { name, .. } => self.db.levels.declare(name, named(name, node, None)).map_err(|_| name),
            StmtKind::LevelRange { name, .. } => {
                self.db.levelranges.declare(name, named(name, node, None)).map_err(|_| name)
            }
            StmtKind::Context { name, .. } => {
                self.db.contexts.declare(name, named(name, node, None)).map_err(|_| name)
            }
            StmtKind::PermissionX { name, .. } => {
                self.db.permissionxs.declare(name, named(name, node, None)).map_err(|_| name)
            }
            StmtKind::IpAddr { name, addr } => {
                self.db.ipaddrs.declare(name, named(name, node, *addr)).map_err(|_| name)
            }
            StmtKind::Boolean { name, value } => {
                let decl = BoolDecl {
                    name: name.clone(),
                    node,
                    value: *value,
                };
                self.db.bools.declare(name, decl).map_err(|_| name)
            }
            StmtKind::Sid(name) => {
                let sid = SidDecl {
                    name: name.clone(),
                    node,
                    context: None,
                    order: None,
                };
                self.db.sids.declare(name, sid).map_err(|_| name)
            }
            _ => return Ok(()),
        };
        declared.map(drop).map_err(|name| self.redeclared(stmt, name))
    }

    fn declare_type(&mut self, stmt: &Stmt, name: &str, kind: TypeKind) -> Result<()> {
        if self.db.types.declare(name, TypeDecl::new(name, stmt.node, kind)).is_ok() {
            return Ok(());
        }
        let existing = self.db.types.lookup(name).map(|id| self.db.types[id].kind);
        if self.options.multiple_decls && kind != TypeKind::Alias && existing == Some(kind) {
            return Ok(());
        }
        Err(self.redeclared(stmt, name))
    }

    fn permissions(
        &self,
        stmt: &Stmt,
        owner: &str,
        perms: &[String],
        limited: Option<&str>,
    ) -> Result<Namespace<PermDecl>> {
        if let Some(kind) = limited {
            if perms.len() > PERMS_PER_CLASS {
                return Err(self.error(stmt, format!("Too many permissions in {kind} '{owner}'")));
            }
        }
        let mut namespace = Namespace::new(PERMS_PER_CLASS);
        for perm in perms {
            let decl = PermDecl {
                name: perm.clone(),
                mappings: Vec::new(),
            };
            namespace.declare(perm, decl).map_err(|_| CilError::Redeclared {
                kind: "permission",
                name: perm.clone(),
                location: Some(self.at(stmt.node)),
            })?;
        }
        Ok(namespace)
    }

    // ------------------------------------------------------------------------
    // Sweep 2: aliases and commons
    // ------------------------------------------------------------------------

    fn bind(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::TypeAliasActual { alias, actual } => {
                let alias_id = self.db.types.lookup(alias).ok_or_else(|| self.unresolved(stmt, "typealias", alias))?;
                if self.db.types[alias_id].kind != TypeKind::Alias {
                    return Err(self.error(stmt, format!("{alias} is not an alias")));
                }
                let actual_id = self.db.types.lookup(actual).ok_or_else(|| self.unresolved(stmt, "type", actual))?;
                if self.db.types[actual_id].kind == TypeKind::Attribute {
                    return Err(self.error(stmt, format!("{alias} is a typealias, but aliases a typeattribute")));
                }
                if self.db.types[alias_id].actual.is_some() {
                    return Err(self.error(stmt, format!("typealias {alias} cannot bind more than one value")));
                }
                self.db.types[alias_id].actual = Some(actual_id);
            }
            StmtKind::SensitivityAliasActual { alias, actual } => {
                let alias_id = self
                    .db
                    .sensitivities
                    .lookup(alias)
                    .ok_or_else(|| self.unresolved(stmt, "sensitivityalias", alias))?;
                if !self.db.sensitivities[alias_id].is_alias {
                    return Err(self.error(stmt, format!("{alias} is not an alias")));
                }
                let actual_id = self
                    .db
                    .sensitivities
                    .lookup(actual)
                    .ok_or_else(|| self.unresolved(stmt, "sensitivity", actual))?;
                if self.db.sensitivities[alias_id].actual.is_some() {
                    return Err(self.error(stmt, format!("sensitivityalias {alias} cannot bind more than one value")));
                }
                self.db.sensitivities[alias_id].actual = Some(actual_id);
            }
            StmtKind::CategoryAliasActual { alias, actual } => {
                let alias_id = self
                    .db
                    .categories
                    .lookup(alias)
                    .ok_or_else(|| self.unresolved(stmt, "categoryalias", alias))?;
                if self.db.categories[alias_id].kind != CatKind::Alias {
                    return Err(self.error(stmt, format!("{alias} is not an alias")));
                }
                let actual_id = self
                    .db
                    .categories
                    .lookup(actual)
                    .ok_or_else(|| self.unresolved(stmt, "category", actual))?;
                if self.db.categories[actual_id].kind == CatKind::Set {
                    return Err(self.error(stmt, format!("{alias} is a categoryalias, but aliases a categoryset")));
                }
                if self.db.categories[alias_id].actual.is_some() {
                    return Err(self.error(stmt, format!("categoryalias {alias} cannot bind more than one value")));
                }
                self.db.categories[alias_id].actual = Some(actual_id);
            }
            StmtKind::ClassCommon { class, common } => {
                let class_id = self.db.classes.lookup(class).ok_or_else(|| self.unresolved(stmt, "class", class))?;
                if self.db.classes[class_id].is_map {
                    return Err(self.error(
                        stmt,
                        format!("Class {class} is not a kernel class and cannot be associated with common {common}"),
                    ));
                }
                let common_id =
                    self.db.commons.lookup(common).ok_or_else(|| self.unresolved(stmt, "common", common))?;
                if self.db.classes[class_id].common.is_some() {
                    return Err(self.error(stmt, format!("Class {class} cannot be associated with more than one common")));
                }
                self.db.classes[class_id].common = Some(common_id);
                if self.db.perm_count(class_id) > PERMS_PER_CLASS {
                    return Err(self.error(
                        stmt,
                        format!("Too many permissions in class '{class}' when including common permissions"),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn follow_aliases(&mut self) -> Result<()> {
        let sources = self.sources;

        let links: Vec<_> = self
            .db
            .types
            .iter()
            .map(|(_, t)| AliasLink {
                name: &t.name,
                node: t.node,
                is_alias: t.kind == TypeKind::Alias,
                actual: t.actual,
            })
            .collect();
        let types = follow_alias_chains(sources, &links)?;

        let links: Vec<_> = self
            .db
            .sensitivities
            .iter()
            .map(|(_, s)| AliasLink {
                name: &s.name,
                node: s.node,
                is_alias: s.is_alias,
                actual: s.actual,
            })
            .collect();
        let sensitivities = follow_alias_chains(sources, &links)?;

        let links: Vec<_> = self
            .db
            .categories
            .iter()
            .map(|(_, c)| AliasLink {
                name: &c.name,
                node: c.node,
                is_alias: c.kind == CatKind::Alias,
                actual: c.actual,
            })
            .collect();
        let categories = follow_alias_chains(sources, &links)?;

        for (alias, actual) in types {
            self.db.types[alias].actual = Some(actual);
        }
        for (alias, actual) in sensitivities {
            self.db.sensitivities[alias].actual = Some(actual);
        }
        for (alias, actual) in categories {
            self.db.categories[alias].actual = Some(actual);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// A type or type attribute; aliases resolve to their type.
    fn type_id(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        let id = self.db.types.lookup(name).ok_or_else(|| self.unresolved(stmt, "type", name))?;
        Ok(match self.db.types[id].kind {
            TypeKind::Alias => self.db.types[id].actual.unwrap_or(id),
            _ => id,
        })
    }

    fn is_type_attribute(&self, id: Id) -> bool {
        self.db.types[id].kind == TypeKind::Attribute
    }

    fn target(&self, stmt: &Stmt, name: &str) -> Result<Target> {
        if name == "self" {
            return Ok(Target::SelfType);
        }
        self.type_id(stmt, name).map(Target::Type)
    }

    fn role_id(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        self.db.roles.lookup(name).ok_or_else(|| self.unresolved(stmt, "role", name))
    }

    fn user_id(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        self.db.users.lookup(name).ok_or_else(|| self.unresolved(stmt, "user", name))
    }

    fn class_id(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        self.db.classes.lookup(name).ok_or_else(|| self.unresolved(stmt, "class", name))
    }

    /// A class that exists in the kernel policy, not a map class.
    fn kernel_class(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        let id = self.class_id(stmt, name)?;
        if self.db.classes[id].is_map {
            return Err(self.error(stmt, format!("{name} is a map class, not a kernel class")));
        }
        Ok(id)
    }

    fn sensitivity_id(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        let id = self
            .db
            .sensitivities
            .lookup(name)
            .ok_or_else(|| self.unresolved(stmt, "sensitivity", name))?;
        Ok(self.db.sensitivities[id].actual.unwrap_or(id))
    }

    /// A category or category set; aliases resolve to their category.
    fn category_id(&self, stmt: &Stmt, name: &str) -> Result<Id> {
        let id = self
            .db
            .categories
            .lookup(name)
            .ok_or_else(|| self.unresolved(stmt, "category", name))?;
        Ok(match self.db.categories[id].kind {
            CatKind::Alias => self.db.categories[id].actual.unwrap_or(id),
            _ => id,
        })
    }

    fn category_expr(&self, stmt: &Stmt, expr: &Expr) -> Result<SetExpr> {
        let resolved = set_expr(expr, &|name| self.category_id(stmt, name))?;
        self.check_category_ranges(stmt, &resolved)?;
        Ok(resolved)
    }

    fn check_category_ranges(&self, stmt: &Stmt, expr: &SetExpr) -> Result<()> {
        match expr {
            SetExpr::Item(_) => Ok(()),
            SetExpr::Op(ExprOp::Range, items) => {
                let sets = items.iter().any(|item| match item {
                    SetExpr::Item(id) => self.db.categories[*id].kind == CatKind::Set,
                    _ => true,
                });
                if sets {
                    return Err(self.error(stmt, "Category set not allowed in category range"));
                }
                Ok(())
            }
            SetExpr::List(items) | SetExpr::Op(_, items) => {
                items.iter().try_for_each(|item| self.check_category_ranges(stmt, item))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Compound arguments
    // ------------------------------------------------------------------------

    fn classperms(&self, stmt: &Stmt, perms: &ClassPerms) -> Result<ClassPermsRef> {
        match perms {
            ClassPerms::Named(name) => self
                .db
                .classpermissions
                .lookup(name)
                .map(ClassPermsRef::Set)
                .ok_or_else(|| self.unresolved(stmt, "classpermission", name)),
            ClassPerms::Anon { class, perms } => {
                let class = self.class_id(stmt, class)?;
                let kind = if self.db.classes[class].is_map {
                    "map permission"
                } else {
                    "permission"
                };
                let perms = set_expr(perms, &|perm| {
                    self.db
                        .lookup_perm(class, perm)
                        .ok_or_else(|| self.unresolved(stmt, kind, perm))
                })?;
                Ok(ClassPermsRef::Perms { class, perms })
            }
        }
    }

    fn level_spec(&self, stmt: &Stmt, spec: &ast::LevelSpec) -> Result<LevelSpec> {
        Ok(LevelSpec {
            sens: self.sensitivity_id(stmt, &spec.sens)?,
            cats: spec.cats.as_ref().map(|cats| self.category_expr(stmt, cats)).transpose()?,
        })
    }

    fn level_ref(&self, stmt: &Stmt, level: &LevelArg) -> Result<LevelRef> {
        match level {
            LevelArg::Named(name) => self
                .db
                .levels
                .lookup(name)
                .map(LevelRef::Named)
                .ok_or_else(|| self.unresolved(stmt, "level", name)),
            LevelArg::Anon(spec) => self.level_spec(stmt, spec).map(LevelRef::Anon),
        }
    }

    fn range_spec(&self, stmt: &Stmt, spec: &ast::RangeSpec) -> Result<RangeSpec> {
        Ok(RangeSpec {
            low: self.level_ref(stmt, &spec.low)?,
            high: self.level_ref(stmt, &spec.high)?,
        })
    }

    fn range_ref(&self, stmt: &Stmt, range: &RangeArg) -> Result<RangeRef> {
        match range {
            RangeArg::Named(name) => self
                .db
                .levelranges
                .lookup(name)
                .map(RangeRef::Named)
                .ok_or_else(|| self.unresolved(stmt, "levelrange", name)),
            RangeArg::Anon(spec) => Ok(RangeRef::Anon(Box::new(self.range_spec(stmt, spec)?))),
        }
    }

    fn context_spec(&self, stmt: &Stmt, spec: &ast::ContextSpec) -> Result<ContextSpec> {
        let user = self.user_id(stmt, &spec.user)?;
        if self.db.users[user].is_attribute {
            return Err(self.error(stmt, format!("Context user must be a user: {}", spec.user)));
        }
        let role = self.role_id(stmt, &spec.role)?;
        if self.db.roles[role].is_attribute {
            return Err(self.error(stmt, format!("Context role not a role: {}", spec.role)));
        }
        let type_ = self.type_id(stmt, &spec.type_)?;
        if self.is_type_attribute(type_) {
            return Err(self.error(stmt, format!("Context type not a type or type alias: {}", spec.type_)));
        }
        Ok(ContextSpec {
            user,
            role,
            type_,
            range: self.range_ref(stmt, &spec.range)?,
        })
    }

    fn context_ref(&self, stmt: &Stmt, context: &ContextArg) -> Result<ContextRef> {
        match context {
            ContextArg::Named(name) => self
                .db
                .contexts
                .lookup(name)
                .map(ContextRef::Named)
                .ok_or_else(|| self.unresolved(stmt, "context", name)),
            ContextArg::Anon(spec) => Ok(ContextRef::Anon(Box::new(self.context_spec(stmt, spec)?))),
        }
    }

    fn permissionx_spec(&self, stmt: &Stmt, spec: &ast::PermissionXSpec) -> Result<PermissionXSpec> {
        Ok(PermissionXSpec {
            kind: spec.kind,
            class: self.kernel_class(stmt, &spec.class)?,
            perms: permx_bits(&spec.perms).map_err(|message| self.error(stmt, message))?,
        })
    }

    fn ip(&self, stmt: &Stmt, ip: &IpArg) -> Result<IpAddr> {
        match ip {
            IpArg::Named(name) => self
                .db
                .ipaddrs
                .lookup(name)
                .map(|id| self.db.ipaddrs[id].value)
                .ok_or_else(|| self.unresolved(stmt, "ipaddr", name)),
            IpArg::Anon(addr) => Ok(*addr),
        }
    }

    // ------------------------------------------------------------------------
    // Sweep 3: everything else
    // ------------------------------------------------------------------------

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        let node = stmt.node;
        match &stmt.kind {
            // Types
            StmtKind::TypeAttributeSet { attr, expr } => {
                let id = self.type_id(stmt, attr)?;
                if !self.is_type_attribute(id) {
                    return Err(self.error(stmt, format!("Attribute type {attr} not an attribute")));
                }
                let expr = set_expr(expr, &|name| self.type_id(stmt, name))?;
                self.db.types[id].exprs.push((node, expr));
            }
            StmtKind::TypeBounds { parent, child } => {
                let parent_id = self.type_id(stmt, parent)?;
                let child_id = self.type_id(stmt, child)?;
                self.check_bounds(stmt, parent, child, self.is_type_attribute(parent_id), self.is_type_attribute(child_id))?;
                if self.db.types[child_id].bounds.is_some() {
                    return Err(self.error(stmt, format!("Type {child} already bound by parent")));
                }
                self.db.types[child_id].bounds = Some(parent_id);
            }
            StmtKind::TypePermissive(name) => {
                let id = self.type_id(stmt, name)?;
                if self.is_type_attribute(id) {
                    return Err(self.error(stmt, "Typepermissive must be a type or type alias"));
                }
                self.db.types[id].permissive = true;
            }

            // Roles
            StmtKind::RoleType { role, type_ } => {
                let role = self.role_id(stmt, role)?;
                let type_ = self.type_id(stmt, type_)?;
                self.db.roles[role].type_refs.push(type_);
            }
            StmtKind::RoleAttributeSet { attr, expr } => {
                let id = self.role_id(stmt, attr)?;
                if !self.db.roles[id].is_attribute {
                    return Err(self.error(stmt, format!("Attribute role {attr} not an attribute")));
                }
                let expr = set_expr(expr, &|name| self.role_id(stmt, name))?;
                self.db.roles[id].exprs.push((node, expr));
            }
            StmtKind::RoleBounds { parent, child } => {
                let parent_id = self.role_id(stmt, parent)?;
                let child_id = self.role_id(stmt, child)?;
                let (p, c) = (self.db.roles[parent_id].is_attribute, self.db.roles[child_id].is_attribute);
                self.check_bounds(stmt, parent, child, p, c)?;
                if self.db.roles[child_id].bounds.is_some() {
                    return Err(self.error(stmt, format!("Role {child} already bound by parent")));
                }
                self.db.roles[child_id].bounds = Some(parent_id);
            }
            StmtKind::RoleAllow { source, target } => {
                let rule = Rule::RoleAllow {
                    node,
                    source: self.role_id(stmt, source)?,
                    target: self.role_id(stmt, target)?,
                };
                self.db.rules.push(rule);
            }
            StmtKind::RoleTransition {
                source,
                target,
                class,
                result,
            } => {
                let result_id = self.role_id(stmt, result)?;
                if self.db.roles[result_id].is_attribute {
                    return Err(self.error(
                        stmt,
                        format!("roletransition must result in a role, but {result} is a roleattribute"),
                    ));
                }
                let rule = Rule::RoleTransition {
                    node,
                    source: self.role_id(stmt, source)?,
                    target: self.type_id(stmt, target)?,
                    class: self.kernel_class(stmt, class)?,
                    result: result_id,
                };
                self.db.rules.push(rule);
            }

            // Users
            StmtKind::UserRole { user, role } => {
                let user = self.user_id(stmt, user)?;
                let role = self.role_id(stmt, role)?;
                self.db.users[user].role_refs.push(role);
            }
            StmtKind::UserLevel { user, level } => {
                let id = self.user_id(stmt, user)?;
                if self.db.users[id].is_attribute {
                    return Err(self.error(stmt, "Userlevel must be a user"));
                }
                let level = self.level_ref(stmt, level)?;
                self.db.users[id].level = Some(level);
            }
            StmtKind::UserRange { user, range } => {
                let id = self.user_id(stmt, user)?;
                if self.db.users[id].is_attribute {
                    return Err(self.error(stmt, format!("Userrange must be a user: {user}")));
                }
                let range = self.range_ref(stmt, range)?;
                self.db.users[id].range = Some(range);
            }
            StmtKind::UserBounds { parent, child } => {
                let parent_id = self.user_id(stmt, parent)?;
                let child_id = self.user_id(stmt, child)?;
                let (p, c) = (self.db.users[parent_id].is_attribute, self.db.users[child_id].is_attribute);
                self.check_bounds(stmt, parent, child, p, c)?;
                if self.db.users[child_id].bounds.is_some() {
                    return Err(self.error(stmt, format!("User {child} already bound by parent")));
                }
                self.db.users[child_id].bounds = Some(parent_id);
            }
            StmtKind::UserAttributeSet { attr, expr } => {
                let id = self.user_id(stmt, attr)?;
                if !self.db.users[id].is_attribute {
                    return Err(self.error(stmt, format!("Attribute user {attr} not an attribute")));
                }
                let expr = set_expr(expr, &|name| self.user_id(stmt, name))?;
                self.db.users[id].exprs.push((node, expr));
            }

            // Classes and permissions
            StmtKind::ClassOrder(items) => {
                let (unordered, names) = match items.split_first() {
                    Some((first, rest)) if first == "unordered" => (true, rest),
                    _ => (false, items.as_slice()),
                };
                let ids = names
                    .iter()
                    .map(|name| {
                        let id = self.class_id(stmt, name)?;
                        if self.db.classes[id].is_map {
                            return Err(self.error(
                                stmt,
                                format!("{name} is not a class. Only classes are allowed in classorder statements"),
                            ));
                        }
                        Ok(id)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let list = OrderedList { node, items: ids };
                if unordered {
                    self.db.order_statements.unordered_classes.push(list);
                } else {
                    self.db.order_statements.classes.push(list);
                }
            }
            StmtKind::ClassPermissionSet { name, perms } => {
                let id = self
                    .db
                    .classpermissions
                    .lookup(name)
                    .ok_or_else(|| self.unresolved(stmt, "classpermission", name))?;
                let perms = self.classperms(stmt, perms)?;
                self.db.classpermissions[id].sets.push(perms);
            }
            StmtKind::ClassMapping { map, perm, perms } => {
                let map_id = self.class_id(stmt, map)?;
                if !self.db.classes[map_id].is_map {
                    return Err(self.error(stmt, format!("{map} is not a map class")));
                }
                let perm_id = self.db.classes[map_id]
                    .perms
                    .lookup(perm)
                    .ok_or_else(|| self.unresolved(stmt, "map permission", perm))?;
                let perms = self.classperms(stmt, perms)?;
                self.db.classes[map_id].perms[perm_id].mappings.push(perms);
            }
            StmtKind::Default { kind, classes, object } => {
                for name in classes {
                    let id = self.kernel_class(stmt, name)?;
                    let class = &mut self.db.classes[id];
                    let slot = match kind {
                        DefaultKind::User => &mut class.default_user,
                        DefaultKind::Role => &mut class.default_role,
                        DefaultKind::Type => &mut class.default_type,
                    };
                    match slot {
                        Some(existing) if existing != object => {
                            let message = format!("Conflicting {} statements for class {name}", stmt.kind.keyword());
                            return Err(CilError::semantic(message, self.sources.locate(node)));
                        }
                        _ => *slot = Some(*object),
                    }
                }
            }
            StmtKind::DefaultRange { classes, range } => {
                for name in classes {
                    let id = self.kernel_class(stmt, name)?;
                    match self.db.classes[id].default_range {
                        Some(existing) if existing != *range => {
                            return Err(self.error(stmt, format!("Conflicting defaultrange statements for class {name}")));
                        }
                        _ => self.db.classes[id].default_range = Some(*range),
                    }
                }
            }

            // MLS
            StmtKind::SensitivityOrder(items) => {
                let ids = items
                    .iter()
                    .map(|name| {
                        let id = self
                            .db
                            .sensitivities
                            .lookup(name)
                            .ok_or_else(|| self.unresolved(stmt, "sensitivity", name))?;
                        if self.db.sensitivities[id].is_alias {
                            return Err(self.error(
                                stmt,
                                format!(
                                    "{name} is not a sensitivity. Only sensitivities are allowed in sensitivityorder statements"
                                ),
                            ));
                        }
                        Ok(id)
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.db.order_statements.sensitivities.push(OrderedList { node, items: ids });
            }
            StmtKind::CategoryOrder(items) => {
                let ids = items
                    .iter()
                    .map(|name| {
                        let id = self
                            .db
                            .categories
                            .lookup(name)
                            .ok_or_else(|| self.unresolved(stmt, "category", name))?;
                        if self.db.categories[id].kind != CatKind::Cat {
                            return Err(self.error(
                                stmt,
                                format!("{name} is not a category. Only categories are allowed in categoryorder statements"),
                            ));
                        }
                        Ok(id)
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.db.order_statements.categories.push(OrderedList { node, items: ids });
            }
            StmtKind::CategorySet { name, expr } => {
                let id = self.category_id(stmt, name)?;
                let expr = self.category_expr(stmt, expr)?;
                self.db.categories[id].expr = Some(expr);
            }
            StmtKind::SensitivityCategory { sens, cats } => {
                let id = self.sensitivity_id(stmt, sens)?;
                let expr = self.category_expr(stmt, cats)?;
                self.db.sensitivities[id].cat_exprs.push(expr);
            }
            StmtKind::Level { name, level } => {
                let spec = self.level_spec(stmt, level)?;
                if let Some(id) = self.db.levels.lookup(name) {
                    self.db.levels[id].value = Some(spec);
                }
            }
            StmtKind::LevelRange { name, range } => {
                let spec = self.range_spec(stmt, range)?;
                if let Some(id) = self.db.levelranges.lookup(name) {
                    self.db.levelranges[id].value = Some(spec);
                }
            }

            // Booleans
            StmtKind::BooleanIf { expr, branches } => {
                let expr = set_expr(expr, &|name| {
                    self.db.bools.lookup(name).ok_or_else(|| self.unresolved(stmt, "boolean", name))
                })?;
                let mut blocks = Vec::with_capacity(branches.len());
                for branch in branches {
                    let mut rules = Vec::with_capacity(branch.body.len());
                    for inner in &branch.body {
                        if let Some(rule) = self.rule(inner)? {
                            rules.push(rule);
                        }
                    }
                    blocks.push(CondBlock {
                        node: branch.node,
                        kind: branch.kind.clone(),
                        rules,
                    });
                }
                self.db.conditionals.push(Conditional { node, expr, blocks });
            }

            // Rules
            StmtKind::AvRule { .. }
            | StmtKind::AvRuleX { .. }
            | StmtKind::TypeRule { .. }
            | StmtKind::NameTypeTransition { .. }
            | StmtKind::RangeTransition { .. } => {
                if let Some(rule) = self.rule(stmt)? {
                    self.db.rules.push(rule);
                }
            }
            StmtKind::PermissionX { name, spec } => {
                let spec = self.permissionx_spec(stmt, spec)?;
                if let Some(id) = self.db.permissionxs.lookup(name) {
                    self.db.permissionxs[id].value = Some(spec);
                }
            }

            // SIDs and contexts
            StmtKind::SidOrder(items) => {
                let ids = items
                    .iter()
                    .map(|name| self.db.sids.lookup(name).ok_or_else(|| self.unresolved(stmt, "sid", name)))
                    .collect::<Result<Vec<_>>>()?;
                self.db.order_statements.sids.push(OrderedList { node, items: ids });
            }
            StmtKind::SidContext { sid, context } => {
                let id = self.db.sids.lookup(sid).ok_or_else(|| self.unresolved(stmt, "sid", sid))?;
                let context = self.context_ref(stmt, context)?;
                if self.db.sids[id].context.is_some() {
                    return Err(self.error(stmt, format!("SID {sid} cannot be associated with more than one context")));
                }
                self.db.sids[id].context = Some(context);
            }
            StmtKind::Context { name, spec } => {
                let spec = self.context_spec(stmt, spec)?;
                if let Some(id) = self.db.contexts.lookup(name) {
                    self.db.contexts[id].value = Some(spec);
                }
            }

            // Labeling
            StmtKind::FileCon {
                path,
                file_type,
                context,
            } => {
                let context = context.as_ref().map(|c| self.context_ref(stmt, c)).transpose()?;
                self.db.labeling.filecons.push(FileCon {
                    node,
                    path: path.clone(),
                    file_type: *file_type,
                    context,
                });
            }
            StmtKind::FsUse { behavior, fs, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.fsuses.push(FsUse {
                    node,
                    behavior: *behavior,
                    fs: fs.clone(),
                    context,
                });
            }
            StmtKind::GenfsCon { fs, path, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.genfscons.push(GenfsCon {
                    node,
                    fs: fs.clone(),
                    path: path.clone(),
                    context,
                });
            }
            StmtKind::PortCon {
                protocol,
                low,
                high,
                context,
            } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.portcons.push(PortCon {
                    node,
                    protocol: *protocol,
                    low: *low,
                    high: *high,
                    context,
                });
            }
            StmtKind::NodeCon { addr, mask, context } => {
                let addr = self.ip(stmt, addr)?;
                let mask = self.ip(stmt, mask)?;
                if addr.is_ipv4() != mask.is_ipv4() {
                    return Err(self.error(stmt, "Nodecon ip address not in the same family"));
                }
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.nodecons.push(NodeCon {
                    node,
                    addr,
                    mask,
                    context,
                });
            }
            StmtKind::NetifCon {
                name,
                if_context,
                packet_context,
            } => {
                let if_context = self.context_ref(stmt, if_context)?;
                let packet_context = self.context_ref(stmt, packet_context)?;
                self.db.labeling.netifcons.push(NetifCon {
                    node,
                    name: name.clone(),
                    if_context,
                    packet_context,
                });
            }
            StmtKind::IbPkeyCon {
                subnet_prefix,
                low,
                high,
                context,
            } => {
                let prefix: Ipv6Addr = subnet_prefix
                    .parse()
                    .map_err(|_| self.error(stmt, "ibpkeycon subnet prefix not in valid IPV6 format"))?;
                let mut octets = [0u8; 8];
                octets.copy_from_slice(&prefix.octets()[..8]);
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.ibpkeycons.push(IbPkeyCon {
                    node,
                    subnet_prefix: subnet_prefix.clone(),
                    prefix: octets,
                    low: *low,
                    high: *high,
                    context,
                });
            }
            StmtKind::IbEndportCon { dev_name, port, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.ibendportcons.push(IbEndportCon {
                    node,
                    dev_name: dev_name.clone(),
                    port: *port,
                    context,
                });
            }
            StmtKind::PirqCon { pirq, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.pirqcons.push(PirqCon {
                    node,
                    pirq: *pirq,
                    context,
                });
            }
            StmtKind::IomemCon { low, high, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.iomemcons.push(IomemCon {
                    node,
                    low: *low,
                    high: *high,
                    context,
                });
            }
            StmtKind::IoportCon { low, high, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.ioportcons.push(IoportCon {
                    node,
                    low: *low,
                    high: *high,
                    context,
                });
            }
            StmtKind::PciDeviceCon { device, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.pcidevicecons.push(PciDeviceCon {
                    node,
                    device: *device,
                    context,
                });
            }
            StmtKind::DeviceTreeCon { path, context } => {
                let context = self.context_ref(stmt, context)?;
                self.db.labeling.devicetreecons.push(DeviceTreeCon {
                    node,
                    path: path.clone(),
                    context,
                });
            }

            // Global settings
            StmtKind::HandleUnknown(value) => self.db.handle_unknown.push((node, *value)),
            StmtKind::Mls(value) => self.db.mls.push((node, *value)),
            StmtKind::PolicyCap(name) => self.db.policycaps.push((node, name.clone())),

            // Declarations and alias bindings were handled by the earlier sweeps.
            _ => {}
        }
        Ok(())
    }

    fn check_bounds(&self, stmt: &Stmt, parent: &str, child: &str, parent_attr: bool, child_attr: bool) -> Result<()> {
        if parent_attr {
            return Err(self.error(stmt, format!("Bounds parent {parent} is an attribute")));
        }
        if child_attr {
            return Err(self.error(stmt, format!("Bounds child {child} is an attribute")));
        }
        Ok(())
    }

    /// Resolves a rule statement; `None` for anything that is not a rule.
    fn rule(&mut self, stmt: &Stmt) -> Result<Option<Rule>> {
        let node = stmt.node;
        let rule = match &stmt.kind {
            StmtKind::AvRule {
                kind,
                source,
                target,
                perms,
            } => {
                let source = self.type_id(stmt, source)?;
                let target = self.target(stmt, target)?;
                let perms = self.classperms(stmt, perms)?;
                self.mark_used(*kind, source, target);
                Rule::Av {
                    node,
                    kind: *kind,
                    source,
                    target,
                    perms,
                }
            }
            StmtKind::AvRuleX {
                kind,
                source,
                target,
                perms,
            } => {
                let source = self.type_id(stmt, source)?;
                let target = self.target(stmt, target)?;
                let perms = match perms {
                    PermissionXArg::Named(name) => self
                        .db
                        .permissionxs
                        .lookup(name)
                        .map(PermissionXRef::Named)
                        .ok_or_else(|| self.unresolved(stmt, "permissionx", name))?,
                    PermissionXArg::Anon(spec) => PermissionXRef::Anon(self.permissionx_spec(stmt, spec)?),
                };
                self.mark_used(*kind, source, target);
                Rule::AvX {
                    node,
                    kind: *kind,
                    source,
                    target,
                    perms,
                }
            }
            StmtKind::TypeRule {
                kind,
                source,
                target,
                class,
                result,
            } => {
                let result_id = self.type_id(stmt, result)?;
                if self.is_type_attribute(result_id) {
                    return Err(self.error(stmt, "Type rule result must be a type"));
                }
                Rule::Type {
                    node,
                    kind: *kind,
                    source: self.type_id(stmt, source)?,
                    target: self.target(stmt, target)?,
                    class: self.kernel_class(stmt, class)?,
                    result: result_id,
                }
            }
            StmtKind::NameTypeTransition {
                source,
                target,
                class,
                object_name,
                result,
            } => {
                let result_id = self.type_id(stmt, result)?;
                if self.is_type_attribute(result_id) {
                    return Err(self.error(stmt, "typetransition result is not a type or type alias"));
                }
                Rule::NameTransition {
                    node,
                    source: self.type_id(stmt, source)?,
                    target: self.target(stmt, target)?,
                    class: self.kernel_class(stmt, class)?,
                    name: object_name.clone(),
                    result: result_id,
                }
            }
            StmtKind::RangeTransition {
                source,
                target,
                class,
                range,
            } => Rule::RangeTransition {
                node,
                source: self.type_id(stmt, source)?,
                target: self.type_id(stmt, target)?,
                class: self.kernel_class(stmt, class)?,
                range: self.range_ref(stmt, range)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(rule))
    }

    /// Records how access rules use type attributes. A rule whose target is
    /// `self` leaves the source unmarked.
    fn mark_used(&mut self, kind: AvRuleKind, source: Id, target: Target) {
        let Target::Type(target) = target else {
            return;
        };
        for id in [source, target] {
            let decl = &mut self.db.types[id];
            if decl.kind != TypeKind::Attribute {
                continue;
            }
            if kind == AvRuleKind::NeverAllow {
                decl.used.neverallow = true;
            } else {
                decl.used.avrule = true;
            }
        }
    }
}

fn named<T>(name: &str, node: NodeId, value: T) -> Named<T> {
    Named {
        name: name.to_string(),
        node,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, build};
    use crate::parser::{ParseTree, parse};

    fn resolve_src(src: &str) -> Result<Db> {
        resolve_with(src, ResolveOptions::default())
    }

    fn resolve_with(src: &str, options: ResolveOptions) -> Result<Db> {
        let logger = Logger::default();
        let mut tree = ParseTree::new();
        parse(&logger, "test.cil", src, &mut tree)?;
        let stmts = build(&logger, &tree, BuildOptions::default())?;
        resolve(&logger, tree.sources(), &stmts, options)
    }

    #[test]
    fn aliases_resolve_through_chains() {
        let db = resolve_src(
            "(type t) (typealias a) (typealias b) (typealiasactual b a) (typealiasactual a t) \
             (typeattribute at) (typeattributeset at (b))",
        )
        .unwrap();
        let t = db.types.lookup("t").unwrap();
        let b = db.types.lookup("b").unwrap();
        assert_eq!(db.types[b].actual, Some(t));
        let at = db.types.lookup("at").unwrap();
        assert_eq!(db.types[at].exprs[0].1, SetExpr::List(vec![SetExpr::Item(t)]));
    }

    #[test]
    fn circular_aliases_are_rejected() {
        let err = resolve_src("(typealias a) (typealias b) (typealiasactual a b) (typealiasactual b a)").unwrap_err();
        assert!(err.to_string().starts_with("Circular alias found"), "{err}");
    }

    #[test]
    fn unbound_alias_is_rejected() {
        let err = resolve_src("(type t) (typealias a)").unwrap_err();
        assert_eq!(err.to_string(), "Alias declared but not used at test.cil:1");
    }

    #[test]
    fn redeclaration_names_the_statement() {
        let err = resolve_src("(type t)\n(typeattribute t)").unwrap_err();
        assert_eq!(err.to_string(), "Re-declaration of typeattribute t at test.cil:2");
    }

    #[test]
    fn multiple_decls_allow_repeated_types() {
        let options = ResolveOptions { multiple_decls: true };
        assert!(resolve_with("(type t) (type t)", options).is_ok());
        assert!(resolve_with("(type t) (typeattribute t)", options).is_err());
    }

    #[test]
    fn unresolved_names_report_kind_and_statement() {
        let err = resolve_src("(type t)\n(allow t t (file (read)))").unwrap_err();
        assert_eq!(err.to_string(), "Failed to resolve class file in allow statement at test.cil:2");
    }

    #[test]
    fn permissions_include_the_common() {
        let db = resolve_src(
            "(common file (read write)) (class dir (search)) (classcommon dir file) \
             (type t) (allow t self (dir (write search)))",
        )
        .unwrap();
        let dir = db.classes.lookup("dir").unwrap();
        let Rule::Av { perms, target, .. } = &db.rules[0] else {
            panic!("expected an access rule");
        };
        assert_eq!(*target, Target::SelfType);
        assert_eq!(
            *perms,
            ClassPermsRef::Perms {
                class: dir,
                perms: SetExpr::List(vec![SetExpr::Item(1), SetExpr::Item(2)]),
            }
        );
    }

    #[test]
    fn attribute_use_is_recorded() {
        let db = resolve_src(
            "(class file (read)) (type t) (typeattribute a) (typeattribute n) (typeattribute s) \
             (allow a t (file (read))) (neverallow t n (file (read))) (allow s self (file (read)))",
        )
        .unwrap();
        let used = |name: &str| db.types[db.types.lookup(name).unwrap()].used;
        assert!(used("a").avrule);
        assert!(used("n").neverallow && !used("n").avrule);
        assert_eq!(used("s"), Default::default());
    }

    #[test]
    fn booleanif_rejects_declarations() {
        let err = resolve_src("(boolean b true) (booleanif b (true (type t)))").unwrap_err();
        assert_eq!(err.to_string(), "type is not allowed in booleanif at test.cil:1");
    }

    #[test]
    fn bounds_reject_attributes_and_rebinding() {
        let err = resolve_src("(type p) (typeattribute a) (typebounds p a)").unwrap_err();
        assert!(err.to_string().starts_with("Bounds child a is an attribute"));
        let err = resolve_src("(role p) (role q) (role c) (rolebounds p c) (rolebounds q c)").unwrap_err();
        assert!(err.to_string().starts_with("Role c already bound by parent"));
    }

    #[test]
    fn class_orders_are_collected() {
        let db = resolve_src("(class a ()) (class b ()) (classorder (a)) (classorder (unordered b))").unwrap();
        assert_eq!(db.order_statements.classes[0].items, vec![0]);
        assert_eq!(db.order_statements.unordered_classes[0].items, vec![1]);
    }

    #[test]
    fn permissionx_expressions_evaluate() {
        let expr = Expr::List(vec![
            Expr::Name("0x10".into()),
            Expr::Op(ExprOp::Range, vec![Expr::Name("0x20".into()), Expr::Name("0x22".into())]),
        ]);
        let bits = permx_bits(&expr).unwrap();
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![0x10, 0x20, 0x21, 0x22]);
        assert!(permx_bits(&Expr::Name("0x10000".into())).is_err());
        let all_but_one = permx_bits(&Expr::Op(ExprOp::Not, vec![Expr::Name("0".into())])).unwrap();
        assert_eq!(all_but_one.cardinality(), PERMX_LIMIT - 1);
    }

    #[test]
    fn nodecon_requires_one_family() {
        let src = "(user u) (role r) (type t) (sensitivity s0) (level lo (s0)) \
                   (nodecon (10.0.0.0) (::ffff) (u r t ((s0) (s0))))";
        let err = resolve_src(src).unwrap_err();
        assert!(err.to_string().starts_with("Nodecon ip address not in the same family"));
    }
}
