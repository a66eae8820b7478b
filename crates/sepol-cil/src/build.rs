//! Statement construction from the parse tree.
//!
//! Each top-level list of a source file becomes one [`Stmt`]. The builder
//! checks the shape of every statement against a small syntax pattern,
//! validates declared names and turns expressions into [`Expr`] trees.
//! Nothing is resolved here; a statement only has to be well formed.

use std::net::IpAddr;
use std::str::FromStr;

use sepol_types::{DefaultObject, DefaultRange, FileType, FsUseBehavior, HandleUnknown, PortProtocol};
use tracing::debug;

use crate::ast::{
    AvRuleKind, BranchKind, ClassPerms, CondBranch, ContextArg, ContextSpec, DefaultKind, Expr, ExprFlavor,
    ExprOp, IpArg, LevelArg, LevelSpec, PermXKind, PermissionXArg, PermissionXSpec, RangeArg, RangeSpec, Stmt,
    StmtKind, TypeRuleKind,
};
use crate::error::{CilError, Result};
use crate::log::Logger;
use crate::parser::{ParseTree, SRC_INFO};
use crate::tree::NodeId;

/// Longest accepted identifier, exclusive.
pub const MAX_NAME_LENGTH: usize = 2048;

/// Keywords of CIL features this compiler does not implement.
const UNSUPPORTED: &[&str] = &[
    "block",
    "blockabstract",
    "blockinherit",
    "in",
    "macro",
    "call",
    "optional",
    "tunable",
    "tunableif",
    "constrain",
    "mlsconstrain",
    "validatetrans",
    "mlsvalidatetrans",
    "expandtypeattribute",
    "selinuxuser",
    "selinuxuserdefault",
    "userprefix",
];

// ============================================================================
// Syntax patterns
// ============================================================================

const STRING: u8 = 1 << 0;
const LIST: u8 = 1 << 1;
const EMPTY_LIST: u8 = 1 << 2;
const N_LISTS: u8 = 1 << 3;
const N_STRINGS: u8 = 1 << 4;
const END: u8 = 1 << 5;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    Leaf,
    List,
    Empty,
}

// ============================================================================
// Names
// ============================================================================

/// Which reserved words a declared name must avoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Bool,
    Perm,
    User,
    Role,
    Type,
    Cat,
    PermissionX,
    Other,
}

fn is_reserved(name: &str, kind: NameKind) -> bool {
    let specific = match kind {
        NameKind::Bool => matches!(name, "eq" | "neq"),
        NameKind::Perm | NameKind::User | NameKind::Role => name == "all",
        NameKind::Type => matches!(name, "all" | "self"),
        NameKind::Cat | NameKind::PermissionX => matches!(name, "all" | "range"),
        NameKind::Other => return false,
    };
    specific || matches!(name, "and" | "or" | "not" | "xor")
}

/// Checks a declared name; the error text describes the first problem.
pub fn verify_name(name: &str, kind: NameKind, qualified: bool) -> std::result::Result<(), String> {
    if name.len() >= MAX_NAME_LENGTH {
        return Err(format!("Name length greater than max name length of {MAX_NAME_LENGTH}"));
    }
    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(format!("First character in {name} is not a letter"));
    }
    if let Some(bad) = chars.find(|&c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || (qualified && c == '.'))) {
        return Err(format!("Invalid character \"{bad}\" in {name}"));
    }
    if is_reserved(name, kind) {
        return Err(format!("Name {name} is a reserved word"));
    }
    Ok(())
}

// ============================================================================
// Builder
// ============================================================================

/// Options that change how statements are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Allow `.` inside declared names.
    pub qualified_names: bool,
}

struct Builder<'a> {
    parse: &'a ParseTree,
    options: BuildOptions,
}

/// Converts every file under the parse root into statements.
pub fn build(logger: &Logger, parse: &ParseTree, options: BuildOptions) -> Result<Vec<Stmt>> {
    let builder = Builder { parse, options };
    let mut stmts = Vec::new();
    for file in parse.tree().children(parse.root()) {
        builder.source_block(file, &mut stmts)?;
    }
    logger.info(format!("Built {} statements", stmts.len()));
    debug!(statements = stmts.len(), "built statements");
    Ok(stmts)
}

impl<'a> Builder<'a> {
    // ------------------------------------------------------------------------
    // Tree access
    // ------------------------------------------------------------------------

    fn value(&self, node: NodeId) -> Option<&'a str> {
        self.parse.value(node)
    }

    fn shape(&self, node: NodeId) -> Shape {
        if self.value(node).is_some() {
            Shape::Leaf
        } else if self.parse.tree().has_children(node) {
            Shape::List
        } else {
            Shape::Empty
        }
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.parse.tree().children(node).collect()
    }

    fn is_src_info(&self, node: NodeId) -> bool {
        self.parse
            .tree()
            .first_child(node)
            .is_some_and(|first| self.value(first) == Some(SRC_INFO))
    }

    /// Matches `nodes` against a syntax pattern.
    fn matches(&self, nodes: &[NodeId], syntax: &[u8]) -> bool {
        let mut i = 0;
        let mut n = 0;
        while i < syntax.len() && n < nodes.len() {
            let s = syntax[i];
            let shape = self.shape(nodes[n]);
            if (s & STRING != 0 && shape == Shape::Leaf)
                || (s & LIST != 0 && shape == Shape::List)
                || (s & EMPTY_LIST != 0 && shape == Shape::Empty)
            {
                n += 1;
                i += 1;
            } else if s & (N_LISTS | N_STRINGS) != 0 {
                let all = nodes[n..].iter().all(|&c| match self.shape(c) {
                    Shape::List => s & N_LISTS != 0,
                    Shape::Leaf => s & N_STRINGS != 0,
                    Shape::Empty => false,
                });
                if !all {
                    return false;
                }
                n = nodes.len();
                i += 1;
                break;
            } else {
                return false;
            }
        }
        i < syntax.len() && syntax[i] & END != 0 && n == nodes.len()
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    fn bad(&self, node: NodeId, keyword: &str, detail: impl std::fmt::Display) -> CilError {
        CilError::syntax(format!("{detail}: bad {keyword} statement"), self.parse.locate(node))
    }

    fn check(&self, node: NodeId, keyword: &str, args: &[NodeId], syntax: &[u8]) -> Result<()> {
        if self.matches(args, syntax) {
            Ok(())
        } else {
            Err(self.bad(node, keyword, "Invalid syntax"))
        }
    }

    // ------------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------------

    fn string(&self, node: NodeId) -> String {
        self.value(node).unwrap_or_default().to_string()
    }

    fn name(&self, node: NodeId, kind: NameKind) -> Result<String> {
        let name = self.string(node);
        verify_name(&name, kind, self.options.qualified_names).map_err(|message| CilError::InvalidName {
            message,
            location: Some(self.parse.locate(node)),
        })?;
        Ok(name)
    }

    /// Leaf values of a list; every child must be a leaf.
    fn strings(&self, stmt: NodeId, keyword: &str, list: NodeId) -> Result<Vec<String>> {
        self.children(list)
            .into_iter()
            .map(|c| match self.value(c) {
                Some(v) => Ok(v.to_string()),
                None => Err(self.bad(stmt, keyword, "Invalid syntax")),
            })
            .collect()
    }

    fn bool_value(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<bool> {
        match self.value(node) {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            _ => Err(self.bad(stmt, keyword, "Value must be either 'true' or 'false'")),
        }
    }

    fn integer<T: TryFrom<u64>>(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<T> {
        let text = self.value(node).unwrap_or_default();
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse::<u64>().ok(),
        };
        parsed
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.bad(stmt, keyword, format!("Invalid number '{text}'")))
    }

    /// A single number or a `(low high)` pair.
    fn number_range<T: TryFrom<u64> + Copy>(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<(T, T)> {
        if self.value(node).is_some() {
            let n = self.integer(stmt, keyword, node)?;
            return Ok((n, n));
        }
        let items = self.children(node);
        if !self.matches(&items, &[STRING, STRING, END]) {
            return Err(self.bad(stmt, keyword, "Invalid syntax"));
        }
        Ok((self.integer(stmt, keyword, items[0])?, self.integer(stmt, keyword, items[1])?))
    }

    fn ip(&self, stmt: NodeId, keyword: &str, text: &str) -> Result<IpAddr> {
        IpAddr::from_str(text).map_err(|_| self.bad(stmt, keyword, format!("Bad ip address or netmask: {text}")))
    }

    fn ip_arg(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<IpArg> {
        if let Some(name) = self.value(node) {
            return Ok(IpArg::Named(name.to_string()));
        }
        let items = self.children(node);
        if !self.matches(&items, &[STRING, END]) {
            return Err(self.bad(stmt, keyword, "Invalid syntax"));
        }
        Ok(IpArg::Anon(self.ip(stmt, keyword, &self.string(items[0]))?))
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    /// Expression rooted at `node`: a single name or a list.
    fn expr(&self, stmt: NodeId, keyword: &str, node: NodeId, flavor: ExprFlavor) -> Result<Expr> {
        match self.value(node) {
            Some(name) => {
                if let Some(op) = ExprOp::from_keyword(name) {
                    return Err(self.bad(stmt, keyword, format!("Operator ({op}) not in an expression")));
                }
                Ok(Expr::Name(name.to_string()))
            }
            None => self.expr_list(stmt, keyword, node, flavor),
        }
    }

    fn expr_list(&self, stmt: NodeId, keyword: &str, list: NodeId, flavor: ExprFlavor) -> Result<Expr> {
        let items = self.children(list);
        let Some(&head) = items.first() else {
            return Err(self.bad(stmt, keyword, "Invalid syntax"));
        };
        let op = self.value(head).and_then(ExprOp::from_keyword);
        let syntax: &[u8] = match op {
            None => &[N_STRINGS | N_LISTS, END],
            Some(ExprOp::Not) => &[STRING, STRING | LIST, END],
            Some(ExprOp::And | ExprOp::Or | ExprOp::Xor) => &[STRING, STRING | LIST, STRING | LIST, END],
            Some(op @ (ExprOp::Eq | ExprOp::Neq)) => {
                if flavor != ExprFlavor::Bool {
                    return Err(self.bad(stmt, keyword, format!("Invalid operator ({op}) for set expression")));
                }
                &[STRING, STRING | LIST, STRING | LIST, END]
            }
            Some(op @ ExprOp::All) => {
                if flavor == ExprFlavor::Bool {
                    return Err(self.bad(
                        stmt,
                        keyword,
                        format!("Invalid operator ({op}) for boolean or tunable expression"),
                    ));
                }
                &[STRING, END]
            }
            Some(op @ ExprOp::Range) => {
                if !matches!(flavor, ExprFlavor::Cat | ExprFlavor::PermX) {
                    return Err(self.bad(
                        stmt,
                        keyword,
                        format!("Operator ({op}) only valid for catset and permissionx expression"),
                    ));
                }
                &[STRING, STRING, STRING, END]
            }
        };
        if !self.matches(&items, syntax) {
            return Err(self.bad(stmt, keyword, "Invalid syntax"));
        }

        let operands = if op.is_some() { &items[1..] } else { &items[..] };
        let operands = operands
            .iter()
            .map(|&item| self.expr(stmt, keyword, item, flavor))
            .collect::<Result<Vec<_>>>()?;
        Ok(match op {
            Some(op) => Expr::Op(op, operands),
            None => Expr::List(operands),
        })
    }

    // ------------------------------------------------------------------------
    // Compound arguments
    // ------------------------------------------------------------------------

    fn classperms(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<ClassPerms> {
        if let Some(name) = self.value(node) {
            return Ok(ClassPerms::Named(name.to_string()));
        }
        let items = self.children(node);
        if !self.matches(&items, &[STRING, LIST, END]) {
            return Err(self.bad(stmt, keyword, "Bad class-permissions list syntax"));
        }
        Ok(ClassPerms::Anon {
            class: self.string(items[0]),
            perms: self.expr_list(stmt, keyword, items[1], ExprFlavor::Set)?,
        })
    }

    fn level_spec(&self, stmt: NodeId, keyword: &str, list: NodeId) -> Result<LevelSpec> {
        let items = self.children(list);
        if !self.matches(&items, &[STRING, LIST | END, END]) {
            return Err(self.bad(stmt, keyword, "Bad level"));
        }
        let cats = match items.get(1) {
            Some(&cats) => Some(self.expr_list(stmt, keyword, cats, ExprFlavor::Cat)?),
            None => None,
        };
        Ok(LevelSpec {
            sens: self.string(items[0]),
            cats,
        })
    }

    fn level_arg(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<LevelArg> {
        match self.value(node) {
            Some(name) => Ok(LevelArg::Named(name.to_string())),
            None => Ok(LevelArg::Anon(self.level_spec(stmt, keyword, node)?)),
        }
    }

    fn range_spec(&self, stmt: NodeId, keyword: &str, list: NodeId) -> Result<RangeSpec> {
        let items = self.children(list);
        if !self.matches(&items, &[STRING | LIST, STRING | LIST, END]) {
            return Err(self.bad(stmt, keyword, "Bad levelrange"));
        }
        Ok(RangeSpec {
            low: self.level_arg(stmt, keyword, items[0])?,
            high: self.level_arg(stmt, keyword, items[1])?,
        })
    }

    fn range_arg(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<RangeArg> {
        match self.value(node) {
            Some(name) => Ok(RangeArg::Named(name.to_string())),
            None => Ok(RangeArg::Anon(Box::new(self.range_spec(stmt, keyword, node)?))),
        }
    }

    fn context_spec(&self, stmt: NodeId, keyword: &str, list: NodeId) -> Result<ContextSpec> {
        let items = self.children(list);
        if !self.matches(&items, &[STRING, STRING, STRING, STRING | LIST, END]) {
            return Err(self.bad(stmt, keyword, "Bad context"));
        }
        Ok(ContextSpec {
            user: self.string(items[0]),
            role: self.string(items[1]),
            type_: self.string(items[2]),
            range: self.range_arg(stmt, keyword, items[3])?,
        })
    }

    fn context_arg(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<ContextArg> {
        match self.value(node) {
            Some(name) => Ok(ContextArg::Named(name.to_string())),
            None => Ok(ContextArg::Anon(Box::new(self.context_spec(stmt, keyword, node)?))),
        }
    }

    fn permissionx_spec(&self, stmt: NodeId, keyword: &str, list: NodeId) -> Result<PermissionXSpec> {
        let items = self.children(list);
        if !self.matches(&items, &[STRING, STRING, LIST, END]) {
            return Err(self.bad(stmt, keyword, "Bad permissionx content"));
        }
        let kind = match self.value(items[0]) {
            Some("ioctl") => PermXKind::Ioctl,
            other => {
                return Err(self.bad(
                    stmt,
                    keyword,
                    format!("Unknown permissionx kind, {}. Must be \"ioctl\"", other.unwrap_or_default()),
                ));
            }
        };
        Ok(PermissionXSpec {
            kind,
            class: self.string(items[1]),
            perms: self.expr_list(stmt, keyword, items[2], ExprFlavor::PermX)?,
        })
    }

    /// A class name or a list of class names.
    fn class_names(&self, stmt: NodeId, keyword: &str, node: NodeId) -> Result<Vec<String>> {
        match self.value(node) {
            Some(name) => Ok(vec![name.to_string()]),
            None => self.strings(stmt, keyword, node),
        }
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn source_block(&self, block: NodeId, out: &mut Vec<Stmt>) -> Result<()> {
        // (<src_info> kind line path stmt...)
        for child in self.children(block).into_iter().skip(4) {
            if self.is_src_info(child) {
                self.source_block(child, out)?;
            } else {
                out.push(self.statement(child)?);
            }
        }
        Ok(())
    }

    fn statement(&self, node: NodeId) -> Result<Stmt> {
        let items = self.children(node);
        let Some(keyword) = items.first().and_then(|&head| self.value(head)) else {
            return Err(CilError::syntax(
                "Keyword expected after open parenthesis",
                self.parse.locate(node),
            ));
        };
        let args = &items[1..];
        let kind = self.statement_kind(node, keyword, args)?;
        Ok(Stmt { node, kind })
    }

    fn statement_kind(&self, node: NodeId, kw: &str, args: &[NodeId]) -> Result<StmtKind> {
        let decl = |kind: NameKind| -> Result<String> {
            self.check(node, kw, args, &[STRING, END])?;
            self.name(args[0], kind)
        };
        let pair = || -> Result<(String, String)> {
            self.check(node, kw, args, &[STRING, STRING, END])?;
            Ok((self.string(args[0]), self.string(args[1])))
        };
        let arg = |i: usize| self.string(args[i]);

        let kind = match kw {
            // Types
            "type" => StmtKind::Type(decl(NameKind::Type)?),
            "typealias" => StmtKind::TypeAlias(decl(NameKind::Type)?),
            "typeattribute" => StmtKind::TypeAttribute(decl(NameKind::Type)?),
            "typealiasactual" => {
                let (alias, actual) = pair()?;
                StmtKind::TypeAliasActual { alias, actual }
            }
            "typeattributeset" | "roleattributeset" | "userattributeset" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                let attr = arg(0);
                let expr = self.expr(node, kw, args[1], ExprFlavor::Set)?;
                match kw {
                    "typeattributeset" => StmtKind::TypeAttributeSet { attr, expr },
                    "roleattributeset" => StmtKind::RoleAttributeSet { attr, expr },
                    _ => StmtKind::UserAttributeSet { attr, expr },
                }
            }
            "typebounds" | "rolebounds" | "userbounds" => {
                let (parent, child) = pair()?;
                match kw {
                    "typebounds" => StmtKind::TypeBounds { parent, child },
                    "rolebounds" => StmtKind::RoleBounds { parent, child },
                    _ => StmtKind::UserBounds { parent, child },
                }
            }
            "typepermissive" => {
                self.check(node, kw, args, &[STRING, END])?;
                StmtKind::TypePermissive(arg(0))
            }

            // Roles
            "role" => StmtKind::Role(decl(NameKind::Role)?),
            "roleattribute" => StmtKind::RoleAttribute(decl(NameKind::Role)?),
            "roletype" => {
                let (role, type_) = pair()?;
                StmtKind::RoleType { role, type_ }
            }
            "roleallow" => {
                let (source, target) = pair()?;
                StmtKind::RoleAllow { source, target }
            }
            "roletransition" => {
                self.check(node, kw, args, &[STRING, STRING, STRING, STRING, END])?;
                StmtKind::RoleTransition {
                    source: arg(0),
                    target: arg(1),
                    class: arg(2),
                    result: arg(3),
                }
            }

            // Users
            "user" => StmtKind::User(decl(NameKind::User)?),
            "userattribute" => StmtKind::UserAttribute(decl(NameKind::User)?),
            "userrole" => {
                let (user, role) = pair()?;
                StmtKind::UserRole { user, role }
            }
            "userlevel" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::UserLevel {
                    user: arg(0),
                    level: self.level_arg(node, kw, args[1])?,
                }
            }
            "userrange" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::UserRange {
                    user: arg(0),
                    range: self.range_arg(node, kw, args[1])?,
                }
            }

            // Classes and permissions
            "common" | "class" | "classmap" => {
                let perms_shape = if kw == "class" { LIST | EMPTY_LIST } else { LIST };
                self.check(node, kw, args, &[STRING, perms_shape, END])?;
                let name = self.name(args[0], NameKind::Other)?;
                let perms = self
                    .children(args[1])
                    .into_iter()
                    .map(|p| match self.value(p) {
                        Some(_) => self.name(p, NameKind::Perm),
                        None => Err(self.bad(node, kw, "Bad permission")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                match kw {
                    "common" => StmtKind::Common { name, perms },
                    "class" => StmtKind::Class { name, perms },
                    _ => StmtKind::ClassMap { name, perms },
                }
            }
            "classcommon" => {
                let (class, common) = pair()?;
                StmtKind::ClassCommon { class, common }
            }
            "classorder" | "sidorder" | "sensitivityorder" | "categoryorder" => {
                self.check(node, kw, args, &[LIST, END])?;
                let items = self.strings(node, kw, args[0])?;
                if let Some(pos) = items.iter().position(|i| i == "unordered") {
                    if kw != "classorder" || pos != 0 {
                        return Err(self.bad(
                            node,
                            kw,
                            "The 'unordered' keyword may only start a classorder list",
                        ));
                    }
                }
                match kw {
                    "classorder" => StmtKind::ClassOrder(items),
                    "sidorder" => StmtKind::SidOrder(items),
                    "sensitivityorder" => StmtKind::SensitivityOrder(items),
                    _ => StmtKind::CategoryOrder(items),
                }
            }
            "classpermission" => StmtKind::ClassPermission(decl(NameKind::Other)?),
            "classpermissionset" => {
                self.check(node, kw, args, &[STRING, LIST, END])?;
                StmtKind::ClassPermissionSet {
                    name: arg(0),
                    perms: self.classperms(node, kw, args[1])?,
                }
            }
            "classmapping" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST, END])?;
                StmtKind::ClassMapping {
                    map: arg(0),
                    perm: arg(1),
                    perms: self.classperms(node, kw, args[2])?,
                }
            }
            "defaultuser" | "defaultrole" | "defaulttype" => {
                self.check(node, kw, args, &[STRING | LIST, STRING, END])?;
                let classes = self.class_names(node, kw, args[0])?;
                let object = DefaultObject::from_keyword(&arg(1)).ok_or_else(|| {
                    self.bad(node, kw, format!("Expected either 'source' or 'target', got {}", arg(1)))
                })?;
                let kind = match kw {
                    "defaultuser" => DefaultKind::User,
                    "defaultrole" => DefaultKind::Role,
                    _ => DefaultKind::Type,
                };
                StmtKind::Default { kind, classes, object }
            }
            "defaultrange" => {
                self.check(node, kw, args, &[STRING | LIST, STRING, STRING | END, END])?;
                let classes = self.class_names(node, kw, args[0])?;
                let object = arg(1);
                let which = args.get(2).map(|&n| self.string(n));
                let range = DefaultRange::from_keywords(&object, which.as_deref())
                    .ok_or_else(|| self.bad(node, kw, "Invalid default range"))?;
                StmtKind::DefaultRange { classes, range }
            }

            // MLS
            "sensitivity" => StmtKind::Sensitivity(decl(NameKind::Other)?),
            "sensitivityalias" => StmtKind::SensitivityAlias(decl(NameKind::Other)?),
            "sensitivityaliasactual" => {
                let (alias, actual) = pair()?;
                StmtKind::SensitivityAliasActual { alias, actual }
            }
            "category" => StmtKind::Category(decl(NameKind::Cat)?),
            "categoryalias" => StmtKind::CategoryAlias(decl(NameKind::Cat)?),
            "categoryaliasactual" => {
                let (alias, actual) = pair()?;
                StmtKind::CategoryAliasActual { alias, actual }
            }
            "categoryset" => {
                self.check(node, kw, args, &[STRING, LIST, END])?;
                StmtKind::CategorySet {
                    name: self.name(args[0], NameKind::Cat)?,
                    expr: self.expr_list(node, kw, args[1], ExprFlavor::Cat)?,
                }
            }
            "sensitivitycategory" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::SensitivityCategory {
                    sens: arg(0),
                    cats: self.expr(node, kw, args[1], ExprFlavor::Cat)?,
                }
            }
            "level" => {
                self.check(node, kw, args, &[STRING, LIST, END])?;
                StmtKind::Level {
                    name: self.name(args[0], NameKind::Other)?,
                    level: self.level_spec(node, kw, args[1])?,
                }
            }
            "levelrange" => {
                self.check(node, kw, args, &[STRING, LIST, END])?;
                StmtKind::LevelRange {
                    name: self.name(args[0], NameKind::Other)?,
                    range: self.range_spec(node, kw, args[1])?,
                }
            }

            // Booleans
            "boolean" => {
                self.check(node, kw, args, &[STRING, STRING, END])?;
                StmtKind::Boolean {
                    name: self.name(args[0], NameKind::Bool)?,
                    value: self.bool_value(node, kw, args[1])?,
                }
            }
            "booleanif" => {
                self.check(node, kw, args, &[STRING | LIST, LIST, LIST | END, END])?;
                let expr = self.expr(node, kw, args[0], ExprFlavor::Bool)?;
                if let Expr::List(items) = &expr {
                    if items.len() != 1 {
                        return Err(self.bad(node, kw, "Invalid syntax"));
                    }
                }
                let branches = args[1..]
                    .iter()
                    .map(|&branch| self.branch(branch))
                    .collect::<Result<Vec<_>>>()?;
                StmtKind::BooleanIf { expr, branches }
            }

            // Rules
            "allow" | "auditallow" | "dontaudit" | "neverallow" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST, END])?;
                StmtKind::AvRule {
                    kind: av_kind(kw),
                    source: arg(0),
                    target: arg(1),
                    perms: self.classperms(node, kw, args[2])?,
                }
            }
            "allowx" | "auditallowx" | "dontauditx" | "neverallowx" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST, END])?;
                let perms = match self.value(args[2]) {
                    Some(name) => PermissionXArg::Named(name.to_string()),
                    None => PermissionXArg::Anon(self.permissionx_spec(node, kw, args[2])?),
                };
                StmtKind::AvRuleX {
                    kind: av_kind(kw.trim_end_matches('x')),
                    source: arg(0),
                    target: arg(1),
                    perms,
                }
            }
            "permissionx" => {
                self.check(node, kw, args, &[STRING, LIST, END])?;
                StmtKind::PermissionX {
                    name: self.name(args[0], NameKind::PermissionX)?,
                    spec: self.permissionx_spec(node, kw, args[1])?,
                }
            }
            "typetransition" => {
                self.check(node, kw, args, &[STRING, STRING, STRING, STRING, STRING | END, END])?;
                if args.len() == 5 {
                    StmtKind::NameTypeTransition {
                        source: arg(0),
                        target: arg(1),
                        class: arg(2),
                        object_name: arg(3),
                        result: arg(4),
                    }
                } else {
                    StmtKind::TypeRule {
                        kind: TypeRuleKind::Transition,
                        source: arg(0),
                        target: arg(1),
                        class: arg(2),
                        result: arg(3),
                    }
                }
            }
            "typechange" | "typemember" => {
                self.check(node, kw, args, &[STRING, STRING, STRING, STRING, END])?;
                StmtKind::TypeRule {
                    kind: if kw == "typechange" {
                        TypeRuleKind::Change
                    } else {
                        TypeRuleKind::Member
                    },
                    source: arg(0),
                    target: arg(1),
                    class: arg(2),
                    result: arg(3),
                }
            }
            "rangetransition" => {
                self.check(node, kw, args, &[STRING, STRING, STRING, STRING | LIST, END])?;
                StmtKind::RangeTransition {
                    source: arg(0),
                    target: arg(1),
                    class: arg(2),
                    range: self.range_arg(node, kw, args[3])?,
                }
            }

            // SIDs and contexts
            "sid" => StmtKind::Sid(decl(NameKind::Other)?),
            "sidcontext" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::SidContext {
                    sid: arg(0),
                    context: self.context_arg(node, kw, args[1])?,
                }
            }
            "context" => {
                self.check(node, kw, args, &[STRING, LIST, END])?;
                StmtKind::Context {
                    name: self.name(args[0], NameKind::Other)?,
                    spec: self.context_spec(node, kw, args[1])?,
                }
            }

            // Labeling
            "filecon" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST | EMPTY_LIST, END])?;
                let file_type = FileType::from_keyword(&arg(1))
                    .ok_or_else(|| self.bad(node, kw, format!("Invalid file type \"{}\"", arg(1))))?;
                let context = match self.shape(args[2]) {
                    Shape::Empty => None,
                    _ => Some(self.context_arg(node, kw, args[2])?),
                };
                StmtKind::FileCon {
                    path: arg(0),
                    file_type,
                    context,
                }
            }
            "fsuse" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST, END])?;
                let behavior = FsUseBehavior::from_keyword(&arg(0))
                    .ok_or_else(|| self.bad(node, kw, format!("Invalid fsuse type \"{}\"", arg(0))))?;
                StmtKind::FsUse {
                    behavior,
                    fs: arg(1),
                    context: self.context_arg(node, kw, args[2])?,
                }
            }
            "genfscon" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST, END])?;
                StmtKind::GenfsCon {
                    fs: arg(0),
                    path: arg(1),
                    context: self.context_arg(node, kw, args[2])?,
                }
            }
            "portcon" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, STRING | LIST, END])?;
                let protocol = PortProtocol::from_keyword(&arg(0))
                    .ok_or_else(|| self.bad(node, kw, format!("Invalid protocol \"{}\"", arg(0))))?;
                let (low, high) = self.number_range::<u32>(node, kw, args[1])?;
                if low > u32::from(u16::MAX) || high > u32::from(u16::MAX) {
                    return Err(self.bad(node, kw, "Port value out of range"));
                }
                StmtKind::PortCon {
                    protocol,
                    low,
                    high,
                    context: self.context_arg(node, kw, args[2])?,
                }
            }
            "nodecon" => {
                self.check(node, kw, args, &[STRING | LIST, STRING | LIST, STRING | LIST, END])?;
                StmtKind::NodeCon {
                    addr: self.ip_arg(node, kw, args[0])?,
                    mask: self.ip_arg(node, kw, args[1])?,
                    context: self.context_arg(node, kw, args[2])?,
                }
            }
            "netifcon" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, STRING | LIST, END])?;
                StmtKind::NetifCon {
                    name: arg(0),
                    if_context: self.context_arg(node, kw, args[1])?,
                    packet_context: self.context_arg(node, kw, args[2])?,
                }
            }
            "ipaddr" => {
                self.check(node, kw, args, &[STRING, STRING, END])?;
                StmtKind::IpAddr {
                    name: self.name(args[0], NameKind::Other)?,
                    addr: self.ip(node, kw, &arg(1))?,
                }
            }
            "ibpkeycon" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, STRING | LIST, END])?;
                let (low, high) = self.number_range::<u32>(node, kw, args[1])?;
                StmtKind::IbPkeyCon {
                    subnet_prefix: arg(0),
                    low,
                    high,
                    context: self.context_arg(node, kw, args[2])?,
                }
            }
            "ibendportcon" => {
                self.check(node, kw, args, &[STRING, STRING, STRING | LIST, END])?;
                StmtKind::IbEndportCon {
                    dev_name: arg(0),
                    port: self.integer(node, kw, args[1])?,
                    context: self.context_arg(node, kw, args[2])?,
                }
            }
            "pirqcon" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::PirqCon {
                    pirq: self.integer(node, kw, args[0])?,
                    context: self.context_arg(node, kw, args[1])?,
                }
            }
            "iomemcon" => {
                self.check(node, kw, args, &[STRING | LIST, STRING | LIST, END])?;
                let (low, high) = self.number_range::<u64>(node, kw, args[0])?;
                StmtKind::IomemCon {
                    low,
                    high,
                    context: self.context_arg(node, kw, args[1])?,
                }
            }
            "ioportcon" => {
                self.check(node, kw, args, &[STRING | LIST, STRING | LIST, END])?;
                let (low, high) = self.number_range::<u32>(node, kw, args[0])?;
                StmtKind::IoportCon {
                    low,
                    high,
                    context: self.context_arg(node, kw, args[1])?,
                }
            }
            "pcidevicecon" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::PciDeviceCon {
                    device: self.integer(node, kw, args[0])?,
                    context: self.context_arg(node, kw, args[1])?,
                }
            }
            "devicetreecon" => {
                self.check(node, kw, args, &[STRING, STRING | LIST, END])?;
                StmtKind::DeviceTreeCon {
                    path: arg(0),
                    context: self.context_arg(node, kw, args[1])?,
                }
            }

            // Global settings
            "handleunknown" => {
                self.check(node, kw, args, &[STRING, END])?;
                let value = HandleUnknown::from_str(&arg(0)).map_err(|_| {
                    self.bad(node, kw, format!("Unknown handleunknown value: {}", arg(0)))
                })?;
                StmtKind::HandleUnknown(value)
            }
            "mls" => {
                self.check(node, kw, args, &[STRING, END])?;
                StmtKind::Mls(self.bool_value(node, kw, args[0])?)
            }
            "policycap" => {
                self.check(node, kw, args, &[STRING, END])?;
                StmtKind::PolicyCap(self.name(args[0], NameKind::Other)?)
            }

            other if UNSUPPORTED.contains(&other) => {
                return Err(CilError::syntax(
                    format!("{other} statements are not supported"),
                    self.parse.locate(node),
                ));
            }
            other => {
                return Err(CilError::syntax(format!("Invalid keyword {other}"), self.parse.locate(node)));
            }
        };
        Ok(kind)
    }

    fn branch(&self, node: NodeId) -> Result<CondBranch> {
        let items = self.children(node);
        let kind = match items.first().and_then(|&head| self.value(head)) {
            Some("true") => BranchKind::True,
            Some("false") => BranchKind::False,
            Some(other) => BranchKind::Other(other.to_string()),
            None => BranchKind::Other(String::new()),
        };
        let body = items
            .iter()
            .skip(1)
            .map(|&stmt| self.statement(stmt))
            .collect::<Result<Vec<_>>>()?;
        Ok(CondBranch { node, kind, body })
    }
}

fn av_kind(keyword: &str) -> AvRuleKind {
    match keyword {
        "auditallow" => AvRuleKind::AuditAllow,
        "dontaudit" => AvRuleKind::DontAudit,
        "neverallow" => AvRuleKind::NeverAllow,
        _ => AvRuleKind::Allow,
    }
}
