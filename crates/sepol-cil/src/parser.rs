//! Parse tree construction and source mapping.
//!
//! [`parse`] turns one source buffer into a subtree of a shared
//! [`ParseTree`]. Every file gets a synthetic `(<src_info> cil 1 <path>)`
//! list as its root, and every `;;* lms` / `;;* lmx` line mark opens a
//! nested `(<src_info> lms|lmx <line> <path>)` list that holds whatever
//! follows until the matching `;;* lme`.
//!
//! While building the tree the parser records a [`SourceMap`]: for every
//! node, the line it came from, its high-level offset and the source frame
//! that contains it. Diagnostics consult the map to print the CIL location
//! followed by each original high-level location.

use tracing::debug;

use crate::error::{CilError, Location, Result};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::log::Logger;
use crate::tree::{NodeId, Tree};

/// Deepest nesting of parentheses, and of active line marks.
pub const MAX_EXPR_DEPTH: usize = 4096;

/// First leaf of every source-information list.
pub const SRC_INFO: &str = "<src_info>";

pub const SRC_CIL: &str = "cil";
pub const SRC_LMS: &str = "lms";
pub const SRC_LMX: &str = "lmx";
pub const SRC_LME: &str = "lme";

/// Leaf nodes carry a value; list nodes carry `None`.
pub type ParseNode = Option<String>;

// ============================================================================
// Source map
// ============================================================================

/// How a source frame maps lines back to its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The CIL file itself.
    Cil,
    /// Each CIL line corresponds to one line of the original.
    Lms,
    /// The whole region expands from a single original line.
    Lmx,
}

#[derive(Debug, Clone)]
struct Frame {
    kind: SourceKind,
    path: String,
    hll_line: u32,
    hll_offset: u32,
    parent: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct NodeSource {
    frame: Option<u32>,
    opens: Option<u32>,
    line: u32,
    hll_offset: u32,
}

/// Side table from parse nodes to their original source positions.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    frames: Vec<Frame>,
    nodes: Vec<NodeSource>,
}

impl SourceMap {
    fn record(&mut self, id: NodeId, source: NodeSource) {
        debug_assert_eq!(id.index(), self.nodes.len());
        self.nodes.push(source);
    }

    fn child_frame(&self, parent: NodeId) -> Option<u32> {
        let parent = &self.nodes[parent.index()];
        parent.opens.or(parent.frame)
    }

    fn open_frame(&mut self, at: NodeId, kind: SourceKind, path: String, hll_line: u32) {
        let source = self.nodes[at.index()];
        let index = self.frames.len() as u32;
        self.frames.push(Frame {
            kind,
            path,
            hll_line,
            hll_offset: source.hll_offset,
            parent: source.frame,
        });
        self.nodes[at.index()].opens = Some(index);
    }

    /// Path of the CIL file containing `node`.
    pub fn cil_path(&self, node: NodeId) -> Option<&str> {
        let mut frame = self.nodes.get(node.index())?.frame;
        while let Some(index) = frame {
            let f = &self.frames[index as usize];
            if f.kind == SourceKind::Cil {
                return Some(&f.path);
            }
            frame = f.parent;
        }
        None
    }

    /// Resolves a node to its CIL location and high-level origins.
    pub fn locate(&self, node: NodeId) -> Location {
        let Some(source) = self.nodes.get(node.index()) else {
            return Location::default();
        };
        let mut location = Location {
            file: self.cil_path(node).unwrap_or("<unknown>").to_string(),
            line: source.line,
            hll: Vec::new(),
        };
        let mut hll_offset = source.hll_offset;
        let mut frame = source.frame;
        while let Some(index) = frame {
            let f = &self.frames[index as usize];
            match f.kind {
                SourceKind::Lms => {
                    let line = (f.hll_line + hll_offset).saturating_sub(f.hll_offset + 1);
                    location.hll.push((f.path.clone(), line));
                }
                SourceKind::Lmx => location.hll.push((f.path.clone(), f.hll_line)),
                SourceKind::Cil => {}
            }
            hll_offset = f.hll_offset;
            frame = f.parent;
        }
        location
    }
}

// ============================================================================
// Parse tree
// ============================================================================

/// The parse trees of every file in a compilation, under one root.
#[derive(Debug, Clone)]
pub struct ParseTree {
    tree: Tree<ParseNode>,
    sources: SourceMap,
}

impl Default for ParseTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseTree {
    pub fn new() -> Self {
        let tree = Tree::new(None);
        let mut sources = SourceMap::default();
        sources.record(
            tree.root(),
            NodeSource {
                frame: None,
                opens: None,
                line: 0,
                hll_offset: 0,
            },
        );
        Self { tree, sources }
    }

    pub fn tree(&self) -> &Tree<ParseNode> {
        &self.tree
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    pub fn into_sources(self) -> SourceMap {
        self.sources
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Leaf value of a node, `None` for lists.
    pub fn value(&self, node: NodeId) -> Option<&str> {
        self.tree.data(node).as_deref()
    }

    pub fn locate(&self, node: NodeId) -> Location {
        self.sources.locate(node)
    }

    fn add(&mut self, parent: NodeId, value: ParseNode, line: u32, hll_offset: u32) -> NodeId {
        let frame = self.sources.child_frame(parent);
        let id = self.tree.add_child(parent, value, line, hll_offset);
        self.sources.record(
            id,
            NodeSource {
                frame,
                opens: None,
                line,
                hll_offset,
            },
        );
        id
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a, 'src> {
    path: &'a str,
    lexer: Lexer<'src>,
    tree: &'a mut ParseTree,
    current: NodeId,
    paren_count: usize,
    hll_offset: u32,
    hll_expand: bool,
    hll_stack: Vec<(u32, bool)>,
}

impl Parser<'_, '_> {
    fn error(&self, message: impl Into<String>, line: u32) -> CilError {
        CilError::Parse {
            message: message.into(),
            line,
            path: self.path.to_string(),
        }
    }

    fn open_file(&mut self) {
        let root = self.tree.root();
        let list = self.tree.add(root, None, 0, 0);
        self.tree.add(list, Some(SRC_INFO.to_string()), 0, 0);
        self.tree.add(list, Some(SRC_CIL.to_string()), 0, 0);
        self.tree.add(list, Some("1".to_string()), 0, 0);
        self.tree.add(list, Some(self.path.to_string()), 0, 0);
        self.tree
            .sources
            .open_frame(list, SourceKind::Cil, self.path.to_string(), 1);
        self.current = list;
    }

    fn ascend(&mut self) {
        if let Some(parent) = self.tree.tree.parent(self.current) {
            self.current = parent;
        }
    }

    fn run(&mut self) -> Result<()> {
        self.open_file();
        loop {
            let tok = self.lexer.next_token();
            match tok.kind {
                TokenKind::HllLineMark => self.line_mark()?,
                TokenKind::OpenParen => {
                    self.paren_count += 1;
                    if self.paren_count > MAX_EXPR_DEPTH {
                        return Err(self.error(
                            format!("Number of open parenthesis exceeds limit of {MAX_EXPR_DEPTH}"),
                            tok.line,
                        ));
                    }
                    self.current = self.tree.add(self.current, None, tok.line, self.hll_offset);
                }
                TokenKind::CloseParen => {
                    if self.paren_count == 0 {
                        return Err(self.error("Close parenthesis without matching open", tok.line));
                    }
                    self.paren_count -= 1;
                    self.ascend();
                }
                TokenKind::QString | TokenKind::Symbol => {
                    if self.paren_count == 0 {
                        return Err(self.error("Symbol not inside parenthesis", tok.line));
                    }
                    let value = strip_quotes(&tok);
                    self.tree
                        .add(self.current, Some(value.to_string()), tok.line, self.hll_offset);
                }
                TokenKind::Newline => self.count_line(),
                TokenKind::Comment => {
                    let mut next = self.lexer.next_token();
                    while !matches!(next.kind, TokenKind::Newline | TokenKind::Eof) {
                        next = self.lexer.next_token();
                    }
                    self.count_line();
                    if next.kind == TokenKind::Eof {
                        return self.finish(next);
                    }
                }
                TokenKind::Eof => return self.finish(tok),
                TokenKind::Unknown => {
                    return Err(self.error(format!("Invalid token '{}'", tok.value), tok.line));
                }
            }
        }
    }

    fn count_line(&mut self) {
        if !self.hll_expand {
            self.hll_offset += 1;
        }
    }

    fn finish(&self, tok: Token<'_>) -> Result<()> {
        if self.paren_count > 0 {
            return Err(self.error("Open parenthesis without matching close", tok.line));
        }
        if !self.hll_stack.is_empty() {
            return Err(self.error(
                "High-level language line marker start without close",
                tok.line,
            ));
        }
        Ok(())
    }

    fn line_mark(&mut self) -> Result<()> {
        let tok = self.lexer.next_token();
        let kind = match (tok.kind, tok.value) {
            (TokenKind::Symbol, SRC_LME) => None,
            (TokenKind::Symbol, SRC_LMS) => Some(SourceKind::Lms),
            (TokenKind::Symbol, SRC_LMX) => Some(SourceKind::Lmx),
            _ => return Err(self.mark_error("Invalid line mark syntax", tok.line)),
        };

        match kind {
            None => {
                let Some((offset, expand)) = self.hll_stack.pop() else {
                    return Err(self.mark_error("Line mark end without start", tok.line));
                };
                let prev_expand = self.hll_expand;
                let prev_offset = self.hll_offset;
                self.hll_offset = offset;
                self.hll_expand = expand;
                if !self.hll_expand {
                    self.hll_offset = prev_offset;
                }
                if prev_expand && !self.hll_expand {
                    self.hll_offset += 1;
                }
                self.ascend();
            }
            Some(kind) => {
                self.hll_stack.push((self.hll_offset, self.hll_expand));
                if self.hll_stack.len() > MAX_EXPR_DEPTH {
                    return Err(self.mark_error(
                        format!("Number of active line marks exceeds limit of {MAX_EXPR_DEPTH}"),
                        tok.line,
                    ));
                }

                let offset = self.hll_offset;
                let list = self.tree.add(self.current, None, tok.line, offset);
                self.current = list;
                self.tree.add(list, Some(SRC_INFO.to_string()), tok.line, offset);
                self.tree.add(list, Some(tok.value.to_string()), tok.line, offset);

                let line_tok = self.lexer.next_token();
                if line_tok.kind != TokenKind::Symbol {
                    return Err(self.mark_error("Invalid line mark syntax", line_tok.line));
                }
                let Ok(hll_line) = line_tok.value.parse::<u32>() else {
                    return Err(self.mark_error("Invalid line mark syntax", line_tok.line));
                };
                self.tree
                    .add(list, Some(line_tok.value.to_string()), line_tok.line, offset);

                let path_tok = self.lexer.next_token();
                if !matches!(path_tok.kind, TokenKind::Symbol | TokenKind::QString) {
                    return Err(self.mark_error("Invalid line mark syntax", path_tok.line));
                }
                let hll_path = strip_quotes(&path_tok).to_string();
                self.tree
                    .add(list, Some(hll_path.clone()), path_tok.line, offset);
                self.tree.sources.open_frame(list, kind, hll_path, hll_line);

                self.hll_expand = kind == SourceKind::Lmx;
            }
        }

        let end = self.lexer.next_token();
        if end.kind != TokenKind::Newline {
            return Err(self.mark_error("Invalid line mark syntax", end.line));
        }
        self.count_line();
        Ok(())
    }

    fn mark_error(&self, message: impl Into<String>, line: u32) -> CilError {
        debug!(path = self.path, line, "problem with high-level line mark");
        self.error(message, line)
    }
}

fn strip_quotes<'a>(tok: &Token<'a>) -> &'a str {
    if tok.kind == TokenKind::QString && tok.value.len() >= 2 {
        &tok.value[1..tok.value.len() - 1]
    } else {
        tok.value
    }
}

/// Parses `src` and appends its tree under the root of `tree`.
///
/// `path` is used for diagnostics only.
pub fn parse(logger: &Logger, path: &str, src: &str, tree: &mut ParseTree) -> Result<()> {
    logger.info(format!("Parsing {path}"));
    let current = tree.root();
    let mut parser = Parser {
        path,
        lexer: Lexer::new(src),
        tree,
        current,
        paren_count: 0,
        hll_offset: 1,
        hll_expand: false,
        hll_stack: Vec::new(),
    };
    parser.run()?;
    debug!(path, nodes = parser.tree.tree.len(), "parsed file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(src: &str) -> Result<ParseTree> {
        let mut tree = ParseTree::new();
        parse(&Logger::default(), "test.cil", src, &mut tree)?;
        Ok(tree)
    }

    fn parse_err(src: &str) -> String {
        parse_str(src).unwrap_err().to_string()
    }

    /// Finds the first leaf with the given value.
    fn leaf(tree: &ParseTree, value: &str) -> NodeId {
        (0..tree.tree().len())
            .map(NodeId::from_index)
            .find(|id| tree.value(*id) == Some(value))
            .unwrap()
    }

    #[test]
    fn builds_file_root_and_statements() {
        let tree = parse_str("(type t)\n(allow t t (file (read)))\n").unwrap();
        let file = tree.tree().children(tree.root()).next().unwrap();
        let items: Vec<_> = tree.tree().children(file).collect();
        assert_eq!(items.len(), 6);
        assert_eq!(tree.value(items[0]), Some(SRC_INFO));
        assert_eq!(tree.value(items[1]), Some(SRC_CIL));
        assert_eq!(tree.value(items[3]), Some("test.cil"));
        assert_eq!(tree.value(items[4]), None);
        assert_eq!(tree.tree().node(items[5]).line, 2);
    }

    #[test]
    fn rejects_unmatched_open() {
        assert_eq!(
            parse_err("(a (b)"),
            "Open parenthesis without matching close at line 1 of test.cil"
        );
    }

    #[test]
    fn rejects_unmatched_close() {
        assert_eq!(
            parse_err("(a (b)))"),
            "Close parenthesis without matching open at line 1 of test.cil"
        );
    }

    #[test]
    fn rejects_line_mark_end_without_start() {
        assert!(parse_err(";;* lme\n").starts_with("Line mark end without start"));
    }

    #[test]
    fn rejects_unterminated_line_mark() {
        let err = parse_err(";;* lms 3 orig.te\n(type t)\n");
        assert!(err.starts_with("High-level language line marker start without close"));
    }

    #[test]
    fn rejects_bare_symbols_and_bad_tokens() {
        assert_eq!(parse_err("abc"), "Symbol not inside parenthesis at line 1 of test.cil");
        assert_eq!(parse_err("\n(a \u{1})"), "Invalid token '\u{1}' at line 2 of test.cil");
        assert!(parse_err(";;* lmz 1 a\n").starts_with("Invalid line mark syntax"));
        assert!(parse_err(";;* lms x a\n").starts_with("Invalid line mark syntax"));
        assert!(parse_err(";;* lms 1 a (b)\n").starts_with("Invalid line mark syntax"));
    }

    #[test]
    fn depth_is_bounded() {
        let deep = "(".repeat(MAX_EXPR_DEPTH + 1);
        assert!(parse_err(&deep).starts_with("Number of open parenthesis exceeds limit of 4096"));
    }

    #[test]
    fn quoted_values_are_stripped() {
        let tree = parse_str("(filecon \"\" any ())").unwrap();
        assert!((0..tree.tree().len()).any(|i| tree.value(NodeId::from_index(i)) == Some("")));
    }

    #[test]
    fn lms_lines_map_to_original_source() {
        let src = "(type a)\n;;* lms 10 orig.te\n(type b)\n; comment\n(type c)\n;;* lme\n(type d)\n";
        let tree = parse_str(src).unwrap();

        let b = tree.locate(leaf(&tree, "b"));
        assert_eq!(b.file, "test.cil");
        assert_eq!(b.line, 3);
        assert_eq!(b.hll, vec![("orig.te".to_string(), 10)]);

        let c = tree.locate(leaf(&tree, "c"));
        assert_eq!(c.line, 5);
        assert_eq!(c.hll, vec![("orig.te".to_string(), 12)]);

        let d = tree.locate(leaf(&tree, "d"));
        assert_eq!(d.line, 7);
        assert!(d.hll.is_empty());
    }

    #[test]
    fn lmx_regions_report_a_single_line() {
        let src = ";;* lms 1 outer.te\n;;* lmx 42 macro.te\n(type x)\n(type y)\n;;* lme\n(type z)\n;;* lme\n";
        let tree = parse_str(src).unwrap();

        let y = tree.locate(leaf(&tree, "y"));
        assert_eq!(y.line, 4);
        assert_eq!(
            y.hll,
            vec![("macro.te".to_string(), 42), ("outer.te".to_string(), 1)]
        );

        let z = tree.locate(leaf(&tree, "z"));
        assert_eq!(z.hll, vec![("outer.te".to_string(), 3)]);
    }

    #[test]
    fn files_are_sibling_roots() {
        let mut tree = ParseTree::new();
        let logger = Logger::default();
        parse(&logger, "a.cil", "(type a)", &mut tree).unwrap();
        parse(&logger, "b.cil", "(type b)", &mut tree).unwrap();
        assert_eq!(tree.tree().children(tree.root()).count(), 2);
        assert_eq!(tree.locate(leaf(&tree, "b")).file, "b.cil");
    }
}
