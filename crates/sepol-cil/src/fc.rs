//! `file_contexts` output.
//!
//! Lines follow the order the kernel tools expect: regular expressions
//! before plain paths, then by the length of the literal stem.

use std::cmp::Ordering;
use std::fmt::Write as _;

use sepol_types::FileType;

use crate::db::{ContextRef, Db, FileCon};
use crate::error::{CilError, Result};
use crate::parser::SourceMap;
use crate::post::{EvalLevel, eval_range};

/// How specific a path pattern is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSpecificity {
    /// The path contains regular expression metacharacters.
    pub meta: bool,
    /// Characters before the first metacharacter.
    pub stem_len: usize,
    /// Characters, with escape sequences counted once.
    pub str_len: usize,
}

pub fn path_specificity(path: &str) -> PathSpecificity {
    let mut spec = PathSpecificity {
        meta: false,
        stem_len: 0,
        str_len: 0,
    };
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '.' | '^' | '$' | '?' | '*' | '+' | '|' | '[' | '(' | '{' => spec.meta = true,
            _ => {
                if c == '\\' && chars.next().is_none() {
                    if !spec.meta {
                        spec.stem_len += 1;
                    }
                    spec.str_len += 1;
                    return spec;
                }
                if !spec.meta {
                    spec.stem_len += 1;
                }
            }
        }
        spec.str_len += 1;
    }
    spec
}

fn file_type_rank(file_type: FileType) -> u8 {
    match file_type {
        FileType::Any => 0,
        FileType::File => 1,
        FileType::Dir => 2,
        FileType::Char => 3,
        FileType::Block => 4,
        FileType::Socket => 5,
        FileType::Pipe => 6,
        FileType::Symlink => 7,
    }
}

pub fn compare_filecons(a: &FileCon, b: &FileCon) -> Ordering {
    let (sa, sb) = (path_specificity(&a.path), path_specificity(&b.path));
    sb.meta
        .cmp(&sa.meta)
        .then(sa.stem_len.cmp(&sb.stem_len))
        .then(sa.str_len.cmp(&sb.str_len))
        .then(file_type_rank(a.file_type).cmp(&file_type_rank(b.file_type)))
        .then_with(|| a.path.cmp(&b.path))
}

/// Renders a level as `sens:cats`, folding runs of three or more
/// categories into `first.last`.
pub fn level_string(db: &Db, level: &EvalLevel) -> String {
    let mut out = db.sensitivities[level.sens].name.clone();
    let name = |bit: u32| {
        db.orders
            .categories
            .get(bit as usize)
            .map_or("", |&id| db.categories[id].name.as_str())
    };

    let mut runs: Vec<(u32, u32)> = Vec::new();
    for bit in level.cats.iter() {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == bit => *last = bit,
            _ => runs.push((bit, bit)),
        }
    }
    for (n, (first, last)) in runs.into_iter().enumerate() {
        out.push(if n == 0 { ':' } else { ',' });
        match last - first {
            0 => out.push_str(name(first)),
            1 => {
                let _ = write!(out, "{},{}", name(first), name(last));
            }
            _ => {
                let _ = write!(out, "{}.{}", name(first), name(last));
            }
        }
    }
    out
}

fn context_string(db: &Db, sources: &SourceMap, con: &FileCon, context: &ContextRef, mls: bool) -> Result<String> {
    let invalid = |message: String| CilError::semantic(message, sources.locate(con.node));
    let spec = db
        .context_spec(context)
        .ok_or_else(|| invalid("Invalid context".to_string()))?;
    let mut out = format!(
        "{}:{}:{}",
        db.users[spec.user].name, db.roles[spec.role].name, db.types[spec.type_].name
    );
    if mls {
        let (low, high) = eval_range(db, &spec.range).map_err(invalid)?;
        out.push(':');
        out.push_str(&level_string(db, &low));
        if low != high {
            out.push('-');
            out.push_str(&level_string(db, &high));
        }
    }
    Ok(out)
}

/// Renders every `filecon` in its sorted order.
pub fn file_contexts(db: &Db, sources: &SourceMap, mls: bool) -> Result<String> {
    let mut out = String::new();
    for con in &db.labeling.filecons {
        out.push_str(&con.path);
        if con.file_type != FileType::Any {
            out.push('\t');
            out.push_str(con.file_type.fc_flag());
        }
        out.push('\t');
        match &con.context {
            Some(context) => out.push_str(&context_string(db, sources, con, context, mls)?),
            None => out.push_str("<<none>>"),
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeId;
    use test_case::test_case;

    #[test_case("/usr/bin/ls", false, 11, 11 ; "plain path")]
    #[test_case("/usr/lib(/.*)?", true, 8, 14 ; "regex suffix")]
    #[test_case("/a\\.b", false, 4, 4 ; "escaped dot is literal")]
    #[test_case("/dev/\\", false, 6, 6 ; "trailing backslash")]
    fn specificity(path: &str, meta: bool, stem_len: usize, str_len: usize) {
        let spec = path_specificity(path);
        assert_eq!((spec.meta, spec.stem_len, spec.str_len), (meta, stem_len, str_len));
    }

    fn filecon(path: &str, file_type: FileType) -> FileCon {
        FileCon {
            node: NodeId::from_index(0),
            path: path.to_string(),
            file_type,
            context: None,
        }
    }

    #[test]
    fn regex_paths_come_before_literal_paths() {
        let mut cons = vec![
            filecon("/usr/bin/ls", FileType::File),
            filecon("/usr(/.*)?", FileType::Any),
            filecon("/usr/bin(/.*)?", FileType::Any),
            filecon("/etc", FileType::Dir),
            filecon("/etc", FileType::Any),
        ];
        cons.sort_by(compare_filecons);
        let order: Vec<(&str, FileType)> = cons.iter().map(|c| (c.path.as_str(), c.file_type)).collect();
        assert_eq!(
            order,
            vec![
                ("/usr(/.*)?", FileType::Any),
                ("/usr/bin(/.*)?", FileType::Any),
                ("/etc", FileType::Any),
                ("/etc", FileType::Dir),
                ("/usr/bin/ls", FileType::File),
            ]
        );
    }
}
