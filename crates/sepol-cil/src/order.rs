//! Merging of partial ordering statements.
//!
//! `classorder`, `sidorder`, `sensitivityorder` and `categoryorder` may each
//! appear many times, every statement giving a fragment of the final order.
//! Fragments are merged into one list through their common items; a
//! fragment that shares nothing with the list built so far waits for a later
//! round. Merging stops when every fragment is placed or a round makes no
//! progress.

use tracing::debug;

use crate::db::{CatKind, Db, Id};
use crate::error::{CilError, Result, report_all};
use crate::log::Logger;
use crate::parser::SourceMap;
use crate::tree::NodeId;

/// One ordering statement, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedList {
    pub node: NodeId,
    pub items: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Class,
    Sid,
    Category,
    Sensitivity,
}

impl OrderKind {
    fn label(self) -> &'static str {
        match self {
            OrderKind::Class => "Class",
            OrderKind::Sid => "SID",
            OrderKind::Category => "Category",
            OrderKind::Sensitivity => "Sensitivity",
        }
    }

    fn statement(self) -> &'static str {
        match self {
            OrderKind::Class => "classorder",
            OrderKind::Sid => "sidorder",
            OrderKind::Category => "categoryorder",
            OrderKind::Sensitivity => "sensitivityorder",
        }
    }
}

/// Why a fragment could not be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// No usable anchor yet, or an ordering conflict; retry later.
    Deferred,
    /// The item is already part of the merged order.
    Duplicate(Id),
}

fn insert(merged: &mut Vec<Id>, at: usize, item: Id) -> std::result::Result<(), Failure> {
    if merged.contains(&item) {
        return Err(Failure::Duplicate(item));
    }
    merged.insert(at, item);
    Ok(())
}

/// Merges `new` into a copy of `old`.
fn merge(old: &[Id], new: &[Id]) -> std::result::Result<Vec<Id>, Failure> {
    let mut merged = old.to_vec();
    if new.is_empty() {
        return Ok(merged);
    }
    if old.is_empty() {
        for &item in new {
            let end = merged.len();
            insert(&mut merged, end, item)?;
        }
        return Ok(merged);
    }

    let anchor = new
        .iter()
        .enumerate()
        .find_map(|(n, item)| old.iter().position(|o| o == item).map(|o| (n, o)));
    let Some((nmatch, omatch)) = anchor else {
        return Err(Failure::Deferred);
    };
    if nmatch != 0 && omatch != 0 {
        return Err(Failure::Deferred);
    }

    // Items ahead of the anchor go in front of the whole list.
    for (at, &item) in new[..nmatch].iter().enumerate() {
        insert(&mut merged, at, item)?;
    }

    let mut ncurr = nmatch + 1;
    let mut ocurr = omatch + nmatch + 1;
    while ncurr < new.len() && ocurr < merged.len() {
        if new[ncurr] == merged[ocurr] {
            ncurr += 1;
            ocurr += 1;
            continue;
        }
        // Gap in the old list: old (a c), new (a b c).
        if let Some(offset) = new[ncurr + 1..].iter().position(|&n| n == merged[ocurr]) {
            let found = ncurr + 1 + offset;
            for &item in &new[ncurr..found] {
                insert(&mut merged, ocurr, item)?;
                ocurr += 1;
            }
            ocurr += 1;
            ncurr = found + 1;
            continue;
        }
        // Gap in the new list: old (a b c), new (a c).
        if let Some(offset) = merged[ocurr + 1..].iter().position(|&o| o == new[ncurr]) {
            ocurr += offset + 2;
            ncurr += 1;
            continue;
        }
        return Err(Failure::Deferred);
    }

    for &item in &new[ncurr.min(new.len())..] {
        let end = merged.len();
        insert(&mut merged, end, item)?;
    }
    Ok(merged)
}

/// Merges every fragment of one kind into a total order.
///
/// Items of `unordered` fragments that are not yet placed are appended at
/// the end; already placed ones are ignored with a warning.
pub fn merge_all(
    logger: &Logger,
    sources: &SourceMap,
    kind: OrderKind,
    lists: &[OrderedList],
    unordered: &[OrderedList],
    name: impl Fn(Id) -> String,
) -> Result<Vec<Id>> {
    let mut merged: Vec<Id> = Vec::new();
    let mut pending: Vec<Option<Failure>> = vec![Some(Failure::Deferred); lists.len()];

    loop {
        let mut changed = false;
        for (list, state) in lists.iter().zip(pending.iter_mut()) {
            if state.is_none() {
                continue;
            }
            match merge(&merged, &list.items) {
                Ok(result) => {
                    merged = result;
                    *state = None;
                    changed = true;
                }
                Err(failure) => *state = Some(failure),
            }
        }
        if pending.iter().all(Option::is_none) {
            break;
        }
        if !changed {
            let errors = lists
                .iter()
                .zip(&pending)
                .filter_map(|(list, state)| {
                    let message = match (*state)? {
                        Failure::Duplicate(id) => format!(
                            "{} {} has already been merged into the ordered list",
                            kind.label(),
                            name(id)
                        ),
                        Failure::Deferred => "Unable to merge ordered list".to_string(),
                    };
                    Some(CilError::semantic(message, sources.locate(list.node)))
                })
                .collect();
            return report_all(logger, errors).map(|()| Vec::new());
        }
    }

    for list in unordered {
        for &item in &list.items {
            if merged.contains(&item) {
                logger.warn(format!(
                    "Ignoring '{}' as it has already been declared in {}.",
                    name(item),
                    kind.statement()
                ));
                continue;
            }
            merged.push(item);
        }
    }

    Ok(merged)
}

/// Merges all four orders, checks that every item is placed and records
/// each item's position.
pub fn order_policy(logger: &Logger, sources: &SourceMap, db: &mut Db) -> Result<()> {
    let classes = merge_all(
        logger,
        sources,
        OrderKind::Class,
        &db.order_statements.classes,
        &db.order_statements.unordered_classes,
        |id| db.classes[id].name.clone(),
    )?;
    let sids = merge_all(logger, sources, OrderKind::Sid, &db.order_statements.sids, &[], |id| {
        db.sids[id].name.clone()
    })?;
    let sensitivities = merge_all(
        logger,
        sources,
        OrderKind::Sensitivity,
        &db.order_statements.sensitivities,
        &[],
        |id| db.sensitivities[id].name.clone(),
    )?;
    let categories = merge_all(
        logger,
        sources,
        OrderKind::Category,
        &db.order_statements.categories,
        &[],
        |id| db.categories[id].name.clone(),
    )?;

    for (position, &id) in classes.iter().enumerate() {
        db.classes[id].order = Some(position as u32);
    }
    for (position, &id) in sids.iter().enumerate() {
        db.sids[id].order = Some(position as u32);
    }
    for (position, &id) in sensitivities.iter().enumerate() {
        db.sensitivities[id].order = Some(position as u32);
    }
    for (position, &id) in categories.iter().enumerate() {
        db.categories[id].order = Some(position as u32);
    }

    let mut errors = Vec::new();
    let mut missing = |kind: OrderKind, name: &str, node: NodeId| {
        errors.push(CilError::semantic(
            format!("{} {name} not in {} statement", kind.label(), kind.statement()),
            sources.locate(node),
        ));
    };
    for (_, sid) in db.sids.iter().filter(|(_, s)| s.order.is_none()) {
        missing(OrderKind::Sid, &sid.name, sid.node);
    }
    for (_, class) in db.classes.iter().filter(|(_, c)| !c.is_map && c.order.is_none()) {
        missing(OrderKind::Class, &class.name, class.node);
    }
    for (_, cat) in db.categories.iter().filter(|(_, c)| c.kind == CatKind::Cat && c.order.is_none()) {
        missing(OrderKind::Category, &cat.name, cat.node);
    }
    for (_, sens) in db.sensitivities.iter().filter(|(_, s)| !s.is_alias && s.order.is_none()) {
        missing(OrderKind::Sensitivity, &sens.name, sens.node);
    }
    report_all(logger, errors)?;

    debug!(
        classes = classes.len(),
        sids = sids.len(),
        sensitivities = sensitivities.len(),
        categories = categories.len(),
        "merged ordering statements"
    );
    db.orders.classes = classes;
    db.orders.sids = sids;
    db.orders.sensitivities = sensitivities;
    db.orders.categories = categories;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogLevel, MemorySink};

    fn list(items: &[Id]) -> OrderedList {
        OrderedList {
            node: NodeId::from_index(0),
            items: items.to_vec(),
        }
    }

    fn run(lists: &[&[Id]], unordered: &[&[Id]]) -> Result<Vec<Id>> {
        let lists: Vec<_> = lists.iter().map(|l| list(l)).collect();
        let unordered: Vec<_> = unordered.iter().map(|l| list(l)).collect();
        merge_all(
            &Logger::default(),
            &SourceMap::default(),
            OrderKind::Class,
            &lists,
            &unordered,
            |id| format!("c{id}"),
        )
    }

    #[test]
    fn fragments_merge_through_common_items() {
        assert_eq!(run(&[&[0, 2], &[0, 1, 2]], &[]).unwrap(), vec![0, 1, 2]);
        assert_eq!(run(&[&[0, 1, 2], &[0, 2, 3]], &[]).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(run(&[&[1, 2], &[0, 1]], &[]).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn merge_appends_into_empty_and_after_the_anchor() {
        assert_eq!(merge(&[], &[4, 5]).unwrap(), vec![4, 5]);
        assert_eq!(merge(&[0], &[0, 1, 2]).unwrap(), vec![0, 1, 2]);
        assert!(matches!(merge(&[0], &[0, 1, 1]), Err(Failure::Duplicate(1))));
    }

    #[test]
    fn disconnected_fragment_waits_for_a_bridge() {
        assert_eq!(run(&[&[0, 1], &[2, 3], &[1, 2]], &[]).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unmergeable_fragments_fail() {
        let err = run(&[&[0, 1], &[2, 3]], &[]).unwrap_err();
        assert!(err.to_string().starts_with("Unable to merge ordered list"));
    }

    #[test]
    fn conflicting_orders_fail() {
        assert!(run(&[&[0, 1, 2], &[2, 1]], &[]).is_err());
    }

    #[test]
    fn duplicate_item_is_reported() {
        let err = run(&[&[0, 1, 0]], &[]).unwrap_err();
        assert!(err.to_string().starts_with("Class c0 has already been merged into the ordered list"));
    }

    #[test]
    fn unordered_items_append_and_skip_placed_ones() {
        let sink = MemorySink::new();
        let logger = Logger::new(LogLevel::Warn, sink.clone());
        let merged = merge_all(
            &logger,
            &SourceMap::default(),
            OrderKind::Class,
            &[list(&[0, 1])],
            &[list(&[3, 1])],
            |id| format!("c{id}"),
        )
        .unwrap();
        assert_eq!(merged, vec![0, 1, 3]);
        assert!(sink.contains(LogLevel::Warn, "Ignoring 'c1' as it has already been declared in classorder."));
    }
}
