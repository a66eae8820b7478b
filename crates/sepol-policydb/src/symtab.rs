//! Named symbol tables with value allocation.

use crate::Result;
use crate::hashtab::SymHashTab;

/// A datum that occupies a numbered slot in its symbol table.
pub trait Valued {
    /// The 1-based value the kernel uses to refer to this symbol.
    fn value(&self) -> u32;
}

/// A name table plus the count of primary values handed out.
///
/// Aliases share their target's value, so `nprim` can be smaller than the
/// number of entries.
#[derive(Debug)]
pub struct SymTab<V> {
    table: SymHashTab<V>,
    nprim: u32,
}

impl<V> SymTab<V> {
    pub fn new(size: usize) -> Self {
        Self {
            table: SymHashTab::with_symhash(size),
            nprim: 0,
        }
    }

    /// Reserves the next primary value.
    pub fn next_value(&mut self) -> u32 {
        self.nprim += 1;
        self.nprim
    }

    pub fn insert(&mut self, name: impl Into<String>, datum: V) -> Result<()> {
        self.table.insert(name.into(), datum)
    }

    pub fn search(&self, name: &str) -> Option<&V> {
        self.table.search(name)
    }

    pub fn search_mut(&mut self, name: &str) -> Option<&mut V> {
        self.table.search_mut(name)
    }

    pub fn nprim(&self) -> u32 {
        self.nprim
    }

    /// Number of names, aliases included.
    pub fn nel(&self) -> u32 {
        self.table.len() as u32
    }

    pub fn table(&self) -> &SymHashTab<V> {
        &self.table
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.table.iter()
    }
}

impl<V: Valued> SymTab<V> {
    /// Entries ordered by value, for value-to-name lookups.
    pub fn by_value(&self) -> Vec<(&str, &V)> {
        let mut entries: Vec<_> = self.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_by_key(|(name, datum)| (datum.value(), *name));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(u32);

    impl Valued for Plain {
        fn value(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn values_are_dense_and_one_based() {
        let mut symtab = SymTab::new(8);
        for name in ["c", "a", "b"] {
            let value = symtab.next_value();
            symtab.insert(name, Plain(value)).unwrap();
        }
        let ordered: Vec<_> = symtab.by_value().into_iter().map(|(n, _)| n).collect();
        assert_eq!(ordered, vec!["c", "a", "b"]);
        assert_eq!(symtab.nprim(), 3);
        assert_eq!(symtab.nel(), 3);
    }
}
