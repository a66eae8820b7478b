//! Fixed-size chained hash tables.
//!
//! A [`HashTab`] is created with a bucket count, a hash function and a key
//! comparison function. Each bucket keeps its chain sorted by the comparison
//! function so lookups can stop early. The table never resizes; callers pick
//! the bucket count from the expected cardinality of what they store.
//!
//! Iteration order is bucket order, then chain order. It is deterministic
//! for a given hash function and size but unrelated to insertion order.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::{PolicyDbError, Result};

/// Hash function over the borrowed key form.
pub type HashFn<Q> = fn(&Q) -> u32;
/// Total order over the borrowed key form.
pub type CmpFn<Q> = fn(&Q, &Q) -> Ordering;

/// A chained hash table with caller-supplied hashing and ordering.
///
/// `Q` is the borrowed form used for lookups, so a `HashTab<String, V, str>`
/// can be searched with `&str`.
pub struct HashTab<K, V, Q: ?Sized = K>
where
    K: Borrow<Q>,
{
    buckets: Vec<Vec<(K, V)>>,
    hash: HashFn<Q>,
    cmp: CmpFn<Q>,
    nel: usize,
    _key: PhantomData<fn(&Q)>,
}

/// String-keyed table using [`symhash`].
pub type SymHashTab<V> = HashTab<String, V, str>;

/// The rolling shift-xor hash used for symbol names.
pub fn symhash(key: &str) -> u32 {
    key.bytes()
        .fold(0u32, |val, byte| val.rotate_left(4) ^ u32::from(byte))
}

fn str_cmp(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

impl<V> HashTab<String, V, str> {
    /// Creates a symbol table with `size` buckets.
    pub fn with_symhash(size: usize) -> Self {
        HashTab::new(symhash, str_cmp, size)
    }
}

impl<K, V, Q> HashTab<K, V, Q>
where
    K: Borrow<Q>,
    Q: ?Sized,
{
    /// Creates a table with `size` buckets (at least one).
    pub fn new(hash: HashFn<Q>, cmp: CmpFn<Q>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            hash,
            cmp,
            nel: 0,
            _key: PhantomData,
        }
    }

    fn bucket_of(&self, key: &Q) -> usize {
        (self.hash)(key) as usize % self.buckets.len()
    }

    /// Position of `key` in its chain, or where it would be inserted.
    fn locate(&self, bucket: usize, key: &Q) -> std::result::Result<usize, usize> {
        let chain = &self.buckets[bucket];
        for (idx, (existing, _)) in chain.iter().enumerate() {
            match (self.cmp)(key, existing.borrow()) {
                Ordering::Equal => return Ok(idx),
                Ordering::Less => return Err(idx),
                Ordering::Greater => {}
            }
        }
        Err(chain.len())
    }

    /// Inserts a new entry. An existing entry for the key is left untouched.
    pub fn insert(&mut self, key: K, datum: V) -> Result<()> {
        let bucket = self.bucket_of(key.borrow());
        match self.locate(bucket, key.borrow()) {
            Ok(_) => Err(PolicyDbError::AlreadyExists),
            Err(pos) => {
                self.buckets[bucket].insert(pos, (key, datum));
                self.nel += 1;
                Ok(())
            }
        }
    }

    /// Removes the entry for `key` and hands it to `destroy`.
    pub fn remove(&mut self, key: &Q, destroy: impl FnOnce(K, V)) -> Result<()> {
        let bucket = self.bucket_of(key);
        match self.locate(bucket, key) {
            Ok(pos) => {
                let (k, v) = self.buckets[bucket].remove(pos);
                self.nel -= 1;
                destroy(k, v);
                Ok(())
            }
            Err(_) => Err(PolicyDbError::NotFound),
        }
    }

    pub fn search(&self, key: &Q) -> Option<&V> {
        let bucket = self.bucket_of(key);
        self.locate(bucket, key)
            .ok()
            .map(|pos| &self.buckets[bucket][pos].1)
    }

    pub fn search_mut(&mut self, key: &Q) -> Option<&mut V> {
        let bucket = self.bucket_of(key);
        match self.locate(bucket, key) {
            Ok(pos) => Some(&mut self.buckets[bucket][pos].1),
            Err(_) => None,
        }
    }

    /// Applies `visit` to every entry, stopping at the first error.
    pub fn map<E>(&self, mut visit: impl FnMut(&K, &V) -> std::result::Result<(), E>) -> std::result::Result<(), E> {
        for (key, datum) in self.iter() {
            visit(key, datum)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|chain| chain.iter().map(|(k, v)| (k, v)))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.buckets
            .iter_mut()
            .flat_map(|chain| chain.iter_mut().map(|(_, v)| v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.nel
    }

    pub fn is_empty(&self) -> bool {
        self.nel == 0
    }

    /// Bucket count fixed at creation.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Length of the longest chain, for diagnostics.
    pub fn max_chain_len(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

impl<K, V, Q> std::fmt::Debug for HashTab<K, V, Q>
where
    K: Borrow<Q> + std::fmt::Debug,
    V: std::fmt::Debug,
    Q: ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn symhash_matches_known_values() {
        assert_eq!(symhash(""), 0);
        assert_eq!(symhash("a"), 0x61);
        assert_eq!(symhash("ab"), (0x61 << 4) ^ 0x62);
    }

    #[test]
    fn duplicate_insert_keeps_first_datum() {
        let mut table = SymHashTab::with_symhash(4);
        table.insert("file".to_string(), 1u32).unwrap();
        assert_eq!(
            table.insert("file".to_string(), 2),
            Err(PolicyDbError::AlreadyExists)
        );
        assert_eq!(table.search("file"), Some(&1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_calls_destructor() {
        let mut table = SymHashTab::with_symhash(4);
        table.insert("dir".to_string(), 7u32).unwrap();
        let mut destroyed = None;
        table
            .remove("dir", |k, v| destroyed = Some((k, v)))
            .unwrap();
        assert_eq!(destroyed, Some(("dir".to_string(), 7)));
        assert_eq!(table.remove("dir", |_, _| {}), Err(PolicyDbError::NotFound));
        assert!(table.is_empty());
    }

    #[test]
    fn map_short_circuits_on_first_error() {
        let mut table = SymHashTab::with_symhash(1);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            table.insert((*name).to_string(), i).unwrap();
        }
        let mut visited = 0;
        let result = table.map(|key, _| {
            visited += 1;
            if key == "b" {
                Err(key.clone())
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("b".to_string()));
        assert_eq!(visited, 2, "single bucket chains are sorted by key");
    }

    #[test]
    fn chains_stay_sorted_in_a_single_bucket() {
        let mut table = SymHashTab::with_symhash(1);
        for name in ["zeta", "alpha", "mid"] {
            table.insert(name.to_string(), ()).unwrap();
        }
        let keys: Vec<_> = table.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
        assert_eq!(table.max_chain_len(), 3);
    }

    proptest! {
        #[test]
        fn search_returns_what_was_inserted(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<u32>(), 0..50),
            size in 1usize..64,
        ) {
            let mut table = SymHashTab::with_symhash(size);
            for (k, v) in &entries {
                table.insert(k.clone(), *v).unwrap();
            }
            prop_assert_eq!(table.len(), entries.len());
            for (k, v) in &entries {
                prop_assert_eq!(table.search(k.as_str()), Some(v));
                prop_assert_eq!(table.insert(k.clone(), v.wrapping_add(1)), Err(PolicyDbError::AlreadyExists));
                prop_assert_eq!(table.search(k.as_str()), Some(v));
            }
        }
    }
}
