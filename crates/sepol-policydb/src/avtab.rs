//! Access vector table.
//!
//! The table maps `(source type, target type, target class, specified)` to
//! either a 32-bit permission word, a result type, or a 256-bit extended
//! permission set. Buckets are chains kept in ascending
//! `(source, target, class)` order so scans can stop as soon as the key
//! would have appeared.
//!
//! # Record Format (policy version >= 20)
//!
//! ```text
//! [source:u16][target:u16][class:u16][specified:u16] then one of
//!     [data:u32]                                        (plain kinds)
//!     [xspecified:u8][driver:u8][perms:u32 × 8]         (extended permission kinds)
//! ```
//!
//! Older policies use a legacy record of `count:u32` followed by `count`
//! u32 words: source, target, class, a specified mask, then one datum per
//! kind set in the mask.

use bytes::{BufMut, BytesMut};
use sepol_types::PolicyVersion;

use crate::reader::PolicyReader;
use crate::{PolicyDbError, Result};

// ============================================================================
// Specified bits
// ============================================================================

pub const AVTAB_ALLOWED: u16 = 0x0001;
pub const AVTAB_AUDITALLOW: u16 = 0x0002;
pub const AVTAB_AUDITDENY: u16 = 0x0004;
pub const AVTAB_NEVERALLOW: u16 = 0x0080;
pub const AVTAB_AV: u16 = AVTAB_ALLOWED | AVTAB_AUDITALLOW | AVTAB_AUDITDENY;
pub const AVTAB_TRANSITION: u16 = 0x0010;
pub const AVTAB_MEMBER: u16 = 0x0020;
pub const AVTAB_CHANGE: u16 = 0x0040;
pub const AVTAB_TYPE: u16 = AVTAB_TRANSITION | AVTAB_MEMBER | AVTAB_CHANGE;
pub const AVTAB_XPERMS_ALLOWED: u16 = 0x0100;
pub const AVTAB_XPERMS_AUDITALLOW: u16 = 0x0200;
pub const AVTAB_XPERMS_DONTAUDIT: u16 = 0x0400;
pub const AVTAB_XPERMS_NEVERALLOW: u16 = 0x0800;
pub const AVTAB_XPERMS: u16 = AVTAB_XPERMS_ALLOWED | AVTAB_XPERMS_AUDITALLOW | AVTAB_XPERMS_DONTAUDIT;
pub const AVTAB_ENABLED_OLD: u32 = 0x8000_0000;
pub const AVTAB_ENABLED: u16 = 0x8000;

/// Extended permission set covers one driver's function codes.
pub const AVTAB_XPERMS_IOCTLFUNCTION: u8 = 0x01;
/// Extended permission set covers whole drivers.
pub const AVTAB_XPERMS_IOCTLDRIVER: u8 = 0x02;

/// Upper bound on the number of hash slots.
pub const MAX_AVTAB_HASH_BITS: u32 = 20;
pub const MAX_AVTAB_HASH_BUCKETS: u32 = 1 << MAX_AVTAB_HASH_BITS;

/// Order in which datums of a legacy record map to kinds.
const SPEC_ORDER: [u16; 9] = [
    AVTAB_ALLOWED,
    AVTAB_AUDITDENY,
    AVTAB_AUDITALLOW,
    AVTAB_TRANSITION,
    AVTAB_CHANGE,
    AVTAB_MEMBER,
    AVTAB_XPERMS_ALLOWED,
    AVTAB_XPERMS_AUDITALLOW,
    AVTAB_XPERMS_DONTAUDIT,
];

/// Largest legacy record: count word excluded, four key words plus datums.
const LEGACY_MAX_ITEMS: u32 = 8;

// ============================================================================
// Keys and datums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvTabKey {
    pub source_type: u16,
    pub target_type: u16,
    pub target_class: u16,
    pub specified: u16,
}

impl AvTabKey {
    pub fn new(source_type: u16, target_type: u16, target_class: u16, specified: u16) -> Self {
        Self {
            source_type,
            target_type,
            target_class,
            specified,
        }
    }

    fn same_triple(&self, other: &AvTabKey) -> bool {
        self.source_type == other.source_type
            && self.target_type == other.target_type
            && self.target_class == other.target_class
    }

    /// True when `self` sorts strictly before `other` by triple.
    fn precedes(&self, other: &AvTabKey) -> bool {
        (self.source_type, self.target_type, self.target_class)
            < (other.source_type, other.target_type, other.target_class)
    }

    pub fn is_xperms(&self) -> bool {
        self.specified & AVTAB_XPERMS != 0
    }
}

/// A 256-bit extended permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExtendedPerms {
    pub specified: u8,
    pub driver: u8,
    pub perms: [u32; 8],
}

impl ExtendedPerms {
    pub fn set(&mut self, bit: u8) {
        self.perms[usize::from(bit >> 5)] |= 1 << (bit & 0x1f);
    }

    pub fn is_set(&self, bit: u8) -> bool {
        self.perms[usize::from(bit >> 5)] & (1 << (bit & 0x1f)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.perms.iter().all(|w| *w == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AvTabDatum {
    pub data: u32,
    pub xperms: Option<ExtendedPerms>,
}

impl AvTabDatum {
    pub fn data(data: u32) -> Self {
        Self { data, xperms: None }
    }

    pub fn xperms(xperms: ExtendedPerms) -> Self {
        Self {
            data: 0,
            xperms: Some(xperms),
        }
    }
}

/// Handle to an entry stored in an [`AvTab`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvTabNodeRef(usize);

#[derive(Debug, Clone)]
struct AvTabNode {
    key: AvTabKey,
    datum: AvTabDatum,
    next: Option<usize>,
}

// ============================================================================
// Hashing and sizing
// ============================================================================

/// Murmur3-style mix of the key triple, masked to the slot count.
pub fn avtab_hash(key: &AvTabKey, mask: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    const R1: u32 = 15;
    const R2: u32 = 13;
    const M: u32 = 5;
    const N: u32 = 0xe654_6b64;

    let mut hash: u32 = 0;
    let mut mix = |input: u16| {
        let mut v = u32::from(input);
        v = v.wrapping_mul(C1);
        v = v.rotate_left(R1);
        v = v.wrapping_mul(C2);
        hash ^= v;
        hash = hash.rotate_left(R2);
        hash = hash.wrapping_mul(M).wrapping_add(N);
    };
    mix(key.target_class);
    mix(key.target_type);
    mix(key.source_type);

    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;

    hash & mask
}

/// Slot count for a table expected to hold `nrules` entries.
pub fn slot_count(nrules: u32) -> u32 {
    if nrules == 0 {
        return 1;
    }
    let mut shift = 32 - nrules.leading_zeros();
    if shift > 2 {
        shift -= 2;
    }
    (1u32 << shift).min(MAX_AVTAB_HASH_BUCKETS)
}

// ============================================================================
// Table
// ============================================================================

/// Access vector table with ordered chains.
#[derive(Debug, Clone)]
pub struct AvTab {
    nodes: Vec<AvTabNode>,
    slots: Vec<Option<usize>>,
    mask: u32,
}

impl Default for AvTab {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl AvTab {
    /// Allocates a table sized for `nrules` entries.
    pub fn with_capacity(nrules: u32) -> Self {
        let nslot = slot_count(nrules);
        Self {
            nodes: Vec::with_capacity(nrules as usize),
            slots: vec![None; nslot as usize],
            mask: nslot - 1,
        }
    }

    pub fn nslot(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of entries.
    pub fn nel(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn link(&mut self, slot: usize, prev: Option<usize>, key: AvTabKey, datum: AvTabDatum) -> usize {
        let idx = self.nodes.len();
        let next = match prev {
            Some(p) => self.nodes[p].next,
            None => self.slots[slot],
        };
        self.nodes.push(AvTabNode { key, datum, next });
        match prev {
            Some(p) => self.nodes[p].next = Some(idx),
            None => self.slots[slot] = Some(idx),
        }
        idx
    }

    /// Inserts an entry, rejecting a second entry of an overlapping kind for
    /// the same triple. Extended permission kinds may repeat.
    pub fn insert(&mut self, key: AvTabKey, datum: AvTabDatum) -> Result<()> {
        let slot = avtab_hash(&key, self.mask) as usize;
        let specified = key.specified & !AVTAB_ENABLED;
        let mut prev = None;
        let mut cur = self.slots[slot];
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if key.same_triple(&node.key) && specified & node.key.specified != 0 {
                if specified & AVTAB_XPERMS != 0 {
                    break;
                }
                return Err(PolicyDbError::AlreadyExists);
            }
            if key.precedes(&node.key) {
                break;
            }
            prev = cur;
            cur = node.next;
        }
        self.link(slot, prev, key, datum);
        Ok(())
    }

    /// Inserts an entry even when one with the same key already exists,
    /// returning a handle to the new node.
    pub fn insert_nonunique(&mut self, key: AvTabKey, datum: AvTabDatum) -> AvTabNodeRef {
        let slot = avtab_hash(&key, self.mask) as usize;
        let specified = key.specified & !AVTAB_ENABLED;
        let mut prev = None;
        let mut cur = self.slots[slot];
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if key.same_triple(&node.key) && specified & node.key.specified != 0 {
                break;
            }
            if key.precedes(&node.key) {
                break;
            }
            prev = cur;
            cur = node.next;
        }
        AvTabNodeRef(self.link(slot, prev, key, datum))
    }

    /// Finds the node whose triple matches `key` and whose kind overlaps it.
    pub fn search_node(&self, key: &AvTabKey) -> Option<AvTabNodeRef> {
        let slot = avtab_hash(key, self.mask) as usize;
        let specified = key.specified & !AVTAB_ENABLED;
        let mut cur = self.slots[slot];
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if key.same_triple(&node.key) && specified & node.key.specified != 0 {
                return Some(AvTabNodeRef(idx));
            }
            if key.precedes(&node.key) {
                return None;
            }
            cur = node.next;
        }
        None
    }

    pub fn search(&self, key: &AvTabKey) -> Option<&AvTabDatum> {
        self.search_node(key).map(|node| &self.nodes[node.0].datum)
    }

    /// Continues a search after `node` for another entry of the same triple
    /// whose kind overlaps `specified`.
    pub fn search_node_next(&self, node: AvTabNodeRef, specified: u16) -> Option<AvTabNodeRef> {
        let origin = &self.nodes[node.0].key;
        let mut cur = self.nodes[node.0].next;
        while let Some(idx) = cur {
            let candidate = &self.nodes[idx];
            if origin.same_triple(&candidate.key) && specified & candidate.key.specified != 0 {
                return Some(AvTabNodeRef(idx));
            }
            if origin.precedes(&candidate.key) {
                return None;
            }
            cur = candidate.next;
        }
        None
    }

    pub fn key(&self, node: AvTabNodeRef) -> &AvTabKey {
        &self.nodes[node.0].key
    }

    pub fn datum(&self, node: AvTabNodeRef) -> &AvTabDatum {
        &self.nodes[node.0].datum
    }

    pub fn datum_mut(&mut self, node: AvTabNodeRef) -> &mut AvTabDatum {
        &mut self.nodes[node.0].datum
    }

    /// Entries in slot order, then chain order.
    pub fn iter(&self) -> impl Iterator<Item = (&AvTabKey, &AvTabDatum)> {
        self.slots.iter().flat_map(move |head| {
            let mut cur = *head;
            std::iter::from_fn(move || {
                let idx = cur?;
                let node = &self.nodes[idx];
                cur = node.next;
                Some((&node.key, &node.datum))
            })
        })
    }

    /// Applies `visit` to every entry, stopping at the first error.
    pub fn map<E>(
        &self,
        mut visit: impl FnMut(&AvTabKey, &AvTabDatum) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        for (key, datum) in self.iter() {
            visit(key, datum)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------------

    /// Writes one entry in the tagged format.
    pub fn write_item(key: &AvTabKey, datum: &AvTabDatum, version: PolicyVersion, buf: &mut BytesMut) -> Result<()> {
        if key.is_xperms() && !version.supports_xperms() {
            return Err(PolicyDbError::UnsupportedVersion {
                version: version.as_u32(),
                reason: "extended permission rules need version 30".to_string(),
            });
        }
        buf.put_u16_le(key.source_type);
        buf.put_u16_le(key.target_type);
        buf.put_u16_le(key.target_class);
        buf.put_u16_le(key.specified & !AVTAB_ENABLED);
        match (key.is_xperms(), datum.xperms) {
            (true, Some(xperms)) => {
                buf.put_u8(xperms.specified);
                buf.put_u8(xperms.driver);
                for word in xperms.perms {
                    buf.put_u32_le(word);
                }
            }
            (true, None) => {
                return Err(PolicyDbError::InvalidAvtab(
                    "extended permission entry without a permission set".to_string(),
                ));
            }
            (false, _) => buf.put_u32_le(datum.data),
        }
        Ok(())
    }

    /// Writes the whole table: entry count then every entry.
    pub fn write(&self, version: PolicyVersion, buf: &mut BytesMut) -> Result<()> {
        if !version.has_tagged_avtab() {
            return Err(PolicyDbError::UnsupportedVersion {
                version: version.as_u32(),
                reason: "legacy avtab records are read-only".to_string(),
            });
        }
        buf.put_u32_le(self.nel());
        self.map(|key, datum| Self::write_item(key, datum, version, buf))
    }

    // ------------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------------

    /// Reads one record, handing each decoded entry to `insert`.
    ///
    /// Legacy records can expand to several entries.
    pub fn read_item(
        reader: &mut PolicyReader<'_>,
        version: PolicyVersion,
        mut insert: impl FnMut(AvTabKey, AvTabDatum) -> Result<()>,
    ) -> Result<()> {
        if !version.has_tagged_avtab() {
            let count = reader.read_u32()?;
            if !(5..=LEGACY_MAX_ITEMS).contains(&count) {
                return Err(PolicyDbError::InvalidAvtab(format!(
                    "invalid item count {count}"
                )));
            }
            let mut words = Vec::with_capacity(count as usize);
            for _ in 0..count {
                words.push(reader.read_u32()?);
            }
            let narrow = |value: u32, what: &str| {
                u16::try_from(value).map_err(|_| {
                    PolicyDbError::InvalidAvtab(format!("truncated {what} {value}"))
                })
            };
            let source_type = narrow(words[0], "source type")?;
            let target_type = narrow(words[1], "target type")?;
            let target_class = narrow(words[2], "target class")?;
            let val = words[3];
            let enabled = if val & AVTAB_ENABLED_OLD != 0 { AVTAB_ENABLED } else { 0 };
            let kinds = (val & 0xffff) as u16;
            if kinds & (AVTAB_AV | AVTAB_TYPE) == 0 {
                return Err(PolicyDbError::InvalidAvtab("null entry".to_string()));
            }
            if kinds & AVTAB_AV != 0 && kinds & AVTAB_TYPE != 0 {
                return Err(PolicyDbError::InvalidAvtab(
                    "entry has both access vectors and types".to_string(),
                ));
            }
            let mut items = 4usize;
            for spec in SPEC_ORDER {
                if kinds & spec != 0 {
                    let data = *words.get(items).ok_or_else(|| {
                        PolicyDbError::InvalidAvtab(format!(
                            "entry only had {count} items"
                        ))
                    })?;
                    items += 1;
                    let key = AvTabKey::new(source_type, target_type, target_class, spec | enabled);
                    insert(key, AvTabDatum::data(data))?;
                }
            }
            if items != count as usize {
                return Err(PolicyDbError::InvalidAvtab(format!(
                    "entry only had {items} items, expected {count}"
                )));
            }
            return Ok(());
        }

        let source_type = reader.read_u16()?;
        let target_type = reader.read_u16()?;
        let target_class = reader.read_u16()?;
        let specified = reader.read_u16()?;
        let key = AvTabKey::new(source_type, target_type, target_class, specified);

        let set = SPEC_ORDER.iter().filter(|spec| specified & **spec != 0).count();
        if set != 1 {
            return Err(PolicyDbError::InvalidAvtab(
                "more than one specifier".to_string(),
            ));
        }

        if key.is_xperms() {
            if !version.supports_xperms() {
                return Err(PolicyDbError::InvalidAvtab(format!(
                    "policy version {version} does not support extended permissions rules and one was specified"
                )));
            }
            let mut xperms = ExtendedPerms {
                specified: reader.read_u8()?,
                driver: reader.read_u8()?,
                perms: [0; 8],
            };
            for word in &mut xperms.perms {
                *word = reader.read_u32()?;
            }
            insert(key, AvTabDatum::xperms(xperms))
        } else {
            insert(key, AvTabDatum::data(reader.read_u32()?))
        }
    }

    /// Reads a whole table written by [`AvTab::write`] or a legacy encoder.
    pub fn read(reader: &mut PolicyReader<'_>, version: PolicyVersion) -> Result<AvTab> {
        let nel = reader.read_u32()?;
        if nel == 0 {
            return Err(PolicyDbError::InvalidAvtab("table is empty".to_string()));
        }
        let mut table = AvTab::with_capacity(nel);
        for _ in 0..nel {
            Self::read_item(reader, version, |key, datum| {
                table.insert(key, datum).map_err(|err| match err {
                    PolicyDbError::AlreadyExists => {
                        PolicyDbError::InvalidAvtab("duplicate entry".to_string())
                    }
                    other => other,
                })
            })?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn key(spec: u16) -> AvTabKey {
        AvTabKey::new(1, 2, 3, spec)
    }

    #[test_case(AVTAB_ALLOWED, false; "allow rules are unique")]
    #[test_case(AVTAB_TRANSITION, false; "type transitions are unique")]
    #[test_case(AVTAB_XPERMS_ALLOWED, true; "extended allow may repeat")]
    #[test_case(AVTAB_XPERMS_DONTAUDIT, true; "extended dontaudit may repeat")]
    fn second_insert_of_same_kind(spec: u16, coexists: bool) {
        let mut table = AvTab::with_capacity(8);
        table.insert(key(spec), AvTabDatum::data(1)).unwrap();
        let second = table.insert(key(spec), AvTabDatum::data(2));
        assert_eq!(second.is_ok(), coexists);
        if !coexists {
            assert_eq!(second, Err(PolicyDbError::AlreadyExists));
            assert_eq!(table.search(&key(spec)).map(|d| d.data), Some(1));
        }
    }

    #[test]
    fn different_kinds_share_a_triple() {
        let mut table = AvTab::with_capacity(8);
        table.insert(key(AVTAB_ALLOWED), AvTabDatum::data(1)).unwrap();
        table.insert(key(AVTAB_AUDITALLOW), AvTabDatum::data(2)).unwrap();
        assert_eq!(table.nel(), 2);
        assert_eq!(table.search(&key(AVTAB_AUDITALLOW)).map(|d| d.data), Some(2));
    }

    #[test]
    fn enabled_bit_is_ignored_for_uniqueness() {
        let mut table = AvTab::with_capacity(8);
        table.insert(key(AVTAB_ALLOWED), AvTabDatum::data(1)).unwrap();
        assert!(table.insert(key(AVTAB_ALLOWED | AVTAB_ENABLED), AvTabDatum::data(1)).is_err());
    }

    #[test]
    fn nonunique_entries_are_chained() {
        let mut table = AvTab::with_capacity(4);
        let first = table.insert_nonunique(key(AVTAB_ALLOWED), AvTabDatum::data(1));
        let second = table.insert_nonunique(key(AVTAB_ALLOWED), AvTabDatum::data(2));
        assert_ne!(first, second);
        let found = table.search_node(&key(AVTAB_ALLOWED)).unwrap();
        let next = table.search_node_next(found, AVTAB_ALLOWED).unwrap();
        assert_ne!(found, next);
        assert!(table.search_node_next(next, AVTAB_ALLOWED).is_none());
        assert_eq!(table.nel(), 2);
    }

    #[test]
    fn chains_are_ordered_by_triple() {
        let mut table = AvTab::with_capacity(1);
        assert_eq!(table.nslot(), 2);
        for (s, t) in [(5u16, 1u16), (1, 9), (3, 3), (1, 2)] {
            table.insert(AvTabKey::new(s, t, 1, AVTAB_ALLOWED), AvTabDatum::data(0)).unwrap();
        }
        for head in &table.slots {
            let mut cur = *head;
            let mut last: Option<AvTabKey> = None;
            while let Some(idx) = cur {
                let k = table.nodes[idx].key;
                if let Some(prev) = last {
                    assert!(!k.precedes(&prev));
                }
                last = Some(k);
                cur = table.nodes[idx].next;
            }
        }
        assert!(table.search(&AvTabKey::new(2, 2, 1, AVTAB_ALLOWED)).is_none());
    }

    #[test_case(0 => 1; "empty")]
    #[test_case(1 => 2; "one rule")]
    #[test_case(4 => 2; "shift three minus two")]
    #[test_case(1000 => 256; "thousand rules")]
    #[test_case(u32::MAX => MAX_AVTAB_HASH_BUCKETS; "capped")]
    fn slot_sizing(nrules: u32) -> u32 {
        slot_count(nrules)
    }

    #[test]
    fn hash_stays_within_mask() {
        for s in 0..50u16 {
            let k = AvTabKey::new(s, s.wrapping_mul(7), 3, AVTAB_ALLOWED);
            assert!(avtab_hash(&k, 0xff) <= 0xff);
        }
    }

    #[test]
    fn tagged_table_reads_back() {
        let version = PolicyVersion::latest();
        let mut table = AvTab::with_capacity(4);
        table.insert(key(AVTAB_ALLOWED), AvTabDatum::data(0x5)).unwrap();
        let mut xperms = ExtendedPerms {
            specified: AVTAB_XPERMS_IOCTLFUNCTION,
            driver: 0x89,
            perms: [0; 8],
        };
        xperms.set(0x10);
        table.insert(key(AVTAB_XPERMS_ALLOWED), AvTabDatum::xperms(xperms)).unwrap();

        let mut buf = BytesMut::new();
        table.write(version, &mut buf).unwrap();
        let decoded = AvTab::read(&mut PolicyReader::new(&buf), version).unwrap();
        assert_eq!(decoded.nel(), 2);
        let x = decoded.search(&key(AVTAB_XPERMS_ALLOWED)).unwrap().xperms.unwrap();
        assert!(x.is_set(0x10));
        assert_eq!(x.driver, 0x89);
    }

    #[test]
    fn tagged_read_rejects_multiple_specifiers() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        for field in [1u16, 2, 3, AVTAB_ALLOWED | AVTAB_AUDITALLOW] {
            buf.put_u16_le(field);
        }
        buf.put_u32_le(0);
        let err = AvTab::read(&mut PolicyReader::new(&buf), PolicyVersion::latest()).unwrap_err();
        assert_eq!(err, PolicyDbError::InvalidAvtab("more than one specifier".to_string()));
    }

    #[test]
    fn xperms_need_version_30() {
        let mut buf = BytesMut::new();
        for field in [1u16, 2, 3, AVTAB_XPERMS_ALLOWED] {
            buf.put_u16_le(field);
        }
        let result = AvTab::read_item(&mut PolicyReader::new(&buf), PolicyVersion::new(29), |_, _| Ok(()));
        assert!(matches!(result, Err(PolicyDbError::InvalidAvtab(_))));
    }

    #[test]
    fn empty_table_is_rejected() {
        let buf = 0u32.to_le_bytes();
        assert!(AvTab::read(&mut PolicyReader::new(&buf), PolicyVersion::latest()).is_err());
    }

    #[test]
    fn legacy_record_expands_per_kind() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(6);
        for word in [4u32, 5, 6, u32::from(AVTAB_ALLOWED | AVTAB_AUDITDENY) | AVTAB_ENABLED_OLD, 0x11, 0x22] {
            buf.put_u32_le(word);
        }
        let mut seen = Vec::new();
        AvTab::read_item(&mut PolicyReader::new(&buf), PolicyVersion::new(19), |k, d| {
            seen.push((k.specified, d.data));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                (AVTAB_ALLOWED | AVTAB_ENABLED, 0x11),
                (AVTAB_AUDITDENY | AVTAB_ENABLED, 0x22)
            ]
        );
    }

    #[test]
    fn legacy_record_rejects_mixed_kinds() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(6);
        for word in [1u32, 1, 1, u32::from(AVTAB_ALLOWED | AVTAB_TRANSITION), 0, 0] {
            buf.put_u32_le(word);
        }
        let result = AvTab::read_item(&mut PolicyReader::new(&buf), PolicyVersion::new(19), |_, _| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn legacy_record_rejects_wide_types() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(5);
        for word in [0x1_0000u32, 1, 1, u32::from(AVTAB_ALLOWED), 0] {
            buf.put_u32_le(word);
        }
        let result = AvTab::read_item(&mut PolicyReader::new(&buf), PolicyVersion::new(19), |_, _| Ok(()));
        assert!(result.is_err());
    }
}
