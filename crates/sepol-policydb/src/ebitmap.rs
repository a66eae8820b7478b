//! Extensible sparse bitmaps.
//!
//! An [`Ebitmap`] stores a set of small integers (type, role, category
//! values minus one) as an ordered run of 64-bit chunks. Chunks whose word
//! would be zero are never stored, so an empty range costs nothing.
//!
//! # Invariants
//!
//! - Chunk start bits are multiples of [`MAPSIZE`] and strictly increasing
//! - No chunk holds an all-zero word
//! - `highbit` is the last chunk's start bit plus [`MAPSIZE`] (0 when empty)
//!
//! # Serialized Format
//!
//! ```text
//! [mapsize:u32=64][highbit:u32][count:u32] then count × [startbit:u32][map:u64]
//! ```
//!
//! All integers are little-endian.

use std::fmt;

use bytes::{BufMut, BytesMut};
use sepol_types::MAPSIZE;

use crate::reader::PolicyReader;
use crate::{PolicyDbError, Result};

const MAPBITS: u32 = MAPSIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Chunk {
    startbit: u32,
    map: u64,
}

/// A sparse, arbitrarily long bitmap.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Ebitmap {
    chunks: Vec<Chunk>,
    highbit: u32,
}

fn chunk_start(bit: u32) -> u32 {
    bit - (bit % MAPBITS)
}

fn mask_below(limit: u32) -> u64 {
    if limit >= MAPBITS {
        u64::MAX
    } else {
        (1u64 << limit) - 1
    }
}

impl Ebitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// One past the last representable bit of the last stored chunk.
    pub fn highbit(&self) -> u32 {
        self.highbit
    }

    fn refresh_highbit(&mut self) {
        self.highbit = self.chunks.last().map_or(0, |c| c.startbit + MAPBITS);
    }

    fn find(&self, startbit: u32) -> std::result::Result<usize, usize> {
        self.chunks.binary_search_by_key(&startbit, |c| c.startbit)
    }

    pub fn get_bit(&self, bit: u32) -> bool {
        match self.find(chunk_start(bit)) {
            Ok(idx) => self.chunks[idx].map & (1u64 << (bit % MAPBITS)) != 0,
            Err(_) => false,
        }
    }

    /// Sets or clears `bit`. Clearing the last bit of a chunk drops the chunk.
    pub fn set_bit(&mut self, bit: u32, value: bool) {
        let start = chunk_start(bit);
        let mask = 1u64 << (bit % MAPBITS);
        match self.find(start) {
            Ok(idx) => {
                if value {
                    self.chunks[idx].map |= mask;
                } else {
                    self.chunks[idx].map &= !mask;
                    if self.chunks[idx].map == 0 {
                        self.chunks.remove(idx);
                        self.refresh_highbit();
                    }
                }
            }
            Err(idx) => {
                if value {
                    self.chunks.insert(
                        idx,
                        Chunk {
                            startbit: start,
                            map: mask,
                        },
                    );
                    self.refresh_highbit();
                }
            }
        }
    }

    /// Merges two bitmaps chunk by chunk, treating absent chunks as zero.
    fn combine(&self, other: &Ebitmap, op: impl Fn(u64, u64) -> u64) -> Ebitmap {
        let mut out = Vec::with_capacity(self.chunks.len().max(other.chunks.len()));
        let (mut i, mut j) = (0, 0);
        while i < self.chunks.len() || j < other.chunks.len() {
            let a = self.chunks.get(i);
            let b = other.chunks.get(j);
            let (startbit, left, right) = match (a, b) {
                (Some(a), Some(b)) if a.startbit == b.startbit => {
                    i += 1;
                    j += 1;
                    (a.startbit, a.map, b.map)
                }
                (Some(a), Some(b)) if a.startbit < b.startbit => {
                    i += 1;
                    (a.startbit, a.map, 0)
                }
                (Some(_), Some(b)) | (None, Some(b)) => {
                    j += 1;
                    (b.startbit, 0, b.map)
                }
                (Some(a), None) => {
                    i += 1;
                    (a.startbit, a.map, 0)
                }
                (None, None) => break,
            };
            let map = op(left, right);
            if map != 0 {
                out.push(Chunk { startbit, map });
            }
        }
        let mut result = Ebitmap {
            chunks: out,
            highbit: 0,
        };
        result.refresh_highbit();
        result
    }

    pub fn and(&self, other: &Ebitmap) -> Ebitmap {
        self.combine(other, |a, b| a & b)
    }

    pub fn or(&self, other: &Ebitmap) -> Ebitmap {
        self.combine(other, |a, b| a | b)
    }

    pub fn xor(&self, other: &Ebitmap) -> Ebitmap {
        self.combine(other, |a, b| a ^ b)
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &Ebitmap) {
        *self = self.or(other);
    }

    /// Complement within `[0, maxbit)`.
    pub fn not(&self, maxbit: u32) -> Ebitmap {
        let mut out = Vec::new();
        let mut start = 0;
        while start < maxbit {
            let existing = self.find(start).map_or(0, |idx| self.chunks[idx].map);
            let map = !existing & mask_below(maxbit - start);
            if map != 0 {
                out.push(Chunk {
                    startbit: start,
                    map,
                });
            }
            start += MAPBITS;
        }
        let mut result = Ebitmap {
            chunks: out,
            highbit: 0,
        };
        result.refresh_highbit();
        result
    }

    /// Bits of `self` not in `other`, limited to `[0, maxbit)`.
    pub fn andnot(&self, other: &Ebitmap, maxbit: u32) -> Ebitmap {
        self.and(&other.not(maxbit))
    }

    /// True when every bit set in `other` is also set in `self`.
    pub fn contains(&self, other: &Ebitmap) -> bool {
        if other.highbit > self.highbit {
            return false;
        }
        other.chunks.iter().all(|theirs| match self.find(theirs.startbit) {
            Ok(idx) => theirs.map & !self.chunks[idx].map == 0,
            Err(_) => false,
        })
    }

    /// True when the two bitmaps share at least one bit.
    pub fn match_any(&self, other: &Ebitmap) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.chunks.len() && j < other.chunks.len() {
            let (a, b) = (self.chunks[i], other.chunks[j]);
            match a.startbit.cmp(&b.startbit) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    if a.map & b.map != 0 {
                        return true;
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        false
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> u32 {
        self.chunks.iter().map(|c| c.map.count_ones()).sum()
    }

    pub fn highest_set_bit(&self) -> Option<u32> {
        self.chunks
            .last()
            .map(|c| c.startbit + (MAPBITS - 1 - c.map.leading_zeros()))
    }

    /// Iterates the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.chunks.iter().flat_map(|c| {
            (0..MAPBITS)
                .filter(move |bit| c.map & (1u64 << bit) != 0)
                .map(move |bit| c.startbit + bit)
        })
    }

    /// Serializes into `buf` in kernel format.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(MAPSIZE);
        buf.put_u32_le(self.highbit);
        buf.put_u32_le(self.chunks.len() as u32);
        for chunk in &self.chunks {
            buf.put_u32_le(chunk.startbit);
            buf.put_u64_le(chunk.map);
        }
    }

    /// Decodes and validates a serialized bitmap.
    pub fn read(reader: &mut PolicyReader<'_>) -> Result<Ebitmap> {
        let mapsize = reader.read_u32()?;
        let highbit = reader.read_u32()?;
        let count = reader.read_u32()?;

        if mapsize != MAPSIZE {
            return Err(PolicyDbError::InvalidEbitmap(format!(
                "map size {mapsize} does not match expected {MAPSIZE}"
            )));
        }
        if highbit % MAPSIZE != 0 {
            return Err(PolicyDbError::InvalidEbitmap(format!(
                "high bit {highbit} is not a multiple of the map size"
            )));
        }
        if highbit > 0 && count == 0 {
            return Err(PolicyDbError::InvalidEbitmap(
                "high bit set but no chunks present".to_string(),
            ));
        }

        let mut chunks: Vec<Chunk> = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let startbit = reader.read_u32()?;
            if startbit % MAPSIZE != 0 {
                return Err(PolicyDbError::InvalidEbitmap(format!(
                    "start bit {startbit} is not a multiple of the map size"
                )));
            }
            if u64::from(startbit) + u64::from(MAPSIZE) > u64::from(highbit) {
                return Err(PolicyDbError::InvalidEbitmap(format!(
                    "start bit {startbit} beyond high bit {highbit}"
                )));
            }
            let map = reader.read_u64()?;
            if map == 0 {
                return Err(PolicyDbError::InvalidEbitmap(format!(
                    "null map at start bit {startbit}"
                )));
            }
            if let Some(prev) = chunks.last() {
                if startbit <= prev.startbit {
                    return Err(PolicyDbError::InvalidEbitmap(format!(
                        "start bit {startbit} out of order after {}",
                        prev.startbit
                    )));
                }
            }
            chunks.push(Chunk { startbit, map });
        }

        if let Some(last) = chunks.last() {
            if last.startbit + MAPSIZE != highbit {
                return Err(PolicyDbError::InvalidEbitmap(format!(
                    "high bit {highbit} does not match last chunk at {}",
                    last.startbit
                )));
            }
        }

        Ok(Ebitmap { chunks, highbit })
    }
}

impl FromIterator<u32> for Ebitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut map = Ebitmap::new();
        for bit in iter {
            map.set_bit(bit, true);
        }
        map
    }
}

impl fmt::Debug for Ebitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn bits() -> impl Strategy<Value = BTreeSet<u32>> {
        prop::collection::btree_set(0u32..400, 0..40)
    }

    fn to_map(set: &BTreeSet<u32>) -> Ebitmap {
        set.iter().copied().collect()
    }

    #[test]
    fn set_and_clear_maintain_highbit() {
        let mut map = Ebitmap::new();
        map.set_bit(3, true);
        map.set_bit(130, true);
        assert_eq!(map.highbit(), 192);
        map.set_bit(130, false);
        assert_eq!(map.highbit(), 64);
        map.set_bit(3, false);
        assert!(map.is_empty());
        assert_eq!(map.highbit(), 0);
    }

    #[test]
    fn not_respects_maxbit() {
        let map: Ebitmap = [1u32, 2].into_iter().collect();
        let inverted = map.not(5);
        assert_eq!(inverted.iter().collect::<Vec<_>>(), vec![0, 3, 4]);
        assert_eq!(map.andnot(&[2u32].into_iter().collect(), 5).iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn highest_set_bit() {
        assert_eq!(Ebitmap::new().highest_set_bit(), None);
        let map: Ebitmap = [5u32, 70, 300].into_iter().collect();
        assert_eq!(map.highest_set_bit(), Some(300));
    }

    #[test]
    fn read_rejects_null_map() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(64);
        buf.put_u32_le(64);
        buf.put_u32_le(1);
        buf.put_u32_le(0);
        buf.put_u64_le(0);
        let err = Ebitmap::read(&mut PolicyReader::new(&buf)).unwrap_err();
        assert!(matches!(err, PolicyDbError::InvalidEbitmap(_)));
    }

    #[test]
    fn read_rejects_unordered_chunks() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(64);
        buf.put_u32_le(192);
        buf.put_u32_le(2);
        buf.put_u32_le(128);
        buf.put_u64_le(1);
        buf.put_u32_le(64);
        buf.put_u64_le(1);
        assert!(Ebitmap::read(&mut PolicyReader::new(&buf)).is_err());
    }

    #[test]
    fn written_bitmap_reads_back() {
        let map: Ebitmap = [0u32, 63, 64, 1000].into_iter().collect();
        let mut buf = BytesMut::new();
        map.write(&mut buf);
        let decoded = Ebitmap::read(&mut PolicyReader::new(&buf)).unwrap();
        assert_eq!(decoded, map);
    }

    proptest! {
        #[test]
        fn or_is_exact_union(a in bits(), b in bits()) {
            let union = to_map(&a).or(&to_map(&b));
            let expected: BTreeSet<u32> = a.union(&b).copied().collect();
            prop_assert_eq!(union.iter().collect::<BTreeSet<_>>(), expected);
            prop_assert!(union.cardinality() >= to_map(&a).cardinality());
            prop_assert!(union.cardinality() >= to_map(&b).cardinality());
        }

        #[test]
        fn and_is_contained_in_both(a in bits(), b in bits()) {
            let (ma, mb) = (to_map(&a), to_map(&b));
            let both = ma.and(&mb);
            prop_assert!(ma.contains(&both));
            prop_assert!(mb.contains(&both));
            prop_assert_eq!(both.is_empty(), !ma.match_any(&mb));
        }

        #[test]
        fn containment_is_reflexive(a in bits()) {
            let ma = to_map(&a);
            prop_assert!(ma.contains(&ma));
        }

        #[test]
        fn containment_checks_every_bit(a in bits(), extra in 0u32..400) {
            let ma = to_map(&a);
            let mut bigger = ma.clone();
            bigger.set_bit(extra, true);
            prop_assert!(bigger.contains(&ma));
            prop_assert_eq!(ma.contains(&bigger), a.contains(&extra));
        }

        #[test]
        fn xor_matches_symmetric_difference(a in bits(), b in bits()) {
            let expected: BTreeSet<u32> = a.symmetric_difference(&b).copied().collect();
            prop_assert_eq!(to_map(&a).xor(&to_map(&b)).iter().collect::<BTreeSet<_>>(), expected);
        }
    }
}
