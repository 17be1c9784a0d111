//! Dense bit sets over synthetic storage cells, used by the load/store
//! eliminator's data-flow passes.

use crate::data_structures::FrameIx;
use std::{cmp, fmt};

//=============================================================================
// CellBitSet

const BLOCK_SIZE: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub struct CellBitSet {
    bits: Vec<u64>,
}

impl CellBitSet {
    pub fn empty() -> Self {
        Self { bits: Vec::new() }
    }

    /// Return a new CellBitSet with one cell set.
    pub fn unit(item: FrameIx) -> Self {
        let mut s = CellBitSet::empty();
        s.insert(item);
        s
    }

    pub fn card(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Set the cell to 1.
    pub fn insert(&mut self, item: FrameIx) {
        let (ix, offset) = CellBitSet::locate(item);
        if ix >= self.bits.len() {
            self.bits.resize(ix + 1, 0);
        }
        self.bits[ix] |= 1 << offset;
    }

    /// If the cell is set, clear it to 0.
    /// Do nothing otherwise.
    pub fn delete(&mut self, item: FrameIx) {
        let (ix, offset) = CellBitSet::locate(item);
        if ix < self.bits.len() {
            self.bits[ix] &= !(1 << offset);
        }
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn contains(&self, item: FrameIx) -> bool {
        let (ix, offset) = CellBitSet::locate(item);
        ix < self.bits.len() && (1 & (self.bits[ix] >> offset)) != 0
    }

    /// Whether this set is exactly `{item}`.
    pub fn is_unit(&self, item: FrameIx) -> bool {
        self.card() == 1 && self.contains(item)
    }

    pub fn intersect(&mut self, other: &Self) {
        let smallest_set_size = cmp::min(self.bits.len(), other.bits.len());
        for i in 0..smallest_set_size {
            self.bits[i] &= other.bits[i];
        }
        for i in smallest_set_size..self.bits.len() {
            self.bits[i] = 0;
        }
    }

    pub fn union(&mut self, other: &Self) {
        if other.bits.len() > self.bits.len() {
            self.bits.resize(other.bits.len(), 0);
        }
        for i in 0..other.bits.len() {
            self.bits[i] |= other.bits[i];
        }
    }

    /// Set equality, ignoring trailing zero blocks.
    pub fn equals(&self, other: &Self) -> bool {
        let greatest_set_size = cmp::max(self.bits.len(), other.bits.len());
        for i in 0..greatest_set_size {
            let a = self.bits.get(i).cloned().unwrap_or(0);
            let b = other.bits.get(i).cloned().unwrap_or(0);
            if a != b {
                return false;
            }
        }
        true
    }

    pub fn to_vec(&self) -> Vec<FrameIx> {
        let mut res = Vec::new();
        for (ix, &block) in self.bits.iter().enumerate() {
            let mut block = block;
            while block != 0 {
                let offset = block.trailing_zeros() as usize;
                res.push(FrameIx::new((ix * BLOCK_SIZE + offset) as u32));
                // Clear the bit that has just been read.
                block &= !(1 << offset);
            }
        }
        res
    }

    fn locate(item: FrameIx) -> (usize, usize) {
        let index = item.get_usize();
        (index / BLOCK_SIZE, index % BLOCK_SIZE)
    }
}

impl fmt::Debug for CellBitSet {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?}", self.to_vec())
    }
}

#[test]
fn insert_and_delete() {
    let fi3 = FrameIx::new(3);
    let fi70 = FrameIx::new(70);

    let mut a = CellBitSet::empty();
    assert!(a.is_empty());

    a.insert(fi3);
    assert_eq!(a.bits[0], 0x8);
    a.insert(fi70);
    assert_eq!(a.bits.len(), 2);
    assert_eq!(a.bits[1], 0x40);
    assert_eq!(a.card(), 2);

    // It's ok to insert twice.
    a.insert(fi3);
    assert_eq!(a.card(), 2);

    a.delete(fi3);
    assert!(!a.contains(fi3));
    assert!(a.contains(fi70));

    // Deleting something beyond the end is a no-op.
    a.delete(FrameIx::new(500));
    assert_eq!(a.card(), 1);
}

#[test]
fn unit_and_is_unit() {
    let fi1 = FrameIx::new(1);
    let fi2 = FrameIx::new(2);

    let mut a = CellBitSet::unit(fi1);
    assert!(a.is_unit(fi1));
    assert!(!a.is_unit(fi2));

    a.insert(fi2);
    assert!(!a.is_unit(fi1));
}

#[test]
fn intersect_drops_longer_tail() {
    let mut a = CellBitSet::empty();
    let mut b = CellBitSet::empty();
    a.insert(FrameIx::new(1));
    a.insert(FrameIx::new(100));
    b.insert(FrameIx::new(1));

    a.intersect(&b);
    assert!(a.contains(FrameIx::new(1)));
    assert!(!a.contains(FrameIx::new(100)));
    assert!(a.equals(&b));
}

#[test]
fn union_grows() {
    let mut a = CellBitSet::unit(FrameIx::new(0));
    let b = CellBitSet::unit(FrameIx::new(130));
    a.union(&b);
    assert_eq!(a.to_vec(), vec![FrameIx::new(0), FrameIx::new(130)]);
}

#[test]
fn equals_ignores_trailing_zeroes() {
    let mut a = CellBitSet::unit(FrameIx::new(2));
    a.insert(FrameIx::new(200));
    a.delete(FrameIx::new(200));
    let b = CellBitSet::unit(FrameIx::new(2));
    assert!(a.equals(&b));
    assert!(b.equals(&a));

    let mut c = CellBitSet::empty();
    c.insert(FrameIx::new(64));
    c.clear();
    assert!(c.equals(&CellBitSet::empty()));
}
