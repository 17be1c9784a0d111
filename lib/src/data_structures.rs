/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::Index;
use std::ops::IndexMut;
use std::slice::Iter;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Maps

pub type Map<K, V> = FxHashMap<K, V>;

//=============================================================================
// Sets of things

pub struct Set<T> {
  set: FxHashSet<T>,
}

impl<T: Eq + Ord + Hash + Copy + fmt::Debug> Set<T> {
  #[inline(never)]
  pub fn empty() -> Self {
    Self { set: FxHashSet::<T>::default() }
  }

  #[inline(never)]
  pub fn insert(&mut self, item: T) {
    self.set.insert(item);
  }

  #[inline(never)]
  pub fn contains(&self, item: T) -> bool {
    self.set.contains(&item)
  }

  /// Sorted, so that anything derived from the result is deterministic.
  #[inline(never)]
  pub fn to_vec(&self) -> Vec<T> {
    let mut res: Vec<T> = self.set.iter().cloned().collect();
    res.sort_unstable();
    res
  }
}

impl<T: Eq + Ord + Hash + Copy + fmt::Debug> fmt::Debug for Set<T> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Print the elements in some way which depends only on what is
    // present in the set, and not on any other factor.
    write!(fmt, "{:?}", self.to_vec())
  }
}

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored.  What if this overflows?)

#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  #[cfg_attr(feature = "enable-serde", serde(skip))]
  ty_ix: PhantomData<TyIx>,
}
impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
  TyIx: Copy + Into<u32> + From<u32>,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn len(&self) -> u32 {
    // FIXME what if this overflows?
    self.vek.len() as u32
  }
  pub fn is_empty(&self) -> bool {
    self.vek.is_empty()
  }
  pub fn push(&mut self, item: Ty) -> TyIx {
    // FIXME what if this overflows?
    self.vek.push(item);
    TyIx::from(self.vek.len() as u32 - 1)
  }
  pub fn indices(&self) -> impl Iterator<Item = TyIx> {
    (0..self.len()).map(TyIx::from)
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> Clone for TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  fn clone(&self) -> Self {
    Self { vek: self.vek.clone(), ty_ix: PhantomData::<TyIx> }
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}", self.vek)
  }
}

//=============================================================================

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    pub struct $TypeIx(u32);

    impl $TypeIx {
      #[inline(always)]
      pub fn new(n: u32) -> Self {
        Self(n)
      }
      #[inline(always)]
      pub fn get(self) -> u32 {
        self.0
      }
      #[inline(always)]
      pub fn get_usize(self) -> usize {
        self.0 as usize
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, &self.0)
      }
    }
    impl Into<u32> for $TypeIx {
      fn into(self) -> u32 {
        self.0
      }
    }
    impl From<u32> for $TypeIx {
      fn from(n: u32) -> Self {
        $TypeIx(n)
      }
    }
  };
}

generate_boilerplate!(BlockIx, "b");

generate_boilerplate!(ScopeIx, "s");

generate_boilerplate!(PredIx, "pred");

generate_boilerplate!(FrameIx, "fi");

//=============================================================================
// Physical registers.  The target has a small file of one-bit predicate
// registers, of which P0 is hardwired to true, and a file of 32-bit general
// purpose registers, of which R0 is hardwired to zero.

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PReg(pub u8);

impl PReg {
  pub const P0: PReg = PReg(0);

  pub fn get_index(self) -> usize {
    self.0 as usize
  }
  /// The bit this register occupies in the S0 special register.
  pub fn s0_bit(self) -> u32 {
    self.0 as u32
  }
}
impl fmt::Debug for PReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "p{}", self.0)
  }
}

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct GReg(pub u8);

impl GReg {
  pub const R0: GReg = GReg(0);

  pub fn get_index(self) -> usize {
    self.0 as usize
  }
}
impl fmt::Debug for GReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "r{}", self.0)
  }
}

/// A predicate operand: a predicate register, optionally negated, with the
/// "last use" marker the target keeps on register operands.
#[derive(Copy, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Cond {
  pub reg: PReg,
  pub negated: bool,
  pub kill: bool,
}

impl Cond {
  pub const TRUE: Cond = Cond { reg: PReg::P0, negated: false, kill: false };

  pub fn new(reg: PReg) -> Self {
    Self { reg, negated: false, kill: false }
  }
  pub fn not(reg: PReg) -> Self {
    Self { reg, negated: true, kill: false }
  }
  pub fn is_always_true(&self) -> bool {
    self.reg == PReg::P0 && !self.negated
  }
  /// Same register and polarity; the kill flag doesn't change the value.
  pub fn same_value(&self, other: &Cond) -> bool {
    self.reg == other.reg && self.negated == other.negated
  }
  pub fn without_kill(self) -> Self {
    Self { kill: false, ..self }
  }
}
impl fmt::Debug for Cond {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{}{:?}{}",
      if self.negated { "!" } else { "" },
      self.reg,
      if self.kill { "<kill>" } else { "" }
    )
  }
}

#[test]
fn set_ops() {
  let mut a = Set::<u32>::empty();
  for x in &[3, 1, 2, 3] {
    a.insert(*x);
  }
  assert_eq!(a.to_vec(), vec![1, 2, 3]);
  assert!(a.contains(2));
  assert!(!a.contains(4));
  assert_eq!(format!("{:?}", a), "[1, 2, 3]");
}

#[test]
fn typed_ix_vec_push_returns_index() {
  let mut v = TypedIxVec::<BlockIx, &str>::new();
  let b0 = v.push("entry");
  let b1 = v.push("exit");
  assert_eq!(b0, BlockIx::new(0));
  assert_eq!(b1, BlockIx::new(1));
  assert_eq!(v[b1], "exit");
  let all: Vec<BlockIx> = v.indices().into_iter().collect();
  assert_eq!(all, vec![b0, b1]);
}

#[test]
fn cond_printing() {
  let mut c = Cond::not(PReg(3));
  assert_eq!(format!("{:?}", c), "!p3");
  c.kill = true;
  assert_eq!(format!("{:?}", c), "!p3<kill>");
  assert!(c.same_value(&Cond::not(PReg(3))));
  assert!(Cond::TRUE.is_always_true());
}
