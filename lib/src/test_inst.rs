/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A bare-bones instruction type for the library's own unit tests: the
//! reduction's instructions, plus calls, returns and opaque register writes.

use crate::data_structures::{BlockIx, Cond, FrameIx, GReg, PReg};
use crate::interface::{MachineFunc, SPInst, SpecialReg, TargetInst};

#[derive(Clone, Debug)]
pub(crate) enum TInst {
  Sp(SPInst),
  Call,
  Ret,
  /// Some other write of a general purpose register.
  Def(GReg),
}

pub(crate) fn load(dst: GReg, cell: u32) -> TInst {
  TInst::Sp(SPInst::LoadCell { dst, cell: FrameIx::new(cell) })
}

pub(crate) fn store(cell: u32, src: GReg) -> TInst {
  TInst::Sp(SPInst::StoreCell { cell: FrameIx::new(cell), src })
}

pub(crate) fn br(target: BlockIx) -> TInst {
  TInst::Sp(SPInst::Branch { cond: Cond::new(PReg(1)), target })
}

/// A function with one block per entry of `blocks`, chained in order, plus
/// the extra edges given.
pub(crate) fn func_of(
  blocks: Vec<Vec<TInst>>, extra_edges: &[(u32, u32)],
) -> MachineFunc<TInst> {
  let mut func = MachineFunc::new("test");
  let mut prev = None;
  for (n, insts) in blocks.into_iter().enumerate() {
    let b = func.add_block(format!("b{}", n), insts);
    if let Some(p) = prev {
      func.add_edge(p, b);
    }
    prev = Some(b);
  }
  for &(from, to) in extra_edges {
    func.add_edge(BlockIx::new(from), BlockIx::new(to));
  }
  func
}

pub(crate) fn num_insts(func: &MachineFunc<TInst>) -> usize {
  func.layout.iter().map(|b| func.blocks[*b].insts.len()).sum()
}

impl TargetInst for TInst {
  fn gen_inst(inst: SPInst) -> Self {
    TInst::Sp(inst)
  }

  fn guard(&self) -> Cond {
    match self {
      TInst::Sp(SPInst::PMov { guard, .. })
      | TInst::Sp(SPInst::BCopy { guard, .. }) => *guard,
      TInst::Sp(SPInst::Branch { cond, .. }) => *cond,
      _ => Cond::TRUE,
    }
  }

  fn with_guard(&self, new_guard: Cond) -> Self {
    let mut inst = self.clone();
    match &mut inst {
      TInst::Sp(SPInst::PMov { guard, .. })
      | TInst::Sp(SPInst::BCopy { guard, .. }) => *guard = new_guard,
      _ => {}
    }
    inst
  }

  fn is_predicable(&self) -> bool {
    !self.is_call() && !self.is_return() && !self.is_branch()
  }

  fn is_call(&self) -> bool {
    matches!(self, TInst::Call)
  }
  fn is_return(&self) -> bool {
    matches!(self, TInst::Ret)
  }
  fn is_branch(&self) -> bool {
    matches!(self, TInst::Sp(SPInst::Branch { .. }))
  }
  fn is_stack_control(&self) -> bool {
    false
  }
  fn is_frame_setup(&self) -> bool {
    false
  }

  fn branch_target(&self) -> Option<BlockIx> {
    match self {
      TInst::Sp(SPInst::Branch { target, .. }) => Some(*target),
      _ => None,
    }
  }
  fn with_branch_target(&self, new_target: BlockIx) -> Self {
    let mut inst = self.clone();
    if let TInst::Sp(SPInst::Branch { target, .. }) = &mut inst {
      *target = new_target;
    }
    inst
  }

  fn mentions_preg(&self, reg: PReg) -> bool {
    self.guard().reg == reg
  }
  fn reads_preg(&self, reg: PReg) -> bool {
    self.guard().reg == reg
  }
  fn with_kill(&self, _reg: PReg, _kill: bool) -> Self {
    self.clone()
  }

  fn reads_greg(&self, reg: GReg) -> bool {
    match self {
      TInst::Sp(SPInst::StoreCell { src, .. }) => *src == reg,
      _ => false,
    }
  }
  fn defines_greg(&self, reg: GReg) -> bool {
    match self {
      TInst::Def(dst)
      | TInst::Sp(SPInst::LoadCell { dst, .. })
      | TInst::Sp(SPInst::LoadImm { dst, .. })
      | TInst::Sp(SPInst::AndImm { dst, .. })
      | TInst::Sp(SPInst::SubImm { dst, .. })
      | TInst::Sp(SPInst::BCopy { dst, .. })
      | TInst::Sp(SPInst::ReadPredBank { dst }) => *dst == reg,
      _ => false,
    }
  }

  fn move_from_special(&self) -> Option<(GReg, SpecialReg)> {
    None
  }
  fn move_to_special(&self) -> Option<(SpecialReg, GReg)> {
    None
  }

  fn cell_load(&self) -> Option<(GReg, FrameIx)> {
    match self {
      TInst::Sp(SPInst::LoadCell { dst, cell }) => Some((*dst, *cell)),
      _ => None,
    }
  }
  fn cell_store(&self) -> Option<(FrameIx, GReg)> {
    match self {
      TInst::Sp(SPInst::StoreCell { cell, src }) => Some((*cell, *src)),
      _ => None,
    }
  }
  fn reads_cell(&self) -> Option<FrameIx> {
    self.cell_load().map(|(_, cell)| cell)
  }
  fn writes_cell(&self) -> Option<FrameIx> {
    self.cell_store().map(|(cell, _)| cell)
  }

  fn resolve_frame_index(&self, _offset_of: &dyn Fn(FrameIx) -> i32) -> Self {
    self.clone()
  }
}
