/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the single-path reduction library.

use smallvec::SmallVec;
use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

// Sets and maps of things.  The interface needs some way to speak about them,
// so let's use the library-provided versions.

pub use crate::data_structures::Map;
pub use crate::data_structures::Set;

// Entity indices, and vectors indexed by them.

pub use crate::data_structures::TypedIxVec;
pub use crate::data_structures::{BlockIx, FrameIx, PredIx, ScopeIx};

// Physical registers and predicate operands.

pub use crate::data_structures::{Cond, GReg, PReg};

// The scope tree, and what the allocator produces for it.

pub use crate::rainfo::{Location, RAInfo};
pub use crate::scope::{PredDef, Scope, ScopeNode, ScopeTree, WalkEvent};

pub use crate::checker::{CheckerError, CheckerErrors};

pub use crate::reduce::reduce_single_path;

//=============================================================================
// Instructions inserted by the reduction.

/// Special registers that frame-setup and bank-spill code moves to and from.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum SpecialReg {
  /// All predicate registers, one per bit.
  S0,
  /// Return base.
  Srb,
  /// Return offset.
  Sro,
}

/// The instructions the reduction itself emits.  The client turns each of
/// these into its own instruction type with `TargetInst::gen_inst`.
///
/// A `guard` of `Cond::TRUE` means the instruction is unconditional.
#[derive(Clone, Debug)]
pub enum SPInst {
  /// dst := a & b, unconditionally.
  PAnd { dst: PReg, a: Cond, b: Cond },
  /// (guard) dst := src.
  PMov { guard: Cond, dst: PReg, src: Cond },
  /// dst := false.
  PClear { dst: PReg },
  /// dst := bit `bit` of `src`.
  BTest { dst: PReg, src: GReg, bit: u32 },
  /// (guard) dst := src with bit `bit` replaced by the value of `cond`.
  BCopy { guard: Cond, dst: GReg, src: GReg, bit: u32, cond: Cond },
  /// dst := src & imm.
  AndImm { dst: GReg, src: GReg, imm: u32 },
  /// dst := imm.
  LoadImm { dst: GReg, imm: u32 },
  /// dst := src - imm.
  SubImm { dst: GReg, src: GReg, imm: u32 },
  /// dst := (signed) lhs < rhs.
  CmpLt { dst: PReg, lhs: GReg, rhs: GReg },
  /// dst := [cell], a whole-word frame access.
  LoadCell { dst: GReg, cell: FrameIx },
  /// [cell] := src.
  StoreCell { cell: FrameIx, src: GReg },
  /// dst := S0.
  ReadPredBank { dst: GReg },
  /// S0 := src.
  WritePredBank { src: GReg },
  /// (cond) branch to `target`.
  Branch { cond: Cond, target: BlockIx },
}

/// A trait defined by the client to describe its machine instructions.  The
/// reduction only ever queries instructions through this, and only ever
/// creates them with `gen_inst`.
pub trait TargetInst: Clone + fmt::Debug {
  /// Build the client form of an instruction the reduction wants to insert.
  fn gen_inst(inst: SPInst) -> Self;

  // -------------
  // Predication
  // -------------

  /// The guard of this instruction, `Cond::TRUE` if it is not predicated.
  fn guard(&self) -> Cond;

  /// A copy of this instruction guarded by `guard`.
  fn with_guard(&self, guard: Cond) -> Self;

  fn is_predicable(&self) -> bool;

  // -------------
  // Classification
  // -------------

  fn is_call(&self) -> bool;
  fn is_return(&self) -> bool;
  /// A branch terminator; conditional or not.
  fn is_branch(&self) -> bool;
  /// Stack-cache reserve/ensure/free.
  fn is_stack_control(&self) -> bool;
  /// Tagged as part of the frame setup or teardown sequence.
  fn is_frame_setup(&self) -> bool;

  fn branch_target(&self) -> Option<BlockIx>;
  fn with_branch_target(&self, target: BlockIx) -> Self;

  // -------------
  // Register queries
  // -------------

  /// Does this instruction name `reg` at all, as guard, source or destination?
  fn mentions_preg(&self, reg: PReg) -> bool;
  fn reads_preg(&self, reg: PReg) -> bool;
  /// A copy of this instruction whose read of `reg` carries the given kill
  /// flag.
  fn with_kill(&self, reg: PReg, kill: bool) -> Self;

  fn reads_greg(&self, reg: GReg) -> bool;
  fn defines_greg(&self, reg: GReg) -> bool;

  /// `dst := sreg`, if this is a move from a special register.
  fn move_from_special(&self) -> Option<(GReg, SpecialReg)>;
  /// `sreg := src`, if this is a move to a special register.
  fn move_to_special(&self) -> Option<(SpecialReg, GReg)>;

  // -------------
  // Frame cells
  // -------------

  /// An unguarded whole-word load `dst := [cell]`.
  fn cell_load(&self) -> Option<(GReg, FrameIx)>;
  /// An unguarded whole-word store `[cell] := src`.
  fn cell_store(&self) -> Option<(FrameIx, GReg)>;
  /// Any read of a frame cell, guarded or not.
  fn reads_cell(&self) -> Option<FrameIx>;
  /// Any write of a frame cell, guarded or not.
  fn writes_cell(&self) -> Option<FrameIx>;

  /// Replace frame-cell operands with concrete stack offsets.
  fn resolve_frame_index(&self, offset_of: &dyn Fn(FrameIx) -> i32) -> Self;
}

//=============================================================================
// The function body: a block arena with explicit CFG edges and a layout.

#[derive(Clone, Debug)]
pub struct MachineBlock<I> {
  pub name: String,
  pub insts: Vec<I>,
  pub succs: SmallVec<[BlockIx; 2]>,
  pub preds: SmallVec<[BlockIx; 2]>,
  /// Predicate registers live on entry.
  pub live_ins: Vec<PReg>,
  pub erased: bool,
}

#[derive(Clone, Debug)]
pub struct MachineFunc<I> {
  pub name: String,
  pub blocks: TypedIxVec<BlockIx, MachineBlock<I>>,
  /// Code layout order; erased blocks are not in here.
  pub layout: Vec<BlockIx>,
  pub entry: BlockIx,
  /// Cells `0 .. num_frame_cells` of the frame are in use.
  pub num_frame_cells: u32,
}

impl<I: TargetInst> MachineFunc<I> {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      blocks: TypedIxVec::new(),
      layout: vec![],
      entry: BlockIx::new(0),
      num_frame_cells: 0,
    }
  }

  /// Add a block at the end of the layout.
  pub fn add_block(&mut self, name: String, insts: Vec<I>) -> BlockIx {
    let bix = self.blocks.push(MachineBlock {
      name,
      insts,
      succs: SmallVec::new(),
      preds: SmallVec::new(),
      live_ins: vec![],
      erased: false,
    });
    self.layout.push(bix);
    bix
  }

  pub fn add_edge(&mut self, from: BlockIx, to: BlockIx) {
    if !self.blocks[from].succs.contains(&to) {
      self.blocks[from].succs.push(to);
      self.blocks[to].preds.push(from);
    }
  }

  pub fn remove_edge(&mut self, from: BlockIx, to: BlockIx) {
    self.blocks[from].succs.retain(|b| *b != to);
    self.blocks[to].preds.retain(|b| *b != from);
  }

  pub fn remove_all_succs(&mut self, bix: BlockIx) {
    let succs: Vec<BlockIx> = self.blocks[bix].succs.iter().cloned().collect();
    for s in succs {
      self.remove_edge(bix, s);
    }
  }

  /// Compute CFG edges from the branch targets and the fall-through of each
  /// block in layout order.  Existing edges are dropped.
  pub fn derive_edges(&mut self) {
    for bix in self.blocks.indices() {
      self.blocks[bix].succs.clear();
      self.blocks[bix].preds.clear();
    }
    let layout = self.layout.clone();
    for (pos, &bix) in layout.iter().enumerate() {
      let mut falls_through = true;
      let targets: Vec<(BlockIx, bool)> = self.blocks[bix]
        .insts
        .iter()
        .filter_map(|i| {
          i.branch_target().map(|t| (t, i.guard().is_always_true()))
        })
        .collect();
      for (target, unconditional) in targets {
        self.add_edge(bix, target);
        if unconditional {
          falls_through = false;
        }
      }
      if let Some(last) = self.blocks[bix].insts.last() {
        if last.is_return() {
          falls_through = false;
        }
      }
      if falls_through {
        if let Some(&next) = layout.get(pos + 1) {
          self.add_edge(bix, next);
        }
      }
    }
  }

  /// Index of the first of the trailing branch/return instructions; the
  /// block length if there are none.
  pub fn first_terminator(&self, bix: BlockIx) -> usize {
    let insts = &self.blocks[bix].insts;
    let mut pos = insts.len();
    while pos > 0 && (insts[pos - 1].is_branch() || insts[pos - 1].is_return())
    {
      pos -= 1;
    }
    pos
  }

  /// Delete the trailing branch instructions of a block, returning how many
  /// were removed.
  pub fn remove_branches(&mut self, bix: BlockIx) -> u32 {
    let insts = &mut self.blocks[bix].insts;
    let mut removed = 0;
    while let Some(last) = insts.last() {
      if !last.is_branch() {
        break;
      }
      insts.pop();
      removed += 1;
    }
    removed
  }

  pub fn insert(&mut self, bix: BlockIx, pos: usize, inst: I) {
    self.blocks[bix].insts.insert(pos, inst);
  }

  /// Move `bix` directly after `after` in the layout.
  pub fn move_after(&mut self, bix: BlockIx, after: BlockIx) {
    self.layout.retain(|b| *b != bix);
    match self.layout.iter().position(|b| *b == after) {
      Some(pos) => self.layout.insert(pos + 1, bix),
      None => self.layout.push(bix),
    }
  }

  /// Remove a block from the layout and from the CFG.  Its index stays
  /// reserved until `renumber`.
  pub fn erase(&mut self, bix: BlockIx) {
    self.remove_all_succs(bix);
    let preds: Vec<BlockIx> = self.blocks[bix].preds.iter().cloned().collect();
    for p in preds {
      self.remove_edge(p, bix);
    }
    self.blocks[bix].insts.clear();
    self.blocks[bix].erased = true;
    self.layout.retain(|b| *b != bix);
  }

  pub fn new_frame_cell(&mut self) -> FrameIx {
    let cell = FrameIx::new(self.num_frame_cells);
    self.num_frame_cells += 1;
    cell
  }

  pub fn mentions_preg(&self, reg: PReg) -> bool {
    self.blocks.iter().filter(|b| !b.erased).any(|b| {
      b.live_ins.contains(&reg) || b.insts.iter().any(|i| i.mentions_preg(reg))
    })
  }

  pub fn has_calls(&self) -> bool {
    self.blocks.iter().any(|b| b.insts.iter().any(|i| i.is_call()))
  }

  /// Depth-first pre-order from the entry, following successors in order.
  pub fn dfs_preorder(&self) -> Vec<BlockIx> {
    let mut visited = vec![false; self.blocks.len() as usize];
    let mut order = vec![];
    let mut stack = vec![self.entry];
    while let Some(bix) = stack.pop() {
      if visited[bix.get_usize()] {
        continue;
      }
      visited[bix.get_usize()] = true;
      order.push(bix);
      for s in self.blocks[bix].succs.iter().rev() {
        if !visited[s.get_usize()] {
          stack.push(*s);
        }
      }
    }
    order
  }

  pub fn reverse_postorder(&self) -> Vec<BlockIx> {
    let mut visited = vec![false; self.blocks.len() as usize];
    let mut postorder = vec![];
    // (block, index of the next successor to visit)
    let mut stack = vec![(self.entry, 0)];
    visited[self.entry.get_usize()] = true;
    while let Some((bix, next)) = stack.pop() {
      let succs = &self.blocks[bix].succs;
      if next < succs.len() {
        stack.push((bix, next + 1));
        let s = succs[next];
        if !visited[s.get_usize()] {
          visited[s.get_usize()] = true;
          stack.push((s, 0));
        }
      } else {
        postorder.push(bix);
      }
    }
    postorder.reverse();
    postorder
  }

  /// Compact the block arena into layout order, dropping erased blocks.
  /// Returns the old-to-new index mapping.
  pub fn renumber(&mut self) -> Map<BlockIx, BlockIx> {
    let mut map = Map::default();
    for (n, &bix) in self.layout.iter().enumerate() {
      map.insert(bix, BlockIx::new(n as u32));
    }
    let remap = |b: &BlockIx| map[b];
    let mut blocks = TypedIxVec::new();
    for &bix in &self.layout {
      let old = &self.blocks[bix];
      let insts = old
        .insts
        .iter()
        .map(|i| match i.branch_target() {
          Some(t) => i.with_branch_target(remap(&t)),
          None => i.clone(),
        })
        .collect();
      blocks.push(MachineBlock {
        name: old.name.clone(),
        insts,
        succs: old.succs.iter().map(remap).collect(),
        preds: old.preds.iter().map(remap).collect(),
        live_ins: old.live_ins.clone(),
        erased: false,
      });
    }
    self.entry = map[&self.entry];
    self.blocks = blocks;
    self.layout = self.blocks.indices().into_iter().collect();
    map
  }
}

//=============================================================================
// Target register conventions.

#[derive(Clone, Debug)]
pub struct TargetRegs {
  /// Predicate registers are P0 .. P(num_pregs - 1).
  pub num_pregs: u8,
  /// Scratch register for all predicate spill traffic.
  pub guards_reg: GReg,
  /// Holds return information across calls.
  pub ret_info_reg: GReg,
  /// Hardwired zero.
  pub zero_reg: GReg,
}

impl Default for TargetRegs {
  fn default() -> Self {
    Self {
      num_pregs: 8,
      guards_reg: GReg(26),
      ret_info_reg: GReg(9),
      zero_reg: GReg::R0,
    }
  }
}

//=============================================================================
// Options, results, errors.

#[derive(Clone, Debug)]
pub struct ReduceOptions {
  /// Run the structural checker on the reduced function.
  pub run_checker: bool,
  pub eliminate_redundant_loads: bool,
  /// Remove stores to synthetic cells that are never read again.
  pub dead_store_elim: bool,
}

impl Default for ReduceOptions {
  fn default() -> Self {
    Self {
      run_checker: false,
      eliminate_redundant_loads: true,
      dead_store_elim: false,
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ReduceStats {
  pub removed_branches: u32,
  pub inserted_insts: u32,
  pub loop_counters: u32,
  pub eliminated_ld_st: u32,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ReduceResult {
  pub stats: ReduceStats,
  /// Allocation records, one per scope.
  pub rainfos: Vec<RAInfo>,
  /// The allocatable predicate registers; `Location::Register(n)` names
  /// `avail_pregs[n]`.
  pub avail_pregs: Vec<PReg>,
  pub pred_tmp: Option<PReg>,
  /// Old block index to new block index, after renumbering.
  pub block_map: Map<BlockIx, BlockIx>,
}

#[derive(Clone, Debug)]
pub enum ReduceError {
  InvalidScopeTree(String),
  UseWithoutDef(PredIx),
  NestedExitEdge { pred: PredIx, src: BlockIx },
  NoTempPredReg,
  RegisterPressure(ScopeIx),
  SpillWithoutLoad { block: BlockIx, pred: PredIx },
  MissingUseLocation { block: BlockIx, pred: PredIx },
  PredicatedCall(BlockIx),
  Checker(CheckerErrors),
}

impl fmt::Display for ReduceError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ReduceError::InvalidScopeTree(msg) => {
        write!(f, "invalid scope tree: {}", msg)
      }
      ReduceError::UseWithoutDef(p) => {
        write!(f, "predicate {:?} is used but never defined", p)
      }
      ReduceError::NestedExitEdge { pred, src } => write!(
        f,
        "definition of {:?} on an exit edge from {:?}, more than one loop deep",
        pred, src
      ),
      ReduceError::NoTempPredReg => {
        write!(f, "no free predicate register for the temporary")
      }
      ReduceError::RegisterPressure(s) => {
        write!(f, "scope {:?} needs a predicate register, none left", s)
      }
      ReduceError::SpillWithoutLoad { block, pred } => {
        write!(f, "spill of {:?} in {:?} without matching load", pred, block)
      }
      ReduceError::MissingUseLocation { block, pred } => {
        write!(f, "no use location for {:?} in {:?}", pred, block)
      }
      ReduceError::PredicatedCall(b) => {
        write!(f, "call in {:?} is already predicated", b)
      }
      ReduceError::Checker(errors) => write!(f, "checker: {:?}", errors),
    }
  }
}

impl std::error::Error for ReduceError {}
