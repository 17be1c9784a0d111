/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Frame cells the reduction needs: excess predicate words, saved predicate
//! banks, loop counters, and the return-information save cell for calls.

use log::debug;

use crate::data_structures::{FrameIx, ScopeIx, TypedIxVec};
use crate::interface::{MachineFunc, TargetInst};
use crate::rainfo::RAInfo;
use crate::scope::ScopeTree;

/// Size in bytes of one frame cell.
pub const CELL_BYTES: i32 = 4;

const BITS_PER_WORD: u32 = 32;

#[derive(Clone, Debug, Default)]
pub struct FrameLayout {
  /// Holds the return information register over calls.
  pub call_cell: Option<FrameIx>,
  /// Stack bit `n` lives in bit `n % 32` of `excess_cells[n / 32]`.
  pub excess_cells: Vec<FrameIx>,
  /// The saved predicate bank for each loop nesting depth, `[depth - 1]`.
  pub s0_cells: Vec<FrameIx>,
  /// The iteration counter for each loop nesting depth, `[depth - 1]`.
  pub loop_counters: Vec<FrameIx>,
}

impl FrameLayout {
  /// Reserve the cells this allocation needs in the function's frame.
  pub fn create<I: TargetInst>(
    func: &mut MachineFunc<I>, tree: &ScopeTree,
    rainfos: &TypedIxVec<ScopeIx, RAInfo>,
  ) -> Self {
    let mut layout = FrameLayout::default();

    if func.has_calls() {
      layout.call_cell = Some(func.new_frame_cell());
    }

    let num_stack_locs =
      rainfos.iter().map(|ri| ri.stack_locs_end()).max().unwrap_or(0);
    let num_words = (num_stack_locs + BITS_PER_WORD - 1) / BITS_PER_WORD;
    for _ in 0..num_words {
      layout.excess_cells.push(func.new_frame_cell());
    }

    let spill_depth = rainfos
      .iter()
      .filter(|ri| ri.needs_scope_spill)
      .map(|ri| tree.scopes[ri.scope].depth)
      .max()
      .unwrap_or(0);
    for _ in 0..spill_depth {
      layout.s0_cells.push(func.new_frame_cell());
    }

    let counter_depth = tree
      .scopes
      .indices()
      .into_iter()
      .filter(|s| tree.loop_bound(*s).is_some())
      .map(|s| tree.scopes[s].depth)
      .max()
      .unwrap_or(0);
    for _ in 0..counter_depth {
      layout.loop_counters.push(func.new_frame_cell());
    }

    debug!(
      "frame layout: {} excess words, {} bank slots, {} loop counters",
      num_words, spill_depth, counter_depth
    );
    layout
  }

  /// The cell and bit holding stack location `loc`.
  pub fn stack_bit(&self, loc: u32) -> (FrameIx, u32) {
    let word = (loc / BITS_PER_WORD) as usize;
    (self.excess_cells[word], loc % BITS_PER_WORD)
  }

  pub fn s0_cell(&self, depth: u32) -> FrameIx {
    self.s0_cells[depth as usize - 1]
  }

  pub fn loop_counter(&self, depth: u32) -> FrameIx {
    self.loop_counters[depth as usize - 1]
  }

  /// All cells created here.
  pub fn synthetic_cells(&self) -> Vec<FrameIx> {
    let mut cells: Vec<FrameIx> = self.call_cell.into_iter().collect();
    cells.extend(self.excess_cells.iter().cloned());
    cells.extend(self.s0_cells.iter().cloned());
    cells.extend(self.loop_counters.iter().cloned());
    cells
  }
}

/// Replace every frame-cell operand by its offset in the stack frame.
pub fn resolve_frame_indices<I: TargetInst>(func: &mut MachineFunc<I>) {
  let offset_of = |fi: FrameIx| fi.get() as i32 * CELL_BYTES;
  for bix in func.layout.clone() {
    let block = &mut func.blocks[bix];
    for inst in block.insts.iter_mut() {
      *inst = inst.resolve_frame_index(&offset_of);
    }
  }
}
