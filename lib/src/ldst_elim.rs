/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Removal of redundant loads of the guards register, and of dead stores,
//! over the cells the reduction created.
//!
//! The inserted code reads and writes whole predicate words through a single
//! scratch register, so back-to-back sequences often reload a word the
//! register already holds.

use log::{debug, trace};

use crate::data_structures::{BlockIx, FrameIx, GReg, Map};
use crate::dense_set::CellBitSet;
use crate::interface::{MachineFunc, TargetInst};

fn tracked_set(cells: &[FrameIx]) -> CellBitSet {
  let mut set = CellBitSet::empty();
  for c in cells {
    set.insert(*c);
  }
  set
}

//=============================================================================
// Redundant loads

// The cells whose content the guards register is known to hold.
fn transfer_avail<I: TargetInst>(
  inst: &I, guards: GReg, tracked: &CellBitSet, avail: &mut CellBitSet,
) {
  if let Some((dst, cell)) = inst.cell_load() {
    if dst == guards {
      *avail = if tracked.contains(cell) {
        CellBitSet::unit(cell)
      } else {
        CellBitSet::empty()
      };
      return;
    }
  }
  if let Some((cell, src)) = inst.cell_store() {
    if src == guards && tracked.contains(cell) {
      *avail = CellBitSet::unit(cell);
      return;
    }
  }
  if inst.is_call() || inst.defines_greg(guards) {
    avail.clear();
  } else if let Some(cell) = inst.writes_cell() {
    avail.delete(cell);
  }
}

/// Delete unconditional loads into `guards` of a cell whose value `guards`
/// already holds on every path.  Returns the number of deleted loads.
pub(crate) fn eliminate_redundant_loads<I: TargetInst>(
  func: &mut MachineFunc<I>, guards: GReg, cells: &[FrameIx],
) -> u32 {
  let tracked = tracked_set(cells);
  let rpo = func.reverse_postorder();

  let mut avail_out: Map<BlockIx, CellBitSet> = Map::default();
  let avail_in = |func: &MachineFunc<I>,
                  avail_out: &Map<BlockIx, CellBitSet>,
                  b: BlockIx| {
    let mut preds = func.blocks[b].preds.iter();
    let mut res = match preds.next() {
      Some(p) => avail_out.get(p).cloned().unwrap_or_else(CellBitSet::empty),
      None => return CellBitSet::empty(),
    };
    for p in preds {
      match avail_out.get(p) {
        Some(set) => res.intersect(set),
        None => res.clear(),
      }
    }
    res
  };

  let mut changed = true;
  let mut iterations = 0;
  while changed {
    changed = false;
    iterations += 1;
    for &b in &rpo {
      let mut avail = avail_in(func, &avail_out, b);
      for inst in &func.blocks[b].insts {
        transfer_avail(inst, guards, &tracked, &mut avail);
      }
      let same = avail_out.get(&b).map_or(false, |old| old.equals(&avail));
      if !same {
        avail_out.insert(b, avail);
        changed = true;
      }
    }
  }
  trace!("eliminate_redundant_loads: fixpoint after {} rounds", iterations);

  let mut removed = 0;
  for &b in &rpo {
    let mut avail = avail_in(func, &avail_out, b);
    let mut keep = vec![];
    for inst in &func.blocks[b].insts {
      let redundant = match inst.cell_load() {
        Some((dst, cell)) => {
          dst == guards && tracked.contains(cell) && avail.contains(cell)
        }
        None => false,
      };
      keep.push(!redundant);
      transfer_avail(inst, guards, &tracked, &mut avail);
    }
    let insts = std::mem::take(&mut func.blocks[b].insts);
    let before = insts.len();
    func.blocks[b].insts = insts
      .into_iter()
      .zip(keep.into_iter())
      .filter_map(|(inst, k)| if k { Some(inst) } else { None })
      .collect();
    removed += (before - func.blocks[b].insts.len()) as u32;
  }
  debug!("eliminate_redundant_loads: removed {}", removed);
  removed
}

//=============================================================================
// Dead stores

fn transfer_live<I: TargetInst>(
  inst: &I, tracked: &CellBitSet, live: &mut CellBitSet,
) {
  if let Some((cell, _)) = inst.cell_store() {
    live.delete(cell);
  }
  if let Some(cell) = inst.reads_cell() {
    if tracked.contains(cell) {
      live.insert(cell);
    }
  }
}

/// Delete unconditional stores to cells that are never read afterwards.
/// Returns the number of deleted stores.
pub(crate) fn eliminate_dead_stores<I: TargetInst>(
  func: &mut MachineFunc<I>, cells: &[FrameIx],
) -> u32 {
  let tracked = tracked_set(cells);
  let mut postorder = func.reverse_postorder();
  postorder.reverse();

  let mut live_in: Map<BlockIx, CellBitSet> = Map::default();
  let live_out = |func: &MachineFunc<I>,
                  live_in: &Map<BlockIx, CellBitSet>,
                  b: BlockIx| {
    let mut res = CellBitSet::empty();
    for s in func.blocks[b].succs.iter() {
      if let Some(set) = live_in.get(s) {
        res.union(set);
      }
    }
    res
  };

  let mut changed = true;
  while changed {
    changed = false;
    for &b in &postorder {
      let mut live = live_out(func, &live_in, b);
      for inst in func.blocks[b].insts.iter().rev() {
        transfer_live(inst, &tracked, &mut live);
      }
      let same = live_in.get(&b).map_or(false, |old| old.equals(&live));
      if !same {
        live_in.insert(b, live);
        changed = true;
      }
    }
  }

  let mut removed = 0;
  for &b in &postorder {
    let mut live = live_out(func, &live_in, b);
    let mut keep = vec![];
    for inst in func.blocks[b].insts.iter().rev() {
      let dead = match inst.cell_store() {
        Some((cell, _)) => tracked.contains(cell) && !live.contains(cell),
        None => false,
      };
      keep.push(!dead);
      transfer_live(inst, &tracked, &mut live);
    }
    keep.reverse();
    let insts = std::mem::take(&mut func.blocks[b].insts);
    let before = insts.len();
    func.blocks[b].insts = insts
      .into_iter()
      .zip(keep.into_iter())
      .filter_map(|(inst, k)| if k { Some(inst) } else { None })
      .collect();
    removed += (before - func.blocks[b].insts.len()) as u32;
  }
  debug!("eliminate_dead_stores: removed {}", removed);
  removed
}

#[cfg(test)]
use crate::test_inst::{br, func_of, load, num_insts, store, TInst};

#[cfg(test)]
const G: GReg = GReg(26);

#[test]
fn reload_after_store_is_redundant() {
  let mut func = func_of(
    vec![vec![store(0, G), TInst::Def(GReg(1)), load(G, 0), TInst::Ret]],
    &[],
  );
  let cells = [FrameIx::new(0)];
  assert_eq!(eliminate_redundant_loads(&mut func, G, &cells), 1);
  assert_eq!(num_insts(&func), 3);
}

#[test]
fn calls_and_other_writes_forget_the_register() {
  let mut func = func_of(
    vec![vec![
      load(G, 0),
      TInst::Call,
      load(G, 0),
      TInst::Def(G),
      load(G, 0),
      TInst::Ret,
    ]],
    &[],
  );
  let cells = [FrameIx::new(0)];
  assert_eq!(eliminate_redundant_loads(&mut func, G, &cells), 0);
}

#[test]
fn untracked_cells_are_left_alone() {
  let mut func = func_of(vec![vec![load(G, 5), load(G, 5), TInst::Ret]], &[]);
  let cells = [FrameIx::new(0)];
  assert_eq!(eliminate_redundant_loads(&mut func, G, &cells), 0);
}

#[test]
fn loads_after_a_join_need_every_path() {
  // b0 -> b1 -> b2 and b0 -> b2.
  let cells = [FrameIx::new(0)];
  let mut clobbered = func_of(
    vec![vec![load(G, 0)], vec![TInst::Def(G)], vec![load(G, 0), TInst::Ret]],
    &[(0, 2)],
  );
  assert_eq!(eliminate_redundant_loads(&mut clobbered, G, &cells), 0);

  let mut kept = func_of(
    vec![
      vec![load(G, 0)],
      vec![TInst::Def(GReg(1))],
      vec![load(G, 0), TInst::Ret],
    ],
    &[(0, 2)],
  );
  assert_eq!(eliminate_redundant_loads(&mut kept, G, &cells), 1);
}

#[test]
fn loop_header_reload() {
  let cells = [FrameIx::new(0)];
  let mut func = func_of(
    vec![vec![load(G, 0)], vec![load(G, 0), br(BlockIx::new(1))], vec![
      TInst::Ret,
    ]],
    &[(1, 1)],
  );
  assert_eq!(eliminate_redundant_loads(&mut func, G, &cells), 1);
}

#[test]
fn load_elimination_is_idempotent() {
  let cells = [FrameIx::new(0), FrameIx::new(1)];
  let mut func = func_of(
    vec![
      vec![load(G, 0), store(1, G), load(G, 1)],
      vec![load(G, 1), TInst::Def(GReg(3))],
      vec![load(G, 0), TInst::Ret],
    ],
    &[(0, 2)],
  );
  let first = eliminate_redundant_loads(&mut func, G, &cells);
  assert_eq!(first, 2);
  let len = num_insts(&func);
  assert_eq!(eliminate_redundant_loads(&mut func, G, &cells), 0);
  assert_eq!(num_insts(&func), len);
}

#[test]
fn overwritten_store_is_dead() {
  let cells = [FrameIx::new(0)];
  let mut func = func_of(
    vec![vec![store(0, G), load(G, 0), store(0, G), store(0, G)], vec![
      load(G, 0),
      TInst::Ret,
    ]],
    &[],
  );
  assert_eq!(eliminate_dead_stores(&mut func, &cells), 1);
  assert_eq!(func.blocks[BlockIx::new(0)].insts.len(), 3);
}

#[test]
fn stores_read_in_a_later_block_stay() {
  let cells = [FrameIx::new(0)];
  let mut func = func_of(
    vec![vec![store(0, G)], vec![TInst::Def(G)], vec![load(G, 0), TInst::Ret]],
    &[],
  );
  assert_eq!(eliminate_dead_stores(&mut func, &cells), 0);
}
