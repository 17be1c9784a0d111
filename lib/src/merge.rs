/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Merge chains of fall-through blocks into single basic blocks.

use log::debug;

use crate::interface::{MachineFunc, TargetInst};

/// Splice every block with a single predecessor into that predecessor.  A
/// block ending in the loop back branch closes its chain.
pub(crate) fn merge_blocks<I: TargetInst>(func: &mut MachineFunc<I>) {
  let order = func.dfs_preorder();
  if order.is_empty() {
    return;
  }

  let mut merged = 0;
  let mut base = order[0];
  let mut i = 1;
  while i < order.len() {
    let b = order[i];
    let preds = &func.blocks[b].preds;
    if preds.len() == 1 && preds[0] == base {
      let insts = std::mem::take(&mut func.blocks[b].insts);
      func.blocks[base].insts.extend(insts);
      func.remove_edge(base, b);
      let succs: Vec<_> = func.blocks[b].succs.iter().cloned().collect();
      for s in succs {
        func.remove_edge(b, s);
        func.add_edge(base, s);
      }
      func.erase(b);
      merged += 1;

      if func.blocks[base].succs.len() > 1 {
        // Base ends with the back branch; whatever follows starts afresh.
        i += 1;
        if i < order.len() {
          base = order[i];
        }
      }
    } else {
      base = b;
    }
    i += 1;
  }
  debug!("merge_blocks: merged {} blocks", merged);
}

#[cfg(test)]
use crate::data_structures::{BlockIx, GReg};
#[cfg(test)]
use crate::test_inst::{br, func_of, TInst};

#[cfg(test)]
fn defs(insts: &[TInst]) -> Vec<u8> {
  insts
    .iter()
    .filter_map(|i| match i {
      TInst::Def(r) => Some(r.0),
      _ => None,
    })
    .collect()
}

#[test]
fn chain_becomes_one_block() {
  let mut func = func_of(
    vec![
      vec![TInst::Def(GReg(1))],
      vec![TInst::Def(GReg(2))],
      vec![TInst::Def(GReg(3)), TInst::Ret],
    ],
    &[],
  );
  merge_blocks(&mut func);
  assert_eq!(func.layout, vec![BlockIx::new(0)]);
  assert_eq!(defs(&func.blocks[BlockIx::new(0)].insts), vec![1, 2, 3]);
  assert!(func.blocks[BlockIx::new(1)].erased);
  assert!(func.blocks[BlockIx::new(0)].succs.is_empty());
}

#[test]
fn loop_body_closes_at_the_back_branch() {
  // b0 -> b1 -> b2 -> b3, and the back edge b2 -> b1.
  let b1 = BlockIx::new(1);
  let mut func = func_of(
    vec![
      vec![TInst::Def(GReg(1))],
      vec![TInst::Def(GReg(2))],
      vec![TInst::Def(GReg(3)), br(b1)],
      vec![TInst::Ret],
    ],
    &[(2, 1)],
  );
  merge_blocks(&mut func);
  assert_eq!(func.layout, vec![BlockIx::new(0), b1, BlockIx::new(3)]);
  assert_eq!(defs(&func.blocks[b1].insts), vec![2, 3]);
  assert_eq!(func.blocks[b1].insts.len(), 3);
  assert!(func.blocks[b1].succs.contains(&b1));
  assert!(func.blocks[b1].succs.contains(&BlockIx::new(3)));
}
