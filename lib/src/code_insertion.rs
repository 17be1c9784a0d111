/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Predication of the original instructions, and the code that defines,
//! spills, loads and initializes predicates.

use log::{debug, trace};

use crate::data_structures::{BlockIx, Cond, FrameIx, PReg, ScopeIx, Set};
use crate::interface::{
  MachineFunc, ReduceError, SPInst, SpecialReg, TargetInst,
};
use crate::rainfo::Location;
use crate::reduce::{PendingDef, ReductionContext};

//=============================================================================
// Helpers

/// Number of frame-setup instructions at the start of `b`.
pub(crate) fn frame_setup_len<I: TargetInst>(
  func: &MachineFunc<I>, b: BlockIx,
) -> usize {
  func.blocks[b].insts.iter().take_while(|i| i.is_frame_setup()).count()
}

/// Positions of the instructions that carry return information through the
/// frame setup: moves between the return registers and general registers,
/// and the instructions on the other end of those registers.  These must
/// execute whatever the block's predicate.
pub(crate) fn collect_return_info_insts<I: TargetInst>(
  insts: &[I],
) -> Set<usize> {
  let is_ret_info = |s: SpecialReg| s == SpecialReg::Srb || s == SpecialReg::Sro;
  let mut res = Set::empty();
  for (k, inst) in insts.iter().enumerate() {
    if !inst.is_frame_setup() {
      continue;
    }
    if let Some((dst, sreg)) = inst.move_from_special() {
      if is_ret_info(sreg) {
        res.insert(k);
        if let Some(j) =
          (k + 1..insts.len()).find(|j| insts[*j].reads_greg(dst))
        {
          res.insert(j);
        }
      }
    }
    if let Some((sreg, src)) = inst.move_to_special() {
      if is_ret_info(sreg) {
        res.insert(k);
        if let Some(j) = (0..k).rev().find(|j| insts[*j].defines_greg(src)) {
          res.insert(j);
        }
      }
    }
  }
  res
}

/// `reg := bit loc` from the stack.
pub(crate) fn insert_predicate_load<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, b: BlockIx,
  pos: usize, reg: PReg, loc: u32,
) -> usize {
  let g = ctx.guards();
  let (cell, bit) = ctx.frame.stack_bit(loc);
  let pos = ctx.emit(func, b, pos, SPInst::LoadCell { dst: g, cell });
  ctx.emit(func, b, pos, SPInst::BTest { dst: reg, src: g, bit })
}

/// `bit loc := reg` on the stack.
pub(crate) fn insert_predicate_spill<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, b: BlockIx,
  pos: usize, reg: PReg, loc: u32,
) -> usize {
  let g = ctx.guards();
  let (cell, bit) = ctx.frame.stack_bit(loc);
  let pos = ctx.emit(func, b, pos, SPInst::LoadCell { dst: g, cell });
  let pos = ctx.emit(
    func,
    b,
    pos,
    SPInst::BCopy { guard: Cond::TRUE, dst: g, src: g, bit, cond: Cond::new(reg) },
  );
  ctx.emit(func, b, pos, SPInst::StoreCell { cell, src: g })
}

// Guarded read-modify-write of one bit of a frame cell.
fn bit_copy_def(
  ctx: &ReductionContext, cell: FrameIx, bit: u32, guard: PReg, cond: Cond,
) -> PendingDef {
  let g = ctx.guards();
  PendingDef {
    insts: vec![
      SPInst::LoadCell { dst: g, cell },
      SPInst::BCopy { guard: Cond::new(guard), dst: g, src: g, bit, cond },
      SPInst::StoreCell { cell, src: g },
    ],
    self_guarded: false,
  }
}

//=============================================================================
// Predication

/// Guard every instruction of the member blocks of `s` by the block's
/// predicate register.
pub(crate) fn apply_predicates<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, s: ScopeIx,
) -> Result<(), ReduceError> {
  let tree = ctx.tree;
  let scope = &tree.scopes[s];
  let pred_tmp = ctx.pred_tmp;
  let ret_info = ctx.regs.ret_info_reg;

  for b in scope.blocks() {
    let p = tree.block_pred(b).ok_or_else(|| {
      ReduceError::InvalidScopeTree(format!("{:?} has no predicate", b))
    })?;
    let guard = ctx.use_preg(s, b, p)?;
    debug!("apply_predicates: {:?} guarded by {:?} in {:?}", b, guard, s);

    let first_term = func.first_terminator(b);
    let skip = collect_return_info_insts(&func.blocks[b].insts);
    let old = std::mem::take(&mut func.blocks[b].insts);
    let mut new = Vec::with_capacity(old.len());
    for (k, inst) in old.into_iter().enumerate() {
      if k >= first_term
        || inst.is_return()
        || inst.is_stack_control()
        || inst.is_frame_setup()
        || skip.contains(k)
      {
        new.push(inst);
        continue;
      }

      if inst.is_call() {
        if !inst.guard().is_always_true() {
          return Err(ReduceError::PredicatedCall(b));
        }
        let cell = ctx.frame.call_cell.ok_or_else(|| {
          ReduceError::InvalidScopeTree("call without a save cell".into())
        })?;
        // The callee picks up its guard from the temporary.
        new.push(ctx.gen(SPInst::PMov {
          guard: Cond::TRUE,
          dst: pred_tmp,
          src: Cond::new(guard),
        }));
        new.push(ctx.gen(SPInst::StoreCell { cell, src: ret_info }));
        new.push(inst);
        new.push(ctx.gen(SPInst::LoadCell { dst: ret_info, cell }));
        continue;
      }

      if guard == PReg::P0 || !inst.is_predicable() {
        new.push(inst);
        continue;
      }

      let old_guard = inst.guard();
      if old_guard.is_always_true() {
        new.push(inst.with_guard(Cond::new(guard)));
      } else if old_guard.same_value(&Cond::new(guard)) {
        new.push(inst);
      } else {
        trace!("  combine {:?} with {:?}", old_guard, guard);
        new.push(ctx.gen(SPInst::PAnd {
          dst: pred_tmp,
          a: Cond::new(guard),
          b: old_guard,
        }));
        new.push(inst.with_guard(Cond::new(pred_tmp)));
      }
    }
    func.blocks[b].insts = new;

    if b != scope.header && ctx.rainfos[s].has_spill_or_load(b) {
      insert_use_spill_load(ctx, func, s, b)?;
    }

    if b == scope.header && tree.is_region_top_level(s) {
      let pos = frame_setup_len(func, b);
      ctx.emit(
        func,
        b,
        pos,
        SPInst::PMov { guard: Cond::TRUE, dst: guard, src: Cond::new(pred_tmp) },
      );
    }
  }
  Ok(())
}

// Bring stack predicates into their use registers at the top of `b`.
fn insert_use_spill_load<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, s: ScopeIx,
  b: BlockIx,
) -> Result<(), ReduceError> {
  let ri = &ctx.rainfos[s];
  ri.check_spills_at(b)?;
  let loads = ri.loads_at(b);
  let mut work = vec![];
  for (p, loc) in loads {
    let reg = ri
      .use_reg(b, p)
      .ok_or(ReduceError::MissingUseLocation { block: b, pred: p })?;
    work.push((ctx.preg(reg), ri.spill_loc(b, p), loc));
  }

  let mut pos = 0;
  for (reg, spill, load) in work {
    if let Some(spill) = spill {
      pos = insert_predicate_spill(ctx, func, b, pos, reg, spill);
    }
    pos = insert_predicate_load(ctx, func, b, pos, reg, load);
  }
  Ok(())
}

//=============================================================================
// Definitions

/// Create the code for every definition of scope `s`.  It is held back and
/// placed by `flush_pending_defs`, once all definitions in the block are
/// known.
pub(crate) fn insert_pred_definitions(
  ctx: &mut ReductionContext, s: ScopeIx,
) -> Result<(), ReduceError> {
  let tree = ctx.tree;
  let scope = &tree.scopes[s];

  for (k, d) in scope.defs.iter().enumerate() {
    let exit_child = tree.child_with_header(s, d.src);
    let guard = ctx.use_preg(exit_child.unwrap_or(s), d.src, d.guard)?;

    let mut cond = d.cond.unwrap_or(Cond::TRUE);
    if cond.kill {
      ctx.killed_conds.push((d.src, cond.reg));
      cond = cond.without_kill();
    }

    let ri = &ctx.rainfos[s];
    let pending = match ri.def_loc(d.pred) {
      Location::Register(r) => {
        let dst = ctx.preg(r);
        match exit_child {
          Some(c) if ctx.rainfos[c].needs_scope_spill => {
            // The bank is restored from the saved copy on loop exit, so
            // that's where the value has to go.
            let cell = ctx.frame.s0_cell(tree.scopes[c].depth);
            bit_copy_def(ctx, cell, dst.s0_bit(), guard, cond)
          }
          _ => {
            let is_first = ri.first_defs.get(&d.pred) == Some(&k);
            let inst = if exit_child.is_some() || !is_first {
              SPInst::PMov { guard: Cond::new(guard), dst, src: cond }
            } else {
              SPInst::PAnd { dst, a: Cond::new(guard), b: cond }
            };
            PendingDef { insts: vec![inst], self_guarded: dst == guard }
          }
        }
      }
      Location::Stack(loc) => {
        let (cell, bit) = ctx.frame.stack_bit(loc);
        bit_copy_def(ctx, cell, bit, guard, cond)
      }
      Location::None => {
        return Err(ReduceError::InvalidScopeTree(format!(
          "definition of always-true {:?}",
          d.pred
        )))
      }
    };
    trace!("  def {:?} in {:?}: {:?}", d.pred, d.src, pending.insts);
    ctx.pending_defs.entry(d.src).or_insert_with(Vec::new).push(pending);
  }
  Ok(())
}

/// Place the held-back definitions before each block's terminators.  Those
/// that overwrite their own guard go last.
pub(crate) fn flush_pending_defs<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>,
) {
  let mut blocks: Vec<BlockIx> = ctx.pending_defs.keys().cloned().collect();
  blocks.sort();
  for b in blocks {
    let defs = ctx.pending_defs.remove(&b).unwrap_or_default();
    let (last, first): (Vec<PendingDef>, Vec<PendingDef>) =
      defs.into_iter().partition(|d| d.self_guarded);
    let mut pos = func.first_terminator(b);
    for def in first.into_iter().chain(last.into_iter()) {
      for inst in def.insts {
        pos = ctx.emit(func, b, pos, inst);
      }
    }
  }
}

/// Clear the stack bits of the predicates of `s` on every entry of its
/// header.
pub(crate) fn insert_stack_loc_initializations<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, s: ScopeIx,
) {
  let tree = ctx.tree;
  let scope = &tree.scopes[s];
  let h = tree.header_pred(s);

  let mut masks: Vec<(FrameIx, u32)> = vec![];
  for (p, loc) in ctx.rainfos[s].def_locs.iter() {
    if Some(*p) == h {
      continue;
    }
    if let Location::Stack(loc) = loc {
      let (cell, bit) = ctx.frame.stack_bit(*loc);
      match masks.iter_mut().find(|(c, _)| *c == cell) {
        Some((_, mask)) => *mask |= 1 << bit,
        None => masks.push((cell, 1 << bit)),
      }
    }
  }
  masks.sort();

  let g = ctx.guards();
  let header = scope.header;
  let mut pos =
    if scope.is_top_level() { frame_setup_len(func, header) } else { 0 };
  for (cell, mask) in masks {
    pos = ctx.emit(func, header, pos, SPInst::LoadCell { dst: g, cell });
    pos = ctx.emit(
      func,
      header,
      pos,
      SPInst::AndImm { dst: g, src: g, imm: !mask },
    );
    pos = ctx.emit(func, header, pos, SPInst::StoreCell { cell, src: g });
  }
}

/// A definition that read a branch condition took its kill flag away; give
/// it to the last instruction of the block that still reads the condition.
pub(crate) fn fixup_kill_flags<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>,
) {
  for (b, reg) in std::mem::take(&mut ctx.killed_conds) {
    let first_term = func.first_terminator(b);
    let insts = &mut func.blocks[b].insts;
    if let Some(k) = (0..first_term).rev().find(|k| insts[*k].reads_preg(reg))
    {
      insts[k] = insts[k].with_kill(reg, true);
    }
  }
}
