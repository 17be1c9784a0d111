/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Lay out the blocks of the predicated function as one chain, following the
//! scope tree.  Each loop gets a preheader that sets up its predicates and
//! counter, and a branch block holding the only remaining branch: the back
//! edge to the loop header.

use log::debug;

use crate::code_insertion::insert_predicate_load;
use crate::data_structures::{BlockIx, Cond, GReg, PReg, ScopeIx};
use crate::interface::{MachineFunc, ReduceError, SPInst, TargetInst};
use crate::rainfo::Location;
use crate::reduce::ReductionContext;
use crate::scope::WalkEvent;

struct Chain {
  last: Option<BlockIx>,
}

impl Chain {
  /// Make `b` the fall-through successor of the previous block.
  fn next_block<I: TargetInst>(
    &mut self, ctx: &mut ReductionContext, func: &mut MachineFunc<I>,
    b: BlockIx,
  ) {
    func.remove_all_succs(b);
    ctx.stats.removed_branches += func.remove_branches(b);
    if let Some(last) = self.last {
      func.add_edge(last, b);
      func.move_after(b, last);
    }
    self.last = Some(b);
  }
}

pub(crate) fn linearize<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>,
) -> Result<(), ReduceError> {
  let tree = ctx.tree;
  let mut chain = Chain { last: None };
  for ev in tree.walk() {
    match ev {
      WalkEvent::Enter(s) if !tree.scopes[s].is_top_level() => {
        enter_subscope(ctx, func, &mut chain, s)?
      }
      WalkEvent::Block(b) => chain.next_block(ctx, func, b),
      WalkEvent::Exit(s) if !tree.scopes[s].is_top_level() => {
        exit_subscope(ctx, func, &mut chain, s)?
      }
      _ => {}
    }
  }
  Ok(())
}

fn enter_subscope<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, chain: &mut Chain,
  s: ScopeIx,
) -> Result<(), ReduceError> {
  let tree = ctx.tree;
  let scope = &tree.scopes[s];
  let parent = scope.parent.unwrap_or_else(|| tree.root());
  let header = scope.header;
  let h = tree.header_pred(s).ok_or_else(|| {
    ReduceError::InvalidScopeTree(format!("{:?} has no header predicate", s))
  })?;
  let g = ctx.guards();
  let name = format!("{}.preheader", func.blocks[header].name);
  let ph = func.add_block(name, vec![]);
  debug!("enter {:?}: preheader {:?}", s, ph);

  let spills_bank = ctx.rainfos[s].needs_scope_spill;
  if spills_bank {
    let cell = ctx.frame.s0_cell(scope.depth);
    ctx.append(func, ph, SPInst::ReadPredBank { dst: g });
    ctx.append(func, ph, SPInst::StoreCell { cell, src: g });
  }

  // The loop's header predicate, from wherever the parent keeps it.
  let child_reg = ctx.header_preg(s)?;
  match ctx.rainfos[parent].load_loc(header, h) {
    Some(loc) => {
      let pos = func.blocks[ph].insts.len();
      insert_predicate_load(ctx, func, ph, pos, child_reg, loc);
    }
    None => {
      let parent_reg = ctx.use_preg(parent, header, h)?;
      if parent_reg != child_reg {
        ctx.append(
          func,
          ph,
          SPInst::PMov {
            guard: Cond::TRUE,
            dst: child_reg,
            src: Cond::new(parent_reg),
          },
        );
      }
    }
  }

  // Parent predicates first written on this loop's exit edges are only ever
  // conditionally set.
  let rp = &ctx.rainfos[parent];
  let mut cleared: Vec<PReg> = vec![];
  for (k, d) in tree.scopes[parent].defs.iter().enumerate() {
    if d.src != header || rp.first_defs.get(&d.pred) != Some(&k) {
      continue;
    }
    if let Location::Register(r) = rp.def_loc(d.pred) {
      let reg = ctx.preg(r);
      if !cleared.contains(&reg) {
        cleared.push(reg);
      }
    }
  }
  if !cleared.is_empty() {
    if spills_bank {
      let cell = ctx.frame.s0_cell(scope.depth);
      let mask = cleared.iter().fold(0u32, |m, r| m | 1 << r.s0_bit());
      ctx.append(func, ph, SPInst::LoadCell { dst: g, cell });
      ctx.append(func, ph, SPInst::AndImm { dst: g, src: g, imm: !mask });
      ctx.append(func, ph, SPInst::StoreCell { cell, src: g });
    } else {
      for reg in cleared {
        ctx.append(func, ph, SPInst::PClear { dst: reg });
      }
    }
  }

  if let Some(bound) = tree.loop_bound(s) {
    let cell = ctx.frame.loop_counter(scope.depth);
    ctx.append(func, ph, SPInst::LoadImm { dst: g, imm: bound });
    ctx.append(func, ph, SPInst::StoreCell { cell, src: g });
    ctx.stats.loop_counters += 1;
  }

  chain.next_block(ctx, func, ph);
  Ok(())
}

fn exit_subscope<I: TargetInst>(
  ctx: &mut ReductionContext, func: &mut MachineFunc<I>, chain: &mut Chain,
  s: ScopeIx,
) -> Result<(), ReduceError> {
  let tree = ctx.tree;
  let scope = &tree.scopes[s];
  let header = scope.header;
  let g = ctx.guards();

  let name = format!("{}.branch", func.blocks[header].name);
  let br = func.add_block(name, vec![]);
  chain.next_block(ctx, func, br);
  debug!("exit {:?}: branch block {:?}", s, br);

  // Predicates evicted over the back edge.
  let ri = &ctx.rainfos[s];
  let mut reloads = vec![];
  for (p, loc) in ri.loads_at(header) {
    let reg = ri
      .use_reg(header, p)
      .ok_or(ReduceError::MissingUseLocation { block: header, pred: p })?;
    reloads.push((ctx.preg(reg), loc));
  }
  for (reg, loc) in reloads {
    let pos = func.blocks[br].insts.len();
    insert_predicate_load(ctx, func, br, pos, reg, loc);
  }

  let cond = match tree.loop_bound(s) {
    Some(_) => {
      let cell = ctx.frame.loop_counter(scope.depth);
      let zero: GReg = ctx.regs.zero_reg;
      let tmp = ctx.pred_tmp;
      ctx.append(func, br, SPInst::LoadCell { dst: g, cell });
      ctx.append(func, br, SPInst::SubImm { dst: g, src: g, imm: 1 });
      ctx.append(func, br, SPInst::CmpLt { dst: tmp, lhs: zero, rhs: g });
      ctx.append(func, br, SPInst::StoreCell { cell, src: g });
      Cond::new(tmp)
    }
    None => Cond::new(ctx.header_preg(s)?),
  };
  ctx.append(func, br, SPInst::Branch { cond, target: header });
  func.add_edge(br, header);

  if ctx.rainfos[s].needs_scope_spill {
    let name = format!("{}.postlude", func.blocks[header].name);
    let post = func.add_block(name, vec![]);
    let cell = ctx.frame.s0_cell(scope.depth);
    ctx.append(func, post, SPInst::LoadCell { dst: g, cell });

    // The function's own predicates are live across the loop untouched by
    // the saved copy; put their current values back before restoring.
    let mut live_out: Vec<PReg> = vec![];
    for succ in ctx.facts.scope_succs.get(&s).cloned().unwrap_or_default() {
      for reg in func.blocks[succ].live_ins.iter() {
        if ctx.unavail.contains(reg) && !live_out.contains(reg) {
          live_out.push(*reg);
        }
      }
    }
    live_out.sort();
    for reg in live_out {
      ctx.append(
        func,
        post,
        SPInst::BCopy {
          guard: Cond::TRUE,
          dst: g,
          src: g,
          bit: reg.s0_bit(),
          cond: Cond::new(reg),
        },
      );
    }
    ctx.append(func, post, SPInst::WritePredBank { src: g });
    chain.next_block(ctx, func, post);
  }
  Ok(())
}
