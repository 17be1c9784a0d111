/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Top level driver for the single-path reduction.

use log::{debug, info, log_enabled, Level};

use crate::checker::check_reduced;
use crate::code_insertion::{
  apply_predicates, fixup_kill_flags, flush_pending_defs,
  insert_pred_definitions, insert_stack_loc_initializations,
};
use crate::data_structures::{
  BlockIx, GReg, Map, PReg, PredIx, ScopeIx, TypedIxVec,
};
use crate::frame::{resolve_frame_indices, FrameLayout};
use crate::interface::{
  MachineFunc, ReduceError, ReduceOptions, ReduceResult, ReduceStats,
  SPInst, TargetInst, TargetRegs,
};
use crate::ldst_elim::{eliminate_dead_stores, eliminate_redundant_loads};
use crate::linearize::linearize;
use crate::merge::merge_blocks;
use crate::rainfo::{compute_reg_alloc, Location, RAInfo};
use crate::scope::{ScopeFacts, ScopeTree};

/// A definition waiting to be placed before its block's terminators.
pub(crate) struct PendingDef {
  pub insts: Vec<SPInst>,
  /// The definition overwrites the register that guards it.
  pub self_guarded: bool,
}

/// Everything the phases of the reduction share.
pub(crate) struct ReductionContext<'a> {
  pub tree: &'a ScopeTree,
  pub regs: &'a TargetRegs,
  /// Allocatable predicate registers; `Location::Register(n)` is `avail[n]`.
  pub avail: Vec<PReg>,
  /// Predicate registers the function itself uses.
  pub unavail: Vec<PReg>,
  pub pred_tmp: PReg,
  pub rainfos: TypedIxVec<ScopeIx, RAInfo>,
  pub frame: FrameLayout,
  pub facts: ScopeFacts,
  pub pending_defs: Map<BlockIx, Vec<PendingDef>>,
  /// Blocks whose branch condition lost its kill flag to a definition.
  pub killed_conds: Vec<(BlockIx, PReg)>,
  pub stats: ReduceStats,
}

impl<'a> ReductionContext<'a> {
  pub fn guards(&self) -> GReg {
    self.regs.guards_reg
  }

  pub fn preg(&self, reg: u32) -> PReg {
    self.avail[reg as usize]
  }

  /// Build a client instruction, counting it.
  pub fn gen<I: TargetInst>(&mut self, inst: SPInst) -> I {
    self.stats.inserted_insts += 1;
    I::gen_inst(inst)
  }

  /// Insert at `pos`, returning the position after it.
  pub fn emit<I: TargetInst>(
    &mut self, func: &mut MachineFunc<I>, b: BlockIx, pos: usize,
    inst: SPInst,
  ) -> usize {
    let inst = self.gen(inst);
    func.insert(b, pos, inst);
    pos + 1
  }

  /// Append to the end of `b`.
  pub fn append<I: TargetInst>(
    &mut self, func: &mut MachineFunc<I>, b: BlockIx, inst: SPInst,
  ) {
    let pos = func.blocks[b].insts.len();
    self.emit(func, b, pos, inst);
  }

  /// The register `p` is read from in block `b` of scope `s`; P0 for the
  /// always-true predicate.
  pub fn use_preg(
    &self, s: ScopeIx, b: BlockIx, p: PredIx,
  ) -> Result<PReg, ReduceError> {
    let ri = &self.rainfos[s];
    match ri.use_reg(b, p) {
      Some(r) => Ok(self.preg(r)),
      None if ri.def_loc(p) == Location::None => Ok(PReg::P0),
      None => Err(ReduceError::MissingUseLocation { block: b, pred: p }),
    }
  }

  /// The register holding a loop's header predicate inside the loop.
  pub fn header_preg(&self, s: ScopeIx) -> Result<PReg, ReduceError> {
    let header = self.tree.scopes[s].header;
    let h = self.tree.header_pred(s).ok_or_else(|| {
      ReduceError::InvalidScopeTree(format!("{:?} has no header predicate", s))
    })?;
    self.use_preg(s, header, h)
  }
}

/// Transform `func` into single-path code: every conditional branch except
/// the loop back edges is replaced by predication, and the predicates of the
/// scope tree are assigned to the target's predicate registers and, where
/// those run out, to bits in the stack frame.
///
/// A function the tree doesn't mark as single-path is returned unchanged.
pub fn reduce_single_path<I: TargetInst>(
  func: &mut MachineFunc<I>, tree: &ScopeTree, regs: &TargetRegs,
  opts: &ReduceOptions,
) -> Result<ReduceResult, ReduceError> {
  info!("reduce_single_path: begin {}", func.name);

  if !tree.single_path {
    info!("reduce_single_path: {} is not single-path", func.name);
    return Ok(ReduceResult {
      stats: ReduceStats::default(),
      rainfos: vec![],
      avail_pregs: vec![],
      pred_tmp: None,
      block_map: Map::default(),
    });
  }

  let facts = tree.validate(func)?;

  // Predicate registers the function leaves alone are ours.
  let mut avail = vec![];
  let mut unavail = vec![];
  for n in 1..regs.num_pregs {
    let reg = PReg(n);
    if func.mentions_preg(reg) {
      unavail.push(reg);
    } else {
      avail.push(reg);
    }
  }
  let pred_tmp = avail.pop().ok_or(ReduceError::NoTempPredReg)?;
  debug!(
    "  avail {:?}, unavail {:?}, temp {:?}",
    avail, unavail, pred_tmp
  );

  let rainfos = compute_reg_alloc(tree, avail.len() as u32)?;
  let frame = FrameLayout::create(func, tree, &rainfos);

  let mut ctx = ReductionContext {
    tree,
    regs,
    avail,
    unavail,
    pred_tmp,
    rainfos,
    frame,
    facts,
    pending_defs: Map::default(),
    killed_conds: vec![],
    stats: ReduceStats::default(),
  };

  let scopes = tree.dfs_scopes();
  for &s in &scopes {
    apply_predicates(&mut ctx, func, s)?;
  }
  for &s in &scopes {
    insert_pred_definitions(&mut ctx, s)?;
    insert_stack_loc_initializations(&mut ctx, func, s);
  }
  flush_pending_defs(&mut ctx, func);
  fixup_kill_flags(&mut ctx, func);

  linearize(&mut ctx, func)?;
  merge_blocks(func);

  let cells = ctx.frame.synthetic_cells();
  if opts.eliminate_redundant_loads {
    ctx.stats.eliminated_ld_st +=
      eliminate_redundant_loads(func, ctx.guards(), &cells);
  }
  if opts.dead_store_elim {
    ctx.stats.eliminated_ld_st += eliminate_dead_stores(func, &cells);
  }

  resolve_frame_indices(func);

  if opts.run_checker {
    check_reduced(func, tree).map_err(ReduceError::Checker)?;
  }

  let block_map = func.renumber();

  if log_enabled!(Level::Debug) {
    for b in func.layout.iter() {
      debug!("{:?} {}:", b, func.blocks[*b].name);
      for inst in &func.blocks[*b].insts {
        debug!("    {:?}", inst);
      }
    }
  }
  info!(
    "reduce_single_path: end {}: {:?}",
    func.name, ctx.stats
  );

  Ok(ReduceResult {
    stats: ctx.stats,
    rainfos: ctx.rainfos.iter().cloned().collect(),
    avail_pregs: ctx.avail,
    pred_tmp: Some(ctx.pred_tmp),
    block_map,
  })
}
