/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Predicate register allocation over the scope tree.
//!
//! Each scope is allocated on its own, parents before children.  Within a
//! scope, node `i` has two event points: `U(i) = 2i`, where the node's guard
//! is read, and `D(i) = 2i + 1`, where the definitions on its outgoing edges
//! happen.  Every predicate gets a half-open live interval `[start, end)` over
//! these points and a linear scan hands out the registers.  Predicates that
//! don't fit live in stack bits, and are brought into a register at each
//! block that needs them.

use log::{debug, trace};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::data_structures::{BlockIx, Map, PredIx, ScopeIx, TypedIxVec};
use crate::interface::ReduceError;
use crate::scope::{ScopeNode, ScopeTree};

//=============================================================================
// Locations and allocation records

/// Where a predicate lives within its scope.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Location {
  /// Index into the list of allocatable predicate registers.
  Register(u32),
  /// Stack bit; bit `n % 32` of excess word `n / 32`.
  Stack(u32),
  /// Always true.
  None,
}

/// Per-block small maps from predicate to register index or stack bit.
pub type BlockLocs = Map<BlockIx, Vec<(PredIx, u32)>>;

fn lookup(locs: &BlockLocs, b: BlockIx, p: PredIx) -> Option<u32> {
  locs.get(&b)?.iter().find(|(q, _)| *q == p).map(|(_, n)| *n)
}

fn record(locs: &mut BlockLocs, b: BlockIx, p: PredIx, n: u32) {
  let v = locs.entry(b).or_insert_with(Vec::new);
  if !v.iter().any(|(q, _)| *q == p) {
    v.push((p, n));
  }
}

/// The outcome of allocating one scope.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RAInfo {
  pub scope: ScopeIx,
  pub def_locs: Map<PredIx, Location>,
  /// Register each block reads a predicate from.
  pub use_locs: BlockLocs,
  /// Stack bit a predicate is loaded from at the beginning of a block.  For a
  /// child loop's header block, the load happens in the preheader; for this
  /// scope's own header, in the loop's branch block.
  pub load_locs: BlockLocs,
  /// Stack bit the previous content of the use register is saved to, before
  /// the load of the keyed predicate.
  pub spill_locs: BlockLocs,
  /// Index into the scope's definitions of each predicate's first definition.
  pub first_defs: Map<PredIx, usize>,
  pub def_counts: Map<PredIx, u32>,
  pub first_stack_loc: u32,
  pub num_stack_locs: u32,
  /// The scope uses registers the enclosing scopes need preserved, so the
  /// whole bank is saved on entry and restored on exit.
  pub needs_scope_spill: bool,
  pub preserve: Vec<u32>,
  pub used_regs: Vec<u32>,
}

impl RAInfo {
  pub fn def_loc(&self, p: PredIx) -> Location {
    self.def_locs.get(&p).cloned().unwrap_or(Location::None)
  }

  pub fn use_reg(&self, b: BlockIx, p: PredIx) -> Option<u32> {
    lookup(&self.use_locs, b, p)
  }

  pub fn load_loc(&self, b: BlockIx, p: PredIx) -> Option<u32> {
    lookup(&self.load_locs, b, p)
  }

  pub fn spill_loc(&self, b: BlockIx, p: PredIx) -> Option<u32> {
    lookup(&self.spill_locs, b, p)
  }

  pub fn loads_at(&self, b: BlockIx) -> Vec<(PredIx, u32)> {
    self.load_locs.get(&b).cloned().unwrap_or_default()
  }

  pub fn spills_at(&self, b: BlockIx) -> Vec<(PredIx, u32)> {
    self.spill_locs.get(&b).cloned().unwrap_or_default()
  }

  /// Every predicate spilled at `b` makes room for one loaded there.
  pub fn check_spills_at(&self, b: BlockIx) -> Result<(), ReduceError> {
    let loads = self.loads_at(b);
    for (p, _) in self.spills_at(b) {
      if !loads.iter().any(|(q, _)| *q == p) {
        return Err(ReduceError::SpillWithoutLoad { block: b, pred: p });
      }
    }
    Ok(())
  }

  pub fn has_spill_or_load(&self, b: BlockIx) -> bool {
    self.load_locs.contains_key(&b) || self.spill_locs.contains_key(&b)
  }

  pub fn is_first_def(&self, def_index: usize) -> bool {
    self.first_defs.values().any(|k| *k == def_index)
  }

  pub fn has_multiple_defs(&self, p: PredIx) -> bool {
    self.def_counts.get(&p).map_or(false, |n| *n > 1)
  }

  /// One past the last stack bit used by this scope.
  pub fn stack_locs_end(&self) -> u32 {
    self.first_stack_loc + self.num_stack_locs
  }
}

//=============================================================================
// Events and intervals

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum UseSite {
  Block(BlockIx),
  Subscope(ScopeIx),
  // The loop's back edge, past the last node.
  End,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum EventKind {
  Use(UseSite),
  Def { full: bool },
}

#[derive(Copy, Clone, Debug)]
struct Event {
  point: u32,
  kind: EventKind,
}

#[derive(Copy, Clone, Debug)]
struct Holder {
  pred: PredIx,
  reg: u32,
  start: u32,
  end: u32,
}

impl Holder {
  fn overlaps(&self, start: u32, end: u32) -> bool {
    self.start < end && start < self.end
  }
}

// Where an evicted register gets its predicate back.
enum Reload {
  At(BlockIx),
  Never,
}

enum AllocFailure {
  // No register for the loop header predicate.
  Pressure,
  // A stack predicate needs a temporary and nothing can be evicted.
  NoEvictionCandidate,
}

/// What a child scope inherits from its parent.
#[derive(Clone, Debug)]
struct ScopeContext {
  /// Registers in preference order: ones the parent doesn't need first.
  pool: Vec<u32>,
  preserve: Vec<u32>,
  preferred_header_reg: Option<u32>,
  first_stack_loc: u32,
}

//=============================================================================
// Per-scope allocation

struct ScopeAlloc<'a> {
  tree: &'a ScopeTree,
  scope: ScopeIx,
  header_pred: PredIx,
  // The header predicate of the function's root: always true.
  always_true: Option<PredIx>,
  events: Map<PredIx, Vec<Event>>,
  first_defs: Map<PredIx, usize>,
  def_counts: Map<PredIx, u32>,
}

struct Allocation {
  info: RAInfo,
  holders: Vec<Holder>,
}

impl<'a> ScopeAlloc<'a> {
  fn new(tree: &'a ScopeTree, s: ScopeIx) -> Result<Self, ReduceError> {
    let scope = &tree.scopes[s];
    let header_pred = tree.header_pred(s).ok_or_else(|| {
      ReduceError::InvalidScopeTree(format!("{:?} has no header predicate", s))
    })?;
    let always_true =
      if tree.is_root_top_level(s) { Some(header_pred) } else { None };

    // Definitions in node order.
    let mut order = vec![];
    for (k, d) in scope.defs.iter().enumerate() {
      let pos = tree.node_position(s, d.src).ok_or_else(|| {
        ReduceError::InvalidScopeTree(format!(
          "definition source {:?} is not a node of {:?}",
          d.src, s
        ))
      })?;
      order.push((pos, k));
    }
    order.sort();

    let mut first_defs = Map::default();
    let mut def_counts = Map::default();
    for &(_, k) in &order {
      let p = scope.defs[k].pred;
      first_defs.entry(p).or_insert(k);
      *def_counts.entry(p).or_insert(0) += 1;
    }

    let mut events: Map<PredIx, Vec<Event>> = Map::default();
    let mut push = |p: PredIx, point: u32, kind: EventKind| {
      if Some(p) != always_true {
        events.entry(p).or_insert_with(Vec::new).push(Event { point, kind });
      }
    };
    for (i, node) in scope.nodes.iter().enumerate() {
      let u = 2 * i as u32;
      let d = u + 1;
      match *node {
        ScopeNode::Block(b) => {
          if let Some(p) = tree.block_pred(b) {
            push(p, u, EventKind::Use(UseSite::Block(b)));
          }
          for &(_, k) in order.iter().filter(|(pos, _)| *pos == i) {
            let def = &scope.defs[k];
            let full = first_defs.get(&def.pred) == Some(&k);
            push(def.guard, d, EventKind::Use(UseSite::Block(b)));
            push(def.pred, d, EventKind::Def { full });
          }
        }
        ScopeNode::Subscope(c) => {
          if let Some(hc) = tree.header_pred(c) {
            push(hc, u, EventKind::Use(UseSite::Subscope(c)));
          }
          for &(_, k) in order.iter().filter(|(pos, _)| *pos == i) {
            push(scope.defs[k].pred, d, EventKind::Def { full: false });
          }
        }
      }
    }
    if always_true.is_none() {
      let end = 2 * scope.nodes.len() as u32;
      push(header_pred, end, EventKind::Use(UseSite::End));
    }

    for (p, evs) in events.iter_mut() {
      // Uses before definitions at the same point.
      evs.sort_by_key(|e| {
        (e.point, matches!(e.kind, EventKind::Def { .. }) as u32)
      });
      if *p != header_pred {
        if let Some(first) = evs.first() {
          if let EventKind::Use(_) = first.kind {
            return Err(ReduceError::UseWithoutDef(*p));
          }
        }
      }
    }

    Ok(Self {
      tree,
      scope: s,
      header_pred,
      always_true,
      events,
      first_defs,
      def_counts,
    })
  }

  fn interval(&self, p: PredIx) -> (u32, u32) {
    let evs = &self.events[&p];
    let start = if p == self.header_pred { 0 } else { evs[0].point };
    let end = evs.last().map_or(start, |e| e.point) + 1;
    (start, end)
  }

  fn has_event_at(&self, p: PredIx, i: usize) -> bool {
    let u = 2 * i as u32;
    self.events[&p].iter().any(|e| e.point == u || e.point == u + 1)
  }

  fn next_event_after(&self, p: PredIx, point: u32) -> Option<Event> {
    self.events[&p].iter().find(|e| e.point > point).cloned()
  }

  // Whatever `p` holds on entry to node `i` is dead: the next thing that
  // happens to it is a full redefinition on the node's outgoing edges.
  fn is_dead_at(&self, p: PredIx, i: usize) -> bool {
    let u = 2 * i as u32;
    match self.events[&p].iter().find(|e| e.point >= u) {
      Some(e) => e.point == u + 1 && e.kind == EventKind::Def { full: true },
      None => false,
    }
  }

  fn is_last_event(&self, p: PredIx, ev: &Event) -> bool {
    self.events[&p].last().map_or(false, |e| e.point == ev.point)
  }

  fn run(
    &self, cx: &ScopeContext, reserve_temp: bool,
  ) -> Result<Allocation, AllocFailure> {
    let scope = &self.tree.scopes[self.scope];
    let h = self.header_pred;

    // The temporary, if one is set aside, is the least valuable register.
    let reserved = if reserve_temp {
      cx.pool
        .iter()
        .rev()
        .find(|r| !cx.preserve.contains(r))
        .or_else(|| cx.pool.last())
        .cloned()
    } else {
      None
    };
    let pool: Vec<u32> =
      cx.pool.iter().cloned().filter(|r| Some(*r) != reserved).collect();

    // Linear scan, header predicate first.
    let mut preds: Vec<PredIx> = self.events.keys().cloned().collect();
    preds.sort_by_key(|p| (*p != h, self.interval(*p).0, *p));

    let mut locs: Map<PredIx, Location> = Map::default();
    let mut active: Vec<Holder> = vec![];
    let mut holders: Vec<Holder> = vec![];
    for &p in &preds {
      let (start, end) = self.interval(p);
      active.retain(|a| a.end > start);
      let is_free = |r: &u32| !active.iter().any(|a| a.reg == *r);
      let choice = if p == h {
        cx.preferred_header_reg
          .filter(|r| pool.contains(r) && is_free(r))
          .or_else(|| pool.iter().cloned().find(|r| is_free(r)))
      } else {
        pool.iter().cloned().find(|r| is_free(r))
      };
      let me = Holder { pred: p, reg: 0, start, end };
      match choice {
        Some(reg) => {
          active.push(Holder { reg, ..me });
          locs.insert(p, Location::Register(reg));
        }
        None if p == h => return Err(AllocFailure::Pressure),
        None => {
          let victim = active
            .iter()
            .enumerate()
            .filter(|(_, a)| a.pred != h)
            .max_by_key(|(_, a)| (a.end, std::cmp::Reverse(a.pred)))
            .map(|(n, a)| (n, *a));
          match victim {
            Some((n, v)) if v.end > end => {
              trace!("  spill {:?} for {:?}", v.pred, p);
              active.remove(n);
              locs.insert(v.pred, Location::Stack(0));
              active.push(Holder { reg: v.reg, ..me });
              locs.insert(p, Location::Register(v.reg));
            }
            _ => {
              locs.insert(p, Location::Stack(0));
            }
          }
        }
      }
    }
    for &p in &preds {
      if let Some(Location::Register(reg)) = locs.get(&p) {
        let (start, end) = self.interval(p);
        holders.push(Holder { pred: p, reg: *reg, start, end });
      }
    }

    // Stack bits for the predicates that got none, in predicate order.
    let mut next_stack = cx.first_stack_loc;
    let mut stacked: Vec<PredIx> = locs
      .iter()
      .filter(|(_, l)| matches!(l, Location::Stack(_)))
      .map(|(p, _)| *p)
      .collect();
    stacked.sort();
    for p in stacked {
      locs.insert(p, Location::Stack(next_stack));
      next_stack += 1;
    }

    let mut info = RAInfo {
      scope: self.scope,
      def_locs: locs.clone(),
      use_locs: Map::default(),
      load_locs: Map::default(),
      spill_locs: Map::default(),
      first_defs: self.first_defs.clone(),
      def_counts: self.def_counts.clone(),
      first_stack_loc: cx.first_stack_loc,
      num_stack_locs: 0,
      needs_scope_spill: false,
      preserve: cx.preserve.clone(),
      used_regs: holders.iter().map(|x| x.reg).collect(),
    };
    if let Some(p) = self.always_true {
      info.def_locs.insert(p, Location::None);
    }

    // Use locations, with loads from and spills to the stack.
    // (register, evicted predicate, point up to which its value is elsewhere)
    let mut evicted: Vec<(u32, PredIx, u32)> = vec![];
    let mut evict_slots: Map<PredIx, u32> = Map::default();
    for (i, node) in scope.nodes.iter().enumerate() {
      let u = 2 * i as u32;
      evicted.retain(|(_, _, until)| *until >= u);
      match *node {
        ScopeNode::Block(b) => {
          let p = match self.tree.block_pred(b) {
            Some(p) if Some(p) != self.always_true => p,
            _ => continue,
          };
          match locs.get(&p).cloned() {
            Some(Location::Register(r)) => record(&mut info.use_locs, b, p, r),
            Some(Location::Stack(s)) => {
              let temp = cx.pool.iter().cloned().find(|r| {
                holders.iter().all(|x| {
                  x.reg != *r
                    || !x.overlaps(u, u + 2)
                    || self.is_dead_at(x.pred, i)
                    || evicted.iter().any(|(er, q, until)| {
                      *er == *r && *q == x.pred && *until >= u + 2
                    })
                })
              });
              if let Some(r) = temp {
                record(&mut info.use_locs, b, p, r);
                record(&mut info.load_locs, b, p, s);
                info.used_regs.push(r);
                continue;
              }

              let mut best: Option<(Holder, Event, Reload)> = None;
              for x in &holders {
                if !x.overlaps(u, u + 2)
                  || self.has_event_at(x.pred, i)
                  || evicted.iter().any(|(er, _, _)| *er == x.reg)
                {
                  continue;
                }
                let next = match self.next_event_after(x.pred, u + 1) {
                  Some(ev) => ev,
                  None => continue,
                };
                let reload = match next.kind {
                  EventKind::Use(UseSite::Block(bj)) => Reload::At(bj),
                  EventKind::Use(UseSite::Subscope(c)) => {
                    if !self.is_last_event(x.pred, &next) {
                      continue;
                    }
                    Reload::At(self.tree.scopes[c].header)
                  }
                  EventKind::Use(UseSite::End) => {
                    if scope.is_top_level() {
                      Reload::Never
                    } else {
                      Reload::At(scope.header)
                    }
                  }
                  EventKind::Def { full: true } => Reload::Never,
                  EventKind::Def { full: false } => continue,
                };
                let better = match &best {
                  None => true,
                  Some((bx, bev, _)) => {
                    (next.point, std::cmp::Reverse(x.pred))
                      > (bev.point, std::cmp::Reverse(bx.pred))
                  }
                };
                if better {
                  best = Some((*x, next, reload));
                }
              }

              let (victim, next, reload) =
                best.ok_or(AllocFailure::NoEvictionCandidate)?;
              record(&mut info.use_locs, b, p, victim.reg);
              record(&mut info.load_locs, b, p, s);
              match reload {
                Reload::At(bj) => {
                  let slot =
                    *evict_slots.entry(victim.pred).or_insert_with(|| {
                      next_stack += 1;
                      next_stack - 1
                    });
                  trace!(
                    "  {:?}: evict {:?} from reg {} to stack {}",
                    b,
                    victim.pred,
                    victim.reg,
                    slot
                  );
                  record(&mut info.spill_locs, b, p, slot);
                  record(&mut info.load_locs, bj, victim.pred, slot);
                }
                // Never read again before it is overwritten: nothing to save.
                Reload::Never => trace!(
                  "  {:?}: take reg {} from {:?}",
                  b,
                  victim.reg,
                  victim.pred
                ),
              }
              evicted.push((victim.reg, victim.pred, next.point));
            }
            _ => {}
          }
        }
        ScopeNode::Subscope(c) => {
          let hc = match self.tree.header_pred(c) {
            Some(p) if Some(p) != self.always_true => p,
            _ => continue,
          };
          let hb = self.tree.scopes[c].header;
          match locs.get(&hc).cloned() {
            Some(Location::Register(r)) => {
              record(&mut info.use_locs, hb, hc, r)
            }
            Some(Location::Stack(s)) => record(&mut info.load_locs, hb, hc, s),
            _ => {}
          }
        }
      }
    }

    info.num_stack_locs = next_stack - cx.first_stack_loc;
    info.used_regs.sort();
    info.used_regs.dedup();
    info.needs_scope_spill = !scope.is_top_level()
      && info.used_regs.iter().any(|r| cx.preserve.contains(r));

    Ok(Allocation { info, holders })
  }

  fn child_context(
    &self, alloc: &Allocation, cx: &ScopeContext, c: ScopeIx, num_regs: u32,
  ) -> ScopeContext {
    let scope = &self.tree.scopes[self.scope];
    let i = scope
      .nodes
      .iter()
      .position(|n| *n == ScopeNode::Subscope(c))
      .unwrap_or(0);
    let d = 2 * i as u32 + 1;

    let mut preserve: Vec<u32> = alloc
      .holders
      .iter()
      .filter(|x| x.start <= d && x.end > d)
      .map(|x| x.reg)
      .collect();
    if !alloc.info.needs_scope_spill {
      preserve.extend(cx.preserve.iter().cloned());
    }
    preserve.sort();
    preserve.dedup();

    let preferred_header_reg = self
      .tree
      .header_pred(c)
      .and_then(|hc| match alloc.info.def_loc(hc) {
        Location::Register(r) if !preserve.contains(&r) => Some(r),
        _ => None,
      });

    let mut pool: Vec<u32> =
      (0..num_regs).filter(|r| !preserve.contains(r)).collect();
    pool.extend((0..num_regs).filter(|r| preserve.contains(r)));

    ScopeContext {
      pool,
      preserve,
      preferred_header_reg,
      first_stack_loc: alloc.info.stack_locs_end(),
    }
  }
}

//=============================================================================
// Top level

/// Allocate `num_regs` predicate registers to every scope of the tree.
pub fn compute_reg_alloc(
  tree: &ScopeTree, num_regs: u32,
) -> Result<TypedIxVec<ScopeIx, RAInfo>, ReduceError> {
  debug!("compute_reg_alloc: {} scopes, {} regs", tree.scopes.len(), num_regs);

  let mut infos: Vec<Option<RAInfo>> = vec![None; tree.scopes.len() as usize];
  let mut contexts: Map<ScopeIx, ScopeContext> = Map::default();
  contexts.insert(
    tree.root(),
    ScopeContext {
      pool: (0..num_regs).collect(),
      preserve: vec![],
      preferred_header_reg: None,
      first_stack_loc: 0,
    },
  );

  for s in tree.dfs_scopes() {
    let cx = contexts.remove(&s).ok_or_else(|| {
      ReduceError::InvalidScopeTree(format!("{:?} has no parent context", s))
    })?;
    let sa = ScopeAlloc::new(tree, s)?;
    let alloc = match sa.run(&cx, false) {
      Ok(alloc) => alloc,
      Err(AllocFailure::Pressure) => {
        return Err(ReduceError::RegisterPressure(s))
      }
      // Setting aside the only register would leave the header without one.
      Err(AllocFailure::NoEvictionCandidate) if cx.pool.len() > 1 => {
        debug!("  {:?}: retrying with a reserved temporary", s);
        sa.run(&cx, true).map_err(|_| ReduceError::RegisterPressure(s))?
      }
      Err(AllocFailure::NoEvictionCandidate) => {
        return Err(ReduceError::RegisterPressure(s))
      }
    };
    debug!(
      "  {:?}: {} stack locs from {}, spill bank {}",
      s,
      alloc.info.num_stack_locs,
      alloc.info.first_stack_loc,
      alloc.info.needs_scope_spill
    );
    for c in tree.scopes[s].subscopes() {
      contexts.insert(c, sa.child_context(&alloc, &cx, c, num_regs));
    }
    infos[s.get_usize()] = Some(alloc.info);
  }

  let mut res = TypedIxVec::new();
  for (n, info) in infos.into_iter().enumerate() {
    res.push(info.ok_or_else(|| {
      ReduceError::InvalidScopeTree(format!("scope {} was never allocated", n))
    })?);
  }
  Ok(res)
}

//=============================================================================
// Tests

#[cfg(test)]
mod test {
  use super::*;
  use crate::data_structures::{Cond, PReg};
  use crate::scope::PredDef;

  fn b(n: u32) -> BlockIx {
    BlockIx::new(n)
  }

  fn def(pred: PredIx, guard: PredIx, src: u32, dst: u32) -> PredDef {
    PredDef { pred, guard, src: b(src), dst: b(dst), cond: Some(Cond::new(PReg(1))) }
  }

  // b0 branches to b1 and b2, both fall into b3.
  fn diamond() -> (ScopeTree, PredIx, PredIx) {
    let mut tree = ScopeTree::new(b(0));
    let root = tree.root();
    let p0 = tree.header_pred(root).unwrap();
    let pt = tree.new_pred();
    let pe = tree.new_pred();
    for (blk, p) in &[(1, pt), (2, pe), (3, p0)] {
      tree.add_block(root, b(*blk));
      tree.set_block_pred(b(*blk), *p);
    }
    tree.add_def(root, def(pt, p0, 0, 1));
    tree.add_def(root, def(pe, p0, 0, 2));
    (tree, pt, pe)
  }

  #[test]
  fn diamond_in_registers() {
    let (tree, pt, pe) = diamond();
    let infos = compute_reg_alloc(&tree, 4).unwrap();
    let ri = &infos[tree.root()];
    let p0 = tree.header_pred(tree.root()).unwrap();
    assert_eq!(ri.def_loc(p0), Location::None);
    assert_eq!(ri.def_loc(pt), Location::Register(0));
    assert_eq!(ri.def_loc(pe), Location::Register(1));
    assert_eq!(ri.use_reg(b(1), pt), Some(0));
    assert_eq!(ri.use_reg(b(2), pe), Some(1));
    assert_eq!(ri.use_reg(b(3), p0), None);
    assert_eq!(ri.num_stack_locs, 0);
    assert!(!ri.needs_scope_spill);
  }

  #[test]
  fn diamond_with_one_register() {
    let (tree, pt, pe) = diamond();
    let infos = compute_reg_alloc(&tree, 1).unwrap();
    let ri = &infos[tree.root()];
    // pe lives longer, so it goes to the stack and borrows the register
    // once pt is dead.
    assert_eq!(ri.def_loc(pt), Location::Register(0));
    assert_eq!(ri.def_loc(pe), Location::Stack(0));
    assert_eq!(ri.use_reg(b(2), pe), Some(0));
    assert_eq!(ri.load_loc(b(2), pe), Some(0));
    assert_eq!(ri.spill_loc(b(2), pe), None);
    assert_eq!(ri.num_stack_locs, 1);
  }

  #[test]
  fn eviction_reloads_at_next_use() {
    // b0 defines a (used in b1 and b3) and c (used in b2).
    let mut tree = ScopeTree::new(b(0));
    let root = tree.root();
    let p0 = tree.header_pred(root).unwrap();
    let a = tree.new_pred();
    let c = tree.new_pred();
    for (blk, p) in &[(1, a), (2, c), (3, a)] {
      tree.add_block(root, b(*blk));
      tree.set_block_pred(b(*blk), *p);
    }
    tree.add_def(root, def(a, p0, 0, 1));
    tree.add_def(root, def(c, p0, 0, 2));

    let infos = compute_reg_alloc(&tree, 1).unwrap();
    let ri = &infos[root];
    assert_eq!(ri.def_loc(a), Location::Stack(0));
    assert_eq!(ri.def_loc(c), Location::Register(0));
    // b1 saves c to a fresh bit and loads a in its place.
    assert_eq!(ri.use_reg(b(1), a), Some(0));
    assert_eq!(ri.spill_loc(b(1), a), Some(1));
    assert_eq!(ri.load_loc(b(1), a), Some(0));
    // b2 gets c back.
    assert_eq!(ri.load_loc(b(2), c), Some(1));
    assert_eq!(ri.use_reg(b(2), c), Some(0));
    // c is dead by b3, so the register is simply free.
    assert_eq!(ri.load_loc(b(3), a), Some(0));
    assert_eq!(ri.spill_loc(b(3), a), None);
    assert_eq!(ri.num_stack_locs, 2);
  }

  #[test]
  fn spill_needs_a_load() {
    let mut tree = ScopeTree::new(b(0));
    let root = tree.root();
    let p0 = tree.header_pred(root).unwrap();
    let a = tree.new_pred();
    let c = tree.new_pred();
    for (blk, p) in &[(1, a), (2, c), (3, a)] {
      tree.add_block(root, b(*blk));
      tree.set_block_pred(b(*blk), *p);
    }
    tree.add_def(root, def(a, p0, 0, 1));
    tree.add_def(root, def(c, p0, 0, 2));

    let mut infos = compute_reg_alloc(&tree, 1).unwrap();
    let ri = &mut infos[root];
    assert!(ri.check_spills_at(b(1)).is_ok());
    assert!(ri.check_spills_at(b(3)).is_ok());
    ri.load_locs.remove(&b(1));
    match ri.check_spills_at(b(1)) {
      Err(ReduceError::SpillWithoutLoad { block, pred }) => {
        assert_eq!(block, b(1));
        assert_eq!(pred, a);
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  // b0 -> loop { b1 -> b2 -> b1 } -> b3, with b3 guarded by a predicate
  // set on the loop's exit edge if `exit_def`.
  fn single_loop(exit_def: bool) -> (ScopeTree, ScopeIx, PredIx, PredIx) {
    let mut tree = ScopeTree::new(b(0));
    let root = tree.root();
    let p0 = tree.header_pred(root).unwrap();
    let ph = tree.new_pred();
    let pb = tree.new_pred();
    let px = tree.new_pred();
    tree.add_def(root, PredDef { pred: ph, guard: p0, src: b(0), dst: b(1), cond: None });
    let l = tree.add_subscope(root, b(1), Some(3));
    tree.set_block_pred(b(1), ph);
    tree.add_block(l, b(2));
    tree.set_block_pred(b(2), pb);
    tree.add_def(l, def(pb, ph, 1, 2));
    tree.add_def(l, PredDef { pred: ph, guard: pb, src: b(2), dst: b(1), cond: None });
    tree.add_block(root, b(3));
    if exit_def {
      let cond = Some(Cond::not(PReg(1)));
      tree.add_def(root, PredDef { pred: px, guard: ph, src: b(1), dst: b(3), cond });
      tree.set_block_pred(b(3), px);
    } else {
      tree.set_block_pred(b(3), p0);
    }
    (tree, l, ph, px)
  }

  #[test]
  fn loop_prefers_parent_register() {
    let (tree, l, ph, _) = single_loop(false);
    let infos = compute_reg_alloc(&tree, 3).unwrap();
    let rr = &infos[tree.root()];
    let rl = &infos[l];
    assert_eq!(rr.def_loc(ph), Location::Register(0));
    assert_eq!(rr.use_reg(b(1), ph), Some(0));
    assert_eq!(rl.def_loc(ph), Location::Register(0));
    assert!(rl.preserve.is_empty());
    assert!(!rl.needs_scope_spill);
    assert_eq!(rl.first_stack_loc, 0);
  }

  #[test]
  fn loop_keeps_off_exit_register() {
    let (tree, l, ph, px) = single_loop(true);
    let infos = compute_reg_alloc(&tree, 3).unwrap();
    let rr = &infos[tree.root()];
    let rl = &infos[l];
    // ph is dead once the loop is entered, so px takes its register, which
    // the loop then has to leave alone.
    assert_eq!(rr.def_loc(ph), Location::Register(0));
    assert_eq!(rr.def_loc(px), Location::Register(0));
    assert_eq!(rl.preserve, vec![0]);
    assert_eq!(rl.def_loc(ph), Location::Register(1));
    assert!(!rl.needs_scope_spill);
    assert!(rr.is_first_def(1));
    assert!(rl.is_first_def(1));
  }

  #[test]
  fn loop_with_one_register() {
    let (tree, l, ph, _) = single_loop(false);
    let pb = tree.block_pred(b(2)).unwrap();
    let infos = compute_reg_alloc(&tree, 1).unwrap();
    let rl = &infos[l];
    assert_eq!(rl.def_loc(ph), Location::Register(0));
    assert_eq!(rl.def_loc(pb), Location::Stack(0));
    // ph is rewritten on the back edge out of b2, so b2 can load pb over it
    // without saving it first.
    assert_eq!(rl.use_reg(b(2), pb), Some(0));
    assert_eq!(rl.load_loc(b(2), pb), Some(0));
    assert_eq!(rl.spill_loc(b(2), pb), None);
    assert!(rl.check_spills_at(b(2)).is_ok());
    assert_eq!(rl.num_stack_locs, 1);
  }

  #[test]
  fn use_before_def_is_an_error() {
    let mut tree = ScopeTree::new(b(0));
    let root = tree.root();
    let x = tree.new_pred();
    tree.add_block(root, b(1));
    tree.set_block_pred(b(1), x);
    match compute_reg_alloc(&tree, 2) {
      Err(ReduceError::UseWithoutDef(p)) => assert_eq!(p, x),
      other => panic!("unexpected {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn loop_without_registers_fails() {
    let mut tree = ScopeTree::new(b(0));
    let root = tree.root();
    let p0 = tree.header_pred(root).unwrap();
    let ph = tree.new_pred();
    tree.add_def(root, PredDef { pred: ph, guard: p0, src: b(0), dst: b(1), cond: None });
    let l = tree.add_subscope(root, b(1), None);
    tree.set_block_pred(b(1), ph);
    match compute_reg_alloc(&tree, 0) {
      Err(ReduceError::RegisterPressure(s)) => assert_eq!(s, l),
      other => panic!("unexpected {:?}", other.map(|_| ())),
    }
  }
}
