/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The scope tree: a nesting of the function's loops, each with its member
//! blocks in topological order and the predicate definitions on its edges.

use log::debug;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::data_structures::{BlockIx, Cond, Map, PredIx, ScopeIx, TypedIxVec};
use crate::interface::{MachineFunc, ReduceError, TargetInst};

//=============================================================================
// Scope nodes and predicate definitions

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ScopeNode {
  Block(BlockIx),
  Subscope(ScopeIx),
}

/// `pred := guard && cond`, attached to the edge `src -> dst`.  A `cond` of
/// `None` stands for an unconditional edge.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PredDef {
  pub pred: PredIx,
  pub guard: PredIx,
  pub src: BlockIx,
  pub dst: BlockIx,
  pub cond: Option<Cond>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Scope {
  pub parent: Option<ScopeIx>,
  pub depth: u32,
  pub header: BlockIx,
  /// Members in topological order; `nodes[0]` is always the header block.
  pub nodes: Vec<ScopeNode>,
  pub defs: Vec<PredDef>,
  /// Maximum number of header executions per entry, if known.
  pub loop_bound: Option<u32>,
}

impl Scope {
  pub fn is_top_level(&self) -> bool {
    self.parent.is_none()
  }

  pub fn subscopes(&self) -> impl Iterator<Item = ScopeIx> + '_ {
    self.nodes.iter().filter_map(|n| match n {
      ScopeNode::Subscope(s) => Some(*s),
      ScopeNode::Block(_) => None,
    })
  }

  pub fn blocks(&self) -> impl Iterator<Item = BlockIx> + '_ {
    self.nodes.iter().filter_map(|n| match n {
      ScopeNode::Block(b) => Some(*b),
      ScopeNode::Subscope(_) => None,
    })
  }
}

//=============================================================================
// The tree

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ScopeTree {
  pub scopes: TypedIxVec<ScopeIx, Scope>,
  /// Every block is guarded by exactly one predicate.
  pub block_preds: Map<BlockIx, PredIx>,
  pub num_preds: u32,
  /// Only single-path functions are reduced; others are left untouched.
  pub single_path: bool,
  /// The root is the function itself, as opposed to a single-path region
  /// entered with its guard in the temporary predicate register.
  pub root_top_level: bool,
}

impl ScopeTree {
  /// A tree with just a root scope headed by `header`, whose block is guarded
  /// by a fresh predicate.
  pub fn new(header: BlockIx) -> Self {
    let mut scopes = TypedIxVec::new();
    scopes.push(Scope {
      parent: None,
      depth: 0,
      header,
      nodes: vec![ScopeNode::Block(header)],
      defs: vec![],
      loop_bound: None,
    });
    let mut tree = Self {
      scopes,
      block_preds: Map::default(),
      num_preds: 0,
      single_path: true,
      root_top_level: true,
    };
    let p = tree.new_pred();
    tree.block_preds.insert(header, p);
    tree
  }

  pub fn root(&self) -> ScopeIx {
    ScopeIx::new(0)
  }

  pub fn new_pred(&mut self) -> PredIx {
    let p = PredIx::new(self.num_preds);
    self.num_preds += 1;
    p
  }

  /// Open a loop scope headed by `header` as the next node of `parent`.
  pub fn add_subscope(
    &mut self, parent: ScopeIx, header: BlockIx, loop_bound: Option<u32>,
  ) -> ScopeIx {
    let depth = self.scopes[parent].depth + 1;
    let s = self.scopes.push(Scope {
      parent: Some(parent),
      depth,
      header,
      nodes: vec![ScopeNode::Block(header)],
      defs: vec![],
      loop_bound,
    });
    self.scopes[parent].nodes.push(ScopeNode::Subscope(s));
    s
  }

  pub fn add_block(&mut self, scope: ScopeIx, b: BlockIx) {
    self.scopes[scope].nodes.push(ScopeNode::Block(b));
  }

  pub fn set_block_pred(&mut self, b: BlockIx, p: PredIx) {
    self.block_preds.insert(b, p);
  }

  pub fn add_def(&mut self, scope: ScopeIx, def: PredDef) {
    self.scopes[scope].defs.push(def);
  }

  pub fn block_pred(&self, b: BlockIx) -> Option<PredIx> {
    self.block_preds.get(&b).cloned()
  }

  pub fn header_pred(&self, s: ScopeIx) -> Option<PredIx> {
    self.block_pred(self.scopes[s].header)
  }

  /// Top-level scope of a region whose guard arrives in a register, not the
  /// function's root.
  pub fn is_region_top_level(&self, s: ScopeIx) -> bool {
    self.scopes[s].is_top_level() && !self.root_top_level
  }

  /// The root of a whole function: its header predicate is always true.
  pub fn is_root_top_level(&self, s: ScopeIx) -> bool {
    self.scopes[s].is_top_level() && self.root_top_level
  }

  /// A usable iteration bound; zero counts as unknown.
  pub fn loop_bound(&self, s: ScopeIx) -> Option<u32> {
    self.scopes[s].loop_bound.filter(|n| *n > 0)
  }

  /// The direct child of `s` headed by `b`, if any.
  pub fn child_with_header(&self, s: ScopeIx, b: BlockIx) -> Option<ScopeIx> {
    self.scopes[s].subscopes().find(|c| self.scopes[*c].header == b)
  }

  /// Node position in `s` of the block or child header `b`.
  pub fn node_position(&self, s: ScopeIx, b: BlockIx) -> Option<usize> {
    self.scopes[s].nodes.iter().position(|n| match n {
      ScopeNode::Block(x) => *x == b,
      ScopeNode::Subscope(c) => self.scopes[*c].header == b,
    })
  }

  /// Scopes in depth-first pre-order.
  pub fn dfs_scopes(&self) -> Vec<ScopeIx> {
    self
      .walk()
      .filter_map(|ev| match ev {
        WalkEvent::Enter(s) => Some(s),
        _ => None,
      })
      .collect()
  }

  pub fn walk(&self) -> Walk {
    Walk { tree: self, stack: vec![], started: false }
  }

  /// Check the tree against the function, and compute the per-block and
  /// per-scope facts the reduction needs.
  pub fn validate<I: TargetInst>(
    &self, func: &MachineFunc<I>,
  ) -> Result<ScopeFacts, ReduceError> {
    let bad = |msg: String| Err(ReduceError::InvalidScopeTree(msg));

    if self.scopes.is_empty() {
      return bad("no root scope".to_string());
    }
    if self.scopes[self.root()].parent.is_some() {
      return bad("root scope has a parent".to_string());
    }
    if self.scopes[self.root()].header != func.entry {
      return bad("root header is not the entry block".to_string());
    }

    let mut block_scope = Map::default();
    let mut seen_scope = vec![false; self.scopes.len() as usize];
    for s in self.dfs_scopes() {
      if seen_scope[s.get_usize()] {
        return bad(format!("{:?} is reachable twice", s));
      }
      seen_scope[s.get_usize()] = true;
      let scope = &self.scopes[s];
      if scope.nodes.first() != Some(&ScopeNode::Block(scope.header)) {
        return bad(format!("{:?} does not start with its header", s));
      }
      for b in scope.blocks() {
        if b.get() >= func.blocks.len() || func.blocks[b].erased {
          return bad(format!("{:?} names unknown block {:?}", s, b));
        }
        if block_scope.insert(b, s).is_some() {
          return bad(format!("{:?} is a member of two scopes", b));
        }
        if self.block_pred(b).is_none() {
          return bad(format!("{:?} has no predicate", b));
        }
      }
      for c in scope.subscopes() {
        let child = &self.scopes[c];
        if child.parent != Some(s) || child.depth != scope.depth + 1 {
          return bad(format!("{:?} has an inconsistent parent link", c));
        }
      }
    }
    if let Some(s) = seen_scope.iter().position(|seen| !seen) {
      return bad(format!("scope {} is not part of the tree", s));
    }
    for &b in &func.layout {
      if !block_scope.contains_key(&b) {
        return bad(format!("{:?} is not in any scope", b));
      }
    }

    let in_subtree = |b: BlockIx, s: ScopeIx| -> bool {
      let mut cur = block_scope.get(&b).cloned();
      while let Some(x) = cur {
        if x == s {
          return true;
        }
        cur = self.scopes[x].parent;
      }
      false
    };

    for s in self.scopes.indices() {
      let scope = &self.scopes[s];
      for d in &scope.defs {
        match block_scope.get(&d.src) {
          Some(&src_scope) if src_scope == s => {
            if self.block_pred(d.src) != Some(d.guard) {
              return bad(format!(
                "definition of {:?} in {:?} is not guarded by the block",
                d.pred, d.src
              ));
            }
          }
          Some(_) if self.child_with_header(s, d.src).is_some() => {
            if self.block_pred(d.src) != Some(d.guard) {
              return bad(format!(
                "exit definition of {:?} is not guarded by the loop header",
                d.pred
              ));
            }
          }
          Some(_) if in_subtree(d.src, s) => {
            return Err(ReduceError::NestedExitEdge {
              pred: d.pred,
              src: d.src,
            });
          }
          _ => {
            return bad(format!(
              "definition of {:?} on an edge from {:?} outside {:?}",
              d.pred, d.src, s
            ));
          }
        }
        if self.is_root_top_level(self.root())
          && self.header_pred(self.root()) == Some(d.pred)
        {
          return bad("definition of the function's entry predicate".into());
        }
      }
    }

    // Blocks outside each loop that its blocks branch to.
    let mut scope_succs = Map::default();
    for s in self.scopes.indices() {
      if self.scopes[s].is_top_level() {
        continue;
      }
      let mut succs = vec![];
      for &b in &func.layout {
        if !in_subtree(b, s) {
          continue;
        }
        for &t in func.blocks[b].succs.iter() {
          if !in_subtree(t, s) && !succs.contains(&t) {
            succs.push(t);
          }
        }
      }
      debug!("validate: {:?} exits to {:?}", s, succs);
      scope_succs.insert(s, succs);
    }

    Ok(ScopeFacts { block_scope, scope_succs })
  }
}

/// Facts derived from a validated tree.
pub struct ScopeFacts {
  /// The innermost scope each block is a member of.
  pub block_scope: Map<BlockIx, ScopeIx>,
  pub scope_succs: Map<ScopeIx, Vec<BlockIx>>,
}

//=============================================================================
// Walking the tree

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WalkEvent {
  Enter(ScopeIx),
  Block(BlockIx),
  Exit(ScopeIx),
}

/// Depth-first walk yielding every scope entry, member block in order, and
/// scope exit.
pub struct Walk<'a> {
  tree: &'a ScopeTree,
  // (scope, next node index)
  stack: Vec<(ScopeIx, usize)>,
  started: bool,
}

impl<'a> Iterator for Walk<'a> {
  type Item = WalkEvent;

  fn next(&mut self) -> Option<WalkEvent> {
    if !self.started {
      self.started = true;
      if self.tree.scopes.is_empty() {
        return None;
      }
      let root = self.tree.root();
      self.stack.push((root, 0));
      return Some(WalkEvent::Enter(root));
    }
    let tree = self.tree;
    let (s, i) = *self.stack.last()?;
    let nodes = &tree.scopes[s].nodes;
    if i < nodes.len() {
      if let Some(top) = self.stack.last_mut() {
        top.1 += 1;
      }
      match nodes[i] {
        ScopeNode::Block(b) => Some(WalkEvent::Block(b)),
        ScopeNode::Subscope(c) => {
          self.stack.push((c, 0));
          Some(WalkEvent::Enter(c))
        }
      }
    } else {
      self.stack.pop();
      Some(WalkEvent::Exit(s))
    }
  }
}

#[test]
fn walk_nested_scopes() {
  let b = BlockIx::new;
  let mut tree = ScopeTree::new(b(0));
  let l1 = tree.add_subscope(tree.root(), b(1), Some(3));
  tree.add_block(l1, b(2));
  let l2 = tree.add_subscope(l1, b(3), None);
  tree.add_block(tree.root(), b(4));

  let events: Vec<WalkEvent> = tree.walk().collect();
  use WalkEvent::*;
  assert_eq!(
    events,
    vec![
      Enter(tree.root()),
      Block(b(0)),
      Enter(l1),
      Block(b(1)),
      Block(b(2)),
      Enter(l2),
      Block(b(3)),
      Exit(l2),
      Exit(l1),
      Block(b(4)),
      Exit(tree.root()),
    ]
  );
  assert_eq!(tree.dfs_scopes(), vec![tree.root(), l1, l2]);
  assert_eq!(tree.scopes[l2].depth, 2);
  assert_eq!(tree.child_with_header(l1, b(3)), Some(l2));
  assert_eq!(tree.node_position(tree.root(), b(1)), Some(1));
  assert_eq!(tree.node_position(tree.root(), b(4)), Some(2));
}

#[test]
fn zero_bound_is_unknown() {
  let mut tree = ScopeTree::new(BlockIx::new(0));
  let l = tree.add_subscope(tree.root(), BlockIx::new(1), Some(0));
  assert_eq!(tree.loop_bound(l), None);
  let m = tree.add_subscope(tree.root(), BlockIx::new(2), Some(4));
  assert_eq!(tree.loop_bound(m), Some(4));
}
