/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checker: verifies that a reduced function has the shape of single-path
//! code.
//!
//! After the reduction, the only control flow left is the back edge of each
//! loop.  In terms of the final layout this means:
//!
//!   - every branch goes backwards (or to its own block), to the header of a
//!     loop in the scope tree;
//!
//!   - every loop header is the target of at most one branch;
//!
//!   - every block falls through to its layout successor, and has no other
//!     successor except a loop header;
//!
//!   - returns only appear in the last block.
//!
//! The checker does not look at the predicates themselves; it is the
//! interpreter-based differential tests that check the reduction preserves
//! the meaning of the function.

use log::debug;

use crate::data_structures::{BlockIx, Map};
use crate::interface::{MachineFunc, TargetInst};
use crate::scope::ScopeTree;

#[derive(Clone, Debug)]
pub struct CheckerError {
  pub block: BlockIx,
  pub msg: String,
}

#[derive(Clone, Debug)]
pub struct CheckerErrors {
  pub errors: Vec<CheckerError>,
}

struct Checker<'a, I> {
  func: &'a MachineFunc<I>,
  position: Map<BlockIx, usize>,
  loop_headers: Vec<BlockIx>,
  errors: Vec<CheckerError>,
}

impl<'a, I: TargetInst> Checker<'a, I> {
  fn new(func: &'a MachineFunc<I>, tree: &ScopeTree) -> Self {
    let position =
      func.layout.iter().enumerate().map(|(n, b)| (*b, n)).collect();
    let loop_headers = tree
      .scopes
      .iter()
      .filter(|s| !s.is_top_level())
      .map(|s| s.header)
      .collect();
    Self { func, position, loop_headers, errors: vec![] }
  }

  fn error(&mut self, block: BlockIx, msg: String) {
    self.errors.push(CheckerError { block, msg });
  }

  fn check_branches(&mut self) {
    let func = self.func;
    let mut branches_to: Map<BlockIx, u32> = Map::default();
    for (pos, &b) in func.layout.iter().enumerate() {
      for inst in &func.blocks[b].insts {
        if !inst.is_branch() {
          continue;
        }
        let target = match inst.branch_target() {
          Some(t) => t,
          None => continue,
        };
        match self.position.get(&target).cloned() {
          Some(tpos) if tpos > pos => {
            self.error(b, format!("forward branch to {:?}", target))
          }
          None => {
            self.error(b, format!("branch to missing block {:?}", target))
          }
          _ => {}
        }
        if !self.loop_headers.contains(&target) {
          self.error(b, format!("branch to non-header {:?}", target));
        }
        *branches_to.entry(target).or_insert(0) += 1;
      }
    }
    for (target, n) in branches_to {
      if n > 1 {
        self.error(target, format!("{} back branches to one header", n));
      }
    }
  }

  fn check_edges(&mut self) {
    let func = self.func;
    let layout = &func.layout;
    for (pos, &b) in layout.iter().enumerate() {
      let next = layout.get(pos + 1).cloned();
      for &s in func.blocks[b].succs.iter() {
        if Some(s) != next && !self.loop_headers.contains(&s) {
          self.error(b, format!("unexpected successor {:?}", s));
        }
      }
      let has_return = func.blocks[b].insts.iter().any(|i| i.is_return());
      if has_return && next.is_some() {
        self.error(b, "return before the last block".to_string());
      }
    }
  }
}

/// Check the structure of a reduced function.
pub(crate) fn check_reduced<I: TargetInst>(
  func: &MachineFunc<I>, tree: &ScopeTree,
) -> Result<(), CheckerErrors> {
  let mut checker = Checker::new(func, tree);
  checker.check_branches();
  checker.check_edges();
  debug!("check_reduced: {} errors", checker.errors.len());
  if checker.errors.is_empty() {
    Ok(())
  } else {
    Err(CheckerErrors { errors: checker.errors })
  }
}
