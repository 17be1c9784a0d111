/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checks that a test program is something the reduction may be run on, and
//! compares the runs before and after.

use crate::test_framework::*;
use spreduce::{PReg, TargetInst, TargetRegs};

pub fn validate(program: &Program, regs: &TargetRegs) -> Result<(), String> {
  let func = &program.func;

  if regs.num_pregs as usize > NUM_PREGS || regs.num_pregs < 2 {
    return Err(format!("unsupported number of predicates {}", regs.num_pregs));
  }
  if func.layout.is_empty() {
    return Err("no blocks".into());
  }
  if !func.layout.contains(&func.entry) {
    return Err("invalid entry block".into());
  }

  let call_guard = call_guard(regs);
  let guards = regs.guards_reg;

  for &b in &func.layout {
    let block = &func.blocks[b];
    if block.insts.is_empty() {
      return Err(format!("block {} is empty", block.name));
    }
    if block.erased {
      return Err(format!("block {} is erased but laid out", block.name));
    }

    // Branches and the return only at the end.
    let first_term = func.first_terminator(b);
    if first_term == block.insts.len() {
      return Err(format!("block {} has no terminator", block.name));
    }
    for (k, inst) in block.insts.iter().enumerate() {
      if k < first_term && (inst.is_branch() || inst.is_return()) {
        return Err(format!(
          "control flow inst {:?} in the middle of block {}",
          inst, block.name
        ));
      }
      if let Some(target) = inst.branch_target() {
        if target.get() >= func.blocks.len()
          || !func.layout.contains(&target)
        {
          return Err(format!(
            "branch to unknown block {:?} in block {}",
            target, block.name
          ));
        }
      }
      if inst.mentions_preg(call_guard) {
        return Err(format!(
          "inst {:?} in block {} uses the call guard {:?}",
          inst, block.name, call_guard
        ));
      }
      for n in regs.num_pregs..NUM_PREGS as u8 {
        if inst.mentions_preg(PReg(n)) {
          return Err(format!("inst {:?} uses missing p{}", inst, n));
        }
      }
      if inst.reads_greg(guards) || inst.defines_greg(guards) {
        return Err(format!(
          "inst {:?} in block {} uses the reduction's scratch {:?}",
          inst, block.name, guards
        ));
      }
      if let Some(dst) = def_preg(&inst.op) {
        if dst == PReg::P0 {
          return Err(format!("inst {:?} writes p0", inst));
        }
      }
    }
  }

  let last = func.layout[func.layout.len() - 1];
  match func.blocks[last].insts.last() {
    Some(inst) if inst.is_return() => Ok(()),
    _ => Err("the last block does not return".into()),
  }
}

pub fn check_results(
  before_result: &Result<RunResult, String>,
  after_result: &Result<RunResult, String>,
) {
  match before_result {
    Ok(before_result) => {
      let after_result = after_result
        .as_ref()
        .expect("code after the reduction should have succeeded");

      assert_eq!(
        before_result.ret_value, after_result.ret_value,
        "Incorrect interpreter result: expected {:?}, observed {:?}",
        before_result.ret_value, after_result.ret_value
      );

      assert_eq!(
        before_result.stdout, after_result.stdout,
        r#"Different stdout values before/after the reduction:
- before:
{}
-after:
{}
        "#,
        before_result.stdout, after_result.stdout
      );
    }

    Err(err) => {
      assert_eq!(Some(err), after_result.as_ref().err());
    }
  }
}
