/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

use minisp::test_framework::{print_func, run_func, Program};
use minisp::validator::{check_results, validate};
use minisp::test_cases;

use spreduce::{
  reduce_single_path, ReduceOptions, ReduceResult, TargetRegs,
};

use clap;
use log::{error, info};
use pretty_env_logger;
use serde::Serialize;

/// What `--dump-alloc` writes out.
#[derive(Serialize)]
struct AllocDump<'a> {
  test: &'a str,
  num_pregs: u8,
  result: &'a ReduceResult,
}

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("minisp")
    .about("a simple program to allow separate testing of the single-path reduction")
    .arg(
      clap::Arg::new("pregs")
        .short('p')
        .takes_value(true)
        .help("number of predicate registers (8 if not set)"),
    )
    .arg(
      clap::Arg::new("test")
        .short('t')
        .takes_value(true)
        .required(true)
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("checker")
        .short('c')
        .help("check the structure of the reduced function"),
    )
    .arg(
      clap::Arg::new("no-load-elim")
        .long("no-load-elim")
        .help("keep redundant loads of predicate words"),
    )
    .arg(
      clap::Arg::new("dse")
        .long("dse")
        .help("remove dead stores to predicate words"),
    )
    .arg(
      clap::Arg::new("dump-alloc")
        .long("dump-alloc")
        .takes_value(true)
        .help("write the allocation records, bincode-encoded, to this file"),
    );
  let matches = app.get_matches();

  let test_name = matches.value_of("test").unwrap();
  let program = match test_cases::find_program(test_name) {
    Ok(program) => program,
    Err(available_names) => {
      error!("can't find a test program with name '{}'", test_name);
      println!("available test names are:");
      for name in available_names {
        println!("     {}", name);
      }
      return;
    }
  };

  let num_pregs = match matches.value_of("pregs").unwrap_or("8").parse::<u8>()
  {
    Ok(num) => num,
    _other => {
      println!("invalid pregs value");
      return;
    }
  };
  let regs = TargetRegs { num_pregs, ..Default::default() };

  if let Err(err) = validate(&program, &regs) {
    println!("invalid test program: {}", err);
    return;
  }

  let opts = ReduceOptions {
    run_checker: matches.is_present("checker"),
    eliminate_redundant_loads: !matches.is_present("no-load-elim"),
    dead_store_elim: matches.is_present("dse"),
  };
  info!("{:?}", opts);

  let Program { mut func, tree } = program;
  print_func(&func, "before reduction");

  // Just so we can run it later.
  let original_func = func.clone();

  let result = match reduce_single_path(&mut func, &tree, &regs, &opts) {
    Err(e) => {
      println!("reduction failed: {}", e);
      return;
    }
    Ok(r) => r,
  };

  print_func(&func, "after reduction");
  println!("{:?}", result.stats);

  if let Some(path) = matches.value_of("dump-alloc") {
    let dump = AllocDump { test: test_name, num_pregs, result: &result };
    match bincode::serialize(&dump) {
      Ok(bytes) => {
        if let Err(e) = std::fs::write(path, bytes) {
          error!("can't write {}: {}", path, e);
        }
      }
      Err(e) => error!("can't encode the allocation: {}", e),
    }
  }

  let before_result = run_func(&original_func, "Before reduction", &regs);
  let after_result = run_func(&func, "After reduction", &regs);

  println!("");

  if let (Ok(before), Ok(after)) = (&before_result, &after_result) {
    println!(
      "{} steps before, {} steps after the reduction",
      before.num_steps, after.num_steps
    );
  }
  check_results(&before_result, &after_result);
}

#[cfg(test)]
mod test_utils {
  use super::*;
  use minisp::test_framework::Func;
  use spreduce::ReduceError;

  pub fn run_reduce(
    test_name: &str, num_pregs: u8, opts: &ReduceOptions,
  ) -> (Func, Result<(Func, ReduceResult), ReduceError>) {
    let _ = pretty_env_logger::try_init();
    let program = test_cases::find_program(test_name).unwrap();
    let regs = TargetRegs { num_pregs, ..Default::default() };
    validate(&program, &regs).unwrap();
    let Program { mut func, tree } = program;
    let original = func.clone();
    let res = reduce_single_path(&mut func, &tree, &regs, opts);
    (original, res.map(|r| (func, r)))
  }

  pub fn check_with(test_name: &str, num_pregs: u8, opts: &ReduceOptions) {
    let (original, res) = run_reduce(test_name, num_pregs, opts);
    let (func, _) = res.unwrap_or_else(|err| {
      panic!("reduction failed: {}", err);
    });
    print_func(&original, "BEFORE");
    print_func(&func, "AFTER");
    let regs = TargetRegs { num_pregs, ..Default::default() };
    let before_result = run_func(&original, "Before reduction", &regs);
    let after_result = run_func(&func, "After reduction", &regs);
    assert!(before_result.is_ok(), "{:?}", before_result);
    check_results(&before_result, &after_result);
  }

  pub fn check_reduce(test_name: &str, num_pregs: u8) {
    let opts = ReduceOptions { run_checker: true, ..Default::default() };
    check_with(test_name, num_pregs, &opts);
  }
}

// Every test program, with all predicates in registers.

#[test]
fn sp_straight_line() {
  test_utils::check_reduce("straight_line", 8);
}
#[test]
fn sp_diamond() {
  test_utils::check_reduce("diamond", 8);
}
#[test]
fn sp_diamond_region() {
  test_utils::check_reduce("diamond_region", 8);
}
#[test]
fn sp_nested_ifs() {
  test_utils::check_reduce("nested_ifs", 8);
}
#[test]
fn sp_counted_loop() {
  test_utils::check_reduce("counted_loop", 8);
}
#[test]
fn sp_loose_bound() {
  test_utils::check_reduce("loose_bound", 8);
}
#[test]
fn sp_unbounded_loop() {
  test_utils::check_reduce("unbounded_loop", 8);
}
#[test]
fn sp_nested_loops() {
  test_utils::check_reduce("nested_loops", 8);
}
#[test]
fn sp_self_loop() {
  test_utils::check_reduce("self_loop", 8);
}
#[test]
fn sp_loop_sequence() {
  test_utils::check_reduce("loop_sequence", 8);
}
#[test]
fn sp_calls() {
  test_utils::check_reduce("calls", 8);
}
#[test]
fn sp_frame_local() {
  test_utils::check_reduce("frame_local", 8);
}
#[test]
fn sp_guarded_ops() {
  test_utils::check_reduce("guarded_ops", 8);
}
#[test]
fn sp_many_preds() {
  test_utils::check_reduce("many_preds", 8);
}
#[test]
fn sp_zero_bound() {
  test_utils::check_reduce("zero_bound", 8);
}

// Fewer predicate registers: p1 is the condition register and the highest
// one the temporary, so 4 leaves a single register to allocate.

#[test]
fn sp_diamond_one_reg() {
  test_utils::check_reduce("diamond", 4);
}
#[test]
fn sp_nested_ifs_one_reg() {
  test_utils::check_reduce("nested_ifs", 4);
}
#[test]
fn sp_many_preds_one_reg() {
  test_utils::check_reduce("many_preds", 4);
}
#[test]
fn sp_counted_loop_one_reg() {
  test_utils::check_reduce("counted_loop", 4);
}
#[test]
fn sp_loose_bound_one_reg() {
  test_utils::check_reduce("loose_bound", 4);
}
#[test]
fn sp_unbounded_loop_one_reg() {
  test_utils::check_reduce("unbounded_loop", 4);
}
#[test]
fn sp_nested_loops_one_reg() {
  test_utils::check_reduce("nested_loops", 4);
}
#[test]
fn sp_self_loop_one_reg() {
  test_utils::check_reduce("self_loop", 4);
}
#[test]
fn sp_loop_sequence_one_reg() {
  test_utils::check_reduce("loop_sequence", 4);
}
#[test]
fn sp_calls_one_reg() {
  test_utils::check_reduce("calls", 4);
}
#[test]
fn sp_counted_loop_two_regs() {
  test_utils::check_reduce("counted_loop", 5);
}
#[test]
fn sp_nested_loops_two_regs() {
  test_utils::check_reduce("nested_loops", 5);
}

// Optional parts of the pipeline.

#[test]
fn sp_calls_no_load_elim() {
  let opts = ReduceOptions {
    run_checker: true,
    eliminate_redundant_loads: false,
    ..Default::default()
  };
  test_utils::check_with("calls", 8, &opts);
}
#[test]
fn sp_many_preds_dead_stores() {
  let opts = ReduceOptions {
    run_checker: true,
    dead_store_elim: true,
    ..Default::default()
  };
  test_utils::check_with("many_preds", 4, &opts);
}

#[test]
fn sp_every_test_case() {
  for name in test_cases::all_names() {
    test_utils::check_reduce(name, 8);
  }
}

// Structure of the result.

#[test]
fn straight_line_stays_one_block() {
  let opts = ReduceOptions::default();
  let (_, res) = test_utils::run_reduce("straight_line", 8, &opts);
  let (func, result) = res.unwrap();
  assert_eq!(func.layout.len(), 1);
  assert_eq!(result.stats.removed_branches, 0);
  assert_eq!(result.stats.loop_counters, 0);
}

#[test]
fn diamond_becomes_one_block() {
  let opts = ReduceOptions::default();
  let (_, res) = test_utils::run_reduce("diamond", 8, &opts);
  let (func, result) = res.unwrap();
  assert_eq!(func.layout.len(), 1);
  assert!(func.blocks[func.entry].succs.is_empty());
  // Entry: the conditional branch and the jump; each side: the jump to the
  // join.
  assert_eq!(result.stats.removed_branches, 4);
  assert_eq!(result.pred_tmp, Some(spreduce::PReg(7)));
  assert!(!result.avail_pregs.contains(&spreduce::PReg(1)));
}

#[test]
fn loop_keeps_only_its_back_branch() {
  use spreduce::TargetInst;
  let opts = ReduceOptions { run_checker: true, ..Default::default() };
  let (_, res) = test_utils::run_reduce("counted_loop", 8, &opts);
  let (func, result) = res.unwrap();
  let branches: usize = func
    .layout
    .iter()
    .map(|b| func.blocks[*b].insts.iter().filter(|i| i.is_branch()).count())
    .sum();
  assert_eq!(branches, 1);
  assert_eq!(result.stats.loop_counters, 1);
}

// The back branch of a loop, with its guard, and how many branches there
// are in total.
fn back_branch(func: &minisp::test_framework::Func) -> (spreduce::Cond, usize) {
  use spreduce::TargetInst;
  let branches: Vec<spreduce::Cond> = func
    .layout
    .iter()
    .flat_map(|b| func.blocks[*b].insts.iter())
    .filter(|i| i.is_branch())
    .map(|i| i.guard)
    .collect();
  (branches[0], branches.len())
}

#[test]
fn zero_bound_loops_on_its_header_predicate() {
  let opts = ReduceOptions { run_checker: true, ..Default::default() };
  let (_, res) = test_utils::run_reduce("zero_bound", 8, &opts);
  let (func, result) = res.unwrap();
  assert_eq!(result.stats.loop_counters, 0);
  let (guard, count) = back_branch(&func);
  assert_eq!(count, 1);
  assert_ne!(guard.reg, spreduce::PReg::P0);
  assert_ne!(Some(guard.reg), result.pred_tmp);

  let (_, res) = test_utils::run_reduce("unbounded_loop", 8, &opts);
  let (unbounded, _) = res.unwrap();
  let (unbounded_guard, _) = back_branch(&unbounded);
  assert!(guard.same_value(&unbounded_guard));
}

// Offsets of the stack words the predicate bank is saved to in `insts`.
fn bank_saves(insts: &[minisp::test_framework::Inst]) -> Vec<i32> {
  use minisp::test_framework::{Addr, Op};
  use spreduce::SpecialReg;
  insts
    .windows(2)
    .filter_map(|w| match (&w[0].op, &w[1].op) {
      (
        Op::Mfs { dst, sreg: SpecialReg::S0 },
        Op::Store { addr: Addr::Stack(off), src },
      ) if src == dst => Some(*off),
      _ => None,
    })
    .collect()
}

fn touches_stack(insts: &[minisp::test_framework::Inst], off: i32) -> bool {
  use minisp::test_framework::{Addr, Op};
  insts.iter().any(|i| match i.op {
    Op::Load { addr: Addr::Stack(o), .. }
    | Op::Store { addr: Addr::Stack(o), .. } => o == off,
    _ => false,
  })
}

#[test]
fn nested_loops_save_the_bank_per_depth() {
  let opts = ReduceOptions { run_checker: true, ..Default::default() };
  let (_, res) = test_utils::run_reduce("nested_loops", 5, &opts);
  let (func, result) = res.unwrap();
  let spilling = result.rainfos.iter().filter(|ri| ri.needs_scope_spill);
  assert_eq!(spilling.count(), 2);

  // Entry up to the outer preheader, then the outer header up to the inner
  // preheader.
  let outer = &func.blocks[func.layout[0]].insts;
  let inner = &func.blocks[func.layout[1]].insts;
  let outer_saves = bank_saves(outer);
  let inner_saves = bank_saves(inner);
  assert_eq!(outer_saves.len(), 1);
  assert_eq!(inner_saves.len(), 1);
  assert_ne!(outer_saves[0], inner_saves[0]);

  // The inner loop's word is of no concern outside the outer loop.
  let last = func.layout[func.layout.len() - 1];
  assert!(!touches_stack(outer, inner_saves[0]));
  assert!(!touches_stack(&func.blocks[last].insts, inner_saves[0]));
}

#[test]
fn calls_save_the_return_register() {
  use minisp::test_framework::{Addr, Op};
  let opts = ReduceOptions::default();
  let (_, res) = test_utils::run_reduce("calls", 8, &opts);
  let (func, _) = res.unwrap();
  for b in &func.layout {
    let insts = &func.blocks[*b].insts;
    for (k, inst) in insts.iter().enumerate() {
      if let Op::Call { .. } = inst.op {
        assert!(k > 1 && k + 1 < insts.len());
        assert!(matches!(
          insts[k - 1].op,
          Op::Store { addr: Addr::Stack(_), src } if src == spreduce::GReg(9)
        ));
        assert!(matches!(
          insts[k + 1].op,
          Op::Load { addr: Addr::Stack(_), dst } if dst == spreduce::GReg(9)
        ));
      }
    }
  }
}

#[test]
fn calls_run_unpredicated_with_the_guard_passed_on() {
  use minisp::test_framework::Op;
  let opts = ReduceOptions::default();
  let (_, res) = test_utils::run_reduce("calls", 8, &opts);
  let (func, result) = res.unwrap();
  let pred_tmp = result.pred_tmp.unwrap();
  let mut calls = 0;
  for b in &func.layout {
    let insts = &func.blocks[*b].insts;
    for (k, inst) in insts.iter().enumerate() {
      if let Op::Call { .. } = inst.op {
        calls += 1;
        assert!(inst.guard.is_always_true());
        let set_guard = &insts[k - 2];
        assert!(set_guard.guard.is_always_true());
        match set_guard.op {
          // Every call sits under a branch of the original program.
          Op::PMov { dst, src } => {
            assert_eq!(dst, pred_tmp);
            assert_ne!(src.reg, spreduce::PReg::P0);
          }
          ref other => panic!("unexpected {:?} before a call", other),
        }
      }
    }
  }
  assert_eq!(calls, 3);
}

#[test]
fn region_entry_takes_its_guard_from_the_caller() {
  use minisp::test_framework::Op;
  let opts = ReduceOptions::default();
  let (_, res) = test_utils::run_reduce("diamond_region", 8, &opts);
  let (func, result) = res.unwrap();
  let entry = &func.blocks[func.layout[0]].insts;
  let first = entry.iter().find(|i| !i.frame_setup).unwrap();
  assert!(first.guard.is_always_true());
  match first.op {
    Op::PMov { dst, src } => {
      assert_eq!(Some(src.reg), result.pred_tmp);
      assert!(!src.negated);
      assert_ne!(dst, spreduce::PReg::P0);
    }
    ref other => panic!("unexpected {:?} at the region entry", other),
  }
}

#[test]
fn no_temporary_register() {
  // Only p1 exists, and the program uses it for its conditions.
  let Program { mut func, tree } = test_cases::find_program("diamond").unwrap();
  let regs = TargetRegs { num_pregs: 2, ..Default::default() };
  let res =
    reduce_single_path(&mut func, &tree, &regs, &ReduceOptions::default());
  assert!(matches!(res, Err(spreduce::ReduceError::NoTempPredReg)));
}
