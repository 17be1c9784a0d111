/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// Test cases.  The list of them is right at the bottom, function
/// |find_program|.  Add new ones there.
///
/// Register conventions: r1 .. r8 hold data, r9 is the caller-saved return
/// information register, r10 .. r15 are loop counters.
use spreduce::{Cond, GReg, PReg};

use crate::test_framework::*;

const R0: GReg = GReg(0);

fn r(n: u8) -> GReg {
  GReg(n)
}

/// No control flow at all.
fn test_straight_line() -> Program {
  let stmts = vec![
    s_vanilla(i_imm(r(1), 5)),
    s_vanilla(i_imm(r(2), 7)),
    s_vanilla(i_mul(r(3), r(1), r(2))),
    s_vanilla(i_print(r(3))),
    s_vanilla(i_store(R0, 0, r(3))),
    s_vanilla(i_load(r(4), R0, 0)),
    s_vanilla(i_addi(r(4), r(4), 1)),
    s_vanilla(i_print(r(4))),
  ];
  Blockifier::new("straight_line").finish(stmts, r(4))
}

fn diamond_stmts() -> Vec<Stmt> {
  vec![
    s_vanilla(i_imm(r(1), 3)),
    s_vanilla(i_imm(r(2), 10)),
    s_if_then_else(
      t_lt(r(1), r(2)),
      vec![s_vanilla(i_imm(r(3), 1)), s_vanilla(i_print(r(3)))],
      vec![s_vanilla(i_imm(r(3), 2)), s_vanilla(i_print(r(3)))],
    ),
    s_vanilla(i_add(r(4), r(3), r(1))),
    s_vanilla(i_print(r(4))),
  ]
}

/// if/else, taking the then branch.
fn test_diamond() -> Program {
  Blockifier::new("diamond").finish(diamond_stmts(), r(4))
}

/// The same, entered as a single-path region rather than a whole function.
fn test_diamond_region() -> Program {
  let mut b = Blockifier::new("diamond_region");
  b.as_region();
  b.finish(diamond_stmts(), r(4))
}

fn nested_ifs_stmts() -> Vec<Stmt> {
  vec![
    s_vanilla(i_imm(r(1), 4)),
    s_vanilla(i_imm(r(2), 9)),
    s_vanilla(i_imm(r(3), 0)),
    s_if_then_else(
      t_lt(r(1), r(2)),
      vec![
        s_vanilla(i_addi(r(3), r(3), 1)),
        s_if_then_else(
          t_eq(r(2), r(1)),
          vec![s_vanilla(i_addi(r(3), r(3), 10))],
          vec![
            s_vanilla(i_addi(r(3), r(3), 20)),
            s_if_then(
              t_le(r(1), r(1)),
              vec![s_vanilla(i_add(r(3), r(3), r(3)))],
            ),
          ],
        ),
      ],
      vec![s_vanilla(i_imm(r(3), 100))],
    ),
    s_if_then(t_ne(r(3), R0), vec![s_vanilla(i_store(R0, 1, r(3)))]),
    s_if_then_else(
      t_lt(r(2), r(1)),
      vec![s_vanilla(i_imm(r(6), 1)), s_vanilla(i_print(r(6)))],
      vec![
        s_if_then_else(
          t_eq(r(1), r(1)),
          vec![s_vanilla(i_imm(r(6), 2))],
          vec![s_vanilla(i_imm(r(6), 3))],
        ),
        s_vanilla(i_print(r(6))),
      ],
    ),
    s_vanilla(i_load(r(5), R0, 1)),
    s_vanilla(i_print(r(5))),
  ]
}

/// Several levels of if/else, with stores under predicates.
fn test_nested_ifs() -> Program {
  Blockifier::new("nested_ifs").finish(nested_ifs_stmts(), r(5))
}

// while i < n { sum += i; if i & 1 == 0 { print i }; i += 1 }
fn counted_loop_stmts(bound: Option<u32>) -> Vec<Stmt> {
  vec![
    s_vanilla(i_imm(r(10), 0)),
    s_vanilla(i_imm(r(2), 10)),
    s_vanilla(i_imm(r(3), 0)),
    s_while_do(
      t_lt(r(10), r(2)),
      bound,
      vec![
        s_vanilla(i_add(r(3), r(3), r(10))),
        s_vanilla(i_binop_imm(BinOp::And, r(4), r(10), 1)),
        s_if_then(t_eq(r(4), R0), vec![s_vanilla(i_print(r(10)))]),
        s_vanilla(i_addi(r(10), r(10), 1)),
      ],
    ),
    s_vanilla(i_print(r(3))),
  ]
}

/// A loop with a known iteration bound.
fn test_counted_loop() -> Program {
  Blockifier::new("counted_loop").finish(counted_loop_stmts(Some(11)), r(3))
}

/// The bound is generous: the loop is done long before the counter is.
fn test_loose_bound() -> Program {
  Blockifier::new("loose_bound").finish(counted_loop_stmts(Some(25)), r(3))
}

/// Without a bound, the loop runs until its header predicate goes false.
fn test_unbounded_loop() -> Program {
  Blockifier::new("unbounded_loop").finish(counted_loop_stmts(None), r(3))
}

/// A bound of zero says nothing, so this runs like the unbounded loop.
fn test_zero_bound() -> Program {
  Blockifier::new("zero_bound").finish(counted_loop_stmts(Some(0)), r(3))
}

fn nested_loops_stmts() -> Vec<Stmt> {
  vec![
    s_vanilla(i_imm(r(10), 0)),
    s_vanilla(i_imm(r(5), 4)),
    s_vanilla(i_imm(r(6), 3)),
    s_vanilla(i_imm(r(3), 0)),
    s_while_do(
      t_lt(r(10), r(5)),
      Some(5),
      vec![
        s_vanilla(i_imm(r(11), 0)),
        s_while_do(
          t_lt(r(11), r(6)),
          Some(4),
          vec![
            s_vanilla(i_mul(r(7), r(10), r(11))),
            s_vanilla(i_add(r(3), r(3), r(7))),
            s_vanilla(i_addi(r(11), r(11), 1)),
          ],
        ),
        s_if_then_else(
          t_lt(r(6), r(10)),
          vec![s_vanilla(i_print(r(10)))],
          vec![s_vanilla(i_print(r(3)))],
        ),
        s_vanilla(i_addi(r(10), r(10), 1)),
      ],
    ),
    s_vanilla(i_print(r(3))),
  ]
}

/// A loop nest, with control flow after the inner loop.
fn test_nested_loops() -> Program {
  Blockifier::new("nested_loops").finish(nested_loops_stmts(), r(3))
}

/// repeat { i += 1; print i } until n <= i
fn test_self_loop() -> Program {
  let stmts = vec![
    s_vanilla(i_imm(r(1), 0)),
    s_vanilla(i_imm(r(2), 5)),
    s_repeat_until(
      vec![s_vanilla(i_addi(r(1), r(1), 1)), s_vanilla(i_print(r(1)))],
      t_le(r(2), r(1)),
      Some(5),
    ),
    s_vanilla(i_addi(r(1), r(1), 100)),
    s_vanilla(i_print(r(1))),
  ];
  Blockifier::new("self_loop").finish(stmts, r(1))
}

/// Two loops in a row, the second one under a condition that doesn't hold,
/// and a third in the branch that does.
fn test_loop_sequence() -> Program {
  let stmts = vec![
    s_vanilla(i_imm(r(10), 0)),
    s_vanilla(i_imm(r(2), 3)),
    s_vanilla(i_imm(r(3), 1)),
    s_while_do(
      t_lt(r(10), r(2)),
      Some(4),
      vec![
        s_vanilla(i_add(r(3), r(3), r(3))),
        s_vanilla(i_addi(r(10), r(10), 1)),
      ],
    ),
    s_vanilla(i_print(r(3))),
    s_if_then_else(
      t_lt(r(3), r(2)),
      vec![
        s_vanilla(i_imm(r(11), 0)),
        s_while_do(
          t_lt(r(11), r(2)),
          Some(4),
          vec![
            s_vanilla(i_print(r(11))),
            s_vanilla(i_addi(r(11), r(11), 1)),
          ],
        ),
      ],
      vec![
        s_vanilla(i_imm(r(12), 5)),
        s_while_do(
          t_lt(R0, r(12)),
          Some(6),
          vec![
            s_vanilla(i_sub(r(3), r(3), r(12))),
            s_vanilla(i_binop_imm(BinOp::Sub, r(12), r(12), 1)),
          ],
        ),
      ],
    ),
    s_vanilla(i_print(r(3))),
  ];
  Blockifier::new("loop_sequence").finish(stmts, r(3))
}

/// Calls on both sides of a branch and inside a loop, with a value kept in
/// the return information register across them.
fn test_calls() -> Program {
  let stmts = vec![
    s_vanilla(i_imm(r(9), 77)),
    s_vanilla(i_imm(r(1), 2)),
    s_vanilla(i_imm(r(2), 3)),
    s_if_then_else(
      t_lt(r(1), r(2)),
      vec![s_vanilla(i_call(1))],
      vec![s_vanilla(i_call(2))],
    ),
    s_vanilla(i_print(r(9))),
    s_vanilla(i_imm(r(10), 0)),
    s_while_do(
      t_lt(r(10), r(2)),
      Some(4),
      vec![
        s_if_then(t_eq(r(10), r(1)), vec![s_vanilla(i_call(3))]),
        s_vanilla(i_addi(r(10), r(10), 1)),
      ],
    ),
    s_vanilla(i_print(r(9))),
  ];
  Blockifier::new("calls").finish(stmts, r(9))
}

/// The program keeps a local in its own frame cell.
fn test_frame_local() -> Program {
  let mut b = Blockifier::new("frame_local");
  let local = b.new_frame_cell();
  let stmts = vec![
    s_vanilla(i_imm(r(1), 6)),
    s_vanilla(i_imm(r(2), 8)),
    s_vanilla(i_store_frame(local, r(1))),
    s_if_then_else(
      t_lt(r(1), r(2)),
      vec![
        s_vanilla(i_load_frame(r(3), local)),
        s_vanilla(i_addi(r(3), r(3), 1)),
        s_vanilla(i_store_frame(local, r(3))),
      ],
      vec![s_vanilla(i_store_frame(local, R0))],
    ),
    s_vanilla(i_load_frame(r(4), local)),
    s_vanilla(i_print(r(4))),
  ];
  b.finish(stmts, r(4))
}

/// Instructions that are already predicated by the program itself.
fn test_guarded_ops() -> Program {
  let p2 = PReg(2);
  let stmts = vec![
    s_vanilla(i_imm(r(1), 1)),
    s_vanilla(i_imm(r(2), 2)),
    s_vanilla(i_cmp(CmpOp::Lt, p2, r(1), r(2))),
    s_if_then_else(
      t_lt(r(2), r(1)),
      vec![s_vanilla(guarded(Cond::new(p2), i_imm(r(3), 5)))],
      vec![
        s_vanilla(guarded(Cond::new(p2), i_imm(r(3), 6))),
        s_vanilla(guarded(Cond::not(p2), i_imm(r(3), 7))),
        s_vanilla(i_pand(p2, Cond::new(p2), Cond::new(COND_REG))),
        s_vanilla(guarded(Cond::not(p2), i_addi(r(3), r(3), 10))),
      ],
    ),
    s_vanilla(i_print(r(3))),
  ];
  Blockifier::new("guarded_ops").finish(stmts, r(3))
}

/// More live predicates than registers, once fewer are available.
fn test_many_preds() -> Program {
  let mut stmts = vec![
    s_vanilla(i_imm(r(1), 1)),
    s_vanilla(i_imm(r(2), 2)),
    s_vanilla(i_imm(r(3), 0)),
  ];
  // Four levels deep, alternating which side is taken.
  let mut inner = vec![s_vanilla(i_addi(r(3), r(3), 1000))];
  for level in 0..4u32 {
    let taken = vec![s_vanilla(i_addi(r(3), r(3), 1 << level))];
    let test = if level % 2 == 0 { t_lt(r(1), r(2)) } else { t_lt(r(2), r(1)) };
    inner = if level % 2 == 0 {
      let mut then = taken;
      then.extend(inner);
      then.push(s_vanilla(i_print(r(3))));
      vec![s_if_then_else(test, then, vec![s_vanilla(i_print(r(1)))])]
    } else {
      let mut els = taken;
      els.extend(inner);
      vec![s_if_then_else(test, vec![s_vanilla(i_print(r(2)))], els)]
    };
  }
  stmts.extend(inner);
  stmts.push(s_if_then(t_ne(r(3), R0), vec![s_vanilla(i_print(r(3)))]));
  Blockifier::new("many_preds").finish(stmts, r(3))
}

// Whatever other tests need to be added, please add them here.
const TEST_CASES: &[(&str, fn() -> Program)] = &[
  ("straight_line", test_straight_line),
  ("diamond", test_diamond),
  ("diamond_region", test_diamond_region),
  ("nested_ifs", test_nested_ifs),
  ("counted_loop", test_counted_loop),
  ("loose_bound", test_loose_bound),
  ("unbounded_loop", test_unbounded_loop),
  ("zero_bound", test_zero_bound),
  ("nested_loops", test_nested_loops),
  ("self_loop", test_self_loop),
  ("loop_sequence", test_loop_sequence),
  ("calls", test_calls),
  ("frame_local", test_frame_local),
  ("guarded_ops", test_guarded_ops),
  ("many_preds", test_many_preds),
];

pub fn find_program(name: &str) -> Result<Program, Vec<String>> {
  for (test_name, make) in TEST_CASES {
    if *test_name == name {
      return Ok(make());
    }
  }
  Err(TEST_CASES.iter().map(|(name, _)| name.to_string()).collect())
}

pub fn all_names() -> Vec<&'static str> {
  TEST_CASES.iter().map(|(name, _)| *name).collect()
}
