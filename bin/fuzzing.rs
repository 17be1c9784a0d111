//! Implements fuzzing primitives for everything.
//!
//! Programs are generated as structured statements, so that every generated
//! program is reducible and comes with a scope tree.  Loops always count up
//! to a limit, so their bounds are known.

use arbitrary::{Arbitrary, Result, Unstructured};

use crate::test_framework::*;
use spreduce::GReg;

const NUM_DATA_REGS: u8 = 8;
const MAX_LOOP_DEPTH: u8 = 3;
const MAX_IF_DEPTH: u8 = 4;
const MAX_TRIP_COUNT: u8 = 5;

struct FuzzingEnv {
  /// Statements left to generate.
  budget: u32,
  loop_depth: u8,
  if_depth: u8,
}

impl FuzzingEnv {
  fn data_reg(&self, u: &mut Unstructured) -> Result<GReg> {
    Ok(GReg(1 + u8::arbitrary(u)? % NUM_DATA_REGS))
  }

  // Loop counters and limits aren't data registers, so loop bodies can't
  // change them.
  fn counter_reg(&self) -> GReg {
    GReg(10 + self.loop_depth)
  }

  fn limit_reg(&self) -> GReg {
    GReg(16 + self.loop_depth)
  }

  fn src_reg(&self, u: &mut Unstructured) -> Result<GReg> {
    Ok(match u8::arbitrary(u)? % 4 {
      0 => GReg::R0,
      1 if self.loop_depth > 0 => GReg(10 + self.loop_depth - 1),
      _ => self.data_reg(u)?,
    })
  }

  fn mem_offset(&self, u: &mut Unstructured) -> Result<u32> {
    Ok(u32::arbitrary(u)? % MEM_WORDS)
  }

  fn inst(&mut self, u: &mut Unstructured) -> Result<Inst> {
    const NUM_VARIANTS: u8 = 9;

    Ok(match u8::arbitrary(u)? % NUM_VARIANTS {
      0 => i_imm(self.data_reg(u)?, u32::arbitrary(u)?),
      1 => i_copy(self.data_reg(u)?, self.src_reg(u)?),
      2 => i_binop(
        BinOp::arbitrary(u)?,
        self.data_reg(u)?,
        self.src_reg(u)?,
        self.src_reg(u)?,
      ),
      3 => i_binop_imm(
        BinOp::arbitrary(u)?,
        self.data_reg(u)?,
        self.src_reg(u)?,
        u32::arbitrary(u)? % 64,
      ),
      4 => i_print(self.src_reg(u)?),
      5 => i_store(GReg::R0, self.mem_offset(u)?, self.src_reg(u)?),
      6 => i_load(self.data_reg(u)?, GReg::R0, self.mem_offset(u)?),
      7 => i_call(u32::from(u8::arbitrary(u)?)),
      8 => i_print(GReg(9)),
      x => {
        debug_assert!(x < NUM_VARIANTS, "update NUM_VARIANTS above");
        unreachable!()
      }
    })
  }

  fn test(&self, u: &mut Unstructured) -> Result<Test> {
    Ok(Test {
      op: CmpOp::arbitrary(u)?,
      lhs: self.src_reg(u)?,
      rhs: self.src_reg(u)?,
    })
  }

  // Slack on top of the exact header count, or no bound at all.
  fn bound(&self, u: &mut Unstructured, trips: u32) -> Result<Option<u32>> {
    Ok(match u8::arbitrary(u)? % 4 {
      0 => None,
      n => Some(trips + u32::from(n - 1)),
    })
  }

  fn stmts(&mut self, u: &mut Unstructured, max: u8) -> Result<Vec<Stmt>> {
    let mut stmts = vec![];
    let num = u8::arbitrary(u)? % max.max(1);
    for _ in 0..num {
      if self.budget == 0 {
        break;
      }
      self.budget -= 1;
      match u8::arbitrary(u)? % 10 {
        6 | 7 if self.if_depth < MAX_IF_DEPTH => {
          let test = self.test(u)?;
          self.if_depth += 1;
          let stmts_t = self.stmts(u, max / 2 + 1)?;
          let stmts_e = self.stmts(u, max / 2 + 1)?;
          self.if_depth -= 1;
          stmts.push(s_if_then_else(test, stmts_t, stmts_e));
        }
        8 if self.loop_depth < MAX_LOOP_DEPTH => {
          let (c, lim) = (self.counter_reg(), self.limit_reg());
          let trips = u8::arbitrary(u)? % (MAX_TRIP_COUNT + 1);
          stmts.push(s_vanilla(i_imm(c, 0)));
          stmts.push(s_vanilla(i_imm(lim, u32::from(trips))));
          // The header runs once more than the body.
          let bound = self.bound(u, u32::from(trips) + 1)?;
          self.loop_depth += 1;
          let mut body = self.stmts(u, max / 2 + 1)?;
          self.loop_depth -= 1;
          body.push(s_vanilla(i_addi(c, c, 1)));
          stmts.push(s_while_do(t_lt(c, lim), bound, body));
        }
        9 if self.loop_depth < MAX_LOOP_DEPTH => {
          let (c, lim) = (self.counter_reg(), self.limit_reg());
          let trips = 1 + u8::arbitrary(u)? % MAX_TRIP_COUNT;
          stmts.push(s_vanilla(i_imm(c, 0)));
          stmts.push(s_vanilla(i_imm(lim, u32::from(trips))));
          let bound = self.bound(u, u32::from(trips))?;
          self.loop_depth += 1;
          let mut body = vec![];
          for _ in 0..u8::arbitrary(u)? % 4 {
            body.push(s_vanilla(self.inst(u)?));
          }
          self.loop_depth -= 1;
          body.push(s_vanilla(i_addi(c, c, 1)));
          stmts.push(s_repeat_until(body, t_le(lim, c), bound));
        }
        _ => stmts.push(s_vanilla(self.inst(u)?)),
      }
    }
    Ok(stmts)
  }
}

impl<'a> Arbitrary<'a> for Program {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<Program> {
    let mut env = FuzzingEnv {
      budget: 1 + u32::from(u8::arbitrary(u)?),
      loop_depth: 0,
      if_depth: 0,
    };
    let mut blockifier = Blockifier::new("funk");
    if bool::arbitrary(u)? {
      blockifier.as_region();
    }
    let stmts = env.stmts(u, 16)?;
    let ret = env.data_reg(u)?;
    Ok(blockifier.finish(stmts, ret))
  }
}

/// Number of predicate registers that leaves the generated programs at least
/// one to allocate, besides the condition register and the temporary.
pub fn min_num_pregs() -> u8 {
  COND_REG.0 + 3
}
