/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// As part of this set of test cases, we define a mini predicated ISA and
/// implement the `TargetInst` trait for it so that we can use the reduction's
/// public interface.  Programs are written as structured statements, which
/// the `Blockifier` turns into a CFG together with its scope tree.
use arbitrary::Arbitrary;
use spreduce::{
  BlockIx, Cond, FrameIx, GReg, MachineFunc, Map, PReg, PredDef, PredIx,
  SPInst, ScopeIx, ScopeTree, SpecialReg, TargetInst, TargetRegs, CELL_BYTES,
};

use std::fmt;

pub type Func = MachineFunc<Inst>;

// Registers the test programs reserve for themselves.

/// Every branch condition is computed into this register.
pub const COND_REG: PReg = PReg(1);
/// The frame setup keeps the return information here.
pub const RET_BASE_SAVE: GReg = GReg(20);
pub const RET_OFF_SAVE: GReg = GReg(21);

pub const NUM_GREGS: usize = 32;
pub const NUM_PREGS: usize = 8;
pub const MEM_WORDS: u32 = 64;

const STEP_LIMIT: usize = 1_000_000;
const INITIAL_SRB: u32 = 0x400;
const INITIAL_SRO: u32 = 0x40;
const DIRTY: u32 = 0xDEAD_BEEF;
const UNINIT_CELL: u32 = 0xA5A5_A5A5;

//=============================================================================
// Definition of instructions.

#[derive(Copy, Clone, PartialEq, Eq, Debug, Arbitrary)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  And,
  Or,
  Xor,
  Shl,
  Shr,
}

impl BinOp {
  fn calc(self, a: u32, b: u32) -> u32 {
    match self {
      BinOp::Add => a.wrapping_add(b),
      BinOp::Sub => a.wrapping_sub(b),
      BinOp::Mul => a.wrapping_mul(b),
      BinOp::And => a & b,
      BinOp::Or => a | b,
      BinOp::Xor => a ^ b,
      BinOp::Shl => a.wrapping_shl(b & 31),
      BinOp::Shr => a.wrapping_shr(b & 31),
    }
  }
}

/// Signed comparisons.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Arbitrary)]
pub enum CmpOp {
  Lt,
  Le,
  Eq,
  Ne,
}

impl CmpOp {
  fn calc(self, a: u32, b: u32) -> bool {
    let (a, b) = (a as i32, b as i32);
    match self {
      CmpOp::Lt => a < b,
      CmpOp::Le => a <= b,
      CmpOp::Eq => a == b,
      CmpOp::Ne => a != b,
    }
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Addr {
  /// A frame cell, before frame indices are resolved.
  Frame(FrameIx),
  /// Byte offset into the stack frame.
  Stack(i32),
  /// Word address `base + offset` in data memory.
  Mem { base: GReg, offset: u32 },
}

#[derive(Clone, Debug)]
pub enum Op {
  Imm { dst: GReg, imm: u32 },
  Copy { dst: GReg, src: GReg },
  BinOp { op: BinOp, dst: GReg, lhs: GReg, rhs: GReg },
  BinOpImm { op: BinOp, dst: GReg, lhs: GReg, imm: u32 },
  Cmp { op: CmpOp, dst: PReg, lhs: GReg, rhs: GReg },
  PAnd { dst: PReg, a: Cond, b: Cond },
  POr { dst: PReg, a: Cond, b: Cond },
  PMov { dst: PReg, src: Cond },
  PClr { dst: PReg },
  BTest { dst: PReg, src: GReg, bit: u32 },
  BCopy { dst: GReg, src: GReg, bit: u32, cond: Cond },
  Load { dst: GReg, addr: Addr },
  Store { addr: Addr, src: GReg },
  Mfs { dst: GReg, sreg: SpecialReg },
  Mts { sreg: SpecialReg, src: GReg },
  Print { reg: GReg },
  Call { callee: u32 },
  Sres { words: u32 },
  Sfree { words: u32 },
  Br { target: BlockIx },
  Ret { reg: GReg },
}

#[derive(Clone)]
pub struct Inst {
  pub guard: Cond,
  pub frame_setup: bool,
  pub op: Op,
}

impl fmt::Debug for Inst {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if !self.guard.is_always_true() {
      write!(fmt, "({:?}) ", self.guard)?;
    }
    write!(fmt, "{:?}", self.op)?;
    if self.frame_setup {
      write!(fmt, " [frame-setup]")?;
    }
    Ok(())
  }
}

fn plain(op: Op) -> Inst {
  Inst { guard: Cond::TRUE, frame_setup: false, op }
}

fn setup(op: Op) -> Inst {
  Inst { guard: Cond::TRUE, frame_setup: true, op }
}

pub fn i_imm(dst: GReg, imm: u32) -> Inst {
  plain(Op::Imm { dst, imm })
}
pub fn i_copy(dst: GReg, src: GReg) -> Inst {
  plain(Op::Copy { dst, src })
}
pub fn i_binop(op: BinOp, dst: GReg, lhs: GReg, rhs: GReg) -> Inst {
  plain(Op::BinOp { op, dst, lhs, rhs })
}
pub fn i_add(dst: GReg, lhs: GReg, rhs: GReg) -> Inst {
  i_binop(BinOp::Add, dst, lhs, rhs)
}
pub fn i_sub(dst: GReg, lhs: GReg, rhs: GReg) -> Inst {
  i_binop(BinOp::Sub, dst, lhs, rhs)
}
pub fn i_mul(dst: GReg, lhs: GReg, rhs: GReg) -> Inst {
  i_binop(BinOp::Mul, dst, lhs, rhs)
}
pub fn i_binop_imm(op: BinOp, dst: GReg, lhs: GReg, imm: u32) -> Inst {
  plain(Op::BinOpImm { op, dst, lhs, imm })
}
pub fn i_addi(dst: GReg, lhs: GReg, imm: u32) -> Inst {
  i_binop_imm(BinOp::Add, dst, lhs, imm)
}
pub fn i_cmp(op: CmpOp, dst: PReg, lhs: GReg, rhs: GReg) -> Inst {
  plain(Op::Cmp { op, dst, lhs, rhs })
}
pub fn i_pand(dst: PReg, a: Cond, b: Cond) -> Inst {
  plain(Op::PAnd { dst, a, b })
}
pub fn i_por(dst: PReg, a: Cond, b: Cond) -> Inst {
  plain(Op::POr { dst, a, b })
}
pub fn i_load(dst: GReg, base: GReg, offset: u32) -> Inst {
  plain(Op::Load { dst, addr: Addr::Mem { base, offset } })
}
pub fn i_store(base: GReg, offset: u32, src: GReg) -> Inst {
  plain(Op::Store { addr: Addr::Mem { base, offset }, src })
}
pub fn i_load_frame(dst: GReg, cell: FrameIx) -> Inst {
  plain(Op::Load { dst, addr: Addr::Frame(cell) })
}
pub fn i_store_frame(cell: FrameIx, src: GReg) -> Inst {
  plain(Op::Store { addr: Addr::Frame(cell), src })
}
pub fn i_print(reg: GReg) -> Inst {
  plain(Op::Print { reg })
}
pub fn i_call(callee: u32) -> Inst {
  plain(Op::Call { callee })
}
pub fn i_br(target: BlockIx) -> Inst {
  plain(Op::Br { target })
}
pub fn i_br_if(cond: Cond, target: BlockIx) -> Inst {
  Inst { guard: cond, ..i_br(target) }
}
pub fn i_ret(reg: GReg) -> Inst {
  plain(Op::Ret { reg })
}

/// Guard an instruction the way a source-level predicated op would be.
pub fn guarded(guard: Cond, inst: Inst) -> Inst {
  Inst { guard, ..inst }
}

/// Reserve a frame and save the return information.
pub fn prologue(frame_words: u32) -> Vec<Inst> {
  vec![
    setup(Op::Sres { words: frame_words }),
    setup(Op::Mfs { dst: RET_BASE_SAVE, sreg: SpecialReg::Srb }),
    setup(Op::Mfs { dst: RET_OFF_SAVE, sreg: SpecialReg::Sro }),
  ]
}

/// Restore the return information, free the frame and return `reg`.
pub fn epilogue(frame_words: u32, reg: GReg) -> Vec<Inst> {
  vec![
    setup(Op::Mts { sreg: SpecialReg::Srb, src: RET_BASE_SAVE }),
    setup(Op::Mts { sreg: SpecialReg::Sro, src: RET_OFF_SAVE }),
    setup(Op::Sfree { words: frame_words }),
    i_ret(reg),
  ]
}

fn cond_regs(op: &Op) -> Vec<Cond> {
  match op {
    Op::PAnd { a, b, .. } | Op::POr { a, b, .. } => vec![*a, *b],
    Op::PMov { src, .. } => vec![*src],
    Op::BCopy { cond, .. } => vec![*cond],
    _ => vec![],
  }
}

/// The predicate register an operation writes, if any.
pub fn def_preg(op: &Op) -> Option<PReg> {
  match op {
    Op::Cmp { dst, .. }
    | Op::PAnd { dst, .. }
    | Op::POr { dst, .. }
    | Op::PMov { dst, .. }
    | Op::PClr { dst }
    | Op::BTest { dst, .. } => Some(*dst),
    _ => None,
  }
}

fn with_cond_kill(c: Cond, reg: PReg, kill: bool) -> Cond {
  if c.reg == reg {
    Cond { kill, ..c }
  } else {
    c
  }
}

impl TargetInst for Inst {
  fn gen_inst(inst: SPInst) -> Self {
    match inst {
      SPInst::PAnd { dst, a, b } => plain(Op::PAnd { dst, a, b }),
      SPInst::PMov { guard, dst, src } => {
        guarded(guard, plain(Op::PMov { dst, src }))
      }
      SPInst::PClear { dst } => plain(Op::PClr { dst }),
      SPInst::BTest { dst, src, bit } => plain(Op::BTest { dst, src, bit }),
      SPInst::BCopy { guard, dst, src, bit, cond } => {
        guarded(guard, plain(Op::BCopy { dst, src, bit, cond }))
      }
      SPInst::AndImm { dst, src, imm } => {
        i_binop_imm(BinOp::And, dst, src, imm)
      }
      SPInst::LoadImm { dst, imm } => i_imm(dst, imm),
      SPInst::SubImm { dst, src, imm } => {
        i_binop_imm(BinOp::Sub, dst, src, imm)
      }
      SPInst::CmpLt { dst, lhs, rhs } => i_cmp(CmpOp::Lt, dst, lhs, rhs),
      SPInst::LoadCell { dst, cell } => i_load_frame(dst, cell),
      SPInst::StoreCell { cell, src } => i_store_frame(cell, src),
      SPInst::ReadPredBank { dst } => {
        plain(Op::Mfs { dst, sreg: SpecialReg::S0 })
      }
      SPInst::WritePredBank { src } => {
        plain(Op::Mts { sreg: SpecialReg::S0, src })
      }
      SPInst::Branch { cond, target } => i_br_if(cond, target),
    }
  }

  fn guard(&self) -> Cond {
    self.guard
  }

  fn with_guard(&self, guard: Cond) -> Self {
    Inst { guard, ..self.clone() }
  }

  fn is_predicable(&self) -> bool {
    match self.op {
      Op::Call { .. } | Op::Ret { .. } | Op::Sres { .. } | Op::Sfree { .. } => {
        false
      }
      _ => true,
    }
  }

  fn is_call(&self) -> bool {
    matches!(self.op, Op::Call { .. })
  }
  fn is_return(&self) -> bool {
    matches!(self.op, Op::Ret { .. })
  }
  fn is_branch(&self) -> bool {
    matches!(self.op, Op::Br { .. })
  }
  fn is_stack_control(&self) -> bool {
    matches!(self.op, Op::Sres { .. } | Op::Sfree { .. })
  }
  fn is_frame_setup(&self) -> bool {
    self.frame_setup
  }

  fn branch_target(&self) -> Option<BlockIx> {
    match self.op {
      Op::Br { target } => Some(target),
      _ => None,
    }
  }

  fn with_branch_target(&self, target: BlockIx) -> Self {
    match self.op {
      Op::Br { .. } => Inst { op: Op::Br { target }, ..self.clone() },
      _ => self.clone(),
    }
  }

  fn mentions_preg(&self, reg: PReg) -> bool {
    self.reads_preg(reg) || def_preg(&self.op) == Some(reg)
  }

  fn reads_preg(&self, reg: PReg) -> bool {
    (!self.guard.is_always_true() && self.guard.reg == reg)
      || cond_regs(&self.op).iter().any(|c| c.reg == reg)
  }

  fn with_kill(&self, reg: PReg, kill: bool) -> Self {
    let op = match self.op.clone() {
      Op::PAnd { dst, a, b } => Op::PAnd {
        dst,
        a: with_cond_kill(a, reg, kill),
        b: with_cond_kill(b, reg, kill),
      },
      Op::POr { dst, a, b } => Op::POr {
        dst,
        a: with_cond_kill(a, reg, kill),
        b: with_cond_kill(b, reg, kill),
      },
      Op::PMov { dst, src } => {
        Op::PMov { dst, src: with_cond_kill(src, reg, kill) }
      }
      Op::BCopy { dst, src, bit, cond } => Op::BCopy {
        dst,
        src,
        bit,
        cond: with_cond_kill(cond, reg, kill),
      },
      op => op,
    };
    Inst { op, guard: with_cond_kill(self.guard, reg, kill), ..self.clone() }
  }

  fn reads_greg(&self, reg: GReg) -> bool {
    match &self.op {
      Op::Copy { src, .. } => *src == reg,
      Op::BinOp { lhs, rhs, .. } => *lhs == reg || *rhs == reg,
      Op::BinOpImm { lhs, .. } => *lhs == reg,
      Op::Cmp { lhs, rhs, .. } => *lhs == reg || *rhs == reg,
      Op::BTest { src, .. } | Op::BCopy { src, .. } => *src == reg,
      Op::Load { addr: Addr::Mem { base, .. }, .. } => *base == reg,
      Op::Store { addr, src } => {
        *src == reg || matches!(addr, Addr::Mem { base, .. } if *base == reg)
      }
      Op::Mts { src, .. } => *src == reg,
      Op::Print { reg: r } | Op::Ret { reg: r } => *r == reg,
      _ => false,
    }
  }

  fn defines_greg(&self, reg: GReg) -> bool {
    match &self.op {
      Op::Imm { dst, .. }
      | Op::Copy { dst, .. }
      | Op::BinOp { dst, .. }
      | Op::BinOpImm { dst, .. }
      | Op::BCopy { dst, .. }
      | Op::Load { dst, .. }
      | Op::Mfs { dst, .. } => *dst == reg,
      _ => false,
    }
  }

  fn move_from_special(&self) -> Option<(GReg, SpecialReg)> {
    match self.op {
      Op::Mfs { dst, sreg } => Some((dst, sreg)),
      _ => None,
    }
  }

  fn move_to_special(&self) -> Option<(SpecialReg, GReg)> {
    match self.op {
      Op::Mts { sreg, src } => Some((sreg, src)),
      _ => None,
    }
  }

  fn cell_load(&self) -> Option<(GReg, FrameIx)> {
    match self.op {
      Op::Load { dst, addr: Addr::Frame(cell) }
        if self.guard.is_always_true() =>
      {
        Some((dst, cell))
      }
      _ => None,
    }
  }

  fn cell_store(&self) -> Option<(FrameIx, GReg)> {
    match self.op {
      Op::Store { addr: Addr::Frame(cell), src }
        if self.guard.is_always_true() =>
      {
        Some((cell, src))
      }
      _ => None,
    }
  }

  fn reads_cell(&self) -> Option<FrameIx> {
    match self.op {
      Op::Load { addr: Addr::Frame(cell), .. } => Some(cell),
      _ => None,
    }
  }

  fn writes_cell(&self) -> Option<FrameIx> {
    match self.op {
      Op::Store { addr: Addr::Frame(cell), .. } => Some(cell),
      _ => None,
    }
  }

  fn resolve_frame_index(&self, offset_of: &dyn Fn(FrameIx) -> i32) -> Self {
    let resolve = |addr: Addr| match addr {
      Addr::Frame(cell) => Addr::Stack(offset_of(cell)),
      other => other,
    };
    let op = match self.op.clone() {
      Op::Load { dst, addr } => Op::Load { dst, addr: resolve(addr) },
      Op::Store { addr, src } => Op::Store { addr: resolve(addr), src },
      op => op,
    };
    Inst { op, ..self.clone() }
  }
}

//=============================================================================
// The interpreter

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResult {
  pub ret_value: Option<u32>,
  pub stdout: String,
  pub num_steps: usize,
}

struct IState<'a> {
  func: &'a Func,
  regs: &'a TargetRegs,
  layout_pos: Map<BlockIx, usize>,
  block: BlockIx,
  pos: usize,
  gregs: Vec<u32>,
  pregs: Vec<bool>,
  srb: u32,
  sro: u32,
  // Byte offset to word.
  stack: Map<i32, u32>,
  mem: Vec<u32>,
  n_insns: usize,
  n_disabled: usize,
  stdout: String,
  ret_value: Option<u32>,
}

impl<'a> IState<'a> {
  fn new(func: &'a Func, regs: &'a TargetRegs) -> Self {
    let layout_pos =
      func.layout.iter().enumerate().map(|(n, b)| (*b, n)).collect();
    let mut pregs = vec![false; NUM_PREGS];
    pregs[PReg::P0.get_index()] = true;
    // The caller enables us.
    pregs[call_guard(regs).get_index()] = true;
    Self {
      func,
      regs,
      layout_pos,
      block: func.entry,
      pos: 0,
      gregs: vec![0; NUM_GREGS],
      pregs,
      srb: INITIAL_SRB,
      sro: INITIAL_SRO,
      stack: Map::default(),
      mem: vec![0; MEM_WORDS as usize],
      n_insns: 0,
      n_disabled: 0,
      stdout: String::new(),
      ret_value: None,
    }
  }

  fn get_greg(&self, reg: GReg) -> u32 {
    self.gregs[reg.get_index()]
  }

  fn set_greg(&mut self, reg: GReg, val: u32) {
    // r0 is hardwired to zero.
    if reg != GReg::R0 {
      self.gregs[reg.get_index()] = val;
    }
  }

  fn get_cond(&self, c: Cond) -> bool {
    self.pregs[c.reg.get_index()] != c.negated
  }

  fn set_preg(&mut self, reg: PReg, val: bool) {
    if reg != PReg::P0 {
      self.pregs[reg.get_index()] = val;
    }
  }

  fn bank(&self) -> u32 {
    let mut bits = 0;
    for (n, p) in self.pregs.iter().enumerate() {
      if *p {
        bits |= 1 << n;
      }
    }
    bits
  }

  fn set_bank(&mut self, bits: u32) {
    for n in 1..NUM_PREGS {
      self.pregs[n] = bits & (1 << n) != 0;
    }
  }

  fn mem_addr(&self, base: GReg, offset: u32) -> Result<usize, String> {
    let addr = self.get_greg(base).wrapping_add(offset);
    if addr >= MEM_WORDS {
      return Err(format!("memory access out of bounds: {}", addr));
    }
    Ok(addr as usize)
  }

  fn load(&self, addr: Addr) -> Result<u32, String> {
    let stack = |off: i32| self.stack.get(&off).cloned().unwrap_or(UNINIT_CELL);
    Ok(match addr {
      Addr::Frame(cell) => stack(cell.get() as i32 * CELL_BYTES),
      Addr::Stack(off) => stack(off),
      Addr::Mem { base, offset } => self.mem[self.mem_addr(base, offset)?],
    })
  }

  fn store(&mut self, addr: Addr, val: u32) -> Result<(), String> {
    match addr {
      Addr::Frame(cell) => {
        self.stack.insert(cell.get() as i32 * CELL_BYTES, val);
      }
      Addr::Stack(off) => {
        self.stack.insert(off, val);
      }
      Addr::Mem { base, offset } => {
        let a = self.mem_addr(base, offset)?;
        self.mem[a] = val;
      }
    }
    Ok(())
  }

  fn jump(&mut self, target: BlockIx) {
    self.block = target;
    self.pos = 0;
  }

  // Move on to the layout successor of the current block.
  fn fall_through(&mut self) -> Result<(), String> {
    let next = self
      .layout_pos
      .get(&self.block)
      .and_then(|n| self.func.layout.get(n + 1))
      .cloned();
    match next {
      Some(b) => {
        self.jump(b);
        Ok(())
      }
      None => Err(format!(
        "fell off the end of {}",
        self.func.blocks[self.block].name
      )),
    }
  }

  // Returns true when the function has returned.
  fn step(&mut self) -> Result<bool, String> {
    let func = self.func;
    let insts = &func.blocks[self.block].insts;
    if self.pos >= insts.len() {
      self.fall_through()?;
      return Ok(false);
    }
    let inst = insts[self.pos].clone();
    self.pos += 1;
    self.n_insns += 1;
    if self.n_insns > STEP_LIMIT {
      return Err("step limit exceeded".to_string());
    }

    // Calls and returns run unconditionally; the callee finds its enable
    // flag in the call guard register.
    if !self.get_cond(inst.guard)
      && !matches!(inst.op, Op::Call { .. } | Op::Ret { .. })
    {
      self.n_disabled += 1;
      return Ok(false);
    }

    match inst.op {
      Op::Imm { dst, imm } => self.set_greg(dst, imm),
      Op::Copy { dst, src } => {
        let v = self.get_greg(src);
        self.set_greg(dst, v);
      }
      Op::BinOp { op, dst, lhs, rhs } => {
        let v = op.calc(self.get_greg(lhs), self.get_greg(rhs));
        self.set_greg(dst, v);
      }
      Op::BinOpImm { op, dst, lhs, imm } => {
        let v = op.calc(self.get_greg(lhs), imm);
        self.set_greg(dst, v);
      }
      Op::Cmp { op, dst, lhs, rhs } => {
        let v = op.calc(self.get_greg(lhs), self.get_greg(rhs));
        self.set_preg(dst, v);
      }
      Op::PAnd { dst, a, b } => {
        let v = self.get_cond(a) && self.get_cond(b);
        self.set_preg(dst, v);
      }
      Op::POr { dst, a, b } => {
        let v = self.get_cond(a) || self.get_cond(b);
        self.set_preg(dst, v);
      }
      Op::PMov { dst, src } => {
        let v = self.get_cond(src);
        self.set_preg(dst, v);
      }
      Op::PClr { dst } => self.set_preg(dst, false),
      Op::BTest { dst, src, bit } => {
        let v = self.get_greg(src) & (1 << bit) != 0;
        self.set_preg(dst, v);
      }
      Op::BCopy { dst, src, bit, cond } => {
        let v = (self.get_greg(src) & !(1 << bit))
          | ((self.get_cond(cond) as u32) << bit);
        self.set_greg(dst, v);
      }
      Op::Load { dst, addr } => {
        let v = self.load(addr)?;
        self.set_greg(dst, v);
      }
      Op::Store { addr, src } => {
        let v = self.get_greg(src);
        self.store(addr, v)?;
      }
      Op::Mfs { dst, sreg } => {
        let v = match sreg {
          SpecialReg::S0 => self.bank(),
          SpecialReg::Srb => self.srb,
          SpecialReg::Sro => self.sro,
        };
        self.set_greg(dst, v);
      }
      Op::Mts { sreg, src } => {
        let v = self.get_greg(src);
        match sreg {
          SpecialReg::S0 => self.set_bank(v),
          SpecialReg::Srb => self.srb = v,
          SpecialReg::Sro => self.sro = v,
        }
      }
      Op::Print { reg } => {
        let v = self.get_greg(reg);
        self.stdout.push_str(&format!("{}\n", v));
      }
      Op::Call { callee } => {
        if self.pregs[call_guard(self.regs).get_index()] {
          self.stdout.push_str(&format!("call {}\n", callee));
        } else {
          // A disabled callee still runs its frame setup.
          let r = self.regs.ret_info_reg;
          self.set_greg(r, DIRTY);
        }
        self.srb = 0x1000 + callee;
        self.sro = self.n_insns as u32;
      }
      Op::Sres { .. } | Op::Sfree { .. } => {}
      Op::Br { target } => self.jump(target),
      Op::Ret { reg } => {
        if self.srb != INITIAL_SRB || self.sro != INITIAL_SRO {
          return Err("return information clobbered".to_string());
        }
        self.ret_value = Some(self.get_greg(reg));
        return Ok(true);
      }
    }
    Ok(false)
  }
}

/// The register a callee reads its enable flag from.
pub fn call_guard(regs: &TargetRegs) -> PReg {
  PReg(regs.num_pregs - 1)
}

pub fn run_func(
  func: &Func, who: &str, regs: &TargetRegs,
) -> Result<RunResult, String> {
  println!("");
  println!(
    "Running stage '{}': Func: name='{}' entry='{:?}'",
    who, func.name, func.entry
  );

  let mut istate = IState::new(func, regs);
  let mut done = false;
  while !done {
    done = istate.step()?;
  }

  println!(
    "Running stage '{}': done.  {} insns, {} disabled",
    who, istate.n_insns, istate.n_disabled
  );

  Ok(RunResult {
    ret_value: istate.ret_value,
    stdout: istate.stdout,
    num_steps: istate.n_insns,
  })
}

//=============================================================================
// Printing.

pub fn render(func: &Func, who: &str, out: &mut String) {
  out.push_str(&format!("\n======== {}: {} ========\n", who, func.name));
  for &b in &func.layout {
    let block = &func.blocks[b];
    out.push_str(&format!("{:?} {}:", b, block.name));
    if !block.preds.is_empty() {
      out.push_str(&format!("  preds {:?}", block.preds));
    }
    if !block.succs.is_empty() {
      out.push_str(&format!("  succs {:?}", block.succs));
    }
    out.push('\n');
    for inst in &block.insts {
      out.push_str(&format!("    {:?}\n", inst));
    }
  }
}

pub fn print_func(func: &Func, who: &str) {
  let mut out = String::new();
  render(func, who, &mut out);
  println!("{}", out);
}

//=============================================================================
// Test programs: a function together with its scope tree.

#[derive(Clone, Debug)]
pub struct Program {
  pub func: Func,
  pub tree: ScopeTree,
}

//=============================================================================
// Definition of Stmt, and the Blockifier that turns statements into blocks
// and scopes.

/// `lhs op rhs`, computed into `COND_REG`.
#[derive(Copy, Clone, Debug)]
pub struct Test {
  pub op: CmpOp,
  pub lhs: GReg,
  pub rhs: GReg,
}

pub fn t_lt(lhs: GReg, rhs: GReg) -> Test {
  Test { op: CmpOp::Lt, lhs, rhs }
}
pub fn t_le(lhs: GReg, rhs: GReg) -> Test {
  Test { op: CmpOp::Le, lhs, rhs }
}
pub fn t_eq(lhs: GReg, rhs: GReg) -> Test {
  Test { op: CmpOp::Eq, lhs, rhs }
}
pub fn t_ne(lhs: GReg, rhs: GReg) -> Test {
  Test { op: CmpOp::Ne, lhs, rhs }
}

#[derive(Clone, Debug)]
pub enum Stmt {
  Vanilla { insn: Inst },
  IfThenElse { test: Test, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt> },
  /// The header executes at most `bound` times per entry.
  WhileDo { test: Test, bound: Option<u32>, stmts: Vec<Stmt> },
  /// A single-block loop: `stmts` may only contain `Vanilla`s.
  RepeatUntil { stmts: Vec<Stmt>, test: Test, bound: Option<u32> },
}

pub fn s_vanilla(insn: Inst) -> Stmt {
  Stmt::Vanilla { insn }
}

pub fn s_if_then_else(
  test: Test, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt>,
) -> Stmt {
  Stmt::IfThenElse { test, stmts_t, stmts_e }
}

pub fn s_if_then(test: Test, stmts_t: Vec<Stmt>) -> Stmt {
  Stmt::IfThenElse { test, stmts_t, stmts_e: vec![] }
}

pub fn s_while_do(test: Test, bound: Option<u32>, stmts: Vec<Stmt>) -> Stmt {
  Stmt::WhileDo { test, bound, stmts }
}

pub fn s_repeat_until(
  stmts: Vec<Stmt>, test: Test, bound: Option<u32>,
) -> Stmt {
  Stmt::RepeatUntil { stmts, test, bound }
}

const FRAME_WORDS: u32 = 4;

pub struct Blockifier {
  func: Func,
  tree: ScopeTree,
  // Where the next statement goes.
  scope: ScopeIx,
  block: BlockIx,
  pred: PredIx,
}

impl Blockifier {
  pub fn new(name: &str) -> Self {
    let mut func = Func::new(name);
    let entry = func.add_block("entry".to_string(), prologue(FRAME_WORDS));
    func.entry = entry;
    let tree = ScopeTree::new(entry);
    let scope = tree.root();
    let pred = tree.block_pred(entry).expect("root header predicate");
    Self { func, tree, scope, block: entry, pred }
  }

  /// A frame cell for the program's own use.
  pub fn new_frame_cell(&mut self) -> FrameIx {
    self.func.new_frame_cell()
  }

  /// Run the program as a region whose guard arrives in the call guard
  /// register, rather than as a whole function.
  pub fn as_region(&mut self) {
    self.tree.root_top_level = false;
  }

  fn push(&mut self, b: BlockIx, insn: Inst) {
    self.func.blocks[b].insts.push(insn);
  }

  fn add_block(&mut self, pred: PredIx) -> BlockIx {
    let name = format!("b{}", self.func.blocks.len());
    let b = self.func.add_block(name, vec![]);
    self.tree.set_block_pred(b, pred);
    b
  }

  // A block that is the next node of `scope`.
  fn new_member(&mut self, scope: ScopeIx, pred: PredIx) -> BlockIx {
    let b = self.add_block(pred);
    self.tree.add_block(scope, b);
    b
  }

  fn def(
    &mut self, scope: ScopeIx, pred: PredIx, src: BlockIx, dst: BlockIx,
    cond: Option<Cond>,
  ) {
    let guard = self.tree.block_pred(src).expect("source block predicate");
    self.tree.add_def(scope, PredDef { pred, guard, src, dst, cond });
  }

  fn test(&mut self, b: BlockIx, test: Test) {
    self.push(b, i_cmp(test.op, COND_REG, test.lhs, test.rhs));
  }

  fn blockify(&mut self, stmts: Vec<Stmt>) {
    for s in stmts {
      match s {
        Stmt::Vanilla { insn } => {
          let b = self.block;
          self.push(b, insn);
        }
        Stmt::IfThenElse { test, stmts_t, stmts_e } => {
          self.if_then_else(test, stmts_t, stmts_e)
        }
        Stmt::WhileDo { test, bound, stmts } => {
          self.while_do(test, bound, stmts)
        }
        Stmt::RepeatUntil { stmts, test, bound } => {
          self.repeat_until(stmts, test, bound)
        }
      }
    }
  }

  fn if_then_else(
    &mut self, test: Test, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt>,
  ) {
    let (s, a, pa) = (self.scope, self.block, self.pred);
    self.test(a, test);

    let pt = self.tree.new_pred();
    let t = self.new_member(s, pt);
    self.def(s, pt, a, t, Some(Cond::new(COND_REG)));
    self.block = t;
    self.pred = pt;
    self.blockify(stmts_t);
    let t_exit = self.block;

    let pe = self.tree.new_pred();
    let e = self.new_member(s, pe);
    self.def(s, pe, a, e, Some(Cond::not(COND_REG)));
    self.block = e;
    self.pred = pe;
    self.blockify(stmts_e);
    let e_exit = self.block;

    // The join is control equivalent to the condition block.
    let j = self.new_member(s, pa);
    self.push(a, i_br_if(Cond::not(COND_REG), e));
    self.push(a, i_br(t));
    self.push(t_exit, i_br(j));
    self.push(e_exit, i_br(j));
    self.block = j;
    self.pred = pa;
  }

  // Jump from the current block into a new loop header, returning the
  // header, its predicate and the loop's scope.
  fn enter_loop(&mut self, bound: Option<u32>) -> (BlockIx, PredIx, ScopeIx) {
    let (s, pre) = (self.scope, self.block);
    let ph = self.tree.new_pred();
    let h = self.add_block(ph);
    self.def(s, ph, pre, h, None);
    self.push(pre, i_br(h));
    let l = self.tree.add_subscope(s, h, bound);
    (h, ph, l)
  }

  fn while_do(&mut self, test: Test, bound: Option<u32>, stmts: Vec<Stmt>) {
    let s = self.scope;
    let (h, ph, l) = self.enter_loop(bound);
    self.test(h, test);

    let pb = self.tree.new_pred();
    let body = self.new_member(l, pb);
    self.def(l, pb, h, body, Some(Cond::new(COND_REG)));
    self.scope = l;
    self.block = body;
    self.pred = pb;
    self.blockify(stmts);
    let latch = self.block;
    self.push(latch, i_br(h));
    self.def(l, ph, latch, h, None);

    let px = self.tree.new_pred();
    let x = self.new_member(s, px);
    self.def(s, px, h, x, Some(Cond::not(COND_REG)));
    self.push(h, i_br_if(Cond::not(COND_REG), x));
    self.push(h, i_br(body));
    self.scope = s;
    self.block = x;
    self.pred = px;
  }

  fn repeat_until(&mut self, stmts: Vec<Stmt>, test: Test, bound: Option<u32>) {
    let s = self.scope;
    let (h, ph, l) = self.enter_loop(bound);
    for stmt in stmts {
      match stmt {
        Stmt::Vanilla { insn } => self.push(h, insn),
        other => panic!("RepeatUntil: not a straight-line body: {:?}", other),
      }
    }
    self.test(h, test);
    self.def(l, ph, h, h, Some(Cond::not(COND_REG)));

    let px = self.tree.new_pred();
    let x = self.new_member(s, px);
    self.def(s, px, h, x, Some(Cond::new(COND_REG)));
    self.push(h, i_br_if(Cond::not(COND_REG), h));
    self.push(h, i_br(x));
    self.block = x;
    self.pred = px;
  }

  // The main external function.  Convert the given statements into a
  // Program returning `ret`.
  pub fn finish(mut self, stmts: Vec<Stmt>, ret: GReg) -> Program {
    self.blockify(stmts);
    let last = self.block;
    for insn in epilogue(FRAME_WORDS, ret) {
      self.push(last, insn);
    }
    self.func.derive_edges();
    // Conservatively, the condition register is live everywhere.
    for b in self.func.layout.clone() {
      self.func.blocks[b].live_ins = vec![COND_REG];
    }
    Program { func: self.func, tree: self.tree }
  }
}
