#![no_main]
use libfuzzer_sys::fuzz_target;

use minisp::{test_framework as ir, validator::validate};

fuzz_target!(|program: ir::Program| {
    // Eight predicate registers are enough for everyone.
    let regs = spreduce::TargetRegs::default();

    if let Err(err) = validate(&program, &regs) {
        panic!("generated an invalid program: {}", err);
    }
    if let Err(err) = program.tree.validate(&program.func) {
        panic!("generated an invalid scope tree: {}", err);
    }
});
