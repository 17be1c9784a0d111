#![no_main]
use libfuzzer_sys::fuzz_target;

use minisp::{fuzzing, test_framework as ir, validator};
use spreduce;

fuzz_target!(|input: (ir::Program, u8)| {
    let (program, extra) = input;
    let ir::Program { mut func, tree } = program;

    let min = fuzzing::min_num_pregs();
    let regs = spreduce::TargetRegs {
        num_pregs: min + extra % (ir::NUM_PREGS as u8 - min + 1),
        ..Default::default()
    };

    let cloned_func = func.clone();
    let expected = ir::run_func(&cloned_func, "Before reduction", &regs);
    if expected.is_err() {
        return;
    }

    let mut rendered = String::new();
    ir::render(&func, "before reduction", &mut rendered);
    println!("{}", rendered);

    let opts = spreduce::ReduceOptions {
        run_checker: true,
        eliminate_redundant_loads: extra & 0x80 == 0,
        dead_store_elim: extra & 0x40 != 0,
    };

    let result = match spreduce::reduce_single_path(&mut func, &tree, &regs, &opts) {
        Ok(result) => result,
        Err(err) => {
            if let spreduce::ReduceError::Checker(_) = &err {
                panic!("reduce_differential.rs: checker error: {:?}", err);
            }
            println!("reduction error: {}", err);
            return;
        }
    };
    println!("stats: {:?}", result.stats);

    ir::print_func(&func, "after reduction");

    let observed = ir::run_func(&func, "After reduction", &regs);

    validator::check_results(&expected, &observed);
});
