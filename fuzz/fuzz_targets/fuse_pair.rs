#![no_main]

use libfuzzer_sys::fuzz_target;
use loopfuse::mir::interp::{ParamVal, run};
use loopfuse::mir::opt::FusionEngine;
use loopfuse::mir::verify::verify_ir;
use loopfuse::mir::*;

// Two counted loops over arrays a and b:
//   loop 1: a[i] = i            for i in 0..bound1
//   loop 2: b[i] = src[i + off] for i in 0..bound2
// Fuzzed knobs: the bounds, the read offset, and whether the second loop
// reads the array the first one wrote.
fn build_pair(bound1: i64, bound2: i64, off: i64, read_a: bool) -> FnIR {
    let mut f = FnIR::new("fuzzed", vec![ParamDecl::array("a"), ParamDecl::array("b")]);
    for _ in 0..10 {
        f.add_block();
    }
    // 0 entry, 1 ph1, 2 h1, 3 body1, 4 latch1, 5 ph2, 6 h2, 7 body2,
    // 8 latch2, 9 exit

    let c0 = f.add_const(0);
    let c1 = f.add_const(1);
    let b1 = f.add_const(bound1);
    let b2 = f.add_const(bound2);
    let a = f.add_param(0);
    let b = f.add_param(1);

    let iv1 = f.add_phi(2, vec![(c0, 1)]);
    let n1 = f.add_binary(BinOp::Add, iv1, c1);
    f.set_phi_args(iv1, vec![(c0, 1), (n1, 4)]);
    let cond1 = f.add_binary(BinOp::Lt, iv1, b1);

    let iv2 = f.add_phi(6, vec![(c0, 5)]);
    let n2 = f.add_binary(BinOp::Add, iv2, c1);
    f.set_phi_args(iv2, vec![(c0, 5), (n2, 8)]);
    let cond2 = f.add_binary(BinOp::Lt, iv2, b2);

    let src = if read_a { a } else { b };
    let idx = if off == 0 {
        iv2
    } else {
        let c_off = f.add_const(off);
        f.add_binary(BinOp::Add, iv2, c_off)
    };
    let val = f.add_load(src, idx);

    f.set_term(0, Terminator::Goto(1));
    f.set_term(1, Terminator::Goto(2));
    f.set_term(
        2,
        Terminator::If {
            cond: cond1,
            then_bb: 3,
            else_bb: 5,
        },
    );
    f.push_store(3, a, iv1, iv1);
    f.set_term(3, Terminator::Goto(4));
    f.set_term(4, Terminator::Goto(2));
    f.set_term(5, Terminator::Goto(6));
    f.set_term(
        6,
        Terminator::If {
            cond: cond2,
            then_bb: 7,
            else_bb: 9,
        },
    );
    f.push_store(7, b, iv2, val);
    f.set_term(7, Terminator::Goto(8));
    f.set_term(8, Terminator::Goto(6));
    f.set_term(9, Terminator::Return(None));
    f
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let bound1 = (data[0] % 16) as i64;
    let bound2 = (data[1] % 16) as i64;
    let off = (data[2] % 5) as i64 - 2;
    let read_a = data[3] & 1 == 0;

    let mut f = build_pair(bound1, bound2, off, read_a);
    let original = f.clone();

    let Ok(_) = FusionEngine::run(&mut f) else {
        panic!("builder produced IR the verifier rejects");
    };
    verify_ir(&f).expect("transformed IR must verify");

    // Differential oracle: whenever both versions run to completion, final
    // memory and the return value must agree. A fault (such as a negative
    // read offset indexing past the front) must occur in both or neither.
    let args = [ParamVal::Array(vec![7; 32]), ParamVal::Array(vec![7; 32])];
    let before = run(&original, &args, 100_000);
    let after = run(&f, &args, 100_000);
    match (before, after) {
        (Ok(b), Ok(a)) => {
            assert_eq!(b.arrays, a.arrays);
            assert_eq!(b.ret, a.ret);
        }
        (Err(_), Err(_)) => {}
        (b, a) => panic!("execution outcomes diverged: {:?} vs {:?}", b, a),
    }
});
