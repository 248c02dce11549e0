//! A small reference interpreter. It exists for testing: run a function
//! before and after a transform and compare final array contents and the
//! return value.

use crate::mir::*;
use rustc_hash::FxHashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamVal {
    Int(i64),
    Array(Vec<i64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEvent {
    pub param: usize,
    pub index: usize,
    pub value: i64,
}

/// Everything observable about one execution. `writes` keeps the raw event
/// stream for debugging; behavior comparisons should use `arrays` and `ret`,
/// since a legal fusion reorders writes without changing final state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTrace {
    pub writes: Vec<WriteEvent>,
    pub arrays: FxHashMap<usize, Vec<i64>>,
    pub ret: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    OutOfFuel,
    ParamCountMismatch { expected: usize, got: usize },
    NotAnArray { value: ValueId },
    NotAScalar { value: ValueId },
    OutOfBounds { param: usize, index: i64 },
    MissingPhiIncoming { phi: ValueId, pred: BlockId },
    ReachedUnreachable { block: BlockId },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::OutOfFuel => write!(f, "execution ran out of fuel"),
            ExecError::ParamCountMismatch { expected, got } => {
                write!(f, "expected {expected} parameters, got {got}")
            }
            ExecError::NotAnArray { value } => {
                write!(f, "value v{value} used as an array base")
            }
            ExecError::NotAScalar { value } => {
                write!(f, "value v{value} used in a scalar position")
            }
            ExecError::OutOfBounds { param, index } => {
                write!(f, "index {index} out of bounds for array parameter {param}")
            }
            ExecError::MissingPhiIncoming { phi, pred } => {
                write!(f, "phi v{phi} has no incoming value for predecessor bb{pred}")
            }
            ExecError::ReachedUnreachable { block } => {
                write!(f, "control reached unreachable block bb{block}")
            }
        }
    }
}

impl std::error::Error for ExecError {}

struct Machine<'a> {
    fn_ir: &'a FnIR,
    scalars: Vec<Option<i64>>, // scalar params by index
    arrays: FxHashMap<usize, Vec<i64>>,
    phi_env: FxHashMap<ValueId, i64>,
    writes: Vec<WriteEvent>,
}

/// Executes `fn_ir` with the given parameter values. `fuel` bounds the
/// number of blocks executed so a malformed loop cannot hang a test.
pub fn run(fn_ir: &FnIR, params: &[ParamVal], fuel: usize) -> Result<ExecTrace, ExecError> {
    if params.len() != fn_ir.params.len() {
        return Err(ExecError::ParamCountMismatch {
            expected: fn_ir.params.len(),
            got: params.len(),
        });
    }

    let mut scalars = vec![None; params.len()];
    let mut arrays = FxHashMap::default();
    for (i, p) in params.iter().enumerate() {
        match p {
            ParamVal::Int(n) => scalars[i] = Some(*n),
            ParamVal::Array(elems) => {
                arrays.insert(i, elems.clone());
            }
        }
    }

    let mut m = Machine {
        fn_ir,
        scalars,
        arrays,
        phi_env: FxHashMap::default(),
        writes: Vec::new(),
    };

    let mut fuel = fuel;
    let mut current = fn_ir.entry;
    loop {
        if fuel == 0 {
            return Err(ExecError::OutOfFuel);
        }
        fuel -= 1;

        let blk = &fn_ir.blocks[current];
        for instr in &blk.instrs {
            match instr {
                Instr::Store { base, idx, val } => m.store(*base, *idx, *val)?,
            }
        }

        let next = match &blk.term {
            Terminator::Goto(t) => *t,
            Terminator::If {
                cond,
                then_bb,
                else_bb,
            } => {
                if m.eval(*cond)? != 0 {
                    *then_bb
                } else {
                    *else_bb
                }
            }
            Terminator::Return(v) => {
                let ret = match v {
                    Some(v) => Some(m.eval(*v)?),
                    None => None,
                };
                return Ok(ExecTrace {
                    writes: m.writes,
                    arrays: m.arrays,
                    ret,
                });
            }
            Terminator::Unreachable => {
                return Err(ExecError::ReachedUnreachable { block: current });
            }
        };

        m.transfer(current, next)?;
        current = next;
    }
}

impl Machine<'_> {
    /// Parallel copy into the phis of `to` along the edge from `from`. All
    /// incoming values are read against the pre-transfer environment before
    /// any phi is updated.
    fn transfer(&mut self, from: BlockId, to: BlockId) -> Result<(), ExecError> {
        let mut updates: Vec<(ValueId, i64)> = Vec::new();
        for val in &self.fn_ir.values {
            if val.phi_block != Some(to) {
                continue;
            }
            let ValueKind::Phi { args } = &val.kind else {
                continue;
            };
            let Some((incoming, _)) = args.iter().find(|(_, b)| *b == from) else {
                return Err(ExecError::MissingPhiIncoming {
                    phi: val.id,
                    pred: from,
                });
            };
            updates.push((val.id, self.eval(*incoming)?));
        }
        for (phi, n) in updates {
            self.phi_env.insert(phi, n);
        }
        Ok(())
    }

    fn eval(&self, vid: ValueId) -> Result<i64, ExecError> {
        match &self.fn_ir.values[vid].kind {
            ValueKind::Const(n) => Ok(*n),
            ValueKind::Param { index } => {
                self.scalars[*index].ok_or(ExecError::NotAScalar { value: vid })
            }
            ValueKind::Phi { .. } => self
                .phi_env
                .get(&vid)
                .copied()
                .ok_or(ExecError::NotAScalar { value: vid }),
            ValueKind::Binary { op, lhs, rhs } => {
                let l = self.eval(*lhs)?;
                let r = self.eval(*rhs)?;
                Ok(match op {
                    BinOp::Add => l.wrapping_add(r),
                    BinOp::Sub => l.wrapping_sub(r),
                    BinOp::Mul => l.wrapping_mul(r),
                    BinOp::Lt => (l < r) as i64,
                    BinOp::Le => (l <= r) as i64,
                    BinOp::Gt => (l > r) as i64,
                    BinOp::Ge => (l >= r) as i64,
                    BinOp::Eq => (l == r) as i64,
                    BinOp::Ne => (l != r) as i64,
                })
            }
            ValueKind::Load { base, idx } => {
                let (param, slot) = self.locate(*base, *idx)?;
                Ok(self.arrays[&param][slot])
            }
        }
    }

    fn store(&mut self, base: ValueId, idx: ValueId, val: ValueId) -> Result<(), ExecError> {
        let (param, slot) = self.locate(base, idx)?;
        let value = self.eval(val)?;
        if let Some(arr) = self.arrays.get_mut(&param) {
            arr[slot] = value;
        }
        self.writes.push(WriteEvent {
            param,
            index: slot,
            value,
        });
        Ok(())
    }

    fn locate(&self, base: ValueId, idx: ValueId) -> Result<(usize, usize), ExecError> {
        let ValueKind::Param { index: param } = &self.fn_ir.values[base].kind else {
            return Err(ExecError::NotAnArray { value: base });
        };
        let Some(arr) = self.arrays.get(param) else {
            return Err(ExecError::NotAnArray { value: base });
        };
        let i = self.eval(idx)?;
        if i < 0 || i as usize >= arr.len() {
            return Err(ExecError::OutOfBounds {
                param: *param,
                index: i,
            });
        }
        Ok((*param, i as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // for (i = 0; i < 10; i++) a[i] = i * 2; return a-load of a[3] after.
    fn doubling_loop() -> FnIR {
        let mut f = FnIR::new("dbl", vec![ParamDecl::array("a")]);
        let entry = f.add_block();
        let ph = f.add_block();
        let header = f.add_block();
        let body = f.add_block();
        let latch = f.add_block();
        let exit = f.add_block();

        let c0 = f.add_const(0);
        let c1 = f.add_const(1);
        let c2 = f.add_const(2);
        let c3 = f.add_const(3);
        let c10 = f.add_const(10);
        let a = f.add_param(0);
        let iv = f.add_phi(header, vec![(c0, ph)]);
        let next = f.add_binary(BinOp::Add, iv, c1);
        f.set_phi_args(iv, vec![(c0, ph), (next, latch)]);
        let cond = f.add_binary(BinOp::Lt, iv, c10);
        let twice = f.add_binary(BinOp::Mul, iv, c2);
        let after = f.add_load(a, c3);

        f.set_term(entry, Terminator::Goto(ph));
        f.set_term(ph, Terminator::Goto(header));
        f.set_term(
            header,
            Terminator::If {
                cond,
                then_bb: body,
                else_bb: exit,
            },
        );
        f.push_store(body, a, iv, twice);
        f.set_term(body, Terminator::Goto(latch));
        f.set_term(latch, Terminator::Goto(header));
        f.set_term(exit, Terminator::Return(Some(after)));
        f
    }

    #[test]
    fn runs_a_counting_loop_to_completion() {
        let f = doubling_loop();
        let trace = run(&f, &[ParamVal::Array(vec![0; 10])], 1000).unwrap();
        assert_eq!(trace.ret, Some(6));
        assert_eq!(trace.writes.len(), 10);
        let expect: Vec<i64> = (0..10).map(|i| i * 2).collect();
        assert_eq!(trace.arrays[&0], expect);
    }

    #[test]
    fn fuel_bounds_execution() {
        let f = doubling_loop();
        assert_eq!(
            run(&f, &[ParamVal::Array(vec![0; 10])], 5),
            Err(ExecError::OutOfFuel)
        );
    }

    #[test]
    fn out_of_bounds_store_is_an_error() {
        let f = doubling_loop();
        let err = run(&f, &[ParamVal::Array(vec![0; 4])], 1000).unwrap_err();
        assert_eq!(
            err,
            ExecError::OutOfBounds {
                param: 0,
                index: 4
            }
        );
    }

    #[test]
    fn scalar_params_feed_conditions() {
        // return n > 7 ? 1 : 0, via If on a Binary over a scalar param.
        let mut f = FnIR::new("cmp", vec![ParamDecl::scalar("n")]);
        let entry = f.add_block();
        let yes = f.add_block();
        let no = f.add_block();
        let n = f.add_param(0);
        let c7 = f.add_const(7);
        let c1 = f.add_const(1);
        let c0 = f.add_const(0);
        let cond = f.add_binary(BinOp::Gt, n, c7);
        f.set_term(
            entry,
            Terminator::If {
                cond,
                then_bb: yes,
                else_bb: no,
            },
        );
        f.set_term(yes, Terminator::Return(Some(c1)));
        f.set_term(no, Terminator::Return(Some(c0)));

        let hi = run(&f, &[ParamVal::Int(9)], 10).unwrap();
        assert_eq!(hi.ret, Some(1));
        let lo = run(&f, &[ParamVal::Int(3)], 10).unwrap();
        assert_eq!(lo.ret, Some(0));
    }
}
