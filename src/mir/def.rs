use rustc_hash::FxHashSet;

pub type BlockId = usize;
pub type ValueId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub is_array: bool,
}

impl ParamDecl {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_array: false,
        }
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_array: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FnIR {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub blocks: Vec<Block>, // indices are BlockIds
    pub values: Vec<Value>, // indices are ValueIds. SSA values.
    pub entry: BlockId,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    pub term: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    Goto(BlockId),
    If {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Return(Option<ValueId>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto(t) => vec![*t],
            Terminator::If {
                then_bb, else_bb, ..
            } => vec![*then_bb, *else_bb],
            _ => vec![],
        }
    }
}

/// Side-effecting instruction kinds. Pure computation lives in the value
/// arena; only memory writes appear in block instruction lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instr {
    // Memory store: base[idx] <- val
    Store {
        base: ValueId,
        idx: ValueId,
        val: ValueId,
    },
}

#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    pub kind: ValueKind,
    pub phi_block: Option<BlockId>, // Owning block for Phi values
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Const(i64),

    // Function parameter (scalar or array, per ParamDecl)
    Param {
        index: usize,
    },

    // SSA Phi node. Merges values from predecessor blocks.
    Phi {
        args: Vec<(ValueId, BlockId)>,
    },

    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },

    // Memory read: base[idx]
    Load {
        base: ValueId,
        idx: ValueId,
    },
}

impl FnIR {
    pub fn new(name: impl Into<String>, params: Vec<ParamDecl>) -> Self {
        Self {
            name: name.into(),
            params,
            blocks: Vec::new(),
            values: Vec::new(),
            entry: 0,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block {
            id,
            instrs: Vec::new(),
            // Set to a real terminator when the block is finalized.
            term: Terminator::Unreachable,
        });
        id
    }

    pub fn add_value(&mut self, kind: ValueKind) -> ValueId {
        let id = self.values.len();
        self.values.push(Value {
            id,
            kind,
            phi_block: None,
        });
        id
    }

    pub fn add_const(&mut self, n: i64) -> ValueId {
        self.add_value(ValueKind::Const(n))
    }

    pub fn add_param(&mut self, index: usize) -> ValueId {
        self.add_value(ValueKind::Param { index })
    }

    pub fn add_binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.add_value(ValueKind::Binary { op, lhs, rhs })
    }

    pub fn add_load(&mut self, base: ValueId, idx: ValueId) -> ValueId {
        self.add_value(ValueKind::Load { base, idx })
    }

    /// Creates a phi node homed in `block`. Incoming edges are
    /// (value, predecessor) pairs.
    pub fn add_phi(&mut self, block: BlockId, args: Vec<(ValueId, BlockId)>) -> ValueId {
        let id = self.add_value(ValueKind::Phi { args });
        self.values[id].phi_block = Some(block);
        id
    }

    /// Rewires an existing phi's incoming edges in place.
    pub fn set_phi_args(&mut self, phi: ValueId, new_args: Vec<(ValueId, BlockId)>) {
        if let ValueKind::Phi { args } = &mut self.values[phi].kind {
            *args = new_args;
        }
    }

    pub fn set_term(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block].term = term;
    }

    pub fn push_store(&mut self, block: BlockId, base: ValueId, idx: ValueId, val: ValueId) {
        self.blocks[block].instrs.push(Instr::Store { base, idx, val });
    }

    pub fn successors(&self, bid: BlockId) -> Vec<BlockId> {
        self.blocks[bid].term.successors()
    }

    /// Predecessor lists indexed by BlockId.
    pub fn pred_map(&self) -> Vec<Vec<BlockId>> {
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); self.blocks.len()];
        for blk in &self.blocks {
            for t in blk.term.successors() {
                preds[t].push(blk.id);
            }
        }
        preds
    }

    pub fn reachable_blocks(&self) -> FxHashSet<BlockId> {
        let mut reachable = FxHashSet::default();
        let mut queue = vec![self.entry];
        reachable.insert(self.entry);

        let mut head = 0;
        while head < queue.len() {
            let bid = queue[head];
            head += 1;
            for succ in self.successors(bid) {
                if reachable.insert(succ) {
                    queue.push(succ);
                }
            }
        }
        reachable
    }

    /// Replaces every operand use of `old` with `new`. The definition of
    /// `old` itself is left in place; it becomes dead once nothing refers
    /// to it.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        fn swap(slot: &mut ValueId, old: ValueId, new: ValueId) {
            if *slot == old {
                *slot = new;
            }
        }

        for vid in 0..self.values.len() {
            if vid == old {
                continue;
            }
            match &mut self.values[vid].kind {
                ValueKind::Binary { lhs, rhs, .. } => {
                    swap(lhs, old, new);
                    swap(rhs, old, new);
                }
                ValueKind::Load { base, idx } => {
                    swap(base, old, new);
                    swap(idx, old, new);
                }
                ValueKind::Phi { args } => {
                    for (v, _) in args.iter_mut() {
                        swap(v, old, new);
                    }
                }
                ValueKind::Const(_) | ValueKind::Param { .. } => {}
            }
        }

        for blk in &mut self.blocks {
            for instr in &mut blk.instrs {
                match instr {
                    Instr::Store { base, idx, val } => {
                        swap(base, old, new);
                        swap(idx, old, new);
                        swap(val, old, new);
                    }
                }
            }
            match &mut blk.term {
                Terminator::If { cond, .. } => swap(cond, old, new),
                Terminator::Return(Some(v)) => swap(v, old, new),
                _ => {}
            }
        }
    }
}
