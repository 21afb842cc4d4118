use std::collections::BTreeSet;

use cranelift_entity::SecondaryMap;

use crate::{dfg::BlockId, Function};

#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    entry: Option<BlockId>,
    blocks: SecondaryMap<BlockId, BlockNode>,
    pub exits: smallvec::SmallVec<[BlockId; 4]>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, func: &Function) {
        self.clear();

        self.entry = func.layout.entry_block();

        for block in func.layout.iter_block() {
            let Some(last_inst) = func.layout.last_inst_of(block) else {
                continue;
            };
            let inst = func.dfg.inst(last_inst);
            if inst.is_return() {
                self.exits.push(block);
            }
            for dest in inst.branch_dests() {
                self.add_edge(block, dest);
            }
        }
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn preds_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].preds.iter()
    }

    pub fn succs_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].succs.iter()
    }

    pub fn pred_num_of(&self, block: BlockId) -> usize {
        self.blocks[block].preds.len()
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[to].preds.insert(from);
        self.blocks[from].succs.insert(to);
    }

    /// Entry-reachable blocks in post order.
    ///
    /// Iterative DFS with explicit enter/leave markers: a block is
    /// emitted when its leave marker surfaces, i.e. after every reachable
    /// successor has been emitted.
    pub fn post_order(&self) -> Vec<BlockId> {
        enum Visit {
            Enter(BlockId),
            Leave(BlockId),
        }

        let mut order = Vec::new();
        let mut seen: SecondaryMap<BlockId, bool> = SecondaryMap::new();
        let mut stack = match self.entry {
            Some(entry) => vec![Visit::Enter(entry)],
            None => return order,
        };

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(block) => {
                    if std::mem::replace(&mut seen[block], true) {
                        continue;
                    }
                    stack.push(Visit::Leave(block));
                    for &succ in self.succs_of(block) {
                        if !seen[succ] {
                            stack.push(Visit::Enter(succ));
                        }
                    }
                }
                Visit::Leave(block) => order.push(block),
            }
        }

        order
    }

    pub fn clear(&mut self) {
        self.entry = None;
        self.blocks.clear();
        self.exits.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BlockNode {
    preds: BTreeSet<BlockId>,
    succs: BTreeSet<BlockId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionBuilder, Linkage, Param, Signature, Type};

    #[test]
    fn post_order_visits_successors_first() {
        let sig = Signature::new("f", Linkage::Public, [Param::new(Type::I1, "c")], None);
        let mut fb = FunctionBuilder::new(sig);
        let c = fb.args()[0];

        let b0 = fb.append_block();
        let b1 = fb.append_block();
        let b2 = fb.append_block();
        let b3 = fb.append_block();
        let b4 = fb.append_block(); // never branched to

        fb.switch_to_block(b0);
        fb.br(c, b1, b2);
        fb.switch_to_block(b1);
        fb.jump(b3);
        fb.switch_to_block(b2);
        fb.br(c, b2, b3); // self loop
        fb.switch_to_block(b3);
        fb.ret(None);
        fb.switch_to_block(b4);
        fb.ret(None);

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&fb.finish());
        let order = cfg.post_order();

        // Reachable blocks only, entry last, every block after all of its
        // non-back-edge successors.
        assert_eq!(order.len(), 4);
        assert!(!order.contains(&b4));
        assert_eq!(*order.last().unwrap(), b0);
        let pos = |b: BlockId| order.iter().position(|&x| x == b).unwrap();
        assert!(pos(b3) < pos(b1));
        assert!(pos(b3) < pos(b2));
    }
}
