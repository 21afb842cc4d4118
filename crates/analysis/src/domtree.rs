//! Dominator tree, computed with the iterative algorithm of Cooper,
//! Harvey and Kennedy ("A Simple, Fast Dominance Algorithm").

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use ostinato_ir::{dfg::BlockId, ControlFlowGraph};

#[derive(Debug, Default)]
pub struct DomTree {
    idoms: SecondaryMap<BlockId, PackedOption<BlockId>>,
    rpo: Vec<BlockId>,
}

impl DomTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, cfg: &ControlFlowGraph) {
        self.clear();

        self.rpo = cfg.post_order();
        self.rpo.reverse();

        let mut rpo_nums = SecondaryMap::with_capacity(self.rpo.len());
        for (i, &block) in self.rpo.iter().enumerate() {
            rpo_nums[block] = (self.rpo.len() - i) as u32;
        }

        let Some(&entry) = self.rpo.first() else {
            return;
        };
        self.idoms[entry] = entry.into();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let Some(&first) = cfg
                    .preds_of(block)
                    .find(|&&pred| self.idoms[pred].is_some())
                else {
                    continue;
                };

                let mut new_idom = first;
                for &pred in cfg.preds_of(block) {
                    if pred != first && self.idoms[pred].is_some() {
                        new_idom = self.intersect(new_idom, pred, &rpo_nums);
                    }
                }
                if self.idoms[block].expand() != Some(new_idom) {
                    self.idoms[block] = new_idom.into();
                    changed = true;
                }
            }
        }
    }

    /// Immediate dominator; `None` for the entry block and unreachable
    /// blocks.
    pub fn idom_of(&self, block: BlockId) -> Option<BlockId> {
        if self.rpo.first() == Some(&block) {
            return None;
        }
        self.idoms[block].expand()
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        a == b || self.strictly_dominates(a, b)
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut runner = b;
        while let Some(idom) = self.idom_of(runner) {
            if idom == a {
                return true;
            }
            runner = idom;
        }
        false
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo.first() == Some(&block) || self.idoms[block].is_some()
    }

    /// Blocks in reverse post order.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn clear(&mut self) {
        self.idoms.clear();
        self.rpo.clear();
    }

    fn intersect(
        &self,
        mut a: BlockId,
        mut b: BlockId,
        rpo_nums: &SecondaryMap<BlockId, u32>,
    ) -> BlockId {
        while a != b {
            while rpo_nums[a] < rpo_nums[b] {
                a = self.idoms[a].unwrap();
            }
            while rpo_nums[b] < rpo_nums[a] {
                b = self.idoms[b].unwrap();
            }
        }
        a
    }
}
