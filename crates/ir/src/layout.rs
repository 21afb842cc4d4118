//! Function layout: block order and instruction order within blocks.

use cranelift_entity::SecondaryMap;

use crate::{dfg::BlockId, InstId};

#[derive(Debug, Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<BlockId, BlockNode>,
    insts: SecondaryMap<InstId, InstNode>,
    entry_block: Option<BlockId>,
    last_block: Option<BlockId>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry_block
    }

    pub fn is_block_inserted(&self, block: BlockId) -> bool {
        Some(block) == self.entry_block || self.blocks[block] != BlockNode::default()
    }

    pub fn append_block(&mut self, block: BlockId) {
        debug_assert!(!self.is_block_inserted(block));

        let mut node = BlockNode::default();
        if let Some(last) = self.last_block {
            self.blocks[last].next = Some(block);
            node.prev = Some(last);
        } else {
            self.entry_block = Some(block);
        }
        self.blocks[block] = node;
        self.last_block = Some(block);
    }

    /// Insert `block` immediately before `before` in the block order.
    pub fn insert_block_before(&mut self, block: BlockId, before: BlockId) {
        debug_assert!(!self.is_block_inserted(block));
        debug_assert!(self.is_block_inserted(before));

        let prev = self.blocks[before].prev;
        self.blocks[block] = BlockNode {
            prev,
            next: Some(before),
            ..BlockNode::default()
        };
        self.blocks[before].prev = Some(block);
        match prev {
            Some(prev) => self.blocks[prev].next = Some(block),
            None => self.entry_block = Some(block),
        }
    }

    pub fn next_block_of(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block].next
    }

    pub fn iter_block(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.entry_block, |&block| self.blocks[block].next)
    }

    pub fn first_inst_of(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block].first_inst
    }

    pub fn last_inst_of(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block].last_inst
    }

    pub fn inst_block(&self, inst: InstId) -> BlockId {
        self.insts[inst].block.expect("instruction is not inserted")
    }

    pub fn is_inst_inserted(&self, inst: InstId) -> bool {
        self.insts[inst].block.is_some()
    }

    pub fn iter_inst(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        std::iter::successors(self.blocks[block].first_inst, |&inst| self.insts[inst].next)
    }

    pub fn append_inst(&mut self, inst: InstId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_inst_inserted(inst));

        let mut node = InstNode {
            block: Some(block),
            ..InstNode::default()
        };
        if let Some(last) = self.blocks[block].last_inst {
            self.insts[last].next = Some(inst);
            node.prev = Some(last);
        } else {
            self.blocks[block].first_inst = Some(inst);
        }
        self.insts[inst] = node;
        self.blocks[block].last_inst = Some(inst);
    }

    /// Insert `inst` immediately before `before` inside `before`'s block.
    pub fn insert_inst_before(&mut self, inst: InstId, before: InstId) {
        debug_assert!(!self.is_inst_inserted(inst));

        let block = self.inst_block(before);
        let prev = self.insts[before].prev;
        self.insts[inst] = InstNode {
            block: Some(block),
            prev,
            next: Some(before),
        };
        self.insts[before].prev = Some(inst);
        match prev {
            Some(prev) => self.insts[prev].next = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
    }

    /// Unlink `block` (and its instructions) from the layout. The
    /// underlying dfg entities stay allocated.
    pub fn remove_block(&mut self, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));

        let BlockNode { prev, next, .. } = self.blocks[block];
        match prev {
            Some(prev) => self.blocks[prev].next = next,
            None => self.entry_block = next,
        }
        match next {
            Some(next) => self.blocks[next].prev = prev,
            None => self.last_block = prev,
        }
        let insts: Vec<InstId> = self.iter_inst(block).collect();
        for inst in insts {
            self.insts[inst] = InstNode::default();
        }
        self.blocks[block] = BlockNode::default();
    }

    pub fn remove_inst(&mut self, inst: InstId) {
        let block = self.inst_block(inst);
        let InstNode { prev, next, .. } = self.insts[inst];

        match prev {
            Some(prev) => self.insts[prev].next = next,
            None => self.blocks[block].first_inst = next,
        }
        match next {
            Some(next) => self.insts[next].prev = prev,
            None => self.blocks[block].last_inst = prev,
        }
        self.insts[inst] = InstNode::default();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BlockNode {
    prev: Option<BlockId>,
    next: Option<BlockId>,
    first_inst: Option<InstId>,
    last_inst: Option<InstId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct InstNode {
    block: Option<BlockId>,
    prev: Option<InstId>,
    next: Option<InstId>,
}
