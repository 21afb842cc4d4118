//! Single-entry, single-exit region descriptors.
//!
//! Regions come from the host's region analysis; only the shape the
//! qualifier and extractor need is kept: the entry block, the exit block
//! (the first block *after* the region), and the set of blocks inside.

use std::collections::BTreeSet;

use ostinato_ir::{dfg::BlockId, Function, InstId, ValueId};

use crate::{Loop, LoopTree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionData {
    pub entry: BlockId,
    pub exit: BlockId,
    blocks: BTreeSet<BlockId>,
}

impl RegionData {
    pub fn new(entry: BlockId, exit: BlockId, blocks: impl IntoIterator<Item = BlockId>) -> Self {
        let blocks: BTreeSet<BlockId> = blocks.into_iter().collect();
        debug_assert!(blocks.contains(&entry));
        debug_assert!(!blocks.contains(&exit));
        Self {
            entry,
            exit,
            blocks,
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().copied()
    }

    pub fn contains_block(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    pub fn contains_inst(&self, func: &Function, inst: InstId) -> bool {
        func.layout.is_inst_inserted(inst) && self.contains_block(func.layout.inst_block(inst))
    }

    /// `true` for values computed inside the region. Arguments,
    /// immediates and globals live outside every region.
    pub fn contains_value(&self, func: &Function, value: ValueId) -> bool {
        match func.dfg.value_inst(value) {
            Some(inst) => self.contains_inst(func, inst),
            None => false,
        }
    }

    pub fn contains_loop(&self, lpt: &LoopTree, lp: Loop) -> bool {
        self.contains_block(lpt.loop_header(lp))
    }

    /// `true` if `other`'s blocks are a strict subset of this region's.
    pub fn strictly_contains(&self, other: &RegionData) -> bool {
        self.blocks.len() > other.blocks.len() && other.blocks.is_subset(&self.blocks)
    }

    pub fn block_num(&self) -> usize {
        self.blocks.len()
    }
}
