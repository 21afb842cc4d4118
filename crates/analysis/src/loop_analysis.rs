//! Natural-loop discovery over the CFG.

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use ostinato_ir::{dfg::BlockId, ControlFlowGraph};
use smallvec::SmallVec;

use crate::DomTree;

/// An opaque reference to a natural loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loop(pub u32);
entity_impl!(Loop);

#[derive(Debug, Clone)]
struct LoopData {
    header: BlockId,
    parent: PackedOption<Loop>,
    children: SmallVec<[Loop; 4]>,
}

/// Loops are discovered in RPO, so an outer loop always has a smaller
/// index than the loops nested inside it.
#[derive(Debug, Default)]
pub struct LoopTree {
    loops: PrimaryMap<Loop, LoopData>,
    block_to_loop: SecondaryMap<BlockId, PackedOption<Loop>>,
}

impl LoopTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, cfg: &ControlFlowGraph, domtree: &DomTree) {
        self.clear();

        // A block is a loop header iff it dominates one of its
        // predecessors (that predecessor being a latch).
        for &block in domtree.rpo() {
            let has_latch = cfg
                .preds_of(block)
                .any(|&pred| domtree.dominates(block, pred));
            if has_latch {
                self.loops.push(LoopData {
                    header: block,
                    parent: None.into(),
                    children: SmallVec::new(),
                });
            }
        }

        self.assign_bodies(cfg, domtree);
    }

    pub fn loops(&self) -> impl DoubleEndedIterator<Item = Loop> {
        self.loops.keys()
    }

    pub fn loop_num(&self) -> usize {
        self.loops.len()
    }

    pub fn loop_header(&self, lp: Loop) -> BlockId {
        self.loops[lp].header
    }

    pub fn parent_loop(&self, lp: Loop) -> Option<Loop> {
        self.loops[lp].parent.expand()
    }

    /// The innermost loop containing `block`, if any.
    pub fn loop_of_block(&self, block: BlockId) -> Option<Loop> {
        self.block_to_loop[block].expand()
    }

    pub fn is_in_loop(&self, block: BlockId, lp: Loop) -> bool {
        let mut cursor = self.loop_of_block(block);
        while let Some(cur) = cursor {
            if cur == lp {
                return true;
            }
            cursor = self.parent_loop(cur);
        }
        false
    }

    /// `true` if `inner` is `outer` or nested anywhere inside it.
    pub fn loop_contains(&self, outer: Loop, inner: Loop) -> bool {
        let mut cursor = Some(inner);
        while let Some(cur) = cursor {
            if cur == outer {
                return true;
            }
            cursor = self.parent_loop(cur);
        }
        false
    }

    /// The outermost loop enclosing `lp`.
    pub fn outermost_parent(&self, mut lp: Loop) -> Loop {
        while let Some(parent) = self.parent_loop(lp) {
            lp = parent;
        }
        lp
    }

    pub fn clear(&mut self) {
        self.loops.clear();
        self.block_to_loop.clear();
    }

    /// Assign blocks to their innermost loop and connect the nesting
    /// relation.
    ///
    /// Each loop's body is everything reachable backwards from its
    /// latches before the walk closes at the header. Loops are processed
    /// in reverse discovery order, so by the time an outer loop walks its
    /// body, every block of a nested loop is already claimed; hitting a
    /// claimed block both reveals the nesting edge and lets the walk jump
    /// over the nested body in one step.
    fn assign_bodies(&mut self, cfg: &ControlFlowGraph, domtree: &DomTree) {
        for lp in self.loops.keys().rev() {
            let header = self.loops[lp].header;

            // Seed with the latches: the predecessors the header
            // dominates.
            let mut frontier: Vec<BlockId> = cfg
                .preds_of(header)
                .copied()
                .filter(|&latch| domtree.dominates(header, latch))
                .collect();

            while let Some(block) = frontier.pop() {
                let Some(owner) = self.block_to_loop[block].expand() else {
                    // Unclaimed: the block is ours; keep walking upwards
                    // unless the walk closed the cycle at the header.
                    self.block_to_loop[block] = lp.into();
                    if block != header {
                        frontier.extend(cfg.preds_of(block));
                    }
                    continue;
                };

                // Claimed by a previously processed loop, i.e. one nested
                // in this one. Adopt its loop-tree root and resume the
                // walk above the nested body, at its header's incoming
                // edges.
                let child = self.outermost_parent(owner);
                if child == lp {
                    continue;
                }
                self.loops[child].parent = lp.into();
                self.loops[lp].children.push(child);

                let nested_header = self.loops[owner].header;
                frontier.extend(cfg.preds_of(nested_header));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_ir::{FunctionBuilder, Linkage, Param, Signature, Type};

    fn compute(func: &ostinato_ir::Function) -> (ControlFlowGraph, DomTree, LoopTree) {
        let mut cfg = ControlFlowGraph::new();
        let mut domtree = DomTree::new();
        let mut lpt = LoopTree::new();
        cfg.compute(func);
        domtree.compute(&cfg);
        lpt.compute(&cfg, &domtree);
        (cfg, domtree, lpt)
    }

    #[test]
    fn single_loop() {
        let sig = Signature::new("f", Linkage::Public, [Param::new(Type::I64, "n")], None);
        let mut fb = FunctionBuilder::new(sig);
        let n = fb.args()[0];

        let b0 = fb.append_block();
        let b1 = fb.append_block();
        let b2 = fb.append_block();

        fb.switch_to_block(b0);
        let zero = fb.make_imm_value(0i64);
        fb.jump(b1);

        fb.switch_to_block(b1);
        let iv = fb.phi(Type::I64, &[(zero, b0)]);
        let one = fb.make_imm_value(1i64);
        let next = fb.add(iv, one);
        fb.append_phi_arg(iv, next, b1);
        let cont = fb.slt(next, n);
        fb.br(cont, b1, b2);

        fb.switch_to_block(b2);
        fb.ret(None);

        let func = fb.finish();
        let (_, _, lpt) = compute(&func);

        assert_eq!(lpt.loop_num(), 1);
        let lp = lpt.loops().next().unwrap();
        assert_eq!(lpt.loop_header(lp), b1);
        assert_eq!(lpt.loop_of_block(b0), None);
        assert_eq!(lpt.loop_of_block(b1), Some(lp));
        assert_eq!(lpt.loop_of_block(b2), None);
    }

    #[test]
    fn nested_loops() {
        let sig = Signature::new("g", Linkage::Public, [Param::new(Type::I1, "c")], None);
        let mut fb = FunctionBuilder::new(sig);
        let c = fb.args()[0];

        let b0 = fb.append_block();
        let b1 = fb.append_block(); // outer header
        let b2 = fb.append_block(); // inner header
        let b3 = fb.append_block(); // outer latch
        let b4 = fb.append_block(); // exit

        fb.switch_to_block(b0);
        fb.jump(b1);

        fb.switch_to_block(b1);
        fb.jump(b2);

        fb.switch_to_block(b2);
        fb.br(c, b2, b3);

        fb.switch_to_block(b3);
        fb.br(c, b1, b4);

        fb.switch_to_block(b4);
        fb.ret(None);

        let func = fb.finish();
        let (_, _, lpt) = compute(&func);

        assert_eq!(lpt.loop_num(), 2);
        let outer = lpt.loop_of_block(b1).unwrap();
        let inner = lpt.loop_of_block(b2).unwrap();
        assert_ne!(outer, inner);
        assert_eq!(lpt.parent_loop(inner), Some(outer));
        assert_eq!(lpt.parent_loop(outer), None);
        assert!(lpt.loop_contains(outer, inner));
        assert!(!lpt.loop_contains(inner, outer));
        assert_eq!(lpt.outermost_parent(inner), outer);
        assert!(lpt.is_in_loop(b3, outer));
        assert!(!lpt.is_in_loop(b3, inner));
    }
}
