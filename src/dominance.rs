//! On-demand dominator-tree and natural-loop discovery over a function's
//! CFG. `GlobalValueNumbering` needs dominance to know which of two
//! equivalent pure computations it may replace with the other;
//! `LoopInvariantCodeMotion` needs natural loops and their preheaders. The
//! teacher has no dominance code of its own (`cfg_builder.rs` only builds
//! block adjacency); this is grounded on `petgraph`, which the
//! `MystenLabs-sui` sibling in the pack depends on for its own graph
//! algorithms, via `petgraph::algo::dominators::simple_fast`.

use std::collections::{HashMap, HashSet};

use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::function::Function;
use crate::value::BlockId;

/// A function's dominator tree, computed fresh each time a pass needs it —
/// passes that mutate the CFG (`SimplifyCFG`, `BranchFolding`) invalidate
/// any tree computed before they ran, so nothing here is cached on
/// `Function` itself.
pub struct DominatorTree {
    entry: BlockId,
    node_of: HashMap<BlockId, NodeIndex>,
    block_of: HashMap<NodeIndex, BlockId>,
    doms: Dominators<NodeIndex>,
}

impl DominatorTree {
    pub fn compute(func: &Function) -> Option<Self> {
        let entry = func.entry?;
        let mut graph = DiGraph::<BlockId, ()>::new();
        let mut node_of = HashMap::new();
        let mut block_of = HashMap::new();
        for block in func.blocks() {
            let idx = graph.add_node(block.id);
            node_of.insert(block.id, idx);
            block_of.insert(idx, block.id);
        }
        for block in func.blocks() {
            for succ in func.successors(block.id) {
                if let (Some(&from), Some(&to)) = (node_of.get(&block.id), node_of.get(&succ)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        let entry_node = *node_of.get(&entry)?;
        let doms = dominators::simple_fast(&graph, entry_node);
        Some(Self { entry, node_of, block_of, doms })
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The immediate dominator of `block`, or `None` for the entry block
    /// (which dominates itself and has no idom) or a block unreachable from
    /// entry.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        let node = *self.node_of.get(&block)?;
        self.doms.immediate_dominator(node).and_then(|n| self.block_of.get(&n).copied())
    }

    /// Whether `a` dominates `b` (every path from entry to `b` passes
    /// through `a`); every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let (Some(&a_node), Some(&b_node)) = (self.node_of.get(&a), self.node_of.get(&b)) else {
            return false;
        };
        self.doms.dominators(b_node).map(|mut it| it.any(|n| n == a_node)).unwrap_or(false)
    }

    /// The dominator chain from `block` up to (and including) the entry
    /// block, nearest ancestor first.
    pub fn idom_chain(&self, block: BlockId) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut current = block;
        while let Some(idom) = self.immediate_dominator(current) {
            if idom == current {
                break;
            }
            chain.push(idom);
            current = idom;
        }
        chain
    }
}

/// A natural loop: a header that dominates every block in the loop body,
/// reached via at least one back edge (a CFG edge whose target dominates
/// its source).
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub latches: Vec<BlockId>,
}

impl Loop {
    /// Blocks outside the loop that have an edge into the header — the
    /// candidate insertion points `LoopInvariantCodeMotion` hoists into.
    /// With no dedicated preheader block, this may be more than one
    /// predecessor; the pass only hoists when there's exactly one.
    pub fn preheader_candidates(&self, func: &Function) -> Vec<BlockId> {
        func.predecessors(self.header).iter().copied().filter(|p| !self.blocks.contains(p)).collect()
    }
}

/// Blocks in reverse postorder from entry, the order `GlobalValueNumbering`
/// and `VariableReconstruction` walk in so "earliest" has an unambiguous
/// meaning even across unrelated branches of the CFG.
pub fn reverse_postorder(func: &Function) -> Vec<BlockId> {
    let Some(entry) = func.entry else { return Vec::new() };
    let mut visited = HashSet::from([entry]);
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, func.successors(entry).into_iter())];
    while let Some((block, mut succs)) = stack.pop() {
        if let Some(next) = succs.next() {
            stack.push((block, succs));
            if visited.insert(next) {
                stack.push((next, func.successors(next).into_iter()));
            }
        } else {
            postorder.push(block);
        }
    }
    postorder.reverse();
    postorder
}

/// Finds every natural loop in `func` by walking back edges (edges whose
/// target dominates their source) and growing each one's body backward
/// through the CFG from its latch. Loops sharing a header are merged into
/// one (the common shape for `while`/`for` bytecode with multiple
/// `continue`-like latches).
pub fn find_natural_loops(func: &Function, doms: &DominatorTree) -> Vec<Loop> {
    let mut by_header: HashMap<BlockId, Loop> = HashMap::new();

    for block in func.blocks() {
        for succ in func.successors(block.id) {
            if !doms.dominates(succ, block.id) {
                continue;
            }
            let entry = by_header.entry(succ).or_insert_with(|| Loop { header: succ, blocks: HashSet::from([succ]), latches: Vec::new() });
            entry.latches.push(block.id);
            entry.blocks.insert(block.id);

            let mut worklist = vec![block.id];
            while let Some(b) = worklist.pop() {
                for pred in func.predecessors(b) {
                    if entry.blocks.insert(*pred) {
                        worklist.push(*pred);
                    }
                }
            }
        }
    }

    let mut loops: Vec<Loop> = by_header.into_values().collect();
    loops.sort_by_key(|l| l.header.0);
    loops
}
