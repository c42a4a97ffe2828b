//! The order graph.
//!
//! Directed edges over witness nodes: parent → child means "parent may
//! legitimately be held while acquiring child".  The graph is kept acyclic —
//! an insertion whose child already reaches the parent is rejected — and
//! transitively reduced, so a direct edge implied by a longer path never
//! survives a declaration pass.
//!
//! Reachability is a bounded iterative depth-first search.  Both the work
//! stack and the step budget are fixed; blowing either yields an explicit
//! [`Reach::Limit`] answer, never a guess, and the checker degrades the
//! subsystem rather than mis-judge an order.

use crate::class::ClassFlags;
use crate::error::OrderError;
use crate::pool::Handle;
use crate::registry::{WitnessTable, WITNESS_MAX};

/// Child references per edge block.
pub(crate) const EDGE_FANOUT: usize = 6;

/// Edge-block pool capacity.
pub(crate) const EDGE_BLOCKS: usize = WITNESS_MAX * 4;

/// Work-stack depth for the bounded reachability search.
const SEARCH_STACK: usize = 128;

/// Node-visit budget for one reachability query.
const SEARCH_BUDGET: usize = 1024;

/// Work-stack depth and visit budget for level propagation.
const LEVEL_STACK: usize = 128;
const LEVEL_BUDGET: usize = 4096;

/// One block of a parent's child list.
#[derive(Default)]
pub(crate) struct EdgeBlock {
    pub next: Option<Handle>,
    pub count: usize,
    pub children: [Handle; EDGE_FANOUT],
}

impl EdgeBlock {
    fn seeded(child: Handle) -> Self {
        let mut block = Self::default();
        block.children[0] = child;
        block.count = 1;
        block
    }
}

/// Answer of the bounded reachability search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reach {
    /// No path from parent to child.
    No,
    /// Child is a (possibly indirect) descendant of parent.
    Yes,
    /// The search exceeded its fixed bounds before deciding.
    Limit,
}

impl WitnessTable {
    /// O(children) membership test for a direct parent → child edge.
    pub(crate) fn is_direct_child(&self, parent: Handle, child: Handle) -> bool {
        let mut cursor = self.node(parent).and_then(|w| w.children);
        while let Some(handle) = cursor {
            let block = self.edges.get(handle).expect("edge chain");
            if block.children[..block.count].contains(&child) {
                return true;
            }
            cursor = block.next;
        }
        false
    }

    /// Appends a raw parent → child edge, growing the chain by one pooled
    /// block when every existing block is full.  No pruning, no cycle
    /// check — this is the primitive both `declare_order` and the
    /// reduction pass build on.
    pub(crate) fn insert_edge(&mut self, parent: Handle, child: Handle) -> Result<(), OrderError> {
        let mut cursor = match self.node(parent) {
            Some(witness) => witness.children,
            None => return Ok(()),
        };
        let mut last = None;
        while let Some(handle) = cursor {
            let (count, next) = {
                let block = self.edges.get(handle).expect("edge chain");
                (block.count, block.next)
            };
            if count < EDGE_FANOUT {
                let block = self.edges.get_mut(handle).expect("edge chain");
                block.children[count] = child;
                block.count = count + 1;
                return Ok(());
            }
            last = Some(handle);
            cursor = next;
        }
        let fresh = self
            .edges
            .alloc(EdgeBlock::seeded(child))
            .ok_or(OrderError::Exhausted)?;
        match last {
            Some(handle) => self.edges.get_mut(handle).expect("edge chain").next = Some(fresh),
            None => self.node_mut(parent).expect("live parent").children = Some(fresh),
        }
        Ok(())
    }

    /// Removes a direct parent → child edge, compacting the owning block by
    /// swapping in its last element and returning emptied blocks to the
    /// pool.
    pub(crate) fn remove_edge(&mut self, parent: Handle, child: Handle) {
        let mut cursor = self.node(parent).and_then(|w| w.children);
        let mut prev: Option<Handle> = None;
        while let Some(handle) = cursor {
            let (count, next) = {
                let block = self.edges.get(handle).expect("edge chain");
                (block.count, block.next)
            };
            let found = {
                let block = self.edges.get(handle).expect("edge chain");
                block.children[..count].iter().position(|&c| c == child)
            };
            if let Some(i) = found {
                let block = self.edges.get_mut(handle).expect("edge chain");
                block.count = count - 1;
                if block.count > i {
                    block.children[i] = block.children[block.count];
                }
                if block.count == 0 {
                    match prev {
                        Some(p) => self.edges.get_mut(p).expect("edge chain").next = next,
                        None => self.node_mut(parent).expect("live parent").children = next,
                    }
                    self.edges.free(handle);
                }
                return;
            }
            prev = Some(handle);
            cursor = next;
        }
    }

    /// Bounded depth-first reachability: is `child` a strict descendant of
    /// `parent`?
    pub(crate) fn reach(&self, parent: Handle, child: Handle) -> Reach {
        // A dead identity is nobody's descendant, even though stale edges
        // naming it may still sit in the lists until the next sweep.
        if parent == child || !self.nodes.contains(child) {
            return Reach::No;
        }
        let mut stack = [Handle::default(); SEARCH_STACK];
        stack[0] = parent;
        let mut top = 1usize;
        let mut steps = 0usize;
        while top > 0 {
            top -= 1;
            let node = stack[top];
            steps += 1;
            if steps > SEARCH_BUDGET {
                return Reach::Limit;
            }
            let Some(witness) = self.node(node) else {
                // Stale handle from a dead identity; skip it.
                continue;
            };
            let mut cursor = witness.children;
            while let Some(handle) = cursor {
                let block = self.edges.get(handle).expect("edge chain");
                for &c in &block.children[..block.count] {
                    if c == child {
                        return Reach::Yes;
                    }
                    if top == SEARCH_STACK {
                        return Reach::Limit;
                    }
                    stack[top] = c;
                    top += 1;
                }
                cursor = block.next;
            }
        }
        Reach::No
    }

    /// Records "parent may be held while acquiring child".
    ///
    /// Rejects self-edges and anything that would close a cycle, then
    /// appends the edge, sweeps stale handles, transitively reduces the
    /// parent's category and recomputes diagnostic levels.  Relating
    /// witnesses across categories is a caller bug and halts.
    pub(crate) fn declare_order(&mut self, parent: Handle, child: Handle) -> Result<(), OrderError> {
        if parent == child {
            return Err(OrderError::WouldCycle);
        }
        let (pcat, pname, ccat, cname) = match (self.node(parent), self.node(child)) {
            (Some(p), Some(c)) => (p.category(), p.name, c.category(), c.name),
            _ => return Ok(()),
        };
        if pcat != ccat {
            panic!(
                "witness: parent \"{}\" and child \"{}\" are not the same lock category",
                pname, cname
            );
        }
        if self.is_direct_child(parent, child) {
            return Ok(());
        }
        match self.reach(child, parent) {
            Reach::Yes => return Err(OrderError::WouldCycle),
            Reach::Limit => return Err(OrderError::SearchLimit),
            Reach::No => {}
        }
        self.insert_edge(parent, child)?;
        self.sweep_stale();
        self.reduce(pcat)?;
        self.level_all();
        Ok(())
    }

    /// Drops edges whose target identity has died (stale handles).
    fn sweep_stale(&mut self) {
        for i in 0..self.nodes.capacity() {
            let Some(parent) = self.nodes.handle_at(i) else {
                continue;
            };
            let mut cursor = self.node(parent).and_then(|w| w.children);
            let mut prev: Option<Handle> = None;
            while let Some(handle) = cursor {
                let (count, next, children) = {
                    let block = self.edges.get(handle).expect("edge chain");
                    (block.count, block.next, block.children)
                };
                let mut keep = [Handle::default(); EDGE_FANOUT];
                let mut kept = 0;
                for &c in &children[..count] {
                    if self.nodes.contains(c) {
                        keep[kept] = c;
                        kept += 1;
                    }
                }
                if kept != count {
                    let block = self.edges.get_mut(handle).expect("edge chain");
                    block.children = keep;
                    block.count = kept;
                }
                if kept == 0 {
                    match prev {
                        Some(p) => self.edges.get_mut(p).expect("edge chain").next = next,
                        None => self.node_mut(parent).expect("live parent").children = next,
                    }
                    self.edges.free(handle);
                } else {
                    prev = Some(handle);
                }
                cursor = next;
            }
        }
    }

    /// Transitive reduction over one category: any direct edge also implied
    /// by a longer path is removed.
    fn reduce(&mut self, category: ClassFlags) -> Result<(), OrderError> {
        for ci in 0..self.nodes.capacity() {
            let Some(child) = self.nodes.handle_at(ci) else {
                continue;
            };
            if self.node(child).expect("live child").category() != category {
                continue;
            }
            for pi in 0..self.nodes.capacity() {
                if pi == ci {
                    continue;
                }
                let Some(parent) = self.nodes.handle_at(pi) else {
                    continue;
                };
                if self.node(parent).expect("live parent").category() != category {
                    continue;
                }
                if !self.is_direct_child(parent, child) {
                    continue;
                }
                self.remove_edge(parent, child);
                match self.reach(parent, child) {
                    // Still reachable without the direct edge: it was
                    // redundant and stays out.
                    Reach::Yes => {}
                    Reach::No => self.insert_edge(parent, child)?,
                    Reach::Limit => {
                        // Put the edge back rather than lose an observed
                        // order, and let the caller degrade.
                        let _ = self.insert_edge(parent, child);
                        return Err(OrderError::SearchLimit);
                    }
                }
            }
        }
        Ok(())
    }

    /// Recomputes every node's diagnostic level: clear all, then propagate
    /// depth from each category root, taking the maximum across multiple
    /// inbound paths.
    pub(crate) fn level_all(&mut self) {
        for i in 0..self.nodes.capacity() {
            if let Some(handle) = self.nodes.handle_at(i) {
                self.node_mut(handle).expect("live node").level = 0;
            }
        }
        for i in 0..self.nodes.capacity() {
            let Some(handle) = self.nodes.handle_at(i) else {
                continue;
            };
            let category = self.node(handle).expect("live node").category();
            if self.has_parent_in(category, handle) {
                continue;
            }
            self.level_descendants(handle);
        }
    }

    /// Does any witness of `category` list `child` as a direct child?
    pub(crate) fn has_parent_in(&self, category: ClassFlags, child: Handle) -> bool {
        for i in 0..self.nodes.capacity() {
            let Some(parent) = self.nodes.handle_at(i) else {
                continue;
            };
            if parent == child {
                continue;
            }
            if self.node(parent).expect("live node").category() != category {
                continue;
            }
            if self.is_direct_child(parent, child) {
                return true;
            }
        }
        false
    }

    /// Depth propagation below one root, bounded like the reachability
    /// search; overrunning the bounds leaves levels partial, which only
    /// blurs display indentation.
    fn level_descendants(&mut self, root: Handle) {
        let mut stack = [(Handle::default(), 0u32); LEVEL_STACK];
        stack[0] = (root, 0);
        let mut top = 1usize;
        let mut steps = 0usize;
        while top > 0 {
            top -= 1;
            let (node, level) = stack[top];
            steps += 1;
            if steps > LEVEL_BUDGET {
                return;
            }
            let Some(witness) = self.node(node) else {
                continue;
            };
            if witness.level < level {
                self.node_mut(node).expect("live node").level = level;
            }
            let mut cursor = self.node(node).expect("live node").children;
            while let Some(handle) = cursor {
                let (count, next, children) = {
                    let block = self.edges.get(handle).expect("edge chain");
                    (block.count, block.next, block.children)
                };
                for &c in &children[..count] {
                    if top == LEVEL_STACK {
                        return;
                    }
                    stack[top] = (c, level + 1);
                    top += 1;
                }
                cursor = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{SLEEP_MUTEX, SPIN_MUTEX};
    use crate::registry::WitnessTable;

    fn named(table: &mut WitnessTable, name: &'static str) -> Handle {
        table.enroll(name, &SLEEP_MUTEX).unwrap()
    }

    #[test]
    fn declare_establishes_descent() {
        let mut table = WitnessTable::new();
        let a = named(&mut table, "a");
        let b = named(&mut table, "b");
        table.declare_order(a, b).unwrap();

        assert!(table.is_direct_child(a, b));
        assert_eq!(table.reach(a, b), Reach::Yes);
        assert_eq!(table.reach(b, a), Reach::No);
    }

    #[test]
    fn reversal_is_rejected_not_cyclic() {
        let mut table = WitnessTable::new();
        let a = named(&mut table, "a");
        let b = named(&mut table, "b");
        let c = named(&mut table, "c");
        table.declare_order(a, b).unwrap();
        table.declare_order(b, c).unwrap();

        // Direct and transitive reversals both refuse to close the cycle.
        assert_eq!(table.declare_order(b, a), Err(OrderError::WouldCycle));
        assert_eq!(table.declare_order(c, a), Err(OrderError::WouldCycle));
        assert_eq!(table.declare_order(a, a), Err(OrderError::WouldCycle));
        assert_eq!(table.reach(a, c), Reach::Yes);
        assert_eq!(table.reach(c, a), Reach::No);
    }

    #[test]
    fn redundant_direct_edge_is_pruned() {
        let mut table = WitnessTable::new();
        let a = named(&mut table, "a");
        let b = named(&mut table, "b");
        let c = named(&mut table, "c");
        table.declare_order(a, b).unwrap();
        table.declare_order(b, c).unwrap();
        table.declare_order(a, c).unwrap();

        // a → c is implied by a → b → c, so the direct edge must not
        // survive the reduction pass.
        assert!(!table.is_direct_child(a, c));
        assert_eq!(table.reach(a, c), Reach::Yes);
        assert!(table.is_direct_child(a, b));
        assert!(table.is_direct_child(b, c));
    }

    #[test]
    fn remove_edge_compacts_block() {
        let mut table = WitnessTable::new();
        let p = named(&mut table, "p");
        let kids: Vec<Handle> = ["k0", "k1", "k2"]
            .iter()
            .map(|n| named(&mut table, n))
            .collect();
        for &k in &kids {
            table.insert_edge(p, k).unwrap();
        }

        table.remove_edge(p, kids[1]);
        assert!(table.is_direct_child(p, kids[0]));
        assert!(!table.is_direct_child(p, kids[1]));
        assert!(table.is_direct_child(p, kids[2]));
    }

    #[test]
    fn child_list_chains_across_blocks() {
        let mut table = WitnessTable::new();
        let p = named(&mut table, "p");
        let names = [
            "c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7",
        ];
        let kids: Vec<Handle> = names.iter().map(|n| named(&mut table, n)).collect();
        for &k in &kids {
            table.insert_edge(p, k).unwrap();
        }
        assert!(kids.iter().all(|&k| table.is_direct_child(p, k)));

        // Empty the first block; the chain must stay intact.
        for &k in &kids[..EDGE_FANOUT] {
            table.remove_edge(p, k);
        }
        assert!(!table.is_direct_child(p, kids[0]));
        assert!(table.is_direct_child(p, kids[6]));
        assert!(table.is_direct_child(p, kids[7]));
    }

    #[test]
    fn levels_take_max_depth() {
        let mut table = WitnessTable::new();
        let a = named(&mut table, "a");
        let b = named(&mut table, "b");
        let c = named(&mut table, "c");
        let d = named(&mut table, "d");
        // a → b → d and a → c → d plus a long way round: d's level is the
        // deepest inbound path.
        table.declare_order(a, b).unwrap();
        table.declare_order(a, c).unwrap();
        table.declare_order(b, d).unwrap();
        table.declare_order(c, d).unwrap();
        table.declare_order(b, c).unwrap();

        assert_eq!(table.node(a).unwrap().level, 0);
        assert_eq!(table.node(b).unwrap().level, 1);
        assert_eq!(table.node(c).unwrap().level, 2);
        assert_eq!(table.node(d).unwrap().level, 3);
    }

    #[test]
    fn categories_do_not_mix() {
        let mut table = WitnessTable::new();
        let sleep = table.enroll("s", &SLEEP_MUTEX).unwrap();
        let spin = table.enroll("p", &SPIN_MUTEX).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = table.declare_order(sleep, spin);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn search_gives_up_explicitly() {
        // A ladder of diamonds has exponentially many paths; without a
        // visited set the bounded search must answer Limit, never No.
        let mut table = WitnessTable::new();
        let rungs = 14;
        let mut uppers = Vec::new();
        let mut lowers = Vec::new();
        for i in 0..rungs {
            let u: &'static str = Box::leak(format!("u{i}").into_boxed_str());
            let l: &'static str = Box::leak(format!("l{i}").into_boxed_str());
            uppers.push(named(&mut table, u));
            lowers.push(named(&mut table, l));
        }
        let target = named(&mut table, "unreachable");
        for i in 0..rungs - 1 {
            // Raw edges: declare_order's own reduction would hit the limit
            // while we are still building.
            table.insert_edge(uppers[i], uppers[i + 1]).unwrap();
            table.insert_edge(uppers[i], lowers[i + 1]).unwrap();
            table.insert_edge(lowers[i], uppers[i + 1]).unwrap();
            table.insert_edge(lowers[i], lowers[i + 1]).unwrap();
        }
        assert_eq!(table.reach(uppers[0], target), Reach::Limit);
    }

    #[test]
    fn dead_identity_edges_are_swept() {
        let mut table = WitnessTable::new();
        let a = named(&mut table, "a");
        let b = named(&mut table, "b");
        let c = named(&mut table, "c");
        table.declare_order(a, b).unwrap();
        table.declare_order(a, c).unwrap();

        // Kill b; the a → b edge goes stale and the next declaration pass
        // sweeps it.
        table.release(b);
        assert_eq!(table.reach(a, b), Reach::No);
        let d = named(&mut table, "d");
        table.declare_order(a, d).unwrap();
        assert!(table.is_direct_child(a, c));
        assert!(table.is_direct_child(a, d));
        assert!(!table.is_direct_child(a, b));
    }
}
