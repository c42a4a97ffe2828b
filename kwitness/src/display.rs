//! Introspection output.
//!
//! Renders the witness forests and per-context held-lock listings into a
//! caller-supplied `fmt::Write` sink — the checker itself never talks to a
//! console, the embedder decides where diagnostics land.

use core::fmt::Write;

use crate::checker::Checker;
use crate::class::ClassFlags;
use crate::pool::Handle;
use crate::registry::WitnessTable;
use crate::stack::LockContext;

/// Pending-node limit for one subtree render.
const DISPLAY_STACK: usize = 64;

/// Node-visit budget for one subtree render.
const DISPLAY_BUDGET: usize = 512;

impl Checker {
    /// Writes every lock `ctx` currently holds, one line each, and returns
    /// the count.
    pub fn list_held(&self, ctx: &LockContext, sink: &mut dyn Write) -> usize {
        let table = self.table().lock();
        let mut count = 0;
        for head in [ctx.sleep_head, ctx.spin_head] {
            table.chain_for_each(head, |held| {
                let _ = writeln!(
                    sink,
                    "\t({}) {} locked at {}",
                    held.class.name, held.name, held.site
                );
                count += 1;
                true
            });
        }
        count
    }

    /// Renders the sleep forest, the spin forest, and every witness that
    /// was never acquired.
    pub fn display(&self, sink: &mut dyn Write) {
        let mut table = self.table().lock();
        table.level_all();

        let _ = writeln!(sink, "Sleep locks:");
        display_forest(&table, sink, ClassFlags::SLEEP);

        let _ = writeln!(sink);
        let _ = writeln!(sink, "Spin locks:");
        display_forest(&table, sink, ClassFlags::SPIN);

        let _ = writeln!(sink);
        let _ = writeln!(sink, "Locks which were never acquired:");
        for (_, witness) in table.nodes.iter() {
            if witness.site.is_none() {
                let _ = writeln!(sink, "{}", witness.name);
            }
        }
    }
}

/// Renders each acquired root of `category` with its subtree.
fn display_forest(table: &WitnessTable, sink: &mut dyn Write, category: ClassFlags) {
    for i in 0..table.nodes.capacity() {
        let Some(handle) = table.nodes.handle_at(i) else {
            continue;
        };
        let witness = table.node(handle).expect("live node");
        if witness.category() != category || witness.site.is_none() {
            continue;
        }
        if table.has_parent_in(category, handle) {
            continue;
        }
        display_subtree(table, sink, handle);
    }
}

/// Pre-order render below one root, indented by level.  A node reachable
/// along several paths prints once per path.
fn display_subtree(table: &WitnessTable, sink: &mut dyn Write, root: Handle) {
    let mut stack = [Handle::default(); DISPLAY_STACK];
    stack[0] = root;
    let mut top = 1usize;
    let mut steps = 0usize;
    while top > 0 {
        top -= 1;
        let node = stack[top];
        steps += 1;
        if steps > DISPLAY_BUDGET {
            let _ = writeln!(sink, "...");
            return;
        }
        let Some(witness) = table.node(node) else {
            continue;
        };
        let _ = write!(sink, "{:<2}", witness.level);
        for _ in 0..witness.level {
            let _ = write!(sink, " ");
        }
        let _ = write!(sink, "{}", witness.name);
        match witness.site {
            Some(site) => {
                let _ = writeln!(sink, " -- last acquired @ {}", site);
            }
            None => {
                let _ = writeln!(sink);
            }
        }
        let mut cursor = witness.children;
        while let Some(handle) = cursor {
            let block = table.edges.get(handle).expect("edge chain");
            for &child in &block.children[..block.count] {
                if top == DISPLAY_STACK {
                    break;
                }
                stack[top] = child;
                top += 1;
            }
            cursor = block.next;
        }
    }
}
