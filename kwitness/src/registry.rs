//! Witness registry.
//!
//! A witness is the deduplicated identity of a lock *category*: one (name,
//! class) pair, shared by every live instance initialized under that name.
//! The registry owns the three pools behind the verifier — witness nodes,
//! edge blocks, context-stack blocks — all guarded together by the checker's
//! table mutex.
//!
//! Witness slots are refcounted by live instances.  When the last instance
//! is destroyed the identity dies: its slot goes back to the free list with
//! the generation bumped, its outgoing edges are released, and any inbound
//! edges still naming it turn into stale handles that the graph sweeps out
//! lazily.

use crate::class::{same_class, ClassFlags, LockClass, NO_CLASS};
use crate::error::EnrollError;
use crate::graph::{EdgeBlock, EDGE_BLOCKS};
use crate::object::SourceSite;
use crate::pool::{Handle, Pool};
use crate::stack::{StackBlock, STACK_BLOCKS};

/// Maximum number of distinct lock identities tracked simultaneously.
pub const WITNESS_MAX: usize = 128;

/// One lock identity.
pub(crate) struct Witness {
    pub name: &'static str,
    pub class: &'static LockClass,
    /// Head of the outgoing edge-block chain ("may be held while acquiring
    /// these").
    pub children: Option<Handle>,
    /// Live instances sharing this identity.
    pub refcount: u32,
    /// Diagnostic depth, recomputed by `level_all`.
    pub level: u32,
    /// Most recent acquisition site; `None` means never acquired.
    pub site: Option<SourceSite>,
    /// One-shot duplicate-acquisition warning.
    pub same_squawked: bool,
    /// One-shot order warning against the big lock.
    pub big_squawked: bool,
    /// One-shot order warning against anything else.
    pub other_squawked: bool,
}

impl Witness {
    fn enrolled(name: &'static str, class: &'static LockClass) -> Self {
        Self {
            name,
            class,
            children: None,
            refcount: 1,
            level: 0,
            site: None,
            same_squawked: false,
            big_squawked: false,
            other_squawked: false,
        }
    }

    #[inline]
    pub fn category(&self) -> ClassFlags {
        self.class.category()
    }
}

impl Default for Witness {
    fn default() -> Self {
        Self {
            name: "",
            class: &NO_CLASS,
            children: None,
            refcount: 0,
            level: 0,
            site: None,
            same_squawked: false,
            big_squawked: false,
            other_squawked: false,
        }
    }
}

/// The shared heart of the verifier: every pool plus the order graph woven
/// through them.  One instance per checker, always behind its spin mutex.
pub(crate) struct WitnessTable {
    pub nodes: Pool<Witness, WITNESS_MAX>,
    pub edges: Pool<EdgeBlock, EDGE_BLOCKS>,
    pub blocks: Pool<StackBlock, STACK_BLOCKS>,
}

impl WitnessTable {
    pub fn new() -> Self {
        Self {
            nodes: Pool::new(),
            edges: Pool::new(),
            blocks: Pool::new(),
        }
    }

    #[inline]
    pub fn node(&self, handle: Handle) -> Option<&Witness> {
        self.nodes.get(handle)
    }

    #[inline]
    pub fn node_mut(&mut self, handle: Handle) -> Option<&mut Witness> {
        self.nodes.get_mut(handle)
    }

    /// Finds a live witness by name.
    pub fn find(&self, name: &str) -> Option<Handle> {
        self.nodes
            .iter()
            .find(|(_, w)| w.name == name)
            .map(|(h, _)| h)
    }

    /// Enrolls a (name, class) pair.
    ///
    /// An existing live witness with the same name is reused — its refcount
    /// grows — provided the class matches by identity.  Otherwise a fresh
    /// node is taken from the pool.
    pub fn enroll(
        &mut self,
        name: &'static str,
        class: &'static LockClass,
    ) -> Result<Handle, EnrollError> {
        if let Some(handle) = self.find(name) {
            let witness = self.nodes.get_mut(handle).expect("live handle");
            if !same_class(witness.class, class) {
                return Err(EnrollError::ClassMismatch {
                    have: witness.class.name,
                });
            }
            witness.refcount += 1;
            return Ok(handle);
        }
        self.nodes
            .alloc(Witness::enrolled(name, class))
            .ok_or(EnrollError::Exhausted)
    }

    /// Drops one instance reference.  The last reference kills the
    /// identity: outgoing edges are released and the slot returns to the
    /// free list.  Inbound edges are left to go stale and are swept by the
    /// next reduction pass.
    pub fn release(&mut self, handle: Handle) {
        let Some(witness) = self.nodes.get_mut(handle) else {
            return;
        };
        witness.refcount = witness.refcount.saturating_sub(1);
        if witness.refcount > 0 {
            return;
        }
        let mut next = witness.children.take();
        while let Some(block) = next {
            next = self.edges.get(block).and_then(|b| b.next);
            self.edges.free(block);
        }
        self.nodes.free(handle);
    }
}
