//! kwitness — runtime lock-order verifier.
//!
//! Watches every lock acquisition and release in the kernel, learns the
//! directed "may be held while acquiring" relation between lock identities,
//! and squawks when an acquisition contradicts previously established or
//! seeded order — the classic precursor to deadlock.  It also checks that
//! no non-sleepable lock is held when a context voluntarily blocks.
//!
//! The verifier *warns*, it never enforces: acquisitions proceed regardless
//! of what the checker thinks of them.  And it degrades rather than
//! collapses — running out of any internal pool permanently disables
//! checking but never fails or blocks the lock operation being checked.
//!
//! # Embedding
//!
//! Lock primitives embed a [`LockObject`] and call the hooks at each
//! lifecycle point; each execution context owns a [`LockContext`].  A
//! typical kernel keeps one global checker:
//!
//! ```
//! use kwitness::{Checker, LockContext, LockObject, LockFlags, OpFlags, SLEEP_MUTEX};
//!
//! static CHECKER: spin::Once<Checker> = spin::Once::new();
//!
//! let checker = CHECKER.call_once(|| Checker::new(kwitness::WitnessConfig::new()));
//! checker.initialize();
//!
//! let mut ctx = LockContext::new();
//! let mut lock = LockObject::new("proc table", &SLEEP_MUTEX, LockFlags::WITNESS);
//! checker.init(&mut lock);
//!
//! // Inside the primitive's acquire path:
//! lock.set_locked();
//! checker.lock(&mut ctx, &mut lock, OpFlags::empty(), file!(), line!());
//!
//! // ... and the release path:
//! checker.unlock(&mut ctx, &mut lock, OpFlags::empty(), file!(), line!());
//! lock.clear_locked();
//! ```
//!
//! All diagnostics go through the [`log`] facade; the embedder installs the
//! sink.

#![cfg_attr(not(test), no_std)]

mod checker;
mod class;
mod config;
mod display;
mod error;
mod graph;
mod object;
mod pool;
mod registry;
mod stack;

pub use checker::Checker;
pub use class::{ClassFlags, LockClass, SHARED_EXCLUSIVE, SLEEP_MUTEX, SPIN_MUTEX};
pub use config::{BlessedPair, SeedLock, WitnessConfig};
pub use error::Violation;
pub use object::{LockFlags, LockObject, OpFlags, SourceSite};
pub use pool::Handle;
pub use registry::WITNESS_MAX;
pub use stack::LockContext;
