//! Lock instances as the verifier sees them.
//!
//! The lock primitive owns the actual lock; it embeds a [`LockObject`] and
//! calls the checker hooks at each lifecycle point.  The verifier references
//! instances only by the unique id assigned at `init`, never by address.

use bitflags::bitflags;
use core::fmt;

use crate::class::LockClass;
use crate::pool::Handle;

bitflags! {
    /// Per-instance state, maintained jointly by the owning primitive
    /// (LOCKED / RECURSED) and the checker (INITIALIZED).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockFlags: u32 {
        /// Registered with the checker via `init`.
        const INITIALIZED = 1 << 0;
        /// Participates in order checking.
        const WITNESS = 1 << 1;
        /// Currently held.  The primitive sets this before the `lock` hook.
        const LOCKED = 1 << 2;
        /// Held recursively (depth > 1).
        const RECURSED = 1 << 3;
        /// This instance may be acquired recursively.  Must be permitted by
        /// the class.
        const RECURSABLE = 1 << 4;
        /// This instance may be held across a voluntary sleep.  Must be
        /// permitted by the class.
        const SLEEPABLE = 1 << 5;
    }
}

bitflags! {
    /// Flags passed to the `lock`/`unlock` hooks for a single operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u32 {
        /// Non-blocking try-acquisition: cannot deadlock, so order checks
        /// are skipped.
        const TRY = 1 << 0;
        /// Release that cannot trigger a context switch.
        const NOSWITCH = 1 << 1;
    }
}

/// A source location, recorded at every acquisition for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSite {
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Verifier-visible state of one live lock instance.
///
/// Many instances may share one witness identity (same name and class); each
/// instance still records its own last acquisition site.
pub struct LockObject {
    pub(crate) name: &'static str,
    pub(crate) class: &'static LockClass,
    pub(crate) flags: LockFlags,
    pub(crate) site: Option<SourceSite>,
    pub(crate) witness: Option<Handle>,
    pub(crate) instance: u64,
}

impl LockObject {
    /// Creates an instance header.  `flags` may carry `WITNESS`,
    /// `RECURSABLE` and `SLEEPABLE`; everything else is checker-owned and
    /// validated at `init`.
    pub fn new(name: &'static str, class: &'static LockClass, flags: LockFlags) -> Self {
        Self {
            name,
            class,
            flags,
            site: None,
            witness: None,
            instance: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn class(&self) -> &'static LockClass {
        self.class
    }

    #[inline]
    pub fn flags(&self) -> LockFlags {
        self.flags
    }

    /// Last acquisition site, if ever acquired.
    #[inline]
    pub fn site(&self) -> Option<SourceSite> {
        self.site
    }

    /// Whether the checker is tracking this instance.
    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.witness.is_some()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flags.contains(LockFlags::LOCKED)
    }

    // ── Primitive-side state transitions ────────────────────────────
    //
    // The owning lock primitive flips these around its own acquire/release,
    // before invoking the corresponding hook.

    /// Marks the instance held.
    #[inline]
    pub fn set_locked(&mut self) {
        self.flags.insert(LockFlags::LOCKED);
    }

    /// Marks the instance released.
    #[inline]
    pub fn clear_locked(&mut self) {
        self.flags.remove(LockFlags::LOCKED);
    }

    /// Marks the instance recursively held.
    #[inline]
    pub fn set_recursed(&mut self) {
        self.flags.insert(LockFlags::RECURSED);
    }

    /// Drops the recursion mark (depth back to 1).
    #[inline]
    pub fn clear_recursed(&mut self) {
        self.flags.remove(LockFlags::RECURSED);
    }
}
