//! Lock classes.
//!
//! A class describes the *behavior* of a family of lock primitives: whether
//! acquirers spin or sleep, and whether instances may be recursable or
//! sleepable.  Classes are `'static` and compared by identity — two locks
//! share a class only if they point at the same descriptor, the same way the
//! kernel's lock primitives each carry one canonical class object.

use bitflags::bitflags;

bitflags! {
    /// Behavior flags for a lock class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        /// Acquirers busy-wait with preemption disabled.
        const SPIN = 1 << 0;
        /// Acquirers may block and be descheduled.
        const SLEEP = 1 << 1;
        /// Instances of this class may be acquired recursively.
        const RECURSABLE = 1 << 2;
        /// Instances of this class may be held across a voluntary sleep.
        const SLEEPABLE = 1 << 3;
    }
}

/// Descriptor for a family of lock primitives.
pub struct LockClass {
    pub name: &'static str,
    pub flags: ClassFlags,
}

impl LockClass {
    /// Spin category?  Exactly one of spin/sleep is set on a valid class.
    #[inline]
    pub fn is_spin(&self) -> bool {
        self.flags.contains(ClassFlags::SPIN)
    }

    /// Sleep category?
    #[inline]
    pub fn is_sleep(&self) -> bool {
        self.flags.contains(ClassFlags::SLEEP)
    }

    /// The category bit (spin vs sleep) — witnesses only ever relate to
    /// witnesses of the same category.
    #[inline]
    pub fn category(&self) -> ClassFlags {
        self.flags & (ClassFlags::SPIN | ClassFlags::SLEEP)
    }
}

/// Identity comparison — classes are singletons, not values.
#[inline]
pub fn same_class(a: &'static LockClass, b: &'static LockClass) -> bool {
    core::ptr::eq(a, b)
}

/// Blocking mutual-exclusion locks (the common kernel mutex).
pub static SLEEP_MUTEX: LockClass = LockClass {
    name: "sleep mutex",
    flags: ClassFlags::SLEEP.union(ClassFlags::RECURSABLE),
};

/// Busy-waiting locks taken with preemption disabled.
pub static SPIN_MUTEX: LockClass = LockClass {
    name: "spin mutex",
    flags: ClassFlags::SPIN.union(ClassFlags::RECURSABLE),
};

/// Shared/exclusive locks that may be held across a sleep.
pub static SHARED_EXCLUSIVE: LockClass = LockClass {
    name: "shared-exclusive",
    flags: ClassFlags::SLEEP
        .union(ClassFlags::SLEEPABLE)
        .union(ClassFlags::RECURSABLE),
};

/// Placeholder class for vacant pool slots.  Never observed through a live
/// handle.
pub(crate) static NO_CLASS: LockClass = LockClass {
    name: "(none)",
    flags: ClassFlags::empty(),
};
