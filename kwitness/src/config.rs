//! Static checker configuration.
//!
//! Everything here is consulted at runtime but never mutated: the boot-time
//! order seed, the blessed-pair and duplicate-exemption tables, and the
//! global toggles.  The tables are `'static` slices so a kernel can keep the
//! whole configuration in rodata.

use crate::class::LockClass;

/// One (name, class) entry in a seed chain.
pub struct SeedLock {
    pub name: &'static str,
    pub class: &'static LockClass,
}

/// A pair of lock names whose relative order is never worth squawking
/// about.  Matching is symmetric.
pub struct BlessedPair {
    pub first: &'static str,
    pub second: &'static str,
}

/// Checker configuration, fixed at construction.
///
/// `seed` is a list of chains; within each chain, every entry may be held
/// while acquiring any later entry.  Chains are processed once at
/// [`initialize`](crate::Checker::initialize), before any runtime
/// observation.
pub struct WitnessConfig {
    /// Master toggle.  Off means every hook is a no-op.
    pub watch: bool,
    /// Skip enrollment of spin-class locks entirely.
    pub skip_spin: bool,
    /// Invoke the debugger hook on order/sleep violations.
    pub trap_on_violation: bool,
    /// Debugger entry point, if the embedder has one.
    pub debugger: Option<fn(&'static str)>,
    /// The outermost kernel lock, exempt from sleep checking and squawked
    /// separately on order violations.
    pub big_lock: Option<&'static str>,
    /// Boot-time order chains.
    pub seed: &'static [&'static [SeedLock]],
    /// Statically exempted order pairs.
    pub blessed: &'static [BlessedPair],
    /// Names exempt from duplicate-acquisition warnings.
    pub dup_exempt: &'static [&'static str],
}

impl WitnessConfig {
    /// Watching enabled, every table empty.
    pub const fn new() -> Self {
        Self {
            watch: true,
            skip_spin: false,
            trap_on_violation: false,
            debugger: None,
            big_lock: None,
            seed: &[],
            blessed: &[],
            dup_exempt: &[],
        }
    }

    /// Is the (a, b) order pair blessed, in either orientation?
    pub(crate) fn is_blessed(&self, a: &str, b: &str) -> bool {
        self.blessed.iter().any(|pair| {
            (pair.first == a && pair.second == b) || (pair.first == b && pair.second == a)
        })
    }

    /// Is `name` exempt from duplicate warnings?
    pub(crate) fn is_dup_exempt(&self, name: &str) -> bool {
        self.dup_exempt.iter().any(|n| *n == name)
    }

    /// Is `name` the configured big lock?
    pub(crate) fn is_big(&self, name: &str) -> bool {
        self.big_lock.is_some_and(|b| b == name)
    }
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self::new()
    }
}
