//! The checker: hook implementations behind every lock operation.
//!
//! One [`Checker`] is the whole verifier — pools, registry, graph, counters
//! and configuration.  It is constructed explicitly and passed (or shared)
//! to every hook call site; an embedder that wants a process-wide instance
//! parks it in a `spin::Once`.
//!
//! Failure contract: contract violations by the caller halt via `panic!`;
//! ordering problems warn once and keep going; running out of any pool
//! permanently disables the verifier and never fails the caller.  The table
//! mutex is held only for short non-blocking sections, and diagnostics are
//! emitted after it is released.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::class::{ClassFlags, LockClass};
use crate::config::WitnessConfig;
use crate::error::{EnrollError, OrderError, Violation};
use crate::graph::Reach;
use crate::object::{LockFlags, LockObject, OpFlags, SourceSite};
use crate::pool::Handle;
use crate::registry::WitnessTable;
use crate::stack::{HeldLock, LockContext};

/// Held entries examined by one acquisition's order scan.  Contexts holding
/// more than this many locks at once have problems this verifier cannot fix.
const SCAN_MAX: usize = 32;

/// Order-reversal reports buffered per acquisition (squawks beyond this are
/// counted but not printed).
const REPORT_MAX: usize = 4;

/// Sleep-check offenders buffered per call.
const SLEEP_REPORT_MAX: usize = 8;

/// Pseudo-site stamped on witnesses created by the boot-time seed.
const SEED_SITE: SourceSite = SourceSite {
    file: "order list",
    line: 0,
};

#[derive(Clone, Copy)]
struct OrderReport {
    held_name: &'static str,
    held_site: SourceSite,
}

#[derive(Clone, Copy)]
struct SleepReport {
    name: &'static str,
    site: SourceSite,
}

/// The lock-order verifier.
pub struct Checker {
    table: Mutex<WitnessTable>,
    config: WitnessConfig,
    /// Still bootstrapping; hooks are no-ops until `initialize`.
    cold: AtomicBool,
    /// A pool ran dry; checking is permanently off.
    dead: AtomicBool,
    /// The embedder reported a panic in progress.
    panicked: AtomicBool,
    /// Master toggle.
    watch: AtomicBool,
    /// Trap into the debugger hook on violations.
    trap: AtomicBool,
    next_instance: AtomicU64,
    order_violations: AtomicUsize,
    duplicate_squawks: AtomicUsize,
    tracked_cur: AtomicUsize,
    tracked_max: AtomicUsize,
}

impl Checker {
    /// Builds a cold checker.  Hooks stay no-ops until [`initialize`]
    /// processes the seed, but `init` already enrolls instances so locks
    /// created early are tracked from the start.
    ///
    /// [`initialize`]: Checker::initialize
    pub fn new(config: WitnessConfig) -> Self {
        let watch = config.watch;
        let trap = config.trap_on_violation;
        Self {
            table: Mutex::new(WitnessTable::new()),
            config,
            cold: AtomicBool::new(true),
            dead: AtomicBool::new(false),
            panicked: AtomicBool::new(false),
            watch: AtomicBool::new(watch),
            trap: AtomicBool::new(trap),
            next_instance: AtomicU64::new(1),
            order_violations: AtomicUsize::new(0),
            duplicate_squawks: AtomicUsize::new(0),
            tracked_cur: AtomicUsize::new(0),
            tracked_max: AtomicUsize::new(0),
        }
    }

    /// Processes the seed chains and flips the checker live.
    ///
    /// Within each chain, every entry is declared an ancestor of the next.
    /// Run this once at bring-up, before the first guarded lock operation.
    pub fn initialize(&self) {
        for chain in self.config.seed {
            let mut prev: Option<Handle> = None;
            for seed in chain.iter() {
                let Some(handle) = self.enroll(seed.name, seed.class) else {
                    // Skipped (skip_spin, watch off) or exhausted; either
                    // way this link of the chain cannot be recorded.
                    prev = None;
                    continue;
                };
                {
                    let mut table = self.table.lock();
                    if let Some(node) = table.node_mut(handle) {
                        if node.site.is_none() {
                            node.site = Some(SEED_SITE);
                        }
                    }
                }
                if let Some(parent) = prev {
                    let mut table = self.table.lock();
                    match table.declare_order(parent, handle) {
                        Ok(()) => {}
                        Err(OrderError::WouldCycle) => {
                            drop(table);
                            log::warn!(
                                "witness: seed chain contradicts earlier order at \"{}\"",
                                seed.name
                            );
                        }
                        Err(OrderError::Exhausted) => {
                            drop(table);
                            self.go_dead("edge blocks");
                        }
                        Err(OrderError::SearchLimit) => {
                            drop(table);
                            self.go_dead("order graph search");
                        }
                    }
                }
                prev = Some(handle);
            }
        }
        self.cold.store(false, Ordering::Release);
    }

    // ── Instance lifecycle ──────────────────────────────────────────

    /// Registers a lock instance.  Validates the per-instance flags against
    /// the class and enrolls the (name, class) identity when watching.
    pub fn init(&self, obj: &mut LockObject) {
        if obj.flags.contains(LockFlags::INITIALIZED) {
            panic!(
                "witness: {}: lock ({}) {} is already initialized",
                Violation::InvalidState,
                obj.class.name,
                obj.name
            );
        }
        if obj.flags.contains(LockFlags::RECURSABLE)
            && !obj.class.flags.contains(ClassFlags::RECURSABLE)
        {
            panic!(
                "witness: {}: lock ({}) {} can not be recursable",
                Violation::InvalidState,
                obj.class.name,
                obj.name
            );
        }
        if obj.flags.contains(LockFlags::SLEEPABLE)
            && !obj.class.flags.contains(ClassFlags::SLEEPABLE)
        {
            panic!(
                "witness: {}: lock ({}) {} can not be sleepable",
                Violation::InvalidState,
                obj.class.name,
                obj.name
            );
        }
        obj.flags.insert(LockFlags::INITIALIZED);
        obj.instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let cur = self.tracked_cur.fetch_add(1, Ordering::Relaxed) + 1;
        self.tracked_max.fetch_max(cur, Ordering::Relaxed);

        obj.witness = if obj.flags.contains(LockFlags::WITNESS)
            && self.watch.load(Ordering::Acquire)
            && !self.dead.load(Ordering::Acquire)
        {
            self.enroll(obj.name, obj.class)
        } else {
            None
        };
    }

    /// Unregisters a lock instance.  Destroying a held lock halts.
    pub fn destroy(&self, obj: &mut LockObject) {
        if !obj.flags.contains(LockFlags::INITIALIZED) {
            panic!(
                "witness: {}: lock ({}) {} is not initialized",
                Violation::InvalidState,
                obj.class.name,
                obj.name
            );
        }
        if obj.flags.contains(LockFlags::LOCKED) {
            panic!(
                "witness: {}: lock ({}) {} destroyed while held",
                Violation::InvalidState,
                obj.class.name,
                obj.name
            );
        }
        if let Some(witness) = obj.witness.take() {
            let mut table = self.table.lock();
            table.release(witness);
        }
        obj.flags.remove(LockFlags::INITIALIZED);
        obj.instance = 0;
        self.tracked_cur.fetch_sub(1, Ordering::Relaxed);
    }

    // ── Acquisition ─────────────────────────────────────────────────

    /// Acquisition hook.  The primitive has already taken the lock and set
    /// `LOCKED`; this records the acquisition and judges it against the
    /// global order.
    pub fn lock(
        &self,
        ctx: &mut LockContext,
        obj: &mut LockObject,
        flags: OpFlags,
        file: &'static str,
        line: u32,
    ) {
        if self.passive() {
            return;
        }
        let Some(witness) = obj.witness else {
            return;
        };
        if !obj.flags.contains(LockFlags::LOCKED) {
            panic!(
                "witness: {}: lock ({}) {} is not locked @ {}:{}",
                Violation::InvalidState,
                obj.class.name,
                obj.name,
                file,
                line
            );
        }
        if obj.flags.contains(LockFlags::RECURSED) {
            if !obj.flags.contains(LockFlags::RECURSABLE) {
                panic!(
                    "witness: {}: recursed on non-recursable lock ({}) {} @ {}:{}",
                    Violation::InvalidState,
                    obj.class.name,
                    obj.name,
                    file,
                    line
                );
            }
            // Recursive re-acquisition of a recursable lock: already on the
            // stack, nothing new to record.
            return;
        }
        let sleeping = obj.class.is_sleep();
        if sleeping && ctx.spin_head.is_some() {
            panic!(
                "witness: {}: blockable sleep lock ({}) {} @ {}:{}",
                Violation::InvalidState,
                obj.class.name,
                obj.name,
                file,
                line
            );
        }
        let site = SourceSite { file, line };

        let mut dup_first: Option<Option<SourceSite>> = None;
        let mut reports = [None::<OrderReport>; REPORT_MAX];
        let mut buffered = 0usize;
        let mut squawks = 0usize;
        let mut exhausted: Option<&'static str> = None;

        {
            let mut table = self.table.lock();
            let head = if sleeping {
                &mut ctx.sleep_head
            } else {
                &mut ctx.spin_head
            };

            // Try-acquisitions cannot deadlock, and the first lock in a
            // chain imposes no order; both still get pushed below.
            let check_order = !flags.contains(OpFlags::TRY) && head.is_some();
            if check_order {
                // Duplicate check against the most recent acquisition only;
                // anything deeper shows up as an order violation instead.
                if let Some(top) = table.chain_top(*head) {
                    if top.witness == witness && !self.config.is_dup_exempt(obj.name) {
                        if let Some(node) = table.node_mut(witness) {
                            if !node.same_squawked {
                                node.same_squawked = true;
                                dup_first = Some(node.site);
                            }
                        }
                    }
                }

                let mut held = [HeldLock::default(); SCAN_MAX];
                let mut n_held = 0usize;
                table.chain_for_each(*head, |entry| {
                    if n_held == SCAN_MAX {
                        return false;
                    }
                    held[n_held] = *entry;
                    n_held += 1;
                    true
                });

                for entry in held[..n_held].iter() {
                    let held_witness = entry.witness;
                    if held_witness == witness || !table.nodes.contains(held_witness) {
                        continue;
                    }
                    match table.reach(held_witness, witness) {
                        // Consistent with established order.
                        Reach::Yes => continue,
                        Reach::Limit => {
                            exhausted = Some("order graph search");
                            break;
                        }
                        Reach::No => {}
                    }
                    match table.reach(witness, held_witness) {
                        Reach::Yes => {
                            // Reversal: the new lock is a known ancestor of
                            // one we already hold.
                            if self.config.is_blessed(obj.name, entry.name) {
                                continue;
                            }
                            let big = self.config.is_big(entry.name);
                            let Some(node) = table.node_mut(held_witness) else {
                                continue;
                            };
                            let seen = if big {
                                &mut node.big_squawked
                            } else {
                                &mut node.other_squawked
                            };
                            if *seen {
                                continue;
                            }
                            *seen = true;
                            squawks += 1;
                            if buffered < REPORT_MAX {
                                reports[buffered] = Some(OrderReport {
                                    held_name: entry.name,
                                    held_site: entry.site,
                                });
                                buffered += 1;
                            }
                        }
                        Reach::Limit => {
                            exhausted = Some("order graph search");
                            break;
                        }
                        Reach::No => {
                            // Unrelated so far: the graph learns this
                            // acquisition order.
                            match table.declare_order(held_witness, witness) {
                                Ok(()) | Err(OrderError::WouldCycle) => {}
                                Err(OrderError::Exhausted) => {
                                    exhausted = Some("edge blocks");
                                    break;
                                }
                                Err(OrderError::SearchLimit) => {
                                    exhausted = Some("order graph search");
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            if let Some(node) = table.node_mut(witness) {
                node.site = Some(site);
            }
            obj.site = Some(site);
            let entry = HeldLock {
                instance: obj.instance,
                witness,
                name: obj.name,
                class: obj.class,
                flags: obj.flags,
                site,
            };
            if table.chain_push(head, entry).is_err() {
                exhausted = Some("lock stack blocks");
            }
        }

        if let Some(what) = exhausted {
            self.go_dead(what);
        }
        if let Some(first) = dup_first {
            self.duplicate_squawks.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "{}: \"{}\"",
                Violation::DuplicateAcquisition,
                obj.name
            );
            if let Some(first) = first {
                log::warn!(" 1st @ {}", first);
            }
            log::warn!(" 2nd @ {}", site);
            self.trap("duplicate lock acquisition");
        }
        if squawks > 0 {
            self.order_violations.fetch_add(squawks, Ordering::Relaxed);
            for report in reports[..buffered].iter().flatten() {
                log::warn!(
                    "{}: \"{}\" established before \"{}\"",
                    Violation::OrderViolation,
                    obj.name,
                    report.held_name
                );
                log::warn!(" 1st \"{}\" @ {}", report.held_name, report.held_site);
                log::warn!(" 2nd \"{}\" @ {}", obj.name, site);
            }
            self.trap("lock order reversal");
        }
    }

    // ── Release ─────────────────────────────────────────────────────

    /// Release hook.  Finds the instance anywhere in its stack — some
    /// classes release out of order — and removes it.
    pub fn unlock(
        &self,
        ctx: &mut LockContext,
        obj: &mut LockObject,
        flags: OpFlags,
        file: &'static str,
        line: u32,
    ) {
        if self.passive() || obj.witness.is_none() {
            return;
        }
        if obj.flags.contains(LockFlags::RECURSED) {
            if !obj.flags.contains(LockFlags::LOCKED) {
                panic!(
                    "witness: {}: recursed lock ({}) {} is not locked @ {}:{}",
                    Violation::InvalidState,
                    obj.class.name,
                    obj.name,
                    file,
                    line
                );
            }
            // Unwinding one recursion level; the instance stays on the
            // stack.
            return;
        }
        let sleeping = obj.class.is_sleep();
        if sleeping && !flags.contains(OpFlags::NOSWITCH) && ctx.spin_head.is_some() {
            panic!(
                "witness: {}: switchable sleep unlock ({}) {} @ {}:{}",
                Violation::InvalidState,
                obj.class.name,
                obj.name,
                file,
                line
            );
        }
        let mut table = self.table.lock();
        let head = if sleeping {
            &mut ctx.sleep_head
        } else {
            &mut ctx.spin_head
        };
        table.chain_remove(head, obj.instance);
    }

    // ── Sleep invariant ─────────────────────────────────────────────

    /// Reports every held lock that may not be held across a voluntary
    /// sleep, except `exempt` (the lock about to be slept on) and the big
    /// lock.  Returns the offender count; severity is the caller's call.
    pub fn sleep(
        &self,
        ctx: &LockContext,
        check_only: bool,
        exempt: Option<&LockObject>,
        file: &'static str,
        line: u32,
    ) -> usize {
        if self.passive() {
            return 0;
        }
        let exempt_id = exempt.map(|o| o.instance);
        let mut offenders = [None::<SleepReport>; SLEEP_REPORT_MAX];
        let mut buffered = 0usize;
        let mut count = 0usize;
        {
            let table = self.table.lock();
            for head in [ctx.sleep_head, ctx.spin_head] {
                table.chain_for_each(head, |held| {
                    if Some(held.instance) == exempt_id
                        || self.config.is_big(held.name)
                        || held.flags.contains(LockFlags::SLEEPABLE)
                    {
                        return true;
                    }
                    count += 1;
                    if buffered < SLEEP_REPORT_MAX {
                        offenders[buffered] = Some(SleepReport {
                            name: held.name,
                            site: held.site,
                        });
                        buffered += 1;
                    }
                    true
                });
            }
        }
        let verb = if check_only { "could sleep" } else { "sleeping" };
        for report in offenders[..buffered].iter().flatten() {
            log::warn!(
                "{}:{}: {} with \"{}\" locked from {}",
                file,
                line,
                verb,
                report.name,
                report.site
            );
        }
        if count > 0 {
            self.trap("sleeping with locks held");
        }
        count
    }

    // ── Diagnostic bookkeeping ──────────────────────────────────────

    /// Saves the acquisition site of a tracked instance across a context
    /// switch.
    pub fn save(&self, obj: &LockObject) -> Option<SourceSite> {
        if obj.witness.is_none() {
            return None;
        }
        obj.site
    }

    /// Restores a previously saved acquisition site onto the instance and
    /// its witness.
    pub fn restore(&self, obj: &mut LockObject, site: SourceSite) {
        let Some(witness) = obj.witness else {
            return;
        };
        obj.site = Some(site);
        let mut table = self.table.lock();
        if let Some(node) = table.node_mut(witness) {
            node.site = Some(site);
        }
    }

    /// Number of locks a context currently holds, both chains.
    pub fn held_count(&self, ctx: &LockContext) -> usize {
        let table = self.table.lock();
        table.chain_len(ctx.sleep_head) + table.chain_len(ctx.spin_head)
    }

    /// Is `child` an established (possibly indirect) successor of `parent`?
    pub fn order_known(&self, parent: &str, child: &str) -> bool {
        let table = self.table.lock();
        let (Some(p), Some(c)) = (table.find(parent), table.find(child)) else {
            return false;
        };
        table.reach(p, c) == Reach::Yes
    }

    // ── Global controls ─────────────────────────────────────────────

    /// Master toggle.  Turning watching off makes every hook a no-op;
    /// instances initialized while off stay untracked even if it is turned
    /// back on.
    pub fn set_watch(&self, on: bool) {
        self.watch.store(on, Ordering::Release);
    }

    pub fn watching(&self) -> bool {
        self.watch.load(Ordering::Acquire)
    }

    /// Toggles the debugger trap on violations.
    pub fn set_trap(&self, on: bool) {
        self.trap.store(on, Ordering::Release);
    }

    /// The embedder's panic path calls this so the verifier stands down
    /// while the system dies.
    pub fn note_panic(&self) {
        self.panicked.store(true, Ordering::Release);
    }

    /// Has resource exhaustion permanently disabled checking?
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Order reversals squawked so far.
    pub fn order_violation_count(&self) -> usize {
        self.order_violations.load(Ordering::Relaxed)
    }

    /// Duplicate acquisitions squawked so far.
    pub fn duplicate_count(&self) -> usize {
        self.duplicate_squawks.load(Ordering::Relaxed)
    }

    /// (current, high-water) count of initialized lock instances.
    pub fn tracked(&self) -> (usize, usize) {
        (
            self.tracked_cur.load(Ordering::Relaxed),
            self.tracked_max.load(Ordering::Relaxed),
        )
    }

    // ── Internals ───────────────────────────────────────────────────

    fn passive(&self) -> bool {
        self.cold.load(Ordering::Acquire)
            || self.dead.load(Ordering::Acquire)
            || self.panicked.load(Ordering::Acquire)
            || !self.watch.load(Ordering::Acquire)
    }

    fn enroll(&self, name: &'static str, class: &'static LockClass) -> Option<Handle> {
        if !self.watch.load(Ordering::Acquire) {
            return None;
        }
        if class.is_spin() && self.config.skip_spin {
            return None;
        }
        let mut table = self.table.lock();
        match table.enroll(name, class) {
            Ok(handle) => Some(handle),
            Err(EnrollError::ClassMismatch { have }) => {
                drop(table);
                panic!(
                    "witness: {}: lock \"{}\" class ({}) does not match earlier ({})",
                    Violation::ClassMismatch,
                    name,
                    class.name,
                    have
                );
            }
            Err(EnrollError::Exhausted) => {
                drop(table);
                self.go_dead("witness nodes");
                None
            }
        }
    }

    /// Permanent degradation: log once, then every hook is a no-op for the
    /// rest of the run.  The caller's lock operation itself never fails.
    fn go_dead(&self, what: &'static str) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            log::error!(
                "witness: {}: {} exhausted; lock order checking disabled",
                Violation::ResourceExhaustion,
                what
            );
        }
    }

    fn trap(&self, reason: &'static str) {
        if self.trap.load(Ordering::Relaxed) {
            if let Some(debugger) = self.config.debugger {
                debugger(reason);
            }
        }
    }

    /// Shared-table access for the display module.
    pub(crate) fn table(&self) -> &Mutex<WitnessTable> {
        &self.table
    }
}
