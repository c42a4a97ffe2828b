//! Resource exhaustion: the verifier dies quietly, the kernel does not.

mod common;

use common::{acquire, fresh_checker, witnessed};
use kwitness::{LockContext, SLEEP_MUTEX, WITNESS_MAX};

fn leaked(name: String) -> &'static str {
    Box::leak(name.into_boxed_str())
}

#[test]
fn witness_pool_exhaustion_disables_checking() {
    let checker = fresh_checker();

    // Distinct identities until the node pool runs dry.
    let mut locks = Vec::new();
    for i in 0..WITNESS_MAX {
        let mut obj = witnessed(leaked(format!("ident-{i}")), &SLEEP_MUTEX);
        checker.init(&mut obj);
        assert!(obj.is_tracked());
        locks.push(obj);
    }
    assert!(!checker.is_dead());

    // The next enrollment fails and permanently kills the subsystem.
    let mut extra = witnessed("one-too-many", &SLEEP_MUTEX);
    checker.init(&mut extra);
    assert!(!extra.is_tracked());
    assert!(checker.is_dead());

    // Checking is now a no-op — but the caller's own acquisition still
    // goes through unharmed.
    let mut ctx = LockContext::new();
    acquire(&checker, &mut ctx, &mut locks[0]);
    assert!(locks[0].is_locked());
    assert_eq!(checker.held_count(&ctx), 0);
    assert_eq!(checker.order_violation_count(), 0);

    checker.unlock(
        &mut ctx,
        &mut locks[0],
        kwitness::OpFlags::empty(),
        file!(),
        line!(),
    );
    locks[0].clear_locked();
}

#[test]
fn stack_block_exhaustion_disables_checking() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();

    // One identity, a flood of instances held simultaneously in a single
    // context: eventually the stack-block pool runs dry.  The acquisitions
    // themselves never fail.
    let mut locks = Vec::new();
    let mut i = 0;
    while !checker.is_dead() {
        i += 1;
        assert!(i < 100_000, "stack pool never ran dry");
        let mut obj = witnessed("flood", &SLEEP_MUTEX);
        checker.init(&mut obj);
        acquire(&checker, &mut ctx, &mut obj);
        assert!(obj.is_locked());
        locks.push(obj);
    }

    // Dead means dead: later acquisitions are not recorded.
    let held_at_death = checker.held_count(&ctx);
    let mut late = witnessed("flood", &SLEEP_MUTEX);
    checker.init(&mut late);
    acquire(&checker, &mut ctx, &mut late);
    assert_eq!(checker.held_count(&ctx), held_at_death);
}

#[test]
fn tracked_counters_follow_lifecycle() {
    let checker = fresh_checker();
    let mut a = witnessed("a", &SLEEP_MUTEX);
    let mut b = witnessed("b", &SLEEP_MUTEX);
    checker.init(&mut a);
    checker.init(&mut b);
    assert_eq!(checker.tracked(), (2, 2));

    checker.destroy(&mut a);
    assert_eq!(checker.tracked(), (1, 2));
    assert!(!a.is_tracked());
}
