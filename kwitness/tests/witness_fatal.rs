//! Caller contract violations halt immediately.

mod common;

use common::{acquire, fresh_checker, witnessed};
use kwitness::{
    ClassFlags, LockClass, LockContext, LockFlags, LockObject, OpFlags, SLEEP_MUTEX, SPIN_MUTEX,
};

/// A class that permits neither recursion nor sleeping while held.
static STRICT: LockClass = LockClass {
    name: "strict mutex",
    flags: ClassFlags::SLEEP,
};

#[test]
#[should_panic(expected = "is not locked")]
fn lock_hook_on_unlocked_instance() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut a = witnessed("a", &SLEEP_MUTEX);
    checker.init(&mut a);
    // The primitive forgot to mark the lock held before the hook.
    checker.lock(&mut ctx, &mut a, OpFlags::empty(), file!(), line!());
}

#[test]
#[should_panic(expected = "recursed on non-recursable lock")]
fn recursion_on_non_recursable_instance() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut a = witnessed("a", &STRICT);
    checker.init(&mut a);
    acquire(&checker, &mut ctx, &mut a);
    a.set_recursed();
    checker.lock(&mut ctx, &mut a, OpFlags::empty(), file!(), line!());
}

#[test]
#[should_panic(expected = "recursed lock")]
fn recursed_release_of_unlocked_instance() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut a = witnessed("a", &SLEEP_MUTEX);
    checker.init(&mut a);
    acquire(&checker, &mut ctx, &mut a);
    a.set_recursed();
    a.clear_locked();
    checker.unlock(&mut ctx, &mut a, OpFlags::empty(), file!(), line!());
}

#[test]
#[should_panic(expected = "destroyed while held")]
fn destroying_a_held_lock() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut a = witnessed("a", &SLEEP_MUTEX);
    checker.init(&mut a);
    acquire(&checker, &mut ctx, &mut a);
    checker.destroy(&mut a);
}

#[test]
#[should_panic(expected = "does not match earlier")]
fn one_name_two_classes() {
    let checker = fresh_checker();
    let mut sleeper = witnessed("shared name", &SLEEP_MUTEX);
    let mut spinner = witnessed("shared name", &SPIN_MUTEX);
    checker.init(&mut sleeper);
    checker.init(&mut spinner);
}

#[test]
#[should_panic(expected = "already initialized")]
fn double_initialization() {
    let checker = fresh_checker();
    let mut a = witnessed("a", &SLEEP_MUTEX);
    checker.init(&mut a);
    checker.init(&mut a);
}

#[test]
#[should_panic(expected = "can not be recursable")]
fn instance_flag_exceeding_class() {
    let checker = fresh_checker();
    let mut a = LockObject::new("a", &STRICT, LockFlags::WITNESS | LockFlags::RECURSABLE);
    checker.init(&mut a);
}

#[test]
#[should_panic(expected = "blockable sleep lock")]
fn sleep_lock_while_spinning() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut s = witnessed("spin", &SPIN_MUTEX);
    let mut a = witnessed("mutex", &SLEEP_MUTEX);
    checker.init(&mut s);
    checker.init(&mut a);
    acquire(&checker, &mut ctx, &mut s);
    // Acquiring a blockable lock with a spin lock held could deadlock the
    // execution unit.
    acquire(&checker, &mut ctx, &mut a);
}

#[test]
#[should_panic(expected = "switchable sleep unlock")]
fn switchable_release_with_spin_locks_held() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut a = witnessed("mutex", &SLEEP_MUTEX);
    let mut s = witnessed("spin", &SPIN_MUTEX);
    checker.init(&mut a);
    checker.init(&mut s);
    acquire(&checker, &mut ctx, &mut a);
    acquire(&checker, &mut ctx, &mut s);
    checker.unlock(&mut ctx, &mut a, OpFlags::empty(), file!(), line!());
}

#[test]
fn noswitch_release_with_spin_locks_held_is_fine() {
    let checker = fresh_checker();
    let mut ctx = LockContext::new();
    let mut a = witnessed("mutex", &SLEEP_MUTEX);
    let mut s = witnessed("spin", &SPIN_MUTEX);
    checker.init(&mut a);
    checker.init(&mut s);
    acquire(&checker, &mut ctx, &mut a);
    acquire(&checker, &mut ctx, &mut s);
    checker.unlock(&mut ctx, &mut a, OpFlags::NOSWITCH, file!(), line!());
    a.clear_locked();
    assert_eq!(checker.held_count(&ctx), 1);
}
