//! Shared scaffolding: a minimal stand-in for the lock primitives that
//! would normally drive the checker hooks.
#![allow(dead_code)]

use kwitness::{Checker, LockClass, LockContext, LockFlags, LockObject, OpFlags, WitnessConfig};

/// A live checker with empty tables.
pub fn fresh_checker() -> Checker {
    let checker = Checker::new(WitnessConfig::new());
    checker.initialize();
    checker
}

/// A tracked instance of `class`.
pub fn witnessed(name: &'static str, class: &'static LockClass) -> LockObject {
    LockObject::new(name, class, LockFlags::WITNESS)
}

/// What a primitive's acquire path does: take the lock, then tell the
/// checker.
pub fn acquire(checker: &Checker, ctx: &mut LockContext, obj: &mut LockObject) {
    acquire_at(checker, ctx, obj, file!(), line!());
}

pub fn acquire_at(
    checker: &Checker,
    ctx: &mut LockContext,
    obj: &mut LockObject,
    file: &'static str,
    line: u32,
) {
    obj.set_locked();
    checker.lock(ctx, obj, OpFlags::empty(), file, line);
}

/// Non-blocking acquire: order checks are skipped.
pub fn try_acquire(checker: &Checker, ctx: &mut LockContext, obj: &mut LockObject) {
    obj.set_locked();
    checker.lock(ctx, obj, OpFlags::TRY, file!(), line!());
}

/// What a primitive's release path does.
pub fn release(checker: &Checker, ctx: &mut LockContext, obj: &mut LockObject) {
    checker.unlock(ctx, obj, OpFlags::empty(), file!(), line!());
    obj.clear_locked();
}
