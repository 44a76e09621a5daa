//! Builtin Natives
//!
//! Seven frozen namespaces (`@math`, `@array`, `@object`, `@string`,
//! `@time`, `@ctor`, `@system`) plus three top-level globals (`clock`,
//! `max`, `min`). Namespace natives are lenient: a missing or mistyped
//! argument yields `NaN`, `nil`, or `false` instead of raising. The global
//! `max`/`min` insist on at least two arguments.

use ember_core::Value;

use crate::vm::{NativeArgs, Vm};

pub(crate) mod array;
pub(crate) mod ctor;
pub(crate) mod math;
pub(crate) mod object;
pub(crate) mod string;
pub(crate) mod system;
pub(crate) mod time;

pub(crate) fn install_all(vm: &mut Vm) {
    math::install(vm);
    array::install(vm);
    object::install(vm);
    string::install(vm);
    time::install(vm);
    ctor::install(vm);
    system::install(vm);

    vm.define_global_native("clock", clock_native);
    vm.define_global_native("max", max_native);
    vm.define_global_native("min", min_native);
}

fn clock_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count != 0 {
        return Err("clock(): Expected 0 arguments but got some".to_string());
    }
    Ok(Value::number(vm.uptime_nanos() * 1e-9))
}

fn max_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    fold_extremum(vm, args, "max(): Expected at least 2 arguments", f64::max)
}

fn min_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    fold_extremum(vm, args, "min(): Expected at least 2 arguments", f64::min)
}

fn fold_extremum(
    vm: &Vm,
    args: NativeArgs,
    arity_error: &str,
    pick: fn(f64, f64) -> f64,
) -> Result<Value, String> {
    if args.count < 2 {
        return Err(arity_error.to_string());
    }
    let first = vm.arg(args, 0);
    let second = vm.arg(args, 1);
    if !first.is_number() || !second.is_number() {
        return Ok(Value::number(f64::NAN));
    }
    let mut value = pick(first.as_number(), second.as_number());
    for i in 2..args.count {
        let next = vm.arg(args, i);
        if !next.is_number() {
            value = f64::NAN;
            break;
        }
        value = pick(value, next.as_number());
    }
    Ok(Value::number(value))
}
