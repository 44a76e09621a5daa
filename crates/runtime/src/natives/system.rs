//! `@system` namespace: collector control and allocator statistics.

use std::io::Write;

use ember_core::{BuiltinModule, Value};

use crate::format::format_value;
use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::System, "gc", gc_native);
    vm.define_native(BuiltinModule::System, "gcNext", gc_next_native);
    vm.define_native(BuiltinModule::System, "gcBegin", gc_begin_native);
    vm.define_native(BuiltinModule::System, "allocated", allocated_native);
    vm.define_native(BuiltinModule::System, "static", static_native);
    vm.define_native(BuiltinModule::System, "log", log_native);
}

fn gc_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    vm.collect_garbage();
    Ok(Value::NIL)
}

/// Override the next collection threshold, clamped to 1 KiB..=1 GiB.
fn gc_next_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count == 1 && vm.arg(args, 0).is_number() {
        vm.heap.next_gc = Vm::clamp_gc_tuning(vm.arg(args, 0).as_number());
        Ok(Value::TRUE)
    } else {
        Ok(Value::FALSE)
    }
}

/// Override the collection floor, clamped to 1 KiB..=1 GiB.
fn gc_begin_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count == 1 && vm.arg(args, 0).is_number() {
        vm.heap.gc_floor = Vm::clamp_gc_tuning(vm.arg(args, 0).as_number());
        Ok(Value::TRUE)
    } else {
        Ok(Value::FALSE)
    }
}

fn allocated_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    Ok(Value::number(vm.heap.bytes_allocated as f64))
}

fn static_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    Ok(Value::number(vm.heap.bytes_static as f64))
}

/// Prints every argument in expanded form, space-separated.
fn log_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count == 0 {
        return Ok(Value::NIL);
    }
    let mut line = String::new();
    for i in 0..args.count {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&format_value(&vm.heap, vm.arg(args, i), true));
    }
    let _ = writeln!(vm.out, "{line}");
    Ok(Value::NIL)
}
