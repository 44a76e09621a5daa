//! `@time` namespace: monotonic clock readings since VM start.

use ember_core::{BuiltinModule, Value};

use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::Time, "nano", nano_native);
    vm.define_native(BuiltinModule::Time, "micro", micro_native);
    vm.define_native(BuiltinModule::Time, "milli", milli_native);
    vm.define_native(BuiltinModule::Time, "second", second_native);
}

fn nano_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    Ok(Value::number(vm.uptime_nanos()))
}

fn micro_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    Ok(Value::number(vm.uptime_nanos() * 1e-3))
}

fn milli_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    Ok(Value::number(vm.uptime_nanos() * 1e-6))
}

fn second_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    Ok(Value::number(vm.uptime_nanos() * 1e-9))
}
