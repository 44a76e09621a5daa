//! `@math` namespace.

use ember_core::{BuiltinModule, Value};
use rand::{Rng, SeedableRng, rngs::SmallRng};

use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::Math, "max", max_native);
    vm.define_native(BuiltinModule::Math, "min", min_native);
    vm.define_native(BuiltinModule::Math, "abs", abs_native);
    vm.define_native(BuiltinModule::Math, "floor", floor_native);
    vm.define_native(BuiltinModule::Math, "ceil", ceil_native);
    vm.define_native(BuiltinModule::Math, "round", round_native);
    vm.define_native(BuiltinModule::Math, "pow", pow_native);
    vm.define_native(BuiltinModule::Math, "sqrt", sqrt_native);
    vm.define_native(BuiltinModule::Math, "sin", sin_native);
    vm.define_native(BuiltinModule::Math, "asin", asin_native);
    vm.define_native(BuiltinModule::Math, "cos", cos_native);
    vm.define_native(BuiltinModule::Math, "acos", acos_native);
    vm.define_native(BuiltinModule::Math, "tan", tan_native);
    vm.define_native(BuiltinModule::Math, "atan", atan_native);
    vm.define_native(BuiltinModule::Math, "log", log_native);
    vm.define_native(BuiltinModule::Math, "log2", log2_native);
    vm.define_native(BuiltinModule::Math, "log10", log10_native);
    vm.define_native(BuiltinModule::Math, "exp", exp_native);
    vm.define_native(BuiltinModule::Math, "isNaN", is_nan_native);
    vm.define_native(BuiltinModule::Math, "isFinite", is_finite_native);
    vm.define_native(BuiltinModule::Math, "random", random_native);
    vm.define_native(BuiltinModule::Math, "seed", seed_native);
}

fn nan() -> Value {
    Value::number(f64::NAN)
}

fn unary(vm: &Vm, args: NativeArgs, f: fn(f64) -> f64) -> Value {
    if args.count >= 1 {
        let v = vm.arg(args, 0);
        if v.is_number() {
            return Value::number(f(v.as_number()));
        }
    }
    nan()
}

fn max_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(fold(vm, args, f64::NEG_INFINITY, f64::max))
}

fn min_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(fold(vm, args, f64::INFINITY, f64::min))
}

fn fold(vm: &Vm, args: NativeArgs, seed: f64, pick: fn(f64, f64) -> f64) -> Value {
    let mut value = seed;
    for i in 0..args.count {
        let v = vm.arg(args, i);
        if !v.is_number() {
            return nan();
        }
        value = pick(value, v.as_number());
    }
    Value::number(value)
}

fn abs_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.abs()))
}

fn floor_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.floor()))
}

fn ceil_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.ceil()))
}

fn round_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.round()))
}

fn pow_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 2 {
        let base = vm.arg(args, 0);
        let exponent = vm.arg(args, 1);
        if base.is_number() && exponent.is_number() {
            return Ok(Value::number(base.as_number().powf(exponent.as_number())));
        }
    }
    Ok(nan())
}

fn sqrt_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.sqrt()))
}

fn sin_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.sin()))
}

fn asin_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.asin()))
}

fn cos_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.cos()))
}

fn acos_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.acos()))
}

fn tan_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.tan()))
}

fn atan_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.atan()))
}

fn log_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.ln()))
}

fn log2_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.log2()))
}

fn log10_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.log10()))
}

fn exp_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(unary(vm, args, |x| x.exp()))
}

fn is_nan_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let v = vm.arg(args, 0);
    Ok(Value::boolean(
        args.count >= 1 && v.is_number() && v.as_number().is_nan(),
    ))
}

fn is_finite_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let v = vm.arg(args, 0);
    Ok(Value::boolean(
        args.count >= 1 && v.is_number() && v.as_number().is_finite(),
    ))
}

/// Uniform in [0, 1).
fn random_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let _ = args;
    Ok(Value::number(vm.rng.gen_range(0.0..1.0)))
}

fn seed_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 && vm.arg(args, 0).is_number() {
        let seed = vm.arg(args, 0).as_number() as u32;
        vm.rng = SmallRng::seed_from_u64(u64::from(seed));
        Ok(Value::TRUE)
    } else {
        Ok(Value::FALSE)
    }
}
