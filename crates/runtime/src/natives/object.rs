//! `@object` namespace: type predicates, global access, key listing.

use ember_core::{BuiltinModule, HeapObj, ObjArray, ObjRef, Value};

use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::Object, "isNumber", is_number_native);
    vm.define_native(BuiltinModule::Object, "isString", is_string_native);
    vm.define_native(BuiltinModule::Object, "isStringBuilder", is_string_builder_native);
    vm.define_native(BuiltinModule::Object, "isFunction", is_function_native);
    vm.define_native(BuiltinModule::Object, "isClass", is_class_native);
    vm.define_native(BuiltinModule::Object, "isInstance", is_instance_native);
    vm.define_native(BuiltinModule::Object, "isArray", is_array_native);
    vm.define_native(BuiltinModule::Object, "isTypedArray", is_typed_array_native);
    vm.define_native(BuiltinModule::Object, "isArrayLike", is_array_like_native);
    vm.define_native(BuiltinModule::Object, "isBoolean", is_boolean_native);
    vm.define_native(BuiltinModule::Object, "getGlobal", get_global_native);
    vm.define_native(BuiltinModule::Object, "setGlobal", set_global_native);
    vm.define_native(BuiltinModule::Object, "keys", keys_native);
}

fn heap_predicate(vm: &Vm, args: NativeArgs, test: fn(&HeapObj) -> bool) -> Value {
    let result = args.count >= 1
        && vm
            .arg(args, 0)
            .as_heap()
            .is_some_and(|id| test(vm.heap.get(id)));
    Value::boolean(result)
}

fn is_number_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(Value::boolean(args.count >= 1 && vm.arg(args, 0).is_number()))
}

fn is_boolean_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(Value::boolean(args.count >= 1 && vm.arg(args, 0).is_bool()))
}

fn is_string_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(Value::boolean(
        args.count >= 1 && vm.arg(args, 0).as_string().is_some(),
    ))
}

fn is_string_builder_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(heap_predicate(vm, args, |o| {
        matches!(o, HeapObj::StringBuilder(_))
    }))
}

fn is_function_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let value = vm.arg(args, 0);
    let is_native = value.is_obj() && matches!(value.as_obj(), ObjRef::Native(_));
    let result = args.count >= 1
        && (is_native
            || value.as_heap().is_some_and(|id| {
                matches!(
                    vm.heap.get(id),
                    HeapObj::Closure(_) | HeapObj::BoundMethod(_)
                )
            }));
    Ok(Value::boolean(result))
}

fn is_class_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(heap_predicate(vm, args, |o| matches!(o, HeapObj::Class(_))))
}

fn is_instance_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(heap_predicate(vm, args, |o| matches!(o, HeapObj::Instance(_))))
}

fn is_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(heap_predicate(vm, args, |o| matches!(o, HeapObj::Array(_))))
}

fn is_typed_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(heap_predicate(vm, args, |o| {
        matches!(o, HeapObj::TypedArray(_))
    }))
}

fn is_array_like_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    Ok(heap_predicate(vm, args, |o| {
        matches!(
            o,
            HeapObj::Array(_) | HeapObj::TypedArray(_) | HeapObj::StringBuilder(_)
        )
    }))
}

fn get_global_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 {
        if let Some(name) = vm.arg(args, 0).as_string() {
            if let Some(value) = vm.globals.get(vm.heap.strings(), name) {
                return Ok(value);
            }
        }
    }
    Ok(Value::NIL)
}

fn set_global_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 {
        if let Some(name) = vm.arg(args, 0).as_string() {
            let value = if args.count >= 2 { vm.arg(args, 1) } else { Value::NIL };
            vm.globals.set(vm.heap.strings(), name, value);
            return Ok(Value::TRUE);
        }
    }
    Ok(Value::FALSE)
}

/// Field names of an instance, as an array of interned strings.
fn keys_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let items: Vec<Value> = match vm.arg(args, 0).as_heap() {
        Some(id) if args.count >= 1 => match vm.heap.get(id) {
            HeapObj::Instance(instance) => instance
                .fields
                .iter()
                .map(|(key, _)| Value::string(key))
                .collect(),
            _ => return Err("keys() expects an instance as first argument.".to_string()),
        },
        _ => return Err("keys() expects an instance as first argument.".to_string()),
    };
    let array = vm.alloc(HeapObj::Array(ObjArray { items }));
    Ok(Value::heap(array))
}
