//! `@array` namespace: introspection and mutation for arrays and typed
//! arrays (string builders are excluded; they go through `@string`).

use ember_core::{BuiltinModule, HeapId, HeapObj, Value};

use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::Array, "length", length_native);
    vm.define_native(BuiltinModule::Array, "resize", resize_native);
    vm.define_native(BuiltinModule::Array, "push", push_native);
    vm.define_native(BuiltinModule::Array, "pop", pop_native);
}

fn array_arg(vm: &Vm, args: NativeArgs) -> Option<HeapId> {
    if args.count < 1 {
        return None;
    }
    let id = vm.arg(args, 0).as_heap()?;
    match vm.heap.get(id) {
        HeapObj::Array(_) | HeapObj::TypedArray(_) => Some(id),
        _ => None,
    }
}

fn length_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    match array_arg(vm, args) {
        Some(id) => {
            let len = match vm.heap.get(id) {
                HeapObj::Array(a) => a.items.len(),
                HeapObj::TypedArray(t) => t.len(),
                _ => 0,
            };
            Ok(Value::number(len as f64))
        }
        None => Ok(Value::number(f64::NAN)),
    }
}

fn push_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let Some(id) = array_arg(vm, args) else {
        return Ok(Value::number(f64::NAN));
    };

    let values: Vec<Value> = (1..args.count).map(|i| vm.arg(args, i)).collect();
    let before = payload_bytes(vm, id);
    let length = match vm.heap.get_mut(id) {
        HeapObj::Array(a) => {
            a.items.extend(values);
            a.items.len()
        }
        HeapObj::TypedArray(t) => {
            for value in values {
                t.push(value);
            }
            t.len()
        }
        _ => 0,
    };
    let after = payload_bytes(vm, id);
    vm.heap.adjust_bytes(after as isize - before as isize);

    Ok(Value::number(length as f64))
}

fn pop_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let Some(id) = array_arg(vm, args) else {
        return Ok(Value::NIL);
    };
    let value = match vm.heap.get_mut(id) {
        HeapObj::Array(a) => a.items.pop().unwrap_or(Value::NIL),
        HeapObj::TypedArray(t) => t.pop().unwrap_or(Value::NIL),
        _ => Value::NIL,
    };
    Ok(value)
}

fn resize_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let Some(id) = array_arg(vm, args) else {
        return Ok(Value::FALSE);
    };
    if args.count < 2 || !vm.arg(args, 1).is_number() {
        return Ok(Value::FALSE);
    }
    let requested = vm.arg(args, 1).as_number();
    if requested < 0.0 || requested > f64::from(u32::MAX) {
        return Err("Array size overflow".to_string());
    }

    let length = requested as usize;
    let before = payload_bytes(vm, id);
    match vm.heap.get_mut(id) {
        // Growth fills with nil / zero.
        HeapObj::Array(a) => a.items.resize(length, Value::NIL),
        HeapObj::TypedArray(t) => t.resize(length),
        _ => {}
    }
    let after = payload_bytes(vm, id);
    vm.heap.adjust_bytes(after as isize - before as isize);

    Ok(Value::TRUE)
}

fn payload_bytes(vm: &Vm, id: HeapId) -> usize {
    match vm.heap.get(id) {
        HeapObj::Array(a) => a.items.capacity() * std::mem::size_of::<Value>(),
        HeapObj::TypedArray(t) => t.payload_bytes(),
        _ => 0,
    }
}
